//! In-process stand-ins for the Salesforce REST/SOAP API and the upsert API.
#![allow(dead_code)]

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use kb_sync::config::{parse_config, Config};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A `Knowledge__kav` record as the query endpoint returns it.
pub fn article(id: &str, synced: bool) -> Value {
    json!({
        "attributes": {
            "type": "Knowledge__kav",
            "url": format!("/services/data/v59.0/sobjects/Knowledge__kav/{}", id)
        },
        "Id": id,
        "KnowledgeArticleId": format!("kA-{}", id),
        "ArticleNumber": format!("0000{}", id),
        "Language": "es",
        "RecordTypeId": "012000000000001",
        "PublishStatus": "Online",
        "ValidationStatus": "Validated",
        "VersionNumber": 1,
        "ArticleCreatedDate": "2024-01-10T09:00:00.000+0000",
        "CreatedDate": "2024-01-10T09:00:00.000+0000",
        "FirstPublishedDate": "2024-01-11T09:00:00.000+0000",
        "LastModifiedDate": "2024-02-01T09:00:00.000+0000",
        "LastPublishedDate": "2024-02-01T09:00:00.000+0000",
        "IsDeleted": false,
        "Question__c": format!("Question {}", id),
        "Answer__c": format!("Answer {}", id),
        "retrievalAPISynced__c": synced
    })
}

// ─── Salesforce ─────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MockCrm {
    /// Query result pages, served in order via `nextRecordsUrl`.
    pub pages: Arc<Vec<Vec<Value>>>,
    /// Status for the query endpoint; 200 when `None`.
    pub query_status: Option<u16>,
    /// Number of upcoming queries answered with 401 before serving pages.
    pub expired_sessions: Arc<AtomicUsize>,
    pub queries: Arc<Mutex<Vec<String>>>,
    pub auth_headers: Arc<Mutex<Vec<String>>>,
    pub patched: Arc<Mutex<Vec<(String, Value)>>>,
    pub logins: Arc<Mutex<Vec<String>>>,
    /// Record ids whose PATCH answers 400.
    pub reject_patch: Arc<Vec<String>>,
}

impl MockCrm {
    pub fn with_records(records: Vec<Value>) -> Self {
        Self::with_pages(vec![records])
    }

    pub fn with_pages(pages: Vec<Vec<Value>>) -> Self {
        Self {
            pages: Arc::new(pages),
            ..Default::default()
        }
    }

    pub async fn start(self) -> String {
        let router = Router::new()
            .route("/services/data/v59.0/query", get(crm_query))
            .route("/services/data/v59.0/query/{cursor}", get(crm_query_more))
            .route(
                "/services/data/v59.0/sobjects/Knowledge__kav/{id}",
                patch(crm_patch),
            )
            .route("/services/Soap/u/59.0", post(crm_login))
            .with_state(self);
        spawn(router).await
    }

    pub fn patched_ids(&self) -> Vec<String> {
        self.patched
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

fn crm_page(state: &MockCrm, index: usize) -> Value {
    let total: usize = state.pages.iter().map(Vec::len).sum();
    let records = state.pages.get(index).cloned().unwrap_or_default();
    let more = index + 1 < state.pages.len();
    let mut page = json!({
        "totalSize": total,
        "done": !more,
        "records": records,
    });
    if more {
        page["nextRecordsUrl"] = json!(format!("/services/data/v59.0/query/01g-{}", index + 1));
    }
    page
}

fn record_auth(state: &MockCrm, headers: &HeaderMap) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.auth_headers.lock().unwrap().push(auth);
}

async fn crm_query(
    State(state): State<MockCrm>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    record_auth(&state, &headers);
    state
        .queries
        .lock()
        .unwrap()
        .push(params.get("q").cloned().unwrap_or_default());
    let expired = state
        .expired_sessions
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    let status = if expired {
        Some(401)
    } else {
        state.query_status
    };
    if let Some(status) = status {
        return (
            StatusCode::from_u16(status).unwrap(),
            r#"[{"message":"Session expired or invalid","errorCode":"INVALID_SESSION_ID"}]"#
                .to_string(),
        );
    }
    (StatusCode::OK, crm_page(&state, 0).to_string())
}

async fn crm_query_more(
    State(state): State<MockCrm>,
    headers: HeaderMap,
    Path(cursor): Path<String>,
) -> Json<Value> {
    record_auth(&state, &headers);
    let index = cursor
        .rsplit('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    Json(crm_page(&state, index))
}

async fn crm_patch(
    State(state): State<MockCrm>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    if state.reject_patch.contains(&id) {
        return StatusCode::BAD_REQUEST;
    }
    state.patched.lock().unwrap().push((id, body));
    StatusCode::NO_CONTENT
}

async fn crm_login(State(state): State<MockCrm>, headers: HeaderMap, body: String) -> String {
    state.logins.lock().unwrap().push(body);
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns="urn:partner.soap.sforce.com">
<soapenv:Body><loginResponse><result>
<serverUrl>http://{}/services/Soap/u/59.0/00Dxx0000001gPL</serverUrl>
<sessionId>SESSION-FROM-LOGIN</sessionId>
</result></loginResponse></soapenv:Body></soapenv:Envelope>"#,
        host
    )
}

// ─── Upsert API ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MockUpsert {
    pub status: u16,
    pub body: String,
    /// `(authorization header, request body)` per call.
    pub requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockUpsert {
    pub fn ok(ids: &[&str]) -> Self {
        Self {
            status: 200,
            body: json!({ "ids": ids }).to_string(),
            requests: Arc::default(),
        }
    }

    pub fn failing(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            requests: Arc::default(),
        }
    }

    pub async fn start(self) -> String {
        let router = Router::new()
            .route("/upsert", post(upsert_handler))
            .with_state(self);
        spawn(router).await
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_body(&self) -> Value {
        self.requests.lock().unwrap().last().unwrap().1.clone()
    }
}

async fn upsert_handler(
    State(state): State<MockUpsert>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.requests.lock().unwrap().push((auth, body));
    (StatusCode::from_u16(state.status).unwrap(), state.body.clone())
}

// ─── Config ─────────────────────────────────────────────────────────

/// Token-auth config pointing at the two mocks.
pub fn config(crm_url: &str, upsert_url: &str, dedup: &str, ledger: &FsPath) -> Config {
    let content = format!(
        r#"
[crm]
org_type = "test"
auth = "token"
instance_url = "{}"
access_token = "crm-token"

[upsert]
endpoint = "{}"
token = "upsert-token"

[pipeline]
dedup = "{}"
ledger_path = "{}"
interval_minutes = 1
"#,
        crm_url,
        upsert_url,
        dedup,
        ledger.display()
    );
    parse_config(&content, |_| None).unwrap()
}
