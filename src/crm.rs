//! Salesforce knowledge-article extractor.
//!
//! Reads every `Knowledge__kav` record whose `PublishStatus` is `Online`
//! through the REST query API, following `nextRecordsUrl` until the result
//! set is exhausted. Also writes the `retrievalAPISynced__c` flag back when
//! the CRM-flag dedup strategy is in use.
//!
//! # Authentication
//!
//! | `crm.auth` | Session source |
//! |------------|----------------|
//! | `password` | SOAP `login` against the org-type login host (`test.salesforce.com` or `login.salesforce.com`) with username, password + security token |
//! | `token`    | `access_token` used as-is against `instance_url` or `https://<domain>.my.salesforce.com` |
//!
//! Password sessions are created lazily on the first query and dropped on a
//! 401, so the next cycle logs in again.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{CrmAuthMode, CrmConfig};
use crate::models::SourceRecord;

/// Fields selected from `Knowledge__kav`.
pub const ARTICLE_FIELDS: [&str; 26] = [
    "ArchivedDate",
    "ArticleCreatedDate",
    "ArticleMasterLanguage",
    "ArticleNumber",
    "ArticleTotalViewCount",
    "CreatedDate",
    "FirstPublishedDate",
    "Id",
    "IsDeleted",
    "IsLatestVersion",
    "VersionNumber",
    "ValidationStatus",
    "IsVisibleInApp",
    "IsVisibleInCsp",
    "IsVisibleInPkb",
    "IsVisibleInPrm",
    "KnowledgeArticleId",
    "Language",
    "LastModifiedById",
    "LastModifiedDate",
    "LastPublishedDate",
    "PublishStatus",
    "RecordTypeId",
    "Answer__c",
    "Question__c",
    "retrievalAPISynced__c",
];

const ARTICLE_OBJECT: &str = "Knowledge__kav";

/// Build the query selecting all online articles.
pub fn online_articles_query() -> String {
    format!(
        "SELECT {} FROM {} WHERE PublishStatus = 'Online'",
        ARTICLE_FIELDS.join(","),
        ARTICLE_OBJECT
    )
}

/// A source of knowledge articles.
///
/// The pipeline owns one instance for the life of the process.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Return every record matching the online predicate.
    async fn fetch_online(&mut self) -> Result<Vec<SourceRecord>>;

    /// Set the synced flag on one record.
    async fn mark_synced(&mut self, record_id: &str) -> Result<()>;
}

/// An authenticated REST session.
#[derive(Debug, Clone)]
struct Session {
    instance_url: String,
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    total_size: usize,
    done: bool,
    #[serde(default)]
    records: Vec<SourceRecord>,
    #[serde(default)]
    next_records_url: Option<String>,
}

/// REST client for one Salesforce org.
pub struct SalesforceClient {
    client: reqwest::Client,
    config: CrmConfig,
    session: Option<Session>,
}

impl SalesforceClient {
    /// Create a client. Token sessions are ready immediately; password
    /// sessions log in on first use.
    pub fn new(config: &CrmConfig) -> Result<Self> {
        let session = match config.auth {
            CrmAuthMode::Token => Some(Session {
                instance_url: config
                    .resolved_instance_url()
                    .ok_or_else(|| anyhow!("crm.domain or crm.instance_url required"))?,
                access_token: config.access_token.clone().unwrap_or_default(),
            }),
            CrmAuthMode::Password => None,
        };

        Ok(Self {
            client: reqwest::Client::new(),
            config: config.clone(),
            session,
        })
    }

    async fn session(&mut self) -> Result<Session> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }
        let session = self.login().await?;
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Drop a session the server no longer accepts. Token sessions are kept:
    /// there is nothing to refresh them with.
    fn invalidate(&mut self) {
        if self.config.auth == CrmAuthMode::Password {
            self.session = None;
        }
    }

    async fn login(&self) -> Result<Session> {
        let login_url = self.config.resolved_login_url()?;
        let url = format!(
            "{}/services/Soap/u/{}",
            login_url, self.config.api_version
        );
        let envelope = login_envelope(
            self.config.username.as_deref().unwrap_or_default(),
            self.config.password.as_deref().unwrap_or_default(),
            self.config.security_token.as_deref().unwrap_or_default(),
        );

        tracing::info!(login_url = %login_url, "logging in to Salesforce");

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "text/xml; charset=UTF-8")
            .header("SOAPAction", "login")
            .body(envelope)
            .send()
            .await
            .with_context(|| format!("Failed to reach Salesforce login at {}", login_url))?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let reason = parse_login_response(&body)
                .err()
                .map(|e| e.to_string())
                .unwrap_or_else(|| body.chars().take(500).collect());
            bail!("Salesforce login failed (HTTP {}): {}", status, reason);
        }

        parse_login_response(&body)
    }

    fn data_url(&self, session: &Session, path: &str) -> String {
        format!(
            "{}/services/data/v{}/{}",
            session.instance_url, self.config.api_version, path
        )
    }
}

#[async_trait]
impl KnowledgeSource for SalesforceClient {
    async fn fetch_online(&mut self) -> Result<Vec<SourceRecord>> {
        let session = self.session().await?;
        let soql = online_articles_query();

        let mut records = Vec::new();
        let mut request = self
            .client
            .get(self.data_url(&session, "query"))
            .query(&[("q", soql.as_str())]);

        loop {
            let resp = request
                .bearer_auth(&session.access_token)
                .send()
                .await
                .context("Failed to query Salesforce")?;

            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.invalidate();
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "Salesforce query failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let page: QueryResponse = resp
                .json()
                .await
                .context("Failed to decode Salesforce query response")?;
            tracing::debug!(
                page = page.records.len(),
                total = page.total_size,
                done = page.done,
                "query page"
            );
            records.extend(page.records);

            match page.next_records_url {
                Some(next) if !page.done => {
                    request = self
                        .client
                        .get(format!("{}{}", session.instance_url, next));
                }
                _ => break,
            }
        }

        let before = records.len();
        records.retain(SourceRecord::is_online);
        if records.len() < before {
            tracing::warn!(
                dropped = before - records.len(),
                "query returned records that are not online"
            );
        }

        Ok(records)
    }

    async fn mark_synced(&mut self, record_id: &str) -> Result<()> {
        let session = self.session().await?;
        let url = self.data_url(
            &session,
            &format!("sobjects/{}/{}", ARTICLE_OBJECT, record_id),
        );

        let resp = self
            .client
            .patch(&url)
            .bearer_auth(&session.access_token)
            .json(&serde_json::json!({ "retrievalAPISynced__c": true }))
            .send()
            .await
            .with_context(|| format!("Failed to update {}", record_id))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate();
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Salesforce update of {} failed (HTTP {}): {}",
                record_id,
                status,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(())
    }
}

fn login_envelope(username: &str, password: &str, security_token: &str) -> String {
    use quick_xml::escape::escape;
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8" ?>"#,
            r#"<env:Envelope xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"xmlns:env="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<env:Body><n1:login xmlns:n1="urn:partner.soap.sforce.com">"#,
            r#"<n1:username>{}</n1:username><n1:password>{}{}</n1:password>"#,
            r#"</n1:login></env:Body></env:Envelope>"#
        ),
        escape(username),
        escape(password),
        escape(security_token)
    )
}

/// Pull `sessionId` and the instance host out of a SOAP login response.
///
/// A SOAP fault becomes an error carrying its `faultstring`.
fn parse_login_response(xml: &str) -> Result<Session> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<Vec<u8>> = None;
    let mut session_id = None;
    let mut server_url = None;
    let mut fault = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => current = Some(e.local_name().as_ref().to_vec()),
            Ok(Event::Text(te)) => {
                let text = te
                    .unescape()
                    .map_err(|e| anyhow!("Malformed login response: {}", e))?
                    .into_owned();
                match current.as_deref() {
                    Some(b"sessionId") => session_id = Some(text),
                    Some(b"serverUrl") => server_url = Some(text),
                    Some(b"faultstring") => fault = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => bail!("Malformed login response: {}", e),
            _ => {}
        }
        buf.clear();
    }

    if let Some(fault) = fault {
        bail!("{}", fault);
    }

    let access_token = session_id.ok_or_else(|| anyhow!("login response has no sessionId"))?;
    let server_url = server_url.ok_or_else(|| anyhow!("login response has no serverUrl"))?;
    let instance_url = server_url
        .split("/services/")
        .next()
        .unwrap_or(&server_url)
        .trim_end_matches('/')
        .to_string();

    Ok(Session {
        instance_url,
        access_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_selects_26_fields_online_only() {
        let q = online_articles_query();
        assert!(q.starts_with("SELECT ArchivedDate,ArticleCreatedDate,"));
        assert!(q.ends_with("FROM Knowledge__kav WHERE PublishStatus = 'Online'"));
        assert_eq!(ARTICLE_FIELDS.len(), 26);
        assert!(q.contains("retrievalAPISynced__c FROM"));
    }

    #[test]
    fn test_parse_login_success() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns="urn:partner.soap.sforce.com">
  <soapenv:Body>
    <loginResponse>
      <result>
        <metadataServerUrl>https://acme.my.salesforce.com/services/Soap/m/59.0/00D</metadataServerUrl>
        <passwordExpired>false</passwordExpired>
        <serverUrl>https://acme.my.salesforce.com/services/Soap/u/59.0/00D</serverUrl>
        <sessionId>00D!AQ&amp;token</sessionId>
      </result>
    </loginResponse>
  </soapenv:Body>
</soapenv:Envelope>"#;
        let session = parse_login_response(xml).unwrap();
        assert_eq!(session.instance_url, "https://acme.my.salesforce.com");
        assert_eq!(session.access_token, "00D!AQ&token");
    }

    #[test]
    fn test_parse_login_fault() {
        let xml = r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
  <soapenv:Body>
    <soapenv:Fault>
      <faultcode>INVALID_LOGIN</faultcode>
      <faultstring>INVALID_LOGIN: Invalid username, password, security token; or user locked out.</faultstring>
    </soapenv:Fault>
  </soapenv:Body>
</soapenv:Envelope>"#;
        let err = parse_login_response(xml).unwrap_err();
        assert!(err.to_string().starts_with("INVALID_LOGIN"));
    }

    #[test]
    fn test_login_envelope_escapes_credentials() {
        let body = login_envelope("a&b@example.com", "p<w", "tok");
        assert!(body.contains("<n1:username>a&amp;b@example.com</n1:username>"));
        assert!(body.contains("<n1:password>p&lt;wtok</n1:password>"));
    }
}
