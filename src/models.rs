//! Core data models used throughout kb-sync.
//!
//! [`SourceRecord`] is the article as the CRM returns it, [`Document`] is the
//! normalized shape sent to the upsert API, and [`CycleReport`] summarizes
//! one extract-transform-load pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A `Knowledge__kav` record as returned by the CRM query endpoint.
///
/// Every field is optional: the CRM returns `null` for unset values and the
/// record is owned by the CRM, so nothing here is validated.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceRecord {
    pub id: String,
    #[serde(default)]
    pub knowledge_article_id: Option<String>,
    #[serde(default, rename = "Question__c")]
    pub question: Option<String>,
    #[serde(default, rename = "Answer__c")]
    pub answer: Option<String>,
    #[serde(default)]
    pub article_number: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub record_type_id: Option<String>,
    #[serde(default)]
    pub publish_status: Option<String>,
    #[serde(default)]
    pub validation_status: Option<String>,
    #[serde(default)]
    pub version_number: Option<serde_json::Value>,
    #[serde(default)]
    pub article_created_date: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub first_published_date: Option<String>,
    #[serde(default)]
    pub last_modified_date: Option<String>,
    #[serde(default)]
    pub last_published_date: Option<String>,
    #[serde(default, rename = "retrievalAPISynced__c")]
    pub already_synced: Option<bool>,
}

impl SourceRecord {
    pub fn is_synced(&self) -> bool {
        self.already_synced.unwrap_or(false)
    }

    /// Records without a `PublishStatus` are taken as online; the query
    /// only selects online versions.
    pub fn is_online(&self) -> bool {
        self.publish_status.as_deref().map_or(true, |s| s == "Online")
    }
}

/// Normalized document pushed to the upsert API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// Passthrough fields copied verbatim from the source record.
///
/// Field order here is the serialized key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentMetadata {
    pub article_number: Option<String>,
    pub language: Option<String>,
    pub record_type_id: Option<String>,
    pub id: String,
    pub article_created_date: Option<String>,
    pub created_date: Option<String>,
    pub first_published_date: Option<String>,
    pub last_modified_date: Option<String>,
    pub last_published_date: Option<String>,
    pub validation_status: Option<String>,
    pub version_number: Option<serde_json::Value>,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub extracted: usize,
    pub skipped: usize,
    pub submitted: usize,
    pub loaded: usize,
    /// Records whose CRM synced flag could not be written back.
    pub flag_failures: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CycleReport {
    /// True when the cycle found nothing new and made no upsert call.
    pub fn nothing_to_do(&self) -> bool {
        self.submitted == 0
    }
}
