//! Record → document normalization.
//!
//! Pure functions: no I/O, no config. Which records reach [`to_document`] is
//! decided by the dedup strategy before this runs.

use crate::models::{Document, DocumentMetadata, SourceRecord};

/// Build the document text from question and answer.
///
/// The template is a fixed Spanish-language string and is not localized.
pub fn synthesize_text(question: &str, answer: &str) -> String {
    format!("Pregunta: {}. Respuesta: {}", question, answer)
}

/// Normalize one record.
///
/// The document id is the article id; records without one fall back to the
/// record id so the batch never contains an empty id.
pub fn to_document(record: &SourceRecord) -> Document {
    let id = record
        .knowledge_article_id
        .clone()
        .unwrap_or_else(|| record.id.clone());

    Document {
        id,
        text: synthesize_text(
            record.question.as_deref().unwrap_or_default(),
            record.answer.as_deref().unwrap_or_default(),
        ),
        metadata: DocumentMetadata {
            article_number: record.article_number.clone(),
            language: record.language.clone(),
            record_type_id: record.record_type_id.clone(),
            id: record.id.clone(),
            article_created_date: record.article_created_date.clone(),
            created_date: record.created_date.clone(),
            first_published_date: record.first_published_date.clone(),
            last_modified_date: record.last_modified_date.clone(),
            last_published_date: record.last_published_date.clone(),
            validation_status: record.validation_status.clone(),
            version_number: record.version_number.clone(),
        },
    }
}

/// Transform the records that pass `skip`, keeping extraction order.
///
/// Returns the documents together with the CRM record ids they came from,
/// index-aligned, so the caller can pair them with upsert results.
pub fn transform_all<'a, I, F>(records: I, mut skip: F) -> (Vec<Document>, Vec<String>)
where
    I: IntoIterator<Item = &'a SourceRecord>,
    F: FnMut(&SourceRecord) -> bool,
{
    let mut documents = Vec::new();
    let mut record_ids = Vec::new();
    for record in records {
        if skip(record) {
            continue;
        }
        documents.push(to_document(record));
        record_ids.push(record.id.clone());
    }
    (documents, record_ids)
}
