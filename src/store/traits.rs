//! `DocumentRegistry` trait: keyed store of processed documents.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::pipeline::metrics::WordCount;

/// A successfully processed submission.
///
/// Created once by the document pipeline after recognition succeeds and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Row id assigned by the registry (`None` until saved).
    pub id: Option<i64>,
    /// Correlation token handed to the submitter.
    pub reference_number: String,
    pub original_file_name: String,
    /// Where the recognized text was persisted.
    pub result_locator: PathBuf,
    /// Address the submission came from.
    pub submitter: String,
    pub processed_at: DateTime<Utc>,
    /// Size of the submitted document in bytes.
    pub file_size: u64,
    pub recognized_text: String,
    pub total_words: usize,
    pub top_words: Vec<WordCount>,
}

/// Backend-agnostic registry of document records.
#[async_trait]
pub trait DocumentRegistry: Send + Sync {
    /// Persist a new record. Returns it with `id` filled in.
    ///
    /// Fails with `DatabaseError::Constraint` if the reference number is taken.
    async fn save(&self, record: DocumentRecord) -> Result<DocumentRecord, DatabaseError>;

    /// Look up a record by its reference number.
    async fn find_by_reference_number(
        &self,
        reference: &str,
    ) -> Result<Option<DocumentRecord>, DatabaseError>;
}
