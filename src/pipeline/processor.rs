//! Document pipeline: recognize, store, measure, register, deliver.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineStage};
use crate::ocr::DocumentRecognizer;
use crate::pipeline::dispatcher::Dispatcher;
use crate::pipeline::metrics::{calculate_metrics, format_top_words};
use crate::store::{DocumentRecord, DocumentRegistry};

/// Subject prefix of the result message sent after a submission.
pub const RESULT_SUBJECT_PREFIX: &str = "Document Processing Complete - Ref: ";

/// Turns a decrypted document into a registered, delivered record.
pub struct DocumentPipeline {
    recognizer: DocumentRecognizer,
    registry: Arc<dyn DocumentRegistry>,
    dispatcher: Arc<Dispatcher>,
    storage_root: PathBuf,
}

impl DocumentPipeline {
    pub fn new(
        recognizer: DocumentRecognizer,
        registry: Arc<dyn DocumentRegistry>,
        dispatcher: Arc<Dispatcher>,
        storage_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            recognizer,
            registry,
            dispatcher,
            storage_root: storage_root.into(),
        }
    }

    /// Where the recognized text for `reference` is stored.
    pub fn result_locator(&self, reference: &str) -> PathBuf {
        self.storage_root.join(format!("{reference}_ocr.txt"))
    }

    /// Process one document for `submitter`.
    ///
    /// Nothing is registered unless recognition, storage and the registry
    /// write all succeed. A delivery failure after registration leaves the
    /// record in place and reports the `dispatch` stage.
    pub async fn process(
        &self,
        document: &Path,
        original_file_name: &str,
        submitter: &str,
    ) -> Result<DocumentRecord, PipelineError> {
        let reference = Uuid::new_v4().to_string();
        info!(reference = %reference, file = %original_file_name, "Processing document");

        let file_size = tokio::fs::metadata(document)
            .await
            .map_err(|e| PipelineError::new(PipelineStage::Recognize, e))?
            .len();

        let text = self
            .recognizer
            .recognize_document(document)
            .await
            .map_err(|e| PipelineError::new(PipelineStage::Recognize, e))?;
        debug!(reference = %reference, chars = text.len(), "Recognition complete");

        let locator = self.result_locator(&reference);
        if let Err(e) = self.store_result(&locator, &text).await {
            remove_result(&locator).await;
            return Err(PipelineError::new(PipelineStage::Store, e));
        }

        let metrics = calculate_metrics(&text);
        debug!(reference = %reference, total_words = metrics.total_words, "Metrics calculated");

        let record = DocumentRecord {
            id: None,
            reference_number: reference.clone(),
            original_file_name: original_file_name.to_string(),
            result_locator: locator.clone(),
            submitter: submitter.to_string(),
            processed_at: Utc::now(),
            file_size,
            recognized_text: text,
            total_words: metrics.total_words,
            top_words: metrics.top_words,
        };

        let record = match self.registry.save(record).await {
            Ok(saved) => saved,
            Err(e) => {
                remove_result(&locator).await;
                return Err(PipelineError::new(PipelineStage::Register, e));
            }
        };
        info!(reference = %reference, id = ?record.id, "Document registered");

        self.dispatcher
            .send_secure(
                submitter,
                &format!("{RESULT_SUBJECT_PREFIX}{reference}"),
                &metrics_report(&record),
                &locator,
            )
            .await
            .map_err(|e| PipelineError::new(PipelineStage::Dispatch, e))?;

        info!(reference = %reference, to = %submitter, "Document processing complete");
        Ok(record)
    }

    async fn store_result(&self, locator: &Path, text: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.storage_root).await?;
        tokio::fs::write(locator, text).await
    }
}

async fn remove_result(locator: &Path) {
    match tokio::fs::remove_file(locator).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %locator.display(), error = %e, "Failed to remove result file"),
    }
}

/// Human-readable summary sent with every result delivery.
pub fn metrics_report(record: &DocumentRecord) -> String {
    format!(
        "Document Details:\n\n\
         Reference Number: {reference}\n\
         Original File Name: {name}\n\
         Processing Date: {date}\n\
         Total Words: {total}\n\
         Top Words: {top}\n\n\
         To request this document again, send an email with subject 'Request Document: {reference}'",
        reference = record.reference_number,
        name = record.original_file_name,
        date = record.processed_at.format("%Y-%m-%d %H:%M:%S UTC"),
        total = record.total_words,
        top = format_top_words(&record.top_words),
    )
}
