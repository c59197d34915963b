//! Routes a classified inbound message to retrieval or submission handling.
//!
//! Each qualifying attachment is its own unit of work: its transient files
//! are owned by the unit and removed when it ends, and its failure does not
//! affect the other attachments of the same message.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::archive::ArchiveCodec;
use crate::channels::{InboundEmail, MailPart};
use crate::config::Extensions;
use crate::error::{ChannelError, PipelineError, PipelineStage};
use crate::pipeline::classifier::{IgnoreReason, Intent, classify};
use crate::pipeline::extractor::extract_attachment;
use crate::pipeline::processor::DocumentPipeline;
use crate::pipeline::retrieval::RetrievalHandler;
use crate::store::DocumentRecord;

/// What handling a message amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Retrieval { token: String, fulfilled: bool },
    /// `processed` holds the reference numbers of successful submissions.
    Submission { processed: Vec<String>, failed: usize },
    Ignored { reason: IgnoreReason },
}

impl MessageOutcome {
    /// Whether any part of the handling failed.
    pub fn has_failures(&self) -> bool {
        match self {
            Self::Retrieval { fulfilled, .. } => !fulfilled,
            Self::Submission { failed, .. } => *failed > 0,
            Self::Ignored { .. } => false,
        }
    }
}

pub struct MailRouter {
    extensions: Extensions,
    scratch_dir: PathBuf,
    codec: Arc<ArchiveCodec>,
    pipeline: Arc<DocumentPipeline>,
    retrieval: Arc<RetrievalHandler>,
}

impl MailRouter {
    pub fn new(
        extensions: Extensions,
        scratch_dir: impl Into<PathBuf>,
        codec: Arc<ArchiveCodec>,
        pipeline: Arc<DocumentPipeline>,
        retrieval: Arc<RetrievalHandler>,
    ) -> Self {
        Self {
            extensions,
            scratch_dir: scratch_dir.into(),
            codec,
            pipeline,
            retrieval,
        }
    }

    /// Handle one message.
    ///
    /// Fails only when the message itself is unusable (no sender for a
    /// request or submission). Per-attachment and retrieval failures are
    /// reported in the outcome.
    pub async fn route(&self, email: &InboundEmail) -> Result<MessageOutcome, ChannelError> {
        let intent = classify(email, &self.extensions);

        let sender = match (&intent, email.sender.as_deref()) {
            (Intent::Ignore { reason }, _) => {
                info!(subject = ?email.subject, reason = %reason, "Ignoring message");
                return Ok(MessageOutcome::Ignored { reason: *reason });
            }
            (_, Some(sender)) => sender,
            (_, None) => {
                return Err(ChannelError::InvalidMessage(
                    "message has no sender address".into(),
                ));
            }
        };

        match intent {
            Intent::Retrieval { token } => {
                info!(reference = %token, from = %sender, "Handling retrieval request");
                let fulfilled = self.retrieval.handle(&token, sender).await.is_ok();
                Ok(MessageOutcome::Retrieval { token, fulfilled })
            }
            Intent::Submission { attachments } => {
                info!(from = %sender, attachments = attachments.len(), "Handling submission");
                let mut processed = Vec::new();
                let mut failed = 0;
                for index in attachments {
                    let part = &email.parts[index];
                    match self.submit(part, sender).await {
                        Ok(record) => processed.push(record.reference_number),
                        Err(e) => {
                            failed += 1;
                            warn!(
                                from = %sender,
                                message_id = ?email.message_id,
                                attachment = ?part.file_name,
                                stage = %e.stage,
                                error = %e.reason,
                                "Submission failed"
                            );
                        }
                    }
                }
                Ok(MessageOutcome::Submission { processed, failed })
            }
            Intent::Ignore { reason } => Ok(MessageOutcome::Ignored { reason }),
        }
    }

    /// Extract, decrypt and process one attachment.
    async fn submit(&self, part: &MailPart, submitter: &str) -> Result<DocumentRecord, PipelineError> {
        let attachment = extract_attachment(part, &self.scratch_dir)
            .map_err(|e| PipelineError::new(PipelineStage::Extract, e))?;

        let codec = Arc::clone(&self.codec);
        let archive = attachment.path().to_path_buf();
        let document = tokio::task::spawn_blocking(move || codec.decrypt(&archive))
            .await
            .map_err(|e| PipelineError::new(PipelineStage::Decrypt, format!("task panicked: {e}")))?
            .map_err(|e| PipelineError::new(PipelineStage::Decrypt, e))?;

        self.pipeline
            .process(document.path(), &document.file_name(), submitter)
            .await
    }
}
