//! Retrieval requests: re-deliver a registered result by reference number.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::RetrievalError;
use crate::pipeline::dispatcher::Dispatcher;
use crate::pipeline::processor::metrics_report;
use crate::store::{DocumentRecord, DocumentRegistry};

/// Subject prefix of a successful retrieval delivery.
pub const RETRIEVAL_SUBJECT_PREFIX: &str = "Requested Document - Ref: ";

/// Subject of the notice sent when a request cannot be fulfilled.
pub const FAILURE_SUBJECT: &str = "Document Request Failed";

pub struct RetrievalHandler {
    registry: Arc<dyn DocumentRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl RetrievalHandler {
    pub fn new(registry: Arc<dyn DocumentRegistry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    /// Deliver the result for `token` to `requester`.
    ///
    /// On any failure the requester gets a plain notice naming the token; if
    /// that notice cannot be sent either, it is only logged. The original
    /// failure is returned in both cases.
    pub async fn handle(&self, token: &str, requester: &str) -> Result<DocumentRecord, RetrievalError> {
        match self.deliver(token, requester).await {
            Ok(record) => {
                info!(reference = %token, to = %requester, "Retrieval request fulfilled");
                Ok(record)
            }
            Err(e) => {
                warn!(reference = %token, to = %requester, error = %e, "Retrieval request failed");
                let body = failure_body(token);
                if let Err(notice_err) = self
                    .dispatcher
                    .send_notification(requester, FAILURE_SUBJECT, &body)
                    .await
                {
                    error!(to = %requester, error = %notice_err, "Failed to send retrieval failure notice");
                }
                Err(e)
            }
        }
    }

    async fn deliver(&self, token: &str, requester: &str) -> Result<DocumentRecord, RetrievalError> {
        let not_found = || RetrievalError::NotFound {
            reference: token.to_string(),
        };

        if token.is_empty() {
            return Err(not_found());
        }

        let record = match self.registry.find_by_reference_number(token).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(not_found()),
            Err(e) => {
                warn!(reference = %token, error = %e, "Registry lookup failed");
                return Err(not_found());
            }
        };

        if !result_is_readable(&record.result_locator).await {
            return Err(RetrievalError::ResultMissing {
                reference: token.to_string(),
                locator: record.result_locator.display().to_string(),
            });
        }

        self.dispatcher
            .send_secure(
                requester,
                &format!("{RETRIEVAL_SUBJECT_PREFIX}{}", record.reference_number),
                &metrics_report(&record),
                &record.result_locator,
            )
            .await?;
        Ok(record)
    }
}

/// The stored result opens for reading and is a regular file.
async fn result_is_readable(path: &Path) -> bool {
    match tokio::fs::File::open(path).await {
        Ok(file) => file.metadata().await.is_ok_and(|meta| meta.is_file()),
        Err(_) => false,
    }
}

fn failure_body(token: &str) -> String {
    format!(
        "Your request for document reference '{token}' could not be fulfilled.\n\n\
         Check the reference number and try again."
    )
}
