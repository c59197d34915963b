//! Inbound message handling.
//!
//! Every message fetched by the poller flows through:
//! 1. `classifier::classify()`: retrieval request, submission, or ignore
//! 2. Submissions: `extractor` → `ArchiveCodec::decrypt` → `DocumentPipeline::process`
//! 3. Retrieval requests: `RetrievalHandler::handle`
//!
//! All outbound mail goes through the `Dispatcher`.

pub mod classifier;
pub mod dispatcher;
pub mod extractor;
pub mod metrics;
pub mod processor;
pub mod retrieval;
pub mod router;

pub use classifier::{Intent, classify};
pub use dispatcher::Dispatcher;
pub use metrics::{DocumentMetrics, WordCount, calculate_metrics};
pub use processor::DocumentPipeline;
pub use retrieval::RetrievalHandler;
pub use router::{MailRouter, MessageOutcome};
