//! Mailbox poller: one ingestion cycle per tick.
//!
//! A cycle connects, lists unread messages, hands each one to the message
//! handler, marks it read whatever the outcome, and disconnects. A failure in
//! one message never stops the rest of the cycle; a failure to connect skips
//! the cycle until the next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::channels::{FetchedMessage, InboundEmail, Mailbox};
use crate::error::ChannelError;
use crate::pipeline::{MailRouter, MessageOutcome};

/// Handles one parsed inbound message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, email: &InboundEmail) -> Result<MessageOutcome, ChannelError>;
}

#[async_trait]
impl MessageHandler for MailRouter {
    async fn handle(&self, email: &InboundEmail) -> Result<MessageOutcome, ChannelError> {
        self.route(email).await
    }
}

/// Result of handling one fetched message.
#[derive(Debug)]
enum MessageResult {
    Handled(MessageOutcome),
    SelfSent,
    Failed(ChannelError),
}

/// Per-cycle tallies.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Whether a mailbox session was established.
    pub connected: bool,
    pub fetched: usize,
    /// Handled without any failure (includes ignored messages).
    pub handled: usize,
    /// Unparseable, rejected, or with at least one failed unit of work.
    pub failed: usize,
    /// Sent from our own address.
    pub skipped: usize,
    /// Messages successfully flagged as seen.
    pub marked_read: usize,
}

pub struct MailboxPoller {
    mailbox: Arc<dyn Mailbox>,
    handler: Arc<dyn MessageHandler>,
    own_address: String,
}

impl MailboxPoller {
    /// `own_address` is the from-address used for outbound mail, with or
    /// without a display name; messages from it are never handled.
    pub fn new(mailbox: Arc<dyn Mailbox>, handler: Arc<dyn MessageHandler>, own_address: &str) -> Self {
        Self {
            mailbox,
            handler,
            own_address: bare_address(own_address),
        }
    }

    /// Run a single poll cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let mut session = match self.mailbox.connect().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Mailbox connection failed; skipping cycle");
                return report;
            }
        };
        report.connected = true;

        match session.list_unread().await {
            Ok(messages) => {
                report.fetched = messages.len();
                if !messages.is_empty() {
                    debug!(count = messages.len(), "Fetched unread messages");
                }

                for message in &messages {
                    match self.handle_message(message).await {
                        MessageResult::Handled(outcome) if outcome.has_failures() => {
                            report.failed += 1;
                            debug!(id = %message.id, ?outcome, "Message handled with failures");
                        }
                        MessageResult::Handled(outcome) => {
                            report.handled += 1;
                            debug!(id = %message.id, ?outcome, "Message handled");
                        }
                        MessageResult::SelfSent => report.skipped += 1,
                        MessageResult::Failed(e) => {
                            report.failed += 1;
                            warn!(id = %message.id, error = %e, "Message handling failed");
                        }
                    }

                    match session.mark_read(message).await {
                        Ok(()) => report.marked_read += 1,
                        Err(e) => warn!(id = %message.id, error = %e, "Failed to mark message read"),
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to list unread messages"),
        }

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close mailbox session");
        }

        if report.fetched > 0 {
            info!(
                fetched = report.fetched,
                handled = report.handled,
                failed = report.failed,
                skipped = report.skipped,
                "Poll cycle complete"
            );
        }
        report
    }

    async fn handle_message(&self, message: &FetchedMessage) -> MessageResult {
        let raw = match &message.raw {
            Ok(raw) => raw,
            Err(e) => return MessageResult::Failed(e.clone()),
        };
        let email = match InboundEmail::parse(raw) {
            Ok(email) => email,
            Err(e) => return MessageResult::Failed(e),
        };
        debug!(
            id = %message.id,
            message_id = ?email.message_id,
            from = ?email.sender,
            subject = ?email.subject,
            "Handling message"
        );

        if email
            .sender
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(&self.own_address))
        {
            debug!(id = %message.id, "Skipping self-sent message");
            return MessageResult::SelfSent;
        }

        match self.handler.handle(&email).await {
            Ok(outcome) => MessageResult::Handled(outcome),
            Err(e) => MessageResult::Failed(e),
        }
    }
}

/// The address part of `address`, which may carry a display name.
fn bare_address(address: &str) -> String {
    match address.parse::<lettre::message::Mailbox>() {
        Ok(mailbox) => mailbox.email.to_string(),
        Err(_) => address.trim().to_string(),
    }
}

/// Spawn a background task that runs a poll cycle every `interval`.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
/// Cycles never overlap: a slow cycle delays the next tick.
pub fn spawn_mailbox_poller(
    poller: MailboxPoller,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Mailbox poller started, polling every {}s", interval.as_secs());

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Mailbox poller shutting down");
                return;
            }

            poller.run_cycle().await;
        }
    });

    (handle, shutdown_flag)
}
