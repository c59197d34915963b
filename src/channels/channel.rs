//! Mailbox and mail transport abstractions.

use async_trait::async_trait;

use crate::error::ChannelError;

/// A raw message fetched from the mailbox.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    /// Mailbox-native identifier (IMAP UID), used to flag the message.
    pub id: String,
    /// Full RFC 5322 bytes, or the error that kept them from being fetched.
    pub raw: Result<Vec<u8>, ChannelError>,
}

impl FetchedMessage {
    pub fn new(id: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            raw: Ok(raw),
        }
    }

    /// A listed message whose body could not be fetched.
    pub fn unavailable(id: impl Into<String>, error: ChannelError) -> Self {
        Self {
            id: id.into(),
            raw: Err(error),
        }
    }
}

/// Opens sessions against an inbound mailbox.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Connect and authenticate. One session per poll cycle.
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, ChannelError>;
}

/// A live connection to the inbound folder.
#[async_trait]
pub trait MailboxSession: Send {
    /// Every message not flagged as seen.
    async fn list_unread(&mut self) -> Result<Vec<FetchedMessage>, ChannelError>;

    /// Flag a message as seen.
    async fn mark_read(&mut self, message: &FetchedMessage) -> Result<(), ChannelError>;

    /// Disconnect without expunging.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// A file attached to an outbound message.
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    /// Display name shown to the recipient.
    pub file_name: String,
    pub content_type: String,
    pub contents: Vec<u8>,
}

/// A structured outbound message.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<OutgoingAttachment>,
}

impl OutgoingEmail {
    /// Plain text message without attachment.
    pub fn plain(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            attachment: None,
        }
    }

    /// Attach a single file.
    pub fn with_attachment(mut self, attachment: OutgoingAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Sends outbound mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError>;
}
