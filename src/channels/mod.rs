//! Mailbox access and outbound mail.

pub mod channel;
pub mod email;
pub mod email_poller;
pub mod email_types;

pub use channel::*;
pub use email::{EmailConfig, ImapMailbox, SmtpMailer};
pub use email_poller::{CycleReport, MailboxPoller, spawn_mailbox_poller};
pub use email_types::{InboundEmail, MailPart};
