//! Outbound dispatcher: secure result delivery and plain notifications.
//!
//! A secure delivery is two messages to the same recipient: the encrypted
//! envelope first, then the one-time password on its own.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::archive::ArchiveCodec;
use crate::channels::{MailTransport, OutgoingAttachment, OutgoingEmail};
use crate::error::DispatchError;

/// Subject of the follow-up message carrying the envelope password.
const PASSWORD_SUBJECT: &str = "Your document password";

pub struct Dispatcher {
    transport: Arc<dyn MailTransport>,
    codec: Arc<ArchiveCodec>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn MailTransport>, codec: Arc<ArchiveCodec>) -> Self {
        Self { transport, codec }
    }

    /// Seal `file` under a fresh one-time password and deliver it.
    ///
    /// The envelope file is deleted once the first message has been attempted.
    /// The password message is only sent if the envelope went out.
    pub async fn send_secure(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        file: &Path,
    ) -> Result<(), DispatchError> {
        let password = ArchiveCodec::generate_password();
        let envelope = self.codec.encrypt(file, &password)?;
        let contents = tokio::fs::read(envelope.path()).await?;

        let attachment = OutgoingAttachment {
            file_name: envelope_name(file),
            content_type: "application/zip".into(),
            contents,
        };
        let email = OutgoingEmail::plain(to, subject, envelope_body(body))
            .with_attachment(attachment);

        let sent = self.transport.send(email).await;
        drop(envelope);
        if let Err(e) = sent {
            warn!(to = %to, error = %e, "Secure envelope delivery failed");
            return Err(e.into());
        }

        let password_email = OutgoingEmail::plain(to, PASSWORD_SUBJECT, password_body(subject, &password));
        self.transport.send(password_email).await?;

        info!(to = %to, subject = %subject, "Secure delivery sent");
        Ok(())
    }

    /// Send a plain-text message with no attachment.
    pub async fn send_notification(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DispatchError> {
        self.transport
            .send(OutgoingEmail::plain(to, subject, body))
            .await?;
        info!(to = %to, subject = %subject, "Notification sent");
        Ok(())
    }
}

/// `{stem}.zip` for the delivered file.
fn envelope_name(file: &Path) -> String {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    format!("{stem}.zip")
}

fn envelope_body(body: &str) -> String {
    format!(
        "{body}\n\nThe attached archive is password protected. \
         The password follows in a separate email."
    )
}

fn password_body(subject: &str, password: &secrecy::SecretString) -> String {
    use secrecy::ExposeSecret;
    format!(
        "Password for the archive sent with \"{subject}\":\n\n{}\n",
        password.expose_secret()
    )
}
