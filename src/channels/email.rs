//! Email transport: IMAP over TLS for the inbound folder, SMTP via lettre
//! for outbound mail.
//!
//! The IMAP client speaks just enough of RFC 3501 for the poller: LOGIN,
//! SELECT, UID SEARCH UNSEEN, UID FETCH BODY.PEEK[], UID STORE +FLAGS and
//! LOGOUT. Socket I/O is blocking and always runs in `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write as IoWrite};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::channels::{FetchedMessage, MailTransport, Mailbox, MailboxSession, OutgoingEmail};
use crate::config::{env_or, env_parse};
use crate::error::{ChannelError, ConfigError};

/// Socket read/write timeout for IMAP.
const IMAP_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// Email configuration, built from environment variables.
#[derive(Debug)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Folder polled for unread messages.
    pub folder: String,
    pub poll_interval_secs: u64,
}

impl EmailConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".into()))?;

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = std::env::var("EMAIL_PASSWORD").unwrap_or_default();
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Ok(Self {
            imap_port: env_parse("EMAIL_IMAP_PORT", 993)?,
            smtp_port: env_parse("EMAIL_SMTP_PORT", 587)?,
            poll_interval_secs: env_parse("EMAIL_POLL_INTERVAL_SECS", 60)?,
            folder: env_or("EMAIL_FOLDER", "INBOX"),
            imap_host,
            smtp_host,
            username,
            password: SecretString::from(password),
            from_address,
        })
    }
}

// ── IMAP ────────────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn imap_err(kind: fn(String, String) -> ChannelError, reason: impl std::fmt::Display) -> ChannelError {
    kind("imap".to_string(), reason.to_string())
}

fn disconnected(name: String, reason: String) -> ChannelError {
    ChannelError::Disconnected { name, reason }
}

fn command_failed(name: String, reason: String) -> ChannelError {
    ChannelError::CommandFailed { name, reason }
}

fn connect_failed(name: String, reason: String) -> ChannelError {
    ChannelError::ConnectFailed { name, reason }
}

/// Response to one tagged IMAP command.
#[derive(Debug, Default)]
struct ImapResponse {
    /// Untagged and continuation lines, CRLF stripped.
    lines: Vec<String>,
    /// Literal payloads (`{n}` blocks) in the order they arrived.
    literals: Vec<Vec<u8>>,
}

/// Blocking IMAP connection with tag bookkeeping.
struct ImapConnection {
    reader: BufReader<TlsStream>,
    next_tag: u32,
}

impl ImapConnection {
    /// Connect, negotiate TLS and read the server greeting.
    fn open(config: &EmailConfig) -> Result<Self, ChannelError> {
        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))
            .map_err(|e| imap_err(connect_failed, format!("{}: {e}", config.imap_host)))?;
        tcp.set_read_timeout(Some(IMAP_TIMEOUT))
            .and_then(|_| tcp.set_write_timeout(Some(IMAP_TIMEOUT)))
            .map_err(|e| imap_err(connect_failed, e))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| imap_err(connect_failed, e))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| imap_err(connect_failed, e))?;

        let mut connection = Self {
            reader: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };

        let greeting = connection.read_line()?;
        if !String::from_utf8_lossy(&greeting).starts_with("* OK") {
            return Err(imap_err(connect_failed, "unexpected IMAP greeting"));
        }
        Ok(connection)
    }

    /// Read one CRLF-terminated line (terminator included).
    fn read_line(&mut self) -> Result<Vec<u8>, ChannelError> {
        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| imap_err(disconnected, e))?;
        if n == 0 {
            return Err(imap_err(disconnected, "IMAP connection closed"));
        }
        Ok(buf)
    }

    /// Send a tagged command and collect everything up to its completion.
    ///
    /// Fails unless the tagged status is `OK`.
    fn command(&mut self, cmd: &str) -> Result<ImapResponse, ChannelError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.reader.get_mut();
        stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| imap_err(disconnected, e))?;

        let mut response = ImapResponse::default();
        loop {
            let raw = self.read_line()?;
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();

            if let Some(len) = literal_length(&line) {
                let mut literal = vec![0u8; len];
                self.reader
                    .read_exact(&mut literal)
                    .map_err(|e| imap_err(disconnected, e))?;
                response.literals.push(literal);
                response.lines.push(line);
                continue;
            }

            if let Some(status) = line.strip_prefix(&format!("{tag} ")) {
                if status.starts_with("OK") {
                    return Ok(response);
                }
                return Err(imap_err(command_failed, format!("{}: {status}", command_name(cmd))));
            }

            response.lines.push(line);
        }
    }
}

/// The message body from a `UID FETCH` response, or why it is unavailable.
fn fetched_message(uid: String, fetch: Result<ImapResponse, ChannelError>) -> FetchedMessage {
    let body = fetch.and_then(|mut response| {
        response
            .literals
            .pop()
            .ok_or_else(|| imap_err(command_failed, "FETCH returned no body"))
    });
    match body {
        Ok(raw) => FetchedMessage::new(uid, raw),
        Err(e) => {
            warn!(uid = %uid, error = %e, "Failed to fetch message");
            FetchedMessage::unavailable(uid, e)
        }
    }
}

/// Length of a trailing `{n}` literal marker, if the line ends with one.
fn literal_length(line: &str) -> Option<usize> {
    let open = line.rfind('{')?;
    line[open + 1..].strip_suffix('}')?.parse().ok()
}

/// First word of a command, for error messages that must not echo credentials.
fn command_name(cmd: &str) -> &str {
    match cmd.split_whitespace().next() {
        Some("UID") => cmd.split_whitespace().take(2).last().unwrap_or("UID"),
        Some(word) => word,
        None => "",
    }
}

/// Quote a string as an IMAP quoted string.
fn quote_imap(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// UIDs from `* SEARCH` responses.
fn parse_search_response(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}

/// IMAP mailbox configured from `EmailConfig`.
pub struct ImapMailbox {
    config: Arc<EmailConfig>,
}

impl ImapMailbox {
    pub fn new(config: Arc<EmailConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, ChannelError> {
        let config = Arc::clone(&self.config);
        let conn = tokio::task::spawn_blocking(move || -> Result<ImapConnection, ChannelError> {
            let mut conn = ImapConnection::open(&config)?;
            conn.command(&format!(
                "LOGIN {} {}",
                quote_imap(&config.username),
                quote_imap(config.password.expose_secret())
            ))
            .map_err(|e| ChannelError::AuthFailed {
                name: "imap".into(),
                reason: e.to_string(),
            })?;
            conn.command(&format!("SELECT {}", quote_imap(&config.folder)))?;
            Ok(conn)
        })
        .await
        .map_err(|e| imap_err(connect_failed, format!("IMAP task panicked: {e}")))??;

        info!(host = %self.config.imap_host, folder = %self.config.folder, "Connected to mailbox");
        Ok(Box::new(ImapSession { conn: Some(conn) }))
    }
}

/// A selected IMAP folder.
struct ImapSession {
    conn: Option<ImapConnection>,
}

impl ImapSession {
    /// Run a blocking operation on the connection in `spawn_blocking`.
    async fn run<T, F>(&mut self, op: F) -> Result<T, ChannelError>
    where
        F: FnOnce(&mut ImapConnection) -> Result<T, ChannelError> + Send + 'static,
        T: Send + 'static,
    {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| imap_err(disconnected, "session already closed"))?;

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| imap_err(disconnected, format!("IMAP task panicked: {e}")))?;

        self.conn = Some(conn);
        result
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    async fn list_unread(&mut self) -> Result<Vec<FetchedMessage>, ChannelError> {
        self.run(|conn| {
            let search = conn.command("UID SEARCH UNSEEN")?;
            let uids = parse_search_response(&search.lines);

            // A failed FETCH only fails its own message.
            let messages = uids
                .into_iter()
                .map(|uid| {
                    let fetch = conn.command(&format!("UID FETCH {uid} BODY.PEEK[]"));
                    fetched_message(uid, fetch)
                })
                .collect();
            Ok(messages)
        })
        .await
    }

    async fn mark_read(&mut self, message: &FetchedMessage) -> Result<(), ChannelError> {
        let uid = message.id.clone();
        self.run(move |conn| {
            conn.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
            Ok(())
        })
        .await
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        if self.conn.is_none() {
            return Ok(());
        }
        let result = self
            .run(|conn| {
                conn.command("LOGOUT")?;
                Ok(())
            })
            .await;
        self.conn = None;
        result
    }
}

// ── SMTP ────────────────────────────────────────────────────────────

/// Outbound mail over SMTP.
pub struct SmtpMailer {
    config: Arc<EmailConfig>,
}

impl SmtpMailer {
    pub fn new(config: Arc<EmailConfig>) -> Self {
        Self { config }
    }
}

fn send_failed(reason: impl std::fmt::Display) -> ChannelError {
    ChannelError::SendFailed {
        name: "email".into(),
        reason: reason.to_string(),
    }
}

/// Build a lettre message from an `OutgoingEmail`.
pub fn build_message(from: &str, email: &OutgoingEmail) -> Result<Message, ChannelError> {
    let builder = Message::builder()
        .from(
            from.parse()
                .map_err(|e| send_failed(format!("Invalid from address: {e}")))?,
        )
        .to(email
            .to
            .parse()
            .map_err(|e| send_failed(format!("Invalid to address: {e}")))?)
        .subject(email.subject.as_str());

    let message = match &email.attachment {
        None => builder.body(email.body.clone()),
        Some(attachment) => {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|e| send_failed(format!("Invalid attachment content type: {e}")))?;
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(email.body.clone()))
                    .singlepart(
                        Attachment::new(attachment.file_name.clone())
                            .body(attachment.contents.clone(), content_type),
                    ),
            )
        }
    };

    message.map_err(|e| send_failed(format!("Failed to build email: {e}")))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError> {
        let config = Arc::clone(&self.config);
        let to = email.to.clone();

        tokio::task::spawn_blocking(move || -> Result<(), ChannelError> {
            let message = build_message(&config.from_address, &email)?;
            let creds = Credentials::new(
                config.username.clone(),
                config.password.expose_secret().to_string(),
            );

            let relay = if config.smtp_port == 465 {
                SmtpTransport::relay(&config.smtp_host)
            } else {
                SmtpTransport::starttls_relay(&config.smtp_host)
            };
            let transport = relay
                .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
                .port(config.smtp_port)
                .credentials(creds)
                .build();

            transport
                .send(&message)
                .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| send_failed(format!("SMTP task panicked: {e}")))??;

        info!(to = %to, "Email sent");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::OutgoingAttachment;

    #[test]
    fn literal_length_parses_trailing_marker() {
        assert_eq!(literal_length("* 3 FETCH (UID 7 BODY[] {1234}"), Some(1234));
        assert_eq!(literal_length("* 3 FETCH (UID 7 BODY[] {0}"), Some(0));
        assert_eq!(literal_length("A4 OK FETCH completed"), None);
        assert_eq!(literal_length("* OK {not a number}"), None);
    }

    #[test]
    fn search_response_collects_uids() {
        let lines = vec![
            "* SEARCH 4 9 12".to_string(),
            "* OK still here".to_string(),
        ];
        assert_eq!(parse_search_response(&lines), vec!["4", "9", "12"]);
    }

    #[test]
    fn empty_search_response() {
        let lines = vec!["* SEARCH".to_string()];
        assert!(parse_search_response(&lines).is_empty());
    }

    #[test]
    fn fetch_response_yields_body() {
        let response = ImapResponse {
            lines: vec!["* 1 FETCH (UID 4 BODY[] {5}".into(), ")".into()],
            literals: vec![b"hello".to_vec()],
        };
        let message = fetched_message("4".into(), Ok(response));
        assert_eq!(message.id, "4");
        assert_eq!(message.raw.unwrap(), b"hello");
    }

    #[test]
    fn rejected_fetch_keeps_the_uid() {
        let message = fetched_message(
            "4".into(),
            Err(imap_err(command_failed, "FETCH: NO message expunged")),
        );
        assert_eq!(message.id, "4");
        assert!(matches!(message.raw, Err(ChannelError::CommandFailed { .. })));
    }

    #[test]
    fn fetch_without_literal_is_a_failure() {
        let message = fetched_message("9".into(), Ok(ImapResponse::default()));
        assert_eq!(message.id, "9");
        assert!(matches!(message.raw, Err(ChannelError::CommandFailed { .. })));
    }

    #[test]
    fn quote_imap_escapes() {
        assert_eq!(quote_imap("INBOX"), "\"INBOX\"");
        assert_eq!(quote_imap(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn command_name_hides_arguments() {
        assert_eq!(command_name("LOGIN \"user\" \"secret\""), "LOGIN");
        assert_eq!(command_name("UID FETCH 4 BODY.PEEK[]"), "FETCH");
        assert_eq!(command_name("LOGOUT"), "LOGOUT");
    }

    #[test]
    fn config_from_env_errors_when_no_host() {
        // SAFETY: This test runs in isolation; no other thread reads EMAIL_IMAP_HOST concurrently.
        unsafe { std::env::remove_var("EMAIL_IMAP_HOST") };
        assert!(matches!(
            EmailConfig::from_env(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn build_plain_message() {
        let email = OutgoingEmail::plain("bob@example.com", "Hello", "Body text");
        let message = build_message("ocr@example.com", &email).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Hello"));
        assert!(raw.contains("To: bob@example.com"));
        assert!(raw.contains("Body text"));
        assert!(!raw.contains("multipart"));
    }

    #[test]
    fn build_message_with_attachment() {
        let email = OutgoingEmail::plain("bob@example.com", "Result", "See attached").with_attachment(
            OutgoingAttachment {
                file_name: "result.zip".into(),
                content_type: "application/zip".into(),
                contents: vec![1, 2, 3, 4],
            },
        );
        let message = build_message("ocr@example.com", &email).unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("result.zip"));
        assert!(raw.contains("application/zip"));
    }

    #[test]
    fn build_message_rejects_bad_address() {
        let email = OutgoingEmail::plain("not an address", "Hello", "Body");
        let err = build_message("ocr@example.com", &email).unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }));
    }
}
