//! End-to-end tests for the mailbox poll cycle.
//!
//! Each test wires the real poller, router, pipeline, codec and libSQL
//! registry (in-memory) to fake mailbox, SMTP and OCR collaborators, and
//! drives whole cycles against real password-protected archives.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use secrecy::SecretString;
use tempfile::TempDir;
use tokio::time::timeout;
use zip::write::SimpleFileOptions;
use zip::{AesMode, ZipWriter};

use mail_ocr::archive::ArchiveCodec;
use mail_ocr::channels::{
    CycleReport, FetchedMessage, MailTransport, Mailbox, MailboxPoller, MailboxSession,
    OutgoingEmail,
};
use mail_ocr::config::Extensions;
use mail_ocr::error::{ChannelError, RecognitionError};
use mail_ocr::ocr::{DocumentRecognizer, PageRenderer, TextRecognizer};
use mail_ocr::pipeline::{Dispatcher, DocumentPipeline, MailRouter, RetrievalHandler, WordCount};
use mail_ocr::store::{DocumentRegistry, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const SHARED_SECRET: &str = "pre-shared-secret";
const SERVICE_ADDRESS: &str = "ocr@example.com";

// ── Fakes ───────────────────────────────────────────────────────────

#[derive(Default)]
struct MailboxState {
    messages: Vec<FetchedMessage>,
    seen: Vec<String>,
    closed: usize,
}

/// In-memory mailbox. Messages stay unread until flagged.
#[derive(Clone, Default)]
struct FakeMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl FakeMailbox {
    fn deliver(&self, raw: Vec<u8>) -> String {
        let mut state = self.state.lock().unwrap();
        let id = (state.messages.len() + 1).to_string();
        state.messages.push(FetchedMessage::new(id.clone(), raw));
        id
    }

    fn seen(&self) -> Vec<String> {
        self.state.lock().unwrap().seen.clone()
    }

    fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

struct FakeSession {
    state: Arc<Mutex<MailboxState>>,
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, ChannelError> {
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn list_unread(&mut self) -> Result<Vec<FetchedMessage>, ChannelError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|m| !state.seen.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn mark_read(&mut self, message: &FetchedMessage) -> Result<(), ChannelError> {
        self.state.lock().unwrap().seen.push(message.id.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Records outbound mail instead of sending it.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// Treats each line of the "document" as one page; the page image is the
/// line's bytes.
struct LinePages;

#[async_trait]
impl PageRenderer for LinePages {
    async fn page_count(&self, document: &Path) -> Result<usize, RecognitionError> {
        Ok(tokio::fs::read_to_string(document).await?.lines().count())
    }

    async fn render_page(&self, document: &Path, page: usize) -> Result<Vec<u8>, RecognitionError> {
        let text = tokio::fs::read_to_string(document).await?;
        Ok(text.lines().nth(page - 1).unwrap_or_default().as_bytes().to_vec())
    }
}

/// Reads the "image" back as text; pages containing `UNREADABLE` fail.
struct EchoEngine;

#[async_trait]
impl TextRecognizer for EchoEngine {
    async fn recognize(&self, image: &[u8], page: usize) -> Result<String, RecognitionError> {
        let text = String::from_utf8_lossy(image).into_owned();
        if text.contains("UNREADABLE") {
            return Err(RecognitionError::EngineFailed {
                page,
                reason: "engine gave up".into(),
            });
        }
        Ok(text)
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    poller: MailboxPoller,
    mailbox: FakeMailbox,
    transport: Arc<RecordingTransport>,
    registry: Arc<LibSqlBackend>,
    scratch: TempDir,
    storage: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let storage = tempfile::tempdir().unwrap();
        let extensions = Extensions::default();

        let registry = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let transport = Arc::new(RecordingTransport::default());
        let codec = Arc::new(ArchiveCodec::new(
            SecretString::from(SHARED_SECRET.to_string()),
            &extensions,
            scratch.path(),
        ));
        let recognizer = DocumentRecognizer::new(Arc::new(LinePages), Arc::new(EchoEngine));

        let dispatcher = Arc::new(Dispatcher::new(transport.clone(), Arc::clone(&codec)));
        let pipeline = Arc::new(DocumentPipeline::new(
            recognizer,
            registry.clone(),
            Arc::clone(&dispatcher),
            storage.path().join("ocr"),
        ));
        let retrieval = Arc::new(RetrievalHandler::new(registry.clone(), dispatcher));
        let router = Arc::new(MailRouter::new(
            extensions,
            scratch.path(),
            codec,
            pipeline,
            retrieval,
        ));

        let mailbox = FakeMailbox::default();
        let poller = MailboxPoller::new(Arc::new(mailbox.clone()), router, SERVICE_ADDRESS);

        Self {
            poller,
            mailbox,
            transport,
            registry,
            scratch,
            storage,
        }
    }

    async fn cycle(&self) -> CycleReport {
        self.poller.run_cycle().await
    }

    /// Everything left in the scratch directory.
    fn scratch_leftovers(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.scratch.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    fn stored_results(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.storage.path().join("ocr")) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

// ── Message builders ────────────────────────────────────────────────

/// AES-encrypted zip holding the given entries.
fn encrypted_zip(entries: &[(&str, &str)], password: &str) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);
        for (name, contents) in entries {
            let options =
                SimpleFileOptions::default().with_aes_encryption(AesMode::Aes256, password);
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

fn submission(from: &str, attachments: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut body = MultiPart::mixed().singlepart(SinglePart::plain("Please process".to_string()));
    for (name, bytes) in attachments {
        body = body.singlepart(
            Attachment::new(name.to_string())
                .body(bytes.clone(), ContentType::parse("application/zip").unwrap()),
        );
    }
    Message::builder()
        .from(from.parse().unwrap())
        .to(SERVICE_ADDRESS.parse().unwrap())
        .subject("Documents for OCR")
        .multipart(body)
        .unwrap()
        .formatted()
}

fn plain(from: &str, subject: &str) -> Vec<u8> {
    Message::builder()
        .from(from.parse().unwrap())
        .to(SERVICE_ADDRESS.parse().unwrap())
        .subject(subject)
        .body("hi".to_string())
        .unwrap()
        .formatted()
}

/// The 32-hex-digit one-time password inside a password message.
fn password_in(email: &OutgoingEmail) -> String {
    email
        .body
        .lines()
        .map(str::trim)
        .find(|l| l.len() == 32 && l.chars().all(|c| c.is_ascii_hexdigit()))
        .expect("password message carries a one-time password")
        .to_string()
}

/// Open a delivered envelope with its one-time password.
fn open_envelope(envelope: &OutgoingEmail, password: &str, scratch: &Path) -> String {
    let attachment = envelope.attachment.as_ref().expect("envelope has attachment");
    let archive = scratch.join("delivered.zip");
    std::fs::write(&archive, &attachment.contents).unwrap();

    let codec = ArchiveCodec::new(
        SecretString::from(password.to_string()),
        &Extensions {
            document: ".txt".into(),
            archive: ".zip".into(),
        },
        scratch,
    );
    let extracted = codec.decrypt(&archive).unwrap();
    std::fs::read_to_string(extracted.path()).unwrap()
}

fn reference_from(subject: &str) -> String {
    subject
        .rsplit("Ref: ")
        .next()
        .expect("subject carries a reference")
        .to_string()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn submission_is_recognized_registered_and_delivered() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new().await;
        let zip = encrypted_zip(&[("scan.pdf", "hello hello world\n")], SHARED_SECRET);
        let id = h.mailbox.deliver(submission("alice@example.com", &[("scan.zip", zip)]));

        let report = h.cycle().await;
        assert_eq!(report.fetched, 1);
        assert_eq!(report.handled, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(h.mailbox.seen(), vec![id]);
        assert_eq!(h.mailbox.closed(), 1);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 2, "envelope + password");
        assert!(sent.iter().all(|m| m.to == "alice@example.com"));
        assert!(sent[0].subject.starts_with("Document Processing Complete - Ref: "));
        assert!(sent[1].attachment.is_none());

        let reference = reference_from(&sent[0].subject);
        let record = h
            .registry
            .find_by_reference_number(&reference)
            .await
            .unwrap()
            .expect("record registered");
        assert_eq!(record.submitter, "alice@example.com");
        assert_eq!(record.original_file_name, "scan.pdf");
        assert_eq!(record.total_words, 3);
        assert_eq!(
            record.top_words,
            vec![
                WordCount { word: "hello".into(), count: 2 },
                WordCount { word: "world".into(), count: 1 },
            ]
        );

        // The envelope opens with the separately delivered password.
        let checkout = tempfile::tempdir().unwrap();
        let text = open_envelope(&sent[0], &password_in(&sent[1]), checkout.path());
        assert_eq!(text, "hello hello world\n");

        assert!(h.scratch_leftovers().is_empty(), "{:?}", h.scratch_leftovers());
        assert_eq!(h.stored_results().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn retrieval_redelivers_a_registered_document() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new().await;
        let zip = encrypted_zip(&[("scan.pdf", "alpha beta\n")], SHARED_SECRET);
        h.mailbox.deliver(submission("alice@example.com", &[("scan.zip", zip)]));
        h.cycle().await;
        let reference = reference_from(&h.transport.sent()[0].subject);

        h.mailbox.deliver(plain(
            "bob@example.com",
            &format!("Re: Request Document: {reference}"),
        ));
        let report = h.cycle().await;
        assert_eq!(report.handled, 1);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[2].subject, format!("Requested Document - Ref: {reference}"));
        assert_eq!(sent[2].to, "bob@example.com");

        let checkout = tempfile::tempdir().unwrap();
        let text = open_envelope(&sent[2], &password_in(&sent[3]), checkout.path());
        assert_eq!(text, "alpha beta\n");
        assert!(h.scratch_leftovers().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_reference_gets_exactly_one_plain_notice() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new().await;
        h.mailbox
            .deliver(plain("bob@example.com", "Request Document: no-such-ref"));

        let report = h.cycle().await;
        assert_eq!(report.fetched, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(h.mailbox.seen().len(), 1);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "bob@example.com");
        assert!(sent[0].attachment.is_none());
        assert!(sent[0].body.contains("no-such-ref"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn failing_messages_are_isolated_and_still_marked_read() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new().await;

        let wrong_password = encrypted_zip(&[("scan.pdf", "secret words\n")], "not-the-secret");
        let no_document = encrypted_zip(&[("notes.txt", "nothing to see\n")], SHARED_SECRET);
        let unreadable = encrypted_zip(&[("scan.pdf", "page one\nUNREADABLE\n")], SHARED_SECRET);
        let good = encrypted_zip(&[("scan.pdf", "good document\n")], SHARED_SECRET);

        h.mailbox.deliver(submission("a@example.com", &[("bad.zip", wrong_password)]));
        h.mailbox.deliver(submission("b@example.com", &[("empty.zip", no_document)]));
        h.mailbox.deliver(submission("c@example.com", &[("ocr.zip", unreadable)]));
        h.mailbox.deliver(submission("d@example.com", &[("corrupt.zip", b"not a zip".to_vec())]));
        h.mailbox.deliver(submission("e@example.com", &[("good.zip", good)]));

        let report = h.cycle().await;
        assert_eq!(report.fetched, 5);
        assert_eq!(report.failed, 4);
        assert_eq!(report.handled, 1);
        assert_eq!(report.marked_read, 5);
        assert_eq!(h.mailbox.seen().len(), 5);

        // Only the good submission produced mail, a result, and a record.
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.to == "e@example.com"));
        assert_eq!(h.stored_results().len(), 1);

        assert!(h.scratch_leftovers().is_empty(), "{:?}", h.scratch_leftovers());

        // Nothing is retried on the next cycle.
        let again = h.cycle().await;
        assert_eq!(again.fetched, 0);
        assert_eq!(h.transport.sent().len(), 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn every_qualifying_attachment_is_processed() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new().await;
        let first = encrypted_zip(&[("one.pdf", "first\n")], SHARED_SECRET);
        let broken = encrypted_zip(&[("two.pdf", "second\n")], "wrong");
        let third = encrypted_zip(&[("three.pdf", "third\n")], SHARED_SECRET);

        h.mailbox.deliver(submission(
            "alice@example.com",
            &[("one.zip", first), ("two.zip", broken), ("three.zip", third)],
        ));

        let report = h.cycle().await;
        assert_eq!(report.fetched, 1);
        // One attachment failed, so the message counts as failed overall.
        assert_eq!(report.failed, 1);

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 4, "two secure deliveries");
        assert_eq!(h.stored_results().len(), 2);
        assert!(h.scratch_leftovers().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ignorable_and_self_sent_messages_send_nothing() {
    timeout(TEST_TIMEOUT, async {
        let h = Harness::new().await;
        h.mailbox.deliver(plain("carol@example.com", "Lunch on Friday?"));
        h.mailbox
            .deliver(plain(SERVICE_ADDRESS, "Request Document: loop-back"));
        h.mailbox.deliver(submission(
            "dave@example.com",
            &[("readme.txt", b"plain text".to_vec())],
        ));

        let report = h.cycle().await;
        assert_eq!(report.fetched, 3);
        assert_eq!(report.handled, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(h.mailbox.seen().len(), 3);
        assert!(h.transport.sent().is_empty());
    })
    .await
    .expect("test timed out");
}
