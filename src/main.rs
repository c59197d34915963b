use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use mail_ocr::archive::ArchiveCodec;
use mail_ocr::channels::{
    EmailConfig, ImapMailbox, MailTransport, MailboxPoller, SmtpMailer, spawn_mailbox_poller,
};
use mail_ocr::config::AppConfig;
use mail_ocr::http::ocr_routes;
use mail_ocr::ocr::{DocumentRecognizer, PdftoppmRenderer, TesseractRecognizer};
use mail_ocr::pipeline::{Dispatcher, DocumentPipeline, MailRouter, RetrievalHandler};
use mail_ocr::store::{DocumentRegistry, LibSqlBackend};

/// Stderr logging, plus a daily rolling file when `log_dir` is set.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// life of the process.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "mail-ocr.log"));
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AppConfig::from_env().context("loading service configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let email_config = Arc::new(EmailConfig::from_env().context("loading email configuration")?);

    eprintln!("📄 Mail OCR v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {} ({})", email_config.imap_host, email_config.folder);
    eprintln!("   Poll interval: {}s", email_config.poll_interval_secs);
    eprintln!("   Storage: {}", config.storage_root.display());
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   HTTP: http://0.0.0.0:{}/ocr", config.http_port);

    // ── Registry ────────────────────────────────────────────────────────
    let registry: Arc<dyn DocumentRegistry> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening registry at {}", config.db_path.display()))?,
    );

    tokio::fs::create_dir_all(&config.scratch_dir)
        .await
        .with_context(|| format!("creating scratch dir {}", config.scratch_dir.display()))?;

    // ── Recognition ─────────────────────────────────────────────────────
    let recognizer = DocumentRecognizer::new(
        Arc::new(PdftoppmRenderer::new(&config.ocr)),
        Arc::new(TesseractRecognizer::new(&config.ocr)),
    );

    // ── Mail pipeline ───────────────────────────────────────────────────
    let codec = Arc::new(ArchiveCodec::new(
        config.archive_secret,
        &config.extensions,
        config.scratch_dir.clone(),
    ));
    let transport: Arc<dyn MailTransport> = Arc::new(SmtpMailer::new(Arc::clone(&email_config)));
    let dispatcher = Arc::new(Dispatcher::new(transport, Arc::clone(&codec)));
    let pipeline = Arc::new(DocumentPipeline::new(
        recognizer.clone(),
        Arc::clone(&registry),
        Arc::clone(&dispatcher),
        config.storage_root.clone(),
    ));
    let retrieval = Arc::new(RetrievalHandler::new(Arc::clone(&registry), dispatcher));
    let router = Arc::new(MailRouter::new(
        config.extensions.clone(),
        config.scratch_dir.clone(),
        codec,
        pipeline,
        retrieval,
    ));

    let poller = MailboxPoller::new(
        Arc::new(ImapMailbox::new(Arc::clone(&email_config))),
        router,
        &email_config.from_address,
    );
    let interval = Duration::from_secs(email_config.poll_interval_secs.max(1));
    let (poll_handle, poll_shutdown) = spawn_mailbox_poller(poller, interval);

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = ocr_routes(recognizer, config.scratch_dir.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("binding HTTP port {}", config.http_port))?;
    info!(port = config.http_port, "HTTP endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .context("HTTP server failed")?;

    info!("Shutting down");
    poll_shutdown.store(true, Ordering::Relaxed);
    poll_handle.abort();
    Ok(())
}
