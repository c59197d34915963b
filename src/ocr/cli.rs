//! Command-line adapters: poppler for rendering, tesseract for recognition.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::RecognitionError;
use crate::ocr::{PageRenderer, TextRecognizer};

/// Renders PDF pages with `pdfinfo` / `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRenderer {
    dpi: u32,
    timeout: Duration,
}

impl PdftoppmRenderer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            dpi: config.render_dpi,
            timeout: Duration::from_secs(config.tool_timeout_secs),
        }
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    async fn page_count(&self, document: &Path) -> Result<usize, RecognitionError> {
        let path = document.to_string_lossy();
        let output = run_tool(
            "pdfinfo",
            &[&*path],
            None,
            self.timeout,
            RecognitionError::InvalidDocument,
        )
        .await?;

        let info = String::from_utf8_lossy(&output);
        parse_page_count(&info).ok_or_else(|| {
            RecognitionError::InvalidDocument("pdfinfo did not report a page count".into())
        })
    }

    async fn render_page(&self, document: &Path, page: usize) -> Result<Vec<u8>, RecognitionError> {
        let path = document.to_string_lossy();
        let page_arg = page.to_string();
        let dpi = self.dpi.to_string();
        let args = [
            "-r",
            dpi.as_str(),
            "-png",
            "-f",
            page_arg.as_str(),
            "-l",
            page_arg.as_str(),
            "-singlefile",
            &*path,
        ];

        let image = run_tool("pdftoppm", &args, None, self.timeout, |reason| {
            RecognitionError::RenderFailed { page, reason }
        })
        .await?;

        if image.is_empty() {
            return Err(RecognitionError::RenderFailed {
                page,
                reason: "renderer produced no output".into(),
            });
        }
        Ok(image)
    }
}

/// Recognizes text with `tesseract stdin stdout`.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    language: String,
    timeout: Duration,
}

impl TesseractRecognizer {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            language: config.language.clone(),
            timeout: Duration::from_secs(config.tool_timeout_secs),
        }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, image: &[u8], page: usize) -> Result<String, RecognitionError> {
        let args = ["stdin", "stdout", "-l", self.language.as_str()];
        let output = run_tool("tesseract", &args, Some(image), self.timeout, |reason| {
            RecognitionError::EngineFailed { page, reason }
        })
        .await?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}

/// `Pages:` line of `pdfinfo` output.
fn parse_page_count(info: &str) -> Option<usize> {
    info.lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|count| count.trim().parse().ok())
}

/// Run an external tool, optionally feeding `stdin`, and return its stdout.
///
/// A non-zero exit or a spawn failure goes through `on_failure`; exceeding
/// `timeout` kills the child.
async fn run_tool<F>(
    program: &str,
    args: &[&str],
    stdin: Option<&[u8]>,
    timeout: Duration,
    on_failure: F,
) -> Result<Vec<u8>, RecognitionError>
where
    F: FnOnce(String) -> RecognitionError,
{
    debug!(program, ?args, "Running external tool");

    let mut child = match Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return Err(on_failure(format!("failed to start {program}: {e}"))),
    };

    let result = tokio::time::timeout(timeout, async {
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }
        child.wait_with_output().await
    })
    .await;

    let output = match result {
        Ok(output) => output?,
        Err(_) => {
            return Err(RecognitionError::Timeout {
                tool: program.to_string(),
                timeout,
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(on_failure(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}
