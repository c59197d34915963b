//! Configuration types.
//!
//! Everything is read from the environment once at start-up.

use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default storage root for OCR results.
const DEFAULT_STORAGE_ROOT: &str = "./data/ocr";

/// Default registry database path.
const DEFAULT_DB_PATH: &str = "./data/mail-ocr.db";

/// Service configuration.
#[derive(Debug)]
pub struct AppConfig {
    /// Directory that holds `{reference}_ocr.txt` result files.
    pub storage_root: PathBuf,
    /// libSQL registry file.
    pub db_path: PathBuf,
    /// Directory for transient files (attachments, extracted archives, envelopes).
    pub scratch_dir: PathBuf,
    /// Pre-shared secret submitters use to encrypt inbound archives.
    pub archive_secret: SecretString,
    pub extensions: Extensions,
    pub ocr: OcrConfig,
    /// Port for the HTTP upload endpoint.
    pub http_port: u16,
    /// Optional directory for rolling log files.
    pub log_dir: Option<PathBuf>,
}

/// Accepted file extensions, lower-case with a leading dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extensions {
    /// Extension of the document inside an inbound archive (e.g. `.pdf`).
    pub document: String,
    /// Extension of a qualifying attachment (e.g. `.zip`).
    pub archive: String,
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            document: ".pdf".to_string(),
            archive: ".zip".to_string(),
        }
    }
}

impl Extensions {
    /// Case-insensitive check that `name` ends with the document extension.
    pub fn is_document(&self, name: &str) -> bool {
        ends_with_ignore_case(name, &self.document)
    }

    /// Case-insensitive check that `name` ends with the archive extension.
    pub fn is_archive(&self, name: &str) -> bool {
        ends_with_ignore_case(name, &self.archive)
    }
}

fn ends_with_ignore_case(name: &str, suffix: &str) -> bool {
    name.to_lowercase().ends_with(&suffix.to_lowercase())
}

/// External OCR tool settings.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Render resolution handed to the page renderer.
    pub render_dpi: u32,
    /// Recognition language.
    pub language: String,
    /// Per-invocation timeout for external tools, in seconds.
    pub tool_timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            render_dpi: 300,
            language: "eng".to_string(),
            tool_timeout_secs: 120,
        }
    }
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let archive_secret = std::env::var("MAIL_OCR_ARCHIVE_SECRET")
            .map_err(|_| ConfigError::MissingEnvVar("MAIL_OCR_ARCHIVE_SECRET".into()))?;
        if archive_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "MAIL_OCR_ARCHIVE_SECRET".into(),
                message: "must not be empty".into(),
            });
        }

        let extensions = Extensions {
            document: normalize_extension(&env_or("MAIL_OCR_DOCUMENT_EXT", ".pdf")),
            archive: normalize_extension(&env_or("MAIL_OCR_ARCHIVE_EXT", ".zip")),
        };

        let ocr = OcrConfig {
            render_dpi: env_parse("MAIL_OCR_RENDER_DPI", 300)?,
            language: env_or("MAIL_OCR_LANGUAGE", "eng"),
            tool_timeout_secs: env_parse("MAIL_OCR_TOOL_TIMEOUT_SECS", 120)?,
        };

        Ok(Self {
            storage_root: PathBuf::from(env_or("MAIL_OCR_STORAGE_ROOT", DEFAULT_STORAGE_ROOT)),
            db_path: PathBuf::from(env_or("MAIL_OCR_DB_PATH", DEFAULT_DB_PATH)),
            scratch_dir: std::env::var("MAIL_OCR_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
            archive_secret: SecretString::from(archive_secret),
            extensions,
            ocr,
            http_port: env_parse("MAIL_OCR_HTTP_PORT", 8080)?,
            log_dir: std::env::var("MAIL_OCR_LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

/// Read an env var, falling back to `default` when unset or empty.
pub(crate) fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Parse an env var, falling back to `default` when unset.
///
/// A value that is present but unparseable is an error rather than silently
/// replaced by the default.
pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

/// Lower-case an extension and make sure it has a leading dot.
fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}
