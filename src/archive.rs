//! Password-protected ZIP archives.
//!
//! Inbound archives are opened with the pre-shared secret that submitters
//! know. Outbound envelopes are sealed with a one-time password that is sent
//! to the recipient in a separate message and never stored.
//!
//! Every file this module materializes lives inside a `tempfile` guard, so it
//! is removed when the guard is dropped, whichever way the caller exits.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

use crate::config::Extensions;
use crate::error::ArchiveError;

/// A document pulled out of an inbound archive.
///
/// Owns the scratch directory everything was extracted into; dropping it
/// deletes the directory and all extracted entries.
#[derive(Debug)]
pub struct ExtractedDocument {
    dir: TempDir,
    path: PathBuf,
}

impl ExtractedDocument {
    /// Path of the matching document inside the scratch directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the document as it appeared in the archive.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

}

/// Largest single entry extracted from an inbound archive.
const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

/// Largest total size extracted from one inbound archive.
const MAX_EXTRACTED_BYTES: u64 = 512 * 1024 * 1024;

/// Encrypts and decrypts single-document archives.
pub struct ArchiveCodec {
    inbound_secret: SecretString,
    extensions: Extensions,
    scratch_dir: PathBuf,
    max_entry_bytes: u64,
    max_extracted_bytes: u64,
}

impl ArchiveCodec {
    /// Create a codec.
    ///
    /// `inbound_secret` is the pre-shared password for submitted archives;
    /// `scratch_dir` is where transient files are created.
    pub fn new(
        inbound_secret: SecretString,
        extensions: &Extensions,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inbound_secret,
            extensions: extensions.clone(),
            scratch_dir: scratch_dir.into(),
            max_entry_bytes: MAX_ENTRY_BYTES,
            max_extracted_bytes: MAX_EXTRACTED_BYTES,
        }
    }

    /// Open an inbound archive with the pre-shared secret and return its
    /// first document entry.
    pub fn decrypt(&self, archive: &Path) -> Result<ExtractedDocument, ArchiveError> {
        self.decrypt_with(archive, &self.inbound_secret)
    }

    /// Open `archive` with `password`, extract every entry into a fresh
    /// scratch directory, and return the first entry (in archive order) whose
    /// name ends with the document extension.
    ///
    /// Entries larger than the per-entry cap, or archives that expand past
    /// the total cap, are rejected as corrupt.
    pub fn decrypt_with(
        &self,
        archive: &Path,
        password: &SecretString,
    ) -> Result<ExtractedDocument, ArchiveError> {
        info!(archive = %archive.display(), "Extracting document from archive");

        let file = File::open(archive)?;
        let mut zip = ZipArchive::new(BufReader::new(file))?;
        let dir = tempfile::Builder::new()
            .prefix("extract_")
            .tempdir_in(&self.scratch_dir)?;

        let mut document: Option<PathBuf> = None;
        let mut extracted: u64 = 0;

        for index in 0..zip.len() {
            let mut entry = zip.by_index_decrypt(index, password.expose_secret().as_bytes())?;

            let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
                return Err(ArchiveError::UnsafeEntry(entry.name().to_string()));
            };
            let target = dir.path().join(&relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&target)?;
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let budget = self
                .max_entry_bytes
                .min(self.max_extracted_bytes - extracted);
            let mut out = File::create(&target)?;
            let written = io::copy(&mut entry.by_ref().take(budget + 1), &mut out)?;
            if written > budget {
                warn!(entry = %relative.display(), limit = budget, "Archive entry exceeds extraction limit");
                return Err(ArchiveError::Corrupt(format!(
                    "entry {} expands past {budget} bytes",
                    relative.display()
                )));
            }
            extracted += written;
            debug!(entry = %relative.display(), bytes = written, "Extracted archive entry");

            let name = relative
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if document.is_none() && self.extensions.is_document(&name) {
                document = Some(target);
            }
        }

        match document {
            Some(path) => {
                info!(document = %path.display(), "Found document in archive");
                Ok(ExtractedDocument { dir, path })
            }
            None => {
                warn!(
                    archive = %archive.display(),
                    extension = %self.extensions.document,
                    "No matching document in archive"
                );
                Err(ArchiveError::NoMatchingDocument {
                    extension: self.extensions.document.clone(),
                })
            }
        }
    }

    /// Seal `document` into a new single-entry AES-256 archive.
    ///
    /// The returned temp file is deleted when dropped.
    pub fn encrypt(
        &self,
        document: &Path,
        password: &SecretString,
    ) -> Result<NamedTempFile, ArchiveError> {
        let entry_name = document
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::UnsafeEntry(document.display().to_string()))?;

        let mut envelope = tempfile::Builder::new()
            .prefix("secure_")
            .suffix(".zip")
            .tempfile_in(&self.scratch_dir)?;

        {
            let mut writer = ZipWriter::new(envelope.as_file_mut());
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .with_aes_encryption(AesMode::Aes256, password.expose_secret());
            writer.start_file(entry_name, options)?;

            let mut input = File::open(document)?;
            io::copy(&mut input, &mut writer)?;
            writer.finish()?;
        }

        debug!(
            envelope = %envelope.path().display(),
            entry = entry_name,
            "Created encrypted archive"
        );
        Ok(envelope)
    }

    /// Fresh one-time archive password.
    pub fn generate_password() -> SecretString {
        SecretString::from(Uuid::new_v4().simple().to_string())
    }
}
