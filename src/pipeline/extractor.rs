//! Attachment extractor: spills a qualifying body part to a transient file.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::channels::MailPart;
use crate::error::ExtractError;

/// Write `part`'s decoded bytes to a new temp file in `scratch_dir`.
///
/// The file keeps the attachment's extension and is deleted when the returned
/// handle is dropped.
pub fn extract_attachment(part: &MailPart, scratch_dir: &Path) -> Result<NamedTempFile, ExtractError> {
    let file_name = part
        .file_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .ok_or(ExtractError::MissingFileName)?;

    let io_err = |source| ExtractError::Io {
        file_name: file_name.to_string(),
        source,
    };

    let suffix = Path::new(file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let mut file = tempfile::Builder::new()
        .prefix("attachment_")
        .suffix(&suffix)
        .tempfile_in(scratch_dir)
        .map_err(io_err)?;
    file.write_all(&part.contents).map_err(io_err)?;
    file.flush().map_err(io_err)?;

    debug!(
        attachment = %file_name,
        bytes = part.contents.len(),
        path = %file.path().display(),
        "Extracted attachment"
    );
    Ok(file)
}
