//! Message classifier: decides what an inbound message is asking for.
//!
//! Pure decision logic over headers and MIME structure; no side effects.

use crate::channels::InboundEmail;
use crate::config::Extensions;

/// Subject marker for retrieval requests, matched case-insensitively.
pub const RETRIEVAL_MARKER: &str = "request document:";

/// What to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Re-send a previously processed document.
    Retrieval { token: String },
    /// Process the qualifying attachments at these indices of `InboundEmail::parts`.
    Submission { attachments: Vec<usize> },
    /// Nothing to do.
    Ignore { reason: IgnoreReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Not multipart and no retrieval marker.
    NotMultipart,
    /// Multipart, but no part is a qualifying attachment.
    NoQualifyingAttachment,
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotMultipart => f.write_str("not multipart"),
            Self::NoQualifyingAttachment => f.write_str("no qualifying attachment"),
        }
    }
}

/// Classify a message.
///
/// A retrieval marker in the subject wins over any attachments.
pub fn classify(email: &InboundEmail, extensions: &Extensions) -> Intent {
    if let Some(token) = email.subject.as_deref().and_then(retrieval_token) {
        return Intent::Retrieval { token };
    }

    if !email.is_multipart() {
        return Intent::Ignore {
            reason: IgnoreReason::NotMultipart,
        };
    }

    let attachments: Vec<usize> = email
        .parts
        .iter()
        .enumerate()
        .filter(|(_, part)| {
            part.is_attachment()
                && part
                    .file_name
                    .as_deref()
                    .is_some_and(|name| extensions.is_archive(name))
        })
        .map(|(index, _)| index)
        .collect();

    if attachments.is_empty() {
        Intent::Ignore {
            reason: IgnoreReason::NoQualifyingAttachment,
        }
    } else {
        Intent::Submission { attachments }
    }
}

/// Correlation token from a subject line, if it carries the retrieval marker.
///
/// The token is the first colon-delimited segment after the marker, trimmed.
/// It may be empty.
pub fn retrieval_token(subject: &str) -> Option<String> {
    // ASCII lower-casing keeps byte offsets aligned with `subject`.
    let start = subject.to_ascii_lowercase().find(RETRIEVAL_MARKER)? + RETRIEVAL_MARKER.len();
    let rest = &subject[start..];
    let token = rest.split(':').next().unwrap_or_default();
    Some(token.trim().to_string())
}
