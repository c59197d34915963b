//! Parsed inbound email: an owned view over the MIME structure.

use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::error::ChannelError;

/// One leaf part of an inbound message.
#[derive(Debug, Clone)]
pub struct MailPart {
    /// Lower-cased disposition type (`attachment`, `inline`), if declared.
    pub disposition: Option<String>,
    /// File name from the disposition or content-type parameters.
    pub file_name: Option<String>,
    /// `type/subtype`, lower-cased.
    pub content_type: Option<String>,
    /// Decoded body bytes.
    pub contents: Vec<u8>,
}

impl MailPart {
    pub fn is_attachment(&self) -> bool {
        self.disposition.as_deref() == Some("attachment")
    }
}

/// An inbound message reduced to what classification needs.
#[derive(Debug, Clone)]
pub struct InboundEmail {
    /// Address of the first `From` mailbox.
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    /// Content type of the top-level entity, lower-cased.
    pub content_type: Option<String>,
    /// Leaf parts in document order. Multipart containers are omitted.
    pub parts: Vec<MailPart>,
}

impl InboundEmail {
    /// Parse raw RFC 5322 bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, ChannelError> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| ChannelError::InvalidMessage("unparseable MIME message".into()))?;

        let sender = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string());

        let content_type = parsed.parts.first().and_then(|root| mime_type(root));

        let parts = parsed
            .parts
            .iter()
            .filter(|part| !matches!(part.body, PartType::Multipart(_)))
            .map(|part| MailPart {
                disposition: MimeHeaders::content_disposition(part)
                    .map(|d| d.ctype().to_lowercase()),
                file_name: MimeHeaders::attachment_name(part).map(|s| s.to_string()),
                content_type: mime_type(part),
                contents: part.contents().to_vec(),
            })
            .collect();

        Ok(Self {
            sender,
            subject: parsed.subject().map(|s| s.to_string()),
            message_id: parsed.message_id().map(|s| s.to_string()),
            content_type,
            parts,
        })
    }

    /// Whether the top-level entity is `multipart/*`.
    pub fn is_multipart(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("multipart/"))
    }
}

fn mime_type(part: &mail_parser::MessagePart) -> Option<String> {
    MimeHeaders::content_type(part).map(|ct| match ct.subtype() {
        Some(sub) => format!("{}/{}", ct.ctype(), sub).to_lowercase(),
        None => ct.ctype().to_lowercase(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lettre::Message;
    use lettre::message::header::ContentType;
    use lettre::message::{Attachment, MultiPart, SinglePart};

    fn with_attachment(name: &str, bytes: &[u8]) -> Vec<u8> {
        Message::builder()
            .from("Alice <alice@example.com>".parse().unwrap())
            .to("ocr@example.com".parse().unwrap())
            .subject("Scans attached")
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain("See attached".to_string()))
                    .singlepart(
                        Attachment::new(name.to_string())
                            .body(bytes.to_vec(), ContentType::parse("application/zip").unwrap()),
                    ),
            )
            .unwrap()
            .formatted()
    }

    #[test]
    fn parses_multipart_with_attachment() {
        let raw = with_attachment("scan.zip", b"PK\x03\x04 zip bytes");
        let email = InboundEmail::parse(&raw).unwrap();

        assert_eq!(email.sender.as_deref(), Some("alice@example.com"));
        assert_eq!(email.subject.as_deref(), Some("Scans attached"));
        assert!(email.is_multipart());

        let attachments: Vec<&MailPart> =
            email.parts.iter().filter(|p| p.is_attachment()).collect();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].file_name.as_deref(), Some("scan.zip"));
        assert_eq!(attachments[0].content_type.as_deref(), Some("application/zip"));
        assert_eq!(attachments[0].contents, b"PK\x03\x04 zip bytes");
    }

    #[test]
    fn body_part_is_not_an_attachment() {
        let raw = with_attachment("scan.zip", b"zip");
        let email = InboundEmail::parse(&raw).unwrap();
        let body = email
            .parts
            .iter()
            .find(|p| p.content_type.as_deref() == Some("text/plain"))
            .unwrap();
        assert!(!body.is_attachment());
    }

    #[test]
    fn plain_message_is_not_multipart() {
        let raw = Message::builder()
            .from("bob@example.com".parse().unwrap())
            .to("ocr@example.com".parse().unwrap())
            .subject("Request Document: abc-123")
            .message_id(Some("<req-1@example.com>".to_string()))
            .body("please".to_string())
            .unwrap()
            .formatted();
        let email = InboundEmail::parse(&raw).unwrap();

        assert!(!email.is_multipart());
        assert_eq!(email.subject.as_deref(), Some("Request Document: abc-123"));
        assert_eq!(email.message_id.as_deref(), Some("req-1@example.com"));
        assert!(email.parts.iter().all(|p| !p.is_attachment()));
    }
}
