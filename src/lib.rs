//! Mail OCR: a mailbox-driven document recognition service.

pub mod archive;
pub mod channels;
pub mod config;
pub mod error;
pub mod http;
pub mod ocr;
pub mod pipeline;
pub mod store;
