//! Persistence layer: libSQL-backed registry of processed documents.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{DocumentRecord, DocumentRegistry};
