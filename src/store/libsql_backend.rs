//! libSQL backend: async `DocumentRegistry` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::metrics::WordCount;
use crate::store::migrations;
use crate::store::traits::{DocumentRecord, DocumentRegistry};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

const DOCUMENT_COLUMNS: &str = "id, reference_number, original_file_name, result_locator, submitter, processed_at, file_size, recognized_text, total_words, top_words";

fn row_to_document(row: &libsql::Row) -> Result<DocumentRecord, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let processed_str: String = row.get(5).map_err(get_err)?;
    let locator: String = row.get(3).map_err(get_err)?;
    let file_size: i64 = row.get(6).map_err(get_err)?;
    let total_words: i64 = row.get(8).map_err(get_err)?;
    let top_words_json: String = row.get(9).map_err(get_err)?;
    let top_words: Vec<WordCount> = serde_json::from_str(&top_words_json)
        .map_err(|e| DatabaseError::Serialization(format!("top_words: {e}")))?;

    Ok(DocumentRecord {
        id: Some(row.get(0).map_err(get_err)?),
        reference_number: row.get(1).map_err(get_err)?,
        original_file_name: row.get(2).map_err(get_err)?,
        result_locator: PathBuf::from(locator),
        submitter: row.get(4).map_err(get_err)?,
        processed_at: parse_datetime(&processed_str),
        file_size: u64::try_from(file_size).unwrap_or(0),
        recognized_text: row.get(7).map_err(get_err)?,
        total_words: usize::try_from(total_words).unwrap_or(0),
        top_words,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl DocumentRegistry for LibSqlBackend {
    async fn save(&self, mut record: DocumentRecord) -> Result<DocumentRecord, DatabaseError> {
        let top_words = serde_json::to_string(&record.top_words)
            .map_err(|e| DatabaseError::Serialization(format!("top_words: {e}")))?;

        let conn = self.conn();
        conn.execute(
            "INSERT INTO documents (reference_number, original_file_name, result_locator,
                submitter, processed_at, file_size, recognized_text, total_words, top_words)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.reference_number.clone(),
                record.original_file_name.clone(),
                record.result_locator.to_string_lossy().into_owned(),
                record.submitter.clone(),
                record.processed_at.to_rfc3339(),
                i64::try_from(record.file_size).unwrap_or(i64::MAX),
                record.recognized_text.clone(),
                i64::try_from(record.total_words).unwrap_or(i64::MAX),
                top_words,
            ],
        )
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("UNIQUE") {
                DatabaseError::Constraint(format!(
                    "reference number {} already registered",
                    record.reference_number
                ))
            } else {
                DatabaseError::Query(format!("save document: {msg}"))
            }
        })?;

        let id = conn.last_insert_rowid();
        record.id = Some(id);
        debug!(id, reference = %record.reference_number, "Document record saved");
        Ok(record)
    }

    async fn find_by_reference_number(
        &self,
        reference: &str,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE reference_number = ?1"),
                params![reference],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_by_reference_number: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_document(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "find_by_reference_number: {e}"
            ))),
        }
    }
}
