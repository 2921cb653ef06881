//! SQLite-based document index.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};
use ulid::Ulid;

use mvr_core::{
    Document, DocumentIndex, IndexStats, Metadata, MetadataFilter, NewDocument, Result,
    RetrievalError,
};

use crate::schema::SCHEMA;

/// SQLite-based document index.
///
/// Uses a blocking Mutex for thread-safe access. Searches run on the blocking
/// thread pool via `spawn_blocking` so concurrent strategies do not stall the
/// async runtime.
pub struct SqliteIndex {
    /// Connection wrapped in blocking Mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIndex {
    /// Open or create an index at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RetrievalError::database(format!("Failed to open database: {}", e)))?;

        Self::init(conn, path)
    }

    /// Open an in-memory index (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            RetrievalError::database(format!("Failed to open in-memory database: {}", e))
        })?;

        Self::init(conn, Path::new(":memory:"))
    }

    fn init(conn: Connection, path: &Path) -> Result<Self> {
        Self::configure_connection(&conn)?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| RetrievalError::database(format!("Failed to initialize schema: {}", e)))?;

        info!("Index opened at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Configure SQLite connection for optimal performance.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = 30000;
            PRAGMA temp_store = MEMORY;
            "#,
        )
        .map_err(|e| RetrievalError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Shared handle to the connection for stores living in the same database.
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RetrievalError::database(e.to_string()))?;
        f(&conn)
    }

    /// Execute a mutable blocking operation on the connection.
    fn with_conn_mut<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RetrievalError::database(e.to_string()))?;
        f(&mut conn)
    }

    /// Insert documents, skipping any whose content is already indexed.
    ///
    /// Returns the number of documents actually inserted. An explicit id that
    /// is already taken by different content is a database error and nothing
    /// from the batch is stored.
    pub fn insert_documents(&self, docs: &[NewDocument]) -> Result<usize> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RetrievalError::database(e.to_string()))?;

            let mut inserted = 0;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO documents (id, content, metadata, content_hash, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(content_hash) DO NOTHING",
                    )
                    .map_err(|e| RetrievalError::database(e.to_string()))?;

                for doc in docs {
                    let id = doc
                        .id
                        .clone()
                        .unwrap_or_else(|| Ulid::new().to_string());
                    let metadata = serde_json::to_string(&doc.metadata)?;
                    let hash = content_hash(&doc.content);

                    let changed = stmt
                        .execute(params![id, doc.content, metadata, hash, now])
                        .map_err(|e| {
                            RetrievalError::database(format!("Failed to insert {}: {}", id, e))
                        })?;

                    if changed == 0 {
                        debug!("Skipping duplicate document {}", id);
                    }
                    inserted += changed;
                }
            }

            tx.commit()
                .map_err(|e| RetrievalError::database(e.to_string()))?;

            info!("Inserted {} of {} documents", inserted, docs.len());
            Ok(inserted)
        })
    }

    /// Fetch a document by id. The returned score is zero.
    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, content, metadata FROM documents WHERE id = ?1",
                params![id],
                |row| Self::row_to_document(row, 0.0),
            )
            .optional()
            .map_err(|e| RetrievalError::database(e.to_string()))
        })
    }

    /// Document count and storage size.
    pub fn stats(&self) -> Result<IndexStats> {
        self.with_conn(|conn| {
            let documents: u64 = conn
                .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
                .map_err(|e| RetrievalError::database(e.to_string()))?;

            // Get page count and page size to estimate storage
            let page_count: u64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .unwrap_or(0);
            let page_size: u64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .unwrap_or(4096);

            Ok(IndexStats {
                documents,
                storage_bytes: page_count * page_size,
            })
        })
    }
}

#[async_trait]
impl DocumentIndex for SqliteIndex {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Document>> {
        let Some(match_expr) = build_match_query(query) else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let (sql, bindings) = build_search_sql(match_expr, top_k, filter);
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| RetrievalError::database(e.to_string()))?;

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| RetrievalError::database(e.to_string()))?;

            let rows = stmt
                .query_map(params_from_iter(bindings.iter()), |row| {
                    let bm25: f64 = row.get(3)?;
                    Self::row_to_document(row, (-bm25) as f32)
                })
                .map_err(|e| RetrievalError::database(e.to_string()))?;

            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RetrievalError::database(e.to_string()))
        })
        .await
        .map_err(|e| RetrievalError::internal(format!("Search task failed: {}", e)))?
    }
}

// Helper methods
impl SqliteIndex {
    /// Convert a row to a Document.
    fn row_to_document(row: &rusqlite::Row<'_>, score: f32) -> rusqlite::Result<Document> {
        let metadata_str: String = row.get(2)?;
        let metadata: Metadata = serde_json::from_str(&metadata_str).unwrap_or_default();

        Ok(Document {
            id: row.get(0)?,
            content: row.get(1)?,
            score,
            metadata,
        })
    }
}

/// Hex-encoded BLAKE3 digest used to deduplicate content.
fn content_hash(content: &str) -> String {
    hex::encode(blake3::hash(content.as_bytes()).as_bytes())
}

/// Build an FTS5 MATCH expression: alphanumeric terms, quoted, OR-joined.
///
/// Returns `None` when the query has no searchable terms.
fn build_match_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Build the search statement and its positional bindings.
///
/// Every filter key becomes an `EXISTS` over `json_each`, which yields one
/// row for scalar metadata and one row per element for list metadata.
fn build_search_sql(
    match_expr: String,
    top_k: usize,
    filter: Option<&MetadataFilter>,
) -> (String, Vec<String>) {
    let mut sql = String::from(
        r#"
        SELECT d.id, d.content, d.metadata, bm25(documents_fts) AS score
        FROM documents_fts f
        JOIN documents d ON d.rowid = f.rowid
        WHERE documents_fts MATCH ?
        "#,
    );
    let mut bindings = vec![match_expr];

    if let Some(filter) = filter {
        for (key, wanted) in filter.iter() {
            let values = wanted.values();
            let placeholders = vec!["?"; values.len()].join(", ");
            sql.push_str(&format!(
                "AND EXISTS (SELECT 1 FROM json_each(d.metadata, ?) WHERE value IN ({}))\n",
                placeholders
            ));
            bindings.push(format!("$.\"{}\"", key.replace('"', "")));
            bindings.extend(values.into_iter().map(String::from));
        }
    }

    sql.push_str(&format!("ORDER BY score LIMIT {}", top_k));
    (sql, bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_doc(content: &str, content_type: &str) -> NewDocument {
        let mut metadata = Metadata::new();
        metadata.insert("content_type".to_string(), content_type.into());
        NewDocument {
            id: None,
            content: content.to_string(),
            metadata,
        }
    }

    fn seeded() -> SqliteIndex {
        let index = SqliteIndex::open_memory().unwrap();
        index
            .insert_documents(&[
                new_doc("KA02I amplifier power output 2x150 W", "technical_specs"),
                new_doc("What is the power of the KA02I? It delivers 150 W.", "answer"),
                new_doc("Mounting the Kobra line array in theatres", "semantic_chunk"),
            ])
            .unwrap();
        index
    }

    #[test]
    fn test_open_memory() {
        let index = SqliteIndex::open_memory().unwrap();
        assert_eq!(index.stats().unwrap().documents, 0);
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");

        let index = SqliteIndex::open(&path).unwrap();
        index
            .insert_documents(&[new_doc("persisted", "searchable_text")])
            .unwrap();
        drop(index);

        let reopened = SqliteIndex::open(&path).unwrap();
        assert_eq!(reopened.stats().unwrap().documents, 1);
    }

    #[test]
    fn test_insert_skips_duplicate_content() {
        let index = seeded();
        let inserted = index
            .insert_documents(&[
                new_doc("KA02I amplifier power output 2x150 W", "technical_specs"),
                new_doc("Brand new content", "searchable_text"),
            ])
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(index.stats().unwrap().documents, 4);
    }

    #[test]
    fn test_id_conflict_with_new_content_is_an_error() {
        let index = SqliteIndex::open_memory().unwrap();
        let mut first = new_doc("first body", "searchable_text");
        first.id = Some("same".to_string());
        index.insert_documents(&[first]).unwrap();

        let mut second = new_doc("completely different body", "searchable_text");
        second.id = Some("same".to_string());
        let fresh = new_doc("unrelated fresh content", "searchable_text");
        let err = index.insert_documents(&[fresh, second]).unwrap_err();

        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert_eq!(index.get_document("same").unwrap().unwrap().content, "first body");
        // The batch is rolled back as a whole
        assert_eq!(index.stats().unwrap().documents, 1);
    }

    #[test]
    fn test_same_id_and_content_is_a_duplicate() {
        let index = SqliteIndex::open_memory().unwrap();
        let mut doc = new_doc("first body", "searchable_text");
        doc.id = Some("same".to_string());
        index.insert_documents(&[doc.clone()]).unwrap();

        assert_eq!(index.insert_documents(&[doc]).unwrap(), 0);
    }

    #[test]
    fn test_explicit_id_and_metadata_round_trip() {
        let index = SqliteIndex::open_memory().unwrap();
        let mut doc = new_doc("Kommander KA104 datasheet", "technical_specs");
        doc.id = Some("ka104-spec".to_string());
        doc.metadata
            .insert("model".to_string(), vec!["KA104", "KA104 Live"].into());
        index.insert_documents(&[doc]).unwrap();

        let stored = index.get_document("ka104-spec").unwrap().unwrap();
        assert_eq!(stored.content, "Kommander KA104 datasheet");
        assert_eq!(stored.meta("model").unwrap().values(), vec!["KA104", "KA104 Live"]);
        assert!(index.get_document("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keyword_search() {
        let index = seeded();
        let results = index.search("KA02I power", 10, None).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|d| d.score > 0.0));
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_search_with_scalar_filter() {
        let index = seeded();
        let filter = MetadataFilter::new().with("content_type", "technical_specs");
        let results = index.search("power", 10, Some(&filter)).await.unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("2x150"));
    }

    #[tokio::test]
    async fn test_search_with_list_filter() {
        let index = seeded();
        let filter = MetadataFilter::new().with("content_type", vec!["question", "answer"]);
        let results = index.search("KA02I", 10, Some(&filter)).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].meta("content_type").unwrap().joined(),
            "answer"
        );
    }

    #[tokio::test]
    async fn test_unknown_filter_key_matches_nothing() {
        let index = seeded();
        let filter = MetadataFilter::new().with("no_such_field", "x");
        let results = index.search("power", 10, Some(&filter)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_punctuation_only_query_is_empty() {
        let index = seeded();
        assert!(index.search("?? !!", 10, None).await.unwrap().is_empty());
        assert!(index.search("power", 0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_k_limits_results() {
        let index = seeded();
        let results = index.search("KA02I power Kobra", 1, None).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_build_match_query() {
        assert_eq!(
            build_match_query("K-Array \"KA02I\" specs?").as_deref(),
            Some("\"K\" OR \"Array\" OR \"KA02I\" OR \"specs\"")
        );
        assert_eq!(build_match_query("  ?! "), None);
    }
}
