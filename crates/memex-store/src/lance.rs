//! LanceDB implementation of [`VectorStore`].

use arrow_array::{
    Array, ArrayRef, Float32Array, RecordBatch, RecordBatchIterator, StringArray, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, Table};
use memex_core::{
    EmbeddingRecord, FileRecord, SearchHit, StoreError, StoreOp, StoreStats, VectorStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

const DOCUMENTS_TABLE: &str = "documents";
const FILES_TABLE: &str = "files";

/// LanceDB-backed vector store.
///
/// Two tables: `documents` holds one row per indexed file (id, metadata,
/// vector); `files` persists [`FileRecord`]s so the registry survives
/// restart. Connection and table handles are lazily initialized.
pub struct LanceStore {
    db_path: PathBuf,
    dimension: usize,
    model_name: String,
    connection: RwLock<Option<Connection>>,
    documents_table: RwLock<Option<Table>>,
    files_table: RwLock<Option<Table>>,
}

impl LanceStore {
    /// Create a new `LanceStore`. Nothing touches disk until
    /// [`VectorStore::init`].
    #[must_use]
    pub fn new(db_path: PathBuf, dimension: usize, model_name: impl Into<String>) -> Self {
        Self {
            db_path,
            dimension,
            model_name: model_name.into(),
            connection: RwLock::new(None),
            documents_table: RwLock::new(None),
            files_table: RwLock::new(None),
        }
    }

    /// Database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn get_connection(&self) -> Result<Connection, StoreError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut conn = self.connection.write().await;
        if conn.is_none() {
            let db_path_str = self.db_path.to_string_lossy().to_string();
            let new_conn = connect(&db_path_str)
                .execute()
                .await
                .map_err(|e| StoreError::Init(format!("failed to connect to LanceDB: {e}")))?;
            *conn = Some(new_conn);
        }
        Ok(conn.as_ref().unwrap().clone())
    }

    fn documents_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("path", DataType::Utf8, false),
            Field::new("mtime", DataType::Utf8, false),
            Field::new("size", DataType::UInt64, false),
            Field::new("model", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ])
    }

    fn files_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("path", DataType::Utf8, false),
            Field::new("content_hash", DataType::Utf8, true),
            Field::new("last_indexed_hash", DataType::Utf8, true),
            Field::new("mtime", DataType::Utf8, false),
            Field::new("size", DataType::UInt64, false),
            Field::new("indexed_at", DataType::Utf8, true),
        ])
    }

    async fn get_documents_table(&self) -> Result<Table, StoreError> {
        {
            let table = self.documents_table.read().await;
            if let Some(ref t) = *table {
                return Ok(t.clone());
            }
        }

        let conn = self.get_connection().await?;
        let mut table_lock = self.documents_table.write().await;

        if table_lock.is_none() {
            let t = conn
                .open_table(DOCUMENTS_TABLE)
                .execute()
                .await
                .map_err(|e| StoreError::Init(format!("failed to open documents table: {e}")))?;
            *table_lock = Some(t);
        }

        Ok(table_lock.as_ref().unwrap().clone())
    }

    async fn get_files_table(&self) -> Result<Table, StoreError> {
        {
            let table = self.files_table.read().await;
            if let Some(ref t) = *table {
                return Ok(t.clone());
            }
        }

        let conn = self.get_connection().await?;
        let mut table_lock = self.files_table.write().await;

        if table_lock.is_none() {
            let t = conn
                .open_table(FILES_TABLE)
                .execute()
                .await
                .map_err(|e| StoreError::Init(format!("failed to open files table: {e}")))?;
            *table_lock = Some(t);
        }

        Ok(table_lock.as_ref().unwrap().clone())
    }

    /// Verify that an existing documents table matches the configured
    /// vector dimension. A mismatch means the index was built with a
    /// different model and must not be silently reused.
    async fn verify_dimension(&self) -> Result<(), StoreError> {
        let table = self.get_documents_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| StoreError::Schema(format!("failed to read table schema: {e}")))?;

        let field = schema
            .field_with_name("vector")
            .map_err(|e| StoreError::Schema(format!("missing vector column: {e}")))?;

        match field.data_type() {
            DataType::FixedSizeList(_, width) => {
                let width = *width as usize;
                if width != self.dimension {
                    return Err(StoreError::Schema(format!(
                        "existing index has vector width {width}, configured model produces {}",
                        self.dimension
                    )));
                }
                Ok(())
            }
            other => Err(StoreError::Schema(format!(
                "vector column has unexpected type {other:?}"
            ))),
        }
    }

    fn records_to_batch(&self, records: &[&EmbeddingRecord]) -> Result<RecordBatch, StoreError> {
        let ids: Vec<_> = records.iter().map(|r| r.id.clone()).collect();
        let paths: Vec<_> = records
            .iter()
            .map(|r| r.metadata.path.to_string_lossy().to_string())
            .collect();
        let mtimes: Vec<_> = records
            .iter()
            .map(|r| r.metadata.mtime.to_rfc3339())
            .collect();
        let sizes: Vec<_> = records.iter().map(|r| r.metadata.size).collect();
        let models: Vec<_> = records.iter().map(|_| self.model_name.clone()).collect();

        let vectors: Vec<&[f32]> = records.iter().map(|r| r.vector.as_slice()).collect();
        let vector_array = build_vector_array(&vectors, self.dimension)?;

        let schema = Arc::new(self.documents_schema());
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(paths)),
                Arc::new(StringArray::from(mtimes)),
                Arc::new(UInt64Array::from(sizes)),
                Arc::new(StringArray::from(models)),
                vector_array,
            ],
        )
        .map_err(|e| StoreError::Insert(format!("failed to create RecordBatch: {e}")))
    }

    fn file_to_batch(&self, record: &FileRecord) -> Result<RecordBatch, StoreError> {
        let schema = Arc::new(self.files_schema());
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![record
                    .path
                    .to_string_lossy()
                    .to_string()])),
                Arc::new(StringArray::from(vec![record.content_hash.clone()])),
                Arc::new(StringArray::from(vec![record.last_indexed_hash.clone()])),
                Arc::new(StringArray::from(vec![record.mtime.to_rfc3339()])),
                Arc::new(UInt64Array::from(vec![record.size])),
                Arc::new(StringArray::from(vec![record
                    .indexed_at
                    .map(|t| t.to_rfc3339())])),
            ],
        )
        .map_err(|e| StoreError::Insert(format!("failed to create file RecordBatch: {e}")))
    }
}

#[async_trait]
impl VectorStore for LanceStore {
    async fn init(&self) -> Result<(), StoreError> {
        info!("Initializing LanceDB at {:?}", self.db_path);

        if let Some(parent) = self.db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Init(format!("failed to create db directory: {e}")))?;
        }

        let conn = self.get_connection().await?;

        let tables = conn
            .table_names()
            .execute()
            .await
            .map_err(|e| StoreError::Init(format!("failed to list tables: {e}")))?;

        if tables.contains(&DOCUMENTS_TABLE.to_string()) {
            // Reusing an existing index: the vector width must match the
            // configured model, otherwise queries would silently misrank.
            self.verify_dimension().await?;
        } else {
            info!("Creating documents table");
            let schema = Arc::new(self.documents_schema());
            conn.create_empty_table(DOCUMENTS_TABLE, schema)
                .execute()
                .await
                .map_err(|e| StoreError::Init(format!("failed to create documents table: {e}")))?;
        }

        if !tables.contains(&FILES_TABLE.to_string()) {
            info!("Creating files table");
            let schema = Arc::new(self.files_schema());
            conn.create_empty_table(FILES_TABLE, schema)
                .execute()
                .await
                .map_err(|e| StoreError::Init(format!("failed to create files table: {e}")))?;
        }

        info!("LanceDB initialized");
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn apply(&self, ops: &[StoreOp]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let table = self.get_documents_table().await?;

        // Every op is keyed by id; deleting all touched ids first makes
        // the whole batch an idempotent replace.
        let ids: Vec<String> = ops
            .iter()
            .map(|op| match op {
                StoreOp::Upsert(record) => escape(&record.id),
                StoreOp::Delete { id, .. } => escape(id),
            })
            .collect();

        let predicate = format!("id IN ({})", ids.join(", "));
        table
            .delete(&predicate)
            .await
            .map_err(|e| StoreError::Delete(format!("failed to clear batch ids: {e}")))?;

        let upserts: Vec<&EmbeddingRecord> = ops
            .iter()
            .filter_map(|op| match op {
                StoreOp::Upsert(record) => Some(record),
                StoreOp::Delete { .. } => None,
            })
            .collect();

        if !upserts.is_empty() {
            let batch = self.records_to_batch(&upserts)?;
            let schema = batch.schema();
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

            table
                .add(Box::new(batches))
                .execute()
                .await
                .map_err(|e| StoreError::Insert(format!("failed to insert documents: {e}")))?;
        }

        debug!(
            "Applied batch: {} upserts, {} deletes",
            upserts.len(),
            ops.len() - upserts.len()
        );
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, StoreError> {
        debug!("Vector search with k={k}");

        let table = self.get_documents_table().await?;

        let mut results = table
            .vector_search(vector.to_vec())
            .map_err(|e| StoreError::Query(format!("failed to create search query: {e}")))?
            .limit(k)
            .execute()
            .await
            .map_err(|e| StoreError::Query(format!("failed to execute search: {e}")))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| StoreError::Query(format!("failed to fetch results: {e}")))?
        {
            hits.extend(batch_to_hits(&batch)?);
        }

        debug!("Found {} results", hits.len());
        Ok(hits)
    }

    async fn get_file(&self, path: &Path) -> Result<Option<FileRecord>, StoreError> {
        let table = self.get_files_table().await?;

        let predicate = format!("path = {}", escape(&path.to_string_lossy()));
        let mut results = table
            .query()
            .only_if(predicate)
            .limit(1)
            .execute()
            .await
            .map_err(|e| StoreError::Query(format!("failed to query file: {e}")))?;

        if let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| StoreError::Query(format!("failed to fetch file: {e}")))?
        {
            let records = batch_to_file_records(&batch)?;
            return Ok(records.into_iter().next());
        }

        Ok(None)
    }

    async fn upsert_file(&self, record: &FileRecord) -> Result<(), StoreError> {
        let table = self.get_files_table().await?;

        let predicate = format!("path = {}", escape(&record.path.to_string_lossy()));
        let _ = table.delete(&predicate).await;

        let batch = self.file_to_batch(record)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| StoreError::Insert(format!("failed to insert file record: {e}")))?;

        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<(), StoreError> {
        let table = self.get_files_table().await?;
        let predicate = format!("path = {}", escape(&path.to_string_lossy()));
        table
            .delete(&predicate)
            .await
            .map_err(|e| StoreError::Delete(format!("failed to delete file record: {e}")))?;
        Ok(())
    }

    async fn all_files(&self) -> Result<Vec<FileRecord>, StoreError> {
        let table = self.get_files_table().await?;

        let mut results = table
            .query()
            .only_if("path LIKE '%'")
            .execute()
            .await
            .map_err(|e| StoreError::Query(format!("failed to query files: {e}")))?;

        let mut records = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| StoreError::Query(format!("failed to fetch files: {e}")))?
        {
            records.extend(batch_to_file_records(&batch)?);
        }

        debug!("Loaded {} file records", records.len());
        Ok(records)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let documents = self.get_documents_table().await?;
        let files = self.get_files_table().await?;

        let total_documents = documents
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Query(format!("failed to count documents: {e}")))?
            as u64;

        let total_files = files
            .count_rows(None)
            .await
            .map_err(|e| StoreError::Query(format!("failed to count files: {e}")))?
            as u64;

        Ok(StoreStats {
            total_documents,
            total_files,
            index_size_bytes: calculate_dir_size(&self.db_path),
            last_updated: Some(Utc::now()),
        })
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Quote a string for a Lance SQL predicate.
fn escape(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Total size of a directory tree in bytes.
fn calculate_dir_size(path: &Path) -> u64 {
    if !path.exists() {
        return 0;
    }

    let mut total_size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if entry_path.is_file() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            } else if entry_path.is_dir() {
                total_size += calculate_dir_size(&entry_path);
            }
        }
    }
    total_size
}

fn build_vector_array(vectors: &[&[f32]], dim: usize) -> Result<ArrayRef, StoreError> {
    use arrow_array::builder::{FixedSizeListBuilder, Float32Builder};

    let mut builder = FixedSizeListBuilder::new(Float32Builder::new(), dim as i32);

    for vector in vectors {
        if vector.len() != dim {
            return Err(StoreError::Insert(format!(
                "vector width {} does not match store dimension {dim}",
                vector.len()
            )));
        }
        let values = builder.values();
        for &v in *vector {
            values.append_value(v);
        }
        builder.append(true);
    }

    Ok(Arc::new(builder.finish()))
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn batch_to_hits(batch: &RecordBatch) -> Result<Vec<SearchHit>, StoreError> {
    let paths = batch
        .column_by_name("path")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>());
    let mtimes = batch
        .column_by_name("mtime")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>());
    let sizes = batch
        .column_by_name("size")
        .and_then(|c| c.as_any().downcast_ref::<UInt64Array>());
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let (Some(paths), Some(mtimes), Some(sizes)) = (paths, mtimes, sizes) else {
        return Err(StoreError::Query("missing required columns".to_string()));
    };

    let mut hits = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        // Lance reports L2/cosine distance; smaller is closer.
        let score = distances.map_or(0.0, |d| 1.0 - d.value(i));
        hits.push(SearchHit {
            path: PathBuf::from(paths.value(i)),
            score,
            mtime: parse_timestamp(mtimes.value(i)),
            size: sizes.value(i),
        });
    }

    Ok(hits)
}

fn batch_to_file_records(batch: &RecordBatch) -> Result<Vec<FileRecord>, StoreError> {
    let paths = batch
        .column_by_name("path")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>());
    let content_hashes = batch
        .column_by_name("content_hash")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>());
    let last_indexed = batch
        .column_by_name("last_indexed_hash")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>());
    let mtimes = batch
        .column_by_name("mtime")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>());
    let sizes = batch
        .column_by_name("size")
        .and_then(|c| c.as_any().downcast_ref::<UInt64Array>());
    let indexed_ats = batch
        .column_by_name("indexed_at")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>());

    let (Some(paths), Some(mtimes), Some(sizes)) = (paths, mtimes, sizes) else {
        return Err(StoreError::Query("missing required columns".to_string()));
    };

    let optional = |arr: Option<&StringArray>, i: usize| -> Option<String> {
        arr.and_then(|a| {
            if a.is_null(i) {
                None
            } else {
                Some(a.value(i).to_string())
            }
        })
    };

    let mut records = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        records.push(FileRecord {
            path: PathBuf::from(paths.value(i)),
            content_hash: optional(content_hashes, i),
            last_indexed_hash: optional(last_indexed, i),
            mtime: parse_timestamp(mtimes.value(i)),
            size: sizes.value(i),
            indexed_at: optional(indexed_ats, i).map(|s| parse_timestamp(&s)),
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_quotes() {
        assert_eq!(escape("plain"), "'plain'");
        assert_eq!(escape("it's"), "'it''s'");
    }

    #[test]
    fn test_parse_timestamp_round_trip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&now.to_rfc3339());
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn test_build_vector_array_rejects_wrong_width() {
        let short: Vec<f32> = vec![1.0, 2.0];
        let result = build_vector_array(&[short.as_slice()], 3);
        assert!(matches!(result, Err(StoreError::Insert(_))));
    }

    #[test]
    fn test_documents_schema_vector_width() {
        let store = LanceStore::new(PathBuf::from("/tmp/db"), 384, "test-model");
        let schema = store.documents_schema();
        let field = schema.field_with_name("vector").unwrap();
        match field.data_type() {
            DataType::FixedSizeList(_, width) => assert_eq!(*width, 384),
            other => panic!("unexpected vector type {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lance_store_round_trip() {
        use memex_core::{record_id, DocumentMetadata};
        let dir = tempfile::tempdir().unwrap();
        let store = LanceStore::new(dir.path().join("index.lance"), 4, "test-model");
        store.init().await.unwrap();

        let path = PathBuf::from("/notes/a.md");
        let record = EmbeddingRecord {
            id: record_id(&path),
            vector: vec![1.0, 0.0, 0.0, 0.0],
            metadata: DocumentMetadata {
                path: path.clone(),
                mtime: Utc::now(),
                size: 12,
            },
        };
        store
            .apply(&[StoreOp::Upsert(record.clone())])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0, 0.0, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, path);

        store
            .apply(&[StoreOp::Delete {
                id: record.id.clone(),
                path: path.clone(),
            }])
            .await
            .unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_documents, 0);
    }

    #[tokio::test]
    async fn test_lance_store_dimension_mismatch_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.lance");

        let store = LanceStore::new(db_path.clone(), 4, "model-a");
        store.init().await.unwrap();
        drop(store);

        let mismatched = LanceStore::new(db_path, 8, "model-b");
        let result = mismatched.init().await;
        assert!(matches!(result, Err(StoreError::Schema(_))));
    }

    #[tokio::test]
    async fn test_lance_store_file_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.lance");

        {
            let store = LanceStore::new(db_path.clone(), 4, "test-model");
            store.init().await.unwrap();
            store
                .upsert_file(&FileRecord {
                    path: PathBuf::from("/notes/persisted.md"),
                    content_hash: Some("h".to_string()),
                    last_indexed_hash: Some("h".to_string()),
                    mtime: Utc::now(),
                    size: 5,
                    indexed_at: Some(Utc::now()),
                })
                .await
                .unwrap();
        }

        let reopened = LanceStore::new(db_path, 4, "test-model");
        reopened.init().await.unwrap();
        let files = reopened.all_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].last_indexed_hash, Some("h".to_string()));
    }
}
