//! Persistent vector store on LanceDB.
//!
//! Every collection is a Lance table with one row per node and the
//! embedding in a fixed-size `vector` column. Queries are cosine
//! nearest-neighbour searches run by LanceDB; a document is replaced by
//! deleting its rows (`source_file = ...`) and appending the new ones.
//!
//! ```text
//! <persist_dir>/
//!   lancedb/
//!     deepseek-r1.lance/
//!     2501.12948.lance/
//! ```

use crate::error::RagError;
use crate::node::{ContentType, Node, NodeMetadata};
use arrow_array::builder::{FixedSizeListBuilder, Float32Builder};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt32Array, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType, Table};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

const LANCE_DIR: &str = "lancedb";
const MAX_NAME_LEN: usize = 63;

/// A node together with its embedding, as stored in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub text: String,
    pub metadata: NodeMetadata,
    pub embedding: Vec<f32>,
}

impl StoredRecord {
    pub fn new(node: Node, embedding: Vec<f32>) -> Self {
        Self {
            id: node.id,
            text: node.text,
            metadata: node.metadata,
            embedding,
        }
    }

    pub fn to_node(&self) -> Node {
        Node {
            id: self.id,
            text: self.text.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f32,
}

/// A row read back from a table.
struct Row {
    record: StoredRecord,
    seq: u64,
    distance: Option<f32>,
}

fn collection_schema(dimension: usize) -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("content_type", DataType::Utf8, false),
        Field::new("page_idx", DataType::UInt32, false),
        Field::new("source_file", DataType::Utf8, false),
        Field::new("image_path", DataType::Utf8, false),
        Field::new("embed_model", DataType::Utf8, false),
        // Insertion order, used to break score ties.
        Field::new("seq", DataType::UInt64, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
    ])
}

fn dimension_of(schema: &Schema) -> Option<usize> {
    match schema.field_with_name("vector").ok()?.data_type() {
        DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
        _ => None,
    }
}

fn content_type_from_str(s: &str) -> ContentType {
    match s {
        "equation" => ContentType::Equation,
        "table" => ContentType::Table,
        "image" => ContentType::Image,
        _ => ContentType::Text,
    }
}

/// Quote a string for a Lance SQL filter.
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Cosine distance from LanceDB to a similarity score. Zero-norm vectors
/// come back as NaN and score 0.
fn score_from_distance(distance: f32) -> f32 {
    let score = 1.0 - distance;
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// Best score first; equal scores keep insertion order.
fn rank(hits: &mut [(f32, u64, StoredRecord)]) {
    hits.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
}

fn records_to_batch(
    records: &[StoredRecord],
    embed_model: &str,
    dimension: usize,
    first_seq: u64,
) -> Result<RecordBatch, RagError> {
    let ids: Vec<String> = records.iter().map(|r| r.id.to_string()).collect();
    let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
    let content_types: Vec<&str> = records
        .iter()
        .map(|r| r.metadata.content_type.as_str())
        .collect();
    let pages: Vec<u32> = records.iter().map(|r| r.metadata.page_idx).collect();
    let sources: Vec<&str> = records
        .iter()
        .map(|r| r.metadata.source_file.as_str())
        .collect();
    let image_paths: Vec<&str> = records
        .iter()
        .map(|r| r.metadata.image_path.as_str())
        .collect();
    let models: Vec<&str> = vec![embed_model; records.len()];
    let seqs: Vec<u64> = (0..records.len() as u64).map(|i| first_seq + i).collect();

    let mut vectors = FixedSizeListBuilder::new(Float32Builder::new(), dimension as i32);
    for record in records {
        vectors.values().append_slice(&record.embedding);
        vectors.append(true);
    }

    RecordBatch::try_new(
        Arc::new(collection_schema(dimension)),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(content_types)),
            Arc::new(UInt32Array::from(pages)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(image_paths)),
            Arc::new(StringArray::from(models)),
            Arc::new(UInt64Array::from(seqs)),
            Arc::new(vectors.finish()),
        ],
    )
    .map_err(|e| RagError::store(format!("building record batch: {e}")))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, RagError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| RagError::store(format!("column '{name}' is missing or mistyped")))
}

fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<Row>, RagError> {
    let ids = column::<StringArray>(batch, "id")?;
    let texts = column::<StringArray>(batch, "text")?;
    let content_types = column::<StringArray>(batch, "content_type")?;
    let pages = column::<UInt32Array>(batch, "page_idx")?;
    let sources = column::<StringArray>(batch, "source_file")?;
    let image_paths = column::<StringArray>(batch, "image_path")?;
    let seqs = column::<UInt64Array>(batch, "seq")?;
    let vectors = batch
        .column_by_name("vector")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let id = Uuid::parse_str(ids.value(i))
            .map_err(|e| RagError::store(format!("bad node id '{}': {e}", ids.value(i))))?;
        let embedding = vectors
            .map(|v| v.value(i))
            .and_then(|values| {
                values
                    .as_any()
                    .downcast_ref::<Float32Array>()
                    .map(|f| f.values().to_vec())
            })
            .unwrap_or_default();

        rows.push(Row {
            record: StoredRecord {
                id,
                text: texts.value(i).to_string(),
                metadata: NodeMetadata {
                    content_type: content_type_from_str(content_types.value(i)),
                    page_idx: pages.value(i),
                    source_file: sources.value(i).to_string(),
                    image_path: image_paths.value(i).to_string(),
                },
                embedding,
            },
            seq: seqs.value(i),
            distance: distances.map(|d| d.value(i)),
        });
    }
    Ok(rows)
}

/// A named set of records sharing one embedding model and dimension,
/// backed by one Lance table. The table is created by the first write.
#[derive(Clone)]
pub struct Collection {
    pub name: String,
    pub embed_model: String,
    /// Fixed by the first record inserted.
    pub dimension: Option<usize>,
    conn: Connection,
    table: Option<Table>,
    next_seq: u64,
}

impl Collection {
    fn new(conn: Connection, name: &str, embed_model: &str) -> Self {
        Self {
            name: name.to_string(),
            embed_model: embed_model.to_string(),
            dimension: None,
            conn,
            table: None,
            next_seq: 0,
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> Result<usize, RagError> {
        match &self.table {
            Some(table) => table.count_rows(None).await.map_err(RagError::store),
            None => Ok(0),
        }
    }

    pub async fn is_empty(&self) -> Result<bool, RagError> {
        Ok(self.len().await? == 0)
    }

    /// All records in insertion order.
    pub async fn records(&self) -> Result<Vec<StoredRecord>, RagError> {
        let Some(table) = &self.table else {
            return Ok(Vec::new());
        };
        let count = self.len().await?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut stream = table
            .query()
            .limit(count)
            .execute()
            .await
            .map_err(RagError::store)?;
        let mut rows = Vec::with_capacity(count);
        while let Some(batch) = stream.try_next().await.map_err(RagError::store)? {
            rows.extend(batch_to_rows(&batch)?);
        }
        rows.sort_by_key(|r| r.seq);
        Ok(rows.into_iter().map(|r| r.record).collect())
    }

    fn check_dimension(&self, got: usize) -> Result<(), RagError> {
        match self.dimension {
            Some(expected) if expected != got => Err(RagError::DimensionMismatch {
                collection: self.name.clone(),
                expected,
                got,
            }),
            _ => Ok(()),
        }
    }

    /// The common dimension of `records`, which must equal `expected` when
    /// given. `None` for an empty slice.
    fn admit(
        &self,
        records: &[StoredRecord],
        expected: Option<usize>,
    ) -> Result<Option<usize>, RagError> {
        let Some(first) = records.first() else {
            return Ok(None);
        };
        let dim = expected.unwrap_or(first.embedding.len());
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != dim) {
            return Err(RagError::DimensionMismatch {
                collection: self.name.clone(),
                expected: dim,
                got: bad.embedding.len(),
            });
        }
        Ok(Some(dim))
    }

    async fn ensure_table(&mut self, dimension: usize) -> Result<Table, RagError> {
        if let Some(table) = &self.table {
            return Ok(table.clone());
        }
        info!(
            "Creating collection '{}' ({} dimensions)",
            self.name, dimension
        );
        let table = self
            .conn
            .create_empty_table(&self.name, Arc::new(collection_schema(dimension)))
            .execute()
            .await
            .map_err(RagError::store)?;
        self.table = Some(table.clone());
        self.dimension = Some(dimension);
        Ok(table)
    }

    async fn append(&mut self, records: &[StoredRecord], dimension: usize) -> Result<(), RagError> {
        if records.is_empty() {
            return Ok(());
        }
        let table = self.ensure_table(dimension).await?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let first_seq = now.max(self.next_seq);
        self.next_seq = first_seq + records.len() as u64;

        let batch = records_to_batch(records, &self.embed_model, dimension, first_seq)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(RagError::store)?;
        Ok(())
    }

    /// Insert records, replacing any with the same id.
    pub async fn upsert(&mut self, records: Vec<StoredRecord>) -> Result<(), RagError> {
        let Some(dim) = self.admit(&records, self.dimension)? else {
            return Ok(());
        };

        if let Some(table) = &self.table {
            let ids: Vec<String> = records
                .iter()
                .map(|r| sql_literal(&r.id.to_string()))
                .collect();
            table
                .delete(&format!("id IN ({})", ids.join(", ")))
                .await
                .map_err(RagError::store)?;
        }
        self.append(&records, dim).await
    }

    /// Drop every record of `source_file` and insert `records` in its place.
    /// Returns how many records were removed. Nothing is changed when the
    /// new records do not fit the collection.
    pub async fn replace_source(
        &mut self,
        source_file: &str,
        records: Vec<StoredRecord>,
    ) -> Result<usize, RagError> {
        let filter = format!("source_file = {}", sql_literal(source_file));
        let removed = match &self.table {
            Some(table) => table
                .count_rows(Some(filter.clone()))
                .await
                .map_err(RagError::store)?,
            None => 0,
        };
        let others = self.len().await?.saturating_sub(removed);

        // A collection emptied by the replacement may take a new dimension.
        let kept_dim = if others > 0 { self.dimension } else { None };
        let dim = self.admit(&records, kept_dim)?;

        let redimension = match (self.dimension, dim) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        };
        if redimension {
            debug!(
                "Collection '{}' changes dimension; recreating",
                self.name
            );
            self.conn
                .drop_table(&self.name)
                .await
                .map_err(RagError::store)?;
            self.table = None;
            self.dimension = None;
        } else if removed > 0 {
            if let Some(table) = &self.table {
                table.delete(&filter).await.map_err(RagError::store)?;
            }
        }

        if let Some(dim) = dim {
            self.append(&records, dim).await?;
        }

        debug!(
            "Collection '{}': replaced {} record(s) of {}",
            self.name, removed, source_file
        );
        Ok(removed)
    }

    /// The `top_k` records most similar to `embedding` by cosine
    /// similarity, best first. Equal scores keep insertion order.
    pub async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredNode>, RagError> {
        self.check_dimension(embedding.len())?;
        let Some(table) = &self.table else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut stream = table
            .vector_search(embedding.to_vec())
            .map_err(RagError::store)?
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .map_err(RagError::store)?;

        let mut hits = Vec::with_capacity(top_k);
        while let Some(batch) = stream.try_next().await.map_err(RagError::store)? {
            for row in batch_to_rows(&batch)? {
                let score = row.distance.map_or(0.0, score_from_distance);
                hits.push((score, row.seq, row.record));
            }
        }
        rank(&mut hits);

        Ok(hits
            .into_iter()
            .take(top_k)
            .map(|(score, _, record)| ScoredNode {
                node: record.to_node(),
                score,
            })
            .collect())
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("embed_model", &self.embed_model)
            .field("dimension", &self.dimension)
            .finish()
    }
}

/// Check a collection name: 1–63 characters of `[A-Za-z0-9._-]`, starting
/// and ending alphanumeric, without `..`.
pub fn validate_collection_name(name: &str) -> Result<(), RagError> {
    let invalid = |reason: &str| {
        Err(RagError::InvalidCollectionName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return invalid("must be 1-63 characters long");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return invalid("only ASCII letters, digits, '.', '_' and '-' are allowed");
    }
    let first_last_ok = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && name.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if !first_last_ok {
        return invalid("must start and end with a letter or digit");
    }
    if name.contains("..") {
        return invalid("must not contain '..'");
    }
    Ok(())
}

/// A LanceDB database holding one table per collection.
#[derive(Clone)]
pub struct CorpusStore {
    root: PathBuf,
    conn: Connection,
}

impl CorpusStore {
    /// Open (creating if needed) the store under `persist_dir`.
    pub async fn open(persist_dir: impl AsRef<Path>) -> Result<Self, RagError> {
        let root = persist_dir.as_ref().join(LANCE_DIR);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| RagError::io(&root, e))?;

        let conn = connect(&root.to_string_lossy())
            .execute()
            .await
            .map_err(|e| RagError::store(format!("connecting to {}: {e}", root.display())))?;
        debug!("Opened corpus store at {}", root.display());
        Ok(Self { root, conn })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn exists(&self, name: &str) -> Result<bool, RagError> {
        let names = self
            .conn
            .table_names()
            .execute()
            .await
            .map_err(RagError::store)?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn open_collection(&self, name: &str, embed_model: &str) -> Result<Collection, RagError> {
        let table = self
            .conn
            .open_table(name)
            .execute()
            .await
            .map_err(RagError::store)?;
        let schema = table.schema().await.map_err(RagError::store)?;

        let mut stored_model = None;
        let mut stream = table
            .query()
            .limit(1)
            .execute()
            .await
            .map_err(RagError::store)?;
        if let Some(batch) = stream.try_next().await.map_err(RagError::store)? {
            let models = column::<StringArray>(&batch, "embed_model")?;
            if batch.num_rows() > 0 {
                stored_model = Some(models.value(0).to_string());
            }
        }

        let mut collection = Collection::new(self.conn.clone(), name, embed_model);
        if let Some(model) = stored_model {
            collection.embed_model = model;
        }
        collection.dimension = dimension_of(&schema);
        collection.table = Some(table);
        Ok(collection)
    }

    /// Open a collection, or start an empty one. The table is created by
    /// the first write.
    pub async fn get_or_create_collection(
        &self,
        name: &str,
        embed_model: &str,
    ) -> Result<Collection, RagError> {
        validate_collection_name(name)?;
        if !self.exists(name).await? {
            return Ok(Collection::new(self.conn.clone(), name, embed_model));
        }

        let collection = self.open_collection(name, embed_model).await?;
        if collection.embed_model != embed_model {
            warn!(
                "Collection '{}' was built with '{}' but '{}' is configured",
                name, collection.embed_model, embed_model
            );
            // New records carry the configured model.
            return Ok(Collection {
                embed_model: embed_model.to_string(),
                ..collection
            });
        }
        Ok(collection)
    }

    /// Open an existing collection.
    pub async fn get_collection(&self, name: &str) -> Result<Collection, RagError> {
        validate_collection_name(name)?;
        if !self.exists(name).await? {
            return Err(RagError::CollectionNotFound {
                name: name.to_string(),
            });
        }
        self.open_collection(name, "").await
    }

    /// Names of all collections, sorted.
    pub async fn list_collections(&self) -> Result<Vec<String>, RagError> {
        let mut names: Vec<String> = self
            .conn
            .table_names()
            .execute()
            .await
            .map_err(RagError::store)?
            .into_iter()
            .filter(|n| validate_collection_name(n).is_ok())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Remove a collection. Returns whether it existed.
    pub async fn delete_collection(&self, name: &str) -> Result<bool, RagError> {
        validate_collection_name(name)?;
        if !self.exists(name).await? {
            return Ok(false);
        }
        self.conn.drop_table(name).await.map_err(RagError::store)?;
        info!("Deleted collection '{}'", name);
        Ok(true)
    }
}

impl std::fmt::Debug for CorpusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusStore")
            .field("root", &self.root)
            .finish()
    }
}
