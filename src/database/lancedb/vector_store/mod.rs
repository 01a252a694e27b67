#[cfg(test)]
mod tests;

use super::{CHUNKS_TABLE, VectorRecord, path_predicate};
use crate::CodeRagError;
use crate::chunking::{Chunk, Language};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase, Select},
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Vector table of one project store
pub struct VectorStore {
    connection: Connection,
    table: Table,
    dimension: usize,
}

/// One similarity search candidate
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    /// Cosine similarity, 1.0 for identical direction
    pub score: f32,
    pub distance: f32,
}

impl VectorStore {
    /// Open or create the vector table under `dir`
    ///
    /// # Arguments
    /// * `dir` - Directory holding the LanceDB dataset
    /// * `dimension` - Vector length produced by the embedding backend
    ///
    /// # Returns
    /// The store and whether an existing table had to be recreated because
    /// its vector dimension no longer matches the backend
    #[inline]
    pub async fn open(dir: &Path, dimension: usize) -> Result<(Self, bool), CodeRagError> {
        debug!("Opening LanceDB at path: {:?}", dir);

        std::fs::create_dir_all(dir).map_err(|e| {
            CodeRagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = dir.to_string_lossy().into_owned();
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to list tables: {}", e)))?;

        let mut reset = false;
        if table_names.iter().any(|name| name == CHUNKS_TABLE) {
            let table = open_table(&connection).await?;
            match stored_dimension(&table).await {
                Ok(stored) if stored == dimension => {
                    debug!("Chunks table present with {} dimensions", stored);
                    return Ok((
                        Self {
                            connection,
                            table,
                            dimension,
                        },
                        false,
                    ));
                }
                Ok(stored) => {
                    warn!(
                        "Vector dimension changed from {} to {}, recreating chunks table",
                        stored, dimension
                    );
                }
                Err(e) => {
                    warn!("Chunks table unreadable, recreating it: {}", e);
                }
            }
            connection
                .drop_table(CHUNKS_TABLE)
                .await
                .map_err(|e| CodeRagError::Database(format!("Failed to drop table: {}", e)))?;
            reset = true;
        }

        let table = connection
            .create_empty_table(CHUNKS_TABLE, create_schema(dimension))
            .execute()
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to create table: {}", e)))?;

        info!("Created chunks table with {} dimensions", dimension);
        Ok((
            Self {
                connection,
                table,
                dimension,
            },
            reset,
        ))
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Append records; callers delete the owning file's old rows first
    #[inline]
    pub async fn insert(&self, records: &[VectorRecord]) -> Result<(), CodeRagError> {
        if records.is_empty() {
            debug!("No vectors to store");
            return Ok(());
        }

        let batch = create_record_batch(records, self.dimension)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);

        self.table
            .add(reader)
            .execute()
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to insert vectors: {}", e)))?;

        debug!("Stored {} vectors", records.len());
        Ok(())
    }

    /// Remove every row owned by `path`
    #[inline]
    pub async fn delete_path(&self, path: &str) -> Result<(), CodeRagError> {
        self.table
            .delete(&path_predicate(path))
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to delete vectors for {}: {}", path, e)))?;
        Ok(())
    }

    /// Drop all rows by recreating the table
    #[inline]
    pub async fn clear(&mut self) -> Result<(), CodeRagError> {
        self.connection
            .drop_table(CHUNKS_TABLE)
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to drop table: {}", e)))?;
        self.table = self
            .connection
            .create_empty_table(CHUNKS_TABLE, create_schema(self.dimension))
            .execute()
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to create table: {}", e)))?;

        info!("Vector table cleared");
        Ok(())
    }

    /// Number of rows, optionally restricted by a filter expression
    #[inline]
    pub async fn count(&self, filter: Option<String>) -> Result<usize, CodeRagError> {
        self.table
            .count_rows(filter)
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to count rows: {}", e)))
    }

    /// Distinct owning paths present in the table
    #[inline]
    pub async fn paths(&self) -> Result<BTreeSet<String>, CodeRagError> {
        let mut stream = self
            .table
            .query()
            .select(Select::columns(&["path"]))
            .execute()
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to list paths: {}", e)))?;

        let mut paths = BTreeSet::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            let column = string_column(&batch, "path")?;
            for row in 0..batch.num_rows() {
                paths.insert(column.value(row).to_string());
            }
        }
        Ok(paths)
    }

    /// Nearest rows by cosine distance; `filter` is applied before ranking
    ///
    /// # Arguments
    /// * `query_vector` - Unit-length query embedding
    /// * `limit` - Maximum number of candidates to return
    /// * `filter` - Optional filter expression over chunk metadata
    #[inline]
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: Option<&str>,
    ) -> Result<Vec<VectorHit>, CodeRagError> {
        debug!("Searching for similar vectors with limit: {}", limit);

        let mut query = self
            .table
            .vector_search(query_vector)
            .map_err(|e| CodeRagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit);

        if let Some(filter) = filter {
            query = query.only_if(filter);
        }

        let mut results = query
            .execute()
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to execute search: {}", e)))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| CodeRagError::Database(format!("Failed to read result stream: {}", e)))?
        {
            hits.extend(parse_batch(&batch)?);
        }

        debug!("Parsed {} search results", hits.len());
        Ok(hits)
    }
}

async fn open_table(connection: &Connection) -> Result<Table, CodeRagError> {
    connection
        .open_table(CHUNKS_TABLE)
        .execute()
        .await
        .map_err(|e| CodeRagError::Database(format!("Failed to open table: {}", e)))
}

/// Vector length recorded in an existing table's schema
async fn stored_dimension(table: &Table) -> Result<usize, CodeRagError> {
    let schema = table
        .schema()
        .await
        .map_err(|e| CodeRagError::Database(format!("Failed to get table schema: {}", e)))?;

    for field in schema.fields() {
        if field.name() == "vector" {
            if let DataType::FixedSizeList(_, size) = field.data_type() {
                return Ok(*size as usize);
            }
        }
    }

    Err(CodeRagError::Database(
        "Could not find vector column or determine dimension".to_string(),
    ))
}

fn create_schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
        Field::new("path", DataType::Utf8, false),
        Field::new("language", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("contextualized", DataType::Utf8, false),
        Field::new("start_line", DataType::UInt32, false),
        Field::new("end_line", DataType::UInt32, false),
        Field::new("node_kind", DataType::Utf8, false),
        Field::new("scope", DataType::Utf8, false),
        Field::new("imports", DataType::Utf8, false),
        Field::new("signatures", DataType::Utf8, false),
        Field::new("chunker", DataType::Utf8, false),
        Field::new("indexed_at", DataType::Utf8, false),
    ]))
}

fn encode_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(value: &str) -> Vec<String> {
    serde_json::from_str(value).unwrap_or_default()
}

fn create_record_batch(records: &[VectorRecord], dimension: usize) -> Result<RecordBatch, CodeRagError> {
    if let Some(bad) = records.iter().find(|r| r.vector.len() != dimension) {
        return Err(CodeRagError::Database(format!(
            "Vector for chunk {} has {} dimensions, table expects {}",
            bad.chunk.id,
            bad.vector.len(),
            dimension
        )));
    }

    let len = records.len();
    let indexed_at = Utc::now().to_rfc3339();

    let mut flat_values = Vec::with_capacity(len * dimension);
    for record in records {
        flat_values.extend_from_slice(&record.vector);
    }
    let values_array = Float32Array::from(flat_values);
    let field = Arc::new(Field::new("item", DataType::Float32, true));
    let vector_array =
        FixedSizeListArray::try_new(field, dimension as i32, Arc::new(values_array), None)
            .map_err(|e| CodeRagError::Database(format!("Failed to create vector array: {}", e)))?;

    let strings = |f: fn(&Chunk) -> String| -> Arc<dyn Array> {
        Arc::new(StringArray::from(
            records.iter().map(|r| f(&r.chunk)).collect::<Vec<_>>(),
        ))
    };

    let arrays: Vec<Arc<dyn Array>> = vec![
        strings(|c| c.id.clone()),
        Arc::new(vector_array),
        strings(|c| c.path.clone()),
        strings(|c| c.language.as_str().to_string()),
        strings(|c| c.category.as_str().to_string()),
        strings(|c| c.text.clone()),
        strings(|c| c.contextualized.clone()),
        Arc::new(UInt32Array::from(
            records.iter().map(|r| r.chunk.start_line).collect::<Vec<_>>(),
        )),
        Arc::new(UInt32Array::from(
            records.iter().map(|r| r.chunk.end_line).collect::<Vec<_>>(),
        )),
        strings(|c| c.node_kind.clone()),
        strings(|c| encode_list(&c.scope)),
        strings(|c| encode_list(&c.imports)),
        strings(|c| encode_list(&c.signatures)),
        strings(|c| c.chunker.clone()),
        Arc::new(StringArray::from(vec![indexed_at.as_str(); len])),
    ];

    RecordBatch::try_new(create_schema(dimension), arrays)
        .map_err(|e| CodeRagError::Database(format!("Failed to create record batch: {}", e)))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, CodeRagError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| CodeRagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| CodeRagError::Database(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array, CodeRagError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| CodeRagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| CodeRagError::Database(format!("Invalid {} column type", name)))
}

/// Parse a single record batch from search results
fn parse_batch(batch: &RecordBatch) -> Result<Vec<VectorHit>, CodeRagError> {
    let ids = string_column(batch, "id")?;
    let paths = string_column(batch, "path")?;
    let languages = string_column(batch, "language")?;
    let categories = string_column(batch, "category")?;
    let texts = string_column(batch, "text")?;
    let contextualized = string_column(batch, "contextualized")?;
    let start_lines = u32_column(batch, "start_line")?;
    let end_lines = u32_column(batch, "end_line")?;
    let node_kinds = string_column(batch, "node_kind")?;
    let scopes = string_column(batch, "scope")?;
    let imports = string_column(batch, "imports")?;
    let signatures = string_column(batch, "signatures")?;
    let chunkers = string_column(batch, "chunker")?;

    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let mut hits = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let language = languages.value(row).parse().unwrap_or(Language::Unknown);
        let category = categories
            .value(row)
            .parse()
            .unwrap_or_else(|_| language.category());

        let chunk = Chunk {
            id: ids.value(row).to_string(),
            path: paths.value(row).to_string(),
            language,
            category,
            text: texts.value(row).to_string(),
            contextualized: contextualized.value(row).to_string(),
            start_line: start_lines.value(row),
            end_line: end_lines.value(row),
            node_kind: node_kinds.value(row).to_string(),
            scope: decode_list(scopes.value(row)),
            imports: decode_list(imports.value(row)),
            signatures: decode_list(signatures.value(row)),
            chunker: chunkers.value(row).to_string(),
        };

        let distance = distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

        hits.push(VectorHit {
            chunk,
            score: 1.0 - distance,
            distance,
        });
    }

    Ok(hits)
}
