//! Chunk storage and vector search over SQLite.
//!
//! The search backend is a trait seam so a dedicated vector index can
//! replace the bundled SQLite scan without touching callers.

use async_trait::async_trait;

use {sqlx::SqlitePool, tracing::debug};

use {
    crate::{metric::DistanceMetric, schema::EmbeddingChunk},
    orac_common::{Audit, EngineError, EngineResult},
};

/// Optional candidate narrowing for `search`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub session: Option<String>,
    pub user_id: Option<String>,
}

/// One search result: a chunk and its distance under the query metric
/// (lower = closer).
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: EmbeddingChunk,
    pub score: f32,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Replace a turn's chunks wholesale (delete-then-insert as one
    /// logical operation). This is what makes re-indexing idempotent.
    async fn replace_chunks_for_turn(
        &self,
        turn_id: &str,
        chunks: &[EmbeddingChunk],
    ) -> EngineResult<()>;

    async fn get_chunks_for_turn(&self, turn_id: &str) -> EngineResult<Vec<EmbeddingChunk>>;

    async fn delete_chunks_for_turn(&self, turn_id: &str) -> EngineResult<u64>;

    /// k-nearest chunks under `metric`, best-first. Chunks embedded under
    /// any other metric are excluded from candidacy. Ties break by most
    /// recent `created_on`, then chunk id, for determinism.
    async fn search(
        &self,
        query_vector: &[f32],
        metric: DistanceMetric,
        k: usize,
        filter: &SearchFilter,
    ) -> EngineResult<Vec<SearchHit>>;
}

/// Encode a vector as a little-endian f32 BLOB.
fn encode_vector(v: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(v).to_vec()
}

fn decode_vector(bytes: &[u8]) -> EngineResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(EngineError::InvalidInput(format!(
            "corrupt vector blob of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

pub struct SqliteChunkStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ChunkRow {
    id: String,
    turn_id: String,
    chunk_index: i64,
    span_start: i64,
    span_end: i64,
    lossless_text: String,
    content_snapshot: Option<String>,
    vector: Vec<u8>,
    embedding_model: String,
    embedding_provider: String,
    distance_metric: String,
    created_on: i64,
    created_by: String,
    updated_on: i64,
    updated_by: String,
    row_version: i64,
}

impl TryFrom<ChunkRow> for EmbeddingChunk {
    type Error = EngineError;

    fn try_from(r: ChunkRow) -> Result<Self, EngineError> {
        Ok(Self {
            id: r.id,
            turn_id: r.turn_id,
            chunk_index: r.chunk_index,
            span_start: r.span_start,
            span_end: r.span_end,
            lossless_text: r.lossless_text,
            content_snapshot: r
                .content_snapshot
                .map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
            vector: decode_vector(&r.vector)?,
            embedding_model: r.embedding_model,
            embedding_provider: r.embedding_provider,
            distance_metric: r.distance_metric.parse()?,
            audit: Audit {
                created_on: r.created_on,
                created_by: r.created_by,
                updated_on: r.updated_on,
                updated_by: r.updated_by,
                row_version: r.row_version,
            },
        })
    }
}

impl SqliteChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `embedding_chunks` table if it doesn't exist. Requires
    /// the `turns` table (foreign-key target) to exist first.
    pub async fn init(pool: &SqlitePool) -> EngineResult<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS embedding_chunks (
                id                 TEXT PRIMARY KEY,
                turn_id            TEXT NOT NULL REFERENCES turns(id) ON DELETE CASCADE,
                chunk_index        INTEGER NOT NULL,
                span_start         INTEGER NOT NULL,
                span_end           INTEGER NOT NULL,
                lossless_text      TEXT NOT NULL,
                content_snapshot   TEXT,
                vector             BLOB NOT NULL,
                embedding_model    TEXT NOT NULL,
                embedding_provider TEXT NOT NULL,
                distance_metric    TEXT NOT NULL,
                created_on         INTEGER NOT NULL,
                created_by         TEXT NOT NULL,
                updated_on         INTEGER NOT NULL,
                updated_by         TEXT NOT NULL,
                row_version        INTEGER NOT NULL DEFAULT 1,
                UNIQUE (turn_id, chunk_index)
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_metric ON embedding_chunks(distance_metric)",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn replace_chunks_for_turn(
        &self,
        turn_id: &str,
        chunks: &[EmbeddingChunk],
    ) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM embedding_chunks WHERE turn_id = ?")
            .bind(turn_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let snapshot = chunk
                .content_snapshot
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

            sqlx::query(
                r#"INSERT INTO embedding_chunks
                   (id, turn_id, chunk_index, span_start, span_end, lossless_text,
                    content_snapshot, vector, embedding_model, embedding_provider,
                    distance_metric, created_on, created_by, updated_on, updated_by)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&chunk.id)
            .bind(&chunk.turn_id)
            .bind(chunk.chunk_index)
            .bind(chunk.span_start)
            .bind(chunk.span_end)
            .bind(&chunk.lossless_text)
            .bind(snapshot)
            .bind(encode_vector(&chunk.vector))
            .bind(&chunk.embedding_model)
            .bind(&chunk.embedding_provider)
            .bind(chunk.distance_metric.as_str())
            .bind(chunk.audit.created_on)
            .bind(&chunk.audit.created_by)
            .bind(chunk.audit.updated_on)
            .bind(&chunk.audit.updated_by)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(turn_id, count = chunks.len(), "replaced chunks for turn");
        Ok(())
    }

    async fn get_chunks_for_turn(&self, turn_id: &str) -> EngineResult<Vec<EmbeddingChunk>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT * FROM embedding_chunks WHERE turn_id = ? ORDER BY chunk_index",
        )
        .bind(turn_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete_chunks_for_turn(&self, turn_id: &str) -> EngineResult<u64> {
        let res = sqlx::query("DELETE FROM embedding_chunks WHERE turn_id = ?")
            .bind(turn_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        metric: DistanceMetric,
        k: usize,
        filter: &SearchFilter,
    ) -> EngineResult<Vec<SearchHit>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            r#"SELECT c.* FROM embedding_chunks c
               JOIN turns t ON t.id = c.turn_id
               WHERE c.distance_metric = ?
                 AND (? IS NULL OR t.session = ?)
                 AND (? IS NULL OR t.user_id = ?)"#,
        )
        .bind(metric.as_str())
        .bind(&filter.session)
        .bind(&filter.session)
        .bind(&filter.user_id)
        .bind(&filter.user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk: EmbeddingChunk = row.try_into()?;
            let score = metric.distance(query_vector, &chunk.vector);
            hits.push(SearchHit { chunk, score });
        }

        hits.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then(b.chunk.audit.created_on.cmp(&a.chunk.audit.created_on))
                .then(a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}
