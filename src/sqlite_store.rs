//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Collections and entries live in two tables (see [`crate::migrate`]).
//! Embeddings are stored as little-endian `f32` BLOBs and nearest-neighbour
//! search is an exact brute-force scan over one collection.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use pathwise_core::embedding::{blob_to_vec, check_dims, distance, vec_to_blob};
use pathwise_core::models::{CollectionInfo, DistanceMetric, EntryMetadata};
use pathwise_core::store::{
    ensure_same_space, rank_nearest, IndexHit, QueryHits, UpsertBatch, VectorIndex,
};

/// SQLite implementation of the [`VectorIndex`] trait.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn require_collection(&self, name: &str) -> Result<CollectionInfo> {
        self.collection(name)
            .await?
            .ok_or_else(|| anyhow!("collection '{}' does not exist", name))
    }
}

fn row_to_info(row: &sqlx::sqlite::SqliteRow) -> Result<CollectionInfo> {
    let metric: String = row.get("metric");
    let dims: i64 = row.get("dims");
    Ok(CollectionInfo {
        name: row.get("name"),
        model: row.get("model"),
        dims: dims as usize,
        metric: DistanceMetric::parse(&metric)
            .ok_or_else(|| anyhow!("unknown metric '{}' stored in index", metric))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn ensure_collection(
        &self,
        name: &str,
        model: &str,
        dims: usize,
        metric: DistanceMetric,
    ) -> Result<CollectionInfo> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO collections (name, model, dims, metric, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(model)
        .bind(dims as i64)
        .bind(metric.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let info = self.require_collection(name).await?;
        ensure_same_space(&info, model, dims, metric)?;
        Ok(info)
    }

    async fn collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let row = sqlx::query(
            "SELECT name, model, dims, metric, created_at, updated_at FROM collections WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_info).transpose()
    }

    async fn upsert(&self, collection: &str, batch: &UpsertBatch) -> Result<()> {
        let info = self.require_collection(collection).await?;
        for (id, _, _, embedding) in batch.rows() {
            if let Err(e) = check_dims(embedding, info.dims) {
                bail!("entry '{}': {}", id, e);
            }
        }

        let mut tx = self.pool.begin().await?;

        for (id, document, metadata, embedding) in batch.rows() {
            sqlx::query(
                r#"
                INSERT INTO entries (collection, id, document, title, url, source_file, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    title = excluded.title,
                    url = excluded.url,
                    source_file = excluded.source_file,
                    embedding = excluded.embedding
                "#,
            )
            .bind(collection)
            .bind(id)
            .bind(document)
            .bind(&metadata.title)
            .bind(&metadata.url)
            .bind(&metadata.source_file)
            .bind(vec_to_blob(embedding))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE collections SET updated_at = ? WHERE name = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(collection)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, collection: &str, embedding: &[f32], k: usize) -> Result<QueryHits> {
        let info = self.require_collection(collection).await?;
        check_dims(embedding, info.dims)?;
        if k == 0 {
            return Ok(QueryHits::default());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, document, title, url, source_file, embedding
            FROM entries
            WHERE collection = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let scored: Vec<IndexHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                IndexHit {
                    id: row.get("id"),
                    document: row.get("document"),
                    metadata: EntryMetadata {
                        title: row.get("title"),
                        url: row.get("url"),
                        source_file: row.get("source_file"),
                    },
                    distance: distance(info.metric, embedding, &stored),
                }
            })
            .collect();

        Ok(QueryHits::from_hits(rank_nearest(scored, k)))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}
