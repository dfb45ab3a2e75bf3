use anyhow::Result;
use sqlx::SqlitePool;
use tracing::debug;

/// Create the index schema. Safe to run on every build.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            metric TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // rowid order is the storage order used to break distance ties; an
    // upsert via ON CONFLICT keeps the original rowid.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            document TEXT NOT NULL,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            source_file TEXT NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(collection, id),
            FOREIGN KEY (collection) REFERENCES collections(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_collection ON entries(collection)")
        .execute(pool)
        .await?;

    debug!("index schema ready");
    Ok(())
}
