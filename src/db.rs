use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;

/// Open the index database, creating the file (and its parent directory)
/// when `create` is set.
pub async fn connect(config: &Config, create: bool) -> Result<SqlitePool> {
    connect_path(&config.index.path, create).await
}

pub async fn connect_path(db_path: &Path, create: bool) -> Result<SqlitePool> {
    if create {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    } else if !db_path.exists() {
        anyhow::bail!(
            "index database not found at {}; run `pathwise build` first",
            db_path.display()
        );
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(create)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
