
use super::models::{FileRecord, LanguageStats};
use crate::chunking::{Category, Language};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use tracing::debug;

pub const CREATE_FILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path         TEXT PRIMARY KEY NOT NULL,
    content_hash TEXT NOT NULL,
    language     TEXT NOT NULL,
    category     TEXT NOT NULL,
    size         INTEGER NOT NULL,
    chunk_count  INTEGER NOT NULL,
    chunker      TEXT NOT NULL,
    indexed_at   TEXT NOT NULL
)
"#;

pub const CREATE_FILES_LANGUAGE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_files_language ON files (language)";

pub struct FileQueries;

impl FileQueries {
    #[inline]
    pub async fn upsert<'e, E: SqliteExecutor<'e>>(executor: E, record: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (path, content_hash, language, category, size, chunk_count, chunker, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                language = excluded.language,
                category = excluded.category,
                size = excluded.size,
                chunk_count = excluded.chunk_count,
                chunker = excluded.chunker,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&record.path)
        .bind(&record.content_hash)
        .bind(record.language.as_str())
        .bind(record.category.as_str())
        .bind(record.size)
        .bind(record.chunk_count)
        .bind(&record.chunker)
        .bind(record.indexed_at)
        .execute(executor)
        .await
        .with_context(|| format!("Failed to upsert file record for {}", record.path))?;

        Ok(())
    }

    #[inline]
    pub async fn get(pool: &SqlitePool, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            r#"
            SELECT path, content_hash, language, category, size, chunk_count, chunker, indexed_at
            FROM files WHERE path = ?
            "#,
        )
        .bind(path)
        .fetch_optional(pool)
        .await
        .context("Failed to get file record")?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Delete one record; returns whether it existed
    #[inline]
    pub async fn delete<'e, E: SqliteExecutor<'e>>(executor: E, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(path)
            .execute(executor)
            .await
            .with_context(|| format!("Failed to delete file record for {}", path))?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT path, content_hash, language, category, size, chunk_count, chunker, indexed_at
            FROM files ORDER BY path
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to list file records")?;

        rows.iter().map(record_from_row).collect()
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(pool)
            .await
            .context("Failed to count file records")?;
        Ok(count)
    }

    #[inline]
    pub async fn language_stats(pool: &SqlitePool) -> Result<Vec<LanguageStats>> {
        let rows = sqlx::query(
            r#"
            SELECT language, COUNT(*) AS files, COALESCE(SUM(chunk_count), 0) AS chunks
            FROM files GROUP BY language ORDER BY chunks DESC, language
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to compute language statistics")?;

        let stats = rows
            .iter()
            .map(|row| LanguageStats {
                language: row
                    .get::<String, _>("language")
                    .parse()
                    .unwrap_or(Language::Unknown),
                files: row.get("files"),
                chunks: row.get("chunks"),
            })
            .collect();
        Ok(stats)
    }

    #[inline]
    pub async fn clear(pool: &SqlitePool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM files")
            .execute(pool)
            .await
            .context("Failed to clear file records")?;

        debug!("Removed {} file records", result.rows_affected());
        Ok(result.rows_affected())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<FileRecord> {
    let language: String = row.try_get("language").context("Missing language column")?;
    let category: String = row.try_get("category").context("Missing category column")?;
    let language: Language = language.parse().unwrap_or(Language::Unknown);
    let category: Category = category.parse().unwrap_or_else(|_| language.category());
    let indexed_at: DateTime<Utc> = row
        .try_get("indexed_at")
        .context("Invalid indexed_at column")?;

    Ok(FileRecord {
        path: row.try_get("path").context("Missing path column")?,
        content_hash: row.try_get("content_hash").context("Missing content_hash column")?,
        language,
        category,
        size: row.try_get("size").context("Missing size column")?,
        chunk_count: row.try_get("chunk_count").context("Missing chunk_count column")?,
        chunker: row.try_get("chunker").context("Missing chunker column")?,
        indexed_at,
    })
}
