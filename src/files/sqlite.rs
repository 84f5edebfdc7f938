//! Foreign `SQLite` files: scan text columns for chat links.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::ExtractError;
use crate::links::extract_urls;

/// Rows read per column.
pub const MAX_ROWS_PER_COLUMN: i64 = 10_000;

/// Result of scanning a database file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseScan {
    pub tables: usize,
    pub urls: Vec<String>,
}

/// Opens a database read-only and collects URLs from every text column
/// whose values mention `t.me`, `telegram.me` or `whatsapp.com`.
///
/// # Errors
///
/// Returns an error if the file is not a readable `SQLite` database.
pub async fn scan_database(path: &Path) -> Result<DatabaseScan, ExtractError> {
    let options = SqliteConnectOptions::new().filename(path).read_only(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    let result = scan_pool(&pool).await;
    pool.close().await;
    result
}

async fn scan_pool(pool: &SqlitePool) -> Result<DatabaseScan, ExtractError> {
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(pool)
    .await?;

    let mut scan = DatabaseScan {
        tables: tables.len(),
        urls: Vec::new(),
    };

    for table in &tables {
        let columns = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
            .fetch_all(pool)
            .await?;

        for column in columns {
            let name: String = column.try_get("name")?;
            let declared: String = column.try_get("type").unwrap_or_default();
            if !is_text_column(&declared) {
                continue;
            }

            let sql = format!(
                "SELECT CAST({col} AS TEXT) FROM {table} \
                 WHERE {col} LIKE '%t.me%' OR {col} LIKE '%telegram.me%' OR {col} LIKE '%whatsapp.com%' \
                 LIMIT ?",
                col = quote_ident(&name),
                table = quote_ident(table),
            );
            let values: Vec<Option<String>> = match sqlx::query_scalar(&sql)
                .bind(MAX_ROWS_PER_COLUMN)
                .fetch_all(pool)
                .await
            {
                Ok(values) => values,
                Err(e) => {
                    debug!("Skipping column {table}.{name}: {e}");
                    continue;
                }
            };

            for value in values.into_iter().flatten() {
                scan.urls.extend(extract_urls(&value));
            }
        }
    }

    Ok(scan)
}

/// Columns declared as text, or without a declared type.
fn is_text_column(declared: &str) -> bool {
    let declared = declared.to_ascii_lowercase();
    declared.is_empty()
        || declared.contains("text")
        || declared.contains("char")
        || declared.contains("clob")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("links"), "\"links\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_is_text_column() {
        assert!(is_text_column("TEXT"));
        assert!(is_text_column("varchar(255)"));
        assert!(is_text_column(""));
        assert!(!is_text_column("INTEGER"));
    }

    #[tokio::test]
    async fn test_scan_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.db");

        let options = SqliteConnectOptions::new().filename(&path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await.unwrap();
        sqlx::query("CREATE TABLE messages (id INTEGER, body TEXT, views INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        for body in ["join t.me/rustlang", "no link", "chat.whatsapp.com/AbCdEf123456"] {
            sqlx::query("INSERT INTO messages (id, body, views) VALUES (1, ?, 5)")
                .bind(body)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;

        let scan = scan_database(&path).await.unwrap();
        assert_eq!(scan.tables, 1);
        assert_eq!(
            scan.urls,
            vec!["https://t.me/rustlang", "https://chat.whatsapp.com/AbCdEf123456"]
        );
    }
}
