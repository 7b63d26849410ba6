use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqlitePool};
use tracing::{error, info};

use crate::error::{StoreError, StoreResult};
use crate::time::now_ms;

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.len() > 160 {
        format!("{}…", &trimmed[..160])
    } else {
        trimmed.to_string()
    }
}

static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202601121045_initial.sql",
        include_str!("../migrations/202601121045_initial.sql"),
    ),
    (
        "202601181530_users_pin_code.sql",
        include_str!("../migrations/202601181530_users_pin_code.sql"),
    ),
    (
        "202602041100_reminders_due_idx.sql",
        include_str!("../migrations/202602041100_reminders_due_idx.sql"),
    ),
];

/// Create the ledger tables and bring an older blob up to the current
/// schema. Safe to call on every startup; a failure here is fatal for the
/// whole store.
pub async fn ensure_schema(pool: &SqlitePool) -> StoreResult<()> {
    apply_migrations(pool)
        .await
        .map_err(StoreError::SchemaInitFailure)
}

async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version    TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum   TEXT NOT NULL\
         )",
    )
    .await?;

    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let mut applied: HashMap<String, String> = HashMap::new();
    for r in rows {
        if let (Ok(v), Ok(c)) = (
            r.try_get::<String, _>("version"),
            r.try_get::<String, _>("checksum"),
        ) {
            applied.insert(v, c);
        }
    }

    // ADD COLUMN statements are guarded against pragma_table_info so blobs
    // without a migration ledger (imported backups) still converge.
    static ADD_COL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^ALTER\s+TABLE\s+(\w+)\s+ADD\s+COLUMN\s+(\w+)").unwrap());
    let add_col_re = &*ADD_COL_RE;

    for (filename, raw_sql) in MIGRATIONS {
        let cleaned = raw_sql
            .lines()
            .filter(|line| {
                let t = line.trim_start();
                !(t.is_empty() || t.starts_with("--"))
            })
            .collect::<Vec<_>>()
            .join("\n");
        let checksum = format!("{:x}", Sha256::digest(cleaned.as_bytes()));

        if let Some(stored) = applied.get(*filename) {
            if stored != &checksum {
                anyhow::bail!("migration {} edited after application", filename);
            }
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in cleaned.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            if let Some(caps) = add_col_re.captures(s) {
                let table = caps.get(1).unwrap().as_str();
                let col = caps.get(2).unwrap().as_str();
                if column_exists(&mut tx, table, col).await? {
                    info!(target = "finvault", event = "migration_stmt_skip", file = %filename, sql = %preview(s));
                    continue;
                }
            }
            info!(target = "finvault", event = "migration_stmt", file = %filename, sql = %preview(s));
            if let Err(e) = sqlx::query(s).execute(&mut *tx).await {
                error!(target = "finvault", event = "migration_stmt_error", file = %filename, sql = %preview(s), error = %e);
                return Err(e.into());
            }
        }

        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)",
        )
        .bind(*filename)
        .bind(now_ms())
        .bind(&checksum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(target = "finvault", event = "migration_file_applied", file = %filename);
    }

    Ok(())
}

async fn column_exists(
    tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
    table: &str,
    column: &str,
) -> anyhow::Result<bool> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_optional(&mut **tx)
            .await?;
    Ok(exists.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect sqlite::memory:")
    }

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let pool = memory_pool().await;
        ensure_schema(&pool).await.expect("first init");
        ensure_schema(&pool).await.expect("second init");

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .expect("list tables");
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "budgets",
                "reminders",
                "schema_migrations",
                "transactions",
                "users"
            ]
        );
    }

    #[tokio::test]
    async fn pin_column_is_added_to_ledgerless_schema() {
        let pool = memory_pool().await;
        // Simulate a blob produced before the pin_code migration and with no
        // ledger at all.
        sqlx::query(
            "CREATE TABLE users (\
               id INTEGER PRIMARY KEY AUTOINCREMENT,\
               email TEXT NOT NULL UNIQUE,\
               secret TEXT NOT NULL,\
               currency TEXT NOT NULL DEFAULT 'USD',\
               created_at INTEGER NOT NULL\
             )",
        )
        .execute(&pool)
        .await
        .expect("legacy users table");

        ensure_schema(&pool).await.expect("migrate legacy schema");

        let has_pin: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM pragma_table_info('users') WHERE name='pin_code'")
                .fetch_optional(&pool)
                .await
                .expect("pragma");
        assert!(has_pin.is_some());
    }

    #[tokio::test]
    async fn edited_migration_is_refused() {
        let pool = memory_pool().await;
        ensure_schema(&pool).await.expect("init");

        sqlx::query("UPDATE schema_migrations SET checksum = 'tampered' WHERE version = ?")
            .bind("202601121045_initial.sql")
            .execute(&pool)
            .await
            .expect("tamper");

        let err = ensure_schema(&pool).await.expect_err("tampered ledger");
        assert!(matches!(err, StoreError::SchemaInitFailure(_)));
    }

    #[tokio::test]
    async fn kind_check_constraint_holds() {
        let pool = memory_pool().await;
        ensure_schema(&pool).await.expect("init");
        sqlx::query("INSERT INTO users (email, secret, created_at) VALUES ('a@b.c', 's', 0)")
            .execute(&pool)
            .await
            .expect("user");

        let err = sqlx::query(
            "INSERT INTO transactions (user_id, amount, kind, category, date) \
             VALUES (1, 5.0, 'transfer', 'Misc', '2024-01-01')",
        )
        .execute(&pool)
        .await
        .expect_err("kind outside the enum must be rejected");
        assert!(err.to_string().to_lowercase().contains("check"));
    }
}
