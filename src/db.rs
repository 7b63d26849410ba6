use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result as AnyResult};
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, SqlitePool, Transaction};

/// Open a pool over the scratch database the engine lives on.
///
/// The scratch file is rebuilt from the durable blob at load time; it is not
/// the durability authority, but WAL + FULL keeps snapshotting consistent
/// while a save is in flight.
pub async fn open_scratch_pool(scratch: &Path) -> AnyResult<Pool<Sqlite>> {
    let path = scratch
        .to_str()
        .with_context(|| format!("non-utf8 scratch path {}", scratch.display()))?;
    let opts = SqliteConnectOptions::from_str(path)
        .with_context(|| format!("parse scratch path {path}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys=ON;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "finvault",
        event = "engine_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target = "finvault",
            event = "engine_open_warning",
            msg = "journal_mode != WAL; snapshot consistency reduced"
        );
    }
}

/// Run work inside an engine transaction. Commits on success, rolls back on
/// error. Engine-level atomicity only; durability is the adapter's save.
pub async fn run_in_tx<R, E, F>(pool: &SqlitePool, f: F) -> Result<R, E>
where
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(&'c mut Transaction<'static, Sqlite>) -> BoxFuture<'c, Result<R, E>>,
{
    use tracing::{error, warn};

    let mut tx = pool.begin().await.map_err(E::from)?;
    match f(&mut tx).await {
        Ok(val) => {
            tx.commit().await.map_err(E::from)?;
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target = "finvault", event = "tx_rollback_failed", error = %rb);
            } else {
                warn!(target = "finvault", event = "tx_rollback");
            }
            Err(e)
        }
    }
}
