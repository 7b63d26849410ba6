use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use fs2::available_space;
use rusqlite::{backup::Backup, Connection, OpenFlags};
use sqlx::SqlitePool;
use tokio::task;
use tracing::{info, warn};

use crate::backing::{BackingStore, DB_BLOB_KEY};
use crate::db::open_scratch_pool;
use crate::error::{StoreError, StoreResult};

const SCRATCH_FILE_NAME: &str = "ledger.scratch.sqlite3";
const REQUIRED_FREE_MULTIPLIER: f64 = 1.2;
const DEFAULT_MIN_FREE_BYTES: u64 = 16_000_000;
const BACKUP_PAGES_PER_STEP: std::os::raw::c_int = 64;
const BACKUP_STEP_PAUSE: Duration = Duration::from_millis(25);

/// Filesystem locations of the ephemeral engine. The scratch database is
/// rebuilt from the blob on every load; only the blob is durable.
#[derive(Debug, Clone)]
pub struct StorePaths {
    base: PathBuf,
}

impl StorePaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn scratch(&self) -> PathBuf {
        self.base.join(SCRATCH_FILE_NAME)
    }
}

fn min_free_bytes() -> u64 {
    env::var("FINVAULT_MIN_FREE_BYTES")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MIN_FREE_BYTES)
}

fn remove_scratch_files(scratch: &Path) -> AnyResult<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut os = scratch.as_os_str().to_owned();
        os.push(suffix);
        let path = PathBuf::from(os);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("remove {}", path.display()));
            }
        }
    }
    Ok(())
}

/// Materialize the blob (when present and intact) as the scratch database
/// and open the engine over it. A missing or corrupt blob is non-fatal: the
/// blob is discarded and an empty engine is opened instead.
pub async fn load(paths: &StorePaths, backing: &dyn BackingStore) -> StoreResult<SqlitePool> {
    fs::create_dir_all(paths.base())
        .with_context(|| format!("create store dir {}", paths.base().display()))
        .map_err(StoreError::SchemaInitFailure)?;

    let blob = match backing.get(DB_BLOB_KEY) {
        Ok(blob) => blob,
        Err(err) => {
            warn!(
                target = "finvault",
                event = "blob_read_failed",
                error = %err,
                "treating unreadable blob as absent"
            );
            None
        }
    };

    if let Some(bytes) = blob {
        match open_from_blob(paths, &bytes).await {
            Ok(pool) => {
                info!(
                    target = "finvault",
                    event = "blob_loaded",
                    bytes = bytes.len()
                );
                return Ok(pool);
            }
            Err(err) => {
                warn!(
                    target = "finvault",
                    event = "blob_corrupt",
                    error = %err,
                    "discarding corrupt blob and starting fresh"
                );
                if let Err(remove_err) = backing.remove(DB_BLOB_KEY) {
                    warn!(
                        target = "finvault",
                        event = "blob_discard_failed",
                        error = %remove_err
                    );
                }
            }
        }
    }

    open_fresh(paths).await
}

async fn open_from_blob(paths: &StorePaths, bytes: &[u8]) -> AnyResult<SqlitePool> {
    let scratch = paths.scratch();
    remove_scratch_files(&scratch)?;
    fs::write(&scratch, bytes)
        .with_context(|| format!("materialize scratch {}", scratch.display()))?;

    let pool = open_scratch_pool(&scratch).await?;
    let (check,): (String,) = sqlx::query_as("PRAGMA quick_check")
        .fetch_one(&pool)
        .await
        .context("run quick_check")?;
    if !check.eq_ignore_ascii_case("ok") {
        pool.close().await;
        anyhow::bail!("quick_check reported: {check}");
    }
    Ok(pool)
}

async fn open_fresh(paths: &StorePaths) -> StoreResult<SqlitePool> {
    let scratch = paths.scratch();
    remove_scratch_files(&scratch).map_err(StoreError::SchemaInitFailure)?;
    let pool = open_scratch_pool(&scratch)
        .await
        .map_err(StoreError::SchemaInitFailure)?;
    info!(target = "finvault", event = "engine_fresh");
    Ok(pool)
}

/// Serialize the entire engine into one blob and overwrite the database key.
/// The caller must not report its mutation successful until this returns.
pub async fn save(
    pool: &SqlitePool,
    paths: &StorePaths,
    backing: &dyn BackingStore,
) -> StoreResult<()> {
    preflight_free_space(paths, backing)?;

    let bytes = snapshot(pool, paths).await?;
    backing
        .put(DB_BLOB_KEY, &bytes)
        .map_err(|err| StoreError::storage(format!("write blob: {err:#}")))?;
    info!(target = "finvault", event = "save_complete", bytes = bytes.len());
    Ok(())
}

/// Produce a backup copy of the full engine state without touching the
/// durable key. Read-only.
pub async fn export(pool: &SqlitePool, paths: &StorePaths) -> StoreResult<Vec<u8>> {
    snapshot(pool, paths).await
}

async fn snapshot(pool: &SqlitePool, paths: &StorePaths) -> StoreResult<Vec<u8>> {
    // Fold the WAL into the main file so the online backup sees a compact
    // source. Failure here is not fatal; the backup reads logically anyway.
    if let Err(err) = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
        .execute(pool)
        .await
    {
        warn!(target = "finvault", event = "checkpoint_failed", error = %err);
    }

    let scratch = paths.scratch();
    let staging_dir = paths.base().to_path_buf();
    task::spawn_blocking(move || snapshot_bytes(&scratch, &staging_dir))
        .await
        .map_err(|err| StoreError::storage(format!("snapshot task panicked: {err}")))?
        .map_err(|err| StoreError::storage(format!("snapshot engine: {err:#}")))
}

fn snapshot_bytes(scratch: &Path, staging_dir: &Path) -> AnyResult<Vec<u8>> {
    let src = Connection::open_with_flags(
        scratch,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("open snapshot source {}", scratch.display()))?;

    let staging = tempfile::Builder::new()
        .prefix("snapshot-")
        .suffix(".sqlite3")
        .tempfile_in(staging_dir)
        .context("create snapshot staging file")?;

    {
        let mut dst = Connection::open(staging.path())
            .with_context(|| format!("open snapshot staging {}", staging.path().display()))?;
        let backup = Backup::new(&src, &mut dst).context("begin online backup")?;
        backup
            .run_to_completion(BACKUP_PAGES_PER_STEP, BACKUP_STEP_PAUSE, None)
            .context("run online backup")?;
    }

    let bytes = fs::read(staging.path()).context("read snapshot bytes")?;
    Ok(bytes)
}

fn preflight_free_space(paths: &StorePaths, backing: &dyn BackingStore) -> StoreResult<()> {
    let target = backing.dir().unwrap_or_else(|| paths.base());
    let available = match available_space(target) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(target = "finvault", event = "free_space_unknown", error = %err);
            return Ok(());
        }
    };

    let db_size = fs::metadata(paths.scratch()).map(|m| m.len()).unwrap_or(0);
    let required = ((db_size as f64 * REQUIRED_FREE_MULTIPLIER) as u64).max(min_free_bytes());
    if available < required {
        warn!(
            target = "finvault",
            event = "save_preflight_failed",
            available,
            required
        );
        return Err(StoreError::storage(format!(
            "not enough disk space for snapshot: {available} bytes available, {required} required"
        )));
    }
    Ok(())
}

/// Rebuild the engine from the last good blob after a failed save. This is
/// the in-memory rollback: whatever was mutated since the previous
/// successful save is gone afterwards.
pub async fn restore_last_good(
    pool: &mut SqlitePool,
    paths: &StorePaths,
    backing: &dyn BackingStore,
) -> StoreResult<()> {
    pool.close().await;
    let restored = load(paths, backing).await?;
    crate::schema::ensure_schema(&restored).await?;
    *pool = restored;
    warn!(target = "finvault", event = "engine_restored_from_blob");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::MemoryBackingStore;

    #[tokio::test]
    async fn corrupt_blob_is_discarded_and_engine_starts_fresh() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let backing = MemoryBackingStore::new();
        backing
            .put(DB_BLOB_KEY, b"this is not a sqlite database")
            .expect("seed corrupt blob");

        let pool = load(&paths, &backing).await.expect("load survives");
        crate::schema::ensure_schema(&pool).await.expect("schema");

        // Blob was discarded, not kept around.
        assert_eq!(backing.get(DB_BLOB_KEY).expect("get"), None);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .expect("fresh store is queryable");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_rows() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let backing = MemoryBackingStore::new();

        let pool = load(&paths, &backing).await.expect("load");
        crate::schema::ensure_schema(&pool).await.expect("schema");
        sqlx::query("INSERT INTO users (email, secret, created_at) VALUES (?, ?, ?)")
            .bind("a@b.c")
            .bind("hunter2")
            .bind(1_700_000_000_000_i64)
            .execute(&pool)
            .await
            .expect("insert");
        save(&pool, &paths, &backing).await.expect("save");
        pool.close().await;

        // Reload into a different scratch dir from the same blob.
        let tmp2 = tempfile::tempdir().expect("tempdir");
        let paths2 = StorePaths::new(tmp2.path());
        let pool2 = load(&paths2, &backing).await.expect("reload");
        let (email,): (String,) = sqlx::query_as("SELECT email FROM users")
            .fetch_one(&pool2)
            .await
            .expect("row survived the round trip");
        assert_eq!(email, "a@b.c");
    }

    #[tokio::test]
    async fn export_does_not_touch_the_blob() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = StorePaths::new(tmp.path());
        let backing = MemoryBackingStore::new();

        let pool = load(&paths, &backing).await.expect("load");
        crate::schema::ensure_schema(&pool).await.expect("schema");

        let bytes = export(&pool, &paths).await.expect("export");
        assert!(bytes.len() >= 1024);
        assert_eq!(&bytes[..15], b"SQLite format 3");
        assert_eq!(backing.get(DB_BLOB_KEY).expect("get"), None);
    }
}
