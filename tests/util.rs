#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result as AnyResult;
use finvault::backing::DB_BLOB_KEY;
use finvault::{BackingStore, FinanceStore, MemoryBackingStore, StoreOptions};
use tempfile::TempDir;

/// Memory-backed store that counts database-blob saves and can be told to
/// fail them, for durability and rollback tests.
#[derive(Default)]
pub struct InstrumentedBacking {
    inner: MemoryBackingStore,
    pub blob_puts: AtomicUsize,
    pub fail_blob_puts: AtomicBool,
}

impl InstrumentedBacking {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn blob_puts(&self) -> usize {
        self.blob_puts.load(Ordering::SeqCst)
    }

    pub fn fail_next_saves(&self, fail: bool) {
        self.fail_blob_puts.store(fail, Ordering::SeqCst);
    }
}

impl BackingStore for InstrumentedBacking {
    fn get(&self, key: &str) -> AnyResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> AnyResult<()> {
        if key == DB_BLOB_KEY {
            if self.fail_blob_puts.load(Ordering::SeqCst) {
                anyhow::bail!("injected save failure");
            }
            self.blob_puts.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.put(key, value)
    }

    fn remove(&self, key: &str) -> AnyResult<()> {
        self.inner.remove(key)
    }
}

pub async fn open_with(backing: Arc<InstrumentedBacking>) -> (TempDir, FinanceStore) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let store = FinanceStore::open(StoreOptions {
        base_dir: tmp.path().to_path_buf(),
        backing: Box::new(backing),
    })
    .await
    .expect("open store");
    (tmp, store)
}

pub async fn temp_store() -> (TempDir, FinanceStore, Arc<InstrumentedBacking>) {
    let backing = InstrumentedBacking::new();
    let (tmp, store) = open_with(backing.clone()).await;
    (tmp, store, backing)
}

pub async fn register(store: &mut FinanceStore, email: &str) -> i64 {
    store
        .register_user(email, "hunter2", None)
        .await
        .expect("register user")
        .id
}
