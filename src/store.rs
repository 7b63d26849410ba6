use std::path::PathBuf;

use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::SqlitePool;
use tracing::{error, warn};

use crate::backing::{BackingStore, FileBackingStore, SESSION_KEY, THEME_KEY};
use crate::csv;
use crate::db::run_in_tx;
use crate::error::{StoreError, StoreResult};
use crate::model::{
    BudgetInput, BudgetRecord, CurrencyCode, ReminderInput, ReminderRecord, ThemePreference,
    TransactionFilter, TransactionInput, TransactionRecord, UserRecord,
};
use crate::persist::{self, StorePaths};
use crate::repo::{self, PinOutcome};
use crate::schema;
use crate::session::SavedSession;
use crate::stats::{self, CategorySlice, MonthlyBucket, SafeToSpend, Totals};
use crate::time;

/// How to open a store: where the ephemeral engine lives and which backing
/// store holds the durable keys.
pub struct StoreOptions {
    pub base_dir: PathBuf,
    pub backing: Box<dyn BackingStore>,
}

/// The store. Owns the engine and the backing store; the sole access path
/// to the data. Mutating methods take `&mut self`, so each call is a
/// critical section by construction, and none returns success before its
/// durable save has completed.
pub struct FinanceStore {
    pool: SqlitePool,
    paths: StorePaths,
    backing: Box<dyn BackingStore>,
    save_depth: u32,
    dirty: bool,
}

impl FinanceStore {
    /// Open against a directory, with file-backed keys in the same place.
    pub async fn open_in_dir(base_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_dir = base_dir.into();
        let backing = FileBackingStore::open(&base_dir)
            .map_err(|err| StoreError::storage(format!("open backing store: {err:#}")))?;
        Self::open(StoreOptions {
            base_dir,
            backing: Box::new(backing),
        })
        .await
    }

    pub async fn open(options: StoreOptions) -> StoreResult<Self> {
        let paths = StorePaths::new(options.base_dir);
        let pool = persist::load(&paths, &*options.backing).await?;
        schema::ensure_schema(&pool).await?;

        let store = Self {
            pool,
            paths,
            backing: options.backing,
            save_depth: 0,
            dirty: false,
        };
        // Make the blob current with the ensured schema before handing the
        // store out, the way the original persisted right after init.
        persist::save(&store.pool, &store.paths, &*store.backing).await?;
        Ok(store)
    }

    // -- persistence discipline ------------------------------------------

    /// Called after every mutation. Inside a batch the save is deferred to
    /// the end of the action; otherwise it happens before the operation
    /// reports success.
    async fn commit(&mut self) -> StoreResult<()> {
        if self.save_depth > 0 {
            self.dirty = true;
            return Ok(());
        }
        self.flush().await
    }

    async fn flush(&mut self) -> StoreResult<()> {
        match persist::save(&self.pool, &self.paths, &*self.backing).await {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(save_err) => {
                // Failed save: the mutation must not be observable. Rebuild
                // the engine from the last good blob before surfacing the
                // failure.
                if let Err(restore_err) =
                    persist::restore_last_good(&mut self.pool, &self.paths, &*self.backing).await
                {
                    error!(
                        target = "finvault",
                        event = "rollback_failed",
                        error = %restore_err
                    );
                }
                self.dirty = false;
                Err(save_err)
            }
        }
    }

    /// Group several mutations into one logical action with a single save
    /// at the end. An action that errors out with unsaved mutations is
    /// rolled back wholesale from the last good blob.
    pub async fn batch<R, F>(&mut self, f: F) -> StoreResult<R>
    where
        F: for<'a> FnOnce(&'a mut FinanceStore) -> BoxFuture<'a, StoreResult<R>>,
    {
        self.save_depth += 1;
        let result = f(self).await;
        self.save_depth -= 1;

        if self.save_depth > 0 {
            // nested action: the outermost scope owns the save
            return result;
        }

        match result {
            Ok(value) => {
                if self.dirty {
                    self.flush().await?;
                }
                Ok(value)
            }
            Err(err) => {
                if self.dirty {
                    if let Err(restore_err) =
                        persist::restore_last_good(&mut self.pool, &self.paths, &*self.backing)
                            .await
                    {
                        error!(
                            target = "finvault",
                            event = "rollback_failed",
                            error = %restore_err
                        );
                    }
                    self.dirty = false;
                }
                Err(err)
            }
        }
    }

    // -- accounts --------------------------------------------------------

    pub async fn register_user(
        &mut self,
        email: &str,
        secret: &str,
        currency: Option<CurrencyCode>,
    ) -> StoreResult<UserRecord> {
        let id = repo::insert_user(
            &self.pool,
            email,
            secret,
            currency.unwrap_or_default(),
        )
        .await?;
        self.commit().await?;
        repo::user_by_id(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    pub async fn authenticate(&self, email: &str, secret: &str) -> StoreResult<UserRecord> {
        repo::authenticate(&self.pool, email, secret).await
    }

    pub async fn get_user(&self, user_id: i64) -> StoreResult<Option<UserRecord>> {
        repo::user_by_id(&self.pool, user_id).await
    }

    pub async fn verify_or_set_pin(&mut self, user_id: i64, pin: &str) -> StoreResult<PinOutcome> {
        let outcome = repo::verify_or_set_pin(&self.pool, user_id, pin).await?;
        if outcome == PinOutcome::Established {
            self.commit().await?;
        }
        Ok(outcome)
    }

    pub async fn clear_pin(&mut self, user_id: i64) -> StoreResult<()> {
        repo::clear_pin(&self.pool, user_id).await?;
        self.commit().await
    }

    pub async fn set_currency(&mut self, user_id: i64, currency: CurrencyCode) -> StoreResult<()> {
        repo::set_currency(&self.pool, user_id, currency).await?;
        self.commit().await
    }

    // -- transactions ----------------------------------------------------

    pub async fn create_transaction(
        &mut self,
        user_id: i64,
        input: &TransactionInput,
    ) -> StoreResult<i64> {
        let id = repo::insert_transaction(&self.pool, user_id, input).await?;
        self.commit().await?;
        Ok(id)
    }

    pub async fn update_transaction(
        &mut self,
        user_id: i64,
        id: i64,
        input: &TransactionInput,
    ) -> StoreResult<()> {
        repo::update_transaction(&self.pool, user_id, id, input).await?;
        self.commit().await
    }

    pub async fn delete_transaction(&mut self, user_id: i64, id: i64) -> StoreResult<()> {
        repo::delete_transaction(&self.pool, user_id, id).await?;
        self.commit().await
    }

    pub async fn list_transactions(
        &self,
        user_id: i64,
        filter: &TransactionFilter,
    ) -> StoreResult<Vec<TransactionRecord>> {
        repo::list_transactions(&self.pool, user_id, filter).await
    }

    // -- budgets ---------------------------------------------------------

    pub async fn create_budget(&mut self, user_id: i64, input: &BudgetInput) -> StoreResult<i64> {
        let id = repo::insert_budget(&self.pool, user_id, input).await?;
        self.commit().await?;
        Ok(id)
    }

    pub async fn update_budget(
        &mut self,
        user_id: i64,
        id: i64,
        input: &BudgetInput,
    ) -> StoreResult<()> {
        repo::update_budget(&self.pool, user_id, id, input).await?;
        self.commit().await
    }

    pub async fn delete_budget(&mut self, user_id: i64, id: i64) -> StoreResult<()> {
        repo::delete_budget(&self.pool, user_id, id).await?;
        self.commit().await
    }

    pub async fn list_budgets(&self, user_id: i64) -> StoreResult<Vec<BudgetRecord>> {
        repo::list_budgets(&self.pool, user_id).await
    }

    // -- reminders -------------------------------------------------------

    pub async fn create_reminder(
        &mut self,
        user_id: i64,
        input: &ReminderInput,
    ) -> StoreResult<i64> {
        let id = repo::insert_reminder(&self.pool, user_id, input).await?;
        self.commit().await?;
        Ok(id)
    }

    pub async fn update_reminder(
        &mut self,
        user_id: i64,
        id: i64,
        input: &ReminderInput,
    ) -> StoreResult<()> {
        repo::update_reminder(&self.pool, user_id, id, input).await?;
        self.commit().await
    }

    pub async fn delete_reminder(&mut self, user_id: i64, id: i64) -> StoreResult<()> {
        repo::delete_reminder(&self.pool, user_id, id).await?;
        self.commit().await
    }

    pub async fn list_reminders(
        &self,
        user_id: i64,
        pending_only: bool,
    ) -> StoreResult<Vec<ReminderRecord>> {
        repo::list_reminders(&self.pool, user_id, pending_only).await
    }

    /// Settlement: the reminder flips to paid and the matching expense is
    /// recorded, both inside one engine transaction, both durable behind
    /// one save. Returns the id of the new expense transaction.
    pub async fn settle_reminder(&mut self, user_id: i64, reminder_id: i64) -> StoreResult<i64> {
        let settled_on = time::today();
        let txn_id = run_in_tx::<_, StoreError, _>(&self.pool, |tx| {
            let settled_on = settled_on.clone();
            async move { repo::settle_reminder_tx(tx, user_id, reminder_id, &settled_on).await }
                .boxed()
        })
        .await?;
        self.commit().await?;
        Ok(txn_id)
    }

    /// Remove everything the user owns across all three tables, as one
    /// atomic set.
    pub async fn purge_all_user_data(&mut self, user_id: i64) -> StoreResult<()> {
        run_in_tx::<_, StoreError, _>(&self.pool, |tx| {
            async move { repo::purge_user_data_tx(tx, user_id).await }.boxed()
        })
        .await?;
        self.commit().await
    }

    // -- aggregates ------------------------------------------------------

    pub async fn totals(&self, user_id: i64) -> StoreResult<Totals> {
        stats::totals(&self.pool, user_id).await
    }

    pub async fn category_breakdown(&self, user_id: i64) -> StoreResult<Vec<CategorySlice>> {
        stats::category_breakdown(&self.pool, user_id).await
    }

    pub async fn monthly_trend(&self, user_id: i64, limit: u32) -> StoreResult<Vec<MonthlyBucket>> {
        stats::monthly_trend(&self.pool, user_id, limit).await
    }

    /// Safe-to-spend for the current calendar month.
    pub async fn safe_to_spend(&self, user_id: i64) -> StoreResult<SafeToSpend> {
        let month = time::today()[..7].to_string();
        stats::safe_to_spend(&self.pool, user_id, &month).await
    }

    /// Same figure pinned to an explicit `YYYY-MM` month; deterministic for
    /// callers that do their own "now".
    pub async fn safe_to_spend_as_of(&self, user_id: i64, month: &str) -> StoreResult<SafeToSpend> {
        stats::safe_to_spend(&self.pool, user_id, month).await
    }

    // -- exports ---------------------------------------------------------

    /// Full native snapshot of the store, suitable for backup. Read-only.
    pub async fn export_snapshot(&self) -> StoreResult<Vec<u8>> {
        persist::export(&self.pool, &self.paths).await
    }

    pub async fn export_csv(
        &self,
        user_id: i64,
        filter: &TransactionFilter,
    ) -> StoreResult<String> {
        let transactions = self.list_transactions(user_id, filter).await?;
        Ok(csv::render(&transactions))
    }

    // -- backing-store keys outside the database blob --------------------

    pub fn theme_preference(&self) -> StoreResult<Option<ThemePreference>> {
        let raw = self
            .backing
            .get(THEME_KEY)
            .map_err(|err| StoreError::storage(format!("read theme: {err:#}")))?;
        Ok(raw
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|s| ThemePreference::parse(&s)))
    }

    pub fn set_theme_preference(&mut self, theme: ThemePreference) -> StoreResult<()> {
        self.backing
            .put(THEME_KEY, theme.as_str().as_bytes())
            .map_err(|err| StoreError::storage(format!("write theme: {err:#}")))
    }

    pub(crate) fn remember_session(&self, user: &UserRecord) {
        let saved = SavedSession {
            id: user.id,
            email: user.email.clone(),
        };
        match serde_json::to_vec(&saved) {
            Ok(bytes) => {
                if let Err(err) = self.backing.put(SESSION_KEY, &bytes) {
                    warn!(target = "finvault", event = "session_persist_failed", error = %err);
                }
            }
            Err(err) => {
                warn!(target = "finvault", event = "session_persist_failed", error = %err);
            }
        }
    }

    pub(crate) fn load_session(&self) -> Option<SavedSession> {
        let bytes = self.backing.get(SESSION_KEY).ok().flatten()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub(crate) fn clear_session(&self) {
        if let Err(err) = self.backing.remove(SESSION_KEY) {
            warn!(target = "finvault", event = "session_clear_failed", error = %err);
        }
    }
}
