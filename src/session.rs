use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::model::UserRecord;
use crate::repo::PinOutcome;
use crate::store::FinanceStore;

/// Identity persisted for session resumption. Never carries the secret or
/// the PIN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSession {
    pub id: i64,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    /// Fresh sign-in this run; data access allowed.
    Authenticated(UserRecord),
    /// Resumed session with a PIN configured; data access withheld until
    /// the PIN is verified.
    Locked(UserRecord),
    Unlocked(UserRecord),
}

/// Per-instance auth state machine. Holds no credentials; every check is
/// delegated to the store, and only the resumable identity is persisted.
#[derive(Debug)]
pub struct SessionGate {
    state: SessionState,
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGate {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The user whose id the gateway operations may be scoped to. `None`
    /// while unauthenticated or locked.
    pub fn current_user(&self) -> Option<&UserRecord> {
        match &self.state {
            SessionState::Authenticated(user) | SessionState::Unlocked(user) => Some(user),
            SessionState::Unauthenticated | SessionState::Locked(_) => None,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, SessionState::Locked(_))
    }

    /// Register a new account and enter it, the way the original signs you
    /// in right after registration.
    pub async fn sign_up(
        &mut self,
        store: &mut FinanceStore,
        email: &str,
        secret: &str,
    ) -> StoreResult<&UserRecord> {
        let user = store.register_user(email, secret, None).await?;
        store.remember_session(&user);
        info!(target = "finvault", event = "session_started", user_id = user.id);
        self.state = SessionState::Authenticated(user);
        Ok(self.current_user().expect("just authenticated"))
    }

    pub async fn sign_in(
        &mut self,
        store: &mut FinanceStore,
        email: &str,
        secret: &str,
    ) -> StoreResult<&UserRecord> {
        let user = store.authenticate(email, secret).await?;
        store.remember_session(&user);
        info!(target = "finvault", event = "session_started", user_id = user.id);
        self.state = SessionState::Authenticated(user);
        Ok(self.current_user().expect("just authenticated"))
    }

    /// Pick up the persisted identity, if any. Lands in `Locked` when the
    /// account has a PIN configured, `Authenticated` otherwise. Returns
    /// whether a session was resumed.
    pub async fn resume(&mut self, store: &FinanceStore) -> StoreResult<bool> {
        let Some(saved) = store.load_session() else {
            return Ok(false);
        };
        let Some(user) = store.get_user(saved.id).await? else {
            // stale identity: the account is gone
            store.clear_session();
            return Ok(false);
        };
        if user.email != saved.email {
            store.clear_session();
            return Ok(false);
        }

        info!(
            target = "finvault",
            event = "session_resumed",
            user_id = user.id,
            locked = user.has_pin
        );
        self.state = if user.has_pin {
            SessionState::Locked(user)
        } else {
            SessionState::Authenticated(user)
        };
        Ok(true)
    }

    /// Present a PIN. In `Locked` this verifies against the stored PIN; in
    /// `Authenticated` it establishes one when none is set (first run).
    /// A wrong PIN leaves the state untouched and surfaces `PinRejected`.
    pub async fn unlock(
        &mut self,
        store: &mut FinanceStore,
        pin: &str,
    ) -> StoreResult<PinOutcome> {
        let user = match &self.state {
            SessionState::Locked(user) | SessionState::Authenticated(user) => user.clone(),
            SessionState::Unlocked(_) => {
                return Err(StoreError::invalid_input("session is already unlocked"))
            }
            SessionState::Unauthenticated => {
                return Err(StoreError::invalid_input("no active session"))
            }
        };

        let outcome = store.verify_or_set_pin(user.id, pin).await?;
        // has_pin may have just flipped; re-read the record
        let user = store.get_user(user.id).await?.ok_or(StoreError::NotFound)?;
        self.state = SessionState::Unlocked(user);
        Ok(outcome)
    }

    /// Explicit sign-out from any state. Clears the persisted identity.
    pub fn sign_out(&mut self, store: &FinanceStore) {
        store.clear_session();
        info!(target = "finvault", event = "session_ended");
        self.state = SessionState::Unauthenticated;
    }
}
