use thiserror::Error;

/// Typed failure surface of the store.
///
/// Every public operation returns one of these; the caller owns user
/// messaging. `code()` gives the stable machine-readable string surfaced to
/// embedding hosts.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A required field is missing or malformed. No state change happened.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Registration conflict: the email is already taken (exact match).
    #[error("identity already registered")]
    DuplicateIdentity,

    /// Email/secret pair did not match. Deliberately does not say which.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// PIN comparison failed against the stored PIN.
    #[error("pin rejected")]
    PinRejected,

    /// Update/settle target absent for the given owner.
    #[error("record not found")]
    NotFound,

    /// The durable save failed. The in-memory engine has already been
    /// restored from the last good blob; the mutation did not happen.
    #[error("persistence failed: {reason}")]
    StorageFailure { reason: String },

    /// Table creation or migration failed at startup. Fatal; there is no
    /// degraded mode.
    #[error("schema initialization failed: {0:#}")]
    SchemaInitFailure(anyhow::Error),

    /// Unexpected engine fault not covered by the taxonomy above.
    #[error("engine error: {0}")]
    Engine(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        StoreError::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        StoreError::StorageFailure {
            reason: reason.into(),
        }
    }

    /// Stable code for UI payloads and logs.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::InvalidInput { .. } => "INVALID_INPUT",
            StoreError::DuplicateIdentity => "DUPLICATE_IDENTITY",
            StoreError::InvalidCredentials => "INVALID_CREDENTIALS",
            StoreError::PinRejected => "PIN_REJECTED",
            StoreError::NotFound => "NOT_FOUND",
            StoreError::StorageFailure { .. } => "STORAGE_FAILURE",
            StoreError::SchemaInitFailure(_) => "SCHEMA_INIT_FAILURE",
            StoreError::Engine(_) => "ENGINE",
        }
    }

    /// Whether retrying the same call can succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::StorageFailure { .. })
    }
}
