use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

use crate::error::{StoreError, StoreResult};
use crate::time::parse_date;

fn decode_err(column: &str, message: impl Into<String>) -> StoreError {
    StoreError::Engine(sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into().into(),
    })
}

/// Suggested category set surfaced by pickers. Storage accepts any
/// non-empty string; this list is advisory only.
pub const RECOMMENDED_CATEGORIES: [&str; 10] = [
    "Fees",
    "Bills",
    "EMIs",
    "Investments",
    "Insurance",
    "Shopping",
    "Health",
    "Food",
    "Travel",
    "Other",
];

/// Direction of a ledger entry. Sign is never encoded in the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnKind {
    Income,
    Expense,
}

impl TxnKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TxnKind::Income => "income",
            TxnKind::Expense => "expense",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "income" => Some(TxnKind::Income),
            "expense" => Some(TxnKind::Expense),
            _ => None,
        }
    }
}

/// Supported display currencies. Storage keeps the code as TEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurrencyCode {
    Usd,
    Eur,
    Gbp,
    Inr,
    Jpy,
}

impl Default for CurrencyCode {
    fn default() -> Self {
        CurrencyCode::Usd
    }
}

impl CurrencyCode {
    pub fn as_str(self) -> &'static str {
        match self {
            CurrencyCode::Usd => "USD",
            CurrencyCode::Eur => "EUR",
            CurrencyCode::Gbp => "GBP",
            CurrencyCode::Inr => "INR",
            CurrencyCode::Jpy => "JPY",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CurrencyCode::Usd => "$",
            CurrencyCode::Eur => "€",
            CurrencyCode::Gbp => "£",
            CurrencyCode::Inr => "₹",
            CurrencyCode::Jpy => "¥",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "USD" => Some(CurrencyCode::Usd),
            "EUR" => Some(CurrencyCode::Eur),
            "GBP" => Some(CurrencyCode::Gbp),
            "INR" => Some(CurrencyCode::Inr),
            "JPY" => Some(CurrencyCode::Jpy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    Light,
    Dark,
}

impl ThemePreference {
    pub fn as_str(self) -> &'static str {
        match self {
            ThemePreference::Light => "light",
            ThemePreference::Dark => "dark",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "light" => Some(ThemePreference::Light),
            "dark" => Some(ThemePreference::Dark),
            _ => None,
        }
    }
}

/// Account record handed to callers. Never carries the secret or the PIN
/// itself, only whether a PIN is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub currency: CurrencyCode,
    pub has_pin: bool,
    pub created_at: i64,
}

impl TryFrom<&SqliteRow> for UserRecord {
    type Error = StoreError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        let currency_raw: String = row.try_get("currency")?;
        let currency = CurrencyCode::parse(&currency_raw)
            .ok_or_else(|| decode_err("currency", format!("unknown currency {currency_raw}")))?;
        let pin: Option<String> = row.try_get("pin_code")?;
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            currency,
            has_pin: pin.map(|p| !p.is_empty()).unwrap_or(false),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub kind: TxnKind,
    pub category: String,
    pub date: String,
    pub note: Option<String>,
    pub is_recurring: bool,
    pub recurring_frequency: Option<String>,
}

impl TryFrom<&SqliteRow> for TransactionRecord {
    type Error = StoreError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        let kind_raw: String = row.try_get("kind")?;
        let kind = TxnKind::parse(&kind_raw)
            .ok_or_else(|| decode_err("kind", format!("unknown kind {kind_raw}")))?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            amount: row.try_get("amount")?,
            kind,
            category: row.try_get("category")?,
            date: row.try_get("date")?,
            note: row.try_get("note")?,
            is_recurring: row.try_get::<i64, _>("is_recurring")? != 0,
            recurring_frequency: row.try_get("recurring_frequency")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRecord {
    pub id: i64,
    pub user_id: i64,
    pub category: String,
    pub amount_limit: f64,
    pub period: String,
}

impl TryFrom<&SqliteRow> for BudgetRecord {
    type Error = StoreError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            category: row.try_get("category")?,
            amount_limit: row.try_get("amount_limit")?,
            period: row.try_get("period")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub amount: f64,
    pub due_date: String,
    pub category: String,
    pub is_paid: bool,
}

impl TryFrom<&SqliteRow> for ReminderRecord {
    type Error = StoreError;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            amount: row.try_get("amount")?,
            due_date: row.try_get("due_date")?,
            category: row.try_get("category")?,
            is_paid: row.try_get::<i64, _>("is_paid")? != 0,
        })
    }
}

/// Full field set for creating or replacing a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub amount: f64,
    pub kind: TxnKind,
    pub category: String,
    pub date: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub recurring_frequency: Option<String>,
}

impl TransactionInput {
    pub(crate) fn validate(&self) -> StoreResult<()> {
        if !(self.amount.is_finite() && self.amount > 0.0) {
            return Err(StoreError::invalid_input("amount must be positive"));
        }
        if self.category.trim().is_empty() {
            return Err(StoreError::invalid_input("category must not be empty"));
        }
        if parse_date(&self.date).is_none() {
            return Err(StoreError::invalid_input("date must be a valid ISO date"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetInput {
    pub category: String,
    pub amount_limit: f64,
    pub period: String,
}

impl BudgetInput {
    pub(crate) fn validate(&self) -> StoreResult<()> {
        if self.category.trim().is_empty() {
            return Err(StoreError::invalid_input("category must not be empty"));
        }
        if !(self.amount_limit.is_finite() && self.amount_limit > 0.0) {
            return Err(StoreError::invalid_input("limit must be positive"));
        }
        if self.period.trim().is_empty() {
            return Err(StoreError::invalid_input("period must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderInput {
    pub title: String,
    pub amount: f64,
    pub due_date: String,
    pub category: String,
}

impl ReminderInput {
    pub(crate) fn validate(&self) -> StoreResult<()> {
        if self.title.trim().is_empty() {
            return Err(StoreError::invalid_input("title must not be empty"));
        }
        if !(self.amount.is_finite() && self.amount >= 0.0) {
            return Err(StoreError::invalid_input("amount must not be negative"));
        }
        if parse_date(&self.due_date).is_none() {
            return Err(StoreError::invalid_input(
                "due date must be a valid ISO date",
            ));
        }
        if self.category.trim().is_empty() {
            return Err(StoreError::invalid_input("category must not be empty"));
        }
        Ok(())
    }
}

/// Listing filter. Matches the search term case-insensitively against the
/// note (falling back to the category when the note is empty).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    #[serde(default)]
    pub kind: Option<TxnKind>,
    #[serde(default)]
    pub search: Option<String>,
}
