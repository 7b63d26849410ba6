//! The only module that constructs statements against the engine. Every
//! value travels through a bind parameter, and every per-user predicate
//! carries `user_id = ?` so ownership is enforced inside the lookup itself.

use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::{StoreError, StoreResult};
use crate::model::{
    BudgetInput, BudgetRecord, CurrencyCode, ReminderInput, ReminderRecord, TransactionFilter,
    TransactionInput, TransactionRecord, UserRecord,
};
use crate::time::now_ms;

/// Result of `verify_or_set_pin`: either the PIN was just established, or an
/// existing PIN matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinOutcome {
    Established,
    Accepted,
}

fn valid_pin(pin: &str) -> bool {
    pin.len() == 4 && pin.bytes().all(|b| b.is_ascii_digit())
}

// -- users ---------------------------------------------------------------

pub async fn insert_user(
    pool: &SqlitePool,
    email: &str,
    secret: &str,
    currency: CurrencyCode,
) -> StoreResult<i64> {
    let email = email.trim();
    if email.is_empty() || secret.is_empty() {
        return Err(StoreError::invalid_input(
            "email and secret must not be empty",
        ));
    }

    let taken: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    if taken.is_some() {
        return Err(StoreError::DuplicateIdentity);
    }

    let result = sqlx::query(
        "INSERT INTO users (email, secret, currency, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(email)
    .bind(secret)
    .bind(currency.as_str())
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn user_by_id(pool: &SqlitePool, user_id: i64) -> StoreResult<Option<UserRecord>> {
    let row = sqlx::query("SELECT id, email, currency, pin_code, created_at FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(UserRecord::try_from).transpose()
}

/// Single lookup by email, secret compared in process: the same
/// `InvalidCredentials` comes back whether the email is unknown or the
/// secret is wrong.
pub async fn authenticate(pool: &SqlitePool, email: &str, secret: &str) -> StoreResult<UserRecord> {
    let row = sqlx::query(
        "SELECT id, email, secret, currency, pin_code, created_at FROM users WHERE email = ?",
    )
    .bind(email.trim())
    .fetch_optional(pool)
    .await?;

    let row = row.ok_or(StoreError::InvalidCredentials)?;
    let stored: String = sqlx::Row::try_get(&row, "secret")?;
    if stored != secret {
        return Err(StoreError::InvalidCredentials);
    }
    UserRecord::try_from(&row)
}

pub async fn verify_or_set_pin(
    pool: &SqlitePool,
    user_id: i64,
    pin: &str,
) -> StoreResult<PinOutcome> {
    if !valid_pin(pin) {
        return Err(StoreError::invalid_input("pin must be exactly 4 digits"));
    }

    let stored: Option<Option<String>> =
        sqlx::query_scalar("SELECT pin_code FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    let stored = stored.ok_or(StoreError::NotFound)?;

    match stored.filter(|p| !p.is_empty()) {
        None => {
            sqlx::query("UPDATE users SET pin_code = ? WHERE id = ?")
                .bind(pin)
                .bind(user_id)
                .execute(pool)
                .await?;
            Ok(PinOutcome::Established)
        }
        Some(existing) if existing == pin => Ok(PinOutcome::Accepted),
        Some(_) => Err(StoreError::PinRejected),
    }
}

pub async fn clear_pin(pool: &SqlitePool, user_id: i64) -> StoreResult<()> {
    sqlx::query("UPDATE users SET pin_code = NULL WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_currency(
    pool: &SqlitePool,
    user_id: i64,
    currency: CurrencyCode,
) -> StoreResult<()> {
    let result = sqlx::query("UPDATE users SET currency = ? WHERE id = ?")
        .bind(currency.as_str())
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

// -- transactions --------------------------------------------------------

pub async fn insert_transaction(
    pool: &SqlitePool,
    user_id: i64,
    input: &TransactionInput,
) -> StoreResult<i64> {
    input.validate()?;
    let result = sqlx::query(
        "INSERT INTO transactions \
           (user_id, amount, kind, category, date, note, is_recurring, recurring_frequency) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(input.amount)
    .bind(input.kind.as_str())
    .bind(&input.category)
    .bind(&input.date)
    .bind(&input.note)
    .bind(input.is_recurring as i64)
    .bind(&input.recurring_frequency)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn update_transaction(
    pool: &SqlitePool,
    user_id: i64,
    id: i64,
    input: &TransactionInput,
) -> StoreResult<()> {
    input.validate()?;
    let result = sqlx::query(
        "UPDATE transactions \
         SET amount = ?, kind = ?, category = ?, date = ?, note = ?, \
             is_recurring = ?, recurring_frequency = ? \
         WHERE user_id = ? AND id = ?",
    )
    .bind(input.amount)
    .bind(input.kind.as_str())
    .bind(&input.category)
    .bind(&input.date)
    .bind(&input.note)
    .bind(input.is_recurring as i64)
    .bind(&input.recurring_frequency)
    .bind(user_id)
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Deleting a missing or foreign id is a no-op success.
pub async fn delete_transaction(pool: &SqlitePool, user_id: i64, id: i64) -> StoreResult<()> {
    sqlx::query("DELETE FROM transactions WHERE user_id = ? AND id = ?")
        .bind(user_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_transactions(
    pool: &SqlitePool,
    user_id: i64,
    filter: &TransactionFilter,
) -> StoreResult<Vec<TransactionRecord>> {
    let mut sql = String::from(
        "SELECT id, user_id, amount, kind, category, date, note, is_recurring, \
                recurring_frequency \
         FROM transactions WHERE user_id = ?",
    );
    if filter.kind.is_some() {
        sql.push_str(" AND kind = ?");
    }
    if filter.search.is_some() {
        sql.push_str(" AND LOWER(COALESCE(NULLIF(note, ''), category)) LIKE ?");
    }
    sql.push_str(" ORDER BY date DESC, id DESC");

    let mut query = sqlx::query(&sql).bind(user_id);
    if let Some(kind) = filter.kind {
        query = query.bind(kind.as_str());
    }
    if let Some(search) = &filter.search {
        query = query.bind(format!("%{}%", search.to_lowercase()));
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(TransactionRecord::try_from).collect()
}

// -- budgets -------------------------------------------------------------

pub async fn insert_budget(
    pool: &SqlitePool,
    user_id: i64,
    input: &BudgetInput,
) -> StoreResult<i64> {
    input.validate()?;
    let result = sqlx::query(
        "INSERT INTO budgets (user_id, category, amount_limit, period) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(&input.category)
    .bind(input.amount_limit)
    .bind(&input.period)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn update_budget(
    pool: &SqlitePool,
    user_id: i64,
    id: i64,
    input: &BudgetInput,
) -> StoreResult<()> {
    input.validate()?;
    let result = sqlx::query(
        "UPDATE budgets SET category = ?, amount_limit = ?, period = ? \
         WHERE user_id = ? AND id = ?",
    )
    .bind(&input.category)
    .bind(input.amount_limit)
    .bind(&input.period)
    .bind(user_id)
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub async fn delete_budget(pool: &SqlitePool, user_id: i64, id: i64) -> StoreResult<()> {
    sqlx::query("DELETE FROM budgets WHERE user_id = ? AND id = ?")
        .bind(user_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_budgets(pool: &SqlitePool, user_id: i64) -> StoreResult<Vec<BudgetRecord>> {
    let rows = sqlx::query(
        "SELECT id, user_id, category, amount_limit, period FROM budgets \
         WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(BudgetRecord::try_from).collect()
}

// -- reminders -----------------------------------------------------------

pub async fn insert_reminder(
    pool: &SqlitePool,
    user_id: i64,
    input: &ReminderInput,
) -> StoreResult<i64> {
    input.validate()?;
    let result = sqlx::query(
        "INSERT INTO reminders (user_id, title, amount, due_date, category, is_paid) \
         VALUES (?, ?, ?, ?, ?, 0)",
    )
    .bind(user_id)
    .bind(&input.title)
    .bind(input.amount)
    .bind(&input.due_date)
    .bind(&input.category)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn update_reminder(
    pool: &SqlitePool,
    user_id: i64,
    id: i64,
    input: &ReminderInput,
) -> StoreResult<()> {
    input.validate()?;
    let result = sqlx::query(
        "UPDATE reminders SET title = ?, amount = ?, due_date = ?, category = ? \
         WHERE user_id = ? AND id = ?",
    )
    .bind(&input.title)
    .bind(input.amount)
    .bind(&input.due_date)
    .bind(&input.category)
    .bind(user_id)
    .bind(id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub async fn delete_reminder(pool: &SqlitePool, user_id: i64, id: i64) -> StoreResult<()> {
    sqlx::query("DELETE FROM reminders WHERE user_id = ? AND id = ?")
        .bind(user_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_reminders(
    pool: &SqlitePool,
    user_id: i64,
    pending_only: bool,
) -> StoreResult<Vec<ReminderRecord>> {
    let sql = if pending_only {
        "SELECT id, user_id, title, amount, due_date, category, is_paid FROM reminders \
         WHERE user_id = ? AND is_paid = 0 ORDER BY due_date ASC, id ASC"
    } else {
        "SELECT id, user_id, title, amount, due_date, category, is_paid FROM reminders \
         WHERE user_id = ? ORDER BY due_date ASC, id ASC"
    };
    let rows = sqlx::query(sql).bind(user_id).fetch_all(pool).await?;
    rows.iter().map(ReminderRecord::try_from).collect()
}

// -- compound writes (run inside an engine transaction) ------------------

/// Mark a pending reminder paid and record the matching expense. The
/// `is_paid = 0` predicate makes "paid exactly once" part of the lookup: a
/// second settle, or a foreign reminder, is `NotFound`.
pub async fn settle_reminder_tx(
    tx: &mut Transaction<'static, Sqlite>,
    user_id: i64,
    reminder_id: i64,
    settled_on: &str,
) -> StoreResult<i64> {
    let row = sqlx::query(
        "SELECT id, user_id, title, amount, due_date, category, is_paid FROM reminders \
         WHERE user_id = ? AND id = ? AND is_paid = 0",
    )
    .bind(user_id)
    .bind(reminder_id)
    .fetch_optional(&mut **tx)
    .await?;
    let reminder = row
        .as_ref()
        .map(ReminderRecord::try_from)
        .transpose()?
        .ok_or(StoreError::NotFound)?;

    sqlx::query("UPDATE reminders SET is_paid = 1 WHERE user_id = ? AND id = ?")
        .bind(user_id)
        .bind(reminder_id)
        .execute(&mut **tx)
        .await?;

    let result = sqlx::query(
        "INSERT INTO transactions (user_id, amount, kind, category, date, note) \
         VALUES (?, ?, 'expense', ?, ?, ?)",
    )
    .bind(user_id)
    .bind(reminder.amount)
    .bind(&reminder.category)
    .bind(settled_on)
    .bind(format!("Settled: {}", reminder.title))
    .execute(&mut **tx)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Drop every transaction, budget and reminder the user owns.
pub async fn purge_user_data_tx(
    tx: &mut Transaction<'static, Sqlite>,
    user_id: i64,
) -> StoreResult<()> {
    sqlx::query("DELETE FROM transactions WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM budgets WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM reminders WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_shape() {
        assert!(valid_pin("0420"));
        assert!(!valid_pin("042"));
        assert!(!valid_pin("04200"));
        assert!(!valid_pin("04a0"));
        assert!(!valid_pin("٠٤٢٠")); // non-ASCII digits don't count
    }
}
