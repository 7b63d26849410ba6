//! Derived read-only views over the transaction set. Pure functions of
//! stored state; nothing here mutates the engine and nothing is cached.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::StoreResult;

/// Fixed chart palette; slices take colors by rank, cycling.
pub const CHART_PALETTE: [&str; 9] = [
    "#6366f1", "#a855f7", "#ec4899", "#f43f5e", "#f97316", "#eab308", "#22c55e", "#06b6d4",
    "#3b82f6",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub income: f64,
    pub expense: f64,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySlice {
    pub name: String,
    pub total: f64,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBucket {
    /// `YYYY-MM` calendar bucket.
    pub month: String,
    pub income: f64,
    pub expense: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafeToSpend {
    pub balance: f64,
    /// Budget headroom still committed for the month.
    pub remaining_budget: f64,
    pub amount: f64,
}

pub async fn totals(pool: &SqlitePool, user_id: i64) -> StoreResult<Totals> {
    let (income, expense): (f64, f64) = sqlx::query_as(
        "SELECT \
           COALESCE(SUM(CASE WHEN kind = 'income' THEN amount ELSE 0.0 END), 0.0), \
           COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount ELSE 0.0 END), 0.0) \
         FROM transactions WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(Totals {
        income,
        expense,
        balance: income - expense,
    })
}

/// Expense-only category sums, largest first.
pub async fn category_breakdown(
    pool: &SqlitePool,
    user_id: i64,
) -> StoreResult<Vec<CategorySlice>> {
    let rows: Vec<(String, f64)> = sqlx::query_as(
        "SELECT category, SUM(amount) AS total \
         FROM transactions \
         WHERE user_id = ? AND kind = 'expense' \
         GROUP BY category \
         ORDER BY total DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(rank, (name, total))| CategorySlice {
            name,
            total,
            color: CHART_PALETTE[rank % CHART_PALETTE.len()],
        })
        .collect())
}

/// Per-month income/expense buckets, ascending, most-recent `limit` only.
/// With more history than `limit` months, the tail is kept, not the head.
pub async fn monthly_trend(
    pool: &SqlitePool,
    user_id: i64,
    limit: u32,
) -> StoreResult<Vec<MonthlyBucket>> {
    let rows: Vec<(String, f64, f64)> = sqlx::query_as(
        "SELECT strftime('%Y-%m', date) AS month, \
           COALESCE(SUM(CASE WHEN kind = 'income' THEN amount ELSE 0.0 END), 0.0) AS inc, \
           COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount ELSE 0.0 END), 0.0) AS exp \
         FROM transactions \
         WHERE user_id = ? \
         GROUP BY month \
         ORDER BY month DESC \
         LIMIT ?",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut buckets: Vec<MonthlyBucket> = rows
        .into_iter()
        .map(|(month, income, expense)| MonthlyBucket {
            month,
            income,
            expense,
        })
        .collect();
    buckets.reverse();
    Ok(buckets)
}

/// Balance minus the unspent share of committed budgets for `month`
/// (`YYYY-MM`). Both the remaining budget and the result clamp at zero.
pub async fn safe_to_spend(
    pool: &SqlitePool,
    user_id: i64,
    month: &str,
) -> StoreResult<SafeToSpend> {
    let all_time = totals(pool, user_id).await?;

    let (limit_sum,): (f64,) =
        sqlx::query_as("SELECT COALESCE(SUM(amount_limit), 0.0) FROM budgets WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(pool)
            .await?;

    let (spent,): (f64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount), 0.0) \
         FROM transactions \
         WHERE user_id = ? AND kind = 'expense' AND substr(date, 1, 7) = ? \
           AND category IN (SELECT category FROM budgets WHERE user_id = ?)",
    )
    .bind(user_id)
    .bind(month)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let remaining_budget = (limit_sum - spent).max(0.0);
    let amount = (all_time.balance - remaining_budget).max(0.0);
    Ok(SafeToSpend {
        balance: all_time.balance,
        remaining_budget,
        amount,
    })
}
