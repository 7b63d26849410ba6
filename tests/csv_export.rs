use anyhow::Result;
use finvault::{TransactionFilter, TransactionInput, TxnKind};

#[path = "util.rs"]
mod util;

fn entry(amount: f64, kind: TxnKind, category: &str, date: &str, note: Option<&str>) -> TransactionInput {
    TransactionInput {
        amount,
        kind,
        category: category.into(),
        date: date.into(),
        note: note.map(str::to_string),
        is_recurring: false,
        recurring_frequency: None,
    }
}

#[tokio::test]
async fn csv_has_the_expected_header_and_rows() -> Result<()> {
    let (_tmp, mut store, _backing) = util::temp_store().await;
    let user = util::register(&mut store, "csv@example.com").await;

    store
        .create_transaction(
            user,
            &entry(1200.0, TxnKind::Income, "Salary", "2024-03-01", None),
        )
        .await?;
    store
        .create_transaction(
            user,
            &entry(42.5, TxnKind::Expense, "Food", "2024-03-15", Some("groceries")),
        )
        .await?;

    let csv = store
        .export_csv(user, &TransactionFilter::default())
        .await?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "Date,Description,Category,Type,Amount");
    // newest first, same order as the listing
    assert_eq!(lines[1], "2024-03-15,groceries,Food,expense,42.5");
    // no note: description falls back to the category; no currency symbol
    assert_eq!(lines[2], "2024-03-01,Salary,Salary,income,1200");
    Ok(())
}

#[tokio::test]
async fn embedded_commas_and_quotes_stay_in_their_field() -> Result<()> {
    let (_tmp, mut store, _backing) = util::temp_store().await;
    let user = util::register(&mut store, "quoting@example.com").await;

    store
        .create_transaction(
            user,
            &entry(
                10.0,
                TxnKind::Expense,
                "Bills",
                "2024-03-15",
                Some("O'Brien's Bills, \"late\" fee"),
            ),
        )
        .await?;

    let csv = store
        .export_csv(user, &TransactionFilter::default())
        .await?;
    let row = csv.lines().nth(1).unwrap();
    assert_eq!(
        row,
        "2024-03-15,\"O'Brien's Bills, \"\"late\"\" fee\",Bills,expense,10"
    );
    Ok(())
}

#[tokio::test]
async fn csv_respects_the_active_filter() -> Result<()> {
    let (_tmp, mut store, _backing) = util::temp_store().await;
    let user = util::register(&mut store, "csvfilter@example.com").await;

    store
        .create_transaction(
            user,
            &entry(100.0, TxnKind::Income, "Salary", "2024-03-01", None),
        )
        .await?;
    store
        .create_transaction(
            user,
            &entry(25.0, TxnKind::Expense, "Food", "2024-03-02", None),
        )
        .await?;

    let csv = store
        .export_csv(
            user,
            &TransactionFilter {
                kind: Some(TxnKind::Expense),
                search: None,
            },
        )
        .await?;
    assert_eq!(csv.lines().count(), 2); // header + one expense row
    assert!(csv.contains("Food"));
    assert!(!csv.contains("Salary"));
    Ok(())
}
