use anyhow::Result;
use finvault::{FinanceStore, TransactionFilter, TransactionInput, TxnKind};

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn reopening_the_same_directory_is_idempotent_and_lossless() -> Result<()> {
    let tmp = tempfile::tempdir()?;

    let mut store = FinanceStore::open_in_dir(tmp.path()).await?;
    let user = util::register(&mut store, "file@example.com").await;
    store
        .create_transaction(
            user,
            &TransactionInput {
                amount: 42.50,
                kind: TxnKind::Expense,
                category: "Food".into(),
                date: "2024-03-15".into(),
                note: None,
                is_recurring: false,
                recurring_frequency: None,
            },
        )
        .await?;
    drop(store);

    // Second open runs schema init again over the loaded blob: no duplicate
    // tables, no data loss.
    let store = FinanceStore::open_in_dir(tmp.path()).await?;
    let listed = store
        .list_transactions(user, &TransactionFilter::default())
        .await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].amount, 42.50);
    drop(store);

    // And a third time, for good measure.
    let store = FinanceStore::open_in_dir(tmp.path()).await?;
    assert_eq!(
        store
            .list_transactions(user, &TransactionFilter::default())
            .await?
            .len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn user_records_round_trip_through_the_blob() -> Result<()> {
    let tmp = tempfile::tempdir()?;

    let mut store = FinanceStore::open_in_dir(tmp.path()).await?;
    let created = store
        .register_user("roundtrip@example.com", "hunter2", Some(finvault::CurrencyCode::Eur))
        .await?;
    store.verify_or_set_pin(created.id, "1234").await?;
    drop(store);

    let store = FinanceStore::open_in_dir(tmp.path()).await?;
    let user = store
        .get_user(created.id)
        .await?
        .expect("user survives reopen");
    assert_eq!(user.email, "roundtrip@example.com");
    assert_eq!(user.currency, finvault::CurrencyCode::Eur);
    assert!(user.has_pin);

    // and the secret still authenticates
    store.authenticate("roundtrip@example.com", "hunter2").await?;
    Ok(())
}
