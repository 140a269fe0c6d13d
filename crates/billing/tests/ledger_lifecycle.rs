//! Integration tests for the pending-item ledger lifecycle
//!
//! These tests verify the pending -> billed -> (void rollback) -> pending
//! transitions against a real database, including the guards that prevent
//! double-billing.
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://localhost/opsdash_test"
//! cargo test --test ledger_lifecycle -- --ignored --test-threads=1
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use opsdash_billing::{BillingError, LedgerService, NewPendingItem, UsageImportRow};
use opsdash_shared::{PendingItemSource, PendingItemStatus};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

async fn setup_pool() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    opsdash_shared::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

async fn seed_project(pool: &PgPool, created_by: Uuid) -> Uuid {
    let (project_id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO projects (created_by, name) VALUES ($1, $2) RETURNING id",
    )
    .bind(created_by)
    .bind(format!("test-project-{}", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .expect("Failed to seed project");

    project_id
}

fn manual_item(project_id: Uuid, description: &str, cents: i64) -> NewPendingItem {
    NewPendingItem {
        project_id,
        source_type: PendingItemSource::Manual,
        source_ref_id: None,
        description: description.to_string(),
        quantity: 1.0,
        unit_price_cents: cents,
        metadata: serde_json::json!({}),
    }
}

#[tokio::test]
#[ignore] // Requires database
async fn test_enqueue_and_list_pending() {
    let pool = setup_pool().await;
    let ledger = LedgerService::new(pool.clone());
    let caller = Uuid::new_v4();
    let project_id = seed_project(&pool, caller).await;

    let item = ledger
        .enqueue(caller, manual_item(project_id, "Rush delivery surcharge", 2_500))
        .await
        .expect("enqueue failed");
    assert_eq!(item.status, PendingItemStatus::Pending);
    assert_eq!(item.amount_cents, 2_500);

    let pending = ledger
        .list_pending(caller, project_id, None)
        .await
        .expect("list failed");
    assert!(pending.iter().any(|p| p.id == item.id));

    // Another caller must not see it
    let other = ledger
        .list_pending(Uuid::new_v4(), project_id, None)
        .await
        .expect("list failed");
    assert!(other.is_empty());
}

#[tokio::test]
#[ignore] // Requires database
async fn test_item_bills_exactly_once() {
    let pool = setup_pool().await;
    let ledger = LedgerService::new(pool.clone());
    let caller = Uuid::new_v4();
    let project_id = seed_project(&pool, caller).await;

    let item = ledger
        .enqueue(caller, manual_item(project_id, "Consulting block", 50_000))
        .await
        .expect("enqueue failed");

    let invoice_id = Uuid::new_v4();
    let line_item_id = Uuid::new_v4();
    let links = HashMap::from([(item.id, line_item_id)]);

    let mut tx = pool.begin().await.unwrap();
    let claimed = ledger
        .claim_pending(&mut tx, caller, project_id, &[item.id])
        .await
        .expect("claim failed");
    assert_eq!(claimed.len(), 1);
    ledger
        .mark_billed(&mut tx, invoice_id, &links)
        .await
        .expect("mark_billed failed");
    tx.commit().await.unwrap();

    // A second claim sees nothing pending
    let mut tx = pool.begin().await.unwrap();
    let reclaimed = ledger
        .claim_pending(&mut tx, caller, project_id, &[item.id])
        .await
        .expect("claim failed");
    assert!(reclaimed.is_empty());

    // And a second mark fails with a conflict
    let result = ledger.mark_billed(&mut tx, Uuid::new_v4(), &links).await;
    assert!(matches!(result, Err(BillingError::Conflict(_))));
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires database
async fn test_void_rollback_returns_items_to_pending() {
    let pool = setup_pool().await;
    let ledger = LedgerService::new(pool.clone());
    let caller = Uuid::new_v4();
    let project_id = seed_project(&pool, caller).await;

    let item = ledger
        .enqueue(caller, manual_item(project_id, "Voidable work", 10_000))
        .await
        .expect("enqueue failed");

    let invoice_id = Uuid::new_v4();
    let links = HashMap::from([(item.id, Uuid::new_v4())]);

    let mut tx = pool.begin().await.unwrap();
    ledger
        .claim_pending(&mut tx, caller, project_id, &[item.id])
        .await
        .unwrap();
    ledger.mark_billed(&mut tx, invoice_id, &links).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let reverted = ledger
        .revert_to_pending(&mut tx, &[item.id])
        .await
        .expect("revert failed");
    tx.commit().await.unwrap();
    assert_eq!(reverted, 1);

    let pending = ledger
        .list_pending(caller, project_id, None)
        .await
        .expect("list failed");
    let restored = pending
        .iter()
        .find(|p| p.id == item.id)
        .expect("item not restored");
    assert_eq!(restored.status, PendingItemStatus::Pending);
    assert!(restored.billed_invoice_id.is_none());
    assert!(restored.billed_invoice_line_item_id.is_none());
}

#[tokio::test]
#[ignore] // Requires database
async fn test_usage_import_aggregates_one_pending_item() {
    let pool = setup_pool().await;
    let ledger = LedgerService::new(pool.clone());
    let caller = Uuid::new_v4();
    let project_id = seed_project(&pool, caller).await;

    let (period_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO billing_periods (project_id, created_by, period_start, period_end, status)
        VALUES ($1, $2, '2026-08-01', '2026-08-31', 'draft')
        RETURNING id
        "#,
    )
    .bind(project_id)
    .bind(caller)
    .fetch_one(&pool)
    .await
    .unwrap();

    let rows = vec![
        UsageImportRow {
            occurred_at: chrono::NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
            description: "API calls".to_string(),
            quantity: 1000.0,
            unit_cost_cents: 2,
        },
        UsageImportRow {
            occurred_at: chrono::NaiveDate::from_ymd_opt(2026, 8, 15).unwrap(),
            description: "Storage GB-days".to_string(),
            quantity: 12.5,
            unit_cost_cents: 40,
        },
    ];

    let item = ledger
        .import_usage(caller, period_id, rows)
        .await
        .expect("import failed");

    // 1000 * 2 + round(12.5 * 40) = 2000 + 500
    assert_eq!(item.unit_price_cents, 2_500);
    assert_eq!(item.quantity, 1.0);
    assert_eq!(item.source_type, PendingItemSource::Usage);
    assert_eq!(
        item.metadata["billing_period_id"],
        period_id.to_string()
    );

    // Rows outside the period are rejected before anything is written
    let out_of_range = vec![UsageImportRow {
        occurred_at: chrono::NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
        description: "late event".to_string(),
        quantity: 1.0,
        unit_cost_cents: 100,
    }];
    let result = ledger.import_usage(caller, period_id, out_of_range).await;
    assert!(matches!(result, Err(BillingError::Validation(_))));
}
