//! Integration tests for the monetization ledger
//!
//! These exercise the engine against a real Postgres database and verify
//! the core guarantees: balance/ledger consistency, exactly-once
//! application under replay, renewal semantics, and commission payout.
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://..."  # migrated test database
//! cargo test -p vitrine-ledger -- --ignored --test-threads=1
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use sqlx::PgPool;
use time::Duration;
use uuid::Uuid;

use vitrine_ledger::{
    BalanceStore, ClaimOutcome, CommissionService, EntitlementStore, GrantParams,
    IdempotencyGuard, IntentRegistry, LedgerError, PackageStore, RenewalScheduler,
};
use vitrine_shared::{EntitlementKind, IntentStatus, LedgerCategory, PurchaseKind};

// ============================================================================
// Test Utilities
// ============================================================================

async fn setup_pool() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database")
}

/// Insert a boost package costing 15 credits for 24h and return its id
async fn create_test_boost_package(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO credit_packages (id, kind, name, price_cents, credit_cost, credit_amount, duration_hours)
        VALUES ($1, 'boost', 'Test boost 24h', 1500, 15, 0, 24)
        "#,
    )
    .bind(id)
    .execute(pool)
    .await
    .expect("Failed to create test package");
    id
}

fn unique_key(prefix: &str) -> String {
    format!("{}:{}", prefix, Uuid::new_v4().simple())
}

// ============================================================================
// Balance Store
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn balance_equals_ledger_sum_after_mixed_deltas() {
    let pool = setup_pool().await;
    let balances = BalanceStore::new(pool.clone());
    let owner = Uuid::new_v4();

    for (delta, category) in [
        (100, LedgerCategory::Purchase),
        (-30, LedgerCategory::Spend),
        (25, LedgerCategory::Commission),
        (-15, LedgerCategory::Renewal),
    ] {
        balances
            .apply_delta(owner, delta, category, "test", None, &unique_key("t"))
            .await
            .expect("delta should apply");
    }

    assert_eq!(balances.get_balance(owner).await.unwrap(), 80);

    let report = balances.reconcile(owner).await.expect("no drift");
    assert_eq!(report.cached_amount, 80);
    assert_eq!(report.ledger_sum, 80);
}

#[tokio::test]
#[ignore] // Requires database
async fn replayed_idempotency_key_applies_once() {
    let pool = setup_pool().await;
    let balances = BalanceStore::new(pool.clone());
    let owner = Uuid::new_v4();
    let key = unique_key("payment");

    let first = balances
        .apply_delta(owner, 100, LedgerCategory::Purchase, "pack", None, &key)
        .await
        .unwrap();
    let second = balances
        .apply_delta(owner, 100, LedgerCategory::Purchase, "pack", None, &key)
        .await
        .unwrap();

    assert!(first.applied);
    assert!(!second.applied);
    assert_eq!(first.balance, 100);
    assert_eq!(second.balance, 100);
    assert_eq!(first.entry_id, second.entry_id);
    assert_eq!(balances.get_balance(owner).await.unwrap(), 100);

    let entries = balances.entries(owner, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn negative_balance_rejected_with_zero_rows() {
    let pool = setup_pool().await;
    let balances = BalanceStore::new(pool.clone());
    let owner = Uuid::new_v4();

    balances
        .apply_delta(owner, 10, LedgerCategory::Purchase, "seed", None, &unique_key("t"))
        .await
        .unwrap();

    let err = balances
        .apply_delta(owner, -15, LedgerCategory::Spend, "overdraw", None, &unique_key("t"))
        .await
        .unwrap_err();

    match err {
        LedgerError::InsufficientBalance {
            required,
            available,
        } => {
            assert_eq!(required, 15);
            assert_eq!(available, 10);
        }
        other => panic!("expected InsufficientBalance, got {:?}", other),
    }

    assert_eq!(balances.get_balance(owner).await.unwrap(), 10);
    assert_eq!(balances.entries(owner, 10).await.unwrap().len(), 1);
}

// ============================================================================
// Idempotency Guard
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn concurrent_claims_have_exactly_one_winner() {
    let pool = setup_pool().await;
    let guard = IdempotencyGuard::new(pool.clone());
    let key = unique_key("claim");

    let (a, b) = tokio::join!(guard.claim_once(&key), guard.claim_once(&key));

    let claimed = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|o| matches!(o, ClaimOutcome::Claimed { .. }))
        .count();
    assert_eq!(claimed, 1, "exactly one claimant must win");
}

#[tokio::test]
#[ignore] // Requires database
async fn resolved_claim_returns_stored_result() {
    let pool = setup_pool().await;
    let guard = IdempotencyGuard::new(pool.clone());
    let key = unique_key("claim");

    assert!(matches!(
        guard.claim_once(&key).await.unwrap(),
        ClaimOutcome::Claimed { recovered: false }
    ));

    let stored = serde_json::json!({ "outcome": "applied", "balance": 100 });
    guard.resolve(&key, &stored).await.unwrap();

    match guard.claim_once(&key).await.unwrap() {
        ClaimOutcome::Resolved(result) => assert_eq!(result, stored),
        other => panic!("expected Resolved, got {:?}", other),
    }
}

// ============================================================================
// Order Intents
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn intent_resolves_exactly_once() {
    let pool = setup_pool().await;
    let intents = IntentRegistry::new(pool.clone());
    let owner = Uuid::new_v4();

    let intent = intents
        .create_intent(owner, PurchaseKind::CreditPack, None, None, 5000)
        .await
        .unwrap();
    assert_eq!(intent.status, IntentStatus::Pending);

    let first = intents
        .resolve_intent(&intent.correlation_token, IntentStatus::Confirmed)
        .await
        .unwrap();
    assert!(first.transitioned);
    assert_eq!(first.intent.status, IntentStatus::Confirmed);

    // Same outcome replay returns the stored row unchanged
    let replay = intents
        .resolve_intent(&intent.correlation_token, IntentStatus::Confirmed)
        .await
        .unwrap();
    assert!(!replay.transitioned);
    assert_eq!(replay.intent.id, intent.id);

    // Conflicting outcome is short-circuited
    let conflict = intents
        .resolve_intent(&intent.correlation_token, IntentStatus::Rejected)
        .await
        .unwrap_err();
    assert!(matches!(conflict, LedgerError::IntentAlreadyResolved(_)));
}

#[tokio::test]
#[ignore] // Requires database
async fn expired_intent_cannot_be_resolved() {
    let pool = setup_pool().await;
    let intents = IntentRegistry::new(pool.clone());
    let owner = Uuid::new_v4();

    let intent = intents
        .create_intent(owner, PurchaseKind::Boost, Some(Uuid::new_v4()), None, 1500)
        .await
        .unwrap();

    // Backdate past the TTL, then sweep
    sqlx::query("UPDATE order_intents SET created_at = NOW() - INTERVAL '25 hours' WHERE id = $1")
        .bind(intent.id)
        .execute(&pool)
        .await
        .unwrap();
    let swept = intents.expire_pending(Duration::hours(24)).await.unwrap();
    assert!(swept >= 1);

    let err = intents
        .resolve_intent(&intent.correlation_token, IntentStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::IntentExpired(_)));
}

// ============================================================================
// Entitlements
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn extend_adds_to_stored_end_not_now() {
    let pool = setup_pool().await;
    let entitlements = EntitlementStore::new(pool.clone());
    let owner = Uuid::new_v4();

    let granted = entitlements
        .grant(GrantParams {
            owner_id: owner,
            kind: EntitlementKind::Boost,
            target: Some(Uuid::new_v4()),
            duration: Duration::hours(24),
            auto_renew: false,
            renewal_package: None,
            source_ref: None,
        })
        .await
        .unwrap();

    // Backdate the end into the past; the row is still active because the
    // expiry sweep has not run
    sqlx::query("UPDATE entitlements SET ends_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(granted.id)
        .execute(&pool)
        .await
        .unwrap();
    let stale = entitlements.get(granted.id).await.unwrap();

    let extended = entitlements
        .extend(granted.id, Duration::hours(6))
        .await
        .unwrap();

    // Grace extension: anchored to the stored end, not to now
    let diff = extended.ends_at - stale.ends_at;
    assert!((diff - Duration::hours(6)).abs() < Duration::seconds(1));
}

#[tokio::test]
#[ignore] // Requires database
async fn expiry_sweep_downgrades_featured_profile() {
    let pool = setup_pool().await;
    let entitlements = EntitlementStore::new(pool.clone());
    let scheduler = RenewalScheduler::new(pool.clone());
    let profile = Uuid::new_v4();

    let granted = entitlements
        .grant(GrantParams {
            owner_id: Uuid::new_v4(),
            kind: EntitlementKind::Boost,
            target: Some(profile),
            duration: Duration::hours(1),
            auto_renew: false,
            renewal_package: None,
            source_ref: None,
        })
        .await
        .unwrap();

    assert!(entitlements.is_featured(profile).await.unwrap());

    sqlx::query("UPDATE entitlements SET ends_at = NOW() - INTERVAL '1 minute' WHERE id = $1")
        .bind(granted.id)
        .execute(&pool)
        .await
        .unwrap();

    assert!(scheduler.run_expiry_sweep().await.unwrap() >= 1);
    assert!(!entitlements.is_featured(profile).await.unwrap());
}

// ============================================================================
// Renewal Sweep
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn renewal_with_sufficient_balance_extends_once() {
    let pool = setup_pool().await;
    let balances = BalanceStore::new(pool.clone());
    let entitlements = EntitlementStore::new(pool.clone());
    let scheduler = RenewalScheduler::new(pool.clone());
    let owner = Uuid::new_v4();
    let package = create_test_boost_package(&pool).await;

    balances
        .apply_delta(owner, 50, LedgerCategory::Purchase, "seed", None, &unique_key("t"))
        .await
        .unwrap();

    let granted = entitlements
        .grant(GrantParams {
            owner_id: owner,
            kind: EntitlementKind::Boost,
            target: Some(Uuid::new_v4()),
            duration: Duration::hours(2),
            auto_renew: true,
            renewal_package: Some(package),
            source_ref: None,
        })
        .await
        .unwrap();

    let first = scheduler.run_sweep().await.unwrap();
    assert_eq!(first.renewed, 1);

    // Second tick of the same period: serialized by the period key
    let second = scheduler.run_sweep().await.unwrap();
    assert_eq!(second.renewed, 0);

    let renewed = entitlements.get(granted.id).await.unwrap();
    assert_eq!(renewed.renewal_count, 1);
    let diff = renewed.ends_at - granted.ends_at;
    assert!((diff - Duration::hours(24)).abs() < Duration::seconds(1));
    assert_eq!(balances.get_balance(owner).await.unwrap(), 35);
}

#[tokio::test]
#[ignore] // Requires database
async fn renewal_with_insufficient_balance_lapses_gracefully() {
    let pool = setup_pool().await;
    let balances = BalanceStore::new(pool.clone());
    let entitlements = EntitlementStore::new(pool.clone());
    let scheduler = RenewalScheduler::new(pool.clone());
    let owner = Uuid::new_v4();
    let package = create_test_boost_package(&pool).await;

    // Balance 10, renewal costs 15, expiring within the 24h window
    balances
        .apply_delta(owner, 10, LedgerCategory::Purchase, "seed", None, &unique_key("t"))
        .await
        .unwrap();

    let granted = entitlements
        .grant(GrantParams {
            owner_id: owner,
            kind: EntitlementKind::Boost,
            target: Some(Uuid::new_v4()),
            duration: Duration::hours(2),
            auto_renew: true,
            renewal_package: Some(package),
            source_ref: None,
        })
        .await
        .unwrap();

    let summary = scheduler.run_sweep().await.unwrap();
    assert_eq!(summary.insufficient, 1);
    assert_eq!(summary.renewed, 0);

    // Balance untouched, entitlement left to expire naturally
    assert_eq!(balances.get_balance(owner).await.unwrap(), 10);
    let unchanged = entitlements.get(granted.id).await.unwrap();
    assert_eq!(unchanged.renewal_count, 0);

    // Exactly one renewal-failure notification
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notifications WHERE owner_id = $1 AND kind = 'renewal_failed'",
    )
    .bind(owner)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);

    // A failed period is terminal: the next sweep does not retry it
    let again = scheduler.run_sweep().await.unwrap();
    assert_eq!(again.insufficient, 0);
    assert_eq!(again.skipped, 1);
}

// ============================================================================
// Commissions
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn referred_boost_purchase_pays_tiered_commission_once() {
    let pool = setup_pool().await;
    let balances = BalanceStore::new(pool.clone());
    let commissions = CommissionService::new(pool.clone());
    let affiliate = Uuid::new_v4();
    let referred = Uuid::new_v4();

    assert!(commissions.attribute(affiliate, referred).await.unwrap());
    // Second attribution is a no-op
    assert!(!commissions
        .attribute(Uuid::new_v4(), referred)
        .await
        .unwrap());

    // Lift the affiliate to gold tier (bonus 5%)
    sqlx::query(
        "UPDATE affiliate_referrals SET total_revenue_cents = 500000 WHERE referred_user_id = $1",
    )
    .bind(referred)
    .execute(&pool)
    .await
    .unwrap();

    // R$100 boost at 15% base + 5% gold bonus = R$20 commission
    let source_ref = unique_key("pay");
    let commission = commissions
        .apply(referred, PurchaseKind::Boost, 10_000, &source_ref)
        .await
        .unwrap()
        .expect("referral exists");

    assert_eq!(commission.rate_pct, 20);
    assert_eq!(commission.commission_cents, 2_000);
    assert_eq!(balances.get_balance(affiliate).await.unwrap(), 20);

    // Replayed confirmation: no second commission, no second credit
    let replay = commissions
        .apply(referred, PurchaseKind::Boost, 10_000, &source_ref)
        .await
        .unwrap()
        .expect("stored row returned");
    assert_eq!(replay.id, commission.id);
    assert_eq!(balances.get_balance(affiliate).await.unwrap(), 20);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM commissions WHERE source_ref = $1")
        .bind(&source_ref)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn unreferred_user_earns_no_commission() {
    let pool = setup_pool().await;
    let commissions = CommissionService::new(pool.clone());

    let result = commissions
        .apply(Uuid::new_v4(), PurchaseKind::Boost, 10_000, &unique_key("pay"))
        .await
        .unwrap();
    assert!(result.is_none());
}

// ============================================================================
// End-to-end: confirmed credit-pack purchase
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn confirmed_credit_pack_purchase_credits_balance() {
    let pool = setup_pool().await;
    let balances = BalanceStore::new(pool.clone());
    let intents = IntentRegistry::new(pool.clone());
    let packages = PackageStore::new(pool.clone());
    let owner = Uuid::new_v4();

    // 100-credit pack for R$50 from the seeded catalog
    let pack = packages
        .list_active(PurchaseKind::CreditPack)
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.credit_amount == 100)
        .expect("seeded 100-credit pack");

    let intent = intents
        .create_intent(owner, PurchaseKind::CreditPack, None, Some(pack.id), pack.price_cents)
        .await
        .unwrap();
    assert_eq!(intent.status, IntentStatus::Pending);
    assert_eq!(balances.get_balance(owner).await.unwrap(), 0);

    // Gateway confirms: the processor resolves the intent and credits
    let payment_id = format!("pay_{}", Uuid::new_v4().simple());
    let resolved = intents
        .resolve_intent(&intent.correlation_token, IntentStatus::Confirmed)
        .await
        .unwrap();
    assert!(resolved.transitioned);

    balances
        .apply_delta(
            owner,
            pack.credit_amount,
            LedgerCategory::Purchase,
            "Compra: pacote de créditos",
            Some(&payment_id),
            &format!("payment:{}", payment_id),
        )
        .await
        .unwrap();

    assert_eq!(balances.get_balance(owner).await.unwrap(), 100);
    let entries = balances.entries(owner, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].delta, 100);
    assert_eq!(entries[0].category, LedgerCategory::Purchase);
    assert_eq!(
        intents.get(intent.id).await.unwrap().status,
        IntentStatus::Confirmed
    );
}
