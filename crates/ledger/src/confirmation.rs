//! Payment Confirmation Processor
//!
//! Converts gateway callbacks into durable balance and entitlement state
//! exactly once despite at-least-once delivery and out-of-order retries.
//!
//! State machine per external payment id:
//! received -> claimed -> validated -> applied -> recorded, terminal on
//! rejected at the validation step. The callback body is a pointer only;
//! the payment status is always re-fetched from the gateway by id. Any
//! error between the claim and the recorded result leaves the claim
//! unresolved, and the guard's staleness protocol allows exactly one
//! re-execution; every mutation on the re-executed path is keyed so the
//! replay applies nothing twice.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::balance::BalanceStore;
use crate::commission::CommissionService;
use crate::entitlement::{EntitlementStore, GrantParams};
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::{GatewayClient, GatewayPayment, GatewayPaymentStatus};
use crate::idempotency::{ClaimOutcome, IdempotencyGuard};
use crate::intent::IntentRegistry;
use crate::notify::Notifier;
use crate::packages::PackageStore;
use vitrine_shared::{EntitlementKind, IntentStatus, LedgerCategory, PurchaseKind};

/// Inbound gateway callback: a pointer to a payment, not a source of truth
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCallback {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "externalPaymentId")]
    pub external_payment_id: String,
}

/// Terminal disposition of a processed callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Applied,
    Rejected,
    Invalid,
}

/// Outcome data recorded under the idempotency claim. Replays of the same
/// payment id return exactly this data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackResult {
    pub disposition: Disposition,
    pub intent_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub entitlement_id: Option<Uuid>,
    /// Credits delivered (credit-pack purchases)
    pub credited: Option<i64>,
    /// Balance after crediting
    pub balance: Option<i64>,
    /// Human-readable failure detail for invalid outcomes
    pub error: Option<String>,
}

/// Response to the callback HTTP handler
#[derive(Debug, Clone, Serialize)]
pub struct CallbackResponse {
    /// True when this delivery was a replay and the stored result is
    /// returned unchanged
    pub duplicate: bool,
    #[serde(flatten)]
    pub result: CallbackResult,
}

pub struct ConfirmationProcessor {
    guard: IdempotencyGuard,
    balances: BalanceStore,
    intents: IntentRegistry,
    entitlements: EntitlementStore,
    packages: PackageStore,
    commissions: CommissionService,
    notifier: Notifier,
    gateway: GatewayClient,
}

impl ConfirmationProcessor {
    pub fn new(pool: PgPool, gateway: GatewayClient) -> Self {
        Self {
            guard: IdempotencyGuard::new(pool.clone()),
            balances: BalanceStore::new(pool.clone()),
            intents: IntentRegistry::new(pool.clone()),
            entitlements: EntitlementStore::new(pool.clone()),
            packages: PackageStore::new(pool.clone()),
            commissions: CommissionService::new(pool.clone()),
            notifier: Notifier::new(pool),
            gateway,
        }
    }

    /// Verify an inbound callback signature before touching any state
    pub fn verify_callback(&self, payload: &str, signature: &str) -> LedgerResult<()> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        self.gateway.verify_callback(payload, signature, now)
    }

    /// Process one gateway callback to a terminal, recorded outcome.
    ///
    /// Retryable errors (gateway down, claim held elsewhere) leave the
    /// claim unresolved and rely on gateway redelivery. Terminal failures
    /// are recorded under the claim so replays short-circuit instead of
    /// looping.
    pub async fn process_callback(
        &self,
        callback: &PaymentCallback,
    ) -> LedgerResult<CallbackResponse> {
        let payment_id = callback.external_payment_id.as_str();
        if payment_id.is_empty() || payment_id.len() > 128 {
            return Err(LedgerError::CorrelationInvalid(
                "missing or oversized externalPaymentId".to_string(),
            ));
        }

        let claim_key = format!("payment:{}", payment_id);
        match self.guard.claim_once(&claim_key).await? {
            ClaimOutcome::Claimed { recovered } => {
                if recovered {
                    tracing::warn!(
                        payment_id = %payment_id,
                        "Re-executing payment confirmation after stale claim"
                    );
                }
            }
            ClaimOutcome::Resolved(stored) => {
                let result: CallbackResult = serde_json::from_value(stored).map_err(|e| {
                    LedgerError::InvariantViolation(format!(
                        "stored outcome for {} does not deserialize: {}",
                        claim_key, e
                    ))
                })?;
                tracing::info!(
                    payment_id = %payment_id,
                    disposition = ?result.disposition,
                    "Duplicate payment callback, returning stored outcome"
                );
                return Ok(CallbackResponse {
                    duplicate: true,
                    result,
                });
            }
            ClaimOutcome::InFlight => {
                return Err(LedgerError::ClaimInFlight(claim_key));
            }
        }

        // Gateway failures from here leave the claim unresolved; the next
        // redelivery past the staleness window re-executes once.
        let payment = self.gateway.fetch_payment(payment_id).await?;

        let applied = match payment.status {
            GatewayPaymentStatus::Pending => {
                return Err(LedgerError::GatewayUnavailable(format!(
                    "payment {} still pending at gateway",
                    payment_id
                )));
            }
            GatewayPaymentStatus::Approved => self.apply_approved(payment_id, &payment).await,
            GatewayPaymentStatus::Rejected | GatewayPaymentStatus::Cancelled => {
                self.apply_rejected(payment_id, &payment).await
            }
        };

        match applied {
            Ok(result) => {
                self.record(&claim_key, &result).await?;
                Ok(CallbackResponse {
                    duplicate: false,
                    result,
                })
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                // Terminal failure: record it so replays short-circuit
                // instead of hammering a permanently broken payment.
                tracing::error!(
                    payment_id = %payment_id,
                    error = %e,
                    "Payment confirmation failed terminally"
                );
                let result = CallbackResult {
                    disposition: Disposition::Invalid,
                    intent_id: None,
                    owner_id: None,
                    entitlement_id: None,
                    credited: None,
                    balance: None,
                    error: Some(e.to_string()),
                };
                self.record(&claim_key, &result).await?;
                Err(e)
            }
        }
    }

    async fn record(&self, claim_key: &str, result: &CallbackResult) -> LedgerResult<()> {
        let value = serde_json::to_value(result).map_err(|e| {
            LedgerError::InvariantViolation(format!("outcome does not serialize: {}", e))
        })?;
        self.guard.resolve(claim_key, &value).await
    }

    /// Approved payment: confirm the intent and apply its effect
    async fn apply_approved(
        &self,
        payment_id: &str,
        payment: &GatewayPayment,
    ) -> LedgerResult<CallbackResult> {
        let token = payment.correlation_token.as_deref().ok_or_else(|| {
            LedgerError::CorrelationInvalid(format!(
                "payment {} carries no correlation token",
                payment_id
            ))
        })?;

        // Validate against the stored intent before committing a terminal
        // status: an amount mismatch must not confirm anything.
        let pending = self.intents.find_by_token(token).await?;
        if payment.amount_cents != pending.price_cents {
            return Err(LedgerError::InvariantViolation(format!(
                "payment {} amount {} does not match intent {} price {}",
                payment_id, payment.amount_cents, pending.id, pending.price_cents
            )));
        }

        let resolved = self
            .intents
            .resolve_intent(token, IntentStatus::Confirmed)
            .await?;
        let intent = resolved.intent;

        let package_id = intent.package_id.ok_or_else(|| {
            LedgerError::InvariantViolation(format!("intent {} has no package", intent.id))
        })?;
        let package = self.packages.get(package_id).await?;

        let mut result = CallbackResult {
            disposition: Disposition::Applied,
            intent_id: Some(intent.id),
            owner_id: Some(intent.owner_id),
            entitlement_id: None,
            credited: None,
            balance: None,
            error: None,
        };

        match intent.kind.entitlement_kind() {
            // Credit pack: deliver credits, keyed by the payment id so a
            // recovered re-execution credits once.
            None => {
                let delta = self
                    .balances
                    .apply_delta(
                        intent.owner_id,
                        package.credit_amount,
                        LedgerCategory::Purchase,
                        &format!("Compra: {}", package.name),
                        Some(payment_id),
                        &format!("payment:{}", payment_id),
                    )
                    .await?;
                result.credited = Some(package.credit_amount);
                result.balance = Some(delta.balance);
                self.notifier
                    .credits_added(intent.owner_id, package.credit_amount, delta.balance)
                    .await;
            }
            Some(kind) => {
                let entitlement = self.grant_once(payment_id, &intent, kind, &package).await?;
                result.entitlement_id = Some(entitlement.id);
                self.notifier
                    .entitlement_activated(intent.owner_id, entitlement.id, &kind.to_string())
                    .await;
            }
        }

        self.commissions
            .apply(intent.owner_id, intent.kind, intent.price_cents, payment_id)
            .await?;

        tracing::info!(
            payment_id = %payment_id,
            intent_id = %intent.id,
            owner_id = %intent.owner_id,
            kind = %intent.kind,
            "Applied payment confirmation"
        );

        Ok(result)
    }

    /// Grant keyed by payment id: a recovered re-execution finds the
    /// existing grant instead of granting twice.
    async fn grant_once(
        &self,
        payment_id: &str,
        intent: &vitrine_shared::OrderIntent,
        kind: EntitlementKind,
        package: &vitrine_shared::CreditPackage,
    ) -> LedgerResult<vitrine_shared::Entitlement> {
        if let Some(existing) = self.entitlements.find_by_source_ref(payment_id).await? {
            return Ok(existing);
        }

        // Subscriptions renew by default; boosts and PPV unlocks are
        // one-shot unless the owner opts in later.
        let auto_renew = matches!(
            intent.kind,
            PurchaseKind::PremiumPlan | PurchaseKind::ContentSubscription
        );

        // Renewal package recorded even for one-shot grants, so the owner
        // can turn auto-renew on later.
        self.entitlements
            .grant(GrantParams {
                owner_id: intent.owner_id,
                kind,
                target: intent.target,
                duration: package.duration(),
                auto_renew,
                renewal_package: Some(package.id),
                source_ref: Some(payment_id.to_string()),
            })
            .await
    }

    /// Rejected or cancelled payment: terminal, no mutation
    async fn apply_rejected(
        &self,
        payment_id: &str,
        payment: &GatewayPayment,
    ) -> LedgerResult<CallbackResult> {
        let token = payment.correlation_token.as_deref().ok_or_else(|| {
            LedgerError::CorrelationInvalid(format!(
                "payment {} carries no correlation token",
                payment_id
            ))
        })?;

        let resolved = self
            .intents
            .resolve_intent(token, IntentStatus::Rejected)
            .await?;
        let intent = resolved.intent;

        // Notify on the first resolution only; replays stay silent.
        if resolved.transitioned {
            self.notifier
                .payment_declined(intent.owner_id, intent.id)
                .await;
        }

        tracing::info!(
            payment_id = %payment_id,
            intent_id = %intent.id,
            "Payment rejected by gateway, intent closed"
        );

        Ok(CallbackResult {
            disposition: Disposition::Rejected,
            intent_id: Some(intent.id),
            owner_id: Some(intent.owner_id),
            entitlement_id: None,
            credited: None,
            balance: None,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_deserializes_gateway_shape() {
        let callback: PaymentCallback =
            serde_json::from_str(r#"{"type":"payment","externalPaymentId":"pay_abc123"}"#)
                .unwrap();
        assert_eq!(callback.event_type, "payment");
        assert_eq!(callback.external_payment_id, "pay_abc123");
    }

    #[test]
    fn test_stored_outcome_round_trips() {
        let result = CallbackResult {
            disposition: Disposition::Applied,
            intent_id: Some(Uuid::new_v4()),
            owner_id: Some(Uuid::new_v4()),
            entitlement_id: None,
            credited: Some(100),
            balance: Some(100),
            error: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        let back: CallbackResult = serde_json::from_value(value).unwrap();
        assert_eq!(back.disposition, Disposition::Applied);
        assert_eq!(back.credited, Some(100));
        assert_eq!(back.intent_id, result.intent_id);
    }

    #[test]
    fn test_disposition_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(Disposition::Applied).unwrap(),
            serde_json::json!("applied")
        );
        assert_eq!(
            serde_json::to_value(Disposition::Rejected).unwrap(),
            serde_json::json!("rejected")
        );
    }
}
