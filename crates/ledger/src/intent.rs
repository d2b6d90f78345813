//! Order Intent Registry
//!
//! Records a pending purchase before the external payment is confirmed.
//! The correlation token is server-generated, stored server-side, and
//! looked up (never trusted) when the gateway echoes it back at
//! confirmation time. An intent becomes terminal exactly once; intents
//! left pending past the TTL are swept to expired and cannot be resolved
//! afterwards.

use sqlx::PgPool;
use time::Duration;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use vitrine_shared::{IntentStatus, OrderIntent, PurchaseKind};

/// Token prefix for intent correlation payloads
const TOKEN_PREFIX: &str = "oi_";

/// Generate an opaque correlation token for a new intent
fn generate_token() -> String {
    format!("{}{}", TOKEN_PREFIX, Uuid::new_v4().simple())
}

/// Validate the shape of an externally supplied correlation token.
/// Malformed payloads are rejected, never panicked on.
pub fn validate_token(token: &str) -> LedgerResult<()> {
    let hex = token
        .strip_prefix(TOKEN_PREFIX)
        .ok_or_else(|| LedgerError::CorrelationInvalid(format!("bad prefix: {:.16}", token)))?;

    if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(LedgerError::CorrelationInvalid(format!(
            "malformed token body: {:.40}",
            token
        )));
    }

    Ok(())
}

/// An intent after a resolution attempt
#[derive(Debug, Clone)]
pub struct ResolvedIntent {
    pub intent: OrderIntent,
    /// False when the intent was already terminal and this call changed
    /// nothing
    pub transitioned: bool,
}

#[derive(Clone)]
pub struct IntentRegistry {
    pool: PgPool,
}

impl IntentRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pending intent before redirecting the user to the gateway.
    /// The returned intent carries the correlation token to attach to the
    /// payment request.
    pub async fn create_intent(
        &self,
        owner_id: Uuid,
        kind: PurchaseKind,
        target: Option<Uuid>,
        package_id: Option<Uuid>,
        price_cents: i64,
    ) -> LedgerResult<OrderIntent> {
        let token = generate_token();

        let intent: OrderIntent = sqlx::query_as(
            r#"
            INSERT INTO order_intents
                (owner_id, kind, target, package_id, price_cents, correlation_token)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, owner_id, kind, target, package_id, price_cents,
                      correlation_token, status, created_at, resolved_at
            "#,
        )
        .bind(owner_id)
        .bind(kind)
        .bind(target)
        .bind(package_id)
        .bind(price_cents)
        .bind(&token)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            intent_id = %intent.id,
            owner_id = %owner_id,
            kind = %kind,
            price_cents = price_cents,
            "Created order intent"
        );

        Ok(intent)
    }

    /// Transition an intent to a terminal outcome exactly once.
    ///
    /// A second resolution attempt for an already-terminal intent returns
    /// the stored row with `transitioned = false` so callers can
    /// short-circuit. Resolving an expired intent is an error and is never
    /// retried.
    pub async fn resolve_intent(
        &self,
        correlation_token: &str,
        outcome: IntentStatus,
    ) -> LedgerResult<ResolvedIntent> {
        validate_token(correlation_token)?;

        debug_assert!(outcome.is_terminal());

        let transitioned: Option<OrderIntent> = sqlx::query_as(
            r#"
            UPDATE order_intents
            SET status = $2, resolved_at = NOW()
            WHERE correlation_token = $1 AND status = 'pending'
            RETURNING id, owner_id, kind, target, package_id, price_cents,
                      correlation_token, status, created_at, resolved_at
            "#,
        )
        .bind(correlation_token)
        .bind(outcome)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(intent) = transitioned {
            tracing::info!(
                intent_id = %intent.id,
                status = %intent.status,
                "Resolved order intent"
            );
            return Ok(ResolvedIntent {
                intent,
                transitioned: true,
            });
        }

        // Not pending: distinguish unknown, expired, and already terminal.
        let existing: Option<OrderIntent> = sqlx::query_as(
            r#"
            SELECT id, owner_id, kind, target, package_id, price_cents,
                   correlation_token, status, created_at, resolved_at
            FROM order_intents
            WHERE correlation_token = $1
            "#,
        )
        .bind(correlation_token)
        .fetch_optional(&self.pool)
        .await?;

        let intent = existing.ok_or_else(|| {
            LedgerError::CorrelationInvalid(format!("unknown token: {:.40}", correlation_token))
        })?;

        match intent.status {
            IntentStatus::Expired => Err(LedgerError::IntentExpired(intent.id)),
            status if status == outcome => Ok(ResolvedIntent {
                intent,
                transitioned: false,
            }),
            _ => {
                tracing::warn!(
                    intent_id = %intent.id,
                    stored = %intent.status,
                    requested = %outcome,
                    "Conflicting re-resolution of a terminal intent"
                );
                Err(LedgerError::IntentAlreadyResolved(intent.id))
            }
        }
    }

    /// Sweep pending intents older than the TTL to expired.
    /// Returns the number of intents expired.
    pub async fn expire_pending(&self, ttl: Duration) -> LedgerResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE order_intents
            SET status = 'expired', resolved_at = NOW()
            WHERE status = 'pending'
              AND created_at < NOW() - ($1 || ' seconds')::INTERVAL
            "#,
        )
        .bind(ttl.whole_seconds())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(
                expired = result.rows_affected(),
                "Expired stale order intents"
            );
        }

        Ok(result.rows_affected())
    }

    /// Look up an intent by its correlation token without transitioning it.
    /// Used to validate gateway data against the stored intent before
    /// committing to a terminal status.
    pub async fn find_by_token(&self, correlation_token: &str) -> LedgerResult<OrderIntent> {
        validate_token(correlation_token)?;

        let intent: Option<OrderIntent> = sqlx::query_as(
            r#"
            SELECT id, owner_id, kind, target, package_id, price_cents,
                   correlation_token, status, created_at, resolved_at
            FROM order_intents
            WHERE correlation_token = $1
            "#,
        )
        .bind(correlation_token)
        .fetch_optional(&self.pool)
        .await?;

        intent.ok_or_else(|| {
            LedgerError::CorrelationInvalid(format!("unknown token: {:.40}", correlation_token))
        })
    }

    pub async fn get(&self, intent_id: Uuid) -> LedgerResult<OrderIntent> {
        let intent: Option<OrderIntent> = sqlx::query_as(
            r#"
            SELECT id, owner_id, kind, target, package_id, price_cents,
                   correlation_token, status, created_at, resolved_at
            FROM order_intents
            WHERE id = $1
            "#,
        )
        .bind(intent_id)
        .fetch_optional(&self.pool)
        .await?;

        intent.ok_or_else(|| LedgerError::NotFound(format!("order intent {}", intent_id)))
    }

    pub async fn list_for_owner(
        &self,
        owner_id: Uuid,
        limit: i64,
    ) -> LedgerResult<Vec<OrderIntent>> {
        let intents: Vec<OrderIntent> = sqlx::query_as(
            r#"
            SELECT id, owner_id, kind, target, package_id, price_cents,
                   correlation_token, status, created_at, resolved_at
            FROM order_intents
            WHERE owner_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(intents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_validate() {
        let token = generate_token();
        assert!(token.starts_with("oi_"));
        assert!(validate_token(&token).is_ok());
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        for bad in [
            "",
            "oi_",
            "not-a-token",
            "oi_short",
            "oi_zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz",
            "pi_0123456789abcdef0123456789abcdef",
            "oi_0123456789abcdef0123456789abcdef00",
        ] {
            let err = validate_token(bad).expect_err(bad);
            assert!(
                matches!(err, LedgerError::CorrelationInvalid(_)),
                "expected CorrelationInvalid for {:?}, got {:?}",
                bad,
                err
            );
        }
    }
}
