//! Notification Emitter
//!
//! Fire-and-forget side channel informing users of balance changes,
//! entitlement transitions, renewal outcomes and commissions. The engine
//! never blocks on delivery: a failed insert is logged at warn and
//! swallowed. Delivery to the user's device/inbox is an external
//! collaborator reading the notifications table.

use sqlx::PgPool;
use uuid::Uuid;

use vitrine_shared::NotificationKind;

#[derive(Clone)]
pub struct Notifier {
    pool: PgPool,
}

impl Notifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a notification. Best-effort: errors are logged, never
    /// propagated.
    pub async fn notify(
        &self,
        owner_id: Uuid,
        kind: NotificationKind,
        title: &str,
        body: &str,
        metadata: serde_json::Value,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (owner_id, kind, title, body, metadata)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(owner_id)
        .bind(kind)
        .bind(title)
        .bind(body)
        .bind(&metadata)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(owner_id = %owner_id, kind = %kind, "Emitted notification");
            }
            Err(e) => {
                tracing::warn!(
                    owner_id = %owner_id,
                    kind = %kind,
                    error = %e,
                    "Failed to emit notification"
                );
            }
        }
    }

    pub async fn credits_added(&self, owner_id: Uuid, credits: i64, balance: i64) {
        self.notify(
            owner_id,
            NotificationKind::CreditsAdded,
            "Créditos adicionados",
            &format!("{} créditos foram adicionados ao seu saldo.", credits),
            serde_json::json!({ "credits": credits, "balance": balance }),
        )
        .await;
    }

    pub async fn entitlement_activated(&self, owner_id: Uuid, entitlement_id: Uuid, kind: &str) {
        self.notify(
            owner_id,
            NotificationKind::EntitlementActivated,
            "Compra ativada",
            "Sua compra está ativa.",
            serde_json::json!({ "entitlement_id": entitlement_id, "kind": kind }),
        )
        .await;
    }

    pub async fn entitlement_expired(&self, owner_id: Uuid, entitlement_id: Uuid, kind: &str) {
        self.notify(
            owner_id,
            NotificationKind::EntitlementExpired,
            "Destaque encerrado",
            "Seu destaque ou assinatura chegou ao fim.",
            serde_json::json!({ "entitlement_id": entitlement_id, "kind": kind }),
        )
        .await;
    }

    pub async fn renewal_succeeded(&self, owner_id: Uuid, entitlement_id: Uuid, cost: i64) {
        self.notify(
            owner_id,
            NotificationKind::RenewalSucceeded,
            "Renovação efetuada",
            &format!("Renovado automaticamente por {} créditos.", cost),
            serde_json::json!({ "entitlement_id": entitlement_id, "cost": cost }),
        )
        .await;
    }

    pub async fn renewal_failed(
        &self,
        owner_id: Uuid,
        entitlement_id: Uuid,
        required: i64,
        available: i64,
    ) {
        self.notify(
            owner_id,
            NotificationKind::RenewalFailed,
            "Renovação não efetuada",
            &format!(
                "Saldo insuficiente para renovar: {} créditos necessários, {} disponíveis.",
                required, available
            ),
            serde_json::json!({
                "entitlement_id": entitlement_id,
                "required": required,
                "available": available,
            }),
        )
        .await;
    }

    pub async fn payment_declined(&self, owner_id: Uuid, intent_id: Uuid) {
        self.notify(
            owner_id,
            NotificationKind::PaymentDeclined,
            "Pagamento recusado",
            "Seu pagamento foi recusado pela operadora. Nenhum valor foi cobrado.",
            serde_json::json!({ "intent_id": intent_id }),
        )
        .await;
    }

    pub async fn commission_earned(&self, affiliate_id: Uuid, commission_cents: i64) {
        self.notify(
            affiliate_id,
            NotificationKind::CommissionEarned,
            "Comissão recebida",
            &format!(
                "Você recebeu R$ {},{:02} de comissão de indicação.",
                commission_cents / 100,
                commission_cents % 100
            ),
            serde_json::json!({ "commission_cents": commission_cents }),
        )
        .await;
    }
}
