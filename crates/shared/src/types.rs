//! Common types used across the Vitrine monetization engine

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// What a user is paying for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PurchaseKind {
    CreditPack,
    Boost,
    PremiumPlan,
    ContentSubscription,
    PpvUnlock,
}

impl PurchaseKind {
    /// The entitlement kind delivered by this purchase, if any.
    /// Credit packs deliver credits, not an entitlement.
    pub fn entitlement_kind(&self) -> Option<EntitlementKind> {
        match self {
            Self::CreditPack => None,
            Self::Boost => Some(EntitlementKind::Boost),
            Self::PremiumPlan => Some(EntitlementKind::PremiumPlan),
            Self::ContentSubscription => Some(EntitlementKind::ContentSubscription),
            Self::PpvUnlock => Some(EntitlementKind::PpvUnlock),
        }
    }
}

impl std::fmt::Display for PurchaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreditPack => write!(f, "credit_pack"),
            Self::Boost => write!(f, "boost"),
            Self::PremiumPlan => write!(f, "premium_plan"),
            Self::ContentSubscription => write!(f, "content_subscription"),
            Self::PpvUnlock => write!(f, "ppv_unlock"),
        }
    }
}

impl std::str::FromStr for PurchaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "credit_pack" => Ok(Self::CreditPack),
            "boost" => Ok(Self::Boost),
            "premium_plan" => Ok(Self::PremiumPlan),
            "content_subscription" => Ok(Self::ContentSubscription),
            "ppv_unlock" => Ok(Self::PpvUnlock),
            _ => Err(format!("Invalid purchase kind: {}", s)),
        }
    }
}

/// Order intent lifecycle; becomes terminal exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Pending,
    Confirmed,
    Rejected,
    Expired,
}

impl IntentStatus {
    /// Whether this status is terminal (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Kind of time-boxed grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntitlementKind {
    Boost,
    PremiumPlan,
    ContentSubscription,
    PpvUnlock,
}

impl std::fmt::Display for EntitlementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boost => write!(f, "boost"),
            Self::PremiumPlan => write!(f, "premium_plan"),
            Self::ContentSubscription => write!(f, "content_subscription"),
            Self::PpvUnlock => write!(f, "ppv_unlock"),
        }
    }
}

/// Entitlement lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntitlementStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl EntitlementStatus {
    /// Whether the grant currently confers access
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for EntitlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Category of a signed ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerCategory {
    Purchase,
    Spend,
    Renewal,
    MissionReward,
    Commission,
    Refund,
}

impl std::fmt::Display for LedgerCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Purchase => write!(f, "purchase"),
            Self::Spend => write!(f, "spend"),
            Self::Renewal => write!(f, "renewal"),
            Self::MissionReward => write!(f, "mission_reward"),
            Self::Commission => write!(f, "commission"),
            Self::Refund => write!(f, "refund"),
        }
    }
}

/// Commission payout status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Approved,
    Paid,
}

impl std::fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Paid => write!(f, "paid"),
        }
    }
}

/// User-facing notification categories emitted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CreditsAdded,
    EntitlementActivated,
    EntitlementExpired,
    RenewalSucceeded,
    RenewalFailed,
    PaymentDeclined,
    CommissionEarned,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreditsAdded => write!(f, "credits_added"),
            Self::EntitlementActivated => write!(f, "entitlement_activated"),
            Self::EntitlementExpired => write!(f, "entitlement_expired"),
            Self::RenewalSucceeded => write!(f, "renewal_succeeded"),
            Self::RenewalFailed => write!(f, "renewal_failed"),
            Self::PaymentDeclined => write!(f, "payment_declined"),
            Self::CommissionEarned => write!(f, "commission_earned"),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Cached credit balance. The ledger is the source of truth; amount must
/// reconcile with the sum of ledger deltas for the owner at all times.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Balance {
    pub owner_id: Uuid,
    pub amount: i64,
    pub lifetime_earned: i64,
    pub lifetime_spent: i64,
    pub updated_at: OffsetDateTime,
}

/// Immutable, signed record of a balance change
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub delta: i64,
    pub category: LedgerCategory,
    pub reason: String,
    pub external_ref: Option<String>,
    pub idempotency_key: String,
    pub balance_after: i64,
    pub created_at: OffsetDateTime,
}

/// Pending record of a purchase, created before gateway confirmation
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderIntent {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: PurchaseKind,
    pub target: Option<Uuid>,
    pub package_id: Option<Uuid>,
    pub price_cents: i64,
    pub correlation_token: String,
    pub status: IntentStatus,
    pub created_at: OffsetDateTime,
    pub resolved_at: Option<OffsetDateTime>,
}

/// Time-boxed grant of visibility or content access
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Entitlement {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: EntitlementKind,
    pub target: Option<Uuid>,
    pub starts_at: OffsetDateTime,
    pub ends_at: OffsetDateTime,
    pub status: EntitlementStatus,
    pub auto_renew: bool,
    pub renewal_package: Option<Uuid>,
    pub renewal_count: i32,
    pub source_ref: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Catalog entry: what can be bought, for how much, and for how long
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditPackage {
    pub id: Uuid,
    pub kind: PurchaseKind,
    pub name: String,
    /// Gateway price in centavos
    pub price_cents: i64,
    /// Cost in credits for credit-funded purchases and renewals
    pub credit_cost: i64,
    /// Credits delivered (credit packs only)
    pub credit_amount: i64,
    pub duration_hours: i32,
    pub active: bool,
    pub created_at: OffsetDateTime,
}

impl CreditPackage {
    /// Grant duration for entitlement-delivering packages
    pub fn duration(&self) -> time::Duration {
        time::Duration::hours(self.duration_hours as i64)
    }
}

/// Affiliate relationship, created once per referred user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AffiliateReferral {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub referred_user_id: Uuid,
    pub transaction_count: i64,
    pub total_revenue_cents: i64,
    pub total_commission_cents: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One commission per qualifying transaction; rate is a snapshot
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Commission {
    pub id: Uuid,
    pub affiliate_id: Uuid,
    pub referral_id: Uuid,
    pub transaction_kind: PurchaseKind,
    pub amount_cents: i64,
    pub rate_pct: i32,
    pub commission_cents: i64,
    pub status: CommissionStatus,
    pub source_ref: String,
    pub created_at: OffsetDateTime,
}

/// Durable record behind the fire-and-forget notification emitter
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purchase_kind_display_and_parse() {
        assert_eq!(PurchaseKind::CreditPack.to_string(), "credit_pack");
        assert_eq!(PurchaseKind::PpvUnlock.to_string(), "ppv_unlock");
        assert_eq!(
            "boost".parse::<PurchaseKind>().unwrap(),
            PurchaseKind::Boost
        );
        assert_eq!(
            "PREMIUM_PLAN".parse::<PurchaseKind>().unwrap(),
            PurchaseKind::PremiumPlan
        );
        assert!("invalid".parse::<PurchaseKind>().is_err());
    }

    #[test]
    fn test_purchase_kind_entitlement_mapping() {
        assert_eq!(PurchaseKind::CreditPack.entitlement_kind(), None);
        assert_eq!(
            PurchaseKind::Boost.entitlement_kind(),
            Some(EntitlementKind::Boost)
        );
        assert_eq!(
            PurchaseKind::ContentSubscription.entitlement_kind(),
            Some(EntitlementKind::ContentSubscription)
        );
    }

    #[test]
    fn test_intent_status_terminal() {
        assert!(!IntentStatus::Pending.is_terminal());
        assert!(IntentStatus::Confirmed.is_terminal());
        assert!(IntentStatus::Rejected.is_terminal());
        assert!(IntentStatus::Expired.is_terminal());
    }

    #[test]
    fn test_entitlement_status_live() {
        assert!(EntitlementStatus::Active.is_live());
        assert!(!EntitlementStatus::Pending.is_live());
        assert!(!EntitlementStatus::Expired.is_live());
        assert!(!EntitlementStatus::Cancelled.is_live());
    }

    #[test]
    fn test_ledger_category_display() {
        assert_eq!(LedgerCategory::Purchase.to_string(), "purchase");
        assert_eq!(LedgerCategory::MissionReward.to_string(), "mission_reward");
        assert_eq!(LedgerCategory::Commission.to_string(), "commission");
    }

    #[test]
    fn test_package_duration() {
        let pkg = CreditPackage {
            id: Uuid::new_v4(),
            kind: PurchaseKind::Boost,
            name: "Destaque 24h".to_string(),
            price_cents: 1500,
            credit_cost: 15,
            credit_amount: 0,
            duration_hours: 24,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        };
        assert_eq!(pkg.duration(), time::Duration::hours(24));
    }
}
