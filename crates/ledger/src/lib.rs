//! Vitrine Monetization Ledger
//!
//! The ledger and entitlement-activation engine: authoritative per-user
//! credit balances over an append-only ledger, exactly-once application of
//! asynchronously delivered payment confirmations, time-boxed entitlement
//! grants, the recurring renewal sweep, and affiliate commissions.
//!
//! Correctness comes from the store's atomic transactions and
//! unique-constraint claims, not from single-threading: every mutation path
//! runs inside one transaction per logical operation, and duplicate
//! deliveries race safely on the idempotency claim.

pub mod balance;
pub mod commission;
pub mod confirmation;
pub mod entitlement;
pub mod error;
pub mod gateway;
pub mod idempotency;
pub mod intent;
pub mod notify;
pub mod packages;
pub mod purchase;
pub mod renewal;

pub use balance::{BalanceStore, DeltaOutcome, ReconcileReport};
pub use commission::CommissionService;
pub use confirmation::{CallbackResponse, ConfirmationProcessor, PaymentCallback};
pub use entitlement::{EntitlementStore, GrantParams};
pub use error::{LedgerError, LedgerResult};
pub use gateway::{GatewayClient, GatewayConfig, GatewayPayment, GatewayPaymentStatus};
pub use idempotency::{ClaimOutcome, IdempotencyGuard};
pub use intent::{IntentRegistry, ResolvedIntent};
pub use notify::Notifier;
pub use packages::PackageStore;
pub use purchase::{PurchaseReceipt, PurchaseService};
pub use renewal::{RenewalScheduler, RenewalSweepSummary};
