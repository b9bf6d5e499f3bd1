//! Credit Ledger
//!
//! Billing core for a credit-based SaaS product: metered actions spend
//! credits, purchases and subscriptions grant them, and an append-only
//! ledger audits every change.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        CREDIT PLATFORM                           │
//! │                                                                  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │   Balance    │  │    Plan      │  │     Subscription       │  │
//! │  │   Service    │  │   Catalog    │  │  Schedules (reset/del) │  │
//! │  └──────┬───────┘  └──────────────┘  └───────────┬────────────┘  │
//! │         │                                        │               │
//! │  ┌──────▼────────────────────────────────────────▼────────────┐  │
//! │  │  CREDIT STORE — accounts | ledger | payments | schedules   │  │
//! │  │  one transaction per mutation, lease-claims on schedules   │  │
//! │  └──────────────────────────────▲──────────────────────────────┘  │
//! │                                 │                                │
//! │                     ┌───────────┴───────────┐                    │
//! │                     │  Schedule Processor   │  ◄── cron/timer    │
//! │                     │  (due-installment     │                    │
//! │                     │   sweep, catch-up)    │                    │
//! │                     └───────────────────────┘                    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Collaborators call in-process: usage-metering API routes check and
//! deduct, payment webhook handlers grant and reset schedules, and a
//! periodic trigger drains due installments.

#![warn(missing_docs)]

pub mod balance;
pub mod error;
pub mod ledger;
pub mod plans;
pub mod processor;
pub mod schedule;
pub mod store;
pub mod subscriptions;

use std::sync::Arc;

use uuid::Uuid;

pub use balance::{BalanceChange, BalanceService};
pub use error::{CreditError, CreditResult};
pub use ledger::{LedgerEntry, LedgerReason};
pub use plans::{Plan, PlanCatalog};
pub use processor::{ProcessorConfig, ScheduleProcessor, SweepSummary};
pub use schedule::{DerivedSchedule, GrantPolicy, InitialGrant, InstallmentSchedule};
pub use store::{CreditStore, UserAccount};
pub use subscriptions::{CycleActivation, SubscriptionService};

/// Credit platform façade: one shared store wired into every service
pub struct CreditPlatform {
    store: CreditStore,
    /// Balance reads and mutations
    pub balances: BalanceService,
    /// Plan definitions
    pub plans: PlanCatalog,
    /// Subscription schedule handling
    pub subscriptions: SubscriptionService,
    /// Due-installment sweep
    pub processor: Arc<ScheduleProcessor>,
}

impl CreditPlatform {
    /// Platform with default plans and processor tuning
    pub fn new() -> Self {
        Self::with_config(ProcessorConfig::default())
    }

    /// Platform with explicit processor tuning
    pub fn with_config(config: ProcessorConfig) -> Self {
        let store = CreditStore::new();
        let balances = BalanceService::new(store.clone());
        let plans = PlanCatalog::new();
        let subscriptions =
            SubscriptionService::new(store.clone(), balances.clone(), plans.clone());
        let processor = Arc::new(ScheduleProcessor::with_config(
            store.clone(),
            balances.clone(),
            config,
        ));
        Self {
            store,
            balances,
            plans,
            subscriptions,
            processor,
        }
    }

    /// Underlying store, for read-side queries
    pub fn store(&self) -> &CreditStore {
        &self.store
    }

    /// Current credits for a user
    pub fn balance(&self, user_id: Uuid) -> i64 {
        self.balances.balance(user_id)
    }

    /// Whether a user can pay for a metered action
    pub fn can_afford(&self, user_id: Uuid, amount: i64) -> bool {
        self.balances.can_afford(user_id, amount)
    }

    /// Deduct credits for a metered action (chat, image, video),
    /// correlating the ledger entry to a caller-side record
    pub fn charge_usage(
        &self,
        user_id: Uuid,
        amount: i64,
        reason: LedgerReason,
        reference_id: Option<&str>,
    ) -> CreditResult<BalanceChange> {
        self.balances.deduct(user_id, amount, reason, reference_id)
    }

    /// Grant a purchased one-time credit pack
    pub fn apply_one_time_pack(
        &self,
        user_id: Uuid,
        credits: i64,
        payment_id: &str,
    ) -> CreditResult<BalanceChange> {
        self.balances
            .grant(user_id, credits, LedgerReason::OneTimePack, Some(payment_id))
    }

    /// Grant the sign-up bonus
    pub fn grant_registration_bonus(
        &self,
        user_id: Uuid,
        credits: i64,
    ) -> CreditResult<BalanceChange> {
        self.balances
            .grant(user_id, credits, LedgerReason::RegistrationBonus, None)
    }

    /// Return credits from a refunded action
    pub fn refund(
        &self,
        user_id: Uuid,
        credits: i64,
        reference_id: Option<&str>,
    ) -> CreditResult<BalanceChange> {
        self.balances.refund(user_id, credits, reference_id)
    }

    /// Apply a subscription payment event (activation or renewal)
    pub fn apply_subscription_cycle(
        &self,
        user_id: Uuid,
        subscription_id: &str,
        plan_key: &str,
        payment_id: Option<&str>,
    ) -> CreditResult<CycleActivation> {
        self.subscriptions
            .apply_subscription_cycle(user_id, subscription_id, plan_key, payment_id)
    }

    /// Drop a cancelled subscription's pending schedule
    pub fn cancel_subscription_schedule(&self, subscription_id: &str) -> bool {
        self.subscriptions.delete(subscription_id)
    }

    /// Sweep due installment schedules now
    pub fn process_due_schedules(&self) -> CreditResult<Vec<SweepSummary>> {
        self.processor.process_due_schedules()
    }

    /// A user's full audit trail, oldest first
    pub fn ledger_for(&self, user_id: Uuid) -> Vec<LedgerEntry> {
        self.store.ledger_for(user_id)
    }
}

impl Default for CreditPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signup_to_usage_to_subscription_flow() {
        let platform = CreditPlatform::new();
        let user = Uuid::new_v4();

        platform.grant_registration_bonus(user, 30).unwrap();
        assert_eq!(platform.balance(user), 30);

        assert!(platform.can_afford(user, 10));
        let change = platform
            .charge_usage(user, 10, LedgerReason::ChatUsage, Some("gen_42"))
            .unwrap();
        assert_eq!(change.balance, 20);

        let activation = platform
            .apply_subscription_cycle(user, "sub_1", "pro_monthly", Some("pay_1"))
            .unwrap();
        assert_eq!(activation.granted_now, 100);
        assert_eq!(platform.balance(user), 120);

        // audit trail stays faithful to the balance
        let sum: i64 = platform.ledger_for(user).iter().map(|e| e.delta).sum();
        assert_eq!(sum, platform.balance(user));
    }

    #[test]
    fn test_refund_restores_credits() {
        let platform = CreditPlatform::new();
        let user = Uuid::new_v4();

        platform.apply_one_time_pack(user, 50, "pay_1").unwrap();
        platform
            .charge_usage(user, 20, LedgerReason::VideoGeneration, Some("gen_1"))
            .unwrap();
        let change = platform.refund(user, 20, Some("gen_1")).unwrap();

        assert_eq!(change.balance, 50);
        let ledger = platform.ledger_for(user);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger[2].reason, LedgerReason::Refund);
        assert_eq!(ledger[2].reference_id.as_deref(), Some("gen_1"));
    }

    #[test]
    fn test_cancellation_drops_the_schedule() {
        let platform = CreditPlatform::new();
        let user = Uuid::new_v4();

        platform
            .apply_subscription_cycle(user, "sub_1", "pro_yearly", Some("pay_1"))
            .unwrap();
        assert!(platform.subscriptions.schedule("sub_1").is_some());

        assert!(platform.cancel_subscription_schedule("sub_1"));
        assert!(platform.subscriptions.schedule("sub_1").is_none());
        // nothing left for the sweep
        assert!(platform.process_due_schedules().unwrap().is_empty());
    }
}
