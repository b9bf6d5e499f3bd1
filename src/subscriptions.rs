//! Subscription Schedules
//!
//! Owns the one-row-per-subscription schedule table and the composed
//! activation/renewal operation the payment webhook calls. A renewal
//! fully replaces whatever the prior cycle left behind; there is no
//! merging of old and new remaining amounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::balance::BalanceService;
use crate::error::{CreditError, CreditResult};
use crate::ledger::LedgerReason;
use crate::plans::PlanCatalog;
use crate::schedule::{self, DerivedSchedule, InitialGrant, InstallmentSchedule};
use crate::store::{CreditStore, StoreTx};

/// What a subscription payment event produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleActivation {
    /// Subscription the cycle belongs to
    pub subscription_id: String,
    /// Plan that was activated or renewed
    pub plan_key: String,
    /// Credits granted immediately
    pub granted_now: i64,
    /// Balance after the immediate grant
    pub balance: i64,
    /// Remainder left for the processor, when the plan installs
    pub schedule: Option<InstallmentSchedule>,
    /// True when the payment was already applied and nothing changed
    pub duplicate: bool,
}

/// Schedule store plus the webhook-facing cycle application
#[derive(Clone)]
pub struct SubscriptionService {
    store: CreditStore,
    balances: BalanceService,
    plans: PlanCatalog,
}

impl SubscriptionService {
    /// Service over shared store, balances, and catalog
    pub fn new(store: CreditStore, balances: BalanceService, plans: PlanCatalog) -> Self {
        Self {
            store,
            balances,
            plans,
        }
    }

    /// Apply one subscription billing cycle: grant the immediate
    /// portion and persist the remainder as an installment schedule,
    /// atomically. Called on first activation and on every renewal.
    ///
    /// Replaying the same `payment_id` is a no-op that leaves any
    /// in-flight schedule untouched.
    pub fn apply_subscription_cycle(
        &self,
        user_id: Uuid,
        subscription_id: &str,
        plan_key: &str,
        payment_id: Option<&str>,
    ) -> CreditResult<CycleActivation> {
        let plan = self
            .plans
            .get(plan_key)
            .ok_or_else(|| CreditError::UnknownPlan(plan_key.to_string()))?;

        let now = Utc::now();
        let derived = schedule::derive(&plan.grant_policy, plan.credits_per_cycle);

        self.store.with_transaction(|tx| {
            if let Some(payment_id) = payment_id {
                if tx.payment_applied(payment_id) {
                    tracing::debug!(
                        payment_id,
                        subscription_id,
                        "duplicate subscription payment ignored"
                    );
                    return Ok(CycleActivation {
                        subscription_id: subscription_id.to_string(),
                        plan_key: plan_key.to_string(),
                        granted_now: 0,
                        balance: tx.balance(user_id),
                        schedule: tx.schedule(subscription_id).cloned(),
                        duplicate: true,
                    });
                }
            }

            let (granted_now, schedule_row) = match derived {
                // Whole allotment lands now; drop any stale schedule.
                None => {
                    tx.remove_schedule(subscription_id);
                    (plan.credits_per_cycle, None)
                }
                Some(derived) => {
                    let initial =
                        schedule::compute_initial_grant(&derived, plan.credits_per_cycle, now);
                    let row = Self::reset_in(
                        tx,
                        subscription_id,
                        user_id,
                        plan_key,
                        &derived,
                        &initial,
                        now,
                    );
                    (initial.credits_now, row)
                }
            };

            let balance = if granted_now > 0 {
                self.balances
                    .grant_in(tx, user_id, granted_now, LedgerReason::SubscriptionCycle, payment_id)?
                    .balance
            } else {
                // Nothing due immediately; still burn the payment id so
                // a replay cannot reset schedule progress.
                if let Some(payment_id) = payment_id {
                    tx.mark_payment_applied(payment_id);
                }
                tx.balance(user_id)
            };
            tx.set_plan(user_id, plan_key);

            tracing::info!(
                user_id = %user_id,
                subscription_id,
                plan_key,
                granted_now,
                scheduled = schedule_row.is_some(),
                "subscription cycle applied"
            );

            Ok(CycleActivation {
                subscription_id: subscription_id.to_string(),
                plan_key: plan_key.to_string(),
                granted_now,
                balance,
                schedule: schedule_row,
                duplicate: false,
            })
        })
    }

    /// Upsert or clear the schedule row for a subscription inside an
    /// open transaction. Nothing left to schedule (no remaining grants,
    /// or no computable next time) deletes any existing row.
    pub fn reset_in(
        tx: &mut StoreTx<'_>,
        subscription_id: &str,
        user_id: Uuid,
        plan_key: &str,
        derived: &DerivedSchedule,
        initial: &InitialGrant,
        now: DateTime<Utc>,
    ) -> Option<InstallmentSchedule> {
        let next_grant_at = match initial.next_grant_at {
            Some(at) if initial.grants_remaining > 0 => at,
            _ => {
                tx.remove_schedule(subscription_id);
                return None;
            }
        };

        let row = InstallmentSchedule {
            id: Uuid::new_v4(),
            subscription_id: subscription_id.to_string(),
            user_id,
            plan_key: plan_key.to_string(),
            credits_per_grant: derived.credits_per_grant,
            interval_months: derived.interval_months,
            grants_remaining: initial.grants_remaining,
            total_credits_remaining: initial.total_credits_remaining,
            next_grant_at,
            claimed_until: None,
            created_at: now,
            updated_at: now,
        };
        tx.upsert_schedule(row.clone());
        Some(row)
    }

    /// Drop a subscription's pending schedule (cancellation, or a plan
    /// without an installment policy). Returns whether a row existed.
    pub fn delete(&self, subscription_id: &str) -> bool {
        self.store
            .with_transaction(|tx| Ok(tx.remove_schedule(subscription_id).is_some()))
            .unwrap_or(false)
    }

    /// Pending schedule for a subscription, if any
    pub fn schedule(&self, subscription_id: &str) -> Option<InstallmentSchedule> {
        self.store.schedule(subscription_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::Plan;
    use crate::schedule::GrantPolicy;
    use rust_decimal_macros::dec;

    fn service() -> (SubscriptionService, CreditStore) {
        let store = CreditStore::new();
        let balances = BalanceService::new(store.clone());
        let plans = PlanCatalog::new();
        (
            SubscriptionService::new(store.clone(), balances, plans),
            store,
        )
    }

    #[test]
    fn test_activation_grants_first_installment_and_schedules_rest() {
        let (subs, store) = service();
        let user = Uuid::new_v4();

        let activation = subs
            .apply_subscription_cycle(user, "sub_1", "pro_monthly", Some("pay_1"))
            .unwrap();

        assert_eq!(activation.granted_now, 100);
        assert_eq!(activation.balance, 100);
        let row = activation.schedule.unwrap();
        assert_eq!(row.grants_remaining, 3);
        assert_eq!(row.total_credits_remaining, 300);
        assert_eq!(row.credits_per_grant, 100);

        let ledger = store.ledger_for(user);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].reason, LedgerReason::SubscriptionCycle);
        assert_eq!(store.account(user).unwrap().plan_key.as_deref(), Some("pro_monthly"));
    }

    #[test]
    fn test_all_at_once_plan_grants_everything_and_keeps_no_row() {
        let (subs, store) = service();
        let user = Uuid::new_v4();

        let activation = subs
            .apply_subscription_cycle(user, "sub_1", "free", None)
            .unwrap();

        assert_eq!(activation.granted_now, 50);
        assert!(activation.schedule.is_none());
        assert!(store.schedule("sub_1").is_none());
    }

    #[test]
    fn test_renewal_fully_replaces_remaining_state() {
        let (subs, store) = service();
        let user = Uuid::new_v4();

        subs.apply_subscription_cycle(user, "sub_1", "pro_monthly", Some("pay_1"))
            .unwrap();

        // Pretend the processor drained one installment
        store
            .with_transaction(|tx| {
                let mut row = tx.schedule("sub_1").unwrap().clone();
                row.grants_remaining = 2;
                row.total_credits_remaining = 200;
                tx.upsert_schedule(row);
                Ok(())
            })
            .unwrap();

        let renewal = subs
            .apply_subscription_cycle(user, "sub_1", "pro_monthly", Some("pay_2"))
            .unwrap();

        // New cycle's counters, not 2+3 or 200+300
        let row = renewal.schedule.unwrap();
        assert_eq!(row.grants_remaining, 3);
        assert_eq!(row.total_credits_remaining, 300);
    }

    #[test]
    fn test_renewal_onto_all_at_once_plan_drops_stale_schedule() {
        let (subs, store) = service();
        let user = Uuid::new_v4();

        subs.apply_subscription_cycle(user, "sub_1", "pro_monthly", Some("pay_1"))
            .unwrap();
        assert!(store.schedule("sub_1").is_some());

        subs.apply_subscription_cycle(user, "sub_1", "free", Some("pay_2"))
            .unwrap();
        assert!(store.schedule("sub_1").is_none());
    }

    #[test]
    fn test_webhook_replay_is_a_no_op() {
        let (subs, store) = service();
        let user = Uuid::new_v4();

        subs.apply_subscription_cycle(user, "sub_1", "pro_monthly", Some("pay_1"))
            .unwrap();
        let before = store.schedule("sub_1").unwrap();

        let replay = subs
            .apply_subscription_cycle(user, "sub_1", "pro_monthly", Some("pay_1"))
            .unwrap();

        assert!(replay.duplicate);
        assert_eq!(replay.granted_now, 0);
        assert_eq!(replay.balance, 100);
        assert_eq!(store.schedule("sub_1").unwrap(), before);
        assert_eq!(store.ledger_for(user).len(), 1);
    }

    #[test]
    fn test_unknown_plan_is_rejected() {
        let (subs, _) = service();
        let err = subs
            .apply_subscription_cycle(Uuid::new_v4(), "sub_1", "nope", None)
            .unwrap_err();
        assert_eq!(err, CreditError::UnknownPlan("nope".into()));
    }

    #[test]
    fn test_zero_initial_grants_burn_the_payment_id() {
        let (subs, store) = service();
        let user = Uuid::new_v4();
        subs.plans.upsert(Plan {
            key: "deferred".into(),
            name: "Deferred".into(),
            monthly_price: dec!(10),
            credits_per_cycle: 200,
            grant_policy: GrantPolicy::Installments {
                grants_per_cycle: 2,
                interval_months: 1,
                credits_per_grant: None,
                initial_grants: 0,
            },
        });

        let activation = subs
            .apply_subscription_cycle(user, "sub_1", "deferred", Some("pay_1"))
            .unwrap();
        assert_eq!(activation.granted_now, 0);
        assert_eq!(activation.schedule.unwrap().grants_remaining, 2);
        assert!(store.ledger_for(user).is_empty());

        // Replay must not reset the schedule even though nothing was granted
        let replay = subs
            .apply_subscription_cycle(user, "sub_1", "deferred", Some("pay_1"))
            .unwrap();
        assert!(replay.duplicate);
    }

    #[test]
    fn test_delete_clears_pending_schedule() {
        let (subs, _) = service();
        let user = Uuid::new_v4();

        subs.apply_subscription_cycle(user, "sub_1", "pro_monthly", None)
            .unwrap();
        assert!(subs.schedule("sub_1").is_some());
        assert!(subs.delete("sub_1"));
        assert!(subs.schedule("sub_1").is_none());
        assert!(!subs.delete("sub_1"));
    }
}
