//! Installment Schedules
//!
//! A subscription cycle's credit allotment can be delivered all at once
//! or split into periodic installments. The deriver here is pure: it
//! maps a plan's grant policy to concrete counters without touching
//! storage, so activation math is testable in isolation.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_initial_grants() -> u32 {
    1
}

/// How a plan delivers its per-cycle credits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantPolicy {
    /// The whole allotment lands at activation; nothing to schedule
    AllAtOnce,
    /// The allotment is split into periodic grants
    Installments {
        /// Number of grants across one billing cycle
        grants_per_cycle: u32,
        /// Months between grants
        interval_months: u32,
        /// Credits per grant; inferred from the cycle total when absent
        credits_per_grant: Option<i64>,
        /// Grants delivered immediately at activation
        #[serde(default = "default_initial_grants")]
        initial_grants: u32,
    },
}

/// Concrete installment parameters derived from a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedSchedule {
    /// Grants across one billing cycle (≥1)
    pub grants_per_cycle: u32,
    /// Months between grants (≥1)
    pub interval_months: u32,
    /// Credits per grant (≥1)
    pub credits_per_grant: i64,
    /// Grants delivered at activation (≤ grants_per_cycle)
    pub initial_grants: u32,
}

/// What activation delivers now and leaves scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialGrant {
    /// Credits granted immediately
    pub credits_now: i64,
    /// Grants left for the processor
    pub grants_remaining: u32,
    /// Credits left for the processor
    pub total_credits_remaining: i64,
    /// First due time, when anything remains
    pub next_grant_at: Option<DateTime<Utc>>,
}

/// Map a plan's grant policy to concrete installment parameters.
///
/// `AllAtOnce` needs no schedule and yields `None`. Degenerate inputs
/// are clamped rather than rejected: counts floor at 1, the initial
/// grant count caps at the cycle's grant count, and an inferred
/// per-grant amount floors at 1 so integer division never produces
/// zero-size grants.
pub fn derive(policy: &GrantPolicy, total_credits_per_cycle: i64) -> Option<DerivedSchedule> {
    match policy {
        GrantPolicy::AllAtOnce => None,
        GrantPolicy::Installments {
            grants_per_cycle,
            interval_months,
            credits_per_grant,
            initial_grants,
        } => {
            let grants_per_cycle = (*grants_per_cycle).max(1);
            let interval_months = (*interval_months).max(1);
            let credits_per_grant = credits_per_grant
                .unwrap_or(total_credits_per_cycle / i64::from(grants_per_cycle))
                .max(1);
            let initial_grants = (*initial_grants).min(grants_per_cycle);

            Some(DerivedSchedule {
                grants_per_cycle,
                interval_months,
                credits_per_grant,
                initial_grants,
            })
        }
    }
}

/// Split a cycle's allotment into the immediate grant and the remainder.
///
/// The immediate portion is capped at the cycle total, so the sum of
/// all grants across the cycle never exceeds the plan's allotment.
pub fn compute_initial_grant(
    derived: &DerivedSchedule,
    total_credits_per_cycle: i64,
    now: DateTime<Utc>,
) -> InitialGrant {
    let immediate = derived.initial_grants.min(derived.grants_per_cycle);
    let credits_now = total_credits_per_cycle.min(derived.credits_per_grant * i64::from(immediate));
    let grants_remaining = derived.grants_per_cycle - immediate;
    let total_credits_remaining = (total_credits_per_cycle - credits_now).max(0);

    let next_grant_at = if grants_remaining > 0 {
        now.checked_add_months(Months::new(derived.interval_months))
    } else {
        None
    };

    InitialGrant {
        credits_now,
        grants_remaining,
        total_credits_remaining,
        next_grant_at,
    }
}

/// One pending installment schedule, keyed by subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentSchedule {
    /// Row id
    pub id: Uuid,
    /// Owning subscription (unique key)
    pub subscription_id: String,
    /// Account receiving the grants
    pub user_id: Uuid,
    /// Plan the schedule was derived from
    pub plan_key: String,
    /// Credits per installment, fixed for the schedule's lifetime
    pub credits_per_grant: i64,
    /// Months between installments
    pub interval_months: u32,
    /// Installments left to deliver
    pub grants_remaining: u32,
    /// Credits left to deliver
    pub total_credits_remaining: i64,
    /// When the next installment is due
    pub next_grant_at: DateTime<Utc>,
    /// Processor lease; an unexpired claim hides the row from other sweeps
    pub claimed_until: Option<DateTime<Utc>>,
    /// When the row was created
    pub created_at: DateTime<Utc>,
    /// Last counter update
    pub updated_at: DateTime<Utc>,
}

impl InstallmentSchedule {
    /// Due when the next grant time has passed and grants remain
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.grants_remaining > 0 && self.next_grant_at <= now
    }

    pub(crate) fn claim_active(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.map(|t| t > now).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_all_at_once_needs_no_schedule() {
        assert_eq!(derive(&GrantPolicy::AllAtOnce, 400), None);
    }

    #[test]
    fn test_derive_clamps_degenerate_policies() {
        let derived = derive(
            &GrantPolicy::Installments {
                grants_per_cycle: 0,
                interval_months: 0,
                credits_per_grant: None,
                initial_grants: 9,
            },
            400,
        )
        .unwrap();

        assert_eq!(derived.grants_per_cycle, 1);
        assert_eq!(derived.interval_months, 1);
        assert_eq!(derived.credits_per_grant, 400);
        assert_eq!(derived.initial_grants, 1);
    }

    #[test]
    fn test_inferred_per_grant_amount_floors_at_one() {
        let derived = derive(
            &GrantPolicy::Installments {
                grants_per_cycle: 10,
                interval_months: 1,
                credits_per_grant: None,
                initial_grants: 1,
            },
            3,
        )
        .unwrap();

        assert_eq!(derived.credits_per_grant, 1);
    }

    #[test]
    fn test_pro_monthly_activation_split() {
        // 400 credits over 4 monthly installments, first delivered now
        let derived = derive(
            &GrantPolicy::Installments {
                grants_per_cycle: 4,
                interval_months: 1,
                credits_per_grant: None,
                initial_grants: 1,
            },
            400,
        )
        .unwrap();
        assert_eq!(derived.credits_per_grant, 100);

        let now = at(2025, 1, 15);
        let initial = compute_initial_grant(&derived, 400, now);

        assert_eq!(initial.credits_now, 100);
        assert_eq!(initial.grants_remaining, 3);
        assert_eq!(initial.total_credits_remaining, 300);
        assert_eq!(initial.next_grant_at, Some(at(2025, 2, 15)));
    }

    #[test]
    fn test_zero_initial_grants_schedules_everything() {
        let derived = derive(
            &GrantPolicy::Installments {
                grants_per_cycle: 2,
                interval_months: 3,
                credits_per_grant: None,
                initial_grants: 0,
            },
            500,
        )
        .unwrap();

        let now = at(2025, 6, 1);
        let initial = compute_initial_grant(&derived, 500, now);

        assert_eq!(initial.credits_now, 0);
        assert_eq!(initial.grants_remaining, 2);
        assert_eq!(initial.total_credits_remaining, 500);
        assert_eq!(initial.next_grant_at, Some(at(2025, 9, 1)));
    }

    #[test]
    fn test_full_initial_grants_leave_nothing_scheduled() {
        let derived = derive(
            &GrantPolicy::Installments {
                grants_per_cycle: 2,
                interval_months: 1,
                credits_per_grant: None,
                initial_grants: 2,
            },
            401,
        )
        .unwrap();

        let initial = compute_initial_grant(&derived, 401, at(2025, 3, 1));

        // 2 × 200 capped at the 401 total
        assert_eq!(initial.credits_now, 400);
        assert_eq!(initial.grants_remaining, 0);
        assert_eq!(initial.next_grant_at, None);
    }

    #[test]
    fn test_immediate_credits_capped_at_cycle_total() {
        let derived = derive(
            &GrantPolicy::Installments {
                grants_per_cycle: 3,
                interval_months: 1,
                credits_per_grant: Some(200),
                initial_grants: 3,
            },
            500,
        )
        .unwrap();

        let initial = compute_initial_grant(&derived, 500, at(2025, 3, 1));
        assert_eq!(initial.credits_now, 500);
        assert_eq!(initial.total_credits_remaining, 0);
    }
}
