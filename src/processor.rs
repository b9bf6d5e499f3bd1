//! Schedule Processor
//!
//! Periodic sweep that finds due installment schedules, grants the
//! next installment(s), and advances or retires each row. Safe to run
//! from several instances at once: selected rows are leased, so
//! overlapping sweeps partition the due set instead of double-granting.

use std::sync::Arc;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::balance::BalanceService;
use crate::error::CreditResult;
use crate::ledger::LedgerReason;
use crate::store::CreditStore;

/// Sweep tuning knobs
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Max schedules picked up per sweep
    pub batch_limit: usize,
    /// Max installments applied to one schedule per sweep; bounds how
    /// far a long-dead processor catches up in a single pass
    pub catch_up_per_schedule: u32,
    /// How long a selected row stays hidden from other sweeps
    pub claim_lease: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            catch_up_per_schedule: 12,
            claim_lease: Duration::minutes(5),
        }
    }
}

/// Per-schedule result of one sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    /// Schedule row id
    pub schedule_id: Uuid,
    /// Owning subscription
    pub subscription_id: String,
    /// Account that received the grants
    pub user_id: Uuid,
    /// Credits granted across this sweep
    pub total_granted: i64,
    /// Installments applied
    pub grants_processed: u32,
    /// Installments still pending afterwards
    pub remaining_grants: u32,
}

/// Drains due installment schedules
pub struct ScheduleProcessor {
    store: CreditStore,
    balances: BalanceService,
    config: ProcessorConfig,
}

impl ScheduleProcessor {
    /// Processor with default tuning
    pub fn new(store: CreditStore, balances: BalanceService) -> Self {
        Self::with_config(store, balances, ProcessorConfig::default())
    }

    /// Processor with explicit tuning
    pub fn with_config(store: CreditStore, balances: BalanceService, config: ProcessorConfig) -> Self {
        Self {
            store,
            balances,
            config,
        }
    }

    /// Sweep now
    pub fn process_due_schedules(&self) -> CreditResult<Vec<SweepSummary>> {
        self.process_due_schedules_at(Utc::now())
    }

    /// Sweep as of `now`. One transaction covers selection, leasing,
    /// grants, and counter updates, so a failure mid-sweep leaves no
    /// half-applied installment.
    pub fn process_due_schedules_at(&self, now: DateTime<Utc>) -> CreditResult<Vec<SweepSummary>> {
        let summaries = self.store.with_transaction(|tx| {
            let due = tx.claim_due_schedules(now, self.config.batch_limit, self.config.claim_lease);
            let mut summaries = Vec::new();

            for mut sched in due {
                let mut processed = 0u32;
                let mut granted = 0i64;

                while sched.grants_remaining > 0
                    && sched.total_credits_remaining > 0
                    && sched.next_grant_at <= now
                    && processed < self.config.catch_up_per_schedule
                {
                    // The final installment absorbs the rounding
                    // remainder; earlier ones never overshoot the total.
                    let amount = if sched.grants_remaining == 1 {
                        sched.total_credits_remaining
                    } else {
                        sched.credits_per_grant.min(sched.total_credits_remaining)
                    };
                    if amount <= 0 {
                        tracing::warn!(
                            subscription_id = %sched.subscription_id,
                            credits_per_grant = sched.credits_per_grant,
                            "malformed schedule, skipping"
                        );
                        break;
                    }

                    self.balances.grant_in(
                        tx,
                        sched.user_id,
                        amount,
                        LedgerReason::SubscriptionSchedule,
                        None,
                    )?;

                    sched.grants_remaining -= 1;
                    sched.total_credits_remaining =
                        (sched.total_credits_remaining - amount).max(0);
                    match sched
                        .next_grant_at
                        .checked_add_months(Months::new(sched.interval_months))
                    {
                        Some(next) => sched.next_grant_at = next,
                        None => {
                            tracing::warn!(
                                subscription_id = %sched.subscription_id,
                                "schedule next grant time overflowed, skipping"
                            );
                            break;
                        }
                    }

                    processed += 1;
                    granted += amount;
                }

                if processed == 0 {
                    // Leave the lease in place; the row resurfaces when
                    // it expires instead of hot-looping this sweep.
                    continue;
                }

                if sched.grants_remaining == 0 || sched.total_credits_remaining <= 0 {
                    tx.remove_schedule(&sched.subscription_id);
                } else {
                    sched.claimed_until = None;
                    sched.updated_at = now;
                    tx.upsert_schedule(sched.clone());
                }

                summaries.push(SweepSummary {
                    schedule_id: sched.id,
                    subscription_id: sched.subscription_id.clone(),
                    user_id: sched.user_id,
                    total_granted: granted,
                    grants_processed: processed,
                    remaining_grants: sched.grants_remaining,
                });
            }

            Ok(summaries)
        })?;

        if !summaries.is_empty() {
            let credits: i64 = summaries.iter().map(|s| s.total_granted).sum();
            tracing::info!(
                schedules = summaries.len(),
                credits,
                "installment sweep granted credits"
            );
            if let Ok(detail) = serde_json::to_string(&summaries) {
                tracing::debug!(%detail, "sweep detail");
            }
        }

        Ok(summaries)
    }

    /// Background runner: sweep on an interval until `shutdown` flips
    /// to true (or its sender is dropped).
    pub async fn run(
        self: Arc<Self>,
        every: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(every);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.process_due_schedules() {
                        Ok(summaries) if summaries.is_empty() => {
                            tracing::debug!("installment sweep found nothing due");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "installment sweep failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("installment sweep runner stopped");
    }
}
