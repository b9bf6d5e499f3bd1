//! Credit Ledger
//!
//! Every balance change appends exactly one immutable entry here; the
//! ledger is the audit trail, the denormalized account balance is the
//! authoritative current state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a credit delta was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    /// Metered chat completion
    ChatUsage,
    /// Metered image generation
    ImageGeneration,
    /// Metered video generation
    VideoGeneration,
    /// One-time credit pack purchase
    OneTimePack,
    /// Immediate grant at subscription activation or renewal
    SubscriptionCycle,
    /// Installment delivered by the schedule processor
    SubscriptionSchedule,
    /// Sign-up bonus
    RegistrationBonus,
    /// Manual operator adjustment
    Adjustment,
    /// Refund of a prior deduction
    Refund,
}

impl LedgerReason {
    /// Stable snake_case tag, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatUsage => "chat_usage",
            Self::ImageGeneration => "image_generation",
            Self::VideoGeneration => "video_generation",
            Self::OneTimePack => "one_time_pack",
            Self::SubscriptionCycle => "subscription_cycle",
            Self::SubscriptionSchedule => "subscription_schedule",
            Self::RegistrationBonus => "registration_bonus",
            Self::Adjustment => "adjustment",
            Self::Refund => "refund",
        }
    }
}

impl std::fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable credit delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry id
    pub id: Uuid,
    /// Account the delta applies to
    pub user_id: Uuid,
    /// Signed amount; positive = grant, negative = deduction
    pub delta: i64,
    /// Category of the change
    pub reason: LedgerReason,
    /// Correlation to an external payment, if payment-sourced
    pub payment_id: Option<String>,
    /// Correlation to a caller-side record (e.g. a generation-history row)
    pub reference_id: Option<String>,
    /// When the entry was appended
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// New grant entry (positive delta)
    pub fn grant(user_id: Uuid, amount: i64, reason: LedgerReason) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            delta: amount,
            reason,
            payment_id: None,
            reference_id: None,
            created_at: Utc::now(),
        }
    }

    /// New deduction entry (negative delta)
    pub fn deduction(user_id: Uuid, amount: i64, reason: LedgerReason) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            delta: -amount,
            reason,
            payment_id: None,
            reference_id: None,
            created_at: Utc::now(),
        }
    }

    /// Attach an external payment id
    pub fn with_payment(mut self, payment_id: impl Into<String>) -> Self {
        self.payment_id = Some(payment_id.into());
        self
    }

    /// Attach a caller-side correlation id
    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&LedgerReason::OneTimePack).unwrap();
        assert_eq!(json, "\"one_time_pack\"");

        let back: LedgerReason = serde_json::from_str("\"subscription_schedule\"").unwrap();
        assert_eq!(back, LedgerReason::SubscriptionSchedule);
    }

    #[test]
    fn test_entry_constructors_sign_the_delta() {
        let user = Uuid::new_v4();
        let grant = LedgerEntry::grant(user, 50, LedgerReason::OneTimePack).with_payment("pay_1");
        assert_eq!(grant.delta, 50);
        assert_eq!(grant.payment_id.as_deref(), Some("pay_1"));

        let deduction = LedgerEntry::deduction(user, 10, LedgerReason::ChatUsage).with_reference("gen_1");
        assert_eq!(deduction.delta, -10);
        assert_eq!(deduction.reference_id.as_deref(), Some("gen_1"));
    }
}
