//! Error types for the credit core

use thiserror::Error;

/// Credit core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CreditError {
    /// Deduction attempted against a balance too low
    #[error("insufficient credits: need {required}, have {available}")]
    InsufficientCredits {
        /// Credits the operation required
        required: i64,
        /// Credits actually available
        available: i64,
    },

    /// Zero or negative amount passed to a mutation
    #[error("invalid credit amount: {0}")]
    InvalidAmount(i64),

    /// Plan key not present in the catalog
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    /// Schedule row whose next grant cannot be computed
    #[error("malformed schedule for subscription {subscription_id}: {detail}")]
    MalformedSchedule {
        /// Subscription owning the schedule
        subscription_id: String,
        /// What was wrong with the row
        detail: String,
    },

    /// Underlying storage failure
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for the credit core
pub type CreditResult<T> = Result<T, CreditError>;
