use thiserror::Error;

/// Errors raised while validating referral inputs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferralError {
    /// The string cannot be used as a wallet address.
    #[error("invalid wallet address: {0:?}")]
    InvalidAddress(String),

    /// Tier thresholds must satisfy `0 <= mid < top`.
    #[error("tier thresholds must be ascending and non-negative (mid={mid}, top={top})")]
    InvalidThresholds { mid: String, top: String },

    /// Commission plan rejected (too many levels or a rate above 100%).
    #[error("invalid commission plan: {0}")]
    InvalidPlan(&'static str),

    /// Unknown membership tier label.
    #[error("unknown membership tier {0:?}")]
    UnknownTier(String),

    #[error("unknown commission kind {0:?}")]
    UnknownCommissionKind(String),
}
