//! Referral accounting primitives for the NodeHost platform.
//!
//! The crate performs no I/O; the service layer feeds it
//! rows from whatever store it is wired to:
//!
//! * [`address`]: case-insensitive wallet addresses and the sentinel
//!   "no parent" values.
//! * [`forest`]: team sizes, upline chains, hierarchy edges and per-depth
//!   team statistics over the referral forest.
//! * [`commission`]: multi-level commission payouts for purchases and node
//!   earnings.
//! * [`earnings`]: the earnings rollup (team rewards vs node income).
//! * [`tier`]: membership tier derivation from balance and spot price.

pub mod address;
pub mod commission;
pub mod earnings;
pub mod forest;
pub mod tier;

mod error;

pub use address::WalletAddress;
pub use error::ReferralError;
pub use forest::ReferralForest;
pub use tier::{MembershipTier, TierThresholds};
