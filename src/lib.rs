//! NodeHost admin service: member REST API, admin dashboard API and the
//! batch jobs around the referral forest.

pub mod api;
pub mod auth;
pub mod config;
pub mod devices;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod service;
pub mod store;

pub use api::{router, AppState};
pub use config::AppConfig;
pub use error::ApiError;
