//! Real-time health-risk aggregation for a school health monitor.
//!
//! Change triggers from the backing store drive an [`engine::AggregationEngine`]
//! that refetches bounded windows of check-ins and notifications, merges them
//! with live outbreak alerts, and publishes per-user dashboard state.

pub mod alerts;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod feed;
pub mod models;
pub mod outbreak;
pub mod reads;
pub mod report;
pub mod risk;
pub mod store;

pub use engine::{AggregationEngine, EngineOptions, Snapshot};
pub use error::{EngineError, OutbreakFeedError, StoreError};
pub use models::{DerivedState, Role, Session};
