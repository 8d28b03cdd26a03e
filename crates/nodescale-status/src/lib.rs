//! nodescale-status — the operator-facing record of what the autoscaler
//! decided and why.

pub mod collector;

pub use collector::{LogCollector, LogItem, LogLevel, DEFAULT_ITEM_LIFETIME, DEFAULT_MAX_ITEMS};
