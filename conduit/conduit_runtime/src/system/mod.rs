//! System-level concerns of the runtime.

pub mod config;

pub use config::{ReportConfig, RuntimeConfig};
