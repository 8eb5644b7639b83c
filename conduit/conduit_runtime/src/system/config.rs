//! Configuration for the Conduit runtime
//!
//! Handles loading and managing broker configuration.

use std::path::Path;

use anyhow::Result;
use conduit_routing::config::read;
use conduit_routing::{ConfigError, RouteRule, RoutingConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::service::DEFAULT_RETRY_LIMIT;

/// State report configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Whether state reports are generated
    #[serde(default = "default_report_enabled")]
    pub enabled: bool,

    /// Whether reports list each session's quota, yes unless set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_resources: Option<bool>,
}

fn default_report_enabled() -> bool {
    true
}

impl ReportConfig {
    /// Whether reports list each session's quota.
    pub fn include_resources(&self) -> bool {
        self.include_resources.unwrap_or(true)
    }

    /// Whether report options are set that have no effect.
    pub fn has_ignored_options(&self) -> bool {
        !self.enabled && self.include_resources.is_some()
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: default_report_enabled(),
            include_resources: None,
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Attempts a parent service makes before giving up on a request
    #[serde(default = "default_parent_retry_limit")]
    pub parent_retry_limit: usize,

    /// RAM quota assumed when a request names none
    #[serde(default)]
    pub default_ram_quota: u64,

    /// Cap quota assumed when a request names none
    #[serde(default)]
    pub default_cap_quota: u64,

    /// State report configuration
    #[serde(default)]
    pub report: ReportConfig,

    /// Route rules, tried in order
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

fn default_parent_retry_limit() -> usize {
    DEFAULT_RETRY_LIMIT
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parent_retry_limit: default_parent_retry_limit(),
            default_ram_quota: 0,
            default_cap_quota: 0,
            report: ReportConfig::default(),
            routes: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Start with default configuration
        let mut config = RuntimeConfig::default();

        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());

            if !path.exists() {
                warn!("Configuration file not found: {}", path.display());
                return Ok(config);
            }

            config = read(path)?;
        } else {
            info!("No configuration file specified, using defaults");
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.parent_retry_limit == 0 {
            return Err(
                ConfigError::Invalid("Parent retry limit cannot be zero".to_string()).into(),
            );
        }

        self.routing().validate()?;

        if self.report.has_ignored_options() {
            warn!("Report options are set but reports are disabled");
        }

        Ok(())
    }

    /// The routing part of the configuration.
    pub fn routing(&self) -> RoutingConfig {
        RoutingConfig::new(self.routes.clone())
    }

    /// Merge with another configuration
    pub fn merge(&mut self, other: RuntimeConfig) {
        if other.parent_retry_limit > 0 {
            self.parent_retry_limit = other.parent_retry_limit;
        }

        if other.default_ram_quota > 0 {
            self.default_ram_quota = other.default_ram_quota;
        }

        if other.default_cap_quota > 0 {
            self.default_cap_quota = other.default_cap_quota;
        }

        self.report = other.report;

        // The other configuration's routes take precedence
        let mut routing = self.routing();
        routing.merge(RoutingConfig::new(other.routes));
        self.routes = routing.routes;
    }
}
