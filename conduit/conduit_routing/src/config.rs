//! Routing configuration.
//!
//! Handles loading, validating and merging route rule lists. Files are
//! parsed as TOML or JSON depending on their extension.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::Router;
use crate::model::RouteRule;

/// Errors that can occur in configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// File format of a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// TOML
    Toml,

    /// JSON
    Json,
}

impl Format {
    /// Pick the format from a file extension. Anything but `.json` is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Parse configuration text.
pub fn parse<T: DeserializeOwned>(content: &str, format: Format) -> Result<T> {
    let parsed: T = match format {
        Format::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?
        }
        Format::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?
        }
    };
    Ok(parsed)
}

/// Read and parse a configuration file.
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .map_err(|e| ConfigError::LoadFailed(e.to_string()))
        .context(format!(
            "Failed to read configuration file: {}",
            path.display()
        ))?;

    parse(&content, Format::from_path(path)).context(format!(
        "Failed to parse configuration file: {}",
        path.display()
    ))
}

/// Routing configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Route rules, tried in order
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

impl RoutingConfig {
    /// Create a configuration from a rule list.
    pub fn new(routes: Vec<RouteRule>) -> Self {
        Self { routes }
    }

    /// Load configuration from a file
    ///
    /// A missing file yields the empty configuration, which denies every
    /// request.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) if path.exists() => {
                info!("Loading routing configuration from {}", path.display());
                read::<Self>(path)?
            }
            Some(path) => {
                warn!("Routing configuration not found: {}", path.display());
                Self::default()
            }
            None => {
                info!("No routing configuration specified, every request will be denied");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (index, rule) in self.routes.iter().enumerate() {
            rule.validate()
                .map_err(|e| ConfigError::Invalid(format!("route {}: {}", index, e)))?;
        }

        if self.routes.is_empty() {
            warn!("Routing configuration contains no routes");
        }

        Ok(())
    }

    /// Merge with another configuration
    ///
    /// The other configuration's routes take precedence.
    pub fn merge(&mut self, other: RoutingConfig) {
        let mut routes = other.routes;
        routes.append(&mut self.routes);
        self.routes = routes;
    }

    /// Build a router for the configuration.
    pub fn router(&self) -> Router {
        Router::new(self.routes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LabelMatcher, RouteTarget, ServiceMatcher};

    const TOML: &str = r#"
        [[routes]]
        service = "Log"
        label = { prefix = "app" }
        target = { local = "log" }

        [[routes]]
        service = "*"
        label = { last = "shell" }
        target = { child = "fs" }
        label_override = "shell"

        [[routes]]
        service = "Terminal"
        target = { parent = { rename = "Uart" } }

        [[routes]]
        target = { parent = {} }
    "#;

    #[test]
    fn test_parse_toml() {
        let config: RoutingConfig = parse(TOML, Format::Toml).unwrap();
        assert_eq!(config.routes.len(), 4);

        let first = &config.routes[0];
        assert_eq!(first.service, ServiceMatcher::Name("Log".into()));
        assert_eq!(first.label, LabelMatcher::Prefix("app".into()));
        assert_eq!(first.target, RouteTarget::Local("log".into()));

        assert_eq!(config.routes[1].service, ServiceMatcher::Any);
        assert_eq!(config.routes[1].label_override.as_deref(), Some("shell"));
        assert_eq!(
            config.routes[2].target,
            RouteTarget::Parent {
                rename: Some("Uart".into())
            }
        );
        assert_eq!(config.routes[3].label, LabelMatcher::Any);
        assert_eq!(config.routes[3].target, RouteTarget::parent());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"routes": [
            {"service": "Log", "label": "any", "target": {"child": "logger"}}
        ]}"#;
        let config: RoutingConfig = parse(json, Format::Json).unwrap();
        assert_eq!(config.routes[0].target, RouteTarget::Child("logger".into()));
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = RoutingConfig::new(vec![RouteRule::new(
            "Log",
            LabelMatcher::Any,
            RouteTarget::parent(),
        )]);
        let other = RoutingConfig::new(vec![RouteRule::new(
            "Log",
            LabelMatcher::Any,
            RouteTarget::Local("log".into()),
        )]);

        base.merge(other);
        assert_eq!(base.routes.len(), 2);
        assert_eq!(base.routes[0].target, RouteTarget::Local("log".into()));
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let config = RoutingConfig::new(vec![RouteRule::new(
            "Log",
            LabelMatcher::Any,
            RouteTarget::Local(String::new()),
        )]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path(Path::new("a/routes.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("routes.toml")), Format::Toml);
        assert_eq!(Format::from_path(Path::new("routes")), Format::Toml);
    }
}
