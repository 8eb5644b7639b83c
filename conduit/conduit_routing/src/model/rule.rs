//! Route rule model.
//!
//! A rule selects session requests by service name and requester label and
//! names the provider they are forwarded to.

use conduit_core::{RoutingError, SessionLabel};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::matcher::{LabelMatcher, ServiceMatcher};

/// Provider a rule forwards matching requests to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    /// A service implemented by this component
    Local(String),

    /// Our parent
    Parent {
        /// Name the service is requested under at the parent
        #[serde(default)]
        rename: Option<String>,
    },

    /// A child component
    Child(String),
}

impl RouteTarget {
    /// A parent target that keeps the service name.
    pub fn parent() -> Self {
        Self::Parent { rename: None }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(name) => write!(f, "local:{}", name),
            Self::Parent { rename: None } => write!(f, "parent"),
            Self::Parent {
                rename: Some(name),
            } => write!(f, "parent:{}", name),
            Self::Child(name) => write!(f, "child:{}", name),
        }
    }
}

/// A routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Which services the rule applies to.
    #[serde(default)]
    pub service: ServiceMatcher,

    /// Which requesters the rule applies to.
    #[serde(default)]
    pub label: LabelMatcher,

    /// Where matching requests go.
    pub target: RouteTarget,

    /// Label presented to the provider instead of the requester's.
    #[serde(default)]
    pub label_override: Option<String>,
}

impl RouteRule {
    /// Create a new rule.
    ///
    /// # Arguments
    ///
    /// * `service` - The service matcher.
    /// * `label` - The label matcher.
    /// * `target` - The provider matching requests are forwarded to.
    ///
    /// # Returns
    ///
    /// A new rule without label override.
    pub fn new(service: impl Into<ServiceMatcher>, label: LabelMatcher, target: RouteTarget) -> Self {
        Self {
            service: service.into(),
            label,
            target,
            label_override: None,
        }
    }

    /// Present `label` to the provider instead of the requester's label.
    pub fn with_label_override(mut self, label: impl Into<String>) -> Self {
        self.label_override = Some(label.into());
        self
    }

    /// Check whether the rule applies to a request.
    pub fn matches(&self, service: &str, label: &SessionLabel) -> bool {
        self.service.matches(service) && self.label.matches(label)
    }

    /// Check the rule for values that can never route anything.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::InvalidRule`] for empty names or patterns.
    pub fn validate(&self) -> Result<(), RoutingError> {
        if let ServiceMatcher::Name(name) = &self.service {
            if name.is_empty() {
                return Err(RoutingError::InvalidRule(
                    "service name cannot be empty".to_string(),
                ));
            }
        }

        match &self.label {
            LabelMatcher::Prefix(s) | LabelMatcher::Suffix(s) | LabelMatcher::Last(s)
                if s.is_empty() =>
            {
                return Err(RoutingError::InvalidRule(format!(
                    "empty label pattern in rule for '{}'",
                    self.service
                )));
            }
            _ => {}
        }

        let target_name = match &self.target {
            RouteTarget::Local(name) | RouteTarget::Child(name) => Some(name),
            RouteTarget::Parent { rename } => rename.as_ref(),
        };
        if target_name.is_some_and(|name| name.is_empty()) {
            return Err(RoutingError::InvalidRule(format!(
                "empty target name in rule for '{}'",
                self.service
            )));
        }

        Ok(())
    }
}

impl fmt::Display for RouteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) -> {}", self.service, self.label, self.target)
    }
}

/// The outcome of resolving a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Index of the rule that matched
    pub rule: usize,

    /// Provider the request goes to
    pub target: RouteTarget,

    /// Service name presented to the provider
    pub service: String,

    /// Label presented to the provider
    pub label: SessionLabel,
}

impl Route {
    /// Check whether the provider sees a different label than the requester sent.
    pub fn relabels(&self, label: &SessionLabel) -> bool {
        &self.label != label
    }
}
