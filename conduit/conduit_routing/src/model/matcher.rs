//! Service and label matchers.

use conduit_core::SessionLabel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Selects requests by service name.
///
/// Serialized as the service name, or `"*"` for any service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceMatcher {
    /// Any service
    #[default]
    Any,

    /// The service with exactly this name
    Name(String),
}

impl ServiceMatcher {
    /// Check whether `service` is selected.
    pub fn matches(&self, service: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Name(name) => name == service,
        }
    }
}

impl From<String> for ServiceMatcher {
    fn from(name: String) -> Self {
        if name == "*" {
            Self::Any
        } else {
            Self::Name(name)
        }
    }
}

impl From<&str> for ServiceMatcher {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<ServiceMatcher> for String {
    fn from(matcher: ServiceMatcher) -> Self {
        match matcher {
            ServiceMatcher::Any => "*".to_string(),
            ServiceMatcher::Name(name) => name,
        }
    }
}

impl fmt::Display for ServiceMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Selects requests by the requester's label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMatcher {
    /// Any label
    #[default]
    Any,

    /// The label equals the string
    Exact(String),

    /// The label starts with the string
    Prefix(String),

    /// The label ends with the string
    Suffix(String),

    /// The innermost label element equals the string
    Last(String),
}

impl LabelMatcher {
    /// Check whether `label` is selected.
    pub fn matches(&self, label: &SessionLabel) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(s) => label.as_str() == s,
            Self::Prefix(s) => label.starts_with(s),
            Self::Suffix(s) => label.ends_with(s),
            Self::Last(s) => label.last_element() == s,
        }
    }

    /// The matched string, if the matcher has one.
    pub fn pattern(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Exact(s) | Self::Prefix(s) | Self::Suffix(s) | Self::Last(s) => Some(s),
        }
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Exact(s) => write!(f, "label=\"{}\"", s),
            Self::Prefix(s) => write!(f, "label_prefix=\"{}\"", s),
            Self::Suffix(s) => write!(f, "label_suffix=\"{}\"", s),
            Self::Last(s) => write!(f, "label_last=\"{}\"", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_matcher() {
        assert!(ServiceMatcher::Any.matches("Log"));
        assert!(ServiceMatcher::from("Log").matches("Log"));
        assert!(!ServiceMatcher::from("Log").matches("Rom"));
        assert_eq!(ServiceMatcher::from("*"), ServiceMatcher::Any);
    }

    #[test]
    fn test_label_matchers() {
        let label = SessionLabel::from("app -> child");

        assert!(LabelMatcher::Any.matches(&label));
        assert!(LabelMatcher::Exact("app -> child".into()).matches(&label));
        assert!(!LabelMatcher::Exact("app".into()).matches(&label));
        assert!(LabelMatcher::Prefix("app".into()).matches(&label));
        assert!(!LabelMatcher::Prefix("child".into()).matches(&label));
        assert!(LabelMatcher::Suffix("child".into()).matches(&label));
        assert!(LabelMatcher::Last("child".into()).matches(&label));
        assert!(!LabelMatcher::Last("ild".into()).matches(&label));
    }
}
