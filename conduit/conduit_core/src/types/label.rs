//! Hierarchical session labels.
//!
//! Each component that forwards a session request prepends its own name,
//! so a label reads from the outermost forwarder to the original client:
//! `"init -> app -> worker"`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between label elements.
pub const SEPARATOR: &str = " -> ";

/// Label identifying the client of a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionLabel(String);

impl SessionLabel {
    /// Create a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The label as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the label is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The label with `prefix` prepended as a new outermost element.
    pub fn prefixed(&self, prefix: &str) -> Self {
        match (prefix.is_empty(), self.is_empty()) {
            (true, _) => self.clone(),
            (false, true) => Self(prefix.to_string()),
            (false, false) => Self(format!("{}{}{}", prefix, SEPARATOR, self.0)),
        }
    }

    /// The innermost element of the label.
    pub fn last_element(&self) -> &str {
        self.0.rsplit(SEPARATOR).next().unwrap_or("")
    }

    /// The outermost element of the label.
    pub fn first_element(&self) -> &str {
        self.0.split(SEPARATOR).next().unwrap_or("")
    }

    /// Check whether the label starts with `prefix`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Check whether the label ends with `suffix`.
    pub fn ends_with(&self, suffix: &str) -> bool {
        self.0.ends_with(suffix)
    }
}

impl fmt::Display for SessionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionLabel {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

impl From<String> for SessionLabel {
    fn from(label: String) -> Self {
        Self(label)
    }
}
