//! Session argument strings.
//!
//! Session requests carry an ASCII argument string of comma-separated
//! `key=value` pairs, for example
//!
//! ```text
//! ram_quota=8K, cap_quota=4, label="app -> log", diag=yes
//! ```
//!
//! Numeric values accept a `K`, `M` or `G` suffix. String values may be
//! double-quoted, which allows them to contain commas.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ArgsError;
use crate::types::label::SessionLabel;
use crate::types::quota::{CapQuota, RamQuota, Resources};

/// Key of the RAM quota argument.
pub const RAM_QUOTA: &str = "ram_quota";

/// Key of the cap quota argument.
pub const CAP_QUOTA: &str = "cap_quota";

/// Key of the label argument.
pub const LABEL: &str = "label";

/// Key of the diagnostics argument.
pub const DIAG: &str = "diag";

/// Diagnostic flags of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diag {
    /// Whether the provider should emit diagnostics for this session
    pub enabled: bool,
}

/// A parsed session argument string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionArgs {
    entries: Vec<(String, String)>,
}

impl SessionArgs {
    /// Create an empty argument string.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an argument string.
    ///
    /// # Errors
    ///
    /// Returns [`ArgsError::Malformed`] if an element lacks a `key=` part or
    /// a quoted value is not terminated.
    pub fn parse(input: &str) -> Result<Self, ArgsError> {
        let mut entries = Vec::new();

        for element in split_elements(input)? {
            let element = element.trim();
            if element.is_empty() {
                continue;
            }

            let (key, value) = element
                .split_once('=')
                .ok_or_else(|| ArgsError::Malformed(element.to_string()))?;

            let key = key.trim();
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ArgsError::Malformed(element.to_string()));
            }

            entries.push((key.to_string(), value.trim().to_string()));
        }

        Ok(Self { entries })
    }

    /// The argument string carrying an upgrade delta.
    pub fn upgrade(ram_quota: RamQuota, cap_quota: CapQuota) -> Self {
        let mut args = Self::new();
        args.set(RAM_QUOTA, ram_quota.to_string());
        args.set(CAP_QUOTA, cap_quota.to_string());
        args
    }

    /// The raw value of `key`, with surrounding quotes removed.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| unquote(v))
    }

    /// Check whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Interpret `key` as a number, falling back to `default` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`ArgsError::InvalidValue`] if the value is not a number.
    pub fn ulong(&self, key: &str, default: u64) -> Result<u64, ArgsError> {
        match self.get(key) {
            Some(value) => parse_ulong(value).ok_or_else(|| ArgsError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            }),
            None => Ok(default),
        }
    }

    /// The RAM quota donated with the request.
    pub fn ram_quota(&self) -> Result<RamQuota, ArgsError> {
        self.ulong(RAM_QUOTA, 0).map(RamQuota)
    }

    /// The cap quota donated with the request.
    pub fn cap_quota(&self) -> Result<CapQuota, ArgsError> {
        self.ulong(CAP_QUOTA, 0).map(CapQuota)
    }

    /// Both quotas donated with the request.
    pub fn resources(&self) -> Result<Resources, ArgsError> {
        Ok(Resources::new(self.ram_quota()?, self.cap_quota()?))
    }

    /// The requester's label, empty if absent.
    pub fn label(&self) -> SessionLabel {
        self.get(LABEL).map(SessionLabel::from).unwrap_or_default()
    }

    /// The diagnostic flags.
    pub fn diag(&self) -> Diag {
        let enabled = matches!(
            self.get(DIAG).map(str::to_ascii_lowercase).as_deref(),
            Some("yes" | "true" | "1")
        );
        Diag { enabled }
    }

    /// Set `key` to `value`, replacing an existing entry in place.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    /// Set the label, quoting it.
    pub fn set_label(&mut self, label: &SessionLabel) {
        self.set(LABEL, format!("\"{}\"", label));
    }

    /// Remove `key`.
    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the argument string is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for SessionArgs {
    type Err = ArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SessionArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

fn split_elements(input: &str) -> Result<Vec<&str>, ArgsError> {
    let mut elements = Vec::new();
    let mut start = 0;
    let mut quoted = false;

    for (i, c) in input.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                elements.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if quoted {
        return Err(ArgsError::Malformed(input.to_string()));
    }
    elements.push(&input[start..]);
    Ok(elements)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_ulong(value: &str) -> Option<u64> {
    let value = value.trim();
    let (digits, factor) = match value.char_indices().last()? {
        (i, 'K' | 'k') => (&value[..i], 1u64 << 10),
        (i, 'M' | 'm') => (&value[..i], 1u64 << 20),
        (i, 'G' | 'g') => (&value[..i], 1u64 << 30),
        _ => (value, 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quotas_and_label() {
        let args =
            SessionArgs::parse("ram_quota=8K, cap_quota=4, label=\"app -> log, main\"").unwrap();

        assert_eq!(args.ram_quota().unwrap(), RamQuota(8192));
        assert_eq!(args.cap_quota().unwrap(), CapQuota(4));
        assert_eq!(args.label().as_str(), "app -> log, main");
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_missing_quota_defaults_to_zero() {
        let args = SessionArgs::parse("label=\"x\"").unwrap();
        assert_eq!(
            args.resources().unwrap(),
            Resources::new(RamQuota(0), CapQuota(0))
        );
    }

    #[test]
    fn test_size_suffixes() {
        let args = SessionArgs::parse("a=2M, b=1G, c=17").unwrap();
        assert_eq!(args.ulong("a", 0).unwrap(), 2 * 1024 * 1024);
        assert_eq!(args.ulong("b", 0).unwrap(), 1024 * 1024 * 1024);
        assert_eq!(args.ulong("c", 0).unwrap(), 17);
        assert_eq!(args.ulong("d", 9).unwrap(), 9);
    }

    #[test]
    fn test_invalid_values() {
        let args = SessionArgs::parse("ram_quota=lots").unwrap();
        assert_eq!(
            args.ram_quota(),
            Err(ArgsError::InvalidValue {
                key: "ram_quota".into(),
                value: "lots".into()
            })
        );

        assert!(SessionArgs::parse("ram_quota").is_err());
        assert!(SessionArgs::parse("label=\"open").is_err());
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut args = SessionArgs::parse("ram_quota=1, label=\"a\", cap_quota=2").unwrap();
        args.set_label(&SessionLabel::from("b -> a"));

        assert_eq!(
            args.to_string(),
            "ram_quota=1, label=\"b -> a\", cap_quota=2"
        );
    }

    #[test]
    fn test_upgrade_args_format() {
        let args = SessionArgs::upgrade(RamQuota(4096), CapQuota(2));
        assert_eq!(args.to_string(), "ram_quota=4096, cap_quota=2");
    }

    #[test]
    fn test_diag() {
        assert!(SessionArgs::parse("diag=yes").unwrap().diag().enabled);
        assert!(!SessionArgs::parse("diag=no").unwrap().diag().enabled);
        assert!(!SessionArgs::new().diag().enabled);
    }

    #[test]
    fn test_empty_string() {
        let args = SessionArgs::parse("").unwrap();
        assert!(args.is_empty());
    }
}
