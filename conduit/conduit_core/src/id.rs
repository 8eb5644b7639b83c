//! Unforgeable object identifiers.
//!
//! Quota accounts, capabilities and signal contexts are named by random
//! UUIDs tagged with the kind of object they name. The tag is part of the
//! type, so an account id never compares equal to, or is accepted in place
//! of, a capability id. It is also part of the textual form:
//!
//! ```
//! use conduit_core::id::{AccountId, CapabilityId};
//!
//! let account = AccountId::new();
//! assert!(account.to_string().starts_with("account:"));
//!
//! let text = "cap:550e8400-e29b-41d4-a716-446655440000";
//! let cap: CapabilityId = text.parse().unwrap();
//! assert_eq!(cap.to_string(), text);
//! assert!("account:550e8400-e29b-41d4-a716-446655440000"
//!     .parse::<CapabilityId>()
//!     .is_err());
//! ```
//!
//! Sessions are correlated by small integers instead, see [`crate::id_space`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// The kind of object an [`Id`] names.
pub trait IdKind: 'static {
    /// Tag used in the textual form.
    const TAG: &'static str;
}

/// Error parsing the textual form of an [`Id`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("expected tag '{expected}' in id '{input}'")]
    WrongTag { expected: &'static str, input: String },

    #[error("invalid uuid in id '{0}'")]
    InvalidUuid(String),
}

/// A random identifier of an object of kind `K`.
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<K: IdKind> {
    uuid: Uuid,
    #[serde(skip)]
    _kind: PhantomData<K>,
}

impl<K: IdKind> Id<K> {
    /// A fresh identifier.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _kind: PhantomData,
        }
    }
}

impl<K: IdKind> Default for Id<K> {
    fn default() -> Self {
        Self::new()
    }
}

// Derives would demand the bounds of `K`, the kind markers carry no data.
impl<K: IdKind> Clone for Id<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: IdKind> Copy for Id<K> {}

impl<K: IdKind> PartialEq for Id<K> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl<K: IdKind> Eq for Id<K> {}

impl<K: IdKind> PartialOrd for Id<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: IdKind> Ord for Id<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uuid.cmp(&other.uuid)
    }
}

impl<K: IdKind> Hash for Id<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl<K: IdKind> fmt::Debug for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl<K: IdKind> fmt::Display for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", K::TAG, self.uuid)
    }
}

impl<K: IdKind> FromStr for Id<K> {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s
            .strip_prefix(K::TAG)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| IdParseError::WrongTag {
                expected: K::TAG,
                input: s.to_string(),
            })?;
        Uuid::parse_str(uuid)
            .map(Self::from_uuid)
            .map_err(|_| IdParseError::InvalidUuid(s.to_string()))
    }
}

/// Kind of [`AccountId`].
pub enum AccountKind {}

impl IdKind for AccountKind {
    const TAG: &'static str = "account";
}

/// Kind of [`CapabilityId`].
pub enum CapabilityKind {}

impl IdKind for CapabilityKind {
    const TAG: &'static str = "cap";
}

/// Kind of [`SignalId`].
pub enum SignalKind {}

impl IdKind for SignalKind {
    const TAG: &'static str = "signal";
}

/// Identifier of a quota account.
pub type AccountId = Id<AccountKind>;

/// Identifier of a session capability.
pub type CapabilityId = Id<CapabilityKind>;

/// Identifier of a signal context.
pub type SignalId = Id<SignalKind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_ids_differ() {
        assert_ne!(AccountId::new(), AccountId::new());
    }

    #[test]
    fn test_parse_checks_tag() {
        let cap: CapabilityId = "cap:550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert_eq!(cap.to_string(), "cap:550e8400-e29b-41d4-a716-446655440000");

        let err = "signal:550e8400-e29b-41d4-a716-446655440000"
            .parse::<CapabilityId>()
            .unwrap_err();
        assert!(matches!(err, IdParseError::WrongTag { expected: "cap", .. }));
        assert!(matches!(
            "cap:nope".parse::<CapabilityId>(),
            Err(IdParseError::InvalidUuid(_))
        ));
    }

    #[test]
    fn test_order_follows_uuid() {
        let low = AccountId::from_uuid(Uuid::from_u128(1));
        let high = AccountId::from_uuid(Uuid::from_u128(2));
        assert!(low < high);
    }

    #[test]
    fn test_serializes_as_bare_uuid() {
        let id = SignalId::from_uuid(Uuid::from_u128(7));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000007\"");
        let back: SignalId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
