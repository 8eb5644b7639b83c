//! Identifier spaces.
//!
//! An identifier space maps small integer ids to entries. Ids are what
//! crosses the trust boundary; the entries themselves never do. Each
//! component keeps two independent spaces:
//!
//! - the server-side space, holding the requests it serves for its parent
//!   (the parent picks those ids), and
//! - the client-side spaces, holding the requests it issues downstream
//!   (we pick those ids).
//!
//! The marker parameter keeps ids of the two roles from being mixed up.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProtocolError;

/// A small integer id valid within one identifier space.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index<S> {
    value: u64,
    #[serde(skip)]
    _marker: std::marker::PhantomData<S>,
}

impl<S> Index<S> {
    /// Wrap a raw id value.
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _marker: std::marker::PhantomData,
        }
    }

    /// The raw id value.
    pub const fn value(&self) -> u64 {
        self.value
    }
}

// Manual impls so that the marker does not need to be Clone/Copy itself.
impl<S> Clone for Index<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Index<S> {}

impl<S> fmt::Display for Index<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<S> From<u64> for Index<S> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// Role marker for ids of requests we serve.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Server {}

/// Role marker for ids of requests we issue.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Client {}

/// Id of a request arriving from our parent.
pub type ServerId = Index<Server>;

/// Id of a request forwarded downstream.
pub type ClientId = Index<Client>;

/// A namespace of small integer ids.
#[derive(Debug)]
pub struct IdSpace<S, T> {
    entries: BTreeMap<u64, T>,
    next: u64,
    _marker: std::marker::PhantomData<S>,
}

impl<S, T> IdSpace<S, T> {
    /// Create an empty identifier space.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next: 0,
            _marker: std::marker::PhantomData,
        }
    }

    /// Register `value` under a freshly allocated id.
    pub fn alloc(&mut self, value: T) -> Index<S> {
        while self.entries.contains_key(&self.next) {
            self.next = self.next.wrapping_add(1);
        }
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        self.entries.insert(id, value);
        Index::new(id)
    }

    /// Register `value` under an id chosen by the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ConflictingId`] if the id is taken.
    pub fn insert(&mut self, id: Index<S>, value: T) -> Result<(), ProtocolError> {
        if self.entries.contains_key(&id.value()) {
            return Err(ProtocolError::ConflictingId(id.value()));
        }
        self.entries.insert(id.value(), value);
        Ok(())
    }

    /// Look up an entry.
    pub fn get(&self, id: Index<S>) -> Option<&T> {
        self.entries.get(&id.value())
    }

    /// Look up an entry for modification.
    pub fn get_mut(&mut self, id: Index<S>) -> Option<&mut T> {
        self.entries.get_mut(&id.value())
    }

    /// Release an id, returning its entry.
    pub fn remove(&mut self, id: Index<S>) -> Option<T> {
        self.entries.remove(&id.value())
    }

    /// Check whether an id is allocated.
    pub fn contains(&self, id: Index<S>) -> bool {
        self.entries.contains_key(&id.value())
    }

    /// Number of allocated ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no id is allocated.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All allocated ids, in ascending order.
    pub fn ids(&self) -> Vec<Index<S>> {
        self.entries.keys().map(|&id| Index::new(id)).collect()
    }

    /// Iterate over all entries, in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (Index<S>, &T)> {
        self.entries.iter().map(|(&id, value)| (Index::new(id), value))
    }

    /// Iterate mutably over all entries, in ascending id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Index<S>, &mut T)> {
        self.entries
            .iter_mut()
            .map(|(&id, value)| (Index::new(id), value))
    }
}

impl<S, T> Default for IdSpace<S, T> {
    fn default() -> Self {
        Self::new()
    }
}
