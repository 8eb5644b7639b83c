//! Error types for the Conduit session broker.
//!
//! Errors are organized by subsystem, each with its own enum. The root
//! [`Error`] can wrap any of them for uniform handling at the top level.
//!
//! The session taxonomy distinguishes terminal refusals, which end a create
//! attempt and are answered to the requester as a normal reply, from local
//! quota exhaustion, which is recoverable by asking the parent for more
//! quota.

use thiserror::Error;

use crate::types::session::Phase;

/// Root error type for Conduit.
#[derive(Debug, Error)]
pub enum Error {
    /// Session establishment errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Quota accounting errors
    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    /// Requests referring to sessions we do not know
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Malformed session argument strings
    #[error("Argument error: {0}")]
    Args(#[from] ArgsError),

    /// Routing errors
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),
}

/// Outcome of a failed session operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The request was refused by routing or by the provider's policy
    #[error("service denied")]
    ServiceDenied,

    /// The RAM quota reserved by the requester does not suffice
    #[error("insufficient RAM quota")]
    InsufficientRamQuota,

    /// The cap quota reserved by the requester does not suffice
    #[error("insufficient cap quota")]
    InsufficientCapQuota,

    /// Our own account lacks the RAM quota to carry out the operation now
    #[error("out of RAM")]
    OutOfRam,

    /// Our own account lacks the cap quota to carry out the operation now
    #[error("out of caps")]
    OutOfCaps,

    /// A provider failed in a way outside the documented set
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl SessionError {
    /// Whether the failure can be resolved by a resource request.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::OutOfRam | Self::OutOfCaps)
    }

    /// The phase a create attempt ends in after this failure.
    ///
    /// Recoverable failures do not end the attempt and yield `None`.
    /// Unexpected provider failures are treated as a denial so that the
    /// requester always receives an answer.
    pub fn terminal_phase(&self) -> Option<Phase> {
        match self {
            Self::ServiceDenied | Self::Unexpected(_) => Some(Phase::ServiceDenied),
            Self::InsufficientRamQuota => Some(Phase::InsufficientRamQuota),
            Self::InsufficientCapQuota => Some(Phase::InsufficientCapQuota),
            Self::OutOfRam | Self::OutOfCaps => None,
        }
    }
}

impl From<QuotaError> for SessionError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::InsufficientRam { .. } => Self::OutOfRam,
            QuotaError::InsufficientCaps { .. } => Self::OutOfCaps,
        }
    }
}

impl From<RoutingError> for SessionError {
    fn from(_: RoutingError) -> Self {
        Self::ServiceDenied
    }
}

/// Errors related to quota transfers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    /// The source account holds less RAM quota than requested
    #[error("insufficient RAM: requested {requested} bytes, available {available} bytes")]
    InsufficientRam {
        /// Requested amount
        requested: u64,

        /// Available balance
        available: u64,
    },

    /// The source account holds fewer capabilities than requested
    #[error("insufficient caps: requested {requested}, available {available}")]
    InsufficientCaps {
        /// Requested amount
        requested: u64,

        /// Available balance
        available: u64,
    },
}

/// Violations of the session protocol by a peer.
///
/// These are logged and the offending operation is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The operation referenced an id we never handed out
    #[error("unknown session id {0}")]
    UnknownSession(u64),

    /// The peer chose an id that is already in use
    #[error("id {0} is already in use")]
    ConflictingId(u64),

    /// The operation referenced a session that is already closed
    #[error("session {0} is already closed")]
    SessionClosed(u64),

    /// The operation does not fit the session's current phase
    #[error("session {id} cannot accept this request in phase {phase}")]
    InvalidState {
        /// Session id
        id: u64,

        /// Phase at the time of the request
        phase: Phase,
    },
}

/// Errors in session argument strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgsError {
    /// The argument string is not a list of `key=value` pairs
    #[error("malformed argument string: {0}")]
    Malformed(String),

    /// A value could not be interpreted
    #[error("invalid value '{value}' for key '{key}'")]
    InvalidValue {
        /// Key
        key: String,

        /// Offending value
        value: String,
    },
}

/// Errors related to session routing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No rule matches the request
    #[error("no route for service '{service}' requested by '{label}'")]
    NoMatchingRoute {
        /// Requested service name
        service: String,

        /// Label of the requester
        label: String,
    },

    /// The routing configuration contains an unusable rule
    #[error("invalid route rule: {0}")]
    InvalidRule(String),

    /// The route names a child that does not provide the service (yet)
    #[error("service '{service}' not present at child '{child}'")]
    ServiceNotPresent {
        /// Child named by the route
        child: String,

        /// Requested service name
        service: String,
    },
}

/// Result type used throughout Conduit.
pub type Result<T> = std::result::Result<T, Error>;
