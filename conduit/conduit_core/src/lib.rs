//! # Conduit Core
//!
//! `conduit_core` provides the building blocks of the Conduit session broker:
//! the machinery that turns a client's request for a named service into a
//! resource-accounted session with a concrete provider, and later tears that
//! session down again.
//!
//! ## Core Principles
//!
//! 1. **Sessions are state machines**: every session is described by a
//!    [`SessionState`] whose [`Phase`] is advanced only by the service that
//!    provides it.
//!
//! 2. **Quota is conserved**: RAM and capability quota live in
//!    [`QuotaAccount`]s and only ever move between accounts through atomic,
//!    bounded transfers.
//!
//! 3. **Identifiers never leak pointers**: sessions are correlated across the
//!    trust boundary by small integer ids handed out by an [`IdSpace`], one
//!    space for the requests we serve and one for the requests we issue.
//!
//! ## Crate Structure
//!
//! - **error**: Error taxonomy for all Conduit components
//! - **id**: Strongly-typed unique identifiers
//! - **id_space**: Small-integer identifier spaces
//! - **account**: Quota accounts and the quota-transfer guard
//! - **traits**: Service, parent and factory interfaces
//! - **types**: Quotas, argument strings, labels, capabilities, signals and
//!   the session state

pub mod account;
pub mod error;
pub mod id;
pub mod id_space;
pub mod traits;
pub mod types;

pub use account::{Account, AccountRef, Quota, QuotaAccount, QuotaTransfer};
pub use error::{ArgsError, Error, ProtocolError, QuotaError, Result, RoutingError, SessionError};
pub use id::{AccountId, CapabilityId, Id, IdKind, IdParseError, SignalId};
pub use id_space::{ClientId, IdSpace, Index, ServerId};
pub use traits::{Parent, Service, SessionFactory, SessionObject, Wakeup};
pub use types::{
    Affinity, CapQuota, Capability, Diag, Phase, RamQuota, Resources, SessionArgs, SessionHandle,
    SessionLabel, SessionResponse, SessionState, SignalHandler, SignalReceiver, UpgradeResult,
};
pub use types::signal::signal_context;
