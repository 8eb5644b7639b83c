//! The interface towards our parent.
//!
//! The parent plays two roles. As a provider it serves the sessions we
//! request (identified by [`ClientId`]s we pick). As a client it sends us
//! session requests for services we provide (identified by [`ServerId`]s
//! it picks), which we answer through [`Parent::deliver_session_cap`] and
//! [`Parent::session_response`].

use crate::account::AccountRef;
use crate::error::SessionError;
use crate::id_space::{ClientId, ServerId};
use crate::types::args::SessionArgs;
use crate::types::capability::{Affinity, Capability};
use crate::types::session::{SessionResponse, UpgradeResult};
use crate::types::signal::SignalHandler;

/// The parent of this component.
pub trait Parent: Send + Sync {
    /// Request a session of `service`.
    ///
    /// The quota named in `args` has been transferred to
    /// [`Parent::account`] before the call.
    fn session(
        &self,
        id: ClientId,
        service: &str,
        args: &SessionArgs,
        affinity: Affinity,
    ) -> Result<Capability, SessionError>;

    /// Donate additional quota to an existing session.
    fn upgrade(&self, id: ClientId, args: &SessionArgs) -> Result<UpgradeResult, SessionError>;

    /// Close a session. Quota donated for it is returned by the parent.
    fn close(&self, id: ClientId);

    /// Ask for more quota. The grant is signalled through the handler
    /// installed with [`Parent::resource_avail_sigh`].
    fn resource_request(&self, args: &str);

    /// Install or remove the handler for resource-available signals.
    fn resource_avail_sigh(&self, sigh: Option<SignalHandler>);

    /// Answer a session request of the parent with a capability.
    fn deliver_session_cap(&self, id: ServerId, cap: Capability);

    /// Answer a session request of the parent.
    fn session_response(&self, id: ServerId, response: SessionResponse);

    /// The account session quota donated to the parent is paid into.
    fn account(&self) -> AccountRef;
}
