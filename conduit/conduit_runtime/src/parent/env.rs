//! The component environment.
//!
//! Bundles the parent client, the component's own quota account and the
//! client-side identifier space for sessions requested from the parent.

use std::sync::Arc;

use conduit_core::id_space::Client;
use conduit_core::{
    Affinity, Capability, ClientId, IdSpace, Parent, QuotaAccount, SessionArgs, SessionError,
    UpgradeResult,
};
use parking_lot::Mutex;
use tracing::debug;

use super::expanding::{ExpandingParentClient, ENV_PD};

/// Environment of a component.
pub struct Env {
    parent: ExpandingParentClient,
    sessions: Mutex<IdSpace<Client, String>>,
}

impl Env {
    /// Create an environment.
    ///
    /// # Arguments
    ///
    /// * `parent` - The parent interface.
    /// * `account` - The component's own quota account.
    pub fn new(parent: Arc<dyn Parent>, account: Arc<QuotaAccount>) -> Self {
        let mut sessions = IdSpace::new();
        // The PD session exists from the start.
        let _ = sessions.insert(ENV_PD, "PD".to_string());

        Self {
            parent: ExpandingParentClient::new(parent, account),
            sessions: Mutex::new(sessions),
        }
    }

    /// The parent client.
    pub fn parent(&self) -> &ExpandingParentClient {
        &self.parent
    }

    /// The component's own quota account.
    pub fn account(&self) -> &Arc<QuotaAccount> {
        self.parent.account()
    }

    /// Allocate an id for a session requested from the parent.
    pub fn alloc_id(&self, service: &str) -> ClientId {
        self.sessions.lock().alloc(service.to_string())
    }

    /// Release an id allocated with [`Env::alloc_id`].
    pub fn release_id(&self, id: ClientId) {
        if id != ENV_PD {
            self.sessions.lock().remove(id);
        }
    }

    /// Number of sessions currently requested from the parent.
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len().saturating_sub(1)
    }

    /// Request a session from the parent without retrying.
    pub fn try_session(
        &self,
        id: ClientId,
        service: &str,
        args: &SessionArgs,
        affinity: Affinity,
    ) -> Result<Capability, SessionError> {
        debug!(service, id = %id, "requesting parent session");
        self.parent.session(id, service, args, affinity)
    }

    /// Upgrade a session requested from the parent.
    pub fn upgrade(
        &self,
        id: ClientId,
        args: &SessionArgs,
    ) -> Result<UpgradeResult, SessionError> {
        self.parent.upgrade(id, args)
    }

    /// Close a session requested from the parent and release its id.
    pub fn close(&self, id: ClientId) {
        self.parent.close(id);
        self.release_id(id);
    }
}
