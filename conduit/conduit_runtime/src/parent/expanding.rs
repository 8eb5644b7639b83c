//! Parent client that asks for more quota when the local account runs dry.
//!
//! Resource requests are answered asynchronously: the parent signals the
//! handler installed via `resource_avail_sigh` once it granted (or
//! declined) the request. Components that never install a handler of
//! their own get a blocking fallback: the client installs an internal
//! handler and waits for its signal, so callers observe a synchronous
//! grant. Once a component installs its own handler, resource requests
//! return immediately and retry timing becomes the component's business.

use std::sync::Arc;

use conduit_core::{
    signal_context, Affinity, Capability, ClientId, Parent, QuotaAccount, QuotaTransfer,
    ServerId, SessionArgs, SessionError, SessionResponse, SignalHandler, SignalReceiver,
    UpgradeResult,
};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Id of the session to our own PD, which the parent tops up on request.
pub const ENV_PD: ClientId = ClientId::new(1);

/// How resource grants are waited for.
enum Fallback {
    /// No handler installed yet
    Undefined,

    /// Internal handler installed, requests block until signalled
    BlockingDefault(SignalReceiver),

    /// The component installed its own handler
    Custom,
}

/// Client of the parent interface that expands the local account on demand.
pub struct ExpandingParentClient {
    parent: Arc<dyn Parent>,
    account: Arc<QuotaAccount>,
    fallback: Mutex<Fallback>,
}

impl ExpandingParentClient {
    /// Create a client for `parent`, paying session quota from `account`.
    pub fn new(parent: Arc<dyn Parent>, account: Arc<QuotaAccount>) -> Self {
        Self {
            parent,
            account,
            fallback: Mutex::new(Fallback::Undefined),
        }
    }

    /// The wrapped parent interface.
    pub fn parent(&self) -> &Arc<dyn Parent> {
        &self.parent
    }

    /// The local account.
    pub fn account(&self) -> &Arc<QuotaAccount> {
        &self.account
    }

    /// Request a session, donating the quota named in `args`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::OutOfRam`] or [`SessionError::OutOfCaps`] if
    /// the local account cannot pay the donation, and passes on the
    /// parent's refusal otherwise. No quota moves on failure.
    pub fn session(
        &self,
        id: ClientId,
        service: &str,
        args: &SessionArgs,
        affinity: Affinity,
    ) -> Result<Capability, SessionError> {
        let resources = args.resources().map_err(|_| SessionError::ServiceDenied)?;
        let to = self.parent.account();

        let ram = QuotaTransfer::new(resources.ram_quota, &self.account, &to)?;
        let caps = QuotaTransfer::new(resources.cap_quota, &self.account, &to)?;
        let cap = self.parent.session(id, service, args, affinity)?;

        ram.acknowledge();
        caps.acknowledge();
        Ok(cap)
    }

    /// Donate additional quota to session `id`.
    ///
    /// An upgrade of our own PD session is turned into a resource request.
    /// If the local account runs out, the client requests more RAM once
    /// and more caps once before giving up.
    pub fn upgrade(
        &self,
        id: ClientId,
        args: &SessionArgs,
    ) -> Result<UpgradeResult, SessionError> {
        if id == ENV_PD {
            self.resource_request(&args.to_string());
            return Ok(UpgradeResult::Done);
        }

        let resources = args.resources().map_err(|_| SessionError::ServiceDenied)?;
        let mut ram_requested = false;
        let mut caps_requested = false;

        loop {
            match self.try_upgrade(id, args) {
                Err(SessionError::OutOfRam) if !ram_requested => {
                    ram_requested = true;
                    self.resource_request(&format!("ram_quota={}", resources.ram_quota));
                }
                Err(SessionError::OutOfCaps) if !caps_requested => {
                    caps_requested = true;
                    self.resource_request(&format!("cap_quota={}", resources.cap_quota));
                }
                result => return result,
            }
        }
    }

    fn try_upgrade(
        &self,
        id: ClientId,
        args: &SessionArgs,
    ) -> Result<UpgradeResult, SessionError> {
        let resources = args.resources().map_err(|_| SessionError::ServiceDenied)?;
        let to = self.parent.account();

        let ram = QuotaTransfer::new(resources.ram_quota, &self.account, &to)?;
        let caps = QuotaTransfer::new(resources.cap_quota, &self.account, &to)?;
        let result = self.parent.upgrade(id, args)?;

        ram.acknowledge();
        caps.acknowledge();
        Ok(result)
    }

    /// Close session `id`.
    pub fn close(&self, id: ClientId) {
        self.parent.close(id);
    }

    /// Ask the parent for more quota.
    ///
    /// Blocks until the parent answers unless the component installed its
    /// own resource-available handler.
    pub fn resource_request(&self, args: &str) {
        let mut fallback = self.fallback.lock();

        if let Fallback::Undefined = *fallback {
            let (handler, receiver) = signal_context();
            self.parent.resource_avail_sigh(Some(handler));
            *fallback = Fallback::BlockingDefault(receiver);
        }

        info!(args, "requesting resources from parent");
        self.parent.resource_request(args);

        if let Fallback::BlockingDefault(receiver) = &*fallback {
            receiver.wait();
            debug!("resource request answered");
        }
    }

    /// Install the component's own resource-available handler.
    ///
    /// Passing `None` retires a previously installed handler; the next
    /// resource request then blocks on the internal fallback again.
    pub fn resource_avail_sigh(&self, sigh: Option<SignalHandler>) {
        let mut fallback = self.fallback.lock();
        *fallback = match sigh {
            Some(_) => Fallback::Custom,
            None => Fallback::Undefined,
        };
        self.parent.resource_avail_sigh(sigh);
    }

    /// Whether resource requests currently block.
    pub fn blocking(&self) -> bool {
        !matches!(*self.fallback.lock(), Fallback::Custom)
    }

    /// Answer a parent's session request with a capability.
    pub fn deliver_session_cap(&self, id: ServerId, cap: Capability) {
        self.parent.deliver_session_cap(id, cap);
    }

    /// Answer a parent's session request.
    pub fn session_response(&self, id: ServerId, response: SessionResponse) {
        self.parent.session_response(id, response);
    }
}
