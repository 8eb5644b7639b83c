//! The session broker.
//!
//! The broker owns the server-side identifier space for session requests
//! arriving from our parent. It resolves each request to a provider, hands
//! the session to that provider's service, and answers the parent once the
//! service reached a result. Providers that answer out of band report back
//! through [`Broker::child_session_response`] or the `for_each_*` hooks of
//! async local services.
//!
//! Session quota travels with the request: the broker moves the donation
//! from the component's own account to the provider's account while the
//! session lives and moves it back when the session is closed.

mod provider;
mod report;
mod request;

use std::sync::Arc;

use conduit_core::id_space::Server;
use conduit_core::types::args::{CAP_QUOTA, RAM_QUOTA};
use conduit_core::{
    Account, AccountRef, Affinity, ArgsError, CapQuota, ClientId, IdSpace, Phase, ProtocolError,
    QuotaAccount, QuotaError, QuotaTransfer, RamQuota, Resources, Result, RoutingError, ServerId,
    Service, SessionArgs, SessionError, SessionHandle, SessionResponse, SessionState, Wakeup,
};
use conduit_routing::{RouteTarget, Router, RoutingConfig, ServiceMatcher};
use tracing::{debug, error, info, warn};

use crate::parent::Env;
use crate::service::{AsyncLocalService, RoutedService};
use crate::system::RuntimeConfig;

pub use provider::Provider;
pub use report::{SessionReport, StateReport};
pub use request::{
    ChildRequest, CloseResponse, LocalRequest, ProviderResponse, RequestKind, UpgradeResponse,
};

use provider::{Lookup, Providers};

/// A session together with the provider serving it.
struct Slot {
    state: SessionState,
    provider: Option<Provider>,
}

/// Mediates between the sessions our parent requests and their providers.
pub struct Broker {
    env: Arc<Env>,
    config: RuntimeConfig,
    router: Router,
    sessions: IdSpace<Server, Slot>,
    providers: Providers,
}

impl Broker {
    /// Create a broker.
    ///
    /// # Arguments
    ///
    /// * `env` - The component environment, through which the parent is
    ///   answered and quota is paid.
    /// * `config` - The runtime configuration; its routes become the
    ///   initial rule list.
    pub fn new(env: Arc<Env>, config: RuntimeConfig) -> Self {
        let router = config.routing().router();
        info!(routes = router.rules().len(), "session broker created");

        Self {
            env,
            config,
            router,
            sessions: IdSpace::new(),
            providers: Providers::default(),
        }
    }

    /// The component environment.
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// The runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Look a session up by the id our parent gave it.
    pub fn session(&self, id: ServerId) -> Option<&SessionState> {
        self.sessions.get(id).map(|slot| &slot.state)
    }

    /// All sessions, in ascending id order.
    pub fn sessions(&self) -> impl Iterator<Item = (ServerId, &SessionState)> {
        self.sessions.iter().map(|(id, slot)| (id, &slot.state))
    }

    /// The provider a session was routed to.
    pub fn provider_of(&self, id: ServerId) -> Option<&Provider> {
        self.sessions.get(id).and_then(|slot| slot.provider.as_ref())
    }

    /// Register a synchronous local service under its name.
    pub fn register_local_service(&mut self, service: impl Service + 'static) {
        let name = service.name().to_string();
        info!(service = %name, "local service registered");
        self.providers.local.insert(name, Box::new(service));
        self.retry_pending();
    }

    /// Register a local service whose sessions are answered asynchronously.
    ///
    /// Local code answers the requests through
    /// [`Broker::for_each_requested_session`],
    /// [`Broker::for_each_upgraded_session`] and
    /// [`Broker::for_each_session_to_close`].
    pub fn register_async_local_service(
        &mut self,
        name: &str,
        wakeup: Option<Arc<dyn Wakeup>>,
    ) {
        info!(service = name, "async local service registered");
        self.providers
            .async_local
            .insert(name.to_string(), AsyncLocalService::new(name, wakeup));
        self.retry_pending();
    }

    /// Register a service announced by a child.
    ///
    /// Requests routed to the child that waited for the service are
    /// forwarded now.
    pub fn announce_child_service(
        &mut self,
        child: &str,
        service: &str,
        account: Arc<QuotaAccount>,
        wakeup: Arc<dyn Wakeup>,
    ) {
        let key = (child.to_string(), service.to_string());
        match self.providers.children.get(&key) {
            Some(existing) if !existing.abandoned() => {
                warn!(child, service, "service announced twice, keeping the first");
                return;
            }
            Some(existing) if !existing.requests().is_idle() => {
                warn!(child, service, "withdrawn service is still in use, ignoring announcement");
                return;
            }
            _ => {}
        }

        info!(child, service, "child service announced");
        self.providers
            .children
            .insert(key, RoutedService::new(child, service, account, wakeup));
        self.retry_pending();
    }

    /// Withdraw a service a child stopped providing.
    ///
    /// Existing sessions are kept; the service is removed once the last of
    /// them is closed.
    pub fn withdraw_child_service(&mut self, child: &str, service: &str) {
        let key = (child.to_string(), service.to_string());
        if let Some(routed) = self.providers.children.get_mut(&key) {
            info!(child, service, "child service withdrawn");
            routed.abandon();
        }
        self.sweep();
    }

    /// Forget a child and every service it provided.
    ///
    /// Pending requests are denied and established sessions are closed.
    /// Sessions whose create failed already are left to the parent's close.
    pub fn remove_child(&mut self, child: &str) {
        let keys: Vec<(String, String)> = self
            .providers
            .children
            .keys()
            .filter(|(name, _)| name == child)
            .cloned()
            .collect();

        for (child, service) in keys {
            let provider = Provider::Child {
                child: child.clone(),
                service: service.clone(),
            };
            let account = self.providers.account(&provider);

            for (id, slot) in self.sessions.iter_mut() {
                // Failed creates were answered already and wait for the
                // parent's close.
                if slot.provider.as_ref() != Some(&provider)
                    || !slot.state.alive()
                    || slot.state.phase().is_create_failure()
                {
                    continue;
                }
                let state = &mut slot.state;
                release_request(&mut self.providers, &provider, state);
                state.take_handle();

                let response = if state.phase() == Phase::CreateRequested && !state.abandoned() {
                    state.advance(Phase::ServiceDenied);
                    SessionResponse::ServiceDenied
                } else {
                    if !state.phase().can_transition_to(Phase::Closed) {
                        state.advance(Phase::CloseRequested);
                    }
                    state.advance(Phase::Closed);
                    SessionResponse::SessionClosed
                };
                refund(&self.env, state, &account);
                self.env.parent().session_response(id, response);
            }

            info!(child = %child, service = %service, "child service removed");
            self.providers.children.remove(&(child, service));
        }
    }

    /// Replace the routing rules.
    ///
    /// Parent services no rule refers to any more are abandoned, and
    /// requests waiting for a provider are resolved again.
    pub fn apply_routing(&mut self, config: &RoutingConfig) {
        info!(routes = config.routes.len(), "applying routing configuration");
        self.router.replace(config.routes.clone());

        let mut keep_all = false;
        let mut keep = Vec::new();
        for rule in self.router.rules() {
            if let RouteTarget::Parent { rename } = &rule.target {
                match (rename, &rule.service) {
                    (Some(name), _) | (None, ServiceMatcher::Name(name)) => keep.push(name.clone()),
                    (None, ServiceMatcher::Any) => keep_all = true,
                }
            }
        }
        self.providers
            .abandon_parents(if keep_all { None } else { Some(&keep) });

        self.sweep();
        self.retry_pending();
    }

    /// Handle a session request of our parent.
    ///
    /// # Arguments
    ///
    /// * `id` - The id the parent chose for the session.
    /// * `service` - The requested service.
    /// * `args` - The session argument string.
    /// * `affinity` - The placement hint.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The request was taken. It may have been answered
    ///   already, or it completes later.
    /// * `Err(Error)` - The id is in use or the argument string is
    ///   malformed. A malformed request is answered with a denial.
    pub fn handle_create(
        &mut self,
        id: ServerId,
        service: &str,
        args: &str,
        affinity: Affinity,
    ) -> Result<()> {
        if let Some(slot) = self.sessions.get(id) {
            if slot.state.alive() {
                warn!(id = %id, service, "session request reuses a live id");
                return Err(ProtocolError::ConflictingId(id.value()).into());
            }
            self.sessions.remove(id);
        }

        let mut state = match self.session_state(service, args, affinity) {
            Ok(state) => state,
            Err(err) => {
                warn!(id = %id, service, %err, "malformed session request");
                self.env
                    .parent()
                    .session_response(id, SessionResponse::ServiceDenied);
                return Err(err.into());
            }
        };
        state.set_id_at_server(id);
        debug!(id = %id, "session request: {}", state);

        self.sessions.insert(
            id,
            Slot {
                state,
                provider: None,
            },
        )?;
        self.route(id);
        Ok(())
    }

    /// Handle an upgrade of an established session.
    ///
    /// The deltas are moved to the provider's account before the provider
    /// is asked to apply them.
    pub fn handle_upgrade(&mut self, id: ServerId, ram: RamQuota, caps: CapQuota) -> Result<()> {
        let env = Arc::clone(&self.env);
        let slot = self.sessions.get_mut(id).ok_or_else(|| {
            warn!(id = %id, "upgrade of unknown session");
            ProtocolError::UnknownSession(id.value())
        })?;

        let phase = slot.state.phase();
        if phase == Phase::Closed {
            warn!(id = %id, "upgrade of closed session");
            return Err(ProtocolError::SessionClosed(id.value()).into());
        }
        let invalid = ProtocolError::InvalidState {
            id: id.value(),
            phase,
        };
        if !matches!(
            phase,
            Phase::Available | Phase::CapHandedOut | Phase::UpgradeRequested
        ) {
            warn!(id = %id, %phase, "upgrade of session that is not established");
            return Err(invalid.into());
        }

        let provider = slot.provider.clone().ok_or_else(|| invalid.clone())?;
        let account = self.providers.account(&provider);
        let service = self
            .providers
            .get_mut(&provider)
            .ok_or_else(|| invalid.clone())?;

        let ram_transfer = QuotaTransfer::new(ram, env.account(), &account)?;
        let caps_transfer = QuotaTransfer::new(caps, env.account(), &account)?;

        let state = &mut slot.state;
        if !state.request_upgrade(ram, caps) {
            return Err(invalid.into());
        }
        if let Err(err) = service.initiate_request(state) {
            warn!(id = %id, %err, "session upgrade failed");
            // The transfers are reverted on return, so are the deltas.
            state.revert_upgrade(ram, caps, phase);
            return Err(err.into());
        }

        ram_transfer.acknowledge();
        caps_transfer.acknowledge();
        if account.valid() {
            state.add_donated(Resources::new(ram, caps));
        }

        match state.phase() {
            Phase::CapHandedOut => env
                .parent()
                .session_response(id, SessionResponse::SessionOk),
            Phase::UpgradeRequested if service.is_async() => service.wakeup(),
            _ => {}
        }
        Ok(())
    }

    /// Handle a close request of our parent.
    ///
    /// Closing a session that is already closed or being closed does
    /// nothing. Closing a session whose create is still pending marks it
    /// abandoned, so a late completion by the provider closes it instead
    /// of making it available.
    pub fn handle_close(&mut self, id: ServerId) -> Result<()> {
        let env = Arc::clone(&self.env);
        let slot = self.sessions.get_mut(id).ok_or_else(|| {
            warn!(id = %id, "close of unknown session");
            ProtocolError::UnknownSession(id.value())
        })?;

        let state = &mut slot.state;
        match state.phase() {
            Phase::Closed | Phase::CloseRequested => {
                debug!(id = %id, "session already closing");
                return Ok(());
            }
            Phase::CreateRequested => state.abandon(),
            _ => {}
        }

        let Some(provider) = slot.provider.clone() else {
            state.advance(Phase::Closed);
            env.parent()
                .session_response(id, SessionResponse::SessionClosed);
            return Ok(());
        };

        state.advance(Phase::CloseRequested);
        let account = self.providers.account(&provider);
        match self.providers.get_mut(&provider) {
            Some(service) => {
                if let Err(err) = service.initiate_request(state) {
                    warn!(id = %id, %err, "closing session failed");
                }
                if state.phase() == Phase::CloseRequested && service.is_async() {
                    service.wakeup();
                }
            }
            None => {
                state.take_handle();
                state.take_downstream();
                state.advance(Phase::Closed);
            }
        }

        if state.phase() == Phase::Closed {
            refund(&env, state, &account);
            env.parent()
                .session_response(id, SessionResponse::SessionClosed);
        }
        Ok(())
    }

    /// Apply a child's answer to one of its requests.
    ///
    /// # Arguments
    ///
    /// * `child` - Name of the child.
    /// * `service` - The service the request belongs to.
    /// * `id` - Id of the request within the service.
    /// * `response` - The child's answer.
    pub fn child_session_response(
        &mut self,
        child: &str,
        service: &str,
        id: ClientId,
        response: ProviderResponse,
    ) -> Result<()> {
        let routed = self
            .providers
            .children
            .get(&(child.to_string(), service.to_string()))
            .ok_or_else(|| RoutingError::ServiceNotPresent {
                child: child.to_string(),
                service: service.to_string(),
            })?;
        let server_id = routed.requests().lookup(id).ok_or_else(|| {
            warn!(child, service, id = %id, "response to unknown request");
            ProtocolError::UnknownSession(id.value())
        })?;

        let provider = Provider::Child {
            child: child.to_string(),
            service: service.to_string(),
        };
        self.apply_response(&provider, server_id, response)?;
        self.sweep();
        Ok(())
    }

    /// The requests pending at a child, across all its services.
    pub fn child_requests(&self, child: &str) -> Vec<ChildRequest> {
        let mut requests = Vec::new();

        for ((name, service), routed) in &self.providers.children {
            if name != child {
                continue;
            }
            for (id, server_id) in routed.requests().posted() {
                let Some(slot) = self.sessions.get(server_id) else {
                    continue;
                };
                let state = &slot.state;
                let kind = match state.phase() {
                    Phase::CreateRequested if !state.abandoned() => RequestKind::Create {
                        label: state.label().to_string(),
                        args: state.args().to_string(),
                        resources: state.resources(),
                    },
                    Phase::UpgradeRequested => RequestKind::Upgrade {
                        resources: Resources::new(state.ram_upgrade(), state.cap_upgrade()),
                    },
                    Phase::CloseRequested => RequestKind::Close,
                    _ => continue,
                };
                requests.push(ChildRequest {
                    service: service.clone(),
                    id: id.value(),
                    kind,
                });
            }
        }
        requests
    }

    /// Let local code answer the pending create requests of an async
    /// local service.
    pub fn for_each_requested_session(
        &mut self,
        service: &str,
        mut f: impl FnMut(&mut LocalRequest<'_>),
    ) {
        let Some(posted) = self.posted(service) else {
            return;
        };

        let mut responses = Vec::new();
        for (id, server_id) in posted {
            let Some(slot) = self.sessions.get(server_id) else {
                continue;
            };
            let state = &slot.state;
            if state.phase() != Phase::CreateRequested || state.abandoned() {
                continue;
            }
            let mut request = LocalRequest::new(id, state.label(), state.args(), state.resources());
            f(&mut request);
            if let Some(response) = request.into_response() {
                responses.push((server_id, response));
            }
        }

        self.apply_local_responses(service, responses);
    }

    /// Let local code apply the pending upgrades of an async local service.
    pub fn for_each_upgraded_session(
        &mut self,
        service: &str,
        mut f: impl FnMut(ClientId, Resources) -> UpgradeResponse,
    ) {
        let Some(posted) = self.posted(service) else {
            return;
        };

        let mut responses = Vec::new();
        for (id, server_id) in posted {
            let Some(slot) = self.sessions.get(server_id) else {
                continue;
            };
            let state = &slot.state;
            if state.phase() != Phase::UpgradeRequested {
                continue;
            }
            let delta = Resources::new(state.ram_upgrade(), state.cap_upgrade());
            if f(id, delta) == UpgradeResponse::Confirmed {
                responses.push((server_id, ProviderResponse::UpgradeDone));
            }
        }

        self.apply_local_responses(service, responses);
    }

    /// Let local code close the sessions of an async local service that
    /// are to be closed.
    pub fn for_each_session_to_close(
        &mut self,
        service: &str,
        mut f: impl FnMut(ClientId) -> CloseResponse,
    ) {
        let Some(posted) = self.posted(service) else {
            return;
        };

        let mut responses = Vec::new();
        for (id, server_id) in posted {
            let closing = self
                .sessions
                .get(server_id)
                .is_some_and(|slot| slot.state.phase() == Phase::CloseRequested);
            if closing && f(id) == CloseResponse::Closed {
                responses.push((server_id, ProviderResponse::Closed));
            }
        }

        self.apply_local_responses(service, responses);
    }

    /// Destroy the sessions that reached [`Phase::Closed`].
    ///
    /// Returns the number of destroyed sessions.
    pub fn reap_closed(&mut self) -> usize {
        let closed: Vec<ServerId> = self
            .sessions
            .iter()
            .filter(|(_, slot)| !slot.state.alive())
            .map(|(id, _)| id)
            .collect();

        for id in &closed {
            self.sessions.remove(*id);
        }
        if !closed.is_empty() {
            debug!(count = closed.len(), "reaped closed sessions");
        }
        closed.len()
    }

    fn session_state(
        &self,
        service: &str,
        args: &str,
        affinity: Affinity,
    ) -> std::result::Result<SessionState, ArgsError> {
        let mut args = SessionArgs::parse(args)?;
        if !args.contains(RAM_QUOTA) && self.config.default_ram_quota > 0 {
            args.set(RAM_QUOTA, self.config.default_ram_quota.to_string());
        }
        if !args.contains(CAP_QUOTA) && self.config.default_cap_quota > 0 {
            args.set(CAP_QUOTA, self.config.default_cap_quota.to_string());
        }
        SessionState::new(service, args, affinity)
    }

    /// Resolve a pending request and hand it to its provider.
    fn route(&mut self, id: ServerId) {
        let Some(slot) = self.sessions.get_mut(id) else {
            return;
        };
        if slot.provider.is_some()
            || slot.state.phase() != Phase::CreateRequested
            || slot.state.abandoned()
        {
            return;
        }

        let route = match self.router.resolve(slot.state.service(), slot.state.label()) {
            Ok(route) => route,
            Err(err) => {
                warn!(id = %id, %err, "session request denied");
                self.deny(id);
                return;
            }
        };

        let lookup = match &route.target {
            RouteTarget::Local(name) => self.providers.local(name),
            RouteTarget::Parent { .. } => {
                self.providers
                    .parent(&self.env, &route.service, self.config.parent_retry_limit)
            }
            RouteTarget::Child(child) => self.providers.child(child, &route.service),
        };

        let provider = match lookup {
            Lookup::Found(provider) => provider,
            Lookup::NotPresent => {
                debug!(id = %id, target = %route.target, "provider not present yet, request stays pending");
                return;
            }
            Lookup::Missing => {
                warn!(id = %id, target = %route.target, "route target does not exist");
                self.deny(id);
                return;
            }
        };

        if let Some(slot) = self.sessions.get_mut(id) {
            if route.relabels(slot.state.label()) {
                debug!(id = %id, label = %route.label, "relabeling session");
                slot.state.relabel(route.label.clone());
            }
            debug!(id = %id, %provider, "session routed");
            slot.provider = Some(provider);
        }
        self.initiate_create(id);
    }

    /// Move the donation to the provider and ask it to create the session.
    fn initiate_create(&mut self, id: ServerId) {
        let env = Arc::clone(&self.env);
        let Some(slot) = self.sessions.get_mut(id) else {
            return;
        };
        let Some(provider) = slot.provider.clone() else {
            return;
        };
        let state = &mut slot.state;

        let account = self.providers.account(&provider);
        let Some(service) = self.providers.get_mut(&provider) else {
            warn!(id = %id, %provider, "provider vanished");
            state.advance(Phase::ServiceDenied);
            env.parent()
                .session_response(id, SessionResponse::ServiceDenied);
            return;
        };

        let resources = state.resources();
        let transfers = QuotaTransfer::new(resources.ram_quota, env.account(), &account)
            .and_then(|ram| {
                QuotaTransfer::new(resources.cap_quota, env.account(), &account)
                    .map(|caps| (ram, caps))
            });
        let (ram, caps) = match transfers {
            Ok(transfers) => transfers,
            Err(err) => {
                warn!(id = %id, %err, "cannot forward session quota to provider");
                let phase = match err {
                    QuotaError::InsufficientRam { .. } => Phase::InsufficientRamQuota,
                    QuotaError::InsufficientCaps { .. } => Phase::InsufficientCapQuota,
                };
                state.advance(phase);
                if let Some(response) = SessionResponse::for_create_failure(phase) {
                    env.parent().session_response(id, response);
                }
                return;
            }
        };

        let result = service.initiate_request(state);
        let phase = state.phase();

        if result.is_ok() && matches!(phase, Phase::Available | Phase::CreateRequested) {
            ram.acknowledge();
            caps.acknowledge();
            if account.valid() {
                state.add_donated(resources);
            }
        } else {
            drop((ram, caps));
        }

        match (phase, result) {
            (Phase::Available, _) => {
                if let Some(cap) = state.cap().cloned() {
                    env.parent().deliver_session_cap(id, cap);
                    state.advance(Phase::CapHandedOut);
                }
            }
            (Phase::CreateRequested, Ok(())) => {
                if service.is_async() {
                    service.wakeup();
                }
            }
            (Phase::CreateRequested, Err(err)) => {
                error!(id = %id, %err, "session request failed without an answer");
                state.advance(Phase::ServiceDenied);
                env.parent()
                    .session_response(id, SessionResponse::ServiceDenied);
            }
            (Phase::Closed, Err(err)) => {
                let response = match err {
                    SessionError::OutOfRam => SessionResponse::InsufficientRamQuota,
                    SessionError::OutOfCaps => SessionResponse::InsufficientCapQuota,
                    _ => SessionResponse::ServiceDenied,
                };
                env.parent().session_response(id, response);
            }
            (phase, _) => match SessionResponse::for_create_failure(phase) {
                Some(response) => env.parent().session_response(id, response),
                None => warn!(id = %id, %phase, "unexpected phase after create request"),
            },
        }
    }

    /// Apply a provider's answer to the session known as `id`.
    fn apply_response(
        &mut self,
        provider: &Provider,
        id: ServerId,
        response: ProviderResponse,
    ) -> Result<()> {
        let env = Arc::clone(&self.env);
        let account = self.providers.account(provider);
        let slot = self
            .sessions
            .get_mut(id)
            .ok_or(ProtocolError::UnknownSession(id.value()))?;
        let state = &mut slot.state;
        let phase = state.phase();

        match response {
            ProviderResponse::Deliver(cap)
                if phase == Phase::CreateRequested && !state.abandoned() =>
            {
                state.set_handle(SessionHandle::remote(cap.clone()));
                state.set_async_client_notify(false);
                state.advance(Phase::Available);
                env.parent().deliver_session_cap(id, cap);
                state.advance(Phase::CapHandedOut);
            }
            ProviderResponse::Deliver(_)
            | ProviderResponse::Denied
            | ProviderResponse::InsufficientRam
            | ProviderResponse::InsufficientCaps
                if state.abandoned() && state.alive() =>
            {
                debug!(id = %id, %provider, "provider answered a session that is being closed");
                release_request(&mut self.providers, provider, state);
                state.take_handle();
                state.advance(Phase::Closed);
                refund(&env, state, &account);
                env.parent()
                    .session_response(id, SessionResponse::SessionClosed);
            }
            refusal @ (ProviderResponse::Denied
            | ProviderResponse::InsufficientRam
            | ProviderResponse::InsufficientCaps)
                if phase == Phase::CreateRequested =>
            {
                let next = match refusal {
                    ProviderResponse::InsufficientRam => Phase::InsufficientRamQuota,
                    ProviderResponse::InsufficientCaps => Phase::InsufficientCapQuota,
                    _ => Phase::ServiceDenied,
                };
                release_request(&mut self.providers, provider, state);
                state.set_async_client_notify(false);
                state.advance(next);
                refund(&env, state, &account);
                if let Some(response) = SessionResponse::for_create_failure(next) {
                    env.parent().session_response(id, response);
                }
            }
            ProviderResponse::UpgradeDone if phase == Phase::UpgradeRequested => {
                state.confirm_upgrade();
                state.advance(Phase::CapHandedOut);
                env.parent()
                    .session_response(id, SessionResponse::SessionOk);
            }
            ProviderResponse::Closed if state.alive() => {
                release_request(&mut self.providers, provider, state);
                state.take_handle();
                if !phase.can_transition_to(Phase::Closed) {
                    state.advance(Phase::CloseRequested);
                }
                state.advance(Phase::Closed);
                refund(&env, state, &account);
                env.parent()
                    .session_response(id, SessionResponse::SessionClosed);
            }
            response => {
                warn!(id = %id, %phase, ?response, "provider response does not fit the session");
                return Err(ProtocolError::InvalidState {
                    id: id.value(),
                    phase,
                }
                .into());
            }
        }
        Ok(())
    }

    fn posted(&self, service: &str) -> Option<Vec<(ClientId, ServerId)>> {
        match self.providers.async_local.get(service) {
            Some(local) => Some(local.requests().posted()),
            None => {
                warn!(service, "no such async local service");
                None
            }
        }
    }

    fn apply_local_responses(
        &mut self,
        service: &str,
        responses: Vec<(ServerId, ProviderResponse)>,
    ) {
        let provider = Provider::AsyncLocal(service.to_string());
        for (id, response) in responses {
            if let Err(err) = self.apply_response(&provider, id, response) {
                warn!(service, id = %id, %err, "ignoring local response");
            }
        }
    }

    /// Resolve the requests that wait for a provider.
    fn retry_pending(&mut self) {
        let pending: Vec<ServerId> = self
            .sessions
            .iter()
            .filter(|(_, slot)| {
                slot.provider.is_none()
                    && slot.state.phase() == Phase::CreateRequested
                    && !slot.state.abandoned()
            })
            .map(|(id, _)| id)
            .collect();

        for id in pending {
            self.route(id);
        }
    }

    /// Remove abandoned providers no live session refers to.
    fn sweep(&mut self) {
        let sessions = &self.sessions;
        self.providers.sweep(|provider| {
            sessions
                .iter()
                .any(|(_, slot)| slot.state.alive() && slot.provider.as_ref() == Some(provider))
        });
    }

    fn deny(&mut self, id: ServerId) {
        if let Some(slot) = self.sessions.get_mut(id) {
            slot.state.advance(Phase::ServiceDenied);
        }
        self.env
            .parent()
            .session_response(id, SessionResponse::ServiceDenied);
    }
}

/// Forget the provider-side request of a session.
fn release_request(providers: &mut Providers, provider: &Provider, state: &mut SessionState) {
    if let Some(id) = state.take_downstream() {
        if let Some(requests) = providers.requests_mut(provider) {
            requests.release(id);
        }
    }
}

/// Move the quota donated for a session back to our own account.
fn refund(env: &Env, state: &mut SessionState, account: &AccountRef) {
    let donated = state.take_donated();
    if donated.is_zero() {
        return;
    }

    let own = env.account().account_ref();
    if let Err(err) = account.transfer_ram_to(&own, donated.ram_quota) {
        warn!(%err, "cannot return donated RAM quota");
    }
    if let Err(err) = account.transfer_caps_to(&own, donated.cap_quota) {
        warn!(%err, "cannot return donated cap quota");
    }
}
