//! Services whose sessions complete asynchronously.
//!
//! The provider of such a service, a child component or local code running
//! its own dispatch, learns about requests out of band. `initiate_request`
//! therefore never blocks: it registers the request in the service's
//! request space and returns, and the broker applies the provider's
//! answer when it arrives.
//!
//! The variants are layered by composition:
//!
//! - [`AsyncService`] keeps the request space and the wakeup channel,
//! - [`AsyncLocalService`] serves requests answered by local code,
//! - [`ChildService`] adds the child's quota account,
//! - [`RoutedService`] adds abandonment for services the configuration
//!   no longer names.

use std::sync::Arc;

use conduit_core::id_space::Client;
use conduit_core::{
    Account, AccountRef, CapQuota, ClientId, IdSpace, Phase, QuotaAccount, QuotaError, RamQuota,
    ServerId, Service, SessionError, SessionState, Wakeup,
};
use tracing::debug;

/// Request bookkeeping for an asynchronously answered service.
pub struct AsyncService {
    name: String,
    wakeup: Option<Arc<dyn Wakeup>>,
    requests: IdSpace<Client, ServerId>,
}

impl AsyncService {
    /// Create an asynchronous service.
    pub fn new(name: impl Into<String>, wakeup: Option<Arc<dyn Wakeup>>) -> Self {
        Self {
            name: name.into(),
            wakeup,
            requests: IdSpace::new(),
        }
    }

    /// The server-side id of the session behind request `id`.
    pub fn lookup(&self, id: ClientId) -> Option<ServerId> {
        self.requests.get(id).copied()
    }

    /// Forget request `id`, returning the session's server-side id.
    pub fn release(&mut self, id: ClientId) -> Option<ServerId> {
        self.requests.remove(id)
    }

    /// The posted requests with the server-side ids of their sessions.
    pub fn posted(&self) -> Vec<(ClientId, ServerId)> {
        self.requests.iter().map(|(id, server)| (id, *server)).collect()
    }

    /// Number of requests known to the provider.
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Check whether any session still refers to the service.
    pub fn is_idle(&self) -> bool {
        self.requests.is_empty()
    }

    fn drive(&mut self, session: &mut SessionState) -> Result<(), SessionError> {
        match session.phase() {
            Phase::CreateRequested => {
                if session.downstream().is_none() {
                    let server_id = session.id_at_server().ok_or_else(|| {
                        SessionError::Unexpected(
                            "asynchronous session lacks a server-side id".to_string(),
                        )
                    })?;
                    let id = self.requests.alloc(server_id);
                    session.set_downstream(id);
                    debug!(service = %self.name, id = %id, "session request posted");
                }
                session.set_async_client_notify(true);
            }
            Phase::CloseRequested if session.downstream().is_none() => {
                session.take_handle();
                session.advance(Phase::Closed);
            }
            _ => {}
        }
        Ok(())
    }
}

impl Service for AsyncService {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiate_request(&mut self, session: &mut SessionState) -> Result<(), SessionError> {
        self.drive(session)
    }

    fn wakeup(&self) {
        if let Some(wakeup) = &self.wakeup {
            wakeup.wakeup_async_service();
        }
    }

    fn is_async(&self) -> bool {
        true
    }
}

/// A local service answering its requests asynchronously.
///
/// Local code picks up the requests through the broker's
/// `for_each_requested_session`, `for_each_upgraded_session` and
/// `for_each_session_to_close`.
pub struct AsyncLocalService {
    inner: AsyncService,
}

impl AsyncLocalService {
    /// Create a service answered by local code, notified through `wakeup`.
    pub fn new(name: impl Into<String>, wakeup: Option<Arc<dyn Wakeup>>) -> Self {
        Self {
            inner: AsyncService::new(name, wakeup),
        }
    }

    /// The request bookkeeping.
    pub fn requests(&self) -> &AsyncService {
        &self.inner
    }

    /// The request bookkeeping, mutably.
    pub fn requests_mut(&mut self) -> &mut AsyncService {
        &mut self.inner
    }
}

impl Service for AsyncLocalService {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn initiate_request(&mut self, session: &mut SessionState) -> Result<(), SessionError> {
        self.inner.drive(session)
    }

    fn wakeup(&self) {
        self.inner.wakeup();
    }

    fn is_async(&self) -> bool {
        true
    }
}

/// A service provided by a child component.
///
/// Session quota is paid directly into the child's account.
pub struct ChildService {
    inner: AsyncService,
    child: String,
    account: Arc<QuotaAccount>,
}

impl ChildService {
    /// Create a service provided by `child`, paid into `account`.
    pub fn new(
        child: impl Into<String>,
        name: impl Into<String>,
        account: Arc<QuotaAccount>,
        wakeup: Arc<dyn Wakeup>,
    ) -> Self {
        Self {
            inner: AsyncService::new(name, Some(wakeup)),
            child: child.into(),
            account,
        }
    }

    /// Name of the providing child.
    pub fn child(&self) -> &str {
        &self.child
    }

    /// The request bookkeeping.
    pub fn requests(&self) -> &AsyncService {
        &self.inner
    }

    /// The request bookkeeping, mutably.
    pub fn requests_mut(&mut self) -> &mut AsyncService {
        &mut self.inner
    }
}

impl Account for ChildService {
    fn transfer_ram_to(&self, to: &AccountRef, amount: RamQuota) -> Result<(), QuotaError> {
        self.account.transfer_ram_to(to, amount)
    }

    fn transfer_caps_to(&self, to: &AccountRef, amount: CapQuota) -> Result<(), QuotaError> {
        self.account.transfer_caps_to(to, amount)
    }

    fn account_ref(&self) -> AccountRef {
        self.account.account_ref()
    }
}

impl Service for ChildService {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn initiate_request(&mut self, session: &mut SessionState) -> Result<(), SessionError> {
        self.inner.drive(session)
    }

    fn wakeup(&self) {
        self.inner.wakeup();
    }

    fn account(&self) -> AccountRef {
        self.account_ref()
    }

    fn is_async(&self) -> bool {
        true
    }
}

/// A child-provided service reached through a configured route.
///
/// When the configuration stops naming the service it is abandoned: it
/// takes no new sessions and is removed once no session refers to it.
pub struct RoutedService {
    inner: ChildService,
    abandoned: bool,
}

impl RoutedService {
    /// Create a routed service provided by `child`.
    pub fn new(
        child: impl Into<String>,
        name: impl Into<String>,
        account: Arc<QuotaAccount>,
        wakeup: Arc<dyn Wakeup>,
    ) -> Self {
        Self {
            inner: ChildService::new(child, name, account, wakeup),
            abandoned: false,
        }
    }

    /// Name of the providing child.
    pub fn child(&self) -> &str {
        self.inner.child()
    }

    /// Withdraw the service.
    pub fn abandon(&mut self) {
        self.abandoned = true;
    }

    /// The request bookkeeping.
    pub fn requests(&self) -> &AsyncService {
        self.inner.requests()
    }

    /// The request bookkeeping, mutably.
    pub fn requests_mut(&mut self) -> &mut AsyncService {
        self.inner.requests_mut()
    }
}

impl Account for RoutedService {
    fn transfer_ram_to(&self, to: &AccountRef, amount: RamQuota) -> Result<(), QuotaError> {
        self.inner.transfer_ram_to(to, amount)
    }

    fn transfer_caps_to(&self, to: &AccountRef, amount: CapQuota) -> Result<(), QuotaError> {
        self.inner.transfer_caps_to(to, amount)
    }

    fn account_ref(&self) -> AccountRef {
        self.inner.account_ref()
    }
}

impl Service for RoutedService {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn initiate_request(&mut self, session: &mut SessionState) -> Result<(), SessionError> {
        self.inner.initiate_request(session)
    }

    fn wakeup(&self) {
        self.inner.wakeup();
    }

    fn account(&self) -> AccountRef {
        self.inner.account_ref()
    }

    fn is_async(&self) -> bool {
        true
    }

    fn abandoned(&self) -> bool {
        self.abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{Affinity, SessionArgs};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingWakeup(AtomicUsize);

    impl Wakeup for CountingWakeup {
        fn wakeup_async_service(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session(id: u64) -> SessionState {
        let mut s =
            SessionState::new("Fs", SessionArgs::parse("ram_quota=1K").unwrap(), Affinity::default())
                .unwrap();
        s.set_id_at_server(ServerId::new(id));
        s
    }

    #[test]
    fn test_create_posts_request_once() {
        let wakeup = Arc::new(CountingWakeup::default());
        let account = QuotaAccount::shared("fs", RamQuota(0), CapQuota(0));
        let mut service = RoutedService::new("fs", "Fs", account, wakeup.clone());
        let mut s = session(7);

        service.initiate_request(&mut s).unwrap();
        service.initiate_request(&mut s).unwrap();
        service.wakeup();

        assert_eq!(s.phase(), Phase::CreateRequested);
        assert!(s.async_client_notify());
        let id = s.downstream().unwrap();
        assert_eq!(service.requests().lookup(id), Some(ServerId::new(7)));
        assert_eq!(service.requests().request_count(), 1);
        assert_eq!(wakeup.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_without_request_completes_immediately() {
        let mut service = AsyncLocalService::new("Report", None);
        let mut s = session(1);
        s.advance(Phase::CloseRequested);

        service.initiate_request(&mut s).unwrap();
        assert_eq!(s.phase(), Phase::Closed);
    }

    #[test]
    fn test_missing_server_id_is_unexpected() {
        let mut service = AsyncService::new("Fs", None);
        let mut s =
            SessionState::new("Fs", SessionArgs::new(), Affinity::default()).unwrap();
        assert!(matches!(
            service.initiate_request(&mut s),
            Err(SessionError::Unexpected(_))
        ));
    }

    #[test]
    fn test_child_service_delegates_account() {
        let account = QuotaAccount::shared("fs", RamQuota(10), CapQuota(1));
        let env = QuotaAccount::shared("env", RamQuota(0), CapQuota(0));
        let service = ChildService::new(
            "fs",
            "Fs",
            account.clone(),
            Arc::new(CountingWakeup::default()),
        );

        service.transfer_ram_to(&env.account_ref(), RamQuota(4)).unwrap();
        assert_eq!(account.ram(), RamQuota(6));
        assert_eq!(env.ram(), RamQuota(4));
        assert!(Service::account(&service).valid());
    }

    #[test]
    fn test_abandon() {
        let account = QuotaAccount::shared("fs", RamQuota(0), CapQuota(0));
        let mut service =
            RoutedService::new("fs", "Fs", account, Arc::new(CountingWakeup::default()));
        assert!(!service.abandoned());
        service.abandon();
        assert!(service.abandoned());
        assert!(service.requests().is_idle());
    }
}
