//! Locally implemented services.
//!
//! A local service answers session requests synchronously by calling a
//! [`SessionFactory`]. The session objects live in a registry owned by the
//! service; a session's handle only records the registry slot.

use std::collections::HashMap;

use conduit_core::{
    Capability, Phase, Service, SessionArgs, SessionError, SessionFactory, SessionHandle,
    SessionObject, SessionState,
};
use tracing::{debug, error};

/// A service whose sessions are created by a local factory.
pub struct LocalService<F: SessionFactory> {
    name: String,
    factory: F,
    objects: HashMap<u64, F::Session>,
    next_slot: u64,
}

impl<F: SessionFactory> LocalService<F> {
    /// Create a local service.
    ///
    /// # Arguments
    ///
    /// * `name` - The service name.
    /// * `factory` - The factory creating the session objects.
    ///
    /// # Returns
    ///
    /// A new local service without sessions.
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            factory,
            objects: HashMap::new(),
            next_slot: 0,
        }
    }

    /// The factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Number of live session objects.
    pub fn session_count(&self) -> usize {
        self.objects.len()
    }

    /// The session object behind a session's handle.
    pub fn object(&self, session: &SessionState) -> Option<&F::Session> {
        let slot = session.handle()?.slot()?;
        self.objects.get(&slot)
    }

    fn create(&mut self, session: &mut SessionState) -> Result<(), SessionError> {
        match self.factory.create(session.args(), session.affinity()) {
            Ok(object) => {
                let slot = self.next_slot;
                self.next_slot += 1;

                let cap = object.cap();
                self.objects.insert(slot, object);
                session.set_handle(SessionHandle::local(cap, slot));
                session.advance(Phase::Available);
                Ok(())
            }
            Err(SessionError::Unexpected(reason)) => {
                error!(service = %self.name, %reason, "unexpected exception during session creation");
                session.advance(Phase::ServiceDenied);
                Ok(())
            }
            Err(err) => match err.terminal_phase() {
                Some(phase) => {
                    debug!(service = %self.name, %err, "session creation refused");
                    session.advance(phase);
                    Ok(())
                }
                None => Err(err),
            },
        }
    }

    fn upgrade(&mut self, session: &mut SessionState) {
        let slot = session.handle().and_then(SessionHandle::slot);
        if let Some(object) = slot.and_then(|slot| self.objects.get_mut(&slot)) {
            self.factory.upgrade(object, &session.upgrade_args());
        }
        session.confirm_upgrade();
        session.advance(Phase::CapHandedOut);
    }

    fn close(&mut self, session: &mut SessionState) {
        let slot = session.take_handle().and_then(|handle| handle.slot());
        if let Some(object) = slot.and_then(|slot| self.objects.remove(&slot)) {
            self.factory.destroy(object);
        }
        session.advance(Phase::Closed);
    }
}

impl<F: SessionFactory> Service for LocalService<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiate_request(&mut self, session: &mut SessionState) -> Result<(), SessionError> {
        match session.phase() {
            Phase::CreateRequested => self.create(session),
            Phase::UpgradeRequested => {
                self.upgrade(session);
                Ok(())
            }
            Phase::CloseRequested => {
                self.close(session);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// The session object handed out by a [`SingleSessionFactory`].
#[derive(Debug, Clone)]
pub struct StaticSession {
    cap: Capability,
}

impl SessionObject for StaticSession {
    fn cap(&self) -> Capability {
        self.cap.clone()
    }
}

/// A factory that hands out the same session object to every requester.
#[derive(Debug, Clone)]
pub struct SingleSessionFactory {
    cap: Capability,
}

impl SingleSessionFactory {
    /// Create a factory for the object behind `cap`.
    pub fn new(cap: Capability) -> Self {
        Self { cap }
    }
}

impl SessionFactory for SingleSessionFactory {
    type Session = StaticSession;

    fn create(
        &mut self,
        _args: &SessionArgs,
        _affinity: conduit_core::Affinity,
    ) -> Result<StaticSession, SessionError> {
        Ok(StaticSession {
            cap: self.cap.clone(),
        })
    }

    fn upgrade(&mut self, _session: &mut StaticSession, _args: &SessionArgs) {}

    fn destroy(&mut self, _session: StaticSession) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{Affinity, CapQuota, RamQuota};

    /// Test session carrying the quota it was created and upgraded with.
    struct Buffer {
        cap: Capability,
        ram: RamQuota,
    }

    impl SessionObject for Buffer {
        fn cap(&self) -> Capability {
            self.cap.clone()
        }
    }

    #[derive(Default)]
    struct BufferFactory {
        destroyed: usize,
        fail_with: Option<SessionError>,
    }

    impl SessionFactory for BufferFactory {
        type Session = Buffer;

        fn create(&mut self, args: &SessionArgs, _affinity: Affinity) -> Result<Buffer, SessionError> {
            if let Some(err) = self.fail_with.clone() {
                return Err(err);
            }
            let ram = args.ram_quota().map_err(|_| SessionError::ServiceDenied)?;
            if ram.value() == 0 {
                return Err(SessionError::InsufficientRamQuota);
            }
            Ok(Buffer {
                cap: Capability::new("Buffer"),
                ram,
            })
        }

        fn upgrade(&mut self, session: &mut Buffer, args: &SessionArgs) {
            session.ram += args.ram_quota().unwrap_or_default();
        }

        fn destroy(&mut self, _session: Buffer) {
            self.destroyed += 1;
        }
    }

    fn session(args: &str) -> SessionState {
        SessionState::new("Buffer", SessionArgs::parse(args).unwrap(), Affinity::default()).unwrap()
    }

    #[test]
    fn test_create_upgrade_close() {
        let mut service = LocalService::new("Buffer", BufferFactory::default());
        let mut s = session("ram_quota=4K, cap_quota=1");

        service.initiate_request(&mut s).unwrap();
        assert_eq!(s.phase(), Phase::Available);
        assert!(s.cap().is_some());
        assert_eq!(service.session_count(), 1);

        s.advance(Phase::CapHandedOut);
        s.request_upgrade(RamQuota(1024), CapQuota(0));
        service.initiate_request(&mut s).unwrap();
        assert_eq!(s.phase(), Phase::CapHandedOut);
        assert_eq!(service.object(&s).unwrap().ram, RamQuota(5 * 1024));
        assert_eq!(s.ram_upgrade(), RamQuota(0));

        s.advance(Phase::CloseRequested);
        service.initiate_request(&mut s).unwrap();
        assert_eq!(s.phase(), Phase::Closed);
        assert!(s.handle().is_none());
        assert_eq!(service.session_count(), 0);
        assert_eq!(service.factory().destroyed, 1);
    }

    #[test]
    fn test_insufficient_ram_is_terminal() {
        let mut service = LocalService::new("Buffer", BufferFactory::default());
        let mut s = session("ram_quota=0");

        service.initiate_request(&mut s).unwrap();
        assert_eq!(s.phase(), Phase::InsufficientRamQuota);
        assert!(s.handle().is_none());
        assert_eq!(service.session_count(), 0);
    }

    #[test]
    fn test_unexpected_failure_is_denied() {
        let factory = BufferFactory {
            fail_with: Some(SessionError::Unexpected("device vanished".into())),
            ..Default::default()
        };
        let mut service = LocalService::new("Buffer", factory);
        let mut s = session("ram_quota=1K");

        service.initiate_request(&mut s).unwrap();
        assert_eq!(s.phase(), Phase::ServiceDenied);
    }

    #[test]
    fn test_local_exhaustion_propagates() {
        let factory = BufferFactory {
            fail_with: Some(SessionError::OutOfRam),
            ..Default::default()
        };
        let mut service = LocalService::new("Buffer", factory);
        let mut s = session("ram_quota=1K");

        assert_eq!(service.initiate_request(&mut s), Err(SessionError::OutOfRam));
        assert_eq!(s.phase(), Phase::CreateRequested);
    }

    #[test]
    fn test_single_session_factory_shares_cap() {
        let cap = Capability::new("Rom");
        let mut service = LocalService::new("Rom", SingleSessionFactory::new(cap.clone()));
        let mut a = session("");
        let mut b = session("");

        service.initiate_request(&mut a).unwrap();
        service.initiate_request(&mut b).unwrap();
        assert_eq!(a.cap(), Some(&cap));
        assert_eq!(b.cap(), Some(&cap));

        a.advance(Phase::CloseRequested);
        service.initiate_request(&mut a).unwrap();
        assert_eq!(service.session_count(), 1);
    }
}
