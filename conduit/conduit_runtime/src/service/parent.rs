//! Services provided by the parent.
//!
//! [`TryParentService`] forwards each phase to the parent once. Running out
//! of local quota is reported to the caller, who owns the account that can
//! be topped up. [`ParentService`] wraps it with a bounded loop that asks
//! the parent for more quota and tries again.

use std::sync::Arc;

use conduit_core::{Phase, Service, SessionError, SessionHandle, SessionState};
use tracing::{debug, error, warn};

use crate::parent::Env;

/// Default number of attempts [`ParentService`] makes.
pub const DEFAULT_RETRY_LIMIT: usize = 10;

/// A parent-provided service, tried once per request.
pub struct TryParentService {
    name: String,
    env: Arc<Env>,
    abandoned: bool,
}

impl TryParentService {
    /// Create a service forwarding to the parent's `name` service.
    pub fn new(env: Arc<Env>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env,
            abandoned: false,
        }
    }

    /// The environment sessions are requested through.
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// Withdraw the service.
    pub fn abandon(&mut self) {
        self.abandoned = true;
    }

    /// Forward the session's current phase to the parent.
    ///
    /// A create attempt that runs out of local quota releases its parent id
    /// and stays in [`Phase::CreateRequested`], so it can be retried.
    pub(crate) fn forward(&mut self, session: &mut SessionState) -> Result<(), SessionError> {
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

    fn create(&self, session: &mut SessionState) -> Result<(), SessionError> {
        let id = match session.downstream() {
            Some(id) => id,
            None => {
                let id = self.env.alloc_id(&self.name);
                session.set_downstream(id);
                id
            }
        };

        match self
            .env
            .try_session(id, &self.name, session.args(), session.affinity())
        {
            Ok(cap) => {
                session.set_handle(SessionHandle::remote(cap));
                session.advance(Phase::Available);
                Ok(())
            }
            Err(err) => {
                if let Some(id) = session.take_downstream() {
                    self.env.release_id(id);
                }
                if err.is_recoverable() {
                    return Err(err);
                }
                if let SessionError::Unexpected(reason) = &err {
                    error!(service = %self.name, %reason, "parent failed session request");
                }
                if let Some(phase) = err.terminal_phase() {
                    session.advance(phase);
                }
                Ok(())
            }
        }
    }

    fn upgrade(&self, session: &mut SessionState) {
        match session.downstream() {
            None => error!(service = %self.name, "invalid parent-session state: {}", session),
            Some(id) => match self.env.upgrade(id, &session.upgrade_args()) {
                Ok(_) => {}
                Err(SessionError::OutOfRam) => {
                    warn!(service = %self.name, "RAM quota exceeded while upgrading parent session")
                }
                Err(SessionError::OutOfCaps) => {
                    warn!(service = %self.name, "cap quota exceeded while upgrading parent session")
                }
                Err(err) => warn!(service = %self.name, %err, "upgrading parent session failed"),
            },
        }
        session.confirm_upgrade();
        session.advance(Phase::CapHandedOut);
    }

    fn close(&self, session: &mut SessionState) {
        if let Some(id) = session.take_downstream() {
            self.env.close(id);
        }
        session.take_handle();
        session.advance(Phase::Closed);
    }
}

impl Service for TryParentService {
    fn name(&self) -> &str {
        &self.name
    }

    fn initiate_request(&mut self, session: &mut SessionState) -> Result<(), SessionError> {
        let result = self.forward(session);
        if let Err(err) = &result {
            if err.is_recoverable() && session.phase() == Phase::CreateRequested {
                session.advance(Phase::Closed);
            }
        }
        result
    }

    fn abandoned(&self) -> bool {
        self.abandoned
    }
}

/// A parent-provided service that asks for more quota when needed.
pub struct ParentService {
    inner: TryParentService,
    retry_limit: usize,
}

impl ParentService {
    /// Create a service forwarding to the parent's `name` service.
    pub fn new(env: Arc<Env>, name: impl Into<String>) -> Self {
        Self::with_retry_limit(env, name, DEFAULT_RETRY_LIMIT)
    }

    /// Create a service making at most `retry_limit` attempts per request.
    pub fn with_retry_limit(env: Arc<Env>, name: impl Into<String>, retry_limit: usize) -> Self {
        Self {
            inner: TryParentService::new(env, name),
            retry_limit,
        }
    }

    /// Withdraw the service.
    pub fn abandon(&mut self) {
        self.inner.abandon();
    }
}

impl Service for ParentService {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn initiate_request(&mut self, session: &mut SessionState) -> Result<(), SessionError> {
        let mut last = SessionError::OutOfRam;

        for attempt in 1..=self.retry_limit {
            match self.inner.forward(session) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_recoverable() => {
                    let resources = session.resources();
                    let request = match err {
                        SessionError::OutOfCaps => format!("cap_quota={}", resources.cap_quota),
                        _ => format!("ram_quota={}", resources.ram_quota),
                    };
                    debug!(service = %self.name(), attempt, %err, "parent session needs more quota");
                    self.inner.env().parent().resource_request(&request);
                    last = err;
                }
                Err(err) => return Err(err),
            }
        }

        error!(service = %self.name(), "parent-session request repeatedly failed");
        if session.phase() == Phase::CreateRequested {
            session.advance(Phase::ServiceDenied);
        }
        Err(last)
    }

    fn abandoned(&self) -> bool {
        self.inner.abandoned()
    }
}
