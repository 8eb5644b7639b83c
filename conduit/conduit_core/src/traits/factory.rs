//! Factories for locally implemented sessions.

use crate::error::SessionError;
use crate::types::args::SessionArgs;
use crate::types::capability::{Affinity, Capability};

/// A session object created by a [`SessionFactory`].
pub trait SessionObject: Send + 'static {
    /// The capability handed to the requester.
    fn cap(&self) -> Capability;
}

/// Creates, upgrades and destroys locally implemented sessions.
pub trait SessionFactory: Send {
    /// The type of session object produced.
    type Session: SessionObject;

    /// Create a session.
    ///
    /// # Errors
    ///
    /// * [`SessionError::ServiceDenied`] - The request is refused.
    /// * [`SessionError::InsufficientRamQuota`] - The donated RAM does not
    ///   cover the session.
    /// * [`SessionError::InsufficientCapQuota`] - The donated caps do not
    ///   cover the session.
    fn create(
        &mut self,
        args: &SessionArgs,
        affinity: Affinity,
    ) -> Result<Self::Session, SessionError>;

    /// Apply an upgrade. `args` carries the delta as `ram_quota`/`cap_quota`.
    fn upgrade(&mut self, session: &mut Self::Session, args: &SessionArgs);

    /// Destroy a session.
    fn destroy(&mut self, session: Self::Session);
}
