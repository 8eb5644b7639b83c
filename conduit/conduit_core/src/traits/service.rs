//! The service interface.
//!
//! A service is anything that can provide sessions: a local factory, the
//! parent, or a child component. The broker hands a session to the service
//! its route resolves to and lets the service advance the session's phase.

use crate::account::AccountRef;
use crate::error::SessionError;
use crate::types::session::SessionState;

/// A provider of sessions.
pub trait Service: Send {
    /// Name of the provided service.
    fn name(&self) -> &str;

    /// Perform the work due for the session's current phase.
    ///
    /// The service either advances the phase or leaves it unchanged, which
    /// means the request is still pending and completes later.
    ///
    /// # Arguments
    ///
    /// * `session` - The session to work on.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The work for the phase was done or is pending.
    /// * `Err(SessionError)` - Local quota ran out; the caller may ask the
    ///   parent for more and try again.
    fn initiate_request(&mut self, session: &mut SessionState) -> Result<(), SessionError>;

    /// Notify the provider that requests are waiting.
    fn wakeup(&self) {}

    /// The account session quota is paid into.
    ///
    /// Services without an account of their own return an invalid
    /// reference, which turns quota transfers to them into no-ops.
    fn account(&self) -> AccountRef {
        AccountRef::invalid()
    }

    /// Whether sessions complete asynchronously.
    fn is_async(&self) -> bool {
        false
    }

    /// Whether the service was withdrawn by the configuration.
    fn abandoned(&self) -> bool {
        false
    }
}

/// Notification channel towards the provider of an asynchronous service.
pub trait Wakeup: Send + Sync {
    /// Tell the provider to look at its pending requests.
    fn wakeup_async_service(&self);
}
