//! The session state machine.
//!
//! A [`SessionState`] describes one session from the moment the request
//! arrives until it is reaped after reaching [`Phase::Closed`]. The phase is
//! advanced by the service that provides the session; the remaining fields
//! must stay consistent with it:
//!
//! | Phase | handle | downstream id |
//! |---|---|---|
//! | `CREATE_REQUESTED` | absent | may be present |
//! | `AVAILABLE`, `CAP_HANDED_OUT`, `UPGRADE_REQUESTED` | present | present if remote |
//! | `CLOSE_REQUESTED` | any | any |
//! | `CLOSED` | absent | absent |
//! | create failures | absent | absent |

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::error::ArgsError;
use crate::id_space::{ClientId, ServerId};
use crate::types::args::{Diag, SessionArgs};
use crate::types::capability::{Affinity, Capability};
use crate::types::label::SessionLabel;
use crate::types::quota::{CapQuota, RamQuota, Resources};

/// Lifecycle phase of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Request posted, not yet answered
    CreateRequested,

    /// Create refused by routing or by the provider
    ServiceDenied,

    /// Create refused because the donated RAM quota is too small
    InsufficientRamQuota,

    /// Create refused because the donated cap quota is too small
    InsufficientCapQuota,

    /// Provider created the session, capability not yet delivered
    Available,

    /// Requester holds the session capability
    CapHandedOut,

    /// Additional quota is pending application
    UpgradeRequested,

    /// Close initiated, provider must release the session
    CloseRequested,

    /// Fully released
    Closed,
}

impl Phase {
    /// Check whether the phase ends a failed create attempt.
    pub fn is_create_failure(self) -> bool {
        matches!(
            self,
            Self::ServiceDenied | Self::InsufficientRamQuota | Self::InsufficientCapQuota
        )
    }

    /// Check whether the provider has created the session.
    pub fn is_established(self) -> bool {
        matches!(
            self,
            Self::Available | Self::CapHandedOut | Self::UpgradeRequested
        )
    }

    /// Phases reachable from this one in a single step.
    pub fn valid_next(self) -> &'static [Phase] {
        use Phase::*;
        match self {
            CreateRequested => &[
                Available,
                ServiceDenied,
                InsufficientRamQuota,
                InsufficientCapQuota,
                CloseRequested,
                Closed,
            ],
            ServiceDenied | InsufficientRamQuota | InsufficientCapQuota => {
                &[CloseRequested, Closed]
            }
            Available => &[CapHandedOut, UpgradeRequested, CloseRequested],
            CapHandedOut => &[UpgradeRequested, CloseRequested],
            UpgradeRequested => &[CapHandedOut, CloseRequested],
            CloseRequested => &[Closed],
            Closed => &[],
        }
    }

    /// Check whether `next` is reachable from this phase in one step.
    pub fn can_transition_to(self, next: Phase) -> bool {
        self.valid_next().contains(&next)
    }

    /// The phase's canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateRequested => "CREATE_REQUESTED",
            Self::ServiceDenied => "SERVICE_DENIED",
            Self::InsufficientRamQuota => "INSUFFICIENT_RAM_QUOTA",
            Self::InsufficientCapQuota => "INSUFFICIENT_CAP_QUOTA",
            Self::Available => "AVAILABLE",
            Self::CapHandedOut => "CAP_HANDED_OUT",
            Self::UpgradeRequested => "UPGRADE_REQUESTED",
            Self::CloseRequested => "CLOSE_REQUESTED",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a parent-issued session request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionResponse {
    /// The create request was refused
    ServiceDenied,

    /// The donated RAM quota did not suffice
    InsufficientRamQuota,

    /// The donated cap quota did not suffice
    InsufficientCapQuota,

    /// An upgrade was applied
    SessionOk,

    /// A close request was carried out
    SessionClosed,
}

impl SessionResponse {
    /// The response reporting a failed create attempt in `phase`.
    pub fn for_create_failure(phase: Phase) -> Option<Self> {
        match phase {
            Phase::ServiceDenied => Some(Self::ServiceDenied),
            Phase::InsufficientRamQuota => Some(Self::InsufficientRamQuota),
            Phase::InsufficientCapQuota => Some(Self::InsufficientCapQuota),
            _ => None,
        }
    }
}

/// Outcome of an upgrade forwarded to the parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeResult {
    /// The quota was applied
    Done,

    /// The parent will apply the quota later
    Pending,
}

/// The provider-side object behind an established session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionHandle {
    cap: Capability,
    slot: Option<u64>,
}

impl SessionHandle {
    /// A handle to a session provided by another component.
    pub fn remote(cap: Capability) -> Self {
        Self { cap, slot: None }
    }

    /// A handle to a session object kept in a local registry under `slot`.
    pub fn local(cap: Capability, slot: u64) -> Self {
        Self {
            cap,
            slot: Some(slot),
        }
    }

    /// The session capability.
    pub fn cap(&self) -> &Capability {
        &self.cap
    }

    /// Registry slot of a locally implemented session object.
    pub fn slot(&self) -> Option<u64> {
        self.slot
    }
}

/// State of one session.
#[derive(Debug)]
pub struct SessionState {
    service: String,
    label: SessionLabel,
    args: SessionArgs,
    affinity: Affinity,
    resources: Resources,
    diag: Diag,
    phase: Phase,
    handle: Option<SessionHandle>,
    id_at_server: Option<ServerId>,
    downstream: Option<ClientId>,
    ram_upgrade: RamQuota,
    cap_upgrade: CapQuota,
    donated: Resources,
    async_client_notify: bool,
    abandoned: bool,
}

impl SessionState {
    /// Create a session in [`Phase::CreateRequested`].
    ///
    /// The reserved resources, label and diagnostic flags are taken from
    /// `args` once and never re-read.
    ///
    /// # Errors
    ///
    /// Returns an [`ArgsError`] if a quota value cannot be parsed.
    pub fn new(
        service: impl Into<String>,
        args: SessionArgs,
        affinity: Affinity,
    ) -> Result<Self, ArgsError> {
        let resources = args.resources()?;
        Ok(Self {
            service: service.into(),
            label: args.label(),
            diag: args.diag(),
            args,
            affinity,
            resources,
            phase: Phase::CreateRequested,
            handle: None,
            id_at_server: None,
            downstream: None,
            ram_upgrade: RamQuota::default(),
            cap_upgrade: CapQuota::default(),
            donated: Resources::default(),
            async_client_notify: false,
            abandoned: false,
        })
    }

    /// Name of the requested service.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Label of the requester.
    pub fn label(&self) -> &SessionLabel {
        &self.label
    }

    /// The argument string.
    pub fn args(&self) -> &SessionArgs {
        &self.args
    }

    /// The placement hint.
    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    /// Quota reserved at creation.
    pub fn resources(&self) -> Resources {
        self.resources
    }

    /// Diagnostic flags.
    pub fn diag(&self) -> Diag {
        self.diag
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next`.
    ///
    /// Steps not permitted by the state machine are refused and logged.
    /// Returns whether the phase changed.
    pub fn advance(&mut self, next: Phase) -> bool {
        if self.phase == next {
            return true;
        }
        if !self.phase.can_transition_to(next) {
            warn!(
                service = %self.service,
                from = %self.phase,
                to = %next,
                "refusing invalid session phase transition"
            );
            return false;
        }
        debug!(service = %self.service, label = %self.label, from = %self.phase, to = %next, "session phase");
        self.phase = next;
        true
    }

    /// Replace the label, in the argument string as well.
    ///
    /// Used when a route rewrites the requester's label before forwarding.
    pub fn relabel(&mut self, label: SessionLabel) {
        self.args.set_label(&label);
        self.label = label;
    }

    /// The provider-side handle, once established.
    pub fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    /// The session capability, once established.
    pub fn cap(&self) -> Option<&Capability> {
        self.handle.as_ref().map(SessionHandle::cap)
    }

    /// Attach the provider-side handle.
    pub fn set_handle(&mut self, handle: SessionHandle) {
        self.handle = Some(handle);
    }

    /// Detach the provider-side handle.
    pub fn take_handle(&mut self) -> Option<SessionHandle> {
        self.handle.take()
    }

    /// Id under which our parent knows this session.
    pub fn id_at_server(&self) -> Option<ServerId> {
        self.id_at_server
    }

    /// Record the id under which our parent knows this session.
    pub fn set_id_at_server(&mut self, id: ServerId) {
        self.id_at_server = Some(id);
    }

    /// Id of the request forwarded on this session's behalf.
    pub fn downstream(&self) -> Option<ClientId> {
        self.downstream
    }

    /// Record the id of the forwarded request.
    pub fn set_downstream(&mut self, id: ClientId) {
        self.downstream = Some(id);
    }

    /// Forget the id of the forwarded request, returning it for release.
    pub fn take_downstream(&mut self) -> Option<ClientId> {
        self.downstream.take()
    }

    /// Pending RAM upgrade.
    pub fn ram_upgrade(&self) -> RamQuota {
        self.ram_upgrade
    }

    /// Pending cap upgrade.
    pub fn cap_upgrade(&self) -> CapQuota {
        self.cap_upgrade
    }

    /// Record an upgrade and move to [`Phase::UpgradeRequested`].
    ///
    /// Deltas of upgrades that arrive while one is pending accumulate.
    pub fn request_upgrade(&mut self, ram: RamQuota, caps: CapQuota) -> bool {
        if !self.advance(Phase::UpgradeRequested) {
            return false;
        }
        self.ram_upgrade += ram;
        self.cap_upgrade += caps;
        true
    }

    /// Take back an upgrade request whose quota was never paid.
    ///
    /// Subtracts the deltas and returns the session to `previous`, unless
    /// the service already moved it out of [`Phase::UpgradeRequested`].
    pub fn revert_upgrade(&mut self, ram: RamQuota, caps: CapQuota, previous: Phase) {
        if self.phase != Phase::UpgradeRequested {
            return;
        }
        self.ram_upgrade = RamQuota(self.ram_upgrade.value().saturating_sub(ram.value()));
        self.cap_upgrade = CapQuota(self.cap_upgrade.value().saturating_sub(caps.value()));
        debug!(service = %self.service, to = %previous, "upgrade request reverted");
        self.phase = previous;
    }

    /// The pending upgrade as an argument string.
    pub fn upgrade_args(&self) -> SessionArgs {
        SessionArgs::upgrade(self.ram_upgrade, self.cap_upgrade)
    }

    /// Mark the pending upgrade as applied.
    pub fn confirm_upgrade(&mut self) {
        self.ram_upgrade = RamQuota::default();
        self.cap_upgrade = CapQuota::default();
    }

    /// Quota moved to the provider on this session's behalf so far.
    pub fn donated(&self) -> Resources {
        self.donated
    }

    /// Record quota moved to the provider.
    pub fn add_donated(&mut self, resources: Resources) {
        self.donated += resources;
    }

    /// Forget the donation record, returning it for refund.
    pub fn take_donated(&mut self) -> Resources {
        std::mem::take(&mut self.donated)
    }

    /// Whether the requester is told about completion asynchronously.
    pub fn async_client_notify(&self) -> bool {
        self.async_client_notify
    }

    /// Request asynchronous completion notification.
    pub fn set_async_client_notify(&mut self, notify: bool) {
        self.async_client_notify = notify;
    }

    /// Mark the session as given up by its requester.
    ///
    /// A provider completion arriving afterwards must not make the session
    /// available.
    pub fn abandon(&mut self) {
        self.abandoned = true;
    }

    /// Check whether the requester gave up on the session.
    pub fn abandoned(&self) -> bool {
        self.abandoned
    }

    /// Check whether the session is still alive.
    pub fn alive(&self) -> bool {
        self.phase != Phase::Closed
    }

    /// Check the phase against the presence of handle and downstream id.
    pub fn is_consistent(&self) -> bool {
        match self.phase {
            Phase::CreateRequested => self.handle.is_none(),
            Phase::Available | Phase::CapHandedOut | Phase::UpgradeRequested => {
                self.handle.is_some()
            }
            Phase::CloseRequested => true,
            Phase::Closed
            | Phase::ServiceDenied
            | Phase::InsufficientRamQuota
            | Phase::InsufficientCapQuota => self.handle.is_none() && self.downstream.is_none(),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (label=\"{}\", {}, phase={})",
            self.service, self.label, self.resources, self.phase
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(args: &str) -> SessionState {
        SessionState::new("Log", SessionArgs::parse(args).unwrap(), Affinity::default()).unwrap()
    }

    #[test]
    fn test_new_session_parses_resources_once() {
        let s = session("ram_quota=4K, cap_quota=2, label=\"app\"");
        assert_eq!(s.phase(), Phase::CreateRequested);
        assert_eq!(s.resources(), Resources::new(RamQuota(4096), CapQuota(2)));
        assert_eq!(s.label().as_str(), "app");
        assert!(s.is_consistent());
    }

    #[test]
    fn test_invalid_transition_is_refused() {
        let mut s = session("");
        assert!(!s.advance(Phase::CapHandedOut));
        assert_eq!(s.phase(), Phase::CreateRequested);

        assert!(s.advance(Phase::ServiceDenied));
        assert!(!s.advance(Phase::Available));
        assert!(s.advance(Phase::Closed));
        assert!(!s.advance(Phase::CloseRequested));
    }

    #[test]
    fn test_upgrade_deltas_accumulate() {
        let mut s = session("ram_quota=1K");
        s.set_handle(SessionHandle::remote(Capability::new("Log")));
        s.advance(Phase::Available);

        assert!(s.request_upgrade(RamQuota(100), CapQuota(1)));
        assert!(s.request_upgrade(RamQuota(50), CapQuota(0)));
        assert_eq!(s.upgrade_args().to_string(), "ram_quota=150, cap_quota=1");

        s.confirm_upgrade();
        assert_eq!(s.ram_upgrade(), RamQuota(0));
        assert!(s.advance(Phase::CapHandedOut));
    }

    #[test]
    fn test_reverted_upgrade_keeps_earlier_deltas() {
        let mut s = session("ram_quota=1K");
        s.set_handle(SessionHandle::remote(Capability::new("Log")));
        s.advance(Phase::Available);
        s.advance(Phase::CapHandedOut);

        assert!(s.request_upgrade(RamQuota(100), CapQuota(1)));
        assert!(s.request_upgrade(RamQuota(50), CapQuota(2)));
        s.revert_upgrade(RamQuota(50), CapQuota(2), Phase::UpgradeRequested);
        assert_eq!(s.phase(), Phase::UpgradeRequested);
        assert_eq!(s.upgrade_args().to_string(), "ram_quota=100, cap_quota=1");

        s.revert_upgrade(RamQuota(100), CapQuota(1), Phase::CapHandedOut);
        assert_eq!(s.phase(), Phase::CapHandedOut);
        assert_eq!(s.ram_upgrade(), RamQuota(0));
        assert_eq!(s.cap_upgrade(), CapQuota(0));
    }

    #[test]
    fn test_upgrade_refused_before_establishment() {
        let mut s = session("");
        assert!(!s.request_upgrade(RamQuota(1), CapQuota(1)));
        assert_eq!(s.ram_upgrade(), RamQuota(0));
    }

    #[test]
    fn test_consistency_table() {
        let mut s = session("");
        s.set_downstream(ClientId::new(3));
        assert!(s.is_consistent());

        s.advance(Phase::Closed);
        assert!(!s.is_consistent());
        assert_eq!(s.take_downstream(), Some(ClientId::new(3)));
        assert!(s.is_consistent());
    }

    #[test]
    fn test_relabel_rewrites_args() {
        let mut s = session("ram_quota=1, label=\"a\"");
        s.relabel(SessionLabel::from("b"));
        assert_eq!(s.label().as_str(), "b");
        assert_eq!(s.args().label().as_str(), "b");
        assert_eq!(s.resources().ram_quota, RamQuota(1));
    }

    #[test]
    fn test_phase_serializes_screaming() {
        assert_eq!(Phase::CapHandedOut.to_string(), "CAP_HANDED_OUT");
        assert_eq!(
            serde_json::to_string(&Phase::InsufficientRamQuota).unwrap(),
            "\"INSUFFICIENT_RAM_QUOTA\""
        );
    }
}
