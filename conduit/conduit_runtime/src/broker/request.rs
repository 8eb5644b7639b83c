//! The provider side of asynchronously answered sessions.

use conduit_core::{Capability, ClientId, Resources, SessionArgs, SessionLabel};
use serde::Serialize;

/// A provider's answer to a posted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResponse {
    /// The session was created
    Deliver(Capability),

    /// The request was refused
    Denied,

    /// The donated RAM quota does not suffice
    InsufficientRam,

    /// The donated cap quota does not suffice
    InsufficientCaps,

    /// A pending upgrade was applied
    UpgradeDone,

    /// The session was closed
    Closed,
}

/// Answer to an upgraded session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeResponse {
    /// The upgrade was applied
    Confirmed,

    /// The upgrade is still being applied
    Deferred,
}

/// Answer to a session to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseResponse {
    /// The session is gone
    Closed,

    /// Closing takes more time
    Deferred,
}

/// A pending create request as seen by local code.
pub struct LocalRequest<'a> {
    id: ClientId,
    label: &'a SessionLabel,
    args: &'a SessionArgs,
    resources: Resources,
    response: Option<ProviderResponse>,
}

impl<'a> LocalRequest<'a> {
    pub(crate) fn new(
        id: ClientId,
        label: &'a SessionLabel,
        args: &'a SessionArgs,
        resources: Resources,
    ) -> Self {
        Self {
            id,
            label,
            args,
            resources,
            response: None,
        }
    }

    /// Id of the request within the service.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Label of the requester.
    pub fn label(&self) -> &SessionLabel {
        self.label
    }

    /// The argument string.
    pub fn args(&self) -> &SessionArgs {
        self.args
    }

    /// Quota donated with the request.
    pub fn resources(&self) -> Resources {
        self.resources
    }

    /// Answer the request with a capability.
    pub fn deliver(&mut self, cap: Capability) {
        self.response = Some(ProviderResponse::Deliver(cap));
    }

    /// Refuse the request.
    pub fn deny(&mut self) {
        self.response = Some(ProviderResponse::Denied);
    }

    /// Refuse the request for lack of RAM quota.
    pub fn deny_insufficient_ram(&mut self) {
        self.response = Some(ProviderResponse::InsufficientRam);
    }

    /// Refuse the request for lack of cap quota.
    pub fn deny_insufficient_caps(&mut self) {
        self.response = Some(ProviderResponse::InsufficientCaps);
    }

    pub(crate) fn into_response(self) -> Option<ProviderResponse> {
        self.response
    }
}

/// What a child is asked to do about one of its sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Create the session
    Create {
        /// Label presented to the child
        label: String,

        /// The argument string
        args: String,

        /// Donated quota
        resources: Resources,
    },

    /// Apply additional quota
    Upgrade {
        /// The quota delta
        resources: Resources,
    },

    /// Release the session
    Close,
}

/// A request pending at a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildRequest {
    /// Name of the service
    pub service: String,

    /// Id of the request within the service
    pub id: u64,

    /// What is requested
    pub kind: RequestKind,
}
