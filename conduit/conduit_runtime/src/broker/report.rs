//! State reports.

use chrono::{DateTime, Utc};
use conduit_core::{Phase, Resources};
use serde::Serialize;

use super::Broker;

/// One session in a [`StateReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    /// Id the parent gave the session
    pub id: u64,

    /// Requested service
    pub service: String,

    /// Label of the requester, as presented to the provider
    pub label: String,

    /// Current phase
    pub phase: Phase,

    /// Reserved quota, if reports include resources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,

    /// Id of the forwarded request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downstream: Option<u64>,

    /// Provider the session was routed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Snapshot of all sessions of a broker.
#[derive(Debug, Clone, Serialize)]
pub struct StateReport {
    /// When the snapshot was taken
    pub generated_at: DateTime<Utc>,

    /// The sessions, in ascending id order
    pub sessions: Vec<SessionReport>,
}

impl StateReport {
    /// Number of sessions in `phase`.
    pub fn count(&self, phase: Phase) -> usize {
        self.sessions.iter().filter(|s| s.phase == phase).count()
    }
}

impl Broker {
    /// Take a snapshot of all sessions.
    pub fn state_report(&self) -> StateReport {
        let include_resources = self.config.report.include_resources();

        let sessions = self
            .sessions
            .iter()
            .map(|(id, slot)| SessionReport {
                id: id.value(),
                service: slot.state.service().to_string(),
                label: slot.state.label().to_string(),
                phase: slot.state.phase(),
                resources: include_resources.then(|| slot.state.resources()),
                downstream: slot.state.downstream().map(|id| id.value()),
                provider: slot.provider.as_ref().map(ToString::to_string),
            })
            .collect();

        StateReport {
            generated_at: Utc::now(),
            sessions,
        }
    }

    /// Render a snapshot of all sessions as pretty-printed JSON.
    pub fn generate_state_report(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.state_report())
    }
}
