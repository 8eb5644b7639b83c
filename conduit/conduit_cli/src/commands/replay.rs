//! Replay of scripted session requests.
//!
//! A script lists the local services to provide and the requests our
//! parent sends, for example
//!
//! ```toml
//! local_services = ["log"]
//!
//! [[requests]]
//! op = "create"
//! id = 1
//! service = "Log"
//! args = 'ram_quota=4K, label="app"'
//!
//! [[requests]]
//! op = "close"
//! id = 1
//! ```
//!
//! Local services are backed by a demo factory that refuses sessions
//! donating no RAM. Requests routed to the parent are granted by a demo
//! parent.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use conduit_core::{
    AccountRef, Affinity, CapQuota, Capability, ClientId, Parent, QuotaAccount, RamQuota,
    ServerId, SessionArgs, SessionError, SessionFactory, SessionObject, SessionResponse,
    SignalHandler, UpgradeResult,
};
use conduit_routing::config::read;
use conduit_runtime::{Broker, Env, LocalService};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{info, warn};

use super::load_config;

fn default_env_ram_quota() -> u64 {
    1024 * 1024
}

fn default_env_cap_quota() -> u64 {
    100
}

/// A replay script.
#[derive(Debug, Deserialize)]
struct Script {
    /// RAM quota of the component's own account
    #[serde(default = "default_env_ram_quota")]
    env_ram_quota: u64,

    /// Cap quota of the component's own account
    #[serde(default = "default_env_cap_quota")]
    env_cap_quota: u64,

    /// Names of the local services to provide
    #[serde(default)]
    local_services: Vec<String>,

    /// The requests, in arrival order
    #[serde(default)]
    requests: Vec<Request>,
}

/// A request of the parent.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Create {
        id: u64,
        service: String,
        #[serde(default)]
        args: String,
    },
    Upgrade {
        id: u64,
        #[serde(default)]
        ram_quota: u64,
        #[serde(default)]
        cap_quota: u64,
    },
    Close {
        id: u64,
    },
    Reap,
}

/// A parent that grants every session and logs the answers it receives.
struct DemoParent {
    account: Arc<QuotaAccount>,
    sigh: Mutex<Option<SignalHandler>>,
}

impl Parent for DemoParent {
    fn session(
        &self,
        id: ClientId,
        service: &str,
        args: &SessionArgs,
        _affinity: Affinity,
    ) -> Result<Capability, SessionError> {
        info!(id = %id, service, %args, "parent grants session");
        Ok(Capability::new(service))
    }

    fn upgrade(&self, _id: ClientId, _args: &SessionArgs) -> Result<UpgradeResult, SessionError> {
        Ok(UpgradeResult::Done)
    }

    fn close(&self, id: ClientId) {
        info!(id = %id, "parent closes session");
    }

    fn resource_request(&self, args: &str) {
        info!(args, "parent declines resource request");
        if let Some(sigh) = self.sigh.lock().as_ref() {
            sigh.submit();
        }
    }

    fn resource_avail_sigh(&self, sigh: Option<SignalHandler>) {
        *self.sigh.lock() = sigh;
    }

    fn deliver_session_cap(&self, id: ServerId, cap: Capability) {
        info!(id = %id, %cap, "session delivered");
    }

    fn session_response(&self, id: ServerId, response: SessionResponse) {
        info!(id = %id, ?response, "session response");
    }

    fn account(&self) -> AccountRef {
        AccountRef::from(&self.account)
    }
}

struct DemoSession {
    cap: Capability,
}

impl SessionObject for DemoSession {
    fn cap(&self) -> Capability {
        self.cap.clone()
    }
}

/// Factory behind the scripted local services.
struct DemoFactory {
    service: String,
}

impl SessionFactory for DemoFactory {
    type Session = DemoSession;

    fn create(
        &mut self,
        args: &SessionArgs,
        _affinity: Affinity,
    ) -> Result<DemoSession, SessionError> {
        let ram = args
            .ram_quota()
            .map_err(|e| SessionError::Unexpected(e.to_string()))?;
        if ram.value() == 0 {
            return Err(SessionError::InsufficientRamQuota);
        }
        Ok(DemoSession {
            cap: Capability::new(self.service.clone()),
        })
    }

    fn upgrade(&mut self, _session: &mut DemoSession, _args: &SessionArgs) {}

    fn destroy(&mut self, _session: DemoSession) {}
}

/// Run a script against a broker and print the resulting state report.
pub fn run(config: &Path, script: &Path) -> Result<()> {
    let config = load_config(config)?;
    let script: Script = read(script)
        .with_context(|| format!("failed to load script from {}", script.display()))?;

    let account = QuotaAccount::shared(
        "env",
        RamQuota(script.env_ram_quota),
        CapQuota(script.env_cap_quota),
    );
    let parent = Arc::new(DemoParent {
        account: QuotaAccount::shared("parent", RamQuota(0), CapQuota(0)),
        sigh: Mutex::new(None),
    });
    let env = Arc::new(Env::new(parent, account));
    let mut broker = Broker::new(env, config);

    for name in &script.local_services {
        broker.register_local_service(LocalService::new(
            name.clone(),
            DemoFactory {
                service: name.clone(),
            },
        ));
    }

    for request in script.requests {
        let result = match request {
            Request::Create { id, service, args } => {
                broker.handle_create(ServerId::new(id), &service, &args, Affinity::default())
            }
            Request::Upgrade {
                id,
                ram_quota,
                cap_quota,
            } => broker.handle_upgrade(
                ServerId::new(id),
                RamQuota(ram_quota),
                CapQuota(cap_quota),
            ),
            Request::Close { id } => broker.handle_close(ServerId::new(id)),
            Request::Reap => {
                broker.reap_closed();
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(%err, "request rejected");
        }
    }

    if broker.config().report.enabled {
        println!("{}", broker.generate_state_report()?);
    }
    Ok(())
}
