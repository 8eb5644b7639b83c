//! The providers a broker forwards sessions to.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use conduit_core::{AccountRef, Service};
use tracing::{debug, info};

use crate::parent::Env;
use crate::service::{AsyncLocalService, AsyncService, ParentService, RoutedService};

/// Reference to the provider serving a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provider {
    /// A synchronous local service
    Local(String),

    /// A local service answering asynchronously
    AsyncLocal(String),

    /// A service requested from the parent under the given name
    Parent(String),

    /// A service announced by a child
    Child {
        /// Name of the child
        child: String,

        /// Name of the service
        service: String,
    },
}

impl Provider {
    /// Whether sessions of the provider complete out of band.
    pub fn is_async(&self) -> bool {
        matches!(self, Self::AsyncLocal(_) | Self::Child { .. })
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(name) => write!(f, "local:{}", name),
            Self::AsyncLocal(name) => write!(f, "async_local:{}", name),
            Self::Parent(name) => write!(f, "parent:{}", name),
            Self::Child { child, service } => write!(f, "child:{}/{}", child, service),
        }
    }
}

/// Result of looking a provider up for a new session.
pub(crate) enum Lookup {
    /// The provider can take the session
    Found(Provider),

    /// The provider may appear later
    NotPresent,

    /// The provider does not exist or was withdrawn
    Missing,
}

/// Registry of all providers known to a broker.
#[derive(Default)]
pub(crate) struct Providers {
    pub(crate) local: BTreeMap<String, Box<dyn Service>>,
    pub(crate) async_local: BTreeMap<String, AsyncLocalService>,
    pub(crate) parents: BTreeMap<String, ParentService>,
    pub(crate) children: BTreeMap<(String, String), RoutedService>,
}

impl Providers {
    /// The service behind a provider reference.
    pub(crate) fn get_mut(&mut self, provider: &Provider) -> Option<&mut (dyn Service + 'static)> {
        match provider {
            Provider::Local(name) => self.local.get_mut(name).map(|s| s.as_mut()),
            Provider::AsyncLocal(name) => self
                .async_local
                .get_mut(name)
                .map(|s| s as &mut (dyn Service + 'static)),
            Provider::Parent(name) => self
                .parents
                .get_mut(name)
                .map(|s| s as &mut (dyn Service + 'static)),
            Provider::Child { child, service } => self
                .children
                .get_mut(&(child.clone(), service.clone()))
                .map(|s| s as &mut (dyn Service + 'static)),
        }
    }

    /// The request bookkeeping of an asynchronous provider.
    pub(crate) fn requests_mut(&mut self, provider: &Provider) -> Option<&mut AsyncService> {
        match provider {
            Provider::AsyncLocal(name) => self.async_local.get_mut(name).map(|s| s.requests_mut()),
            Provider::Child { child, service } => self
                .children
                .get_mut(&(child.clone(), service.clone()))
                .map(|s| s.requests_mut()),
            _ => None,
        }
    }

    /// The account a provider's session quota is paid into.
    pub(crate) fn account(&self, provider: &Provider) -> AccountRef {
        match provider {
            Provider::Local(name) => self
                .local
                .get(name)
                .map(|s| s.account())
                .unwrap_or_else(AccountRef::invalid),
            Provider::Child { child, service } => self
                .children
                .get(&(child.clone(), service.clone()))
                .map(|s| s.account())
                .unwrap_or_else(AccountRef::invalid),
            Provider::AsyncLocal(_) | Provider::Parent(_) => AccountRef::invalid(),
        }
    }

    /// Find the local provider of `name`.
    pub(crate) fn local(&self, name: &str) -> Lookup {
        if let Some(service) = self.local.get(name) {
            if !service.abandoned() {
                return Lookup::Found(Provider::Local(name.to_string()));
            }
        }
        if self.async_local.contains_key(name) {
            return Lookup::Found(Provider::AsyncLocal(name.to_string()));
        }
        Lookup::Missing
    }

    /// Find the parent provider of `name`, creating it on first use.
    pub(crate) fn parent(&mut self, env: &Arc<Env>, name: &str, retry_limit: usize) -> Lookup {
        match self.parents.get(name) {
            Some(service) if service.abandoned() => Lookup::Missing,
            Some(_) => Lookup::Found(Provider::Parent(name.to_string())),
            None => {
                debug!(service = name, "creating parent service");
                self.parents.insert(
                    name.to_string(),
                    ParentService::with_retry_limit(Arc::clone(env), name, retry_limit),
                );
                Lookup::Found(Provider::Parent(name.to_string()))
            }
        }
    }

    /// Find the provider of `service` at `child`.
    pub(crate) fn child(&self, child: &str, service: &str) -> Lookup {
        match self.children.get(&(child.to_string(), service.to_string())) {
            Some(routed) if !routed.abandoned() => Lookup::Found(Provider::Child {
                child: child.to_string(),
                service: service.to_string(),
            }),
            _ => Lookup::NotPresent,
        }
    }

    /// Withdraw every parent service not in `keep`.
    ///
    /// `None` keeps all of them.
    pub(crate) fn abandon_parents(&mut self, keep: Option<&[String]>) {
        let Some(keep) = keep else {
            return;
        };
        for (name, service) in self.parents.iter_mut() {
            if !service.abandoned() && !keep.contains(name) {
                info!(service = %name, "abandoning parent service");
                service.abandon();
            }
        }
    }

    /// Remove abandoned providers for which `in_use` is false.
    pub(crate) fn sweep(&mut self, in_use: impl Fn(&Provider) -> bool) {
        self.parents.retain(|name, service| {
            let keep = !service.abandoned() || in_use(&Provider::Parent(name.clone()));
            if !keep {
                debug!(service = %name, "removing abandoned parent service");
            }
            keep
        });
        self.children.retain(|(child, name), service| {
            let keep = !service.abandoned()
                || in_use(&Provider::Child {
                    child: child.clone(),
                    service: name.clone(),
                });
            if !keep {
                debug!(child = %child, service = %name, "removing abandoned child service");
            }
            keep
        });
    }
}
