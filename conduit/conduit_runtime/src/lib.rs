//! Conduit Runtime - session providers and the session broker
//!
//! This crate turns the building blocks of `conduit_core` into a working
//! broker: the service variants sessions are forwarded to, the client of
//! the parent interface that expands the component's quota on demand, the
//! broker that routes and answers the parent's session requests, and the
//! runtime configuration.

pub mod broker;
pub mod parent;
pub mod service;
pub mod system;

pub use broker::{
    Broker, ChildRequest, CloseResponse, LocalRequest, Provider, ProviderResponse, RequestKind,
    SessionReport, StateReport, UpgradeResponse,
};
pub use parent::{Env, ExpandingParentClient, ENV_PD};
pub use service::{
    AsyncLocalService, AsyncService, ChildService, LocalService, ParentService, RoutedService,
    SingleSessionFactory, StaticSession, TryParentService, DEFAULT_RETRY_LIMIT,
};
pub use system::{ReportConfig, RuntimeConfig};
