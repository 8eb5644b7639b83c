//! # Conduit Routing
//!
//! `conduit_routing` decides which provider serves a session request.
//!
//! Key concepts:
//!
//! 1. **Route Rule**: selects requests by service name and requester label
//!    and names a target: a local service, the parent, or a child.
//!
//! 2. **Router**: tries the rules in declaration order; the first match
//!    wins, and no match means the request is denied.
//!
//! 3. **Routing Configuration**: a rule list loaded from TOML or JSON.

pub mod config;
pub mod engine;
pub mod model;

pub use config::{ConfigError, RoutingConfig};
pub use engine::Router;
pub use model::{LabelMatcher, Route, RouteRule, RouteTarget, ServiceMatcher};
