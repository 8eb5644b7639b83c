//! Routing model.
//!
//! This module defines route rules, their matchers and targets.

pub mod matcher;
pub mod rule;

pub use matcher::{LabelMatcher, ServiceMatcher};
pub use rule::{Route, RouteRule, RouteTarget};
