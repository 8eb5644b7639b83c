//! Routing engine.

pub mod router;

pub use router::Router;
