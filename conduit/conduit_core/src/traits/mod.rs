//! Interfaces between the broker, the services and the parent.

pub mod factory;
pub mod parent;
pub mod service;

pub use factory::{SessionFactory, SessionObject};
pub use parent::Parent;
pub use service::{Service, Wakeup};
