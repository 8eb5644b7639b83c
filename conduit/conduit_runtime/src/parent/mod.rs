//! Access to the parent.

pub mod env;
pub mod expanding;

pub use env::Env;
pub use expanding::{ExpandingParentClient, ENV_PD};
