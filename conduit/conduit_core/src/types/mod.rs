//! Core data types.

pub mod args;
pub mod capability;
pub mod label;
pub mod quota;
pub mod session;
pub mod signal;

pub use args::{Diag, SessionArgs};
pub use capability::{Affinity, Capability};
pub use label::SessionLabel;
pub use quota::{CapQuota, RamQuota, Resources};
pub use session::{Phase, SessionHandle, SessionResponse, SessionState, UpgradeResult};
pub use signal::{signal_context, SignalHandler, SignalReceiver};
