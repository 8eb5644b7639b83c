pub mod replay;
pub mod resolve;
pub mod validate;

use std::path::Path;

use anyhow::{bail, Context, Result};
use conduit_runtime::RuntimeConfig;

/// Load a configuration file that must exist.
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    if !path.exists() {
        bail!("configuration file not found: {}", path.display());
    }
    RuntimeConfig::load(Some(path))
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}
