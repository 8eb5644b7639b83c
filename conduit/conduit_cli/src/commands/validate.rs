use std::path::Path;

use anyhow::Result;

use super::load_config;

/// Load a configuration and summarize it.
pub fn run(config: &Path) -> Result<()> {
    let loaded = load_config(config)?;

    println!("configuration valid: {}", config.display());
    println!("  parent retry limit: {}", loaded.parent_retry_limit);
    println!("  routes: {}", loaded.routes.len());
    for (index, rule) in loaded.routes.iter().enumerate() {
        println!("    {}: {}", index, rule);
    }
    Ok(())
}
