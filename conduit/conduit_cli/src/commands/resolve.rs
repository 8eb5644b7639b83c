use std::path::Path;

use anyhow::Result;
use conduit_core::SessionLabel;

use super::load_config;

/// Print where a session request would be forwarded.
pub fn run(config: &Path, service: &str, label: &str) -> Result<()> {
    let config = load_config(config)?;
    let router = config.routing().router();
    let label = SessionLabel::from(label);

    match router.resolve(service, &label) {
        Ok(route) => {
            println!("{}", route.target);
            println!("  rule:    {}", route.rule);
            println!("  service: {}", route.service);
            println!("  label:   \"{}\"", route.label);
        }
        Err(err) => {
            tracing::debug!(%err, "resolution failed");
            println!("denied");
        }
    }
    Ok(())
}
