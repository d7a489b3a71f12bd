//! Init and Config commands.

use anyhow::anyhow;

use crate::config::Settings;

/// Create `.mdlive/settings.toml` with default values.
pub fn run_init(force: bool) -> anyhow::Result<()> {
    let path = Settings::init_config_file(force).map_err(|e| anyhow!("{e}"))?;
    println!("Created configuration file at: {}", path.display());
    println!("Edit it to change the bind address, debounce and keepalive.");
    Ok(())
}

/// Print the effective settings as TOML.
pub fn run_config(config: &Settings) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(config)?;
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    println!("{rendered}");
    Ok(())
}
