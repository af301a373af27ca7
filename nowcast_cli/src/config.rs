// nowcast_cli/src/config.rs

//! Loads the run configuration once, before anything else happens.

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use nowcast_core::config::NowcastConfig;
use std::path::Path;
use tracing::info;

/// Defaults, overlaid with the TOML file if one is given, then validated.
pub fn load_config(path: Option<&Path>) -> Result<NowcastConfig> {
    let figment = match path {
        Some(path) => {
            if !path.is_file() {
                bail!("config file {} does not exist", path.display());
            }
            info!("Loading configuration from: {}", path.display());
            defaults().merge(Toml::file(path))
        }
        None => {
            info!("No configuration file given, using defaults");
            defaults()
        }
    };
    extract(figment).with_context(|| match path {
        Some(p) => format!("failed to load configuration from {}", p.display()),
        None => "invalid default configuration".to_string(),
    })
}

fn defaults() -> Figment {
    Figment::from(Serialized::defaults(NowcastConfig::default()))
}

fn extract(figment: Figment) -> Result<NowcastConfig> {
    let config: NowcastConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}
