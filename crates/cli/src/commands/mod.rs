pub mod run;
pub mod tools;

use anyhow::Context;
use meshloop_config::AppConfig;
use std::path::Path;

/// Load config from `path` (or the default location) with env overrides applied.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;
    Ok(config)
}
