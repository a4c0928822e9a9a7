//! CLI configuration utilities

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tally_core::Settings;

use crate::logging::LogLevel;

/// Load settings and apply command-line overrides
pub fn load(
    path: Option<&Path>,
    data_dir: Option<PathBuf>,
    log_level: Option<LogLevel>,
) -> Result<Settings> {
    let mut settings = Settings::load(path).with_context(|| match path {
        Some(path) => format!("failed to load configuration from {}", path.display()),
        None => "failed to load configuration".to_string(),
    })?;

    if let Some(dir) = data_dir {
        settings.session.storage_dir = dir;
    }
    if let Some(level) = log_level {
        settings.logging.level = level.as_directive().to_string();
    }
    Ok(settings)
}
