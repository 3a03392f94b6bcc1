use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::RunnerConfig;
use crate::error::AmuxError;

/// Variable injected when subscription authentication is enabled.
pub const SUBSCRIPTION_VAR: &str = "CLAUDE_USE_SUBSCRIPTION";

/// Build the child environment from the ambient process environment.
///
/// The ambient environment is never mutated; the returned map is owned by
/// the caller and handed to the spawned child exactly once.
pub fn build_environment(config: &RunnerConfig) -> HashMap<String, String> {
    build_environment_from(std::env::vars(), config)
}

/// Pure core of [`build_environment`]: strips the configured credential
/// variable and injects the subscription flag when enabled. Absence of the
/// credential variable is not an error.
pub fn build_environment_from<I>(ambient: I, config: &RunnerConfig) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env: HashMap<String, String> = ambient
        .into_iter()
        .filter(|(name, _)| name != &config.credential_var)
        .collect();

    if config.use_subscription {
        env.insert(SUBSCRIPTION_VAR.to_string(), "true".to_string());
    }

    env
}

/// Resolve a caller-supplied working directory: expand a leading `~`,
/// make it absolute, and require that it names an existing directory.
///
/// Called before any spawn attempt; a nonexistent directory must never
/// silently fall back to a default.
pub fn resolve_working_dir(raw: &str) -> Result<PathBuf, AmuxError> {
    let expanded = expand_home(raw)?;
    let absolute = std::path::absolute(&expanded)?;
    if !absolute.is_dir() {
        return Err(AmuxError::InvalidWorkingDirectory(absolute));
    }
    Ok(absolute)
}

/// Only the caller's own home is expanded. `~user` is rejected outright
/// instead of being probed as a relative `./~user` directory.
fn expand_home(raw: &str) -> Result<PathBuf, AmuxError> {
    if raw == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return Ok(PathBuf::from(home));
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Ok(Path::new(&home).join(rest));
        }
    } else if raw.starts_with('~') {
        return Err(AmuxError::InvalidWorkingDirectory(PathBuf::from(raw)));
    }
    Ok(PathBuf::from(raw))
}
