use std::path::{Path, PathBuf};

use crate::error::{Result, WharfError};
use crate::models::WharfConfig;

pub const CONFIG_FILENAME: &str = "wharf.yaml";
pub const CONFIG_ENV_VAR: &str = "WHARF_CONFIG";

/// Load and validate a config file.
pub fn load(config_path: &Path) -> Result<WharfConfig> {
    if !config_path.exists() {
        return Err(WharfError::ConfigNotFound(config_path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(config_path)?;
    let config: WharfConfig = serde_yaml::from_str(&contents)
        .map_err(|e| WharfError::InvalidConfig(e.to_string()))?;
    finish(config)
}

/// Resolve the config location: explicit path, then `WHARF_CONFIG`, then
/// `wharf.yaml` in the current directory. A path named by the flag or the
/// environment has to exist; a missing `wharf.yaml` means defaults.
pub fn load_or_default(explicit: Option<&Path>) -> Result<WharfConfig> {
    let from_env = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    resolve(explicit, from_env.as_deref())
}

fn resolve(explicit: Option<&Path>, from_env: Option<&Path>) -> Result<WharfConfig> {
    if let Some(path) = explicit.or(from_env) {
        return load(path);
    }
    match load(Path::new(CONFIG_FILENAME)) {
        Ok(config) => Ok(config),
        Err(WharfError::ConfigNotFound(_)) => finish(WharfConfig::default()),
        Err(e) => Err(e),
    }
}

/// Validate and pin `dataDir` to an absolute path. Every path derived from
/// it is handed to external processes running in other directories.
fn finish(mut config: WharfConfig) -> Result<WharfConfig> {
    config.validate()?;
    config.data_dir = std::path::absolute(&config.data_dir)?;
    Ok(config)
}
