use std::path::Path;

use crate::error::{OrchestratorError, Result};
use crate::models::DeploymentConfig;

pub fn load(config_path: &Path) -> Result<DeploymentConfig> {
    if !config_path.exists() {
        return Err(OrchestratorError::ConfigNotFound(config_path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(config_path)?;
    parse(&contents)
}

pub fn parse(contents: &str) -> Result<DeploymentConfig> {
    let config: DeploymentConfig = serde_yaml::from_str(contents)
        .map_err(|e| OrchestratorError::InvalidConfig(e.to_string()))?;
    if config.nodes.is_empty() {
        return Err(OrchestratorError::InvalidConfig(
            "nodes section must declare at least one node".into(),
        ));
    }
    if config.app.remote_root.trim_end_matches('/').is_empty() {
        return Err(OrchestratorError::InvalidConfig(
            "app.remote_root must not be the filesystem root".into(),
        ));
    }
    Ok(config)
}
