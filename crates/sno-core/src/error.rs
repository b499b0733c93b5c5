use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("service '{service}' references unknown node '{node}'")]
    UnknownNode { service: String, node: String },

    #[error("'{referenced_by}' references '{name}', which is not in the topology")]
    UnresolvedService { referenced_by: String, name: String },

    #[error("service name '{0}' is declared more than once")]
    DuplicateService(String),

    #[error("template rendering failed: {0}")]
    Template(String),

    #[error("operation '{operation}' is not allowed in phase {phase}")]
    InvalidPhase { operation: String, phase: String },

    #[error("a handle named '{0}' is already running")]
    HandleExists(String),

    #[error("handle '{0}' was already released")]
    HandleAlreadyReleased(String),

    #[error("run state persistence failed: {0}")]
    State(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
