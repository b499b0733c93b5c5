use std::fmt;

use serde::Serialize;

/// Lifecycle of one orchestrator instance. Startup moves strictly forward;
/// teardown can be entered from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeploymentPhase {
    Unconfigured,
    NodesReady,
    ServicesUp,
    RegistryUp,
    FrontUp,
    ActorsUp,
    Running,
    TearingDown,
    Stopped,
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeploymentPhase::Unconfigured => "unconfigured",
            DeploymentPhase::NodesReady => "nodes-ready",
            DeploymentPhase::ServicesUp => "services-up",
            DeploymentPhase::RegistryUp => "registry-up",
            DeploymentPhase::FrontUp => "front-up",
            DeploymentPhase::ActorsUp => "actors-up",
            DeploymentPhase::Running => "running",
            DeploymentPhase::TearingDown => "tearing-down",
            DeploymentPhase::Stopped => "stopped",
        };
        f.write_str(label)
    }
}
