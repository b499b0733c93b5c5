pub mod command;
pub mod config;
pub mod node;
pub mod phase;
pub mod report;
pub mod topology;

pub use command::{CommandStatus, Completion, NodeResult};
pub use config::{
    ActorSpec, AppConfig, CacheSpec, DatabaseSpec, DeploymentConfig, FrontSpec, HostedService,
    ReadinessConfig, ReadinessStrategy, RegistrySpec, Scalar,
};
pub use node::Node;
pub use phase::DeploymentPhase;
pub use report::{LifecycleReport, StepOutcome, StepRecord};
pub use topology::{Placement, ServiceKind, Topology};
