pub mod cache;
pub mod database;
pub mod inventory;

use std::path::{Path, PathBuf};

pub use cache::{CacheDeployer, MonitorSeries};
pub use database::DatabaseDeployer;
pub use inventory::ArtifactCollector;

use super::remote::RemoteClient;
use crate::error::Result;
use crate::models::{AppConfig, CommandStatus};

/// Where things live: the application root on every node, and the local
/// staging, input, and output directories.
#[derive(Debug, Clone)]
pub struct Layout {
    pub remote_root: String,
    pub staging_dir: PathBuf,
    pub data_dir: PathBuf,
    pub resources_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Layout {
    pub fn new(app: &AppConfig, output_dir: &Path) -> Self {
        Self {
            remote_root: app.remote_root.trim_end_matches('/').to_string(),
            staging_dir: app.staging_dir.clone(),
            data_dir: app.data_dir.clone(),
            resources_dir: app.resources_dir.clone(),
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Absolute remote path of `relative` under the application root.
    pub fn remote(&self, relative: &str) -> String {
        format!("{}/{relative}", self.remote_root)
    }

    /// Local output directory of the node at `address`.
    pub fn node_output(&self, address: &str) -> PathBuf {
        self.output_dir.join(address)
    }

    /// Wipe and recreate the application root. Safe to run repeatedly.
    pub fn reset_command(&self) -> String {
        let root = &self.remote_root;
        format!("cd /tmp/ ; rm -rf {root} ; mkdir -p {root}/resources ; mkdir -p {root}/logs")
    }

    /// Name of the cgroup parent that application processes are grouped under.
    pub fn cgroup_parent(&self) -> &str {
        self.remote_root
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("SocialNetworkAKKA")
    }

    /// Compose invocation on a descriptor uploaded under the root.
    pub fn compose(&self, descriptor: &str, action: &str) -> String {
        format!("docker-compose -f {} {action}", self.remote(descriptor))
    }
}

/// A backing service brought up before the application and torn down after it.
pub enum ServiceDeployer {
    Database(DatabaseDeployer),
    Cache(CacheDeployer),
    Artifacts(ArtifactCollector),
}

impl ServiceDeployer {
    pub fn name(&self) -> &str {
        match self {
            ServiceDeployer::Database(d) => d.name(),
            ServiceDeployer::Cache(c) => c.name(),
            ServiceDeployer::Artifacts(_) => "docker-inventory",
        }
    }

    pub async fn start(&mut self, client: &RemoteClient) -> Result<CommandStatus> {
        match self {
            ServiceDeployer::Database(d) => d.start(client).await,
            ServiceDeployer::Cache(c) => c.start(client).await,
            ServiceDeployer::Artifacts(a) => Ok(a.start(client).await),
        }
    }

    /// Post-start data loading. Only databases have any.
    pub async fn fill(&mut self, client: &RemoteClient) -> CommandStatus {
        match self {
            ServiceDeployer::Database(d) => d.fill(client).await,
            ServiceDeployer::Cache(_) | ServiceDeployer::Artifacts(_) => CommandStatus::ok(),
        }
    }

    /// Bring the service down. Never stops early: local failures are folded
    /// into the returned status.
    pub async fn kill(&mut self, client: &RemoteClient) -> CommandStatus {
        match self {
            ServiceDeployer::Database(d) => d.kill(client).await,
            ServiceDeployer::Cache(c) => c.kill(client).await,
            ServiceDeployer::Artifacts(a) => a.kill(client).await,
        }
    }
}
