use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{OrchestratorError, Result};
use crate::models::{DeploymentConfig, HostedService, Placement, ServiceKind, Topology};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub addr: String,
    pub port: u16,
}

impl From<&Placement> for Endpoint {
    fn from(placement: &Placement) -> Self {
        Self {
            addr: placement.address.clone(),
            port: placement.port,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryConfig {
    pub addr: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrontConfig {
    pub addr: String,
    #[serde(rename = "httpPort")]
    pub http_port: u16,
    /// Actor-protocol port.
    pub port: u16,
    pub registry: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendEndpoint {
    #[serde(rename = "type")]
    pub engine: String,
    pub addr: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActorConfig {
    pub addr: String,
    pub port: u16,
    pub registry: Endpoint,
    pub services: BTreeMap<String, HostedService>,
    pub databases: BTreeMap<String, BackendEndpoint>,
    pub caches: BTreeMap<String, BackendEndpoint>,
}

/// A rendered document for one service binary, not yet written anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedConfig {
    /// Logical service the document belongs to (`#registry`, `#front`, or an actor name).
    pub service: String,
    pub file_name: String,
    pub contents: String,
}

impl GeneratedConfig {
    fn new<T: Serialize>(service: &str, file_stem: &str, document: &T) -> Result<Self> {
        Ok(Self {
            service: service.to_string(),
            file_name: format!("{file_stem}.yaml"),
            contents: serde_yaml::to_string(document)?,
        })
    }

    /// Write into the local staging directory, replacing any previous copy.
    pub async fn write_to(&self, staging_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(staging_dir).await?;
        let path = staging_dir.join(&self.file_name);
        tokio::fs::write(&path, &self.contents).await?;
        Ok(path)
    }
}

/// Renders the registry, front, and actor documents from the topology.
/// Pure: no I/O, and ordered maps keep the output byte-stable.
pub struct ConfigSynthesizer<'a> {
    topology: &'a Topology,
    config: &'a DeploymentConfig,
}

impl<'a> ConfigSynthesizer<'a> {
    pub fn new(topology: &'a Topology, config: &'a DeploymentConfig) -> Self {
        Self { topology, config }
    }

    pub fn registry(&self) -> Result<GeneratedConfig> {
        let registry = self.topology.registry();
        let document = RegistryConfig {
            addr: registry.address.clone(),
            port: registry.port,
        };
        GeneratedConfig::new(Topology::REGISTRY, "registry", &document)
    }

    pub fn front(&self) -> Result<GeneratedConfig> {
        let front = self.topology.front();
        let document = FrontConfig {
            addr: front.address.clone(),
            http_port: self.config.front.http_port,
            port: self.config.front.actor_port,
            registry: self.topology.registry().into(),
        };
        GeneratedConfig::new(Topology::FRONT, "front", &document)
    }

    pub fn actor(&self, name: &str) -> Result<GeneratedConfig> {
        let spec = self
            .config
            .actors
            .get(name)
            .ok_or_else(|| OrchestratorError::UnresolvedService {
                referenced_by: "actors".into(),
                name: name.to_string(),
            })?;
        let placement = self.topology.endpoint(name, name)?;

        let mut databases = BTreeMap::new();
        let mut caches = BTreeMap::new();
        for (service_name, service) in &spec.services {
            let referrer = format!("{name}/{service_name}");
            if let Some(db) = service.database() {
                if !databases.contains_key(db) {
                    let endpoint = self.backend(db, &referrer, ServiceKind::Database)?;
                    databases.insert(db.to_string(), endpoint);
                }
            }
            for cache in service.caches() {
                if !caches.contains_key(cache) {
                    let endpoint = self.backend(cache, &referrer, ServiceKind::Cache)?;
                    caches.insert(cache.to_string(), endpoint);
                }
            }
        }

        let document = ActorConfig {
            addr: placement.address.clone(),
            port: spec.port,
            registry: self.topology.registry().into(),
            services: spec.services.clone(),
            databases,
            caches,
        };
        GeneratedConfig::new(name, name, &document)
    }

    /// Registry, front, then every actor group in name order.
    pub fn all(&self) -> Result<Vec<GeneratedConfig>> {
        let mut documents = vec![self.registry()?, self.front()?];
        for name in self.config.actors.keys() {
            documents.push(self.actor(name)?);
        }
        Ok(documents)
    }

    fn backend(&self, name: &str, referrer: &str, kind: ServiceKind) -> Result<BackendEndpoint> {
        let placement = self.topology.endpoint(name, referrer)?;
        if placement.kind != kind {
            return Err(OrchestratorError::InvalidConfig(format!(
                "'{referrer}' uses '{name}' as a {kind:?}, but it is a {:?}",
                placement.kind
            )));
        }
        let engine = match kind {
            ServiceKind::Database => self.config.dbs.get(name).map(|d| d.engine.clone()),
            ServiceKind::Cache => self.config.caches.get(name).map(|c| c.engine.clone()),
            _ => None,
        };
        Ok(BackendEndpoint {
            engine: engine.unwrap_or_default(),
            addr: placement.address.clone(),
            port: placement.port,
        })
    }
}
