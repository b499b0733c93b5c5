use std::collections::BTreeMap;

use serde::Serialize;

use super::config::DeploymentConfig;
use super::node::Node;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceKind {
    Database,
    Cache,
    Registry,
    Front,
    Actor,
}

/// Where a logical service runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub name: String,
    pub kind: ServiceKind,
    pub node: String,
    pub address: String,
    pub port: u16,
}

/// Logical service name → placement, resolved once from the deployment file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    nodes: BTreeMap<String, Node>,
    services: BTreeMap<String, Placement>,
}

impl Topology {
    pub const REGISTRY: &'static str = "#registry";
    pub const FRONT: &'static str = "#front";

    /// File stems of the generated registry and front documents. Every other
    /// service derives its config, descriptor, log and cgroup from its name,
    /// so these names are taken.
    const RESERVED_STEMS: [&'static str; 2] = ["registry", "front"];

    /// Cross-reference the `nodes` section with every service declaration.
    ///
    /// Fails on the first service whose node is not declared, on a service
    /// name declared twice across `dbs`, `caches` and `actors`, and on names
    /// that collide with the reserved registry/front keys or file stems.
    pub fn resolve(config: &DeploymentConfig) -> Result<Self> {
        if config.nodes.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "at least one node is required".into(),
            ));
        }

        let nodes: BTreeMap<String, Node> = config
            .nodes
            .iter()
            .map(|(name, n)| {
                let node = Node {
                    name: name.clone(),
                    address: n.addr.clone(),
                    user: n.user.clone(),
                    key_file: n.key_file.clone().or_else(|| config.app.key_file.clone()),
                };
                (name.clone(), node)
            })
            .collect();

        let mut topology = Self {
            nodes,
            services: BTreeMap::new(),
        };

        topology.place(
            Self::REGISTRY,
            ServiceKind::Registry,
            &config.registry.node,
            config.registry.port,
        )?;
        topology.place(
            Self::FRONT,
            ServiceKind::Front,
            &config.front.node,
            config.front.http_port,
        )?;
        for (name, db) in &config.dbs {
            topology.place(name, ServiceKind::Database, &db.node, db.port)?;
        }
        for (name, cache) in &config.caches {
            topology.place(name, ServiceKind::Cache, &cache.node, cache.port)?;
        }
        for (name, actor) in &config.actors {
            topology.place(name, ServiceKind::Actor, &actor.node, actor.port)?;
        }

        Ok(topology)
    }

    fn place(&mut self, name: &str, kind: ServiceKind, node: &str, port: u16) -> Result<()> {
        let reserved = matches!(kind, ServiceKind::Registry | ServiceKind::Front);
        if !reserved && name.starts_with('#') {
            return Err(OrchestratorError::InvalidConfig(format!(
                "service name '{name}' may not start with '#'"
            )));
        }
        if !reserved && Self::RESERVED_STEMS.iter().any(|stem| *stem == name) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "service name '{name}' is reserved for the generated {name} config"
            )));
        }
        let host = self
            .nodes
            .get(node)
            .ok_or_else(|| OrchestratorError::UnknownNode {
                service: name.to_string(),
                node: node.to_string(),
            })?;
        let placement = Placement {
            name: name.to_string(),
            kind,
            node: node.to_string(),
            address: host.address.clone(),
            port,
        };
        if self.services.insert(name.to_string(), placement).is_some() {
            return Err(OrchestratorError::DuplicateService(name.to_string()));
        }
        Ok(())
    }

    pub fn placement(&self, name: &str) -> Option<&Placement> {
        self.services.get(name)
    }

    /// Look up `name` on behalf of `referenced_by`; a miss is a configuration error.
    pub fn endpoint(&self, name: &str, referenced_by: &str) -> Result<&Placement> {
        self.services
            .get(name)
            .ok_or_else(|| OrchestratorError::UnresolvedService {
                referenced_by: referenced_by.to_string(),
                name: name.to_string(),
            })
    }

    pub fn registry(&self) -> &Placement {
        &self.services[Self::REGISTRY]
    }

    pub fn front(&self) -> &Placement {
        &self.services[Self::FRONT]
    }

    /// The node hosting `service`.
    pub fn node_of(&self, service: &str) -> Result<&Node> {
        let placement = self.endpoint(service, service)?;
        self.nodes
            .get(&placement.node)
            .ok_or_else(|| OrchestratorError::UnknownNode {
                service: service.to_string(),
                node: placement.node.clone(),
            })
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Every declared node, whether or not it hosts a service.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn services(&self) -> impl Iterator<Item = &Placement> {
        self.services.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> DeploymentConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    const BASE: &str = r#"
nodes:
  n1: { addr: 10.0.0.1 }
  n2: { addr: 10.0.0.2, user: bench }
registry: { node: n1, port: 2552 }
front: { node: n1, httpPort: 8080, actorPort: 2553 }
dbs:
  db1: { node: n2, port: 3306 }
caches:
  cache1: { node: n2, port: 6379 }
actors:
  a1: { node: n2, port: 2600 }
"#;

    #[test]
    fn resolves_every_service_to_its_node_address() {
        let topology = Topology::resolve(&config(BASE)).unwrap();
        assert_eq!(topology.registry().address, "10.0.0.1");
        assert_eq!(topology.front().port, 8080);
        assert_eq!(topology.placement("db1").unwrap().address, "10.0.0.2");
        assert_eq!(topology.placement("cache1").unwrap().kind, ServiceKind::Cache);
        assert_eq!(topology.node_of("a1").unwrap().user, "bench");
        assert_eq!(topology.nodes().count(), 2);
    }

    #[test]
    fn unknown_node_fails_deterministically() {
        let yaml = BASE.replace("db1: { node: n2", "db1: { node: n9");
        for _ in 0..3 {
            match Topology::resolve(&config(&yaml)) {
                Err(OrchestratorError::UnknownNode { service, node }) => {
                    assert_eq!(service, "db1");
                    assert_eq!(node, "n9");
                }
                other => panic!("expected UnknownNode, got {other:?}"),
            }
        }
    }

    #[test]
    fn duplicate_names_across_sections_are_rejected() {
        let yaml = BASE.replace("cache1:", "db1:");
        assert!(matches!(
            Topology::resolve(&config(&yaml)),
            Err(OrchestratorError::DuplicateService(name)) if name == "db1"
        ));
    }

    #[test]
    fn registry_and_front_file_names_are_reserved() {
        for (from, to) in [("db1:", "front:"), ("cache1:", "registry:"), ("a1:", "front:")] {
            let yaml = BASE.replace(from, to);
            let err = Topology::resolve(&config(&yaml)).unwrap_err();
            assert!(
                matches!(err, OrchestratorError::InvalidConfig(ref msg) if msg.contains("reserved")),
                "{to} {err:?}"
            );
        }
    }

    #[test]
    fn missing_endpoint_names_the_referrer() {
        let topology = Topology::resolve(&config(BASE)).unwrap();
        let err = topology.endpoint("db7", "a1").unwrap_err();
        assert_eq!(
            err.to_string(),
            "'a1' references 'db7', which is not in the topology"
        );
    }

    #[test]
    fn app_key_file_is_the_node_fallback() {
        let yaml = format!("{BASE}app:\n  key_file: /keys/id_ed25519\n");
        let topology = Topology::resolve(&config(&yaml)).unwrap();
        let node = topology.node("n1").unwrap();
        assert_eq!(node.key_file.as_deref(), Some(std::path::Path::new("/keys/id_ed25519")));
    }
}
