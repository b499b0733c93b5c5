use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The deployment file: nodes, the services placed on them, and how the
/// application is laid out on every node.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    pub nodes: BTreeMap<String, NodeConfig>,
    pub registry: RegistrySpec,
    pub front: FrontSpec,
    #[serde(default)]
    pub dbs: BTreeMap<String, DatabaseSpec>,
    #[serde(default)]
    pub caches: BTreeMap<String, CacheSpec>,
    #[serde(default)]
    pub actors: BTreeMap<String, ActorSpec>,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub addr: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySpec {
    pub node: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrontSpec {
    pub node: String,
    #[serde(rename = "httpPort")]
    pub http_port: u16,
    #[serde(rename = "actorPort")]
    pub actor_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSpec {
    pub node: String,
    #[serde(rename = "type", default = "default_database_engine")]
    pub engine: String,
    pub port: u16,
    /// Data scripts loaded by `fill`, in this order.
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub dump: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSpec {
    pub node: String,
    #[serde(rename = "type", default = "default_cache_engine")]
    pub engine: String,
    pub port: u16,
    #[serde(default)]
    pub size: Option<Scalar>,
    #[serde(default)]
    pub eviction: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActorSpec {
    pub node: String,
    pub port: u16,
    #[serde(default)]
    pub services: BTreeMap<String, HostedService>,
}

/// One service hosted by an actor group. Unknown keys are carried through to
/// the generated actor config untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostedService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    #[serde(
        rename = "rqt-cache",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rqt_cache: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl HostedService {
    pub fn database(&self) -> Option<&str> {
        reference(&self.db)
    }

    /// Caches referenced through `cache` then `rqt-cache`.
    pub fn caches(&self) -> impl Iterator<Item = &str> {
        reference(&self.cache)
            .into_iter()
            .chain(reference(&self.rqt_cache))
    }
}

/// `none` is the config's way of saying "no reference".
fn reference(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty() && *v != "none")
}

/// A YAML scalar that may be written either as a number or as text
/// (`size: 100000000` and `size: 100mb` are both accepted).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(u64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Text(t) => f.write_str(t),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Working directory of the application on every node.
    pub remote_root: String,
    /// Application bundle uploaded to `<remote_root>/app.jar`.
    pub artifact: PathBuf,
    pub resources_dir: PathBuf,
    /// Directory holding `<script>.sql` files for database fills.
    pub data_dir: PathBuf,
    /// Local directory where generated documents are written before upload.
    pub staging_dir: PathBuf,
    pub cgroups: bool,
    pub key_file: Option<PathBuf>,
    pub inventory_path: String,
    pub main_classes: MainClasses,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote_root: "/tmp/SocialNetworkAKKA".into(),
            artifact: PathBuf::from("../target/scala-3.2.2/socialnetwork-assembly-1.0.jar"),
            resources_dir: PathBuf::from("../resources"),
            data_dir: PathBuf::from("../resources/datas"),
            staging_dir: std::env::temp_dir().join("socialNet"),
            cgroups: true,
            key_file: None,
            inventory_path: "/tmp/docker_names".into(),
            main_classes: MainClasses::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MainClasses {
    pub registry: String,
    pub front: String,
    pub actor: String,
}

impl Default for MainClasses {
    fn default() -> Self {
        Self {
            registry: "com.socialnet.registry.main.Main".into(),
            front: "com.socialnet.front.main.FrontApp".into(),
            actor: "com.socialnet.master.main.Main".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessStrategy {
    /// Sleep for the configured delay.
    Fixed,
    /// Retry a liveness probe until it succeeds or the timeout elapses.
    Probe,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub strategy: ReadinessStrategy,
    pub registry_delay_ms: u64,
    pub front_delay_ms: u64,
    pub database_delay_ms: u64,
    pub actor_delay_ms: u64,
    pub probe_timeout_ms: u64,
    pub probe_interval_ms: u64,
}

impl ReadinessConfig {
    /// All delays zero and no probing. Used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            strategy: ReadinessStrategy::Fixed,
            registry_delay_ms: 0,
            front_delay_ms: 0,
            database_delay_ms: 0,
            actor_delay_ms: 0,
            probe_timeout_ms: 0,
            probe_interval_ms: 0,
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            strategy: ReadinessStrategy::Probe,
            registry_delay_ms: 100,
            front_delay_ms: 100,
            database_delay_ms: 15_000,
            actor_delay_ms: 5_000,
            probe_timeout_ms: 30_000,
            probe_interval_ms: 500,
        }
    }
}

fn default_user() -> String {
    "root".into()
}

fn default_database_engine() -> String {
    "mysql".into()
}

fn default_cache_engine() -> String {
    "redis".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosted_service_treats_none_as_absent() {
        let service: HostedService =
            serde_yaml::from_str("db: none\ncache: cache1\nrqt-cache: none\n").unwrap();
        assert_eq!(service.database(), None);
        assert_eq!(service.caches().collect::<Vec<_>>(), vec!["cache1"]);
    }

    #[test]
    fn hosted_service_keeps_unknown_keys() {
        let service: HostedService =
            serde_yaml::from_str("db: db1\ntimeline-size: 20\n").unwrap();
        assert_eq!(service.database(), Some("db1"));
        assert!(service.extra.contains_key("timeline-size"));

        let rendered = serde_yaml::to_string(&service).unwrap();
        assert!(rendered.contains("timeline-size: 20"));
        assert!(!rendered.contains("rqt-cache"));
    }

    #[test]
    fn cache_size_accepts_numbers_and_text() {
        let numeric: CacheSpec =
            serde_yaml::from_str("node: n1\nport: 6379\nsize: 1048576\n").unwrap();
        assert_eq!(numeric.size.unwrap().to_string(), "1048576");

        let text: CacheSpec = serde_yaml::from_str("node: n1\nport: 6379\nsize: 100mb\n").unwrap();
        assert_eq!(text.size, Some(Scalar::Text("100mb".into())));
        assert_eq!(text.engine, "redis");
    }

    #[test]
    fn app_defaults_apply_to_missing_fields() {
        let app: AppConfig = serde_yaml::from_str("cgroups: false\n").unwrap();
        assert!(!app.cgroups);
        assert_eq!(app.remote_root, "/tmp/SocialNetworkAKKA");
        assert_eq!(app.main_classes.front, "com.socialnet.front.main.FrontApp");
    }

    #[test]
    fn readiness_strategy_is_lowercase() {
        let readiness: ReadinessConfig =
            serde_yaml::from_str("strategy: fixed\ndatabase_delay_ms: 10\n").unwrap();
        assert_eq!(readiness.strategy, ReadinessStrategy::Fixed);
        assert_eq!(readiness.database_delay_ms, 10);
        assert_eq!(readiness.actor_delay_ms, 5_000);
    }
}
