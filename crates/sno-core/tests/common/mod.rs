// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use sno_core::models::{DeploymentConfig, ReadinessConfig};
use sno_core::services::config_loader;
use sno_core::services::remote::RemoteClient;
use sno_core::testing::RecordingTransport;
use sno_core::ApplicationOrchestrator;

/// Two nodes: application on n1, backing services and one actor group on n2.
pub const TWO_NODES: &str = r#"
nodes:
  n1: { addr: 10.0.0.1 }
  n2: { addr: 10.0.0.2 }
registry: { node: n1, port: 2552 }
front: { node: n1, httpPort: 8080, actorPort: 2553 }
dbs:
  db1: { node: n2, type: mysql, port: 3306, scripts: [users, posts, follows] }
caches:
  cache1: { node: n2, type: redis, port: 6379, size: 100mb }
actors:
  a1:
    node: n2
    port: 2600
    services:
      user: { db: db1, cache: cache1 }
      post: { db: db1, rqt-cache: cache1 }
"#;

/// One database, no caches.
pub const ONE_DATABASE: &str = r#"
nodes:
  n1: { addr: 10.0.0.1 }
registry: { node: n1, port: 2552 }
front: { node: n1, httpPort: 8080, actorPort: 2553 }
dbs:
  db1: { node: n1, port: 3306, scripts: [users, posts, follows] }
actors:
  a1: { node: n1, port: 2600, services: { user: { db: db1 } } }
"#;

/// Parse `yaml` with immediate readiness and staging under `scratch`.
pub fn config(yaml: &str, scratch: &Path) -> DeploymentConfig {
    let mut config = config_loader::parse(yaml).unwrap();
    config.readiness = ReadinessConfig::immediate();
    config.app.staging_dir = scratch.join("staging");
    config
}

/// A recorder where application processes and cache monitors stay up until killed.
pub fn recorder() -> RecordingTransport {
    RecordingTransport::new()
        .holding("java -cp app.jar")
        .holding("bash monitor-")
}

pub fn orchestrator(
    config: DeploymentConfig,
    recorder: &Arc<RecordingTransport>,
    scratch: &Path,
) -> ApplicationOrchestrator {
    let client = RemoteClient::new(recorder.clone());
    ApplicationOrchestrator::new(config, client, &scratch.join("out")).unwrap()
}
