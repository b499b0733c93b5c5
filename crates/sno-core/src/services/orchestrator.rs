use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::deployer::{
    ArtifactCollector, CacheDeployer, DatabaseDeployer, Layout, ServiceDeployer,
};
use super::handles::HandleRegistry;
use super::readiness::{self, Probe};
use super::remote::RemoteClient;
use super::state::{RunManifest, RunStore};
use super::synth::{ConfigSynthesizer, GeneratedConfig};
use super::config_loader;
use crate::error::{OrchestratorError, Result};
use crate::models::{
    CommandStatus, DeploymentConfig, DeploymentPhase, LifecycleReport, Node, ReadinessStrategy,
    StepOutcome, Topology,
};

const REGISTRY_HANDLE: &str = "registry";
const FRONT_HANDLE: &str = "front";

fn actor_handle(name: &str) -> String {
    format!("actor:{name}")
}

struct Managed {
    deployer: ServiceDeployer,
    started: bool,
}

impl Managed {
    fn new(deployer: ServiceDeployer) -> Self {
        Self {
            deployer,
            started: false,
        }
    }
}

/// An application process launched on a node: which service, which config
/// file, which log.
struct Launched {
    node: Node,
    stem: String,
}

/// Stands the whole experiment up in dependency order and tears it down.
///
/// Everything that can be checked locally (topology, references, generated
/// documents) is checked in [`ApplicationOrchestrator::new`], before any node
/// is contacted. Remote failures after that point are recorded in the
/// startup report and do not stop the sequence.
pub struct ApplicationOrchestrator {
    config: DeploymentConfig,
    topology: Topology,
    generated: Vec<GeneratedConfig>,
    client: RemoteClient,
    layout: Layout,
    backends: Vec<Managed>,
    artifacts: Managed,
    handles: HandleRegistry,
    launched: Vec<Launched>,
    phase: DeploymentPhase,
    startup: LifecycleReport,
    store: RunStore,
}

impl ApplicationOrchestrator {
    pub fn new(config: DeploymentConfig, client: RemoteClient, output_dir: &Path) -> Result<Self> {
        let topology = Topology::resolve(&config)?;
        let generated = ConfigSynthesizer::new(&topology, &config).all()?;
        let layout = Layout::new(&config.app, output_dir);

        let mut backends = Vec::new();
        for (name, spec) in &config.dbs {
            if spec.engine != "mysql" {
                tracing::warn!(database = %name, engine = %spec.engine, "unsupported database type, skipping");
                continue;
            }
            let node = topology.node_of(name)?.clone();
            backends.push(Managed::new(ServiceDeployer::Database(DatabaseDeployer::new(
                name,
                node,
                spec.clone(),
                layout.clone(),
            ))));
        }
        for (name, spec) in &config.caches {
            if spec.engine != "redis" {
                tracing::warn!(cache = %name, engine = %spec.engine, "unsupported cache type, skipping");
                continue;
            }
            let node = topology.node_of(name)?.clone();
            backends.push(Managed::new(ServiceDeployer::Cache(CacheDeployer::new(
                name,
                node,
                spec.clone(),
                layout.clone(),
            ))));
        }
        let artifacts = Managed::new(ServiceDeployer::Artifacts(ArtifactCollector::new(
            topology.nodes().cloned().collect(),
            &config.app.inventory_path,
            layout.clone(),
        )));

        tracing::info!(
            nodes = topology.nodes().count(),
            services = topology.services().count(),
            "topology resolved"
        );
        Ok(Self {
            config,
            topology,
            generated,
            client,
            layout,
            backends,
            artifacts,
            handles: HandleRegistry::new(),
            launched: Vec::new(),
            phase: DeploymentPhase::Unconfigured,
            startup: LifecycleReport::new(),
            store: RunStore::new(output_dir),
        })
    }

    /// Load the deployment file and build an orchestrator over ssh.
    pub fn from_file(config_path: &Path, output_dir: &Path) -> Result<Self> {
        let config = config_loader::load(config_path)?;
        Self::new(config, RemoteClient::ssh(), output_dir)
    }

    pub fn phase(&self) -> DeploymentPhase {
        self.phase
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn generated_configs(&self) -> &[GeneratedConfig] {
        &self.generated
    }

    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    pub fn output_dir(&self) -> &Path {
        &self.layout.output_dir
    }

    /// Steps taken by `start`, in order.
    pub fn startup_report(&self) -> &LifecycleReport {
        &self.startup
    }

    pub fn running_handles(&self) -> Vec<&str> {
        self.handles.names()
    }

    fn require(&self, operation: &str, phase: DeploymentPhase) -> Result<()> {
        if self.phase != phase {
            return Err(OrchestratorError::InvalidPhase {
                operation: operation.to_string(),
                phase: self.phase.to_string(),
            });
        }
        Ok(())
    }

    fn enter(&mut self, phase: DeploymentPhase) {
        tracing::info!(from = %self.phase, to = %phase, "phase");
        self.phase = phase;
    }

    /// Bring everything up: reset nodes, backing services, registry, front,
    /// then actors. Returns an error only for local failures; the caller is
    /// expected to call [`teardown`](Self::teardown) either way.
    pub async fn start(&mut self) -> Result<()> {
        self.require("start", DeploymentPhase::Unconfigured)?;
        self.store.save_manifest(&self.manifest()).await?;

        let all_nodes: Vec<Node> = self.topology.nodes().cloned().collect();
        let node_refs: Vec<&Node> = all_nodes.iter().collect();

        let reset = self
            .client
            .launch_and_wait(&node_refs, &self.layout.reset_command(), None)
            .await;
        self.startup.record_status("reset nodes", &reset);
        self.enter(DeploymentPhase::NodesReady);

        for managed in &mut self.backends {
            let name = managed.deployer.name().to_string();
            let result = managed.deployer.start(&self.client).await;
            managed.started = result.is_ok();
            self.startup.record_result(format!("start {name}"), result);
        }
        let inventory = self.artifacts.deployer.start(&self.client).await;
        self.artifacts.started = inventory.is_ok();
        self.startup.record_result("snapshot container inventory", inventory);

        let jar = self
            .client
            .upload_files(
                &node_refs,
                &[self.config.app.artifact.clone()],
                &self.layout.remote("app.jar"),
                None,
            )
            .await;
        self.startup.record_status("upload application bundle", &jar);
        self.enter(DeploymentPhase::ServicesUp);

        let main = self.config.app.main_classes.clone();
        self.launch(Topology::REGISTRY, REGISTRY_HANDLE, &main.registry, "registry.conf")
            .await?;
        let registry = self.tcp_target(Topology::REGISTRY)?;
        self.settle("registry", self.config.readiness.registry_delay_ms, vec![registry])
            .await;
        self.enter(DeploymentPhase::RegistryUp);

        self.launch(Topology::FRONT, FRONT_HANDLE, &main.front, "master.conf")
            .await?;
        let front = self.tcp_target(Topology::FRONT)?;
        self.settle("front", self.config.readiness.front_delay_ms, vec![front])
            .await;
        self.enter(DeploymentPhase::FrontUp);

        let databases = self.database_targets()?;
        if !databases.is_empty() {
            self.settle("databases", self.config.readiness.database_delay_ms, databases)
                .await;
        }
        let actors: Vec<String> = self.config.actors.keys().cloned().collect();
        let mut targets = Vec::new();
        for name in &actors {
            self.launch(name, &actor_handle(name), &main.actor, "master.conf")
                .await?;
            targets.push(self.tcp_target(name)?);
        }
        if !actors.is_empty() {
            self.settle("actors", self.config.readiness.actor_delay_ms, targets)
                .await;
        }
        self.enter(DeploymentPhase::ActorsUp);

        self.enter(DeploymentPhase::Running);
        if !self.startup.is_clean() {
            tracing::warn!(
                failed = self.startup.failed_steps().count(),
                "running with failed startup steps"
            );
        }
        Ok(())
    }

    /// Upload a service's generated config and resource file, then launch
    /// it in the background under `handle_name`.
    async fn launch(
        &mut self,
        service: &str,
        handle_name: &str,
        main_class: &str,
        resource: &str,
    ) -> Result<()> {
        let document = self
            .generated
            .iter()
            .find(|g| g.service == service)
            .ok_or_else(|| OrchestratorError::UnresolvedService {
                referenced_by: handle_name.to_string(),
                name: service.to_string(),
            })?;
        let local = document.write_to(&self.layout.staging_dir).await?;
        let file_name = document.file_name.clone();
        let stem = file_name.trim_end_matches(".yaml").to_string();
        let node = self.topology.node_of(service)?.clone();
        let nodes = [&node];

        let mut status = self
            .client
            .upload_files(&nodes, &[local], &self.layout.remote(""), None)
            .await;
        let resource_path = self.layout.resources_dir.join(resource);
        if resource_path.exists() {
            status = status.merge(
                self.client
                    .upload_files(&nodes, &[resource_path], &self.layout.remote("resources/"), None)
                    .await,
            );
        } else {
            tracing::debug!(path = %resource_path.display(), "no resource file to upload");
        }

        let java = format!("java -cp app.jar {main_class} {file_name} | tee logs/{stem}.log");
        let command = if self.config.app.cgroups {
            let group = format!("memory,cpu:{}/{stem}", self.layout.cgroup_parent());
            status = status.merge(
                self.client
                    .launch_and_wait(&nodes, &format!("sudo cgcreate -g {group}"), None)
                    .await,
            );
            format!("cd {} ; sudo cgexec -g {group} {java}", self.layout.remote_root)
        } else {
            format!("cd {} ; {java}", self.layout.remote_root)
        };

        let handle = self.client.launch(&nodes, &command, None);
        self.handles.insert(handle_name, handle)?;
        self.launched.push(Launched { node, stem });
        self.startup.record_status(format!("launch {handle_name}"), &status);
        Ok(())
    }

    fn tcp_target(&self, service: &str) -> Result<(Node, Probe)> {
        let placement = self.topology.endpoint(service, service)?;
        let node = self.topology.node_of(service)?.clone();
        Ok((node, Probe::Tcp {
            address: placement.address.clone(),
            port: placement.port,
        }))
    }

    fn database_targets(&self) -> Result<Vec<(Node, Probe)>> {
        let mut targets = Vec::new();
        for managed in self.backends.iter().filter(|m| m.started) {
            let ServiceDeployer::Database(database) = &managed.deployer else {
                continue;
            };
            let name = database.name();
            let placement = self.topology.endpoint(name, name)?;
            let engine = self
                .config
                .dbs
                .get(name)
                .map(|d| d.engine.as_str())
                .unwrap_or("mysql");
            targets.push((
                self.topology.node_of(name)?.clone(),
                Probe::for_engine(engine, &placement.address, placement.port),
            ));
        }
        Ok(targets)
    }

    /// One fixed delay, or one bounded probe per target.
    async fn settle(&mut self, what: &str, delay_ms: u64, targets: Vec<(Node, Probe)>) {
        let policy = &self.config.readiness;
        if policy.strategy == ReadinessStrategy::Fixed || targets.is_empty() {
            readiness::settle(&self.client, policy, what, delay_ms, None).await;
            return;
        }
        let mut late = Vec::new();
        for (node, probe) in targets {
            let command = probe.command();
            if !readiness::settle(&self.client, policy, what, delay_ms, Some((&node, probe))).await {
                late.push(command);
            }
        }
        let outcome = if late.is_empty() {
            StepOutcome::Ok
        } else {
            StepOutcome::Failed(format!("not ready in time: {}", late.join("; ")))
        };
        self.startup.record(format!("await {what}"), outcome);
    }

    /// Load every database's scripts. Only valid once the deployment is running.
    pub async fn fill(&mut self) -> Result<CommandStatus> {
        self.require("fill", DeploymentPhase::Running)?;
        let mut status = CommandStatus::ok();
        for managed in self.backends.iter_mut().filter(|m| m.started) {
            let filled = managed.deployer.fill(&self.client).await;
            if filled.is_failed() {
                tracing::warn!(
                    deployer = managed.deployer.name(),
                    failures = %filled.failure_summary(),
                    "fill incomplete"
                );
            }
            status = status.merge(filled);
        }
        Ok(status)
    }

    /// Stop everything that was started, in reverse dependency order, and
    /// collect the artifacts. Every step is attempted whatever happened to
    /// the previous ones.
    pub async fn teardown(&mut self) -> LifecycleReport {
        let mut report = LifecycleReport::new();
        if self.phase == DeploymentPhase::Stopped {
            report.record("teardown", StepOutcome::Skipped("already stopped".into()));
            return report;
        }
        self.enter(DeploymentPhase::TearingDown);

        self.release(&mut report, FRONT_HANDLE).await;
        let actors: Vec<String> = self.config.actors.keys().cloned().collect();
        for name in &actors {
            self.release(&mut report, &actor_handle(name)).await;
        }
        self.release(&mut report, REGISTRY_HANDLE).await;

        self.collect_logs(&mut report).await;

        for managed in &mut self.backends {
            let step = format!("kill {}", managed.deployer.name());
            if !managed.started {
                report.record(step, StepOutcome::Skipped("never started".into()));
                continue;
            }
            let result = managed.deployer.kill(&self.client).await;
            managed.started = false;
            report.record_status(step, &result);
        }

        if self.artifacts.started {
            let result = self.artifacts.deployer.kill(&self.client).await;
            self.artifacts.started = false;
            report.record_status("collect container inventory", &result);
        } else {
            report.record(
                "collect container inventory",
                StepOutcome::Skipped("never started".into()),
            );
        }

        for (name, status) in self.handles.release_all().await {
            report.record_status(format!("release leftover {name}"), &status);
        }

        self.enter(DeploymentPhase::Stopped);
        if let Err(e) = self.store.save_teardown(&report).await {
            tracing::warn!(error = %e, "could not write teardown record");
        }
        report
    }

    async fn release(&mut self, report: &mut LifecycleReport, handle: &str) {
        let step = format!("kill {handle}");
        match self.handles.release(handle).await {
            Ok(Some(status)) => report.record_status(step, &status),
            Ok(None) => report.record(step, StepOutcome::Skipped("not running".into())),
            Err(e) => report.record(step, StepOutcome::Failed(e.to_string())),
        }
    }

    /// Pull each launched process's log into `<out>/<address>/logs/`.
    async fn collect_logs(&mut self, report: &mut LifecycleReport) {
        let step = "collect application logs";
        if self.launched.is_empty() {
            report.record(step, StepOutcome::Skipped("nothing was launched".into()));
            return;
        }
        let mut per_node: BTreeMap<String, (Node, Vec<String>)> = BTreeMap::new();
        for launched in self.launched.drain(..) {
            let log = self.layout.remote(&format!("logs/{}.log", launched.stem));
            per_node
                .entry(launched.node.name.clone())
                .or_insert_with(|| (launched.node, Vec::new()))
                .1
                .push(log);
        }
        let mut status = CommandStatus::ok();
        for (node, logs) in per_node.values() {
            let target: PathBuf = self.layout.node_output(&node.address).join("logs");
            status = status.merge(self.client.download_files(&[node], logs, &target, None).await);
        }
        report.record_status(step, &status);
    }

    fn manifest(&self) -> RunManifest {
        RunManifest {
            started_at: Utc::now(),
            remote_root: self.layout.remote_root.clone(),
            nodes: self.topology.nodes().cloned().collect(),
            services: self.topology.services().cloned().collect(),
            generated_configs: self.generated.iter().map(|g| g.file_name.clone()).collect(),
        }
    }
}
