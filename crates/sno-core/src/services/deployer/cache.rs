use std::path::{Path, PathBuf};

use serde::Serialize;

use super::Layout;
use crate::error::Result;
use crate::models::{CacheSpec, CommandStatus, Node};
use crate::services::remote::{RemoteClient, RunningCommand};
use crate::services::template::{self, CACHE_MONITOR, REDIS_COMPOSE};

/// One Redis container on one node, plus the monitor sampling it.
pub struct CacheDeployer {
    name: String,
    node: Node,
    spec: CacheSpec,
    layout: Layout,
    monitor: Option<RunningCommand>,
}

impl CacheDeployer {
    pub fn new(name: &str, node: Node, spec: CacheSpec, layout: Layout) -> Self {
        Self {
            name: name.to_string(),
            node,
            spec,
            layout,
            monitor: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_some()
    }

    fn descriptor(&self) -> String {
        format!("{}.yaml", self.name)
    }

    fn monitor_script(&self) -> String {
        format!("monitor-{}.sh", self.name)
    }

    fn monitor_csv(&self) -> String {
        format!("logs/monitor-{}.csv", self.name)
    }

    pub async fn start(&mut self, client: &RemoteClient) -> Result<CommandStatus> {
        let port = self.spec.port.to_string();
        let bindings = [("PORT", port.as_str()), ("NAME", self.name.as_str())];
        let descriptor = template::render(REDIS_COMPOSE, &bindings)?;
        tokio::fs::create_dir_all(&self.layout.staging_dir).await?;
        let local = self.layout.staging_dir.join(format!("{}_loc.yaml", self.name));
        tokio::fs::write(&local, descriptor).await?;

        let nodes = [&self.node];
        let mut status = client
            .upload_files(&nodes, &[local], &self.layout.remote(&self.descriptor()), None)
            .await;
        status = status.merge(
            client
                .launch_and_wait(&nodes, &self.layout.compose(&self.descriptor(), "up -d"), None)
                .await,
        );

        for command in self.tuning_commands() {
            status = status.merge(client.launch_and_wait(&nodes, &command, None).await);
        }

        let script = self.layout.staging_dir.join(self.monitor_script());
        tokio::fs::write(&script, CACHE_MONITOR).await?;
        status = status.merge(
            client
                .upload_files(&nodes, &[script], &self.layout.remote(&self.monitor_script()), None)
                .await,
        );

        let monitor = format!(
            "cd {} ; bash {} {} {}",
            self.layout.remote_root,
            self.monitor_script(),
            self.spec.port,
            self.monitor_csv()
        );
        self.monitor = Some(client.launch(&nodes, &monitor, None));
        Ok(status)
    }

    /// `redis-cli` calls applying the memory cap and eviction policy.
    fn tuning_commands(&self) -> Vec<String> {
        let port = self.spec.port;
        let mut commands = Vec::new();
        if let Some(size) = &self.spec.size {
            commands.push("sudo apt-get install -y redis-tools".to_string());
            commands.push(format!("redis-cli -p {port} config set maxmemory {size}"));
            commands.push(format!(
                "redis-cli -p {port} config set maxmemory-policy allkeys-lru"
            ));
        }
        if let Some(eviction) = &self.spec.eviction {
            commands.push(format!(
                "redis-cli -p {port} config set maxmemory-policy {eviction}"
            ));
        }
        commands
    }

    /// Stop the monitor, fetch its samples, then bring the container down.
    /// The samples are fetched first so the last rows are not lost. The
    /// container is brought down whatever happened before.
    pub async fn kill(&mut self, client: &RemoteClient) -> CommandStatus {
        let mut status = match self.monitor.take() {
            Some(monitor) => monitor.kill().await,
            None => CommandStatus::ok(),
        };

        let target = self.layout.node_output(&self.node.address).join("redis");
        let fetched = client
            .download_files(
                &[&self.node],
                &[self.layout.remote(&self.monitor_csv())],
                &target,
                None,
            )
            .await;
        if fetched.is_ok() {
            let csv = target.join(format!("monitor-{}.csv", self.name));
            if let Err(e) = self.summarize(&csv).await {
                tracing::warn!(cache = %self.name, error = %e, "could not summarize monitor samples");
                status = status.merge(CommandStatus::failed(
                    &self.node.address,
                    format!("monitor summary: {e}"),
                ));
            }
        }
        status = status.merge(fetched);

        status.merge(
            client
                .launch_and_wait(&[&self.node], &self.layout.compose(&self.descriptor(), "down"), None)
                .await,
        )
    }

    async fn summarize(&self, csv: &Path) -> Result<PathBuf> {
        let text = tokio::fs::read_to_string(csv).await?;
        let summary = MonitorSeries::parse(&text).summary();
        tracing::info!(
            cache = %self.name,
            samples = summary.samples,
            hits = summary.total_hits,
            misses = summary.total_misses,
            peak_memory_mb = summary.peak_memory_mb,
            "cache monitor summary"
        );
        let path = csv.with_extension("summary.json");
        tokio::fs::write(&path, serde_json::to_string_pretty(&summary)?).await?;
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSample {
    pub hits: i64,
    pub misses: i64,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSummary {
    pub samples: usize,
    pub total_hits: i64,
    pub total_misses: i64,
    pub peak_memory_mb: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_ratio: Option<f64>,
}

/// Per-second samples written by the cache monitor
/// (`HITS;MISSES;MEMORY` header, deltas and megabytes below).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSeries {
    pub samples: Vec<MonitorSample>,
}

impl MonitorSeries {
    /// Rows that do not parse are skipped, including the header and a
    /// partially written last line.
    pub fn parse(text: &str) -> Self {
        let samples = text
            .lines()
            .filter_map(|line| {
                let mut fields = line.trim().split(';');
                let hits = fields.next()?.trim().parse().ok()?;
                let misses = fields.next()?.trim().parse().ok()?;
                let memory_mb = fields.next()?.trim().parse().ok()?;
                if fields.next().is_some() {
                    return None;
                }
                Some(MonitorSample {
                    hits,
                    misses,
                    memory_mb,
                })
            })
            .collect();
        Self { samples }
    }

    pub fn summary(&self) -> MonitorSummary {
        let total_hits: i64 = self.samples.iter().map(|s| s.hits).sum();
        let total_misses: i64 = self.samples.iter().map(|s| s.misses).sum();
        let peak_memory_mb = self
            .samples
            .iter()
            .map(|s| s.memory_mb)
            .fold(0.0, f64::max);
        let lookups = total_hits + total_misses;
        MonitorSummary {
            samples: self.samples.len(),
            total_hits,
            total_misses,
            peak_memory_mb,
            hit_ratio: (lookups > 0).then(|| total_hits as f64 / lookups as f64),
        }
    }
}
