//! Transports that never leave the local machine.
//!
//! [`LocalTransport`] runs commands with `sh` and transfers with `cp`, so a
//! "node" is the local host. [`RecordingTransport`] runs nothing of
//! substance: it records every call in order and simulates the remote side
//! with trivial local processes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::process::Command;

use crate::models::Node;
use crate::services::transport::Transport;

#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn exec(&self, _node: &Node, _as_user: Option<&str>, command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }

    fn push(
        &self,
        _node: &Node,
        _as_user: Option<&str>,
        local_paths: &[PathBuf],
        remote_directory: &str,
    ) -> Command {
        let mut cmd = Command::new("cp");
        cmd.arg("-r").args(local_paths).arg(remote_directory);
        cmd
    }

    fn pull(
        &self,
        _node: &Node,
        _as_user: Option<&str>,
        remote_paths: &[String],
        local_directory: &Path,
    ) -> Command {
        let mut cmd = Command::new("cp");
        cmd.arg("-r").args(remote_paths).arg(local_directory);
        cmd
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAction {
    Exec,
    Push,
    Pull,
}

#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub seq: usize,
    pub at: DateTime<Utc>,
    pub node: String,
    pub action: TransportAction,
    /// Command text for execs; space-separated paths and the target for transfers.
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    events: Mutex<Vec<TransportEvent>>,
    hold: Vec<String>,
    fail: Vec<String>,
    served: HashMap<String, PathBuf>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execs whose text contains `pattern` keep running until killed.
    pub fn holding(mut self, pattern: &str) -> Self {
        self.hold.push(pattern.to_string());
        self
    }

    /// Calls whose detail contains `pattern` exit non-zero.
    pub fn failing(mut self, pattern: &str) -> Self {
        self.fail.push(pattern.to_string());
        self
    }

    /// Pulling `remote_path` delivers a copy of `local_source`. Pulls of
    /// paths not served this way deliver an empty file.
    pub fn serving(mut self, remote_path: &str, local_source: PathBuf) -> Self {
        self.served.insert(remote_path.to_string(), local_source);
        self
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Exec command texts in issue order.
    pub fn execs(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.action == TransportAction::Exec)
            .map(|e| e.detail)
            .collect()
    }

    /// Sequence number of the first event matching `action` whose detail contains `needle`.
    pub fn position(&self, action: TransportAction, needle: &str) -> Option<usize> {
        self.events()
            .into_iter()
            .find(|e| e.action == action && e.detail.contains(needle))
            .map(|e| e.seq)
    }

    fn record(&self, node: &Node, action: TransportAction, detail: String) -> bool {
        let fails = self.fail.iter().any(|p| detail.contains(p.as_str()));
        if let Ok(mut events) = self.events.lock() {
            let seq = events.len();
            events.push(TransportEvent {
                seq,
                at: Utc::now(),
                node: node.address.clone(),
                action,
                detail,
            });
        }
        fails
    }
}

fn exit_with(failed: bool) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(if failed { "exit 1" } else { "exit 0" });
    cmd
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl Transport for RecordingTransport {
    fn exec(&self, node: &Node, _as_user: Option<&str>, command: &str) -> Command {
        let failed = self.record(node, TransportAction::Exec, command.to_string());
        if !failed && self.hold.iter().any(|p| command.contains(p.as_str())) {
            let mut cmd = Command::new("sleep");
            cmd.arg("300");
            return cmd;
        }
        exit_with(failed)
    }

    fn push(
        &self,
        node: &Node,
        _as_user: Option<&str>,
        local_paths: &[PathBuf],
        remote_directory: &str,
    ) -> Command {
        let mut detail: Vec<String> = local_paths
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        detail.push(remote_directory.to_string());
        exit_with(self.record(node, TransportAction::Push, detail.join(" ")))
    }

    fn pull(
        &self,
        node: &Node,
        _as_user: Option<&str>,
        remote_paths: &[String],
        local_directory: &Path,
    ) -> Command {
        let mut detail = remote_paths.to_vec();
        detail.push(local_directory.to_string_lossy().to_string());
        if self.record(node, TransportAction::Pull, detail.join(" ")) {
            return exit_with(true);
        }

        let directory = local_directory.to_string_lossy();
        let mut script = vec![format!("mkdir -p {}", quote(&directory))];
        for remote in remote_paths {
            let name = Path::new(remote)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| remote.clone());
            let target = quote(&format!("{directory}/{name}"));
            match self.served.get(remote) {
                Some(source) => {
                    script.push(format!("cp {} {target}", quote(&source.to_string_lossy())))
                }
                None => script.push(format!("touch {target}")),
            }
        }
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script.join(" && "));
        cmd
    }
}
