use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::transport::{SshTransport, Transport};
use crate::models::{CommandStatus, Completion, Node, NodeResult};

/// Lines of stderr kept per node for failure reports.
const STDERR_TAIL_LINES: usize = 20;

/// Time a terminated process gets to exit before it is killed outright.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Time allowed for output readers to drain after a process exits.
const OUTPUT_DRAIN: Duration = Duration::from_millis(200);

/// Remote execution and file transfer over a set of nodes.
///
/// Every call fans out one transport process per node; blocking calls join
/// them before returning. Failures of any kind come back as a failed
/// [`CommandStatus`], never as an error.
#[derive(Clone)]
pub struct RemoteClient {
    transport: Arc<dyn Transport>,
    outstanding: Arc<AtomicUsize>,
}

impl RemoteClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn ssh() -> Self {
        Self::new(Arc::new(SshTransport::default()))
    }

    /// Handles launched through this client that were neither waited to
    /// completion nor killed yet.
    pub fn outstanding_handles(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Run `command` on every node and wait for all of them.
    pub async fn launch_and_wait(
        &self,
        nodes: &[&Node],
        command: &str,
        as_user: Option<&str>,
    ) -> CommandStatus {
        let mut handle = self.launch(nodes, command, as_user);
        handle.wait(None).await
    }

    /// Start `command` on every node and return without waiting.
    pub fn launch(&self, nodes: &[&Node], command: &str, as_user: Option<&str>) -> RunningCommand {
        tracing::info!(
            command,
            nodes = %addresses(nodes),
            "launch"
        );
        let processes = nodes
            .iter()
            .map(|node| (node.address.clone(), self.transport.exec(node, as_user, command)))
            .collect();
        RunningCommand::spawn(command.to_string(), processes, self.outstanding.clone())
    }

    /// Copy `local_paths` into `remote_directory` on every node.
    pub async fn upload_files(
        &self,
        nodes: &[&Node],
        local_paths: &[PathBuf],
        remote_directory: &str,
        as_user: Option<&str>,
    ) -> CommandStatus {
        let description = format!(
            "upload {} -> {remote_directory}",
            local_paths
                .iter()
                .map(|p| p.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );
        tracing::info!(nodes = %addresses(nodes), "{description}");
        let processes = nodes
            .iter()
            .map(|node| {
                let cmd = self
                    .transport
                    .push(node, as_user, local_paths, remote_directory);
                (node.address.clone(), cmd)
            })
            .collect();
        let mut handle = RunningCommand::spawn(description, processes, self.outstanding.clone());
        handle.wait(None).await
    }

    /// Copy `remote_paths` from every node into `local_directory`, which is
    /// created if missing.
    pub async fn download_files(
        &self,
        nodes: &[&Node],
        remote_paths: &[String],
        local_directory: &Path,
        as_user: Option<&str>,
    ) -> CommandStatus {
        if let Err(e) = tokio::fs::create_dir_all(local_directory).await {
            return CommandStatus::failed(
                &local_directory.to_string_lossy(),
                format!("failed to create local directory: {e}"),
            );
        }
        let description = format!(
            "download {} -> {}",
            remote_paths.join(" "),
            local_directory.display()
        );
        tracing::info!(nodes = %addresses(nodes), "{description}");
        let processes = nodes
            .iter()
            .map(|node| {
                let cmd = self
                    .transport
                    .pull(node, as_user, remote_paths, local_directory);
                (node.address.clone(), cmd)
            })
            .collect();
        let mut handle = RunningCommand::spawn(description, processes, self.outstanding.clone());
        handle.wait(None).await
    }
}

fn addresses(nodes: &[&Node]) -> String {
    nodes
        .iter()
        .map(|n| n.address.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

enum ProcessState {
    Running(Child),
    Finished(NodeResult),
}

struct NodeProcess {
    address: String,
    state: ProcessState,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    readers: Vec<JoinHandle<()>>,
}

impl NodeProcess {
    fn start(address: String, mut cmd: Command) -> Self {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let result = NodeResult::errored(&address, format!("failed to spawn transport: {e}"));
                return Self {
                    address,
                    state: ProcessState::Finished(result),
                    stderr_tail,
                    readers: Vec::new(),
                };
            }
        };

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(drain_lines(stdout, address.clone(), None));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(drain_lines(stderr, address.clone(), Some(stderr_tail.clone())));
        }

        Self {
            address,
            state: ProcessState::Running(child),
            stderr_tail,
            readers,
        }
    }

    async fn finish(&mut self, exit: std::io::Result<std::process::ExitStatus>, killed: bool) {
        for reader in self.readers.drain(..) {
            let _ = tokio::time::timeout(OUTPUT_DRAIN, reader).await;
        }
        let result = match exit {
            Ok(status) => {
                let stderr = self
                    .stderr_tail
                    .lock()
                    .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
                    .unwrap_or_default();
                let mut result = NodeResult::exited(&self.address, status.code(), stderr);
                result.killed = killed;
                result
            }
            Err(e) => NodeResult::errored(&self.address, format!("failed to wait for transport: {e}")),
        };
        self.state = ProcessState::Finished(result);
    }

    fn result(&self) -> Option<&NodeResult> {
        match &self.state {
            ProcessState::Finished(result) => Some(result),
            ProcessState::Running(_) => None,
        }
    }
}

/// Forward every line of a child stream to `debug!`, keeping the last lines
/// in `tail` when given.
fn drain_lines<R>(
    stream: R,
    address: String,
    tail: Option<Arc<Mutex<VecDeque<String>>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(node = %address, "{line}");
            if let Some(tail) = &tail {
                if let Ok(mut tail) = tail.lock() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
        }
    })
}

/// Handle to a command running on a set of nodes.
///
/// Resolved exactly once, either by a `wait` that sees every node finish or
/// by `kill`. Dropping an unresolved handle kills the local transport
/// processes and logs the leak.
pub struct RunningCommand {
    command: String,
    started_at: DateTime<Utc>,
    processes: Vec<NodeProcess>,
    status: Option<CommandStatus>,
    outstanding: Arc<AtomicUsize>,
}

impl RunningCommand {
    fn spawn(
        command: String,
        processes: Vec<(String, Command)>,
        outstanding: Arc<AtomicUsize>,
    ) -> Self {
        outstanding.fetch_add(1, Ordering::SeqCst);
        let processes = processes
            .into_iter()
            .map(|(address, cmd)| NodeProcess::start(address, cmd))
            .collect();
        Self {
            command,
            started_at: Utc::now(),
            processes,
            status: None,
            outstanding,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn addresses(&self) -> Vec<&str> {
        self.processes.iter().map(|p| p.address.as_str()).collect()
    }

    pub fn is_resolved(&self) -> bool {
        self.status.is_some()
    }

    /// Wait for every node, or until `timeout` elapses. Returns a pending
    /// status on timeout; the handle stays usable.
    pub async fn wait(&mut self, timeout: Option<Duration>) -> CommandStatus {
        if let Some(status) = &self.status {
            return status.clone();
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        for process in &mut self.processes {
            let ProcessState::Running(child) = &mut process.state else {
                continue;
            };
            let exit = match deadline {
                None => Some(child.wait().await),
                Some(deadline) => tokio::time::timeout_at(deadline, child.wait()).await.ok(),
            };
            if let Some(exit) = exit {
                process.finish(exit, false).await;
            }
        }

        let finished: Vec<NodeResult> = self
            .processes
            .iter()
            .filter_map(|p| p.result().cloned())
            .collect();
        if finished.len() < self.processes.len() {
            return CommandStatus {
                completion: Completion::Pending,
                nodes: finished,
            };
        }
        self.resolve(CommandStatus::from_nodes(finished))
    }

    /// Terminate every node's process that is still running and resolve.
    /// Killing an already completed handle just returns its status.
    pub async fn kill(mut self) -> CommandStatus {
        if let Some(status) = &self.status {
            return status.clone();
        }
        for process in &mut self.processes {
            let ProcessState::Running(child) = &mut process.state else {
                continue;
            };
            match child.try_wait() {
                Ok(Some(exit)) => process.finish(Ok(exit), false).await,
                _ => {
                    let exit = terminate(child).await;
                    process.finish(exit, true).await;
                }
            }
        }
        let results = self
            .processes
            .iter()
            .filter_map(|p| p.result().cloned())
            .collect();
        self.resolve(CommandStatus::from_nodes(results))
    }

    fn resolve(&mut self, status: CommandStatus) -> CommandStatus {
        if status.is_failed() {
            tracing::warn!(
                command = %self.command,
                failures = %status.failure_summary(),
                "remote command failed"
            );
        } else {
            tracing::debug!(command = %self.command, "remote command done");
        }
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.status = Some(status.clone());
        status
    }
}

impl Drop for RunningCommand {
    fn drop(&mut self) {
        if self.status.is_none() {
            tracing::warn!(
                command = %self.command,
                "remote command dropped before it was waited or killed"
            );
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// SIGTERM first so the transport can close its session, then SIGKILL.
async fn terminate(child: &mut Child) -> std::io::Result<std::process::ExitStatus> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            if let Ok(exit) = tokio::time::timeout(KILL_GRACE, child.wait()).await {
                return exit;
            }
        }
    }
    child.kill().await?;
    child.wait().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LocalTransport;

    fn local_client() -> RemoteClient {
        RemoteClient::new(Arc::new(LocalTransport::default()))
    }

    fn nodes() -> Vec<Node> {
        vec![
            Node::new("n1", "127.0.0.1", "root"),
            Node::new("n2", "127.0.0.2", "root"),
        ]
    }

    #[tokio::test]
    async fn launch_and_wait_aggregates_every_node() {
        let client = local_client();
        let nodes = nodes();
        let refs: Vec<&Node> = nodes.iter().collect();

        let status = client.launch_and_wait(&refs, "exit 0", None).await;
        assert!(status.is_ok());
        assert_eq!(status.nodes.len(), 2);
        assert_eq!(client.outstanding_handles(), 0);
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failed_status_with_stderr() {
        let client = local_client();
        let nodes = nodes();
        let status = client
            .launch_and_wait(&[&nodes[0]], "echo boom >&2; exit 3", None)
            .await;
        assert!(status.is_failed());
        assert_eq!(status.nodes[0].exit_code, Some(3));
        assert_eq!(status.nodes[0].stderr, "boom");
    }

    #[tokio::test]
    async fn wait_with_timeout_leaves_the_handle_pending() {
        let client = local_client();
        let nodes = nodes();
        let mut handle = client.launch(&[&nodes[0]], "sleep 30", None);

        let status = handle.wait(Some(Duration::from_millis(50))).await;
        assert_eq!(status.completion, Completion::Pending);
        assert!(!handle.is_resolved());
        assert_eq!(client.outstanding_handles(), 1);

        let killed = handle.kill().await;
        assert!(killed.is_ok());
        assert!(killed.nodes[0].killed);
        assert_eq!(client.outstanding_handles(), 0);
    }

    #[tokio::test]
    async fn kill_after_completion_returns_the_recorded_status() {
        let client = local_client();
        let nodes = nodes();
        let mut handle = client.launch(&[&nodes[0]], "exit 0", None);
        assert!(handle.wait(None).await.is_ok());
        let status = handle.kill().await;
        assert!(status.is_ok());
        assert!(!status.nodes[0].killed);
        assert_eq!(client.outstanding_handles(), 0);
    }

    #[tokio::test]
    async fn dropping_an_unresolved_handle_releases_the_count() {
        let client = local_client();
        let nodes = nodes();
        let handle = client.launch(&[&nodes[0]], "sleep 30", None);
        assert_eq!(client.outstanding_handles(), 1);
        drop(handle);
        assert_eq!(client.outstanding_handles(), 0);
    }

    #[tokio::test]
    async fn transfers_copy_files_both_ways() {
        let client = local_client();
        let nodes = nodes();
        let source = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let back = tempfile::tempdir().unwrap();
        let file = source.path().join("front.yaml");
        std::fs::write(&file, "port: 1\n").unwrap();

        let remote_dir = remote.path().to_string_lossy().to_string();
        let up = client
            .upload_files(&[&nodes[0]], &[file], &remote_dir, None)
            .await;
        assert!(up.is_ok(), "{}", up.failure_summary());

        let remote_file = remote.path().join("front.yaml").to_string_lossy().to_string();
        let local_dir = back.path().join("127.0.0.1");
        let down = client
            .download_files(&[&nodes[0]], &[remote_file], &local_dir, None)
            .await;
        assert!(down.is_ok(), "{}", down.failure_summary());
        assert_eq!(
            std::fs::read_to_string(local_dir.join("front.yaml")).unwrap(),
            "port: 1\n"
        );
    }

    #[tokio::test]
    async fn failed_transfer_fails_the_whole_call() {
        let client = local_client();
        let nodes = nodes();
        let back = tempfile::tempdir().unwrap();
        let status = client
            .download_files(
                &[&nodes[0], &nodes[1]],
                &["/nonexistent/monitor.csv".to_string()],
                back.path(),
                None,
            )
            .await;
        assert!(status.is_failed());
        assert_eq!(status.nodes.len(), 2);
    }
}
