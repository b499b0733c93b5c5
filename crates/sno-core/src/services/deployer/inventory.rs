use std::path::Path;

use super::Layout;
use crate::models::{CommandStatus, Node};
use crate::services::remote::RemoteClient;

/// Snapshot of the containers present on every node, fetched at teardown
/// as an `id : name` table per node.
pub struct ArtifactCollector {
    nodes: Vec<Node>,
    inventory_path: String,
    layout: Layout,
}

impl ArtifactCollector {
    pub fn new(nodes: Vec<Node>, inventory_path: &str, layout: Layout) -> Self {
        Self {
            nodes,
            inventory_path: inventory_path.to_string(),
            layout,
        }
    }

    fn file_name(&self) -> String {
        Path::new(&self.inventory_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "docker_names".to_string())
    }

    pub async fn start(&mut self, client: &RemoteClient) -> CommandStatus {
        let nodes: Vec<&Node> = self.nodes.iter().collect();
        client
            .launch_and_wait(&nodes, &format!("docker ps -a | tee {}", self.inventory_path), None)
            .await
    }

    /// Fetch every node's listing and rewrite it in place. A node that fails
    /// does not stop the others.
    pub async fn kill(&mut self, client: &RemoteClient) -> CommandStatus {
        let mut status = CommandStatus::ok();
        for node in &self.nodes {
            let target = self.layout.node_output(&node.address);
            let fetched = client
                .download_files(&[node], &[self.inventory_path.clone()], &target, None)
                .await;
            if fetched.is_ok() {
                let path = target.join(self.file_name());
                if let Err(e) = rewrite(&path).await {
                    tracing::warn!(node = %node.address, error = %e, "could not rewrite container inventory");
                    status = status.merge(CommandStatus::failed(
                        &node.address,
                        format!("rewriting {}: {e}", path.display()),
                    ));
                }
            }
            status = status.merge(fetched);
        }
        status
    }
}

async fn rewrite(path: &Path) -> std::io::Result<()> {
    let listing = tokio::fs::read_to_string(path).await?;
    let table: String = parse_inventory(&listing)
        .into_iter()
        .map(|(id, name)| format!("{id} : {name}\n"))
        .collect();
    tokio::fs::write(path, table).await
}

/// Map container id (first column) to container name (last column) from
/// `docker ps -a` output. The header line is skipped, and a repeated id keeps
/// its first position with the latest name.
pub fn parse_inventory(listing: &str) -> Vec<(String, String)> {
    let mut entries: Vec<(String, String)> = Vec::new();
    for line in listing.lines().skip(1) {
        let mut columns = line.split_whitespace();
        let Some(id) = columns.next() else {
            continue;
        };
        let name = columns.last().unwrap_or(id);
        match entries.iter_mut().find(|(known, _)| known == id) {
            Some(entry) => entry.1 = name.to_string(),
            None => entries.push((id.to_string(), name.to_string())),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppConfig;
    use crate::testing::RecordingTransport;
    use std::sync::Arc;

    const LISTING: &str = "\
CONTAINER ID   IMAGE          COMMAND                  CREATED       STATUS       PORTS                    NAMES
3f2a1b0c9d8e   mysql:8.0      \"docker-entrypoint.s…\"   2 hours ago   Up 2 hours   0.0.0.0:3306->3306/tcp   scripts_db1_1
9a8b7c6d5e4f   redis:6.2.7    \"docker-entrypoint.s…\"   2 hours ago   Up 2 hours   0.0.0.0:6379->6379/tcp   scripts_cache1-redis_1

";

    #[test]
    fn header_is_skipped_and_names_are_the_last_column() {
        assert_eq!(
            parse_inventory(LISTING),
            vec![
                ("3f2a1b0c9d8e".to_string(), "scripts_db1_1".to_string()),
                ("9a8b7c6d5e4f".to_string(), "scripts_cache1-redis_1".to_string()),
            ]
        );
    }

    #[test]
    fn header_only_listing_is_empty() {
        assert!(parse_inventory("CONTAINER ID   IMAGE   NAMES\n").is_empty());
    }

    #[tokio::test]
    async fn every_node_listing_is_rewritten_under_its_address() {
        let scratch = tempfile::tempdir().unwrap();
        let listing = scratch.path().join("listing");
        std::fs::write(&listing, LISTING).unwrap();
        let output = scratch.path().join("out");

        let recorder =
            Arc::new(RecordingTransport::new().serving("/tmp/docker_names", listing.clone()));
        let client = RemoteClient::new(recorder.clone());
        let nodes = vec![
            Node::new("n1", "10.0.0.1", "root"),
            Node::new("n2", "10.0.0.2", "root"),
        ];
        let layout = Layout::new(&AppConfig::default(), &output);
        let mut collector = ArtifactCollector::new(nodes, "/tmp/docker_names", layout);

        assert!(collector.start(&client).await.is_ok());
        assert_eq!(recorder.execs(), vec!["docker ps -a | tee /tmp/docker_names"; 2]);

        let status = collector.kill(&client).await;
        assert!(status.is_ok(), "{}", status.failure_summary());
        for address in ["10.0.0.1", "10.0.0.2"] {
            let table = std::fs::read_to_string(output.join(address).join("docker_names")).unwrap();
            assert_eq!(
                table,
                "3f2a1b0c9d8e : scripts_db1_1\n9a8b7c6d5e4f : scripts_cache1-redis_1\n"
            );
        }
    }

    #[tokio::test]
    async fn failed_download_on_one_node_still_fetches_the_next() {
        let scratch = tempfile::tempdir().unwrap();
        let output = scratch.path().join("out");
        let recorder = Arc::new(RecordingTransport::new().failing("out/10.0.0.1"));
        let client = RemoteClient::new(recorder.clone());
        let nodes = vec![
            Node::new("n1", "10.0.0.1", "root"),
            Node::new("n2", "10.0.0.2", "root"),
        ];
        let layout = Layout::new(&AppConfig::default(), &output);
        let mut collector = ArtifactCollector::new(nodes, "/tmp/docker_names", layout);

        let status = collector.kill(&client).await;
        assert!(status.is_failed());
        assert!(output.join("10.0.0.2").join("docker_names").exists());
    }
}
