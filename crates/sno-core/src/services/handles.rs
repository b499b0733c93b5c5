use std::collections::BTreeSet;

use super::remote::RunningCommand;
use crate::error::{OrchestratorError, Result};
use crate::models::CommandStatus;

/// Named long-running application processes, in launch order.
///
/// A name is held by at most one live handle. Releasing kills the handle and
/// forgets it; the name is remembered so a second release is reported.
#[derive(Default)]
pub struct HandleRegistry {
    live: Vec<(String, RunningCommand)>,
    released: BTreeSet<String>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, handle: RunningCommand) -> Result<()> {
        if self.contains(name) {
            return Err(OrchestratorError::HandleExists(name.to_string()));
        }
        self.released.remove(name);
        self.live.push((name.to_string(), handle));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.live.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.live.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Kill and forget the handle under `name`. `Ok(None)` when nothing was
    /// ever registered under it.
    pub async fn release(&mut self, name: &str) -> Result<Option<CommandStatus>> {
        match self.live.iter().position(|(n, _)| n == name) {
            Some(index) => {
                let (name, handle) = self.live.remove(index);
                tracing::info!(handle = %name, "releasing");
                let status = handle.kill().await;
                self.released.insert(name);
                Ok(Some(status))
            }
            None if self.released.contains(name) => {
                Err(OrchestratorError::HandleAlreadyReleased(name.to_string()))
            }
            None => Ok(None),
        }
    }

    /// Kill every remaining handle, most recently launched first.
    pub async fn release_all(&mut self) -> Vec<(String, CommandStatus)> {
        let mut statuses = Vec::new();
        while let Some((name, handle)) = self.live.pop() {
            tracing::warn!(handle = %name, "releasing leftover handle");
            statuses.push((name.clone(), handle.kill().await));
            self.released.insert(name);
        }
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Node;
    use crate::services::remote::RemoteClient;
    use crate::testing::LocalTransport;
    use std::sync::Arc;

    fn launch(client: &RemoteClient) -> RunningCommand {
        let node = Node::new("local", "127.0.0.1", "root");
        client.launch(&[&node], "sleep 30", None)
    }

    #[tokio::test]
    async fn a_name_holds_one_live_handle() {
        let client = RemoteClient::new(Arc::new(LocalTransport));
        let mut registry = HandleRegistry::new();
        registry.insert("front", launch(&client)).unwrap();

        let err = registry.insert("front", launch(&client)).unwrap_err();
        assert!(matches!(err, OrchestratorError::HandleExists(ref n) if n == "front"));
        assert_eq!(registry.len(), 1);

        registry.release_all().await;
        assert_eq!(client.outstanding_handles(), 0);
    }

    #[tokio::test]
    async fn release_twice_is_reported() {
        let client = RemoteClient::new(Arc::new(LocalTransport));
        let mut registry = HandleRegistry::new();
        registry.insert("registry", launch(&client)).unwrap();

        let status = registry.release("registry").await.unwrap().unwrap();
        assert!(status.is_ok());
        assert!(status.nodes[0].killed);

        let err = registry.release("registry").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::HandleAlreadyReleased(_)));
        assert!(registry.release("front").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_all_goes_in_reverse_launch_order() {
        let client = RemoteClient::new(Arc::new(LocalTransport));
        let mut registry = HandleRegistry::new();
        for name in ["registry", "front", "actor:a1"] {
            registry.insert(name, launch(&client)).unwrap();
        }
        assert_eq!(registry.names(), vec!["registry", "front", "actor:a1"]);

        let released: Vec<String> = registry
            .release_all()
            .await
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(released, vec!["actor:a1", "front", "registry"]);
        assert!(registry.is_empty());
        assert_eq!(client.outstanding_handles(), 0);
    }
}
