use super::Layout;
use crate::error::Result;
use crate::models::{CommandStatus, DatabaseSpec, Node};
use crate::services::remote::RemoteClient;
use crate::services::template::{self, MYSQL_COMPOSE};

/// One MySQL container on one node.
pub struct DatabaseDeployer {
    name: String,
    node: Node,
    spec: DatabaseSpec,
    layout: Layout,
}

impl DatabaseDeployer {
    pub fn new(name: &str, node: Node, spec: DatabaseSpec, layout: Layout) -> Self {
        Self {
            name: name.to_string(),
            node,
            spec,
            layout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn descriptor(&self) -> String {
        format!("{}.yaml", self.name)
    }

    /// Render the compose descriptor, upload it, clear any stale container
    /// from a previous run, and bring the database up.
    pub async fn start(&mut self, client: &RemoteClient) -> Result<CommandStatus> {
        let port = self.spec.port.to_string();
        let descriptor = template::render(MYSQL_COMPOSE, &[("PORT", port.as_str())])?;
        tokio::fs::create_dir_all(&self.layout.staging_dir).await?;
        let local = self.layout.staging_dir.join(self.descriptor());
        tokio::fs::write(&local, descriptor).await?;

        let nodes = [&self.node];
        let upload = client
            .upload_files(&nodes, &[local], &self.layout.remote(&self.descriptor()), None)
            .await;

        let stale = self.kill(client).await;
        if stale.is_failed() {
            tracing::debug!(database = %self.name, "no stale container to bring down");
        }

        let up = client
            .launch_and_wait(&nodes, &self.layout.compose(&self.descriptor(), "up -d"), None)
            .await;
        Ok(upload.merge(up))
    }

    /// Load every configured script in order, then the dump if any. A failed
    /// script is reported but does not stop the remaining ones.
    pub async fn fill(&mut self, client: &RemoteClient) -> CommandStatus {
        let mut status = CommandStatus::ok();
        for script in &self.spec.scripts {
            let loaded = self.load_sql(client, script, Some(script)).await;
            if loaded.is_failed() {
                tracing::warn!(database = %self.name, script, "script load failed");
            }
            status = status.merge(loaded);
        }
        if let Some(dump) = &self.spec.dump {
            status = status.merge(self.load_sql(client, dump, None).await);
        }
        status
    }

    async fn load_sql(
        &self,
        client: &RemoteClient,
        file_stem: &str,
        target_database: Option<&str>,
    ) -> CommandStatus {
        let file_name = format!("{file_stem}.sql");
        let local = self.layout.data_dir.join(&file_name);
        let remote = self.layout.remote(&file_name);
        let nodes = [&self.node];

        let upload = client.upload_files(&nodes, &[local], &remote, None).await;
        let target = target_database.map(|db| format!(" {db}")).unwrap_or_default();
        let command = format!(
            "mysql -h {} -u root -P {}{target} < {remote}",
            self.node.address, self.spec.port
        );
        upload.merge(client.launch_and_wait(&nodes, &command, None).await)
    }

    pub async fn kill(&self, client: &RemoteClient) -> CommandStatus {
        client
            .launch_and_wait(&[&self.node], &self.layout.compose(&self.descriptor(), "down"), None)
            .await
    }
}
