use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{OrchestratorError, Result};
use crate::models::{LifecycleReport, Node, Placement};

/// What was deployed where, written once startup begins.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    pub started_at: DateTime<Utc>,
    pub remote_root: String,
    pub nodes: Vec<Node>,
    pub services: Vec<Placement>,
    pub generated_configs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TeardownRecord<'a> {
    finished_at: DateTime<Utc>,
    clean: bool,
    #[serde(flatten)]
    report: &'a LifecycleReport,
}

/// JSON records of one run, kept in the run's output directory.
pub struct RunStore {
    output_dir: PathBuf,
}

impl RunStore {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join("manifest.json")
    }

    pub fn teardown_path(&self) -> PathBuf {
        self.output_dir.join("teardown.json")
    }

    pub async fn save_manifest(&self, manifest: &RunManifest) -> Result<()> {
        self.write(&self.manifest_path(), &serde_json::to_string_pretty(manifest)?)
            .await
    }

    pub async fn save_teardown(&self, report: &LifecycleReport) -> Result<()> {
        let record = TeardownRecord {
            finished_at: Utc::now(),
            clean: report.is_clean(),
            report,
        };
        self.write(&self.teardown_path(), &serde_json::to_string_pretty(&record)?)
            .await
    }

    async fn write(&self, path: &Path, json: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| OrchestratorError::State(format!("failed to create output dir: {e}")))?;
        tokio::fs::write(path, json).await.map_err(|e| {
            OrchestratorError::State(format!("failed to write {}: {e}", path.display()))
        })
    }
}
