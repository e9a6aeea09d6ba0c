//! Append-only JSON file of deployment outcomes, one file per network.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::orchestrator::OutcomeRecord;

#[derive(Debug, Clone)]
pub struct DeploymentLedger {
    path: PathBuf,
}

impl DeploymentLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/<network>.json`
    pub fn for_network(dir: impl AsRef<Path>, network: &str) -> Self {
        Self::new(dir.as_ref().join(format!("{network}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries recorded so far, oldest first.
    pub fn entries(&self) -> Result<Vec<Value>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read ledger {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Ledger {} is not a JSON array", self.path.display()))
    }

    pub fn append(&self, record: &OutcomeRecord) -> Result<()> {
        let mut entries = self.entries()?;
        entries.push(serde_json::to_value(record).context("Failed to serialize outcome record")?);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(&entries).context("Failed to serialize ledger")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write ledger {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), entries = entries.len(), "Ledger updated");
        Ok(())
    }
}
