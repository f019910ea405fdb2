use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use mender_common::Results;

/// Single on-disk snapshot of the most recently finalized job.
///
/// Each write replaces the file through a temp file and rename, serialized by
/// a lock so concurrent finalizations never interleave.
pub struct ResultsSnapshot {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ResultsSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, results: &Results) -> Result<()> {
        let json = serde_json::to_vec_pretty(results).context("Failed to serialize results")?;
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to move results into {}", self.path.display()))?;
        Ok(())
    }
}
