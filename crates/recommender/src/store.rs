//! File-backed checkpoint storage
//!
//! Persists each checkpoint cycle as one JSON document, written atomically
//! via a temp file and rename so a crash mid-write leaves the previous
//! checkpoint intact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use recommender_lib::{CheckpointStore, ContainerCheckpoint};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing::{debug, info};

/// Checkpoint store writing to a single JSON file
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn save(&self, checkpoints: &[ContainerCheckpoint]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let json = serde_json::to_vec(checkpoints).context("Failed to serialize checkpoints")?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

        file.write_all(&json)
            .context("Failed to write checkpoint data")?;
        file.sync_all().context("Failed to sync checkpoint file")?;

        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, self.path))?;

        debug!(path = %self.path.display(), records = checkpoints.len(), "Checkpoints written");
        Ok(())
    }

    fn read(&self) -> Result<Vec<ContainerCheckpoint>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No checkpoint file, starting cold");
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)
            .with_context(|| format!("Failed to open checkpoint file {:?}", self.path))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .context("Failed to read checkpoint file")?;

        let checkpoints: Vec<ContainerCheckpoint> =
            serde_json::from_slice(&data).context("Failed to deserialize checkpoint data")?;

        info!(path = %self.path.display(), records = checkpoints.len(), "Checkpoints loaded");
        Ok(checkpoints)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn store(&self, checkpoints: Vec<ContainerCheckpoint>) -> Result<()> {
        self.save(&checkpoints)
    }

    async fn load(&self) -> Result<Vec<ContainerCheckpoint>> {
        self.read()
    }
}
