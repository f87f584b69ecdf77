//! Checkpoint Management - Weights and scheduler state persistence

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use babybert_core::{MultiTaskBert, TrainingState};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const MODEL_FILE: &str = "model.safetensors";
pub const STATE_FILE: &str = "training_state.json";
pub const PARAMS_FILE: &str = "params.json";

/// Training state for serialization
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Checkpoint {
    pub date: String,
    pub checkpoint: String,
    pub state: TrainingState,
}

/// Saves weights (under a file lock) and then the state that refers to them.
pub fn save_checkpoint(
    save_dir: &Path,
    model: &MultiTaskBert,
    state: &TrainingState,
) -> babybert_core::Result<()> {
    fs::create_dir_all(save_dir)?;
    model.save(save_dir.join(MODEL_FILE))?;

    let checkpoint = Checkpoint {
        date: chrono::Local::now().to_rfc3339(),
        checkpoint: MODEL_FILE.to_string(),
        state: state.clone(),
    };
    let path = save_dir.join(STATE_FILE);
    let file = File::create(&path)?;
    serde_json::to_writer_pretty(file, &checkpoint)?;

    info!("💾 Checkpoint saved at step {} -> {:?}", state.step, save_dir);
    Ok(())
}

/// `None` when the directory holds no training state.
pub fn load_checkpoint(save_dir: &Path) -> Result<Option<Checkpoint>> {
    let path = save_dir.join(STATE_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(&path)?;
    let checkpoint = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Corrupt training state {:?}", path))?;
    Ok(Some(checkpoint))
}
