//! Probing - Fixed diagnostic templates scored at every evaluation
//!
//! A probing file holds one sentence per line with literal `[MASK]` words.
//! Predictions for all of its sentences are written per evaluation step.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use babybert_core::eval::predict_masked_sentences;
use babybert_core::{DataConfig, LabelVocab, MlmBatch, MlmConverter, MultiTaskModel, WordPieceTokenizer};
use tracing::{info, warn};

use crate::config::ProjectPaths;

pub struct ProbingTask {
    pub name: String,
    pub batches: Vec<MlmBatch>,
    pub num_sentences: usize,
}

impl ProbingTask {
    pub fn load(
        name: &str,
        path: &Path,
        tokenizer: &WordPieceTokenizer,
        config: &DataConfig,
        output_vocab: &LabelVocab,
        batch_size: usize,
    ) -> Result<Self> {
        let reader = BufReader::new(
            File::open(path).with_context(|| format!("Failed to open probing file {:?}", path))?,
        );
        let converter = MlmConverter::new(tokenizer, config);
        let mut instances = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.is_empty() {
                continue;
            }
            instances.push(converter.convert_probe(&words)?);
        }

        // Keep file order so output lines match input lines.
        let batches = instances
            .chunks(batch_size.max(1))
            .map(|chunk| {
                let members: Vec<_> = chunk.iter().collect();
                MlmBatch::from_instances(&members, output_vocab)
            })
            .collect();

        info!("Probing task '{}': {} sentences", name, instances.len());
        Ok(Self {
            name: name.to_string(),
            batches,
            num_sentences: instances.len(),
        })
    }

    /// Writes `{out_dir}/{name}_step_{step}.txt` and returns its path.
    pub fn run<M: MultiTaskModel + ?Sized>(
        &self,
        model: &M,
        output_vocab: &LabelVocab,
        out_dir: &Path,
        step: usize,
    ) -> babybert_core::Result<PathBuf> {
        let predictions = predict_masked_sentences(model, &self.batches, output_vocab, usize::MAX)?;
        fs::create_dir_all(out_dir)?;
        let path = out_dir.join(format!("{}_step_{}.txt", self.name, step));
        let mut out = BufWriter::new(File::create(&path)?);
        for prediction in &predictions {
            writeln!(out, "{}", prediction.to_line())?;
        }
        out.flush()?;
        Ok(path)
    }
}

/// Loads every named task; names without a file are skipped with a warning.
pub fn load_tasks(
    names: &[String],
    paths: &ProjectPaths,
    tokenizer: &WordPieceTokenizer,
    config: &DataConfig,
    output_vocab: &LabelVocab,
    batch_size: usize,
) -> Result<Vec<ProbingTask>> {
    let mut tasks = Vec::with_capacity(names.len());
    for name in names {
        let path = paths.probing_file(name);
        if !path.exists() {
            warn!("⚠️ Probing file {:?} not found. Skipping '{}'.", path, name);
            continue;
        }
        tasks.push(ProbingTask::load(name, &path, tokenizer, config, output_vocab, batch_size)?);
    }
    Ok(tasks)
}
