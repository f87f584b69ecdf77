//! Job Configuration - Parameters of one training run and the project layout
//!
//! Parameters load from a JSON file (every field optional, defaults below)
//! and can then be overridden from the command line.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use babybert_core::{BertConfig, DataConfig, ScheduleConfig, SrlPolicy};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct JobParams {
    // Batching & optimization
    pub batch_size: usize,
    pub lr: f64,
    pub embedding_dropout: f32,
    // Architecture
    pub num_layers: usize,
    pub hidden_size: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub max_sentence_length: usize,
    // Data
    pub corpus_name: String,
    pub vocab_size: usize,
    pub num_masked: usize,
    pub min_input_length: usize,
    pub max_input_length: usize,
    pub train_prob: f64,
    pub seed: u64,
    // Schedule
    pub num_mlm_epochs: usize,
    pub num_srl_epochs: usize,
    pub srl_interleaved: bool,
    pub srl_probability: f64,
    pub srl_task_delay: Option<usize>,
    pub srl_task_ramp: Option<f64>,
    pub max_steps: usize,
    pub eval_interval: usize,
    pub save_interval: usize,
    // Evaluation
    pub evaluate_train: bool,
    pub num_prediction_samples: usize,
    pub probing_names: Vec<String>,
    pub scorer_timeout_secs: u64,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            batch_size: 32,
            lr: 1e-4,
            embedding_dropout: 0.1,
            num_layers: 8,
            hidden_size: 256,
            num_attention_heads: 8,
            intermediate_size: 1024,
            max_sentence_length: 128,
            corpus_name: "childes-20191206".to_string(),
            vocab_size: 4000,
            num_masked: 1,
            min_input_length: 3,
            max_input_length: 128,
            train_prob: 0.8,
            seed: 2,
            num_mlm_epochs: 1,
            num_srl_epochs: 1,
            srl_interleaved: true,
            srl_probability: 0.5,
            srl_task_delay: None,
            srl_task_ramp: None,
            max_steps: 100_000,
            eval_interval: 1000,
            save_interval: 1000,
            evaluate_train: false,
            num_prediction_samples: 10,
            probing_names: Vec::new(),
            scorer_timeout_secs: 300,
        }
    }
}

impl JobParams {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open config {:?}", path))?;
        let params = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(params)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Maps the scheduling flags onto exactly one policy.
    pub fn policy(&self) -> Result<SrlPolicy> {
        match (self.srl_interleaved, self.srl_task_delay, self.srl_task_ramp) {
            (true, None, None) => Ok(SrlPolicy::Interleaved {
                probability: self.srl_probability,
            }),
            (true, _, _) => bail!("srl_task_delay/srl_task_ramp cannot be combined with srl_interleaved"),
            (false, Some(delay), Some(ramp)) => Ok(SrlPolicy::Ramp { delay, ramp }),
            (false, None, None) => Ok(SrlPolicy::DoubleLength),
            (false, _, _) => bail!("srl_task_delay and srl_task_ramp must be given together"),
        }
    }

    pub fn data_config(&self) -> Result<DataConfig> {
        let config = DataConfig {
            min_input_length: self.min_input_length,
            max_input_length: self.max_input_length,
            max_sentence_length: self.max_sentence_length,
            num_masked: self.num_masked,
            train_prob: self.train_prob,
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn schedule_config(&self) -> Result<ScheduleConfig> {
        let config = ScheduleConfig {
            max_steps: self.max_steps,
            eval_interval: self.eval_interval,
            policy: self.policy()?,
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn bert_config(&self, vocab_size: usize, mlm_vocab_size: usize, srl_vocab_size: usize) -> BertConfig {
        BertConfig {
            vocab_size,
            hidden_size: self.hidden_size,
            num_layers: self.num_layers,
            num_attention_heads: self.num_attention_heads,
            intermediate_size: self.intermediate_size,
            max_position_embeddings: self.max_sentence_length,
            embedding_dropout: self.embedding_dropout,
            mlm_vocab_size,
            srl_vocab_size,
        }
    }
}

/// File layout of a project directory.
#[derive(Clone, Debug)]
pub struct ProjectPaths {
    pub root: PathBuf,
}

impl ProjectPaths {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn childes(&self) -> PathBuf {
        self.root.join("data").join("CHILDES")
    }

    /// Raw transcripts, one per line.
    pub fn mlm_corpus(&self, corpus: &str) -> PathBuf {
        self.childes().join(format!("{corpus}_mlm.txt"))
    }

    /// Propositions, one per line.
    pub fn srl_corpus(&self, corpus: &str) -> PathBuf {
        self.childes().join(format!("{corpus}_srl.txt"))
    }

    /// e.g. `data/CHILDES/{corpus}_devel_srl.txt`
    pub fn split_file(&self, corpus: &str, part: &str, task: &str) -> PathBuf {
        self.childes().join(format!("{corpus}_{part}_{task}.txt"))
    }

    /// `rank token` frequency list of the corpus.
    pub fn corpus_vocab(&self, corpus: &str) -> PathBuf {
        self.childes().join(format!("{corpus}_vocab.txt"))
    }

    pub fn reference_vocab(&self) -> PathBuf {
        self.root.join("data").join("bert-base-cased-vocab.txt")
    }

    /// Merged input vocabulary read by the word-piece tokenizer.
    pub fn vocab_file(&self, corpus: &str, vocab_size: usize) -> PathBuf {
        self.root
            .join("data")
            .join(format!("{corpus}_vocab_{vocab_size}.txt"))
    }

    pub fn probing_file(&self, name: &str) -> PathBuf {
        self.root.join("data").join("probing").join(format!("{name}.txt"))
    }

    pub fn srl_eval_script(&self) -> PathBuf {
        self.root.join("perl").join("srl-eval.pl")
    }
}
