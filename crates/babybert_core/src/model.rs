//! Model Module - The network boundary used by the scheduler and evaluator
//!
//! - MultiTaskModel: what training and evaluation need from a network
//! - BertConfig: encoder hyper-parameters
//! - BabyBert: small candle transformer encoder with MLM and SRL heads
//! - MultiTaskBert: BabyBert + one AdamW optimizer per task

pub mod attention;
pub mod config;
pub mod encoder;
pub mod multitask;

pub use config::BertConfig;
pub use encoder::BabyBert;
pub use multitask::MultiTaskBert;

use crate::batch::{MlmBatch, SrlBatch};
use crate::error::Result;

/// One gradient update per call; predictions never update parameters.
pub trait MultiTaskModel {
    /// Returns the mean masked-token loss of the batch.
    fn train_mlm(&mut self, batch: &MlmBatch) -> Result<f32>;

    /// Returns the mean per-token tag loss of the batch.
    fn train_srl(&mut self, batch: &SrlBatch) -> Result<f32>;

    /// Summed negative log-likelihood over masked positions and their count.
    fn mlm_nll(&self, batch: &MlmBatch) -> Result<(f64, usize)>;

    /// Arg-max output-vocabulary id for every position of every row.
    fn predict_mlm(&self, batch: &MlmBatch) -> Result<Vec<Vec<u32>>>;

    /// Arg-max tag id for every word-piece of every row.
    fn predict_srl(&self, batch: &SrlBatch) -> Result<Vec<Vec<u32>>>;
}
