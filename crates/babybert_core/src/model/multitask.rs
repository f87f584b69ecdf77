//! MultiTaskBert - BabyBert with one AdamW optimizer per task

use std::fs::File;
use std::path::Path;

use candle_core::{DType, Device, Tensor, WithDType, D};
use candle_nn::{ops, AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use fs2::FileExt;
use tracing::info;

use super::config::BertConfig;
use super::encoder::BabyBert;
use super::MultiTaskModel;
use crate::batch::{MlmBatch, SrlBatch};
use crate::error::{Error, Result};

/// Writes the weights while holding `{path}.lock`, so readers never see a
/// half-written file.
pub fn save_securely(varmap: &VarMap, path: &Path) -> Result<()> {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    let lock_file = File::create(&lock_path)?;
    lock_file.lock_exclusive()?;
    let saved = varmap.save(path);
    lock_file.unlock()?;
    saved?;
    Ok(())
}

/// [batch][seq] rows to a [batch, seq] tensor. Rows must share one length.
fn rows_to_tensor<T: WithDType>(rows: &[Vec<T>], device: &Device) -> Result<Tensor> {
    let batch = rows.len();
    let seq = rows.first().map_or(0, Vec::len);
    if batch == 0 || seq == 0 {
        return Err(Error::EmptyEvaluation("empty batch"));
    }
    let flat: Vec<T> = rows.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(flat, (batch, seq), device)?)
}

/// Per-position negative log-likelihood, flattened to [batch * seq].
fn token_nll(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let (b, s, v) = logits.dims3()?;
    let logits_flat = logits.reshape((b * s, v))?;
    let targets_flat = targets.reshape(b * s)?;

    let log_sm = ops::log_softmax(&logits_flat, D::Minus1)?;
    let loss_vec = log_sm
        .gather(&targets_flat.unsqueeze(1)?, D::Minus1)?
        .squeeze(D::Minus1)?
        .neg()?;
    Ok(loss_vec)
}

pub struct MultiTaskBert {
    pub model: BabyBert,
    pub varmap: VarMap,
    opt_mlm: AdamW,
    opt_srl: AdamW,
    device: Device,
}

impl MultiTaskBert {
    pub fn new(config: BertConfig, lr: f64, device: &Device) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = BabyBert::load(config, vb)?;

        let params = ParamsAdamW {
            lr,
            ..Default::default()
        };
        let opt_mlm = AdamW::new(varmap.all_vars(), params.clone())?;
        let opt_srl = AdamW::new(varmap.all_vars(), params)?;

        info!(
            "Model initialized: {} layers, hidden {}, ~{} params",
            config.num_layers,
            config.hidden_size,
            config.num_params()
        );

        Ok(Self {
            model,
            varmap,
            opt_mlm,
            opt_srl,
            device: device.clone(),
        })
    }

    pub fn config(&self) -> &BertConfig {
        &self.model.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_securely(&self.varmap, path.as_ref())
    }

    /// Overwrites the current weights with those stored at `path`.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.varmap.load(path.as_ref())?;
        info!("Loaded weights from {:?}", path.as_ref());
        Ok(())
    }

    fn mlm_forward(&self, batch: &MlmBatch, train: bool) -> Result<(Tensor, Tensor)> {
        let input_ids = rows_to_tensor(&batch.input_ids, &self.device)?;
        let segment_ids = rows_to_tensor(&batch.segment_ids, &self.device)?;
        let attention_mask = rows_to_tensor(&batch.attention_mask, &self.device)?;
        let hidden = self
            .model
            .forward(&input_ids, &segment_ids, &attention_mask, train)?;
        let logits = self.model.mlm_logits(&hidden)?;
        let loss_mask = rows_to_tensor(&batch.loss_mask, &self.device)?;
        Ok((logits, loss_mask))
    }

    fn srl_forward(&self, batch: &SrlBatch, train: bool) -> Result<Tensor> {
        let input_ids = rows_to_tensor(&batch.input_ids, &self.device)?;
        let segment_ids = rows_to_tensor(&batch.predicate_indicator, &self.device)?;
        let attention_mask = rows_to_tensor(&batch.attention_mask, &self.device)?;
        let hidden = self
            .model
            .forward(&input_ids, &segment_ids, &attention_mask, train)?;
        Ok(self.model.srl_logits(&hidden)?)
    }
}

/// Mean of `loss_vec` over positions where `mask` is 1. `None` when nothing is
/// supervised.
fn masked_mean(loss_vec: &Tensor, mask: &Tensor) -> Result<Option<Tensor>> {
    let m_flat = mask.reshape(loss_vec.shape())?;
    let sum_mask = m_flat.sum_all()?.to_scalar::<f32>()?;
    if sum_mask == 0.0 {
        return Ok(None);
    }
    let masked_loss = (loss_vec * m_flat)?;
    Ok(Some((masked_loss.sum_all()? / sum_mask as f64)?))
}

impl MultiTaskModel for MultiTaskBert {
    fn train_mlm(&mut self, batch: &MlmBatch) -> Result<f32> {
        let (logits, loss_mask) = self.mlm_forward(batch, true)?;
        let targets = rows_to_tensor(&batch.target_ids, &self.device)?;
        let loss_vec = token_nll(&logits, &targets)?;

        let Some(loss) = masked_mean(&loss_vec, &loss_mask)? else {
            return Ok(0.0);
        };
        self.opt_mlm.backward_step(&loss)?;
        Ok(loss.to_scalar::<f32>()?)
    }

    fn train_srl(&mut self, batch: &SrlBatch) -> Result<f32> {
        let logits = self.srl_forward(batch, true)?;
        let targets = rows_to_tensor(&batch.tag_ids, &self.device)?;
        let mask = rows_to_tensor(&batch.attention_mask, &self.device)?.to_dtype(DType::F32)?;
        let loss_vec = token_nll(&logits, &targets)?;

        let Some(loss) = masked_mean(&loss_vec, &mask)? else {
            return Ok(0.0);
        };
        self.opt_srl.backward_step(&loss)?;
        Ok(loss.to_scalar::<f32>()?)
    }

    fn mlm_nll(&self, batch: &MlmBatch) -> Result<(f64, usize)> {
        let (logits, loss_mask) = self.mlm_forward(batch, false)?;
        let targets = rows_to_tensor(&batch.target_ids, &self.device)?;
        let loss_vec = token_nll(&logits, &targets)?;
        let m_flat = loss_mask.reshape(loss_vec.shape())?;
        let total = (loss_vec * m_flat)?.sum_all()?.to_scalar::<f32>()?;
        Ok((total as f64, batch.num_targets()))
    }

    fn predict_mlm(&self, batch: &MlmBatch) -> Result<Vec<Vec<u32>>> {
        let (logits, _) = self.mlm_forward(batch, false)?;
        Ok(logits.argmax(D::Minus1)?.to_vec2::<u32>()?)
    }

    fn predict_srl(&self, batch: &SrlBatch) -> Result<Vec<Vec<u32>>> {
        let logits = self.srl_forward(batch, false)?;
        Ok(logits.argmax(D::Minus1)?.to_vec2::<u32>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::SrlExample;

    fn tiny_config() -> BertConfig {
        BertConfig {
            vocab_size: 16,
            hidden_size: 8,
            num_layers: 1,
            num_attention_heads: 2,
            intermediate_size: 16,
            max_position_embeddings: 8,
            embedding_dropout: 0.0,
            mlm_vocab_size: 6,
            srl_vocab_size: 3,
        }
    }

    fn mlm_batch() -> MlmBatch {
        MlmBatch {
            input_ids: vec![vec![2, 4, 5, 3], vec![2, 4, 3, 0]],
            attention_mask: vec![vec![1, 1, 1, 1], vec![1, 1, 1, 0]],
            segment_ids: vec![vec![0; 4], vec![0; 4]],
            target_ids: vec![vec![0, 3, 0, 0], vec![0, 2, 0, 0]],
            loss_mask: vec![vec![0.0, 1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
            masked_tokens: vec![Vec::new(), Vec::new()],
        }
    }

    fn srl_batch() -> SrlBatch {
        SrlBatch {
            input_ids: vec![vec![2, 7, 8, 3]],
            attention_mask: vec![vec![1, 1, 1, 1]],
            predicate_indicator: vec![vec![0, 1, 0, 0]],
            tag_ids: vec![vec![0, 1, 2, 0]],
            examples: vec![SrlExample {
                words: vec!["go".into(), "home".into()],
                predicate_index: 0,
                gold_labels: vec!["B-V".into(), "B-ARG1".into()],
                word_starts: vec![1, 2],
            }],
        }
    }

    #[test]
    fn test_mlm_training_reduces_loss() -> Result<()> {
        let mut model = MultiTaskBert::new(tiny_config(), 1e-2, &Device::Cpu)?;
        let batch = mlm_batch();
        let (before, count) = model.mlm_nll(&batch)?;
        assert_eq!(count, 2);
        for _ in 0..30 {
            model.train_mlm(&batch)?;
        }
        let (after, _) = model.mlm_nll(&batch)?;
        assert!(after < before, "{after} >= {before}");
        Ok(())
    }

    #[test]
    fn test_predictions_cover_every_position() -> Result<()> {
        let mut model = MultiTaskBert::new(tiny_config(), 1e-3, &Device::Cpu)?;
        assert!(model.train_srl(&srl_batch())?.is_finite());

        let tags = model.predict_srl(&srl_batch())?;
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].len(), 4);
        assert!(tags[0].iter().all(|&t| t < 3));

        let pieces = model.predict_mlm(&mlm_batch())?;
        assert_eq!(pieces.len(), 2);
        assert!(pieces.iter().all(|row| row.len() == 4));
        Ok(())
    }

    #[test]
    fn test_save_and_load_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.safetensors");

        let trained = MultiTaskBert::new(tiny_config(), 1e-3, &Device::Cpu)?;
        trained.save(&path)?;

        let mut fresh = MultiTaskBert::new(tiny_config(), 1e-3, &Device::Cpu)?;
        fresh.load(&path)?;
        let batch = mlm_batch();
        assert_eq!(trained.mlm_nll(&batch)?.0, fresh.mlm_nll(&batch)?.0);
        Ok(())
    }
}
