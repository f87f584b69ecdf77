//! BabyBert - Post-norm transformer encoder with MLM and SRL heads

use candle_core::{DType, Result, Tensor};
use candle_nn::{
    embedding, layer_norm, linear, Dropout, Embedding, LayerNorm, Linear, Module, VarBuilder,
};

use super::attention::SelfAttention;
use super::config::BertConfig;

const LAYER_NORM_EPS: f64 = 1e-12;

/// Segment ids are 0/1: all zeros for MLM, the predicate indicator for SRL.
const NUM_SEGMENTS: usize = 2;

/// Attention + feed-forward, each followed by residual and LayerNorm.
pub struct EncoderLayer {
    pub attention: SelfAttention,
    pub norm1: LayerNorm,
    pub ff_in: Linear,
    pub ff_out: Linear,
    pub norm2: LayerNorm,
}

impl EncoderLayer {
    pub fn load(cfg: &BertConfig, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        Ok(Self {
            attention: SelfAttention::load(h, cfg.num_attention_heads, vb.pp("attention"))?,
            norm1: layer_norm(h, LAYER_NORM_EPS, vb.pp("norm1"))?,
            ff_in: linear(h, cfg.intermediate_size, vb.pp("ff_in"))?,
            ff_out: linear(cfg.intermediate_size, h, vb.pp("ff_out"))?,
            norm2: layer_norm(h, LAYER_NORM_EPS, vb.pp("norm2"))?,
        })
    }

    pub fn forward(&self, x: &Tensor, key_mask: &Tensor) -> Result<Tensor> {
        let attn_out = self.attention.forward(x, key_mask)?;
        let x = self.norm1.forward(&(x + attn_out)?)?;

        let ff = self.ff_out.forward(&self.ff_in.forward(&x)?.gelu()?)?;
        self.norm2.forward(&(x + ff)?)
    }
}

pub struct BabyBert {
    pub word_embeddings: Embedding,
    pub position_embeddings: Embedding,
    pub segment_embeddings: Embedding,
    pub embedding_norm: LayerNorm,
    pub dropout: Dropout,
    pub layers: Vec<EncoderLayer>,
    pub mlm_head: Linear,
    pub srl_head: Linear,
    pub config: BertConfig,
}

impl BabyBert {
    pub fn load(cfg: BertConfig, vb: VarBuilder) -> Result<Self> {
        let h = cfg.hidden_size;
        let word_embeddings = embedding(cfg.vocab_size, h, vb.pp("embed.word"))?;
        let position_embeddings = embedding(cfg.max_position_embeddings, h, vb.pp("embed.position"))?;
        let segment_embeddings = embedding(NUM_SEGMENTS, h, vb.pp("embed.segment"))?;
        let embedding_norm = layer_norm(h, LAYER_NORM_EPS, vb.pp("embed.norm"))?;

        let mut layers = Vec::with_capacity(cfg.num_layers);
        for i in 0..cfg.num_layers {
            layers.push(EncoderLayer::load(&cfg, vb.pp(format!("layers.{i}")))?);
        }

        let mlm_head = linear(h, cfg.mlm_vocab_size, vb.pp("mlm_head"))?;
        let srl_head = linear(h, cfg.srl_vocab_size, vb.pp("srl_head"))?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            segment_embeddings,
            embedding_norm,
            dropout: Dropout::new(cfg.embedding_dropout),
            layers,
            mlm_head,
            srl_head,
            config: cfg,
        })
    }

    /// input_ids, segment_ids: [batch, seq] u32; attention_mask: [batch, seq] 0/1.
    /// Returns hidden states [batch, seq, hidden].
    pub fn forward(
        &self,
        input_ids: &Tensor,
        segment_ids: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?.unsqueeze(0)?;

        let x = self
            .word_embeddings
            .forward(input_ids)?
            .broadcast_add(&self.position_embeddings.forward(&positions)?)?;
        let x = (x + self.segment_embeddings.forward(segment_ids)?)?;
        let x = self.embedding_norm.forward(&x)?;
        let mut x = self.dropout.forward(&x, train)?;

        let key_mask = attention_mask.to_dtype(DType::F32)?;
        for layer in &self.layers {
            x = layer.forward(&x, &key_mask)?;
        }
        Ok(x)
    }

    pub fn mlm_logits(&self, hidden: &Tensor) -> Result<Tensor> {
        self.mlm_head.forward(hidden)
    }

    pub fn srl_logits(&self, hidden: &Tensor) -> Result<Tensor> {
        self.srl_head.forward(hidden)
    }
}
