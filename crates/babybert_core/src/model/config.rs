//! BertConfig - Encoder configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct BertConfig {
    /// Input (word-piece) vocabulary size.
    pub vocab_size: usize,
    pub hidden_size: usize,
    #[serde(alias = "n_layers")]
    pub num_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub max_position_embeddings: usize,
    pub embedding_dropout: f32,
    /// Size of the MLM output vocabulary.
    pub mlm_vocab_size: usize,
    /// Number of SRL tags.
    pub srl_vocab_size: usize,
}

impl BertConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::InvalidConfig(format!(
                "hidden_size {} is not divisible by {} attention heads",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.mlm_vocab_size == 0 || self.srl_vocab_size == 0 {
            return Err(Error::InvalidConfig(
                "output vocabularies must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Rough trainable parameter count.
    pub fn num_params(&self) -> usize {
        let h = self.hidden_size;
        let embeddings = (self.vocab_size + self.max_position_embeddings + 2) * h + 2 * h;
        let layer = 4 * (h * h + h) + 2 * h * self.intermediate_size
            + self.intermediate_size
            + h
            + 4 * h;
        let heads = (h + 1) * (self.mlm_vocab_size + self.srl_vocab_size);
        embeddings + self.num_layers * layer + heads
    }
}
