//! Data Configuration - Options shared by the loaders and converters

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Options consumed by the loader, splitter and converters.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DataConfig {
    /// Utterances/propositions shorter than this (in words) are dropped.
    pub min_input_length: usize,
    /// Utterances/propositions longer than this (in words) are dropped.
    pub max_input_length: usize,
    /// Word-piece length of an instance including `[CLS]` and `[SEP]`.
    pub max_sentence_length: usize,
    /// Number of word-pieces masked per MLM instance.
    pub num_masked: usize,
    /// Probability that an example is assigned to the train split.
    pub train_prob: f64,
    pub seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            min_input_length: 3,
            max_input_length: 128,
            max_sentence_length: 128,
            num_masked: 1,
            train_prob: 0.8,
            seed: 2,
        }
    }
}

impl DataConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_input_length == 0 {
            return Err(Error::InvalidConfig(
                "min_input_length must be at least 1".to_string(),
            ));
        }
        if self.min_input_length > self.max_input_length {
            return Err(Error::InvalidConfig(format!(
                "min_input_length ({}) exceeds max_input_length ({})",
                self.min_input_length, self.max_input_length
            )));
        }
        if !(self.train_prob > 0.0 && self.train_prob <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "train_prob must be in (0, 1], got {}",
                self.train_prob
            )));
        }
        // [CLS] + at least one piece + [SEP]
        if self.max_sentence_length < 3 {
            return Err(Error::InvalidConfig(format!(
                "max_sentence_length must be at least 3, got {}",
                self.max_sentence_length
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(DataConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_lengths() {
        let config = DataConfig {
            min_input_length: 10,
            max_input_length: 5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_minimum() {
        let config = DataConfig {
            min_input_length: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
