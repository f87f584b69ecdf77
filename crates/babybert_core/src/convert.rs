//! Converters - Raw examples to fixed-shape instances
//!
//! Both converters frame word-pieces with `[CLS]`/`[SEP]` and pad to
//! `max_sentence_length`. MLM instances carry the masked positions and their
//! original pieces; SRL instances carry a predicate indicator and one tag
//! per piece, plus the word-level view needed to score predictions.

use rand::seq::index;
use rand::Rng;
use tracing::warn;

use crate::config::DataConfig;
use crate::corpus::Proposition;
use crate::error::Result;
use crate::vocab::{CLS, CLS_ID, MASK, MASK_ID, PAD_ID, SEP, SEP_ID};
use crate::wordpiece::{join_pieces, WordPieceTokenizer};

/// Tag given to `[CLS]`, `[SEP]` in SRL instances.
pub const OUTSIDE: &str = "O";

#[derive(Debug, Clone, PartialEq)]
pub struct MlmInstance {
    /// Framed pieces before masking, unpadded.
    pub tokens: Vec<String>,
    /// Framed pieces with `[MASK]` substituted, unpadded.
    pub masked_tokens: Vec<String>,
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub segment_ids: Vec<u32>,
    /// Ascending positions into `tokens`.
    pub masked_positions: Vec<usize>,
    /// Original piece at masked positions, `None` (no loss) elsewhere. Padded.
    pub targets: Vec<Option<String>>,
}

impl MlmInstance {
    /// Unpadded length.
    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Puts the targets back at the masked positions and drops the framing.
    pub fn restore(&self) -> Vec<String> {
        let mut pieces = self.masked_tokens.clone();
        for &pos in &self.masked_positions {
            if let Some(Some(original)) = self.targets.get(pos) {
                pieces[pos] = original.clone();
            }
        }
        let content = &pieces[1..pieces.len() - 1];
        join_pieces(content)
    }

    /// Content pieces that can serve as MLM targets.
    pub fn content_tokens(&self) -> &[String] {
        &self.tokens[1..self.tokens.len() - 1]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SrlInstance {
    /// Framed pieces, unpadded.
    pub tokens: Vec<String>,
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    /// 1 on every piece of the predicate word. Padded.
    pub predicate_indicator: Vec<u32>,
    /// One tag per framed piece, unpadded.
    pub tags: Vec<String>,
    /// Position of the first piece of each source word (framed coordinates).
    pub word_starts: Vec<usize>,
    pub words: Vec<String>,
    pub word_labels: Vec<String>,
    pub predicate_index: usize,
}

impl SrlInstance {
    pub fn num_tokens(&self) -> usize {
        self.tokens.len()
    }
}

fn pad(mut ids: Vec<u32>, len: usize, value: u32) -> Vec<u32> {
    ids.resize(len, value);
    ids
}

pub struct MlmConverter<'a> {
    tokenizer: &'a WordPieceTokenizer,
    max_len: usize,
    num_masked: usize,
}

impl<'a> MlmConverter<'a> {
    pub fn new(tokenizer: &'a WordPieceTokenizer, config: &DataConfig) -> Self {
        Self {
            tokenizer,
            max_len: config.max_sentence_length,
            num_masked: config.num_masked,
        }
    }

    /// Masks `num_masked` content pieces chosen uniformly without replacement.
    /// Pieces beyond `max_sentence_length - 2` are truncated.
    pub fn convert<S: AsRef<str>, R: Rng>(&self, utterance: &[S], rng: &mut R) -> Result<MlmInstance> {
        let (mut pieces, _) = self.tokenizer.tokenize_words(utterance)?;
        pieces.truncate(self.max_len - 2);

        let n = pieces.len();
        let amount = self.num_masked.min(n);
        let mut positions: Vec<usize> = index::sample(rng, n, amount)
            .into_iter()
            .map(|p| p + 1)
            .collect();
        positions.sort_unstable();

        Ok(self.frame(pieces, positions))
    }

    /// Masks at caller-chosen word positions instead of random ones. Words that
    /// are literally `[MASK]` are taken as-is without a vocabulary lookup, and
    /// the target for such positions is left empty.
    pub fn convert_probe<S: AsRef<str>>(&self, words: &[S]) -> Result<MlmInstance> {
        let mut pieces = Vec::with_capacity(words.len());
        let mut positions = Vec::new();
        for word in words {
            let word = word.as_ref();
            if word == MASK {
                positions.push(pieces.len() + 1);
                pieces.push((MASK.to_string(), MASK_ID));
            } else {
                pieces.extend(self.tokenizer.tokenize_word(word)?);
            }
        }
        pieces.truncate(self.max_len - 2);
        positions.retain(|&p| p <= pieces.len());

        let mut instance = self.frame(pieces, positions);
        for &pos in &instance.masked_positions {
            instance.targets[pos] = None;
        }
        Ok(instance)
    }

    fn frame(&self, pieces: Vec<(String, u32)>, masked_positions: Vec<usize>) -> MlmInstance {
        let mut tokens = Vec::with_capacity(pieces.len() + 2);
        let mut ids = Vec::with_capacity(self.max_len);
        tokens.push(CLS.to_string());
        ids.push(CLS_ID);
        for (piece, id) in pieces {
            tokens.push(piece);
            ids.push(id);
        }
        tokens.push(SEP.to_string());
        ids.push(SEP_ID);

        let len = tokens.len();
        let mut masked_tokens = tokens.clone();
        let mut targets: Vec<Option<String>> = vec![None; self.max_len];
        for &pos in &masked_positions {
            targets[pos] = Some(tokens[pos].clone());
            masked_tokens[pos] = MASK.to_string();
            ids[pos] = MASK_ID;
        }

        MlmInstance {
            tokens,
            masked_tokens,
            input_ids: pad(ids, self.max_len, PAD_ID),
            attention_mask: pad(vec![1; len], self.max_len, 0),
            segment_ids: vec![0; self.max_len],
            masked_positions,
            targets,
        }
    }

    pub fn convert_all<S: AsRef<str>, R: Rng>(
        &self,
        utterances: &[Vec<S>],
        rng: &mut R,
    ) -> Result<Vec<MlmInstance>> {
        utterances.iter().map(|u| self.convert(u, rng)).collect()
    }
}

/// Expands word-level BIO tags to pieces: a `B-` word keeps `B-` on its
/// first piece and continues with `I-`; other tags are copied.
pub fn wordpiece_tags<S: AsRef<str>>(labels: &[S], word_lengths: &[usize]) -> Vec<String> {
    let mut tags = Vec::new();
    for (label, &len) in labels.iter().zip(word_lengths) {
        let label = label.as_ref();
        match label.strip_prefix("B-") {
            Some(role) => {
                tags.push(label.to_string());
                tags.extend(std::iter::repeat(format!("I-{role}")).take(len.saturating_sub(1)));
            }
            None => tags.extend(std::iter::repeat(label.to_string()).take(len)),
        }
    }
    tags
}

pub struct SrlConverter<'a> {
    tokenizer: &'a WordPieceTokenizer,
    max_len: usize,
}

impl<'a> SrlConverter<'a> {
    pub fn new(tokenizer: &'a WordPieceTokenizer, config: &DataConfig) -> Self {
        Self {
            tokenizer,
            max_len: config.max_sentence_length,
        }
    }

    /// Returns `None` when the framed pieces would not fit `max_sentence_length`.
    pub fn convert(&self, proposition: &Proposition) -> Result<Option<SrlInstance>> {
        let (pieces, starts) = self.tokenizer.tokenize_words(&proposition.words)?;
        if pieces.len() + 2 > self.max_len {
            return Ok(None);
        }

        let n = pieces.len();
        let word_lengths: Vec<usize> = starts
            .iter()
            .enumerate()
            .map(|(i, &s)| starts.get(i + 1).copied().unwrap_or(n) - s)
            .collect();

        let mut tags = Vec::with_capacity(n + 2);
        tags.push(OUTSIDE.to_string());
        tags.extend(wordpiece_tags(&proposition.labels, &word_lengths));
        tags.push(OUTSIDE.to_string());

        let pred_start = starts[proposition.predicate_index] + 1;
        let pred_end = pred_start + word_lengths[proposition.predicate_index];
        let mut indicator = vec![0u32; self.max_len];
        indicator[pred_start..pred_end].fill(1);

        let mut tokens = Vec::with_capacity(n + 2);
        let mut ids = Vec::with_capacity(self.max_len);
        tokens.push(CLS.to_string());
        ids.push(CLS_ID);
        for (piece, id) in pieces {
            tokens.push(piece);
            ids.push(id);
        }
        tokens.push(SEP.to_string());
        ids.push(SEP_ID);
        let len = tokens.len();

        Ok(Some(SrlInstance {
            tokens,
            input_ids: pad(ids, self.max_len, PAD_ID),
            attention_mask: pad(vec![1; len], self.max_len, 0),
            predicate_indicator: indicator,
            tags,
            word_starts: starts.iter().map(|s| s + 1).collect(),
            words: proposition.words.clone(),
            word_labels: proposition.labels.clone(),
            predicate_index: proposition.predicate_index,
        }))
    }

    /// Converts every proposition, skipping (and reporting) those that do not fit.
    pub fn convert_all(&self, propositions: &[Proposition]) -> Result<Vec<SrlInstance>> {
        let mut instances = Vec::with_capacity(propositions.len());
        let mut skipped = 0;
        for proposition in propositions {
            match self.convert(proposition)? {
                Some(instance) => instances.push(instance),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(
                "Skipped {} propositions whose word-pieces exceed {}.",
                skipped, self.max_len
            );
        }
        Ok(instances)
    }
}
