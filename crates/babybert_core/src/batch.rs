//! Batching - Bucketed mini-batches and batch sources
//!
//! Instances are sorted by unpadded length, chunked into mini-batches and
//! trimmed to the longest member. A [`BatchStream`] hands the batches out
//! either for a fixed number of passes or forever, and reports the end of a
//! finite stream as [`Draw::Exhausted`] instead of an error.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::convert::{MlmInstance, SrlInstance};
use crate::labels::LabelVocab;

/// Result of asking a source for its next batch.
#[derive(Debug, PartialEq)]
pub enum Draw<B> {
    Batch(B),
    Exhausted,
}

impl<B> Draw<B> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Draw::Exhausted)
    }
}

pub trait BatchSource {
    type Batch;

    fn next_batch(&mut self) -> Draw<&Self::Batch>;
}

/// Anything that can be bucketed by length.
pub trait Bucketed {
    fn num_tokens(&self) -> usize;
}

impl Bucketed for MlmInstance {
    fn num_tokens(&self) -> usize {
        MlmInstance::num_tokens(self)
    }
}

impl Bucketed for SrlInstance {
    fn num_tokens(&self) -> usize {
        SrlInstance::num_tokens(self)
    }
}

/// Groups instance indices into length-sorted mini-batches.
pub fn bucket<I: Bucketed>(instances: &[I], batch_size: usize) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..instances.len()).collect();
    order.sort_by_key(|&i| instances[i].num_tokens());
    order
        .chunks(batch_size.max(1))
        .map(<[usize]>::to_vec)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct MlmBatch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    pub segment_ids: Vec<Vec<u32>>,
    /// Output-vocabulary ids; 0 where no loss applies.
    pub target_ids: Vec<Vec<u32>>,
    /// 1.0 at masked positions, 0.0 elsewhere.
    pub loss_mask: Vec<Vec<f32>>,
    /// Masked sentences as text, for prediction dumps.
    pub masked_tokens: Vec<Vec<String>>,
}

impl MlmBatch {
    pub fn from_instances(instances: &[&MlmInstance], output_vocab: &LabelVocab) -> Self {
        let seq_len = instances.iter().map(|i| i.num_tokens()).max().unwrap_or(0);
        let mut batch = Self {
            input_ids: Vec::with_capacity(instances.len()),
            attention_mask: Vec::with_capacity(instances.len()),
            segment_ids: Vec::with_capacity(instances.len()),
            target_ids: Vec::with_capacity(instances.len()),
            loss_mask: Vec::with_capacity(instances.len()),
            masked_tokens: Vec::with_capacity(instances.len()),
        };
        for instance in instances {
            batch.input_ids.push(instance.input_ids[..seq_len].to_vec());
            batch.attention_mask.push(instance.attention_mask[..seq_len].to_vec());
            batch.segment_ids.push(instance.segment_ids[..seq_len].to_vec());
            let (targets, mask) = instance.targets[..seq_len]
                .iter()
                .map(|t| match t {
                    Some(piece) => (output_vocab.id(piece).unwrap_or(0), 1.0),
                    None => (0, 0.0),
                })
                .unzip();
            batch.target_ids.push(targets);
            batch.loss_mask.push(mask);
            batch.masked_tokens.push(instance.masked_tokens.clone());
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.first().map_or(0, Vec::len)
    }

    /// Number of supervised positions.
    pub fn num_targets(&self) -> usize {
        self.loss_mask
            .iter()
            .flatten()
            .filter(|&&m| m > 0.0)
            .count()
    }
}

/// Word-level view of one SRL example, kept for scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct SrlExample {
    pub words: Vec<String>,
    pub predicate_index: usize,
    pub gold_labels: Vec<String>,
    pub word_starts: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SrlBatch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    pub predicate_indicator: Vec<Vec<u32>>,
    pub tag_ids: Vec<Vec<u32>>,
    pub examples: Vec<SrlExample>,
}

impl SrlBatch {
    /// Tags missing from `tag_vocab` map to id 0.
    pub fn from_instances(instances: &[&SrlInstance], tag_vocab: &LabelVocab) -> Self {
        let seq_len = instances.iter().map(|i| i.num_tokens()).max().unwrap_or(0);
        let mut batch = Self {
            input_ids: Vec::with_capacity(instances.len()),
            attention_mask: Vec::with_capacity(instances.len()),
            predicate_indicator: Vec::with_capacity(instances.len()),
            tag_ids: Vec::with_capacity(instances.len()),
            examples: Vec::with_capacity(instances.len()),
        };
        for instance in instances {
            batch.input_ids.push(instance.input_ids[..seq_len].to_vec());
            batch.attention_mask.push(instance.attention_mask[..seq_len].to_vec());
            batch
                .predicate_indicator
                .push(instance.predicate_indicator[..seq_len].to_vec());
            let mut tags: Vec<u32> = instance
                .tags
                .iter()
                .map(|t| tag_vocab.id(t).unwrap_or(0))
                .collect();
            tags.resize(seq_len, 0);
            batch.tag_ids.push(tags);
            batch.examples.push(SrlExample {
                words: instance.words.clone(),
                predicate_index: instance.predicate_index,
                gold_labels: instance.word_labels.clone(),
                word_starts: instance.word_starts.clone(),
            });
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.first().map_or(0, Vec::len)
    }
}

pub fn mlm_batches(instances: &[MlmInstance], batch_size: usize, vocab: &LabelVocab) -> Vec<MlmBatch> {
    bucket(instances, batch_size)
        .into_iter()
        .map(|group| {
            let members: Vec<&MlmInstance> = group.iter().map(|&i| &instances[i]).collect();
            MlmBatch::from_instances(&members, vocab)
        })
        .collect()
}

pub fn srl_batches(instances: &[SrlInstance], batch_size: usize, vocab: &LabelVocab) -> Vec<SrlBatch> {
    bucket(instances, batch_size)
        .into_iter()
        .map(|group| {
            let members: Vec<&SrlInstance> = group.iter().map(|&i| &instances[i]).collect();
            SrlBatch::from_instances(&members, vocab)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// Stop after this many passes over the batches.
    Epochs(usize),
    /// Wrap around forever.
    Forever,
}

/// Hands out prebuilt batches in shuffled order, one pass at a time.
pub struct BatchStream<B> {
    batches: Vec<B>,
    order: Vec<usize>,
    cursor: usize,
    passes_done: usize,
    repeat: Repeat,
    rng: StdRng,
}

impl<B> BatchStream<B> {
    pub fn new(batches: Vec<B>, repeat: Repeat, seed: u64) -> Self {
        let mut stream = Self {
            order: (0..batches.len()).collect(),
            batches,
            cursor: 0,
            passes_done: 0,
            repeat,
            rng: StdRng::seed_from_u64(seed),
        };
        stream.order.shuffle(&mut stream.rng);
        stream
    }

    pub fn finite(batches: Vec<B>, epochs: usize, seed: u64) -> Self {
        Self::new(batches, Repeat::Epochs(epochs), seed)
    }

    pub fn cyclic(batches: Vec<B>, seed: u64) -> Self {
        Self::new(batches, Repeat::Forever, seed)
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn batches(&self) -> &[B] {
        &self.batches
    }

    /// Discards `n` draws, e.g. when resuming.
    pub fn fast_forward(&mut self, n: usize) {
        for _ in 0..n {
            if self.advance().is_none() {
                break;
            }
        }
    }

    fn advance(&mut self) -> Option<usize> {
        if self.batches.is_empty() {
            return None;
        }
        if self.cursor == self.order.len() {
            self.passes_done += 1;
            if let Repeat::Epochs(epochs) = self.repeat {
                if self.passes_done >= epochs {
                    return None;
                }
            }
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
        }
        if let Repeat::Epochs(0) = self.repeat {
            return None;
        }
        let index = self.order[self.cursor];
        self.cursor += 1;
        Some(index)
    }
}

impl<B> BatchSource for BatchStream<B> {
    type Batch = B;

    fn next_batch(&mut self) -> Draw<&B> {
        match self.advance() {
            Some(index) => Draw::Batch(&self.batches[index]),
            None => Draw::Exhausted,
        }
    }
}
