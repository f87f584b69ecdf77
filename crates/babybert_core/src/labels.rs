//! Output label vocabularies (MLM targets, SRL tags)
//!
//! These index the softmax outputs, not the input embedding. The MLM
//! namespace is padded (padding and unknown entries first); the SRL tag
//! namespace holds labels only.

use std::collections::HashMap;

use tracing::info;

pub const PADDING: &str = "@@PADDING@@";
pub const UNKNOWN: &str = "@@UNKNOWN@@";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocab {
    labels: Vec<String>,
    index: HashMap<String, u32>,
    unknown: Option<u32>,
}

impl LabelVocab {
    /// Padding at 0, unknown at 1, then labels by descending count.
    pub fn padded<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = Self::from_ranked(vec![PADDING.to_string(), UNKNOWN.to_string()], labels);
        vocab.unknown = Some(1);
        vocab
    }

    /// Labels by descending count, no reserved entries.
    pub fn non_padded<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_ranked(Vec::new(), labels)
    }

    fn from_ranked<I, S>(reserved: Vec<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for label in labels {
            *counts.entry(label.as_ref().to_string()).or_default() += 1;
        }
        let mut ranked: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(label, _)| !reserved.contains(label))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let labels: Vec<String> = reserved
            .into_iter()
            .chain(ranked.into_iter().map(|(label, _)| label))
            .collect();
        let index = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i as u32))
            .collect();
        Self {
            labels,
            index,
            unknown: None,
        }
    }

    /// Falls back to the unknown entry in padded namespaces.
    pub fn id(&self, label: &str) -> Option<u32> {
        self.index.get(label).copied().or(self.unknown)
    }

    pub fn label(&self, id: u32) -> Option<&str> {
        self.labels.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn print_statistics(&self, namespace: &str) {
        info!("Vocabulary '{}': {} entries", namespace, self.len());
        let head: Vec<&str> = self.labels.iter().take(10).map(String::as_str).collect();
        info!("  first entries: {:?}", head);
    }
}
