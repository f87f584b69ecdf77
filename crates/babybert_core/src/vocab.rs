//! Vocabulary - Input word-piece vocabulary construction
//!
//! The input vocabulary is the intersection of a corpus-specific frequency
//! list and a reference word-piece vocabulary. Indices follow the order of
//! the reference file, and the five reserved tokens must come out at 0..=4.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use crate::error::{malformed, Error, Result};

pub const PAD: &str = "[PAD]";
pub const UNK: &str = "[UNK]";
pub const CLS: &str = "[CLS]";
pub const SEP: &str = "[SEP]";
pub const MASK: &str = "[MASK]";

/// Reserved tokens in index order.
pub const RESERVED: [&str; 5] = [PAD, UNK, CLS, SEP, MASK];

pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;
pub const CLS_ID: u32 = 2;
pub const SEP_ID: u32 = 3;
pub const MASK_ID: u32 = 4;

/// Bidirectional token <-> index mapping. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    id_to_token: Vec<String>,
    token_to_id: HashMap<String, u32>,
}

impl Vocabulary {
    /// Assigns indices in iteration order. Repeated tokens keep their first index.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut id_to_token = Vec::new();
        let mut token_to_id = HashMap::new();
        for token in tokens {
            let token = token.into();
            if token_to_id.contains_key(&token) {
                continue;
            }
            token_to_id.insert(token.clone(), id_to_token.len() as u32);
            id_to_token.push(token);
        }
        Self {
            id_to_token,
            token_to_id,
        }
    }

    pub fn get(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(id as usize).map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.token_to_id.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.id_to_token.iter().map(String::as_str)
    }

    /// Fails unless `[PAD]=0, [UNK]=1, [CLS]=2, [SEP]=3, [MASK]=4`.
    pub fn check_reserved(&self) -> Result<()> {
        for (expected, token) in RESERVED.iter().enumerate() {
            match self.get(token) {
                Some(id) if id as usize == expected => {}
                Some(id) => {
                    return Err(Error::Vocabulary(format!(
                        "reserved token {token} has index {id}, expected {expected}"
                    )))
                }
                None => {
                    return Err(Error::Vocabulary(format!(
                        "reserved token {token} is missing"
                    )))
                }
            }
        }
        Ok(())
    }

    /// One token per line, in index order.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        for token in &self.id_to_token {
            writeln!(writer, "{token}")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut tokens = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let token = line.trim();
            if !token.is_empty() {
                tokens.push(token.to_string());
            }
        }
        Ok(Self::from_tokens(tokens))
    }
}

/// Reads the reserved tokens plus the first `vocab_size` distinct corpus
/// tokens from a `rank token` frequency file.
pub fn load_corpus_vocab<P: AsRef<Path>>(path: P, vocab_size: usize) -> Result<Vocabulary> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut tokens: Vec<String> = RESERVED.iter().map(|t| t.to_string()).collect();
    let mut seen: HashSet<String> = tokens.iter().cloned().collect();

    for (line_no, line) in reader.lines().enumerate() {
        if tokens.len() >= vocab_size + RESERVED.len() {
            break;
        }
        let line = line?;
        let token = line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| malformed(path, line_no + 1, "expected `rank token`"))?;
        if seen.insert(token.to_string()) {
            tokens.push(token.to_string());
        }
    }

    debug!(
        "Corpus vocab {:?}: {} tokens (incl. reserved)",
        path,
        tokens.len()
    );
    Ok(Vocabulary::from_tokens(tokens))
}

/// Merges the corpus keep-set with a reference word-piece vocabulary.
///
/// The reference file is streamed in its original order and only tokens in
/// the keep-set survive, so indices follow the reference order rather than
/// corpus frequency.
pub fn build_vocab<P: AsRef<Path>, Q: AsRef<Path>>(
    corpus_vocab_file: P,
    reference_vocab_file: Q,
    vocab_size: usize,
) -> Result<Vocabulary> {
    let keep = load_corpus_vocab(corpus_vocab_file, vocab_size)?;

    let reader = BufReader::new(File::open(reference_vocab_file.as_ref())?);
    let mut kept = Vec::with_capacity(keep.len());
    for line in reader.lines() {
        let line = line?;
        let token = line.trim();
        if keep.contains(token) {
            kept.push(token.to_string());
        }
    }

    let vocab = Vocabulary::from_tokens(kept);
    vocab.check_reserved()?;

    let missing = keep.len() - vocab.len();
    info!(
        "Built input vocabulary: {} tokens ({} corpus tokens absent from reference)",
        vocab.len(),
        missing
    );
    Ok(vocab)
}
