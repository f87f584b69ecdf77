//! WordPiece - Sub-word segmentation over the input vocabulary
//!
//! Wraps the `tokenizers` WordPiece model. Basic tokenization is disabled:
//! every whitespace word of the corpus is segmented on its own, and casing is
//! kept so that `[MASK]` survives as a single token.

use std::path::Path;

use tokenizers::models::wordpiece::WordPiece;
use tokenizers::Model;

use crate::error::{Error, Result};
use crate::vocab::{UNK, UNK_ID};

const CONTINUATION: &str = "##";
const MAX_CHARS_PER_WORD: usize = 100;

pub struct WordPieceTokenizer {
    model: WordPiece,
}

impl WordPieceTokenizer {
    /// Loads a one-token-per-line vocabulary (see [`crate::Vocabulary::save`]).
    pub fn from_vocab_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().to_string();
        let model = WordPiece::from_file(&path)
            .unk_token(UNK.to_string())
            .continuing_subword_prefix(CONTINUATION.to_string())
            .max_input_chars_per_word(MAX_CHARS_PER_WORD)
            .build()
            .map_err(|e| Error::Tokenizer(format!("Failed to load vocab {path}: {e}")))?;
        Ok(Self { model })
    }

    pub fn vocab_size(&self) -> usize {
        self.model.get_vocab_size()
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.model.token_to_id(token)
    }

    pub fn id_to_token(&self, id: u32) -> Option<String> {
        self.model.id_to_token(id)
    }

    /// Segments a single word into (piece, id) pairs. Unknown words map to `[UNK]`.
    pub fn tokenize_word(&self, word: &str) -> Result<Vec<(String, u32)>> {
        let tokens = self
            .model
            .tokenize(word)
            .map_err(|e| Error::Tokenizer(format!("Failed to segment {word:?}: {e}")))?;
        if tokens.is_empty() {
            return Ok(vec![(UNK.to_string(), UNK_ID)]);
        }
        Ok(tokens.into_iter().map(|t| (t.value, t.id)).collect())
    }

    /// Segments a word sequence. Returns the pieces and, for every word, the
    /// index of its first piece.
    pub fn tokenize_words<S: AsRef<str>>(
        &self,
        words: &[S],
    ) -> Result<(Vec<(String, u32)>, Vec<usize>)> {
        let mut pieces = Vec::with_capacity(words.len());
        let mut word_starts = Vec::with_capacity(words.len());
        for word in words {
            word_starts.push(pieces.len());
            pieces.extend(self.tokenize_word(word.as_ref())?);
        }
        Ok((pieces, word_starts))
    }
}

/// Glues continuation pieces back onto the preceding piece.
pub fn join_pieces<S: AsRef<str>>(pieces: &[S]) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for piece in pieces {
        let piece = piece.as_ref();
        match (piece.strip_prefix(CONTINUATION), words.last_mut()) {
            (Some(rest), Some(last)) => last.push_str(rest),
            _ => words.push(piece.to_string()),
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::{Vocabulary, RESERVED};

    fn tokenizer(extra: &[&str]) -> (tempfile::TempDir, WordPieceTokenizer) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        Vocabulary::from_tokens(RESERVED.iter().chain(extra.iter()).copied())
            .save(&path)
            .unwrap();
        let tokenizer = WordPieceTokenizer::from_vocab_file(&path).unwrap();
        (dir, tokenizer)
    }

    #[test]
    fn test_splits_into_continuation_pieces() -> Result<()> {
        let (_dir, tok) = tokenizer(&["the", "dog", "##s", "play", "##ing"]);
        let (pieces, starts) = tok.tokenize_words(&["the", "dogs", "playing"])?;
        let values: Vec<&str> = pieces.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(values, vec!["the", "dog", "##s", "play", "##ing"]);
        assert_eq!(starts, vec![0, 1, 3]);
        assert_eq!(pieces[2].1, tok.token_to_id("##s").unwrap());
        Ok(())
    }

    #[test]
    fn test_unknown_word_maps_to_unk() -> Result<()> {
        let (_dir, tok) = tokenizer(&["the"]);
        let pieces = tok.tokenize_word("xylophone")?;
        assert_eq!(pieces, vec![(UNK.to_string(), UNK_ID)]);
        Ok(())
    }

    #[test]
    fn test_mask_is_a_single_piece() -> Result<()> {
        let (_dir, tok) = tokenizer(&["the"]);
        let pieces = tok.tokenize_word("[MASK]")?;
        assert_eq!(pieces, vec![("[MASK]".to_string(), 4)]);
        Ok(())
    }

    #[test]
    fn test_join_pieces() {
        let words = join_pieces(&["the", "dog", "##s", "run"]);
        assert_eq!(words, vec!["the", "dogs", "run"]);
    }
}
