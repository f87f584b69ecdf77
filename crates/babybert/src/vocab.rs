//! Vocab - Build the input word-piece vocabulary of a corpus

use std::path::PathBuf;

use anyhow::{Context, Result};
use babybert_core::vocab::build_vocab;
use clap::Args;
use tracing::info;

use crate::config::ProjectPaths;

#[derive(Args, Debug, Clone)]
pub struct VocabArgs {
    #[arg(long, default_value = ".")]
    pub project_dir: PathBuf,

    #[arg(long, default_value = "childes-20191206")]
    pub corpus_name: String,

    /// Number of corpus words to keep (reserved tokens not included)
    #[arg(long, default_value_t = 4000)]
    pub vocab_size: usize,

    /// `rank token` frequency file (default: data/CHILDES/{corpus}_vocab.txt)
    #[arg(long)]
    pub corpus_vocab: Option<PathBuf>,

    /// Reference word-piece vocabulary, one token per line
    #[arg(long)]
    pub reference: Option<PathBuf>,

    /// Output file (default: data/{corpus}_vocab_{size}.txt)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: VocabArgs) -> Result<()> {
    let paths = ProjectPaths::new(&args.project_dir);
    let corpus_vocab = args
        .corpus_vocab
        .clone()
        .unwrap_or_else(|| paths.corpus_vocab(&args.corpus_name));
    let reference = args.reference.clone().unwrap_or_else(|| paths.reference_vocab());
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| paths.vocab_file(&args.corpus_name, args.vocab_size));

    info!("--- Vocabulary Builder ---");
    info!("Corpus vocab: {:?}", corpus_vocab);
    info!("Reference:    {:?}", reference);

    let vocab = build_vocab(&corpus_vocab, &reference, args.vocab_size)
        .with_context(|| format!("Failed to build vocabulary from {:?}", corpus_vocab))?;
    vocab.save(&output)?;
    info!("✅ Saved {} tokens to {:?}", vocab.len(), output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use babybert_core::Vocabulary;
    use std::fs;

    #[test]
    fn test_writes_merged_vocab() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("data/CHILDES"))?;
        fs::write(dir.path().join("data/CHILDES/toy_vocab.txt"), "1 the\n2 dog\n3 zebra\n")?;
        fs::write(
            dir.path().join("data/bert-base-cased-vocab.txt"),
            "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\ncat\ndog\nthe\n",
        )?;

        run(VocabArgs {
            project_dir: dir.path().to_path_buf(),
            corpus_name: "toy".into(),
            vocab_size: 3,
            corpus_vocab: None,
            reference: None,
            output: None,
        })?;

        let vocab = Vocabulary::load(dir.path().join("data/toy_vocab_3.txt"))?;
        let tokens: Vec<&str> = vocab.tokens().collect();
        assert_eq!(tokens, ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "dog", "the"]);
        Ok(())
    }

    #[test]
    fn test_bad_reserved_order_is_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let corpus = dir.path().join("corpus.txt");
        let reference = dir.path().join("reference.txt");
        fs::write(&corpus, "1 the\n")?;
        fs::write(&reference, "the\n[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\n")?;

        let result = run(VocabArgs {
            project_dir: dir.path().to_path_buf(),
            corpus_name: "toy".into(),
            vocab_size: 10,
            corpus_vocab: Some(corpus),
            reference: Some(reference),
            output: None,
        });
        assert!(result.is_err());
        assert!(!dir.path().join("data/toy_vocab_10.txt").exists());
        Ok(())
    }
}
