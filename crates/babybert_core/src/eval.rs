//! Evaluation - Perplexity, SRL F1 and masked-sentence predictions
//!
//! - evaluate_on_perplexity: corpus-level exp(mean masked-token NLL)
//! - evaluate_on_f1: word-level tags -> CoNLL files -> external scorer
//! - predict_masked_sentences: readable dumps of MLM predictions

pub mod conll;
pub mod scorer;

pub use conll::{bio_to_conll, write_conll};
pub use scorer::{F1Summary, PerlScorer, SrlScorer};

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::batch::{MlmBatch, SrlBatch};
use crate::convert::OUTSIDE;
use crate::error::{Error, Result};
use crate::labels::LabelVocab;
use crate::model::MultiTaskModel;
use crate::vocab::MASK;

pub const GOLD_FILE: &str = "gold_conll.txt";
pub const PREDICTED_FILE: &str = "pred_conll.txt";

pub fn evaluate_on_perplexity<M: MultiTaskModel + ?Sized>(model: &M, batches: &[MlmBatch]) -> Result<f64> {
    let mut total_nll = 0.0;
    let mut total_count = 0;
    for batch in batches {
        let (nll, count) = model.mlm_nll(batch)?;
        total_nll += nll;
        total_count += count;
    }
    if total_count == 0 {
        return Err(Error::EmptyEvaluation("no masked tokens"));
    }
    let pp = (total_nll / total_count as f64).exp();
    debug!("perplexity {:.4} over {} masked tokens", pp, total_count);
    Ok(pp)
}

/// Word-level tags from piece-level predictions: each word takes the tag
/// predicted for its first piece.
pub fn word_tags(predicted: &[u32], word_starts: &[usize], tag_vocab: &LabelVocab) -> Vec<String> {
    word_starts
        .iter()
        .map(|&pos| {
            predicted
                .get(pos)
                .and_then(|&id| tag_vocab.label(id))
                .unwrap_or(OUTSIDE)
                .to_string()
        })
        .collect()
}

/// Writes gold and predicted CoNLL files into `workdir` and scores them.
pub fn evaluate_on_f1<M, S>(
    model: &M,
    scorer: &S,
    batches: &[SrlBatch],
    tag_vocab: &LabelVocab,
    workdir: &Path,
) -> Result<F1Summary>
where
    M: MultiTaskModel + ?Sized,
    S: SrlScorer + ?Sized,
{
    let gold_path = workdir.join(GOLD_FILE);
    let pred_path = workdir.join(PREDICTED_FILE);
    let mut gold = BufWriter::new(File::create(&gold_path)?);
    let mut pred = BufWriter::new(File::create(&pred_path)?);

    let mut num_examples = 0;
    for batch in batches {
        let rows = model.predict_srl(batch)?;
        for (row, example) in rows.iter().zip(&batch.examples) {
            let tags = word_tags(row, &example.word_starts, tag_vocab);
            write_conll(&mut gold, &example.words, example.predicate_index, &example.gold_labels)?;
            write_conll(&mut pred, &example.words, example.predicate_index, &tags)?;
            num_examples += 1;
        }
    }
    if num_examples == 0 {
        return Err(Error::EmptyEvaluation("no SRL examples"));
    }
    gold.flush()?;
    pred.flush()?;
    drop(gold);
    drop(pred);

    scorer.score(&gold_path, &pred_path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedPrediction {
    pub masked: String,
    pub predicted: String,
    pub gold: String,
}

impl MaskedPrediction {
    pub fn to_line(&self) -> String {
        format!("{} | {} | {}", self.masked, self.predicted, self.gold)
    }
}

/// Fills every `[MASK]` with the model's guess. Gold keeps `[MASK]` where no
/// target is known (probing sentences).
pub fn predict_masked_sentences<M: MultiTaskModel + ?Sized>(
    model: &M,
    batches: &[MlmBatch],
    output_vocab: &LabelVocab,
    limit: usize,
) -> Result<Vec<MaskedPrediction>> {
    let mut res = Vec::new();
    for batch in batches {
        if res.len() >= limit {
            break;
        }
        let rows = model.predict_mlm(batch)?;
        for (i, row) in rows.iter().enumerate().take(limit - res.len()) {
            let masked = &batch.masked_tokens[i];
            let mut predicted = masked.clone();
            let mut gold = masked.clone();
            for (pos, piece) in masked.iter().enumerate() {
                if piece != MASK {
                    continue;
                }
                if let Some(label) = row.get(pos).and_then(|&id| output_vocab.label(id)) {
                    predicted[pos] = label.to_string();
                }
                if batch.loss_mask[i].get(pos).is_some_and(|&m| m > 0.0) {
                    if let Some(label) = output_vocab.label(batch.target_ids[i][pos]) {
                        gold[pos] = label.to_string();
                    }
                }
            }
            let content = |pieces: &[String]| -> String {
                let end = pieces.len().saturating_sub(1).max(1);
                pieces.get(1..end).unwrap_or(&[]).join(" ")
            };
            res.push(MaskedPrediction {
                masked: content(masked),
                predicted: content(&predicted),
                gold: content(&gold),
            });
        }
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::SrlExample;

    /// Always predicts id `guess`, with fixed NLL per target.
    struct Constant {
        guess: u32,
        nll: f64,
    }

    impl MultiTaskModel for Constant {
        fn train_mlm(&mut self, _: &MlmBatch) -> Result<f32> {
            Ok(0.0)
        }
        fn train_srl(&mut self, _: &SrlBatch) -> Result<f32> {
            Ok(0.0)
        }
        fn mlm_nll(&self, batch: &MlmBatch) -> Result<(f64, usize)> {
            let n = batch.num_targets();
            Ok((self.nll * n as f64, n))
        }
        fn predict_mlm(&self, batch: &MlmBatch) -> Result<Vec<Vec<u32>>> {
            Ok(vec![vec![self.guess; batch.seq_len()]; batch.len()])
        }
        fn predict_srl(&self, batch: &SrlBatch) -> Result<Vec<Vec<u32>>> {
            Ok(vec![vec![self.guess; batch.seq_len()]; batch.len()])
        }
    }

    fn mlm_batch() -> MlmBatch {
        MlmBatch {
            input_ids: vec![vec![2, 5, 4, 3]],
            attention_mask: vec![vec![1; 4]],
            segment_ids: vec![vec![0; 4]],
            target_ids: vec![vec![0, 0, 3, 0]],
            loss_mask: vec![vec![0.0, 0.0, 1.0, 0.0]],
            masked_tokens: vec![vec!["[CLS]".into(), "the".into(), "[MASK]".into(), "[SEP]".into()]],
        }
    }

    struct Fixed(f64);

    impl SrlScorer for Fixed {
        fn score(&self, gold: &Path, predicted: &Path) -> Result<F1Summary> {
            assert!(gold.exists() && predicted.exists());
            Ok(F1Summary {
                precision: self.0,
                recall: self.0,
                f1: self.0,
            })
        }
    }

    #[test]
    fn test_perplexity_is_exp_of_mean_nll() -> Result<()> {
        let model = Constant {
            guess: 0,
            nll: 2.0_f64.ln(),
        };
        let pp = evaluate_on_perplexity(&model, &[mlm_batch(), mlm_batch()])?;
        assert!((pp - 2.0).abs() < 1e-9);
        assert!(matches!(
            evaluate_on_perplexity(&model, &[]),
            Err(Error::EmptyEvaluation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_masked_predictions() -> Result<()> {
        let vocab = LabelVocab::padded(["dog", "cat"]);
        let model = Constant {
            guess: vocab.id("cat").unwrap(),
            nll: 0.0,
        };
        let lines = predict_masked_sentences(&model, &[mlm_batch()], &vocab, 10)?;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].masked, "the [MASK]");
        assert_eq!(lines[0].predicted, "the cat");
        assert_eq!(lines[0].gold, format!("the {}", vocab.label(3).unwrap()));
        assert_eq!(predict_masked_sentences(&model, &[mlm_batch()], &vocab, 0)?.len(), 0);
        Ok(())
    }

    #[test]
    fn test_f1_writes_conll_and_scores() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tags = LabelVocab::non_padded(["O", "O", "B-V"]);
        let batch = SrlBatch {
            input_ids: vec![vec![2, 6, 7, 3]],
            attention_mask: vec![vec![1; 4]],
            predicate_indicator: vec![vec![0, 1, 0, 0]],
            tag_ids: vec![vec![0, 1, 0, 0]],
            examples: vec![SrlExample {
                words: vec!["go".into(), "home".into()],
                predicate_index: 0,
                gold_labels: vec!["B-V".into(), "B-ARG1".into()],
                word_starts: vec![1, 2],
            }],
        };
        let model = Constant { guess: 1, nll: 0.0 };
        let summary = evaluate_on_f1(&model, &Fixed(0.5), &[batch], &tags, dir.path())?;
        assert_eq!(summary.f1, 0.5);

        let gold = std::fs::read_to_string(dir.path().join(GOLD_FILE))?;
        assert!(gold.starts_with(&format!("{:<15}{:>15}\n", "go", "(V*)")));
        let pred = std::fs::read_to_string(dir.path().join(PREDICTED_FILE))?;
        assert!(pred.contains("(V*)"));

        assert!(evaluate_on_f1(&model, &Fixed(0.5), &[], &tags, dir.path()).is_err());
        Ok(())
    }
}
