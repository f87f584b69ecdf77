use std::fs;
use std::ops::ControlFlow;
use std::path::Path;

use babybert_core::batch::{mlm_batches, srl_batches};
use babybert_core::eval::{evaluate_on_f1, evaluate_on_perplexity, F1Summary, SrlScorer};
use babybert_core::schedule::{EvalReport, MetricName};
use babybert_core::vocab::{build_vocab, CLS_ID, MASK_ID, PAD_ID, SEP_ID, UNK_ID};
use babybert_core::{
    load_propositions, load_utterances, split, BatchStream, BertConfig, DataConfig, LabelVocab,
    MlmConverter, MultiTaskBert, Result, ScheduleConfig, Scheduler, SrlConverter, SrlPolicy,
    StopReason, WordPieceTokenizer,
};
use candle_core::Device;
use rand::rngs::StdRng;
use rand::SeedableRng;

const TRANSCRIPTS: &str = "\
the dog runs . the cat sleeps .
where is the doggy ? there it is !
you want the ball ? look at the ball .
put the cup on the table . good job !
";

const PROPOSITIONS: &str = "\
2 the dog runs . ||| B-ARG0 I-ARG0 B-V O
1 you want the ball ? ||| B-ARG0 B-V B-ARG1 I-ARG1 O
0 put the cup on the table . ||| B-V B-ARG1 I-ARG1 B-ARG2 I-ARG2 I-ARG2 O
1 the cat sleeps . ||| B-ARG0 I-ARG0 B-V O
";

struct Perfect;

impl SrlScorer for Perfect {
    fn score(&self, gold: &Path, predicted: &Path) -> Result<F1Summary> {
        let gold = fs::read_to_string(gold)?;
        let predicted = fs::read_to_string(predicted)?;
        let f1 = if gold == predicted { 1.0 } else { 0.0 };
        Ok(F1Summary {
            precision: f1,
            recall: f1,
            f1,
        })
    }
}

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_end_to_end_pipeline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let corpus_vocab = write(
        dir.path(),
        "childes_vocab.txt",
        "1 the\n2 .\n3 dog\n4 is\n5 ball\n6 cat\n7 you\n",
    );
    let reference = write(
        dir.path(),
        "reference.txt",
        "[PAD]\n[UNK]\n[CLS]\n[SEP]\n[MASK]\n.\n?\n!\nthe\ndog\n##gy\ncat\nball\nis\nyou\nwant\nzebra\n",
    );

    let vocab = build_vocab(&corpus_vocab, &reference, 7)?;
    assert_eq!(vocab.get("[PAD]"), Some(PAD_ID));
    assert_eq!(vocab.get("[UNK]"), Some(UNK_ID));
    assert_eq!(vocab.get("[CLS]"), Some(CLS_ID));
    assert_eq!(vocab.get("[SEP]"), Some(SEP_ID));
    assert_eq!(vocab.get("[MASK]"), Some(MASK_ID));
    assert!(!vocab.contains("zebra"));

    let vocab_path = dir.path().join("vocab.txt");
    vocab.save(&vocab_path)?;
    let tokenizer = WordPieceTokenizer::from_vocab_file(&vocab_path)?;

    let config = DataConfig {
        min_input_length: 2,
        max_input_length: 10,
        max_sentence_length: 16,
        ..Default::default()
    };
    let utterances = load_utterances(write(dir.path(), "mlm.txt", TRANSCRIPTS), &config)?;
    assert!(utterances
        .iter()
        .all(|u| u.len() >= config.min_input_length && u.len() <= config.max_input_length));
    let propositions = load_propositions(write(dir.path(), "srl.txt", PROPOSITIONS), &config)?;
    assert_eq!(propositions.len(), 4);

    let parts = split(utterances.clone(), 1.0, config.seed);
    assert_eq!(parts.train.len(), utterances.len());

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mlm_instances = MlmConverter::new(&tokenizer, &config).convert_all(&parts.train, &mut rng)?;
    let srl_instances = SrlConverter::new(&tokenizer, &config).convert_all(&propositions)?;
    assert_eq!(srl_instances.len(), 4);

    let output_vocab = LabelVocab::padded(
        mlm_instances
            .iter()
            .flat_map(|i| i.content_tokens().iter().cloned()),
    );
    let tag_vocab = LabelVocab::non_padded(srl_instances.iter().flat_map(|i| i.tags.iter().cloned()));

    let mlm_train = mlm_batches(&mlm_instances, 2, &output_vocab);
    let srl_train = srl_batches(&srl_instances, 2, &tag_vocab);
    let mlm_devel = mlm_train.clone();
    let srl_devel = srl_train.clone();

    let bert = BertConfig {
        vocab_size: tokenizer.vocab_size(),
        hidden_size: 16,
        num_layers: 1,
        num_attention_heads: 2,
        intermediate_size: 32,
        max_position_embeddings: config.max_sentence_length,
        embedding_dropout: 0.0,
        mlm_vocab_size: output_vocab.len(),
        srl_vocab_size: tag_vocab.len(),
    };
    let mut model = MultiTaskBert::new(bert, 1e-3, &Device::Cpu)?;

    let workdir = tempfile::tempdir()?;
    let mut evaluator = |model: &MultiTaskBert, _step: usize| -> Result<EvalReport> {
        let pp = evaluate_on_perplexity(model, &mlm_devel)?;
        let f1 = evaluate_on_f1(model, &Perfect, &srl_devel, &tag_vocab, workdir.path())
            .ok()
            .map(|s| s.f1);
        Ok(EvalReport::new()
            .with(MetricName::DevelPp, Some(pp))
            .with(MetricName::DevelF1, f1))
    };

    let schedule = ScheduleConfig {
        max_steps: 1000,
        eval_interval: 2,
        policy: SrlPolicy::DoubleLength,
        seed: 1,
    };
    let mut scheduler = Scheduler::new(schedule)?;
    let reason = scheduler.run(
        &mut model,
        &mut BatchStream::finite(mlm_train, 1, 0),
        &mut BatchStream::finite(srl_train, 1, 0),
        &mut evaluator,
        |_, _, _| Ok(ControlFlow::Continue(())),
    )?;

    assert_eq!(reason, StopReason::SrlExhausted);
    let state = scheduler.state();
    assert!(state.mlm_exhausted);
    assert_eq!(state.srl_steps, 2);
    let pps = state.metrics.series(MetricName::DevelPp);
    assert_eq!(pps.first().map(|p| p.0), Some(0));
    assert!(pps.iter().all(|(_, pp)| pp.is_some_and(|v| v.is_finite() && v > 0.0)));
    Ok(())
}
