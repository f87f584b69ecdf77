//! Evaluate - Metrics at evaluation steps and the stand-alone `evaluate` command

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use babybert_core::eval::{
    evaluate_on_f1, evaluate_on_perplexity, predict_masked_sentences, PerlScorer, SrlScorer,
};
use babybert_core::schedule::{EvalReport, Evaluator, MetricName};
use babybert_core::{Error, MlmBatch, MultiTaskBert, MultiTaskModel, SrlBatch};
use babybert_core::Result as CoreResult;
use candle_core::Device;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::{JobParams, ProjectPaths};
use crate::pipeline::JobData;
use crate::probing::ProbingTask;
use crate::train::checkpoint::{load_checkpoint, MODEL_FILE, PARAMS_FILE};

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    /// Directory written by `train` (holds params.json and model.safetensors)
    #[arg(long, required = true)]
    pub save_dir: PathBuf,

    #[arg(long, default_value = ".")]
    pub project_dir: PathBuf,

    /// Also score the train split
    #[arg(long, action)]
    pub train: bool,
}

/// Everything evaluated at an evaluation step, owned for the whole run.
pub struct JobEvaluator<'a, S: SrlScorer = PerlScorer> {
    pub data: &'a JobData,
    pub scorer: S,
    pub save_dir: PathBuf,
    pub evaluate_train: bool,
    pub num_prediction_samples: usize,
    pub probing: Vec<ProbingTask>,
}

impl<'a, S: SrlScorer> JobEvaluator<'a, S> {
    fn conll_dir(&self) -> PathBuf {
        self.save_dir.join("conll")
    }

    fn perplexity<M: MultiTaskModel + ?Sized>(
        &self,
        model: &M,
        batches: &[MlmBatch],
        split: &str,
    ) -> CoreResult<Option<f64>> {
        match evaluate_on_perplexity(model, batches) {
            Ok(pp) => Ok(Some(pp)),
            Err(Error::EmptyEvaluation(what)) => {
                warn!("No {} perplexity: {}", split, what);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Scorer failures leave the metric undefined; other errors abort the run.
    fn f1<M: MultiTaskModel + ?Sized>(
        &self,
        model: &M,
        batches: &[SrlBatch],
        split: &str,
    ) -> CoreResult<Option<f64>> {
        let workdir = self.conll_dir().join(split);
        fs::create_dir_all(&workdir)?;
        match evaluate_on_f1(model, &self.scorer, batches, &self.data.tag_vocab, &workdir) {
            Ok(summary) => Ok(Some(summary.f1)),
            Err(e @ (Error::Scorer(_) | Error::ScorerTimeout(_) | Error::EmptyEvaluation(_))) => {
                warn!("⚠️ {} F1 undefined: {}", split, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn write_predictions<M: MultiTaskModel + ?Sized>(&self, model: &M, step: usize) -> CoreResult<()> {
        if self.num_prediction_samples == 0 {
            return Ok(());
        }
        let predictions = predict_masked_sentences(
            model,
            &self.data.mlm_test,
            &self.data.output_vocab,
            self.num_prediction_samples,
        )?;
        let dir = self.save_dir.join("predictions");
        fs::create_dir_all(&dir)?;
        let mut out = BufWriter::new(File::create(dir.join(format!("mlm_step_{step}.txt")))?);
        for prediction in &predictions {
            writeln!(out, "{}", prediction.to_line())?;
        }
        out.flush()?;
        Ok(())
    }

    /// Devel (and optionally train) metrics, prediction samples and probing.
    pub fn run_round<M: MultiTaskModel + ?Sized>(&self, model: &M, step: usize) -> CoreResult<EvalReport> {
        let mut report = EvalReport::new();

        let devel_pp = self.perplexity(model, &self.data.mlm_devel, "devel")?;
        report.push(MetricName::DevelPp, devel_pp);
        let devel_f1 = self.f1(model, &self.data.srl_devel, "devel")?;
        report.push(MetricName::DevelF1, devel_f1);

        if self.evaluate_train {
            let train_pp = self.perplexity(model, &self.data.mlm_train, "train")?;
            report.push(MetricName::TrainPp, train_pp);
            let train_f1 = self.f1(model, &self.data.srl_train, "train")?;
            report.push(MetricName::TrainF1, train_f1);
        }

        info!(
            "step {:<6}: devel-pp={} devel-f1={}",
            step,
            fmt_metric(devel_pp),
            fmt_metric(devel_f1)
        );

        self.write_predictions(model, step)?;
        let probing_dir = self.save_dir.join("probing");
        for task in &self.probing {
            let path = task.run(model, &self.data.output_vocab, &probing_dir, step)?;
            info!("Probing '{}' -> {:?}", task.name, path);
        }
        Ok(report)
    }
}

fn fmt_metric(value: Option<f64>) -> String {
    value.map_or_else(|| "undefined".to_string(), |v| format!("{v:.4}"))
}

impl<'a, M, S> Evaluator<M> for JobEvaluator<'a, S>
where
    M: MultiTaskModel,
    S: SrlScorer,
{
    fn evaluate(&mut self, model: &M, step: usize) -> CoreResult<EvalReport> {
        self.run_round(model, step)
    }
}

pub fn scorer(params: &JobParams, paths: &ProjectPaths) -> PerlScorer {
    PerlScorer::new(paths.srl_eval_script()).with_timeout(Duration::from_secs(params.scorer_timeout_secs))
}

fn progress_bar(len: usize, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_message(label.to_string());
    pb
}

fn perplexity_with_progress(model: &MultiTaskBert, batches: &[MlmBatch]) -> Result<f64> {
    let pb = progress_bar(batches.len(), "perplexity");
    let mut total_nll = 0.0;
    let mut total_count = 0;
    for batch in batches {
        let (nll, count) = model.mlm_nll(batch)?;
        total_nll += nll;
        total_count += count;
        pb.inc(1);
    }
    pb.finish_and_clear();
    if total_count == 0 {
        anyhow::bail!("no masked tokens to evaluate");
    }
    Ok((total_nll / total_count as f64).exp())
}

fn evaluate_split(
    model: &MultiTaskBert,
    data: &JobData,
    scorer: &PerlScorer,
    mlm: &[MlmBatch],
    srl: &[SrlBatch],
    split: &str,
    workdir: &Path,
) -> Result<()> {
    let pp = perplexity_with_progress(model, mlm)?;
    info!("{}-pp={:.4}", split, pp);

    let dir = workdir.join(split);
    fs::create_dir_all(&dir)?;
    match evaluate_on_f1(model, scorer, srl, &data.tag_vocab, &dir) {
        Ok(summary) => info!(
            "{}-f1={:.4} (precision {:.4}, recall {:.4})",
            split, summary.f1, summary.precision, summary.recall
        ),
        Err(e) => warn!("⚠️ {}-f1 undefined: {}", split, e),
    }
    Ok(())
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    info!("--- BabyBERT Evaluation ---");
    info!("Save dir: {:?}", args.save_dir);

    let params = JobParams::load(args.save_dir.join(PARAMS_FILE))?;
    let paths = ProjectPaths::new(&args.project_dir);
    let data = JobData::prepare(&params, &paths)?;

    let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
    info!("Device initialized: {:?}", device);
    let bert = params.bert_config(
        data.tokenizer.vocab_size(),
        data.output_vocab.len(),
        data.tag_vocab.len(),
    );
    let mut model = MultiTaskBert::new(bert, params.lr, &device)?;
    let model_path = args.save_dir.join(MODEL_FILE);
    model
        .load(&model_path)
        .with_context(|| format!("Failed to load weights from {:?}", model_path))?;

    if let Some(checkpoint) = load_checkpoint(&args.save_dir)? {
        info!("Checkpoint from {} at step {}", checkpoint.date, checkpoint.state.step);
    }

    let scorer = scorer(&params, &paths);
    let workdir = args.save_dir.join("conll");
    evaluate_split(&model, &data, &scorer, &data.mlm_devel, &data.srl_devel, "devel", &workdir)?;
    if args.train {
        evaluate_split(&model, &data, &scorer, &data.mlm_train, &data.srl_train, "train", &workdir)?;
    }
    Ok(())
}
