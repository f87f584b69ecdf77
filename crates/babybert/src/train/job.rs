//! Training Job - Data, model, scheduler and artifacts of one run

use std::fs;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use babybert_core::schedule::{MetricName, StopReason};
use babybert_core::{BatchStream, MultiTaskBert, Scheduler, SrlBatch, SrlPolicy, TrainingState};
use candle_core::Device;
use tracing::{error, info, warn};

use super::args::TrainArgs;
use super::checkpoint::{load_checkpoint, save_checkpoint, MODEL_FILE, PARAMS_FILE};
use crate::config::{JobParams, ProjectPaths};
use crate::evaluate::{scorer, JobEvaluator};
use crate::pipeline::JobData;
use crate::probing;

pub const METRICS_CSV: &str = "metrics.csv";
pub const METRICS_JSON: &str = "metrics.json";

pub fn run(args: TrainArgs) -> Result<()> {
    info!("--- BabyBERT-SRL Training ---");

    let mut params = match &args.config {
        Some(path) => JobParams::load(path)?,
        None => JobParams::default(),
    };
    args.apply(&mut params);
    info!("{:?}", params);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let ctrl_c_count = Arc::new(AtomicUsize::new(0));
    let c = ctrl_c_count.clone();

    ctrlc::set_handler(move || {
        let count = c.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 {
            info!("\n\n🛑 Ctrl+C detected! Finishing current step and saving...");
            info!("   (Press Ctrl+C again to force quit WITHOUT saving)");
            r.store(false, Ordering::SeqCst);
        } else {
            error!("\n⚠️  Force quit! Exiting immediately without saving.");
            std::process::exit(1);
        }
    })
    .context("Error setting Ctrl-C handler")?;

    let paths = ProjectPaths::new(&args.project_dir);
    let state = train_job(&params, &paths, &args.save_dir, !args.fresh, &running)?;

    match state.stop {
        Some(StopReason::Interrupted) => info!("Exiting gracefully at step {}.", state.step),
        Some(reason) => info!("Training complete at step {} ({:?}).", state.step, reason),
        None => warn!("Training loop returned without a stop reason"),
    }
    Ok(())
}

/// Runs (or resumes) a job and writes its artifacts into `save_dir`.
pub fn train_job(
    params: &JobParams,
    paths: &ProjectPaths,
    save_dir: &Path,
    resume: bool,
    running: &AtomicBool,
) -> Result<TrainingState> {
    let schedule = params.schedule_config()?;
    let data_config = params.data_config()?;
    let data = JobData::prepare(params, paths)?;

    info!("Initializing Device...");
    let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
    info!("Device initialized: {:?}", device);

    let bert = params.bert_config(
        data.tokenizer.vocab_size(),
        data.output_vocab.len(),
        data.tag_vocab.len(),
    );
    let mut model = MultiTaskBert::new(bert, params.lr, &device)?;
    info!("📊 Model Size: {:.2}M Params", bert.num_params() as f64 / 1e6);

    fs::create_dir_all(save_dir)
        .with_context(|| format!("Failed to create save dir {:?}", save_dir))?;
    params.save(save_dir.join(PARAMS_FILE))?;

    let previous = if resume { load_checkpoint(save_dir)? } else { None };
    let mut scheduler = match previous {
        Some(checkpoint) => {
            info!("Resuming from checkpoint written {}", checkpoint.date);
            model.load(save_dir.join(MODEL_FILE))?;
            Scheduler::resume(schedule, checkpoint.state)?
        }
        None => {
            info!("No checkpoint found. Starting fresh.");
            Scheduler::new(schedule)?
        }
    };

    let mut mlm_source = BatchStream::finite(data.mlm_train.clone(), params.num_mlm_epochs, params.seed);
    let mut srl_source = srl_stream(&schedule.policy, data.srl_train.clone(), params);
    mlm_source.fast_forward(scheduler.state().mlm_steps);
    srl_source.fast_forward(scheduler.state().srl_steps);
    info!(
        "Sources: {} MLM batches x {} epochs, {} SRL batches",
        mlm_source.num_batches(),
        params.num_mlm_epochs,
        srl_source.num_batches()
    );

    let probing = probing::load_tasks(
        &params.probing_names,
        paths,
        &data.tokenizer,
        &data_config,
        &data.output_vocab,
        params.batch_size,
    )?;
    let mut evaluator = JobEvaluator {
        data: &data,
        scorer: scorer(params, paths),
        save_dir: save_dir.to_path_buf(),
        evaluate_train: params.evaluate_train,
        num_prediction_samples: params.num_prediction_samples,
        probing,
    };

    info!(
        "Starting training loop (max {} steps, eval every {}, {:?})",
        schedule.max_steps, schedule.eval_interval, schedule.policy
    );
    let save_interval = params.save_interval;
    let reason = scheduler.run(
        &mut model,
        &mut mlm_source,
        &mut srl_source,
        &mut evaluator,
        |outcome, state, model| {
            let due = save_interval > 0 && outcome.step > 0 && outcome.step % save_interval == 0;
            if due && outcome.stop.is_none() {
                save_checkpoint(save_dir, model, state)?;
            }
            if !running.load(Ordering::SeqCst) {
                info!("[Shutdown] Stop signal detected at step {}", outcome.step);
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        },
    )?;
    info!("Scheduler stopped: {:?}", reason);

    let state = scheduler.into_state();
    save_checkpoint(save_dir, &model, &state)?;
    export_metrics(&state, save_dir)?;
    Ok(state)
}

/// Cyclic under interleaving, otherwise a fixed number of passes.
fn srl_stream(policy: &SrlPolicy, batches: Vec<SrlBatch>, params: &JobParams) -> BatchStream<SrlBatch> {
    if policy.is_interleaved() {
        BatchStream::cyclic(batches, params.seed)
    } else {
        BatchStream::finite(batches, params.num_srl_epochs, params.seed)
    }
}

fn export_metrics(state: &TrainingState, save_dir: &Path) -> Result<()> {
    state.metrics.write_csv(save_dir.join(METRICS_CSV))?;
    state.metrics.write_json(save_dir.join(METRICS_JSON))?;
    for name in MetricName::ALL {
        if let Some(value) = state.metrics.last(name) {
            info!("final {} = {:.4}", name, value);
        }
    }
    info!("Metrics written to {:?}", save_dir.join(METRICS_CSV));
    Ok(())
}
