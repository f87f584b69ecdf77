//! Training Scheduler - Step-driven MLM/SRL multi-task state machine
//!
//! One integer step counter drives everything. Step 0 only evaluates; every
//! later step draws an MLM batch and, depending on the [`SrlPolicy`], an SRL
//! batch. Exhaustion of a batch source arrives as [`Draw::Exhausted`] and is
//! routed through the policy:
//! - interleaved: MLM exhaustion stops the run at once
//! - ramp / double-length: MLM exhaustion switches to SRL-only steps, and SRL
//!   exhaustion stops the run
//!
//! Evaluation fires whenever `step % eval_interval == 0`, before the update of
//! that step.

pub mod metrics;
pub mod policy;

pub use metrics::{EvalReport, MetricName, MetricRow, Metrics};
pub use policy::{Gate, SrlPolicy};

use std::ops::ControlFlow;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::batch::{BatchSource, Draw, MlmBatch, SrlBatch};
use crate::error::{Error, Result};
use crate::model::MultiTaskModel;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// The run stops once the step counter reaches this value.
    pub max_steps: usize,
    pub eval_interval: usize,
    pub policy: SrlPolicy,
    pub seed: u64,
}

impl ScheduleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.eval_interval == 0 {
            return Err(Error::InvalidConfig("eval_interval must be > 0".into()));
        }
        match self.policy {
            SrlPolicy::Interleaved { probability } if !(0.0..=1.0).contains(&probability) => {
                Err(Error::InvalidConfig(format!(
                    "srl_probability {probability} is outside [0, 1]"
                )))
            }
            SrlPolicy::Ramp { ramp, .. } if ramp < 0.0 => Err(Error::InvalidConfig(format!(
                "srl_task_ramp {ramp} is negative"
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    TrainingMlm,
    TrainingSrl,
    Evaluating,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxSteps,
    MlmExhausted,
    SrlExhausted,
    Interrupted,
}

/// Everything needed to report on or resume a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub step: usize,
    pub phase: Phase,
    pub mlm_exhausted: bool,
    /// MLM batches drawn so far (updates done).
    pub mlm_steps: usize,
    pub srl_steps: usize,
    pub last_mlm_loss: Option<f32>,
    pub last_srl_loss: Option<f32>,
    pub metrics: Metrics,
    pub stop: Option<StopReason>,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            step: 0,
            phase: Phase::Initializing,
            mlm_exhausted: false,
            mlm_steps: 0,
            srl_steps: 0,
            last_mlm_loss: None,
            last_srl_loss: None,
            metrics: Metrics::default(),
            stop: None,
        }
    }
}

/// What a single call to [`Scheduler::advance`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// The step that was processed.
    pub step: usize,
    pub evaluated: bool,
    pub mlm_loss: Option<f32>,
    pub srl_loss: Option<f32>,
    /// Set when the run ended during this call.
    pub stop: Option<StopReason>,
}

/// Produces the metrics of one evaluation round.
pub trait Evaluator<M: ?Sized> {
    fn evaluate(&mut self, model: &M, step: usize) -> Result<EvalReport>;
}

impl<M: ?Sized, F> Evaluator<M> for F
where
    F: FnMut(&M, usize) -> Result<EvalReport>,
{
    fn evaluate(&mut self, model: &M, step: usize) -> Result<EvalReport> {
        self(model, step)
    }
}

pub struct Scheduler<R = StdRng> {
    config: ScheduleConfig,
    state: TrainingState,
    rng: R,
    started: Instant,
}

impl Scheduler<StdRng> {
    pub fn new(config: ScheduleConfig) -> Result<Self> {
        let rng = StdRng::seed_from_u64(config.seed);
        Self::with_rng(config, TrainingState::default(), rng)
    }

    /// Continues from a saved state. An interrupted run picks up where it
    /// stopped; a run that ended for any other reason stays ended.
    pub fn resume(config: ScheduleConfig, mut state: TrainingState) -> Result<Self> {
        if state.stop == Some(StopReason::Interrupted) {
            state.stop = None;
        }
        let rng = StdRng::seed_from_u64(config.seed.wrapping_add(state.step as u64));
        info!(
            "Resuming at step {} ({} MLM / {} SRL batches drawn)",
            state.step, state.mlm_steps, state.srl_steps
        );
        Self::with_rng(config, state, rng)
    }
}

impl<R: Rng> Scheduler<R> {
    pub fn with_rng(config: ScheduleConfig, state: TrainingState, rng: R) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state,
            rng,
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn into_state(self) -> TrainingState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stop.is_some()
    }

    /// Marks the run as interrupted (e.g. Ctrl-C) without touching the step.
    pub fn interrupt(&mut self) {
        self.finish(StopReason::Interrupted);
    }

    fn finish(&mut self, reason: StopReason) {
        if self.state.stop.is_none() {
            info!("Stopping at step {}: {:?}", self.state.step, reason);
            self.state.stop = Some(reason);
            self.state.phase = Phase::Stopped;
        }
    }

    fn srl_gate_open(&mut self, step: usize) -> bool {
        match self.config.policy.gate(step, self.state.mlm_exhausted) {
            Gate::Never => false,
            Gate::Always => true,
            Gate::Draw(p) => self.rng.gen::<f64>() < p,
        }
    }

    fn log_progress(&self) {
        let pp = self.state.last_mlm_loss.map(|l| (l as f64).exp());
        let minutes = self.started.elapsed().as_secs() / 60;
        info!(
            "step {:<6}: pp={} srl-loss={} total minutes elapsed={:<3}",
            self.state.step,
            pp.map_or_else(|| "-".to_string(), |v| format!("{v:2.4}")),
            self.state
                .last_srl_loss
                .map_or_else(|| "-".to_string(), |v| format!("{v:2.4}")),
            minutes
        );
    }

    /// Processes exactly one step. The counter is not advanced when the step
    /// ends the run.
    pub fn advance<M, A, S, E>(
        &mut self,
        model: &mut M,
        mlm: &mut A,
        srl: &mut S,
        evaluator: &mut E,
    ) -> Result<StepOutcome>
    where
        M: MultiTaskModel,
        A: BatchSource<Batch = MlmBatch>,
        S: BatchSource<Batch = SrlBatch>,
        E: Evaluator<M>,
    {
        let step = self.state.step;
        let mut outcome = StepOutcome {
            step,
            evaluated: false,
            mlm_loss: None,
            srl_loss: None,
            stop: self.state.stop,
        };
        if self.state.stop.is_some() {
            return Ok(outcome);
        }
        if step >= self.config.max_steps {
            self.finish(StopReason::MaxSteps);
            outcome.stop = self.state.stop;
            return Ok(outcome);
        }

        if step % self.config.eval_interval == 0 {
            self.state.phase = Phase::Evaluating;
            let report = evaluator.evaluate(model, step)?;
            self.state.metrics.record(step, &report);
            outcome.evaluated = true;
            if step > 0 {
                self.log_progress();
            }
        }

        if step > 0 {
            if !self.state.mlm_exhausted {
                match mlm.next_batch() {
                    Draw::Batch(batch) => {
                        self.state.phase = Phase::TrainingMlm;
                        let loss = model.train_mlm(batch)?;
                        self.state.mlm_steps += 1;
                        self.state.last_mlm_loss = Some(loss);
                        outcome.mlm_loss = Some(loss);
                    }
                    Draw::Exhausted if self.config.policy.is_interleaved() => {
                        self.finish(StopReason::MlmExhausted);
                        outcome.stop = self.state.stop;
                        return Ok(outcome);
                    }
                    Draw::Exhausted => {
                        info!("No more MLM batches at step {step}; continuing with SRL only");
                        self.state.mlm_exhausted = true;
                    }
                }
            }

            if self.srl_gate_open(step) {
                match srl.next_batch() {
                    Draw::Batch(batch) => {
                        self.state.phase = Phase::TrainingSrl;
                        let loss = model.train_srl(batch)?;
                        self.state.srl_steps += 1;
                        self.state.last_srl_loss = Some(loss);
                        outcome.srl_loss = Some(loss);
                    }
                    Draw::Exhausted => {
                        if self.config.policy.is_interleaved() {
                            warn!("Cyclic SRL source is empty");
                        }
                        self.finish(StopReason::SrlExhausted);
                        outcome.stop = self.state.stop;
                        return Ok(outcome);
                    }
                }
            }
        }

        self.state.step += 1;
        Ok(outcome)
    }

    /// Advances until the run stops. `on_step` sees every processed step and
    /// may return `Break` to interrupt.
    pub fn run<M, A, S, E, F>(
        &mut self,
        model: &mut M,
        mlm: &mut A,
        srl: &mut S,
        evaluator: &mut E,
        mut on_step: F,
    ) -> Result<StopReason>
    where
        M: MultiTaskModel,
        A: BatchSource<Batch = MlmBatch>,
        S: BatchSource<Batch = SrlBatch>,
        E: Evaluator<M>,
        F: FnMut(&StepOutcome, &TrainingState, &M) -> Result<ControlFlow<()>>,
    {
        loop {
            if let Some(reason) = self.state.stop {
                return Ok(reason);
            }
            let outcome = self.advance(model, mlm, srl, evaluator)?;
            if let ControlFlow::Break(()) = on_step(&outcome, &self.state, model)? {
                self.interrupt();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchStream;
    use crate::labels::LabelVocab;

    #[derive(Default)]
    struct Recorder {
        mlm: usize,
        srl: usize,
    }

    impl MultiTaskModel for Recorder {
        fn train_mlm(&mut self, _: &MlmBatch) -> Result<f32> {
            self.mlm += 1;
            Ok(2.0)
        }
        fn train_srl(&mut self, _: &SrlBatch) -> Result<f32> {
            self.srl += 1;
            Ok(1.0)
        }
        fn mlm_nll(&self, _: &MlmBatch) -> Result<(f64, usize)> {
            Ok((0.0, 0))
        }
        fn predict_mlm(&self, _: &MlmBatch) -> Result<Vec<Vec<u32>>> {
            Ok(Vec::new())
        }
        fn predict_srl(&self, _: &SrlBatch) -> Result<Vec<Vec<u32>>> {
            Ok(Vec::new())
        }
    }

    fn mlm_source(n: usize) -> BatchStream<MlmBatch> {
        let vocab = LabelVocab::padded(Vec::<String>::new());
        BatchStream::finite(vec![MlmBatch::from_instances(&[], &vocab); n], 1, 0)
    }

    fn srl_finite(n: usize) -> BatchStream<SrlBatch> {
        let vocab = LabelVocab::non_padded(["O"]);
        BatchStream::finite(vec![SrlBatch::from_instances(&[], &vocab); n], 1, 0)
    }

    fn srl_cyclic() -> BatchStream<SrlBatch> {
        let vocab = LabelVocab::non_padded(["O"]);
        BatchStream::cyclic(vec![SrlBatch::from_instances(&[], &vocab); 3], 0)
    }

    fn no_eval(_: &Recorder, _: usize) -> Result<EvalReport> {
        Ok(EvalReport::new())
    }

    fn config(max_steps: usize, policy: SrlPolicy) -> ScheduleConfig {
        ScheduleConfig {
            max_steps,
            eval_interval: 1000,
            policy,
            seed: 3,
        }
    }

    #[test]
    fn test_step_zero_only_evaluates() -> Result<()> {
        let mut scheduler = Scheduler::new(config(10, SrlPolicy::Interleaved { probability: 1.0 }))?;
        let mut model = Recorder::default();
        let mut evals = Vec::new();
        let mut evaluator = |_: &Recorder, step: usize| -> Result<EvalReport> {
            evals.push(step);
            Ok(EvalReport::new().with(MetricName::DevelPp, Some(1.0)))
        };

        let outcome = scheduler.advance(&mut model, &mut mlm_source(5), &mut srl_cyclic(), &mut evaluator)?;
        assert!(outcome.evaluated);
        assert_eq!((outcome.mlm_loss, outcome.srl_loss), (None, None));
        assert_eq!((model.mlm, model.srl), (0, 0));
        assert_eq!(scheduler.state().step, 1);
        assert_eq!(evals, vec![0]);
        Ok(())
    }

    #[test]
    fn test_stops_at_max_steps() -> Result<()> {
        let mut scheduler = Scheduler::new(config(4, SrlPolicy::Interleaved { probability: 0.0 }))?;
        let mut model = Recorder::default();
        let reason = scheduler.run(
            &mut model,
            &mut mlm_source(100),
            &mut srl_cyclic(),
            &mut no_eval,
            |_, _, _| Ok(ControlFlow::Continue(())),
        )?;
        assert_eq!(reason, StopReason::MaxSteps);
        assert_eq!(scheduler.state().step, 4);
        assert_eq!(model.mlm, 3);
        assert_eq!(model.srl, 0);
        Ok(())
    }

    #[test]
    fn test_interleaved_mlm_exhaustion_halts_immediately() -> Result<()> {
        let mut scheduler = Scheduler::new(config(1000, SrlPolicy::Interleaved { probability: 1.0 }))?;
        let mut model = Recorder::default();
        let reason = scheduler.run(
            &mut model,
            &mut mlm_source(3),
            &mut srl_cyclic(),
            &mut no_eval,
            |_, _, _| Ok(ControlFlow::Continue(())),
        )?;
        assert_eq!(reason, StopReason::MlmExhausted);
        // steps 1..=3 trained, exhaustion detected at step 4
        assert_eq!(scheduler.state().step, 4);
        assert_eq!((model.mlm, model.srl), (3, 3));
        Ok(())
    }

    #[test]
    fn test_double_length_runs_srl_after_mlm() -> Result<()> {
        let mut scheduler = Scheduler::new(config(1000, SrlPolicy::DoubleLength))?;
        let mut model = Recorder::default();
        let mut srl_by_step = Vec::new();
        let reason = scheduler.run(
            &mut model,
            &mut mlm_source(2),
            &mut srl_finite(3),
            &mut no_eval,
            |outcome, _, _| {
                srl_by_step.push((outcome.step, outcome.srl_loss.is_some()));
                Ok(ControlFlow::Continue(()))
            },
        )?;
        assert_eq!(reason, StopReason::SrlExhausted);
        assert_eq!((model.mlm, model.srl), (2, 3));
        assert!(scheduler.state().mlm_exhausted);
        assert_eq!(
            srl_by_step,
            vec![
                (0, false),
                (1, false),
                (2, false),
                (3, true),
                (4, true),
                (5, true),
                (6, false),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_ramp_waits_for_delay() -> Result<()> {
        let policy = SrlPolicy::Ramp {
            delay: 5,
            ramp: 1000.0,
        };
        let mut scheduler = Scheduler::new(config(9, policy))?;
        let mut model = Recorder::default();
        let mut srl_steps = Vec::new();
        scheduler.run(
            &mut model,
            &mut mlm_source(100),
            &mut srl_finite(100),
            &mut no_eval,
            |outcome, _, _| {
                if outcome.srl_loss.is_some() {
                    srl_steps.push(outcome.step);
                }
                Ok(ControlFlow::Continue(()))
            },
        )?;
        // ramp / (step - delay) >= 1 for every step after the delay
        assert_eq!(srl_steps, vec![6, 7, 8]);
        Ok(())
    }

    #[test]
    fn test_ramp_srl_exhaustion_stops_run() -> Result<()> {
        let policy = SrlPolicy::Ramp { delay: 0, ramp: 1e6 };
        let mut scheduler = Scheduler::new(config(1000, policy))?;
        let mut model = Recorder::default();
        let reason = scheduler.run(
            &mut model,
            &mut mlm_source(100),
            &mut srl_finite(2),
            &mut no_eval,
            |_, _, _| Ok(ControlFlow::Continue(())),
        )?;
        assert_eq!(reason, StopReason::SrlExhausted);
        assert_eq!(model.srl, 2);
        Ok(())
    }

    #[test]
    fn test_evaluation_interval_includes_step_zero() -> Result<()> {
        let mut cfg = config(7, SrlPolicy::DoubleLength);
        cfg.eval_interval = 3;
        let mut scheduler = Scheduler::new(cfg)?;
        let mut model = Recorder::default();
        let mut evaluator = |_: &Recorder, step: usize| -> Result<EvalReport> {
            Ok(EvalReport::new().with(MetricName::DevelPp, Some(step as f64)))
        };
        scheduler.run(
            &mut model,
            &mut mlm_source(100),
            &mut srl_finite(1),
            &mut evaluator,
            |_, _, _| Ok(ControlFlow::Continue(())),
        )?;
        let steps: Vec<usize> = scheduler
            .state()
            .metrics
            .series(MetricName::DevelPp)
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        assert_eq!(steps, vec![0, 3, 6]);
        Ok(())
    }

    #[test]
    fn test_interrupt_and_resume() -> Result<()> {
        let cfg = config(10, SrlPolicy::Interleaved { probability: 0.0 });
        let mut scheduler = Scheduler::new(cfg)?;
        let mut model = Recorder::default();
        let mut mlm = mlm_source(100);
        let reason = scheduler.run(
            &mut model,
            &mut mlm,
            &mut srl_cyclic(),
            &mut no_eval,
            |outcome, _, _| {
                Ok(if outcome.step == 4 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                })
            },
        )?;
        assert_eq!(reason, StopReason::Interrupted);
        let state = scheduler.into_state();
        assert_eq!(state.step, 5);

        let json = serde_json::to_string(&state)?;
        let restored: TrainingState = serde_json::from_str(&json)?;
        let mut resumed = Scheduler::resume(cfg, restored)?;
        let reason = resumed.run(
            &mut model,
            &mut mlm,
            &mut srl_cyclic(),
            &mut no_eval,
            |_, _, _| Ok(ControlFlow::Continue(())),
        )?;
        assert_eq!(reason, StopReason::MaxSteps);
        assert_eq!(model.mlm, 9);
        Ok(())
    }

    #[test]
    fn test_zero_max_steps_stops_immediately() -> Result<()> {
        let mut scheduler = Scheduler::new(config(0, SrlPolicy::DoubleLength))?;
        let mut model = Recorder::default();
        let mut evaluated = false;
        let mut evaluator = |_: &Recorder, _: usize| -> Result<EvalReport> {
            evaluated = true;
            Ok(EvalReport::new())
        };
        let outcome = scheduler.advance(&mut model, &mut mlm_source(1), &mut srl_finite(1), &mut evaluator)?;
        assert_eq!(outcome.stop, Some(StopReason::MaxSteps));
        assert!(!evaluated);
        Ok(())
    }

    #[test]
    fn test_invalid_schedule_is_rejected() {
        let mut cfg = config(5, SrlPolicy::Interleaved { probability: 1.5 });
        assert!(Scheduler::new(cfg).is_err());
        cfg.policy = SrlPolicy::DoubleLength;
        cfg.eval_interval = 0;
        assert!(Scheduler::new(cfg).is_err());
    }
}
