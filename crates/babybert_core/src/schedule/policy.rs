//! SRL gating policies

use serde::{Deserialize, Serialize};

/// Decides, for each non-zero step, whether an SRL update happens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SrlPolicy {
    /// SRL with a fixed probability from a cyclic source. MLM exhaustion ends
    /// the run.
    Interleaved { probability: f64 },
    /// No SRL up to `delay`, then SRL with probability `ramp / (step - delay)`
    /// from a finite source. The value is not clamped: right after the delay it
    /// exceeds 1.0 and SRL always runs.
    Ramp { delay: usize, ramp: f64 },
    /// SRL only once the MLM source is exhausted, until the SRL source is too.
    DoubleLength,
}

/// How a policy wants the SRL gate evaluated at a given step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gate {
    Never,
    Always,
    /// Run when a uniform draw in [0, 1) falls below the value.
    Draw(f64),
}

impl SrlPolicy {
    pub fn is_interleaved(&self) -> bool {
        matches!(self, SrlPolicy::Interleaved { .. })
    }

    /// `None` at or before the delay, where the ratio is undefined.
    pub fn ramp_probability(delay: usize, ramp: f64, step: usize) -> Option<f64> {
        (step > delay).then(|| ramp / (step - delay) as f64)
    }

    /// Once MLM is exhausted every non-interleaved policy runs SRL each step.
    pub fn gate(&self, step: usize, mlm_exhausted: bool) -> Gate {
        match *self {
            SrlPolicy::Interleaved { probability } => Gate::Draw(probability),
            _ if mlm_exhausted => Gate::Always,
            SrlPolicy::Ramp { delay, ramp } => match Self::ramp_probability(delay, ramp, step) {
                Some(p) => Gate::Draw(p),
                None => Gate::Never,
            },
            SrlPolicy::DoubleLength => Gate::Never,
        }
    }
}
