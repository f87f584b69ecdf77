//! Train Module - Multi-task training job
//!
//! - TrainArgs: CLI arguments and parameter overrides
//! - checkpoint: weights + scheduler state persistence
//! - job: data preparation, scheduler wiring and artifact export

pub mod args;
pub mod checkpoint;
pub mod job;

pub use args::TrainArgs;
pub use checkpoint::{load_checkpoint, save_checkpoint};
pub use job::run;
