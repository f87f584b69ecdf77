//! BabyBERT-SRL Core
//!
//! Data pipeline and training-schedule orchestration for a multi-task
//! (masked language modeling + semantic role labeling) encoder trained on
//! child-directed speech. The neural network is consumed through the
//! [`model::MultiTaskModel`] boundary; a small candle encoder is provided as
//! the default implementation.

pub mod batch;
pub mod config;
pub mod convert;
pub mod corpus;
pub mod error;
pub mod eval;
pub mod labels;
pub mod model;
pub mod schedule;
pub mod split;
pub mod vocab;
pub mod wordpiece;

pub use batch::{BatchSource, BatchStream, Draw, MlmBatch, SrlBatch};
pub use config::DataConfig;
pub use convert::{MlmConverter, MlmInstance, SrlConverter, SrlInstance};
pub use corpus::{load_propositions, load_utterances, Proposition, Utterance};
pub use error::{Error, Result};
pub use labels::LabelVocab;
pub use model::{BertConfig, MultiTaskBert, MultiTaskModel};
pub use schedule::{
    EvalReport, Evaluator, MetricName, Metrics, ScheduleConfig, Scheduler, SrlPolicy, StopReason,
    TrainingState,
};
pub use split::{split, Split};
pub use vocab::Vocabulary;
pub use wordpiece::WordPieceTokenizer;
