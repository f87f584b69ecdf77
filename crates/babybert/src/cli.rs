use crate::data::DataArgs;
use crate::evaluate::EvaluateArgs;
use crate::train::TrainArgs;
use crate::vocab::VocabArgs;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "BabyBERT-SRL Toolchain", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model (MLM + SRL)
    Train(TrainArgs),

    /// Split corpora / report statistics
    Data(DataArgs),

    /// Build the merged word-piece vocabulary
    Vocab(VocabArgs),

    /// Evaluate a saved model (perplexity, SRL F1)
    Evaluate(EvaluateArgs),
}
