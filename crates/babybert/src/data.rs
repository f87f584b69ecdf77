//! Data - Corpus splitting and statistics

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use babybert_core::corpus::LengthStats;
use babybert_core::{load_propositions, load_utterances, split, DataConfig, LabelVocab};
use clap::{Args, Subcommand, ValueEnum};
use tracing::info;

use crate::config::ProjectPaths;

#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    #[command(subcommand)]
    pub command: DataCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DataCommand {
    /// Write train/devel/test files for both tasks
    Split(SplitArgs),
    /// Report length (and label) statistics of a corpus file
    Stats(StatsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    #[arg(long, default_value_t = 3)]
    pub min_input_length: usize,

    #[arg(long, default_value_t = 128)]
    pub max_input_length: usize,
}

impl FilterArgs {
    fn data_config(&self, train_prob: f64, seed: u64) -> Result<DataConfig> {
        let config = DataConfig {
            min_input_length: self.min_input_length,
            max_input_length: self.max_input_length,
            train_prob,
            seed,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SplitArgs {
    #[arg(long, default_value = ".")]
    pub project_dir: PathBuf,

    #[arg(long, default_value = "childes-20191206")]
    pub corpus_name: String,

    #[arg(long, default_value_t = 0.8)]
    pub train_prob: f64,

    #[arg(long, default_value_t = 2)]
    pub seed: u64,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum CorpusKind {
    Mlm,
    Srl,
}

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    #[arg(long, required = true)]
    pub input: PathBuf,

    #[arg(long, value_enum, default_value_t = CorpusKind::Mlm)]
    pub kind: CorpusKind,

    #[command(flatten)]
    pub filter: FilterArgs,
}

pub fn run(args: DataArgs) -> Result<()> {
    match args.command {
        DataCommand::Split(a) => run_split(a),
        DataCommand::Stats(a) => run_stats(a),
    }
}

fn write_lines<I, S>(path: &Path, lines: I) -> Result<usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BufWriter::new(File::create(path)?);
    let mut n = 0;
    for line in lines {
        writeln!(out, "{}", line.as_ref())?;
        n += 1;
    }
    out.flush()?;
    Ok(n)
}

pub fn run_split(args: SplitArgs) -> Result<()> {
    let paths = ProjectPaths::new(&args.project_dir);
    let config = args.filter.data_config(args.train_prob, args.seed)?;
    let corpus = &args.corpus_name;

    let utterances = load_utterances(paths.mlm_corpus(corpus), &config)?;
    let parts = split(utterances, config.train_prob, config.seed);
    for (name, part) in [("train", &parts.train), ("devel", &parts.devel), ("test", &parts.test)] {
        let path = paths.split_file(corpus, name, "mlm");
        let n = write_lines(&path, part.iter().map(|u| u.join(" ")))?;
        info!("Wrote {} utterances to {:?}", n, path);
    }

    let propositions = load_propositions(paths.srl_corpus(corpus), &config)?;
    let parts = split(propositions, config.train_prob, config.seed);
    for (name, part) in [("train", &parts.train), ("devel", &parts.devel), ("test", &parts.test)] {
        let path = paths.split_file(corpus, name, "srl");
        let n = write_lines(&path, part.iter().map(|p| p.to_line()))?;
        info!("Wrote {} propositions to {:?}", n, path);
    }
    Ok(())
}

pub fn run_stats(args: StatsArgs) -> Result<()> {
    let config = args.filter.data_config(1.0, 0)?;
    match args.kind {
        CorpusKind::Mlm => {
            let utterances = load_utterances(&args.input, &config)?;
            let words: Vec<&str> = utterances.iter().flatten().map(String::as_str).collect();
            LabelVocab::non_padded(words).print_statistics("words");
        }
        CorpusKind::Srl => {
            let propositions = load_propositions(&args.input, &config)?;
            let predicate_positions: Vec<usize> =
                propositions.iter().map(|p| p.predicate_index).collect();
            if let Some(stats) = LengthStats::from_lengths(&predicate_positions) {
                info!("Mean predicate position: {:.2}", stats.mean);
            }
            LabelVocab::non_padded(propositions.iter().flat_map(|p| p.labels.iter()))
                .print_statistics("srl_labels");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_split_writes_six_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let childes = dir.path().join("data/CHILDES");
        fs::create_dir_all(&childes)?;
        let transcripts: String = (0..40).map(|i| format!("look at ball {i} .\n")).collect();
        fs::write(childes.join("toy_mlm.txt"), transcripts)?;
        let propositions: String = (0..40)
            .map(|i| format!("0 look at ball{i} ||| B-V B-ARG1 I-ARG1\n"))
            .collect();
        fs::write(childes.join("toy_srl.txt"), propositions)?;

        run_split(SplitArgs {
            project_dir: dir.path().to_path_buf(),
            corpus_name: "toy".into(),
            train_prob: 0.5,
            seed: 4,
            filter: FilterArgs {
                min_input_length: 1,
                max_input_length: 10,
            },
        })?;

        let paths = ProjectPaths::new(dir.path());
        for task in ["mlm", "srl"] {
            let total: usize = ["train", "devel", "test"]
                .iter()
                .map(|part| {
                    fs::read_to_string(paths.split_file("toy", part, task))
                        .map(|s| s.lines().count())
                        .unwrap_or(0)
                })
                .sum();
            assert_eq!(total, 40, "{task}");
        }

        let config = DataConfig {
            min_input_length: 1,
            ..Default::default()
        };
        let train = load_propositions(paths.split_file("toy", "train", "srl"), &config)?;
        assert!(train.iter().all(|p| p.words[0] == "look"));
        Ok(())
    }
}
