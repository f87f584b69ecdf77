//! Corpus Loader - Utterances (MLM) and propositions (SRL) from text files
//!
//! MLM files hold one whitespace-tokenized transcript per line; transcripts are
//! cut into utterances after every `.`, `?` or `!`. SRL files hold one
//! proposition per line: `{predicate_index} {words} ||| {labels}`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{info, warn};

use crate::config::DataConfig;
use crate::error::{malformed, Result};

const PUNCTUATION: [&str; 3] = [".", "?", "!"];
const DELIMITER: &str = "|||";

pub type Utterance = Vec<String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposition {
    pub words: Vec<String>,
    pub predicate_index: usize,
    pub labels: Vec<String>,
}

impl Proposition {
    pub fn predicate(&self) -> &str {
        &self.words[self.predicate_index]
    }

    /// Inverse of [`parse_proposition_line`].
    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {}",
            self.predicate_index,
            self.words.join(" "),
            DELIMITER,
            self.labels.join(" ")
        )
    }
}

/// Length statistics reported after loading. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthStats {
    pub count: usize,
    pub max: usize,
    pub mean: f64,
    pub median: f64,
}

impl LengthStats {
    pub fn from_lengths(lengths: &[usize]) -> Option<Self> {
        if lengths.is_empty() {
            return None;
        }
        let mut sorted = lengths.to_vec();
        sorted.sort_unstable();
        let count = sorted.len();
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
        } else {
            sorted[mid] as f64
        };
        Some(Self {
            count,
            max: sorted[count - 1],
            mean: sorted.iter().sum::<usize>() as f64 / count as f64,
            median,
        })
    }

    fn log(&self, what: &str) {
        info!("Found {} {}s", self.count, what);
        info!("Max    {} length: {:.2}", what, self.max as f64);
        info!("Mean   {} length: {:.2}", what, self.mean);
        info!("Median {} length: {:.2}", what, self.median);
    }
}

/// Outcome of the length filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LengthCheck {
    Ok,
    TooShort,
    TooLong,
}

fn check_length(len: usize, config: &DataConfig) -> LengthCheck {
    if len < config.min_input_length {
        LengthCheck::TooShort
    } else if len > config.max_input_length {
        LengthCheck::TooLong
    } else {
        LengthCheck::Ok
    }
}

#[derive(Default)]
struct DropCounter {
    too_short: usize,
    too_long: usize,
}

impl DropCounter {
    fn keep(&mut self, len: usize, config: &DataConfig) -> bool {
        match check_length(len, config) {
            LengthCheck::Ok => true,
            LengthCheck::TooShort => {
                self.too_short += 1;
                false
            }
            LengthCheck::TooLong => {
                self.too_long += 1;
                false
            }
        }
    }

    fn report(&self, what: &str, config: &DataConfig) {
        if self.too_short > 0 {
            warn!(
                "Skipped {} {}s which are shorter than {}.",
                self.too_short, what, config.min_input_length
            );
        }
        if self.too_long > 0 {
            warn!(
                "Skipped {} {}s which are longer than {}.",
                self.too_long, what, config.max_input_length
            );
        }
    }
}

/// Cuts a transcript into utterances. Each punctuation token closes the
/// current utterance; the trailing remainder (possibly empty) is returned last.
pub fn segment_transcript<S: AsRef<str>>(tokens: &[S]) -> Vec<Utterance> {
    let mut utterances: Vec<Utterance> = vec![Vec::new()];
    for token in tokens {
        let token = token.as_ref();
        if let Some(current) = utterances.last_mut() {
            current.push(token.to_string());
        }
        if PUNCTUATION.contains(&token) {
            utterances.push(Vec::new());
        }
    }
    utterances
}

pub fn load_utterances<P: AsRef<Path>>(path: P, config: &DataConfig) -> Result<Vec<Utterance>> {
    let path = path.as_ref();
    info!("Loading {:?}", path);

    let reader = BufReader::new(File::open(path)?);
    let mut drops = DropCounter::default();
    let mut res = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let transcript: Vec<&str> = line.split_whitespace().collect();
        for utterance in segment_transcript(&transcript) {
            if drops.keep(utterance.len(), config) {
                res.push(utterance);
            }
        }
    }

    drops.report("utterance", config);
    let lengths: Vec<usize> = res.iter().map(Vec::len).collect();
    if let Some(stats) = LengthStats::from_lengths(&lengths) {
        stats.log("utterance");
    } else {
        warn!("No utterances survived filtering in {:?}", path);
    }
    Ok(res)
}

/// Parses `{predicate_index} {words} ||| {labels}`.
///
/// `line_no` is 1-based and only used for error reporting.
pub fn parse_proposition_line(line: &str, path: &Path, line_no: usize) -> Result<Proposition> {
    let (left, right) = line
        .split_once(DELIMITER)
        .ok_or_else(|| malformed(path, line_no, format!("missing `{DELIMITER}` delimiter")))?;

    let mut left = left.split_whitespace();
    let index_field = left
        .next()
        .ok_or_else(|| malformed(path, line_no, "missing predicate index"))?;
    let predicate_index: usize = index_field.parse().map_err(|_| {
        malformed(
            path,
            line_no,
            format!("predicate index {index_field:?} is not a non-negative integer"),
        )
    })?;

    let words: Vec<String> = left.map(str::to_string).collect();
    let labels: Vec<String> = right.split_whitespace().map(str::to_string).collect();

    if words.len() != labels.len() {
        return Err(malformed(
            path,
            line_no,
            format!("{} words but {} labels", words.len(), labels.len()),
        ));
    }
    if predicate_index >= words.len() {
        return Err(malformed(
            path,
            line_no,
            format!(
                "predicate index {predicate_index} out of range for {} words",
                words.len()
            ),
        ));
    }

    Ok(Proposition {
        words,
        predicate_index,
        labels,
    })
}

pub fn load_propositions<P: AsRef<Path>>(path: P, config: &DataConfig) -> Result<Vec<Proposition>> {
    let path = path.as_ref();
    info!("Loading {:?}", path);

    let reader = BufReader::new(File::open(path)?);
    let mut drops = DropCounter::default();
    let mut res = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let proposition = parse_proposition_line(&line, path, i + 1)?;
        if drops.keep(proposition.words.len(), config) {
            res.push(proposition);
        }
    }

    drops.report("proposition", config);
    let lengths: Vec<usize> = res.iter().map(|p| p.words.len()).collect();
    if let Some(stats) = LengthStats::from_lengths(&lengths) {
        stats.log("proposition");
    } else {
        warn!("No propositions survived filtering in {:?}", path);
    }
    Ok(res)
}
