//! Metric time series keyed by evaluation step

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    TrainPp,
    DevelPp,
    TrainF1,
    DevelF1,
}

impl MetricName {
    pub const ALL: [MetricName; 4] = [
        MetricName::TrainPp,
        MetricName::DevelPp,
        MetricName::TrainF1,
        MetricName::DevelF1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::TrainPp => "train_pp",
            MetricName::DevelPp => "devel_pp",
            MetricName::TrainF1 => "train_f1",
            MetricName::DevelF1 => "devel_f1",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one evaluation round produced. `None` marks a metric that was
/// attempted but is undefined (e.g. the scorer failed).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalReport {
    pub values: Vec<(MetricName, Option<f64>)>,
}

impl EvalReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: MetricName, value: Option<f64>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: MetricName, value: Option<f64>) {
        self.values.push((name, value));
    }

    pub fn get(&self, name: MetricName) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, v)| *v)
    }
}

/// One evaluation step. Empty cells are metrics not computed or undefined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub step: usize,
    pub train_pp: Option<f64>,
    pub devel_pp: Option<f64>,
    pub train_f1: Option<f64>,
    pub devel_f1: Option<f64>,
}

impl MetricRow {
    fn slot(&mut self, name: MetricName) -> &mut Option<f64> {
        match name {
            MetricName::TrainPp => &mut self.train_pp,
            MetricName::DevelPp => &mut self.devel_pp,
            MetricName::TrainF1 => &mut self.train_f1,
            MetricName::DevelF1 => &mut self.devel_f1,
        }
    }

    pub fn get(&self, name: MetricName) -> Option<f64> {
        match name {
            MetricName::TrainPp => self.train_pp,
            MetricName::DevelPp => self.devel_pp,
            MetricName::TrainF1 => self.train_f1,
            MetricName::DevelF1 => self.devel_f1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics {
    rows: Vec<MetricRow>,
}

impl Metrics {
    /// Rows stay sorted by step; recording the same step twice merges.
    pub fn record(&mut self, step: usize, report: &EvalReport) {
        let pos = match self.rows.binary_search_by_key(&step, |r| r.step) {
            Ok(pos) => pos,
            Err(pos) => {
                self.rows.insert(
                    pos,
                    MetricRow {
                        step,
                        ..Default::default()
                    },
                );
                pos
            }
        };
        for &(name, value) in &report.values {
            *self.rows[pos].slot(name) = value;
        }
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn series(&self, name: MetricName) -> Vec<(usize, Option<f64>)> {
        self.rows.iter().map(|r| (r.step, r.get(name))).collect()
    }

    pub fn last(&self, name: MetricName) -> Option<f64> {
        self.rows.iter().rev().find_map(|r| r.get(name))
    }

    /// `step,train_pp,devel_pp,train_f1,devel_f1`
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader.deserialize().collect::<std::result::Result<Vec<MetricRow>, _>>()?;
        Ok(Self { rows })
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}
