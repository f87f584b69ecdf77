//! External SRL scorer (`srl-eval.pl`) run as a subprocess with a timeout

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Overall scores as fractions in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct F1Summary {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl F1Summary {
    /// Reads the `Overall` row of the scorer report:
    /// `Overall  corr excess missed prec rec F1` with percentages.
    pub fn parse(report: &str) -> Option<Self> {
        static OVERALL: OnceLock<Regex> = OnceLock::new();
        let re = OVERALL.get_or_init(|| {
            Regex::new(r"(?m)^\s*Overall\s+\d+\s+\d+\s+\d+\s+([\d.]+)\s+([\d.]+)\s+([\d.]+)")
                .expect("valid Overall regex")
        });
        let caps = re.captures(report)?;
        let field = |i: usize| -> Option<f64> { caps.get(i)?.as_str().parse::<f64>().ok() };
        Some(Self {
            precision: field(1)? / 100.0,
            recall: field(2)? / 100.0,
            f1: field(3)? / 100.0,
        })
    }
}

/// Scores a predicted CoNLL file against a gold one.
pub trait SrlScorer {
    fn score(&self, gold: &Path, predicted: &Path) -> Result<F1Summary>;
}

/// Runs `{interpreter} {script} {gold} {predicted}` and parses its stdout.
#[derive(Debug, Clone)]
pub struct PerlScorer {
    pub interpreter: PathBuf,
    pub script: PathBuf,
    pub timeout: Duration,
}

impl PerlScorer {
    pub fn new<P: Into<PathBuf>>(script: P) -> Self {
        Self {
            interpreter: PathBuf::from("perl"),
            script: script.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_interpreter<P: Into<PathBuf>>(mut self, interpreter: P) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, gold: &Path, predicted: &Path) -> Result<std::process::Output> {
        let child = Command::new(&self.interpreter)
            .arg(&self.script)
            .arg(gold)
            .arg(predicted)
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(self.timeout, child).await {
            Ok(output) => output.map_err(|e| {
                Error::Scorer(format!("failed to run {:?}: {e}", self.interpreter))
            }),
            Err(_) => Err(Error::ScorerTimeout(self.timeout)),
        }
    }
}

impl SrlScorer for PerlScorer {
    fn score(&self, gold: &Path, predicted: &Path) -> Result<F1Summary> {
        debug!("Scoring {:?} against {:?}", predicted, gold);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let output = runtime.block_on(self.run(gold, predicted))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Scorer(format!(
                "{:?} exited with {}: {}",
                self.script,
                output.status,
                stderr.trim()
            )));
        }
        F1Summary::parse(&stdout)
            .ok_or_else(|| Error::Scorer(format!("no `Overall` line in output of {:?}", self.script)))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Write;

    const REPORT: &str = "\
Number of Sentences    :           2
Number of Propositions :           2

--------------------------------------------------------------------
              corr.  excess  missed    prec.    rec.      F1
------------------------------------------------------------
   Overall        5       1       2    83.33   71.43   76.92
----------
       ARG0       2       0       0   100.00  100.00  100.00
";

    fn script(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    fn sh_scorer(file: &tempfile::NamedTempFile) -> PerlScorer {
        PerlScorer::new(file.path()).with_interpreter("sh")
    }

    #[test]
    fn test_parse_overall_line() {
        let summary = F1Summary::parse(REPORT).unwrap();
        assert!((summary.f1 - 0.7692).abs() < 1e-9);
        assert!((summary.precision - 0.8333).abs() < 1e-9);
        assert!(F1Summary::parse("nothing here").is_none());
    }

    #[test]
    fn test_successful_subprocess() -> Result<()> {
        let file = script(&format!("cat <<'EOF'\n{REPORT}EOF\n"));
        let summary = sh_scorer(&file).score(Path::new("gold"), Path::new("pred"))?;
        assert!((summary.recall - 0.7143).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_failures_are_errors() {
        let bad_output = script("echo garbage\n");
        assert!(matches!(
            sh_scorer(&bad_output).score(Path::new("g"), Path::new("p")),
            Err(Error::Scorer(_))
        ));

        let bad_exit = script("echo oops >&2\nexit 3\n");
        assert!(matches!(
            sh_scorer(&bad_exit).score(Path::new("g"), Path::new("p")),
            Err(Error::Scorer(_))
        ));
    }

    #[test]
    fn test_hanging_scorer_times_out() {
        let hang = script("sleep 10\n");
        let scorer = sh_scorer(&hang).with_timeout(Duration::from_millis(200));
        assert!(matches!(
            scorer.score(Path::new("g"), Path::new("p")),
            Err(Error::ScorerTimeout(_))
        ));
    }
}
