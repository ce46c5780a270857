// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Records per-epoch training and evaluation metrics to a CSV
// file in the output directory.
//
// The columns are not fixed: the metric callback decides which
// metrics exist, so the header is taken from the first row:
//
//   epoch,train_loss,accuracy,eval_loss,macro_f1
//   1,1.021300,0.640000,0.903100,0.611200
//   2,0.744100,0.712000,0.801700,0.698000
//
// Later rows are written in header order; a metric missing from
// a row leaves its cell empty.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

pub const METRICS_FILE: &str = "metrics.csv";

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Average training loss over all batches of the epoch
    pub train_loss: f64,

    /// Whatever the metric callback returned, plus eval_loss
    pub eval: BTreeMap<String, f64>,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, eval: BTreeMap<String, f64>) -> Self {
        Self { epoch, train_loss, eval }
    }

    fn columns(&self) -> Vec<String> {
        let mut columns = vec!["epoch".to_string(), "train_loss".to_string()];
        columns.extend(self.eval.keys().cloned());
        columns
    }
}

/// Appends epoch metrics to `{dir}/metrics.csv`.
pub struct MetricsLogger {
    csv_path: PathBuf,
    columns:  Option<Vec<String>>,
}

impl MetricsLogger {
    /// Create the logger. Any previous metrics file in `dir` is replaced.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;
        let csv_path = dir.join(METRICS_FILE);
        if csv_path.exists() {
            fs::remove_file(&csv_path)
                .with_context(|| format!("Cannot replace '{}'", csv_path.display()))?;
        }
        Ok(Self { csv_path, columns: None })
    }

    /// Continue an existing metrics file, keeping its header. Falls back
    /// to a fresh file when there is none.
    pub fn append(dir: &Path) -> Result<Self> {
        let csv_path = dir.join(METRICS_FILE);
        if !csv_path.exists() {
            return Self::new(dir);
        }
        let existing = fs::read_to_string(&csv_path)
            .with_context(|| format!("Cannot read '{}'", csv_path.display()))?;
        let columns = existing
            .lines()
            .next()
            .filter(|header| !header.is_empty())
            .map(|header| header.split(',').map(str::to_string).collect());
        Ok(Self { csv_path, columns })
    }

    pub fn log(&mut self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        let columns = match &self.columns {
            Some(columns) => columns.clone(),
            None => {
                let columns = m.columns();
                writeln!(f, "{}", columns.join(","))?;
                tracing::debug!("Created metrics CSV: '{}'", self.csv_path.display());
                self.columns = Some(columns.clone());
                columns
            }
        };

        let cells: Vec<String> = columns
            .iter()
            .map(|column| match column.as_str() {
                "epoch" => m.epoch.to_string(),
                "train_loss" => format!("{:.6}", m.train_loss),
                name => m.eval.get(name).map(|v| format!("{v:.6}")).unwrap_or_default(),
            })
            .collect();
        writeln!(f, "{}", cells.join(","))?;

        tracing::debug!("Logged epoch {} metrics: train_loss={:.4}", m.epoch, m.train_loss);
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn eval(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_header_comes_from_first_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = MetricsLogger::new(dir.path()).unwrap();
        logger
            .log(&EpochMetrics::new(1, 1.5, eval(&[("accuracy", 0.5), ("eval_loss", 1.2)])))
            .unwrap();
        logger
            .log(&EpochMetrics::new(2, 1.0, eval(&[("accuracy", 0.75)])))
            .unwrap();

        let csv = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "epoch,train_loss,accuracy,eval_loss");
        assert_eq!(lines[1], "1,1.500000,0.500000,1.200000");
        assert_eq!(lines[2], "2,1.000000,0.750000,");
    }

    #[test]
    fn test_append_keeps_rows_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = MetricsLogger::new(dir.path()).unwrap();
        first.log(&EpochMetrics::new(1, 0.9, eval(&[("accuracy", 0.5)]))).unwrap();

        let mut resumed = MetricsLogger::append(dir.path()).unwrap();
        resumed.log(&EpochMetrics::new(2, 0.4, eval(&[("accuracy", 0.8)]))).unwrap();

        let csv = fs::read_to_string(resumed.csv_path()).unwrap();
        assert_eq!(
            csv.lines().collect::<Vec<_>>(),
            vec!["epoch,train_loss,accuracy", "1,0.900000,0.500000", "2,0.400000,0.800000"]
        );
    }

    #[test]
    fn test_new_logger_replaces_old_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(METRICS_FILE), "stale\n").unwrap();
        let mut logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&EpochMetrics::new(1, 0.1, BTreeMap::new())).unwrap();
        let csv = fs::read_to_string(logger.csv_path()).unwrap();
        assert!(!csv.contains("stale"));
        assert!(csv.starts_with("epoch,train_loss\n"));
    }
}
