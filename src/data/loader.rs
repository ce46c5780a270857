// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Reads a text classification file into TextSamples.
//
// Supported formats (chosen by file extension):
//
//   .jsonl / .json   one object per line
//                    {"text": "great movie", "label": "positive"}
//                    "sentence" is accepted in place of "text" and
//                    numeric labels are turned into strings
//
//   .csv             header line containing text,label
//                    the LAST comma separates the label so the text
//                    column may itself contain commas
//
//   .tsv             header line, tab separated
//
// Malformed records are logged and skipped, a missing file is an
// error, and a file without a single usable record is reported as
// CompressionError::EmptyDataset.

use anyhow::{Context, Result};
use serde_json::Value;
use std::{fs, path::{Path, PathBuf}};

use crate::domain::error::CompressionError;
use crate::domain::sample::TextSample;
use crate::domain::traits::SampleSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    JsonLines,
    Csv,
    Tsv,
}

/// Loads every record of one dataset file.
pub struct DatasetLoader {
    path: PathBuf,
}

impl DatasetLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn format(&self) -> Result<Format> {
        match self.path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("json") => Ok(Format::JsonLines),
            Some("csv")                  => Ok(Format::Csv),
            Some("tsv")                  => Ok(Format::Tsv),
            other => anyhow::bail!(
                "unsupported dataset extension {:?} for '{}' (expected jsonl, json, csv or tsv)",
                other,
                self.path.display()
            ),
        }
    }
}

impl SampleSource for DatasetLoader {
    fn load_all(&self) -> Result<Vec<TextSample>> {
        let format  = self.format()?;
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read dataset '{}'", self.path.display()))?;

        let samples = match format {
            Format::JsonLines => parse_json_lines(&content, &self.path),
            Format::Csv       => parse_delimited(&content, ',', &self.path)?,
            Format::Tsv       => parse_delimited(&content, '\t', &self.path)?,
        };

        if samples.is_empty() {
            return Err(CompressionError::EmptyDataset(self.path.display().to_string()).into());
        }

        tracing::info!("Loaded {} samples from '{}'", samples.len(), self.path.display());
        Ok(samples)
    }
}

fn parse_json_lines(content: &str, path: &Path) -> Vec<TextSample> {
    let mut samples = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_json_record(line) {
            Some(sample) => samples.push(sample),
            None => tracing::warn!(
                "Skipping malformed record at {}:{}",
                path.display(),
                line_no + 1
            ),
        }
    }
    samples
}

fn parse_json_record(line: &str) -> Option<TextSample> {
    let value: Value = serde_json::from_str(line).ok()?;
    let text = value
        .get("text")
        .or_else(|| value.get("sentence"))?
        .as_str()?
        .to_string();
    let label = match value.get("label")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b)   => b.to_string(),
        _ => return None,
    };
    Some(TextSample::new(text, label))
}

fn parse_delimited(content: &str, delimiter: char, path: &Path) -> Result<Vec<TextSample>> {
    let mut lines = content.lines().enumerate();

    let (_, header) = lines
        .next()
        .with_context(|| format!("'{}' has no header line", path.display()))?;
    let columns: Vec<String> = header
        .split(delimiter)
        .map(|c| c.trim().to_lowercase())
        .collect();
    if columns.len() < 2 || columns.last().map(String::as_str) != Some("label") {
        anyhow::bail!(
            "'{}' must have a header ending in 'label' (found '{}')",
            path.display(),
            header
        );
    }

    let mut samples = Vec::new();
    for (line_no, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        match line.rsplit_once(delimiter) {
            Some((text, label)) if !label.trim().is_empty() => {
                let text = text.trim().trim_matches('"');
                samples.push(TextSample::new(text, label.trim()));
            }
            _ => tracing::warn!(
                "Skipping malformed record at {}:{}",
                path.display(),
                line_no + 1
            ),
        }
    }
    Ok(samples)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_jsonl_accepts_numeric_labels_and_skips_bad_lines() {
        let dir  = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "train.jsonl",
            "{\"text\": \"good film\", \"label\": 1}\n\
             not json\n\
             \n\
             {\"sentence\": \"bad film\", \"label\": \"0\"}\n",
        );
        let samples = DatasetLoader::new(&path).load_all().unwrap();
        assert_eq!(samples, vec![
            TextSample::new("good film", "1"),
            TextSample::new("bad film", "0"),
        ]);
    }

    #[test]
    fn test_csv_splits_on_last_comma() {
        let dir  = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "train.csv", "text,label\nslow, but worth it,positive\n");
        let samples = DatasetLoader::new(&path).load_all().unwrap();
        assert_eq!(samples[0].text, "slow, but worth it");
        assert_eq!(samples[0].label, "positive");
    }

    #[test]
    fn test_csv_requires_label_header() {
        let dir  = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "train.csv", "label,text\npositive,fine\n");
        assert!(DatasetLoader::new(&path).load_all().is_err());
    }

    #[test]
    fn test_empty_dataset_is_an_error() {
        let dir  = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.jsonl", "\n\n");
        let err  = DatasetLoader::new(&path).load_all().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CompressionError>(),
            Some(CompressionError::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_unknown_extension() {
        assert!(DatasetLoader::new("data.parquet").load_all().is_err());
    }
}
