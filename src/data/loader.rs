// ============================================================
// Layer 4 — JSONL Loader
// ============================================================
// Reads newline-delimited JSON files into typed records with serde.
//
// Both the raw datasets (train.jsonl, test.jsonl) and the
// reformatted ones (new_train.jsonl, new_test.jsonl) use this
// format: one JSON object per line.
//
// Failure policy: the first line that is not valid JSON, or that
// lacks a required field, aborts the whole load. The error names
// the file and the 1-based line number.
//
// Reference: serde_json crate documentation
//            Rust Book §9 (Error Handling)

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::domain::example::FormattedExample;

pub struct JsonlLoader {
    path: PathBuf,
}

impl JsonlLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    /// Parse every line of the file as a `T`.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open '{}'", self.path.display()))?;

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line
                .with_context(|| format!("Cannot read line {} of '{}'", idx + 1, self.path.display()))?;
            let record = serde_json::from_str::<T>(&line).with_context(|| {
                format!("Malformed record on line {} of '{}'", idx + 1, self.path.display())
            })?;
            records.push(record);
        }

        tracing::debug!("Loaded {} records from '{}'", records.len(), self.path.display());
        Ok(records)
    }
}

/// Load a reformatted (instruction / input / output) dataset.
pub fn load_formatted(path: impl AsRef<Path>) -> Result<Vec<FormattedExample>> {
    JsonlLoader::new(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::example::RawExample;
    use std::fs;

    #[test]
    fn test_loads_every_line() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.jsonl");
        fs::write(
            &path,
            "{\"text\":\"a\",\"entity\":\"b\",\"fine_grained_role\":\"Spy\"}\n\
             {\"text\":\"c\",\"entity\":\"d\",\"fine_grained_role\":\"Victim\"}\n",
        )
        .unwrap();

        let rows: Vec<RawExample> = JsonlLoader::new(&path).load().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].fine_grained_role, "Victim");
    }

    #[test]
    fn test_error_names_line_number() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.jsonl");
        fs::write(
            &path,
            "{\"text\":\"a\",\"entity\":\"b\",\"fine_grained_role\":\"Spy\"}\nnot json\n",
        )
        .unwrap();

        let err = JsonlLoader::new(&path).load::<RawExample>().unwrap_err();
        assert!(format!("{err}").contains("line 2"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_formatted(dir.path().join("absent.jsonl")).is_err());
    }
}
