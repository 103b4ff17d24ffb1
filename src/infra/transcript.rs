// ============================================================
// Layer 6 — Result Transcript
// ============================================================
// Appends each generated completion, followed by a newline, to a
// plain-text transcript (result_epoch_auto.txt by default).
//
// The file is opened in append mode and closed again on every call,
// so every completion written before a failure is already on disk.

use anyhow::{Context, Result};
use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

pub struct TranscriptWriter {
    path: PathBuf,
}

impl TranscriptWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, text: &str) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Cannot open transcript '{}'", self.path.display()))?;
        f.write_all(text.as_bytes())?;
        f.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_appends_one_line_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let t   = TranscriptWriter::new(dir.path().join("result_epoch_auto.txt"));
        t.append("Victim").unwrap();
        t.append("Peacemaker Guardian").unwrap();
        assert_eq!(fs::read_to_string(t.path()).unwrap(), "Victim\nPeacemaker Guardian\n");
    }

    #[test]
    fn test_keeps_existing_content() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("result_epoch_auto.txt");
        fs::write(&path, "earlier run\n").unwrap();
        TranscriptWriter::new(&path).append("Spy").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "earlier run\nSpy\n");
    }
}
