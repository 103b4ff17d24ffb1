// ============================================================
// Layer 4 — Record Reformatter
// ============================================================
// Rewrites raw labelled examples into instruction-tuning records:
//
//   {"text": ..., "entity": ..., "fine_grained_role": ...}
//                         │
//                         ▼
//   {"instruction": <task + role catalog>,
//    "input":       "article:{text},entity:{entity},",
//    "output":      <fine_grained_role, verbatim>}
//
// Labels pass through untouched: a role outside the catalog is
// written as-is and only reported with a warning.
//
// Records are written one per line with ", " and ": " separators
// and non-ASCII text left unescaped, the same bytes Python's
// json.dumps(ensure_ascii=False) produces.
//
// The whole input is parsed before anything is written, so a
// malformed line never leaves a half-written target file.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use crate::data::loader::JsonlLoader;
use crate::domain::example::{FormattedExample, RawExample};
use crate::domain::roles::{instruction, unknown_labels};

/// Outcome of [`prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prepared {
    /// The target was (re)written with this many records
    Generated(usize),
    /// The target already existed and was left untouched
    Skipped,
}

/// serde_json's compact layout with a space after each separator.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Write `record` as one JSON line.
fn write_line<W: Write, T: Serialize>(out: &mut W, record: &T) -> Result<()> {
    let mut ser = Serializer::with_formatter(&mut *out, SpacedFormatter);
    record.serialize(&mut ser)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Map one raw example to its instruction-tuning form.
pub fn format_example(raw: &RawExample) -> FormattedExample {
    FormattedExample {
        instruction: instruction().to_string(),
        input:       FormattedExample::input_for(&raw.text, &raw.entity),
        output:      raw.fine_grained_role.clone(),
    }
}

/// Read `raw_path`, reformat every line and write the result to
/// `new_path` (overwriting it). Returns the number of records written.
pub fn transform(raw_path: impl AsRef<Path>, new_path: impl AsRef<Path>) -> Result<usize> {
    let raw_path = raw_path.as_ref();
    let new_path = new_path.as_ref();

    let raws: Vec<RawExample> = JsonlLoader::new(raw_path).load()?;

    let file = File::create(new_path)
        .with_context(|| format!("Cannot create '{}'", new_path.display()))?;
    let mut out = BufWriter::new(file);

    for (idx, raw) in raws.iter().enumerate() {
        let unseen = unknown_labels(&raw.fine_grained_role);
        if !unseen.is_empty() {
            tracing::warn!(
                "Line {} of '{}' has labels outside the role catalog: {:?}",
                idx + 1,
                raw_path.display(),
                unseen
            );
        }

        let record = format_example(raw);
        write_line(&mut out, &record)?;
    }
    out.flush()
        .with_context(|| format!("Cannot write '{}'", new_path.display()))?;

    tracing::info!(
        "Reformatted {} records: '{}' → '{}'",
        raws.len(),
        raw_path.display(),
        new_path.display()
    );
    Ok(raws.len())
}

/// Run [`transform`] unless `new_path` already exists and `force` is off.
pub fn prepare(
    raw_path: impl AsRef<Path>,
    new_path: impl AsRef<Path>,
    force:    bool,
) -> Result<Prepared> {
    let new_path = new_path.as_ref();
    if new_path.exists() && !force {
        tracing::info!("'{}' already exists, skipping reformatting", new_path.display());
        return Ok(Prepared::Skipped);
    }
    Ok(Prepared::Generated(transform(raw_path, new_path)?))
}
