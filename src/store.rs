//! Record store: JSONL loading, writing and line renumbering.

use log::debug;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize line {line}: {source}")]
    Serialize {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// A parsed record and its stable 1-based line id.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub data: Value,
    pub line: usize,
}

impl Entry {
    pub fn new(data: Value, line: usize) -> Self {
        Self { data, line }
    }
}

/// Load a JSONL file. Blank lines are skipped and lines that are not valid JSON
/// are dropped; ids count successfully parsed lines only.
pub fn load_jsonl(path: &Path) -> Result<Vec<Entry>, StoreError> {
    let file = File::open(path)?;
    let entries = read_jsonl(BufReader::new(file))?;
    debug!(
        "Loaded {} JSON records from {}",
        entries.len(),
        path.display()
    );
    Ok(entries)
}

/// Parse JSONL from any buffered reader.
/// Lines are read as bytes, so a line that is not UTF-8 is dropped like any
/// other invalid line instead of failing the whole load.
pub fn read_jsonl<R: BufRead>(mut reader: R) -> Result<Vec<Entry>, StoreError> {
    let mut entries = Vec::new();
    let mut dropped = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let trimmed = buf.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_slice::<Value>(trimmed) {
            Ok(data) => {
                let id = entries.len() + 1;
                entries.push(Entry::new(data, id));
            }
            Err(_) => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("Dropped {} unparsable JSONL lines", dropped);
    }
    Ok(entries)
}

/// Overwrite `path` with one compact JSON value per entry.
pub fn write_jsonl(path: &Path, entries: &[Entry]) -> Result<(), StoreError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_entries(&mut writer, entries)?;
    writer.flush()?;
    debug!("Wrote {} JSON records to {}", entries.len(), path.display());
    Ok(())
}

/// Serialize entries as JSONL into any writer.
pub fn write_entries<W: Write>(writer: &mut W, entries: &[Entry]) -> Result<(), StoreError> {
    for entry in entries {
        serde_json::to_writer(&mut *writer, &entry.data).map_err(|source| {
            StoreError::Serialize {
                line: entry.line,
                source,
            }
        })?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Reassign line ids as `1..=N` in current order.
pub fn renumber(entries: &mut [Entry]) {
    for (idx, entry) in entries.iter_mut().enumerate() {
        entry.line = idx + 1;
    }
}

/// Remove the entries whose ids are in `lines`, then renumber the survivors.
/// Returns how many entries were removed.
pub fn delete_lines(entries: &mut Vec<Entry>, lines: &BTreeSet<usize>) -> usize {
    let before = entries.len();
    entries.retain(|entry| !lines.contains(&entry.line));
    let removed = before - entries.len();
    if removed > 0 {
        renumber(entries);
    }
    removed
}
