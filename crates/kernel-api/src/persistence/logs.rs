//! Tick and audit logs as zstd-compressed JSON lines, one segment per snapshot interval.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use kernel_core::{AuditEntry, StepOutcome, TickLogEntry};
use serde::de::DeserializeOwned;
use tracing::warn;
use zstd::stream::{Decoder, Encoder};

use super::{segment_file_name, WorldPaths};
use crate::Result;

pub const EVENTS_PREFIX: &str = "events";
pub const AUDIT_PREFIX: &str = "audit";

const ZSTD_LEVEL: i32 = 1;

struct Segment {
    path: PathBuf,
    encoder: Encoder<'static, BufWriter<File>>,
}

/// Appends lines to the open segment; the next write after [`rotate`](Self::rotate)
/// opens a new one named by that write's tick.
pub struct SegmentWriter {
    dir: PathBuf,
    prefix: &'static str,
    current: Option<Segment>,
}

impl SegmentWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: &'static str) -> Self {
        Self {
            dir: dir.into(),
            prefix,
            current: None,
        }
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|segment| segment.path.as_path())
    }

    pub fn write_line(&mut self, tick: u64, line: &str) -> Result<()> {
        if self.current.is_none() {
            std::fs::create_dir_all(&self.dir)?;
            let path = self.dir.join(segment_file_name(self.prefix, tick));
            let file = BufWriter::new(File::create(&path)?);
            let encoder = Encoder::new(file, ZSTD_LEVEL)?;
            self.current = Some(Segment { path, encoder });
        }
        if let Some(segment) = self.current.as_mut() {
            segment.encoder.write_all(line.as_bytes())?;
            segment.encoder.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Finishes the open segment so it decodes as a complete stream.
    pub fn rotate(&mut self) -> Result<Option<PathBuf>> {
        let Some(segment) = self.current.take() else {
            return Ok(None);
        };
        let mut file = segment.encoder.finish()?;
        file.flush()?;
        Ok(Some(segment.path))
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Err(err) = self.rotate() {
            warn!(dir = %self.dir.display(), error = %err, "log segment close failed");
        }
    }
}

/// Both per-world logs, rotated together.
pub struct WorldLogs {
    events: SegmentWriter,
    audit: SegmentWriter,
}

impl WorldLogs {
    pub fn new(paths: &WorldPaths) -> Self {
        Self {
            events: SegmentWriter::new(paths.events_dir(), EVENTS_PREFIX),
            audit: SegmentWriter::new(paths.audit_dir(), AUDIT_PREFIX),
        }
    }

    pub fn append(&mut self, outcome: &StepOutcome) -> Result<()> {
        self.events
            .write_line(outcome.tick, &outcome.log.to_sorted_line()?)?;
        for entry in &outcome.audit {
            self.audit.write_line(entry.tick, &entry.to_sorted_line()?)?;
        }
        Ok(())
    }

    pub fn rotate(&mut self) -> Result<()> {
        self.events.rotate()?;
        self.audit.rotate()?;
        Ok(())
    }
}

/// Segment files in `dir` for `prefix`, oldest first.
pub fn segment_paths(dir: impl AsRef<Path>, prefix: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let head = format!("{prefix}-");
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(&head) && name.ends_with(".jsonl.zst"))
            .unwrap_or(false);
        if matches {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn read_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let reader = BufReader::new(Decoder::new(File::open(path.as_ref())?)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}

/// Every tick log entry under `dir`, in tick order.
pub fn read_tick_log_dir(dir: impl AsRef<Path>) -> Result<Vec<TickLogEntry>> {
    let mut entries = Vec::new();
    for path in segment_paths(dir, EVENTS_PREFIX)? {
        entries.extend(read_jsonl::<TickLogEntry>(&path)?);
    }
    entries.sort_by_key(|entry| entry.tick);
    Ok(entries)
}

/// Every audit row under `dir`, in `(tick, seq)` order.
pub fn read_audit_dir(dir: impl AsRef<Path>) -> Result<Vec<AuditEntry>> {
    let mut entries = Vec::new();
    for path in segment_paths(dir, AUDIT_PREFIX)? {
        entries.extend(read_jsonl::<AuditEntry>(&path)?);
    }
    entries.sort_by_key(|entry| (entry.tick, entry.seq));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;

    fn entry(tick: u64) -> TickLogEntry {
        TickLogEntry {
            tick,
            digest: format!("d{tick}"),
            ..TickLogEntry::default()
        }
    }

    #[test]
    fn rotation_starts_segments_named_by_first_tick() {
        let dir = temp_dir("segments");
        let mut writer = SegmentWriter::new(&dir, EVENTS_PREFIX);
        for tick in 1..=3 {
            writer
                .write_line(tick, &entry(tick).to_sorted_line().expect("line"))
                .expect("write");
        }
        let first = writer.rotate().expect("rotate").expect("segment");
        assert!(first.ends_with("events-000000000001.jsonl.zst"));
        writer
            .write_line(4, &entry(4).to_sorted_line().expect("line"))
            .expect("write");
        drop(writer);

        let paths = segment_paths(&dir, EVENTS_PREFIX).expect("list");
        assert_eq!(paths.len(), 2);
        assert!(paths[1].ends_with("events-000000000004.jsonl.zst"));
        let ticks: Vec<u64> = read_tick_log_dir(&dir)
            .expect("read")
            .iter()
            .map(|e| e.tick)
            .collect();
        assert_eq!(ticks, vec![1, 2, 3, 4]);
    }

    #[test]
    fn missing_directory_reads_as_empty() {
        let dir = temp_dir("segments-missing").join("nope");
        assert!(read_audit_dir(&dir).expect("read").is_empty());
    }
}
