use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{error, info};

use crate::abi::SignatureTable;
use crate::models::common::RunStats;
use crate::models::datasets::logs::LogRow;
use crate::pipeline::parsers::logs::parse_json_line;
use crate::storage::csv::LogTableWriter;

// Everything read from one export file
#[derive(Debug, Default)]
pub struct FileContents {
    pub rows: Vec<LogRow>,
    pub lines: u64,
    pub malformed: u64,
}

// Regular, non-hidden files of `dir` in path order
pub fn list_input_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read input directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

// `n` contiguous groups of floor(len / n) items; the last group takes the remainder
pub fn divide_into_partitions<T>(items: &[T], n: usize) -> Vec<&[T]> {
    let n = n.max(1);
    let base = items.len() / n;
    let mut parts: Vec<&[T]> = (0..n - 1).map(|i| &items[i * base..(i + 1) * base]).collect();
    parts.push(&items[(n - 1) * base..]);
    parts
}

// Calls `on_row` for every parsed line of `path`. Blank lines are ignored; lines that are
// not UTF-8 or not a JSON log are logged and counted as malformed.
fn for_each_row<F>(path: &Path, mut on_row: F) -> Result<(u64, u64)>
where
    F: FnMut(LogRow) -> Result<()>,
{
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_no = 0u64;
    let mut lines = 0;
    let mut malformed = 0;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                lines += 1;
                error!("Error parsing {} line {}: {}", path.display(), line_no, e);
                malformed += 1;
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        lines += 1;
        match parse_json_line(line) {
            Ok(row) => on_row(row)?,
            Err(e) => {
                error!("Error parsing {} line {}: {}", path.display(), line_no, e);
                malformed += 1;
            }
        }
    }
    Ok((lines, malformed))
}

pub fn read_log_file(path: &Path) -> Result<FileContents> {
    let mut rows = Vec::new();
    let (lines, malformed) = for_each_row(path, |row| {
        rows.push(row);
        Ok(())
    })?;
    Ok(FileContents {
        rows,
        lines,
        malformed,
    })
}

// Bulk mode: read every file concurrently and concatenate. Files complete in any order;
// rows of one file keep their order.
pub async fn read_all(files: &[PathBuf], workers: usize) -> Result<(Vec<LogRow>, RunStats)> {
    info!("Text files concatenation started: {} files", files.len());

    let contents: Vec<FileContents> = stream::iter(files.to_vec())
        .map(|path| async move {
            tokio::task::spawn_blocking(move || read_log_file(&path))
                .await
                .context("file reader task failed")?
        })
        .buffer_unordered(workers.max(1))
        .try_collect()
        .await?;

    let mut stats = RunStats::default();
    let mut rows = Vec::new();
    for file in contents {
        stats.files_read += 1;
        stats.lines_read += file.lines;
        stats.malformed_lines += file.malformed;
        rows.extend(file.rows);
    }
    stats.records = rows.len() as u64;
    Ok((rows, stats))
}

// Tag `event` on rows that do not carry one yet
pub fn tag_events(rows: &mut [LogRow], signatures: &SignatureTable, stats: &mut RunStats) {
    for row in rows.iter_mut() {
        let event = match &row.event {
            Some(event) => event.clone(),
            None => signatures.classify_text(&row.topics.0).to_string(),
        };
        *stats.events.entry(event.clone()).or_default() += 1;
        row.event = Some(event);
    }
}

pub fn write_rows(path: &Path, rows: &[LogRow]) -> Result<u64> {
    let mut writer = LogTableWriter::create(path)?;
    for row in rows {
        writer.write_row(row)?;
    }
    let written = writer.finish()?;
    info!("Data written to {} ({} rows)", path.display(), written);
    Ok(written)
}

// Streaming mode: one file, one line, one output row at a time
pub fn stream_to_csv(
    files: &[PathBuf],
    output: &Path,
    signatures: Option<&SignatureTable>,
) -> Result<RunStats> {
    let mut stats = RunStats::default();
    let mut writer = LogTableWriter::create(output)?;

    for path in files {
        let (lines, malformed) = for_each_row(path, |mut row| {
            if let Some(signatures) = signatures {
                let event = signatures.classify_text(&row.topics.0).to_string();
                *stats.events.entry(event.clone()).or_default() += 1;
                row.event = Some(event);
            }
            writer.write_row(&row)
        })?;
        stats.files_read += 1;
        stats.lines_read += lines;
        stats.malformed_lines += malformed;
        info!("Processed {} ({} lines)", path.display(), lines);
    }

    stats.records = writer.rows();
    let written = writer.finish()?;
    info!("Data written to {} ({} rows)", output.display(), written);
    Ok(stats)
}
