use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::error;

use crate::models::datasets::logs::LogRow;

// Intermediate log table (ingest / classify output)
pub struct LogTableWriter {
    path: PathBuf,
    writer: csv::Writer<BufWriter<File>>,
    rows: u64,
}

impl LogTableWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: csv::Writer::from_writer(BufWriter::new(file)),
            rows: 0,
        })
    }

    pub fn write_row(&mut self, row: &LogRow) -> Result<()> {
        self.writer
            .serialize(row)
            .with_context(|| format!("failed to write row to {}", self.path.display()))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn finish(mut self) -> Result<u64> {
        // An empty table still gets its header
        if self.rows == 0 {
            self.writer.write_record(LOG_COLUMNS)?;
        }
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(self.rows)
    }
}

pub const LOG_COLUMNS: [&str; 10] = [
    "log_index",
    "transaction_hash",
    "transaction_index",
    "address",
    "data",
    "topics",
    "block_timestamp",
    "block_number",
    "block_hash",
    "event",
];

// A window of rows read from a log table
#[derive(Debug, Default)]
pub struct LogChunk {
    pub index: u64,
    pub rows: Vec<LogRow>,
    pub malformed: u64,
}

// Reads a log table in windows of `chunk_size` rows; `None` reads the whole file at once
pub struct LogChunkReader {
    path: PathBuf,
    rows: csv::DeserializeRecordsIntoIter<File, LogRow>,
    chunk_size: Option<usize>,
    next_index: u64,
    line: u64,
    done: bool,
}

impl LogChunkReader {
    pub fn open(path: &Path, chunk_size: Option<usize>) -> Result<Self> {
        let reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open log table {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            rows: reader.into_deserialize(),
            chunk_size,
            next_index: 0,
            line: 1,
            done: false,
        })
    }
}

impl Iterator for LogChunkReader {
    type Item = LogChunk;

    fn next(&mut self) -> Option<LogChunk> {
        if self.done {
            return None;
        }

        let limit = self.chunk_size.unwrap_or(usize::MAX);
        let mut chunk = LogChunk {
            index: self.next_index,
            ..LogChunk::default()
        };
        let mut seen = 0usize;

        while seen < limit {
            let Some(result) = self.rows.next() else {
                self.done = true;
                break;
            };
            self.line += 1;
            seen += 1;
            match result {
                Ok(row) => chunk.rows.push(row),
                Err(e) => {
                    error!(
                        "Skipping malformed row {} in {}: {}",
                        self.line,
                        self.path.display(),
                        e
                    );
                    chunk.malformed += 1;
                }
            }
        }

        if seen == 0 {
            return None;
        }
        self.next_index += 1;
        Some(chunk)
    }
}
