pub mod csv;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::models::datasets::events::EventRow;

pub fn raw_log_path(output_dir: &Path, contract_name: &str, partition: Option<usize>) -> PathBuf {
    match partition {
        Some(idx) => output_dir.join(format!("{contract_name}_logs_raw_part{idx}.csv")),
        None => output_dir.join(format!("{contract_name}_logs_raw.csv")),
    }
}

pub fn classified_log_path(output_dir: &Path, contract_name: &str) -> PathBuf {
    output_dir.join(format!("{contract_name}_logs_classified.csv"))
}

pub fn event_table_path(output_dir: &Path, contract_name: &str, event: &str) -> PathBuf {
    output_dir.join(format!("{contract_name}_{event}.csv"))
}

// One CSV per event name, opened on first write and kept open for the rest of the run
pub struct EventTableWriters {
    output_dir: PathBuf,
    contract_name: String,
    overwrite: bool,
    writers: HashMap<String, ::csv::Writer<BufWriter<File>>>,
}

impl EventTableWriters {
    pub fn new(output_dir: &Path, contract_name: &str, overwrite: bool) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            contract_name: contract_name.to_string(),
            overwrite,
            writers: HashMap::new(),
        }
    }

    pub fn path_for(&self, event: &str) -> PathBuf {
        event_table_path(&self.output_dir, &self.contract_name, event)
    }

    pub fn append(&mut self, event: &str, columns: &[String], rows: &[EventRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        if !self.writers.contains_key(event) {
            let writer = self.open(event, columns)?;
            self.writers.insert(event.to_string(), writer);
        }
        let path = self.path_for(event);
        let Some(writer) = self.writers.get_mut(event) else {
            return Ok(());
        };

        for row in rows {
            writer
                .write_record(row.to_record())
                .with_context(|| format!("failed to write row to {}", path.display()))?;
        }
        debug!("Appended {} rows to {}", rows.len(), path.display());
        Ok(())
    }

    // Header only when the file is created in this run; an existing file is appended to
    // unless `overwrite` is set
    fn open(&self, event: &str, columns: &[String]) -> Result<::csv::Writer<BufWriter<File>>> {
        let path = self.path_for(event);
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;

        let append = path.exists() && !self.overwrite;
        let file = if append {
            info!("Appending {} event rows to existing {}", event, path.display());
            OpenOptions::new().append(true).open(&path)
        } else {
            info!("Writing {} event rows to {}", event, path.display());
            File::create(&path)
        }
        .with_context(|| format!("failed to open {}", path.display()))?;

        let mut writer = ::csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        if !append {
            writer
                .write_record(columns)
                .with_context(|| format!("failed to write header to {}", path.display()))?;
        }
        Ok(writer)
    }

    pub fn flush(&mut self) -> Result<()> {
        for (event, writer) in self.writers.iter_mut() {
            writer
                .flush()
                .with_context(|| format!("failed to flush {} table", event))?;
        }
        Ok(())
    }

    pub fn written_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.writers.keys().map(|e| self.path_for(e)).collect();
        paths.sort();
        paths
    }

    pub fn finish(mut self) -> Result<Vec<PathBuf>> {
        self.flush()?;
        Ok(self.written_paths())
    }
}
