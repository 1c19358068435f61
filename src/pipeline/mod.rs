pub mod ingest;
pub mod parsers;
pub mod transformations;
pub mod workers;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::Address;
use anyhow::{Context, Result, anyhow};
use tracing::{error, info, warn};

use crate::abi::{AbiSource, SignatureTable};
use crate::metrics::Metrics;
use crate::models::common::{Config, DecodeFailurePolicy, IngestMode, RunStats};
use crate::models::datasets::events::DecodedLogData;
use crate::models::datasets::logs::{ClassifiedLog, LogRecord, LogRow, UNKNOWN_EVENT};
use crate::models::errors::{DecodeError, RecordError};
use crate::pipeline::parsers::logs::LogParser;
use crate::pipeline::transformations::logs::{LogTransformer, event_columns};
use crate::pipeline::transformations::timestamps::TimestampTable;
use crate::storage::csv::{LogChunkReader, LogTableWriter};
use crate::storage::{EventTableWriters, classified_log_path, raw_log_path};

#[derive(Debug, Default)]
pub struct StageReport {
    pub stats: RunStats,
    pub outputs: Vec<PathBuf>,
}

// Per-run decode state shared by every chunk
struct DecodeState {
    writers: EventTableWriters,
    columns: HashMap<String, Vec<String>>,
    skipped_events: HashSet<String>,
}

pub struct Pipeline {
    config: Config,
    abi_source: AbiSource,
    metrics: Option<Arc<Metrics>>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let abi_source = AbiSource::new(config.abi.clone());
        Ok(Self {
            config,
            abi_source,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn signatures(&self, fallback: Option<Address>) -> Result<Arc<SignatureTable>> {
        let abi = self.abi_source.resolve(fallback).await?;
        let table = SignatureTable::from_abi(&abi);
        if table.is_empty() {
            warn!("ABI has no events; every record will be classified as {}", UNKNOWN_EVENT);
        }
        info!("Signature table built with {} events", table.len());
        Ok(Arc::new(table))
    }

    fn input_files(&self) -> Result<Vec<PathBuf>> {
        let input_dir = self
            .config
            .input_dir
            .as_ref()
            .ok_or_else(|| anyhow!("input_dir is required for ingest"))?;
        let files = ingest::list_input_files(input_dir)?;
        if files.is_empty() {
            warn!("No input files found in {}", input_dir.display());
        }
        Ok(files)
    }

    fn raw_output_paths(&self) -> Vec<PathBuf> {
        let partitions = self.config.num_partitions;
        if partitions == 1 {
            return vec![raw_log_path(
                &self.config.output_dir,
                &self.config.contract_name,
                None,
            )];
        }
        (1..=partitions)
            .map(|idx| raw_log_path(&self.config.output_dir, &self.config.contract_name, Some(idx)))
            .collect()
    }

    // Tables the decode stage reads: the classified table if present, else the raw ones
    fn log_tables(&self) -> Result<Vec<PathBuf>> {
        let classified = classified_log_path(&self.config.output_dir, &self.config.contract_name);
        if classified.exists() {
            return Ok(vec![classified]);
        }
        self.raw_tables()
    }

    // Whatever ingest left behind: one table, or part1.. up to the first missing part
    fn raw_tables(&self) -> Result<Vec<PathBuf>> {
        let single = raw_log_path(&self.config.output_dir, &self.config.contract_name, None);
        if single.exists() {
            return Ok(vec![single]);
        }

        let parts: Vec<PathBuf> = (1..)
            .map(|idx| raw_log_path(&self.config.output_dir, &self.config.contract_name, Some(idx)))
            .take_while(|path| path.exists())
            .collect();
        if parts.is_empty() {
            return Err(anyhow!(
                "no log tables for `{}` found in {}; run ingest first",
                self.config.contract_name,
                self.config.output_dir.display()
            ));
        }
        Ok(parts)
    }

    fn finish_stage(&self, stage: &str, stats: &RunStats) {
        stats.log_summary(stage);
        if let Some(metrics) = &self.metrics {
            metrics.record_stats(stats);
        }
    }

    ////////////////////////////////////// Ingest //////////////////////////////////////
    pub async fn ingest(&self) -> Result<StageReport> {
        let report = self.ingest_tables().await?;
        self.finish_stage("Ingest", &report.stats);
        Ok(report)
    }

    async fn ingest_tables(&self) -> Result<StageReport> {
        let files = self.input_files()?;
        let outputs = self.raw_output_paths();

        // Inline classification only when the ABI can be found without reading any record
        let signatures = if self.abi_source.is_configured() {
            Some(self.signatures(None).await?)
        } else {
            info!("No ABI configured; ingest writes unclassified rows");
            None
        };

        // Tables from an earlier ingest with another partition layout, and the classified
        // table derived from them, would shadow this run's output
        let mut stale = self.raw_tables().unwrap_or_default();
        stale.push(classified_log_path(&self.config.output_dir, &self.config.contract_name));
        for path in stale.iter().filter(|p| p.exists() && !outputs.contains(*p)) {
            info!("Removing stale {}", path.display());
            std::fs::remove_file(path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }

        let mut stats = RunStats::default();
        match self.config.mode {
            IngestMode::Bulk => {
                let (mut rows, read_stats) =
                    ingest::read_all(&files, self.config.worker_count()).await?;
                stats.merge(read_stats);
                if let Some(signatures) = &signatures {
                    ingest::tag_events(&mut rows, signatures, &mut stats);
                }
                for (path, part) in outputs
                    .iter()
                    .zip(ingest::divide_into_partitions(&rows, outputs.len()))
                {
                    ingest::write_rows(path, part)?;
                }
            }
            IngestMode::Streaming => {
                for (idx, (path, part)) in outputs
                    .iter()
                    .zip(ingest::divide_into_partitions(&files, outputs.len()))
                    .enumerate()
                {
                    info!("Processing {} files for partition {}", part.len(), idx + 1);
                    let part_stats = ingest::stream_to_csv(part, path, signatures.as_deref())?;
                    stats.merge(part_stats);
                }
            }
        }

        stats.unknown_records = stats.events.get(UNKNOWN_EVENT).copied().unwrap_or(0);
        Ok(StageReport { stats, outputs })
    }

    ///////////////////////////////////// Classify /////////////////////////////////////
    pub async fn classify(&self) -> Result<StageReport> {
        let tables = self.raw_tables()?;
        let output = classified_log_path(&self.config.output_dir, &self.config.contract_name);

        let mut stats = RunStats::default();
        let mut signatures: Option<Arc<SignatureTable>> = None;
        let mut writer = LogTableWriter::create(&output)?;

        for table in &tables {
            info!("Classifying {}", table.display());
            for chunk in LogChunkReader::open(table, self.config.chunk_size)? {
                stats.chunks += 1;
                stats.malformed_lines += chunk.malformed;
                if signatures.is_none() && !chunk.rows.is_empty() {
                    let fallback = chunk.rows[0].address.trim().parse::<Address>().ok();
                    signatures = Some(self.signatures(fallback).await?);
                }
                let Some(sig_table) = signatures.as_deref() else {
                    continue;
                };

                let mut rows = chunk.rows;
                // Re-classify from scratch: tags from an earlier run may come from another ABI
                for row in rows.iter_mut() {
                    row.event = None;
                }
                ingest::tag_events(&mut rows, sig_table, &mut stats);
                for row in &rows {
                    writer.write_row(row)?;
                }
                stats.records += rows.len() as u64;
            }
        }

        stats.unknown_records = stats.events.get(UNKNOWN_EVENT).copied().unwrap_or(0);
        writer.finish()?;
        info!("Classified rows written to {}", output.display());

        self.finish_stage("Classify", &stats);
        Ok(StageReport {
            stats,
            outputs: vec![output],
        })
    }

    ////////////////////////////////////// Decode //////////////////////////////////////
    pub async fn decode(&self) -> Result<StageReport> {
        let tables = self.log_tables()?;
        let report = self.decode_tables(&tables).await?;
        self.finish_stage("Decode", &report.stats);
        Ok(report)
    }

    async fn decode_tables(&self, tables: &[PathBuf]) -> Result<StageReport> {
        let mut stats = RunStats::default();
        let mut state = self.decode_state();
        let mut signatures: Option<Arc<SignatureTable>> = None;

        for table in tables {
            info!("Parsing {} logs from {}", self.config.contract_name, table.display());
            for chunk in LogChunkReader::open(table, self.config.chunk_size)? {
                let started = Instant::now();
                stats.malformed_lines += chunk.malformed;
                if chunk.rows.is_empty() {
                    continue;
                }
                if signatures.is_none() {
                    let fallback = chunk.rows[0].address.trim().parse::<Address>().ok();
                    signatures = Some(self.signatures(fallback).await?);
                }
                let Some(sig_table) = &signatures else {
                    continue;
                };

                let index = chunk.index;
                let chunk_stats = self
                    .process_rows(chunk.rows, Arc::clone(sig_table), &mut state)
                    .await
                    .with_context(|| format!("failed to process chunk {}", index))?;
                stats.merge(chunk_stats);
                stats.chunks += 1;
                state.writers.flush()?;
                self.record_chunk_time(started);
                info!("Chunk {} processed", index);
                // The chunk's rows are dropped here, before the next window is read
            }
        }

        let outputs = state.writers.finish()?;
        Ok(StageReport { stats, outputs })
    }

    /////////////////////////////////////// Run ////////////////////////////////////////
    pub async fn run(&self) -> Result<StageReport> {
        match self.config.mode {
            IngestMode::Streaming => {
                let ingest = self.ingest_tables().await?;
                ingest.stats.log_summary("Ingest");
                let mut report = self.decode_tables(&ingest.outputs).await?;
                let mut stats = ingest.stats;
                // Decode classifies the same records again; keep only its counts
                stats.records = 0;
                stats.events.clear();
                stats.unknown_records = 0;
                stats.merge(report.stats);
                report.stats = stats;
                self.finish_stage("Run", &report.stats);
                Ok(report)
            }
            IngestMode::Bulk => self.run_in_memory().await,
        }
    }

    // Bulk mode hands the in-memory table straight to decode
    async fn run_in_memory(&self) -> Result<StageReport> {
        let files = self.input_files()?;
        let (rows, read_stats) = ingest::read_all(&files, self.config.worker_count()).await?;

        let mut stats = RunStats::default();
        stats.files_read = read_stats.files_read;
        stats.lines_read = read_stats.lines_read;
        stats.malformed_lines = read_stats.malformed_lines;

        let fallback = rows
            .first()
            .and_then(|row| row.address.trim().parse::<Address>().ok());
        let signatures = self.signatures(fallback).await?;
        let mut state = self.decode_state();

        let chunk_size = self.config.chunk_size.unwrap_or(usize::MAX);
        let mut rows = rows.into_iter().peekable();
        let mut index = 0u64;
        while rows.peek().is_some() {
            let started = Instant::now();
            let chunk: Vec<LogRow> = rows.by_ref().take(chunk_size).collect();
            let chunk_stats = self
                .process_rows(chunk, Arc::clone(&signatures), &mut state)
                .await
                .with_context(|| format!("failed to process chunk {}", index))?;
            stats.merge(chunk_stats);
            stats.chunks += 1;
            state.writers.flush()?;
            self.record_chunk_time(started);
            index += 1;
        }

        let outputs = state.writers.finish()?;
        self.finish_stage("Run", &stats);
        Ok(StageReport { stats, outputs })
    }

    fn decode_state(&self) -> DecodeState {
        DecodeState {
            writers: EventTableWriters::new(
                &self.config.output_dir,
                &self.config.contract_name,
                self.config.overwrite,
            ),
            columns: HashMap::new(),
            skipped_events: HashSet::new(),
        }
    }

    fn record_chunk_time(&self, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_chunk_time(started.elapsed().as_secs_f64());
        }
    }

    // Classify -> decode -> flatten -> join -> append, for one window of rows
    async fn process_rows(
        &self,
        rows: Vec<LogRow>,
        signatures: Arc<SignatureTable>,
        state: &mut DecodeState,
    ) -> Result<RunStats> {
        let mut stats = RunStats::default();
        let workers = self.config.worker_count();

        let classify_table = Arc::clone(&signatures);
        let classified: Vec<Result<ClassifiedLog, RecordError>> =
            workers::parallel_map(rows, workers, move |slice: Vec<LogRow>| {
                slice
                    .into_iter()
                    .map(|row| row.classify(&classify_table))
                    .collect()
            })
            .await?;

        let mut groups: BTreeMap<String, Vec<LogRecord>> = BTreeMap::new();
        for result in classified {
            let log = match result {
                Ok(log) => log,
                Err(e) => {
                    error!("Skipping malformed record: {}", e);
                    stats.malformed_records += 1;
                    continue;
                }
            };
            stats.records += 1;
            *stats.events.entry(log.event.clone()).or_default() += 1;

            if log.is_unknown() {
                stats.unknown_records += 1;
                continue;
            }
            if !self.config.events.is_empty() && !self.config.events.contains(&log.event) {
                stats.filtered_records += 1;
                continue;
            }
            if state.skipped_events.contains(&log.event) {
                stats.decode_failures += 1;
                continue;
            }
            groups.entry(log.event).or_default().push(log.record);
        }

        let timestamps =
            TimestampTable::from_records(groups.values().flatten(), self.config.timestamp_format);

        for (event, records) in groups {
            let count = records.len() as u64;
            let decoded = match self.decode_group(&event, records, &signatures, workers).await? {
                GroupOutcome::Decoded { rows, failures } => {
                    stats.decode_failures += failures;
                    rows
                }
                GroupOutcome::Skipped => {
                    state.skipped_events.insert(event.clone());
                    stats.decode_failures += count;
                    continue;
                }
            };

            let (rows, misses) = timestamps.join(decoded);
            if misses > 0 {
                warn!(
                    "{} {} rows dropped: no block timestamp for their transaction",
                    misses, event
                );
                stats.join_misses += misses;
            }
            if rows.is_empty() {
                continue;
            }

            let timestamp_column = self.config.timestamp_format.column_name();
            let columns = match state.columns.get(&event) {
                Some(columns) => columns.clone(),
                None => {
                    let Some(entry) = signatures.by_name(&event) else {
                        continue;
                    };
                    let columns = event_columns(&entry.event, timestamp_column);
                    state.columns.insert(event.clone(), columns.clone());
                    columns
                }
            };

            state.writers.append(&event, &columns, &rows)?;
            *stats.decoded_rows.entry(event.clone()).or_default() += rows.len() as u64;
            info!("{} event: {} rows saved", event, rows.len());
        }

        Ok(stats)
    }

    // Decode one event group and apply the configured failure policy
    async fn decode_group(
        &self,
        event: &str,
        records: Vec<LogRecord>,
        signatures: &SignatureTable,
        workers: usize,
    ) -> Result<GroupOutcome> {
        let policy = self.config.decode_failure;

        let Some(entry) = signatures.by_name(event).cloned() else {
            let err = DecodeError::UnknownEvent {
                event: event.to_string(),
            };
            return match policy {
                DecodeFailurePolicy::Abort => Err(err.into()),
                DecodeFailurePolicy::SkipRow => {
                    warn!("{}; dropping {} rows", err, records.len());
                    Ok(GroupOutcome::Decoded {
                        rows: Vec::new(),
                        failures: records.len() as u64,
                    })
                }
                DecodeFailurePolicy::SkipEvent => {
                    warn!("{}; skipping the event for the rest of the run", err);
                    Ok(GroupOutcome::Skipped)
                }
            };
        };

        info!("Parsing {} event: {} rows", event, records.len());
        let results = workers::parallel_map(records, workers, move |slice: Vec<LogRecord>| {
            slice.transform_logs(&entry)
        })
        .await?;

        let mut rows: Vec<DecodedLogData> = Vec::with_capacity(results.len());
        let mut failures = 0u64;
        for result in results {
            match result {
                Ok(row) => rows.push(row),
                Err(e) => match policy {
                    DecodeFailurePolicy::Abort => return Err(e.into()),
                    DecodeFailurePolicy::SkipRow => {
                        warn!("Skipping row: {}", e);
                        failures += 1;
                    }
                    DecodeFailurePolicy::SkipEvent => {
                        warn!("{}; skipping {} for the rest of the run", e, event);
                        return Ok(GroupOutcome::Skipped);
                    }
                },
            }
        }

        Ok(GroupOutcome::Decoded { rows, failures })
    }
}

enum GroupOutcome {
    Decoded { rows: Vec<DecodedLogData>, failures: u64 },
    Skipped,
}
