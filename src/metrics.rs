use std::sync::Arc;
use tracing::{error, info};

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, MeterProvider};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;

use crate::models::common::RunStats;

pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,
    pub contract_name: String,

    // Ingest metrics
    pub files_read: Counter<u64>,
    pub lines_read: Counter<u64>,
    pub malformed_lines: Counter<u64>,

    // Classification metrics
    pub records_classified: Counter<u64>,
    pub unknown_records: Counter<u64>,

    // Decode metrics
    pub rows_written: Counter<u64>,
    pub decode_failures: Counter<u64>,
    pub join_misses: Counter<u64>,
    pub chunks_processed: Counter<u64>,
    pub chunk_processing_time: Gauge<f64>,
}

impl Metrics {
    pub fn new(contract_name: String) -> Result<Self, MetricError> {
        let registry = prometheus::Registry::new();

        // Configure OpenTelemetry to use this registry
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("log_etl_metrics");

        let files_read = meter
            .u64_counter("log_etl_files_read")
            .with_description("Number of input files read")
            .build();

        let lines_read = meter
            .u64_counter("log_etl_lines_read")
            .with_description("Number of input lines read")
            .build();

        let malformed_lines = meter
            .u64_counter("log_etl_malformed_lines")
            .with_description("Input lines or rows skipped because they could not be parsed")
            .build();

        let records_classified = meter
            .u64_counter("log_etl_records_classified")
            .with_description("Log records tagged with an event name")
            .build();

        let unknown_records = meter
            .u64_counter("log_etl_unknown_records")
            .with_description("Log records whose signature is not in the ABI")
            .build();

        let rows_written = meter
            .u64_counter("log_etl_rows_written")
            .with_description("Decoded rows written to event tables")
            .build();

        let decode_failures = meter
            .u64_counter("log_etl_decode_failures")
            .with_description("Classified records that failed to decode")
            .build();

        let join_misses = meter
            .u64_counter("log_etl_join_misses")
            .with_description("Decoded rows dropped for lack of a block timestamp")
            .build();

        let chunks_processed = meter
            .u64_counter("log_etl_chunks_processed")
            .with_description("Row windows processed")
            .build();

        let chunk_processing_time = meter
            .f64_gauge("log_etl_chunk_processing_seconds")
            .with_description("Time spent processing the latest chunk")
            .with_unit("s")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            contract_name,
            files_read,
            lines_read,
            malformed_lines,
            records_classified,
            unknown_records,
            rows_written,
            decode_failures,
            join_misses,
            chunks_processed,
            chunk_processing_time,
        })
    }

    fn labels(&self) -> [KeyValue; 1] {
        [KeyValue::new("contract", self.contract_name.clone())]
    }

    // Add the counters of one stage (or one chunk) to the exported totals
    pub fn record_stats(&self, stats: &RunStats) {
        let labels = self.labels();
        self.files_read.add(stats.files_read, &labels);
        self.lines_read.add(stats.lines_read, &labels);
        self.malformed_lines
            .add(stats.malformed_lines + stats.malformed_records, &labels);
        self.unknown_records.add(stats.unknown_records, &labels);
        self.decode_failures.add(stats.decode_failures, &labels);
        self.join_misses.add(stats.join_misses, &labels);
        self.chunks_processed.add(stats.chunks, &labels);

        for (event, count) in &stats.events {
            self.records_classified.add(
                *count,
                &[
                    KeyValue::new("contract", self.contract_name.clone()),
                    KeyValue::new("event", event.clone()),
                ],
            );
        }
        for (event, count) in &stats.decoded_rows {
            self.rows_written.add(
                *count,
                &[
                    KeyValue::new("contract", self.contract_name.clone()),
                    KeyValue::new("event", event.clone()),
                ],
            );
        }
    }

    pub fn record_chunk_time(&self, seconds: f64) {
        self.chunk_processing_time.record(seconds, &self.labels());
    }

    pub fn render(&self) -> Result<String> {
        render_registry(&self.registry)
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> Result<()> {
        let addr = format!("{addr}:{port}")
            .parse::<SocketAddr>()
            .context("invalid metrics address")?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Determine the access URL based on the binding address. Only used for logging.
        let access_url = if addr.ip().is_unspecified() {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics server to {}", addr))?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server stopped: {}", e);
            }
        });
        Ok(())
    }
}

fn render_registry(registry: &prometheus::Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .context("failed to encode metrics")?;
    String::from_utf8(buffer).context("metrics are not valid UTF-8")
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> String {
    match render_registry(&registry) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_stats_exports_counters() {
        let metrics = Metrics::new("aave".to_string()).unwrap();

        let mut stats = RunStats::default();
        stats.unknown_records = 3;
        stats.join_misses = 1;
        stats.decoded_rows.insert("Transfer".to_string(), 2);
        metrics.record_stats(&stats);

        let body = metrics.render().unwrap();
        assert!(body.contains("log_etl_unknown_records"));
        assert!(body.contains("log_etl_rows_written"));
        assert!(body.contains("Transfer"));
    }
}
