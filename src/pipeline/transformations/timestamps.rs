use std::collections::HashMap;

use alloy_primitives::B256;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use crate::models::common::TimestampFormat;
use crate::models::datasets::events::{DecodedLogData, EventRow};
use crate::models::datasets::logs::LogRecord;

// BigQuery style, e.g. "2021-01-01 00:00:00 UTC" or "2021-01-01 00:00:00.123 UTC"
const BIGQUERY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub fn parse_block_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    let without_zone = trimmed
        .strip_suffix("UTC")
        .or_else(|| trimmed.strip_suffix('Z'))
        .unwrap_or(trimmed)
        .trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(without_zone, BIGQUERY_FORMAT) {
        return Some(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    trimmed
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

pub fn format_timestamp(timestamp: &DateTime<Utc>, format: TimestampFormat) -> String {
    match format {
        TimestampFormat::Date => timestamp.date_naive().format("%Y-%m-%d").to_string(),
        TimestampFormat::Unix => timestamp.timestamp().to_string(),
    }
}

// transaction hash -> rendered timestamp for one batch of records
#[derive(Debug, Default)]
pub struct TimestampTable {
    timestamps: HashMap<B256, String>,
}

impl TimestampTable {
    // First-seen value wins; logs of one transaction share one block
    pub fn from_records<'a, I>(records: I, format: TimestampFormat) -> Self
    where
        I: IntoIterator<Item = &'a LogRecord>,
    {
        let mut timestamps = HashMap::new();
        for record in records {
            if timestamps.contains_key(&record.transaction_hash) {
                continue;
            }
            match parse_block_timestamp(&record.block_timestamp) {
                Some(ts) => {
                    timestamps.insert(record.transaction_hash, format_timestamp(&ts, format));
                }
                None => warn!(
                    "Unparseable block_timestamp `{}` for transaction {:#x}",
                    record.block_timestamp, record.transaction_hash
                ),
            }
        }
        Self { timestamps }
    }

    // Inner join by transaction hash. Returns the joined rows and the number of dropped rows.
    pub fn join(&self, rows: Vec<DecodedLogData>) -> (Vec<EventRow>, u64) {
        let mut misses = 0;
        let joined = rows
            .into_iter()
            .filter_map(|decoded| match self.timestamps.get(&decoded.transaction_hash) {
                Some(ts) => Some(EventRow {
                    timestamp: ts.clone(),
                    decoded,
                }),
                None => {
                    misses += 1;
                    None
                }
            })
            .collect();
        (joined, misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};

    fn record(tx: u8, ts: &str) -> LogRecord {
        LogRecord {
            log_index: 0,
            transaction_hash: B256::repeat_byte(tx),
            transaction_index: 0,
            address: Address::ZERO,
            data: Bytes::new(),
            topics: vec![],
            block_timestamp: ts.to_string(),
            block_number: 1,
            block_hash: B256::ZERO,
        }
    }

    fn decoded(tx: u8) -> DecodedLogData {
        DecodedLogData {
            event: "Transfer".to_string(),
            args: vec![],
            transaction_hash: B256::repeat_byte(tx),
            address: Address::ZERO,
            block_hash: B256::ZERO,
            block_number: 1,
            log_index: 0,
        }
    }

    #[test]
    fn test_parse_formats() {
        let expected = DateTime::from_timestamp(1_609_459_200, 0).unwrap();
        assert_eq!(parse_block_timestamp("2021-01-01 00:00:00 UTC"), Some(expected));
        assert_eq!(parse_block_timestamp("2021-01-01 00:00:00"), Some(expected));
        assert_eq!(parse_block_timestamp("2021-01-01T00:00:00Z"), Some(expected));
        assert_eq!(parse_block_timestamp("1609459200"), Some(expected));
        assert_eq!(
            parse_block_timestamp("2021-01-01 00:00:00.500 UTC").map(|t| t.timestamp()),
            Some(1_609_459_200)
        );
        assert_eq!(parse_block_timestamp("yesterday"), None);
    }

    #[test]
    fn test_format_timestamp() {
        let ts = parse_block_timestamp("2021-03-04 12:30:00 UTC").unwrap();
        assert_eq!(format_timestamp(&ts, TimestampFormat::Date), "2021-03-04");
        assert_eq!(format_timestamp(&ts, TimestampFormat::Unix), "1614861000");
    }

    #[test]
    fn test_first_seen_wins() {
        let records = vec![
            record(1, "2021-01-01 00:00:00 UTC"),
            record(1, "2022-01-01 00:00:00 UTC"),
            record(2, "2021-06-01 00:00:00 UTC"),
        ];
        let table = TimestampTable::from_records(&records, TimestampFormat::Date);

        let (rows, misses) = table.join(vec![decoded(1), decoded(2)]);
        assert_eq!(misses, 0);
        let timestamps: Vec<&str> = rows.iter().map(|r| r.timestamp.as_str()).collect();
        assert_eq!(timestamps, vec!["2021-01-01", "2021-06-01"]);
    }

    #[test]
    fn test_join_counts_misses() {
        let records = vec![record(1, "2021-01-01 00:00:00 UTC"), record(2, "garbage")];
        let table = TimestampTable::from_records(&records, TimestampFormat::Unix);

        let (rows, misses) = table.join(vec![decoded(1), decoded(2), decoded(1)]);
        assert_eq!(rows.len(), 2);
        assert_eq!(misses, 1);
        assert!(rows.iter().all(|r| r.timestamp == "1609459200"));
    }
}
