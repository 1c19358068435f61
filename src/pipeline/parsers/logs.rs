use alloy_primitives::{Address, B256, Bytes};

use crate::abi::SignatureTable;
use crate::models::datasets::logs::{ClassifiedLog, LogRecord, LogRow};
use crate::models::errors::RecordError;

pub fn parse_json_line(line: &str) -> Result<LogRow, serde_json::Error> {
    serde_json::from_str(line)
}

pub trait LogParser {
    fn parse_log_record(self) -> Result<LogRecord, RecordError>;
    fn classify(self, signatures: &SignatureTable) -> Result<ClassifiedLog, RecordError>;
}

impl LogParser for LogRow {
    fn parse_log_record(self) -> Result<LogRecord, RecordError> {
        let topics = self
            .topics
            .0
            .iter()
            .map(|topic| parse_b256(topic, "topics"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LogRecord {
            log_index: self.log_index,
            transaction_hash: parse_b256(&self.transaction_hash, "transaction_hash")?,
            transaction_index: self.transaction_index,
            address: parse_address(&self.address)?,
            data: parse_bytes(&self.data)?,
            topics,
            block_timestamp: self.block_timestamp,
            block_number: self.block_number,
            block_hash: parse_b256(&self.block_hash, "block_hash")?,
        })
    }

    // Rows that already carry an event name (written by an earlier classify pass) keep it
    fn classify(self, signatures: &SignatureTable) -> Result<ClassifiedLog, RecordError> {
        let tagged = self.event.clone();
        let record = self.parse_log_record()?;
        let event = match tagged {
            Some(event) => event,
            None => signatures.classify(&record.topics).to_string(),
        };
        Ok(ClassifiedLog { record, event })
    }
}

fn parse_b256(value: &str, field: &'static str) -> Result<B256, RecordError> {
    value.trim().parse::<B256>().map_err(|_| RecordError::InvalidHex {
        field,
        value: value.to_string(),
    })
}

fn parse_address(value: &str) -> Result<Address, RecordError> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|_| RecordError::InvalidHex {
            field: "address",
            value: value.to_string(),
        })
}

fn parse_bytes(value: &str) -> Result<Bytes, RecordError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "0x" {
        return Ok(Bytes::new());
    }
    trimmed.parse::<Bytes>().map_err(|_| RecordError::InvalidHex {
        field: "data",
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::datasets::logs::{Topics, UNKNOWN_EVENT};
    use alloy_json_abi::JsonAbi;

    const TRANSFER_TOPIC: &str =
        "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

    fn row(topics: Vec<String>) -> LogRow {
        LogRow {
            log_index: 1,
            transaction_hash: format!("0x{}", "ab".repeat(32)),
            transaction_index: 0,
            address: format!("0x{}", "cd".repeat(20)),
            data: format!("0x{}", "00".repeat(31) + "05"),
            topics: Topics(topics),
            block_timestamp: "2021-01-01 00:00:00 UTC".to_string(),
            block_number: 100,
            block_hash: format!("0x{}", "ef".repeat(32)),
            event: None,
        }
    }

    #[test]
    fn test_parse_log_record() {
        let record = row(vec![TRANSFER_TOPIC.to_string()]).parse_log_record().unwrap();
        assert_eq!(record.topics.len(), 1);
        assert_eq!(record.data.len(), 32);
        assert_eq!(record.address, Address::repeat_byte(0xcd));
        assert_eq!(record.block_number, 100);
    }

    #[test]
    fn test_parse_rejects_bad_hex() {
        let mut bad = row(vec![TRANSFER_TOPIC.to_string()]);
        bad.transaction_hash = "0x1234".to_string();
        assert!(matches!(
            bad.parse_log_record(),
            Err(RecordError::InvalidHex { field: "transaction_hash", .. })
        ));

        let bad = row(vec!["0xnothex".to_string()]);
        assert!(matches!(
            bad.parse_log_record(),
            Err(RecordError::InvalidHex { field: "topics", .. })
        ));
    }

    #[test]
    fn test_empty_data() {
        let mut empty = row(vec![]);
        empty.data = "0x".to_string();
        assert!(empty.parse_log_record().unwrap().data.is_empty());
    }

    #[test]
    fn test_classify_uses_existing_tag() {
        let abi: JsonAbi = serde_json::from_str(
            r#"[{"type":"event","name":"Transfer","anonymous":false,"inputs":[
            {"name":"from","type":"address","indexed":true},
            {"name":"to","type":"address","indexed":true},
            {"name":"value","type":"uint256","indexed":false}]}]"#,
        )
        .unwrap();
        let table = SignatureTable::from_abi(&abi);

        let classified = row(vec![TRANSFER_TOPIC.to_string()]).classify(&table).unwrap();
        assert_eq!(classified.event, "Transfer");

        let classified = row(vec![format!("0x{}", "11".repeat(32))])
            .classify(&table)
            .unwrap();
        assert_eq!(classified.event, UNKNOWN_EVENT);

        let mut tagged = row(vec![TRANSFER_TOPIC.to_string()]);
        tagged.event = Some(UNKNOWN_EVENT.to_string());
        assert!(tagged.classify(&table).unwrap().is_unknown());
    }

    #[test]
    fn test_parse_json_line() {
        assert!(parse_json_line("{not json").is_err());
        assert!(parse_json_line(r#"{"log_index": 1}"#).is_err());
    }
}
