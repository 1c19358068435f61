use std::fmt;

use alloy_primitives::{Address, B256, Bytes};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

pub const UNKNOWN_EVENT: &str = "Unknown";

////////////////////////////////////// Raw Data ////////////////////////////////////////
// One line of an export file, or one row of an intermediate log CSV. Every field stays
// textual so a well formed line is never rejected before it is written back out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRow {
    #[serde(deserialize_with = "lenient_u64")]
    pub log_index: u64,
    pub transaction_hash: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub transaction_index: u64,
    pub address: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub topics: Topics,
    pub block_timestamp: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub block_number: u64,
    pub block_hash: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub event: Option<String>,
}

// Topics accept a JSON array, a JSON encoded array string, or a Python list repr
// (`['0x..', '0x..']`). They are always written back as a JSON array string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topics(pub Vec<String>);

impl Topics {
    pub fn parse_text(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Some(Self::default());
        }
        if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
            return Some(Self(list));
        }
        // Python repr uses single quotes, hex topics never contain quotes themselves
        let normalized = trimmed.replace('\'', "\"");
        serde_json::from_str::<Vec<String>>(&normalized)
            .ok()
            .map(Self)
    }
}

impl Serialize for Topics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(&self.0).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

impl<'de> Deserialize<'de> for Topics {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TopicsVisitor;

        impl<'de> Visitor<'de> for TopicsVisitor {
            type Value = Topics;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a list of hex topics or its string encoding")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Topics, A::Error> {
                let mut topics = Vec::new();
                while let Some(topic) = seq.next_element::<String>()? {
                    topics.push(topic);
                }
                Ok(Topics(topics))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Topics, E> {
                Topics::parse_text(value)
                    .ok_or_else(|| E::custom(format!("invalid topics value: {value}")))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Topics, E> {
                Ok(Topics::default())
            }

            fn visit_none<E: de::Error>(self) -> Result<Topics, E> {
                Ok(Topics::default())
            }
        }

        deserializer.deserialize_any(TopicsVisitor)
    }
}

// BigQuery exports INT64 columns as JSON strings
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    struct U64Visitor;

    impl Visitor<'_> for U64Visitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an unsigned integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| E::custom(format!("negative value: {value}")))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| E::custom(format!("not an unsigned integer: {value}")))
        }
    }

    deserializer.deserialize_any(U64Visitor)
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/////////////////////////////////// Parsed Data ///////////////////////////////////
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub log_index: u64,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub address: Address,
    pub data: Bytes,
    pub topics: Vec<B256>,
    pub block_timestamp: String,
    pub block_number: u64,
    pub block_hash: B256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLog {
    pub record: LogRecord,
    pub event: String,
}

impl ClassifiedLog {
    pub fn is_unknown(&self) -> bool {
        self.event == UNKNOWN_EVENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSFER_TOPIC: &str =
        "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

    #[test]
    fn test_log_row_from_bigquery_json() {
        let line = format!(
            r#"{{"log_index":"7","transaction_hash":"0xaa","transaction_index":3,"address":"0xbb","data":"0x","topics":["{TRANSFER_TOPIC}"],"block_timestamp":"2021-01-01 00:00:00 UTC","block_number":"11565019","block_hash":"0xcc"}}"#
        );
        let row: LogRow = serde_json::from_str(&line).unwrap();
        assert_eq!(row.log_index, 7);
        assert_eq!(row.transaction_index, 3);
        assert_eq!(row.block_number, 11565019);
        assert_eq!(row.topics.0, vec![TRANSFER_TOPIC.to_string()]);
        assert_eq!(row.event, None);
    }

    #[test]
    fn test_topics_parse_python_repr() {
        let topics = Topics::parse_text("['0x01', '0x02']").unwrap();
        assert_eq!(topics.0, vec!["0x01".to_string(), "0x02".to_string()]);

        let topics = Topics::parse_text(r#"["0x01"]"#).unwrap();
        assert_eq!(topics.0, vec!["0x01".to_string()]);

        assert_eq!(Topics::parse_text("").unwrap(), Topics::default());
        assert!(Topics::parse_text("not a list").is_none());
    }

    #[test]
    fn test_topics_serialize_as_json_string() {
        let topics = Topics(vec!["0x01".to_string(), "0x02".to_string()]);
        let json = serde_json::to_string(&topics).unwrap();
        assert_eq!(json, r#""[\"0x01\",\"0x02\"]""#);
    }
}
