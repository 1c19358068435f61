use alloy_dyn_abi::{DecodedEvent, DynSolValue, EventExt};
use alloy_json_abi::{Event, Param};

use crate::abi::EventEntry;
use crate::models::datasets::events::{DecodedLogData, METADATA_COLUMNS};
use crate::models::datasets::logs::LogRecord;
use crate::models::errors::DecodeError;

pub trait LogTransformer {
    fn transform_logs(self, entry: &EventEntry) -> Vec<Result<DecodedLogData, DecodeError>>;
}

impl LogTransformer for Vec<LogRecord> {
    fn transform_logs(self, entry: &EventEntry) -> Vec<Result<DecodedLogData, DecodeError>> {
        self.iter().map(|record| decode_log(entry, record)).collect()
    }
}

// Output header for an event table: flattened argument names, then receipt metadata.
// An argument named like a metadata or timestamp column is written as `arg_<name>`.
pub fn event_columns(event: &Event, timestamp_column: &str) -> Vec<String> {
    let mut columns = Vec::new();
    for (idx, input) in event.inputs.iter().enumerate() {
        let name = column_name(&input.name, idx, None);
        if is_expandable(&input.ty, input.indexed) {
            flatten_columns(&name, &input.components, &mut columns);
        } else {
            columns.push(name);
        }
    }
    for column in columns.iter_mut() {
        if METADATA_COLUMNS.contains(&column.as_str()) || *column == timestamp_column {
            *column = format!("arg_{column}");
        }
    }
    columns.extend(METADATA_COLUMNS.iter().map(|c| c.to_string()));
    columns.push(timestamp_column.to_string());
    columns
}

pub fn decode_event(entry: &EventEntry, record: &LogRecord) -> Result<DecodedEvent, DecodeError> {
    entry
        .event
        .decode_log_parts(record.topics.iter().copied(), &record.data)
        .map_err(|e| DecodeError::Abi {
            event: entry.name.clone(),
            tx_hash: record.transaction_hash,
            log_index: record.log_index,
            reason: e.to_string(),
        })
}

pub fn decode_log(entry: &EventEntry, record: &LogRecord) -> Result<DecodedLogData, DecodeError> {
    let decoded = decode_event(entry, record)?;
    let args = flatten_decoded(&entry.event, decoded).ok_or_else(|| DecodeError::Abi {
        event: entry.name.clone(),
        tx_hash: record.transaction_hash,
        log_index: record.log_index,
        reason: "decoded value count does not match the event inputs".to_string(),
    })?;

    Ok(DecodedLogData {
        event: entry.name.clone(),
        args,
        transaction_hash: record.transaction_hash,
        address: record.address,
        block_hash: record.block_hash,
        block_number: record.block_number,
        log_index: record.log_index,
    })
}

// Re-assemble indexed and body values in declaration order and flatten tuples into
// `<name>.<component>` columns
fn flatten_decoded(event: &Event, decoded: DecodedEvent) -> Option<Vec<(String, DynSolValue)>> {
    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut args = Vec::with_capacity(event.inputs.len());

    for (idx, input) in event.inputs.iter().enumerate() {
        let value = if input.indexed {
            indexed.next()?
        } else {
            body.next()?
        };
        let name = column_name(&input.name, idx, None);
        if is_expandable(&input.ty, input.indexed) {
            flatten_value(name, &input.components, value, &mut args);
        } else {
            args.push((name, value));
        }
    }

    if indexed.next().is_some() || body.next().is_some() {
        return None;
    }
    Some(args)
}

fn flatten_columns(prefix: &str, components: &[Param], output: &mut Vec<String>) {
    for (idx, component) in components.iter().enumerate() {
        let name = column_name(&component.name, idx, Some(prefix));
        if is_expandable(&component.ty, false) {
            flatten_columns(&name, &component.components, output);
        } else {
            output.push(name);
        }
    }
}

fn flatten_value(
    prefix: String,
    components: &[Param],
    value: DynSolValue,
    output: &mut Vec<(String, DynSolValue)>,
) {
    match value {
        DynSolValue::Tuple(values) if values.len() == components.len() => {
            for (idx, (component, value)) in components.iter().zip(values).enumerate() {
                let name = column_name(&component.name, idx, Some(&prefix));
                if is_expandable(&component.ty, false) {
                    flatten_value(name, &component.components, value, output);
                } else {
                    output.push((name, value));
                }
            }
        }
        other => output.push((prefix, other)),
    }
}

// Indexed tuples are only present as their topic hash
fn is_expandable(ty: &str, indexed: bool) -> bool {
    !indexed && ty == "tuple"
}

fn column_name(name: &str, idx: usize, prefix: Option<&str>) -> String {
    let name = if name.is_empty() {
        match prefix {
            Some(_) => idx.to_string(),
            None => format!("param_{idx}"),
        }
    } else {
        name.to_string()
    };
    match prefix {
        Some(prefix) => format!("{prefix}.{name}"),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use alloy_json_abi::JsonAbi;
    use alloy_primitives::{Address, B256, Bytes, U256};

    use crate::abi::SignatureTable;
    use crate::models::datasets::events::format_value;

    const ABI: &str = r#"[
        {"type":"event","name":"Transfer","anonymous":false,"inputs":[
            {"name":"from","type":"address","indexed":true},
            {"name":"to","type":"address","indexed":true},
            {"name":"value","type":"uint256","indexed":false}]},
        {"type":"event","name":"Memo","anonymous":false,"inputs":[
            {"name":"sender","type":"address","indexed":true},
            {"name":"","type":"string","indexed":false},
            {"name":"payload","type":"bytes","indexed":false}]},
        {"type":"event","name":"Swap","anonymous":false,"inputs":[
            {"name":"key","type":"tuple","indexed":false,"components":[
                {"name":"currency0","type":"address"},
                {"name":"fee","type":"uint24"}]},
            {"name":"amount","type":"int256","indexed":false}]}
    ]"#;

    fn table() -> SignatureTable {
        let abi: JsonAbi = serde_json::from_str(ABI).unwrap();
        SignatureTable::from_abi(&abi)
    }

    fn record(topics: Vec<B256>, data: Vec<u8>) -> LogRecord {
        LogRecord {
            log_index: 4,
            transaction_hash: B256::repeat_byte(0xaa),
            transaction_index: 1,
            address: Address::repeat_byte(0xbb),
            data: Bytes::from(data),
            topics,
            block_timestamp: "2021-01-01 00:00:00 UTC".to_string(),
            block_number: 12,
            block_hash: B256::repeat_byte(0xcc),
        }
    }

    fn transfer_record(value: u64) -> (EventEntry, LogRecord) {
        let entry = table().by_name("Transfer").unwrap().clone();
        let from = Address::repeat_byte(0x01);
        let to = Address::repeat_byte(0x02);
        let topics = vec![entry.event.selector(), from.into_word(), to.into_word()];
        let data = U256::from(value).to_be_bytes::<32>().to_vec();
        (entry, record(topics, data))
    }

    #[test]
    fn test_decode_transfer() {
        let (entry, record) = transfer_record(1_000);
        let decoded = decode_log(&entry, &record).unwrap();

        let names: Vec<&str> = decoded.args.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["from", "to", "value"]);
        assert_eq!(
            format_value(&decoded.args[0].1),
            format!("0x{}", "01".repeat(20))
        );
        assert_eq!(format_value(&decoded.args[2].1), "1000");
        assert_eq!(decoded.block_number, 12);
        assert_eq!(decoded.log_index, 4);
    }

    #[test]
    fn test_decode_round_trips_topics_and_data() {
        let (entry, record) = transfer_record(123_456_789);
        let decoded = decode_event(&entry, &record).unwrap();

        let mut topics = vec![entry.event.selector()];
        topics.extend(decoded.indexed.iter().map(|v| v.as_word().unwrap()));
        assert_eq!(topics, record.topics);

        let data = DynSolValue::Tuple(decoded.body).abi_encode_params();
        assert_eq!(Bytes::from(data), record.data);
    }

    #[test]
    fn test_decode_dynamic_and_unnamed_params() {
        let entry = table().by_name("Memo").unwrap().clone();
        let sender = Address::repeat_byte(0x03);
        let body = DynSolValue::Tuple(vec![
            DynSolValue::String("hello".to_string()),
            DynSolValue::Bytes(vec![0xde, 0xad]),
        ])
        .abi_encode_params();
        let record = record(vec![entry.event.selector(), sender.into_word()], body);

        let decoded = decode_log(&entry, &record).unwrap();
        let cells: Vec<(String, String)> = decoded
            .args
            .iter()
            .map(|(n, v)| (n.clone(), format_value(v)))
            .collect();
        assert_eq!(
            cells,
            vec![
                ("sender".to_string(), format!("0x{}", "03".repeat(20))),
                ("param_1".to_string(), "hello".to_string()),
                ("payload".to_string(), "0xdead".to_string()),
            ]
        );
        assert_eq!(
            event_columns(&entry.event, "date")[..3],
            ["sender", "param_1", "payload"]
        );
    }

    #[test]
    fn test_tuple_arguments_are_flattened() {
        let entry = table().by_name("Swap").unwrap().clone();
        let body = DynSolValue::Tuple(vec![
            DynSolValue::Tuple(vec![
                DynSolValue::Address(Address::repeat_byte(0x04)),
                DynSolValue::Uint(U256::from(3000u64), 24),
            ]),
            DynSolValue::Int(alloy_primitives::I256::from_dec_str("-42").unwrap(), 256),
        ])
        .abi_encode_params();
        let record = record(vec![entry.event.selector()], body);

        let decoded = decode_log(&entry, &record).unwrap();
        let names: Vec<&str> = decoded.args.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["key.currency0", "key.fee", "amount"]);
        assert_eq!(format_value(&decoded.args[1].1), "3000");
        assert_eq!(format_value(&decoded.args[2].1), "-42");

        let columns = event_columns(&entry.event, "date");
        assert_eq!(columns[..3], ["key.currency0", "key.fee", "amount"]);
        assert_eq!(columns.len(), decoded.to_record().len() + 1);
    }

    #[test]
    fn test_decode_against_wrong_event_fails() {
        let (_, record) = transfer_record(1);
        let memo = table().by_name("Memo").unwrap().clone();
        assert!(matches!(
            decode_log(&memo, &record),
            Err(DecodeError::Abi { .. })
        ));
    }

    #[test]
    fn test_decode_truncated_data_fails() {
        let (entry, mut record) = transfer_record(1);
        record.data = Bytes::from(vec![0u8; 8]);
        assert!(decode_log(&entry, &record).is_err());
    }

    #[test]
    fn test_transform_logs_keeps_order() {
        let (entry, first) = transfer_record(1);
        let (_, second) = transfer_record(2);
        let results = vec![first, second].transform_logs(&entry);
        let values: Vec<String> = results
            .into_iter()
            .map(|r| format_value(&r.unwrap().args[2].1))
            .collect();
        assert_eq!(values, vec!["1", "2"]);
    }

    #[test]
    fn test_columns_for_transfer() {
        let event = Arc::clone(&table().by_name("Transfer").unwrap().event);
        assert_eq!(
            event_columns(&event, "date"),
            vec![
                "from",
                "to",
                "value",
                "transactionHash",
                "address",
                "blockHash",
                "blockNumber",
                "logIndex",
                "date"
            ]
        );
    }

    #[test]
    fn test_argument_named_like_metadata_is_prefixed() {
        let event: Event = serde_json::from_str(
            r#"{"type":"event","name":"Deployed","anonymous":false,"inputs":[
                {"name":"address","type":"address","indexed":true},
                {"name":"date","type":"uint256","indexed":false},
                {"name":"owner","type":"address","indexed":false}]}"#,
        )
        .unwrap();

        let columns = event_columns(&event, "date");
        assert_eq!(
            columns,
            vec![
                "arg_address",
                "arg_date",
                "owner",
                "transactionHash",
                "address",
                "blockHash",
                "blockNumber",
                "logIndex",
                "date"
            ]
        );
        let unique: std::collections::HashSet<&String> = columns.iter().collect();
        assert_eq!(unique.len(), columns.len());

        // `date` only clashes when it is the timestamp column
        assert_eq!(event_columns(&event, "timestamp")[1], "date");
    }
}
