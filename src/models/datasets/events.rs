use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256, hex};

pub const METADATA_COLUMNS: [&str; 5] = [
    "transactionHash",
    "address",
    "blockHash",
    "blockNumber",
    "logIndex",
];

/////////////////////////////////// Decoded Data ///////////////////////////////////
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLogData {
    pub event: String,
    // Flattened (column name, value) pairs in ABI declaration order
    pub args: Vec<(String, DynSolValue)>,
    pub transaction_hash: B256,
    pub address: Address,
    pub block_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
}

impl DecodedLogData {
    pub fn to_record(&self) -> Vec<String> {
        let mut record: Vec<String> = self
            .args
            .iter()
            .map(|(_, value)| format_value(value))
            .collect();
        record.push(format!("{:#x}", self.transaction_hash));
        record.push(format!("{:#x}", self.address));
        record.push(format!("{:#x}", self.block_hash));
        record.push(self.block_number.to_string());
        record.push(self.log_index.to_string());
        record
    }
}

// Final output row: decoded data joined with its transaction's timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub decoded: DecodedLogData,
    pub timestamp: String,
}

impl EventRow {
    pub fn to_record(&self) -> Vec<String> {
        let mut record = self.decoded.to_record();
        record.push(self.timestamp.clone());
        record
    }
}

// Render a decoded value the way it lands in a CSV cell: hex for bytes and addresses,
// decimal for integers
pub fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Address(address) => format!("{address:#x}"),
        DynSolValue::Function(function) => hex::encode_prefixed(function.as_slice()),
        DynSolValue::Bytes(bytes) => hex::encode_prefixed(bytes),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            let items: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", items.join(","))
        }
        DynSolValue::Tuple(items) => {
            let items: Vec<String> = items.iter().map(format_value).collect();
            format!("({})", items.join(","))
        }
    }
}
