use std::path::PathBuf;

use alloy_primitives::B256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("Missing required config value: {field}")]
    MissingField { field: String },
}

#[derive(Error, Debug)]
pub enum AbiError {
    #[error("ABI file not found: {}", path.display())]
    FileNotFound { path: PathBuf },
    #[error("Failed to parse ABI JSON from {source_name}: {reason}")]
    Parse { source_name: String, reason: String },
    #[error("No ABI available for {address}: not cached and no fetch endpoint configured")]
    Unavailable { address: String },
    #[error("No ABI source configured and no contract address to look one up by")]
    NoSource,
    #[error("ABI fetch for {address} failed: {reason}")]
    Fetch { address: String, reason: String },
    #[error("Contract {address} is not verified on the ABI endpoint")]
    NotVerified { address: String },
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Invalid hex in field `{field}`: {value}")]
    InvalidHex { field: &'static str, value: String },
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Event `{event}` is not in the signature table")]
    UnknownEvent { event: String },
    #[error("Failed to decode `{event}` log {tx_hash}:{log_index}: {reason}")]
    Abi {
        event: String,
        tx_hash: B256,
        log_index: u64,
        reason: String,
    },
}
