pub mod signatures;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_json_abi::JsonAbi;
use alloy_primitives::Address;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::models::common::{AbiConfig, EtherscanConfig};
use crate::models::errors::AbiError;
use crate::utils::retry::{RetryConfig, retry};

pub use signatures::{EventEntry, SignatureTable};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

// Resolves a contract ABI from a file, the on-disk cache, or an Etherscan-style endpoint
pub struct AbiSource {
    config: AbiConfig,
}

impl AbiSource {
    pub fn new(config: AbiConfig) -> Self {
        Self { config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.path.is_some() || self.config.address.is_some()
    }

    // `fallback` is used when no address is configured, typically the emitting contract
    // of the first record
    pub async fn resolve(&self, fallback: Option<Address>) -> Result<JsonAbi> {
        if let Some(path) = &self.config.path {
            info!("Loading ABI from {}", path.display());
            return Ok(load_abi_file(path)?);
        }

        let address = match (&self.config.address, fallback) {
            (Some(address), _) => address
                .parse::<Address>()
                .with_context(|| format!("invalid abi.address `{}`", address))?,
            (None, Some(address)) => address,
            (None, None) => return Err(AbiError::NoSource.into()),
        };
        let key = format!("{:#x}", address);

        let cached = self.cache_path(&key);
        if cached.exists() {
            info!("Loading cached ABI for {} from {}", key, cached.display());
            return Ok(load_abi_file(&cached)?);
        }

        let Some(etherscan) = &self.config.etherscan else {
            return Err(AbiError::Unavailable { address: key }.into());
        };

        let raw = fetch_abi(etherscan, &key).await?;
        let abi = parse_abi(&raw, &key)?;

        fs::create_dir_all(&self.config.cache_dir).with_context(|| {
            format!(
                "failed to create ABI cache dir {}",
                self.config.cache_dir.display()
            )
        })?;
        fs::write(&cached, &raw)
            .with_context(|| format!("failed to write ABI cache {}", cached.display()))?;
        info!("Cached ABI for {} at {}", key, cached.display());

        Ok(abi)
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        self.config.cache_dir.join(format!("{key}.json"))
    }
}

pub fn load_abi_file(path: &Path) -> Result<JsonAbi, AbiError> {
    if !path.exists() {
        return Err(AbiError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = fs::read_to_string(path).map_err(|e| AbiError::Parse {
        source_name: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_abi(&contents, &path.display().to_string())
}

pub fn parse_abi(contents: &str, source_name: &str) -> Result<JsonAbi, AbiError> {
    serde_json::from_str(contents).map_err(|e| AbiError::Parse {
        source_name: source_name.to_string(),
        reason: e.to_string(),
    })
}

async fn fetch_abi(config: &EtherscanConfig, address: &str) -> Result<String> {
    let mut url = Url::parse(&config.base_url)
        .with_context(|| format!("invalid abi.etherscan.base_url `{}`", config.base_url))?;
    url.query_pairs_mut()
        .append_pair("chainid", &config.chain_id.to_string())
        .append_pair("module", "contract")
        .append_pair("action", "getabi")
        .append_pair("address", address);
    if let Some(key) = &config.api_key {
        url.query_pairs_mut().append_pair("apikey", key);
    }

    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let retry_config = RetryConfig {
        max_attempts: config.max_attempts.max(1),
        ..RetryConfig::default()
    };

    debug!("Fetching ABI for {} on chain {}", address, config.chain_id);
    let body = retry(
        || async {
            let response = client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| anyhow!("request failed: {}", e))?;
            if !response.status().is_success() {
                return Err(anyhow!("HTTP error: {}", response.status()));
            }
            response
                .text()
                .await
                .map_err(|e| anyhow!("failed to read response: {}", e))
        },
        &retry_config,
        "fetch_abi",
    )
    .await
    .map_err(|e| AbiError::Fetch {
        address: address.to_string(),
        reason: e.to_string(),
    })?;

    Ok(extract_abi(&body, address)?)
}

// Pull the ABI string out of an Etherscan `getabi` response body
fn extract_abi(body: &str, address: &str) -> Result<String, AbiError> {
    let response: EtherscanResponse = serde_json::from_str(body).map_err(|e| AbiError::Fetch {
        address: address.to_string(),
        reason: format!("failed to parse response: {e}"),
    })?;

    let result = response.result.as_str().unwrap_or_default();
    if response.status != "1" {
        if result.contains("not verified") || response.message.contains("not verified") {
            return Err(AbiError::NotVerified {
                address: address.to_string(),
            });
        }
        return Err(AbiError::Fetch {
            address: address.to_string(),
            reason: format!("{}: {}", response.message, result),
        });
    }

    if result.is_empty() {
        return Err(AbiError::Fetch {
            address: address.to_string(),
            reason: "ABI result is not a string".to_string(),
        });
    }
    Ok(result.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABI: &str = r#"[{"type":"event","name":"Transfer","anonymous":false,"inputs":[
        {"name":"from","type":"address","indexed":true},
        {"name":"to","type":"address","indexed":true},
        {"name":"value","type":"uint256","indexed":false}]}]"#;

    #[tokio::test]
    async fn test_resolve_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let address = Address::repeat_byte(0x11);
        fs::write(dir.path().join(format!("{:#x}.json", address)), ABI).unwrap();

        let source = AbiSource::new(AbiConfig {
            cache_dir: dir.path().to_path_buf(),
            ..AbiConfig::default()
        });
        let abi = source.resolve(Some(address)).await.unwrap();
        assert_eq!(abi.events().count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_uncached_without_endpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = AbiSource::new(AbiConfig {
            cache_dir: dir.path().to_path_buf(),
            address: Some(format!("{:#x}", Address::repeat_byte(0x22))),
            ..AbiConfig::default()
        });

        let err = source.resolve(None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AbiError>(),
            Some(AbiError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_without_any_source_fails() {
        let source = AbiSource::new(AbiConfig::default());
        let err = source.resolve(None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<AbiError>(), Some(AbiError::NoSource)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_abi_file(Path::new("does/not/exist.json")).unwrap_err();
        assert!(matches!(err, AbiError::FileNotFound { .. }));
    }

    #[test]
    fn test_extract_abi() {
        let body = serde_json::json!({"status": "1", "message": "OK", "result": ABI}).to_string();
        assert_eq!(extract_abi(&body, "0x00").unwrap(), ABI);

        let body = serde_json::json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Contract source code not verified"
        })
        .to_string();
        assert!(matches!(
            extract_abi(&body, "0x00"),
            Err(AbiError::NotVerified { .. })
        ));
    }
}
