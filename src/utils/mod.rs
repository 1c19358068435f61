pub mod retry;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::models::common::Config;

const ENV_PREFIX: &str = "LOG_ETL";

pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<Config> {
    let config_path = config_path.as_ref();
    info!("Config path: {}", config_path.to_string_lossy());

    // YAML file first, then LOG_ETL__* environment overrides (e.g. LOG_ETL__CHUNK_SIZE)
    let settings = config::Config::builder()
        .add_source(config::File::from(config_path))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to read config file")?;

    let mut config: Config = settings
        .try_deserialize()
        .context("failed to parse config")?;

    // Output file names are built from the contract label
    config.contract_name = config.contract_name.trim().replace(['/', '\\'], "_");

    config.validate()?;
    Ok(config)
}

fn strip_html(error: &str) -> String {
    // If the error contains HTML tags, extract just the text content
    if error.contains("<!doctype html>") || error.contains("<html>") {
        error
            .lines()
            .map(|line| line.trim())
            .find(|line| {
                !line.starts_with('<')
                    && !line.ends_with('>')
                    && !line.is_empty()
                    && *line != "html"
                    && *line != "body"
            })
            .unwrap_or(error)
            .to_string()
    } else {
        error.to_string()
    }
}
