use dotenvy::dotenv;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use std::{env, fs};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Error loading config: {0}")]
    ConfigError(String),
}

pub async fn load_from_file<T: DeserializeOwned>(file_name: String) -> Result<T, LoadConfigError> {
    dotenv().ok();
    let contents = tokio::fs::read_to_string(file_name).await?;
    parse(&contents)
}

pub fn load_from_file_sync<T: DeserializeOwned>(file_name: String) -> Result<T, LoadConfigError> {
    dotenv().ok();
    let contents = fs::read_to_string(file_name)?;
    parse(&contents)
}

fn parse<T: DeserializeOwned>(raw_config: &str) -> Result<T, LoadConfigError> {
    let contents = expand_vars(raw_config)?;
    let config: T = toml::from_str(&contents)?;
    Ok(config)
}

/// Expands `${VAR_NAME}` and `${VAR_NAME:-default}` with environment variables. Unset variables without a
/// default are left as written.
fn expand_vars(raw_config: &str) -> Result<String, LoadConfigError> {
    let re = Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)(?::-([^}]*))?\}").map_err(|e| LoadConfigError::ConfigError(e.to_string()))?;
    let expanded = re.replace_all(raw_config, |caps: &Captures| match (env::var(&caps[1]), caps.get(2)) {
        (Ok(val), _) => val,
        (Err(_), Some(default)) => default.as_str().to_string(),
        (Err(_), None) => caps[0].to_string(),
    });
    Ok(expanded.to_string())
}
