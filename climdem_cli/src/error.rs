use climdem::error::ClimdemError;
use polars::error::PolarsError;

#[derive(thiserror::Error, Debug)]
pub enum ClimdemCliError {
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("serde JSON error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("climdem error: {0}")]
    ClimdemError(#[from] ClimdemError),
    #[error("std IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type ClimdemCliResult<T> = Result<T, ClimdemCliError>;
