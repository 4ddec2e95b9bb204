//! Error types.

#[derive(thiserror::Error, Debug)]
pub enum ClimdemError {
    #[error("Wrapped anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
    #[error("Wrapped IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Wrapped polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
    #[error("Wrapped spreadsheet error: {0}")]
    SpreadsheetError(#[from] calamine::Error),
    #[error("Unsupported input file: {0}")]
    UnsupportedFile(String),
    #[error("Missing column '{column}' in {file}")]
    MissingColumn { column: String, file: String },
    #[error("Invalid value in column '{column}' at row {row}: {value}")]
    InvalidCell {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Duplicate observations for (country, year, variable): {}", format_keys(.0))]
    DuplicateObservations(Vec<(String, i32, String)>),
    #[error("Invalid geometry for '{name}': {reason}")]
    InvalidGeometry { name: String, reason: String },
    #[error("Empty dataset: no observation years")]
    EmptyDataset,
    #[error("Variable '{0}' clashes with a key column of the pivoted observations")]
    ReservedVariableName(String),
}

fn format_keys(keys: &[(String, i32, String)]) -> String {
    keys.iter()
        .map(|(country, year, variable)| format!("({country}, {year}, {variable})"))
        .collect::<Vec<_>>()
        .join(", ")
}
