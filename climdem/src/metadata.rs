//! Variable metadata lookup. A variable without metadata is an expected outcome rather than an
//! error: the caller shows a warning and keeps going.

use std::fmt::Display;

use anyhow::Result;
use log::debug;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{error::ClimdemError, COL};

/// Human readable description and citation of one variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMetadata {
    pub variable: String,
    pub description: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataStatus {
    Found(VariableMetadata),
    NotFound { variable: String },
}

impl MetadataStatus {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// The informational warning to show when no metadata exists
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::Found(_) => None,
            Self::NotFound { variable } => Some(format!(
                "Sorry, there is no metadata available for the variable: '{variable}'."
            )),
        }
    }
}

impl Display for MetadataStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found(metadata) => write!(
                f,
                "Variable description: {}\nVariable source: {}",
                metadata.description, metadata.source
            ),
            Self::NotFound { .. } => write!(f, "{}", self.warning().unwrap_or_default()),
        }
    }
}

/// The metadata sheet, one row per known variable
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataTable(DataFrame);

impl MetadataTable {
    pub fn new(df: DataFrame) -> Result<Self> {
        let present = df.get_column_names();
        for column in [
            COL::METADATA_VARIABLE,
            COL::METADATA_DESCRIPTION,
            COL::METADATA_SOURCE,
        ] {
            if !present.contains(&column) {
                return Err(ClimdemError::MissingColumn {
                    column: column.into(),
                    file: "variable metadata".into(),
                }
                .into());
            }
        }
        let df = df
            .lazy()
            .select([
                col(COL::METADATA_VARIABLE).cast(DataType::String),
                col(COL::METADATA_DESCRIPTION).cast(DataType::String),
                col(COL::METADATA_SOURCE).cast(DataType::String),
            ])
            .collect()?;
        Ok(Self(df))
    }

    pub fn as_df(&self) -> &DataFrame {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.height()
    }

    pub fn is_empty(&self) -> bool {
        self.0.height() == 0
    }

    /// Exact key lookup. If the sheet lists a variable twice the first row wins.
    pub fn lookup(&self, variable: &str) -> Result<MetadataStatus> {
        let rows = self
            .0
            .clone()
            .lazy()
            .filter(col(COL::METADATA_VARIABLE).eq(lit(variable)))
            .collect()?;
        if rows.height() == 0 {
            debug!("No metadata for variable '{variable}'");
            return Ok(MetadataStatus::NotFound {
                variable: variable.to_string(),
            });
        }
        let first = |column: &str| -> Result<String> {
            Ok(rows
                .column(column)?
                .str()?
                .get(0)
                .unwrap_or_default()
                .to_string())
        };
        Ok(MetadataStatus::Found(VariableMetadata {
            variable: variable.to_string(),
            description: first(COL::METADATA_DESCRIPTION)?,
            source: first(COL::METADATA_SOURCE)?,
        }))
    }
}
