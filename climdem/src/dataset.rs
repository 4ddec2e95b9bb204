//! Loading of the two source tables: the long-format observations and the variable metadata.

use std::{
    collections::HashSet,
    fmt::Display,
    fs,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use calamine::{Data, Range, Reader};
use itertools::{izip, Itertools};
use log::{debug, info};
use polars::prelude::*;
use sha2::{Digest, Sha256};

use crate::{config::Config, error::ClimdemError, metadata::MetadataTable, COL};

/// Names under which the source files are offered for download.
pub mod download_names {
    pub const DATA: &str = "retool_climate_democracy_data";
    pub const METADATA: &str = "retool_climate_democracy_metadata";
}

/// The kinds of input files we know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Spreadsheet,
    Csv,
}

impl FileKind {
    fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "xlsx" | "xlsm" | "xls" | "ods" => Ok(Self::Spreadsheet),
            "csv" => Ok(Self::Csv),
            _ => Err(ClimdemError::UnsupportedFile(path.display().to_string()).into()),
        }
    }
}

/// An input file exactly as read from disk. The bytes are kept so the file can be handed out
/// for download without being re-read or re-derived.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub path: PathBuf,
    pub download_name: String,
    pub kind: FileKind,
    pub bytes: Arc<[u8]>,
    pub sha256: String,
}

impl RawFile {
    /// Read `path`, naming the download `<download_stem>.<extension of path>`
    pub fn read<P: AsRef<Path>>(path: P, download_stem: &str) -> Result<Self> {
        let path = path.as_ref();
        let kind = FileKind::from_path(path)?;
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read '{}'", path.display()))?;
        let download_name = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{download_stem}.{}", ext.to_lowercase()),
            None => download_stem.to_string(),
        };
        info!("Read {} bytes from '{}'", bytes.len(), path.display());
        Ok(Self::from_bytes(path, download_name, kind, bytes))
    }

    pub fn from_bytes(
        path: impl Into<PathBuf>,
        download_name: String,
        kind: FileKind,
        bytes: Vec<u8>,
    ) -> Self {
        let sha256 = format!("{:x}", Sha256::digest(&bytes));
        Self {
            path: path.into(),
            download_name,
            kind,
            bytes: bytes.into(),
            sha256,
        }
    }

    /// Write the original bytes unchanged
    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(&self.bytes)?;
        writer.flush()?;
        Ok(())
    }

    fn display_name(&self) -> String {
        self.path.display().to_string()
    }

    fn workbook(&self) -> Result<calamine::Sheets<Cursor<Vec<u8>>>> {
        calamine::open_workbook_auto_from_rs(Cursor::new(self.bytes.to_vec()))
            .map_err(ClimdemError::from)
            .with_context(|| format!("Failed to open workbook '{}'", self.display_name()))
    }

    /// The CSV laid out as a spreadsheet range of text cells, header first, so that both file
    /// kinds go through the same cell parsing
    fn csv_range(&self) -> Result<Range<Data>> {
        // No schema inference: every column is read as text
        let df = CsvReadOptions::default()
            .with_infer_schema_length(Some(0))
            .into_reader_with_file_handle(Cursor::new(self.bytes.to_vec()))
            .finish()
            .with_context(|| format!("Failed to parse CSV '{}'", self.display_name()))?;
        if df.width() == 0 {
            return Ok(Range::empty());
        }
        let mut range = Range::new((0, 0), (df.height() as u32, df.width() as u32 - 1));
        for (col_idx, column) in df.get_columns().iter().enumerate() {
            let col_idx = col_idx as u32;
            range.set_value((0, col_idx), Data::String(column.name().to_string()));
            for (row_idx, value) in column.str()?.into_iter().enumerate() {
                let cell = value.map_or(Data::Empty, |v| Data::String(v.to_string()));
                range.set_value((row_idx as u32 + 1, col_idx), cell);
            }
        }
        Ok(range)
    }
}

/// Outcome of a time-series query. Only `Data` carries rows; the other two variants are
/// expected results that the caller reports to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeSeriesOutcome {
    NoSelection,
    Empty,
    Data(DataFrame),
}

impl TimeSeriesOutcome {
    pub fn warning(&self) -> Option<&'static str> {
        match self {
            Self::NoSelection => Some("Please select at least one option for each category."),
            Self::Empty => Some("No data available for the selected choices."),
            Self::Data(_) => None,
        }
    }
}

/// The observations and the metadata loaded from the two source files. Read-only once built.
#[derive(Debug)]
pub struct Dataset {
    observations: DataFrame,
    metadata: MetadataTable,
    data_file: RawFile,
    metadata_file: RawFile,
}

impl Dataset {
    /// Load both source files named by `config`
    pub fn load(config: &Config) -> Result<Self> {
        let data_file = RawFile::read(&config.data_path, download_names::DATA)?;
        let metadata_file = RawFile::read(&config.metadata_path, download_names::METADATA)?;
        Self::from_files(data_file, metadata_file, &config.metadata_sheet)
    }

    pub fn from_files(
        data_file: RawFile,
        metadata_file: RawFile,
        metadata_sheet: &str,
    ) -> Result<Self> {
        let observations = read_observations(&data_file)?;
        let metadata = MetadataTable::new(read_metadata(&metadata_file, metadata_sheet)?)?;
        Self::new(observations, metadata, data_file, metadata_file)
    }

    /// Validate an already parsed observations frame. Duplicate (country, year, variable)
    /// keys are rejected.
    pub fn new(
        observations: DataFrame,
        metadata: MetadataTable,
        data_file: RawFile,
        metadata_file: RawFile,
    ) -> Result<Self> {
        let observations = normalise_observations(observations, &data_file.display_name())?;
        ensure_unique_keys(&observations)?;
        ensure_no_reserved_variables(&observations)?;
        info!(
            "Loaded observations with shape {:?} and {} metadata rows",
            observations.shape(),
            metadata.len()
        );
        Ok(Self {
            observations,
            metadata,
            data_file,
            metadata_file,
        })
    }

    pub fn observations(&self) -> &DataFrame {
        &self.observations
    }

    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    pub fn data_file(&self) -> &RawFile {
        &self.data_file
    }

    pub fn metadata_file(&self) -> &RawFile {
        &self.metadata_file
    }

    /// Identity of the observations content, used to key memoised derived tables
    pub fn fingerprint(&self) -> &str {
        &self.data_file.sha256
    }

    /// First and last observation year
    pub fn year_bounds(&self) -> Result<(i32, i32)> {
        let years = self.observations.column(COL::YEAR)?.i32()?;
        match (years.min(), years.max()) {
            (Some(min), Some(max)) => Ok((min, max)),
            _ => Err(ClimdemError::EmptyDataset.into()),
        }
    }

    /// Distinct variables in order of first appearance
    pub fn variables(&self) -> Result<Vec<String>> {
        distinct_strings(&self.observations, COL::VARIABLE)
    }

    /// Distinct countries in order of first appearance
    pub fn countries(&self) -> Result<Vec<String>> {
        distinct_strings(&self.observations, COL::COUNTRY)
    }

    /// Long-format slice for the chosen countries and variable, sorted by country then year
    pub fn time_series(
        &self,
        countries: &[String],
        variable: Option<&str>,
    ) -> Result<TimeSeriesOutcome> {
        let Some(variable) = variable.filter(|_| !countries.is_empty()) else {
            return Ok(TimeSeriesOutcome::NoSelection);
        };
        let selected = Series::new("countries", countries.to_vec());
        let df = self
            .observations
            .clone()
            .lazy()
            .filter(
                col(COL::COUNTRY)
                    .is_in(lit(selected))
                    .and(col(COL::VARIABLE).eq(lit(variable))),
            )
            .select([col(COL::COUNTRY), col(COL::YEAR), col(COL::VALUE)])
            .sort([COL::COUNTRY, COL::YEAR], SortMultipleOptions::default())
            .collect()?;
        debug!("Time series for '{variable}' has shape {:?}", df.shape());
        if df.height() == 0 {
            Ok(TimeSeriesOutcome::Empty)
        } else {
            Ok(TimeSeriesOutcome::Data(df))
        }
    }
}

fn distinct_strings(df: &DataFrame, column: &str) -> Result<Vec<String>> {
    Ok(df
        .column(column)?
        .str()?
        .into_iter()
        .flatten()
        .unique()
        .map(String::from)
        .collect())
}

/// Returns every (country, year, variable) key that occurs more than once, sorted.
pub fn duplicate_keys(observations: &DataFrame) -> Result<Vec<(String, i32, String)>> {
    let mut seen = HashSet::new();
    let mut duplicates = HashSet::new();
    for (country, year, variable) in izip!(
        observations.column(COL::COUNTRY)?.str()?,
        observations.column(COL::YEAR)?.i32()?,
        observations.column(COL::VARIABLE)?.str()?,
    ) {
        let key = (country, year, variable);
        if !seen.insert(key) {
            duplicates.insert(key);
        }
    }
    Ok(duplicates
        .into_iter()
        .map(|(country, year, variable)| {
            (
                country.unwrap_or_default().to_string(),
                year.unwrap_or_default(),
                variable.unwrap_or_default().to_string(),
            )
        })
        .sorted()
        .collect())
}

pub fn ensure_unique_keys(observations: &DataFrame) -> Result<()> {
    let duplicates = duplicate_keys(observations)?;
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(ClimdemError::DuplicateObservations(duplicates).into())
    }
}

/// Variables may not share a name with the key columns of the pivoted table
pub fn ensure_no_reserved_variables(observations: &DataFrame) -> Result<()> {
    let reserved = observations
        .column(COL::VARIABLE)?
        .str()?
        .into_iter()
        .flatten()
        .find(|variable| [COL::COUNTRY, COL::YEAR].contains(variable));
    match reserved {
        Some(variable) => Err(ClimdemError::ReservedVariableName(variable.to_string()).into()),
        None => Ok(()),
    }
}

fn ensure_columns(df: &DataFrame, columns: &[&str], file: &str) -> Result<()> {
    let present = df.get_column_names();
    for column in columns {
        if !present.contains(column) {
            return Err(ClimdemError::MissingColumn {
                column: column.to_string(),
                file: file.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

fn ensure_no_nulls(df: &DataFrame, column: &str) -> Result<()> {
    let series = df.column(column)?;
    if let Some(row) = series.is_null().into_iter().position(|v| v == Some(true)) {
        return Err(ClimdemError::InvalidCell {
            column: column.to_string(),
            row: row + 1,
            value: "null".into(),
        }
        .into());
    }
    Ok(())
}

/// Restrict the observations to the four known columns with their canonical types
fn normalise_observations(df: DataFrame, file: &str) -> Result<DataFrame> {
    ensure_columns(
        &df,
        &[COL::COUNTRY, COL::YEAR, COL::VARIABLE, COL::VALUE],
        file,
    )?;
    let df = df
        .lazy()
        .select([
            col(COL::COUNTRY).strict_cast(DataType::String),
            col(COL::YEAR).strict_cast(DataType::Int32),
            col(COL::VARIABLE).strict_cast(DataType::String),
            col(COL::VALUE).strict_cast(DataType::Float64),
        ])
        .collect()?;
    for column in [COL::COUNTRY, COL::YEAR, COL::VARIABLE] {
        ensure_no_nulls(&df, column)?;
    }
    Ok(df)
}

fn read_observations(file: &RawFile) -> Result<DataFrame> {
    match file.kind {
        FileKind::Csv => observations_from_range(&file.csv_range()?, &file.display_name()),
        FileKind::Spreadsheet => {
            let mut workbook = file.workbook()?;
            let sheet = workbook
                .sheet_names()
                .first()
                .cloned()
                .with_context(|| format!("No sheets in '{}'", file.display_name()))?;
            debug!("Reading observations from sheet '{sheet}'");
            let range = workbook
                .worksheet_range(&sheet)
                .map_err(ClimdemError::from)?;
            observations_from_range(&range, &file.display_name())
        }
    }
}

fn read_metadata(file: &RawFile, sheet: &str) -> Result<DataFrame> {
    match file.kind {
        FileKind::Csv => metadata_from_range(&file.csv_range()?, &file.display_name()),
        FileKind::Spreadsheet => {
            let mut workbook = file.workbook()?;
            let range = workbook
                .worksheet_range(sheet)
                .map_err(ClimdemError::from)
                .with_context(|| {
                    format!("Missing sheet '{sheet}' in '{}'", file.display_name())
                })?;
            metadata_from_range(&range, &file.display_name())
        }
    }
}

/// Text of a cell, `None` for blank cells
fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn cell_year(cell: &Data) -> Option<i32> {
    match cell {
        Data::Int(i) => i32::try_from(*i).ok(),
        Data::Float(f) if f.fract() == 0.0 => Some(*f as i32),
        Data::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i32),
        _ => None,
    }
}

/// `Ok(None)` for blank or NaN cells, `Err` for cells that are not numbers
fn cell_number(cell: &Data) -> Result<Option<f64>, String> {
    let value = match cell {
        Data::Empty => return Ok(None),
        Data::Float(f) => *f,
        Data::Int(i) => *i as f64,
        Data::String(s) if s.trim().is_empty() => return Ok(None),
        Data::String(s) => s.trim().parse::<f64>().map_err(|_| s.clone())?,
        other => return Err(other.to_string()),
    };
    Ok((!value.is_nan()).then_some(value))
}

struct Header<'a> {
    cells: Vec<String>,
    file: &'a str,
}

impl<'a> Header<'a> {
    fn new(range: &Range<Data>, file: &'a str) -> Self {
        let cells = range
            .rows()
            .next()
            .map(|row| row.iter().map(|c| cell_text(c).unwrap_or_default()).collect())
            .unwrap_or_default();
        Self { cells, file }
    }

    fn index(&self, column: &str) -> Result<usize> {
        self.cells
            .iter()
            .position(|cell| cell == column)
            .ok_or_else(|| {
                ClimdemError::MissingColumn {
                    column: column.to_string(),
                    file: self.file.to_string(),
                }
                .into()
            })
    }
}

fn invalid_cell(column: &str, row: usize, value: impl Display) -> anyhow::Error {
    ClimdemError::InvalidCell {
        column: column.to_string(),
        row,
        value: value.to_string(),
    }
    .into()
}

fn observations_from_range(range: &Range<Data>, file: &str) -> Result<DataFrame> {
    let header = Header::new(range, file);
    let country_idx = header.index(COL::COUNTRY)?;
    let year_idx = header.index(COL::YEAR)?;
    let variable_idx = header.index(COL::VARIABLE)?;
    let value_idx = header.index(COL::VALUE)?;

    let mut countries: Vec<String> = vec![];
    let mut years: Vec<i32> = vec![];
    let mut variables: Vec<String> = vec![];
    let mut values: Vec<Option<f64>> = vec![];

    // Spreadsheet rows are 1-based and the first one is the header
    for (row_number, row) in range.rows().enumerate().skip(1).map(|(i, r)| (i + 1, r)) {
        if row.iter().all(|cell| cell_text(cell).is_none()) {
            continue;
        }
        let cell = |idx: usize| row.get(idx).unwrap_or(&Data::Empty);
        let country = cell_text(cell(country_idx))
            .ok_or_else(|| invalid_cell(COL::COUNTRY, row_number, "empty"))?;
        let year = cell_year(cell(year_idx))
            .ok_or_else(|| invalid_cell(COL::YEAR, row_number, cell(year_idx)))?;
        let variable = cell_text(cell(variable_idx))
            .ok_or_else(|| invalid_cell(COL::VARIABLE, row_number, "empty"))?;
        let value = cell_number(cell(value_idx))
            .map_err(|value| invalid_cell(COL::VALUE, row_number, value))?;
        countries.push(country);
        years.push(year);
        variables.push(variable);
        values.push(value);
    }

    Ok(df!(
        COL::COUNTRY => countries,
        COL::YEAR => years,
        COL::VARIABLE => variables,
        COL::VALUE => values
    )?)
}

fn metadata_from_range(range: &Range<Data>, file: &str) -> Result<DataFrame> {
    let header = Header::new(range, file);
    let variable_idx = header.index(COL::METADATA_VARIABLE)?;
    let description_idx = header.index(COL::METADATA_DESCRIPTION)?;
    let source_idx = header.index(COL::METADATA_SOURCE)?;

    let mut variables: Vec<String> = vec![];
    let mut descriptions: Vec<Option<String>> = vec![];
    let mut sources: Vec<Option<String>> = vec![];
    for row in range.rows().skip(1) {
        let cell = |idx: usize| row.get(idx).and_then(cell_text);
        // Rows without a variable name cannot be looked up
        let Some(variable) = cell(variable_idx) else {
            continue;
        };
        variables.push(variable);
        descriptions.push(cell(description_idx));
        sources.push(cell(source_idx));
    }

    Ok(df!(
        COL::METADATA_VARIABLE => variables,
        COL::METADATA_DESCRIPTION => descriptions,
        COL::METADATA_SOURCE => sources
    )?)
}
