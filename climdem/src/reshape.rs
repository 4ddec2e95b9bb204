//! Derived tables: the wide pivot keyed by (country, year) and the global value range of each
//! variable. Both are pure functions of the observations and are memoised per dataset content.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Result};
use itertools::izip;
use log::{debug, info};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{ensure_no_reserved_variables, ensure_unique_keys, Dataset},
    COL,
};

/// Wide table with columns `countryname`, `observation_year` and one nullable float column per
/// variable. Rows are sorted by country then year and variable columns lexicographically.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotTable {
    frame: DataFrame,
    variables: Vec<String>,
}

impl PivotTable {
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn has_variable(&self, variable: &str) -> bool {
        self.variables.iter().any(|v| v == variable)
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Rows observed in `year`
    pub fn for_year(&self, year: i32) -> LazyFrame {
        self.frame
            .clone()
            .lazy()
            .filter(col(COL::YEAR).eq(lit(year)))
    }

    /// Value of a single cell, `None` when the row, the column or the value is missing
    pub fn value(&self, country: &str, year: i32, variable: &str) -> Result<Option<f64>> {
        if !self.has_variable(variable) {
            return Ok(None);
        }
        let rows = self
            .for_year(year)
            .filter(col(COL::COUNTRY).eq(lit(country)))
            .select([col(variable)])
            .collect()?;
        Ok(rows.column(variable)?.f64()?.get(0))
    }
}

/// Pivot the long-format observations to one row per (country, year).
///
/// Every variable seen anywhere in the observations becomes a column; variables not observed
/// for a given (country, year) are null. Colliding (country, year, variable) keys and variables
/// named like a key column are rejected.
pub fn pivot(observations: &DataFrame) -> Result<PivotTable> {
    ensure_unique_keys(observations)?;
    ensure_no_reserved_variables(observations)?;

    let countries = observations.column(COL::COUNTRY)?.str()?;
    let years = observations.column(COL::YEAR)?.i32()?;
    let variables = observations.column(COL::VARIABLE)?.str()?;
    let values = observations.column(COL::VALUE)?.f64()?;

    let columns: BTreeSet<&str> = variables.into_iter().flatten().collect();
    let position: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(idx, variable)| (*variable, idx))
        .collect();

    let mut rows: BTreeMap<(&str, i32), Vec<Option<f64>>> = BTreeMap::new();
    for (country, year, variable, value) in izip!(countries, years, variables, values) {
        let (Some(country), Some(year), Some(variable)) = (country, year, variable) else {
            continue;
        };
        let row = rows
            .entry((country, year))
            .or_insert_with(|| vec![None; columns.len()]);
        row[position[variable]] = value;
    }

    let mut series = vec![
        Series::new(
            COL::COUNTRY,
            rows.keys().map(|(country, _)| *country).collect::<Vec<_>>(),
        ),
        Series::new(
            COL::YEAR,
            rows.keys().map(|(_, year)| *year).collect::<Vec<_>>(),
        ),
    ];
    for (idx, variable) in columns.iter().enumerate() {
        series.push(Series::new(
            variable,
            rows.values().map(|row| row[idx]).collect::<Vec<_>>(),
        ));
    }
    let frame = DataFrame::new(series)?;
    debug!("Pivoted observations to shape {:?}", frame.shape());

    Ok(PivotTable {
        frame,
        variables: columns.into_iter().map(String::from).collect(),
    })
}

/// Smallest and largest value of a variable over every country and year
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariableRange {
    pub min: f64,
    pub max: f64,
}

/// Colour scale bounds for each variable. Computed over the whole table, never per year, so
/// that colours stay comparable between animation frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableRanges(BTreeMap<String, VariableRange>);

impl VariableRanges {
    pub fn get(&self, variable: &str) -> Option<VariableRange> {
        self.0.get(variable).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariableRange)> {
        self.0.iter()
    }
}

/// Per-variable (min, max) ignoring nulls. Variables with only null values have no range.
pub fn variable_ranges(observations: &DataFrame) -> Result<VariableRanges> {
    let df = observations
        .clone()
        .lazy()
        .group_by([col(COL::VARIABLE)])
        .agg([
            col(COL::VALUE).min().alias("min"),
            col(COL::VALUE).max().alias("max"),
        ])
        .collect()?;

    let mut ranges = BTreeMap::new();
    for (variable, min, max) in izip!(
        df.column(COL::VARIABLE)?.str()?,
        df.column("min")?.f64()?,
        df.column("max")?.f64()?,
    ) {
        if let (Some(variable), Some(min), Some(max)) = (variable, min, max) {
            ranges.insert(variable.to_string(), VariableRange { min, max });
        }
    }
    Ok(VariableRanges(ranges))
}

/// Everything derived from one observations table
#[derive(Debug)]
pub struct Reshaped {
    pub fingerprint: String,
    pub pivot: PivotTable,
    pub ranges: VariableRanges,
}

impl Reshaped {
    pub fn new(dataset: &Dataset) -> Result<Self> {
        Ok(Self {
            fingerprint: dataset.fingerprint().to_string(),
            pivot: pivot(dataset.observations())?,
            ranges: variable_ranges(dataset.observations())?,
        })
    }
}

/// Memoises `Reshaped` by the content hash of the observations file. Entries live until the
/// process exits; the inputs are static reference data.
#[derive(Debug, Default)]
pub struct ReshapeCache {
    entries: Mutex<HashMap<String, Arc<Reshaped>>>,
}

impl ReshapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(&self, dataset: &Dataset) -> Result<Arc<Reshaped>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("Reshape cache lock poisoned"))?;
        if let Some(reshaped) = entries.get(dataset.fingerprint()) {
            debug!("Reshape cache hit for {}", dataset.fingerprint());
            return Ok(reshaped.clone());
        }
        info!("Reshaping observations {}", dataset.fingerprint());
        let reshaped = Arc::new(Reshaped::new(dataset)?);
        entries.insert(dataset.fingerprint().to_string(), reshaped.clone());
        Ok(reshaped)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{dataset::tests::test_dataset, error::ClimdemError};

    /// France/Germany/co2 example with a second variable only partially observed
    pub(crate) fn test_observations() -> DataFrame {
        df!(
            COL::COUNTRY => &["France", "France", "Germany", "France"],
            COL::YEAR => &[2000, 2001, 2000, 2000],
            COL::VARIABLE => &["co2", "co2", "co2", "turnout"],
            COL::VALUE => &[Some(10.0), Some(12.0), None, Some(0.71)]
        )
        .unwrap()
    }

    #[test]
    fn pivot_should_produce_one_row_per_country_year() {
        let pivot = pivot(&test_observations()).unwrap();
        assert_eq!(pivot.frame().shape(), (3, 4));
        assert_eq!(pivot.variables(), &["co2", "turnout"]);
        assert_eq!(pivot.value("France", 2000, "co2").unwrap(), Some(10.0));
        assert_eq!(pivot.value("France", 2001, "co2").unwrap(), Some(12.0));
        assert_eq!(pivot.value("Germany", 2000, "co2").unwrap(), None);
        assert_eq!(pivot.value("France", 2000, "turnout").unwrap(), Some(0.71));
        assert_eq!(
            pivot.value("France", 2001, "turnout").unwrap(),
            None,
            "Unobserved variables should be null"
        );
        assert_eq!(pivot.value("France", 2000, "gdp").unwrap(), None);
    }

    #[test]
    fn pivot_should_be_idempotent() {
        let observations = test_observations();
        let first = pivot(&observations).unwrap();
        let second = pivot(&observations).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn pivot_should_not_depend_on_input_order() {
        let observations = test_observations();
        let reversed = observations.reverse();
        assert_eq!(pivot(&observations).unwrap(), pivot(&reversed).unwrap());
    }

    #[test]
    fn pivot_should_reject_collisions() {
        let observations = df!(
            COL::COUNTRY => &["France", "France"],
            COL::YEAR => &[2000, 2000],
            COL::VARIABLE => &["co2", "co2"],
            COL::VALUE => &[Some(1.0), Some(2.0)]
        )
        .unwrap();
        assert!(pivot(&observations).is_err());
    }

    #[test]
    fn pivot_should_reject_variables_named_like_key_columns() {
        let observations = df!(
            COL::COUNTRY => &["France", "France"],
            COL::YEAR => &[2000, 2000],
            COL::VARIABLE => &["co2", COL::YEAR],
            COL::VALUE => &[Some(1.0), Some(2.0)]
        )
        .unwrap();
        let err = pivot(&observations).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClimdemError>(),
            Some(ClimdemError::ReservedVariableName(variable)) if variable == COL::YEAR
        ));
    }

    #[test]
    fn ranges_should_cover_all_years_and_ignore_nulls() {
        let ranges = variable_ranges(&test_observations()).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(
            ranges.get("co2"),
            Some(VariableRange {
                min: 10.0,
                max: 12.0
            })
        );
        assert_eq!(ranges.get("missing"), None);
    }

    #[test]
    fn all_null_variable_should_have_no_range() {
        let observations = df!(
            COL::COUNTRY => &["France"],
            COL::YEAR => &[2000],
            COL::VARIABLE => &["empty"],
            COL::VALUE => &[None::<f64>]
        )
        .unwrap();
        let ranges = variable_ranges(&observations).unwrap();
        assert!(ranges.is_empty());
    }

    #[test]
    fn cache_should_reuse_reshaped_tables() {
        let dataset = test_dataset();
        let cache = ReshapeCache::new();
        let first = cache.get_or_compute(&dataset).unwrap();
        let second = cache.get_or_compute(&dataset).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert_eq!(first.fingerprint, dataset.fingerprint());
    }
}
