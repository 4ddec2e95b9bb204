//! Joins the country boundaries with the pivoted observations of a single year. Every boundary
//! is kept; those without a value are flagged rather than dropped so that they can be drawn as
//! "no data".

use anyhow::Result;
use geo::Geometry;
use itertools::izip;
use log::{debug, warn};
use polars::prelude::*;

use crate::{
    geo::{parse_wkt, Geography},
    reshape::{PivotTable, VariableRange},
    COL,
};

/// Label of the rows without a value
pub const NO_DATA_LABEL: &str = "No Data";

/// One boundary annotated with the value of the requested variable
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    pub name: String,
    pub boundary: Geometry<f64>,
    pub value: Option<f64>,
    pub has_data: bool,
}

/// The joined frame behind one map frame: columns `NAME`, `value`, `has_data` and WKT
/// `geometry`, one row per boundary, sorted by name.
#[derive(Debug, Clone, PartialEq)]
pub struct MapFrame {
    pub year: i32,
    pub variable: String,
    /// Colour scale bounds, shared by every year of the variable
    pub range: Option<VariableRange>,
    frame: DataFrame,
}

impl MapFrame {
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Attach the colour scale bounds of the variable
    pub fn with_range(mut self, range: Option<VariableRange>) -> Self {
        self.range = range;
        self
    }

    pub fn title(&self) -> String {
        format!("{} by Country in {}", self.variable, self.year)
    }

    /// Number of boundaries with a value
    pub fn with_data(&self) -> Result<usize> {
        Ok(self
            .frame
            .column(COL::HAS_DATA)?
            .bool()?
            .into_iter()
            .filter(|has_data| *has_data == Some(true))
            .count())
    }

    pub fn rows(&self) -> Result<Vec<JoinedRow>> {
        let mut rows = Vec::with_capacity(self.len());
        for (name, value, has_data, wkt) in izip!(
            self.frame.column(COL::GEOMETRY_NAME)?.str()?,
            self.frame.column(COL::VALUE)?.f64()?,
            self.frame.column(COL::HAS_DATA)?.bool()?,
            self.frame.column(COL::GEOMETRY)?.str()?,
        ) {
            let name = name.unwrap_or_default();
            rows.push(JoinedRow {
                name: name.to_string(),
                boundary: parse_wkt(name, wkt.unwrap_or_default())?,
                value,
                has_data: has_data.unwrap_or(false),
            });
        }
        Ok(rows)
    }

    /// The frame handed to the renderer and the output formatters. Adds the display `label`
    /// (the value, or "No Data") and the global `range_min` / `range_max` of the variable.
    pub fn to_output_frame(&self) -> Result<DataFrame> {
        let (range_min, range_max) = match self.range {
            Some(range) => (lit(range.min), lit(range.max)),
            None => (
                lit(NULL).cast(DataType::Float64),
                lit(NULL).cast(DataType::Float64),
            ),
        };
        Ok(self
            .frame
            .clone()
            .lazy()
            .with_columns([
                when(col(COL::HAS_DATA))
                    .then(col(COL::VALUE).cast(DataType::String))
                    .otherwise(lit(NO_DATA_LABEL))
                    .alias(COL::LABEL),
                range_min.alias(COL::RANGE_MIN),
                range_max.alias(COL::RANGE_MAX),
            ])
            .select([
                col(COL::GEOMETRY_NAME),
                col(COL::VALUE),
                col(COL::HAS_DATA),
                col(COL::LABEL),
                col(COL::RANGE_MIN),
                col(COL::RANGE_MAX),
                col(COL::GEOMETRY),
            ])
            .collect()?)
    }
}

/// Left-join `geography` with the pivot rows of `year` on exact country name.
///
/// The output always has one row per boundary. A variable unknown to the pivot is not an
/// error: every row comes back without data.
pub fn join_year(
    pivot: &PivotTable,
    geography: &Geography,
    year: i32,
    variable: &str,
) -> Result<MapFrame> {
    let value = if pivot.has_variable(variable) {
        col(variable)
    } else {
        warn!("Variable '{variable}' is not in the pivoted observations");
        lit(NULL).cast(DataType::Float64)
    };
    let year_rows = pivot
        .for_year(year)
        .select([col(COL::COUNTRY), value.alias(COL::VALUE)]);

    let frame = geography
        .frame()
        .clone()
        .lazy()
        .join(
            year_rows,
            [col(COL::GEOMETRY_NAME)],
            [col(COL::COUNTRY)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(col(COL::VALUE).is_not_null().alias(COL::HAS_DATA))
        .select([
            col(COL::GEOMETRY_NAME),
            col(COL::VALUE),
            col(COL::HAS_DATA),
            col(COL::GEOMETRY),
        ])
        .sort([COL::GEOMETRY_NAME], SortMultipleOptions::default())
        .collect()?;
    debug!(
        "Joined {} boundaries with '{variable}' for {year}",
        frame.height()
    );

    Ok(MapFrame {
        year,
        variable: variable.to_string(),
        range: None,
        frame,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geo::tests::test_geography,
        reshape::{pivot, tests::test_observations, variable_ranges},
    };

    fn row<'a>(rows: &'a [JoinedRow], name: &str) -> &'a JoinedRow {
        rows.iter().find(|r| r.name == name).unwrap()
    }

    #[test]
    fn join_should_keep_every_boundary() {
        let pivot = pivot(&test_observations()).unwrap();
        let geography = test_geography();
        let frame = join_year(&pivot, &geography, 2000, "co2").unwrap();
        assert_eq!(frame.len(), geography.len());

        let rows = frame.rows().unwrap();
        let france = row(&rows, "France");
        assert!(france.has_data);
        assert_eq!(france.value, Some(10.0));
        let germany = row(&rows, "Germany");
        assert!(!germany.has_data, "Null values should have no data");
        assert_eq!(germany.value, None);
        let italy = row(&rows, "Italy");
        assert!(!italy.has_data, "Unmatched boundaries should have no data");
        assert_eq!(frame.with_data().unwrap(), 1);
    }

    #[test]
    fn join_should_be_total_for_every_year_and_variable() {
        let pivot = pivot(&test_observations()).unwrap();
        let geography = test_geography();
        for year in [1999, 2000, 2001] {
            for variable in ["co2", "turnout", "unknown"] {
                let frame = join_year(&pivot, &geography, year, variable).unwrap();
                assert_eq!(frame.len(), geography.len(), "{variable} in {year}");
            }
        }
    }

    #[test]
    fn unknown_variable_should_have_no_data() {
        let pivot = pivot(&test_observations()).unwrap();
        let frame = join_year(&pivot, &test_geography(), 2000, "unknown").unwrap();
        assert_eq!(frame.with_data().unwrap(), 0);
        assert!(frame.rows().unwrap().iter().all(|r| r.value.is_none()));
    }

    #[test]
    fn output_frame_should_label_missing_values() {
        let observations = test_observations();
        let pivot = pivot(&observations).unwrap();
        let ranges = variable_ranges(&observations).unwrap();
        let frame = join_year(&pivot, &test_geography(), 2001, "co2")
            .unwrap()
            .with_range(ranges.get("co2"));

        let output = frame.to_output_frame().unwrap();
        assert_eq!(output.shape(), (3, 7));
        let labels: Vec<_> = output
            .column(COL::LABEL)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        // Sorted by name: France, Germany, Italy
        assert_eq!(labels[1], NO_DATA_LABEL);
        assert_eq!(labels[2], NO_DATA_LABEL);
        assert_ne!(labels[0], NO_DATA_LABEL);
        let range_max = output.column(COL::RANGE_MAX).unwrap().f64().unwrap();
        assert_eq!(range_max.get(0), Some(12.0));
        assert_eq!(range_max.get(2), Some(12.0));
        assert_eq!(frame.title(), "co2 by Country in 2001");
    }
}
