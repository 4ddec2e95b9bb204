//! This module stores the column names of the input spreadsheets and of the frames derived from
//! them. Note that the input names must be kept in sync with the headers of the published
//! dataset and metadata files!

// Observations (long format)
pub const COUNTRY: &str = "countryname";
pub const YEAR: &str = "observation_year";
pub const VARIABLE: &str = "variable";
pub const VALUE: &str = "value";

// Variable metadata sheet
pub const METADATA_VARIABLE: &str = "Variable";
pub const METADATA_DESCRIPTION: &str = "Interpretation";
pub const METADATA_SOURCE: &str = "Source";

// Geography
pub const GEOMETRY_NAME: &str = "NAME";
pub const GEOMETRY: &str = "geometry";

// Map frame
pub const HAS_DATA: &str = "has_data";
pub const LABEL: &str = "label";
pub const RANGE_MIN: &str = "range_min";
pub const RANGE_MAX: &str = "range_max";
