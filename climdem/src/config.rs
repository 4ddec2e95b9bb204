use serde::{Deserialize, Serialize};

use crate::COL;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Long-format observations file (`.xlsx` or `.csv`)
    pub data_path: String,
    /// Variable metadata file (`.xlsx` or `.csv`)
    pub metadata_path: String,
    /// Sheet of the metadata workbook holding one row per variable
    pub metadata_sheet: String,
    /// Country boundaries (`.fgb` or `.geojson`)
    pub geometry_path: String,
    /// Attribute of the boundary features matched against the country names of the dataset
    pub geometry_name_field: String,
    /// Wall-clock interval between two animation frames
    pub tick_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_path: "input_data/202409_climate_democracy_data_clean.xlsx".into(),
            metadata_path: "input_data/climate_democracy_metadata_new.xlsx".into(),
            metadata_sheet: "Variables".into(),
            geometry_path: "input_data/ne_110m_admin_0_countries.fgb".into(),
            geometry_name_field: COL::GEOMETRY_NAME.into(),
            tick_interval_ms: 500,
        }
    }
}
