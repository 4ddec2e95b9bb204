use anyhow::{anyhow, Result};
use enum_dispatch::enum_dispatch;
use geo::geometry::Geometry;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Write as FmtWrite;
use std::io::{Cursor, Write};
use wkb::geom_to_wkb;
use wkt::TryFromWkt;

use crate::COL;

/// Convert a series of WKT geometries to hex encoded WKB strings
fn convert_wkt_to_wkb_hex(s: &Series) -> PolarsResult<Option<Series>> {
    let ca = s.str()?;
    let hex: Vec<Option<String>> = ca
        .into_iter()
        .map(|opt_wkt| {
            opt_wkt
                .map(|wkt_str| -> PolarsResult<String> {
                    let geom: Geometry<f64> =
                        Geometry::try_from_wkt_str(wkt_str).map_err(|err| {
                            PolarsError::ComputeError(
                                format!("Failed to parse wkt: {err:?}").into(),
                            )
                        })?;
                    let bytes = geom_to_wkb(&geom).map_err(|err| {
                        PolarsError::ComputeError(format!("Failed to format geom: {err:?}").into())
                    })?;
                    Ok(bytes.iter().fold(String::new(), |mut acc, byte| {
                        let _ = write!(acc, "{byte:02x}");
                        acc
                    }))
                })
                .transpose()
        })
        .collect::<PolarsResult<_>>()?;
    Ok(Some(Series::new(COL::GEOMETRY, hex)))
}

/// Convert a polars `AnyValue` to `serde_json::Value`. Covers the types found in map frames.
fn any_value_to_json(value: &AnyValue) -> Result<Value> {
    match value {
        AnyValue::Null => Ok(Value::Null),
        AnyValue::Boolean(b) => Ok(Value::Bool(*b)),
        AnyValue::String(s) => Ok(Value::String((*s).to_string())),
        AnyValue::StringOwned(s) => Ok(Value::String(s.to_string())),
        AnyValue::Int8(n) => Ok(json!(*n)),
        AnyValue::Int16(n) => Ok(json!(*n)),
        AnyValue::Int32(n) => Ok(json!(*n)),
        AnyValue::Int64(n) => Ok(json!(*n)),
        AnyValue::UInt8(n) => Ok(json!(*n)),
        AnyValue::UInt16(n) => Ok(json!(*n)),
        AnyValue::UInt32(n) => Ok(json!(*n)),
        AnyValue::UInt64(n) => Ok(json!(*n)),
        AnyValue::Float32(n) => Ok(json!(*n)),
        AnyValue::Float64(n) => Ok(json!(*n)),
        other => Err(anyhow!("Failed to convert value to JSON: {other:?}")),
    }
}

/// One GeoJSON feature per row with a geometry; every other column becomes a property
fn features(df: &DataFrame) -> Result<Vec<geojson::Feature>> {
    let geometry_col = df.column(COL::GEOMETRY)?;
    let other_cols = df.drop(COL::GEOMETRY)?;
    let mut features = Vec::with_capacity(df.height());
    for (idx, geom) in geometry_col.str()?.into_iter().enumerate() {
        let Some(wkt_str) = geom else {
            continue;
        };
        let geom: Geometry<f64> = Geometry::try_from_wkt_str(wkt_str)
            .map_err(|err| anyhow!("Invalid geometry in row {idx}: {err}"))?;
        let mut properties = serde_json::Map::new();
        for col in other_cols.get_columns() {
            properties.insert(col.name().to_string(), any_value_to_json(&col.get(idx)?)?);
        }
        features.push(geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::from(&geom)),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }
    Ok(features)
}

/// Serialises a frame holding a WKT `geometry` column. `save` writes to any writer and
/// `format` buffers the same output into a string.
#[enum_dispatch]
pub trait OutputGenerator {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()>;
    fn format(&self, df: &mut DataFrame) -> Result<String> {
        let mut data: Vec<u8> = vec![];
        let mut buff = Cursor::new(&mut data);
        self.save(&mut buff, df)?;

        Ok(String::from_utf8(data)?)
    }
}

#[enum_dispatch(OutputGenerator)]
#[derive(Serialize, Deserialize, Debug)]
pub enum OutputFormatter {
    GeoJSON(GeoJSONFormatter),
    GeoJSONSeq(GeoJSONSeqFormatter),
    Csv(CSVFormatter),
}

/// Newline delimited GeoJSON features
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct GeoJSONSeqFormatter;

impl OutputGenerator for GeoJSONSeqFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        for feature in features(df)? {
            writeln!(writer, "{feature}")?;
        }
        Ok(())
    }
}

/// How geometries are written in CSV output
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoFormat {
    /// Well-known binary, hex encoded
    Wkb,
    /// Well-known text
    Wkt,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct CSVFormatter {
    pub geo_format: Option<GeoFormat>,
}

impl OutputGenerator for CSVFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        if let Some(GeoFormat::Wkb) = self.geo_format {
            let mut df = df
                .clone()
                .lazy()
                .with_column(
                    col(COL::GEOMETRY)
                        .map(
                            |s: Series| convert_wkt_to_wkb_hex(&s),
                            GetOutput::from_type(DataType::String),
                        )
                        .alias(COL::GEOMETRY),
                )
                .collect()?;
            CsvWriter::new(writer).finish(&mut df)?;
        } else {
            CsvWriter::new(writer).finish(df)?;
        };
        Ok(())
    }
}

/// A single GeoJSON feature collection
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct GeoJSONFormatter;

impl OutputGenerator for GeoJSONFormatter {
    fn format(&self, df: &mut DataFrame) -> Result<String> {
        let feature_collection = geojson::FeatureCollection {
            bbox: None,
            features: features(df)?,
            foreign_members: None,
        };
        Ok(feature_collection.to_string())
    }

    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        writer.write_all(self.format(df)?.as_bytes())?;
        Ok(())
    }
}
