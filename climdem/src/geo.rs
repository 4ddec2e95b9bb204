use std::{collections::HashSet, fs::File, io::BufReader, path::Path};

use anyhow::{anyhow, Context, Result};
use flatgeobuf::{geozero::ToWkt, FallibleStreamingIterator, FeatureProperties, FgbReader};
use geo::Geometry;
use log::{info, warn};
use polars::{frame::DataFrame, prelude::NamedFrom, series::Series};
use wkt::{ToWkt as _, TryFromWkt};

use crate::{error::ClimdemError, COL};

/// A named country boundary
#[derive(Debug, Clone, PartialEq)]
pub struct CountryGeometry {
    pub name: String,
    pub boundary: Geometry<f64>,
}

impl CountryGeometry {
    /// Boundaries must be polygonal
    pub fn new(name: impl Into<String>, boundary: Geometry<f64>) -> Result<Self> {
        let name = name.into();
        match boundary {
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => Ok(Self { name, boundary }),
            other => Err(ClimdemError::InvalidGeometry {
                name,
                reason: format!(
                    "expected a polygon or multipolygon, got a {}",
                    geometry_kind(&other)
                ),
            }
            .into()),
        }
    }
}

/// Static country boundaries. Held as a frame of `NAME` and WKT `geometry` so that it can be
/// joined against the pivoted observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Geography {
    frame: DataFrame,
}

impl Geography {
    /// Load boundaries from a FlatGeobuf (`.fgb`) or GeoJSON (`.geojson`, `.json`) file,
    /// reading the country name from the `name_field` attribute
    pub fn load<P: AsRef<Path>>(path: P, name_field: &str) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let countries = match extension.as_str() {
            "fgb" => read_fgb(path, name_field),
            "geojson" | "json" => read_geojson(path, name_field),
            _ => Err(ClimdemError::UnsupportedFile(path.display().to_string()).into()),
        }
        .with_context(|| format!("Failed to load geometries from '{}'", path.display()))?;
        info!(
            "Loaded {} country geometries from '{}'",
            countries.len(),
            path.display()
        );
        Self::from_countries(countries)
    }

    pub fn from_countries(countries: Vec<CountryGeometry>) -> Result<Self> {
        let mut seen = HashSet::new();
        for country in &countries {
            if !seen.insert(country.name.as_str()) {
                warn!("Country '{}' has more than one boundary", country.name);
            }
        }
        let names: Vec<&str> = countries.iter().map(|c| c.name.as_str()).collect();
        let geoms: Vec<String> = countries.iter().map(|c| c.boundary.wkt_string()).collect();
        let frame = DataFrame::new(vec![
            Series::new(COL::GEOMETRY_NAME, names),
            Series::new(COL::GEOMETRY, geoms),
        ])?;
        Ok(Self { frame })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self
            .frame
            .column(COL::GEOMETRY_NAME)?
            .str()?
            .into_iter()
            .flatten()
            .map(String::from)
            .collect())
    }

    pub fn countries(&self) -> Result<Vec<CountryGeometry>> {
        let names = self.frame.column(COL::GEOMETRY_NAME)?.str()?;
        let geoms = self.frame.column(COL::GEOMETRY)?.str()?;
        names
            .into_iter()
            .zip(geoms)
            .map(|(name, wkt)| {
                let name = name.unwrap_or_default();
                Ok(CountryGeometry {
                    name: name.to_string(),
                    boundary: parse_wkt(name, wkt.unwrap_or_default())?,
                })
            })
            .collect()
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "point",
        Geometry::Line(_) => "line",
        Geometry::LineString(_) => "linestring",
        Geometry::Polygon(_) => "polygon",
        Geometry::MultiPoint(_) => "multipoint",
        Geometry::MultiLineString(_) => "multilinestring",
        Geometry::MultiPolygon(_) => "multipolygon",
        Geometry::GeometryCollection(_) => "geometry collection",
        Geometry::Rect(_) => "rect",
        Geometry::Triangle(_) => "triangle",
    }
}

pub(crate) fn parse_wkt(name: &str, wkt: &str) -> Result<Geometry<f64>> {
    Geometry::try_from_wkt_str(wkt).map_err(|err| {
        ClimdemError::InvalidGeometry {
            name: name.to_string(),
            reason: format!("{err}"),
        }
        .into()
    })
}

fn read_fgb(path: &Path, name_field: &str) -> Result<Vec<CountryGeometry>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut fgb = FgbReader::open(&mut reader)?.select_all()?;

    let mut countries = vec![];
    while let Some(feature) = fgb.next()? {
        let props = feature.properties()?;
        let name = props
            .get(name_field)
            .with_context(|| format!("failed to get '{name_field}' attribute"))?
            .clone();
        let boundary = parse_wkt(&name, &feature.to_wkt()?)?;
        countries.push(CountryGeometry::new(name, boundary)?);
    }
    Ok(countries)
}

fn read_geojson(path: &Path, name_field: &str) -> Result<Vec<CountryGeometry>> {
    let text = std::fs::read_to_string(path)?;
    let features = match text.parse::<geojson::GeoJson>()? {
        geojson::GeoJson::FeatureCollection(collection) => collection.features,
        geojson::GeoJson::Feature(feature) => vec![feature],
        geojson::GeoJson::Geometry(_) => {
            return Err(anyhow!("expected features carrying a '{name_field}' property"))
        }
    };

    features
        .into_iter()
        .map(|feature| {
            let name = feature
                .property(name_field)
                .and_then(|value| value.as_str())
                .with_context(|| format!("failed to get '{name_field}' property"))?
                .to_string();
            let geometry = feature
                .geometry
                .ok_or_else(|| ClimdemError::InvalidGeometry {
                    name: name.clone(),
                    reason: "missing geometry".into(),
                })?;
            let boundary =
                Geometry::<f64>::try_from(geometry).map_err(|err| ClimdemError::InvalidGeometry {
                    name: name.clone(),
                    reason: err.to_string(),
                })?;
            CountryGeometry::new(name, boundary)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flatgeobuf::geozero::{geojson::GeoJson, ColumnValue, PropertyProcessor};
    use flatgeobuf::{ColumnType, FgbWriter, GeometryType};
    use geo::polygon;
    use std::io::Write;

    /// Unit square with its lower left corner at (x, y)
    pub(crate) fn square(name: &str, x: f64, y: f64) -> CountryGeometry {
        CountryGeometry::new(
            name,
            Geometry::Polygon(polygon![
                (x: x, y: y),
                (x: x + 1.0, y: y),
                (x: x + 1.0, y: y + 1.0),
                (x: x, y: y + 1.0),
                (x: x, y: y),
            ]),
        )
        .unwrap()
    }

    pub(crate) fn test_geography() -> Geography {
        Geography::from_countries(vec![
            square("France", 0.0, 0.0),
            square("Germany", 1.0, 0.0),
            square("Italy", 0.0, -1.0),
        ])
        .unwrap()
    }

    fn test_fgb() -> FgbWriter<'static> {
        let mut fgb = FgbWriter::create("countries", GeometryType::Polygon).unwrap();
        fgb.add_column(COL::GEOMETRY_NAME, ColumnType::String, |_fbb, col| {
            col.nullable = false
        });
        let geom1 = GeoJson(
            r#"{"coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]], "type": "Polygon"}"#,
        );
        let geom2 = GeoJson(
            r#"{"coordinates": [[[1.0, 0.0], [2.0, 0.0], [2.0, 1.0], [1.0, 1.0], [1.0, 0.0]]], "type": "Polygon"}"#,
        );
        fgb.add_feature_geom(geom1, |feat| {
            feat.property(0, COL::GEOMETRY_NAME, &ColumnValue::String("France"))
                .unwrap();
        })
        .unwrap();
        fgb.add_feature_geom(geom2, |feat| {
            feat.property(0, COL::GEOMETRY_NAME, &ColumnValue::String("Germany"))
                .unwrap();
        })
        .unwrap();
        fgb
    }

    #[test]
    fn test_loading_fgb_geometries() {
        let mut buffer: Vec<u8> = vec![];
        test_fgb().write(&mut buffer).unwrap();
        let mut file = tempfile::Builder::new().suffix(".fgb").tempfile().unwrap();
        file.write_all(&buffer).unwrap();

        let geography = Geography::load(file.path(), COL::GEOMETRY_NAME).unwrap();
        assert_eq!(geography.len(), 2, "Should recover two features");
        // Order seems to get moved around when reading back
        let mut names = geography.names().unwrap();
        names.sort();
        assert_eq!(names, vec!["France", "Germany"]);
    }

    #[test]
    fn test_loading_geojson_geometries() {
        let mut file = tempfile::Builder::new()
            .suffix(".geojson")
            .tempfile()
            .unwrap();
        file.write_all(
            br#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"NAME": "Italy", "POP": 59},
                 "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}},
                {"type": "Feature", "properties": {"NAME": "Spain"},
                 "geometry": {"type": "MultiPolygon", "coordinates": [[[[2, 0], [3, 0], [3, 1], [2, 0]]]]}}
            ]}"#,
        )
        .unwrap();
        let geography = Geography::load(file.path(), "NAME").unwrap();
        assert_eq!(geography.names().unwrap(), vec!["Italy", "Spain"]);
        let countries = geography.countries().unwrap();
        assert!(matches!(countries[1].boundary, Geometry::MultiPolygon(_)));
    }

    #[test]
    fn missing_name_attribute_should_fail() {
        let mut file = tempfile::Builder::new()
            .suffix(".geojson")
            .tempfile()
            .unwrap();
        file.write_all(
            br#"{"type": "Feature", "properties": {"ADMIN": "Italy"},
                 "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}}"#,
        )
        .unwrap();
        assert!(Geography::load(file.path(), "NAME").is_err());
    }

    #[test]
    fn points_should_not_be_accepted_as_boundaries() {
        let result = CountryGeometry::new("Nowhere", Geometry::Point(geo::point!(x: 0.0, y: 0.0)));
        assert!(result.is_err());
    }

    #[test]
    fn boundaries_should_round_trip_through_the_frame() {
        let geography = test_geography();
        let countries = geography.countries().unwrap();
        assert_eq!(countries.len(), 3);
        assert_eq!(countries[0], square("France", 0.0, 0.0));
    }
}
