use std::sync::Arc;

use anyhow::Result;
use log::debug;

use crate::{
    config::Config,
    dataset::{Dataset, TimeSeriesOutcome},
    geo::Geography,
    join::MapFrame,
    metadata::MetadataStatus,
    reshape::{ReshapeCache, Reshaped},
    session::Session,
};

// Re-exports
pub use column_names as COL;

// Modules
pub mod animation;
pub mod column_names;
pub mod config;
pub mod dataset;
pub mod error;
#[cfg(feature = "formatters")]
pub mod formatters;
pub mod geo;
pub mod join;
pub mod metadata;
pub mod reshape;
pub mod session;

/// The loaded dataset, boundaries and derived tables
pub struct Climdem {
    pub config: Config,
    pub dataset: Dataset,
    pub geography: Geography,
    cache: ReshapeCache,
}

impl Climdem {
    /// Load with the default configuration
    pub fn new() -> Result<Self> {
        Self::new_with_config(Config::default())
    }

    /// Load the observations, metadata and boundaries named by `config`
    pub fn new_with_config(config: Config) -> Result<Self> {
        debug!("config: {config:?}");
        let dataset = Dataset::load(&config)?;
        let geography = Geography::load(&config.geometry_path, &config.geometry_name_field)?;
        Ok(Self::from_parts(config, dataset, geography))
    }

    pub fn from_parts(config: Config, dataset: Dataset, geography: Geography) -> Self {
        Self {
            config,
            dataset,
            geography,
            cache: ReshapeCache::new(),
        }
    }

    /// Pivot and colour ranges of the observations, computed once
    pub fn reshaped(&self) -> Result<Arc<Reshaped>> {
        self.cache.get_or_compute(&self.dataset)
    }

    pub fn metadata(&self, variable: &str) -> Result<MetadataStatus> {
        self.dataset.metadata().lookup(variable)
    }

    /// The joined boundaries for one year of `variable`, with the variable's global range
    pub fn map_frame(&self, year: i32, variable: &str) -> Result<MapFrame> {
        let reshaped = self.reshaped()?;
        Ok(
            join::join_year(&reshaped.pivot, &self.geography, year, variable)?
                .with_range(reshaped.ranges.get(variable)),
        )
    }

    pub fn time_series(
        &self,
        countries: &[String],
        variable: Option<&str>,
    ) -> Result<TimeSeriesOutcome> {
        self.dataset.time_series(countries, variable)
    }

    pub fn new_session(&self) -> Result<Session> {
        Session::new(&self.dataset)
    }
}
