//! Per-user view state, passed explicitly to every operation that needs it.

use anyhow::Result;
use log::{debug, warn};

use crate::{
    animation::{AnimationController, AnimationState, SetYearOutcome},
    dataset::Dataset,
    metadata::{MetadataStatus, MetadataTable},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub animation: AnimationController,
    variable: Option<String>,
    country_selection_disabled: bool,
}

impl Session {
    /// A fresh session: idle at the first year of the dataset, nothing selected
    pub fn new(dataset: &Dataset) -> Result<Self> {
        let (min_year, max_year) = dataset.year_bounds()?;
        Self::with_years(min_year, max_year)
    }

    pub fn with_years(min_year: i32, max_year: i32) -> Result<Self> {
        Ok(Self {
            animation: AnimationController::new(min_year, max_year)?,
            variable: None,
            country_selection_disabled: false,
        })
    }

    pub fn variable(&self) -> Option<&str> {
        self.variable.as_deref()
    }

    pub fn country_selection_disabled(&self) -> bool {
        self.country_selection_disabled
    }

    pub fn state(&self) -> AnimationState {
        self.animation.state()
    }

    /// Select a variable and look up its metadata. Without metadata the variable stays selected
    /// but picking countries is disabled until another variable is chosen.
    pub fn select_variable(
        &mut self,
        metadata: &MetadataTable,
        variable: &str,
    ) -> Result<MetadataStatus> {
        let status = metadata.lookup(variable)?;
        if let Some(warning) = status.warning() {
            warn!("{warning}");
        }
        self.country_selection_disabled = !status.is_found();
        self.variable = Some(variable.to_string());
        Ok(status)
    }

    /// The countries that count as selected. While selection is disabled nothing is selected,
    /// whatever was asked for.
    pub fn select_countries<'a>(&self, countries: &'a [String]) -> &'a [String] {
        if self.country_selection_disabled {
            if !countries.is_empty() {
                debug!("Country selection is disabled, ignoring {countries:?}");
            }
            return &[];
        }
        countries
    }

    pub fn set_year(&mut self, year: i32) -> SetYearOutcome {
        self.animation.set_year(year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{tests::test_dataset, TimeSeriesOutcome};

    #[test]
    fn new_session_should_start_idle_at_first_year() {
        let session = Session::new(&test_dataset()).unwrap();
        assert_eq!(
            session.state(),
            AnimationState {
                current_year: 2000,
                is_playing: false
            }
        );
        assert_eq!(session.variable(), None);
        assert!(!session.country_selection_disabled());
    }

    #[test]
    fn variable_without_metadata_should_disable_country_selection() {
        let dataset = test_dataset();
        let mut session = Session::new(&dataset).unwrap();
        let countries = vec!["France".to_string()];

        let status = session
            .select_variable(dataset.metadata(), "turnout")
            .unwrap();
        assert!(!status.is_found());
        assert!(session.country_selection_disabled());
        let selected = session.select_countries(&countries);
        assert!(selected.is_empty());
        assert_eq!(
            dataset.time_series(selected, session.variable()).unwrap(),
            TimeSeriesOutcome::NoSelection
        );

        let status = session.select_variable(dataset.metadata(), "co2").unwrap();
        assert!(status.is_found());
        assert_eq!(session.select_countries(&countries), &countries);
    }

    #[test]
    fn set_year_should_follow_the_animation() {
        let mut session = Session::with_years(2000, 2005).unwrap();
        assert_eq!(session.set_year(2003), SetYearOutcome::Applied(2003));
        session.animation.start();
        assert_eq!(session.set_year(2001), SetYearOutcome::Rejected);
    }
}
