use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use climdem::{
    animation::{self, AnimationController, SetYearOutcome},
    config::Config,
    dataset::{Dataset, TimeSeriesOutcome},
    formatters::{
        CSVFormatter, GeoFormat, GeoJSONFormatter, GeoJSONSeqFormatter, OutputFormatter,
        OutputGenerator,
    },
    session::Session,
    Climdem,
};
use enum_dispatch::enum_dispatch;
use log::{debug, info, warn};
use polars::frame::DataFrame;
use serde::{Deserialize, Serialize};
use spinners::{Spinner, Spinners};
use strum_macros::EnumString;
use tokio::sync::Mutex;

use crate::display::{
    display_countries, display_frame_summary, display_metadata, display_time_series,
    display_variables,
};
use crate::error::ClimdemCliResult;

const DEFAULT_PROGRESS_SPINNER: Spinners = Spinners::Dots;
const COMPLETE_PROGRESS_STRING: &str = "✔";
const RUNNING_TAIL_STRING: &str = "...";
const LOADING_DATASET_STRING: &str = "Loading dataset";
const LOADING_DATASET_AND_GEOMETRIES_STRING: &str = "Loading dataset and country geometries";

/// Defines the output formats we are able to produce map frames in.
#[derive(Clone, Debug, Deserialize, Serialize, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum OutputFormat {
    GeoJSON,
    GeoJSONSeq,
    Csv,
}

impl From<&OutputFormat> for OutputFormatter {
    fn from(value: &OutputFormat) -> Self {
        match value {
            OutputFormat::GeoJSON => OutputFormatter::GeoJSON(GeoJSONFormatter),
            OutputFormat::GeoJSONSeq => OutputFormatter::GeoJSONSeq(GeoJSONSeqFormatter),
            OutputFormat::Csv => OutputFormatter::Csv(CSVFormatter::default()),
        }
    }
}

impl From<OutputFormat> for OutputFormatter {
    fn from(value: OutputFormat) -> Self {
        Self::from(&value)
    }
}

fn write_output<T, U>(
    output_generator: T,
    mut data: DataFrame,
    output_file: Option<U>,
) -> ClimdemCliResult<()>
where
    T: OutputGenerator,
    U: AsRef<Path>,
{
    if let Some(output_file) = output_file {
        let mut f = File::create(output_file).context("Failed to write output")?;
        output_generator.save(&mut f, &mut data)?;
    } else {
        let mut stdout_lock = std::io::stdout().lock();
        output_generator.save(&mut stdout_lock, &mut data)?;
    };
    Ok(())
}

/// Run `f` behind a progress spinner unless `quiet` is set
fn with_spinner<T>(
    quiet: bool,
    message: &str,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let sp = (!quiet).then(|| {
        Spinner::with_timer(
            DEFAULT_PROGRESS_SPINNER,
            message.to_string() + RUNNING_TAIL_STRING,
        )
    });
    let result = f();
    if let Some(mut s) = sp {
        s.stop_with_symbol(COMPLETE_PROGRESS_STRING);
    }
    result
}

fn load_dataset(config: &Config, quiet: bool) -> anyhow::Result<Dataset> {
    with_spinner(quiet, LOADING_DATASET_STRING, || Dataset::load(config))
}

fn load_climdem(config: Config, quiet: bool) -> anyhow::Result<Climdem> {
    with_spinner(quiet, LOADING_DATASET_AND_GEOMETRIES_STRING, || {
        Climdem::new_with_config(config)
    })
}

/// Trait that defines what to run when a given subcommand is invoked.
#[enum_dispatch]
pub trait RunCommand {
    async fn run(&self, config: Config) -> ClimdemCliResult<()>;
}

/// The `variables` command lists every variable of the dataset with its metadata.
#[derive(Args, Debug)]
pub struct VariablesCommand {
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for VariablesCommand {
    async fn run(&self, config: Config) -> ClimdemCliResult<()> {
        info!("Running `variables` subcommand");
        let dataset = load_dataset(&config, self.quiet)?;
        display_variables(&dataset.variables()?, dataset.metadata())?;
        Ok(())
    }
}

/// The `metadata` command prints the description and source of one variable.
#[derive(Args, Debug)]
pub struct MetadataCommand {
    #[arg(help = "Variable to describe")]
    variable: String,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for MetadataCommand {
    async fn run(&self, config: Config) -> ClimdemCliResult<()> {
        info!("Running `metadata` subcommand");
        let dataset = load_dataset(&config, self.quiet)?;
        display_metadata(&dataset.metadata().lookup(&self.variable)?);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct CountriesCommand {
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for CountriesCommand {
    async fn run(&self, config: Config) -> ClimdemCliResult<()> {
        info!("Running `countries` subcommand");
        let dataset = load_dataset(&config, self.quiet)?;
        display_countries(&dataset.countries()?);
        Ok(())
    }
}

/// The `timeseries` command prints the values of one variable over the years for a set of
/// countries.
#[derive(Args, Debug)]
pub struct TimeSeriesCommand {
    #[arg(short, long, help = "Variable to plot")]
    variable: Option<String>,
    #[arg(short, long, help = "Countries to include", num_args = 1..)]
    country: Vec<String>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for TimeSeriesCommand {
    async fn run(&self, config: Config) -> ClimdemCliResult<()> {
        info!("Running `timeseries` subcommand");
        let dataset = load_dataset(&config, self.quiet)?;
        let mut session = Session::new(&dataset)?;
        if let Some(variable) = self.variable.as_deref() {
            let status = session.select_variable(dataset.metadata(), variable)?;
            display_metadata(&status);
        }
        let countries = session.select_countries(&self.country);
        let outcome = dataset.time_series(countries, session.variable())?;
        match outcome {
            TimeSeriesOutcome::Data(df) => display_time_series(&df)?,
            other => println!("{}", other.warning().unwrap_or_default()),
        }
        Ok(())
    }
}

/// The `map` command outputs the boundaries joined with one year of a variable.
#[derive(Args, Debug)]
pub struct MapCommand {
    #[arg(short, long, help = "Variable to map")]
    variable: String,
    #[arg(short, long, help = "Year to map, defaults to the first year of the dataset")]
    year: Option<i32>,
    #[arg(
        short = 'f',
        long,
        value_name = "geojson|geojsonseq|csv",
        default_value = "geojson",
        help = "Output format for the results"
    )]
    output_format: OutputFormat,
    #[arg(long, help = "Write CSV geometries as hex encoded WKB instead of WKT")]
    wkb: bool,
    #[arg(short = 'o', long, help = "Output file to place the results")]
    output_file: Option<String>,
    #[arg(from_global)]
    quiet: bool,
}

impl MapCommand {
    fn formatter(&self) -> OutputFormatter {
        match (&self.output_format, self.wkb) {
            (OutputFormat::Csv, true) => OutputFormatter::Csv(CSVFormatter {
                geo_format: Some(GeoFormat::Wkb),
            }),
            (format, _) => format.into(),
        }
    }
}

impl RunCommand for MapCommand {
    async fn run(&self, config: Config) -> ClimdemCliResult<()> {
        info!("Running `map` subcommand");
        let climdem = load_climdem(config, self.quiet)?;
        let mut session = climdem.new_session()?;
        if let Some(year) = self.year {
            if let SetYearOutcome::Applied(applied) = session.set_year(year) {
                if applied != year {
                    warn!("Year {year} is outside the dataset, using {applied}");
                }
            }
        }
        let status = session.select_variable(climdem.dataset.metadata(), &self.variable)?;
        debug!("{status}");

        let frame = climdem.map_frame(session.state().current_year, &self.variable)?;
        write_output(
            self.formatter(),
            frame.to_output_frame()?,
            self.output_file.as_deref(),
        )?;
        Ok(())
    }
}

/// The `animate` command plays the map through the years of a variable.
#[derive(Args, Debug)]
pub struct AnimateCommand {
    #[arg(short, long, help = "Variable to animate")]
    variable: String,
    #[arg(long, help = "Year to start from, defaults to the first year of the dataset")]
    from: Option<i32>,
    #[arg(
        long,
        help = "Milliseconds between two frames, defaults to `tick_interval_ms` of the config"
    )]
    interval_ms: Option<u64>,
    #[arg(short = 'o', long, help = "Directory to write one GeoJSON file per frame into")]
    output_dir: Option<PathBuf>,
    #[arg(from_global)]
    quiet: bool,
}

impl AnimateCommand {
    fn render(&self, climdem: &Climdem, year: i32) -> anyhow::Result<()> {
        let frame = climdem.map_frame(year, &self.variable)?;
        display_frame_summary(&frame)?;
        if let Some(dir) = &self.output_dir {
            let path = dir.join(format!("{}_{year}.geojson", self.variable));
            write_output(GeoJSONFormatter, frame.to_output_frame()?, Some(&path))
                .with_context(|| format!("Failed to write frame '{}'", path.display()))?;
        }
        Ok(())
    }
}

impl RunCommand for AnimateCommand {
    async fn run(&self, config: Config) -> ClimdemCliResult<()> {
        info!("Running `animate` subcommand");
        let interval = Duration::from_millis(self.interval_ms.unwrap_or(config.tick_interval_ms));
        let climdem = load_climdem(config, self.quiet)?;
        if let Some(dir) = &self.output_dir {
            std::fs::create_dir_all(dir)?;
        }

        let mut session = climdem.new_session()?;
        let status = session.select_variable(climdem.dataset.metadata(), &self.variable)?;
        debug!("{status}");
        if let Some(year) = self.from {
            session.set_year(year);
        }
        self.render(&climdem, session.state().current_year)?;

        let controller: Arc<Mutex<AnimationController>> = Arc::new(Mutex::new(session.animation));
        let player = animation::play(controller.clone(), interval, |year| {
            self.render(&climdem, year)
        });
        tokio::select! {
            summary = player => {
                let summary = summary?;
                info!("Animation ended after {} frames at {}", summary.frames, summary.last_year);
            }
            _ = tokio::signal::ctrl_c() => {
                controller.lock().await.stop();
                println!("Animation stopped");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DownloadTarget {
    Data,
    Metadata,
}

/// The `download` command writes one of the source files exactly as it was read.
#[derive(Args, Debug)]
pub struct DownloadCommand {
    #[arg(value_enum, help = "File to download")]
    target: DownloadTarget,
    #[arg(
        short = 'o',
        long,
        help = "Output file, defaults to the download name in the current directory"
    )]
    output_file: Option<PathBuf>,
    #[arg(from_global)]
    quiet: bool,
}

impl RunCommand for DownloadCommand {
    async fn run(&self, config: Config) -> ClimdemCliResult<()> {
        info!("Running `download` subcommand");
        let dataset = load_dataset(&config, self.quiet)?;
        let file = match self.target {
            DownloadTarget::Data => dataset.data_file(),
            DownloadTarget::Metadata => dataset.metadata_file(),
        };
        let path = self
            .output_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(&file.download_name));
        let mut f = File::create(&path)
            .with_context(|| format!("Failed to create '{}'", path.display()))?;
        file.write_to(&mut f)?;
        println!("Wrote {} bytes to '{}'", file.bytes.len(), path.display());
        Ok(())
    }
}

/// The entrypoint for the CLI.
#[derive(Parser, Debug)]
#[command(version, about="Explore climate and democracy indicators by country and year", long_about = None, name="climdem")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    #[arg(
        short = 'q',
        long = "quiet",
        help = "\
            Do not print progress bar to stdout. Results and logs (when `RUST_LOG` is set)\n\
            will still be printed.",
        global = true
    )]
    quiet: bool,
    #[arg(long, global = true, help = "Observations file, overrides the config")]
    data_path: Option<String>,
    #[arg(long, global = true, help = "Variable metadata file, overrides the config")]
    metadata_path: Option<String>,
    #[arg(long, global = true, help = "Country boundaries file, overrides the config")]
    geometry_path: Option<String>,
}

impl Cli {
    /// Apply the path flags on top of the file config
    pub fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(path) = &self.data_path {
            config.data_path = path.clone();
        }
        if let Some(path) = &self.metadata_path {
            config.metadata_path = path.clone();
        }
        if let Some(path) = &self.geometry_path {
            config.geometry_path = path.clone();
        }
        config
    }
}

/// Commands contains the list of subcommands available for use in the CLI.
/// Each command implements the RunCommand trait.
#[derive(Subcommand, Debug)]
#[enum_dispatch(RunCommand)]
pub enum Commands {
    /// List the variables of the dataset with their description and source
    Variables(VariablesCommand),
    /// Show the description and source of a variable
    Metadata(MetadataCommand),
    /// List the countries of the dataset
    Countries(CountriesCommand),
    /// Show a variable over the years for a set of countries
    #[command(name = "timeseries")]
    TimeSeries(TimeSeriesCommand),
    /// Output the country boundaries joined with one year of a variable
    Map(MapCommand),
    /// Play the map of a variable through the years
    Animate(AnimateCommand),
    /// Write the observations or the metadata file unchanged
    Download(DownloadCommand),
}
