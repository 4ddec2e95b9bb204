mod cli;
mod display;
mod error;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, RunCommand};
use climdem::config::Config;
use log::debug;

const DEFAULT_LOGGING_LEVEL: &str = "warn";

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to `DEFAULT_LOGGING_LEVEL` if not set
    let _ =
        std::env::var("RUST_LOG").map_err(|_| std::env::set_var("RUST_LOG", DEFAULT_LOGGING_LEVEL));
    pretty_env_logger::init_timed();
    let args = Cli::parse();
    debug!("args: {args:?}");
    let config = args.apply_overrides(read_config_from_toml()?);
    debug!("config: {config:?}");

    if let Some(command) = args.command {
        command.run(config).await?;
    }
    Ok(())
}

fn read_config_from_toml() -> Result<Config> {
    // macOS: ~/Library/Application Support/climdem/config.toml
    match dirs::config_dir() {
        Some(dir) => read_config_file(&dir.join("climdem").join("config.toml")),
        None => Ok(Config::default()),
    }
}

fn read_config_file(file_path: &Path) -> Result<Config> {
    match std::fs::read_to_string(file_path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("Invalid TOML in config file '{}'", file_path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(e)
            .with_context(|| format!("Error reading config file '{}'", file_path.display())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_config_file_should_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = read_config_file(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn config_file_should_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "data_path = \"data.csv\"\ntick_interval_ms = 250").unwrap();
        let config = read_config_file(file.path()).unwrap();
        assert_eq!(config.data_path, "data.csv");
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.metadata_sheet, "Variables");
    }

    #[test]
    fn invalid_config_file_should_fail() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "data_path = ").unwrap();
        assert!(read_config_file(file.path()).is_err());
    }
}
