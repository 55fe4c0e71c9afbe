//! Command line interface

use crate::backend::headless::{Fault, HeadlessConfig};
use crate::config::parser::parse_output_spec;
use crate::config::{default_config_dir, Config, OutputConfig, Options};
use crate::error::GrefsenResult;
use clap::Parser;
use std::path::PathBuf;

/// Compositor supervisor for grefsen
#[derive(Debug, Parser)]
#[command(name = "grefsen", version, about)]
pub struct Cli {
    /// Respawn the compositor after a fatal signal
    #[arg(short = 'r', long)]
    pub respawn: bool,

    /// Redirect all log output to this file
    #[arg(short = 'l', long = "log", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Load grefsen.conf from this directory
    #[arg(short = 'c', long = "config", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Only use the display with this name (repeatable)
    #[arg(short = 's', long = "screen", value_name = "NAME")]
    pub screens: Vec<String>,

    /// Run in windows rather than fullscreen
    #[arg(short = 'w', long = "window")]
    pub windowed: bool,

    /// Add a headless display, NAME:WIDTHxHEIGHT+X+Y (repeatable)
    #[arg(long = "output", value_name = "SPEC", value_parser = parse_output_spec)]
    pub outputs: Vec<OutputConfig>,

    /// Number of top-level windows in the headless scene
    #[arg(long, value_name = "COUNT")]
    pub windows: Option<u32>,

    /// Raise a fault once the runtime loop starts
    #[arg(long, value_enum, value_name = "FAULT")]
    pub inject_fault: Option<Fault>,
}

/// Everything `main` hands to the supervisor
#[derive(Debug, Clone)]
pub struct Settings {
    pub options: Options,
    pub headless: HeadlessConfig,
    /// Config file problems, logged once logging is up
    pub warnings: Vec<String>,
}

impl Cli {
    /// Load the config file and merge it under the command line
    pub fn into_settings(self) -> GrefsenResult<Settings> {
        let config_dir = match self.config_dir.clone() {
            Some(dir) => dir,
            None => default_config_dir()?,
        };
        let config = Config::load_from_dir(&config_dir)?;
        Ok(self.merge(config_dir, config))
    }

    /// Flags win over the file; list options replace the file's lists
    pub fn merge(self, config_dir: PathBuf, config: Config) -> Settings {
        let mut options = Options::new(config_dir);
        options.respawn = self.respawn || config.respawn.unwrap_or(false);
        options.windowed = self.windowed || config.windowed.unwrap_or(false);
        options.log_file = self.log_file.or(config.log_file);
        options.screens = if self.screens.is_empty() {
            config.screens
        } else {
            self.screens
        };

        let mut headless = HeadlessConfig::default();
        if !self.outputs.is_empty() {
            headless.outputs = self.outputs;
        } else if !config.outputs.is_empty() {
            headless.outputs = config.outputs;
        }
        if let Some(windows) = self.windows.or(config.windows) {
            headless.windows = windows;
        }
        headless.fault = self.inject_fault;

        Settings {
            options,
            headless,
            warnings: config.warnings,
        }
    }
}
