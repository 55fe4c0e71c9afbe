//! Configuration for the supervisor
//!
//! Two layers feed the [`Options`] the supervisor runs with: the command
//! line (see [`crate::cli`]) and `grefsen.conf` in the config directory.
//! The file matters most after a crash, because the respawned process is
//! started without any arguments and only finds its settings there.

use crate::display::DisplayDescriptor;
use smithay::utils::{Logical, Raw, Rectangle, Size};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

pub mod parser;


/// Name of the config file inside the config directory
pub const CONFIG_FILE_NAME: &str = "grefsen.conf";

/// Resolution used for outputs that don't specify one
pub const DEFAULT_OUTPUT_SIZE: (i32, i32) = (1920, 1080);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid output {0:?}, expected NAME:WIDTHxHEIGHT+X+Y")]
    OutputSpec(String),

    #[error("could not determine the user config directory")]
    NoConfigDir,
}

/// Contents of `grefsen.conf`
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Variables defined with 'set'
    pub variables: HashMap<String, String>,
    /// `respawn yes|no`
    pub respawn: Option<bool>,
    /// `log <path>`
    pub log_file: Option<PathBuf>,
    /// `screen <name>...`
    pub screens: Vec<String>,
    /// `windowed yes|no`
    pub windowed: Option<bool>,
    /// Displays of the headless backend
    pub outputs: Vec<OutputConfig>,
    /// Number of top-level windows in the headless scene
    pub windows: Option<u32>,
    /// Lines that could not be parsed, reported once logging is up
    pub warnings: Vec<String>,
}

/// A display of the headless backend
#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub name: String,
    pub geometry: Rectangle<i32, Logical>,
    pub physical_size_mm: Size<i32, Raw>,
}

impl OutputConfig {
    pub fn new(name: impl Into<String>, geometry: Rectangle<i32, Logical>) -> Self {
        Self {
            name: name.into(),
            geometry,
            physical_size_mm: (0, 0).into(),
        }
    }

    pub fn descriptor(&self) -> DisplayDescriptor {
        DisplayDescriptor::new(self.name.clone(), self.geometry, self.physical_size_mm)
    }
}

impl Config {
    /// Load config from file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(parser::parse_config(&content))
    }

    /// Load `grefsen.conf` from `dir`; a missing file yields the defaults
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        match Self::load_from_file(&path) {
            Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Get a variable value
    pub fn get_variable(&self, name: &str) -> Option<String> {
        self.variables.get(name).cloned()
    }

    /// Expand variables in a string
    ///
    /// Longer names go first so `$ab` is never read as `$a` followed by `b`.
    pub fn expand_variables(&self, text: &str) -> String {
        let mut variables: Vec<(&String, &String)> = self.variables.iter().collect();
        variables.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut result = text.to_string();
        for (name, value) in variables {
            result = result.replace(&format!("${name}"), value);
        }
        result
    }
}

/// Settings the supervisor core runs with
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Respawn the compositor after a crash
    pub respawn: bool,
    /// Redirect all log output to this file
    pub log_file: Option<PathBuf>,
    /// Where config files are loaded from
    pub config_dir: PathBuf,
    /// Only use the displays with these names
    pub screens: Vec<String>,
    /// Run in windows rather than fullscreen
    pub windowed: bool,
}

impl Options {
    /// Defaults for `config_dir` with nothing else requested
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            respawn: false,
            log_file: None,
            config_dir: config_dir.into(),
            screens: Vec::new(),
            windowed: false,
        }
    }
}

/// `$XDG_CONFIG_HOME/grefsen/`, usually `~/.config/grefsen/`
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("grefsen"))
        .ok_or(ConfigError::NoConfigDir)
}
