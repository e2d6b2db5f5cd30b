//! Configuration file handling for pyplot
//!
//! The configuration lives in `~/.pyplot.cfg`, an INI style file. The `[include]`
//! section holds two list valued keys, one entry per indented continuation line:
//!
//! ```ini
//! [include]
//! root_directories =
//! 	/home/user/plots
//! sub_directories =
//! 	/home/user/shared/plots
//! ```

use std::path::{Path, PathBuf};

use ini::{EscapePolicy, Ini, ParseOption, WriteOption};
use log::{debug, info};
use thiserror::Error;

/// Name of the configuration file inside the home directory
pub const CONFIG_FILE_NAME: &str = ".pyplot.cfg";

const INCLUDE_SECTION: &str = "include";
const ROOT_KEY: &str = "root_directories";
const SUB_KEY: &str = "sub_directories";
const RUN_SECTION: &str = "run";
const INTERPRETER_KEY: &str = "interpreter";

/// Interpreter used for on-disk scripts when the config doesn't name one
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Errors that can occur while loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to determine the home directory")]
    NoHomeDirectory,
    #[error("Unable to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed config file {path} (line {line}): {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// The two classes of configured script directories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    /// Scripts appear directly at the top level of the command tree
    Root,
    /// Scripts appear under a group named after the directory
    Sub,
}

impl DirectoryKind {
    fn key(self) -> &'static str {
        match self {
            DirectoryKind::Root => ROOT_KEY,
            DirectoryKind::Sub => SUB_KEY,
        }
    }
}

fn parse_options() -> ParseOption {
    ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        enabled_indented_mutiline_value: true,
        ..ParseOption::default()
    }
}

fn write_options() -> WriteOption {
    WriteOption {
        escape_policy: EscapePolicy::Nothing,
        kv_separator: " = ",
        ..WriteOption::default()
    }
}

/// Every non-empty line of a list valued key, trimmed
fn get_list(document: &Ini, section: &str, key: &str) -> Vec<String> {
    document
        .get_from(Some(section), key)
        .map(|value| {
            value
                .lines()
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Store `items` one per indented continuation line
fn set_list(document: &mut Ini, section: &str, key: &str, items: &[String]) {
    let value = items.iter().fold(String::new(), |mut acc, item| {
        acc.push_str("\n\t");
        acc.push_str(item);
        acc
    });
    document.with_section(Some(section)).set(key, value);
}

/// Directories and runtime settings read from the configuration file
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub root_directories: Vec<PathBuf>,
    pub sub_directories: Vec<PathBuf>,
    pub interpreter: Option<String>,
    path: PathBuf,
    document: Ini,
}

impl Settings {
    /// Location of the configuration file in the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoHomeDirectory` if the home directory is unknown.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoHomeDirectory)
    }

    /// Empty configuration that saves to `path`
    #[must_use]
    pub fn empty(path: &Path) -> Settings {
        Settings {
            path: path.to_path_buf(),
            ..Default::default()
        }
    }

    /// Loads the configuration file, treating a missing file as empty configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file exists but cannot be read, or
    /// `ConfigError::Parse` if it is malformed.
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        if !path.exists() {
            debug!("No config file at {}, using empty configuration", path.display());
            return Ok(Settings::empty(path));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let document =
            Ini::load_from_str_opt(&contents, parse_options()).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                line: e.line,
                message: e.msg.to_string(),
            })?;
        let to_paths = |items: Vec<String>| items.into_iter().map(PathBuf::from).collect();
        let settings = Settings {
            root_directories: to_paths(get_list(&document, INCLUDE_SECTION, ROOT_KEY)),
            sub_directories: to_paths(get_list(&document, INCLUDE_SECTION, SUB_KEY)),
            interpreter: document
                .get_from(Some(RUN_SECTION), INTERPRETER_KEY)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string),
            path: path.to_path_buf(),
            document,
        };
        debug!(
            "Loaded {} root and {} sub directories from {}",
            settings.root_directories.len(),
            settings.sub_directories.len(),
            path.display()
        );
        Ok(settings)
    }

    /// Path this configuration is read from and saved to
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn interpreter(&self) -> &str {
        self.interpreter.as_deref().unwrap_or(DEFAULT_INTERPRETER)
    }

    #[must_use]
    pub fn directories(&self, kind: DirectoryKind) -> &[PathBuf] {
        match kind {
            DirectoryKind::Root => &self.root_directories,
            DirectoryKind::Sub => &self.sub_directories,
        }
    }

    fn directories_mut(&mut self, kind: DirectoryKind) -> &mut Vec<PathBuf> {
        match kind {
            DirectoryKind::Root => &mut self.root_directories,
            DirectoryKind::Sub => &mut self.sub_directories,
        }
    }

    /// All configured directories, roots first, each listed once
    #[must_use]
    pub fn script_directories(&self) -> Vec<&Path> {
        let mut seen = Vec::new();
        for dir in self.root_directories.iter().chain(&self.sub_directories) {
            if !seen.contains(&dir.as_path()) {
                seen.push(dir.as_path());
            }
        }
        seen
    }

    /// Appends `dir` to the list for `kind`. Returns `false` if it was already present.
    pub fn add_directory(&mut self, kind: DirectoryKind, dir: PathBuf) -> bool {
        let list = self.directories_mut(kind);
        if list.contains(&dir) {
            return false;
        }
        list.push(dir);
        true
    }

    /// Removes `dir` from the list for `kind`. Returns `false` if it wasn't listed.
    pub fn remove_directory(&mut self, kind: DirectoryKind, dir: &Path) -> bool {
        let list = self.directories_mut(kind);
        let before = list.len();
        list.retain(|listed| listed != dir);
        list.len() != before
    }

    /// Writes both directory lists back to the configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Write` if the file cannot be written.
    pub fn save(&mut self) -> Result<(), ConfigError> {
        for kind in [DirectoryKind::Root, DirectoryKind::Sub] {
            let items: Vec<String> = self
                .directories(kind)
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            set_list(&mut self.document, INCLUDE_SECTION, kind.key(), &items);
        }
        self.document
            .write_to_file_opt(&self.path, write_options())
            .map_err(|e| ConfigError::Write {
                path: self.path.clone(),
                source: e,
            })?;
        info!("Saved configuration to {}", self.path.display());
        Ok(())
    }
}
