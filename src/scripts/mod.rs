//! Script descriptors and the registry that resolves manifest names to them

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::scripts::options::{OptionSpec, ParsedOptions};

pub mod file;
pub mod options;

/// Errors raised while resolving a script
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Missing module {name}! Running `configure update` is required!")]
    Missing { name: String, path: PathBuf },
    #[error("Script {path} has no `main` entry point, the manifest is stale")]
    NoEntryPoint { path: PathBuf },
    #[error("Invalid option spec {path}: {source}")]
    Options {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid option spec {path}: {message}")]
    InvalidOption { path: PathBuf, message: String },
    #[error("Unable to read script {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    /// Whether the manifest merely lists a script that no longer exists
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, LoadError::Missing { .. })
    }
}

/// Errors raised while running a script
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Unable to launch {interpreter} {path}: {source}")]
    Spawn {
        interpreter: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Script {0} was terminated by a signal")]
    Terminated(String),
}

/// How a script receives its arguments
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptKind {
    /// The script declares its options; the dispatcher parses them
    Structured(OptionSpec),
    /// The script owns its argument parsing and gets the raw remainder
    Raw,
}

/// Arguments handed to a script's run capability
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArgs {
    Structured(ParsedOptions),
    /// The script's own view of the process arguments: its name followed by
    /// everything after it on the command line.
    ///
    /// Scripts without a declared option contract own argument parsing and
    /// must perceive themselves as the sole running process.
    Raw(Vec<String>),
}

/// Run capability of a script
pub trait ScriptRunner: fmt::Debug {
    /// Run the script to completion.
    ///
    /// # Errors
    ///
    /// Returns `ScriptError` if the script can't be started or doesn't finish normally.
    fn run(&self, args: ScriptArgs) -> Result<ExitCode, ScriptError>;
}

/// Everything the command tree needs to know about one script
#[derive(Debug, Clone)]
pub struct ScriptDescriptor {
    pub name: String,
    /// Full documentation of the script
    pub doc: String,
    pub kind: ScriptKind,
    pub runner: Arc<dyn ScriptRunner>,
}

impl ScriptDescriptor {
    /// First line of the documentation
    #[must_use]
    pub fn summary(&self) -> &str {
        self.doc.lines().next().unwrap_or_default().trim()
    }

    #[must_use]
    pub fn accepts_raw_args(&self) -> bool {
        self.kind == ScriptKind::Raw
    }
}

/// Turns a manifest-listed name into a loaded script
pub trait ScriptLoader {
    /// Load the script `name` living in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Missing` if the script is gone, or another `LoadError`
    /// if it exists but can't be used.
    fn load(&self, dir: &Path, name: &str) -> Result<ScriptDescriptor, LoadError>;
}

/// Resolves manifest entries through a `ScriptLoader`
pub struct Registry {
    loader: Box<dyn ScriptLoader>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(loader: impl ScriptLoader + 'static) -> Self {
        Registry {
            loader: Box::new(loader),
        }
    }

    /// Resolve `name` in `dir`.
    ///
    /// A script that vanished since the last `configure update` is reported on
    /// stderr and skipped with `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the script exists but is unusable.
    pub fn resolve(&self, dir: &Path, name: &str) -> Result<Option<ScriptDescriptor>, LoadError> {
        match self.loader.load(dir, name) {
            Ok(descriptor) => {
                debug!(
                    "Resolved {name} in {} ({})",
                    dir.display(),
                    if descriptor.accepts_raw_args() { "raw" } else { "structured" }
                );
                Ok(Some(descriptor))
            }
            Err(e) if e.is_stale() => {
                eprintln!("{e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
