//! Declared option contracts of structured scripts
//!
//! A script declares its options in a YAML sidecar next to it (`plota.options.yaml`):
//!
//! ```yaml
//! options:
//!   - name: start
//!     short: s
//!     type: int
//!     default: 0
//!     help: the number of the first iteration to plot
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use clap::{Arg, ArgAction, ArgMatches, value_parser};
use serde::{Deserialize, Serialize};

use crate::scripts::LoadError;

/// Argument id and long flag clap adds to every leaf command
const HELP: &str = "help";
const HELP_SHORT: char = 'h';

/// Value type of a declared option
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    #[default]
    String,
    Int,
    Float,
    /// Switch without a value
    Bool,
    /// One or more string values
    List,
}

/// A single declared option or positional argument
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OptionDef {
    pub name: String,
    pub short: Option<char>,
    /// Long flag name, defaults to `name` with underscores turned into dashes
    pub long: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: OptionType,
    pub default: Option<serde_yaml::Value>,
    pub help: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub positional: bool,
}

impl OptionDef {
    #[must_use]
    pub fn long_name(&self) -> String {
        self.long
            .clone()
            .unwrap_or_else(|| self.name.replace('_', "-"))
    }

    fn default_string(&self) -> Option<String> {
        match self.default.as_ref()? {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn to_arg(&self) -> Arg {
        let mut arg = Arg::new(self.name.clone()).required(self.required);
        if !self.positional {
            arg = arg.long(self.long_name());
            if let Some(short) = self.short {
                arg = arg.short(short);
            }
        }
        if let Some(help) = &self.help {
            arg = arg.help(help.clone());
        }
        arg = match self.kind {
            OptionType::Bool => arg.action(ArgAction::SetTrue),
            OptionType::Int => arg.action(ArgAction::Set).value_parser(value_parser!(i64)),
            OptionType::Float => arg.action(ArgAction::Set).value_parser(value_parser!(f64)),
            OptionType::String => arg.action(ArgAction::Set).value_parser(value_parser!(String)),
            OptionType::List => arg
                .action(ArgAction::Append)
                .num_args(1..)
                .value_parser(value_parser!(String)),
        };
        if self.kind != OptionType::Bool
            && let Some(default) = self.default_string()
        {
            arg = arg.default_value(default);
        }
        arg
    }
}

/// Option contract of a structured script
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OptionSpec {
    #[serde(default)]
    pub options: Vec<OptionDef>,
}

impl OptionSpec {
    /// Load an option spec sidecar.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Read` if the file can't be read, or `LoadError::Options`
    /// if it isn't a valid option spec.
    pub fn from_file(path: &Path) -> Result<OptionSpec, LoadError> {
        let contents = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let spec: OptionSpec = serde_yaml::from_str(&contents).map_err(|e| LoadError::Options {
            path: path.to_path_buf(),
            source: e,
        })?;
        spec.validate().map_err(|message| LoadError::InvalidOption {
            path: path.to_path_buf(),
            message,
        })?;
        Ok(spec)
    }

    /// Check that the options can be turned into one clap command
    ///
    /// # Errors
    ///
    /// Returns a description of the first option clashing with another option or
    /// with `--help`, or of a positional that can't be placed.
    pub fn validate(&self) -> Result<(), String> {
        let mut names = HashSet::new();
        let mut longs = HashSet::new();
        let mut shorts = HashSet::new();
        let mut optional_positional = None;
        let mut open_ended = None;
        for def in &self.options {
            if def.name.is_empty() {
                return Err("option without a name".to_string());
            }
            if def.name == HELP || !names.insert(def.name.as_str()) {
                return Err(format!("option name `{}` is already taken", def.name));
            }
            if def.positional {
                if let Some(list) = open_ended {
                    return Err(format!("positional `{}` follows list `{list}`", def.name));
                }
                if def.required
                    && let Some(optional) = optional_positional
                {
                    return Err(format!(
                        "required positional `{}` follows optional `{optional}`",
                        def.name
                    ));
                }
                if !def.required {
                    optional_positional = Some(def.name.as_str());
                }
                if def.kind == OptionType::List {
                    open_ended = Some(def.name.as_str());
                }
                continue;
            }
            let long = def.long_name();
            if long.is_empty() || long.starts_with('-') || long == HELP || !longs.insert(long.clone())
            {
                return Err(format!("flag `--{long}` of `{}` is invalid or taken", def.name));
            }
            if let Some(short) = def.short
                && (short == HELP_SHORT || short == '-' || !shorts.insert(short))
            {
                return Err(format!("flag `-{short}` of `{}` is invalid or taken", def.name));
            }
        }
        Ok(())
    }

    /// clap arguments for the script's leaf command
    #[must_use]
    pub fn to_args(&self) -> Vec<Arg> {
        self.options.iter().map(OptionDef::to_arg).collect()
    }

    /// Typed values of every option present in `matches`
    #[must_use]
    pub fn extract(&self, matches: &ArgMatches) -> ParsedOptions {
        let mut values = BTreeMap::new();
        for def in &self.options {
            let id = def.name.as_str();
            let value = match def.kind {
                OptionType::Bool => Some(OptionValue::Bool(matches.get_flag(id))),
                OptionType::Int => matches.get_one::<i64>(id).copied().map(OptionValue::Int),
                OptionType::Float => matches.get_one::<f64>(id).copied().map(OptionValue::Float),
                OptionType::String => matches.get_one::<String>(id).cloned().map(OptionValue::Str),
                OptionType::List => matches
                    .get_many::<String>(id)
                    .map(|v| OptionValue::List(v.cloned().collect())),
            };
            if let Some(value) = value {
                values.insert(def.name.clone(), value);
            }
        }
        ParsedOptions { values }
    }
}

/// A parsed option value
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    List(Vec<String>),
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionValue::Int(v) => write!(f, "{v}"),
            OptionValue::Float(v) => write!(f, "{v}"),
            OptionValue::Str(v) => f.write_str(v),
            OptionValue::Bool(v) => write!(f, "{v}"),
            OptionValue::List(v) => f.write_str(&v.join(" ")),
        }
    }
}

/// Typed arguments handed to a structured script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOptions {
    values: BTreeMap<String, OptionValue>,
}

impl ParsedOptions {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(OptionValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
