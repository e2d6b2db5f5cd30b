//! Scripts living as files in configured directories, run through an interpreter

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, ExitCode};
use std::sync::{Arc, LazyLock};

use log::{debug, info};
use regex::Regex;

use crate::manifest::SCRIPT_EXTENSION;
use crate::scripts::options::{OptionSpec, OptionValue, ParsedOptions};
use crate::scripts::{
    LoadError, ScriptArgs, ScriptDescriptor, ScriptError, ScriptKind, ScriptLoader, ScriptRunner,
};

/// Suffix of the sidecar declaring a script's options
pub const OPTIONS_SUFFIX: &str = ".options.yaml";

static ENTRY_POINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^def\s+main\s*\(").expect("entry point regex is valid"));

// Leading blank and comment lines, then a triple quoted string
static DOCSTRING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\A(?:[ \t]*(?:#[^\n]*)?\r?\n)*[ \t]*[rRuU]?(?:"""(.*?)"""|'''(.*?)''')"#)
        .expect("docstring regex is valid")
});

/// Module documentation of a script's source, if it has any
#[must_use]
pub fn docstring(source: &str) -> Option<String> {
    let captures = DOCSTRING.captures(source)?;
    let doc = captures.get(1).or_else(|| captures.get(2))?.as_str().trim();
    Some(doc.to_string())
}

/// Loads scripts from `<dir>/<name>.py` with an optional `<name>.options.yaml` sidecar
#[derive(Debug, Clone)]
pub struct FileLoader {
    interpreter: String,
}

impl FileLoader {
    pub fn new(interpreter: impl Into<String>) -> Self {
        FileLoader {
            interpreter: interpreter.into(),
        }
    }
}

impl ScriptLoader for FileLoader {
    fn load(&self, dir: &Path, name: &str) -> Result<ScriptDescriptor, LoadError> {
        let path = dir.join(format!("{name}{SCRIPT_EXTENSION}"));
        if !path.is_file() {
            return Err(LoadError::Missing {
                name: name.to_string(),
                path,
            });
        }
        let source = std::fs::read_to_string(&path).map_err(|e| LoadError::Read {
            path: path.clone(),
            source: e,
        })?;
        if !ENTRY_POINT.is_match(&source) {
            return Err(LoadError::NoEntryPoint { path });
        }

        let options_path = dir.join(format!("{name}{OPTIONS_SUFFIX}"));
        let kind = if options_path.is_file() {
            ScriptKind::Structured(OptionSpec::from_file(&options_path)?)
        } else {
            ScriptKind::Raw
        };
        let runner = ProcessRunner {
            interpreter: self.interpreter.clone(),
            name: name.to_string(),
            path,
            spec: match &kind {
                ScriptKind::Structured(spec) => Some(spec.clone()),
                ScriptKind::Raw => None,
            },
        };
        Ok(ScriptDescriptor {
            name: name.to_string(),
            doc: docstring(&source).unwrap_or_default(),
            kind,
            runner: Arc::new(runner),
        })
    }
}

// Loads the script without running its `__main__` block, hands it `[name, ...rest]`
// as its process arguments and calls `main()`, or `main(namespace)` when typed
// options are passed as a Python literal.
const BOOTSTRAP: &str = "\
import ast, os, runpy, sys, types
path, name, options = sys.argv[1:4]
sys.argv = [name, *sys.argv[4:]]
sys.path.insert(0, os.path.dirname(path))
main = runpy.run_path(path, run_name=name)['main']
raise SystemExit(main(types.SimpleNamespace(**ast.literal_eval(options))) if options else main())
";

/// Runs a script's `main` in a child interpreter and waits for it
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: String,
    name: String,
    path: PathBuf,
    spec: Option<OptionSpec>,
}

impl ProcessRunner {
    /// Arguments following `-c BOOTSTRAP`: path, name, options literal, remainder
    fn bootstrap_args(&self, args: &ScriptArgs) -> Vec<OsString> {
        let mut argv = vec![self.path.clone().into_os_string()];
        match args {
            ScriptArgs::Structured(parsed) => {
                argv.push(self.name.clone().into());
                argv.push(namespace_literal(self.spec.as_ref(), parsed).into());
            }
            ScriptArgs::Raw(raw) => {
                argv.push(raw.first().unwrap_or(&self.name).clone().into());
                argv.push(OsString::new());
                argv.extend(raw.iter().skip(1).map(OsString::from));
            }
        }
        argv
    }
}

impl ScriptRunner for ProcessRunner {
    fn run(&self, args: ScriptArgs) -> Result<ExitCode, ScriptError> {
        let argv = self.bootstrap_args(&args);
        info!("Running {} {} {:?}", self.interpreter, self.path.display(), &argv[1..]);
        let status = ProcessCommand::new(&self.interpreter)
            .arg("-c")
            .arg(BOOTSTRAP)
            .args(&argv)
            .status()
            .map_err(|e| ScriptError::Spawn {
                interpreter: self.interpreter.clone(),
                path: self.path.clone(),
                source: e,
            })?;
        debug!("{} exited with {status}", self.path.display());
        match status.code() {
            Some(code) => Ok(ExitCode::from(u8::try_from(code).unwrap_or(1))),
            None => Err(ScriptError::Terminated(self.path.display().to_string())),
        }
    }
}

/// Python dict literal with one entry per declared option, `None` when absent
fn namespace_literal(spec: Option<&OptionSpec>, parsed: &ParsedOptions) -> String {
    let entries: Vec<String> = spec
        .map(|spec| spec.options.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|def| {
            let value = parsed.get(&def.name).map_or_else(|| "None".to_string(), python_value);
            format!("{}: {value}", python_str(&def.name))
        })
        .collect();
    format!("{{{}}}", entries.join(", "))
}

fn python_value(value: &OptionValue) -> String {
    match value {
        OptionValue::Int(v) => v.to_string(),
        OptionValue::Float(v) if v.is_nan() => "None".to_string(),
        // Overflows to inf in Python
        OptionValue::Float(v) if v.is_infinite() => {
            if v.is_sign_positive() { "1e999" } else { "-1e999" }.to_string()
        }
        OptionValue::Float(v) => format!("{v:?}"),
        OptionValue::Str(v) => python_str(v),
        OptionValue::Bool(true) => "True".to_string(),
        OptionValue::Bool(false) => "False".to_string(),
        OptionValue::List(items) => {
            let items: Vec<String> = items.iter().map(String::as_str).map(python_str).collect();
            format!("[{}]", items.join(", "))
        }
    }
}

fn python_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", u32::from(c))),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
