//! Parse a command line against the command tree and run what it names

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{ArgAction, Args, FromArgMatches, Parser};
use log::{debug, info, warn};
use thiserror::Error;

use crate::config_file::{ConfigError, Settings};
use crate::configure::{self, ConfigureAction, ConfigureCli, ConfigureError};
use crate::scripts::file::FileLoader;
use crate::scripts::{Registry, ScriptArgs, ScriptDescriptor, ScriptError, ScriptKind};
use crate::tree::{self, CONFIGURE, CommandTree, Leaf, NodeKind, RAW_ARGUMENTS, TreeError};

/// Program name shown in usage messages
pub const BIN_NAME: &str = "pyplot";

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Usage(#[from] clap::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Configure(#[from] ConfigureError),
}

/// Options accepted ahead of the command path
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalArgs {
    /// Path to config file (defaults to ~/.pyplot.cfg)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log file path (enables file logging in addition to stderr)
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

/// A parsed command line, ready to run
#[derive(Debug)]
pub enum Invocation {
    Script {
        descriptor: ScriptDescriptor,
        args: ScriptArgs,
    },
    Configure(ConfigureAction),
}

/// Parse `argv` (program name first) against `tree`.
///
/// # Errors
///
/// Returns `DispatchError::Usage` for unknown commands, bad arguments, and for
/// `--help`/`--version`, whose output is carried by the clap error.
pub fn parse<I, T>(tree: &CommandTree, argv: I) -> Result<Invocation, DispatchError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut command = GlobalArgs::augment_args(tree.to_command(BIN_NAME));
    let top = command.try_get_matches_from_mut(argv)?;

    let mut node = tree.root();
    let mut matches = &top;
    let mut path = Vec::new();
    while let Some((name, sub)) = matches.subcommand() {
        path.push(name.to_string());
        node = tree.child(node, name).ok_or_else(|| {
            command.error(
                ErrorKind::InvalidSubcommand,
                format!("unrecognized command `{}`", path.join(" ")),
            )
        })?;
        matches = sub;
    }
    debug!("Resolved command path {path:?}");

    match &tree.node(node).kind {
        NodeKind::Leaf(Leaf::Script(descriptor)) => {
            let args = match &descriptor.kind {
                ScriptKind::Structured(spec) => ScriptArgs::Structured(spec.extract(matches)),
                ScriptKind::Raw => ScriptArgs::Raw(
                    std::iter::once(descriptor.name.clone())
                        .chain(
                            matches
                                .get_many::<String>(RAW_ARGUMENTS)
                                .into_iter()
                                .flatten()
                                .cloned(),
                        )
                        .collect(),
                ),
            };
            Ok(Invocation::Script {
                descriptor: descriptor.clone(),
                args,
            })
        }
        NodeKind::Leaf(Leaf::Configure) => Ok(Invocation::Configure(
            ConfigureCli::from_arg_matches(matches)?.action,
        )),
        NodeKind::Group { .. } => Err(command
            .error(ErrorKind::MissingSubcommand, "a script name is required")
            .into()),
    }
}

/// Run a parsed invocation to completion.
///
/// # Errors
///
/// Returns `DispatchError` if the script can't be run or `configure` fails.
pub fn run(invocation: Invocation, settings: &mut Settings) -> Result<ExitCode, DispatchError> {
    match invocation {
        Invocation::Script { descriptor, args } => {
            info!("Dispatching to {}", descriptor.name);
            Ok(descriptor.runner.run(args)?)
        }
        Invocation::Configure(action) => {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            Ok(configure::run(
                &action,
                settings,
                &mut stdin.lock(),
                &mut stdout.lock(),
            )?)
        }
    }
}

/// Load the configuration at `config_path`, build the command tree and run `argv`.
///
/// When the configuration or the tree can't be built, `configure` still works on
/// its own so a broken setup can be repaired.
///
/// # Errors
///
/// Returns `DispatchError` for usage errors, broken configuration, or failing scripts.
pub fn dispatch(argv: &[String], config_path: &Path) -> Result<ExitCode, DispatchError> {
    match prepare(config_path) {
        Ok((mut settings, tree)) => {
            let invocation = parse(&tree, argv)?;
            run(invocation, &mut settings)
        }
        Err(e) if argv.get(1).is_some_and(|arg| arg == CONFIGURE) => {
            println!("Error occurred: {e}");
            println!("Continue using `configure` directly");
            configure_only(&argv[1..], config_path)
        }
        Err(e) => Err(e),
    }
}

fn prepare(config_path: &Path) -> Result<(Settings, CommandTree), DispatchError> {
    let settings = Settings::load(config_path)?;
    let registry = Registry::new(FileLoader::new(settings.interpreter()));
    let tree = tree::build_tree(&settings, &registry)?;
    Ok((settings, tree))
}

/// Run `configure` without building the command tree
fn configure_only(argv: &[String], config_path: &Path) -> Result<ExitCode, DispatchError> {
    let cli = ConfigureCli::try_parse_from(argv)?;
    let mut settings = Settings::load(config_path).unwrap_or_else(|e| {
        warn!("{e}, starting from an empty configuration");
        Settings::empty(config_path)
    });
    run(Invocation::Configure(cli.action), &mut settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::options::OptionSpec;
    use crate::scripts::{ScriptDescriptor, ScriptRunner};
    use crate::tree::DEFAULT_KEY;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Recorder {
        seen: Mutex<Vec<ScriptArgs>>,
    }

    impl ScriptRunner for Recorder {
        fn run(&self, args: ScriptArgs) -> Result<ExitCode, ScriptError> {
            self.seen.lock().push(args);
            Ok(ExitCode::SUCCESS)
        }
    }

    fn tree_with(recorder: &Arc<Recorder>) -> CommandTree {
        let spec: OptionSpec =
            serde_yaml::from_str("options:\n  - name: start\n    type: int\n").unwrap();
        let mut tree = CommandTree::new();
        let group = tree.ensure_group(&[DEFAULT_KEY, "paper"]).unwrap();
        tree.add_script(
            tree.root(),
            ScriptDescriptor {
                name: "plota".to_string(),
                doc: "Plot a.".to_string(),
                kind: ScriptKind::Structured(spec),
                runner: recorder.clone(),
            },
        );
        tree.add_script(
            group,
            ScriptDescriptor {
                name: "plotb".to_string(),
                doc: String::new(),
                kind: ScriptKind::Raw,
                runner: recorder.clone(),
            },
        );
        tree.add_leaf(
            tree.root(),
            CONFIGURE,
            String::new(),
            None,
            Leaf::Configure,
        );
        tree
    }

    #[test]
    fn test_raw_args_handoff() {
        let recorder = Arc::new(Recorder::default());
        let tree = tree_with(&recorder);
        let invocation = parse(&tree, ["pyplot", "paper", "plotb", "--flag", "value"]).unwrap();
        run(invocation, &mut Settings::default()).unwrap();
        assert_eq!(
            recorder.seen.lock().as_slice(),
            [ScriptArgs::Raw(vec![
                "plotb".to_string(),
                "--flag".to_string(),
                "value".to_string()
            ])]
        );
    }

    #[test]
    fn test_structured_args_typed() {
        let recorder = Arc::new(Recorder::default());
        let tree = tree_with(&recorder);
        let invocation = parse(&tree, ["pyplot", "plota", "--start", "3"]).unwrap();
        match invocation {
            Invocation::Script {
                args: ScriptArgs::Structured(parsed),
                ..
            } => assert_eq!(parsed.get_int("start"), Some(3)),
            other => panic!("Expected a structured script, got: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_segment_is_usage_error() {
        let tree = tree_with(&Arc::new(Recorder::default()));
        match parse(&tree, ["pyplot", "paper", "plotz"]) {
            Err(DispatchError::Usage(e)) => assert_ne!(e.exit_code(), 0),
            other => panic!("Expected a usage error, got: {other:?}"),
        }
    }

    #[test]
    fn test_group_without_script_is_usage_error() {
        let tree = tree_with(&Arc::new(Recorder::default()));
        assert!(matches!(
            parse(&tree, ["pyplot", "paper"]),
            Err(DispatchError::Usage(_))
        ));
    }

    #[test]
    fn test_help_prints_usage() {
        let tree = tree_with(&Arc::new(Recorder::default()));
        match parse(&tree, ["pyplot", "plota", "--help"]) {
            Err(DispatchError::Usage(e)) => {
                assert_eq!(e.kind(), ErrorKind::DisplayHelp);
                let text = e.render().to_string().to_lowercase();
                assert!(text.contains("usage:"));
                assert!(text.contains("--start"));
            }
            other => panic!("Expected help output, got: {other:?}"),
        }
    }

    #[test]
    fn test_top_level_help_lists_global_options() {
        let tree = tree_with(&Arc::new(Recorder::default()));
        match parse(&tree, ["pyplot", "--help"]) {
            Err(DispatchError::Usage(e)) => {
                let text = e.render().to_string();
                assert!(text.contains("--config <PATH>"));
                assert!(text.contains("--log-file <PATH>"));
                assert!(text.contains("--verbose"));
            }
            other => panic!("Expected help output, got: {other:?}"),
        }
    }

    #[test]
    fn test_global_options_parse_standalone() {
        let cmd = GlobalArgs::augment_args(clap::Command::new("pyplot"));
        let matches = cmd
            .try_get_matches_from(["pyplot", "-vv", "--config", "/tmp/cfg"])
            .unwrap();
        let global = GlobalArgs::from_arg_matches(&matches).unwrap();
        assert_eq!(global.verbose, 2);
        assert_eq!(global.config, Some(PathBuf::from("/tmp/cfg")));
        assert_eq!(global.log_file, None);
    }

    #[test]
    fn test_configure_parsed_from_tree() {
        let tree = tree_with(&Arc::new(Recorder::default()));
        let invocation = parse(&tree, ["pyplot", "configure", "clean", "--dryrun"]).unwrap();
        assert!(matches!(
            invocation,
            Invocation::Configure(ConfigureAction::Clean { dryrun: true })
        ));
    }

    #[test]
    fn test_configure_fallback_on_broken_config() {
        let home = tempfile::tempdir().unwrap();
        let config = home.path().join(".pyplot.cfg");
        std::fs::write(&config, "not an ini file\n").unwrap();
        let scripts = home.path().join("scripts");
        std::fs::create_dir(&scripts).unwrap();

        let argv: Vec<String> = ["pyplot", "configure", "addsub"]
            .iter()
            .map(ToString::to_string)
            .chain(std::iter::once(scripts.display().to_string()))
            .collect();
        dispatch(&argv, &config).unwrap();

        let repaired = Settings::load(&config).unwrap();
        assert_eq!(repaired.sub_directories, vec![scripts]);
    }

    #[test]
    fn test_broken_config_without_configure_fails() {
        let home = tempfile::tempdir().unwrap();
        let config = home.path().join(".pyplot.cfg");
        std::fs::write(&config, "not an ini file\n").unwrap();
        let argv = vec!["pyplot".to_string(), "plota".to_string()];
        assert!(matches!(
            dispatch(&argv, &config),
            Err(DispatchError::Config(ConfigError::Parse { .. }))
        ));
    }
}
