//! The `configure` command: manage directories and their manifests

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{info, warn};
use thiserror::Error;

use crate::config_file::{ConfigError, DirectoryKind, Settings};
use crate::manifest;

const RULE: &str = "--------------------------------------------------";

#[derive(Error, Debug)]
pub enum ConfigureError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// Configure the directories scripts are collected from
#[derive(Parser, Debug)]
#[command(name = "configure")]
pub struct ConfigureCli {
    #[command(subcommand)]
    pub action: ConfigureAction,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigureAction {
    /// Updates the list of scripts in every configured directory
    Update,
    /// Removes all `__init__.py` manifests created by update
    Clean {
        /// Print files instead of deleting them
        #[arg(short, long)]
        dryrun: bool,
    },
    /// Add a new root directory
    Addroot { directory: PathBuf },
    /// Add a new sub directory
    Addsub { directory: PathBuf },
    /// Remove directories from the root and sub directory lists
    Rmdir,
}

/// Run a configure action, writing its report to `out`.
///
/// `input` is only read by the interactive `rmdir` dialog.
///
/// # Errors
///
/// Returns `ConfigureError` if the configuration can't be saved or output fails.
pub fn run(
    action: &ConfigureAction,
    settings: &mut Settings,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<ExitCode, ConfigureError> {
    match action {
        ConfigureAction::Update => update(settings, out),
        ConfigureAction::Clean { dryrun } => clean(settings, *dryrun, out),
        ConfigureAction::Addroot { directory } => {
            add_directory(settings, DirectoryKind::Root, directory, out)
        }
        ConfigureAction::Addsub { directory } => {
            add_directory(settings, DirectoryKind::Sub, directory, out)
        }
        ConfigureAction::Rmdir => remove_directories(settings, input, out),
    }
}

/// Resynchronize the manifests of every configured directory tree
fn update(settings: &Settings, out: &mut impl Write) -> Result<ExitCode, ConfigureError> {
    writeln!(out, "Updating")?;
    writeln!(out, "Available scripts:")?;
    writeln!(out, "{RULE}")?;
    let mut failed = false;
    for dir in settings.script_directories() {
        let basename = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writeln!(out, "├──<{basename}>    {}", dir.display())?;
        for synced in manifest::synchronize(dir) {
            match synced.result {
                Ok(scripts) => {
                    let indent = format!("{}├──", "│   ".repeat(synced.dir.depth() + 1));
                    for name in scripts.iter() {
                        writeln!(out, "{indent}{name}")?;
                    }
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    failed = true;
                }
            }
        }
    }
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Remove (or list, with `dry_run`) every manifest below the configured directories
fn clean(settings: &Settings, dry_run: bool, out: &mut impl Write) -> Result<ExitCode, ConfigureError> {
    let mut failed = false;
    if dry_run {
        writeln!(out, "The following files will be removed:")?;
    }
    for dir in settings.script_directories() {
        for result in manifest::clean(dir, dry_run) {
            match result {
                Ok(path) if dry_run => writeln!(out, "\t{}", path.display())?,
                Ok(path) => writeln!(out, "{} removed", path.display())?,
                Err(e) => {
                    eprintln!("Error: {e}");
                    failed = true;
                }
            }
        }
    }
    if dry_run {
        writeln!(out, "{RULE}")?;
    }
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn add_directory(
    settings: &mut Settings,
    kind: DirectoryKind,
    directory: &Path,
    out: &mut impl Write,
) -> Result<ExitCode, ConfigureError> {
    if !directory.is_dir() {
        writeln!(out, "The given directory does not exist!")?;
        writeln!(out, "{}", directory.display())?;
        return Ok(ExitCode::SUCCESS);
    }
    let directory = std::path::absolute(directory)?;
    if settings.add_directory(kind, directory.clone()) {
        settings.save()?;
        info!("Added {kind:?} directory {}", directory.display());
    } else {
        warn!("{} is already configured", directory.display());
    }
    Ok(ExitCode::SUCCESS)
}

/// Configured directory as shown in the `rmdir` listing
struct Listed {
    kind: DirectoryKind,
    path: PathBuf,
    removed: bool,
}

fn print_directory_list(listed: &[Listed], out: &mut impl Write) -> std::io::Result<()> {
    let width = listed.len() / 10 + 1;
    for (kind, title) in [
        (DirectoryKind::Root, "Root directories:"),
        (DirectoryKind::Sub, "Sub directories:"),
    ] {
        writeln!(out, "{title}")?;
        writeln!(out, "{RULE}")?;
        for (index, entry) in listed.iter().enumerate().filter(|(_, e)| e.kind == kind) {
            writeln!(out, "{index:>width$} {}", entry.path.display())?;
        }
    }
    writeln!(out, "{RULE}")?;
    writeln!(out, "Input number of directories not to handle anymore.")?;
    writeln!(out, "Save new configuration: ['q'], abort and discard: ['a']")?;
    Ok(())
}

/// Interactive dialog removing directories from the configuration.
///
/// Reads whitespace separated tokens until `q` (save) or `a` (abort). End of input
/// aborts. Any other token that isn't the index of a listed directory is an error.
fn remove_directories(
    settings: &mut Settings,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<ExitCode, ConfigureError> {
    let mut listed: Vec<Listed> = [DirectoryKind::Root, DirectoryKind::Sub]
        .into_iter()
        .flat_map(|kind| {
            settings.directories(kind).iter().map(move |path| Listed {
                kind,
                path: path.clone(),
                removed: false,
            })
        })
        .collect();
    print_directory_list(&listed, out)?;

    let mut line = String::new();
    loop {
        write!(out, ">>> ")?;
        out.flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(out, "Aborted, changes won't be saved")?;
            return Ok(ExitCode::SUCCESS);
        }
        for item in line.split_whitespace() {
            match item.to_lowercase().as_str() {
                "q" => {
                    for entry in listed.iter().filter(|e| e.removed) {
                        settings.remove_directory(entry.kind, &entry.path);
                    }
                    settings.save()?;
                    writeln!(out, "Configuration file successfully updated.")?;
                    return Ok(ExitCode::SUCCESS);
                }
                "a" => {
                    writeln!(out, "Aborted, changes won't be saved")?;
                    return Ok(ExitCode::SUCCESS);
                }
                _ => {
                    let entry = item
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| listed.get_mut(index))
                        .filter(|entry| !entry.removed);
                    let Some(entry) = entry else {
                        eprintln!("Invalid user input {item}");
                        return Ok(ExitCode::FAILURE);
                    };
                    entry.removed = true;
                    writeln!(out, "{} removed", entry.path.display())?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file::CONFIG_FILE_NAME;
    use std::fs;
    use std::io::Cursor;

    fn settings_in(dir: &Path) -> Settings {
        Settings::load(&dir.join(CONFIG_FILE_NAME)).unwrap()
    }

    fn run_action(action: &ConfigureAction, settings: &mut Settings, input: &str) -> (ExitCode, String) {
        let mut out = Vec::new();
        let code = run(action, settings, &mut Cursor::new(input.as_bytes()), &mut out).unwrap();
        (code, String::from_utf8(out).unwrap())
    }

    fn with_dirs(home: &Path, roots: &[&str], subs: &[&str]) -> Settings {
        let mut settings = settings_in(home);
        for name in roots {
            let dir = home.join(name);
            fs::create_dir_all(&dir).unwrap();
            settings.add_directory(DirectoryKind::Root, dir);
        }
        for name in subs {
            let dir = home.join(name);
            fs::create_dir_all(&dir).unwrap();
            settings.add_directory(DirectoryKind::Sub, dir);
        }
        settings.save().unwrap();
        settings
    }

    #[test]
    fn test_parse_actions() {
        let cli = ConfigureCli::try_parse_from(["configure", "clean", "-d"]).unwrap();
        assert_eq!(cli.action, ConfigureAction::Clean { dryrun: true });
        let cli = ConfigureCli::try_parse_from(["configure", "addsub", "/tmp"]).unwrap();
        assert_eq!(
            cli.action,
            ConfigureAction::Addsub {
                directory: PathBuf::from("/tmp")
            }
        );
        assert!(ConfigureCli::try_parse_from(["configure", "bogus"]).is_err());
    }

    #[test]
    fn test_addroot_persists_absolute_path() {
        let home = tempfile::tempdir().unwrap();
        let scripts = home.path().join("scripts");
        fs::create_dir(&scripts).unwrap();
        let mut settings = settings_in(home.path());

        let action = ConfigureAction::Addroot {
            directory: scripts.clone(),
        };
        run_action(&action, &mut settings, "");
        run_action(&action, &mut settings, "");

        let reloaded = settings_in(home.path());
        assert_eq!(reloaded.root_directories, vec![scripts]);
        assert!(reloaded.sub_directories.is_empty());
    }

    #[test]
    fn test_add_missing_directory_is_noop() {
        let home = tempfile::tempdir().unwrap();
        let mut settings = settings_in(home.path());
        let action = ConfigureAction::Addsub {
            directory: home.path().join("nope"),
        };
        let (_, out) = run_action(&action, &mut settings, "");
        assert!(out.starts_with("The given directory does not exist!"));
        assert!(!home.path().join(CONFIG_FILE_NAME).exists());
    }

    #[test]
    fn test_update_lists_scripts_as_tree() {
        let home = tempfile::tempdir().unwrap();
        let mut settings = with_dirs(home.path(), &["plots"], &[]);
        let plots = home.path().join("plots");
        fs::create_dir(plots.join("nested")).unwrap();
        fs::write(plots.join("plota.py"), "").unwrap();
        fs::write(plots.join("nested/inner.py"), "").unwrap();

        let (code, out) = run_action(&ConfigureAction::Update, &mut settings, "");
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::SUCCESS));
        let listing: Vec<&str> = out.lines().skip(4).collect();
        assert_eq!(listing, vec!["│   ├──plota", "│   │   ├──inner"]);
        assert!(plots.join("nested/__init__.py").is_file());
    }

    #[test]
    fn test_clean_dry_run_keeps_files() {
        let home = tempfile::tempdir().unwrap();
        let mut settings = with_dirs(home.path(), &[], &["subplots"]);
        let sub = home.path().join("subplots");
        fs::write(sub.join("plotb.py"), "").unwrap();
        run_action(&ConfigureAction::Update, &mut settings, "");

        let (_, out) = run_action(&ConfigureAction::Clean { dryrun: true }, &mut settings, "");
        assert!(out.contains("__init__.py"));
        assert!(sub.join("__init__.py").exists());

        run_action(&ConfigureAction::Clean { dryrun: false }, &mut settings, "");
        assert!(!sub.join("__init__.py").exists());
        assert!(sub.join("plotb.py").exists());
    }

    #[test]
    fn test_rmdir_removes_and_saves() {
        let home = tempfile::tempdir().unwrap();
        let mut settings = with_dirs(home.path(), &["r0", "r1"], &["s2"]);

        let (code, out) = run_action(&ConfigureAction::Rmdir, &mut settings, "0 2\nq\n");
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::SUCCESS));
        assert!(out.contains("Root directories:"));
        assert!(out.contains("Configuration file successfully updated."));

        let reloaded = settings_in(home.path());
        assert_eq!(reloaded.root_directories, vec![home.path().join("r1")]);
        assert!(reloaded.sub_directories.is_empty());
    }

    #[test]
    fn test_rmdir_abort_discards() {
        let home = tempfile::tempdir().unwrap();
        let mut settings = with_dirs(home.path(), &["r0"], &[]);
        let (_, out) = run_action(&ConfigureAction::Rmdir, &mut settings, "0 a\n");
        assert!(out.contains("Aborted"));
        assert_eq!(settings_in(home.path()).root_directories.len(), 1);
    }

    #[test]
    fn test_rmdir_invalid_input_fails() {
        let home = tempfile::tempdir().unwrap();
        let mut settings = with_dirs(home.path(), &["r0"], &[]);
        for input in ["x\n", "5\n", "0 0\n"] {
            let (code, _) = run_action(&ConfigureAction::Rmdir, &mut settings, input);
            assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::FAILURE));
        }
        assert_eq!(settings_in(home.path()).root_directories.len(), 1);
    }

    #[test]
    fn test_rmdir_listing_indices() {
        let home = tempfile::tempdir().unwrap();
        let settings = with_dirs(home.path(), &["r0"], &["s1"]);
        let listed: Vec<Listed> = [DirectoryKind::Root, DirectoryKind::Sub]
            .into_iter()
            .flat_map(|kind| {
                settings.directories(kind).iter().map(move |path| Listed {
                    kind,
                    path: path.clone(),
                    removed: false,
                })
            })
            .collect();
        let mut out = Vec::new();
        print_directory_list(&listed, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(&format!("0 {}", home.path().join("r0").display())));
        assert!(out.contains(&format!("1 {}", home.path().join("s1").display())));
    }
}
