//! Per-directory script manifests
//!
//! Every script directory gets an `__init__.py` listing the scripts found next to it:
//!
//! ```text
//! __all__ = [
//!     'plota',
//!     'plotb',
//! ]
//! ```
//!
//! The manifest is written only by `configure update` and removed by `configure clean`.
//! The command tree reads it back to decide which scripts a directory exposes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, warn};
use regex::Regex;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Marker a file name must contain to count as a script
pub const SCRIPT_EXTENSION: &str = ".py";

/// File the manifest is materialized as
pub const MANIFEST_FILE_NAME: &str = "__init__.py";

/// Script name the manifest file itself would resolve to
const MANIFEST_NAME: &str = "__init__";

static MANIFEST_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)__all__\s*=\s*\[(.*?)\]").expect("manifest body regex is valid")
});
static MANIFEST_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'([^']*)'|"([^"]*)""#).expect("manifest entry regex is valid")
});

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Unable to list directory {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to write manifest in {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to remove manifest {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Set of script names valid within one directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptManifest {
    names: BTreeSet<String>,
}

impl ScriptManifest {
    #[must_use]
    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Render as an exported-names declaration, one quoted entry per line
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("__all__ = [\n");
        for name in &self.names {
            out.push_str("    '");
            out.push_str(name);
            out.push_str("',\n");
        }
        out.push(']');
        out
    }

    /// Parse a rendered manifest. Returns `None` if `text` has no `__all__` declaration.
    #[must_use]
    pub fn parse(text: &str) -> Option<ScriptManifest> {
        let body = MANIFEST_BODY.captures(text)?.get(1)?.as_str();
        let names = MANIFEST_ENTRY
            .captures_iter(body)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();
        Some(ScriptManifest { names })
    }
}

impl FromIterator<String> for ScriptManifest {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        ScriptManifest {
            names: iter.into_iter().collect(),
        }
    }
}

/// Whether a file name starts with the hidden marker
#[must_use]
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Whether `file_name` inside `dir` is an eligible script file.
///
/// Hidden files (editor swaps and similar) are never scripts.
#[must_use]
pub fn is_script_file(dir: &Path, file_name: &str) -> bool {
    file_name.contains(SCRIPT_EXTENSION) && !is_hidden(file_name) && dir.join(file_name).is_file()
}

/// Whether `name` survives a render and parse of the manifest unchanged
fn fits_manifest(name: &str) -> bool {
    !name.is_empty() && !name.contains(['\'', '\\', ']']) && !name.chars().any(char::is_control)
}

/// Collect the names of all scripts directly inside `dir`.
///
/// # Errors
///
/// Returns `ManifestError::List` if the directory cannot be listed.
pub fn scan_directory(dir: &Path) -> Result<ScriptManifest, ManifestError> {
    let list_error = |e| ManifestError::List {
        path: dir.to_path_buf(),
        source: e,
    };
    let mut names = BTreeSet::new();
    for entry in std::fs::read_dir(dir).map_err(list_error)? {
        let entry = entry.map_err(list_error)?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            debug!("Skipping non UTF-8 file name in {}", dir.display());
            continue;
        };
        if !is_script_file(dir, file_name) {
            continue;
        }
        let Some((name, _)) = file_name.split_once(SCRIPT_EXTENSION) else {
            continue;
        };
        if name == MANIFEST_NAME {
            continue;
        }
        if !fits_manifest(name) {
            warn!("Skipping {}: its name can't be listed in a manifest", dir.join(file_name).display());
            continue;
        }
        names.insert(name.to_string());
    }
    Ok(ScriptManifest { names })
}

/// Write `manifest` into `dir`, replacing any previous manifest.
///
/// # Errors
///
/// Returns `ManifestError::Write` if the directory is not writable.
pub fn write_manifest(dir: &Path, manifest: &ScriptManifest) -> Result<(), ManifestError> {
    std::fs::write(dir.join(MANIFEST_FILE_NAME), manifest.render()).map_err(|e| {
        ManifestError::Write {
            path: dir.to_path_buf(),
            source: e,
        }
    })
}

/// Read the manifest of `dir`. Returns `Ok(None)` when the directory has none.
///
/// # Errors
///
/// Returns `ManifestError::Read` if a manifest exists but cannot be read.
pub fn read_manifest(dir: &Path) -> Result<Option<ScriptManifest>, ManifestError> {
    let path = dir.join(MANIFEST_FILE_NAME);
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path).map_err(|e| ManifestError::Read {
        path: path.clone(),
        source: e,
    })?;
    Ok(ScriptManifest::parse(&text))
}

/// Scan `dir` and write its manifest.
///
/// # Errors
///
/// Returns `ManifestError` if listing the directory or writing the manifest fails.
pub fn synchronize_dir(dir: &Path) -> Result<ScriptManifest, ManifestError> {
    let manifest = scan_directory(dir)?;
    write_manifest(dir, &manifest)?;
    debug!("Wrote {} script(s) to manifest in {}", manifest.len(), dir.display());
    Ok(manifest)
}

/// A directory visited while walking a script tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDir {
    pub path: PathBuf,
    /// Directory names from the walked root down to `path`, root excluded
    pub segments: Vec<String>,
}

impl ScriptDir {
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

fn is_visible_dir(entry: &DirEntry) -> bool {
    entry.depth() == 0
        || !entry.file_type().is_dir()
        || !entry.file_name().to_str().is_some_and(is_hidden)
}

/// Walk `root` and every non-hidden subdirectory below it, parents before children.
///
/// A subdirectory that can't be listed is logged and skipped along with everything
/// below it; its siblings are still visited.
#[must_use]
pub fn walk_script_dirs(root: &Path) -> Vec<ScriptDir> {
    let mut dirs = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(is_visible_dir);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable directory: {e}");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let segments = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        dirs.push(ScriptDir {
            path: entry.into_path(),
            segments,
        });
    }
    dirs
}

/// Outcome of synchronizing a single directory of a tree
#[derive(Debug)]
pub struct SyncedDir {
    pub dir: ScriptDir,
    pub result: Result<ScriptManifest, ManifestError>,
}

/// Synchronize the manifest of `root` and of every directory below it.
///
/// Failures are kept per directory so one bad directory doesn't stop the rest.
#[must_use]
pub fn synchronize(root: &Path) -> Vec<SyncedDir> {
    walk_script_dirs(root)
        .into_iter()
        .map(|dir| {
            let result = synchronize_dir(&dir.path);
            if let Err(ref e) = result {
                warn!("{e}");
            }
            SyncedDir { dir, result }
        })
        .collect()
}

/// Remove every manifest below `root`, or only report them when `dry_run` is set.
///
/// Returns the manifest files removed (or that would be removed), plus one error
/// per file that couldn't be removed.
pub fn clean(root: &Path, dry_run: bool) -> Vec<Result<PathBuf, ManifestError>> {
    walk_script_dirs(root)
        .into_iter()
        .map(|dir| dir.path.join(MANIFEST_FILE_NAME))
        .filter(|path| path.is_file())
        .map(|path| {
            if dry_run {
                return Ok(path);
            }
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(path),
                Err(e) => Err(ManifestError::Remove { path, source: e }),
            }
        })
        .collect()
}
