//! Command tree mirroring the configured script directories
//!
//! Nodes live in one arena and are indexed by their dotted path from the default
//! group (`default.paper.fig1`). Groups are created on first reference: asking for
//! `default.a.b` first makes sure `default.a` exists, down to the default group,
//! which is seeded at construction so the recursion always ends.
//!
//! A root directory is attached at the default group itself, a sub directory at a
//! group named after it, so the two never share an attachment point.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Arg, Command, CommandFactory};
use log::{debug, warn};
use thiserror::Error;

use crate::config_file::Settings;
use crate::configure::ConfigureCli;
use crate::manifest::{self, ScriptDir};
use crate::scripts::{LoadError, Registry, ScriptDescriptor, ScriptKind};

/// Key of the pre-seeded top-level group
pub const DEFAULT_KEY: &str = "default";

/// Id of the catch-all argument of raw scripts
pub const RAW_ARGUMENTS: &str = "arguments";

/// Name of the built-in configuration command
pub const CONFIGURE: &str = "configure";

pub type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("Unknown top-level group `{0}`")]
    UnknownRoot(String),
    #[error("`{name}` is already a command in `{parent}`")]
    NameClash { parent: String, name: String },
    #[error("Configured directory has no usable name: {0}")]
    InvalidDirectory(PathBuf),
    #[error(transparent)]
    Structural(#[from] LoadError),
}

/// What a leaf command runs
#[derive(Debug, Clone)]
pub enum Leaf {
    Script(ScriptDescriptor),
    Configure,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Group { children: Vec<NodeId> },
    Leaf(Leaf),
}

#[derive(Debug, Clone)]
pub struct CommandNode {
    pub name: String,
    pub about: String,
    pub long_about: Option<String>,
    pub kind: NodeKind,
}

impl CommandNode {
    fn group(name: &str) -> Self {
        CommandNode {
            name: name.to_string(),
            about: format!("::access members of {name}"),
            long_about: None,
            kind: NodeKind::Group {
                children: Vec::new(),
            },
        }
    }

    fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Group { children } => children,
            NodeKind::Leaf(_) => &[],
        }
    }

    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group { .. })
    }
}

/// Arena of command groups and leaves
#[derive(Debug, Clone)]
pub struct CommandTree {
    nodes: Vec<CommandNode>,
    index: HashMap<String, NodeId>,
}

impl Default for CommandTree {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTree {
    #[must_use]
    pub fn new() -> Self {
        CommandTree {
            nodes: vec![CommandNode::group(DEFAULT_KEY)],
            index: HashMap::from([(DEFAULT_KEY.to_string(), ROOT)]),
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        ROOT
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &CommandNode {
        &self.nodes[id]
    }

    /// Number of groups, the default group included
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_group()).count()
    }

    /// Register a sub directory called `name` as a group under the default group.
    ///
    /// Returns the dotted path its scripts are attached under.
    ///
    /// # Errors
    ///
    /// Returns `TreeError::NameClash` if a leaf called `name` is already at the top level.
    pub fn add_sub(&mut self, name: &str) -> Result<Vec<String>, TreeError> {
        let path = vec![DEFAULT_KEY.to_string(), name.to_string()];
        self.ensure_group(&path)?;
        Ok(path)
    }

    /// Return the group for `path`, creating it and any missing ancestors.
    ///
    /// # Errors
    ///
    /// Returns `TreeError::UnknownRoot` if the path doesn't start at the default
    /// group, or `TreeError::NameClash` if a segment collides with an existing leaf.
    pub fn ensure_group<S: AsRef<str>>(&mut self, path: &[S]) -> Result<NodeId, TreeError> {
        let key = dotted(path);
        if let Some(&id) = self.index.get(&key) {
            return Ok(id);
        }
        let Some((title, parent_path)) = path.split_last() else {
            return Ok(ROOT);
        };
        if parent_path.is_empty() {
            return Err(TreeError::UnknownRoot(key));
        }
        let parent = self.ensure_group(parent_path)?;
        let id = self.child_group(parent, title.as_ref())?;
        debug!("Created group {key}");
        self.index.insert(key, id);
        Ok(id)
    }

    /// Existing child group `name` of `parent`, or a new one
    fn child_group(&mut self, parent: NodeId, name: &str) -> Result<NodeId, TreeError> {
        if let Some(existing) = self.child(parent, name) {
            if self.nodes[existing].is_group() {
                return Ok(existing);
            }
            return Err(TreeError::NameClash {
                parent: self.nodes[parent].name.clone(),
                name: name.to_string(),
            });
        }
        Ok(self.push_child(parent, CommandNode::group(name)))
    }

    fn push_child(&mut self, parent: NodeId, node: CommandNode) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        if let NodeKind::Group { children } = &mut self.nodes[parent].kind {
            children.push(id);
        }
        id
    }

    /// Child of `parent` called `name`
    #[must_use]
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[parent]
            .children()
            .iter()
            .copied()
            .find(|&id| self.nodes[id].name == name)
    }

    /// Attach `leaf` to `group`. Names already taken in the group are skipped.
    pub fn add_leaf(
        &mut self,
        group: NodeId,
        name: &str,
        about: String,
        long_about: Option<String>,
        leaf: Leaf,
    ) -> Option<NodeId> {
        if self.child(group, name).is_some() {
            warn!(
                "Skipping `{name}`: `{}` already has a command with that name",
                self.nodes[group].name
            );
            return None;
        }
        let node = CommandNode {
            name: name.to_string(),
            about,
            long_about,
            kind: NodeKind::Leaf(leaf),
        };
        Some(self.push_child(group, node))
    }

    /// Attach a script as a leaf of `group`
    pub fn add_script(&mut self, group: NodeId, descriptor: ScriptDescriptor) -> Option<NodeId> {
        let name = descriptor.name.clone();
        let about = descriptor.summary().to_string();
        let long_about = (!descriptor.doc.is_empty()).then(|| descriptor.doc.clone());
        self.add_leaf(group, &name, about, long_about, Leaf::Script(descriptor))
    }

    /// Follow `path` of command names from the top level
    #[must_use]
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Option<NodeId> {
        path.iter()
            .try_fold(ROOT, |node, name| self.child(node, name.as_ref()))
    }

    /// Command name paths of every script leaf, depth first
    #[must_use]
    pub fn script_paths(&self) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        self.collect_scripts(ROOT, &mut Vec::new(), &mut paths);
        paths
    }

    fn collect_scripts(&self, id: NodeId, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        for &child in self.nodes[id].children() {
            let node = &self.nodes[child];
            prefix.push(node.name.clone());
            match &node.kind {
                NodeKind::Group { .. } => self.collect_scripts(child, prefix, out),
                NodeKind::Leaf(Leaf::Script(_)) => out.push(prefix.clone()),
                NodeKind::Leaf(Leaf::Configure) => {}
            }
            prefix.pop();
        }
    }

    /// Render the tree as a clap command named `name`
    #[must_use]
    pub fn to_command(&self, name: &str) -> Command {
        let cmd = Command::new(name.to_string())
            .version(env!("CARGO_PKG_VERSION"))
            .about("Bundle of plotting scripts")
            .subcommand_required(true)
            .arg_required_else_help(true);
        self.nodes[ROOT]
            .children()
            .iter()
            .fold(cmd, |cmd, &child| cmd.subcommand(self.render(child)))
    }

    fn render(&self, id: NodeId) -> Command {
        let node = &self.nodes[id];
        let mut cmd = match &node.kind {
            NodeKind::Group { children } => children.iter().fold(
                Command::new(node.name.clone())
                    .subcommand_required(true)
                    .arg_required_else_help(true),
                |cmd, &child| cmd.subcommand(self.render(child)),
            ),
            NodeKind::Leaf(Leaf::Configure) => ConfigureCli::command().name(CONFIGURE),
            NodeKind::Leaf(Leaf::Script(descriptor)) => {
                let cmd = Command::new(node.name.clone());
                match &descriptor.kind {
                    ScriptKind::Structured(spec) => cmd.args(spec.to_args()),
                    ScriptKind::Raw => cmd.arg(
                        Arg::new(RAW_ARGUMENTS)
                            .num_args(0..)
                            .trailing_var_arg(true)
                            .allow_hyphen_values(true)
                            .help(format!("possible unknown arguments for {}", node.name)),
                    ),
                }
            }
        };
        cmd = cmd.about(node.about.clone());
        if let Some(long_about) = &node.long_about {
            cmd = cmd.long_about(long_about.clone());
        }
        cmd
    }
}

fn dotted<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(".")
}

/// Build the command tree for every configured directory.
///
/// Directories without a manifest are skipped. Scripts that vanished since the
/// last update are reported and skipped.
///
/// # Errors
///
/// Returns `TreeError::Structural` if a listed script exists but can't be used,
/// or another `TreeError` if the directory layout can't be expressed as commands.
pub fn build_tree(settings: &Settings, registry: &Registry) -> Result<CommandTree, TreeError> {
    let mut tree = CommandTree::new();
    tree.add_leaf(
        ROOT,
        CONFIGURE,
        "Configure the directories scripts are collected from".to_string(),
        None,
        Leaf::Configure,
    );

    let roots = settings.root_directories.iter().map(|d| (true, d));
    let subs = settings.sub_directories.iter().map(|d| (false, d));
    for (is_root, dir) in roots.chain(subs) {
        let anchor = if is_root {
            vec![DEFAULT_KEY.to_string()]
        } else {
            let name = dir
                .file_name()
                .and_then(OsStr::to_str)
                .ok_or_else(|| TreeError::InvalidDirectory(dir.clone()))?;
            tree.add_sub(name)?
        };
        for script_dir in manifest::walk_script_dirs(dir) {
            register_scripts(&mut tree, registry, &anchor, &script_dir)?;
        }
    }
    Ok(tree)
}

/// Attach the scripts listed in the manifest of `dir`
fn register_scripts(
    tree: &mut CommandTree,
    registry: &Registry,
    anchor: &[String],
    dir: &ScriptDir,
) -> Result<(), TreeError> {
    let manifest = match manifest::read_manifest(&dir.path) {
        Ok(Some(manifest)) => manifest,
        // Not set up by `configure update` yet
        Ok(None) => return Ok(()),
        Err(e) => {
            warn!("{e}");
            return Ok(());
        }
    };
    let path: Vec<&str> = anchor
        .iter()
        .chain(&dir.segments)
        .map(String::as_str)
        .collect();
    let group = tree.ensure_group(&path)?;
    for name in manifest.iter() {
        if let Some(descriptor) = registry.resolve(&dir.path, name)? {
            tree.add_script(group, descriptor);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_preseeded() {
        let tree = CommandTree::new();
        assert_eq!(tree.group_count(), 1);
        assert_eq!(tree.node(tree.root()).name, DEFAULT_KEY);
    }

    #[test]
    fn test_lazy_groups_nested_five_levels() {
        let mut tree = CommandTree::new();
        let path = [DEFAULT_KEY, "a", "b", "c", "d", "e"];
        let leaf_group = tree.ensure_group(&path).unwrap();
        assert_eq!(tree.group_count(), 6);

        // Repeated access returns the same groups
        assert_eq!(tree.ensure_group(&path).unwrap(), leaf_group);
        assert_eq!(tree.ensure_group(&path[..3]).unwrap(), tree.find(&["a", "b"]).unwrap());
        assert_eq!(tree.group_count(), 6);
        assert_eq!(tree.find(&["a", "b", "c", "d", "e"]), Some(leaf_group));
    }

    #[test]
    fn test_path_outside_default_group() {
        let mut tree = CommandTree::new();
        assert!(matches!(
            tree.ensure_group(&["nowhere", "x"]),
            Err(TreeError::UnknownRoot(key)) if key == "nowhere"
        ));
    }

    #[test]
    fn test_sub_is_nested_under_default() {
        let mut tree = CommandTree::new();
        let anchor = tree.add_sub("extra").unwrap();
        assert_eq!(anchor, [DEFAULT_KEY, "extra"]);
        let sub = tree.find(&["extra"]).unwrap();
        assert_ne!(sub, tree.root());
        assert_eq!(tree.ensure_group(&anchor).unwrap(), sub);
        assert_eq!(tree.ensure_group(&[DEFAULT_KEY]).unwrap(), tree.root());

        let nested = tree.ensure_group(&[DEFAULT_KEY, "extra", "deeper"]).unwrap();
        assert_eq!(tree.find(&["extra", "deeper"]), Some(nested));
    }

    #[test]
    fn test_sub_named_like_root_gets_own_group() {
        let home = tempfile::tempdir().unwrap();
        let root = home.path().join("a").join("plots");
        let sub = home.path().join("b").join("plots");
        for (dir, script) in [(&root, "fromroot"), (&sub, "fromsub")] {
            std::fs::create_dir_all(dir).unwrap();
            std::fs::write(dir.join(format!("{script}.py")), "def main():\n    pass\n").unwrap();
            manifest::synchronize_dir(dir).unwrap();
        }
        let mut settings = Settings::default();
        settings.root_directories.push(root);
        settings.sub_directories.push(sub);

        let registry = Registry::new(crate::scripts::file::FileLoader::new("python3"));
        let tree = build_tree(&settings, &registry).unwrap();
        assert_eq!(
            tree.script_paths(),
            vec![vec!["fromroot"], vec!["plots", "fromsub"]]
        );
    }

    #[test]
    fn test_leaf_name_clash_skipped() {
        let mut tree = CommandTree::new();
        let first = tree.add_leaf(ROOT, "plot", String::new(), None, Leaf::Configure);
        let second = tree.add_leaf(ROOT, "plot", String::new(), None, Leaf::Configure);
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn test_group_over_leaf_is_clash() {
        let mut tree = CommandTree::new();
        tree.add_leaf(ROOT, "plot", String::new(), None, Leaf::Configure);
        assert!(matches!(
            tree.add_sub("plot"),
            Err(TreeError::NameClash { name, .. }) if name == "plot"
        ));
    }

    #[test]
    fn test_rendered_group_help() {
        let mut tree = CommandTree::new();
        tree.add_sub("extra").unwrap();
        let cmd = tree.to_command("pyplot");
        let extra = cmd.find_subcommand("extra").unwrap();
        assert_eq!(
            extra.get_about().map(ToString::to_string).as_deref(),
            Some("::access members of extra")
        );
    }
}
