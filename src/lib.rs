//! Core implementation of pyplot
//!
//! pyplot bundles plotting scripts scattered over several directories behind one
//! command line. `configure update` writes a manifest into every script directory;
//! at startup the manifests are turned into a tree of subcommands mirroring the
//! directory layout, so any script runs as `pyplot <group...> <script> [args...]`.

pub mod config_file;
pub mod configure;
pub mod dispatch;
pub mod logger;
pub mod manifest;
pub mod scripts;
pub mod tree;

pub use dispatch::{DispatchError, GlobalArgs, Invocation, dispatch, parse, run};
pub use tree::{CommandTree, build_tree};
