//! suitebuild-lib: suite resolution and build scheduling for multi-repository workspaces
//!
//! The crate is split along the two halves of a build:
//! - `suite`: discovers the transitive set of suites a primary suite imports and
//!   pins each backing repository to a single revision
//! - `graph`: loads the dependencies those suites declare into one name-keyed graph
//! - `build` / `execute`: turns the graph into build tasks and runs them concurrently
//!   under a CPU budget, skipping tasks whose outputs are current

pub mod build;
pub mod config;
pub mod consts;
pub mod execute;
pub mod graph;
pub mod platform;
pub mod suite;
pub mod util;
pub mod vcs;
