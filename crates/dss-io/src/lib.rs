//! # dss-io: file-backed inputs and outputs
//!
//! The only input the engine parses itself is the shunt-task CSV; every
//! other input file is an opaque simulator format referenced by path. On
//! the output side this crate writes the per-run JSON results manifest
//! that stands between the solvers and the external report writer.

pub mod report_file;
pub mod shunt_task;

pub use report_file::{load_results_manifest, write_results_manifest, RunManifest};
pub use shunt_task::read_shunt_tasks;
