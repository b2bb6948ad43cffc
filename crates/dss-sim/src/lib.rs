//! # dss-sim: simulator façade
//!
//! Uniform interface to the external steady-state / electromechanical-
//! transient simulator. The engine in `dss-calc` never touches the
//! simulator directly; everything goes through the [`SimFacade`] trait:
//! case round-trips, tabular cell I/O, steady-state balancing, dynamic
//! runs, continuation stepping, and post-run time-series extraction.
//!
//! The trait mirrors the simulator's own vocabulary (tables `node`,
//! `vetv`, `sechen`, …) but with typed cell accessors: a caller states
//! whether it wants an `i64`, an `f64` or a string, and mismatches surface
//! as [`SimError::TypeMismatch`] instead of being coerced silently.
//!
//! Simulator log output is observable through a subscribe/unsubscribe pair;
//! [`log::ScopedObserver`] gives RAII scoping so a subscriber installed
//! around a dynamic run is removed on every exit path.
//!
//! [`testing`] hosts an in-memory scripted simulator used by the solver
//! test suites.

pub mod facade;
pub mod log;
pub mod scenario;
pub mod selector;
pub mod tables;
pub mod testing;

pub use facade::{CellValue, Point, SimError, SimFacade, SimFactory, SimResult};
pub use log::{LogEvent, LogObserver, ObserverId, ResidualVoltageTap, ScopedObserver};
pub use selector::RowSelector;
