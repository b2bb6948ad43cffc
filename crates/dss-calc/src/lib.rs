//! # dss-calc: the five stability calculations
//!
//! Each solver drives the simulator façade through many load/reset cycles
//! to answer one planning question per (regime, repair schema, scenario)
//! combination:
//!
//! - [`ShuntSolver`] — short-circuit shunt impedances for a prescribed
//!   residual voltage (§ shunt search)
//! - [`CritTimeSolver`] — critical fault-clearing time (bisection)
//! - [`DynBatchRunner`] — pass/fail dynamic verdicts with optional plots
//! - [`MdpSolver`] — maximum admissible cross-section flow (continuation
//!   plus dual-bracket bisection)
//! - [`UostSolver`] — residual voltages at a fault on the stability
//!   boundary (line splitting plus boundary search)
//!
//! All solvers share the same shape: construction validates the input
//! bundle and fails fast with a user-readable message; `calc` walks
//! regimes → active variants → scenarios in input order, creates one fresh
//! simulator handle per triple, degrades per-triple failures to sentinel
//! values, and returns the nested result tree. Every search loop is
//! bounded and guarded against stagnation.

pub mod crt_time;
pub mod dyn_batch;
pub mod mdp;
pub mod plot;
pub mod search;
pub mod session;
pub mod shunt;
pub mod uost;

pub use crt_time::CritTimeSolver;
pub use dyn_batch::DynBatchRunner;
pub use mdp::MdpSolver;
pub use plot::{NullPlotSink, PlotSeries, PlotSink};
pub use search::{FlowBracket, SearchState, StagnationGuard};
pub use session::CaseBuilder;
pub use shunt::ShuntSolver;
pub use uost::UostSolver;
