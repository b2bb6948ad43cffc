//! The simulator façade trait and its error taxonomy.

use crate::log::{LogObserver, ObserverId};
use crate::selector::RowSelector;
use crate::tables::{col, BRANCH, SCN_ACTIONS};
use dss_core::{DssError, DynVerdict};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use thiserror::Error;

/// Typed errors from simulator operations.
///
/// A failing operation aborts the current (regime, variant, scenario)
/// triple with sentinel values; the outer loop continues.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("no case template for extension '{0}'")]
    MissingTemplate(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("type mismatch reading {table}.{column}: expected {expected}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: &'static str,
    },

    #[error("no row matches '{selector}' in table '{table}'")]
    NoMatch { table: String, selector: String },

    #[error("simulator engine error: {0}")]
    Engine(String),
}

impl From<SimError> for DssError {
    fn from(err: SimError) -> Self {
        DssError::Simulator(err.to_string())
    }
}

pub type SimResult<T> = Result<T, SimError>;

/// A tabular cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Str(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Str(v)
    }
}

/// One sample from a post-run time series: `x` is time in seconds, `y` the
/// monitored value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Uniform interface to the external power-system simulator.
///
/// Implementations wrap a stateful simulator handle and are confined to a
/// single thread; interior mutability is expected. One handle is alive at
/// a time within a solver and is dropped before the next
/// (regime, variant, scenario) triple.
pub trait SimFacade {
    // -- case round-trips ---------------------------------------------------

    /// Load a file, replacing the in-memory case of its kind.
    fn load(&self, path: &Path) -> SimResult<()>;

    /// Save the in-memory case of the kind matching the path's extension.
    fn save(&self, path: &Path) -> SimResult<()>;

    /// Load a file additively (merge into the current case).
    fn add(&self, path: &Path) -> SimResult<()>;

    /// Open a fresh template case for the given extension.
    fn load_template(&self, extension: &str) -> SimResult<()>;

    /// Resolve the per-file-type schema template used by load/save.
    fn find_template_path_with_extension(&self, extension: &str) -> SimResult<PathBuf>;

    // -- computations -------------------------------------------------------

    /// Run the steady-state solver; `true` means the case balanced.
    fn rgm(&self) -> SimResult<bool>;

    /// Apply a repair-schema variant by ordinal, then re-balance.
    fn apply_variant(&self, ordinal: i64, repair_file: &Path) -> SimResult<bool>;

    /// Set the simulator-side dynamic switches: one result file, snapshot
    /// auto-load on, one snapshot kept.
    fn dyn_settings(&self) -> SimResult<()>;

    /// Electromechanical-transient run. `ems` selects the fast verdict-only
    /// path; `max_time` overrides the horizon for this run only (the
    /// previous horizon is restored before returning).
    fn run_dynamic(&self, ems: bool, max_time: Option<f64>) -> SimResult<DynVerdict>;

    /// Exhaust the continuation engine along the loaded trajectory; returns
    /// the final coefficient sum.
    fn run_ut(&self) -> SimResult<f64>;

    /// Single continuation step with the supplied coefficient; returns the
    /// updated coefficient sum. `init` re-initialises the engine first.
    fn step(&self, coefficient: f64, init: bool) -> SimResult<f64>;

    /// Invoke the emergency-automatics synthesis operation with the given
    /// command string.
    fn lapnusmzu(&self, command: &str) -> SimResult<()>;

    // -- tabular cell I/O ---------------------------------------------------

    fn get_val_i64(&self, table: &str, column: &str, selector: &RowSelector) -> SimResult<i64>;
    fn get_val_f64(&self, table: &str, column: &str, selector: &RowSelector) -> SimResult<f64>;
    fn get_val_str(&self, table: &str, column: &str, selector: &RowSelector) -> SimResult<String>;

    fn set_val(
        &self,
        table: &str,
        column: &str,
        selector: &RowSelector,
        value: CellValue,
    ) -> SimResult<()>;

    /// Enumerate row indices matching a native predicate (empty predicate
    /// matches every row).
    fn selection(&self, table: &str, predicate: &str) -> SimResult<Vec<usize>>;

    /// Append a row; returns its index.
    fn add_table_row(&self, table: &str) -> SimResult<usize>;

    /// Extract a time series from the latest dynamic-run exit file.
    fn get_points_from_exit_file(
        &self,
        table: &str,
        column: &str,
        selection: &str,
    ) -> SimResult<Vec<Point>>;

    // -- log observation ----------------------------------------------------

    fn subscribe(&self, observer: Rc<dyn LogObserver>) -> ObserverId;
    fn unsubscribe(&self, id: ObserverId);

    // -- provided helpers ---------------------------------------------------

    /// Distribute a split line's impedance between its two halves: the
    /// first branch gets `percent` % of R and X, the second the remainder,
    /// then the case is re-balanced.
    fn set_line_for_uost_calc(
        &self,
        first: usize,
        second: usize,
        r: f64,
        x: f64,
        percent: f64,
    ) -> SimResult<()> {
        let r_part = percent * r / 100.0;
        let x_part = percent * x / 100.0;
        self.set_val(BRANCH, col::R, &RowSelector::Index(first), r_part.into())?;
        self.set_val(
            BRANCH,
            col::R,
            &RowSelector::Index(second),
            (r - r_part).into(),
        )?;
        self.set_val(BRANCH, col::X, &RowSelector::Index(first), x_part.into())?;
        self.set_val(
            BRANCH,
            col::X,
            &RowSelector::Index(second),
            (x - x_part).into(),
        )?;
        self.rgm()?;
        Ok(())
    }

    /// Rewrite the shunt components inside scenario action formulas.
    fn change_rx_for_uost_calc(
        &self,
        x_action: usize,
        x: f64,
        r_action: Option<(usize, f64)>,
    ) -> SimResult<()> {
        self.set_val(
            SCN_ACTIONS,
            col::FORMULA,
            &RowSelector::Index(x_action),
            crate::scenario::formula_value(x).into(),
        )?;
        if let Some((action, r)) = r_action {
            self.set_val(
                SCN_ACTIONS,
                col::FORMULA,
                &RowSelector::Index(action),
                crate::scenario::formula_value(r).into(),
            )?;
        }
        Ok(())
    }
}

/// Creates a fresh simulator handle per (regime, variant, scenario) triple.
pub trait SimFactory {
    fn create(&self) -> SimResult<Box<dyn SimFacade>>;
}

impl<F> SimFactory for F
where
    F: Fn() -> SimResult<Box<dyn SimFacade>>,
{
    fn create(&self) -> SimResult<Box<dyn SimFacade>> {
        self()
    }
}
