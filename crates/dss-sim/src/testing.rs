//! In-memory scripted simulator.
//!
//! A [`SimFacade`] implementation backed by plain tables, used by the
//! solver test suites. Physics is supplied by the test: behaviour hooks
//! decide whether a case balances, what a dynamic run concludes, and how a
//! continuation step moves the monitored flows. Everything else — row
//! selection, cell I/O, snapshot save/load, template resets, log
//! dispatch — behaves like the real simulator.

use crate::facade::{CellValue, Point, SimError, SimFacade, SimResult};
use crate::log::{LogEvent, LogObserver, ObserverId};
use crate::selector::RowSelector;
use crate::tables::{col, BRANCH, DYNAMICS, NODE, SCN_ACTIONS, SECTION, UT_COMMON, VARIANTS};
use dss_core::DynVerdict;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// One in-memory table: named columns over a shared row count.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: BTreeMap<String, Vec<CellValue>>,
    rows: usize,
}

impl Table {
    pub fn with_columns(names: &[&str]) -> Self {
        let mut table = Table::default();
        for name in names {
            table.columns.insert(name.to_string(), Vec::new());
        }
        table
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn add_row(&mut self) -> usize {
        for column in self.columns.values_mut() {
            column.push(CellValue::Float(0.0));
        }
        self.rows += 1;
        self.rows - 1
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&CellValue> {
        self.columns.get(column).and_then(|c| c.get(row))
    }

    pub fn set(&mut self, row: usize, column: &str, value: CellValue) {
        let cells = self
            .columns
            .entry(column.to_string())
            .or_insert_with(|| vec![CellValue::Float(0.0); self.rows]);
        if row < cells.len() {
            cells[row] = value;
        }
    }

    fn matches(&self, row: usize, clauses: &[(String, String)]) -> bool {
        clauses.iter().all(|(column, wanted)| {
            let Some(cell) = self.get(row, column) else {
                return false;
            };
            match (cell_to_f64(cell), wanted.parse::<f64>()) {
                (Some(have), Ok(want)) => have == want,
                _ => cell_to_string(cell) == *wanted,
            }
        })
    }
}

/// Parse `a = 1 & b = 2` into clause pairs; an empty predicate matches all.
fn parse_predicate(predicate: &str) -> Vec<(String, String)> {
    predicate
        .split('&')
        .filter_map(|clause| {
            let mut parts = clause.splitn(2, '=');
            let column = parts.next()?.trim();
            let value = parts.next()?.trim();
            if column.is_empty() {
                None
            } else {
                Some((column.to_string(), value.to_string()))
            }
        })
        .collect()
}

fn cell_to_f64(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Int(i) => Some(*i as f64),
        CellValue::Float(f) => Some(*f),
        CellValue::Str(s) => s.trim().replace(',', ".").parse().ok(),
    }
}

fn cell_to_i64(cell: &CellValue) -> Option<i64> {
    match cell {
        CellValue::Int(i) => Some(*i),
        CellValue::Float(f) => Some(*f as i64),
        CellValue::Str(s) => s.trim().parse().ok(),
    }
}

fn cell_to_string(cell: &CellValue) -> String {
    match cell {
        CellValue::Int(i) => i.to_string(),
        CellValue::Float(f) => format!("{f}"),
        CellValue::Str(s) => s.clone(),
    }
}

/// Saved cases keyed by path. Shareable between scripted instances the
/// way real snapshot files on disk outlive one simulator handle.
pub type SnapshotStore = Rc<RefCell<HashMap<PathBuf, BTreeMap<String, Table>>>>;

/// The scripted simulator's mutable world, handed to behaviour hooks.
pub struct SimState {
    pub tables: BTreeMap<String, Table>,
    /// Files loaded (or added) in order, snapshot restores included.
    pub loaded: Vec<PathBuf>,
    /// Template extensions opened via `load_template`.
    pub templates: Vec<String>,
    /// Saved cases, keyed by path.
    pub snapshots: SnapshotStore,
    /// Log lines queued by the dynamic hook, dispatched after the run.
    pub pending_log: Vec<LogEvent>,
    /// Canned time series for `get_points_from_exit_file`.
    pub points: HashMap<(String, String, String), Vec<Point>>,
    /// Commands passed to the emergency-automatics synthesis op.
    pub lpn_commands: Vec<String>,
    /// Free-form numbers for behaviour hooks.
    pub scratch: HashMap<String, f64>,
}

impl SimState {
    fn seeded() -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(
            NODE.to_string(),
            Table::with_columns(&[col::NY, col::UHOM, col::VRAS, col::BSH, col::SEL]),
        );
        tables.insert(
            BRANCH.to_string(),
            Table::with_columns(&[col::IP, col::IQ, col::NP, col::R, col::X, col::B, col::STA]),
        );
        tables.insert(
            SECTION.to_string(),
            Table::with_columns(&[col::NS, col::NAME, col::PSECH, col::STA]),
        );
        tables.insert(
            SCN_ACTIONS.to_string(),
            Table::with_columns(&[
                col::ID,
                col::TYPE,
                col::FORMULA,
                col::OBJECT_CLASS,
                col::OBJECT_PROP,
                col::OBJECT_KEY,
                col::RUNS_COUNT,
                col::TIME_START,
                col::DT,
                col::STATE,
            ]),
        );
        tables.insert(
            VARIANTS.to_string(),
            Table::with_columns(&[col::NUM, col::TYPE, col::NAME, col::STA, col::ID]),
        );
        let mut dynamics = Table::with_columns(&[
            col::TRAS,
            col::MAX_RESULT_FILES,
            col::SNAP_AUTO_LOAD,
            col::SNAP_MAX_COUNT,
        ]);
        let row = dynamics.add_row();
        dynamics.set(row, col::TRAS, CellValue::Float(5.0));
        tables.insert(DYNAMICS.to_string(), dynamics);
        let mut ut = Table::with_columns(&[col::KFC, col::SUM_KFC]);
        ut.add_row();
        tables.insert(UT_COMMON.to_string(), ut);

        Self {
            tables,
            loaded: Vec::new(),
            templates: Vec::new(),
            snapshots: Rc::new(RefCell::new(HashMap::new())),
            pending_log: Vec::new(),
            points: HashMap::new(),
            lpn_commands: Vec::new(),
            scratch: HashMap::new(),
        }
    }

    pub fn table_mut(&mut self, name: &str) -> &mut Table {
        self.tables.entry(name.to_string()).or_default()
    }

    pub fn cell_f64(&self, table: &str, row: usize, column: &str) -> Option<f64> {
        self.tables
            .get(table)
            .and_then(|t| t.get(row, column))
            .and_then(cell_to_f64)
    }

    pub fn set_cell(&mut self, table: &str, row: usize, column: &str, value: CellValue) {
        self.table_mut(table).set(row, column, value);
    }

    pub fn find_row(&self, table: &str, predicate: &str) -> Option<usize> {
        let table = self.tables.get(table)?;
        let clauses = parse_predicate(predicate);
        (0..table.rows()).find(|row| table.matches(*row, &clauses))
    }

    pub fn sum_kfc(&self) -> f64 {
        self.cell_f64(UT_COMMON, 0, col::SUM_KFC).unwrap_or(0.0)
    }

    pub fn set_sum_kfc(&mut self, value: f64) {
        self.set_cell(UT_COMMON, 0, col::SUM_KFC, CellValue::Float(value));
    }

    /// Queue a protocol line for dispatch at the end of the current run.
    pub fn emit_log(&mut self, description: impl Into<String>) {
        self.pending_log.push(LogEvent::info(description));
    }
}

type RgmHook = Box<dyn Fn(&mut SimState) -> SimResult<bool>>;
type VariantHook = Box<dyn Fn(&mut SimState, i64) -> SimResult<()>>;
type DynamicHook = Box<dyn Fn(&mut SimState, bool, Option<f64>) -> SimResult<DynVerdict>>;
type UtHook = Box<dyn Fn(&mut SimState) -> SimResult<f64>>;
type StepHook = Box<dyn Fn(&mut SimState, f64, bool) -> SimResult<f64>>;
type LoadHook = Box<dyn Fn(&mut SimState, &Path) -> SimResult<()>>;

struct Behavior {
    rgm: RgmHook,
    apply_variant: VariantHook,
    dynamic: DynamicHook,
    run_ut: UtHook,
    step: StepHook,
    on_load: LoadHook,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            rgm: Box::new(|_| Ok(true)),
            apply_variant: Box::new(|_, _| Ok(())),
            dynamic: Box::new(|state, _, _| {
                let horizon = state.cell_f64(DYNAMICS, 0, col::TRAS).unwrap_or(0.0);
                Ok(DynVerdict {
                    success: true,
                    stable: true,
                    message: " - ".to_string(),
                    time_reached: horizon,
                })
            }),
            run_ut: Box::new(|state| Ok(state.sum_kfc())),
            step: Box::new(|state, coefficient, init| {
                if init {
                    state.set_sum_kfc(0.0);
                }
                state.set_cell(UT_COMMON, 0, col::KFC, CellValue::Float(coefficient));
                let sum = state.sum_kfc() + coefficient;
                state.set_sum_kfc(sum);
                Ok(sum)
            }),
            on_load: Box::new(|_, _| Ok(())),
        }
    }
}

/// The scripted façade.
pub struct ScriptedSim {
    state: RefCell<SimState>,
    behavior: RefCell<Behavior>,
    observers: RefCell<Vec<(ObserverId, Rc<dyn LogObserver>)>>,
    next_observer: Cell<u64>,
    /// Also touch the file on disk when a case is saved, so snapshot
    /// lifecycle (creation, cleanup) is observable from tests.
    pub write_snapshot_files: Cell<bool>,
}

impl Default for ScriptedSim {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSim {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(SimState::seeded()),
            behavior: RefCell::new(Behavior::default()),
            observers: RefCell::new(Vec::new()),
            next_observer: Cell::new(0),
            write_snapshot_files: Cell::new(true),
        }
    }

    /// Share saved cases with other instances, like snapshot files on disk
    /// outliving a simulator handle.
    pub fn with_snapshot_store(self, store: SnapshotStore) -> Self {
        self.state.borrow_mut().snapshots = store;
        self
    }

    /// A fresh store for [`Self::with_snapshot_store`].
    pub fn snapshot_store() -> SnapshotStore {
        Rc::new(RefCell::new(HashMap::new()))
    }

    // -- behaviour hooks ----------------------------------------------------

    pub fn on_rgm(&self, hook: impl Fn(&mut SimState) -> SimResult<bool> + 'static) {
        self.behavior.borrow_mut().rgm = Box::new(hook);
    }

    pub fn on_apply_variant(&self, hook: impl Fn(&mut SimState, i64) -> SimResult<()> + 'static) {
        self.behavior.borrow_mut().apply_variant = Box::new(hook);
    }

    pub fn on_dynamic(
        &self,
        hook: impl Fn(&mut SimState, bool, Option<f64>) -> SimResult<DynVerdict> + 'static,
    ) {
        self.behavior.borrow_mut().dynamic = Box::new(hook);
    }

    pub fn on_run_ut(&self, hook: impl Fn(&mut SimState) -> SimResult<f64> + 'static) {
        self.behavior.borrow_mut().run_ut = Box::new(hook);
    }

    pub fn on_step(&self, hook: impl Fn(&mut SimState, f64, bool) -> SimResult<f64> + 'static) {
        self.behavior.borrow_mut().step = Box::new(hook);
    }

    pub fn on_load(&self, hook: impl Fn(&mut SimState, &Path) -> SimResult<()> + 'static) {
        self.behavior.borrow_mut().on_load = Box::new(hook);
    }

    // -- state access & seeding ---------------------------------------------

    pub fn with_state<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        f(&mut self.state.borrow_mut())
    }

    pub fn seed_node(&self, ny: i64, uhom: f64, vras: f64) -> usize {
        self.with_state(|state| {
            let table = state.table_mut(NODE);
            let row = table.add_row();
            table.set(row, col::NY, CellValue::Int(ny));
            table.set(row, col::UHOM, CellValue::Float(uhom));
            table.set(row, col::VRAS, CellValue::Float(vras));
            row
        })
    }

    pub fn seed_branch(&self, ip: i64, iq: i64, np: i64, r: f64, x: f64, b: f64) -> usize {
        self.with_state(|state| {
            let table = state.table_mut(BRANCH);
            let row = table.add_row();
            table.set(row, col::IP, CellValue::Int(ip));
            table.set(row, col::IQ, CellValue::Int(iq));
            table.set(row, col::NP, CellValue::Int(np));
            table.set(row, col::R, CellValue::Float(r));
            table.set(row, col::X, CellValue::Float(x));
            table.set(row, col::B, CellValue::Float(b));
            row
        })
    }

    pub fn seed_section(&self, ns: i64, name: &str, psech: f64, monitored: bool) -> usize {
        self.with_state(|state| {
            let table = state.table_mut(SECTION);
            let row = table.add_row();
            table.set(row, col::NS, CellValue::Int(ns));
            table.set(row, col::NAME, CellValue::Str(name.to_string()));
            table.set(row, col::PSECH, CellValue::Float(psech));
            table.set(row, col::STA, CellValue::Int(if monitored { 1 } else { 0 }));
            row
        })
    }

    pub fn seed_action(&self, class: &str, prop: &str, key: i64, formula: &str) -> usize {
        self.with_state(|state| {
            let table = state.table_mut(SCN_ACTIONS);
            let row = table.add_row();
            table.set(row, col::OBJECT_CLASS, CellValue::Str(class.to_string()));
            table.set(row, col::OBJECT_PROP, CellValue::Str(prop.to_string()));
            table.set(row, col::OBJECT_KEY, CellValue::Int(key));
            table.set(row, col::FORMULA, CellValue::Str(formula.to_string()));
            table.set(row, col::TIME_START, CellValue::Float(1.0));
            table.set(row, col::DT, CellValue::Float(0.15));
            row
        })
    }

    pub fn set_points(&self, table: &str, column: &str, selection: &str, points: Vec<Point>) {
        self.with_state(|state| {
            state.points.insert(
                (table.to_string(), column.to_string(), selection.to_string()),
                points,
            );
        });
    }

    fn resolve_row(&self, table: &str, selector: &RowSelector) -> SimResult<usize> {
        let state = self.state.borrow();
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| SimError::UnknownTable(table.to_string()))?;
        match selector {
            RowSelector::Index(i) if *i < t.rows() => Ok(*i),
            RowSelector::Index(_) => Err(SimError::NoMatch {
                table: table.to_string(),
                selector: selector.to_string(),
            }),
            RowSelector::Where(predicate) => {
                let clauses = parse_predicate(predicate);
                (0..t.rows())
                    .find(|row| t.matches(*row, &clauses))
                    .ok_or_else(|| SimError::NoMatch {
                        table: table.to_string(),
                        selector: selector.to_string(),
                    })
            }
        }
    }

    fn get_cell(&self, table: &str, column: &str, selector: &RowSelector) -> SimResult<CellValue> {
        let row = self.resolve_row(table, selector)?;
        let state = self.state.borrow();
        let t = state.tables.get(table).expect("resolved table");
        t.get(row, column)
            .cloned()
            .ok_or_else(|| SimError::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    fn dispatch_pending_log(&self) {
        let events: Vec<LogEvent> = self.state.borrow_mut().pending_log.drain(..).collect();
        if events.is_empty() {
            return;
        }
        let observers = self.observers.borrow().clone();
        for event in &events {
            for (_, observer) in &observers {
                observer.on_message(event);
            }
        }
    }
}

impl SimFacade for ScriptedSim {
    fn load(&self, path: &Path) -> SimResult<()> {
        {
            let mut state = self.state.borrow_mut();
            let snapshot = state.snapshots.borrow().get(path).cloned();
            if let Some(snapshot) = snapshot {
                state.tables = snapshot;
            }
            state.loaded.push(path.to_path_buf());
            let behavior = self.behavior.borrow();
            (behavior.on_load)(&mut state, path)?;
        }
        Ok(())
    }

    fn save(&self, path: &Path) -> SimResult<()> {
        let state = self.state.borrow();
        let snapshot = state.tables.clone();
        state.snapshots.borrow_mut().insert(path.to_path_buf(), snapshot);
        if self.write_snapshot_files.get() {
            fs::write(path, b"dss snapshot")
                .map_err(|_| SimError::FileNotFound(path.to_path_buf()))?;
        }
        Ok(())
    }

    fn add(&self, path: &Path) -> SimResult<()> {
        let mut state = self.state.borrow_mut();
        state.loaded.push(path.to_path_buf());
        let behavior = self.behavior.borrow();
        (behavior.on_load)(&mut state, path)?;
        Ok(())
    }

    fn load_template(&self, extension: &str) -> SimResult<()> {
        let mut state = self.state.borrow_mut();
        state.templates.push(extension.to_string());
        match extension {
            ".scn" => {
                let columns: Vec<String> = state
                    .table_mut(SCN_ACTIONS)
                    .columns
                    .keys()
                    .cloned()
                    .collect();
                let names: Vec<&str> = columns.iter().map(String::as_str).collect();
                state
                    .tables
                    .insert(SCN_ACTIONS.to_string(), Table::with_columns(&names));
            }
            ".vrn" => {
                let columns: Vec<String> =
                    state.table_mut(VARIANTS).columns.keys().cloned().collect();
                let names: Vec<&str> = columns.iter().map(String::as_str).collect();
                state
                    .tables
                    .insert(VARIANTS.to_string(), Table::with_columns(&names));
            }
            _ => {}
        }
        Ok(())
    }

    fn find_template_path_with_extension(&self, extension: &str) -> SimResult<PathBuf> {
        Ok(PathBuf::from(format!("templates/шаблон{extension}")))
    }

    fn rgm(&self) -> SimResult<bool> {
        let behavior = self.behavior.borrow();
        (behavior.rgm)(&mut self.state.borrow_mut())
    }

    fn apply_variant(&self, ordinal: i64, repair_file: &Path) -> SimResult<bool> {
        self.load(repair_file)?;
        let behavior = self.behavior.borrow();
        let mut state = self.state.borrow_mut();
        (behavior.apply_variant)(&mut state, ordinal)?;
        (behavior.rgm)(&mut state)
    }

    fn dyn_settings(&self) -> SimResult<()> {
        let mut state = self.state.borrow_mut();
        state.set_cell(DYNAMICS, 0, col::MAX_RESULT_FILES, CellValue::Int(1));
        state.set_cell(DYNAMICS, 0, col::SNAP_AUTO_LOAD, CellValue::Int(1));
        state.set_cell(DYNAMICS, 0, col::SNAP_MAX_COUNT, CellValue::Int(1));
        Ok(())
    }

    fn run_dynamic(&self, ems: bool, max_time: Option<f64>) -> SimResult<DynVerdict> {
        let verdict = {
            let behavior = self.behavior.borrow();
            let mut state = self.state.borrow_mut();
            let original_horizon = state.cell_f64(DYNAMICS, 0, col::TRAS).unwrap_or(0.0);
            if let Some(t) = max_time {
                state.set_cell(DYNAMICS, 0, col::TRAS, CellValue::Float(t));
            }
            let verdict = (behavior.dynamic)(&mut state, ems, max_time);
            state.set_cell(DYNAMICS, 0, col::TRAS, CellValue::Float(original_horizon));
            verdict?
        };
        self.dispatch_pending_log();
        Ok(verdict)
    }

    fn run_ut(&self) -> SimResult<f64> {
        let behavior = self.behavior.borrow();
        (behavior.run_ut)(&mut self.state.borrow_mut())
    }

    fn step(&self, coefficient: f64, init: bool) -> SimResult<f64> {
        let behavior = self.behavior.borrow();
        (behavior.step)(&mut self.state.borrow_mut(), coefficient, init)
    }

    fn lapnusmzu(&self, command: &str) -> SimResult<()> {
        self.state
            .borrow_mut()
            .lpn_commands
            .push(command.to_string());
        Ok(())
    }

    fn get_val_i64(&self, table: &str, column: &str, selector: &RowSelector) -> SimResult<i64> {
        let cell = self.get_cell(table, column, selector)?;
        cell_to_i64(&cell).ok_or(SimError::TypeMismatch {
            table: table.to_string(),
            column: column.to_string(),
            expected: "i64",
        })
    }

    fn get_val_f64(&self, table: &str, column: &str, selector: &RowSelector) -> SimResult<f64> {
        let cell = self.get_cell(table, column, selector)?;
        cell_to_f64(&cell).ok_or(SimError::TypeMismatch {
            table: table.to_string(),
            column: column.to_string(),
            expected: "f64",
        })
    }

    fn get_val_str(&self, table: &str, column: &str, selector: &RowSelector) -> SimResult<String> {
        Ok(cell_to_string(&self.get_cell(table, column, selector)?))
    }

    fn set_val(
        &self,
        table: &str,
        column: &str,
        selector: &RowSelector,
        value: CellValue,
    ) -> SimResult<()> {
        let row = self.resolve_row(table, selector)?;
        self.state
            .borrow_mut()
            .table_mut(table)
            .set(row, column, value);
        Ok(())
    }

    fn selection(&self, table: &str, predicate: &str) -> SimResult<Vec<usize>> {
        let state = self.state.borrow();
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| SimError::UnknownTable(table.to_string()))?;
        let clauses = parse_predicate(predicate);
        Ok((0..t.rows()).filter(|row| t.matches(*row, &clauses)).collect())
    }

    fn add_table_row(&self, table: &str) -> SimResult<usize> {
        let mut state = self.state.borrow_mut();
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| SimError::UnknownTable(table.to_string()))?;
        Ok(t.add_row())
    }

    fn get_points_from_exit_file(
        &self,
        table: &str,
        column: &str,
        selection: &str,
    ) -> SimResult<Vec<Point>> {
        let state = self.state.borrow();
        Ok(state
            .points
            .get(&(table.to_string(), column.to_string(), selection.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn subscribe(&self, observer: Rc<dyn LogObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer.get());
        self.next_observer.set(id.0 + 1);
        self.observers.borrow_mut().push((id, observer));
        id
    }

    fn unsubscribe(&self, id: ObserverId) {
        self.observers.borrow_mut().retain(|(oid, _)| *oid != id);
    }
}
