//! Scenario-editing helpers.
//!
//! Free functions over the façade that synthesise and rewrite timed event
//! scripts: the one-shot shunt probe used by the shunt search, the fault
//! clearing-time rewrite used by the critical-time bisection, and the LPN
//! emergency-automatics pre-processing.

use crate::facade::{SimFacade, SimResult};
use crate::selector::RowSelector;
use crate::tables::{col, object_class, DYNAMICS, SCN_ACTIONS, VARIANTS};
use std::path::Path;

/// Render a numeric action formula with the C-locale decimal separator.
pub fn formula_value(v: f64) -> String {
    format!("{v}")
}

/// Build a fresh one-shot fault scenario at `node`: one action row per
/// impedance component (`x` always, `r` when specified), fault inception
/// at t = 1 s with a 0.06 s dwell.
pub fn create_shunt_probe(sim: &dyn SimFacade, node: i64, x: f64, r: Option<f64>) -> SimResult<()> {
    sim.load_template(".scn")?;
    add_shunt_action(sim, node, "x", x)?;
    if let Some(r) = r {
        add_shunt_action(sim, node, "r", r)?;
    }
    Ok(())
}

fn add_shunt_action(sim: &dyn SimFacade, node: i64, prop: &str, value: f64) -> SimResult<()> {
    let row = sim.add_table_row(SCN_ACTIONS)?;
    let at = RowSelector::Index(row);
    sim.set_val(SCN_ACTIONS, col::ID, &at, ((row + 1) as i64).into())?;
    sim.set_val(SCN_ACTIONS, col::TYPE, &at, 1_i64.into())?;
    sim.set_val(SCN_ACTIONS, col::FORMULA, &at, formula_value(value).into())?;
    sim.set_val(SCN_ACTIONS, col::OBJECT_CLASS, &at, object_class::NODE.into())?;
    sim.set_val(SCN_ACTIONS, col::OBJECT_PROP, &at, prop.into())?;
    sim.set_val(SCN_ACTIONS, col::OBJECT_KEY, &at, node.into())?;
    sim.set_val(SCN_ACTIONS, col::RUNS_COUNT, &at, 1_i64.into())?;
    sim.set_val(SCN_ACTIONS, col::TIME_START, &at, 1.0.into())?;
    sim.set_val(SCN_ACTIONS, col::DT, &at, 0.06.into())?;
    Ok(())
}

/// Rewrite the loaded scenario for a clearing-time probe of duration `dt`:
/// bus-type actions start at t = 1 s and last `dt`; branch-type actions
/// (trip/reclosure) fire at t = 1 + dt and stay permanent; the simulation
/// horizon is stretched to cover the fault plus a 3 s observation tail.
pub fn rewrite_fault_times(sim: &dyn SimFacade, dt: f64) -> SimResult<()> {
    const TIME_START: f64 = 1.0;

    for row in sim.selection(SCN_ACTIONS, "")? {
        let at = RowSelector::Index(row);
        let class = sim.get_val_str(SCN_ACTIONS, col::OBJECT_CLASS, &at)?;
        if class == object_class::NODE {
            sim.set_val(SCN_ACTIONS, col::TIME_START, &at, TIME_START.into())?;
            sim.set_val(SCN_ACTIONS, col::DT, &at, dt.into())?;
        } else if class == object_class::BRANCH {
            sim.set_val(SCN_ACTIONS, col::TIME_START, &at, (TIME_START + dt).into())?;
            sim.set_val(SCN_ACTIONS, col::DT, &at, 999.0.into())?;
        }
    }
    sim.set_val(
        DYNAMICS,
        col::TRAS,
        &RowSelector::Index(0),
        (TIME_START + dt + 3.0).into(),
    )?;
    Ok(())
}

/// Synthesise a scenario from an LPN-format emergency-automatics file.
///
/// Loads a fresh variant template, loads the LPN file, seeds a single
/// `var_mer` row, invokes the simulator's synthesis op with the `lpns`
/// suffix, then merges the base scenario in. `save_to` persists the
/// combined script for inspection.
pub fn synthesize_scn_from_lpn(
    sim: &dyn SimFacade,
    lpn_file: &Path,
    lpns: &str,
    scn_file: &Path,
    save_to: Option<&Path>,
) -> SimResult<()> {
    sim.load_template(".vrn")?;
    sim.load(lpn_file)?;

    let row = sim.add_table_row(VARIANTS)?;
    sim.set_val(VARIANTS, col::NUM, &RowSelector::Index(row), 1_i64.into())?;
    sim.set_val(VARIANTS, col::TYPE, &RowSelector::Index(row), 1_i64.into())?;

    sim.lapnusmzu(&format!("1{lpns}"))?;
    sim.add(scn_file)?;

    if let Some(path) = save_to {
        sim.save(path)?;
    }
    Ok(())
}
