//! Calculation settings.
//!
//! One plain struct, passed by value into each solver constructor. There is
//! no process-global configuration state; whoever assembles a calculation
//! owns a `Settings` and hands out copies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Shunt calculation: enumerate simulator-marked buses (`sel = 1`)
    /// instead of the CSV task list.
    pub use_sel_nodes: bool,
    /// Allow default residual-voltage targets (0.66·U_pre one-phase,
    /// 0.33·U_pre two-phase) when the task row gives none.
    pub use_type_val_u: bool,
    pub calc_one_phase: bool,
    pub calc_two_phase: bool,
    /// Canonical impedance angle for bulk shunt probes, radians.
    pub base_angle: f64,
    /// Critical-time bisection stop criterion, seconds.
    pub crt_time_precision: f64,
    /// Critical-time upper bracket, seconds.
    pub crt_time_max: f64,
    /// Ordinal of the target cross-section for the MDP calculation.
    pub selected_sch: i64,
    pub dyn_no_pa: bool,
    pub dyn_with_pa: bool,
    /// Emit plot artifacts from the batch dynamic calculation.
    pub save_grf: bool,
    /// The PA input is in LPN format and must be pre-processed.
    pub use_lpn: bool,
    /// Suffix appended to the LPN synthesis command.
    pub lpns: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_sel_nodes: true,
            use_type_val_u: true,
            calc_one_phase: true,
            calc_two_phase: true,
            base_angle: 1.471,
            crt_time_precision: 0.02,
            crt_time_max: 1.0,
            selected_sch: 0,
            dyn_no_pa: true,
            dyn_with_pa: false,
            save_grf: false,
            use_lpn: false,
            lpns: String::new(),
        }
    }
}
