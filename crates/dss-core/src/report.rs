//! Nested result containers.
//!
//! Every calculation emits one report per regime, each holding one entry
//! per active repair schema, each holding one entry per scenario (or per
//! task bus for the shunt calculation). Ordering always follows the input
//! lists. A schema that failed to balance carries `is_stable = false` and
//! an empty event list; downstream consumers render it as a single
//! "schema does not balance" row.

use crate::model::DynVerdict;
use crate::quantity::{BoundaryDistance, Quantity};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A monitored value (section flow or plot variable) sampled post-probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredValue {
    pub id: i64,
    pub name: String,
    pub value: Quantity,
}

// ---------------------------------------------------------------------------
// Shunt calculation

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShuntNode {
    pub node: i64,
    pub r1: Quantity,
    pub x1: Quantity,
    pub u1: Quantity,
    pub r2: Quantity,
    pub x2: Quantity,
    pub u2: Quantity,
}

impl ShuntNode {
    pub fn empty(node: i64) -> Self {
        Self {
            node,
            r1: Quantity::NOT_REQUESTED,
            x1: Quantity::NOT_REQUESTED,
            u1: Quantity::NOT_REQUESTED,
            r2: Quantity::NOT_REQUESTED,
            x2: Quantity::NOT_REQUESTED,
            u2: Quantity::NOT_REQUESTED,
        }
    }

    /// The bus was listed but its probes never produced a reading.
    pub fn failed(node: i64) -> Self {
        Self {
            node,
            r1: Quantity::RUN_FAILED,
            x1: Quantity::RUN_FAILED,
            u1: Quantity::RUN_FAILED,
            r2: Quantity::RUN_FAILED,
            x2: Quantity::RUN_FAILED,
            u2: Quantity::RUN_FAILED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShuntSchema {
    pub schema_name: String,
    pub is_stable: bool,
    pub nodes: Vec<ShuntNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShuntReport {
    pub regime: String,
    pub schemas: Vec<ShuntSchema>,
}

// ---------------------------------------------------------------------------
// Critical clearing time

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrtTime {
    pub scenario: String,
    /// Least stable clearing time, seconds.
    pub crt_time: f64,
    /// The first probe at the upper bracket was already stable; the true
    /// boundary lies beyond `crt_time` and reports render `"> t"`.
    pub exceeds_max: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrtTimeSchema {
    pub schema_name: String,
    pub is_stable: bool,
    pub times: Vec<CrtTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrtTimeReport {
    pub regime: String,
    pub schemas: Vec<CrtTimeSchema>,
}

// ---------------------------------------------------------------------------
// Batch dynamic verdicts

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynEvent {
    pub scenario: String,
    pub no_pa: Option<DynVerdict>,
    pub with_pa: Option<DynVerdict>,
    pub no_pa_plots: Vec<PathBuf>,
    pub with_pa_plots: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynSchema {
    pub schema_name: String,
    pub is_stable: bool,
    pub events: Vec<DynEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynReport {
    pub regime: String,
    pub schemas: Vec<DynSchema>,
}

// ---------------------------------------------------------------------------
// Maximum admissible flow

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdpEvent {
    pub scenario: String,
    pub no_pa_mdp: Quantity,
    pub with_pa_mdp: Quantity,
    pub no_pa_sections: Vec<MonitoredValue>,
    pub with_pa_sections: Vec<MonitoredValue>,
    pub no_pa_monitored: Vec<MonitoredValue>,
    pub with_pa_monitored: Vec<MonitoredValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdpSchema {
    pub schema_name: String,
    pub is_stable: bool,
    /// Continuation coefficient sum at the trajectory's end.
    pub max_step: f64,
    /// Peak steady-state flow along the trajectory, MW.
    pub p_pred: f64,
    /// Target-section flow before any continuation, MW.
    pub p_start: f64,
    pub events: Vec<MdpEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdpReport {
    pub regime: String,
    pub schemas: Vec<MdpSchema>,
}

// ---------------------------------------------------------------------------
// Residual voltage on the stability boundary

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UostEvent {
    pub scenario: String,
    pub begin_node: i64,
    pub end_node: i64,
    /// Parallel-circuit index of the faulted line.
    pub circuit: i64,
    pub distance: BoundaryDistance,
    pub begin_uost: Quantity,
    pub end_uost: Quantity,
    pub begin_shunt: Quantity,
    pub end_shunt: Quantity,
    pub begin_r: Quantity,
    pub begin_x: Quantity,
    pub end_r: Quantity,
    pub end_x: Quantity,
    pub monitored: Vec<MonitoredValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UostSchema {
    pub schema_name: String,
    pub is_stable: bool,
    pub events: Vec<UostEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UostReport {
    pub regime: String,
    pub schemas: Vec<UostSchema>,
}

// ---------------------------------------------------------------------------

/// Union of the five calculation outcomes, as written into the per-run
/// results manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "calculation", content = "reports", rename_all = "snake_case")]
pub enum CalcResults {
    Shunt(Vec<ShuntReport>),
    CrtTime(Vec<CrtTimeReport>),
    Dyn(Vec<DynReport>),
    Mdp(Vec<MdpReport>),
    Uost(Vec<UostReport>),
}

impl CalcResults {
    pub fn label(&self) -> &'static str {
        match self {
            CalcResults::Shunt(_) => "Шунты КЗ",
            CalcResults::CrtTime(_) => "Предельное время КЗ",
            CalcResults::Dyn(_) => "Пакетный расчет ДУ",
            CalcResults::Mdp(_) => "МДП ДУ",
            CalcResults::Uost(_) => "Uост на границе устойчивости",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_round_trip_through_json() {
        let results = CalcResults::CrtTime(vec![CrtTimeReport {
            regime: "зима макс".into(),
            schemas: vec![CrtTimeSchema {
                schema_name: "Нормальная схема".into(),
                is_stable: true,
                times: vec![CrtTime {
                    scenario: "КЗ на ВЛ 500".into(),
                    crt_time: 0.18,
                    exceeds_max: false,
                }],
            }],
        }]);
        let json = serde_json::to_string_pretty(&results).unwrap();
        let back: CalcResults = serde_json::from_str(&json).unwrap();
        match back {
            CalcResults::CrtTime(reports) => {
                assert_eq!(reports[0].schemas[0].times[0].crt_time, 0.18);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn empty_shunt_node_is_all_sentinels() {
        let node = ShuntNode::empty(501);
        assert_eq!(node.r1.report_value(), -1.0);
        assert_eq!(node.u2.report_value(), -1.0);
    }
}
