//! Sentinel-aware scalar quantities.
//!
//! Result trees never carry magic floats internally: a value is either
//! [`Quantity::Known`] or a [`Quantity::Sentinel`] naming why it is absent.
//! The legacy report encoding (`-1.0` for any sentinel, `100.0` / `-1.0`
//! for the out-of-range boundary distances) is recovered only at the output
//! boundary via the `report_value` methods.

use serde::{Deserialize, Serialize};

/// Why a quantity is absent from a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelReason {
    /// The calculation mode covering this value was not requested.
    NotRequested,
    /// The value was never reached (an earlier step failed or was skipped).
    NotComputed,
    /// The dynamic run itself failed.
    RunFailed,
    /// The iteration budget ran out before convergence.
    BudgetExhausted,
    /// The search stopped making progress and was aborted.
    Stagnated,
}

/// A scalar that is either known or absent for a stated reason.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Quantity {
    Known(f64),
    Sentinel(SentinelReason),
}

impl Quantity {
    pub const NOT_REQUESTED: Quantity = Quantity::Sentinel(SentinelReason::NotRequested);
    pub const NOT_COMPUTED: Quantity = Quantity::Sentinel(SentinelReason::NotComputed);
    pub const RUN_FAILED: Quantity = Quantity::Sentinel(SentinelReason::RunFailed);

    pub fn is_known(&self) -> bool {
        matches!(self, Quantity::Known(_))
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Quantity::Known(v) => Some(*v),
            Quantity::Sentinel(_) => None,
        }
    }

    /// Legacy report encoding: sentinels collapse to `-1.0`.
    pub fn report_value(&self) -> f64 {
        match self {
            Quantity::Known(v) => *v,
            Quantity::Sentinel(_) => -1.0,
        }
    }
}

impl From<f64> for Quantity {
    fn from(v: f64) -> Self {
        Quantity::Known(v)
    }
}

/// Fault position on the stability boundary, percent of line length from
/// the begin node.
///
/// `BelowRange` means the case stayed stable at both probe ends (the
/// boundary lies before 0 %, rendered `<0`); `AboveRange` means both ends
/// were unstable and the shunt-growth path was taken (rendered `>100`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "percent", rename_all = "snake_case")]
pub enum BoundaryDistance {
    Percent(f64),
    BelowRange,
    AboveRange,
}

impl BoundaryDistance {
    /// Legacy report encoding: `BelowRange` is `100.0`, `AboveRange` is
    /// `-1.0`.
    pub fn report_value(&self) -> f64 {
        match self {
            BoundaryDistance::Percent(p) => *p,
            BoundaryDistance::BelowRange => 100.0,
            BoundaryDistance::AboveRange => -1.0,
        }
    }

    pub fn percent(&self) -> Option<f64> {
        match self {
            BoundaryDistance::Percent(p) => Some(*p),
            _ => None,
        }
    }
}
