//! Input-bundle models.
//!
//! One calculation consumes an immutable bundle of file references and
//! list-type descriptors: operating regimes, fault scenarios, repair-schema
//! variants, monitored cross-sections, plot variables, and (for the shunt
//! calculation) per-bus impedance tasks. File-backed inputs are referenced
//! by path only; their binary formats belong to the simulator.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A saved steady-state operating point of the grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeInfo {
    pub path: PathBuf,
}

impl RegimeInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File name without path or extension, used as the display name in
    /// result trees.
    pub fn stem(&self) -> String {
        file_stem(&self.path)
    }
}

/// A timed sequence of switching / fault events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub path: PathBuf,
}

impl ScenarioInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn stem(&self) -> String {
        file_stem(&self.path)
    }
}

/// A repair-schema overlay applied on top of a regime.
///
/// The sentinel *Normal* variant (`id == -1`) means "no overlay": the case
/// is just re-balanced. Disabled variants are filtered out before any
/// calculation starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantInfo {
    pub id: i64,
    pub name: String,
    /// Ordinal used by the simulator's ApplyVariant-style operation.
    pub ordinal: i64,
    pub disabled: bool,
}

impl VariantInfo {
    pub const NORMAL_ID: i64 = -1;

    /// The always-present "no repair schema" variant.
    pub fn normal() -> Self {
        Self {
            id: Self::NORMAL_ID,
            name: "Нормальная схема".to_string(),
            ordinal: 0,
            disabled: false,
        }
    }

    pub fn is_normal(&self) -> bool {
        self.id == Self::NORMAL_ID
    }
}

/// Filter out disabled variants, preserving input order.
pub fn active_variants(variants: &[VariantInfo]) -> Vec<VariantInfo> {
    variants.iter().filter(|v| !v.disabled).cloned().collect()
}

/// A monitored flow cross-section declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionInfo {
    /// Row id inside the cross-section file.
    pub id: i64,
    pub ordinal: i64,
    pub name: String,
    /// Whether the section's flow is collected alongside the target one.
    pub monitored: bool,
}

/// A monitored variable declaration for plot output.
///
/// Variables sharing an `ordinal` are drawn on the same chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotVarInfo {
    pub id: i64,
    pub ordinal: i64,
    pub name: String,
    pub table: String,
    pub selection: String,
    pub column: String,
}

/// One row of the shunt-task CSV: target bus plus optional starting
/// impedances and residual-voltage targets for the one- and two-phase
/// passes. `None` means the field was left unspecified.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShuntTask {
    pub node: i64,
    pub r1: Option<f64>,
    pub x1: Option<f64>,
    pub u1: Option<f64>,
    pub r2: Option<f64>,
    pub x2: Option<f64>,
    pub u2: Option<f64>,
}

/// Outcome of one electromechanical-transient run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynVerdict {
    /// The run itself completed (distinct from the stability verdict).
    pub success: bool,
    /// No loss of synchronism was detected.
    pub stable: bool,
    /// Simulator-side result message; `" - "` when the simulator gave none.
    pub message: String,
    /// Simulated time actually reached, seconds.
    pub time_reached: f64,
}

impl DynVerdict {
    pub fn is_stable_run(&self) -> bool {
        self.success && self.stable
    }

    pub fn is_unstable_run(&self) -> bool {
        self.success && !self.stable
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_drop_directory_and_extension() {
        let rgm = RegimeInfo::new("/data/regimes/зима макс.rg2");
        assert_eq!(rgm.stem(), "зима макс");
    }

    #[test]
    fn normal_variant_is_enabled_sentinel() {
        let normal = VariantInfo::normal();
        assert!(normal.is_normal());
        assert!(!normal.disabled);
        assert_eq!(normal.ordinal, 0);
    }

    #[test]
    fn active_variants_preserves_order() {
        let variants = vec![
            VariantInfo::normal(),
            VariantInfo {
                id: 0,
                name: "Ремонт ВЛ 1".into(),
                ordinal: 1,
                disabled: true,
            },
            VariantInfo {
                id: 1,
                name: "Ремонт ВЛ 2".into(),
                ordinal: 2,
                disabled: false,
            },
        ];
        let active = active_variants(&variants);
        assert_eq!(active.len(), 2);
        assert!(active[0].is_normal());
        assert_eq!(active[1].ordinal, 2);
    }
}
