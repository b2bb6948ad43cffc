//! Per-(regime, variant) case preparation.
//!
//! Every calculation starts a triple the same way: load the regime, apply
//! the repair-schema variant (or just re-balance for the Normal one), and
//! optionally pin a baseline snapshot on disk. The snapshot is written
//! once and is the reset anchor for every inner-loop probe afterwards.

use dss_core::VariantInfo;
use dss_sim::{SimError, SimFacade, SimResult};
use std::path::{Path, PathBuf};

pub struct CaseBuilder<'a> {
    regime: &'a Path,
    variant: &'a VariantInfo,
    repair_file: Option<&'a Path>,
    apply_dyn_settings: bool,
    baseline: Option<PathBuf>,
}

impl<'a> CaseBuilder<'a> {
    pub fn new(regime: &'a Path, variant: &'a VariantInfo, repair_file: Option<&'a Path>) -> Self {
        Self {
            regime,
            variant,
            repair_file,
            apply_dyn_settings: false,
            baseline: None,
        }
    }

    /// Also set the simulator-side dynamic switches during preparation.
    pub fn with_dyn_settings(mut self) -> Self {
        self.apply_dyn_settings = true;
        self
    }

    /// Pin a baseline snapshot at `path` once the case balances.
    pub fn with_baseline(mut self, path: PathBuf) -> Self {
        self.baseline = Some(path);
        self
    }

    pub fn baseline_path(&self) -> Option<&Path> {
        self.baseline.as_deref()
    }

    /// Load the regime and balance it under the variant. Returns whether
    /// the case balanced; the baseline (when configured) is saved only for
    /// a balanced case.
    pub fn prepare(&self, sim: &dyn SimFacade) -> SimResult<bool> {
        sim.load(self.regime)?;
        if self.apply_dyn_settings {
            sim.dyn_settings()?;
        }
        let balanced = self.balance(sim)?;
        if balanced {
            if let Some(baseline) = &self.baseline {
                sim.save(baseline)?;
            }
        }
        Ok(balanced)
    }

    /// Apply the variant (or plain re-balance) on the already-loaded case.
    pub fn balance(&self, sim: &dyn SimFacade) -> SimResult<bool> {
        if self.variant.is_normal() {
            sim.rgm()
        } else {
            let repair = self.repair_file.ok_or_else(|| {
                SimError::Engine("вариант задан, но файл ремонтных схем отсутствует".into())
            })?;
            sim.apply_variant(self.variant.ordinal, repair)
        }
    }

    /// Reload the pinned baseline snapshot.
    pub fn reset(&self, sim: &dyn SimFacade) -> SimResult<()> {
        let baseline = self
            .baseline
            .as_deref()
            .ok_or_else(|| SimError::Engine("базовый снимок не был сохранен".into()))?;
        sim.load(baseline)
    }

    /// Overwrite the baseline with the simulator's current case (used after
    /// the continuation calibration moves the operating point).
    pub fn pin_current(&self, sim: &dyn SimFacade) -> SimResult<()> {
        let baseline = self
            .baseline
            .as_deref()
            .ok_or_else(|| SimError::Engine("базовый снимок не был сохранен".into()))?;
        sim.save(baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dss_sim::tables::{col, DYNAMICS, NODE};
    use dss_sim::testing::ScriptedSim;
    use dss_sim::RowSelector;

    #[test]
    fn normal_variant_just_rebalances() {
        let sim = ScriptedSim::new();
        let variant = VariantInfo::normal();
        let builder = CaseBuilder::new(Path::new("base.rg2"), &variant, None);
        assert!(builder.prepare(&sim).unwrap());
        // no dyn settings were requested
        assert_eq!(
            sim.get_val_i64(DYNAMICS, col::MAX_RESULT_FILES, &RowSelector::Index(0)).unwrap(),
            0
        );
    }

    #[test]
    fn repair_variant_without_file_is_an_error() {
        let sim = ScriptedSim::new();
        let variant = VariantInfo {
            id: 3,
            name: "Ремонт".into(),
            ordinal: 2,
            disabled: false,
        };
        let builder = CaseBuilder::new(Path::new("base.rg2"), &variant, None);
        assert!(builder.prepare(&sim).is_err());
    }

    #[test]
    fn baseline_round_trip_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let sim = ScriptedSim::new();
        let row = sim.seed_node(10, 220.0, 225.0);

        let variant = VariantInfo::normal();
        let builder = CaseBuilder::new(Path::new("base.rg2"), &variant, None)
            .with_dyn_settings()
            .with_baseline(dir.path().join("baseline.rst"));
        assert!(builder.prepare(&sim).unwrap());
        assert!(builder.baseline_path().unwrap().exists());
        assert_eq!(
            sim.get_val_i64(DYNAMICS, col::SNAP_MAX_COUNT, &RowSelector::Index(0)).unwrap(),
            1
        );

        sim.set_val(NODE, col::VRAS, &RowSelector::Index(row), 199.0.into())
            .unwrap();
        builder.reset(&sim).unwrap();
        assert_eq!(
            sim.get_val_f64(NODE, col::VRAS, &RowSelector::Index(row)).unwrap(),
            225.0
        );
    }

    #[test]
    fn unbalanced_case_skips_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let sim = ScriptedSim::new();
        sim.on_rgm(|_| Ok(false));
        let variant = VariantInfo::normal();
        let baseline = dir.path().join("baseline.rst");
        let builder =
            CaseBuilder::new(Path::new("base.rg2"), &variant, None).with_baseline(baseline.clone());
        assert!(!builder.prepare(&sim).unwrap());
        assert!(!baseline.exists());
    }
}
