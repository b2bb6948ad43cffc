//! Maximum admissible power flow (MDP) across a cross-section.
//!
//! Two phases per (regime, repair schema). Phase A, run once and persisted
//! across scenarios: exhaust the continuation engine to find the peak flow
//! `P_pred` and its coefficient sum, then calibrate a reproducible
//! "fresh baseline → 0.9·P_pred" step and pin the heavy operating point as
//! the reset anchor. Phase B, per scenario and mode: if the scenario breaks
//! stability at the heavy point, bisect on the continuation coefficient
//! (see [`FlowBracket`]) until the stable and unstable flows agree within
//! precision; the admissible flow is whatever the target section carries
//! when the search stops.

use crate::search::FlowBracket;
use crate::session::CaseBuilder;
use dss_core::{
    active_variants, CancelToken, DssError, DssResult, MdpEvent, MdpReport, MdpSchema,
    MonitoredValue, PlotVarInfo, ProgressSink, Quantity, RegimeInfo, ScenarioInfo, SectionInfo,
    Settings, VariantInfo,
};
use dss_sim::scenario::synthesize_scn_from_lpn;
use dss_sim::tables::{col, SECTION};
use dss_sim::{RowSelector, SimFacade, SimFactory};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Step-calibration budget (Phase A).
const MAX_CALIBRATION_ITERATIONS: u32 = 50;
/// Calibration tolerance around `0.9·P_pred`, MW.
const CALIBRATION_TOLERANCE: f64 = 2.0;

const BASELINE_FILE: &str = "mdp_calc_tmp.rst";

pub struct MdpSolver {
    factory: Box<dyn SimFactory>,
    regimes: Vec<RegimeInfo>,
    scenarios: Vec<ScenarioInfo>,
    variants: Vec<VariantInfo>,
    repair_file: Option<PathBuf>,
    ut_file: PathBuf,
    sechen_file: PathBuf,
    pa_file: Option<PathBuf>,
    sections: Vec<SectionInfo>,
    plot_vars: Vec<PlotVarInfo>,
    settings: Settings,
}

impl std::fmt::Debug for MdpSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdpSolver").finish_non_exhaustive()
    }
}

impl MdpSolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Box<dyn SimFactory>,
        regimes: Vec<RegimeInfo>,
        scenarios: Vec<ScenarioInfo>,
        variants: Vec<VariantInfo>,
        repair_file: Option<PathBuf>,
        ut_file: Option<PathBuf>,
        sechen_file: Option<PathBuf>,
        pa_file: Option<PathBuf>,
        sections: Vec<SectionInfo>,
        plot_vars: Vec<PlotVarInfo>,
        settings: Settings,
    ) -> DssResult<Self> {
        if regimes.is_empty()
            || scenarios.is_empty()
            || ut_file.is_none()
            || sechen_file.is_none()
            || (settings.dyn_with_pa && pa_file.is_none())
        {
            let mut msg = String::from(
                "Не заданы все исходные данные для определения допустимых перетоков мощности!\n\n",
            );
            msg.push_str("Результаты проверки:\n");
            msg.push_str(&format!("Загружено расчетных режимов - {}\n", regimes.len()));
            msg.push_str(&format!(
                "Загружено аварийных процессов - {}\n",
                scenarios.len()
            ));
            if ut_file.is_none() {
                msg.push_str("Отсутствует траектория утяжеления!\n");
            }
            if sechen_file.is_none() {
                msg.push_str("Отсутствует файл контролируемых сечений!\n");
            }
            if settings.dyn_with_pa && pa_file.is_none() {
                msg.push_str("Включен расчет МДП с учетом ПА, но файл ПА отсутствует!\n");
            }
            return Err(DssError::InitialData(msg));
        }

        Ok(Self {
            factory,
            regimes,
            scenarios,
            variants: active_variants(&variants),
            repair_file,
            ut_file: ut_file.expect("validated above"),
            sechen_file: sechen_file.expect("validated above"),
            pa_file,
            sections,
            plot_vars,
            settings,
        })
    }

    pub fn max_steps(&self) -> u64 {
        let modes = self.settings.dyn_no_pa as u64 + self.settings.dyn_with_pa as u64;
        self.regimes.len() as u64 * self.variants.len() as u64 * self.scenarios.len() as u64 * modes
            + 1
    }

    pub fn calc(
        &self,
        run_dir: &Path,
        progress: &mut ProgressSink,
        cancel: &CancelToken,
    ) -> DssResult<Vec<MdpReport>> {
        let baseline = run_dir.join(BASELINE_FILE);
        let mut reports = Vec::with_capacity(self.regimes.len());
        progress.pulse();

        for regime in &self.regimes {
            if cancel.is_cancelled() {
                break;
            }
            let mut schemas = Vec::with_capacity(self.variants.len());
            for variant in &self.variants {
                if cancel.is_cancelled() {
                    break;
                }
                schemas.push(self.solve_schema(regime, variant, &baseline, progress, cancel));
            }
            reports.push(MdpReport {
                regime: regime.stem(),
                schemas,
            });
        }

        progress.pulse();
        if baseline.exists() {
            let _ = fs::remove_file(&baseline);
        }
        Ok(reports)
    }

    fn solve_schema(
        &self,
        regime: &RegimeInfo,
        variant: &VariantInfo,
        baseline: &Path,
        progress: &mut ProgressSink,
        cancel: &CancelToken,
    ) -> MdpSchema {
        let mut schema = MdpSchema {
            schema_name: variant.name.clone(),
            is_stable: false,
            max_step: 0.0,
            p_pred: 0.0,
            p_start: 0.0,
            events: Vec::new(),
        };
        let mut ready = false;

        for scenario in &self.scenarios {
            if cancel.is_cancelled() {
                break;
            }
            let sim = match self.factory.create() {
                Ok(sim) => sim,
                Err(err) => {
                    warn!(%err, "не удалось получить расчетное ядро");
                    break;
                }
            };
            let sim = sim.as_ref();
            let builder = CaseBuilder::new(&regime.path, variant, self.repair_file.as_deref())
                .with_dyn_settings()
                .with_baseline(baseline.to_path_buf());

            if !ready {
                progress.pulse();
                match self.initialise_schema(sim, &builder, &mut schema) {
                    Ok(()) => {}
                    Err(err) => {
                        warn!(regime = %regime.stem(), variant = %variant.name, %err,
                              "инициализация схемы не удалась");
                        schema.is_stable = false;
                    }
                }
                ready = true;
            }
            if !schema.is_stable {
                break;
            }

            let precision = (schema.p_pred * 0.02).floor().clamp(2.0, 10.0);
            let mut event = MdpEvent {
                scenario: scenario.stem(),
                no_pa_mdp: Quantity::NOT_REQUESTED,
                with_pa_mdp: Quantity::NOT_REQUESTED,
                no_pa_sections: Vec::new(),
                with_pa_sections: Vec::new(),
                no_pa_monitored: Vec::new(),
                with_pa_monitored: Vec::new(),
            };

            if self.settings.dyn_no_pa {
                progress.pulse();
                match self.solve_mode(sim, &builder, scenario, false, &schema, precision, progress)
                {
                    Ok((mdp, sections, monitored)) => {
                        event.no_pa_mdp = mdp;
                        event.no_pa_sections = sections;
                        event.no_pa_monitored = monitored;
                    }
                    Err(err) => {
                        warn!(scenario = %scenario.stem(), %err, "расчет без ПА прерван");
                        event.no_pa_mdp = Quantity::RUN_FAILED;
                    }
                }
                progress.tick();
            }
            if self.settings.dyn_with_pa {
                progress.pulse();
                match self.solve_mode(sim, &builder, scenario, true, &schema, precision, progress) {
                    Ok((mdp, sections, monitored)) => {
                        event.with_pa_mdp = mdp;
                        event.with_pa_sections = sections;
                        event.with_pa_monitored = monitored;
                    }
                    Err(err) => {
                        warn!(scenario = %scenario.stem(), %err, "расчет с ПА прерван");
                        event.with_pa_mdp = Quantity::RUN_FAILED;
                    }
                }
                progress.tick();
            }

            schema.events.push(event);
        }
        schema
    }

    /// Phase A: balance, exhaust the continuation, calibrate the step and
    /// pin the heavy operating point as the baseline.
    fn initialise_schema(
        &self,
        sim: &dyn SimFacade,
        builder: &CaseBuilder<'_>,
        schema: &mut MdpSchema,
    ) -> DssResult<()> {
        schema.is_stable = builder.prepare(sim)?;
        if !schema.is_stable {
            return Ok(());
        }

        builder.reset(sim)?;
        sim.load(&self.sechen_file)?;
        sim.load(&self.ut_file)?;
        schema.p_start = self.target_flow(sim)?;
        schema.max_step = sim.run_ut()?;
        schema.p_pred = self.target_flow(sim)?;

        builder.reset(sim)?;
        sim.load(&self.ut_file)?;
        schema.max_step = sim.step(schema.max_step * 0.9, true)?;
        let mut p_current = self.target_flow(sim)?;

        let goal = schema.p_pred * 0.9;
        let mut iteration = 0u32;
        while (p_current - goal).abs() > CALIBRATION_TOLERANCE
            && iteration < MAX_CALIBRATION_ITERATIONS
        {
            builder.reset(sim)?;
            sim.load(&self.ut_file)?;
            schema.max_step = sim.step(schema.max_step * goal / p_current, true)?;
            p_current = self.target_flow(sim)?;
            iteration += 1;
        }
        if iteration >= MAX_CALIBRATION_ITERATIONS {
            warn!(
                schema = %schema.schema_name,
                limit = MAX_CALIBRATION_ITERATIONS,
                "бюджет итераций калибровки шага исчерпан"
            );
        }

        builder.pin_current(sim)?;
        Ok(())
    }

    /// Phase B for one mode. Returns the admissible flow plus the
    /// monitored section flows and plot-variable values sampled post-probe.
    #[allow(clippy::too_many_arguments)]
    fn solve_mode(
        &self,
        sim: &dyn SimFacade,
        builder: &CaseBuilder<'_>,
        scenario: &ScenarioInfo,
        with_pa: bool,
        schema: &MdpSchema,
        precision: f64,
        progress: &mut ProgressSink,
    ) -> DssResult<(Quantity, Vec<MonitoredValue>, Vec<MonitoredValue>)> {
        builder.reset(sim)?;
        sim.load(&self.sechen_file)?;
        sim.load(&self.ut_file)?;
        self.load_scenario(sim, scenario, with_pa)?;

        let first = sim.run_dynamic(true, None)?;
        let mdp = if first.is_unstable_run() {
            let p_current = self.target_flow(sim)?;
            let mut bracket =
                FlowBracket::new(schema.max_step, schema.p_start, p_current, precision);
            while bracket.active() {
                builder.reset(sim)?;
                sim.load(&self.ut_file)?;
                let actual = sim.step(bracket.coefficient(), true)?;
                if with_pa {
                    self.load_scenario(sim, scenario, true)?;
                }
                let verdict = sim.run_dynamic(true, None)?;
                let flow = self.target_flow(sim)?;
                bracket.record(actual, &verdict, flow);
                if bracket.iterations() % 3 == 0 {
                    progress.pulse();
                }
            }
            Quantity::Known(self.target_flow(sim)?)
        } else if first.is_stable_run() {
            Quantity::Known(self.target_flow(sim)?)
        } else {
            Quantity::RUN_FAILED
        };

        let sections = self
            .sections
            .iter()
            .filter(|s| s.monitored)
            .map(|s| MonitoredValue {
                id: s.id,
                name: s.name.clone(),
                value: sim
                    .get_val_f64(SECTION, col::PSECH, &RowSelector::Index(s.id as usize))
                    .map_or(Quantity::NOT_COMPUTED, Quantity::Known),
            })
            .collect();
        let monitored = crate::plot::sample_plot_vars(sim, &self.plot_vars);

        Ok((mdp, sections, monitored))
    }

    fn load_scenario(
        &self,
        sim: &dyn SimFacade,
        scenario: &ScenarioInfo,
        with_pa: bool,
    ) -> DssResult<()> {
        if !with_pa {
            sim.load(&scenario.path)?;
            sim.load_template(".dfw")?;
            return Ok(());
        }
        let pa_file = self
            .pa_file
            .as_deref()
            .ok_or_else(|| DssError::Config("файл ПА отсутствует".into()))?;
        if self.settings.use_lpn {
            sim.load(&self.sechen_file)?;
            synthesize_scn_from_lpn(sim, pa_file, &self.settings.lpns, &scenario.path, None)?;
        } else {
            sim.load(&scenario.path)?;
            sim.load(pa_file)?;
        }
        Ok(())
    }

    fn target_flow(&self, sim: &dyn SimFacade) -> DssResult<f64> {
        Ok(sim.get_val_f64(
            SECTION,
            col::PSECH,
            &RowSelector::Index(self.settings.selected_sch as usize),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dss_core::DynVerdict;
    use dss_sim::testing::{ScriptedSim, SimState, SnapshotStore};
    use dss_sim::SimResult;

    const P_BASE: f64 = 500.0;
    const P_PRED: f64 = 1000.0;
    const K_MAX: f64 = 500.0;

    /// One MW per coefficient unit: the continuation moves the section
    /// flow linearly, `run_ut` drives straight to the trajectory's end,
    /// and a step from a reset baseline shifts the restored flow.
    fn wire_continuation(sim: &ScriptedSim) {
        sim.on_run_ut(|state: &mut SimState| {
            state.set_cell(SECTION, 0, col::PSECH, P_PRED.into());
            state.set_sum_kfc(K_MAX);
            Ok(K_MAX)
        });
        sim.on_step(|state: &mut SimState, coefficient, _init| {
            let flow = state.cell_f64(SECTION, 0, col::PSECH).unwrap();
            state.set_cell(SECTION, 0, col::PSECH, (flow + coefficient).into());
            state.set_sum_kfc(coefficient);
            Ok(coefficient)
        });
    }

    /// Stable while the section flow stays at or below the limit; with PA
    /// loaded the limit is higher.
    fn wire_stability(sim: &ScriptedSim, limit: f64, pa_limit: f64) {
        sim.on_dynamic(move |state: &mut SimState, _, _| {
            let flow = state.cell_f64(SECTION, 0, col::PSECH).unwrap();
            let with_pa = state
                .loaded
                .iter()
                .any(|p| p.to_string_lossy().contains("па."));
            let cap = if with_pa { pa_limit } else { limit };
            Ok(DynVerdict {
                success: true,
                stable: flow <= cap,
                message: " - ".into(),
                time_reached: 5.0,
            })
        });
    }

    fn factory_with(store: SnapshotStore, limit: f64, pa_limit: f64) -> Box<dyn SimFactory> {
        Box::new(move || -> SimResult<Box<dyn SimFacade>> {
            let sim = ScriptedSim::new().with_snapshot_store(store.clone());
            sim.seed_section(1, "Сечение 1", P_BASE, true);
            wire_continuation(&sim);
            wire_stability(&sim, limit, pa_limit);
            Ok(Box::new(sim))
        })
    }

    fn solver(factory: Box<dyn SimFactory>, settings: Settings) -> MdpSolver {
        MdpSolver::new(
            factory,
            vec![RegimeInfo::new("зима.rg2")],
            vec![ScenarioInfo::new("КЗ-1.scn"), ScenarioInfo::new("КЗ-2.scn")],
            vec![VariantInfo::normal()],
            None,
            Some(PathBuf::from("траектория.ut2")),
            Some(PathBuf::from("сечения.sch")),
            Some(PathBuf::from("па.dat")),
            vec![SectionInfo {
                id: 0,
                ordinal: 1,
                name: "Сечение 1".into(),
                monitored: true,
            }],
            Vec::new(),
            settings,
        )
        .unwrap()
    }

    #[test]
    fn phase_a_calibrates_to_ninety_percent_of_p_pred() {
        let store = ScriptedSim::snapshot_store();
        let solver = solver(factory_with(store.clone(), 2000.0, 2000.0), Settings::default());
        let dir = tempfile::tempdir().unwrap();
        let mut progress = ProgressSink::disabled();
        let reports = solver
            .calc(dir.path(), &mut progress, &CancelToken::new())
            .unwrap();

        let schema = &reports[0].schemas[0];
        assert!(schema.is_stable);
        assert_eq!(schema.p_start, P_BASE);
        assert_eq!(schema.p_pred, P_PRED);
        // the pinned baseline sits within 2 MW of 0.9·P_pred
        let pinned = store
            .borrow()
            .values()
            .next()
            .and_then(|tables| {
                tables
                    .get(SECTION)
                    .and_then(|t| t.get(0, col::PSECH))
                    .cloned()
            })
            .expect("baseline snapshot");
        let pinned_flow = match pinned {
            dss_sim::CellValue::Float(f) => f,
            other => panic!("unexpected cell {other:?}"),
        };
        assert!(
            (pinned_flow - 900.0).abs() <= 2.0,
            "calibrated flow = {pinned_flow}"
        );
    }

    #[test]
    fn stable_first_probe_returns_flow_directly() {
        // everything is stable up to 2000 MW, far beyond the trajectory
        let store = ScriptedSim::snapshot_store();
        let solver = solver(factory_with(store, 2000.0, 2000.0), Settings::default());
        let dir = tempfile::tempdir().unwrap();
        let mut progress = ProgressSink::disabled();
        let reports = solver
            .calc(dir.path(), &mut progress, &CancelToken::new())
            .unwrap();

        let event = &reports[0].schemas[0].events[0];
        let mdp = event.no_pa_mdp.value().unwrap();
        assert!((mdp - 900.0).abs() <= 2.0, "mdp = {mdp}");
    }

    #[test]
    fn bisection_finds_the_stability_limit() {
        let store = ScriptedSim::snapshot_store();
        let solver = solver(factory_with(store, 800.0, 850.0), Settings::default());
        let dir = tempfile::tempdir().unwrap();
        let mut progress = ProgressSink::disabled();
        let reports = solver
            .calc(dir.path(), &mut progress, &CancelToken::new())
            .unwrap();

        let schema = &reports[0].schemas[0];
        assert_eq!(schema.events.len(), 2, "both scenarios keep their slot");
        for event in &schema.events {
            let mdp = event.no_pa_mdp.value().unwrap();
            // ε_P = max(2, min(10, ⌊0.02·1000⌋)) = 10 MW
            assert!((mdp - 800.0).abs() <= 10.0, "mdp = {mdp}");
            assert!(mdp <= 800.0 + 10.0);
            // monitored section flow was collected post-probe
            assert_eq!(event.no_pa_sections.len(), 1);
            assert!(event.no_pa_sections[0].value.is_known());
        }
        // the temporary baseline is gone after the run
        assert!(!dir.path().join(BASELINE_FILE).exists());
    }

    #[test]
    fn pa_raises_the_admissible_flow() {
        let store = ScriptedSim::snapshot_store();
        let solver = solver(
            factory_with(store, 800.0, 850.0),
            Settings {
                dyn_with_pa: true,
                ..Settings::default()
            },
        );
        let dir = tempfile::tempdir().unwrap();
        let mut progress = ProgressSink::disabled();
        let reports = solver
            .calc(dir.path(), &mut progress, &CancelToken::new())
            .unwrap();

        let event = &reports[0].schemas[0].events[0];
        let no_pa = event.no_pa_mdp.value().unwrap();
        let with_pa = event.with_pa_mdp.value().unwrap();
        assert!(
            no_pa <= with_pa,
            "no_pa = {no_pa} must not exceed with_pa = {with_pa}"
        );
    }

    #[test]
    fn failed_first_probe_keeps_the_sentinel() {
        let store = ScriptedSim::snapshot_store();
        let factory = Box::new(move || -> SimResult<Box<dyn SimFacade>> {
            let sim = ScriptedSim::new().with_snapshot_store(store.clone());
            sim.seed_section(1, "Сечение 1", P_BASE, true);
            wire_continuation(&sim);
            sim.on_dynamic(|_, _, _| {
                Ok(DynVerdict {
                    success: false,
                    stable: false,
                    message: "авария ядра".into(),
                    time_reached: 0.0,
                })
            });
            Ok(Box::new(sim))
        });
        let solver = solver(factory, Settings::default());
        let dir = tempfile::tempdir().unwrap();
        let mut progress = ProgressSink::disabled();
        let reports = solver
            .calc(dir.path(), &mut progress, &CancelToken::new())
            .unwrap();

        let event = &reports[0].schemas[0].events[0];
        assert!(!event.no_pa_mdp.is_known());
        assert_eq!(event.no_pa_mdp.report_value(), -1.0);
    }

    #[test]
    fn unbalanced_schema_skips_scenarios() {
        let store = ScriptedSim::snapshot_store();
        let factory = Box::new(move || -> SimResult<Box<dyn SimFacade>> {
            let sim = ScriptedSim::new().with_snapshot_store(store.clone());
            sim.seed_section(1, "Сечение 1", P_BASE, true);
            sim.on_rgm(|_| Ok(false));
            Ok(Box::new(sim))
        });
        let solver = solver(factory, Settings::default());
        let dir = tempfile::tempdir().unwrap();
        let mut progress = ProgressSink::disabled();
        let reports = solver
            .calc(dir.path(), &mut progress, &CancelToken::new())
            .unwrap();

        let schema = &reports[0].schemas[0];
        assert!(!schema.is_stable);
        assert!(schema.events.is_empty());
    }

    #[test]
    fn missing_trajectory_is_rejected_at_construction() {
        let factory = Box::new(|| -> SimResult<Box<dyn SimFacade>> {
            Ok(Box::new(ScriptedSim::new()))
        });
        let err = MdpSolver::new(
            factory,
            vec![RegimeInfo::new("зима.rg2")],
            vec![ScenarioInfo::new("КЗ.scn")],
            vec![VariantInfo::normal()],
            None,
            None,
            Some(PathBuf::from("сечения.sch")),
            None,
            Vec::new(),
            Vec::new(),
            Settings::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("траектория"));
    }
}
