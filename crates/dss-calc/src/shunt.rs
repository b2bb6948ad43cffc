//! Short-circuit shunt search.
//!
//! For each task bus the solver looks for the fault shunt (R, X) whose
//! brief application leaves the prescribed residual voltage on the bus.
//! The simulator reports the observed residual only through its protocol
//! trail, so every probe runs a short transient with a scoped log
//! subscriber attached and the impedance magnitude is rescaled by
//! `U*/U_obs` until the reading lands within precision.

use crate::session::CaseBuilder;
use dss_core::{
    active_variants, CancelToken, DssError, DssResult, ProgressSink, Quantity, RegimeInfo,
    Settings, ShuntNode, ShuntReport, ShuntSchema, ShuntTask, VariantInfo,
};
use dss_sim::scenario::create_shunt_probe;
use dss_sim::tables::{col, DYNAMICS, NODE};
use dss_sim::{ResidualVoltageTap, RowSelector, ScopedObserver, SimFacade, SimFactory};
use std::f64::consts::FRAC_PI_2;
use std::path::PathBuf;
use tracing::warn;

/// Probe budget per bus and phase.
const MAX_PROBES: u32 = 100;

/// One- and two-phase residual targets as fractions of the pre-fault
/// voltage, used when the task gives no explicit target.
const ONE_PHASE_FRACTION: f64 = 0.66;
const TWO_PHASE_FRACTION: f64 = 0.33;

struct ShuntProbe {
    r: Quantity,
    x: Quantity,
    u: Quantity,
}

pub struct ShuntSolver {
    factory: Box<dyn SimFactory>,
    regimes: Vec<RegimeInfo>,
    variants: Vec<VariantInfo>,
    repair_file: Option<PathBuf>,
    tasks: Vec<ShuntTask>,
    settings: Settings,
}

impl std::fmt::Debug for ShuntSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShuntSolver").finish_non_exhaustive()
    }
}

impl ShuntSolver {
    pub fn new(
        factory: Box<dyn SimFactory>,
        regimes: Vec<RegimeInfo>,
        variants: Vec<VariantInfo>,
        repair_file: Option<PathBuf>,
        tasks: Vec<ShuntTask>,
        settings: Settings,
    ) -> DssResult<Self> {
        if regimes.is_empty()
            || (tasks.is_empty() && !settings.use_sel_nodes)
            || (!settings.calc_one_phase && !settings.calc_two_phase)
        {
            let mut msg =
                String::from("Не заданы все исходные данные для определения шунтов КЗ!\n\n");
            msg.push_str("Результаты проверки:\n");
            msg.push_str(&format!("Загружено расчетных режимов - {}\n", regimes.len()));
            if tasks.is_empty() && !settings.use_sel_nodes {
                msg.push_str("Отсутствуют узлы в файле задания и отключено использование отмеченных узлов!\n");
            }
            if !settings.calc_one_phase && !settings.calc_two_phase {
                msg.push_str("Отключены расчеты однофазного и двухфазного КЗ!\n");
            }
            return Err(DssError::InitialData(msg));
        }

        Ok(Self {
            factory,
            regimes,
            variants: active_variants(&variants),
            repair_file,
            tasks,
            settings,
        })
    }

    /// Declared progress maximum. Bulk mode has to count the marked buses
    /// per regime through the simulator.
    pub fn max_steps(&self) -> DssResult<u64> {
        let phases =
            self.settings.calc_one_phase as u64 + self.settings.calc_two_phase as u64;
        if !self.settings.use_sel_nodes {
            return Ok(self.regimes.len() as u64
                * self.variants.len() as u64
                * self.tasks.len() as u64
                * phases
                + 1);
        }
        let sim = self.factory.create()?;
        let mut total = 0u64;
        for regime in &self.regimes {
            if sim.load(&regime.path).is_err() {
                continue;
            }
            if let Ok(rows) = sim.selection(NODE, "sel = 1") {
                total += rows.len() as u64 * self.variants.len() as u64 * phases;
            }
        }
        Ok(total + 1)
    }

    pub fn calc(
        &self,
        progress: &mut ProgressSink,
        cancel: &CancelToken,
    ) -> DssResult<Vec<ShuntReport>> {
        let mut reports = Vec::with_capacity(self.regimes.len());
        for regime in &self.regimes {
            if cancel.is_cancelled() {
                break;
            }
            let mut schemas = Vec::with_capacity(self.variants.len());
            for variant in &self.variants {
                if cancel.is_cancelled() {
                    break;
                }
                let schema = match self.solve_schema(regime, variant, progress) {
                    Ok(schema) => schema,
                    Err(err) => {
                        warn!(regime = %regime.stem(), variant = %variant.name, %err,
                              "схема прервана");
                        ShuntSchema {
                            schema_name: variant.name.clone(),
                            is_stable: false,
                            nodes: Vec::new(),
                        }
                    }
                };
                schemas.push(schema);
            }
            reports.push(ShuntReport {
                regime: regime.stem(),
                schemas,
            });
        }
        Ok(reports)
    }

    fn solve_schema(
        &self,
        regime: &RegimeInfo,
        variant: &VariantInfo,
        progress: &mut ProgressSink,
    ) -> DssResult<ShuntSchema> {
        let sim = self.factory.create()?;
        let sim = sim.as_ref();
        let builder = CaseBuilder::new(&regime.path, variant, self.repair_file.as_deref());
        if !builder.prepare(sim)? {
            return Ok(ShuntSchema {
                schema_name: variant.name.clone(),
                is_stable: false,
                nodes: Vec::new(),
            });
        }

        let nodes = if self.settings.use_sel_nodes {
            self.solve_marked_nodes(sim, progress)?
        } else {
            self.solve_task_nodes(sim, progress)
        };
        Ok(ShuntSchema {
            schema_name: variant.name.clone(),
            is_stable: true,
            nodes,
        })
    }

    fn solve_task_nodes(&self, sim: &dyn SimFacade, progress: &mut ProgressSink) -> Vec<ShuntNode> {
        self.tasks
            .iter()
            .map(|task| match self.solve_task_node(sim, task, progress) {
                Ok(node) => node,
                Err(err) => {
                    warn!(node = task.node, %err, "узел пропущен");
                    ShuntNode::failed(task.node)
                }
            })
            .collect()
    }

    fn solve_task_node(
        &self,
        sim: &dyn SimFacade,
        task: &ShuntTask,
        progress: &mut ProgressSink,
    ) -> DssResult<ShuntNode> {
        let mut node = ShuntNode::empty(task.node);
        sim.rgm()?;
        let u_pre = sim.get_val_f64(NODE, col::VRAS, &RowSelector::node(task.node))?;

        if self.settings.calc_one_phase {
            if let Some(target) = self.phase_target(task.u1, u_pre, ONE_PHASE_FRACTION) {
                let probe = self.phase_probe(sim, task.node, target, task.x1, task.r1)?;
                node.r1 = probe.r;
                node.x1 = probe.x;
                node.u1 = probe.u;
            }
            progress.tick();
        }
        if self.settings.calc_two_phase {
            if let Some(target) = self.phase_target(task.u2, u_pre, TWO_PHASE_FRACTION) {
                let probe = self.phase_probe(sim, task.node, target, task.x2, task.r2)?;
                node.r2 = probe.r;
                node.x2 = probe.x;
                node.u2 = probe.u;
            }
            progress.tick();
        }
        Ok(node)
    }

    fn solve_marked_nodes(
        &self,
        sim: &dyn SimFacade,
        progress: &mut ProgressSink,
    ) -> DssResult<Vec<ShuntNode>> {
        let rows = sim.selection(NODE, "sel = 1")?;
        let mut nodes = Vec::with_capacity(rows.len());
        for row in rows {
            sim.rgm()?;
            let at = RowSelector::Index(row);
            let u_pre = sim.get_val_f64(NODE, col::VRAS, &at)?;
            let bus = sim.get_val_i64(NODE, col::NY, &at)?;
            let mut node = ShuntNode::empty(bus);

            if self.settings.calc_one_phase {
                let probe = self.canonical_probe(sim, bus, u_pre * ONE_PHASE_FRACTION)?;
                node.r1 = probe.r;
                node.x1 = probe.x;
                node.u1 = probe.u;
                progress.tick();
            }
            if self.settings.calc_two_phase {
                let probe = self.canonical_probe(sim, bus, u_pre * TWO_PHASE_FRACTION)?;
                node.r2 = probe.r;
                node.x2 = probe.x;
                node.u2 = probe.u;
                progress.tick();
            }
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Explicit target wins; the typed fraction of the pre-fault voltage
    /// is a fallback only when enabled. `None` skips the phase.
    fn phase_target(&self, explicit: Option<f64>, u_pre: f64, fraction: f64) -> Option<f64> {
        match explicit {
            Some(u) => Some(u),
            None if self.settings.use_type_val_u => Some(u_pre * fraction),
            None => None,
        }
    }

    fn phase_probe(
        &self,
        sim: &dyn SimFacade,
        bus: i64,
        target: f64,
        x: Option<f64>,
        r: Option<f64>,
    ) -> DssResult<ShuntProbe> {
        match x {
            Some(x) => find_shunt(sim, bus, target, x, r),
            // no starting reactance: fall back to the canonical angle
            None => self.canonical_probe(sim, bus, target),
        }
    }

    fn canonical_probe(&self, sim: &dyn SimFacade, bus: i64, target: f64) -> DssResult<ShuntProbe> {
        find_shunt(
            sim,
            bus,
            target,
            self.settings.base_angle.sin(),
            Some(self.settings.base_angle.cos()),
        )
    }
}

/// Rescale `|Z|` by `U*/U_obs` until the observed residual voltage lands
/// within `min(2.0, 0.02·U_nom)` kV of the target, keeping the impedance
/// angle fixed. A probe whose protocol carries no reading ends the search
/// with the last valid value; there are no retries.
fn find_shunt(
    sim: &dyn SimFacade,
    bus: i64,
    u_target: f64,
    x0: f64,
    r0: Option<f64>,
) -> DssResult<ShuntProbe> {
    sim.set_val(DYNAMICS, col::TRAS, &RowSelector::Index(0), 1.1.into())?;
    sim.load_template(".dfw")?;

    let z_angle = match r0 {
        Some(r) => (x0 / r).atan(),
        None => FRAC_PI_2,
    };
    let mut z_mod = (r0.unwrap_or(0.0).powi(2) + x0.powi(2)).sqrt();

    let tap = ResidualVoltageTap::new();
    let _guard = ScopedObserver::attach(sim, tap.clone());

    let probe = |z: f64| -> DssResult<Option<f64>> {
        create_shunt_probe(sim, bus, z * z_angle.sin(), r0.map(|_| z * z_angle.cos()))?;
        sim.run_dynamic(false, None)?;
        Ok(tap.take())
    };

    let mut u_obs = probe(z_mod)?.unwrap_or(0.0);
    let u_nom = sim.get_val_f64(NODE, col::UHOM, &RowSelector::node(bus))?;
    let precision = (0.02 * u_nom).min(2.0);

    let mut iterations = 0u32;
    while (u_obs - u_target).abs() > precision {
        if iterations >= MAX_PROBES {
            warn!(bus, u_obs, u_target, "бюджет итераций подбора шунта исчерпан");
            break;
        }
        if u_obs > 0.0 {
            z_mod = z_mod * u_target / u_obs;
        }
        match probe(z_mod)? {
            Some(u) => u_obs = u,
            None => {
                warn!(bus, "протокол без значения Uкз, поиск остановлен");
                break;
            }
        }
        iterations += 1;
    }

    Ok(ShuntProbe {
        r: match r0 {
            Some(_) => Quantity::Known(z_mod * z_angle.cos()),
            None => Quantity::NOT_REQUESTED,
        },
        x: Quantity::Known(z_mod * z_angle.sin()),
        u: Quantity::Known(u_obs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dss_sim::tables::SCN_ACTIONS;
    use dss_sim::testing::{ScriptedSim, SimState};
    use dss_sim::{SimError, SimResult};
    use dss_core::DynVerdict;

    /// Residual-voltage plant: a 500 kV bus behind a 10 Ω source, so
    /// `U_obs = 500 · X / (X + 10)`.
    fn residual_plant(state: &mut SimState) -> f64 {
        let row = state
            .find_row(SCN_ACTIONS, "ObjectProp = x")
            .expect("probe row");
        let x = state
            .cell_f64(SCN_ACTIONS, row, col::FORMULA)
            .expect("formula");
        500.0 * x / (x + 10.0)
    }

    fn plant_sim() -> ScriptedSim {
        let sim = ScriptedSim::new();
        sim.seed_node(501, 500.0, 500.0);
        sim.on_dynamic(|state, _, _| {
            let u = residual_plant(state);
            state.emit_log(format!(
                "Величина остаточного напряжения в узле 501 (Uкз={u:.4} кВ, фаза А)"
            ));
            Ok(DynVerdict {
                success: true,
                stable: true,
                message: " - ".into(),
                time_reached: 1.1,
            })
        });
        sim
    }

    fn plant_factory() -> Box<dyn SimFactory> {
        Box::new(|| -> SimResult<Box<dyn SimFacade>> { Ok(Box::new(plant_sim())) })
    }

    fn task(node: i64, x1: Option<f64>, u1: Option<f64>) -> ShuntTask {
        ShuntTask {
            node,
            r1: None,
            x1,
            u1,
            r2: None,
            x2: None,
            u2: None,
        }
    }

    fn one_phase_settings() -> Settings {
        Settings {
            use_sel_nodes: false,
            calc_two_phase: false,
            ..Settings::default()
        }
    }

    #[test]
    fn single_bus_converges_within_precision() {
        let solver = ShuntSolver::new(
            plant_factory(),
            vec![RegimeInfo::new("base.rg2")],
            vec![VariantInfo::normal()],
            None,
            vec![task(501, Some(5.0), Some(250.0))],
            one_phase_settings(),
        )
        .unwrap();

        let mut progress = ProgressSink::disabled();
        let reports = solver.calc(&mut progress, &CancelToken::new()).unwrap();
        assert_eq!(reports.len(), 1);
        let node = &reports[0].schemas[0].nodes[0];
        // ε_U = min(2.0, 0.02·500) = 2.0 kV
        let u = node.u1.value().unwrap();
        assert!((u - 250.0).abs() <= 2.0, "u_obs = {u}");
        // R was unspecified: sentinel, not a real zero
        assert!(!node.r1.is_known());
        assert!(node.x1.value().unwrap() > 0.0);
        // two-phase pass was disabled
        assert!(!node.u2.is_known());
    }

    #[test]
    fn default_target_uses_pre_fault_fraction() {
        let mut settings = one_phase_settings();
        settings.use_type_val_u = true;
        let solver = ShuntSolver::new(
            plant_factory(),
            vec![RegimeInfo::new("base.rg2")],
            vec![VariantInfo::normal()],
            None,
            vec![task(501, Some(5.0), None)],
            settings,
        )
        .unwrap();

        let mut progress = ProgressSink::disabled();
        let reports = solver.calc(&mut progress, &CancelToken::new()).unwrap();
        let node = &reports[0].schemas[0].nodes[0];
        let u = node.u1.value().unwrap();
        assert!((u - 0.66 * 500.0).abs() <= 2.0, "u_obs = {u}");
    }

    #[test]
    fn phase_without_target_stays_not_requested() {
        let mut settings = one_phase_settings();
        settings.use_type_val_u = false;
        let solver = ShuntSolver::new(
            plant_factory(),
            vec![RegimeInfo::new("base.rg2")],
            vec![VariantInfo::normal()],
            None,
            vec![task(501, Some(5.0), None)],
            settings,
        )
        .unwrap();

        let mut progress = ProgressSink::disabled();
        let reports = solver.calc(&mut progress, &CancelToken::new()).unwrap();
        let node = &reports[0].schemas[0].nodes[0];
        assert!(!node.u1.is_known());
        assert!(!node.x1.is_known());
        // the phase still counted as one progress step
        assert_eq!(progress.current(), 1);
    }

    #[test]
    fn silent_protocol_terminates_with_last_reading() {
        let factory = Box::new(|| -> SimResult<Box<dyn SimFacade>> {
            let sim = ScriptedSim::new();
            sim.seed_node(501, 500.0, 500.0);
            // dynamic runs fine but never emits the residual line
            Ok(Box::new(sim))
        });
        let solver = ShuntSolver::new(
            factory,
            vec![RegimeInfo::new("base.rg2")],
            vec![VariantInfo::normal()],
            None,
            vec![task(501, Some(5.0), Some(250.0))],
            one_phase_settings(),
        )
        .unwrap();

        let mut progress = ProgressSink::disabled();
        let reports = solver.calc(&mut progress, &CancelToken::new()).unwrap();
        let node = &reports[0].schemas[0].nodes[0];
        assert_eq!(node.u1.value(), Some(0.0));
    }

    #[test]
    fn marked_bus_mode_probes_with_canonical_angle() {
        let factory = Box::new(|| -> SimResult<Box<dyn SimFacade>> {
            let sim = plant_sim();
            sim.with_state(|state| {
                let row = state.find_row(NODE, "ny=501").unwrap();
                state.set_cell(NODE, row, col::SEL, 1_i64.into());
            });
            Ok(Box::new(sim))
        });
        let settings = Settings {
            use_sel_nodes: true,
            calc_two_phase: false,
            ..Settings::default()
        };
        let solver = ShuntSolver::new(
            factory,
            vec![RegimeInfo::new("base.rg2")],
            vec![VariantInfo::normal()],
            None,
            Vec::new(),
            settings,
        )
        .unwrap();

        assert_eq!(solver.max_steps().unwrap(), 2);

        let mut progress = ProgressSink::disabled();
        let reports = solver.calc(&mut progress, &CancelToken::new()).unwrap();
        let node = &reports[0].schemas[0].nodes[0];
        assert_eq!(node.node, 501);
        // canonical angle supplies an R component
        assert!(node.r1.is_known());
        let u = node.u1.value().unwrap();
        assert!((u - 330.0).abs() <= 2.0, "u_obs = {u}");
    }

    #[test]
    fn unbalanced_schema_reports_empty_nodes() {
        let factory = Box::new(|| -> SimResult<Box<dyn SimFacade>> {
            let sim = plant_sim();
            sim.on_rgm(|_| Ok(false));
            Ok(Box::new(sim))
        });
        let solver = ShuntSolver::new(
            factory,
            vec![RegimeInfo::new("base.rg2")],
            vec![VariantInfo::normal()],
            None,
            vec![task(501, Some(5.0), Some(250.0))],
            one_phase_settings(),
        )
        .unwrap();

        let mut progress = ProgressSink::disabled();
        let reports = solver.calc(&mut progress, &CancelToken::new()).unwrap();
        let schema = &reports[0].schemas[0];
        assert!(!schema.is_stable);
        assert!(schema.nodes.is_empty());
    }

    #[test]
    fn missing_inputs_raise_initial_data() {
        let err = ShuntSolver::new(
            plant_factory(),
            Vec::new(),
            vec![VariantInfo::normal()],
            None,
            Vec::new(),
            one_phase_settings(),
        )
        .unwrap_err();
        assert!(matches!(err, DssError::InitialData(_)));
        assert!(err.to_string().contains("расчетных режимов - 0"));
    }

    #[test]
    fn sim_factory_error_surfaces() {
        let factory = Box::new(|| -> SimResult<Box<dyn SimFacade>> {
            Err(SimError::Engine("нет подключения".into()))
        });
        let solver = ShuntSolver::new(
            factory,
            vec![RegimeInfo::new("base.rg2")],
            vec![VariantInfo::normal()],
            None,
            vec![task(501, Some(5.0), Some(250.0))],
            one_phase_settings(),
        )
        .unwrap();
        // factory failures degrade to an unbalanced schema, not a panic
        let mut progress = ProgressSink::disabled();
        let reports = solver.calc(&mut progress, &CancelToken::new()).unwrap();
        assert!(!reports[0].schemas[0].is_stable);
    }
}
