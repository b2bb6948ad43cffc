//! Residual voltage at a fault on the stability boundary.
//!
//! The scenario names a faulted line `ip—iq` (with circuit index) and a
//! shunt at one of its ends. The solver never edits the fault position in
//! the scenario: it replaces the line with two in-series halves joined by
//! an inserted bus, encodes the fault location `ℓ ∈ [0, 100] %` by
//! splitting R and X between the halves, and reattaches the shunt to the
//! split bus. Phase A brackets the stability boundary in `ℓ`; if both
//! line ends are unstable, Phase B grows the shunt magnitude to the
//! boundary instead; Phase C replays the boundary case with plotting and
//! reads the bus voltages at fault inception.

use crate::search::StagnationGuard;
use crate::session::CaseBuilder;
use dss_core::{
    active_variants, BoundaryDistance, CancelToken, DssError, DssResult, DynVerdict, PlotVarInfo,
    ProgressSink, Quantity, RegimeInfo, ScenarioInfo, UostEvent, UostReport, UostSchema,
    VariantInfo,
};
use dss_sim::tables::{col, object_class, BRANCH, NODE, SCN_ACTIONS};
use dss_sim::{RowSelector, SimFacade, SimFactory};
use std::f64::consts::FRAC_PI_2;
use std::path::PathBuf;
use tracing::warn;

/// Phase-A bisection budget.
const MAX_DISTANCE_PROBES: u32 = 50;
/// Phase-B growth budget.
const MAX_GROWTH_PROBES: u32 = 50;
/// Phase-B refinement budget.
const MAX_REFINE_PROBES: u32 = 100;
/// Phase-A stops once the bracket is this narrow (percent of line length).
const DISTANCE_TOLERANCE: f64 = 0.5;
/// Phase-B stops once the brackets agree within 2.5 %.
const MAGNITUDE_TOLERANCE: f64 = 0.025;

/// Fault description extracted from the loaded scenario.
struct FaultSpec {
    ip: i64,
    iq: i64,
    np: i64,
    node_kz: i64,
    time_start: f64,
    x_shunt: f64,
    r_shunt: Option<f64>,
    x_action: usize,
    r_action: Option<usize>,
}

pub struct UostSolver {
    factory: Box<dyn SimFactory>,
    regimes: Vec<RegimeInfo>,
    scenarios: Vec<ScenarioInfo>,
    variants: Vec<VariantInfo>,
    repair_file: Option<PathBuf>,
    plot_vars: Vec<PlotVarInfo>,
}

impl UostSolver {
    pub fn new(
        factory: Box<dyn SimFactory>,
        regimes: Vec<RegimeInfo>,
        scenarios: Vec<ScenarioInfo>,
        variants: Vec<VariantInfo>,
        repair_file: Option<PathBuf>,
        plot_vars: Vec<PlotVarInfo>,
    ) -> DssResult<Self> {
        if regimes.is_empty() || scenarios.is_empty() {
            let mut msg = String::from(
                "Не заданы все исходные данные для определения остаточного напряжения!\n\n",
            );
            msg.push_str("Результаты проверки:\n");
            msg.push_str(&format!("Загружено расчетных режимов - {}\n", regimes.len()));
            msg.push_str(&format!(
                "Загружено аварийных процессов - {}\n",
                scenarios.len()
            ));
            return Err(DssError::InitialData(msg));
        }
        Ok(Self {
            factory,
            regimes,
            scenarios,
            variants: active_variants(&variants),
            repair_file,
            plot_vars,
        })
    }

    pub fn max_steps(&self) -> u64 {
        self.regimes.len() as u64 * self.variants.len() as u64 * self.scenarios.len() as u64 + 1
    }

    pub fn calc(
        &self,
        progress: &mut ProgressSink,
        cancel: &CancelToken,
    ) -> DssResult<Vec<UostReport>> {
        let mut reports = Vec::with_capacity(self.regimes.len());
        for regime in &self.regimes {
            if cancel.is_cancelled() {
                break;
            }
            // the inserted split-bus number, reset per regime
            let mut split_counter: i64 = 0;
            let mut schemas = Vec::with_capacity(self.variants.len());
            for variant in &self.variants {
                if cancel.is_cancelled() {
                    break;
                }
                let mut schema = UostSchema {
                    schema_name: variant.name.clone(),
                    is_stable: false,
                    events: Vec::new(),
                };
                for scenario in &self.scenarios {
                    if cancel.is_cancelled() {
                        break;
                    }
                    split_counter += 1;
                    match self.solve_event(regime, variant, scenario, split_counter) {
                        Ok(None) => {
                            schema.is_stable = false;
                            break;
                        }
                        Ok(Some(event)) => {
                            schema.is_stable = true;
                            schema.events.push(event);
                            progress.tick();
                        }
                        Err(err) => {
                            warn!(regime = %regime.stem(), scenario = %scenario.stem(), %err,
                                  "сценарий прерван");
                            schema.is_stable = true;
                            schema.events.push(empty_event(scenario.stem()));
                            progress.tick();
                        }
                    }
                }
                schemas.push(schema);
            }
            reports.push(UostReport {
                regime: regime.stem(),
                schemas,
            });
        }
        Ok(reports)
    }

    /// `None` means the case failed to balance under the variant.
    fn solve_event(
        &self,
        regime: &RegimeInfo,
        variant: &VariantInfo,
        scenario: &ScenarioInfo,
        split_bus: i64,
    ) -> DssResult<Option<UostEvent>> {
        let sim = self.factory.create()?;
        let sim = sim.as_ref();
        let builder = CaseBuilder::new(&regime.path, variant, self.repair_file.as_deref())
            .with_dyn_settings();
        if !builder.prepare(sim)? {
            return Ok(None);
        }
        sim.load(&scenario.path)?;

        let Some(spec) = introspect_fault(sim)? else {
            warn!(scenario = %scenario.stem(), "сценарий без пригодного описания КЗ");
            return Ok(Some(empty_event(scenario.stem())));
        };

        // line parameters, then the split
        let line = RowSelector::branch(spec.ip, spec.iq, spec.np);
        let r_line = sim.get_val_f64(BRANCH, col::R, &line)?;
        let x_line = sim.get_val_f64(BRANCH, col::X, &line)?;
        let b_line = sim.get_val_f64(BRANCH, col::B, &line)?;

        sim.set_val(BRANCH, col::STA, &line, 1_i64.into())?;
        sim.set_val(NODE, col::BSH, &RowSelector::node(spec.ip), (b_line / 2.0).into())?;
        sim.set_val(NODE, col::BSH, &RowSelector::node(spec.iq), (b_line / 2.0).into())?;

        let u_nom = sim.get_val_f64(NODE, col::UHOM, &RowSelector::node(spec.node_kz))?;
        let new_node = sim.add_table_row(NODE)?;
        sim.set_val(NODE, col::NY, &RowSelector::Index(new_node), split_bus.into())?;
        sim.set_val(NODE, col::UHOM, &RowSelector::Index(new_node), u_nom.into())?;

        let first_half = sim.add_table_row(BRANCH)?;
        let second_half = sim.add_table_row(BRANCH)?;
        sim.set_val(BRANCH, col::IP, &RowSelector::Index(first_half), spec.ip.into())?;
        sim.set_val(BRANCH, col::IQ, &RowSelector::Index(first_half), split_bus.into())?;
        sim.set_val(BRANCH, col::IP, &RowSelector::Index(second_half), split_bus.into())?;
        sim.set_val(BRANCH, col::IQ, &RowSelector::Index(second_half), spec.iq.into())?;
        sim.rgm()?;

        let z_angle = match spec.r_shunt {
            Some(r) => (spec.x_shunt / r).atan(),
            None => FRAC_PI_2,
        };
        let z_mod = (spec.r_shunt.unwrap_or(0.0).powi(2) + spec.x_shunt.powi(2)).sqrt();

        let probe = |percent: f64| -> DssResult<DynVerdict> {
            sim.set_line_for_uost_calc(first_half, second_half, r_line, x_line, percent)?;
            Ok(sim.run_dynamic(true, None)?)
        };
        let apply_shunt = |z: f64| -> DssResult<DynVerdict> {
            let r_pair = spec.r_action.map(|action| (action, z * z_angle.cos()));
            sim.change_rx_for_uost_calc(spec.x_action, z * z_angle.sin(), r_pair)?;
            Ok(sim.run_dynamic(true, None)?)
        };

        let l_start = if spec.ip == spec.node_kz { 0.1 } else { 99.9 };
        let l_end = 100.0 - l_start;
        let first = probe(l_start)?;
        let second = probe(l_end)?;

        let mut distance = BoundaryDistance::BelowRange;
        let mut z_final = z_mod;

        if first.success && second.success && first.stable != second.stable {
            distance = self.bracket_distance(&probe, &first, l_start, l_end)?;
        } else if first.is_unstable_run() && second.is_unstable_run() {
            // no ℓ-boundary exists; fix the far end and grow the shunt
            distance = BoundaryDistance::AboveRange;
            let far_end = 100.0 - l_start;
            sim.set_line_for_uost_calc(first_half, second_half, r_line, x_line, far_end)?;
            z_final = self.grow_shunt(&apply_shunt, z_mod)?;
        }

        // Phase C: replay the boundary case with plotting and pick the
        // samples at fault inception
        let mut begin_uost = Quantity::NOT_COMPUTED;
        let mut end_uost = Quantity::NOT_COMPUTED;
        let replay = sim.run_dynamic(false, Some(spec.time_start + 0.02))?;
        if replay.is_stable_run() {
            begin_uost = voltage_at(sim, spec.ip, spec.time_start)?;
            end_uost = voltage_at(sim, spec.iq, spec.time_start)?;
        }

        let monitored = crate::plot::sample_plot_vars(sim, &self.plot_vars);

        // the solved impedance belongs to the faulted end
        let shunt = Quantity::Known(z_final);
        let shunt_x = Quantity::Known(z_final * z_angle.sin());
        let shunt_r = spec
            .r_shunt
            .map_or(Quantity::NOT_REQUESTED, |_| {
                Quantity::Known(z_final * z_angle.cos())
            });
        let fault_at_begin = spec.node_kz == spec.ip;
        let absent = Quantity::NOT_COMPUTED;

        Ok(Some(UostEvent {
            scenario: scenario.stem(),
            begin_node: spec.ip,
            end_node: spec.iq,
            circuit: spec.np,
            distance,
            begin_uost,
            end_uost,
            begin_shunt: if fault_at_begin { shunt } else { absent },
            end_shunt: if fault_at_begin { absent } else { shunt },
            begin_r: if fault_at_begin { shunt_r } else { absent },
            begin_x: if fault_at_begin { shunt_x } else { absent },
            end_r: if fault_at_begin { absent } else { shunt_r },
            end_x: if fault_at_begin { absent } else { shunt_x },
            monitored,
        }))
    }

    /// Phase A: bisect on the fault position using the mirror rule — the
    /// step sign follows whether the current probe's stability agrees with
    /// the first probe's.
    fn bracket_distance(
        &self,
        probe: &dyn Fn(f64) -> DssResult<DynVerdict>,
        first: &DynVerdict,
        l_start: f64,
        l_end: f64,
    ) -> DssResult<BoundaryDistance> {
        let (mut l_stable, mut l_unstable) = if first.stable {
            (l_start, l_end)
        } else {
            (l_end, l_start)
        };
        let mut l_current = (l_stable - l_unstable).abs() * 0.5;
        let mut distance = BoundaryDistance::BelowRange;
        let mut verdict = probe(l_current)?;
        let mut probes = 0u32;

        while verdict.success
            && (!verdict.stable || (l_stable - l_unstable).abs() > DISTANCE_TOLERANCE)
        {
            if probes >= MAX_DISTANCE_PROBES {
                warn!(l_current, "бюджет итераций поиска границы устойчивости исчерпан");
                break;
            }
            if verdict.stable {
                l_stable = l_current;
            } else {
                l_unstable = l_current;
            }
            let agree = first.stable == verdict.stable;
            l_current += (l_unstable - l_stable).abs() * 0.5 * if agree { 1.0 } else { -1.0 };
            distance = BoundaryDistance::Percent(l_current);
            verdict = probe(l_current)?;
            probes += 1;
        }
        Ok(distance)
    }

    /// Phase B: additive growth until the case stabilises, then bisection
    /// between the last unstable and first stable magnitudes.
    fn grow_shunt(
        &self,
        apply: &dyn Fn(f64) -> DssResult<DynVerdict>,
        z_mod: f64,
    ) -> DssResult<f64> {
        let grow_by = if z_mod > 0.1 { z_mod } else { 1.0 };
        let mut z_unstable = z_mod;
        let mut z_stable = if z_mod > 0.1 { z_mod * 2.0 } else { 1.0 };
        let mut verdict = apply(z_stable)?;

        let mut grows = 0u32;
        while verdict.success && !verdict.stable {
            if grows >= MAX_GROWTH_PROBES {
                warn!(z_stable, "бюджет итераций наращивания шунта исчерпан");
                break;
            }
            z_unstable = z_stable;
            z_stable += grow_by;
            verdict = apply(z_stable)?;
            grows += 1;
        }

        let mut lo_guard = StagnationGuard::new(1e-4, 5);
        let mut hi_guard = StagnationGuard::new(1e-4, 5);
        let mut refines = 0u32;
        while verdict.success
            && (!verdict.stable || (1.0 - z_unstable / z_stable) > MAGNITUDE_TOLERANCE)
        {
            if refines >= MAX_REFINE_PROBES {
                warn!(z_stable, "бюджет итераций уточнения шунта исчерпан");
                break;
            }
            let z_step = if verdict.stable {
                (z_unstable - z_stable) * 0.5
            } else {
                (z_stable - z_unstable) * 0.5
            };
            let z_probe = z_stable + z_step;
            verdict = apply(z_probe)?;
            if verdict.stable {
                z_stable = z_probe;
            } else {
                z_unstable = z_probe;
            }
            let lo_stalled = lo_guard.observe(z_unstable);
            let hi_stalled = hi_guard.observe(z_stable);
            if lo_stalled && hi_stalled {
                warn!(z_unstable, z_stable, "уточнение шунта застопорилось");
                break;
            }
            refines += 1;
        }
        Ok(z_stable)
    }
}

/// Walk the scenario actions: the branch action names the faulted line
/// (and is disabled — the line itself gets replaced), the node actions
/// carry the fault bus, inception time and shunt components.
fn introspect_fault(sim: &dyn SimFacade) -> DssResult<Option<FaultSpec>> {
    let mut line_key = String::new();
    let mut node_kz = None;
    let mut time_start = 0.0;
    let mut x_shunt = None;
    let mut r_shunt = None;
    let mut x_action = 0usize;
    let mut r_action = None;

    for row in sim.selection(SCN_ACTIONS, "")? {
        let at = RowSelector::Index(row);
        let class = sim.get_val_str(SCN_ACTIONS, col::OBJECT_CLASS, &at)?;
        if class == object_class::BRANCH {
            line_key = sim.get_val_str(SCN_ACTIONS, col::OBJECT_KEY, &at)?;
            sim.set_val(SCN_ACTIONS, col::STATE, &at, 1_i64.into())?;
        } else if class == object_class::NODE {
            node_kz = Some(sim.get_val_i64(SCN_ACTIONS, col::OBJECT_KEY, &at)?);
            time_start = sim.get_val_f64(SCN_ACTIONS, col::TIME_START, &at)?;
            let prop = sim.get_val_str(SCN_ACTIONS, col::OBJECT_PROP, &at)?;
            let formula = sim.get_val_str(SCN_ACTIONS, col::FORMULA, &at)?;
            if prop == "r" {
                r_shunt = parse_formula(&formula);
                r_action = Some(row);
            } else if prop == "x" {
                x_shunt = parse_formula(&formula);
                x_action = row;
            }
        }
    }

    let mut parts = line_key.split(',').map(|p| p.trim().parse::<i64>());
    let (ip, iq, np) = match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(ip)), Some(Ok(iq)), Some(Ok(np))) => (ip, iq, np),
        _ => return Ok(None),
    };
    let (Some(node_kz), Some(x_shunt)) = (node_kz, x_shunt) else {
        return Ok(None);
    };
    if node_kz != ip && node_kz != iq {
        return Ok(None);
    }

    Ok(Some(FaultSpec {
        ip,
        iq,
        np,
        node_kz,
        time_start,
        x_shunt,
        r_shunt,
        x_action,
        r_action,
    }))
}

/// Scenario formulas carry locale-dependent decimal separators.
fn parse_formula(raw: &str) -> Option<f64> {
    raw.trim().replace(',', ".").parse().ok()
}

fn voltage_at(sim: &dyn SimFacade, node: i64, time_start: f64) -> DssResult<Quantity> {
    let points = sim.get_points_from_exit_file(NODE, col::VRAS, &format!("ny={node}"))?;
    Ok(points
        .iter()
        .find(|p| (p.x - time_start).abs() < 1e-3)
        .map_or(Quantity::NOT_COMPUTED, |p| Quantity::Known(p.y)))
}

fn empty_event(scenario: String) -> UostEvent {
    UostEvent {
        scenario,
        begin_node: 0,
        end_node: 0,
        circuit: 0,
        distance: BoundaryDistance::BelowRange,
        begin_uost: Quantity::NOT_COMPUTED,
        end_uost: Quantity::NOT_COMPUTED,
        begin_shunt: Quantity::NOT_COMPUTED,
        end_shunt: Quantity::NOT_COMPUTED,
        begin_r: Quantity::NOT_COMPUTED,
        begin_x: Quantity::NOT_COMPUTED,
        end_r: Quantity::NOT_COMPUTED,
        end_x: Quantity::NOT_COMPUTED,
        monitored: Vec::new(),
    }
}
