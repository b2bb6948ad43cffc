//! Batch dynamic-stability verdicts.
//!
//! For every (regime, repair schema, scenario) the runner balances the
//! case, applies the scenario (optionally stacked with emergency-control
//! actions), runs the transient, and records the verdict. With plotting
//! requested the run switches to the artifact-producing path and the
//! declared plot variables are extracted and handed to the sink, one chart
//! per variable group per mode.

use crate::plot::{NullPlotSink, PlotSeries, PlotSink};
use crate::session::CaseBuilder;
use dss_core::{
    active_variants, CancelToken, DssError, DssResult, DynEvent, DynReport, DynSchema, DynVerdict,
    PlotVarInfo, ProgressSink, RegimeInfo, ScenarioInfo, Settings, VariantInfo,
};
use dss_sim::scenario::synthesize_scn_from_lpn;
use dss_sim::{SimFacade, SimFactory};
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct DynBatchRunner {
    factory: Box<dyn SimFactory>,
    regimes: Vec<RegimeInfo>,
    scenarios: Vec<ScenarioInfo>,
    variants: Vec<VariantInfo>,
    repair_file: Option<PathBuf>,
    /// Plot variables grouped by chart ordinal, input order preserved.
    plot_groups: Vec<(i64, Vec<PlotVarInfo>)>,
    sechen_file: Option<PathBuf>,
    pa_file: Option<PathBuf>,
    settings: Settings,
    plot_sink: Box<dyn PlotSink>,
}

impl std::fmt::Debug for DynBatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynBatchRunner").finish_non_exhaustive()
    }
}

impl DynBatchRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Box<dyn SimFactory>,
        regimes: Vec<RegimeInfo>,
        scenarios: Vec<ScenarioInfo>,
        variants: Vec<VariantInfo>,
        repair_file: Option<PathBuf>,
        plot_vars: Vec<PlotVarInfo>,
        sechen_file: Option<PathBuf>,
        pa_file: Option<PathBuf>,
        settings: Settings,
    ) -> DssResult<Self> {
        if regimes.is_empty()
            || scenarios.is_empty()
            || (settings.use_lpn && sechen_file.is_none())
            || (settings.save_grf && plot_vars.is_empty())
            || (settings.dyn_with_pa && pa_file.is_none())
        {
            let mut msg = String::from(
                "Не заданы все исходные данные для выполнения пакетного расчета динамической устойчивости!\n\n",
            );
            msg.push_str("Результаты проверки:\n");
            msg.push_str(&format!("Загружено расчетных режимов - {}\n", regimes.len()));
            msg.push_str(&format!(
                "Загружено аварийных процессов - {}\n",
                scenarios.len()
            ));
            if settings.use_lpn && sechen_file.is_none() {
                msg.push_str(
                    "Используется файл ПА в формате lpn, но не загружен файл сечений!\n",
                );
            }
            if settings.dyn_with_pa && pa_file.is_none() {
                msg.push_str("Включен расчет с учетом ПА, но файл ПА отсутствует!\n");
            }
            if settings.save_grf && plot_vars.is_empty() {
                msg.push_str(
                    "Включена опция сохранения графиков, но отсутствует файл графического вывода!\n",
                );
            }
            return Err(DssError::InitialData(msg));
        }

        let mut plot_groups: Vec<(i64, Vec<PlotVarInfo>)> = Vec::new();
        for var in plot_vars {
            match plot_groups.iter_mut().find(|(num, _)| *num == var.ordinal) {
                Some((_, group)) => group.push(var),
                None => plot_groups.push((var.ordinal, vec![var])),
            }
        }

        Ok(Self {
            factory,
            regimes,
            scenarios,
            variants: active_variants(&variants),
            repair_file,
            plot_groups,
            sechen_file,
            pa_file,
            settings,
            plot_sink: Box::new(NullPlotSink),
        })
    }

    /// Install the rendering collaborator (defaults to a no-op).
    pub fn with_plot_sink(mut self, sink: Box<dyn PlotSink>) -> Self {
        self.plot_sink = sink;
        self
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
    ) -> DssResult<Vec<DynReport>> {
        let mut reports = Vec::with_capacity(self.regimes.len());
        for (rgm_idx, regime) in self.regimes.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let mut schemas = Vec::with_capacity(self.variants.len());
            for variant in &self.variants {
                if cancel.is_cancelled() {
                    break;
                }
                let mut schema = DynSchema {
                    schema_name: variant.name.clone(),
                    is_stable: false,
                    events: Vec::new(),
                };
                for (scn_idx, scenario) in self.scenarios.iter().enumerate() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match self.solve_event(rgm_idx, regime, variant, scn_idx, scenario, run_dir, progress)
                    {
                        Ok(None) => {
                            schema.is_stable = false;
                            break;
                        }
                        Ok(Some(event)) => {
                            schema.is_stable = true;
                            schema.events.push(event);
                        }
                        Err(err) => {
                            warn!(regime = %regime.stem(), scenario = %scenario.stem(), %err,
                                  "сценарий прерван");
                            schema.events.push(failed_event(scenario, &err, &self.settings));
                        }
                    }
                }
                schemas.push(schema);
            }
            reports.push(DynReport {
                regime: regime.stem(),
                schemas,
            });
        }
        Ok(reports)
    }

    #[allow(clippy::too_many_arguments)]
    fn solve_event(
        &self,
        rgm_idx: usize,
        regime: &RegimeInfo,
        variant: &VariantInfo,
        scn_idx: usize,
        scenario: &ScenarioInfo,
        run_dir: &Path,
        progress: &mut ProgressSink,
    ) -> DssResult<Option<DynEvent>> {
        let sim = self.factory.create()?;
        let sim = sim.as_ref();
        let builder = CaseBuilder::new(&regime.path, variant, self.repair_file.as_deref())
            .with_dyn_settings();
        if !builder.prepare(sim)? {
            return Ok(None);
        }

        let mut event = DynEvent {
            scenario: scenario.stem(),
            no_pa: None,
            with_pa: None,
            no_pa_plots: Vec::new(),
            with_pa_plots: Vec::new(),
        };

        if self.settings.dyn_no_pa {
            sim.load(&scenario.path)?;
            sim.load_template(".dfw")?;
            let (verdict, plots) =
                self.run_mode(sim, rgm_idx, variant, scn_idx, "без ПА", run_dir)?;
            event.no_pa = Some(verdict);
            event.no_pa_plots = plots;
            progress.tick();
        }

        if self.settings.dyn_with_pa {
            self.load_pa_overlay(sim, scenario)?;
            let (verdict, plots) =
                self.run_mode(sim, rgm_idx, variant, scn_idx, "с ПА", run_dir)?;
            event.with_pa = Some(verdict);
            event.with_pa_plots = plots;
            progress.tick();
        }

        Ok(Some(event))
    }

    fn run_mode(
        &self,
        sim: &dyn SimFacade,
        rgm_idx: usize,
        variant: &VariantInfo,
        scn_idx: usize,
        mode: &str,
        run_dir: &Path,
    ) -> DssResult<(DynVerdict, Vec<PathBuf>)> {
        if !self.settings.save_grf {
            return Ok((sim.run_dynamic(true, None)?, Vec::new()));
        }

        let verdict = sim.run_dynamic(false, None)?;
        let mut plots = Vec::new();
        for (group, vars) in &self.plot_groups {
            let path = run_dir.join(format!(
                "Рисунок - {}.{}.{}.{}({}).html",
                rgm_idx + 1,
                variant.ordinal + 1,
                scn_idx + 1,
                group,
                mode
            ));
            match self.render_plot(sim, vars, &path) {
                Ok(true) => plots.push(path),
                Ok(false) => {}
                Err(err) => warn!(path = %path.display(), %err, "график не сохранен"),
            }
        }
        Ok((verdict, plots))
    }

    /// `Ok(false)` means the group had no data and no artifact was made.
    fn render_plot(
        &self,
        sim: &dyn SimFacade,
        vars: &[PlotVarInfo],
        path: &Path,
    ) -> DssResult<bool> {
        let mut series = Vec::with_capacity(vars.len());
        for var in vars {
            let points = sim.get_points_from_exit_file(&var.table, &var.column, &var.selection)?;
            if !points.is_empty() {
                series.push(PlotSeries {
                    name: var.name.clone(),
                    points,
                });
            }
        }
        if series.is_empty() {
            return Ok(false);
        }
        self.plot_sink
            .render("Динамическая устойчивость", &series, path)?;
        Ok(true)
    }

    fn load_pa_overlay(&self, sim: &dyn SimFacade, scenario: &ScenarioInfo) -> DssResult<()> {
        let pa_file = self
            .pa_file
            .as_deref()
            .ok_or_else(|| DssError::Config("файл ПА отсутствует".into()))?;
        if self.settings.use_lpn {
            let sechen = self
                .sechen_file
                .as_deref()
                .ok_or_else(|| DssError::Config("файл сечений отсутствует".into()))?;
            sim.load(sechen)?;
            synthesize_scn_from_lpn(sim, pa_file, &self.settings.lpns, &scenario.path, None)?;
        } else {
            sim.load(&scenario.path)?;
            sim.load(pa_file)?;
        }
        Ok(())
    }
}

/// A per-triple failure keeps its slot in the result tree: unsuccessful
/// verdicts carrying the error text, one per requested mode.
fn failed_event(scenario: &ScenarioInfo, err: &DssError, settings: &Settings) -> DynEvent {
    let verdict = DynVerdict {
        success: false,
        stable: false,
        message: err.to_string(),
        time_reached: 0.0,
    };
    DynEvent {
        scenario: scenario.stem(),
        no_pa: settings.dyn_no_pa.then(|| verdict.clone()),
        with_pa: settings.dyn_with_pa.then(|| verdict.clone()),
        no_pa_plots: Vec::new(),
        with_pa_plots: Vec::new(),
    }
}
