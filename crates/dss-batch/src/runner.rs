//! Run lifecycle: dispatch, results manifest, temp-file sweep.

use crate::bundle::InputBundle;
use anyhow::{Context, Result};
use chrono::Local;
use dss_calc::{CritTimeSolver, DynBatchRunner, MdpSolver, PlotSink, ShuntSolver, UostSolver};
use dss_core::{CalcResults, CancelToken, ProgressSink, Settings};
use dss_io::{write_results_manifest, RunManifest};
use dss_sim::{SimFacade, SimFactory, SimResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{info, warn};

/// What one finished calculation leaves behind.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub declared_steps: u64,
    pub results: CalcResults,
}

pub struct CalcRunner {
    factory: Rc<dyn SimFactory>,
    bundle: InputBundle,
    settings: Settings,
    results_root: PathBuf,
}

impl CalcRunner {
    pub fn new(
        factory: Rc<dyn SimFactory>,
        bundle: InputBundle,
        settings: Settings,
        results_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            factory,
            bundle,
            settings,
            results_root: results_root.into(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn solver_factory(&self) -> Box<dyn SimFactory> {
        let factory = Rc::clone(&self.factory);
        Box::new(move || -> SimResult<Box<dyn SimFacade>> { factory.create() })
    }

    fn create_run_dir(&self, label: &str) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y-%m-%d %H-%M-%S");
        let dir = self.results_root.join(format!("{stamp} {label}"));
        fs::create_dir_all(&dir)
            .with_context(|| format!("создание папки результатов '{}'", dir.display()))?;
        Ok(dir)
    }

    pub fn run_shunt(
        &self,
        progress: &mut ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let solver = ShuntSolver::new(
            self.solver_factory(),
            self.bundle.regimes.clone(),
            self.bundle.variants.clone(),
            self.bundle.repair_file.clone(),
            self.bundle.shunt_tasks.clone(),
            self.settings.clone(),
        )?;
        let declared_steps = solver.max_steps()?;
        let run_dir = self.create_run_dir("Шунты КЗ")?;
        let reports = solver.calc(progress, cancel)?;
        self.finish(run_dir, declared_steps, CalcResults::Shunt(reports))
    }

    pub fn run_crt_time(
        &self,
        progress: &mut ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let solver = CritTimeSolver::new(
            self.solver_factory(),
            self.bundle.regimes.clone(),
            self.bundle.scenarios.clone(),
            self.bundle.variants.clone(),
            self.bundle.repair_file.clone(),
            self.settings.clone(),
        )?;
        let declared_steps = solver.max_steps();
        let run_dir = self.create_run_dir("Предельное время КЗ")?;
        let reports = solver.calc(progress, cancel)?;
        self.finish(run_dir, declared_steps, CalcResults::CrtTime(reports))
    }

    pub fn run_dyn(
        &self,
        plot_sink: Option<Box<dyn PlotSink>>,
        progress: &mut ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let mut runner = DynBatchRunner::new(
            self.solver_factory(),
            self.bundle.regimes.clone(),
            self.bundle.scenarios.clone(),
            self.bundle.variants.clone(),
            self.bundle.repair_file.clone(),
            self.bundle.plot_vars.clone(),
            self.bundle.sechen_file.clone(),
            self.bundle.pa_file.clone(),
            self.settings.clone(),
        )?;
        if let Some(sink) = plot_sink {
            runner = runner.with_plot_sink(sink);
        }
        let declared_steps = runner.max_steps();
        let run_dir = self.create_run_dir("Пакетный расчет ДУ")?;
        let reports = runner.calc(&run_dir, progress, cancel)?;
        self.finish(run_dir, declared_steps, CalcResults::Dyn(reports))
    }

    pub fn run_mdp(&self, progress: &mut ProgressSink, cancel: &CancelToken) -> Result<RunOutcome> {
        let solver = MdpSolver::new(
            self.solver_factory(),
            self.bundle.regimes.clone(),
            self.bundle.scenarios.clone(),
            self.bundle.variants.clone(),
            self.bundle.repair_file.clone(),
            self.bundle.ut_file.clone(),
            self.bundle.sechen_file.clone(),
            self.bundle.pa_file.clone(),
            self.bundle.sections.clone(),
            self.bundle.plot_vars.clone(),
            self.settings.clone(),
        )?;
        let declared_steps = solver.max_steps();
        let run_dir = self.create_run_dir("МДП ДУ")?;
        let reports = solver.calc(&run_dir, progress, cancel)?;
        self.finish(run_dir, declared_steps, CalcResults::Mdp(reports))
    }

    pub fn run_uost(
        &self,
        progress: &mut ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let solver = UostSolver::new(
            self.solver_factory(),
            self.bundle.regimes.clone(),
            self.bundle.scenarios.clone(),
            self.bundle.variants.clone(),
            self.bundle.repair_file.clone(),
            self.bundle.plot_vars.clone(),
        )?;
        let declared_steps = solver.max_steps();
        let run_dir = self.create_run_dir("Uост на границе устойчивости")?;
        let reports = solver.calc(progress, cancel)?;
        self.finish(run_dir, declared_steps, CalcResults::Uost(reports))
    }

    fn finish(
        &self,
        run_dir: PathBuf,
        declared_steps: u64,
        results: CalcResults,
    ) -> Result<RunOutcome> {
        let manifest_path = run_dir.join("results.json");
        write_results_manifest(&manifest_path, &RunManifest::new(results.clone()))?;
        sweep_temp_files(&run_dir);
        info!(run_dir = %run_dir.display(), "расчет завершен");
        Ok(RunOutcome {
            run_dir,
            manifest_path,
            declared_steps,
            results,
        })
    }
}

/// Simulator temporaries (`*.rst`, `*.scn`) must not survive a run.
fn sweep_temp_files(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), %err, "папка результатов недоступна для очистки");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_temp = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("rst") || e.eq_ignore_ascii_case("scn"))
            .unwrap_or(false);
        if is_temp {
            if let Err(err) = fs::remove_file(&path) {
                warn!(file = %path.display(), %err, "временный файл не удален");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_removes_only_simulator_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["база.rst", "сценарий.scn", "results.json", "график.html"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        sweep_temp_files(dir.path());

        let left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(left.len(), 2);
        assert!(left.contains(&"results.json".to_string()));
        assert!(left.contains(&"график.html".to_string()));
    }
}
