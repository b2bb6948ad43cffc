//! Critical fault-clearing time.
//!
//! Bisection over the fault duration: every probe rewrites the scenario's
//! event timings, runs the fast verdict-only transient, and halves the
//! shrinking bracket until the step is within precision *and* the current
//! probe is stable. A case already stable at the upper bracket reports
//! "beyond the bracket" instead of a number.

use crate::session::CaseBuilder;
use dss_core::{
    active_variants, CancelToken, CrtTime, CrtTimeReport, CrtTimeSchema, DssError, DssResult,
    ProgressSink, RegimeInfo, ScenarioInfo, Settings, VariantInfo,
};
use dss_sim::scenario::rewrite_fault_times;
use dss_sim::{SimFacade, SimFactory};
use std::path::PathBuf;
use tracing::warn;

/// Bisection probe budget.
const MAX_PROBES: u32 = 64;

pub struct CritTimeSolver {
    factory: Box<dyn SimFactory>,
    regimes: Vec<RegimeInfo>,
    scenarios: Vec<ScenarioInfo>,
    variants: Vec<VariantInfo>,
    repair_file: Option<PathBuf>,
    precision: f64,
    max_time: f64,
}

impl std::fmt::Debug for CritTimeSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CritTimeSolver").finish_non_exhaustive()
    }
}

impl CritTimeSolver {
    pub fn new(
        factory: Box<dyn SimFactory>,
        regimes: Vec<RegimeInfo>,
        scenarios: Vec<ScenarioInfo>,
        variants: Vec<VariantInfo>,
        repair_file: Option<PathBuf>,
        settings: Settings,
    ) -> DssResult<Self> {
        if regimes.is_empty() || scenarios.is_empty() || settings.crt_time_max == 0.0 {
            let mut msg = String::from(
                "Не заданы все исходные данные для определения предельного времени отключения КЗ!\n\n",
            );
            msg.push_str("Результаты проверки:\n");
            msg.push_str(&format!("Загружено расчетных режимов - {}\n", regimes.len()));
            msg.push_str(&format!(
                "Загружено аварийных процессов - {}\n",
                scenarios.len()
            ));
            msg.push_str(&format!(
                "Максимальное время отключения КЗ составляет - {}\n",
                settings.crt_time_max
            ));
            return Err(DssError::InitialData(msg));
        }

        Ok(Self {
            factory,
            regimes,
            scenarios,
            variants: active_variants(&variants),
            repair_file,
            precision: settings.crt_time_precision,
            max_time: settings.crt_time_max,
        })
    }

    pub fn max_steps(&self) -> u64 {
        self.regimes.len() as u64 * self.variants.len() as u64 * self.scenarios.len() as u64 + 1
    }

    pub fn calc(
        &self,
        progress: &mut ProgressSink,
        cancel: &CancelToken,
    ) -> DssResult<Vec<CrtTimeReport>> {
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
                schemas.push(self.solve_schema(regime, variant, progress, cancel));
            }
            reports.push(CrtTimeReport {
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
        cancel: &CancelToken,
    ) -> CrtTimeSchema {
        let mut schema = CrtTimeSchema {
            schema_name: variant.name.clone(),
            is_stable: false,
            times: Vec::new(),
        };
        for scenario in &self.scenarios {
            if cancel.is_cancelled() {
                break;
            }
            match self.solve_scenario(regime, variant, scenario) {
                Ok(None) => {
                    // the schema does not balance; downstream scenarios are
                    // pointless
                    schema.is_stable = false;
                    break;
                }
                Ok(Some(time)) => {
                    schema.is_stable = true;
                    schema.times.push(time);
                    progress.tick();
                }
                Err(err) => {
                    warn!(regime = %regime.stem(), scenario = %scenario.stem(), %err,
                          "сценарий прерван");
                    progress.tick();
                }
            }
        }
        schema
    }

    /// `None` means the case failed to balance under the variant.
    fn solve_scenario(
        &self,
        regime: &RegimeInfo,
        variant: &VariantInfo,
        scenario: &ScenarioInfo,
    ) -> DssResult<Option<CrtTime>> {
        let sim = self.factory.create()?;
        let sim = sim.as_ref();
        sim.load(&regime.path)?;
        sim.load(&scenario.path)?;
        let builder = CaseBuilder::new(&regime.path, variant, self.repair_file.as_deref());
        if !builder.balance(sim)? {
            return Ok(None);
        }
        let (crt_time, exceeds_max) = self.find_crt_time(sim)?;
        Ok(Some(CrtTime {
            scenario: scenario.stem(),
            crt_time,
            exceeds_max,
        }))
    }

    fn find_crt_time(&self, sim: &dyn SimFacade) -> DssResult<(f64, bool)> {
        let mut crt_time = self.max_time;
        sim.load_template(".dfw")?;
        rewrite_fault_times(sim, crt_time)?;
        let mut verdict = sim.run_dynamic(true, None)?;
        if verdict.stable {
            return Ok((self.max_time, true));
        }

        let mut time_max = self.max_time;
        let mut time_min = 0.0;
        let mut step = (time_max - time_min) * 0.5;
        let mut probes = 0u32;

        while step.abs() > self.precision || !verdict.stable {
            if probes >= MAX_PROBES {
                warn!(crt_time, "бюджет итераций поиска предельного времени исчерпан");
                break;
            }
            crt_time += step * if verdict.stable { 1.0 } else { -1.0 };
            rewrite_fault_times(sim, crt_time)?;
            verdict = sim.run_dynamic(true, None)?;

            if verdict.stable {
                time_min = crt_time;
            } else {
                time_max = crt_time;
            }
            step = (time_max - time_min) * 0.5;
            probes += 1;
        }
        Ok((crt_time, false))
    }
}
