//! Input-bundle assembly.
//!
//! Regimes and scenarios are collected as plain paths. The list-type
//! inputs live inside simulator-owned binary files, so variants, sections
//! and plot variables are read through the façade; only the shunt task is
//! a CSV the engine parses itself.

use anyhow::{Context, Result};
use dss_core::{
    DssResult, PlotVarInfo, RegimeInfo, ScenarioInfo, SectionInfo, ShuntTask, VariantInfo,
};
use dss_io::read_shunt_tasks;
use dss_sim::tables::{col, LAPNU, PLOT_VARS, SECTION, VARIANTS};
use dss_sim::{RowSelector, SimFacade};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct InputBundle {
    pub regimes: Vec<RegimeInfo>,
    pub scenarios: Vec<ScenarioInfo>,
    pub variants: Vec<VariantInfo>,
    pub repair_file: Option<PathBuf>,
    pub ut_file: Option<PathBuf>,
    pub sechen_file: Option<PathBuf>,
    pub pa_file: Option<PathBuf>,
    pub sections: Vec<SectionInfo>,
    pub plot_vars: Vec<PlotVarInfo>,
    pub shunt_tasks: Vec<ShuntTask>,
}

impl InputBundle {
    pub fn new() -> Self {
        Self {
            variants: vec![VariantInfo::normal()],
            ..Self::default()
        }
    }

    /// Regimes keep input order; a path already present is ignored.
    pub fn add_regime(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.regimes.iter().any(|r| r.path == path) {
            self.regimes.push(RegimeInfo::new(path));
        }
    }

    pub fn add_scenario(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.scenarios.iter().any(|s| s.path == path) {
            self.scenarios.push(ScenarioInfo::new(path));
        }
    }

    pub fn set_ut_file(&mut self, path: impl Into<PathBuf>) {
        self.ut_file = Some(path.into());
    }

    /// Read the cross-section declarations out of the file.
    pub fn load_sections(&mut self, sim: &dyn SimFacade, path: &Path) -> Result<()> {
        sim.load(path)
            .with_context(|| format!("загрузка файла сечений '{}'", path.display()))?;
        self.sechen_file = Some(path.to_path_buf());
        self.sections.clear();
        for row in sim.selection(SECTION, "")? {
            let at = RowSelector::Index(row);
            self.sections.push(SectionInfo {
                id: row as i64,
                ordinal: sim.get_val_i64(SECTION, col::NS, &at)?,
                name: sim.get_val_str(SECTION, col::NAME, &at)?,
                monitored: sim.get_val_i64(SECTION, col::STA, &at)? != 0,
            });
        }
        Ok(())
    }

    /// Read the repair-schema variants; the Normal variant is always kept
    /// in front.
    pub fn load_variants(&mut self, sim: &dyn SimFacade, path: &Path) -> Result<()> {
        sim.load(path)
            .with_context(|| format!("загрузка файла ремонтных схем '{}'", path.display()))?;
        self.repair_file = Some(path.to_path_buf());
        self.variants = vec![VariantInfo::normal()];
        for row in sim.selection(VARIANTS, "")? {
            let at = RowSelector::Index(row);
            self.variants.push(VariantInfo {
                id: row as i64,
                name: sim.get_val_str(VARIANTS, col::NAME, &at)?,
                ordinal: sim.get_val_i64(VARIANTS, col::NUM, &at)?,
                disabled: sim.get_val_i64(VARIANTS, col::STA, &at)? != 0,
            });
        }
        Ok(())
    }

    /// Read the plot-variable declarations.
    pub fn load_plot_vars(&mut self, sim: &dyn SimFacade, path: &Path) -> Result<()> {
        sim.load(path)
            .with_context(|| format!("загрузка файла графического вывода '{}'", path.display()))?;
        self.plot_vars.clear();
        for row in sim.selection(PLOT_VARS, "")? {
            let at = RowSelector::Index(row);
            self.plot_vars.push(PlotVarInfo {
                id: row as i64,
                ordinal: sim.get_val_i64(PLOT_VARS, col::NUM, &at)?,
                name: sim.get_val_str(PLOT_VARS, col::NAME, &at)?,
                table: sim.get_val_str(PLOT_VARS, col::TABL, &at)?,
                selection: sim.get_val_str(PLOT_VARS, col::VIBORK, &at)?,
                column: sim.get_val_str(PLOT_VARS, col::OTS_FORMULA, &at)?,
            });
        }
        Ok(())
    }

    /// Parse the shunt-task CSV.
    pub fn load_shunt_tasks(&mut self, path: &Path) -> DssResult<()> {
        self.shunt_tasks = read_shunt_tasks(path)?;
        Ok(())
    }

    /// Register the emergency-automatics file. For the LPN format the
    /// active record ids are collected into the synthesis suffix
    /// (`=id;id;…`), which the caller stores in the settings.
    pub fn load_pa_file(&mut self, sim: &dyn SimFacade, path: &Path) -> Result<Option<String>> {
        self.pa_file = Some(path.to_path_buf());
        let is_lpn = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("lpn"))
            .unwrap_or(false);
        if !is_lpn {
            return Ok(None);
        }

        sim.load(path)
            .with_context(|| format!("загрузка файла ПА '{}'", path.display()))?;
        let mut ids = Vec::new();
        for row in sim.selection(LAPNU, "sta = 0")? {
            ids.push(
                sim.get_val_i64(LAPNU, col::ID, &RowSelector::Index(row))?
                    .to_string(),
            );
        }
        Ok(Some(format!("={}", ids.join(";"))))
    }
}
