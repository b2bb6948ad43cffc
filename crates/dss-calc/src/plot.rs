//! Plot-output seam.
//!
//! Rendering belongs to an external collaborator; the batch runner only
//! extracts the time series and names the artifact. A sink failure is a
//! warning, never a calculation failure.

use dss_core::{DssResult, MonitoredValue, PlotVarInfo, Quantity};
use dss_sim::{Point, RowSelector, SimFacade};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PlotSeries {
    pub name: String,
    pub points: Vec<Point>,
}

pub trait PlotSink {
    fn render(&self, title: &str, series: &[PlotSeries], path: &Path) -> DssResult<()>;
}

/// Swallows every chart; the default when plots were not requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlotSink;

impl PlotSink for NullPlotSink {
    fn render(&self, _title: &str, _series: &[PlotSeries], _path: &Path) -> DssResult<()> {
        Ok(())
    }
}

/// Sample the declared plot variables as plain post-probe values. A cell
/// that cannot be read stays a sentinel; collection never fails the triple.
pub(crate) fn sample_plot_vars(
    sim: &dyn SimFacade,
    vars: &[PlotVarInfo],
) -> Vec<MonitoredValue> {
    vars.iter()
        .map(|v| MonitoredValue {
            id: v.id,
            name: v.name.clone(),
            value: sim
                .get_val_f64(&v.table, &v.column, &RowSelector::filter(v.selection.clone()))
                .map_or(Quantity::NOT_COMPUTED, Quantity::Known),
        })
        .collect()
}
