//! Per-run results manifest.
//!
//! The external report writer (XLSX) and the UI both consume this JSON
//! file; it is the durable record of one calculation run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dss_core::CalcResults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
pub struct RunManifest {
    pub created_at: DateTime<Utc>,
    pub calculation: String,
    pub results: CalcResults,
}

impl RunManifest {
    pub fn new(results: CalcResults) -> Self {
        Self {
            created_at: Utc::now(),
            calculation: results.label().to_string(),
            results,
        }
    }
}

pub fn write_results_manifest(path: &Path, manifest: &RunManifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating results directory '{}'", parent.display()))?;
    }
    let json =
        serde_json::to_string_pretty(manifest).context("serializing results manifest to JSON")?;
    fs::write(path, json)
        .with_context(|| format!("writing results manifest '{}'", path.display()))?;
    Ok(())
}

pub fn load_results_manifest(path: &Path) -> Result<RunManifest> {
    let file = fs::File::open(path)
        .with_context(|| format!("opening results manifest '{}'", path.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("parsing results manifest '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dss_core::{CrtTime, CrtTimeReport, CrtTimeSchema};
    use tempfile::NamedTempFile;

    #[test]
    fn manifest_writes_and_reads_back() {
        let manifest = RunManifest::new(CalcResults::CrtTime(vec![CrtTimeReport {
            regime: "лето мин".into(),
            schemas: vec![CrtTimeSchema {
                schema_name: "Нормальная схема".into(),
                is_stable: true,
                times: vec![CrtTime {
                    scenario: "КЗ-1".into(),
                    crt_time: 1.0,
                    exceeds_max: true,
                }],
            }],
        }]));
        let tmp = NamedTempFile::new().unwrap();
        write_results_manifest(tmp.path(), &manifest).unwrap();
        let back = load_results_manifest(tmp.path()).unwrap();
        assert_eq!(back.calculation, "Предельное время КЗ");
        match back.results {
            CalcResults::CrtTime(reports) => {
                assert!(reports[0].schemas[0].times[0].exceeds_max);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
