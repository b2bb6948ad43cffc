//! Shunt-task CSV parsing.
//!
//! Semicolon-delimited, header row exactly `node;r1;x1;u1;r2;x2;u2`.
//! Empty fields and the literal `0` mean "unspecified"; decimal separators
//! follow the author's locale, so both `.` and `,` are accepted.

use dss_core::{DssError, DssResult, ShuntTask};
use std::path::Path;

const EXPECTED_HEADER: [&str; 7] = ["node", "r1", "x1", "u1", "r2", "x2", "u2"];

pub fn read_shunt_tasks(path: &Path) -> DssResult<Vec<ShuntTask>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| DssError::Parse(format!("{}: {e}", path.display())))?;

    let mut records = reader.records();
    let header = records
        .next()
        .transpose()
        .map_err(|e| DssError::Parse(e.to_string()))?
        .ok_or_else(|| DssError::Parse("Некорректный файл для задания шунтов КЗ".into()))?;

    if header.len() != EXPECTED_HEADER.len()
        || header
            .iter()
            .zip(EXPECTED_HEADER)
            .any(|(have, want)| have.trim() != want)
    {
        return Err(DssError::Parse(
            "Некорректный файл для задания шунтов КЗ".into(),
        ));
    }

    let mut tasks = Vec::new();
    for record in records {
        let record = record.map_err(|e| DssError::Parse(e.to_string()))?;
        if record.len() < 7 {
            continue;
        }
        let node: i64 = record[0]
            .trim()
            .parse()
            .map_err(|_| DssError::Parse(format!("номер узла: '{}'", &record[0])))?;
        tasks.push(ShuntTask {
            node,
            r1: optional_field(&record[1])?,
            x1: optional_field(&record[2])?,
            u1: optional_field(&record[3])?,
            r2: optional_field(&record[4])?,
            x2: optional_field(&record[5])?,
            u2: optional_field(&record[6])?,
        });
    }
    Ok(tasks)
}

/// Empty and literal `0` map to `None`; otherwise parse with either
/// decimal separator.
fn optional_field(raw: &str) -> DssResult<Option<f64>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "0" {
        return Ok(None);
    }
    raw.replace(',', ".")
        .parse()
        .map(Some)
        .map_err(|_| DssError::Parse(format!("не число: '{raw}'")))
}
