//! Simulator log observation.
//!
//! The shunt and residual-voltage calculations read their measurements out
//! of the simulator's protocol trail: a dynamic run emits a line of the
//! form `"Величина остаточного напряжения в узле … (Uкз=… кВ, …)"`.
//! Observers subscribe on the façade for the duration of a run;
//! [`ScopedObserver`] guarantees removal on every exit path.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cell::RefCell;
use std::rc::Rc;

/// One simulator protocol record.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub code: i64,
    pub level: i64,
    pub stage_id: i64,
    pub table: String,
    pub index: i64,
    pub description: String,
    pub form_name: String,
}

impl LogEvent {
    /// A plain informational record carrying only a description.
    pub fn info(description: impl Into<String>) -> Self {
        Self {
            code: 0,
            level: 0,
            stage_id: 0,
            table: String::new(),
            index: -1,
            description: description.into(),
            form_name: String::new(),
        }
    }
}

pub trait LogObserver {
    fn on_message(&self, event: &LogEvent);
}

/// Handle returned by [`crate::SimFacade::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// RAII subscription: attaches an observer to the façade and removes it on
/// drop, whatever the exit path.
pub struct ScopedObserver<'a> {
    sim: &'a dyn crate::SimFacade,
    id: ObserverId,
}

impl<'a> ScopedObserver<'a> {
    pub fn attach(sim: &'a dyn crate::SimFacade, observer: Rc<dyn LogObserver>) -> Self {
        let id = sim.subscribe(observer);
        Self { sim, id }
    }
}

impl Drop for ScopedObserver<'_> {
    fn drop(&mut self) {
        self.sim.unsubscribe(self.id);
    }
}

static RESIDUAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Uкз=([0-9]+(?:[.,][0-9]+)?)\s*кВ").expect("residual regex"));

const RESIDUAL_MARKER: &str = "Величина остаточного напряжения в узле";

/// Parse the residual voltage out of a protocol line.
///
/// The decimal separator is locale-sensitive on the simulator side; both
/// `.` and `,` are accepted and normalised to the C locale before parsing.
pub fn parse_residual_kv(line: &str) -> Option<f64> {
    let caps = RESIDUAL_RE.captures(line)?;
    caps[1].replace(',', ".").parse().ok()
}

/// Captures the residual voltage from the protocol trail of one dynamic
/// run. Only the last matching line is kept; [`take`](Self::take) clears
/// the buffer *after* extraction, never before.
#[derive(Default)]
pub struct ResidualVoltageTap {
    last: RefCell<Option<f64>>,
}

impl ResidualVoltageTap {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// The last captured reading, clearing the buffer.
    pub fn take(&self) -> Option<f64> {
        self.last.borrow_mut().take()
    }
}

impl LogObserver for ResidualVoltageTap {
    fn on_message(&self, event: &LogEvent) {
        if event.code == 0 && event.description.contains(RESIDUAL_MARKER) {
            if let Some(u) = parse_residual_kv(&event.description) {
                *self.last.borrow_mut() = Some(u);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dot_and_comma_decimals() {
        let line = "Величина остаточного напряжения в узле 501 (Uкз=247.3 кВ, фаза А)";
        assert_eq!(parse_residual_kv(line), Some(247.3));
        let line = "Величина остаточного напряжения в узле 501 (Uкз=247,3 кВ, фаза А)";
        assert_eq!(parse_residual_kv(line), Some(247.3));
    }

    #[test]
    fn parses_integer_reading() {
        assert_eq!(parse_residual_kv("(Uкз=250 кВ)"), Some(250.0));
    }

    #[test]
    fn rejects_unrelated_lines() {
        assert_eq!(parse_residual_kv("расчет завершен"), None);
        assert_eq!(parse_residual_kv("Uкз= кВ"), None);
    }

    #[test]
    fn tap_keeps_last_reading_and_clears_on_take() {
        let tap = ResidualVoltageTap::new();
        tap.on_message(&LogEvent::info(
            "Величина остаточного напряжения в узле 501 (Uкз=300.0 кВ)",
        ));
        tap.on_message(&LogEvent::info(
            "Величина остаточного напряжения в узле 501 (Uкз=251.8 кВ)",
        ));
        assert_eq!(tap.take(), Some(251.8));
        assert_eq!(tap.take(), None);
    }

    #[test]
    fn tap_ignores_nonzero_codes() {
        let tap = ResidualVoltageTap::new();
        let mut event = LogEvent::info("Величина остаточного напряжения в узле 1 (Uкз=10 кВ)");
        event.code = 2;
        tap.on_message(&event);
        assert_eq!(tap.take(), None);
    }
}
