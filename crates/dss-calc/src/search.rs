//! Bounded-search building blocks.
//!
//! The flow-limit search bisects on a continuation coefficient where every
//! probe costs a full transient simulation, the bracket can be widened to
//! escape flat spots, and the midpoint can stop moving entirely. The
//! control flow is captured here as an explicit state machine
//! ([`FlowBracket`]) plus a reusable consecutive-repeat detector
//! ([`StagnationGuard`]); the solvers only pump probes through it.

use dss_core::DynVerdict;
use tracing::{debug, warn};

/// Detects a value that stops changing: `observe` returns `true` once the
/// value has repeated (within `eps`) for `limit` consecutive rounds.
#[derive(Debug)]
pub struct StagnationGuard {
    eps: f64,
    limit: u32,
    last: Option<f64>,
    repeats: u32,
}

impl StagnationGuard {
    pub fn new(eps: f64, limit: u32) -> Self {
        Self {
            eps,
            limit,
            last: None,
            repeats: 0,
        }
    }

    pub fn observe(&mut self, value: f64) -> bool {
        match self.last {
            Some(last) if (value - last).abs() < self.eps => self.repeats += 1,
            _ => self.repeats = 0,
        }
        self.last = Some(value);
        self.repeats >= self.limit
    }

    /// Count an external anomaly as a repeat (used when a bracket
    /// invariant breaks: a persistently broken bracket must terminate the
    /// same way a frozen midpoint does).
    pub fn penalise(&mut self) {
        self.repeats += 1;
    }

    pub fn stalled_rounds(&self) -> u32 {
        self.repeats
    }
}

/// Where a bracketed search currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    /// Awaiting the first bracketed probe.
    Probing,
    /// A probe landed; the bracket moved and the next midpoint is ready.
    Tightening,
    /// The search stopped making progress (frozen midpoint, broken
    /// bracket, or exhausted budget) and was aborted.
    Stagnated,
    /// Converged, or terminated by a failed run.
    Done,
}

/// Dual-bracket bisection on the continuation coefficient.
///
/// `step_min` tracks the coefficient of the last unstable probe (closest
/// to the loaded operating point), `step_max` the last stable one (deepest
/// off-load). The search converges when the last probe was stable and the
/// stable/unstable flows agree within `precision` MW. When an unstable
/// probe fails to shrink the bracket — or lands within a couple of MW of
/// the stable flow — the stable bound is shoved outward by 2.0 to escape
/// the flat spot.
#[derive(Debug)]
pub struct FlowBracket {
    step_min: f64,
    step_max: f64,
    p_stable: f64,
    p_current: f64,
    precision: f64,
    iterations: u32,
    max_iterations: u32,
    exhausted: bool,
    guard: StagnationGuard,
    state: SearchState,
}

impl FlowBracket {
    pub const MAX_ITERATIONS: u32 = 100;

    /// `coefficient_span` is the calibrated continuation sum; the bracket
    /// opens at `[0, -span]`. `p_stable` starts at the pre-continuation
    /// flow and `p_current` at the flow of the failing first probe.
    pub fn new(coefficient_span: f64, p_stable: f64, p_current: f64, precision: f64) -> Self {
        Self {
            step_min: 0.0,
            step_max: -coefficient_span,
            p_stable,
            p_current,
            precision,
            iterations: 0,
            max_iterations: Self::MAX_ITERATIONS,
            exhausted: false,
            guard: StagnationGuard::new(1e-3, 10),
            state: SearchState::Probing,
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// The search still wants another probe.
    pub fn active(&self) -> bool {
        matches!(self.state, SearchState::Probing | SearchState::Tightening)
    }

    /// The iteration budget ran out (as opposed to a frozen midpoint).
    pub fn budget_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Midpoint coefficient for the next probe.
    pub fn coefficient(&self) -> f64 {
        self.step_min + (self.step_max - self.step_min) * 0.5
    }

    /// Feed back one probe: the coefficient the simulator actually
    /// reached, the dynamic verdict, and the target-section flow.
    pub fn record(&mut self, step: f64, verdict: &DynVerdict, flow: f64) -> SearchState {
        self.iterations += 1;

        if !verdict.success {
            warn!(step, "dynamic run failed inside the flow search");
            self.state = SearchState::Done;
            return self.state;
        }

        if verdict.stable {
            self.step_max = step;
            self.p_stable = flow;
        } else {
            self.step_min = step;
            self.p_current = flow;
            if self.step_min <= self.step_max
                || self.p_current.floor() <= self.p_stable.floor() + 2.0
            {
                self.step_max -= 2.0;
            }
        }

        debug!(
            step_min = self.step_min,
            step_max = self.step_max,
            p_stable = self.p_stable,
            p_current = self.p_current,
            "flow bracket"
        );
        if self.step_min <= self.step_max {
            warn!(
                step_min = self.step_min,
                step_max = self.step_max,
                "flow bracket inverted"
            );
            self.guard.penalise();
        }

        let converged =
            verdict.stable && (self.p_current - self.p_stable).abs() <= self.precision;
        self.state = if converged {
            SearchState::Done
        } else if self.guard.observe(self.coefficient()) {
            warn!(
                iteration = self.iterations,
                "flow search stagnated, keeping the current flow"
            );
            SearchState::Stagnated
        } else if self.iterations >= self.max_iterations {
            warn!(
                limit = self.max_iterations,
                "flow search iteration budget exhausted"
            );
            self.exhausted = true;
            SearchState::Stagnated
        } else {
            SearchState::Tightening
        };
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(success: bool, stable: bool) -> DynVerdict {
        DynVerdict {
            success,
            stable,
            message: " - ".into(),
            time_reached: 0.0,
        }
    }

    /// Synthetic plant: flows respond linearly to the coefficient and the
    /// case is stable below a known threshold.
    fn drive(bracket: &mut FlowBracket, p_heavy: f64, scale: f64, p_limit: f64) -> (f64, u32) {
        let mut last_flow = p_heavy;
        while bracket.active() {
            let k = bracket.coefficient();
            let flow = p_heavy + scale * k;
            let stable = flow <= p_limit;
            last_flow = flow;
            bracket.record(k, &verdict(true, stable), flow);
        }
        (last_flow, bracket.iterations())
    }

    #[test]
    fn converges_within_precision_and_budget() {
        // heavy point at 900 MW, 1 MW per unit coefficient, limit 700 MW
        let mut bracket = FlowBracket::new(300.0, 500.0, 900.0, 5.0);
        let (_flow, iterations) = drive(&mut bracket, 900.0, 1.0, 700.0);
        assert_eq!(bracket.state(), SearchState::Done);
        assert!(iterations <= FlowBracket::MAX_ITERATIONS);
        assert!(!bracket.budget_exhausted());
    }

    #[test]
    fn frozen_midpoint_stagnates() {
        let mut bracket = FlowBracket::new(300.0, 500.0, 900.0, 5.0);
        // feed the same probe endlessly without moving the bracket: every
        // unstable probe at step_min=0 recreates the same midpoint
        let mut rounds = 0;
        while bracket.active() && rounds < 500 {
            bracket.record(0.0, &verdict(true, false), 900.0);
            rounds += 1;
        }
        assert_eq!(bracket.state(), SearchState::Stagnated);
        assert!(rounds < 500, "guard never fired");
    }

    #[test]
    fn failed_run_terminates_immediately() {
        let mut bracket = FlowBracket::new(300.0, 500.0, 900.0, 5.0);
        bracket.record(bracket.coefficient(), &verdict(false, false), 0.0);
        assert_eq!(bracket.state(), SearchState::Done);
    }

    #[test]
    fn iteration_count_respects_declared_bound() {
        // a limit the search can never satisfy within precision 0: the
        // budget must stop it
        let mut bracket = FlowBracket::new(300.0, 500.0, 900.0, 0.0);
        let (_, iterations) = drive(&mut bracket, 900.0, 1.0, 700.0);
        assert!(iterations <= FlowBracket::MAX_ITERATIONS);
    }

    #[test]
    fn stagnation_guard_requires_consecutive_repeats() {
        let mut guard = StagnationGuard::new(1e-3, 3);
        assert!(!guard.observe(1.0));
        assert!(!guard.observe(1.0));
        assert!(!guard.observe(2.0)); // reset
        assert!(!guard.observe(2.0));
        assert!(!guard.observe(2.0));
        assert!(guard.observe(2.0));
    }
}
