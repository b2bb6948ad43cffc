//! Progress reporting and cooperative cancellation.
//!
//! Calculations run for minutes; the UI observes them through a push-style
//! callback carrying a monotonically non-decreasing step counter. The sink
//! is `Send` so a solver can run on a worker thread while the callback
//! marshals values into a foreign event loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Push-style progress sink.
///
/// `tick` advances the counter by one and emits it; `pulse` re-emits the
/// current value (used inside long inner loops to show liveness without
/// claiming a completed step). Emitted values never decrease.
pub struct ProgressSink {
    callback: Option<Box<dyn Fn(u64) + Send>>,
    current: u64,
}

impl ProgressSink {
    pub fn new(callback: impl Fn(u64) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
            current: 0,
        }
    }

    /// A sink that swallows everything.
    pub fn disabled() -> Self {
        Self {
            callback: None,
            current: 0,
        }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn tick(&mut self) {
        self.current += 1;
        self.emit();
    }

    pub fn pulse(&self) {
        self.emit();
    }

    fn emit(&self) {
        if let Some(cb) = &self.callback {
            cb(self.current);
        }
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("current", &self.current)
            .field("attached", &self.callback.is_some())
            .finish()
    }
}

/// Cooperative cancellation flag, checked between (regime, variant,
/// scenario) triples. The triple in flight always completes; the outer loop
/// then returns partial results.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emitted_values_are_monotone() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let mut sink = ProgressSink::new(move |v| sink_seen.lock().unwrap().push(v));

        sink.tick();
        sink.pulse();
        sink.tick();
        sink.pulse();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![1, 1, 2, 2]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn cancel_token_is_shared_across_clones() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
