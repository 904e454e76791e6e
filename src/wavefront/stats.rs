//! Per-frame stage timings.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Timings of one finished frame, in stage order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Incremented for every finalized frame, starting at 1.
    pub id: u64,
    pub timings: Vec<(&'static str, Duration)>,
}

impl FrameStats {
    /// Summed duration of every entry named `stage`.
    pub fn get(&self, stage: &str) -> Option<Duration> {
        let mut found = false;
        let total: Duration = self
            .timings
            .iter()
            .filter(|(name, _)| *name == stage)
            .inspect(|_| found = true)
            .map(|(_, d)| *d)
            .sum();
        found.then_some(total)
    }

    pub fn total(&self) -> Duration {
        self.timings.iter().map(|(_, d)| *d).sum()
    }
}

#[derive(Debug, Default)]
struct State {
    current: Vec<(&'static str, Duration)>,
    last: FrameStats,
}

/// Collects timings on the worker; readers see the last finalized frame.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    state: Mutex<State>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stage: &'static str, duration: Duration) {
        self.state.lock().current.push((stage, duration));
    }

    /// Run `f` and record how long it took.
    pub fn time<R>(&self, stage: &'static str, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let r = f();
        self.record(stage, start.elapsed());
        r
    }

    /// Publish the current frame's timings and start a new frame.
    pub fn finalize(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.last.id + 1;
        let timings = std::mem::take(&mut state.current);
        state.last = FrameStats { id, timings };
        id
    }

    /// Drop timings of an unfinished frame.
    pub fn discard(&self) {
        self.state.lock().current.clear();
    }

    pub fn last(&self) -> FrameStats {
        self.state.lock().last.clone()
    }
}
