//! Phase timing of SCOPE and MOPE runs.
//!
//! Clocks only run with the `profiling` feature. Without it [`PhaseClock`]
//! and [`TimingCollector`] carry no state and every run reports an empty
//! [`RunTiming`].

use serde::{Deserialize, Serialize};
#[cfg(feature = "profiling")]
use std::time::Instant;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunTiming {
    pub total_ms: f64,
    pub phases: Vec<PhaseTiming>,
}

impl RunTiming {
    /// Summed time of every phase called `name`.
    pub fn phase_ms(&self, name: &str) -> f64 {
        self.phases.iter().filter(|p| p.name == name).map(|p| p.ms).sum()
    }
}

/// One named phase: a SCOPE round, a MOPE search step, ...
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub name: String,
    pub ms: f64,
    /// Samples alive when the phase ended.
    pub samples: usize,
}

/// Stopwatch for a single phase.
#[derive(Debug)]
pub struct PhaseClock {
    #[cfg(feature = "profiling")]
    start: Instant,
}

impl PhaseClock {
    #[inline]
    pub fn start() -> Self {
        Self {
            #[cfg(feature = "profiling")]
            start: Instant::now(),
        }
    }

    /// Milliseconds since [`Self::start`]; always 0 without `profiling`.
    #[inline]
    pub fn ms(&self) -> f64 {
        #[cfg(feature = "profiling")]
        {
            self.start.elapsed().as_secs_f64() * 1e3
        }
        #[cfg(not(feature = "profiling"))]
        {
            0.0
        }
    }
}

/// Accumulates the phases of one run.
#[derive(Debug, Default)]
pub struct TimingCollector {
    #[cfg(feature = "profiling")]
    run: Option<PhaseClock>,
    #[cfg(feature = "profiling")]
    timing: RunTiming,
}

impl TimingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_run(&mut self) {
        #[cfg(feature = "profiling")]
        {
            self.run = Some(PhaseClock::start());
            self.timing = RunTiming::default();
        }
    }

    #[cfg_attr(not(feature = "profiling"), allow(unused_variables))]
    pub fn record_phase(&mut self, name: &str, ms: f64) {
        #[cfg(feature = "profiling")]
        self.timing.phases.push(PhaseTiming {
            name: name.to_string(),
            ms,
            samples: 0,
        });
    }

    /// Attach a sample count to the latest phase.
    #[cfg_attr(not(feature = "profiling"), allow(unused_variables))]
    pub fn record_samples(&mut self, samples: usize) {
        #[cfg(feature = "profiling")]
        if let Some(phase) = self.timing.phases.last_mut() {
            phase.samples = samples;
        }
    }

    pub fn finish(&mut self) -> RunTiming {
        #[cfg(feature = "profiling")]
        {
            self.timing.total_ms = self.run.take().map_or(0.0, |clock| clock.ms());
            for p in &self.timing.phases {
                tracing::debug!(phase = %p.name, ms = p.ms, samples = p.samples, "phase timing");
            }
            std::mem::take(&mut self.timing)
        }
        #[cfg(not(feature = "profiling"))]
        {
            RunTiming::default()
        }
    }
}

/// Evaluate `$body` and record its duration under `$name`.
///
/// ```ignore
/// let set = time_phase!(collector, "round2", round2(&ctx, set, &[], rng));
/// ```
#[macro_export]
macro_rules! time_phase {
    ($collector:expr, $name:expr, $body:expr) => {{
        let clock = $crate::timing::PhaseClock::start();
        let value = $body;
        $collector.record_phase($name, clock.ms());
        value
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_records_phases() {
        let mut collector = TimingCollector::new();
        collector.start_run();
        let n = crate::time_phase!(collector, "round1", 40);
        collector.record_samples(n);
        collector.record_phase("round2", 2.5);
        collector.record_samples(10);
        let timing = collector.finish();

        if cfg!(feature = "profiling") {
            assert_eq!(timing.phases.len(), 2);
            assert_eq!(timing.phases[0].name, "round1");
            assert_eq!(timing.phases[0].samples, 40);
            assert_eq!(timing.phase_ms("round2"), 2.5);
        } else {
            assert!(timing.phases.is_empty());
            assert_eq!(timing.total_ms, 0.0);
        }
    }
}
