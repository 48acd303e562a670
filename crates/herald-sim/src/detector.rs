//! Single-photon detector.

use rand::Rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};
use tracing::debug;

use herald_kernel::{EventId, Timeline, VirtualTime, period_ps, quantize, seconds_to_ps};

use crate::error::{SimError, SimResult};
use crate::event::{Env, NodeId, SimEvent};
use crate::metrics::MetricEvent;

/// Detector hardware parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Probability an arriving photon is registered.
    pub efficiency: f64,
    /// Mean false detections per second.
    pub dark_count: f64,
    /// Maximum count rate in Hz; its inverse is the dead time.
    pub count_rate: f64,
    /// Reporting granularity in picoseconds.
    pub time_resolution: VirtualTime,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            efficiency: 0.85,
            dark_count: 11.0,
            count_rate: 25e6,
            time_resolution: 100,
        }
    }
}

/// Running totals kept by a detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorCounters {
    /// Photons that reached the detector.
    pub photons: u64,
    /// Detections reported upstream, dark counts included.
    pub recorded: u64,
    /// Detections refused during dead time.
    pub undetectable: u64,
}

impl DetectorCounters {
    /// Add another detector's totals.
    pub fn merge(&mut self, other: &Self) {
        self.photons += other.photons;
        self.recorded += other.recorded;
        self.undetectable += other.undetectable;
    }
}

/// A single-photon detector attached to a BSM device.
#[derive(Debug)]
pub struct Detector {
    name: String,
    node: NodeId,
    index: usize,
    params: DetectorParams,
    next_detection_time: Option<VirtualTime>,
    counters: DetectorCounters,
    dark_count_event: Option<EventId>,
}

impl Detector {
    /// Create detector `index` of the BSM on `node`.
    pub fn new(name: impl Into<String>, node: NodeId, index: usize, params: DetectorParams) -> Self {
        Self {
            name: name.into(),
            node,
            index,
            params,
            next_detection_time: None,
            counters: DetectorCounters::default(),
            dark_count_event: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    pub fn counters(&self) -> DetectorCounters {
        self.counters
    }

    pub fn time_resolution(&self) -> VirtualTime {
        self.params.time_resolution
    }

    /// Interval after a detection during which the detector is blind.
    pub fn dead_time(&self) -> VirtualTime {
        period_ps(self.params.count_rate).unwrap_or(0)
    }

    /// Whether a dark-count event is pending.
    pub fn dark_counts_armed(&self) -> bool {
        self.dark_count_event.is_some()
    }

    /// Clear detection history before a new trial. Counters keep running
    /// across trials.
    pub fn init(&mut self) {
        self.next_detection_time = None;
    }

    /// A photon arrives; it is registered with probability `efficiency`.
    ///
    /// Returns the quantised detection time when a detection is reported.
    pub fn get<R: Rng + ?Sized>(&mut self, rng: &mut R, env: &mut Env<'_>) -> Option<VirtualTime> {
        self.counters.photons += 1;
        if rng.r#gen::<f64>() < self.params.efficiency {
            self.record_detection(env)
        } else {
            debug!(detector = %self.name, "photon missed by detector");
            None
        }
    }

    /// Register a detection unless the detector is still dead.
    pub fn record_detection(&mut self, env: &mut Env<'_>) -> Option<VirtualTime> {
        let now = env.now();
        if self.next_detection_time.is_none_or(|next| now > next) {
            self.counters.recorded += 1;
            self.next_detection_time = Some(now + self.dead_time());
            let time = quantize(now, self.params.time_resolution);
            debug!(detector = %self.name, now, time, "detection recorded");
            Some(time)
        } else {
            self.counters.undetectable += 1;
            env.metrics.record(MetricEvent::DeadTimeLoss);
            None
        }
    }

    /// Start the dark-count process if it is enabled and not already running.
    pub fn arm_dark_counts<R: Rng + ?Sized>(&mut self, rng: &mut R, env: &mut Env<'_>) -> SimResult<()> {
        if self.params.dark_count <= 0.0 || self.dark_count_event.is_some() {
            return Ok(());
        }
        self.schedule_dark_count(rng, env)
    }

    fn schedule_dark_count<R: Rng + ?Sized>(&mut self, rng: &mut R, env: &mut Env<'_>) -> SimResult<()> {
        let exp = Exp::new(self.params.dark_count).map_err(|e| {
            SimError::Config(format!("dark count rate {}: {e}", self.params.dark_count))
        })?;
        let delay = seconds_to_ps(exp.sample(rng));
        let id = env.timeline.schedule_after(
            delay,
            SimEvent::DarkCount {
                node: self.node,
                detector: self.index,
            },
        );
        self.dark_count_event = Some(id);
        Ok(())
    }

    /// Handle a dark-count event: re-arm the process, then record a detection.
    pub fn on_dark_count<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        env: &mut Env<'_>,
    ) -> SimResult<Option<VirtualTime>> {
        self.dark_count_event = None;
        self.schedule_dark_count(rng, env)?;
        env.metrics.record(MetricEvent::DarkCount);
        Ok(self.record_detection(env))
    }

    /// Cancel the pending dark count, if any.
    pub fn cancel_dark_counts(&mut self, timeline: &mut Timeline<SimEvent>) {
        if let Some(id) = self.dark_count_event.take() {
            timeline.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SimMetrics;
    use herald_kernel::QuantumManager;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn detector(params: DetectorParams) -> Detector {
        Detector::new("bsm.detector0", NodeId(2), 0, params)
    }

    #[test]
    fn test_dead_time_blocks_second_detection() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut d = detector(DetectorParams::default());
        assert_eq!(d.dead_time(), 40_000);

        tl.schedule(1_000, SimEvent::Emit { node: NodeId(0) }).unwrap();
        tl.pop();
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        assert_eq!(d.record_detection(&mut env), Some(1_000));
        drop(env);

        tl.schedule(1_000 + 39_999, SimEvent::Emit { node: NodeId(0) }).unwrap();
        tl.pop();
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        assert_eq!(d.record_detection(&mut env), None);

        assert_eq!(d.counters().recorded, 1);
        assert_eq!(d.counters().undetectable, 1);
        assert_eq!(metrics.dead_time_losses, 1);
    }

    #[test]
    fn test_detection_time_is_quantised() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut d = detector(DetectorParams::default());

        tl.schedule(12_549, SimEvent::Emit { node: NodeId(0) }).unwrap();
        tl.pop();
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        assert_eq!(d.record_detection(&mut env), Some(12_500));
    }

    #[test]
    fn test_efficiency_zero_never_detects() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut d = detector(DetectorParams { efficiency: 0.0, ..Default::default() });
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        for _ in 0..100 {
            assert_eq!(d.get(&mut rng, &mut env), None);
        }
        assert_eq!(d.counters().photons, 100);
        assert_eq!(d.counters().recorded, 0);
    }

    #[test]
    fn test_init_rearms_but_keeps_counters() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut rng = StdRng::seed_from_u64(5);
        let mut d = detector(DetectorParams { efficiency: 1.0, ..Default::default() });
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };

        assert_eq!(d.get(&mut rng, &mut env), Some(0));
        assert_eq!(d.get(&mut rng, &mut env), None);
        d.init();
        assert_eq!(d.get(&mut rng, &mut env), Some(0));

        let counters = d.counters();
        assert_eq!(counters.photons, 3);
        assert_eq!(counters.recorded, 2);
        assert_eq!(counters.undetectable, 1);
    }

    #[test]
    fn test_dark_counts_rearm_and_cancel() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut d = detector(DetectorParams { dark_count: 1000.0, ..Default::default() });

        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        d.arm_dark_counts(&mut rng, &mut env).unwrap();
        d.arm_dark_counts(&mut rng, &mut env).unwrap();
        drop(env);
        assert_eq!(tl.len(), 1);

        let (_, event) = tl.pop().unwrap();
        assert!(matches!(event, SimEvent::DarkCount { detector: 0, .. }));
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        assert!(d.on_dark_count(&mut rng, &mut env).unwrap().is_some());
        drop(env);
        assert_eq!(tl.len(), 1);
        assert_eq!(metrics.dark_counts, 1);

        d.cancel_dark_counts(&mut tl);
        assert!(tl.is_empty());
        assert!(!d.dark_counts_armed());
    }

    #[test]
    fn test_no_dark_counts_when_disabled() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut d = detector(DetectorParams { dark_count: 0.0, ..Default::default() });
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        d.arm_dark_counts(&mut rng, &mut env).unwrap();
        drop(env);
        assert!(tl.is_empty());
    }
}
