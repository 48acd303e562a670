//! Time-bin Bell-state measurement device.
//!
//! Photons from the two end nodes are buffered by emission location. When
//! the second distinct photon of an instant arrives, each is measured in the
//! early/late basis and routed to one of two detectors:
//!
//! - early/early and late/late pairs bunch (Hong-Ou-Mandel) onto one
//!   randomly chosen detector and can never herald;
//! - early/late and late/early pairs go to independently chosen detectors.
//!   If both photons survive, the memories are projected onto psi+ (same
//!   detector) or psi− (different detectors).
//!
//! A herald is raised when a detector trigger lands one bin separation after
//! the previous trigger (within half the device resolution) and the last
//! measured pair was a surviving heralding pair.

use num_complex::Complex64;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use herald_kernel::{Circuit, QuantumKey, QuantumManager, Timeline, VirtualTime};

use crate::detector::{Detector, DetectorCounters, DetectorParams};
use crate::encoding::Encoding;
use crate::error::SimResult;
use crate::event::{Env, NodeId, SimEvent};
use crate::metrics::{MetricEvent, PairKind, TriggerClass};
use crate::photon::Photon;

/// Two-qubit Bell states, amplitudes in |00⟩, |01⟩, |10⟩, |11⟩ order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BellState {
    PhiPlus,
    PhiMinus,
    PsiPlus,
    PsiMinus,
}

impl BellState {
    pub const ALL: [BellState; 4] = [Self::PhiPlus, Self::PhiMinus, Self::PsiPlus, Self::PsiMinus];

    pub fn amplitudes(&self) -> [Complex64; 4] {
        let s = Complex64::new(0.5_f64.sqrt(), 0.0);
        let z = Complex64::new(0.0, 0.0);
        match self {
            Self::PhiPlus => [s, z, z, s],
            Self::PhiMinus => [s, z, z, -s],
            Self::PsiPlus => [z, s, s, z],
            Self::PsiMinus => [z, s, -s, z],
        }
    }
}

/// Set `keys` to `desired` with probability `fidelity`, otherwise to one of
/// the other three Bell states chosen uniformly.
pub fn set_state_with_fidelity<R: Rng + ?Sized>(
    keys: &[QuantumKey],
    desired: BellState,
    fidelity: f64,
    rng: &mut R,
    qm: &mut QuantumManager,
) -> SimResult<BellState> {
    let state = if rng.r#gen::<f64>() < fidelity {
        desired
    } else {
        let others: Vec<BellState> = BellState::ALL.into_iter().filter(|b| *b != desired).collect();
        others.choose(rng).copied().unwrap_or(desired)
    };
    qm.set(keys, &state.amplitudes())?;
    Ok(state)
}

/// Whether `time` lies within `resolution / 2` of `target`, bounds included.
pub fn valid_trigger_time(time: VirtualTime, target: VirtualTime, resolution: VirtualTime) -> bool {
    let half = resolution / 2;
    target.saturating_sub(half) <= time && time <= target.saturating_add(half)
}

/// Heralded result forwarded to the relay protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Herald {
    /// 0 for psi+, 1 for psi−.
    pub result: u8,
    /// Quantised trigger time of the second detection.
    pub time: VirtualTime,
}

/// The time-bin BSM with its two detectors.
#[derive(Debug)]
pub struct TimeBinBsm {
    name: String,
    node: NodeId,
    encoding: Encoding,
    detectors: [Detector; 2],
    photons: Vec<Photon>,
    photon_arrival_time: Option<VirtualTime>,
    last_trigger: Option<(VirtualTime, usize)>,
    desired_state: bool,
    measure: Circuit,
}

impl TimeBinBsm {
    /// Build a BSM on `node` with one parameter set per detector.
    pub fn new(
        name: impl Into<String>,
        node: NodeId,
        encoding: Encoding,
        detectors: [DetectorParams; 2],
    ) -> SimResult<Self> {
        let name = name.into();
        let [d0, d1] = detectors;
        let mut measure = Circuit::new(1);
        measure.measure(0)?;
        Ok(Self {
            detectors: [
                Detector::new(format!("{name}.detector0"), node, 0, d0),
                Detector::new(format!("{name}.detector1"), node, 1, d1),
            ],
            name,
            node,
            encoding,
            photons: Vec::with_capacity(2),
            photon_arrival_time: None,
            last_trigger: None,
            desired_state: false,
            measure,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// Device resolution: the coarsest detector resolution.
    pub fn resolution(&self) -> VirtualTime {
        self.detectors
            .iter()
            .map(Detector::time_resolution)
            .max()
            .unwrap_or(0)
    }

    pub fn detectors(&self) -> &[Detector; 2] {
        &self.detectors
    }

    /// Summed detector counters.
    pub fn detector_counters(&self) -> DetectorCounters {
        let mut total = DetectorCounters::default();
        for d in &self.detectors {
            total.merge(&d.counters());
        }
        total
    }

    /// Most recent trigger (time, detector index).
    pub fn last_trigger(&self) -> Option<(VirtualTime, usize)> {
        self.last_trigger
    }

    /// Whether the most recent pair was a surviving heralding pair.
    pub fn desired_state(&self) -> bool {
        self.desired_state
    }

    /// Clear buffered photons and trigger history before a new trial.
    pub fn init(&mut self) {
        self.photons.clear();
        self.photon_arrival_time = None;
        self.last_trigger = None;
        self.desired_state = false;
        for d in &mut self.detectors {
            d.init();
        }
    }

    /// Arm the dark-count process on both detectors.
    pub fn arm_dark_counts<R: Rng + ?Sized>(&mut self, rng: &mut R, env: &mut Env<'_>) -> SimResult<()> {
        for d in &mut self.detectors {
            d.arm_dark_counts(rng, env)?;
        }
        Ok(())
    }

    pub fn cancel_dark_counts(&mut self, timeline: &mut Timeline<SimEvent>) {
        for d in &mut self.detectors {
            d.cancel_dark_counts(timeline);
        }
    }

    /// Receive a photon. Returns the heralds raised by immediate detections.
    pub fn get<R: Rng + ?Sized>(
        &mut self,
        photon: Photon,
        rng: &mut R,
        env: &mut Env<'_>,
    ) -> SimResult<Vec<Herald>> {
        let now = env.now();
        if self.photon_arrival_time.is_none_or(|t| t < now) {
            self.photons.clear();
            self.photon_arrival_time = Some(now);
        }
        if !self.photons.iter().any(|p| p.location == photon.location) {
            self.photons.push(photon);
        }
        debug!(bsm = %self.name, buffered = self.photons.len(), "photon received");

        if self.photons.len() < 2 {
            return Ok(vec![]);
        }
        self.measure_pair(rng, env)
    }

    fn measure_pair<R: Rng + ?Sized>(&mut self, rng: &mut R, env: &mut Env<'_>) -> SimResult<Vec<Herald>> {
        let (key0, loss0) = (self.photons[0].key, self.photons[0].loss);
        let (key1, loss1) = (self.photons[1].key, self.photons[1].loss);

        let meas0 = env.qm.run_circuit(&self.measure, &[key0], rng.r#gen())?[&key0];
        let meas1 = env.qm.run_circuit(&self.measure, &[key1], rng.r#gen())?[&key1];
        let kind = PairKind::from_bits(meas0, meas1);
        debug!(bsm = %self.name, ?kind, "photon pair measured");
        env.metrics.record(MetricEvent::PairMeasured(kind));

        let late_time = env.now() + self.encoding.bin_separation;
        let survives0 = rng.r#gen::<f64>() > loss0;
        let survives1 = rng.r#gen::<f64>() > loss1;
        for survived in [survives0, survives1] {
            if !survived {
                info!(bsm = %self.name, "photon lost before detection");
                env.metrics.record(MetricEvent::PhotonLost);
            }
        }

        // (detector, fires late) per surviving photon
        let mut hits: Vec<(usize, bool)> = Vec::with_capacity(2);
        if kind.is_heralding() {
            let det0 = rng.gen_range(0..2);
            let det1 = rng.gen_range(0..2);
            self.desired_state = survives0 && survives1;
            if self.desired_state {
                let desired = if det0 == det1 {
                    BellState::PsiPlus
                } else {
                    BellState::PsiMinus
                };
                set_state_with_fidelity(
                    &[key0, key1],
                    desired,
                    self.encoding.raw_fidelity,
                    rng,
                    env.qm,
                )?;
            }
            if survives0 {
                hits.push((det0, meas0 == 1));
            }
            if survives1 {
                hits.push((det1, meas1 == 1));
            }
        } else {
            self.desired_state = false;
            let det = rng.gen_range(0..2);
            let late = kind == PairKind::LateLate;
            if survives0 {
                hits.push((det, late));
            }
            if survives1 {
                hits.push((det, late));
            }
        }

        let mut heralds = Vec::new();
        for (detector, late) in hits {
            if late {
                env.timeline.schedule(
                    late_time,
                    SimEvent::DetectorHit {
                        node: self.node,
                        detector,
                    },
                )?;
            } else if let Some(herald) = self.fire_detector(detector, rng, env) {
                heralds.push(herald);
            }
        }
        Ok(heralds)
    }

    /// A photon reaches detector `index` now.
    pub fn fire_detector<R: Rng + ?Sized>(
        &mut self,
        index: usize,
        rng: &mut R,
        env: &mut Env<'_>,
    ) -> Option<Herald> {
        let time = self.detectors[index].get(rng, env)?;
        self.trigger(index, time, env)
    }

    /// Dark count on detector `index`.
    pub fn dark_count<R: Rng + ?Sized>(
        &mut self,
        index: usize,
        rng: &mut R,
        env: &mut Env<'_>,
    ) -> SimResult<Option<Herald>> {
        let Some(time) = self.detectors[index].on_dark_count(rng, env)? else {
            return Ok(None);
        };
        Ok(self.trigger(index, time, env))
    }

    /// Classify a detector report and raise a herald when it completes a
    /// correctly spaced heralding pair.
    pub fn trigger(&mut self, detector: usize, time: VirtualTime, env: &mut Env<'_>) -> Option<Herald> {
        let resolution = self.resolution();
        let spaced = self.last_trigger.is_some_and(|(last, _)| {
            valid_trigger_time(
                time.saturating_sub(last),
                self.encoding.bin_separation,
                resolution,
            )
        });

        let mut herald = None;
        let class = if spaced && self.desired_state {
            let same = self.last_trigger.is_some_and(|(_, d)| d == detector);
            let result = if same { 0 } else { 1 };
            env.metrics.record(MetricEvent::Herald { sign: result });
            herald = Some(Herald { result, time });
            TriggerClass::Heralded
        } else if spaced {
            warn!(bsm = %self.name, time, "undesired state had bin-separated triggers");
            TriggerClass::UndesiredValidTiming
        } else if self.desired_state {
            TriggerClass::DesiredInvalidTiming
        } else {
            TriggerClass::InvalidState
        };
        debug!(bsm = %self.name, detector, time, ?class, "trigger");
        env.metrics.record(MetricEvent::Trigger(class));

        self.last_trigger = Some((time, detector));
        herald
    }
}
