//! Diagnostic counters.
//!
//! Components report what they observe through a [`MetricsSink`] instead of
//! keeping tallies on themselves; [`SimMetrics`] is the default sink and is
//! what ends up in run reports.

use serde::{Deserialize, Serialize};

/// Time-bin outcome of a measured photon pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairKind {
    EarlyEarly,
    EarlyLate,
    LateEarly,
    LateLate,
}

impl PairKind {
    /// Classify from the two basis measurement bits (0 = early, 1 = late).
    pub fn from_bits(first: u8, second: u8) -> Self {
        match (first, second) {
            (0, 0) => Self::EarlyEarly,
            (0, _) => Self::EarlyLate,
            (_, 0) => Self::LateEarly,
            _ => Self::LateLate,
        }
    }

    /// Early/late and late/early pairs can herald; the others interfere.
    pub fn is_heralding(&self) -> bool {
        matches!(self, Self::EarlyLate | Self::LateEarly)
    }
}

/// How a BSM trigger was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerClass {
    /// One bin separation after the previous trigger, heralding pair.
    Heralded,
    /// One bin separation after the previous trigger, but the pair could not herald.
    UndesiredValidTiming,
    /// Heralding pair, trigger not one bin after the previous one.
    DesiredInvalidTiming,
    /// Interfering pair, badly timed trigger.
    InvalidState,
}

/// Observable simulation occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricEvent {
    PairMeasured(PairKind),
    /// A photon failed its loss draw at the BSM.
    PhotonLost,
    Trigger(TriggerClass),
    Herald { sign: u8 },
    /// Detection refused because the detector was still dead.
    DeadTimeLoss,
    DarkCount,
    /// The trapped atom was lost before emission.
    AtomLost,
    /// The atom decayed away from the collected transition.
    OffResonance,
    AttemptFailed,
    Entangled,
    MemoryExpired,
}

/// Receiver for [`MetricEvent`]s.
pub trait MetricsSink {
    fn record(&mut self, event: MetricEvent);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn record(&mut self, _event: MetricEvent) {}
}

/// Counting sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimMetrics {
    pub early_early: u64,
    pub early_late: u64,
    pub late_early: u64,
    pub late_late: u64,
    pub bsm_photon_losses: u64,
    pub trigger_count: u64,
    pub heralded_triggers: u64,
    pub undesired_valid_timing: u64,
    pub approved_state_invalid_time: u64,
    pub invalid_state_triggers: u64,
    pub heralds_psi_plus: u64,
    pub heralds_psi_minus: u64,
    pub dead_time_losses: u64,
    pub dark_counts: u64,
    pub atom_losses: u64,
    pub off_resonance_decays: u64,
    pub failed_attempts: u64,
    pub entanglements: u64,
    pub memory_expirations: u64,
}

impl SimMetrics {
    /// Total photon pairs measured by the BSM.
    pub fn pairs_measured(&self) -> u64 {
        self.early_early + self.early_late + self.late_early + self.late_late
    }

    /// Total heralds sent.
    pub fn heralds(&self) -> u64 {
        self.heralds_psi_plus + self.heralds_psi_minus
    }
}

impl MetricsSink for SimMetrics {
    fn record(&mut self, event: MetricEvent) {
        match event {
            MetricEvent::PairMeasured(kind) => match kind {
                PairKind::EarlyEarly => self.early_early += 1,
                PairKind::EarlyLate => self.early_late += 1,
                PairKind::LateEarly => self.late_early += 1,
                PairKind::LateLate => self.late_late += 1,
            },
            MetricEvent::PhotonLost => self.bsm_photon_losses += 1,
            MetricEvent::Trigger(class) => {
                self.trigger_count += 1;
                match class {
                    TriggerClass::Heralded => self.heralded_triggers += 1,
                    TriggerClass::UndesiredValidTiming => self.undesired_valid_timing += 1,
                    TriggerClass::DesiredInvalidTiming => self.approved_state_invalid_time += 1,
                    TriggerClass::InvalidState => self.invalid_state_triggers += 1,
                }
            }
            MetricEvent::Herald { sign: 0 } => self.heralds_psi_plus += 1,
            MetricEvent::Herald { .. } => self.heralds_psi_minus += 1,
            MetricEvent::DeadTimeLoss => self.dead_time_losses += 1,
            MetricEvent::DarkCount => self.dark_counts += 1,
            MetricEvent::AtomLost => self.atom_losses += 1,
            MetricEvent::OffResonance => self.off_resonance_decays += 1,
            MetricEvent::AttemptFailed => self.failed_attempts += 1,
            MetricEvent::Entangled => self.entanglements += 1,
            MetricEvent::MemoryExpired => self.memory_expirations += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_classification() {
        assert_eq!(PairKind::from_bits(0, 0), PairKind::EarlyEarly);
        assert_eq!(PairKind::from_bits(0, 1), PairKind::EarlyLate);
        assert_eq!(PairKind::from_bits(1, 0), PairKind::LateEarly);
        assert_eq!(PairKind::from_bits(1, 1), PairKind::LateLate);
        assert!(PairKind::EarlyLate.is_heralding());
        assert!(!PairKind::LateLate.is_heralding());
    }

    #[test]
    fn test_counting_sink() {
        let mut m = SimMetrics::default();
        m.record(MetricEvent::PairMeasured(PairKind::EarlyLate));
        m.record(MetricEvent::Trigger(TriggerClass::DesiredInvalidTiming));
        m.record(MetricEvent::Trigger(TriggerClass::Heralded));
        m.record(MetricEvent::Herald { sign: 1 });
        assert_eq!(m.pairs_measured(), 1);
        assert_eq!(m.trigger_count, 2);
        assert_eq!(m.heralds_psi_minus, 1);
        assert_eq!(m.heralds(), 1);
    }
}
