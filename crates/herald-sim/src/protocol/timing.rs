//! Emission timing models and retrap policy.
//!
//! The generation protocol is the same for every emitter; what differs is
//! how long the emitter needs between the negotiated slot and the moment a
//! photon leaves, how the atom can be lost along the way, and how often it
//! has to be reloaded.

use std::fmt;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use herald_kernel::VirtualTime;

/// ¹⁷¹Yb 3P0 → 3D1 decay branching ratios back to 3P0, 3P1 and 3P2.
const YB1389_BRANCHING: [f64; 3] = [0.64, 0.35, 0.01];

/// Probability the 1389 nm atom is not depumped to 1S0 during preparation.
const YB1389_DEPUMP_SURVIVAL: f64 = 0.97;

/// What happened to the atom over one emission sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtomFate {
    /// A photon left on the collected transition.
    Emitted,
    /// The atom decayed through another channel; no collectable photon.
    OffResonance,
    /// The atom left the trap.
    Lost,
}

/// Delay and atom-state model between a reserved emission slot and the
/// photon leaving.
pub trait EmissionTiming: fmt::Debug + Send + Sync {
    /// Short identifier used in logs and reports.
    fn name(&self) -> &'static str;

    /// Preparation time added to the earliest feasible emission time.
    fn emission_delay(&self) -> VirtualTime;

    /// Whether the atom survives initialisation, cooling and state
    /// preparation.
    fn prepare(&self, _rng: &mut dyn RngCore) -> bool {
        true
    }

    /// Decay channel taken by the excited atom. `survival` is the configured
    /// per-emission survival probability.
    fn decay(&self, survival: f64, rng: &mut dyn RngCore) -> AtomFate {
        if rng.r#gen::<f64>() > survival {
            AtomFate::Lost
        } else {
            AtomFate::Emitted
        }
    }
}

/// Run one preparation and excitation of the atom.
pub fn draw_fate(timing: &dyn EmissionTiming, survival: f64, rng: &mut dyn RngCore) -> AtomFate {
    if !timing.prepare(rng) {
        return AtomFate::Lost;
    }
    timing.decay(survival, rng)
}

/// Constant emission delay (plain time-bin emitters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedDelay {
    /// Delay in picoseconds.
    pub delay: VirtualTime,
}

impl EmissionTiming for FixedDelay {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn emission_delay(&self) -> VirtualTime {
        self.delay
    }
}

/// Neutral-atom emission sequence: initialise, cool and prepare the atom,
/// then fire the excitation pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomSequence {
    /// Transition wavelength in nanometres.
    pub wavelength_nm: u32,
    pub initialize: VirtualTime,
    pub cool: VirtualTime,
    pub state_prep: VirtualTime,
    pub excite_pulse: VirtualTime,
    pub phase_flip: VirtualTime,
    /// Gap between the end of the early excitation and the phase flip.
    pub bin_gap: VirtualTime,
}

impl AtomSequence {
    /// ¹⁷¹Yb on the 1389 nm telecom transition.
    pub fn yb_1389() -> Self {
        Self {
            wavelength_nm: 1389,
            initialize: 51_400_000,
            cool: 1_400_000_000,
            state_prep: 5_300_000,
            excite_pulse: 16_000,
            phase_flip: 700_000,
            bin_gap: 2_100_000,
        }
    }

    /// ¹⁷¹Yb on the 556 nm intercombination transition.
    pub fn yb_556() -> Self {
        Self {
            wavelength_nm: 556,
            initialize: 20_000_000,
            cool: 1_400_000_000,
            state_prep: 850_000,
            excite_pulse: 20_000,
            phase_flip: 1_800_000,
            bin_gap: 5_300_000,
        }
    }

    /// Early-to-late separation produced by this sequence.
    pub fn bin_separation(&self) -> VirtualTime {
        self.excite_pulse + self.bin_gap + self.phase_flip
    }
}

impl EmissionTiming for AtomSequence {
    fn name(&self) -> &'static str {
        match self.wavelength_nm {
            1389 => "yb1389",
            556 => "yb556",
            _ => "atom",
        }
    }

    fn emission_delay(&self) -> VirtualTime {
        self.initialize + self.cool + self.state_prep
    }

    fn prepare(&self, rng: &mut dyn RngCore) -> bool {
        self.wavelength_nm != 1389 || rng.r#gen::<f64>() < YB1389_DEPUMP_SURVIVAL
    }

    // 556 nm is a closed cycle; the atom's own branching replaces `survival`.
    fn decay(&self, _survival: f64, rng: &mut dyn RngCore) -> AtomFate {
        if self.wavelength_nm != 1389 {
            return AtomFate::Emitted;
        }
        let draw = rng.r#gen::<f64>();
        if draw < YB1389_BRANCHING[0] {
            AtomFate::Emitted
        } else if draw < YB1389_BRANCHING[0] + YB1389_BRANCHING[1] {
            AtomFate::OffResonance
        } else {
            AtomFate::Lost
        }
    }
}

/// How often the atom is reloaded and how long reloading takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrapPolicy {
    /// Attempts between reloads; the attempt counter wraps here.
    pub threshold: u32,
    /// Extra delay before the first NEGOTIATE after a reload.
    pub delay: VirtualTime,
}

impl Default for RetrapPolicy {
    fn default() -> Self {
        Self {
            threshold: 128,
            delay: 500_000_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn fate_rates(timing: &dyn EmissionTiming, survival: f64) -> (f64, f64) {
        const DRAWS: u32 = 20_000;
        let mut rng = StdRng::seed_from_u64(11);
        let (mut lost, mut off) = (0u32, 0u32);
        for _ in 0..DRAWS {
            match draw_fate(timing, survival, &mut rng) {
                AtomFate::Lost => lost += 1,
                AtomFate::OffResonance => off += 1,
                AtomFate::Emitted => {}
            }
        }
        (f64::from(lost) / f64::from(DRAWS), f64::from(off) / f64::from(DRAWS))
    }

    #[test]
    fn test_yb_presets() {
        let yb = AtomSequence::yb_1389();
        assert_eq!(yb.emission_delay(), 1_456_700_000);
        assert_eq!(yb.bin_separation(), 2_816_000);
        assert_eq!(yb.name(), "yb1389");

        let yb = AtomSequence::yb_556();
        assert_eq!(yb.emission_delay(), 1_420_850_000);
        assert_eq!(yb.bin_separation(), 7_120_000);
    }

    #[test]
    fn test_fixed_delay() {
        let timing: Box<dyn EmissionTiming> = Box::new(FixedDelay { delay: 42 });
        assert_eq!(timing.emission_delay(), 42);
        assert_eq!(timing.name(), "fixed");
    }

    #[test]
    fn test_yb1389_loses_atoms_faster_than_time_bin() {
        // 1 - 0.97 * 0.99 against 1 - 0.9708
        let (yb_lost, yb_off) = fate_rates(&AtomSequence::yb_1389(), 0.9708);
        let (tb_lost, tb_off) = fate_rates(&FixedDelay { delay: 0 }, 0.9708);
        assert!((yb_lost - 0.0397).abs() < 0.006, "yb1389 loss {yb_lost}");
        assert!((tb_lost - 0.0292).abs() < 0.006, "time-bin loss {tb_lost}");
        assert!(yb_lost > tb_lost);
        assert!((yb_off - 0.97 * 0.35).abs() < 0.02, "off-resonance {yb_off}");
        assert_eq!(tb_off, 0.0);
    }

    #[test]
    fn test_yb556_is_a_closed_cycle() {
        let (lost, off) = fate_rates(&AtomSequence::yb_556(), 0.0);
        assert_eq!((lost, off), (0.0, 0.0));
    }
}
