//! Closed-form estimates to compare simulated rates against.

use serde::{Deserialize, Serialize};

/// Probability one attempt heralds a pair.
///
/// Both photons must be collected, transmitted and detected, and the pair
/// must land in a heralding state (`right_state`, one half for time-bin).
pub fn entanglement_probability(collection: f64, transmission: f64, detection: f64, right_state: f64) -> f64 {
    right_state * (collection * transmission * detection).powi(2)
}

/// Expected seconds to the first heralded pair.
///
/// `prep_time` is paid once per `prep_number` attempts (atom reload), each
/// attempt costs `emission` seconds and succeeds with probability `p`.
pub fn time_to_entanglement(prep_time: f64, prep_number: u32, p: f64, emission: f64) -> f64 {
    if p <= 0.0 || prep_number == 0 {
        return f64::INFINITY;
    }
    (1.0 / (f64::from(prep_number) * p)).ceil() * prep_time + emission / p
}

/// Analytical figures for one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyticalEstimate {
    pub probability: f64,
    /// Expected attempts until success.
    pub attempts: f64,
    pub time_s: f64,
}

impl AnalyticalEstimate {
    pub fn new(
        collection: f64,
        transmission: f64,
        detection: f64,
        prep_time: f64,
        prep_number: u32,
        emission: f64,
    ) -> Self {
        let probability = entanglement_probability(collection, transmission, detection, 0.5);
        Self {
            probability,
            attempts: if probability > 0.0 { 1.0 / probability } else { f64::INFINITY },
            time_s: time_to_entanglement(prep_time, prep_number, probability, emission),
        }
    }
}
