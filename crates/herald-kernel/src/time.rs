//! Virtual time in integer picoseconds.

/// Simulation timestamp in picoseconds.
pub type VirtualTime = u64;

/// Picoseconds per second.
pub const PS_PER_SECOND: u64 = 1_000_000_000_000;

/// Convert seconds to picoseconds, rounding to the nearest tick.
///
/// Negative and non-finite inputs clamp to zero.
pub fn seconds_to_ps(seconds: f64) -> VirtualTime {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * PS_PER_SECOND as f64).round() as VirtualTime
}

/// Convert picoseconds to seconds.
pub fn ps_to_seconds(time: VirtualTime) -> f64 {
    time as f64 / PS_PER_SECOND as f64
}

/// Period in picoseconds of a process running at `frequency` Hz.
///
/// Returns `None` for a non-positive frequency (the process is unthrottled).
pub fn period_ps(frequency: f64) -> Option<VirtualTime> {
    if frequency > 0.0 && frequency.is_finite() {
        Some((PS_PER_SECOND as f64 / frequency).round() as VirtualTime)
    } else {
        None
    }
}

/// Round `time` to the nearest multiple of `resolution`, ties to even.
///
/// A zero resolution leaves the time unchanged.
pub fn quantize(time: VirtualTime, resolution: VirtualTime) -> VirtualTime {
    if resolution == 0 {
        return time;
    }
    let q = time / resolution;
    let r = time % resolution;
    let twice = 2 * r;
    let q = if twice > resolution || (twice == resolution && q % 2 == 1) {
        q + 1
    } else {
        q
    };
    q * resolution
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_round_trip() {
        assert_eq!(seconds_to_ps(1.0), PS_PER_SECOND);
        assert_eq!(seconds_to_ps(2.5e-6), 2_500_000);
        assert_eq!(seconds_to_ps(-1.0), 0);
        assert!((ps_to_seconds(500_000_000_000) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_period() {
        assert_eq!(period_ps(80e6), Some(12_500));
        assert_eq!(period_ps(2000.0), Some(500_000_000));
        assert_eq!(period_ps(0.0), None);
        assert_eq!(period_ps(-3.0), None);
    }

    #[test]
    fn test_quantize_ties_to_even() {
        assert_eq!(quantize(149, 100), 100);
        assert_eq!(quantize(151, 100), 200);
        assert_eq!(quantize(150, 100), 200);
        assert_eq!(quantize(250, 100), 200);
        assert_eq!(quantize(1_900_049, 100), 1_900_000);
        assert_eq!(quantize(42, 0), 42);
    }
}
