//! Error types for the kernel crate.

use thiserror::Error;

use crate::quantum::QuantumKey;
use crate::time::VirtualTime;

/// Errors produced by the timeline and the quantum-state manager.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// An event was scheduled before the current simulation time.
    #[error("cannot schedule event at {time} ps: timeline is already at {now} ps")]
    ScheduleInPast {
        /// Requested event time.
        time: VirtualTime,
        /// Current timeline time.
        now: VirtualTime,
    },

    /// A key is not registered with the state manager.
    #[error("unknown quantum state key {0}")]
    UnknownKey(QuantumKey),

    /// The same key appears twice in one operation.
    #[error("quantum state key {0} given more than once")]
    DuplicateKey(QuantumKey),

    /// Amplitude vector length does not match the number of keys.
    #[error("expected {expected} amplitudes for {keys} keys, got {got}")]
    AmplitudeCount {
        /// Number of keys being set.
        keys: usize,
        /// Required vector length (2^keys).
        expected: usize,
        /// Provided vector length.
        got: usize,
    },

    /// Amplitude vector is not normalised.
    #[error("state vector is not normalised (norm² = {0})")]
    NotNormalized(f64),

    /// A circuit operation references a qubit outside the circuit.
    #[error("qubit {qubit} out of range for circuit of size {size}")]
    QubitOutOfRange {
        /// Offending qubit index.
        qubit: usize,
        /// Circuit width.
        size: usize,
    },

    /// Circuit width differs from the number of keys it is run on.
    #[error("circuit acts on {size} qubits but {keys} keys were supplied")]
    CircuitSizeMismatch {
        /// Circuit width.
        size: usize,
        /// Number of supplied keys.
        keys: usize,
    },

    /// Random draw outside [0, 1).
    #[error("random draw {0} outside [0, 1)")]
    InvalidDraw(f64),
}

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KernelError::ScheduleInPast { time: 5, now: 10 };
        assert_eq!(
            err.to_string(),
            "cannot schedule event at 5 ps: timeline is already at 10 ps"
        );

        let err = KernelError::AmplitudeCount {
            keys: 2,
            expected: 4,
            got: 3,
        };
        assert_eq!(err.to_string(), "expected 4 amplitudes for 2 keys, got 3");

        let err = KernelError::UnknownKey(QuantumKey::from_raw(7));
        assert_eq!(err.to_string(), "unknown quantum state key q7");
    }
}
