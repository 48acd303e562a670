//! Simulation kernel for Herald.
//!
//! Two pieces sit underneath the network model:
//!
//! - [`Timeline`]: a virtual clock in integer picoseconds with an ordered
//!   event queue, cancellable event handles and FIFO ordering of events that
//!   share a timestamp.
//! - [`QuantumManager`]: a registry of qubit keys holding joint ket vectors,
//!   with a small [`Circuit`] type for single-qubit gates and measurement.
//!
//! # Quick start
//!
//! ```rust
//! use herald_kernel::{Circuit, QuantumManager, Timeline};
//! use num_complex::Complex64;
//!
//! let mut timeline: Timeline<&str> = Timeline::new();
//! timeline.schedule(1_000, "emit").unwrap();
//! assert_eq!(timeline.pop(), Some((1_000, "emit")));
//!
//! let mut qm = QuantumManager::new();
//! let key = qm.new_key();
//! let s = Complex64::new(0.5_f64.sqrt(), 0.0);
//! qm.set(&[key], &[s, s]).unwrap();
//!
//! let mut circuit = Circuit::new(1);
//! circuit.measure(0).unwrap();
//! let outcome = qm.run_circuit(&circuit, &[key], 0.75).unwrap();
//! assert_eq!(outcome[&key], 1);
//! ```

pub mod circuit;
pub mod error;
pub mod quantum;
pub mod time;
pub mod timeline;

pub use circuit::{Circuit, Gate, Operation};
pub use error::{KernelError, KernelResult};
pub use quantum::{KetState, QuantumKey, QuantumManager};
pub use time::{PS_PER_SECOND, VirtualTime, period_ps, ps_to_seconds, quantize, seconds_to_ps};
pub use timeline::{EventHandler, EventId, RunOutcome, Timeline};
