//! Heralded entanglement generation between two quantum memories.
//!
//! Two end nodes each hold one memory and run a generation protocol. They
//! agree on an emission slot over classical channels, emit time-bin photons
//! towards a middle node and wait. The middle node runs a Bell-state
//! measurement and reports which detector clicked; a well-timed herald
//! leaves the memories in psi+ or psi−, anything else triggers a retry.
//!
//! ```text
//!   end[0] ── qc ──► BSM node ◄── qc ── end[1]
//!      ▲ └──── cc ─────┘ └───── cc ────┘ ▲
//!      └─────────────── cc ──────────────┘
//! ```
//!
//! # Layout
//!
//! - [`network`]: builds the topology from a [`SimConfig`] and routes events.
//! - [`protocol`]: the generation and relay protocols.
//! - [`bsm`], [`detector`], [`memory`], [`channel`]: device models.
//! - [`runner`]: repeated trials, fidelity probing and the run report.
//! - [`analytical`]: closed-form rate estimates.
//!
//! # Example
//!
//! ```rust,no_run
//! use herald_sim::{SimConfig, TrialRunner};
//!
//! let mut config = SimConfig::default();
//! config.run.trials = 10;
//! let mut runner = TrialRunner::new(config)?;
//! let report = runner.run(|_| {})?;
//! println!("mean attempts: {}", report.mean_attempts);
//! # Ok::<(), herald_sim::SimError>(())
//! ```

pub mod analytical;
pub mod bsm;
pub mod channel;
pub mod config;
pub mod detector;
pub mod encoding;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod network;
pub mod node;
pub mod photon;
pub mod protocol;
pub mod resource;
pub mod runner;

pub use analytical::AnalyticalEstimate;
pub use bsm::{Herald, TimeBinBsm, valid_trigger_time};
pub use config::SimConfig;
pub use encoding::{Encoding, EncodingKind};
pub use error::{SimError, SimResult};
pub use event::{Env, NodeId, SimEvent};
pub use metrics::{MetricEvent, MetricsSink, NullMetrics, SimMetrics};
pub use network::{Network, World};
pub use protocol::{AttemptOutcome, GenerationProtocol, RelayProtocol};
pub use runner::{Basis, RunReport, TrialOutcome, TrialResult, TrialRunner};
