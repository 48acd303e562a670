//! Entanglement protocols.
//!
//! End nodes run a [`GenerationProtocol`]; the BSM node runs a stateless
//! [`RelayProtocol`] that forwards heralds back to them.

pub mod generation;
pub mod relay;
pub mod timing;

pub use generation::{GenerationConfig, GenerationProtocol, Peer, Round};
pub use relay::RelayProtocol;
pub use timing::{AtomFate, AtomSequence, EmissionTiming, FixedDelay, RetrapPolicy, draw_fate};

/// How an attempt ended, as reported to the resource layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// A valid herald arrived; `sign` is 0 for psi+ and 1 for psi−.
    Entangled { sign: u8 },
    /// No valid herald; the memory is released.
    Raw,
}

impl AttemptOutcome {
    pub fn is_entangled(&self) -> bool {
        matches!(self, Self::Entangled { .. })
    }
}
