//! Simulation events and the environment handed to components.

use std::fmt;

use herald_kernel::{QuantumManager, Timeline};

use crate::message::Message;
use crate::metrics::MetricsSink;
use crate::photon::Photon;

/// Index of a node in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Everything that can happen on the timeline.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// A classical message reaches `dst`.
    Deliver {
        dst: NodeId,
        src: String,
        message: Message,
    },
    /// A photon reaches the far end of a quantum channel.
    PhotonArrival { dst: NodeId, photon: Photon },
    /// A photon in the late time bin hits a BSM detector.
    DetectorHit { node: NodeId, detector: usize },
    /// A detector dark count fires.
    DarkCount { node: NodeId, detector: usize },
    /// Deferred NEGOTIATE after an atom reload.
    SendNegotiate { node: NodeId },
    /// Scheduled photon emission.
    Emit { node: NodeId },
    /// End of an attempt: decide success or failure.
    Resolve { node: NodeId },
    /// Memory coherence cutoff reached.
    MemoryExpire { node: NodeId },
}

impl SimEvent {
    /// Node the event is delivered to.
    pub fn node(&self) -> NodeId {
        match self {
            Self::Deliver { dst, .. } | Self::PhotonArrival { dst, .. } => *dst,
            Self::DetectorHit { node, .. }
            | Self::DarkCount { node, .. }
            | Self::SendNegotiate { node }
            | Self::Emit { node }
            | Self::Resolve { node }
            | Self::MemoryExpire { node } => *node,
        }
    }
}

/// Shared simulation state lent to a component while it handles an event.
pub struct Env<'a> {
    pub timeline: &'a mut Timeline<SimEvent>,
    pub qm: &'a mut QuantumManager,
    pub metrics: &'a mut dyn MetricsSink,
}

impl Env<'_> {
    /// Current simulation time.
    pub fn now(&self) -> herald_kernel::VirtualTime {
        self.timeline.now()
    }
}
