//! Network nodes: end nodes holding a memory, and the BSM node.

use rand::rngs::StdRng;
use rustc_hash::FxHashMap;
use tracing::debug;

use herald_kernel::{EventId, VirtualTime};

use crate::bsm::TimeBinBsm;
use crate::channel::{ClassicalChannel, QuantumChannel};
use crate::error::{SimError, SimResult};
use crate::event::{Env, NodeId, SimEvent};
use crate::memory::Memory;
use crate::message::Message;
use crate::metrics::MetricEvent;
use crate::protocol::{AttemptOutcome, GenerationProtocol, RelayProtocol};
use crate::resource::ResourceManager;

/// Hardware and links of an end node, lent to its protocol.
#[derive(Debug)]
pub struct Endpoint {
    pub name: String,
    pub id: NodeId,
    pub memory: Memory,
    /// Quantum channel towards the BSM node.
    pub qchannel: QuantumChannel,
    /// Classical channels keyed by destination node name.
    pub cchannels: FxHashMap<String, ClassicalChannel>,
    pub resources: ResourceManager,
    pub rng: StdRng,
}

impl Endpoint {
    fn cchannel(&self, dst: &str) -> SimResult<&ClassicalChannel> {
        self.cchannels.get(dst).ok_or_else(|| SimError::MissingChannel {
            src: self.name.clone(),
            dst: dst.to_string(),
            kind: "classical",
        })
    }

    /// Delay of the classical link to `dst`.
    pub fn cchannel_delay(&self, dst: &str) -> SimResult<VirtualTime> {
        Ok(self.cchannel(dst)?.delay())
    }

    /// Send a classical message to node `dst`.
    pub fn send_message(&self, dst: &str, message: Message, env: &mut Env<'_>) -> SimResult<EventId> {
        Ok(self.cchannel(dst)?.transmit(&self.name, message, env))
    }
}

/// A node with one memory and one generation protocol.
#[derive(Debug)]
pub struct EndNode {
    pub endpoint: Endpoint,
    pub protocol: GenerationProtocol,
}

impl EndNode {
    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    /// Whether the memory currently holds a heralded pair.
    pub fn is_entangled(&self) -> bool {
        self.endpoint.memory.entangled_memory().is_some()
    }

    /// Start the protocol's first attempt.
    pub fn start(&mut self, env: &mut Env<'_>) -> SimResult<()> {
        self.protocol.start(&mut self.endpoint, env)
    }

    pub fn handle(&mut self, event: SimEvent, env: &mut Env<'_>) -> SimResult<Option<AttemptOutcome>> {
        let ep = &mut self.endpoint;
        match event {
            SimEvent::Deliver { src, message, .. } => {
                if !message.is_for(self.protocol.name()) {
                    return Err(SimError::UnexpectedMessage {
                        component: ep.name.clone(),
                        kind: message.kind.name().to_string(),
                        src,
                    });
                }
                self.protocol.received_message(&src, &message, ep, env)?;
            }
            SimEvent::SendNegotiate { .. } => self.protocol.send_negotiate(ep, env)?,
            SimEvent::Emit { .. } => self.protocol.emit(ep, env)?,
            SimEvent::Resolve { .. } => return self.protocol.resolve(ep, env).map(Some),
            SimEvent::MemoryExpire { .. } => {
                if ep.memory.expire(env)? {
                    env.metrics.record(MetricEvent::MemoryExpired);
                    self.protocol.memory_expire(ep, env)?;
                }
            }
            other => {
                return Err(SimError::violation(
                    &ep.name,
                    format!("end node cannot handle {other:?}"),
                ));
            }
        }
        Ok(None)
    }
}

/// The middle node: a time-bin BSM and its relay protocol.
#[derive(Debug)]
pub struct RelayNode {
    pub name: String,
    pub id: NodeId,
    pub bsm: TimeBinBsm,
    pub relay: RelayProtocol,
    pub cchannels: FxHashMap<String, ClassicalChannel>,
    pub rng: StdRng,
}

impl RelayNode {
    pub fn handle(&mut self, event: SimEvent, env: &mut Env<'_>) -> SimResult<()> {
        let heralds = match event {
            SimEvent::PhotonArrival { photon, .. } => self.bsm.get(photon, &mut self.rng, env)?,
            SimEvent::DetectorHit { detector, .. } => {
                self.bsm.fire_detector(detector, &mut self.rng, env).into_iter().collect()
            }
            SimEvent::DarkCount { detector, .. } => {
                self.bsm.dark_count(detector, &mut self.rng, env)?.into_iter().collect()
            }
            SimEvent::Deliver { src, message, .. } => {
                return self.relay.received_message(&src, &message);
            }
            other => {
                return Err(SimError::violation(
                    &self.name,
                    format!("BSM node cannot handle {other:?}"),
                ));
            }
        };

        let resolution = self.bsm.resolution();
        for herald in heralds {
            for (dst, message) in self.relay.bsm_update(herald, resolution) {
                let channel = self.cchannels.get(&dst).ok_or_else(|| SimError::MissingChannel {
                    src: self.name.clone(),
                    dst: dst.clone(),
                    kind: "classical",
                })?;
                debug!(node = %self.name, %dst, "relaying herald");
                channel.transmit(&self.name, message, env);
            }
        }
        Ok(())
    }
}

/// Any node of the network.
#[derive(Debug)]
pub enum Node {
    End(Box<EndNode>),
    Relay(Box<RelayNode>),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Self::End(node) => node.name(),
            Self::Relay(node) => &node.name,
        }
    }

    pub fn as_end(&self) -> Option<&EndNode> {
        match self {
            Self::End(node) => Some(&**node),
            Self::Relay(_) => None,
        }
    }

    pub fn as_end_mut(&mut self) -> Option<&mut EndNode> {
        match self {
            Self::End(node) => Some(&mut **node),
            Self::Relay(_) => None,
        }
    }

    pub fn as_relay(&self) -> Option<&RelayNode> {
        match self {
            Self::Relay(node) => Some(&**node),
            Self::End(_) => None,
        }
    }

    pub fn as_relay_mut(&mut self) -> Option<&mut RelayNode> {
        match self {
            Self::Relay(node) => Some(&mut **node),
            Self::End(_) => None,
        }
    }

    /// Dispatch an event; returns the attempt outcome when an end node
    /// resolved an attempt.
    pub fn handle(&mut self, event: SimEvent, env: &mut Env<'_>) -> SimResult<Option<AttemptOutcome>> {
        match self {
            Self::End(node) => node.handle(event, env),
            Self::Relay(node) => node.handle(event, env).map(|()| None),
        }
    }
}
