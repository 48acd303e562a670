//! Relay protocol on the BSM node.

use tracing::debug;

use herald_kernel::VirtualTime;

use crate::bsm::Herald;
use crate::error::{SimError, SimResult};
use crate::message::{Message, MessageKind};

/// Forwards every herald of the local BSM to the registered end nodes.
///
/// It keeps no attempt state and never expects inbound traffic.
#[derive(Debug, Clone)]
pub struct RelayProtocol {
    name: String,
    /// (node, protocol) pairs to notify.
    ends: Vec<(String, String)>,
}

impl RelayProtocol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ends: Vec::with_capacity(2),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an end node and its generation protocol.
    pub fn add_end(&mut self, node: impl Into<String>, protocol: impl Into<String>) {
        self.ends.push((node.into(), protocol.into()));
    }

    pub fn ends(&self) -> &[(String, String)] {
        &self.ends
    }

    /// Build the MEAS_RES messages for a herald, one per end node.
    pub fn bsm_update(&self, herald: Herald, resolution: VirtualTime) -> Vec<(String, Message)> {
        debug!(relay = %self.name, result = herald.result, time = herald.time, "forwarding herald");
        self.ends
            .iter()
            .map(|(node, protocol)| {
                let message = Message::to_protocol(
                    protocol.clone(),
                    MessageKind::MeasRes {
                        detector_sign: herald.result,
                        time: herald.time,
                        resolution,
                    },
                );
                (node.clone(), message)
            })
            .collect()
    }

    /// The relay has no inbound path; any message is a modelling error.
    pub fn received_message(&self, src: &str, message: &Message) -> SimResult<()> {
        Err(SimError::UnexpectedMessage {
            component: self.name.clone(),
            kind: message.kind.name().to_string(),
            src: src.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwards_to_both_ends() {
        let mut relay = RelayProtocol::new("bsm_node.relay");
        relay.add_end("node1", "node1.eg");
        relay.add_end("node2", "node2.eg");

        let out = relay.bsm_update(Herald { result: 1, time: 42 }, 100);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, "node1");
        assert!(out[0].1.is_for("node1.eg"));
        assert_eq!(
            out[1].1.kind,
            MessageKind::MeasRes { detector_sign: 1, time: 42, resolution: 100 }
        );
    }

    #[test]
    fn test_inbound_message_is_fatal() {
        let relay = RelayProtocol::new("bsm_node.relay");
        let msg = Message::to_protocol("bsm_node.relay", MessageKind::NegotiateAck { emit_time: 0 });
        assert!(matches!(
            relay.received_message("node1", &msg),
            Err(SimError::UnexpectedMessage { .. })
        ));
    }
}
