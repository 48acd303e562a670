//! Classical messages exchanged by the generation and relay protocols.

use std::fmt;

use serde::{Deserialize, Serialize};

use herald_kernel::VirtualTime;

/// Who a message is addressed to on the receiving node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Receiver {
    /// A protocol instance by name.
    Protocol(String),
    /// Every entanglement-generation protocol on the node.
    Broadcast,
}

/// Message payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Primary → non-primary: start of a negotiation round.
    Negotiate {
        /// Sender's quantum channel delay to the BSM node.
        channel_delay: VirtualTime,
        /// Sender's memory excitation frequency in Hz.
        frequency: f64,
    },
    /// Non-primary → primary: the emission time the primary must use.
    NegotiateAck {
        emit_time: VirtualTime,
    },
    /// BSM node → both end nodes: heralded measurement result.
    MeasRes {
        /// 0 for psi+ (same detector), 1 for psi− (different detectors).
        detector_sign: u8,
        /// Quantised trigger time of the heralding detection.
        time: VirtualTime,
        /// Time resolution of the BSM device.
        resolution: VirtualTime,
    },
}

impl MessageKind {
    /// Short type name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Negotiate { .. } => "NEGOTIATE",
            Self::NegotiateAck { .. } => "NEGOTIATE_ACK",
            Self::MeasRes { .. } => "MEAS_RES",
        }
    }
}

/// A classical message with its receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub receiver: Receiver,
    pub kind: MessageKind,
}

impl Message {
    /// Message addressed to a named protocol.
    pub fn to_protocol(name: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            receiver: Receiver::Protocol(name.into()),
            kind,
        }
    }

    /// Message addressed to every generation protocol on the node.
    pub fn broadcast(kind: MessageKind) -> Self {
        Self {
            receiver: Receiver::Broadcast,
            kind,
        }
    }

    /// Whether a protocol called `name` should handle this message.
    pub fn is_for(&self, name: &str) -> bool {
        match &self.receiver {
            Receiver::Protocol(target) => target == name,
            Receiver::Broadcast => true,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MessageKind::Negotiate {
                channel_delay,
                frequency,
            } => write!(f, "NEGOTIATE(qc_delay={channel_delay}, frequency={frequency})"),
            MessageKind::NegotiateAck { emit_time } => {
                write!(f, "NEGOTIATE_ACK(emit_time={emit_time})")
            }
            MessageKind::MeasRes {
                detector_sign,
                time,
                resolution,
            } => write!(
                f,
                "MEAS_RES(sign={detector_sign}, time={time}, resolution={resolution})"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiver_matching() {
        let msg = Message::to_protocol("node2.eg", MessageKind::NegotiateAck { emit_time: 5 });
        assert!(msg.is_for("node2.eg"));
        assert!(!msg.is_for("node1.eg"));

        let msg = Message::broadcast(MessageKind::MeasRes {
            detector_sign: 1,
            time: 10,
            resolution: 100,
        });
        assert!(msg.is_for("anything"));
        assert_eq!(msg.kind.name(), "MEAS_RES");
        assert_eq!(msg.to_string(), "MEAS_RES(sign=1, time=10, resolution=100)");
    }
}
