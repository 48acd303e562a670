//! Optical fibre and classical links between nodes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use herald_kernel::{EventId, VirtualTime, period_ps};

use crate::error::{SimError, SimResult};
use crate::event::{Env, NodeId, SimEvent};
use crate::message::Message;
use crate::photon::Photon;

/// Speed of light in fibre, metres per picosecond.
pub const LIGHT_SPEED: f64 = 2e-4;

/// Propagation delay over `distance` metres of fibre.
pub fn propagation_delay(distance: f64) -> VirtualTime {
    (distance.max(0.0) / LIGHT_SPEED).round() as VirtualTime
}

/// Quantum channel parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantumChannelParams {
    /// Fibre length in metres.
    pub distance: f64,
    /// Attenuation in dB per metre.
    pub attenuation: f64,
    /// Emission slot rate in Hz.
    pub frequency: f64,
}

impl Default for QuantumChannelParams {
    fn default() -> Self {
        Self {
            distance: 1000.0,
            attenuation: 0.0003,
            frequency: 8e7,
        }
    }
}

/// One-way quantum channel from an end node to the BSM node.
///
/// Emission is slotted: a sender reserves a slot on the frequency grid with
/// [`schedule_transmit`](Self::schedule_transmit) and must transmit exactly
/// at that slot.
#[derive(Debug)]
pub struct QuantumChannel {
    name: String,
    receiver: String,
    dst: NodeId,
    params: QuantumChannelParams,
    delay: VirtualTime,
    loss: f64,
    period: VirtualTime,
    send_bins: BTreeSet<u64>,
}

impl QuantumChannel {
    pub fn new(
        name: impl Into<String>,
        receiver: impl Into<String>,
        dst: NodeId,
        params: QuantumChannelParams,
    ) -> SimResult<Self> {
        let period = period_ps(params.frequency).filter(|p| *p > 0).ok_or_else(|| {
            SimError::Config(format!(
                "quantum channel frequency must be positive, got {}",
                params.frequency
            ))
        })?;
        let delay = propagation_delay(params.distance);
        let loss = 1.0 - 10f64.powf(-params.attenuation * params.distance / 10.0);
        Ok(Self {
            name: name.into(),
            receiver: receiver.into(),
            dst,
            params,
            delay,
            loss,
            period,
            send_bins: BTreeSet::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the receiving node.
    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn delay(&self) -> VirtualTime {
        self.delay
    }

    /// Probability a photon is lost in the fibre.
    pub fn loss(&self) -> f64 {
        self.loss
    }

    pub fn params(&self) -> &QuantumChannelParams {
        &self.params
    }

    /// Drop all reserved slots.
    pub fn clear_reservations(&mut self) {
        self.send_bins.clear();
    }

    /// Reserve the first free slot at or after `min_time` and return its time.
    pub fn schedule_transmit(&mut self, min_time: VirtualTime, now: VirtualTime) -> VirtualTime {
        let min_time = min_time.max(now);
        let mut bin = min_time.div_ceil(self.period);
        while self.send_bins.contains(&bin) {
            bin += 1;
        }
        self.send_bins.insert(bin);
        bin * self.period
    }

    /// Send a photon in the slot reserved for now.
    pub fn transmit(&mut self, mut photon: Photon, env: &mut Env<'_>) -> SimResult<EventId> {
        let now = env.now();
        if !self.send_bins.is_empty() {
            loop {
                let Some(bin) = self.send_bins.pop_first() else {
                    return Err(SimError::violation(
                        &self.name,
                        format!("transmit at {now} without a reserved slot"),
                    ));
                };
                let time = bin * self.period;
                if time < now {
                    continue;
                }
                if time != now {
                    return Err(SimError::violation(
                        &self.name,
                        format!("transmit at {now} but next reserved slot is {time}"),
                    ));
                }
                break;
            }
        }

        photon.add_loss(self.loss);
        debug!(channel = %self.name, now, loss = photon.loss, "photon transmitted");
        let id = env.timeline.schedule_after(
            self.delay,
            SimEvent::PhotonArrival {
                dst: self.dst,
                photon,
            },
        );
        Ok(id)
    }
}

/// One-way classical link with a fixed delay.
#[derive(Debug, Clone)]
pub struct ClassicalChannel {
    name: String,
    receiver: String,
    dst: NodeId,
    delay: VirtualTime,
}

impl ClassicalChannel {
    /// Create a link; without an explicit delay the fibre propagation delay
    /// over `distance` metres is used.
    pub fn new(
        name: impl Into<String>,
        receiver: impl Into<String>,
        dst: NodeId,
        distance: f64,
        delay: Option<VirtualTime>,
    ) -> Self {
        Self {
            name: name.into(),
            receiver: receiver.into(),
            dst,
            delay: delay.unwrap_or_else(|| propagation_delay(distance)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn delay(&self) -> VirtualTime {
        self.delay
    }

    /// Deliver `message` from `src` after the link delay.
    pub fn transmit(&self, src: &str, message: Message, env: &mut Env<'_>) -> EventId {
        debug!(channel = %self.name, %message, "message sent");
        env.timeline.schedule_after(
            self.delay,
            SimEvent::Deliver {
                dst: self.dst,
                src: src.to_string(),
                message,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncodingKind;
    use crate::metrics::SimMetrics;
    use herald_kernel::{QuantumKey, QuantumManager, Timeline};

    fn channel() -> QuantumChannel {
        QuantumChannel::new("qc.node1.bsm", "bsm_node", NodeId(2), QuantumChannelParams::default()).unwrap()
    }

    #[test]
    fn test_delay_and_loss() {
        let qc = channel();
        assert_eq!(qc.delay(), 5_000_000);
        let expected = 1.0 - 10f64.powf(-0.03);
        assert!((qc.loss() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_slot_reservation() {
        let mut qc = channel();
        assert_eq!(qc.schedule_transmit(0, 0), 0);
        assert_eq!(qc.schedule_transmit(0, 0), 12_500);
        assert_eq!(qc.schedule_transmit(12_501, 0), 25_000);
        assert_eq!(qc.schedule_transmit(10, 100_000), 100_000);
    }

    #[test]
    fn test_transmit_must_use_reserved_slot() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut qc = channel();
        let encoding = EncodingKind::TimeBin.profile().encoding;

        qc.schedule_transmit(25_000, 0);
        tl.schedule(12_500, SimEvent::Emit { node: NodeId(0) }).unwrap();
        tl.pop();
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        let photon = Photon::new("node1.memo", QuantumKey::from_raw(0), encoding.clone());
        let err = qc.transmit(photon, &mut env).unwrap_err();
        assert!(matches!(err, SimError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_transmit_adds_loss_and_delay() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut qc = channel();
        let encoding = EncodingKind::TimeBin.profile().encoding;

        let slot = qc.schedule_transmit(20_000, 0);
        tl.schedule(slot, SimEvent::Emit { node: NodeId(0) }).unwrap();
        tl.pop();
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        let photon = Photon::new("node1.memo", QuantumKey::from_raw(0), encoding);
        let id = qc.transmit(photon, &mut env).unwrap();
        assert_eq!(tl.time_of(id), Some(25_000 + 5_000_000));
        let (_, event) = tl.pop().unwrap();
        let SimEvent::PhotonArrival { photon, .. } = event else {
            panic!("expected photon arrival");
        };
        assert!(photon.loss > 0.0);
    }

    #[test]
    fn test_classical_delay() {
        let cc = ClassicalChannel::new("cc", "node2", NodeId(1), 1000.0, None);
        assert_eq!(cc.delay(), 5_000_000);
        let cc = ClassicalChannel::new("cc", "node2", NodeId(1), 1000.0, Some(100_000_000));
        assert_eq!(cc.delay(), 100_000_000);
    }
}
