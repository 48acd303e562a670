//! Single-heralded time-bin entanglement generation (end node).
//!
//! One attempt runs through three rounds:
//!
//! 1. **negotiate**: the primary sends NEGOTIATE with its quantum channel
//!    delay; the other side reserves an emission slot, schedules its own
//!    emission and answers NEGOTIATE_ACK with the time the primary must emit
//!    so both photons reach the BSM together.
//! 2. **emit**: at the agreed slot the memory is put in |+⟩ and excited.
//! 3. **resolve**: shortly after the latest time a herald could be relayed,
//!    the attempt succeeds if a MEAS_RES with a valid trigger time arrived.
//!
//! Every event an attempt schedules is recorded in its handle list and
//! cancelled when the attempt ends.

use num_complex::Complex64;
use tracing::{debug, info};

use herald_kernel::{Circuit, EventId, VirtualTime};

use crate::bsm::valid_trigger_time;
use crate::encoding::Encoding;
use crate::error::{SimError, SimResult};
use crate::event::{Env, SimEvent};
use crate::memory::EntangledMemory;
use crate::message::{Message, MessageKind};
use crate::metrics::MetricEvent;
use crate::node::Endpoint;
use crate::protocol::AttemptOutcome;
use crate::protocol::timing::{AtomFate, EmissionTiming, RetrapPolicy, draw_fate};
use crate::resource::MemoryInfo;

/// Probability the trapped atom survives one emission sequence.
pub const DEFAULT_ATOM_SURVIVAL: f64 = 0.9708;

/// Attempt phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Round {
    /// No attempt in progress.
    #[default]
    Idle,
    /// Negotiating or waiting for the emission slot.
    Emission,
    /// The attempt has been resolved.
    Resolved,
}

/// Static protocol parameters.
#[derive(Debug)]
pub struct GenerationConfig {
    pub encoding: Encoding,
    pub timing: Box<dyn EmissionTiming>,
    pub retrap: RetrapPolicy,
    /// Per-emission survival probability of the atom.
    pub atom_survival: f64,
    /// Herald acceptance window, the BSM device resolution.
    pub resolution: VirtualTime,
    /// Restart automatically after a failed attempt.
    pub looping: bool,
}

/// Identity of the remote protocol instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub node: String,
    pub protocol: String,
    pub memory: String,
}

/// Entanglement generation protocol of one end node.
#[derive(Debug)]
pub struct GenerationProtocol {
    name: String,
    middle: String,
    peer: Option<Peer>,
    primary: bool,
    config: GenerationConfig,
    round: Round,
    qc_delay: VirtualTime,
    expected_time: Option<VirtualTime>,
    psi_sign: Option<u8>,
    emitted: bool,
    attempts: u32,
    atom_lost: bool,
    scheduled: Vec<EventId>,
}

impl GenerationProtocol {
    /// Create a protocol sending its photons to the BSM node `middle`.
    pub fn new(name: impl Into<String>, middle: impl Into<String>, config: GenerationConfig) -> Self {
        Self {
            name: name.into(),
            middle: middle.into(),
            peer: None,
            primary: false,
            config,
            round: Round::Idle,
            qc_delay: 0,
            expected_time: None,
            psi_sign: None,
            emitted: false,
            attempts: 0,
            atom_lost: false,
            scheduled: Vec::new(),
        }
    }

    /// Pair with the remote protocol. The node whose name sorts higher is
    /// the primary.
    pub fn set_others(&mut self, own_node: &str, peer: Peer) -> SimResult<()> {
        if let Some(existing) = &self.peer {
            return Err(SimError::violation(
                &self.name,
                format!("already paired with {}", existing.protocol),
            ));
        }
        self.primary = own_node > peer.node.as_str();
        debug!(protocol = %self.name, peer = %peer.protocol, primary = self.primary, "paired");
        self.peer = Some(peer);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.peer.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn middle(&self) -> &str {
        &self.middle
    }

    pub fn peer(&self) -> Option<&Peer> {
        self.peer.as_ref()
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn round(&self) -> Round {
        self.round
    }

    /// Attempts since the last atom reload.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn expected_time(&self) -> Option<VirtualTime> {
        self.expected_time
    }

    pub fn psi_sign(&self) -> Option<u8> {
        self.psi_sign
    }

    pub fn is_atom_lost(&self) -> bool {
        self.atom_lost
    }

    /// Number of event handles owned by the current attempt.
    pub fn owned_events(&self) -> usize {
        self.scheduled.len()
    }

    fn require_peer(&self) -> SimResult<&Peer> {
        self.peer
            .as_ref()
            .ok_or_else(|| SimError::violation(&self.name, "protocol has no paired peer"))
    }

    /// Forget the current attempt without touching the attempt counter.
    pub fn clear_attempt(&mut self, env: &mut Env<'_>) {
        self.cancel_scheduled(env);
        self.round = Round::Idle;
        self.expected_time = None;
        self.psi_sign = None;
        self.emitted = false;
    }

    /// Begin an attempt.
    pub fn start(&mut self, ep: &mut Endpoint, env: &mut Env<'_>) -> SimResult<()> {
        self.require_peer()?;
        self.attempts += 1;
        info!(protocol = %self.name, attempt = self.attempts, "attempt started");

        if self.attempts == 1 {
            ep.memory.restore_efficiency();
            self.atom_lost = false;
        }
        self.round = Round::Emission;

        if self.primary {
            self.qc_delay = ep.qchannel.delay();
            if self.attempts == 1 {
                let id = env
                    .timeline
                    .schedule_after(self.config.retrap.delay, SimEvent::SendNegotiate { node: ep.id });
                self.scheduled.push(id);
            } else {
                self.send_negotiate(ep, env)?;
            }
        }

        if self.attempts >= self.config.retrap.threshold {
            self.attempts = 0;
        }
        Ok(())
    }

    /// Send NEGOTIATE to the peer.
    pub fn send_negotiate(&mut self, ep: &mut Endpoint, env: &mut Env<'_>) -> SimResult<()> {
        let peer = self.require_peer()?;
        let message = Message::to_protocol(
            peer.protocol.clone(),
            MessageKind::Negotiate {
                channel_delay: self.qc_delay,
                frequency: ep.memory.frequency(),
            },
        );
        ep.send_message(&peer.node, message, env)?;
        Ok(())
    }

    /// Handle a classical message from `src`.
    pub fn received_message(
        &mut self,
        src: &str,
        message: &Message,
        ep: &mut Endpoint,
        env: &mut Env<'_>,
    ) -> SimResult<()> {
        let from_peer = src == self.require_peer()?.node;
        if !from_peer && src != self.middle {
            debug!(protocol = %self.name, src, "message from unrelated node ignored");
            return Ok(());
        }
        debug!(protocol = %self.name, src, %message, round = ?self.round, "message received");

        match message.kind {
            MessageKind::Negotiate { channel_delay, .. } if !self.primary && from_peer => {
                self.on_negotiate(src, channel_delay, ep, env)
            }
            MessageKind::NegotiateAck { emit_time } if self.primary && from_peer => {
                self.on_negotiate_ack(emit_time, ep, env)
            }
            MessageKind::MeasRes {
                detector_sign,
                time,
                resolution,
            } => self.on_meas_res(detector_sign, time, resolution),
            ref kind => Err(SimError::UnexpectedMessage {
                component: self.name.clone(),
                kind: kind.name().to_string(),
                src: src.to_string(),
            }),
        }
    }

    fn on_negotiate(
        &mut self,
        src: &str,
        other_qc_delay: VirtualTime,
        ep: &mut Endpoint,
        env: &mut Env<'_>,
    ) -> SimResult<()> {
        let now = env.now();
        self.qc_delay = ep.qchannel.delay();
        let cc_delay = ep.cchannel_delay(src)?;
        let total_delay = self.qc_delay.max(other_qc_delay);

        // leave room for NEGOTIATE_ACK to reach the primary
        let min_time = now.max(ep.memory.next_excite_time()) + total_delay - self.qc_delay + cc_delay;
        let emit_time = ep
            .qchannel
            .schedule_transmit(min_time + self.config.timing.emission_delay(), now);
        let expected = emit_time + self.qc_delay + self.config.encoding.bin_separation;
        self.expected_time = Some(expected);

        let id = env.timeline.schedule(emit_time, SimEvent::Emit { node: ep.id })?;
        self.scheduled.push(id);

        let peer = self.require_peer()?;
        let other_emit_time = (emit_time + self.qc_delay).saturating_sub(other_qc_delay);
        let ack = Message::to_protocol(
            peer.protocol.clone(),
            MessageKind::NegotiateAck {
                emit_time: other_emit_time,
            },
        );
        ep.send_message(src, ack, env)?;

        self.schedule_resolve(expected, ep, env)
    }

    fn on_negotiate_ack(&mut self, emit_time: VirtualTime, ep: &mut Endpoint, env: &mut Env<'_>) -> SimResult<()> {
        let now = env.now();
        let expected = emit_time + self.qc_delay + self.config.encoding.bin_separation;
        self.expected_time = Some(expected);

        let emit_time = emit_time.max(now);
        let slot = ep.qchannel.schedule_transmit(emit_time, now);
        if slot != emit_time {
            return Err(SimError::violation(
                &self.name,
                format!("negotiated emission at {emit_time} but reserved slot is {slot}"),
            ));
        }
        let id = env.timeline.schedule(slot, SimEvent::Emit { node: ep.id })?;
        self.scheduled.push(id);

        self.schedule_resolve(expected, ep, env)
    }

    fn schedule_resolve(&mut self, expected: VirtualTime, ep: &Endpoint, env: &mut Env<'_>) -> SimResult<()> {
        let relay_delay = ep.cchannel_delay(&self.middle)?;
        let resolve_time = expected + relay_delay + self.config.resolution;
        let id = env.timeline.schedule(resolve_time, SimEvent::Resolve { node: ep.id })?;
        self.scheduled.push(id);
        Ok(())
    }

    fn on_meas_res(&mut self, sign: u8, time: VirtualTime, resolution: VirtualTime) -> SimResult<()> {
        if resolution != self.config.resolution {
            return Err(SimError::violation(
                &self.name,
                format!(
                    "herald resolution {resolution} does not match device resolution {}",
                    self.config.resolution
                ),
            ));
        }
        let Some(expected) = self.expected_time else {
            debug!(protocol = %self.name, time, "herald before negotiation ignored");
            return Ok(());
        };
        if valid_trigger_time(time, expected, resolution) {
            debug!(protocol = %self.name, sign, time, expected, "herald accepted");
            self.psi_sign = Some(sign);
        } else {
            info!(protocol = %self.name, time, expected, "herald trigger time not valid");
        }
        Ok(())
    }

    /// Prepare the memory and emit the photon for this attempt.
    pub fn emit(&mut self, ep: &mut Endpoint, env: &mut Env<'_>) -> SimResult<()> {
        if self.round != Round::Emission {
            return Err(SimError::violation(
                &self.name,
                format!("emission requested in round {:?}", self.round),
            ));
        }
        if self.emitted {
            return Err(SimError::violation(&self.name, "second emission within one attempt"));
        }
        self.emitted = true;

        let amplitude = Complex64::new(0.5_f64.sqrt(), 0.0);
        ep.memory.update_state(&[amplitude, amplitude], env)?;

        let fate = if self.atom_lost {
            AtomFate::Lost
        } else {
            draw_fate(self.config.timing.as_ref(), self.config.atom_survival, &mut ep.rng)
        };
        if fate == AtomFate::Lost && !self.atom_lost {
            info!(protocol = %self.name, attempt = self.attempts, "atom lost");
            ep.memory.set_efficiency(0.0);
            self.atom_lost = true;
            env.metrics.record(MetricEvent::AtomLost);
        }

        match ep.memory.excite(env) {
            Some(_) if fate == AtomFate::OffResonance => {
                debug!(
                    protocol = %self.name,
                    timing = self.config.timing.name(),
                    "off-resonance decay, photon not collected"
                );
                env.metrics.record(MetricEvent::OffResonance);
            }
            Some(photon) => {
                ep.qchannel.transmit(photon, env)?;
            }
            None => debug!(protocol = %self.name, "memory refractory, no photon"),
        }
        Ok(())
    }

    /// Decide the attempt.
    pub fn resolve(&mut self, ep: &mut Endpoint, env: &mut Env<'_>) -> SimResult<AttemptOutcome> {
        if self.round != Round::Emission {
            return Err(SimError::violation(
                &self.name,
                format!("resolve in round {:?}", self.round),
            ));
        }
        self.round = Round::Resolved;

        match self.psi_sign {
            Some(sign) => {
                self.succeed(sign, ep, env)?;
                Ok(AttemptOutcome::Entangled { sign })
            }
            None => {
                self.fail(ep, env)?;
                Ok(AttemptOutcome::Raw)
            }
        }
    }

    fn succeed(&mut self, sign: u8, ep: &mut Endpoint, env: &mut Env<'_>) -> SimResult<()> {
        // psi− → psi+ on one side only
        if sign == 1 && !self.primary {
            let mut z = Circuit::new(1);
            z.z(0)?;
            env.qm.run_circuit(&z, &[ep.memory.key()], 0.0)?;
        }

        let peer = self.require_peer()?;
        let remote = EntangledMemory {
            node: peer.node.clone(),
            memory: peer.memory.clone(),
        };
        ep.memory.mark_entangled(remote, env);
        ep.resources.update(&mut ep.memory, MemoryInfo::Entangled, env)?;
        self.cancel_scheduled(env);
        env.metrics.record(MetricEvent::Entangled);
        info!(protocol = %self.name, sign, "entanglement succeeded");
        Ok(())
    }

    fn fail(&mut self, ep: &mut Endpoint, env: &mut Env<'_>) -> SimResult<()> {
        self.cancel_scheduled(env);
        info!(protocol = %self.name, "entanglement failed");
        env.metrics.record(MetricEvent::AttemptFailed);
        ep.resources.update(&mut ep.memory, MemoryInfo::Raw, env)?;

        if self.config.looping {
            ep.memory.reset(env)?;
            self.clear_attempt(env);
            self.start(ep, env)?;
        }
        Ok(())
    }

    /// The memory expired: abandon the attempt and release the memory.
    pub fn memory_expire(&mut self, ep: &mut Endpoint, env: &mut Env<'_>) -> SimResult<()> {
        info!(protocol = %self.name, round = ?self.round, "memory expired, attempt abandoned");
        self.cancel_scheduled(env);
        ep.resources.update(&mut ep.memory, MemoryInfo::Raw, env)
    }

    fn cancel_scheduled(&mut self, env: &mut Env<'_>) {
        for id in self.scheduled.drain(..) {
            env.timeline.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ClassicalChannel, QuantumChannel, QuantumChannelParams};
    use crate::encoding::EncodingKind;
    use crate::event::NodeId;
    use crate::memory::{Memory, MemoryParams};
    use crate::metrics::SimMetrics;
    use crate::resource::ResourceManager;
    use herald_kernel::{QuantumManager, Timeline};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rustc_hash::FxHashMap;

    const CC: VirtualTime = 100_000_000;

    fn config(threshold: u32) -> GenerationConfig {
        let profile = EncodingKind::TimeBin.profile();
        GenerationConfig {
            encoding: profile.encoding,
            timing: profile.timing,
            retrap: RetrapPolicy { threshold, delay: 0 },
            atom_survival: 1.0,
            resolution: 100,
            looping: true,
        }
    }

    fn endpoint(name: &str, id: usize, qm: &mut QuantumManager) -> Endpoint {
        let mut cchannels = FxHashMap::default();
        let other = if name == "node1" { ("node2", 1) } else { ("node1", 0) };
        cchannels.insert(
            other.0.to_string(),
            ClassicalChannel::new(format!("cc.{name}.{}", other.0), other.0, NodeId(other.1), 1000.0, Some(CC)),
        );
        cchannels.insert(
            "bsm_node".to_string(),
            ClassicalChannel::new(format!("cc.{name}.bsm_node"), "bsm_node", NodeId(2), 1000.0, Some(CC)),
        );
        let encoding = EncodingKind::TimeBin.profile().encoding;
        Endpoint {
            name: name.to_string(),
            id: NodeId(id),
            memory: Memory::new(format!("{name}.memo"), NodeId(id), MemoryParams::default(), encoding, qm),
            qchannel: QuantumChannel::new(
                format!("qc.{name}"),
                "bsm_node",
                NodeId(2),
                QuantumChannelParams::default(),
            )
            .unwrap(),
            cchannels,
            resources: ResourceManager::new(),
            rng: StdRng::seed_from_u64(id as u64),
        }
    }

    fn protocol(own: &str, other: &str, threshold: u32) -> GenerationProtocol {
        paired(own, other, config(threshold))
    }

    fn paired(own: &str, other: &str, config: GenerationConfig) -> GenerationProtocol {
        let mut p = GenerationProtocol::new(format!("{own}.eg"), "bsm_node", config);
        p.set_others(
            own,
            Peer {
                node: other.into(),
                protocol: format!("{other}.eg"),
                memory: format!("{other}.memo"),
            },
        )
        .unwrap();
        p
    }

    #[test]
    fn test_primary_is_lexicographic() {
        assert!(protocol("node2", "node1", 8).is_primary());
        assert!(!protocol("node1", "node2", 8).is_primary());
    }

    #[test]
    fn test_pairing_twice_is_a_violation() {
        let mut p = protocol("node1", "node2", 8);
        let again = p.set_others(
            "node1",
            Peer { node: "node3".into(), protocol: "node3.eg".into(), memory: "node3.memo".into() },
        );
        assert!(matches!(again, Err(SimError::ProtocolViolation { .. })));
    }

    #[test]
    fn test_negotiation_schedules_emit_ack_and_resolve() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut ep = endpoint("node1", 0, &mut qm);
        let mut p = protocol("node1", "node2", 8);
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };

        p.start(&mut ep, &mut env).unwrap();
        assert_eq!(env.timeline.len(), 0);

        let negotiate = Message::to_protocol(
            "node1.eg",
            MessageKind::Negotiate { channel_delay: 5_000_000, frequency: 2000.0 },
        );
        p.received_message("node2", &negotiate, &mut ep, &mut env).unwrap();

        // min = 0 + 5e6 - 5e6 + 1e8, on the 12.5 ns grid
        let emit = 100_000_000;
        let expected = emit + 5_000_000 + 50_000;
        assert_eq!(p.expected_time(), Some(expected));
        assert_eq!(p.owned_events(), 2);
        assert_eq!(env.timeline.len(), 3);

        let mut seen = Vec::new();
        while let Some((time, event)) = env.timeline.pop() {
            seen.push((time, event));
        }
        assert!(seen.iter().any(|(t, e)| *t == CC && matches!(
            e,
            SimEvent::Deliver { message: Message { kind: MessageKind::NegotiateAck { emit_time }, .. }, .. }
                if *emit_time == emit
        )));
        assert!(seen.iter().any(|(t, e)| *t == emit && matches!(e, SimEvent::Emit { .. })));
        assert!(seen
            .iter()
            .any(|(t, e)| *t == expected + CC + 100 && matches!(e, SimEvent::Resolve { .. })));
    }

    #[test]
    fn test_primary_rejects_negotiate() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut ep = endpoint("node2", 1, &mut qm);
        let mut p = protocol("node2", "node1", 8);
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        p.start(&mut ep, &mut env).unwrap();

        let negotiate = Message::to_protocol(
            "node2.eg",
            MessageKind::Negotiate { channel_delay: 5_000_000, frequency: 2000.0 },
        );
        let err = p.received_message("node1", &negotiate, &mut ep, &mut env).unwrap_err();
        assert!(matches!(err, SimError::UnexpectedMessage { .. }));
    }

    #[test]
    fn test_second_emission_is_fatal() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut ep = endpoint("node1", 0, &mut qm);
        let mut p = protocol("node1", "node2", 8);
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };

        p.start(&mut ep, &mut env).unwrap();
        p.emit(&mut ep, &mut env).unwrap();
        let err = p.emit(&mut ep, &mut env).unwrap_err();
        assert!(matches!(err, SimError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_herald_window_and_resolution_check() {
        let mut p = protocol("node1", "node2", 8);
        p.expected_time = Some(10_000);
        p.on_meas_res(1, 10_051, 100).unwrap();
        assert_eq!(p.psi_sign(), None);
        p.on_meas_res(1, 10_050, 100).unwrap();
        assert_eq!(p.psi_sign(), Some(1));
        assert!(p.on_meas_res(0, 10_000, 20_000).is_err());
    }

    #[test]
    fn test_failure_restarts_and_counter_wraps() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut ep = endpoint("node1", 0, &mut qm);
        let mut p = protocol("node1", "node2", 3);
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };

        p.start(&mut ep, &mut env).unwrap();
        let mut counters = vec![p.attempts()];
        for _ in 0..4 {
            let outcome = p.resolve(&mut ep, &mut env).unwrap();
            assert_eq!(outcome, AttemptOutcome::Raw);
            assert_eq!(p.round(), Round::Emission);
            counters.push(p.attempts());
        }
        assert_eq!(counters, vec![1, 2, 0, 1, 2]);
        assert_eq!(ep.resources.raw_counter(), 4);
        drop(env);
        assert_eq!(metrics.failed_attempts, 4);
    }

    #[test]
    fn test_success_marks_memory_and_cancels_handles() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut ep = endpoint("node1", 0, &mut qm);
        let mut p = protocol("node1", "node2", 8);
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };

        p.start(&mut ep, &mut env).unwrap();
        let negotiate = Message::to_protocol(
            "node1.eg",
            MessageKind::Negotiate { channel_delay: 5_000_000, frequency: 2000.0 },
        );
        p.received_message("node2", &negotiate, &mut ep, &mut env).unwrap();
        let expected = p.expected_time().unwrap();
        p.on_meas_res(0, expected, 100).unwrap();

        assert_eq!(
            p.resolve(&mut ep, &mut env).unwrap(),
            AttemptOutcome::Entangled { sign: 0 }
        );
        assert_eq!(p.owned_events(), 0);
        assert_eq!(
            ep.memory.entangled_memory(),
            Some(&EntangledMemory { node: "node2".into(), memory: "node2.memo".into() })
        );
        // only the already-sent ACK remains
        assert_eq!(env.timeline.len(), 1);
    }

    #[test]
    fn test_reload_delays_first_negotiate_of_each_cycle() {
        const RELOAD: VirtualTime = 1_000_000_000;
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut ep = endpoint("node2", 1, &mut qm);
        let mut p = paired(
            "node2",
            "node1",
            GenerationConfig {
                retrap: RetrapPolicy { threshold: 2, delay: RELOAD },
                ..config(2)
            },
        );
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };

        p.start(&mut ep, &mut env).unwrap();
        assert_eq!(p.owned_events(), 1);
        assert_eq!(env.timeline.time_of(p.scheduled[0]), Some(RELOAD));
        let (time, event) = env.timeline.pop().unwrap();
        assert_eq!(time, RELOAD);
        assert!(matches!(event, SimEvent::SendNegotiate { node: NodeId(1) }));

        // second attempt of the cycle negotiates straight away
        p.resolve(&mut ep, &mut env).unwrap();
        assert_eq!(p.attempts(), 0);
        assert_eq!(p.owned_events(), 0);
        assert!(env.timeline.peek_time().is_some_and(|t| t == RELOAD + CC));

        // the counter wrapped: the next attempt reloads again
        p.resolve(&mut ep, &mut env).unwrap();
        assert_eq!(p.attempts(), 1);
        assert_eq!(p.owned_events(), 1);
        assert_eq!(env.timeline.time_of(p.scheduled[0]), Some(2 * RELOAD));
    }

    #[test]
    fn test_lost_atom_stays_dark_until_reload() {
        let mut tl = Timeline::new();
        let mut qm = QuantumManager::new();
        let mut metrics = SimMetrics::default();
        let mut ep = endpoint("node1", 0, &mut qm);
        let mut p = paired(
            "node1",
            "node2",
            GenerationConfig {
                atom_survival: 0.0,
                ..config(3)
            },
        );
        let mut env = Env { timeline: &mut tl, qm: &mut qm, metrics: &mut metrics };
        let efficiency = MemoryParams::default().efficiency;

        p.start(&mut ep, &mut env).unwrap();
        assert_eq!(ep.memory.efficiency(), efficiency);
        let mut seen = Vec::new();
        for _ in 0..3 {
            p.emit(&mut ep, &mut env).unwrap();
            seen.push((p.attempts(), p.is_atom_lost(), ep.memory.efficiency()));
            p.resolve(&mut ep, &mut env).unwrap();
        }
        assert_eq!(seen, vec![(1, true, 0.0), (2, true, 0.0), (0, true, 0.0)]);

        assert_eq!(p.attempts(), 1);
        assert!(!p.is_atom_lost());
        assert_eq!(ep.memory.efficiency(), efficiency);
        drop(env);
        assert_eq!(metrics.atom_losses, 1);
    }
}
