//! Single-atom quantum memory.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use herald_kernel::{EventId, QuantumKey, QuantumManager, VirtualTime, period_ps, seconds_to_ps};

use crate::encoding::Encoding;
use crate::error::{SimError, SimResult};
use crate::event::{Env, NodeId, SimEvent};
use crate::photon::Photon;

/// Index of psi+ in a Bell-diagonal vector ordered Φ+, Φ−, Ψ+, Ψ−.
const PSI_PLUS: usize = 2;

/// Memory hardware parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryParams {
    /// Fidelity assigned to a freshly heralded pair.
    pub raw_fidelity: f64,
    /// Maximum excitation rate in Hz; zero disables the refractory period.
    pub frequency: f64,
    /// Probability an excitation yields a collected photon.
    pub efficiency: f64,
    /// Coherence time in seconds; non-positive disables expiry.
    pub coherence_time: f64,
    /// Fraction of the coherence time after which the memory expires.
    pub cutoff_ratio: f64,
    /// Relative X, Y and Z Pauli error weights for Bell-diagonal decoherence.
    pub decoherence_errors: Option<[f64; 3]>,
}

impl Default for MemoryParams {
    fn default() -> Self {
        Self {
            raw_fidelity: 1.0,
            frequency: 2000.0,
            efficiency: 0.5,
            coherence_time: -1.0,
            cutoff_ratio: 1.0,
            decoherence_errors: None,
        }
    }
}

impl MemoryParams {
    pub fn validate(&self) -> SimResult<()> {
        for (name, value) in [
            ("raw_fidelity", self.raw_fidelity),
            ("efficiency", self.efficiency),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::Config(format!("memory {name} must be in [0, 1], got {value}")));
            }
        }
        if self.frequency < 0.0 {
            return Err(SimError::Config(format!(
                "memory frequency must be non-negative, got {}",
                self.frequency
            )));
        }
        if self.cutoff_ratio <= 0.0 || self.cutoff_ratio > 1.0 {
            return Err(SimError::Config(format!(
                "memory cutoff_ratio must be in (0, 1], got {}",
                self.cutoff_ratio
            )));
        }
        if let Some(errors) = self.decoherence_errors {
            let sum: f64 = errors.iter().sum();
            if errors.iter().any(|e| *e < 0.0) || (sum - 1.0).abs() > 1e-9 {
                return Err(SimError::Config(format!(
                    "decoherence_errors must be non-negative and sum to 1, got {errors:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Remote half of an entangled pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntangledMemory {
    pub node: String,
    pub memory: String,
}

/// A trapped-atom memory owning one qubit key.
#[derive(Debug)]
pub struct Memory {
    name: String,
    node: NodeId,
    key: QuantumKey,
    params: MemoryParams,
    encoding: Encoding,
    efficiency: f64,
    fidelity: f64,
    next_excite_time: VirtualTime,
    entangled_memory: Option<EntangledMemory>,
    generation_time: Option<VirtualTime>,
    last_update_time: Option<VirtualTime>,
    expiration_event: Option<EventId>,
    in_application: bool,
    bds: Option<[f64; 4]>,
}

impl Memory {
    /// Create a memory on `node`, allocating its qubit in `qm`.
    pub fn new(
        name: impl Into<String>,
        node: NodeId,
        params: MemoryParams,
        encoding: Encoding,
        qm: &mut QuantumManager,
    ) -> Self {
        Self {
            name: name.into(),
            node,
            key: qm.new_key(),
            efficiency: params.efficiency,
            params,
            encoding,
            fidelity: 0.0,
            next_excite_time: 0,
            entangled_memory: None,
            generation_time: None,
            last_update_time: None,
            expiration_event: None,
            in_application: false,
            bds: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> QuantumKey {
        self.key
    }

    pub fn params(&self) -> &MemoryParams {
        &self.params
    }

    pub fn frequency(&self) -> f64 {
        self.params.frequency
    }

    pub fn raw_fidelity(&self) -> f64 {
        self.params.raw_fidelity
    }

    pub fn fidelity(&self) -> f64 {
        self.fidelity
    }

    pub fn efficiency(&self) -> f64 {
        self.efficiency
    }

    /// Override the current efficiency (atom loss sets it to zero).
    pub fn set_efficiency(&mut self, efficiency: f64) {
        self.efficiency = efficiency;
    }

    /// Restore the configured efficiency after an atom reload.
    pub fn restore_efficiency(&mut self) {
        self.efficiency = self.params.efficiency;
    }

    pub fn next_excite_time(&self) -> VirtualTime {
        self.next_excite_time
    }

    pub fn entangled_memory(&self) -> Option<&EntangledMemory> {
        self.entangled_memory.as_ref()
    }

    pub fn generation_time(&self) -> Option<VirtualTime> {
        self.generation_time
    }

    pub fn last_update_time(&self) -> Option<VirtualTime> {
        self.last_update_time
    }

    pub fn is_in_application(&self) -> bool {
        self.in_application
    }

    /// Mark the memory as consumed by an application; suppresses expiry.
    pub fn set_in_application(&mut self, in_application: bool) {
        self.in_application = in_application;
    }

    /// Bell-diagonal weights (Φ+, Φ−, Ψ+, Ψ−) when decoherence is modelled.
    pub fn bds_state(&self) -> Option<[f64; 4]> {
        self.bds
    }

    /// Psi+ weight of the Bell-diagonal state after decohering up to `now`.
    pub fn bds_fidelity(&mut self, now: VirtualTime) -> Option<f64> {
        self.bds_decohere(now);
        self.bds.map(|bds| bds[PSI_PLUS])
    }

    /// Emit a photon unless the memory is still refractory.
    pub fn excite(&mut self, env: &mut Env<'_>) -> Option<Photon> {
        let now = env.now();
        if now < self.next_excite_time {
            debug!(memory = %self.name, now, next = self.next_excite_time, "excite ignored, memory refractory");
            return None;
        }

        let mut photon = Photon::new(self.name.clone(), self.key, self.encoding.clone());
        photon.add_loss(1.0 - self.efficiency);
        self.generation_time = Some(now);
        self.last_update_time = Some(now);
        self.entangled_memory = None;
        if let Some(period) = period_ps(self.params.frequency) {
            self.next_excite_time = now + period;
        }
        Some(photon)
    }

    /// Return to |0⟩ with no entanglement and no pending expiry.
    pub fn reset(&mut self, env: &mut Env<'_>) -> SimResult<()> {
        self.fidelity = 0.0;
        self.generation_time = None;
        self.last_update_time = None;
        self.bds = None;
        env.qm.set(
            &[self.key],
            &[Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
        )?;
        self.entangled_memory = None;
        self.cancel_expiration(env);
        Ok(())
    }

    /// Overwrite the qubit state and restart the coherence clock.
    pub fn update_state(&mut self, amplitudes: &[Complex64], env: &mut Env<'_>) -> SimResult<()> {
        env.qm.set(&[self.key], amplitudes)?;
        self.entangled_memory = None;
        self.last_update_time = Some(env.now());
        if self.params.coherence_time > 0.0 {
            let lifetime = seconds_to_ps(self.params.cutoff_ratio * self.params.coherence_time);
            self.schedule_expiration(env.now() + lifetime, env)?;
        }
        Ok(())
    }

    /// Record a heralded pair with the remote memory.
    pub fn mark_entangled(&mut self, remote: EntangledMemory, env: &mut Env<'_>) {
        info!(memory = %self.name, remote_node = %remote.node, remote_memory = %remote.memory, "memory entangled");
        self.entangled_memory = Some(remote);
        self.fidelity = self.params.raw_fidelity;
        // the pair has been idling since emission
        self.last_update_time = Some(self.generation_time.unwrap_or(env.now()));
        if self.params.decoherence_errors.is_some() {
            let f = self.params.raw_fidelity;
            let rest = (1.0 - f) / 3.0;
            let mut bds = [rest; 4];
            bds[PSI_PLUS] = f;
            self.bds = Some(bds);
        }
    }

    /// Expiry event fired. Returns whether the memory was actually reset.
    pub fn expire(&mut self, env: &mut Env<'_>) -> SimResult<bool> {
        self.expiration_event = None;
        if self.in_application {
            debug!(memory = %self.name, "expiry suppressed, memory in application");
            return Ok(false);
        }
        info!(memory = %self.name, "memory expired");
        self.reset(env)?;
        Ok(true)
    }

    /// Move the pending expiry to `time` (clamped to now).
    pub fn update_expire_time(&mut self, time: VirtualTime, env: &mut Env<'_>) -> SimResult<()> {
        let time = time.max(env.now());
        self.schedule_expiration(time, env)
    }

    /// Time of the pending expiry.
    pub fn expire_time(&self, env: &Env<'_>) -> Option<VirtualTime> {
        self.expiration_event.and_then(|id| env.timeline.time_of(id))
    }

    fn schedule_expiration(&mut self, time: VirtualTime, env: &mut Env<'_>) -> SimResult<()> {
        self.cancel_expiration(env);
        let id = env.timeline.schedule(time, SimEvent::MemoryExpire { node: self.node })?;
        self.expiration_event = Some(id);
        Ok(())
    }

    fn cancel_expiration(&mut self, env: &mut Env<'_>) {
        if let Some(id) = self.expiration_event.take() {
            env.timeline.cancel(id);
        }
    }

    /// Apply analytic Pauli-channel decoherence to the Bell-diagonal weights
    /// for the time idled since the last update.
    pub fn bds_decohere(&mut self, now: VirtualTime) {
        let (Some(errors), Some(bds), Some(last)) =
            (self.params.decoherence_errors, self.bds, self.last_update_time)
        else {
            return;
        };
        if now <= last || self.params.coherence_time <= 0.0 {
            return;
        }
        let t = herald_kernel::ps_to_seconds(now - last);
        let rate = 1.0 / self.params.coherence_time;
        let [x, y, z] = errors.map(|e| e * rate);

        let exy = (-2.0 * (x + y) * t).exp();
        let exz = (-2.0 * (x + z) * t).exp();
        let ezy = (-2.0 * (z + y) * t).exp();
        let p_i = (1.0 + exy + exz + ezy) / 4.0;
        let p_x = (1.0 - exy - exz + ezy) / 4.0;
        let p_y = (1.0 - exy + exz - ezy) / 4.0;
        let p_z = (1.0 + exy - exz - ezy) / 4.0;

        let m = [
            [p_i, p_z, p_x, p_y],
            [p_z, p_i, p_y, p_x],
            [p_x, p_y, p_i, p_z],
            [p_y, p_x, p_z, p_i],
        ];
        let mut next = [0.0; 4];
        for (row, out) in m.iter().zip(next.iter_mut()) {
            *out = row.iter().zip(bds.iter()).map(|(a, b)| a * b).sum();
        }
        debug!(memory = %self.name, before = bds[PSI_PLUS], after = next[PSI_PLUS], "bds decoherence");
        self.bds = Some(next);
        self.fidelity = next[PSI_PLUS];
        self.last_update_time = Some(now);
    }
}
