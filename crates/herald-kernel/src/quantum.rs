//! Ket-vector quantum state manager.
//!
//! Every key belongs to exactly one group; a group holds the joint ket of
//! its keys with the first key as the most significant qubit. Groups merge
//! when a circuit spans several of them and split again when measurement or
//! an overwrite leaves a product state.

use std::fmt;

use num_complex::Complex64;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::circuit::{Circuit, Gate, Operation};
use crate::error::{KernelError, KernelResult};

/// Tolerance for normalisation and factorisation checks.
const EPSILON: f64 = 1e-9;

/// Normalisation tolerance for caller-supplied amplitudes.
const NORM_TOLERANCE: f64 = 1e-6;

/// Opaque handle to one qubit in the state manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuantumKey(usize);

impl QuantumKey {
    /// Build a key from a raw index.
    pub fn from_raw(index: usize) -> Self {
        Self(index)
    }

    /// Raw index of the key.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for QuantumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Joint pure state of a group of keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KetState {
    keys: Vec<QuantumKey>,
    amplitudes: Vec<Complex64>,
}

impl KetState {
    fn ground(keys: Vec<QuantumKey>) -> Self {
        let mut amplitudes = vec![Complex64::new(0.0, 0.0); 1 << keys.len()];
        amplitudes[0] = Complex64::new(1.0, 0.0);
        Self { keys, amplitudes }
    }

    /// Keys of the group, most significant first.
    pub fn keys(&self) -> &[QuantumKey] {
        &self.keys
    }

    /// State amplitudes in computational-basis order.
    pub fn amplitudes(&self) -> &[Complex64] {
        &self.amplitudes
    }

    /// Number of qubits in the group.
    pub fn num_qubits(&self) -> usize {
        self.keys.len()
    }

    /// Probability of basis state `index`.
    pub fn probability(&self, index: usize) -> f64 {
        self.amplitudes.get(index).map_or(0.0, |a| a.norm_sqr())
    }

    fn position(&self, key: QuantumKey) -> Option<usize> {
        self.keys.iter().position(|k| *k == key)
    }

    fn mask(&self, position: usize) -> usize {
        1 << (self.keys.len() - 1 - position)
    }

    // =========================================================================
    // Gates
    // =========================================================================

    fn apply(&mut self, gate: Gate, position: usize) {
        let mask = self.mask(position);
        match gate {
            Gate::X => {
                for i in 0..self.amplitudes.len() {
                    if i & mask == 0 {
                        self.amplitudes.swap(i, i | mask);
                    }
                }
            }
            Gate::Z => {
                for (i, amp) in self.amplitudes.iter_mut().enumerate() {
                    if i & mask != 0 {
                        *amp = -*amp;
                    }
                }
            }
            Gate::Sdg => {
                let phase = Complex64::new(0.0, -1.0);
                for (i, amp) in self.amplitudes.iter_mut().enumerate() {
                    if i & mask != 0 {
                        *amp *= phase;
                    }
                }
            }
            Gate::H => {
                let sqrt2_inv = 1.0 / 2.0_f64.sqrt();
                for i in 0..self.amplitudes.len() {
                    if i & mask == 0 {
                        let j = i | mask;
                        let a = self.amplitudes[i];
                        let b = self.amplitudes[j];
                        self.amplitudes[i] = sqrt2_inv * (a + b);
                        self.amplitudes[j] = sqrt2_inv * (a - b);
                    }
                }
            }
        }
    }

    /// Index of the sub-register formed by `positions` within basis state `i`.
    fn sub_index(&self, i: usize, positions: &[usize]) -> usize {
        positions
            .iter()
            .fold(0, |acc, &p| (acc << 1) | usize::from(i & self.mask(p) != 0))
    }

    /// Try to write the state as |dropped⟩ ⊗ |kept⟩ and return the kept factor.
    ///
    /// Returns `None` when the kept keys are entangled with the dropped ones.
    fn factor(&self, kept: &[usize]) -> Option<Vec<Complex64>> {
        let dropped: Vec<usize> = (0..self.keys.len()).filter(|p| !kept.contains(p)).collect();
        let cols = 1 << kept.len();
        let mut rows = vec![vec![Complex64::new(0.0, 0.0); cols]; 1 << dropped.len()];
        for (i, amp) in self.amplitudes.iter().enumerate() {
            rows[self.sub_index(i, &dropped)][self.sub_index(i, kept)] = *amp;
        }

        let norm = |row: &[Complex64]| row.iter().map(|a| a.norm_sqr()).sum::<f64>();
        let (best, best_norm) = rows
            .iter()
            .map(|r| norm(r.as_slice()))
            .enumerate()
            .fold((0, 0.0), |acc, (i, n)| if n > acc.1 { (i, n) } else { acc });
        if best_norm < EPSILON {
            return None;
        }
        let scale = best_norm.sqrt();
        let candidate: Vec<Complex64> = rows[best].iter().map(|a| *a / scale).collect();

        for row in &rows {
            let overlap: Complex64 = candidate
                .iter()
                .zip(row)
                .map(|(c, r)| c.conj() * *r)
                .sum();
            if (overlap.norm_sqr() - norm(row.as_slice())).abs() > 1e-7 {
                return None;
            }
        }
        Some(candidate)
    }
}

/// Registry of quantum state keys and their joint kets.
#[derive(Debug, Default)]
pub struct QuantumManager {
    groups: FxHashMap<usize, KetState>,
    owner: FxHashMap<QuantumKey, usize>,
    next_key: usize,
    next_group: usize,
}

impl QuantumManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.owner.len()
    }

    /// Whether no keys are registered.
    pub fn is_empty(&self) -> bool {
        self.owner.is_empty()
    }

    /// Allocate a fresh key in state |0⟩.
    pub fn new_key(&mut self) -> QuantumKey {
        let key = QuantumKey(self.next_key);
        self.next_key += 1;
        self.insert_group(KetState::ground(vec![key]));
        key
    }

    /// Joint state of the group containing `key`.
    pub fn get(&self, key: QuantumKey) -> KernelResult<&KetState> {
        let gid = self.owner.get(&key).ok_or(KernelError::UnknownKey(key))?;
        self.groups.get(gid).ok_or(KernelError::UnknownKey(key))
    }

    /// Overwrite the joint state of `keys`.
    ///
    /// Keys that shared a group with any of `keys` keep their own factor when
    /// the old state was a product across the cut; otherwise they fall back
    /// to |0…0⟩.
    pub fn set(&mut self, keys: &[QuantumKey], amplitudes: &[Complex64]) -> KernelResult<()> {
        self.check_keys(keys)?;
        let expected = 1usize << keys.len();
        if amplitudes.len() != expected {
            return Err(KernelError::AmplitudeCount {
                keys: keys.len(),
                expected,
                got: amplitudes.len(),
            });
        }
        let norm: f64 = amplitudes.iter().map(|a| a.norm_sqr()).sum();
        if (norm - 1.0).abs() > NORM_TOLERANCE {
            return Err(KernelError::NotNormalized(norm));
        }

        self.detach(keys);
        self.insert_group(KetState {
            keys: keys.to_vec(),
            amplitudes: amplitudes.to_vec(),
        });
        trace!(keys = ?keys, "state set");
        Ok(())
    }

    /// Run `circuit` with circuit qubit `i` bound to `keys[i]`.
    ///
    /// Measurements are sampled jointly from a single uniform `draw` in
    /// [0, 1) by inverting the cumulative distribution over outcomes; each
    /// measured key is left in its collapsed basis state.
    pub fn run_circuit(
        &mut self,
        circuit: &Circuit,
        keys: &[QuantumKey],
        draw: f64,
    ) -> KernelResult<FxHashMap<QuantumKey, u8>> {
        if circuit.size() != keys.len() {
            return Err(KernelError::CircuitSizeMismatch {
                size: circuit.size(),
                keys: keys.len(),
            });
        }
        if !(0.0..1.0).contains(&draw) {
            return Err(KernelError::InvalidDraw(draw));
        }
        self.check_keys(keys)?;

        let gid = self.merge(keys);
        let Some(state) = self.groups.get_mut(&gid) else {
            return Err(KernelError::UnknownKey(keys[0]));
        };
        let positions: Vec<usize> = keys
            .iter()
            .map(|k| state.position(*k).unwrap_or(0))
            .collect();

        for op in circuit.operations() {
            if let Operation::Gate(gate, q) = op {
                state.apply(*gate, positions[*q]);
            }
        }

        let measured: Vec<usize> = circuit
            .measured()
            .into_iter()
            .map(|q| positions[q])
            .collect();
        if measured.is_empty() {
            return Ok(FxHashMap::default());
        }

        let mut probs = vec![0.0; 1 << measured.len()];
        for (i, amp) in state.amplitudes.iter().enumerate() {
            probs[state.sub_index(i, &measured)] += amp.norm_sqr();
        }
        let mut outcome = 0;
        let mut cumulative = 0.0;
        for (o, p) in probs.iter().enumerate() {
            if *p > EPSILON {
                outcome = o;
            }
            cumulative += p;
            if draw < cumulative && *p > EPSILON {
                break;
            }
        }

        let state = state.clone();
        let kept: Vec<usize> = (0..state.num_qubits()).filter(|p| !measured.contains(p)).collect();
        let scale = probs[outcome].sqrt();
        let mut remainder = vec![Complex64::new(0.0, 0.0); 1 << kept.len()];
        for (i, amp) in state.amplitudes.iter().enumerate() {
            if state.sub_index(i, &measured) == outcome {
                remainder[state.sub_index(i, &kept)] = *amp / scale;
            }
        }

        self.groups.remove(&gid);
        let mut results = FxHashMap::default();
        for (n, &p) in measured.iter().enumerate() {
            let bit = ((outcome >> (measured.len() - 1 - n)) & 1) as u8;
            let key = state.keys[p];
            let mut ket = KetState::ground(vec![key]);
            if bit == 1 {
                ket.amplitudes.swap(0, 1);
            }
            self.insert_group(ket);
            results.insert(key, bit);
        }
        if !kept.is_empty() {
            self.insert_group(KetState {
                keys: kept.iter().map(|&p| state.keys[p]).collect(),
                amplitudes: remainder,
            });
        }

        trace!(keys = ?keys, outcome, "circuit measured");
        Ok(results)
    }

    fn check_keys(&self, keys: &[QuantumKey]) -> KernelResult<()> {
        for (i, key) in keys.iter().enumerate() {
            if !self.owner.contains_key(key) {
                return Err(KernelError::UnknownKey(*key));
            }
            if keys[..i].contains(key) {
                return Err(KernelError::DuplicateKey(*key));
            }
        }
        Ok(())
    }

    fn insert_group(&mut self, state: KetState) -> usize {
        let gid = self.next_group;
        self.next_group += 1;
        for key in &state.keys {
            self.owner.insert(*key, gid);
        }
        self.groups.insert(gid, state);
        gid
    }

    /// Pull `keys` out of their groups, leaving the other members in their
    /// own group.
    fn detach(&mut self, keys: &[QuantumKey]) {
        let mut touched: Vec<usize> = keys.iter().filter_map(|k| self.owner.get(k).copied()).collect();
        touched.sort_unstable();
        touched.dedup();

        for gid in touched {
            let Some(state) = self.groups.remove(&gid) else {
                continue;
            };
            let kept: Vec<usize> = (0..state.num_qubits())
                .filter(|&p| !keys.contains(&state.keys[p]))
                .collect();
            for key in &state.keys {
                self.owner.remove(key);
            }
            if kept.is_empty() {
                continue;
            }
            let kept_keys: Vec<QuantumKey> = kept.iter().map(|&p| state.keys[p]).collect();
            let ket = match state.factor(&kept) {
                Some(amplitudes) => KetState {
                    keys: kept_keys,
                    amplitudes,
                },
                None => KetState::ground(kept_keys),
            };
            self.insert_group(ket);
        }
    }

    /// Combine the groups of `keys` into one tensor-product group.
    fn merge(&mut self, keys: &[QuantumKey]) -> usize {
        let mut order: Vec<usize> = Vec::new();
        for key in keys {
            if let Some(gid) = self.owner.get(key) {
                if !order.contains(gid) {
                    order.push(*gid);
                }
            }
        }
        if order.len() == 1 {
            return order[0];
        }

        let mut joint = KetState {
            keys: vec![],
            amplitudes: vec![Complex64::new(1.0, 0.0)],
        };
        for gid in order {
            let Some(part) = self.groups.remove(&gid) else {
                continue;
            };
            let mut amplitudes = Vec::with_capacity(joint.amplitudes.len() * part.amplitudes.len());
            for a in &joint.amplitudes {
                for b in &part.amplitudes {
                    amplitudes.push(*a * *b);
                }
            }
            joint.keys.extend(part.keys);
            joint.amplitudes = amplitudes;
        }
        self.insert_group(joint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64) -> Complex64 {
        Complex64::new(re, 0.0)
    }

    #[test]
    fn test_new_key_is_ground() {
        let mut qm = QuantumManager::new();
        let k = qm.new_key();
        let state = qm.get(k).unwrap();
        assert_eq!(state.keys(), &[k]);
        assert_eq!(state.amplitudes(), &[c(1.0), c(0.0)]);
    }

    #[test]
    fn test_set_validates() {
        let mut qm = QuantumManager::new();
        let a = qm.new_key();
        let b = qm.new_key();
        assert!(matches!(
            qm.set(&[a, b], &[c(1.0), c(0.0)]),
            Err(KernelError::AmplitudeCount { expected: 4, .. })
        ));
        assert!(matches!(qm.set(&[a], &[c(1.0), c(1.0)]), Err(KernelError::NotNormalized(_))));
        assert!(matches!(qm.set(&[a, a], &[c(1.0), c(0.0), c(0.0), c(0.0)]), Err(KernelError::DuplicateKey(_))));
        assert!(matches!(
            qm.set(&[QuantumKey::from_raw(99)], &[c(1.0), c(0.0)]),
            Err(KernelError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_overwrite_part_of_product_keeps_factor() {
        let mut qm = QuantumManager::new();
        let a = qm.new_key();
        let b = qm.new_key();
        // |0⟩ ⊗ |1⟩
        qm.set(&[a, b], &[c(0.0), c(1.0), c(0.0), c(0.0)]).unwrap();
        qm.set(&[a], &[c(0.0), c(1.0)]).unwrap();
        assert_eq!(qm.get(b).unwrap().keys(), &[b]);
        assert!((qm.get(b).unwrap().probability(1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_overwrite_part_of_entangled_resets_rest() {
        let mut qm = QuantumManager::new();
        let a = qm.new_key();
        let b = qm.new_key();
        let s = 0.5_f64.sqrt();
        qm.set(&[a, b], &[c(0.0), c(s), c(s), c(0.0)]).unwrap();
        qm.set(&[a], &[c(1.0), c(0.0)]).unwrap();
        assert_eq!(qm.get(b).unwrap().amplitudes(), &[c(1.0), c(0.0)]);
    }

    #[test]
    fn test_measure_plus_uses_draw() {
        let mut qm = QuantumManager::new();
        let k = qm.new_key();
        let s = 0.5_f64.sqrt();
        let mut circuit = Circuit::new(1);
        circuit.measure(0).unwrap();

        qm.set(&[k], &[c(s), c(s)]).unwrap();
        assert_eq!(qm.run_circuit(&circuit, &[k], 0.2).unwrap()[&k], 0);
        qm.set(&[k], &[c(s), c(s)]).unwrap();
        assert_eq!(qm.run_circuit(&circuit, &[k], 0.7).unwrap()[&k], 1);
        assert!((qm.get(k).unwrap().probability(1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_measuring_one_half_of_bell_pair_collapses_partner() {
        let mut qm = QuantumManager::new();
        let a = qm.new_key();
        let b = qm.new_key();
        let s = 0.5_f64.sqrt();
        qm.set(&[a, b], &[c(0.0), c(s), c(s), c(0.0)]).unwrap();

        let mut circuit = Circuit::new(1);
        circuit.measure(0).unwrap();
        let bit = qm.run_circuit(&circuit, &[a], 0.9).unwrap()[&a];
        assert_eq!(bit, 1);
        let partner = qm.get(b).unwrap();
        assert_eq!(partner.keys(), &[b]);
        assert!((partner.probability(0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gates_on_merged_groups() {
        let mut qm = QuantumManager::new();
        let a = qm.new_key();
        let b = qm.new_key();
        let mut circuit = Circuit::new(2);
        circuit.x(0).unwrap().h(1).unwrap().z(1).unwrap().h(1).unwrap();
        circuit.measure(0).unwrap().measure(1).unwrap();

        // X on a; HZH = X on b.
        let out = qm.run_circuit(&circuit, &[a, b], 0.5).unwrap();
        assert_eq!(out[&a], 1);
        assert_eq!(out[&b], 1);
        assert_eq!(qm.get(a).unwrap().num_qubits(), 1);
    }

    #[test]
    fn test_invalid_draw() {
        let mut qm = QuantumManager::new();
        let k = qm.new_key();
        let mut circuit = Circuit::new(1);
        circuit.measure(0).unwrap();
        assert!(matches!(qm.run_circuit(&circuit, &[k], 1.0), Err(KernelError::InvalidDraw(_))));
    }
}
