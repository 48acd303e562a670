//! Minimal gate circuits run against the state manager.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Single-qubit gates understood by the state manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gate {
    /// Hadamard.
    H,
    /// Pauli-X.
    X,
    /// Pauli-Z.
    Z,
    /// Inverse phase gate S†.
    Sdg,
}

/// One circuit operation on a circuit-local qubit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Apply a gate.
    Gate(Gate, usize),
    /// Measure in the computational basis.
    Measure(usize),
}

/// An ordered list of operations on `size` qubits.
///
/// Gates are applied in order; all measurements are sampled jointly after
/// the last gate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Circuit {
    size: usize,
    ops: Vec<Operation>,
}

impl Circuit {
    /// Create an empty circuit on `size` qubits.
    pub fn new(size: usize) -> Self {
        Self { size, ops: vec![] }
    }

    /// Number of qubits the circuit acts on.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Operations in application order.
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    /// Qubits measured by this circuit, in first-measured order.
    pub fn measured(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for op in &self.ops {
            if let Operation::Measure(q) = op {
                if !out.contains(q) {
                    out.push(*q);
                }
            }
        }
        out
    }

    fn check(&self, qubit: usize) -> KernelResult<()> {
        if qubit >= self.size {
            return Err(KernelError::QubitOutOfRange {
                qubit,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Append a gate.
    pub fn gate(&mut self, gate: Gate, qubit: usize) -> KernelResult<&mut Self> {
        self.check(qubit)?;
        self.ops.push(Operation::Gate(gate, qubit));
        Ok(self)
    }

    /// Apply Hadamard.
    pub fn h(&mut self, qubit: usize) -> KernelResult<&mut Self> {
        self.gate(Gate::H, qubit)
    }

    /// Apply Pauli-X.
    pub fn x(&mut self, qubit: usize) -> KernelResult<&mut Self> {
        self.gate(Gate::X, qubit)
    }

    /// Apply Pauli-Z.
    pub fn z(&mut self, qubit: usize) -> KernelResult<&mut Self> {
        self.gate(Gate::Z, qubit)
    }

    /// Apply S†.
    pub fn sdg(&mut self, qubit: usize) -> KernelResult<&mut Self> {
        self.gate(Gate::Sdg, qubit)
    }

    /// Measure a qubit in the computational basis.
    pub fn measure(&mut self, qubit: usize) -> KernelResult<&mut Self> {
        self.check(qubit)?;
        self.ops.push(Operation::Measure(qubit));
        Ok(self)
    }
}
