//! Photons in flight.

use herald_kernel::QuantumKey;

use crate::encoding::Encoding;

/// A single photon travelling from a memory to the BSM.
///
/// The photon shares its quantum state key with the emitting memory, so
/// measuring the photon at the BSM measures the memory qubit.
#[derive(Debug, Clone, PartialEq)]
pub struct Photon {
    /// Name of the emitting memory.
    pub location: String,
    /// Shared quantum state key.
    pub key: QuantumKey,
    /// Probability the photon never reaches a detector.
    pub loss: f64,
    pub encoding: Encoding,
}

impl Photon {
    /// Create a lossless photon.
    pub fn new(location: impl Into<String>, key: QuantumKey, encoding: Encoding) -> Self {
        Self {
            location: location.into(),
            key,
            loss: 0.0,
            encoding,
        }
    }

    /// Compose an extra independent loss with the accumulated one.
    pub fn add_loss(&mut self, loss: f64) {
        let loss = loss.clamp(0.0, 1.0);
        self.loss = 1.0 - (1.0 - self.loss) * (1.0 - loss);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_composes() {
        let encoding = crate::encoding::EncodingKind::TimeBin.profile().encoding;
        let mut photon = Photon::new("node1.memo", QuantumKey::from_raw(0), encoding);
        photon.add_loss(0.5);
        photon.add_loss(0.5);
        assert!((photon.loss - 0.75).abs() < 1e-12);
        photon.add_loss(0.0);
        assert!((photon.loss - 0.75).abs() < 1e-12);
        photon.add_loss(1.0);
        assert!((photon.loss - 1.0).abs() < 1e-12);
    }
}
