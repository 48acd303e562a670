//! Error types for the sim crate.
//!
//! Physical losses (photon loss, dead time, atom loss, badly timed triggers)
//! are never errors; they are counted and drive the retry path. Everything
//! here aborts a run.

use thiserror::Error;

/// Errors produced while building or running a heralding simulation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SimError {
    /// A protocol invariant was broken; indicates a modelling bug.
    #[error("protocol violation in {component}: {reason}")]
    ProtocolViolation {
        /// Component that detected the violation.
        component: String,
        /// What went wrong.
        reason: String,
    },

    /// A message arrived where none is expected.
    #[error("{component} received unexpected {kind} message from {src}")]
    UnexpectedMessage {
        /// Receiving component.
        component: String,
        /// Message type.
        kind: String,
        /// Sending node.
        src: String,
    },

    /// The requested photon encoding is not modelled.
    #[error("unsupported encoding '{0}' (expected time_bin, yb1389 or yb556)")]
    UnsupportedEncoding(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No node with this name exists in the network.
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// A node has no channel towards the named destination.
    #[error("node '{src}' has no {kind} channel to '{dst}'")]
    MissingChannel {
        /// Sending node.
        src: String,
        /// Destination node.
        dst: String,
        /// "quantum" or "classical".
        kind: &'static str,
    },

    /// Timeline or state-manager failure.
    #[error("kernel error: {0}")]
    Kernel(#[from] herald_kernel::KernelError),

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing a YAML configuration failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl SimError {
    /// Shorthand for a [`SimError::ProtocolViolation`].
    pub fn violation(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            component: component.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for simulation operations.
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::violation("node1.eg", "second emission in round 1");
        assert_eq!(
            err.to_string(),
            "protocol violation in node1.eg: second emission in round 1"
        );

        let err = SimError::UnsupportedEncoding("polarization".into());
        assert_eq!(
            err.to_string(),
            "unsupported encoding 'polarization' (expected time_bin, yb1389 or yb556)"
        );

        let err = SimError::MissingChannel {
            src: "node1".into(),
            dst: "bsm_node".into(),
            kind: "quantum",
        };
        assert_eq!(err.to_string(), "node 'node1' has no quantum channel to 'bsm_node'");
    }

    #[test]
    fn test_kernel_error_converts() {
        let err: SimError = herald_kernel::KernelError::InvalidDraw(2.0).into();
        assert!(matches!(err, SimError::Kernel(_)));
    }
}
