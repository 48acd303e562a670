//! Simulation configuration.
//!
//! Supports loading configuration from:
//! 1. Configuration files (YAML)
//! 2. Environment variables (with HERALD_ prefix)
//!
//! Configuration precedence (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use herald_kernel::{VirtualTime, period_ps};

use crate::channel::{QuantumChannelParams, propagation_delay};
use crate::detector::DetectorParams;
use crate::encoding::{EncodingKind, EncodingProfile};
use crate::error::{SimError, SimResult};
use crate::memory::MemoryParams;
use crate::protocol::RetrapPolicy;
use crate::protocol::generation::DEFAULT_ATOM_SURVIVAL;

/// Complete simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Node names and links
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Memory hardware on both end nodes
    #[serde(default)]
    pub memory: MemoryParams,

    /// Both BSM detectors
    #[serde(default)]
    pub detector: DetectorParams,

    /// Photon encoding and emitter timing
    #[serde(default)]
    pub encoding: EncodingConfig,

    /// Generation protocol behaviour
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Trial loop
    #[serde(default)]
    pub run: RunConfig,
}

/// Two end nodes linked through one BSM node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// End node names
    #[serde(default = "default_end_nodes")]
    pub end_nodes: [String; 2],

    /// BSM node name
    #[serde(default = "default_middle")]
    pub middle: String,

    /// Fibre length from each end node to the BSM node, in metres
    #[serde(default = "default_distances")]
    pub distances: [f64; 2],

    /// Fibre attenuation in dB/m
    #[serde(default = "default_attenuation")]
    pub attenuation: f64,

    /// Quantum channel slot rate in Hz
    #[serde(default = "default_channel_frequency")]
    pub channel_frequency: f64,

    /// Classical link length in metres
    #[serde(default = "default_classical_distance")]
    pub classical_distance: f64,

    /// Fixed classical delay in ps; overrides the fibre propagation delay
    #[serde(default = "default_classical_delay")]
    pub classical_delay: Option<VirtualTime>,
}

/// Encoding selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// One of time_bin, yb_time_bin, yb1389, yb556
    #[serde(default = "default_encoding_kind")]
    pub kind: String,

    /// Override the preset raw fidelity of heralded pairs
    #[serde(default)]
    pub raw_fidelity: Option<f64>,
}

/// Generation protocol settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Restart automatically after a failed attempt
    #[serde(default = "default_true", rename = "loop")]
    pub looping: bool,

    /// Attempts between atom reloads
    #[serde(default = "default_retrap_threshold")]
    pub retrap_threshold: u32,

    /// Reload delay in ps; defaults to the encoding preset
    #[serde(default)]
    pub retrap_delay: Option<VirtualTime>,

    /// Probability the atom survives one emission
    #[serde(default = "default_atom_survival")]
    pub atom_survival: f64,
}

/// Trial loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of entangled pairs to generate
    #[serde(default = "default_trials")]
    pub trials: u32,

    /// Base seed; the nodes use seed, seed + 1 and seed + 2
    #[serde(default)]
    pub seed: u64,

    /// Per-trial virtual time budget in ps
    #[serde(default)]
    pub stop_time: Option<VirtualTime>,

    /// Per-trial event budget
    #[serde(default)]
    pub event_limit: Option<u64>,

    /// Measure each pair in a rotating basis to estimate fidelity
    #[serde(default = "default_true")]
    pub fidelity_probe: bool,
}

// Default value functions
fn default_end_nodes() -> [String; 2] {
    ["node1".to_string(), "node2".to_string()]
}

fn default_middle() -> String {
    "bsm_node".to_string()
}

fn default_distances() -> [f64; 2] {
    [1000.0, 1000.0]
}

fn default_attenuation() -> f64 {
    0.0003
}

fn default_channel_frequency() -> f64 {
    8e7
}

fn default_classical_distance() -> f64 {
    1000.0
}

fn default_classical_delay() -> Option<VirtualTime> {
    Some(100_000_000)
}

fn default_encoding_kind() -> String {
    EncodingKind::YbTimeBin.as_str().to_string()
}

fn default_true() -> bool {
    true
}

fn default_retrap_threshold() -> u32 {
    128
}

fn default_atom_survival() -> f64 {
    DEFAULT_ATOM_SURVIVAL
}

fn default_trials() -> u32 {
    100
}

impl Default for TopologyConfig {
    fn default() -> Self {
        TopologyConfig {
            end_nodes: default_end_nodes(),
            middle: default_middle(),
            distances: default_distances(),
            attenuation: default_attenuation(),
            channel_frequency: default_channel_frequency(),
            classical_distance: default_classical_distance(),
            classical_delay: default_classical_delay(),
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        EncodingConfig {
            kind: default_encoding_kind(),
            raw_fidelity: None,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            looping: true,
            retrap_threshold: default_retrap_threshold(),
            retrap_delay: None,
            atom_survival: default_atom_survival(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            trials: default_trials(),
            seed: 0,
            stop_time: None,
            event_limit: None,
            fidelity_probe: true,
        }
    }
}

impl TopologyConfig {
    /// Quantum channel parameters for end node `index`.
    pub fn quantum_channel(&self, index: usize) -> QuantumChannelParams {
        QuantumChannelParams {
            distance: self.distances[index],
            attenuation: self.attenuation,
            frequency: self.channel_frequency,
        }
    }
}

impl EncodingConfig {
    /// Resolve the preset, applying overrides.
    pub fn profile(&self) -> SimResult<EncodingProfile> {
        let mut profile = EncodingKind::from_str(&self.kind)?.profile();
        if let Some(fidelity) = self.raw_fidelity {
            profile.encoding.raw_fidelity = fidelity;
        }
        Ok(profile)
    }
}

impl ProtocolConfig {
    /// Retrap policy, falling back to the encoding's reload delay.
    pub fn retrap(&self, profile: &EncodingProfile) -> RetrapPolicy {
        RetrapPolicy {
            threshold: self.retrap_threshold,
            delay: self.retrap_delay.unwrap_or(profile.retrap_delay),
        }
    }
}

impl SimConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: SimConfig = serde_yaml_ng::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with the following precedence:
    /// 1. Load from file if provided
    /// 2. Apply environment variable overrides
    pub fn load(config_file: Option<&Path>) -> SimResult<Self> {
        let config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => SimConfig::default(),
        };
        let config = config.merge_env();
        config.validate()?;
        Ok(config)
    }

    /// Merge `HERALD_*` environment variables into this configuration.
    pub fn merge_env(self) -> Self {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    /// Merge overrides from `lookup`. Only keys that are present and parse
    /// override the current values.
    pub fn merge_vars<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        // Run
        if let Some(v) = parsed(&lookup, "HERALD_TRIALS") {
            self.run.trials = v;
        }
        if let Some(v) = parsed(&lookup, "HERALD_SEED") {
            self.run.seed = v;
        }
        if let Some(v) = parsed(&lookup, "HERALD_STOP_TIME") {
            self.run.stop_time = Some(v);
        }

        // Hardware
        if let Some(v) = parsed(&lookup, "HERALD_MEMORY_EFFICIENCY") {
            self.memory.efficiency = v;
        }
        if let Some(v) = parsed(&lookup, "HERALD_MEMORY_FREQUENCY") {
            self.memory.frequency = v;
        }
        if let Some(v) = parsed(&lookup, "HERALD_DETECTOR_EFFICIENCY") {
            self.detector.efficiency = v;
        }
        if let Some(v) = parsed(&lookup, "HERALD_DARK_COUNT") {
            self.detector.dark_count = v;
        }

        // Topology
        if let Some(v) = parsed::<f64>(&lookup, "HERALD_DISTANCE") {
            self.topology.distances = [v, v];
        }
        if let Some(v) = parsed(&lookup, "HERALD_ATTENUATION") {
            self.topology.attenuation = v;
        }

        // Protocol and encoding
        if let Some(v) = parsed(&lookup, "HERALD_RETRAP") {
            self.protocol.retrap_threshold = v;
        }
        if let Some(v) = lookup("HERALD_ENCODING") {
            self.encoding.kind = v;
        }

        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> SimResult<()> {
        let topo = &self.topology;
        let [a, b] = &topo.end_nodes;
        if a.is_empty() || b.is_empty() || topo.middle.is_empty() {
            return Err(SimError::Config("node names must not be empty".to_string()));
        }
        if a == b || *a == topo.middle || *b == topo.middle {
            return Err(SimError::Config(format!(
                "node names must be distinct, got {a}, {b} and {}",
                topo.middle
            )));
        }
        if topo.distances.iter().any(|d| *d < 0.0) || topo.classical_distance < 0.0 {
            return Err(SimError::Config("distances must be non-negative".to_string()));
        }
        if topo.attenuation < 0.0 {
            return Err(SimError::Config(format!(
                "attenuation must be non-negative, got {}",
                topo.attenuation
            )));
        }
        let period = period_ps(topo.channel_frequency).ok_or_else(|| {
            SimError::Config(format!(
                "channel_frequency must be positive, got {}",
                topo.channel_frequency
            ))
        })?;
        // emission slots of both ends must line up at the BSM
        let [d0, d1] = topo.distances.map(propagation_delay);
        if period > 0 && d0.abs_diff(d1) % period != 0 {
            return Err(SimError::Config(format!(
                "quantum channel delays {d0} and {d1} differ by a non-multiple of the {period} ps slot"
            )));
        }

        self.memory.validate()?;

        let det = &self.detector;
        if !(0.0..=1.0).contains(&det.efficiency) {
            return Err(SimError::Config(format!(
                "detector efficiency must be in [0, 1], got {}",
                det.efficiency
            )));
        }
        if det.dark_count < 0.0 || det.count_rate < 0.0 {
            return Err(SimError::Config(
                "detector dark_count and count_rate must be non-negative".to_string(),
            ));
        }

        let profile = self.encoding.profile()?;
        if !(0.0..=1.0).contains(&profile.encoding.raw_fidelity) {
            return Err(SimError::Config(format!(
                "raw_fidelity must be in [0, 1], got {}",
                profile.encoding.raw_fidelity
            )));
        }

        if self.protocol.retrap_threshold == 0 {
            return Err(SimError::Config("retrap_threshold must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.protocol.atom_survival) {
            return Err(SimError::Config(format!(
                "atom_survival must be in [0, 1], got {}",
                self.protocol.atom_survival
            )));
        }
        if self.run.trials == 0 {
            return Err(SimError::Config("trials must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.topology.end_nodes, ["node1", "node2"]);
        assert_eq!(config.memory.efficiency, 0.5);
        assert_eq!(config.detector.efficiency, 0.85);
        assert_eq!(config.detector.dark_count, 11.0);
        assert_eq!(config.protocol.retrap_threshold, 128);
        assert_eq!(config.encoding.kind, "yb_time_bin");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "memory:\n  efficiency: 0.25\nencoding:\n  kind: time_bin\nprotocol:\n  loop: false\n";
        let config: SimConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.memory.efficiency, 0.25);
        assert_eq!(config.memory.frequency, 2000.0);
        assert!(!config.protocol.looping);
        assert_eq!(config.topology.classical_delay, Some(100_000_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unsupported_encoding_is_fatal() {
        let mut config = SimConfig::default();
        config.encoding.kind = "polarization".to_string();
        assert!(matches!(config.validate(), Err(SimError::UnsupportedEncoding(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: FxHashMap<&str, &str> = [
            ("HERALD_TRIALS", "7"),
            ("HERALD_MEMORY_EFFICIENCY", "0.1"),
            ("HERALD_DARK_COUNT", "not-a-number"),
            ("HERALD_ENCODING", "yb556"),
        ]
        .into_iter()
        .collect();
        let config = SimConfig::default().merge_vars(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.run.trials, 7);
        assert_eq!(config.memory.efficiency, 0.1);
        assert_eq!(config.detector.dark_count, 11.0);
        assert_eq!(config.encoding.kind, "yb556");
    }

    #[test]
    fn test_validation_errors() {
        let mut config = SimConfig::default();
        config.topology.end_nodes = ["a".into(), "a".into()];
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.topology.distances = [1000.0, 1001.0];
        assert!(matches!(config.validate(), Err(SimError::Config(_))));

        let mut config = SimConfig::default();
        config.protocol.retrap_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retrap_falls_back_to_preset() {
        let config = SimConfig::default();
        let profile = config.encoding.profile().unwrap();
        assert_eq!(config.protocol.retrap(&profile).delay, 500_000_000_000);

        let mut config = SimConfig::default();
        config.protocol.retrap_delay = Some(0);
        assert_eq!(config.protocol.retrap(&profile).delay, 0);
    }
}
