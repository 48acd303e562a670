//! Photon encodings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use herald_kernel::VirtualTime;

use crate::error::SimError;
use crate::protocol::timing::{AtomSequence, EmissionTiming, FixedDelay};

/// Time-bin encoding carried by every photon of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    /// Encoding name.
    pub name: String,
    /// Separation between early and late bins in picoseconds.
    pub bin_separation: VirtualTime,
    /// Fidelity of the Bell state produced by a heralded pair.
    pub raw_fidelity: f64,
}

/// Supported emitter/encoding combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingKind {
    /// Generic time-bin emitter with a 50 ns bin separation.
    TimeBin,
    /// Yb time-bin preset with a fixed preparation delay.
    YbTimeBin,
    /// Yb atom on the 1389 nm line with a full emission sequence.
    Yb1389,
    /// Yb atom on the 556 nm line with a full emission sequence.
    Yb556,
}

/// Everything a protocol needs to know about an encoding.
#[derive(Debug)]
pub struct EncodingProfile {
    pub encoding: Encoding,
    pub timing: Box<dyn EmissionTiming>,
    /// Reload delay for the atom; zero for emitters that never reload.
    pub retrap_delay: VirtualTime,
}

impl EncodingKind {
    /// Configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeBin => "time_bin",
            Self::YbTimeBin => "yb_time_bin",
            Self::Yb1389 => "yb1389",
            Self::Yb556 => "yb556",
        }
    }

    /// Preset encoding, timing model and reload delay.
    pub fn profile(&self) -> EncodingProfile {
        const RETRAP: VirtualTime = 500_000_000_000;
        match self {
            Self::TimeBin => EncodingProfile {
                encoding: Encoding {
                    name: "time_bin".into(),
                    bin_separation: 50_000,
                    raw_fidelity: 1.0,
                },
                timing: Box::new(FixedDelay { delay: 0 }),
                retrap_delay: 0,
            },
            Self::YbTimeBin => EncodingProfile {
                encoding: Encoding {
                    name: "yb_time_bin".into(),
                    bin_separation: 1_900_000,
                    raw_fidelity: 1.0,
                },
                timing: Box::new(FixedDelay {
                    delay: 1_456_700_000,
                }),
                retrap_delay: RETRAP,
            },
            Self::Yb1389 | Self::Yb556 => {
                let sequence = if *self == Self::Yb1389 {
                    AtomSequence::yb_1389()
                } else {
                    AtomSequence::yb_556()
                };
                EncodingProfile {
                    encoding: Encoding {
                        name: "yb_time_bin".into(),
                        bin_separation: sequence.bin_separation(),
                        raw_fidelity: 1.0,
                    },
                    timing: Box::new(sequence),
                    retrap_delay: RETRAP,
                }
            }
        }
    }
}

impl fmt::Display for EncodingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncodingKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "time_bin" | "timebin" => Ok(Self::TimeBin),
            "yb_time_bin" => Ok(Self::YbTimeBin),
            "yb1389" | "yb_1389" => Ok(Self::Yb1389),
            "yb556" | "yb_556" => Ok(Self::Yb556),
            other => Err(SimError::UnsupportedEncoding(other.to_string())),
        }
    }
}
