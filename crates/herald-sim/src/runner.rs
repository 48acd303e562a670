//! Repeated entanglement trials and their aggregate report.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use herald_kernel::{Circuit, RunOutcome, VirtualTime, ps_to_seconds};

use crate::analytical::AnalyticalEstimate;
use crate::config::{RunConfig, SimConfig};
use crate::detector::DetectorCounters;
use crate::error::{SimError, SimResult};
use crate::metrics::SimMetrics;
use crate::network::Network;
use crate::node::Node;

/// Measurement basis of the fidelity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Basis {
    X,
    Y,
    Z,
}

impl Basis {
    fn next(self) -> Self {
        match self {
            Self::X => Self::Y,
            Self::Y => Self::Z,
            Self::Z => Self::X,
        }
    }

    /// Rotation and joint measurement of two qubits in this basis.
    fn circuit(self) -> SimResult<Circuit> {
        let mut circuit = Circuit::new(2);
        for q in 0..2 {
            match self {
                Self::X => {
                    circuit.h(q)?;
                }
                Self::Y => {
                    circuit.sdg(q)?.h(q)?;
                }
                Self::Z => {}
            }
        }
        circuit.measure(0)?.measure(1)?;
        Ok(circuit)
    }
}

/// How a trial ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    Entangled,
    StopTime,
    EventLimit,
    /// The event queue ran dry without both ends entangled.
    Stalled,
}

/// Result of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub index: u32,
    pub outcome: TrialOutcome,
    /// Attempts that ended RAW on the first end node.
    pub attempts: u64,
    /// Virtual time spent, in ps.
    pub elapsed: VirtualTime,
    /// Herald sign of the successful attempt.
    pub sign: Option<u8>,
    /// Parity (+1 equal outcomes, −1 different) of the fidelity probe.
    pub parity: Option<(Basis, i8)>,
    /// Bell-diagonal fidelity of the first memory, when decoherence is modelled.
    pub memory_fidelity: Option<f64>,
}

/// Parity sums per basis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParityStats {
    pub sums: [i64; 3],
    pub counts: [u64; 3],
}

impl ParityStats {
    fn index(basis: Basis) -> usize {
        match basis {
            Basis::X => 0,
            Basis::Y => 1,
            Basis::Z => 2,
        }
    }

    pub fn add(&mut self, basis: Basis, parity: i8) {
        let i = Self::index(basis);
        self.sums[i] += i64::from(parity);
        self.counts[i] += 1;
    }

    pub fn expectation(&self, basis: Basis) -> Option<f64> {
        let i = Self::index(basis);
        (self.counts[i] > 0).then(|| self.sums[i] as f64 / self.counts[i] as f64)
    }

    /// Fidelity with psi+: `(1 + ⟨XX⟩ + ⟨YY⟩ − ⟨ZZ⟩) / 4`.
    pub fn fidelity(&self) -> Option<f64> {
        let x = self.expectation(Basis::X)?;
        let y = self.expectation(Basis::Y)?;
        let z = self.expectation(Basis::Z)?;
        Some((1.0 + x + y - z) / 4.0)
    }
}

/// Aggregate results of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub encoding: String,
    pub seed: u64,
    pub trials: Vec<TrialResult>,
    pub completed: u32,
    pub mean_attempts: f64,
    pub mean_time_s: f64,
    /// Attempts per completed trial → number of trials.
    pub attempts_histogram: BTreeMap<u64, u32>,
    /// Successful heralds with sign 0 (psi+) and 1 (psi−).
    pub sign_counts: [u64; 2],
    pub detector_counters: DetectorCounters,
    pub metrics: SimMetrics,
    pub parity: ParityStats,
    pub fidelity: Option<f64>,
    pub analytical: AnalyticalEstimate,
}

impl RunReport {
    fn new(config: &SimConfig, analytical: AnalyticalEstimate) -> Self {
        Self {
            encoding: config.encoding.kind.clone(),
            seed: config.run.seed,
            trials: Vec::new(),
            completed: 0,
            mean_attempts: 0.0,
            mean_time_s: 0.0,
            attempts_histogram: BTreeMap::new(),
            sign_counts: [0; 2],
            detector_counters: DetectorCounters::default(),
            metrics: SimMetrics::default(),
            parity: ParityStats::default(),
            fidelity: None,
            analytical,
        }
    }

    fn push(&mut self, trial: TrialResult) {
        if trial.outcome == TrialOutcome::Entangled {
            self.completed += 1;
            *self.attempts_histogram.entry(trial.attempts).or_insert(0) += 1;
            if let Some(sign) = trial.sign {
                self.sign_counts[usize::from(sign.min(1))] += 1;
            }
            if let Some((basis, parity)) = trial.parity {
                self.parity.add(basis, parity);
            }
        }
        self.trials.push(trial);
    }

    fn finish(&mut self) {
        let done: Vec<&TrialResult> = self
            .trials
            .iter()
            .filter(|t| t.outcome == TrialOutcome::Entangled)
            .collect();
        if !done.is_empty() {
            let n = done.len() as f64;
            self.mean_attempts = done.iter().map(|t| t.attempts as f64).sum::<f64>() / n;
            self.mean_time_s = done.iter().map(|t| ps_to_seconds(t.elapsed)).sum::<f64>() / n;
        }
        self.fidelity = self.parity.fidelity();
    }
}

/// Runs trials on one network, keeping attempt counters and random streams
/// across trials.
#[derive(Debug)]
pub struct TrialRunner {
    network: Network,
    config: SimConfig,
    basis: Basis,
    next_index: u32,
}

impl TrialRunner {
    pub fn new(config: SimConfig) -> SimResult<Self> {
        let network = Network::from_config(&config)?;
        Ok(Self {
            network,
            config,
            basis: Basis::Z,
            next_index: 0,
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    fn run_config(&self) -> &RunConfig {
        &self.config.run
    }

    /// Closed-form estimate for the configured hardware.
    pub fn analytical(&self) -> SimResult<AnalyticalEstimate> {
        let profile = self.config.encoding.profile()?;
        let end = self.network.end_node(0)?;
        let retrap = self.config.protocol.retrap(&profile);
        Ok(AnalyticalEstimate::new(
            self.config.memory.efficiency,
            1.0 - end.endpoint.qchannel.loss(),
            self.config.detector.efficiency,
            ps_to_seconds(retrap.delay),
            retrap.threshold,
            ps_to_seconds(profile.timing.emission_delay()),
        ))
    }

    /// Run one trial until both memories are entangled or a limit is hit.
    pub fn run_trial(&mut self) -> SimResult<TrialResult> {
        let index = self.next_index;
        self.next_index += 1;

        let start = self.network.timeline.now();
        self.network.start_trial()?;
        let event_limit = self.run_config().event_limit;
        let stop_time = self.run_config().stop_time;
        self.network.timeline.set_event_limit(event_limit);
        let run = match stop_time {
            Some(budget) => self.network.run_until(start + budget)?,
            None => {
                self.network.timeline.set_stop_time(None);
                self.network.run()?
            }
        };

        let entangled = self.network.world.all_entangled();
        let outcome = match run {
            _ if entangled => TrialOutcome::Entangled,
            RunOutcome::StopTime => TrialOutcome::StopTime,
            RunOutcome::EventLimit => TrialOutcome::EventLimit,
            RunOutcome::Halted | RunOutcome::Exhausted => TrialOutcome::Stalled,
        };

        let first = self.network.end_node(0)?;
        let attempts = first.endpoint.resources.raw_counter();
        let sign = first.protocol.psi_sign().filter(|_| entangled);
        let now = self.network.timeline.now();
        let elapsed = now - start;
        let first_id = self.network.end_ids()[0];
        let memory_fidelity = match self.network.world.node_mut(first_id).and_then(Node::as_end_mut) {
            Some(end) if entangled => end.endpoint.memory.bds_fidelity(now),
            _ => None,
        };

        let parity = if entangled && self.run_config().fidelity_probe {
            self.basis = self.basis.next();
            Some((self.basis, self.probe(self.basis)?))
        } else {
            None
        };

        match outcome {
            TrialOutcome::Entangled => info!(
                trial = index,
                attempts,
                seconds = ps_to_seconds(elapsed),
                "trial entangled"
            ),
            other => warn!(trial = index, attempts, ?other, "trial ended without entanglement"),
        }

        Ok(TrialResult {
            index,
            outcome,
            attempts,
            elapsed,
            sign,
            parity,
            memory_fidelity,
        })
    }

    /// Measure both memories in `basis` and return the parity.
    fn probe(&mut self, basis: Basis) -> SimResult<i8> {
        let circuit = basis.circuit()?;
        let [first, second] = self.network.end_ids();
        self.network.world.with_env(&mut self.network.timeline, |nodes, env| {
            let key = |nodes: &[Node], id: crate::event::NodeId| {
                nodes
                    .get(id.0)
                    .and_then(Node::as_end)
                    .map(|n| n.endpoint.memory.key())
                    .ok_or_else(|| SimError::UnknownNode(id.to_string()))
            };
            let keys = [key(nodes, first)?, key(nodes, second)?];
            let draw = match nodes.get_mut(first.0).and_then(Node::as_end_mut) {
                Some(end) => end.endpoint.rng.r#gen::<f64>(),
                None => return Err(SimError::UnknownNode(first.to_string())),
            };
            let outcome = env.qm.run_circuit(&circuit, &keys, draw)?;
            Ok(if outcome[&keys[0]] == outcome[&keys[1]] { 1 } else { -1 })
        })
    }

    /// Run the configured number of trials. `on_trial` sees every result
    /// as it completes.
    pub fn run(&mut self, mut on_trial: impl FnMut(&TrialResult)) -> SimResult<RunReport> {
        let mut report = RunReport::new(&self.config, self.analytical()?);
        for _ in 0..self.run_config().trials {
            let trial = self.run_trial()?;
            on_trial(&trial);
            report.push(trial);
        }

        report.metrics = self.network.world.metrics().clone();
        report.detector_counters = self.network.relay_node()?.bsm.detector_counters();
        report.finish();
        info!(
            completed = report.completed,
            mean_attempts = report.mean_attempts,
            mean_time_s = report.mean_time_s,
            "run finished"
        );
        Ok(report)
    }
}
