//! The simulated network: nodes, shared quantum state and the event loop.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use herald_kernel::{EventHandler, QuantumManager, RunOutcome, Timeline, VirtualTime};

use crate::bsm::TimeBinBsm;
use crate::channel::{ClassicalChannel, QuantumChannel};
use crate::config::SimConfig;
use crate::error::{SimError, SimResult};
use crate::event::{Env, NodeId, SimEvent};
use crate::memory::Memory;
use crate::metrics::{MetricsSink, SimMetrics};
use crate::node::{EndNode, Endpoint, Node, RelayNode};
use crate::protocol::{GenerationConfig, GenerationProtocol, Peer, RelayProtocol};
use crate::resource::ResourceManager;

/// Owns every node and routes timeline events to them.
#[derive(Debug)]
pub struct World<M: MetricsSink = SimMetrics> {
    nodes: Vec<Node>,
    names: FxHashMap<String, NodeId>,
    qm: QuantumManager,
    metrics: M,
}

impl<M: MetricsSink> World<M> {
    pub fn new(metrics: M) -> Self {
        Self {
            nodes: Vec::new(),
            names: FxHashMap::default(),
            qm: QuantumManager::new(),
            metrics,
        }
    }

    /// Reserve the id the next added node will get.
    pub fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len())
    }

    pub fn add_node(&mut self, node: Node) -> SimResult<NodeId> {
        let id = self.next_id();
        if self.names.insert(node.name().to_string(), id).is_some() {
            return Err(SimError::Config(format!("duplicate node name '{}'", node.name())));
        }
        self.nodes.push(node);
        Ok(id)
    }

    pub fn node_id(&self, name: &str) -> SimResult<NodeId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownNode(name.to_string()))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn end_nodes(&self) -> impl Iterator<Item = &EndNode> {
        self.nodes.iter().filter_map(Node::as_end)
    }

    pub fn qm(&self) -> &QuantumManager {
        &self.qm
    }

    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut M {
        &mut self.metrics
    }

    /// Whether every end node holds a heralded pair.
    pub fn all_entangled(&self) -> bool {
        let mut ends = self.end_nodes().peekable();
        ends.peek().is_some() && ends.all(EndNode::is_entangled)
    }

    /// Run `f` with the environment for the given timeline.
    pub fn with_env<T>(
        &mut self,
        timeline: &mut Timeline<SimEvent>,
        f: impl FnOnce(&mut [Node], &mut Env<'_>) -> SimResult<T>,
    ) -> SimResult<T> {
        let mut env = Env {
            timeline,
            qm: &mut self.qm,
            metrics: &mut self.metrics,
        };
        f(&mut self.nodes, &mut env)
    }

    fn cancel_dark_counts(&mut self, timeline: &mut Timeline<SimEvent>) {
        for node in self.nodes.iter_mut().filter_map(Node::as_relay_mut) {
            node.bsm.cancel_dark_counts(timeline);
        }
    }
}

impl<M: MetricsSink> EventHandler<SimEvent> for World<M> {
    type Error = SimError;

    fn handle(&mut self, timeline: &mut Timeline<SimEvent>, event: SimEvent) -> SimResult<()> {
        let id = event.node();
        let node = self
            .nodes
            .get_mut(id.0)
            .ok_or_else(|| SimError::UnknownNode(id.to_string()))?;
        let mut env = Env {
            timeline: &mut *timeline,
            qm: &mut self.qm,
            metrics: &mut self.metrics,
        };
        let outcome = node.handle(event, &mut env)?;

        if outcome.is_some_and(|o| o.is_entangled()) && self.all_entangled() {
            info!(now = timeline.now(), "all end nodes entangled");
            self.cancel_dark_counts(timeline);
            timeline.halt();
        }
        Ok(())
    }
}

/// A timeline together with the world it drives.
#[derive(Debug)]
pub struct Network<M: MetricsSink = SimMetrics> {
    pub timeline: Timeline<SimEvent>,
    pub world: World<M>,
    end_ids: [NodeId; 2],
    middle_id: NodeId,
}

impl Network<SimMetrics> {
    /// Build the two-node topology described by `config`.
    pub fn from_config(config: &SimConfig) -> SimResult<Self> {
        Self::with_metrics(config, SimMetrics::default())
    }
}

impl<M: MetricsSink> Network<M> {
    /// Build the network reporting to a custom metrics sink.
    pub fn with_metrics(config: &SimConfig, metrics: M) -> SimResult<Self> {
        config.validate()?;
        let topo = &config.topology;
        let mut world = World::new(metrics);

        let end_ids = [NodeId(0), NodeId(1)];
        let middle_id = NodeId(2);
        let names = [
            topo.end_nodes[0].as_str(),
            topo.end_nodes[1].as_str(),
            topo.middle.as_str(),
        ];
        let ids = [end_ids[0], end_ids[1], middle_id];

        let classical = |src: &str, dst: usize| {
            ClassicalChannel::new(
                format!("cc_{src}_{}", names[dst]),
                names[dst],
                ids[dst],
                topo.classical_distance,
                topo.classical_delay,
            )
        };
        let links = |own: usize| -> FxHashMap<String, ClassicalChannel> {
            (0..3)
                .filter(|other| *other != own)
                .map(|other| (names[other].to_string(), classical(names[own], other)))
                .collect()
        };

        let bsm_profile = config.encoding.profile()?;
        let bsm = TimeBinBsm::new(
            format!("{}.bsm", topo.middle),
            middle_id,
            bsm_profile.encoding,
            [config.detector.clone(), config.detector.clone()],
        )?;
        let resolution = bsm.resolution();

        for (index, own) in end_ids.iter().enumerate() {
            let name = names[index];
            let other = names[1 - index];
            let profile = config.encoding.profile()?;
            let memory = Memory::new(
                format!("{name}.memo"),
                *own,
                config.memory.clone(),
                profile.encoding.clone(),
                &mut world.qm,
            );
            let qchannel = QuantumChannel::new(
                format!("qc_{name}_{}", topo.middle),
                topo.middle.clone(),
                middle_id,
                topo.quantum_channel(index),
            )?;
            let retrap = config.protocol.retrap(&profile);
            let mut protocol = GenerationProtocol::new(
                format!("{name}.eg"),
                topo.middle.clone(),
                GenerationConfig {
                    encoding: profile.encoding,
                    timing: profile.timing,
                    retrap,
                    atom_survival: config.protocol.atom_survival,
                    resolution,
                    looping: config.protocol.looping,
                },
            );
            protocol.set_others(
                name,
                Peer {
                    node: other.to_string(),
                    protocol: format!("{other}.eg"),
                    memory: format!("{other}.memo"),
                },
            )?;
            let endpoint = Endpoint {
                name: name.to_string(),
                id: *own,
                memory,
                qchannel,
                cchannels: links(index),
                resources: ResourceManager::new(),
                rng: StdRng::seed_from_u64(config.run.seed.wrapping_add(index as u64)),
            };
            let id = world.add_node(Node::End(Box::new(EndNode { endpoint, protocol })))?;
            debug_assert_eq!(id, *own);
        }

        let mut relay = RelayProtocol::new(format!("{}.relay", topo.middle));
        for name in &topo.end_nodes {
            relay.add_end(name.clone(), format!("{name}.eg"));
        }
        world.add_node(Node::Relay(Box::new(RelayNode {
            name: topo.middle.clone(),
            id: middle_id,
            bsm,
            relay,
            cchannels: links(2),
            rng: StdRng::seed_from_u64(config.run.seed.wrapping_add(2)),
        })))?;

        info!(
            encoding = %config.encoding.kind,
            resolution,
            seed = config.run.seed,
            "network built"
        );
        Ok(Self {
            timeline: Timeline::new(),
            world,
            end_ids,
            middle_id,
        })
    }

    pub fn end_ids(&self) -> [NodeId; 2] {
        self.end_ids
    }

    pub fn middle_id(&self) -> NodeId {
        self.middle_id
    }

    pub fn end_node(&self, index: usize) -> SimResult<&EndNode> {
        let id = self.end_ids[index];
        self.world
            .node(id)
            .and_then(Node::as_end)
            .ok_or_else(|| SimError::UnknownNode(id.to_string()))
    }

    pub fn relay_node(&self) -> SimResult<&RelayNode> {
        self.world
            .node(self.middle_id)
            .and_then(Node::as_relay)
            .ok_or_else(|| SimError::UnknownNode(self.middle_id.to_string()))
    }

    /// Drop leftover events, reset devices and protocols for a new trial and
    /// start both end nodes. Attempt counters survive across trials.
    pub fn start_trial(&mut self) -> SimResult<()> {
        let end_ids = self.end_ids;
        let middle = self.middle_id;
        self.timeline.clear();
        self.world.with_env(&mut self.timeline, |nodes, env| {
            if let Some(relay) = nodes.get_mut(middle.0).and_then(Node::as_relay_mut) {
                relay.bsm.cancel_dark_counts(env.timeline);
                relay.bsm.init();
                relay.bsm.arm_dark_counts(&mut relay.rng, env)?;
            }
            for id in end_ids {
                let Some(end) = nodes.get_mut(id.0).and_then(Node::as_end_mut) else {
                    return Err(SimError::UnknownNode(id.to_string()));
                };
                end.protocol.clear_attempt(env);
                end.endpoint.qchannel.clear_reservations();
                end.endpoint.resources.reset_counters();
                end.endpoint.memory.reset(env)?;
            }
            for id in end_ids {
                if let Some(end) = nodes.get_mut(id.0).and_then(Node::as_end_mut) {
                    end.start(env)?;
                }
            }
            Ok(())
        })?;
        debug!(now = self.timeline.now(), "trial started");
        Ok(())
    }

    /// Process events until both end nodes are entangled or a limit is hit.
    pub fn run(&mut self) -> SimResult<RunOutcome> {
        self.timeline.run(&mut self.world)
    }

    /// Like [`run`](Self::run) with a stop time.
    pub fn run_until(&mut self, stop_time: VirtualTime) -> SimResult<RunOutcome> {
        self.timeline.run_until(stop_time, &mut self.world)
    }
}
