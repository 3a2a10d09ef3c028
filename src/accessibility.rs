use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use dashmap::DashMap;
use derive_builder::Builder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::{default_threads, ConfigError};
use crate::decay::DecayFunction;
use crate::graph::CompactGraph;
use crate::routing::tree::{Direction, ShortestPathTree};

#[derive(Debug, Error)]
pub enum AccessibilityError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("accessibility worker {worker} panicked: {message}")]
    WorkerPanicked { worker: usize, message: String },
    #[error("failed to spawn accessibility worker")]
    Spawn(#[from] std::io::Error),
    #[error("run was cancelled after {completed} of {total} origins")]
    Cancelled { completed: usize, total: usize },
}

/// Destinations of one kind, e.g. all schools. Only the cheapest access node within the cutoff
/// counts.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationGroup {
    pub name: String,
    pub access_nodes: Vec<usize>,
    pub weight: f64,
}

impl DestinationGroup {
    pub fn new(name: impl ToString, access_nodes: Vec<usize>, weight: f64) -> Self {
        DestinationGroup {
            name: name.to_string(),
            access_nodes,
            weight,
        }
    }
}

/// Flag to stop a running engine. Checked by the workers before they take the next origin.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationGroupSpec {
    pub access_nodes: Vec<usize>,
    pub weight: f64,
}

/// An accessibility run in its external form:
/// `{origins: [..], destinationGroups: {name: {accessNodes: [..], weight: ..}}, threads: ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityRequest {
    pub origins: Vec<usize>,
    pub destination_groups: BTreeMap<String, DestinationGroupSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
}

impl AccessibilityRequest {
    /// Builds the engine for this request and hands back the origins to run it on.
    pub fn into_engine(
        self,
        graph: Arc<CompactGraph>,
        decay: DecayFunction,
    ) -> Result<(AccessibilityEngine, Vec<usize>), ConfigError> {
        let destinations = self
            .destination_groups
            .into_iter()
            .map(|(name, spec)| DestinationGroup {
                name,
                access_nodes: spec.access_nodes,
                weight: spec.weight,
            })
            .collect();

        let mut builder = AccessibilityEngine::builder()
            .graph(graph)
            .decay(decay)
            .destinations(destinations);
        if let Some(threads) = self.threads {
            builder = builder.threads(threads);
        }
        Ok((builder.build()?, self.origins))
    }
}

/// Computes one decay weighted score per origin with a fixed pool of worker threads. The graph
/// is shared read only, every worker owns its own tree.
#[derive(Debug, Builder)]
#[builder(pattern = "owned", build_fn(skip))]
pub struct AccessibilityEngine {
    graph: Arc<CompactGraph>,
    decay: DecayFunction,
    destinations: Vec<DestinationGroup>,
    threads: usize,
    direction: Direction,
    #[builder(setter(strip_option))]
    cancel: Option<CancellationToken>,
}

impl AccessibilityEngineBuilder {
    // Custom build function, so that the destinations can be validated against the graph.
    pub fn build(self) -> Result<AccessibilityEngine, ConfigError> {
        let graph = self.graph.ok_or(ConfigError::MissingField("graph"))?;
        let decay = self.decay.ok_or(ConfigError::MissingField("decay"))?;
        let mut destinations = self.destinations.unwrap_or_default();
        let threads = self.threads.unwrap_or_else(default_threads);

        if threads == 0 {
            return Err(ConfigError::InvalidThreadCount);
        }
        if destinations.is_empty() {
            return Err(ConfigError::EmptyDestinations);
        }
        for group in &destinations {
            if group.access_nodes.is_empty() {
                return Err(ConfigError::EmptyAccessNodes(group.name.clone()));
            }
            if !group.weight.is_finite() || group.weight <= 0. {
                return Err(ConfigError::InvalidWeight {
                    group: group.name.clone(),
                    weight: group.weight,
                });
            }
            check_nodes(&graph, &group.access_nodes)?;
        }
        // fixed summation order
        destinations.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(AccessibilityEngine {
            graph,
            decay,
            destinations,
            threads,
            direction: self.direction.unwrap_or_default(),
            cancel: self.cancel.flatten(),
        })
    }
}

fn check_nodes(graph: &CompactGraph, nodes: &[usize]) -> Result<(), ConfigError> {
    match nodes.iter().find(|&&n| !graph.contains_node(n)) {
        Some(&node) => Err(ConfigError::NodeOutOfRange {
            node,
            node_count: graph.node_count(),
        }),
        None => Ok(()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl AccessibilityEngine {
    pub fn builder() -> AccessibilityEngineBuilder {
        AccessibilityEngineBuilder::default()
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn destinations(&self) -> &[DestinationGroup] {
        &self.destinations
    }

    /// Scores all origins. Returns only after every worker has been joined. A panicking worker
    /// fails the whole run.
    #[tracing::instrument(level = "info", skip_all, fields(origins = origins.len(), threads = self.threads))]
    pub fn run(&self, origins: &[usize]) -> Result<BTreeMap<usize, f64>, AccessibilityError> {
        check_nodes(&self.graph, origins)?;
        self.process(origins, Self::score)
    }

    fn process<F>(
        &self,
        origins: &[usize],
        score: F,
    ) -> Result<BTreeMap<usize, f64>, AccessibilityError>
    where
        F: Fn(&Self, &mut ShortestPathTree, usize) -> f64 + Sync,
    {
        let start = Instant::now();
        let total = origins.len();
        let workers = self.threads.min(total).max(1);
        info!(
            "Computing accessibility for {} origins and {} destination groups with {} threads.",
            total,
            self.destinations.len(),
            workers
        );

        let queue = Mutex::new(origins.iter().copied().collect::<VecDeque<_>>());
        let results = DashMap::with_capacity(total);
        let completed = AtomicUsize::new(0);

        thread::scope(|scope| -> Result<(), AccessibilityError> {
            let mut handles = Vec::with_capacity(workers);
            for worker in 0..workers {
                let queue = &queue;
                let results = &results;
                let completed = &completed;
                let score = &score;
                let handle = thread::Builder::new()
                    .name(format!("accessibility-{worker}"))
                    .spawn_scoped(scope, move || {
                        let mut tree = ShortestPathTree::new(Arc::clone(&self.graph));
                        let mut processed = 0;
                        loop {
                            if self.is_cancelled() {
                                break;
                            }
                            let Some(origin) = queue.lock().pop_front() else {
                                break;
                            };
                            let value = score(self, &mut tree, origin);
                            results.insert(origin, value);
                            completed.fetch_add(1, Ordering::Relaxed);
                            processed += 1;
                        }
                        debug!("Worker {} finished after {} origins.", worker, processed);
                    })?;
                handles.push((worker, handle));
            }

            let mut failure = None;
            for (worker, handle) in handles {
                if let Err(payload) = handle.join() {
                    let message = panic_message(payload);
                    error!("Accessibility worker {} panicked: {}", worker, message);
                    failure.get_or_insert(AccessibilityError::WorkerPanicked { worker, message });
                }
            }
            failure.map_or(Ok(()), Err)
        })?;

        let completed = completed.into_inner();
        if completed < total {
            return Err(AccessibilityError::Cancelled { completed, total });
        }

        info!(
            "Finished accessibility for {} origins in {:?}.",
            total,
            start.elapsed()
        );
        Ok(results.into_iter().collect())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Score of a single origin: for every group the cheapest access node within the cutoff,
    /// decayed and weighted, summed over all groups. Groups out of reach add nothing.
    pub fn score(&self, tree: &mut ShortestPathTree, origin: usize) -> f64 {
        tree.calculate(
            origin,
            None,
            self.decay.tree_stop_criterion(),
            self.direction,
        );

        let mut sum = 0.;
        for group in &self.destinations {
            let cheapest = group
                .access_nodes
                .iter()
                .filter(|&&n| {
                    tree.is_settled(n) && self.decay.within_cutoff(tree.distance(n), tree.time(n))
                })
                .map(|&n| tree.cost(n))
                .min_by(f64::total_cmp);

            if let Some(cost) = cheapest {
                sum += self.decay.decay(cost) * group.weight;
            }
        }
        sum
    }
}
