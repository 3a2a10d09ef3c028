pub mod matrix;

use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::Itertools;
use nohash_hasher::IntSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::corridor::matrix::DistanceMatrix;
use crate::graph::CompactGraph;
use crate::routing::tree::{Direction, ShortestPathTree, StopCriterion};

/// Relative slack on all bound comparisons, so that paths exactly at the bound survive rounding.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum CorridorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("origin and destination are the same node")]
    SameOriginAndDestination,
    #[error("destination {destination} cannot be reached from origin {origin}")]
    Unreachable { origin: usize, destination: usize },
    #[error("shortest path has zero cost, detours are undefined")]
    ZeroCostShortestPath,
    #[error(
        "graph too dense for detour factor {detour_factor}: {candidates} candidate nodes exceed the limit of {max_dimension}"
    )]
    GraphTooDense {
        candidates: usize,
        max_dimension: usize,
        detour_factor: f64,
    },
}

/// `{originNode, destNode, detourFactor}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorridorRequest {
    #[serde(rename = "originNode")]
    pub origin: usize,
    #[serde(rename = "destNode")]
    pub destination: usize,
    #[serde(rename = "detourFactor")]
    pub detour_factor: f64,
}

impl CorridorRequest {
    pub fn new(origin: usize, destination: usize, detour_factor: f64) -> Self {
        CorridorRequest {
            origin,
            destination,
            detour_factor,
        }
    }

    fn validate(&self, graph: &CompactGraph) -> Result<(), CorridorError> {
        if !self.detour_factor.is_finite() || self.detour_factor < 1. {
            return Err(ConfigError::InvalidDetourFactor(self.detour_factor).into());
        }
        for node in [self.origin, self.destination] {
            if !graph.contains_node(node) {
                return Err(ConfigError::NodeOutOfRange {
                    node,
                    node_count: graph.node_count(),
                }
                .into());
            }
        }
        if self.origin == self.destination {
            return Err(CorridorError::SameOriginAndDestination);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorridorResult {
    pub shortest_cost: f64,
    pub requested_detour_factor: f64,
    /// Differs from the requested factor only if the candidate set had to be shrunk.
    pub effective_detour_factor: f64,
    pub bound_tightened: bool,
    pub candidate_count: usize,
    /// Smallest detour factor of any accepted path using the link, keyed by graph link index.
    pub link_detours: BTreeMap<usize, f64>,
}

impl CorridorResult {
    /// Same as `link_detours`, but keyed by the link index of the network the graph was built from.
    pub fn source_link_detours(&self, graph: &CompactGraph) -> BTreeMap<usize, f64> {
        self.link_detours
            .iter()
            .map(|(&link, &detour)| (graph.link_source_id(link), detour))
            .collect()
    }
}

/// Finds all links on paths between an origin and a destination that are at most a given factor
/// longer than the shortest path. Owns its trees, so repeated requests do not reallocate.
#[derive(Debug)]
pub struct CorridorEngine {
    graph: Arc<CompactGraph>,
    forward: ShortestPathTree,
    backward: ShortestPathTree,
    matrix_tree: ShortestPathTree,
    max_matrix_dimension: usize,
}

impl CorridorEngine {
    pub fn new(graph: Arc<CompactGraph>, max_matrix_dimension: usize) -> Result<Self, ConfigError> {
        if max_matrix_dimension == 0 {
            return Err(ConfigError::InvalidMatrixDimension);
        }
        Ok(CorridorEngine {
            forward: ShortestPathTree::new(Arc::clone(&graph)),
            backward: ShortestPathTree::new(Arc::clone(&graph)),
            matrix_tree: ShortestPathTree::new(Arc::clone(&graph)),
            graph,
            max_matrix_dimension,
        })
    }

    pub fn from_config(
        graph: Arc<CompactGraph>,
        config: &crate::config::Corridor,
    ) -> Result<Self, ConfigError> {
        Self::new(graph, config.max_matrix_dimension)
    }

    #[tracing::instrument(level = "info", skip(self), fields(origin = request.origin, destination = request.destination))]
    pub fn run(&mut self, request: &CorridorRequest) -> Result<CorridorResult, CorridorError> {
        request.validate(&self.graph)?;
        let CorridorRequest {
            origin,
            destination,
            detour_factor,
        } = *request;

        self.forward.calculate(
            origin,
            Some(destination),
            StopCriterion::Unbounded,
            Direction::Forward,
        );
        let shortest_cost = self.forward.cost(destination);
        if shortest_cost.is_infinite() {
            return Err(CorridorError::Unreachable {
                origin,
                destination,
            });
        }
        if shortest_cost <= 0. {
            return Err(CorridorError::ZeroCostShortestPath);
        }

        let requested_bound = detour_factor * shortest_cost;
        let search = StopCriterion::MaxCost(requested_bound * (1. + EPSILON));
        self.forward
            .calculate(origin, None, search, Direction::Forward);
        self.backward
            .calculate(destination, None, search, Direction::Reverse);

        let (candidates, bound, bound_tightened) =
            self.candidates(requested_bound, detour_factor)?;
        let effective_detour_factor = if bound_tightened {
            (bound / shortest_cost).clamp(1., detour_factor)
        } else {
            detour_factor
        };
        info!(
            "Shortest cost {}, {} candidate nodes for detour factor {}.",
            shortest_cost,
            candidates.len(),
            effective_detour_factor
        );

        let candidate_count = candidates.len();
        let matrix =
            DistanceMatrix::compute(&mut self.matrix_tree, candidates, bound * (1. + EPSILON));
        debug!("Computed {0}x{0} distance matrix.", matrix.dimension());

        let link_detours = self.link_detours(&matrix, shortest_cost, effective_detour_factor);
        info!("Corridor contains {} links.", link_detours.len());

        Ok(CorridorResult {
            shortest_cost,
            requested_detour_factor: detour_factor,
            effective_detour_factor,
            bound_tightened,
            candidate_count,
            link_detours,
        })
    }

    /// Nodes on some path within `bound`, sorted by index, together with the bound actually used
    /// and whether it had to be lowered. If there are too many nodes, the bound is lowered to the
    /// combined cost of the `max_matrix_dimension`-th cheapest node.
    fn candidates(
        &self,
        bound: f64,
        detour_factor: f64,
    ) -> Result<(Vec<usize>, f64, bool), CorridorError> {
        let limit = bound * (1. + EPSILON);
        let mut combined: Vec<(usize, f64)> = self
            .forward
            .settled_nodes()
            .iter()
            .map(|&n| (n, self.forward.cost(n) + self.backward.cost(n)))
            .filter(|&(_, cost)| cost <= limit)
            .collect();

        let mut bound = bound;
        let tightened_bound = combined.len() > self.max_matrix_dimension;
        if tightened_bound {
            let costs: Vec<f64> = combined
                .iter()
                .map(|&(_, cost)| cost)
                .sorted_by(f64::total_cmp)
                .collect();
            let tightened = costs[self.max_matrix_dimension - 1];

            combined.retain(|&(_, cost)| cost <= tightened);
            if combined.len() > self.max_matrix_dimension {
                return Err(CorridorError::GraphTooDense {
                    candidates: combined.len(),
                    max_dimension: self.max_matrix_dimension,
                    detour_factor,
                });
            }
            warn!(
                "{} candidate nodes exceed the limit of {}. Lowering the corridor bound from {} to {}.",
                costs.len(),
                self.max_matrix_dimension,
                bound,
                tightened
            );
            bound = tightened;
        }

        let nodes = combined.into_iter().map(|(n, _)| n).sorted_unstable().collect();
        Ok((nodes, bound, tightened_bound))
    }

    /// A link `i -> j` between candidates belongs to the corridor if the path `origin ~> i`
    /// along the forward tree, the link, then `j ~> destination` along the backward tree is
    /// within the detour factor and visits no node twice. Every link on that path is recorded
    /// with the smallest detour of any such path it is part of.
    fn link_detours(
        &self,
        matrix: &DistanceMatrix,
        shortest_cost: f64,
        detour_factor: f64,
    ) -> BTreeMap<usize, f64> {
        let limit = detour_factor * (1. + EPSILON);
        let mut accepted = Vec::new();

        for &from in matrix.nodes() {
            let head_chain = tree_chain(&self.forward, from);
            let head_nodes: IntSet<usize> = head_chain.iter().copied().collect();
            for (link, to) in self.graph.out_links(from) {
                if !matrix.contains(to) {
                    continue;
                }
                let cost = self.graph.link_cost(link);
                let total = self.forward.cost(from) + cost + self.backward.cost(to);
                if total / shortest_cost > limit {
                    continue;
                }
                let tail_chain = tree_chain(&self.backward, to);
                if tail_chain.iter().any(|node| head_nodes.contains(node)) {
                    continue;
                }
                let detour =
                    self.path_detour(matrix, &head_chain, &tail_chain, cost, shortest_cost);
                accepted.push((link, detour));
            }
        }
        debug!("{} links accepted before gap filling.", accepted.len());

        let mut detours = BTreeMap::new();
        for (link, detour) in accepted {
            record(&mut detours, link, detour);
            // the rest of the path through this link
            let mut node = self.graph.link_from(link);
            while let Some(l) = self.forward.coming_from_link(node) {
                record(&mut detours, l, detour);
                node = self.graph.link_from(l);
            }
            let mut node = self.graph.link_to(link);
            while let Some(l) = self.backward.coming_from_link(node) {
                record(&mut detours, l, detour);
                node = self.graph.link_to(l);
            }
        }
        detours
    }

    /// Largest `(fwd[a] + matrix[a][head] + link + matrix[tail][b] + bwd[b]) / shortest` over `a`
    /// on `head_chain` and `b` on `tail_chain`. Tree paths are shortest paths among the
    /// candidates, so each pair measures the whole path `origin ~> head -> tail ~> destination`.
    fn path_detour(
        &self,
        matrix: &DistanceMatrix,
        head_chain: &[usize],
        tail_chain: &[usize],
        link_cost: f64,
        shortest_cost: f64,
    ) -> f64 {
        let head = head_chain[0];
        let tail = tail_chain[0];
        let mut detour = 1.0f64;

        for &a in head_chain {
            let to_head = self.forward.cost(a) + matrix.distance(a, head);
            for &b in tail_chain {
                let length = to_head + link_cost + matrix.distance(tail, b) + self.backward.cost(b);
                detour = detour.max(length / shortest_cost);
            }
        }
        detour
    }
}

/// `node` followed by its predecessors up to the root of the tree.
fn tree_chain(tree: &ShortestPathTree, node: usize) -> Vec<usize> {
    let mut chain = vec![node];
    let mut current = node;
    while let Some(next) = tree.coming_from(current) {
        chain.push(next);
        current = next;
    }
    chain
}

fn record(detours: &mut BTreeMap<usize, f64>, link: usize, detour: f64) {
    detours
        .entry(link)
        .and_modify(|d: &mut f64| *d = d.min(detour))
        .or_insert(detour);
}
