use nohash_hasher::IntMap;

use crate::routing::tree::{Direction, ShortestPathTree, StopCriterion};

/// Shortest costs between all pairs of a node subset, using only paths that stay inside the
/// subset. Stored row major, unreachable pairs are `f64::INFINITY`.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    nodes: Vec<usize>,
    index: IntMap<usize, usize>,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Runs one restricted tree per node. Trees stop once costs exceed `max_cost`, pairs further
    /// apart than that are reported as unreachable.
    #[tracing::instrument(level = "debug", skip_all, fields(dimension = nodes.len()))]
    pub fn compute(tree: &mut ShortestPathTree, nodes: Vec<usize>, max_cost: f64) -> Self {
        let index: IntMap<usize, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, &node)| (node, i))
            .collect();
        let dimension = nodes.len();
        let mut values = vec![f64::INFINITY; dimension * dimension];

        for (row, &source) in nodes.iter().enumerate() {
            tree.calculate_within(
                source,
                None,
                StopCriterion::MaxCost(max_cost),
                Direction::Forward,
                |n| index.contains_key(&n),
            );
            for &node in tree.settled_nodes() {
                values[row * dimension + index[&node]] = tree.cost(node);
            }
        }

        DistanceMatrix {
            nodes,
            index,
            values,
        }
    }

    pub fn dimension(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[usize] {
        &self.nodes
    }

    #[inline]
    pub fn contains(&self, node: usize) -> bool {
        self.index.contains_key(&node)
    }

    pub fn index_of(&self, node: usize) -> Option<usize> {
        self.index.get(&node).copied()
    }

    /// Cost between two graph nodes, infinite if either is not part of the matrix.
    #[inline]
    pub fn distance(&self, from: usize, to: usize) -> f64 {
        match (self.index.get(&from), self.index.get(&to)) {
            (Some(&row), Some(&column)) => self.values[row * self.dimension() + column],
            _ => f64::INFINITY,
        }
    }
}
