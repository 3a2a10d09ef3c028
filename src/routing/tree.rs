use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use keyed_priority_queue::KeyedPriorityQueue;
use serde::{Deserialize, Serialize};

use crate::graph::CompactGraph;

const NO_LINK: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Expand along out-links, costs are "from the source".
    #[default]
    Forward,
    /// Expand along in-links, costs are "to the source".
    Reverse,
}

/// Bounds a tree. Evaluated on the cheapest unsettled node before it is settled; a node it fires
/// on stays unsettled and is not expanded.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum StopCriterion {
    #[default]
    Unbounded,
    /// Ends the query at the first node more expensive than the bound. Everything still queued
    /// is at least as expensive.
    MaxCost(f64),
    /// Prunes nodes whose distance or time exceeds its limit. The queue is ordered by cost, so
    /// cheaper nodes behind a pruned one can still be within the limits and the query goes on
    /// until the queue is empty.
    Cutoff { max_distance: f64, max_time: f64 },
}

impl StopCriterion {
    #[inline]
    pub fn stop(&self, cost: f64, distance: f64, time: f64) -> bool {
        match *self {
            StopCriterion::Unbounded => false,
            StopCriterion::MaxCost(max_cost) => cost > max_cost,
            StopCriterion::Cutoff {
                max_distance,
                max_time,
            } => distance > max_distance || time > max_time,
        }
    }

    /// Whether a node the criterion fires on ends the whole query.
    #[inline]
    pub fn ends_query(&self) -> bool {
        matches!(self, StopCriterion::MaxCost(_))
    }
}

/// Queue priority. Cheaper first, equal costs in insertion order. The ordering is reversed as
/// the queue pops the largest priority.
#[derive(Debug, Clone, Copy)]
struct QueueKey {
    cost: f64,
    seq: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.seq.cmp(&other.seq))
            .reverse()
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueKey {}

/// Labels of one tree. Entries are only valid if their stamp equals `current`, so starting a new
/// query is a single increment instead of a pass over all nodes.
#[derive(Debug, Clone)]
struct TreeState {
    cost: Vec<f64>,
    distance: Vec<f64>,
    time: Vec<f64>,
    coming_from_link: Vec<usize>,
    visited: Vec<u32>,
    settled: Vec<u32>,
    current: u32,
    settled_nodes: Vec<usize>,
}

impl TreeState {
    fn new(node_count: usize) -> Self {
        TreeState {
            cost: vec![f64::INFINITY; node_count],
            distance: vec![f64::INFINITY; node_count],
            time: vec![f64::INFINITY; node_count],
            coming_from_link: vec![NO_LINK; node_count],
            visited: vec![0; node_count],
            settled: vec![0; node_count],
            current: 0,
            settled_nodes: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.settled_nodes.clear();
        let (new, overflow) = self.current.overflowing_add(1);
        self.current = new;

        // old stamps could match again after the wrap around
        if overflow {
            self.visited.fill(0);
            self.settled.fill(0);
            self.current = 1;
        }
    }

    #[inline]
    fn is_visited(&self, node: usize) -> bool {
        self.visited[node] == self.current
    }

    #[inline]
    fn is_settled(&self, node: usize) -> bool {
        self.settled[node] == self.current
    }

    #[inline]
    fn label(&mut self, node: usize, cost: f64, distance: f64, time: f64, link: usize) {
        self.cost[node] = cost;
        self.distance[node] = distance;
        self.time[node] = time;
        self.coming_from_link[node] = link;
        self.visited[node] = self.current;
    }

    #[inline]
    fn settle(&mut self, node: usize) {
        self.settled[node] = self.current;
        self.settled_nodes.push(node);
    }
}

/// Single source label setting tree over a [`CompactGraph`]. One instance is meant to be owned by
/// one worker and reused for many queries.
pub struct ShortestPathTree {
    graph: Arc<CompactGraph>,
    state: TreeState,
    queue: KeyedPriorityQueue<usize, QueueKey>,
    source: Option<usize>,
    direction: Direction,
}

impl Debug for ShortestPathTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShortestPathTree")
            .field("nodes", &self.graph.node_count())
            .field("source", &self.source)
            .field("direction", &self.direction)
            .field("settled", &self.state.settled_nodes.len())
            .finish()
    }
}

impl ShortestPathTree {
    pub fn new(graph: Arc<CompactGraph>) -> Self {
        let state = TreeState::new(graph.node_count());
        ShortestPathTree {
            graph,
            state,
            queue: KeyedPriorityQueue::new(),
            source: None,
            direction: Direction::Forward,
        }
    }

    pub fn graph(&self) -> &Arc<CompactGraph> {
        &self.graph
    }

    /// Grows the tree from `source` until the queue is empty, `target` is settled or `stop`
    /// ends the query.
    ///
    /// # Panics
    ///
    /// Panics if `source` is not a node of the graph. The engines check their inputs before
    /// they query a tree.
    pub fn calculate(
        &mut self,
        source: usize,
        target: Option<usize>,
        stop: StopCriterion,
        direction: Direction,
    ) {
        self.calculate_within(source, target, stop, direction, |_| true)
    }

    /// Like [`ShortestPathTree::calculate`], but nodes for which `allowed` returns false are never
    /// labelled. The source is always part of the tree.
    ///
    /// # Panics
    ///
    /// Panics if `source` is not a node of the graph.
    pub fn calculate_within<F>(
        &mut self,
        source: usize,
        target: Option<usize>,
        stop: StopCriterion,
        direction: Direction,
        allowed: F,
    ) where
        F: Fn(usize) -> bool,
    {
        assert!(
            self.graph.contains_node(source),
            "source {} is not a node of a graph with {} nodes",
            source,
            self.graph.node_count()
        );

        // leftovers of a query that stopped early
        while self.queue.pop().is_some() {}

        self.state.reset();
        self.source = Some(source);
        self.direction = direction;

        let graph = Arc::clone(&self.graph);
        let mut seq = 0;
        self.state.label(source, 0., 0., 0., NO_LINK);
        self.queue.push(source, QueueKey { cost: 0., seq });

        while let Some((node, _)) = self.queue.pop() {
            let cost = self.state.cost[node];
            let distance = self.state.distance[node];
            let time = self.state.time[node];

            if stop.stop(cost, distance, time) {
                if stop.ends_query() {
                    break;
                }
                continue;
            }
            self.state.settle(node);
            if target == Some(node) {
                break;
            }

            for (link, neighbour) in graph.links(node, direction) {
                if self.state.is_settled(neighbour) || !allowed(neighbour) {
                    continue;
                }
                let new_cost = cost + graph.link_cost(link);
                if !new_cost.is_finite() {
                    continue;
                }
                if !self.state.is_visited(neighbour) || new_cost < self.state.cost[neighbour] {
                    self.state.label(
                        neighbour,
                        new_cost,
                        distance + graph.link_length(link),
                        time + graph.link_time(link),
                        link,
                    );
                    seq += 1;
                    self.queue.push(
                        neighbour,
                        QueueKey {
                            cost: new_cost,
                            seq,
                        },
                    );
                }
            }
        }
    }

    pub fn source(&self) -> Option<usize> {
        self.source
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn is_settled(&self, node: usize) -> bool {
        self.state.is_settled(node)
    }

    /// Nodes settled by the last query, cheapest first.
    pub fn settled_nodes(&self) -> &[usize] {
        &self.state.settled_nodes
    }

    /// Generalized cost from the source, `f64::INFINITY` if the node was not settled.
    #[inline]
    pub fn cost(&self, node: usize) -> f64 {
        if self.state.is_settled(node) {
            self.state.cost[node]
        } else {
            f64::INFINITY
        }
    }

    #[inline]
    pub fn distance(&self, node: usize) -> f64 {
        if self.state.is_settled(node) {
            self.state.distance[node]
        } else {
            f64::INFINITY
        }
    }

    #[inline]
    pub fn time(&self, node: usize) -> f64 {
        if self.state.is_settled(node) {
            self.state.time[node]
        } else {
            f64::INFINITY
        }
    }

    /// The link over which the node was reached. `None` for the source and for unsettled nodes.
    #[inline]
    pub fn coming_from_link(&self, node: usize) -> Option<usize> {
        if !self.state.is_settled(node) {
            return None;
        }
        match self.state.coming_from_link[node] {
            NO_LINK => None,
            link => Some(link),
        }
    }

    /// The previous node on the way from the source. For reverse trees this is the next node on
    /// the way to the source.
    #[inline]
    pub fn coming_from(&self, node: usize) -> Option<usize> {
        self.coming_from_link(node).map(|link| match self.direction {
            Direction::Forward => self.graph.link_from(link),
            Direction::Reverse => self.graph.link_to(link),
        })
    }

    /// Links between the source and `node` in travel order: source to node for forward trees,
    /// node to source for reverse trees.
    pub fn path_links(&self, node: usize) -> Option<Vec<usize>> {
        if !self.is_settled(node) {
            return None;
        }
        let mut links = Vec::new();
        let mut current = node;
        while let Some(link) = self.coming_from_link(current) {
            links.push(link);
            current = match self.direction {
                Direction::Forward => self.graph.link_from(link),
                Direction::Reverse => self.graph.link_to(link),
            };
        }
        if self.direction == Direction::Forward {
            links.reverse();
        }
        Some(links)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::graph::tests::get_triangle_test_graph;
    use crate::graph::{CompactGraph, GraphLink, GraphNode};
    use crate::routing::tree::{Direction, ShortestPathTree, StopCriterion};

    fn line_graph(n: usize) -> Arc<CompactGraph> {
        let links = (0..n - 1)
            .flat_map(|i| [GraphLink::uniform(i, i + 1, 1.), GraphLink::uniform(i + 1, i, 1.)])
            .collect();
        Arc::new(CompactGraph::new(vec![GraphNode::default(); n], links).unwrap())
    }

    #[test]
    fn source_has_zero_cost() {
        let mut tree = ShortestPathTree::new(Arc::new(get_triangle_test_graph()));
        tree.calculate(1, None, StopCriterion::Unbounded, Direction::Forward);
        assert_eq!(tree.cost(1), 0.);
        assert_eq!(tree.distance(1), 0.);
        assert_eq!(tree.time(1), 0.);
        assert_eq!(tree.coming_from(1), None);
        assert_eq!(tree.source(), Some(1));
    }

    #[test]
    fn forward_tree() {
        let mut tree = ShortestPathTree::new(Arc::new(get_triangle_test_graph()));
        tree.calculate(0, None, StopCriterion::Unbounded, Direction::Forward);

        assert_eq!(tree.cost(1), 1.);
        assert_eq!(tree.cost(2), 2.);
        assert_eq!(tree.coming_from(2), Some(1));
        assert_eq!(tree.coming_from_link(2), Some(1));
        assert_eq!(tree.path_links(2), Some(vec![0, 1]));
        assert_eq!(tree.settled_nodes(), &[0, 1, 2]);
    }

    #[test]
    fn reverse_tree() {
        let mut tree = ShortestPathTree::new(Arc::new(get_triangle_test_graph()));
        tree.calculate(2, None, StopCriterion::Unbounded, Direction::Reverse);

        assert_eq!(tree.cost(0), 2.);
        assert_eq!(tree.cost(1), 1.);
        assert_eq!(tree.coming_from(0), Some(1));
        assert_eq!(tree.path_links(0), Some(vec![0, 1]));
        assert_eq!(tree.direction(), Direction::Reverse);
    }

    #[test]
    fn unreachable_is_infinite() {
        let mut tree = ShortestPathTree::new(Arc::new(get_triangle_test_graph()));
        tree.calculate(2, None, StopCriterion::Unbounded, Direction::Forward);

        assert!(tree.cost(0).is_infinite());
        assert!(tree.distance(0).is_infinite());
        assert!(!tree.is_settled(0));
        assert_eq!(tree.path_links(0), None);
    }

    #[test]
    fn stale_labels_are_ignored() {
        let mut tree = ShortestPathTree::new(line_graph(5));
        tree.calculate(0, None, StopCriterion::Unbounded, Direction::Forward);
        assert_eq!(tree.cost(4), 4.);

        tree.calculate(3, None, StopCriterion::MaxCost(1.), Direction::Forward);
        assert_eq!(tree.cost(3), 0.);
        assert_eq!(tree.cost(4), 1.);
        assert_eq!(tree.cost(2), 1.);
        assert!(tree.cost(0).is_infinite());
        assert!(tree.cost(1).is_infinite());
    }

    #[test]
    fn stop_at_target() {
        let mut tree = ShortestPathTree::new(line_graph(5));
        tree.calculate(0, Some(2), StopCriterion::Unbounded, Direction::Forward);
        assert_eq!(tree.cost(2), 2.);
        assert!(!tree.is_settled(3));
        assert!(!tree.is_settled(4));
    }

    #[test]
    fn stop_at_max_cost() {
        let mut tree = ShortestPathTree::new(line_graph(5));
        tree.calculate(2, None, StopCriterion::MaxCost(1.), Direction::Forward);
        let mut settled = tree.settled_nodes().to_vec();
        settled.sort();
        assert_eq!(settled, vec![1, 2, 3]);
    }

    #[test]
    fn stop_at_cutoff_considers_time() {
        let mut links = Vec::new();
        for i in 0..3 {
            links.push(GraphLink {
                from: i,
                to: i + 1,
                length: 1.,
                time: 10.,
                cost: 1.,
                source_id: i,
            });
        }
        let graph = Arc::new(CompactGraph::new(vec![GraphNode::default(); 4], links).unwrap());
        let mut tree = ShortestPathTree::new(graph);
        tree.calculate(
            0,
            None,
            StopCriterion::Cutoff {
                max_distance: 100.,
                max_time: 15.,
            },
            Direction::Forward,
        );
        assert!(tree.is_settled(1));
        assert!(!tree.is_settled(2));
    }

    #[test]
    fn cutoff_prunes_without_ending_the_query() {
        // 0 -> 1 is cheap but long, 0 -> 2 -> 3 is expensive but short
        let link = |from, to, length, cost| GraphLink {
            from,
            to,
            length,
            time: cost,
            cost,
            source_id: 0,
        };
        let graph = CompactGraph::new(
            vec![GraphNode::default(); 5],
            vec![
                link(0, 1, 100., 1.),
                link(1, 4, 1., 1.),
                link(0, 2, 10., 5.),
                link(2, 3, 10., 5.),
            ],
        )
        .unwrap();
        let mut tree = ShortestPathTree::new(Arc::new(graph));
        tree.calculate(
            0,
            None,
            StopCriterion::Cutoff {
                max_distance: 50.,
                max_time: f64::INFINITY,
            },
            Direction::Forward,
        );

        assert!(!tree.is_settled(1));
        assert!(!tree.is_settled(4));
        assert_eq!(tree.cost(2), 5.);
        assert_eq!(tree.cost(3), 10.);
        assert_eq!(tree.distance(3), 20.);
        assert_eq!(tree.settled_nodes(), &[0, 2, 3]);
    }

    #[test]
    fn max_cost_ends_the_query() {
        assert!(StopCriterion::MaxCost(1.).ends_query());
        assert!(!StopCriterion::Unbounded.ends_query());
        assert!(
            !StopCriterion::Cutoff {
                max_distance: 1.,
                max_time: 1.,
            }
            .ends_query()
        );
    }

    #[test]
    #[should_panic(expected = "is not a node")]
    fn source_out_of_range_panics() {
        let mut tree = ShortestPathTree::new(line_graph(3));
        tree.calculate(3, None, StopCriterion::Unbounded, Direction::Forward);
    }

    #[test]
    fn ties_resolve_to_first_discovered() {
        // 0 -> 1 -> 3 and 0 -> 2 -> 3, both of cost 2
        let graph = CompactGraph::new(
            vec![GraphNode::default(); 4],
            vec![
                GraphLink::uniform(0, 1, 1.),
                GraphLink::uniform(0, 2, 1.),
                GraphLink::uniform(1, 3, 1.),
                GraphLink::uniform(2, 3, 1.),
            ],
        )
        .unwrap();
        let mut tree = ShortestPathTree::new(Arc::new(graph));
        for _ in 0..3 {
            tree.calculate(0, None, StopCriterion::Unbounded, Direction::Forward);
            assert_eq!(tree.settled_nodes(), &[0, 1, 2, 3]);
            assert_eq!(tree.coming_from_link(3), Some(2));
        }
    }

    #[test]
    fn restricted_tree() {
        let mut tree = ShortestPathTree::new(Arc::new(get_triangle_test_graph()));
        tree.calculate_within(0, None, StopCriterion::Unbounded, Direction::Forward, |n| {
            n != 1
        });
        assert!(!tree.is_settled(1));
        assert_eq!(tree.cost(2), 3.);
        assert_eq!(tree.path_links(2), Some(vec![2]));
    }

    #[test]
    fn stamp_overflow_resets_labels() {
        let mut tree = ShortestPathTree::new(line_graph(3));
        tree.calculate(0, None, StopCriterion::Unbounded, Direction::Forward);
        tree.state.current = u32::MAX;
        tree.state.settled.fill(u32::MAX);
        tree.state.visited.fill(u32::MAX);

        tree.calculate(2, None, StopCriterion::MaxCost(0.), Direction::Forward);
        assert_eq!(tree.state.current, 1);
        assert_eq!(tree.cost(2), 0.);
        assert!(!tree.is_settled(0));
        assert!(!tree.is_settled(1));
    }

    #[test]
    fn path_costs_decrease_towards_source() {
        let mut tree = ShortestPathTree::new(line_graph(6));
        tree.calculate(2, None, StopCriterion::Unbounded, Direction::Forward);
        for &node in tree.settled_nodes() {
            let mut current = node;
            let mut last = tree.cost(current);
            while let Some(prev) = tree.coming_from(current) {
                assert!(tree.cost(prev) < last);
                last = tree.cost(prev);
                current = prev;
            }
            assert_eq!(current, 2);
        }
    }
}
