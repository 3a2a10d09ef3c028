#![allow(dead_code)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_accessibility::graph::{CompactGraph, GraphLink, GraphNode};

pub fn line_graph(n: usize, both_ways: bool) -> Arc<CompactGraph> {
    let mut links = Vec::new();
    for i in 0..n - 1 {
        links.push(GraphLink::uniform(i, i + 1, 1.));
        if both_ways {
            links.push(GraphLink::uniform(i + 1, i, 1.));
        }
    }
    let nodes = (0..n)
        .map(|i| GraphNode {
            x: i as f64,
            y: 0.,
        })
        .collect();
    Arc::new(CompactGraph::new(nodes, links).unwrap())
}

/// `width` x `height` nodes, node `x + y * width` sits at `(x, y)`. Neighbours are connected in
/// both directions by links of the given length.
pub fn grid_graph(width: usize, height: usize, length: f64) -> Arc<CompactGraph> {
    let mut nodes = Vec::with_capacity(width * height);
    let mut links = Vec::new();
    for y in 0..height {
        for x in 0..width {
            nodes.push(GraphNode {
                x: x as f64 * length,
                y: y as f64 * length,
            });
            let id = x + y * width;
            if x + 1 < width {
                links.push(GraphLink::uniform(id, id + 1, length));
                links.push(GraphLink::uniform(id + 1, id, length));
            }
            if y + 1 < height {
                links.push(GraphLink::uniform(id, id + width, length));
                links.push(GraphLink::uniform(id + width, id, length));
            }
        }
    }
    Arc::new(CompactGraph::new(nodes, links).unwrap())
}

/// Strongly connected random graph: a ring through all nodes plus `extra_links` random links.
/// Lengths and speeds differ per link, cost equals travel time.
pub fn random_graph(node_count: usize, extra_links: usize, seed: u64) -> Arc<CompactGraph> {
    let mut rng = StdRng::seed_from_u64(seed);
    let random_link = |rng: &mut StdRng, from: usize, to: usize| {
        let length: f64 = rng.random_range(10.0..1000.0);
        let speed: f64 = rng.random_range(5.0..30.0);
        GraphLink {
            from,
            to,
            length,
            time: length / speed,
            cost: length / speed,
            source_id: usize::MAX,
        }
    };

    let mut links = Vec::with_capacity(node_count + extra_links);
    for from in 0..node_count {
        links.push(random_link(&mut rng, from, (from + 1) % node_count));
    }
    for _ in 0..extra_links {
        let from = rng.random_range(0..node_count);
        let to = rng.random_range(0..node_count);
        if from != to {
            links.push(random_link(&mut rng, from, to));
        }
    }
    Arc::new(CompactGraph::new(vec![GraphNode::default(); node_count], links).unwrap())
}

/// Same as [`random_graph`], but every link also exists in the opposite direction with the same
/// values.
pub fn random_symmetric_graph(node_count: usize, extra_links: usize, seed: u64) -> Arc<CompactGraph> {
    let graph = random_graph(node_count, extra_links, seed);
    let mut links = Vec::with_capacity(graph.link_count() * 2);
    for link in 0..graph.link_count() {
        let forward = GraphLink {
            from: graph.link_from(link),
            to: graph.link_to(link),
            length: graph.link_length(link),
            time: graph.link_time(link),
            cost: graph.link_cost(link),
            source_id: link,
        };
        links.push(forward);
        links.push(GraphLink {
            from: forward.to,
            to: forward.from,
            ..forward
        });
    }
    Arc::new(CompactGraph::new(vec![GraphNode::default(); node_count], links).unwrap())
}

/// Copy of `graph` whose link costs are the link lengths.
pub fn with_length_costs(graph: &CompactGraph) -> Arc<CompactGraph> {
    let links = (0..graph.link_count())
        .map(|link| GraphLink {
            from: graph.link_from(link),
            to: graph.link_to(link),
            length: graph.link_length(link),
            time: graph.link_time(link),
            cost: graph.link_length(link),
            source_id: link,
        })
        .collect();
    Arc::new(CompactGraph::new(vec![GraphNode::default(); graph.node_count()], links).unwrap())
}
