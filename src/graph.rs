pub mod converter;

use std::iter::Zip;
use std::slice::Iter;

use thiserror::Error;

use crate::routing::tree::Direction;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("link {link} references node {node}, but the graph only has {node_count} nodes")]
    InvalidEndpoint {
        link: usize,
        node: usize,
        node_count: usize,
    },
    #[error("link {link} has an invalid {field} of {value}")]
    InvalidLinkValue {
        link: usize,
        field: &'static str,
        value: f64,
    },
    #[error("id {0} is used more than once")]
    DuplicateId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GraphNode {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphLink {
    pub from: usize,
    pub to: usize,
    pub length: f64,
    pub time: f64,
    pub cost: f64,
    /// Index of the link in whatever network this graph was built from.
    pub source_id: usize,
}

impl GraphLink {
    /// A link whose length, time and cost are all the same value. Handy for tests and for
    /// distance-only graphs.
    pub fn uniform(from: usize, to: usize, length: f64) -> Self {
        GraphLink {
            from,
            to,
            length,
            time: length,
            cost: length,
            source_id: usize::MAX,
        }
    }
}

/// One direction of the adjacency. Links of node `n` are `link[first_out[n]..first_out[n + 1]]`,
/// the node on the other end of each link is stored at the same position in `head`.
#[derive(Debug, Clone, PartialEq)]
struct Adjacency {
    first_out: Vec<usize>,
    link: Vec<usize>,
    head: Vec<usize>,
}

impl Adjacency {
    /// Counting sort by `tail`. Links of the same node keep their index order, which makes
    /// iteration order and thus tie breaking in the trees reproducible.
    fn build(node_count: usize, tail: &[usize], head: &[usize]) -> Self {
        let mut first_out = vec![0; node_count + 1];
        for &t in tail {
            first_out[t + 1] += 1;
        }
        for n in 0..node_count {
            first_out[n + 1] += first_out[n];
        }

        let mut next = first_out.clone();
        let mut link = vec![0; tail.len()];
        let mut neighbour = vec![0; tail.len()];
        for (l, (&t, &h)) in tail.iter().zip(head).enumerate() {
            let pos = next[t];
            link[pos] = l;
            neighbour[pos] = h;
            next[t] += 1;
        }

        Adjacency {
            first_out,
            link,
            head: neighbour,
        }
    }

    #[inline]
    fn iter(&self, node: usize) -> AdjacentLinks<'_> {
        let range = self.first_out[node]..self.first_out[node + 1];
        AdjacentLinks {
            inner: self.link[range.clone()].iter().zip(self.head[range].iter()),
        }
    }
}

/// Yields `(link index, neighbour index)` pairs without allocating.
#[derive(Debug, Clone)]
pub struct AdjacentLinks<'a> {
    inner: Zip<Iter<'a, usize>, Iter<'a, usize>>,
}

impl Iterator for AdjacentLinks<'_> {
    type Item = (usize, usize);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(&l, &n)| (l, n))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for AdjacentLinks<'_> {}

/// Immutable, array based snapshot of a network. Nodes and links are dense indices. Any change to
/// the network requires building a new graph.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactGraph {
    x: Vec<f64>,
    y: Vec<f64>,
    from: Vec<usize>,
    to: Vec<usize>,
    length: Vec<f64>,
    time: Vec<f64>,
    cost: Vec<f64>,
    source_ids: Vec<usize>,
    forward: Adjacency,
    backward: Adjacency,
}

impl CompactGraph {
    pub fn new(nodes: Vec<GraphNode>, links: Vec<GraphLink>) -> Result<Self, GraphError> {
        let node_count = nodes.len();
        for (index, link) in links.iter().enumerate() {
            for node in [link.from, link.to] {
                if node >= node_count {
                    return Err(GraphError::InvalidEndpoint {
                        link: index,
                        node,
                        node_count,
                    });
                }
            }
            for (field, value) in [
                ("length", link.length),
                ("time", link.time),
                ("cost", link.cost),
            ] {
                if value.is_nan() || value < 0. {
                    return Err(GraphError::InvalidLinkValue {
                        link: index,
                        field,
                        value,
                    });
                }
            }
        }

        let (x, y) = nodes.iter().map(|n| (n.x, n.y)).unzip();
        let from: Vec<usize> = links.iter().map(|l| l.from).collect();
        let to: Vec<usize> = links.iter().map(|l| l.to).collect();
        let forward = Adjacency::build(node_count, &from, &to);
        let backward = Adjacency::build(node_count, &to, &from);

        Ok(CompactGraph {
            x,
            y,
            length: links.iter().map(|l| l.length).collect(),
            time: links.iter().map(|l| l.time).collect(),
            cost: links.iter().map(|l| l.cost).collect(),
            source_ids: links.iter().map(|l| l.source_id).collect(),
            from,
            to,
            forward,
            backward,
        })
    }

    pub fn node_count(&self) -> usize {
        self.x.len()
    }

    pub fn link_count(&self) -> usize {
        self.from.len()
    }

    #[inline]
    pub fn out_links(&self, node: usize) -> AdjacentLinks<'_> {
        self.forward.iter(node)
    }

    #[inline]
    pub fn in_links(&self, node: usize) -> AdjacentLinks<'_> {
        self.backward.iter(node)
    }

    /// Out-links for forward, in-links for reverse traversal.
    #[inline]
    pub fn links(&self, node: usize, direction: Direction) -> AdjacentLinks<'_> {
        match direction {
            Direction::Forward => self.out_links(node),
            Direction::Reverse => self.in_links(node),
        }
    }

    #[inline]
    pub fn link_from(&self, link: usize) -> usize {
        self.from[link]
    }

    #[inline]
    pub fn link_to(&self, link: usize) -> usize {
        self.to[link]
    }

    #[inline]
    pub fn link_length(&self, link: usize) -> f64 {
        self.length[link]
    }

    #[inline]
    pub fn link_time(&self, link: usize) -> f64 {
        self.time[link]
    }

    #[inline]
    pub fn link_cost(&self, link: usize) -> f64 {
        self.cost[link]
    }

    pub fn link_source_id(&self, link: usize) -> usize {
        self.source_ids[link]
    }

    pub fn node_coord(&self, node: usize) -> (f64, f64) {
        (self.x[node], self.y[node])
    }

    pub fn contains_node(&self, node: usize) -> bool {
        node < self.node_count()
    }
}
