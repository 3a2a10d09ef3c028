pub mod cost;

use ahash::{HashMap, HashSet};

use crate::graph::GraphError;

/// Network as handed over by whoever loads the road data. Nodes and links are addressed by
/// their position in the vectors; the external ids are only kept for lookups and reporting.
#[derive(Debug, Default)]
pub struct Network {
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    node_ids: HashMap<String, usize>,
    link_ids: HashMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub in_links: Vec<usize>,
    pub out_links: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: String,
    pub from: usize,
    pub to: usize,
    /// meters
    pub length: f64,
    /// meters per second
    pub freespeed: f64,
    pub modes: HashSet<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Node {
            id: id.into(),
            x,
            y,
            z: None,
            in_links: Vec::new(),
            out_links: Vec::new(),
        }
    }
}

impl Link {
    pub fn new(id: impl Into<String>, from: usize, to: usize, length: f64, freespeed: f64) -> Self {
        Link {
            id: id.into(),
            from,
            to,
            length,
            freespeed,
            modes: HashSet::default(),
        }
    }

    pub fn with_modes<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modes = modes.into_iter().map(Into::into).collect();
        self
    }

    /// Links without any mode restriction are open to every mode.
    pub fn allows(&self, mode: &str) -> bool {
        self.modes.is_empty() || self.modes.contains(mode)
    }
}

impl Network {
    pub fn new() -> Self {
        Network::default()
    }

    /// Adds a node and returns its index.
    pub fn add_node(&mut self, node: Node) -> Result<usize, GraphError> {
        if self.node_ids.contains_key(&node.id) {
            return Err(GraphError::DuplicateId(node.id));
        }
        let index = self.nodes.len();
        self.node_ids.insert(node.id.clone(), index);
        self.nodes.push(Node {
            in_links: Vec::new(),
            out_links: Vec::new(),
            ..node
        });
        Ok(index)
    }

    /// Adds a link, wires it into the in- and out-link lists of its nodes and returns its index.
    pub fn add_link(&mut self, link: Link) -> Result<usize, GraphError> {
        let index = self.links.len();
        for node in [link.from, link.to] {
            if node >= self.nodes.len() {
                return Err(GraphError::InvalidEndpoint {
                    link: index,
                    node,
                    node_count: self.nodes.len(),
                });
            }
        }
        if self.link_ids.contains_key(&link.id) {
            return Err(GraphError::DuplicateId(link.id));
        }

        self.nodes[link.from].out_links.push(index);
        self.nodes[link.to].in_links.push(index);
        self.link_ids.insert(link.id.clone(), index);
        self.links.push(link);
        Ok(index)
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.node_ids.get(id).copied()
    }

    pub fn link_index(&self, id: &str) -> Option<usize> {
        self.link_ids.get(id).copied()
    }
}
