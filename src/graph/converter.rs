use tracing::{debug, info};

use crate::graph::{CompactGraph, GraphError, GraphLink, GraphNode};
use crate::network::cost::{CostContext, TravelDisutility};
use crate::network::Network;

pub struct NetworkConverter {}

impl NetworkConverter {
    /// Builds the compact graph for the mode in `context`. Links not open to the mode and links
    /// that cannot be traversed in finite time or cost are left out; the remaining links keep
    /// their relative order and remember their network index as source id.
    #[tracing::instrument(level = "debug", skip_all, fields(mode = %context.mode))]
    pub fn convert_network(
        network: &Network,
        disutility: &dyn TravelDisutility,
        context: &CostContext,
    ) -> Result<CompactGraph, GraphError> {
        info!(
            "Converting network with {} nodes and {} links to compact graph for mode {}.",
            network.nodes.len(),
            network.links.len(),
            context.mode
        );

        let nodes = network
            .nodes
            .iter()
            .map(|n| GraphNode { x: n.x, y: n.y })
            .collect();

        let mut links = Vec::with_capacity(network.links.len());
        let mut skipped = 0;
        for (index, link) in network.links.iter().enumerate() {
            if !link.allows(&context.mode) {
                skipped += 1;
                continue;
            }
            let time = disutility.link_travel_time(link, context);
            let cost = disutility.link_cost(link, context);
            if time.is_infinite() || cost.is_infinite() {
                debug!("Link {} cannot be traversed and is skipped.", link.id);
                skipped += 1;
                continue;
            }
            links.push(GraphLink {
                from: link.from,
                to: link.to,
                length: link.length,
                time,
                cost,
                source_id: index,
            });
        }

        let graph = CompactGraph::new(nodes, links)?;
        info!(
            "Finished converting network. Kept {} links, skipped {}.",
            graph.link_count(),
            skipped
        );
        Ok(graph)
    }
}
