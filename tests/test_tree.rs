use std::sync::Arc;

use assert_approx_eq::assert_approx_eq;
use rust_accessibility::routing::tree::{Direction, ShortestPathTree, StopCriterion};

mod common;

#[test]
fn bounded_tree_equals_unbounded_tree_below_bound() {
    for seed in 0..5 {
        let graph = common::random_graph(300, 900, seed);
        let mut full = ShortestPathTree::new(Arc::clone(&graph));
        let mut bounded = ShortestPathTree::new(Arc::clone(&graph));

        for source in [0, 17, 150, 299] {
            full.calculate(source, None, StopCriterion::Unbounded, Direction::Forward);
            let mut costs: Vec<f64> = full.settled_nodes().iter().map(|&n| full.cost(n)).collect();
            costs.sort_by(f64::total_cmp);
            let bound = costs[costs.len() / 3];

            for stop in [
                StopCriterion::MaxCost(bound),
                // cost equals time in these graphs
                StopCriterion::Cutoff {
                    max_distance: f64::INFINITY,
                    max_time: bound,
                },
            ] {
                bounded.calculate(source, None, stop, Direction::Forward);
                for node in 0..graph.node_count() {
                    if full.cost(node) <= bound {
                        assert!(bounded.is_settled(node));
                        assert_eq!(bounded.cost(node), full.cost(node));
                        assert_eq!(bounded.distance(node), full.distance(node));
                    } else {
                        assert!(!bounded.is_settled(node));
                        assert!(bounded.cost(node).is_infinite());
                    }
                }
            }
        }
    }
}

#[test]
fn cutoff_on_other_measure_than_cost() {
    for seed in 0..5 {
        let by_time = common::random_graph(300, 900, seed);
        let by_length = common::with_length_costs(&by_time);

        // cost is travel time and the cutoff is on distance, then the other way round
        let cases: [(_, fn(&ShortestPathTree, usize) -> f64, fn(f64) -> StopCriterion); 2] = [
            (by_time, ShortestPathTree::distance, |limit| StopCriterion::Cutoff {
                max_distance: limit,
                max_time: f64::INFINITY,
            }),
            (by_length, ShortestPathTree::time, |limit| StopCriterion::Cutoff {
                max_distance: f64::INFINITY,
                max_time: limit,
            }),
        ];
        for (graph, measure, criterion) in cases {
            let mut full = ShortestPathTree::new(Arc::clone(&graph));
            let mut bounded = ShortestPathTree::new(Arc::clone(&graph));

            for source in [0, 42, 201] {
                full.calculate(source, None, StopCriterion::Unbounded, Direction::Forward);
                let mut values: Vec<f64> =
                    full.settled_nodes().iter().map(|&n| measure(&full, n)).collect();
                values.sort_by(f64::total_cmp);
                let limit = values[values.len() / 3];

                bounded.calculate(source, None, criterion(limit), Direction::Forward);
                let mut within = 0;
                for node in 0..graph.node_count() {
                    // the least cost path stays within the limit, so none of its nodes is pruned
                    if measure(&full, node) <= limit {
                        within += 1;
                        assert!(bounded.is_settled(node));
                        assert_eq!(bounded.cost(node), full.cost(node));
                        assert_eq!(measure(&bounded, node), measure(&full, node));
                    }
                    if bounded.is_settled(node) {
                        assert!(measure(&bounded, node) <= limit);
                        assert!(bounded.cost(node) >= full.cost(node));
                    }
                }
                assert!(within > 1);
            }
        }
    }
}

#[test]
fn distance_cutoff() {
    let graph = common::random_graph(200, 600, 42);
    let mut tree = ShortestPathTree::new(Arc::clone(&graph));
    let stop = StopCriterion::Cutoff {
        max_distance: 2000.,
        max_time: f64::INFINITY,
    };
    tree.calculate(3, None, stop, Direction::Forward);

    assert!(tree.settled_nodes().len() > 1);
    for &node in tree.settled_nodes() {
        assert!(tree.distance(node) <= 2000.);
    }
}

#[test]
fn predecessor_chains_reach_source() {
    let graph = common::random_graph(250, 750, 7);
    let mut tree = ShortestPathTree::new(Arc::clone(&graph));

    for direction in [Direction::Forward, Direction::Reverse] {
        tree.calculate(11, None, StopCriterion::Unbounded, direction);
        assert_eq!(tree.settled_nodes().len(), graph.node_count());

        for &node in tree.settled_nodes() {
            let mut current = node;
            let mut cost = tree.cost(node);
            let mut steps = 0;
            while let Some(previous) = tree.coming_from(current) {
                assert!(tree.cost(previous) < cost);
                cost = tree.cost(previous);
                current = previous;
                steps += 1;
                assert!(steps <= graph.node_count());
            }
            assert_eq!(current, 11);

            let links = tree.path_links(node).unwrap();
            assert_eq!(links.len(), steps);
            let sum: f64 = links.iter().map(|&l| graph.link_cost(l)).sum();
            assert_approx_eq!(sum, tree.cost(node), 1e-6);
        }
    }
}

#[test]
fn reused_tree_equals_fresh_tree() {
    let graph = common::random_graph(150, 450, 3);
    let mut reused = ShortestPathTree::new(Arc::clone(&graph));

    for source in (0..150).step_by(13) {
        for direction in [Direction::Forward, Direction::Reverse] {
            reused.calculate(source, None, StopCriterion::MaxCost(150.), direction);
            let mut fresh = ShortestPathTree::new(Arc::clone(&graph));
            fresh.calculate(source, None, StopCriterion::MaxCost(150.), direction);

            assert_eq!(reused.settled_nodes(), fresh.settled_nodes());
            for node in 0..graph.node_count() {
                assert_eq!(reused.cost(node).to_bits(), fresh.cost(node).to_bits());
                assert_eq!(reused.coming_from_link(node), fresh.coming_from_link(node));
            }
        }
    }
}

#[test]
fn reverse_tree_matches_forward_trees() {
    let graph = common::random_graph(100, 300, 11);
    let mut reverse = ShortestPathTree::new(Arc::clone(&graph));
    let mut forward = ShortestPathTree::new(Arc::clone(&graph));

    reverse.calculate(5, None, StopCriterion::Unbounded, Direction::Reverse);
    for node in 0..graph.node_count() {
        forward.calculate(node, Some(5), StopCriterion::Unbounded, Direction::Forward);
        assert_approx_eq!(forward.cost(5), reverse.cost(node), 1e-6);
    }
}

#[test]
fn grid_costs() {
    let graph = common::grid_graph(10, 10, 100.);
    let mut tree = ShortestPathTree::new(Arc::clone(&graph));
    tree.calculate(0, None, StopCriterion::Unbounded, Direction::Forward);

    for y in 0..10 {
        for x in 0..10 {
            assert_approx_eq!(tree.cost(x + y * 10), (x + y) as f64 * 100.);
        }
    }
}
