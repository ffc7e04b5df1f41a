//! Personalized PageRank over the file import graph.

use std::collections::HashMap;

use petgraph::graph::DiGraph;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

/// Power-iteration PageRank with weighted edges.
pub struct PageRanker {
    damping_factor: f64,
    max_iterations: u32,
    tolerance: f64,
}

impl PageRanker {
    pub fn new(damping_factor: f64, max_iterations: u32, tolerance: f64) -> Self {
        Self {
            damping_factor,
            max_iterations,
            tolerance,
        }
    }

    /// Rank graph nodes; returns node label -> normalized rank.
    ///
    /// `personalization` biases the restart distribution towards the given
    /// labels; empty means uniform.
    pub fn rank(
        &self,
        graph: &DiGraph<String, f64>,
        personalization: &HashMap<String, f64>,
    ) -> HashMap<String, f64> {
        let node_count = graph.node_count();
        if node_count == 0 {
            return HashMap::new();
        }

        let mut path_to_idx: HashMap<&str, NodeIndex> = HashMap::new();
        for idx in graph.node_indices() {
            path_to_idx.insert(graph[idx].as_str(), idx);
        }

        let initial_rank = 1.0 / node_count as f64;
        let mut ranks: HashMap<NodeIndex, f64> = graph
            .node_indices()
            .map(|idx| (idx, initial_rank))
            .collect();

        // Outgoing weight sums, reused every iteration.
        let out_weights: HashMap<NodeIndex, f64> = graph
            .node_indices()
            .map(|idx| (idx, graph.edges(idx).map(|e| *e.weight()).sum()))
            .collect();

        let pers_vec: HashMap<NodeIndex, f64> = if personalization.is_empty() {
            graph
                .node_indices()
                .map(|idx| (idx, initial_rank))
                .collect()
        } else {
            personalization
                .iter()
                .filter_map(|(path, prob)| path_to_idx.get(path.as_str()).map(|&idx| (idx, *prob)))
                .collect()
        };

        for _ in 0..self.max_iterations {
            let mut new_ranks: HashMap<NodeIndex, f64> = HashMap::new();
            let mut diff = 0.0f64;

            for idx in graph.node_indices() {
                let mut rank_sum = 0.0f64;
                for edge in graph.edges_directed(idx, petgraph::Direction::Incoming) {
                    let source = edge.source();
                    let source_out = out_weights.get(&source).copied().unwrap_or(1.0);
                    if source_out > 0.0 {
                        let source_rank = ranks.get(&source).copied().unwrap_or(initial_rank);
                        rank_sum += source_rank * (edge.weight() / source_out);
                    }
                }

                let pers_prob = pers_vec.get(&idx).copied().unwrap_or(initial_rank);
                let new_rank =
                    (1.0 - self.damping_factor) * pers_prob + self.damping_factor * rank_sum;
                diff += (new_rank - ranks.get(&idx).copied().unwrap_or(initial_rank)).abs();
                new_ranks.insert(idx, new_rank);
            }

            ranks = new_ranks;
            if diff < self.tolerance {
                break;
            }
        }

        // Normalize to sum 1.0.
        let total: f64 = ranks.values().sum();
        if total > 0.0 {
            for rank in ranks.values_mut() {
                *rank /= total;
            }
        }

        ranks
            .into_iter()
            .map(|(idx, rank)| (graph[idx].clone(), rank))
            .collect()
    }
}

impl Default for PageRanker {
    fn default() -> Self {
        Self::new(0.85, 100, 1e-6)
    }
}
