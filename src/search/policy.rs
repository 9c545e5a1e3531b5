//! Distance-based policy used when no learned model is plugged in.

use super::{rank, BatchBeam, Expansion, Policy};
use crate::instance::PdpInstance;
use crate::state::Mask;
use rayon::prelude::*;

/// Precomputed Euclidean distance matrices, one per instance of the batch
#[derive(Debug, Clone)]
pub struct DistanceTables {
    num_nodes: usize,
    data: Vec<f64>,
}

impl DistanceTables {
    pub fn build(instances: &[PdpInstance]) -> Self {
        let num_nodes = instances.first().map(|i| i.num_nodes()).unwrap_or(0);
        let data = instances
            .par_iter()
            .flat_map_iter(|instance| {
                let n = instance.num_nodes();
                (0..n * n).map(move |idx| instance.distance(idx / n, idx % n))
            })
            .collect();
        DistanceTables { num_nodes, data }
    }

    #[inline]
    pub fn distance(&self, batch: usize, i: usize, j: usize) -> f64 {
        let n = self.num_nodes;
        self.data[batch * n * n + i * n + j]
    }
}

/// Scores each feasible node by its negative distance from the current node,
/// scaled by `1 / temperature`.
///
/// With normalization the scores are log-softmax probabilities, so the
/// cumulative beam score is the log-likelihood of the partial tour.
#[derive(Debug, Clone)]
pub struct NearestNeighborPolicy {
    pub temperature: f64,
}

impl NearestNeighborPolicy {
    pub fn new() -> Self {
        NearestNeighborPolicy { temperature: 0.1 }
    }

    pub fn with_temperature(temperature: f64) -> Self {
        NearestNeighborPolicy { temperature }
    }

    fn expand_row(
        &self,
        beam: &BatchBeam,
        fixed: &DistanceTables,
        mask: &Mask,
        row: usize,
        expand_size: Option<usize>,
        normalize: bool,
    ) -> Vec<Expansion> {
        let state = &beam.state;
        let batch = state.batch_ids()[row];
        let current = state.current_node()[row];

        let logits: Vec<(usize, f64)> = mask
            .feasible_nodes(row)
            .map(|node| (node, -fixed.distance(batch, current, node) / self.temperature))
            .collect();
        if logits.is_empty() {
            return Vec::new();
        }

        let offset = if normalize {
            let max = logits.iter().map(|&(_, l)| l).fold(f64::NEG_INFINITY, f64::max);
            let sum: f64 = logits.iter().map(|&(_, l)| (l - max).exp()).sum();
            max + sum.ln()
        } else {
            0.0
        };

        let mut expansions: Vec<Expansion> = logits
            .into_iter()
            .map(|(node, logit)| Expansion {
                parent: row,
                action: node,
                score: beam.scores[row] + logit - offset,
            })
            .collect();

        if let Some(size) = expand_size {
            expansions.sort_by_key(rank);
            expansions.truncate(size);
        }
        expansions
    }
}

impl Default for NearestNeighborPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for NearestNeighborPolicy {
    type Fixed = DistanceTables;

    fn precompute_fixed(&self, instances: &[PdpInstance]) -> DistanceTables {
        DistanceTables::build(instances)
    }

    fn propose_expansions(
        &self,
        beam: &BatchBeam,
        fixed: &DistanceTables,
        expand_size: Option<usize>,
        normalize: bool,
        max_calc_batch_size: usize,
    ) -> Vec<Expansion> {
        let mask = beam.state.get_mask();
        let rows: Vec<usize> = (0..beam.num_rows()).collect();

        let chunks: Vec<Vec<Expansion>> = rows
            .par_chunks(max_calc_batch_size.max(1))
            .map(|chunk| {
                chunk
                    .iter()
                    .flat_map(|&row| self.expand_row(beam, fixed, &mask, row, expand_size, normalize))
                    .collect()
            })
            .collect();

        chunks.into_iter().flatten().collect()
    }

    fn name(&self) -> &str {
        "NearestNeighbor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::tests::square_instance;
    use crate::state::{PdpState, StateConfig};

    fn initial_beam(instances: &[PdpInstance]) -> BatchBeam {
        BatchBeam::new(PdpState::initialize(instances, StateConfig::default()).unwrap())
    }

    #[test]
    fn test_distance_tables() {
        let instance = square_instance(0.1, 0.2);
        let tables = DistanceTables::build(&[instance.clone(), instance.clone()]);
        assert!((tables.distance(1, 0, 2) - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(tables.distance(0, 3, 3), 0.0);
        assert_eq!(tables.distance(0, 1, 2), instance.distance(1, 2));
    }

    #[test]
    fn test_only_feasible_nodes_are_proposed() {
        let batch = vec![square_instance(0.3, 0.4)];
        let policy = NearestNeighborPolicy::new();
        let fixed = policy.precompute_fixed(&batch);
        let beam = initial_beam(&batch);

        let expansions = policy.propose_expansions(&beam, &fixed, None, true, 16);
        let mut actions: Vec<usize> = expansions.iter().map(|e| e.action).collect();
        actions.sort();
        assert_eq!(actions, vec![1, 2]);
    }

    #[test]
    fn test_normalized_scores_are_log_probabilities() {
        let batch = vec![square_instance(0.3, 0.4)];
        let policy = NearestNeighborPolicy::with_temperature(0.5);
        let fixed = policy.precompute_fixed(&batch);
        let beam = initial_beam(&batch);

        let expansions = policy.propose_expansions(&beam, &fixed, None, true, 16);
        let total: f64 = expansions.iter().map(|e| e.score.exp()).sum();
        assert!((total - 1.0).abs() < 1e-9);

        // (1, 0) is closer to the depot than (1, 1)
        let best = expansions.iter().min_by_key(|e| rank(e)).unwrap();
        assert_eq!(best.action, 1);
    }

    #[test]
    fn test_expand_size_and_chunking() {
        let batch = vec![square_instance(0.3, 0.4), square_instance(0.1, 0.1)];
        let policy = NearestNeighborPolicy::new();
        let fixed = policy.precompute_fixed(&batch);
        let beam = initial_beam(&batch);

        let top = policy.propose_expansions(&beam, &fixed, Some(1), true, 1);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].parent, 0);
        assert_eq!(top[1].parent, 1);
        assert!(top.iter().all(|e| e.action == 1));

        let whole = policy.propose_expansions(&beam, &fixed, None, false, 4096);
        let chunked = policy.propose_expansions(&beam, &fixed, None, false, 1);
        assert_eq!(whole, chunked);
    }
}
