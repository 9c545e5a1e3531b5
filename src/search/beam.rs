//! Beam search over the batched routing state.

use super::{rank, BatchBeam, Expansion, Policy, SearchConfig};
use crate::cost::validate_tours;
use crate::error::SearchError;
use crate::instance::PdpInstance;
use crate::solution::Solution;
use crate::state::PdpState;
use ordered_float::OrderedFloat;
use std::time::Instant;

/// Completed hypotheses of a beam search
#[derive(Debug, Clone)]
pub struct BeamSearchResult {
    /// Instance row of every hypothesis
    pub batch_ids: Vec<usize>,
    /// Cumulative policy score of every hypothesis
    pub scores: Vec<f64>,
    /// Full tour of every hypothesis, depot first
    pub tours: Vec<Vec<usize>>,
    /// Closed tour length of every hypothesis
    pub costs: Vec<f64>,
    batch_size: usize,
}

impl BeamSearchResult {
    /// Lowest-cost hypothesis of each instance, as `(tour, cost)`.
    pub fn best_per_batch(&self) -> Vec<(Vec<usize>, f64)> {
        let mut best: Vec<Option<usize>> = vec![None; self.batch_size];
        for (row, &batch) in self.batch_ids.iter().enumerate() {
            let better = match best[batch] {
                Some(current) => OrderedFloat(self.costs[row]) < OrderedFloat(self.costs[current]),
                None => true,
            };
            if better {
                best[batch] = Some(row);
            }
        }

        best.into_iter()
            .flatten()
            .map(|row| (self.tours[row].clone(), self.costs[row]))
            .collect()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Keep the best `beam_width` expansions per instance.
///
/// Returns `(parents, actions, scores)` with rows grouped by instance.
fn select_expansions(
    state: &PdpState,
    expansions: Vec<Expansion>,
    beam_width: usize,
) -> Result<(Vec<usize>, Vec<usize>, Vec<f64>), SearchError> {
    let mut per_batch: Vec<Vec<Expansion>> = vec![Vec::new(); state.batch_size()];
    for expansion in expansions {
        per_batch[state.batch_ids()[expansion.parent]].push(expansion);
    }

    let capacity = state.batch_size() * beam_width;
    let mut parents = Vec::with_capacity(capacity);
    let mut actions = Vec::with_capacity(capacity);
    let mut scores = Vec::with_capacity(capacity);

    for (batch, mut candidates) in per_batch.into_iter().enumerate() {
        if candidates.is_empty() {
            log::warn!("no feasible expansion left for instance {} at step {}", batch, state.step_count());
            return Err(SearchError::Exhausted {
                batch,
                step: state.step_count(),
            });
        }
        candidates.sort_by_key(rank);
        for e in candidates.into_iter().take(beam_width) {
            parents.push(e.parent);
            actions.push(e.action);
            scores.push(e.score);
        }
    }

    Ok((parents, actions, scores))
}

/// Follow `parents` back from the final rows to rebuild every tour.
fn backtrack(history: &[(Vec<usize>, Vec<usize>)], num_rows: usize) -> Vec<Vec<usize>> {
    let mut tours: Vec<Vec<usize>> = vec![Vec::with_capacity(history.len() + 1); num_rows];
    let mut cursor: Vec<usize> = (0..num_rows).collect();

    for (parents, actions) in history.iter().rev() {
        for (tour, row) in tours.iter_mut().zip(cursor.iter_mut()) {
            tour.push(actions[*row]);
            *row = parents[*row];
        }
    }

    for tour in tours.iter_mut() {
        tour.push(0);
        tour.reverse();
    }
    tours
}

/// Run beam search from `state` until every hypothesis is terminal.
///
/// `propose` is called once per step with the current beam and must return
/// expansions of unmasked nodes only.
pub fn beam_search<F>(state: PdpState, beam_width: usize, mut propose: F) -> Result<BeamSearchResult, SearchError>
where
    F: FnMut(&BatchBeam) -> Vec<Expansion>,
{
    if beam_width == 0 {
        return Err(SearchError::InvalidBeamWidth(beam_width));
    }

    let batch_size = state.batch_size();
    let mut beam = BatchBeam::new(state);
    let mut history: Vec<(Vec<usize>, Vec<usize>)> = Vec::with_capacity(beam.state.num_nodes());

    while !beam.state.is_terminal() {
        let expansions = propose(&beam);
        let (parents, actions, scores) = select_expansions(&beam.state, expansions, beam_width)?;

        log::debug!(
            "beam step {}: {} hypotheses kept for {} instances",
            beam.state.step_count(),
            parents.len(),
            batch_size
        );

        let state = beam.state.duplicate(&parents).update(&actions)?;
        history.push((parents, actions));
        beam = BatchBeam { state, scores };
    }

    let tours = backtrack(&history, beam.num_rows());
    let costs = beam.state.get_final_cost();

    Ok(BeamSearchResult {
        batch_ids: beam.state.batch_ids().to_vec(),
        scores: beam.scores,
        tours,
        costs,
        batch_size,
    })
}

/// Beam-search every instance with `policy` and return the best tour of each.
///
/// The returned tours are checked by the tour evaluator before they are
/// handed out.
pub fn solve_beam<P: Policy>(
    instances: &[PdpInstance],
    policy: &P,
    config: &SearchConfig,
) -> Result<Vec<Solution>, SearchError> {
    let start = Instant::now();
    let fixed = policy.precompute_fixed(instances);
    let state = PdpState::initialize(instances, config.state)?;

    log::info!(
        "Beam search ({}) on {} instances, width {}",
        policy.name(),
        instances.len(),
        config.beam_width
    );

    let result = beam_search(state, config.beam_width, |beam| {
        policy.propose_expansions(
            beam,
            &fixed,
            config.expand_size,
            config.normalize,
            config.max_calc_batch_size,
        )
    })?;

    let best = result.best_per_batch();
    let tours: Vec<Vec<usize>> = best.iter().map(|(tour, _)| tour.clone()).collect();
    validate_tours(instances, &tours)?;

    let elapsed = start.elapsed().as_secs_f64();
    let algorithm = format!("{}-Beam{}", policy.name(), config.beam_width);
    let solutions = instances
        .iter()
        .zip(tours)
        .enumerate()
        .map(|(batch, (instance, tour))| {
            let mut solution = Solution::from_tour(instance, tour, &algorithm);
            solution.batch_index = batch;
            solution.computation_time = elapsed;
            solution
        })
        .collect();

    Ok(solutions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::get_costs;
    use crate::dataset::{DatasetConfig, PdpDataset};
    use crate::instance::tests::{line_instance, square_instance};
    use crate::search::{greedy_rollout, NearestNeighborPolicy};
    use crate::state::StateConfig;

    fn dataset(size: usize, num_samples: usize) -> PdpDataset {
        PdpDataset::generate(&DatasetConfig { size, num_samples, seed: 7, ..Default::default() }).unwrap()
    }

    fn run(instances: &[PdpInstance], width: usize) -> BeamSearchResult {
        let policy = NearestNeighborPolicy::new();
        let fixed = policy.precompute_fixed(instances);
        let state = PdpState::initialize(instances, StateConfig::default()).unwrap();
        beam_search(state, width, |beam| policy.propose_expansions(beam, &fixed, None, true, 64)).unwrap()
    }

    #[test]
    fn test_line_instance_has_one_tour() {
        let result = run(&[line_instance()], 3);
        assert_eq!(result.tours, vec![vec![0, 1, 2]]);
        assert!((result.costs[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_beam_width_bounds_hypotheses() {
        let data = dataset(8, 3);
        let result = run(data.instances(), 4);
        assert!(result.tours.len() <= 12);
        for batch in 0..3 {
            let count = result.batch_ids.iter().filter(|&&b| b == batch).count();
            assert!(count >= 1 && count <= 4);
        }
    }

    #[test]
    fn test_beam_tours_are_valid_and_costs_match() {
        let data = dataset(10, 4);
        let result = run(data.instances(), 3);

        let instances: Vec<PdpInstance> = result.batch_ids.iter().map(|&b| data[b].clone()).collect();
        let costs = get_costs(&instances, &result.tours).unwrap();
        for (a, b) in costs.iter().zip(&result.costs) {
            assert!((a - b).abs() < 1e-9);
        }

        let best = result.best_per_batch();
        assert_eq!(best.len(), 4);
    }

    #[test]
    fn test_hypotheses_are_distinct() {
        let result = run(&[square_instance(0.2, 0.2)], 10);
        // 0 -> {1,2} -> ... gives 6 precedence-feasible orders with capacity to spare
        assert_eq!(result.tours.len(), 6);
        let mut tours = result.tours.clone();
        tours.sort();
        tours.dedup();
        assert_eq!(tours.len(), 6);
    }

    #[test]
    fn test_width_one_matches_greedy() {
        let data = dataset(12, 5);
        let config = SearchConfig::default();
        let policy = NearestNeighborPolicy::new();

        let beam = solve_beam(data.instances(), &policy, &config).unwrap();
        let greedy = greedy_rollout(data.instances(), &policy, &config).unwrap();
        for (b, g) in beam.iter().zip(&greedy) {
            assert_eq!(b.tour, g.tour);
        }
    }

    #[test]
    fn test_solve_beam_returns_one_solution_per_instance() {
        let data = dataset(10, 4);
        let config = SearchConfig { beam_width: 5, expand_size: Some(3), ..Default::default() };
        let solutions = solve_beam(data.instances(), &NearestNeighborPolicy::new(), &config).unwrap();
        assert_eq!(solutions.len(), 4);
        for (i, solution) in solutions.iter().enumerate() {
            assert_eq!(solution.batch_index, i);
            assert!(solution.feasible);
            assert_eq!(solution.tour.len(), 11);
        }
    }

    #[test]
    fn test_zero_width_is_rejected() {
        let state = PdpState::initialize(&[line_instance()], StateConfig::default()).unwrap();
        let err = beam_search(state, 0, |_| Vec::new()).unwrap_err();
        assert!(matches!(err, SearchError::InvalidBeamWidth(0)));
    }

    #[test]
    fn test_dead_end_exhausts_batch() {
        let stuck = PdpInstance::new([0.0, 0.0], vec![[1.0, 0.0], [2.0, 0.0]], vec![1.5, -1.5]).unwrap();
        let err = run_err(&[line_instance(), stuck]);
        assert!(matches!(err, SearchError::Exhausted { batch: 1, step: 1 }));
    }

    fn run_err(instances: &[PdpInstance]) -> SearchError {
        let policy = NearestNeighborPolicy::new();
        let fixed = policy.precompute_fixed(instances);
        let state = PdpState::initialize(instances, StateConfig::default()).unwrap();
        beam_search(state, 2, |beam| policy.propose_expansions(beam, &fixed, None, true, 64)).unwrap_err()
    }

    #[test]
    fn test_backtrack() {
        // step 1: two rows from row 0; step 2: both from row 1
        let history = vec![(vec![0, 0], vec![1, 2]), (vec![1, 1], vec![1, 3])];
        let tours = backtrack(&history, 2);
        assert_eq!(tours, vec![vec![0, 2, 1], vec![0, 2, 3]]);
    }
}
