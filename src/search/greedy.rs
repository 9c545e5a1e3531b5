//! Greedy rollout: one hypothesis per instance, best expansion at every step.

use super::{rank, BatchBeam, Expansion, Policy, SearchConfig};
use crate::cost::validate_tours;
use crate::error::SearchError;
use crate::instance::PdpInstance;
use crate::solution::Solution;
use crate::state::PdpState;
use std::time::Instant;

/// Decode every instance by always taking the highest-scored feasible node.
pub fn greedy_rollout<P: Policy>(
    instances: &[PdpInstance],
    policy: &P,
    config: &SearchConfig,
) -> Result<Vec<Solution>, SearchError> {
    let start = Instant::now();
    let fixed = policy.precompute_fixed(instances);
    let mut beam = BatchBeam::new(PdpState::initialize(instances, config.state)?);
    let mut tours: Vec<Vec<usize>> = vec![vec![0]; beam.num_rows()];

    log::info!("Greedy rollout ({}) on {} instances", policy.name(), instances.len());

    while !beam.state.is_terminal() {
        let expansions = policy.propose_expansions(
            &beam,
            &fixed,
            Some(1),
            config.normalize,
            config.max_calc_batch_size,
        );

        let mut best: Vec<Option<Expansion>> = vec![None; beam.num_rows()];
        for e in expansions {
            let slot = &mut best[e.parent];
            if slot.map_or(true, |current| rank(&e) < rank(&current)) {
                *slot = Some(e);
            }
        }

        let mut actions = Vec::with_capacity(best.len());
        let mut scores = Vec::with_capacity(best.len());
        for (row, choice) in best.into_iter().enumerate() {
            let Some(e) = choice else {
                let step = beam.state.step_count();
                log::warn!("no feasible move for row {} at step {}", row, step);
                return Err(SearchError::NoFeasibleMove { row, step });
            };
            actions.push(e.action);
            scores.push(e.score);
        }

        log::debug!("greedy step {}: {:?}", beam.state.step_count(), actions);

        let state = beam.state.update(&actions)?;
        for (tour, &node) in tours.iter_mut().zip(&actions) {
            tour.push(node);
        }
        beam = BatchBeam { state, scores };
    }

    validate_tours(instances, &tours)?;

    let elapsed = start.elapsed().as_secs_f64();
    let algorithm = format!("{}-Greedy", policy.name());
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
    use crate::dataset::{DatasetConfig, PdpDataset};
    use crate::instance::tests::{line_instance, square_instance};
    use crate::search::NearestNeighborPolicy;

    #[test]
    fn test_greedy_on_square() {
        let instance = square_instance(0.3, 0.4);
        let solutions =
            greedy_rollout(&[instance], &NearestNeighborPolicy::new(), &SearchConfig::default()).unwrap();
        // (1,0), (1,1), then the centre delivery is closer than (0,1)
        assert_eq!(solutions[0].tour, vec![0, 1, 2, 4, 3]);
        assert!(solutions[0].feasible);
        assert_eq!(solutions[0].algorithm, "NearestNeighbor-Greedy");
    }

    #[test]
    fn test_greedy_respects_capacity() {
        // both pickups together exceed the vehicle, so pair 1 must be delivered first
        let instance = square_instance(0.6, 0.5);
        let solutions =
            greedy_rollout(&[instance], &NearestNeighborPolicy::new(), &SearchConfig::default()).unwrap();
        assert_eq!(solutions[0].tour, vec![0, 1, 3, 2, 4]);
    }

    #[test]
    fn test_greedy_on_generated_batch() {
        let data = PdpDataset::generate(&DatasetConfig { size: 20, num_samples: 8, seed: 5, ..Default::default() })
            .unwrap();
        let solutions =
            greedy_rollout(data.instances(), &NearestNeighborPolicy::new(), &SearchConfig::default()).unwrap();
        assert_eq!(solutions.len(), 8);
        for (i, solution) in solutions.iter().enumerate() {
            assert_eq!(solution.batch_index, i);
            assert!(solution.feasible);
            assert!(solution.max_load(&data[i]) <= 1.0 + 1e-9);
            assert!(solution.min_load(&data[i]) >= -1e-9);
        }
    }

    #[test]
    fn test_greedy_reports_dead_end() {
        let stuck = PdpInstance::new([0.0, 0.0], vec![[1.0, 0.0], [2.0, 0.0]], vec![1.5, -1.5]).unwrap();
        let err = greedy_rollout(&[line_instance(), stuck], &NearestNeighborPolicy::new(), &SearchConfig::default())
            .unwrap_err();
        assert!(matches!(err, SearchError::NoFeasibleMove { row: 1, step: 1 }));
    }
}
