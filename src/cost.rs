//! Tour validation and cost evaluation.
//!
//! A complete tour is a permutation of `0..=2k` starting at the depot. Its cost
//! is the closed Euclidean length: every consecutive leg plus the leg from the
//! last node back to the depot. The return leg is never part of the tour
//! itself.

use crate::error::{InvalidTourError, TourViolation};
use crate::instance::PdpInstance;
use rayon::prelude::*;

/// Rules in the order they are checked
const RULES: [TourViolation; 3] = [
    TourViolation::NotStartingAtDepot,
    TourViolation::NotVisitingAllNodes,
    TourViolation::DeliveringWithoutPickup,
];

/// Closed Euclidean length of one tour.
///
/// # Panics
///
/// Panics if the tour names a node outside the instance. Use [`get_costs`]
/// for tours that have not been validated.
pub fn tour_length(instance: &PdpInstance, tour: &[usize]) -> f64 {
    if tour.is_empty() {
        return 0.0;
    }

    let mut length = 0.0;
    for leg in tour.windows(2) {
        length += instance.distance(leg[0], leg[1]);
    }
    length += instance.distance(tour[tour.len() - 1], tour[0]);

    length
}

/// Position of every node in the tour (`usize::MAX` for nodes never seen).
///
/// Only meaningful for tours that are permutations.
pub fn visit_ranks(tour: &[usize]) -> Vec<usize> {
    let mut ranks = vec![usize::MAX; tour.len()];
    for (pos, &node) in tour.iter().enumerate() {
        if node < ranks.len() {
            ranks[node] = pos;
        }
    }
    ranks
}

fn starts_at_depot(tour: &[usize]) -> bool {
    tour.first() == Some(&0)
}

fn visits_all_nodes(instance: &PdpInstance, tour: &[usize]) -> bool {
    if tour.len() != instance.num_nodes() {
        return false;
    }
    let mut sorted = tour.to_vec();
    sorted.sort_unstable();
    sorted.iter().enumerate().all(|(i, &node)| i == node)
}

fn respects_precedence(instance: &PdpInstance, tour: &[usize]) -> bool {
    let k = instance.num_pairs();
    let ranks = visit_ranks(tour);
    (1..=k).all(|pickup| ranks[pickup] < ranks[pickup + k])
}

/// Whether one tour breaks `rule`. Precedence is only decidable for
/// permutations, so non-permutations count as breaking it too.
fn breaks(rule: TourViolation, instance: &PdpInstance, tour: &[usize]) -> bool {
    match rule {
        TourViolation::NotStartingAtDepot => !starts_at_depot(tour),
        TourViolation::NotVisitingAllNodes => !visits_all_nodes(instance, tour),
        TourViolation::DeliveringWithoutPickup => {
            !visits_all_nodes(instance, tour) || !respects_precedence(instance, tour)
        }
        TourViolation::BatchSize { .. } => false,
    }
}

fn offending_rows(rule: TourViolation, instances: &[PdpInstance], tours: &[Vec<usize>]) -> Vec<usize> {
    instances
        .par_iter()
        .zip(tours.par_iter())
        .enumerate()
        .filter(|(_, (instance, tour))| breaks(rule, instance, tour))
        .map(|(row, _)| row)
        .collect()
}

fn check_batch_size(instances: &[PdpInstance], tours: &[Vec<usize>]) -> Result<(), InvalidTourError> {
    if instances.len() != tours.len() {
        return Err(InvalidTourError {
            violation: TourViolation::BatchSize {
                instances: instances.len(),
                tours: tours.len(),
            },
            rows: Vec::new(),
        });
    }
    Ok(())
}

/// Validate a batch of tours, stopping at the first rule any row breaks.
///
/// The error carries every row that breaks that rule.
pub fn validate_tours(instances: &[PdpInstance], tours: &[Vec<usize>]) -> Result<(), InvalidTourError> {
    check_batch_size(instances, tours)?;

    for rule in RULES {
        let rows = offending_rows(rule, instances, tours);
        if !rows.is_empty() {
            return Err(InvalidTourError { violation: rule, rows });
        }
    }

    Ok(())
}

/// Every rule broken by the batch with the rows breaking it.
///
/// A row that is not a permutation is reported under `NotVisitingAllNodes`
/// only; precedence is checked on permutations.
pub fn collect_violations(instances: &[PdpInstance], tours: &[Vec<usize>]) -> Vec<InvalidTourError> {
    if let Err(e) = check_batch_size(instances, tours) {
        return vec![e];
    }

    let mut violations = Vec::new();
    for rule in RULES {
        let rows = match rule {
            TourViolation::DeliveringWithoutPickup => instances
                .par_iter()
                .zip(tours.par_iter())
                .enumerate()
                .filter(|(_, (instance, tour))| {
                    visits_all_nodes(instance, tour) && !respects_precedence(instance, tour)
                })
                .map(|(row, _)| row)
                .collect(),
            _ => offending_rows(rule, instances, tours),
        };
        if !rows.is_empty() {
            violations.push(InvalidTourError { violation: rule, rows });
        }
    }
    violations
}

/// Closed tour length of every row, without validation.
///
/// # Panics
///
/// Panics if a tour names a node outside its instance.
pub fn tour_lengths(instances: &[PdpInstance], tours: &[Vec<usize>]) -> Vec<f64> {
    instances
        .par_iter()
        .zip(tours.par_iter())
        .map(|(instance, tour)| tour_length(instance, tour))
        .collect()
}

/// Validate a batch of complete tours and return their closed lengths.
pub fn get_costs(instances: &[PdpInstance], tours: &[Vec<usize>]) -> Result<Vec<f64>, InvalidTourError> {
    validate_tours(instances, tours)?;
    Ok(tour_lengths(instances, tours))
}
