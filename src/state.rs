//! Batched routing state for constructing capacitated PDP tours step by step.
//!
//! A [`PdpState`] holds one partial tour per row. Rows start as one row per
//! instance and multiply during beam search through [`PdpState::duplicate`].
//! The coordinate and demand tables never change after
//! [`PdpState::initialize`] and are shared by every state derived from it;
//! the progress fields (current node, visited set, load, length) are owned by
//! each state.
//!
//! Lifecycle:
//! - Active while `step_count < 2k + 1`. The depot is masked.
//! - Terminal once every node has been visited. The depot is then the only
//!   unmasked node, but the return leg is never applied as a transition: it is
//!   added by [`PdpState::get_final_cost`] and by the tour evaluator.
//!
//! All rows advance in lockstep, so one step counter serves the whole batch.

use crate::error::{BatchError, InvalidSelectionError};
use crate::instance::{euclidean, Coord, PdpInstance};
use fixedbitset::FixedBitSet;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Vehicle parameters used when building a state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Maximum onboard load
    pub capacity: f64,
    /// Slack allowed above `capacity` before a pickup is masked, absorbs
    /// rounding in the running load
    pub tolerance: f64,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            capacity: 1.0,
            tolerance: 1e-9,
        }
    }
}

/// Coordinate and demand tables for a batch, one row of `num_nodes` entries
/// per instance, depot first.
#[derive(Debug)]
struct BatchTables {
    coords: Vec<Coord>,
    demands: Vec<f64>,
    batch_size: usize,
    num_nodes: usize,
}

impl BatchTables {
    fn build(instances: &[PdpInstance]) -> Result<Self, BatchError> {
        let first = instances.first().ok_or(BatchError::Empty)?;
        let num_nodes = first.num_nodes();

        let mut coords = Vec::with_capacity(instances.len() * num_nodes);
        let mut demands = Vec::with_capacity(instances.len() * num_nodes);
        for (row, instance) in instances.iter().enumerate() {
            if instance.num_nodes() != num_nodes {
                return Err(BatchError::Ragged {
                    row,
                    expected: num_nodes,
                    found: instance.num_nodes(),
                });
            }
            coords.extend(instance.coordinates());
            demands.extend(instance.node_demands());
        }

        Ok(BatchTables {
            coords,
            demands,
            batch_size: instances.len(),
            num_nodes,
        })
    }

    #[inline]
    fn coord(&self, batch: usize, node: usize) -> &Coord {
        &self.coords[batch * self.num_nodes + node]
    }

    #[inline]
    fn demand(&self, batch: usize, node: usize) -> f64 {
        self.demands[batch * self.num_nodes + node]
    }

    fn coords_of(&self, batch: usize) -> &[Coord] {
        &self.coords[batch * self.num_nodes..(batch + 1) * self.num_nodes]
    }
}

/// Row-major boolean mask, `true` where a node must not be selected next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    num_nodes: usize,
    data: Vec<bool>,
}

impl Mask {
    pub fn num_rows(&self) -> usize {
        self.data.len() / self.num_nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn row(&self, row: usize) -> &[bool] {
        &self.data[row * self.num_nodes..(row + 1) * self.num_nodes]
    }

    #[inline]
    pub fn is_masked(&self, row: usize, node: usize) -> bool {
        self.data[row * self.num_nodes + node]
    }

    /// Nodes of `row` that may be selected
    pub fn feasible_nodes(&self, row: usize) -> impl Iterator<Item = usize> + '_ {
        self.row(row)
            .iter()
            .enumerate()
            .filter(|&(_, &masked)| !masked)
            .map(|(node, _)| node)
    }

    pub fn rows(&self) -> std::slice::Chunks<'_, bool> {
        self.data.chunks(self.num_nodes)
    }
}

/// Batched partial tours over pickup/delivery pairs
#[derive(Debug, Clone)]
pub struct PdpState {
    tables: Arc<BatchTables>,
    config: StateConfig,
    /// Instance row each hypothesis belongs to
    ids: Vec<usize>,
    /// Row of the source state each hypothesis was duplicated from
    parents: Vec<usize>,
    /// Last visited node
    prev_a: Vec<usize>,
    visited: Vec<FixedBitSet>,
    used_capacity: Vec<f64>,
    /// Travelled length, without the return leg
    lengths: Vec<f64>,
    /// Nodes visited so far, depot included
    step: usize,
}

impl PdpState {
    /// One row per instance, every row at the depot with an empty vehicle.
    pub fn initialize(instances: &[PdpInstance], config: StateConfig) -> Result<Self, BatchError> {
        let tables = BatchTables::build(instances)?;
        let batch_size = tables.batch_size;
        let num_nodes = tables.num_nodes;

        let mut start = FixedBitSet::with_capacity(num_nodes);
        start.insert(0);

        Ok(PdpState {
            tables: Arc::new(tables),
            config,
            ids: (0..batch_size).collect(),
            parents: (0..batch_size).collect(),
            prev_a: vec![0; batch_size],
            visited: vec![start; batch_size],
            used_capacity: vec![0.0; batch_size],
            lengths: vec![0.0; batch_size],
            step: 1,
        })
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    /// Number of hypotheses currently tracked
    pub fn num_rows(&self) -> usize {
        self.ids.len()
    }

    /// Number of instances the state was built from
    pub fn batch_size(&self) -> usize {
        self.tables.batch_size
    }

    /// Nodes per tour, depot included (2k + 1)
    pub fn num_nodes(&self) -> usize {
        self.tables.num_nodes
    }

    pub fn num_pairs(&self) -> usize {
        (self.tables.num_nodes - 1) / 2
    }

    pub fn step_count(&self) -> usize {
        self.step
    }

    pub fn current_node(&self) -> &[usize] {
        &self.prev_a
    }

    pub fn visited_set(&self, row: usize) -> &FixedBitSet {
        &self.visited[row]
    }

    pub fn used_capacity(&self) -> &[f64] {
        &self.used_capacity
    }

    pub fn lengths(&self) -> &[f64] {
        &self.lengths
    }

    pub fn batch_ids(&self) -> &[usize] {
        &self.ids
    }

    pub fn beam_parents(&self) -> &[usize] {
        &self.parents
    }

    /// Demand of `node` in the instance of hypothesis `row`
    #[inline]
    pub fn demand(&self, row: usize, node: usize) -> f64 {
        self.tables.demand(self.ids[row], node)
    }

    /// Coordinate of `node` in the instance of hypothesis `row`
    #[inline]
    pub fn coord(&self, row: usize, node: usize) -> Coord {
        *self.tables.coord(self.ids[row], node)
    }

    /// Coordinate table of the instance of hypothesis `row`, depot first
    pub fn instance_coordinates(&self, row: usize) -> &[Coord] {
        self.tables.coords_of(self.ids[row])
    }

    /// Distance from the current node of `row` to `node`
    #[inline]
    pub fn distance_from_current(&self, row: usize, node: usize) -> f64 {
        let batch = self.ids[row];
        euclidean(self.tables.coord(batch, self.prev_a[row]), self.tables.coord(batch, node))
    }

    pub fn is_terminal(&self) -> bool {
        self.step >= self.tables.num_nodes
    }

    /// Terminal and every row has visited every node.
    pub fn all_finished(&self) -> bool {
        let n = self.tables.num_nodes;
        self.is_terminal() && self.visited.iter().all(|v| v.count_ones(..) == n)
    }

    fn is_node_masked(&self, row: usize, node: usize) -> bool {
        let visited = &self.visited[row];
        if self.is_terminal() {
            return node != 0;
        }
        if node == 0 || visited.contains(node) {
            return true;
        }
        let k = self.num_pairs();
        if node > k {
            return !visited.contains(node - k);
        }
        self.used_capacity[row] + self.demand(row, node) > self.config.capacity + self.config.tolerance
    }

    fn fill_row_mask(&self, row: usize, out: &mut [bool]) {
        for (node, masked) in out.iter_mut().enumerate() {
            *masked = self.is_node_masked(row, node);
        }
    }

    /// Mask of one row, the scalar reference for [`PdpState::get_mask`].
    pub fn row_mask(&self, row: usize) -> Vec<bool> {
        let mut out = vec![false; self.tables.num_nodes];
        self.fill_row_mask(row, &mut out);
        out
    }

    /// Mask for every row: visited nodes, deliveries whose pickup is still
    /// open, and pickups that would overflow the vehicle are masked.
    pub fn get_mask(&self) -> Mask {
        let n = self.tables.num_nodes;
        let mut data = vec![false; self.num_rows() * n];
        data.par_chunks_mut(n)
            .enumerate()
            .for_each(|(row, out)| self.fill_row_mask(row, out));
        Mask { num_nodes: n, data }
    }

    /// Whether `row` has at least one selectable node.
    pub fn has_feasible_move(&self, row: usize) -> bool {
        (0..self.tables.num_nodes).any(|node| !self.is_node_masked(row, node))
    }

    /// Advance every row by its selected node.
    pub fn update(&self, selected: &[usize]) -> Result<Self, InvalidSelectionError> {
        if selected.len() != self.num_rows() {
            return Err(InvalidSelectionError::RowCount {
                expected: self.num_rows(),
                found: selected.len(),
            });
        }
        if self.is_terminal() {
            return Err(InvalidSelectionError::Terminal);
        }

        let n = self.tables.num_nodes;
        for (row, &node) in selected.iter().enumerate() {
            if node >= n {
                return Err(InvalidSelectionError::OutOfRange { row, node, num_nodes: n });
            }
            if self.is_node_masked(row, node) {
                return Err(InvalidSelectionError::Masked { row, node });
            }
        }

        let visited = self
            .visited
            .par_iter()
            .zip(selected.par_iter())
            .map(|(v, &node)| {
                let mut v = v.clone();
                v.insert(node);
                v
            })
            .collect();

        let used_capacity = selected
            .iter()
            .enumerate()
            .map(|(row, &node)| self.used_capacity[row] + self.demand(row, node))
            .collect();

        let lengths = selected
            .iter()
            .enumerate()
            .map(|(row, &node)| self.lengths[row] + self.distance_from_current(row, node))
            .collect();

        Ok(PdpState {
            tables: Arc::clone(&self.tables),
            config: self.config,
            ids: self.ids.clone(),
            parents: self.parents.clone(),
            prev_a: selected.to_vec(),
            visited,
            used_capacity,
            lengths,
            step: self.step + 1,
        })
    }

    /// New state whose rows are copies of `indices` (repeats allowed).
    ///
    /// # Panics
    ///
    /// Panics if an index is not a row of this state.
    pub fn duplicate(&self, indices: &[usize]) -> Self {
        PdpState {
            tables: Arc::clone(&self.tables),
            config: self.config,
            ids: indices.iter().map(|&i| self.ids[i]).collect(),
            parents: indices.to_vec(),
            prev_a: indices.iter().map(|&i| self.prev_a[i]).collect(),
            visited: indices.iter().map(|&i| self.visited[i].clone()).collect(),
            used_capacity: indices.iter().map(|&i| self.used_capacity[i]).collect(),
            lengths: indices.iter().map(|&i| self.lengths[i]).collect(),
            step: self.step,
        }
    }

    /// Travelled length plus the leg back to the depot, per row.
    pub fn get_final_cost(&self) -> Vec<f64> {
        (0..self.num_rows())
            .map(|row| self.lengths[row] + self.distance_from_current(row, 0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::get_costs;
    use crate::instance::tests::{line_instance, square_instance};

    fn three_pairs(d: [f64; 3]) -> PdpInstance {
        PdpInstance::new(
            [0.0, 0.0],
            vec![[0.1, 0.0], [0.2, 0.0], [0.3, 0.0], [0.4, 0.0], [0.5, 0.0], [0.6, 0.0]],
            vec![d[0], d[1], d[2], -d[0], -d[1], -d[2]],
        )
        .unwrap()
    }

    #[test]
    fn test_initial_state() {
        let state = PdpState::initialize(&[square_instance(0.3, 0.4)], StateConfig::default()).unwrap();
        assert_eq!(state.num_rows(), 1);
        assert_eq!(state.step_count(), 1);
        assert_eq!(state.current_node(), &[0]);
        assert!(state.visited_set(0).contains(0));
        assert_eq!(state.visited_set(0).count_ones(..), 1);
        assert_eq!(state.used_capacity(), &[0.0]);
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_initial_mask_blocks_deliveries() {
        let batch = vec![square_instance(0.3, 0.4), square_instance(0.5, 0.2)];
        let state = PdpState::initialize(&batch, StateConfig::default()).unwrap();
        let mask = state.get_mask();
        for row in 0..2 {
            assert_eq!(mask.row(row), &[true, false, false, true, true]);
            assert_eq!(state.row_mask(row), mask.row(row));
        }
    }

    #[test]
    fn test_delivery_unmasked_after_pickup() {
        let state = PdpState::initialize(&[square_instance(0.3, 0.4)], StateConfig::default()).unwrap();
        let state = state.update(&[2]).unwrap();
        let mask = state.get_mask();
        assert_eq!(mask.row(0), &[true, false, true, true, false]);
        assert!((state.used_capacity()[0] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_capacity_masks_pickup() {
        let state = PdpState::initialize(&[square_instance(0.6, 0.5)], StateConfig::default()).unwrap();
        let state = state.update(&[1]).unwrap();
        let mask = state.get_mask();
        // 0.6 + 0.5 exceeds unit capacity
        assert!(mask.is_masked(0, 2));
        assert!(!mask.is_masked(0, 3));

        let err = state.update(&[2]).unwrap_err();
        assert_eq!(err, InvalidSelectionError::Masked { row: 0, node: 2 });
    }

    #[test]
    fn test_capacity_is_configurable() {
        let config = StateConfig { capacity: 2.0, ..Default::default() };
        let state = PdpState::initialize(&[square_instance(0.6, 0.5)], config).unwrap();
        let state = state.update(&[1]).unwrap();
        assert!(!state.get_mask().is_masked(0, 2));
    }

    #[test]
    fn test_capacity_boundary_is_allowed() {
        // 0.33 + 0.56 + 0.11 rounds above 1.0
        let instance = three_pairs([0.33, 0.56, 0.11]);
        let state = PdpState::initialize(&[instance.clone()], StateConfig::default()).unwrap();
        let state = state.update(&[1]).unwrap().update(&[2]).unwrap();
        assert!(state.used_capacity()[0] + 0.11 > 1.0);
        assert!(!state.get_mask().is_masked(0, 3));

        let strict = StateConfig { capacity: 1.0, tolerance: 0.0 };
        let state = PdpState::initialize(&[instance], strict).unwrap();
        let state = state.update(&[1]).unwrap().update(&[2]).unwrap();
        assert!(state.get_mask().is_masked(0, 3));
    }

    #[test]
    fn test_exact_boundary_is_allowed() {
        let state = PdpState::initialize(&[square_instance(0.5, 0.5)], StateConfig::default()).unwrap();
        let state = state.update(&[1]).unwrap();
        assert!(!state.get_mask().is_masked(0, 2));
    }

    #[test]
    fn test_update_rejects_bad_selection() {
        let state = PdpState::initialize(&[line_instance()], StateConfig::default()).unwrap();
        assert_eq!(
            state.update(&[2]).unwrap_err(),
            InvalidSelectionError::Masked { row: 0, node: 2 }
        );
        assert_eq!(
            state.update(&[0]).unwrap_err(),
            InvalidSelectionError::Masked { row: 0, node: 0 }
        );
        assert!(matches!(state.update(&[7]), Err(InvalidSelectionError::OutOfRange { .. })));
        assert!(matches!(state.update(&[1, 1]), Err(InvalidSelectionError::RowCount { .. })));
    }

    #[test]
    fn test_terminal_after_all_nodes() {
        let batch = vec![square_instance(0.3, 0.4), square_instance(0.2, 0.1)];
        let mut state = PdpState::initialize(&batch, StateConfig::default()).unwrap();
        for (i, step) in [[1, 2], [2, 1], [3, 3], [4, 4]].iter().enumerate() {
            assert!(!state.is_terminal(), "terminal too early at update {}", i);
            state = state.update(step).unwrap();
        }
        assert!(state.is_terminal());
        assert!(state.all_finished());
        assert_eq!(state.step_count(), 5);
        for used in state.used_capacity() {
            assert!(used.abs() < 1e-12);
        }

        let mask = state.get_mask();
        for row in 0..2 {
            assert_eq!(mask.row(row), &[false, true, true, true, true]);
        }
        assert_eq!(state.update(&[0, 0]).unwrap_err(), InvalidSelectionError::Terminal);
    }

    #[test]
    fn test_final_cost_matches_evaluator() {
        let instance = square_instance(0.3, 0.4);
        let mut state = PdpState::initialize(&[instance.clone()], StateConfig::default()).unwrap();
        let tour = vec![0, 2, 1, 4, 3];
        for &node in &tour[1..] {
            state = state.update(&[node]).unwrap();
        }
        let costs = get_costs(&[instance], &[tour]).unwrap();
        assert!((state.get_final_cost()[0] - costs[0]).abs() < 1e-12);

        let line = PdpState::initialize(&[line_instance()], StateConfig::default()).unwrap();
        let line = line.update(&[1]).unwrap().update(&[2]).unwrap();
        assert!((line.get_final_cost()[0] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_rows_are_independent() {
        let batch = vec![square_instance(0.3, 0.4), square_instance(0.2, 0.1)];
        let state = PdpState::initialize(&batch, StateConfig::default()).unwrap();
        let beam = state.duplicate(&[0, 0, 1]);

        assert_eq!(beam.num_rows(), 3);
        assert_eq!(beam.batch_ids(), &[0, 0, 1]);
        assert_eq!(beam.beam_parents(), &[0, 0, 1]);

        let next = beam.update(&[1, 2, 1]).unwrap();
        assert!(next.visited_set(0).contains(1));
        assert!(!next.visited_set(0).contains(2));
        assert!(next.visited_set(1).contains(2));
        assert!(!next.visited_set(1).contains(1));
        assert!((next.used_capacity()[0] - 0.3).abs() < 1e-12);
        assert!((next.used_capacity()[1] - 0.4).abs() < 1e-12);
        assert!((next.used_capacity()[2] - 0.2).abs() < 1e-12);

        // the source states are untouched
        assert_eq!(beam.visited_set(0).count_ones(..), 1);
        assert_eq!(state.used_capacity(), &[0.0, 0.0]);
    }

    #[test]
    fn test_duplicate_reads_the_right_instance() {
        let batch = vec![square_instance(0.3, 0.4), square_instance(0.2, 0.1)];
        let state = PdpState::initialize(&batch, StateConfig::default()).unwrap();
        let beam = state.duplicate(&[1]);
        assert_eq!(beam.demand(0, 1), 0.2);
        assert_eq!(beam.instance_coordinates(0), batch[1].coordinates().as_slice());
        assert_eq!(beam.coord(0, 4), [0.5, 0.5]);
        let beam = beam.update(&[2]).unwrap();
        assert!((beam.used_capacity()[0] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_batch_shape_errors() {
        assert_eq!(
            PdpState::initialize(&[], StateConfig::default()).unwrap_err(),
            BatchError::Empty
        );
        let err = PdpState::initialize(&[line_instance(), square_instance(0.1, 0.1)], StateConfig::default())
            .unwrap_err();
        assert_eq!(err, BatchError::Ragged { row: 1, expected: 3, found: 5 });
    }

    #[test]
    fn test_dead_end_detection() {
        let instance = PdpInstance::new([0.0, 0.0], vec![[1.0, 0.0], [2.0, 0.0]], vec![1.5, -1.5]).unwrap();
        let state = PdpState::initialize(&[instance], StateConfig::default()).unwrap();
        assert!(!state.has_feasible_move(0));
        assert_eq!(state.get_mask().feasible_nodes(0).count(), 0);
    }
}
