//! Decoded tours of the capacitated PDP.
//!
//! A [`Solution`] carries a complete tour together with the numbers the CLI,
//! the benchmark and the visualizer report about it.

use crate::cost::{tour_length, validate_tours};
use crate::instance::PdpInstance;
use crate::state::StateConfig;
use serde::{Deserialize, Serialize};
use std::slice;

/// A decoded tour and its evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    /// Visit order, depot first; the return to the depot is implicit
    pub tour: Vec<usize>,
    /// Closed Euclidean tour length
    pub cost: f64,
    /// Whether the tour passed the evaluator
    pub feasible: bool,
    /// Decoder that produced the tour
    pub algorithm: String,
    /// Wall-clock time of the decoding call in seconds
    pub computation_time: f64,
    /// Position of the instance in its batch
    pub batch_index: usize,
}

impl Solution {
    /// Evaluate `tour` on `instance`.
    ///
    /// Infeasible tours are kept with `feasible == false`; their cost is still
    /// the closed length of whatever order they describe.
    pub fn from_tour(instance: &PdpInstance, tour: Vec<usize>, algorithm: &str) -> Self {
        let (cost, feasible) = evaluate(instance, &tour);

        Solution {
            tour,
            cost,
            feasible,
            algorithm: algorithm.to_string(),
            computation_time: 0.0,
            batch_index: 0,
        }
    }

    /// Vehicle load after each visit, starting empty at the depot and ending
    /// with the return to it.
    pub fn load_profile(&self, instance: &PdpInstance) -> Vec<f64> {
        if self.tour.is_empty() || !in_range(instance, &self.tour) {
            return Vec::new();
        }

        let mut load = 0.0;
        let mut profile = Vec::with_capacity(self.tour.len() + 1);
        profile.push(load);

        for &node in self.tour.iter().skip(1) {
            load += instance.node_demand(node);
            profile.push(load);
        }

        // back at the depot, empty for any complete tour
        profile.push(0.0);
        profile
    }

    /// Get maximum load during tour
    pub fn max_load(&self, instance: &PdpInstance) -> f64 {
        self.load_profile(instance).into_iter().fold(0.0, f64::max)
    }

    /// Get minimum load during tour
    pub fn min_load(&self, instance: &PdpInstance) -> f64 {
        self.load_profile(instance).into_iter().fold(0.0, f64::min)
    }

    /// Whether the load never exceeds the vehicle capacity, within tolerance
    pub fn respects_capacity(&self, instance: &PdpInstance, config: &StateConfig) -> bool {
        self.max_load(instance) <= config.capacity + config.tolerance
    }
}

fn in_range(instance: &PdpInstance, tour: &[usize]) -> bool {
    tour.iter().all(|&node| node < instance.num_nodes())
}

/// `(cost, feasible)`; tours naming unknown nodes cost infinity.
fn evaluate(instance: &PdpInstance, tour: &[usize]) -> (f64, bool) {
    if !in_range(instance, tour) {
        return (f64::INFINITY, false);
    }
    let feasible = validate_tours(slice::from_ref(instance), &[tour.to_vec()]).is_ok();
    (tour_length(instance, tour), feasible)
}

impl std::fmt::Display for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Solution #{} ({})", self.batch_index, self.algorithm)?;
        writeln!(f, "  Cost: {:.4}", self.cost)?;
        writeln!(f, "  Feasible: {}", self.feasible)?;
        writeln!(f, "  Time: {:.4}s", self.computation_time)?;
        writeln!(f, "  Tour: {:?}", self.tour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::tests::{line_instance, square_instance};

    #[test]
    fn test_empty_tour() {
        let sol = Solution::from_tour(&line_instance(), Vec::new(), "manual");
        assert!(!sol.feasible);
        assert_eq!(sol.cost, 0.0);
        assert!(sol.load_profile(&line_instance()).is_empty());
    }

    #[test]
    fn test_from_tour() {
        let sol = Solution::from_tour(&line_instance(), vec![0, 1, 2], "manual");
        assert!(sol.feasible);
        assert!((sol.cost - 4.0).abs() < 1e-12);
        assert_eq!(sol.algorithm, "manual");
        assert_eq!(sol.batch_index, 0);
    }

    #[test]
    fn test_infeasible_tour_is_flagged() {
        let sol = Solution::from_tour(&line_instance(), vec![0, 2, 1], "manual");
        assert!(!sol.feasible);
        assert!(sol.cost.is_finite());

        let unknown = Solution::from_tour(&line_instance(), vec![0, 1, 7], "manual");
        assert!(!unknown.feasible);
        assert_eq!(unknown.cost, f64::INFINITY);
        assert!(unknown.load_profile(&line_instance()).is_empty());
    }

    #[test]
    fn test_load_profile() {
        let instance = square_instance(0.3, 0.4);
        let sol = Solution::from_tour(&instance, vec![0, 1, 2, 4, 3], "manual");
        let profile = sol.load_profile(&instance);
        let expected = [0.0, 0.3, 0.7, 0.3, 0.0, 0.0];
        assert_eq!(profile.len(), expected.len());
        for (a, b) in profile.iter().zip(expected) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!((sol.max_load(&instance) - 0.7).abs() < 1e-12);
        assert!(sol.min_load(&instance).abs() < 1e-12);
    }

    #[test]
    fn test_capacity_check() {
        let instance = square_instance(0.6, 0.5);
        let config = StateConfig::default();
        let overloaded = Solution::from_tour(&instance, vec![0, 1, 2, 3, 4], "manual");
        let sequential = Solution::from_tour(&instance, vec![0, 1, 3, 2, 4], "manual");
        // the evaluator does not check capacity
        assert!(overloaded.feasible);
        assert!(!overloaded.respects_capacity(&instance, &config));
        assert!(sequential.respects_capacity(&instance, &config));
    }

    #[test]
    fn test_json_roundtrip() {
        let sol = Solution::from_tour(&line_instance(), vec![0, 1, 2], "manual");
        let json = serde_json::to_string(&sol).unwrap();
        let back: Solution = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tour, sol.tour);
        assert_eq!(back.cost, sol.cost);
    }
}
