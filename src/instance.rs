//! Module for representing capacitated PDP instances.
//!
//! An instance holds a depot, `2k` locations (k pickups followed by their k
//! deliveries) and the signed demand of every location. In tour indices node 0
//! is the depot, nodes `1..=k` are pickups and node `p + k` is the delivery
//! paired with pickup `p`.

use crate::error::FormatError;
use serde::{Deserialize, Serialize};

/// A 2D point in the unit square
pub type Coord = [f64; 2];

/// Euclidean (L2) distance between two points
#[inline]
pub fn euclidean(a: &Coord, b: &Coord) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}

/// Represents one capacitated pickup-and-delivery instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdpInstance {
    /// Start and end location of the vehicle
    pub depot: Coord,
    /// k pickup locations followed by the k matching delivery locations
    pub locations: Vec<Coord>,
    /// Signed demand per location: positive for pickups, the exact negation
    /// for the paired delivery
    pub demand: Vec<f64>,
}

impl PdpInstance {
    /// Build an instance, checking the pickup/delivery pairing.
    pub fn new(depot: Coord, locations: Vec<Coord>, demand: Vec<f64>) -> Result<Self, FormatError> {
        let instance = PdpInstance { depot, locations, demand };
        instance.validate().map_err(|reason| FormatError::Malformed { record: 0, reason })?;
        Ok(instance)
    }

    /// Check the structural invariants, returning a description of the first
    /// broken one.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.locations.len();
        if n == 0 || n % 2 != 0 {
            return Err(format!("expected a positive even number of locations, got {}", n));
        }
        if self.demand.len() != n {
            return Err(format!("{} locations but {} demands", n, self.demand.len()));
        }
        let k = n / 2;
        for i in 0..k {
            if !(self.demand[i] > 0.0) {
                return Err(format!("pickup demand[{}] = {} must be positive", i, self.demand[i]));
            }
            if self.demand[i] != -self.demand[i + k] {
                return Err(format!(
                    "demand[{}] = {} is not the negation of demand[{}] = {}",
                    i + k,
                    self.demand[i + k],
                    i,
                    self.demand[i]
                ));
            }
        }
        Ok(())
    }

    /// Number of pickup/delivery pairs (k)
    #[inline]
    pub fn num_pairs(&self) -> usize {
        self.locations.len() / 2
    }

    /// Number of tour nodes including the depot (2k + 1)
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.locations.len() + 1
    }

    /// Coordinate table indexed by tour node (depot prepended)
    pub fn coordinates(&self) -> Vec<Coord> {
        let mut coords = Vec::with_capacity(self.num_nodes());
        coords.push(self.depot);
        coords.extend_from_slice(&self.locations);
        coords
    }

    /// Demand table indexed by tour node (depot has zero demand)
    pub fn node_demands(&self) -> Vec<f64> {
        let mut demands = Vec::with_capacity(self.num_nodes());
        demands.push(0.0);
        demands.extend_from_slice(&self.demand);
        demands
    }

    /// Coordinate of a tour node
    #[inline]
    pub fn coord(&self, node: usize) -> Coord {
        if node == 0 {
            self.depot
        } else {
            self.locations[node - 1]
        }
    }

    /// Demand of a tour node
    #[inline]
    pub fn node_demand(&self, node: usize) -> f64 {
        if node == 0 {
            0.0
        } else {
            self.demand[node - 1]
        }
    }

    pub fn is_pickup(&self, node: usize) -> bool {
        node >= 1 && node <= self.num_pairs()
    }

    pub fn is_delivery(&self, node: usize) -> bool {
        node > self.num_pairs() && node < self.num_nodes()
    }

    /// The other node of a pickup/delivery pair, `None` for the depot
    pub fn paired_node(&self, node: usize) -> Option<usize> {
        let k = self.num_pairs();
        if self.is_pickup(node) {
            Some(node + k)
        } else if self.is_delivery(node) {
            Some(node - k)
        } else {
            None
        }
    }

    /// Euclidean distance between two tour nodes
    #[inline]
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        euclidean(&self.coord(i), &self.coord(j))
    }

    /// Get statistics about the instance
    pub fn statistics(&self) -> InstanceStatistics {
        let k = self.num_pairs();
        let pickups = &self.demand[..k];
        let total_pickup: f64 = pickups.iter().sum();
        let min_demand = pickups.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_demand = pickups.iter().cloned().fold(0.0, f64::max);

        let n = self.num_nodes();
        let mut distances = Vec::with_capacity(n * (n - 1) / 2);
        for i in 0..n {
            for j in i + 1..n {
                distances.push(self.distance(i, j));
            }
        }
        let avg_distance = distances.iter().sum::<f64>() / distances.len().max(1) as f64;
        let max_distance = distances.iter().cloned().fold(0.0, f64::max);

        InstanceStatistics {
            num_nodes: n,
            num_pairs: k,
            total_pickup,
            min_demand,
            max_demand,
            avg_distance,
            max_distance,
        }
    }
}

/// Statistics about a PDP instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatistics {
    pub num_nodes: usize,
    pub num_pairs: usize,
    pub total_pickup: f64,
    pub min_demand: f64,
    pub max_demand: f64,
    pub avg_distance: f64,
    pub max_distance: f64,
}

impl std::fmt::Display for InstanceStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "  Nodes: {} (1 depot + {} pickup/delivery pairs)", self.num_nodes, self.num_pairs)?;
        writeln!(f, "  Total pickup load: {:.4}", self.total_pickup)?;
        writeln!(f, "  Pickup demand range: [{:.4}, {:.4}]", self.min_demand, self.max_demand)?;
        writeln!(f, "  Avg distance: {:.4}", self.avg_distance)?;
        writeln!(f, "  Max distance: {:.4}", self.max_distance)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Depot at the origin, pickup at (1, 0), delivery at (2, 0)
    pub(crate) fn line_instance() -> PdpInstance {
        PdpInstance::new([0.0, 0.0], vec![[1.0, 0.0], [2.0, 0.0]], vec![0.5, -0.5]).unwrap()
    }

    /// Two pairs on the corners of the unit square
    pub(crate) fn square_instance(d0: f64, d1: f64) -> PdpInstance {
        PdpInstance::new(
            [0.0, 0.0],
            vec![[1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.5, 0.5]],
            vec![d0, d1, -d0, -d1],
        )
        .unwrap()
    }

    #[test]
    fn test_node_types() {
        let instance = square_instance(0.3, 0.4);

        assert!(!instance.is_pickup(0));
        assert!(!instance.is_delivery(0));
        assert!(instance.is_pickup(1));
        assert!(instance.is_pickup(2));
        assert!(instance.is_delivery(3));
        assert!(instance.is_delivery(4));
        assert!(!instance.is_delivery(5));

        assert_eq!(instance.paired_node(1), Some(3));
        assert_eq!(instance.paired_node(4), Some(2));
        assert_eq!(instance.paired_node(0), None);
    }

    #[test]
    fn test_tables_prepend_depot() {
        let instance = line_instance();
        assert_eq!(instance.coordinates(), vec![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]]);
        assert_eq!(instance.node_demands(), vec![0.0, 0.5, -0.5]);
        assert_eq!(instance.node_demand(2), -0.5);
    }

    #[test]
    fn test_distance_calculation() {
        let instance = PdpInstance::new([0.0, 0.0], vec![[3.0, 4.0], [0.0, 0.0]], vec![1.0, -1.0]).unwrap();
        assert!((instance.distance(0, 1) - 5.0).abs() < 1e-10);
        assert!((instance.distance(1, 0) - 5.0).abs() < 1e-10);
        assert_eq!(instance.distance(0, 2), 0.0);
    }

    #[test]
    fn test_rejects_unpaired_demand() {
        let err = PdpInstance::new([0.0, 0.0], vec![[1.0, 0.0], [2.0, 0.0]], vec![0.5, -0.4]).unwrap_err();
        assert!(matches!(err, FormatError::Malformed { .. }));

        let odd = PdpInstance::new([0.0, 0.0], vec![[1.0, 0.0]], vec![0.5]);
        assert!(odd.is_err());
    }

    #[test]
    fn test_rejects_non_positive_pickups() {
        let flipped = PdpInstance::new([0.0, 0.0], vec![[1.0, 0.0], [2.0, 0.0]], vec![-1.5, 1.5]).unwrap_err();
        assert!(matches!(flipped, FormatError::Malformed { record: 0, .. }));

        // one flipped pair among valid ones
        let mixed = PdpInstance::new(
            [0.0, 0.0],
            vec![[1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.5, 0.5]],
            vec![-0.5, 1.4, 0.5, -1.4],
        );
        assert!(mixed.is_err());

        let zero = PdpInstance::new([0.0, 0.0], vec![[1.0, 0.0], [2.0, 0.0]], vec![0.0, 0.0]);
        assert!(zero.is_err());

        let nan = PdpInstance::new([0.0, 0.0], vec![[1.0, 0.0], [2.0, 0.0]], vec![f64::NAN, f64::NAN]);
        assert!(nan.is_err());
    }

    #[test]
    fn test_statistics() {
        let stats = square_instance(0.2, 0.4).statistics();
        assert_eq!(stats.num_nodes, 5);
        assert_eq!(stats.num_pairs, 2);
        assert!((stats.total_pickup - 0.6).abs() < 1e-12);
        assert_eq!(stats.min_demand, 0.2);
        assert_eq!(stats.max_demand, 0.4);
        assert!(stats.to_string().contains("2 pickup/delivery pairs"));
    }
}
