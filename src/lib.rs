//! Capacitated Pickup and Delivery Problem (PDP) toolkit
//!
//! Builds and decodes tours for single-vehicle pickup-and-delivery instances
//! where every pickup load must stay on board until its paired delivery and
//! the vehicle never carries more than its capacity.
//!
//! # Features
//!
//! - Seeded dataset generation and JSON dataset files
//! - Batched tour validation and cost evaluation
//! - A batched routing state with capacity-aware masking for step-by-step decoding
//! - Greedy rollout and beam search over a pluggable scoring policy
//! - Benchmarking and visualization tools
//!
//! # Example
//!
//! ```no_run
//! use cap_pdp::dataset::{DatasetConfig, PdpDataset};
//! use cap_pdp::search::{solve_beam, NearestNeighborPolicy, SearchConfig};
//! use cap_pdp::cost::get_costs;
//!
//! let dataset = PdpDataset::generate(&DatasetConfig { size: 20, num_samples: 64, ..Default::default() }).unwrap();
//!
//! let config = SearchConfig { beam_width: 10, ..Default::default() };
//! let solutions = solve_beam(dataset.instances(), &NearestNeighborPolicy::new(), &config).unwrap();
//!
//! let tours: Vec<Vec<usize>> = solutions.iter().map(|s| s.tour.clone()).collect();
//! let costs = get_costs(dataset.instances(), &tours).unwrap();
//! println!("Average cost: {:.4}", costs.iter().sum::<f64>() / costs.len() as f64);
//! ```

pub mod error;
pub mod instance;
pub mod dataset;
pub mod cost;
pub mod state;
pub mod search;
pub mod solution;
pub mod benchmark;
pub mod visualization;

pub use dataset::PdpDataset;
pub use instance::PdpInstance;
pub use solution::Solution;
pub use state::PdpState;
