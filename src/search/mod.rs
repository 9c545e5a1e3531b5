//! Search drivers over the batched routing state.
//!
//! A [`Policy`] scores the next node of every hypothesis. [`beam_search`]
//! keeps the best `beam_width` hypotheses per instance at every step and
//! [`greedy_rollout`] follows the single best expansion of each row.

pub mod beam;
pub mod greedy;
pub mod policy;

pub use beam::*;
pub use greedy::*;
pub use policy::*;

use crate::instance::PdpInstance;
use crate::state::{PdpState, StateConfig};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// One candidate continuation: move hypothesis `parent` to node `action`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Expansion {
    /// Row of the current state being expanded
    pub parent: usize,
    /// Node to visit next
    pub action: usize,
    /// Cumulative score of the hypothesis after the move, higher is better
    pub score: f64,
}

/// Ordering key: best score first, ties broken by parent then action.
pub(crate) fn rank(e: &Expansion) -> (Reverse<OrderedFloat<f64>>, usize, usize) {
    (Reverse(OrderedFloat(e.score)), e.parent, e.action)
}

/// Hypotheses under search and their cumulative scores
#[derive(Debug, Clone)]
pub struct BatchBeam {
    pub state: PdpState,
    pub scores: Vec<f64>,
}

impl BatchBeam {
    pub fn new(state: PdpState) -> Self {
        let scores = vec![0.0; state.num_rows()];
        BatchBeam { state, scores }
    }

    pub fn num_rows(&self) -> usize {
        self.state.num_rows()
    }
}

/// Next-node scoring model.
///
/// `precompute_fixed` runs once per batch of instances; its result is passed
/// back on every `propose_expansions` call.
pub trait Policy: Sync {
    type Fixed: Sync;

    fn precompute_fixed(&self, instances: &[PdpInstance]) -> Self::Fixed;

    /// Candidate expansions of every row of `beam`. Only unmasked nodes may be
    /// proposed. `expand_size` caps the candidates per row, `normalize` turns
    /// raw scores into log-probabilities, and rows are evaluated in chunks of
    /// at most `max_calc_batch_size`.
    fn propose_expansions(
        &self,
        beam: &BatchBeam,
        fixed: &Self::Fixed,
        expand_size: Option<usize>,
        normalize: bool,
        max_calc_batch_size: usize,
    ) -> Vec<Expansion>;

    fn name(&self) -> &str;
}

/// Search configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Hypotheses kept per instance
    pub beam_width: usize,
    /// Candidates proposed per hypothesis, all feasible nodes when `None`
    pub expand_size: Option<usize>,
    /// Score expansions as log-probabilities
    pub normalize: bool,
    /// Rows scored per policy chunk
    pub max_calc_batch_size: usize,
    /// Vehicle parameters of the routing state
    pub state: StateConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            beam_width: 1,
            expand_size: None,
            normalize: true,
            max_calc_batch_size: 4096,
            state: StateConfig::default(),
        }
    }
}
