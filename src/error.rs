//! Error types for dataset loading, tour evaluation, state transitions and search.
//!
//! Every error here is fail-fast: the call that detects the problem returns it
//! and nothing is retried or partially recovered.

use std::fmt;
use std::path::PathBuf;

/// Dataset file or dataset parameters that cannot be turned into instances.
#[derive(Debug)]
pub enum FormatError {
    /// File does not carry the expected serialized-data extension
    Extension { path: PathBuf, expected: &'static str },
    /// File could not be read or written
    Io(std::io::Error),
    /// File content is not a valid sequence of records
    Parse(serde_json::Error),
    /// A record parsed but violates the instance invariants
    Malformed { record: usize, reason: String },
    /// Requested node count is zero or odd
    InvalidSize(usize),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Extension { path, expected } => write!(
                f,
                "dataset file {:?} must have the .{} extension",
                path, expected
            ),
            FormatError::Io(e) => write!(f, "dataset io error: {}", e),
            FormatError::Parse(e) => write!(f, "dataset parse error: {}", e),
            FormatError::Malformed { record, reason } => {
                write!(f, "record {} is malformed: {}", record, reason)
            }
            FormatError::InvalidSize(size) => write!(
                f,
                "graph size must be a positive even number of nodes, got {}",
                size
            ),
        }
    }
}

impl std::error::Error for FormatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FormatError::Io(e) => Some(e),
            FormatError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FormatError {
    fn from(e: std::io::Error) -> Self {
        FormatError::Io(e)
    }
}

impl From<serde_json::Error> for FormatError {
    fn from(e: serde_json::Error) -> Self {
        FormatError::Parse(e)
    }
}

/// The rule a candidate tour breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TourViolation {
    /// Number of tours differs from the number of instances
    BatchSize { instances: usize, tours: usize },
    NotStartingAtDepot,
    NotVisitingAllNodes,
    DeliveringWithoutPickup,
}

impl fmt::Display for TourViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TourViolation::BatchSize { instances, tours } => {
                write!(f, "got {} tours for {} instances", tours, instances)
            }
            TourViolation::NotStartingAtDepot => f.write_str("not starting at depot"),
            TourViolation::NotVisitingAllNodes => f.write_str("not visiting all nodes"),
            TourViolation::DeliveringWithoutPickup => f.write_str("delivering without pick-up"),
        }
    }
}

/// A batch of tours contains at least one structurally invalid tour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTourError {
    pub violation: TourViolation,
    /// Batch rows that break `violation`, ascending
    pub rows: Vec<usize>,
}

impl fmt::Display for InvalidTourError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (rows {:?})", self.violation, self.rows)
    }
}

impl std::error::Error for InvalidTourError {}

/// The caller asked the routing state to move to a node it may not select.
///
/// This signals a broken policy or search driver, not bad user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidSelectionError {
    RowCount { expected: usize, found: usize },
    Terminal,
    OutOfRange { row: usize, node: usize, num_nodes: usize },
    Masked { row: usize, node: usize },
}

impl fmt::Display for InvalidSelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidSelectionError::RowCount { expected, found } => {
                write!(f, "expected one selection per row ({}), got {}", expected, found)
            }
            InvalidSelectionError::Terminal => f.write_str("state is terminal, no node can be selected"),
            InvalidSelectionError::OutOfRange { row, node, num_nodes } => write!(
                f,
                "row {} selected node {} but the graph has {} nodes",
                row, node, num_nodes
            ),
            InvalidSelectionError::Masked { row, node } => {
                write!(f, "row {} selected masked node {}", row, node)
            }
        }
    }
}

impl std::error::Error for InvalidSelectionError {}

/// A batch of instances cannot share one routing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    Empty,
    /// Instance `row` has a different node count than row 0
    Ragged { row: usize, expected: usize, found: usize },
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::Empty => f.write_str("cannot build a routing state from an empty batch"),
            BatchError::Ragged { row, expected, found } => write!(
                f,
                "instance {} has {} nodes, batch expects {}",
                row, found, expected
            ),
        }
    }
}

impl std::error::Error for BatchError {}

/// Failure of a greedy rollout or beam search.
#[derive(Debug)]
pub enum SearchError {
    Batch(BatchError),
    Selection(InvalidSelectionError),
    Tour(InvalidTourError),
    InvalidBeamWidth(usize),
    /// Every hypothesis of batch row `batch` was pruned before completion
    Exhausted { batch: usize, step: usize },
    /// Row `row` has no unmasked node although it is not terminal
    NoFeasibleMove { row: usize, step: usize },
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::Batch(e) => write!(f, "{}", e),
            SearchError::Selection(e) => write!(f, "invalid selection: {}", e),
            SearchError::Tour(e) => write!(f, "invalid tour: {}", e),
            SearchError::InvalidBeamWidth(w) => write!(f, "beam width must be at least 1, got {}", w),
            SearchError::Exhausted { batch, step } => {
                write!(f, "batch row {} has no hypotheses left at step {}", batch, step)
            }
            SearchError::NoFeasibleMove { row, step } => {
                write!(f, "row {} has no feasible node at step {}", row, step)
            }
        }
    }
}

impl std::error::Error for SearchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SearchError::Batch(e) => Some(e),
            SearchError::Selection(e) => Some(e),
            SearchError::Tour(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BatchError> for SearchError {
    fn from(e: BatchError) -> Self {
        SearchError::Batch(e)
    }
}

impl From<InvalidSelectionError> for SearchError {
    fn from(e: InvalidSelectionError) -> Self {
        SearchError::Selection(e)
    }
}

impl From<InvalidTourError> for SearchError {
    fn from(e: InvalidTourError) -> Self {
        SearchError::Tour(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tour_error_message_names_rule() {
        let err = InvalidTourError {
            violation: TourViolation::DeliveringWithoutPickup,
            rows: vec![1, 3],
        };
        let msg = err.to_string();
        assert!(msg.contains("delivering without pick-up"));
        assert!(msg.contains("[1, 3]"));
    }

    #[test]
    fn test_search_error_wraps_selection() {
        let err: SearchError = InvalidSelectionError::Masked { row: 0, node: 2 }.into();
        assert!(matches!(err, SearchError::Selection(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
