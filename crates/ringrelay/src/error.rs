//! Error types for ring exchange and relay operations.

use crate::fabric::ContextId;
use crate::world::ThreadLevel;
use crate::Rank;
use thiserror::Error;

/// Result type for fabric, exchange and relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code used when a participant aborts the group on a precondition failure.
pub const ABORT_EXIT_CODE: i32 = 1;

/// Errors that can occur while running a participant group.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A required startup argument is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The runtime's concurrency support is too weak for the requested mode.
    #[error("insufficient thread support: {required:?} is needed, {provided:?} was provided")]
    Capability {
        /// Level the mode needs.
        required: ThreadLevel,
        /// Level the world was started with.
        provided: ThreadLevel,
    },

    /// Some participant aborted the whole group.
    #[error("group aborted by participant {origin} (code {code}): {reason}")]
    Aborted {
        /// Rank that triggered the abort.
        origin: Rank,
        /// Exit code requested by the aborting participant.
        code: i32,
        /// Human-readable cause.
        reason: String,
    },

    /// A group must contain at least one participant.
    #[error("invalid group size: {0}")]
    InvalidGroupSize(usize),

    /// A rank outside `[0, size)` was addressed.
    #[error("invalid rank {rank} for a group of {size}")]
    InvalidRank {
        /// Offending rank.
        rank: Rank,
        /// Group size.
        size: usize,
    },

    /// The matched message carries more elements than the receive buffer holds.
    #[error("message truncated: buffer holds {capacity} elements, {incoming} arrived")]
    Truncated {
        /// Receive buffer length in elements.
        capacity: usize,
        /// Elements carried by the message.
        incoming: usize,
    },

    /// The matched message is not a whole number of receive-buffer elements.
    #[error("element size mismatch: {bytes} payload bytes do not split into {element_size}-byte elements")]
    ElementMismatch {
        /// Payload length in bytes.
        bytes: usize,
        /// Size of one receive-buffer element.
        element_size: usize,
    },

    /// A duplicated context id was announced but is not registered.
    #[error("unknown communication context {0}")]
    UnknownContext(ContextId),

    /// Post-exchange verification found data that did not come from the predecessor.
    #[error("ring shift mismatch at rank {rank}: expected {expected}, received {actual}")]
    ShiftMismatch {
        /// Rank whose received sum is wrong.
        rank: Rank,
        /// Sum sent by the predecessor.
        expected: f64,
        /// Sum actually received.
        actual: f64,
    },

    /// The execution unit hosting a participant could not be started.
    #[error("cannot start participant {rank}: {reason}")]
    Spawn {
        /// Rank that failed to start.
        rank: Rank,
        /// OS error text.
        reason: String,
    },

    /// A participant thread panicked.
    #[error("participant {rank} panicked")]
    ParticipantPanicked {
        /// Rank of the panicking participant.
        rank: Rank,
    },
}

impl Error {
    /// Returns `true` if this error is the secondary effect of a group abort.
    #[inline]
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Returns `true` for precondition failures that must abort the whole group.
    #[inline]
    pub fn is_fatal_precondition(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Capability { .. })
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Aborted { code, .. } => *code,
            _ => ABORT_EXIT_CODE,
        }
    }
}

/// Collects per-unit outcomes in order. On failure, a genuine error wins over
/// the `Aborted` errors it caused in the other units.
pub(crate) fn root_cause<R>(outcomes: impl IntoIterator<Item = Result<R>>) -> Result<Vec<R>> {
    let mut values = Vec::new();
    let mut cause: Option<Error> = None;
    let mut aborted: Option<Error> = None;
    for outcome in outcomes {
        match outcome {
            Ok(value) => values.push(value),
            Err(err) if err.is_abort() => {
                aborted.get_or_insert(err);
            }
            Err(err) => {
                cause.get_or_insert(err);
            }
        }
    }
    match cause.or(aborted) {
        Some(err) => Err(err),
        None => Ok(values),
    }
}
