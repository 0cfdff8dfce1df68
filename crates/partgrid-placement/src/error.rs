//! Placement error types.

use thiserror::Error;

/// Errors that can occur while resolving placements or building devices.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("hardware address must not be empty")]
    EmptyAddress,

    #[error("hardware backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("hardware query {operation} failed for {address}: {message}")]
    Query {
        address: String,
        operation: &'static str,
        message: String,
    },

    #[error("no placement resolved for profile {profile_id} on {address}")]
    MissingPlacement { address: String, profile_id: u32 },

    #[error("inconsistent capability data for {address}: {reason}")]
    InconsistentCapability { address: String, reason: String },

    #[error("device {device} consumes unknown counter set {counter_set}")]
    UnknownCounterSet { device: String, counter_set: String },

    #[error("device {device} consumes counter {counter} not declared by {counter_set}")]
    UnknownCounter {
        device: String,
        counter_set: String,
        counter: String,
    },

    #[error("placement resolution cancelled")]
    Cancelled,

    #[error("placement resolution exceeded its deadline")]
    DeadlineExceeded,
}

impl PlacementError {
    /// Whether the caller's outer retry policy should try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlacementError::BackendUnavailable(_)
                | PlacementError::Query { .. }
                | PlacementError::DeadlineExceeded
        )
    }
}

pub type PlacementResult<T> = Result<T, PlacementError>;
