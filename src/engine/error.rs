use crate::model::{BikeId, CustomerId, ReservationId, Timestamp};

/// Validation key injected into the form's error channel on overlap.
pub const RESERVATION_OVERLAP: &str = "ReservationOverlap";

/// Validation key for a start that is not strictly before the end.
pub const INVALID_RANGE: &str = "InvalidRange";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(i64),
    #[error("invalid range: start {start} is not before end {end}")]
    InvalidRange { start: Timestamp, end: Timestamp },
    #[error("bike {bike_id} is already reserved by reservation {conflicting}")]
    AvailabilityConflict {
        bike_id: BikeId,
        conflicting: ReservationId,
    },
    #[error("cannot delete {entity} {id}: it still has reservations")]
    HasReservations { entity: &'static str, id: i64 },
    #[error("account {key} is already linked to customer {owner}")]
    UserKeyTaken { key: String, owner: CustomerId },
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn bike_not_found(id: BikeId) -> Self {
        EngineError::NotFound { entity: "bike", id }
    }

    pub fn customer_not_found(id: i64) -> Self {
        EngineError::NotFound { entity: "customer", id }
    }

    pub fn reservation_not_found(id: ReservationId) -> Self {
        EngineError::NotFound { entity: "reservation", id }
    }

    /// Malformed ids render the same "not found" view as missing ones.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound { .. } | EngineError::InvalidIdentifier(_)
        )
    }

    /// Named key for the presentation layer's validation channel, if this
    /// error is a user-correctable form error rather than a failure.
    pub fn validation_key(&self) -> Option<&'static str> {
        match self {
            EngineError::AvailabilityConflict { .. } => Some(RESERVATION_OVERLAP),
            EngineError::InvalidRange { .. } => Some(INVALID_RANGE),
            _ => None,
        }
    }
}

/// Reject non-positive ids before they reach storage.
pub(crate) fn check_id(id: i64) -> Result<i64, EngineError> {
    if id <= 0 {
        return Err(EngineError::InvalidIdentifier(id));
    }
    Ok(id)
}
