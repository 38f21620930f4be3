use tracing::debug;

use crate::model::*;

use super::error::check_id;
use super::{Engine, EngineError};

/// `[a_start, a_end)` and `[b_start, b_end)` share at least one instant.
/// Back-to-back ranges do not overlap.
pub fn overlaps(a_start: Timestamp, a_end: Timestamp, b_start: Timestamp, b_end: Timestamp) -> bool {
    a_start < b_end && b_start < a_end
}

pub fn validate_range(start: Timestamp, end: Timestamp) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidRange { start, end });
    }
    Ok(Span::new(start, end))
}

/// First reservation (other than `exclude`) that overlaps `span`.
pub fn first_conflict<'a>(
    reservations: &'a [Reservation],
    span: &Span,
    exclude: Option<ReservationId>,
) -> Option<&'a Reservation> {
    reservations
        .iter()
        .filter(|r| Some(r.id) != exclude)
        .find(|r| overlaps(r.start, r.end, span.start, span.end))
}

impl Engine {
    /// Whether `[start, end)` is free on the bike, ignoring `exclude`
    /// (the reservation being edited). Advisory only: callers that write
    /// must hold the bike lock across check and write, see `submit_booking`.
    pub async fn is_available(
        &self,
        bike_id: BikeId,
        start: Timestamp,
        end: Timestamp,
        exclude: Option<ReservationId>,
    ) -> Result<bool, EngineError> {
        match self.check_available(bike_id, start, end, exclude).await {
            Ok(()) => Ok(true),
            Err(EngineError::AvailabilityConflict { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(super) async fn check_available(
        &self,
        bike_id: BikeId,
        start: Timestamp,
        end: Timestamp,
        exclude: Option<ReservationId>,
    ) -> Result<(), EngineError> {
        let span = validate_range(start, end)?;
        check_id(bike_id)?;
        let existing = self.store.list_reservations_for_bike(bike_id).await?;
        if let Some(conflict) = first_conflict(&existing, &span, exclude) {
            debug!(
                "bike {bike_id}: [{start}, {end}) overlaps reservation {}",
                conflict.id
            );
            return Err(EngineError::AvailabilityConflict {
                bike_id,
                conflicting: conflict.id,
            });
        }
        Ok(())
    }
}
