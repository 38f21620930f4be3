use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::*;

use super::error::{INVALID_RANGE, RESERVATION_OVERLAP, check_id};
use super::form::FormValues;
use super::overlap::validate_range;
use super::{Engine, EngineError};

/// Field key used when a client picks a customer outside their scope.
pub const CUSTOMER_FIELD: &str = "CustomerId";

/// A submitted booking form. `reservation_id` is set when editing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub reservation_id: Option<ReservationId>,
    pub bike_id: BikeId,
    pub customer_id: CustomerId,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl BookingRequest {
    pub fn draft(&self) -> ReservationDraft {
        ReservationDraft {
            bike_id: self.bike_id,
            customer_id: self.customer_id,
            start: self.start,
            end: self.end,
        }
    }
}

/// Named form errors, keyed by field or rule name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, key: &str, message: impl Into<String>) {
        self.0.entry(key.to_owned()).or_default().push(message.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn messages(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Nothing was written. Carries what the form needs to re-render with the
/// submitted values intact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRejection {
    pub errors: ValidationErrors,
    pub submitted: BookingRequest,
    pub form: FormValues,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Accepted(Reservation),
    Rejected(Box<BookingRejection>),
}

impl BookingOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BookingOutcome::Accepted(_))
    }
}

impl Engine {
    /// Create or edit a reservation so that no two reservations on a bike
    /// ever overlap.
    ///
    /// The availability check and the write happen under the per-bike lock
    /// (both bikes' locks when an edit moves the reservation), so concurrent
    /// submissions for the same bike are serialized and at most one of two
    /// overlapping requests is accepted.
    ///
    /// User-correctable problems come back as `BookingOutcome::Rejected`;
    /// unknown ids and storage failures are errors.
    pub async fn submit_booking(
        &self,
        request: BookingRequest,
        viewer: &ViewerContext,
    ) -> Result<BookingOutcome, EngineError> {
        let mut errors = ValidationErrors::default();

        if let Err(e) = validate_range(request.start, request.end) {
            errors.add(INVALID_RANGE, e.to_string());
            return self.reject(request, viewer, errors, "invalid_range").await;
        }
        self.require_bike(request.bike_id).await?;

        let scoped_customers = self.selectable_customers(viewer).await?;
        let in_scope = |customer_id: CustomerId| {
            viewer.is_admin() || scoped_customers.iter().any(|c| c.id == customer_id)
        };
        if !in_scope(request.customer_id) {
            errors.add(CUSTOMER_FIELD, "You can only book for your own customer account.");
            return self.reject(request, viewer, errors, "customer_scope").await;
        }

        let (existing, guards) = match request.reservation_id {
            Some(id) => {
                check_id(id)?;
                let (existing, guards) = self
                    .lock_reservation(id, Some(request.bike_id))
                    .await?
                    .ok_or(EngineError::reservation_not_found(id))?;
                // A client must not learn about reservations outside their scope.
                if !in_scope(existing.customer_id) {
                    return Err(EngineError::reservation_not_found(id));
                }
                (Some(existing), guards)
            }
            None => (None, self.lock_bikes(&[request.bike_id]).await),
        };

        match self
            .check_available(request.bike_id, request.start, request.end, request.reservation_id)
            .await
        {
            Ok(()) => {}
            Err(e @ EngineError::AvailabilityConflict { .. }) => {
                drop(guards);
                info!("booking rejected: {e}");
                errors.add(
                    RESERVATION_OVERLAP,
                    "The bike is already reserved for part of the selected period.",
                );
                return self.reject(request, viewer, errors, "overlap").await;
            }
            Err(e) => return Err(e),
        }

        let reservation = match existing {
            Some(existing) => {
                self.replace_locked(&existing, request.draft()).await?;
                request.draft().into_reservation(existing.id)
            }
            None => self.insert_locked(request.draft()).await?,
        };
        drop(guards);

        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => "accepted")
            .increment(1);
        Ok(BookingOutcome::Accepted(reservation))
    }

    async fn reject(
        &self,
        submitted: BookingRequest,
        viewer: &ViewerContext,
        errors: ValidationErrors,
        reason: &'static str,
    ) -> Result<BookingOutcome, EngineError> {
        metrics::counter!(
            crate::observability::BOOKINGS_TOTAL,
            "outcome" => "rejected",
            "reason" => reason
        )
        .increment(1);
        let form = self
            .build_form_values(Some(submitted.bike_id), viewer, submitted.reservation_id)
            .await?;
        Ok(BookingOutcome::Rejected(Box::new(BookingRejection {
            errors,
            submitted,
            form,
        })))
    }
}
