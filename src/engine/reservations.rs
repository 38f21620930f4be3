use tracing::{debug, info};

use crate::model::*;

use super::error::check_id;
use super::overlap::validate_range;
use super::{Engine, EngineError, now};

/// A reservation joined with the bike and customer it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDetails {
    pub reservation: Reservation,
    pub bike: Option<Bike>,
    pub customer: Option<Customer>,
}

impl Engine {
    pub async fn list_reservations(&self) -> Result<Vec<Reservation>, EngineError> {
        self.store.list_reservations().await
    }

    /// `Ok(None)` when the id is well-formed but unknown.
    pub async fn get_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, EngineError> {
        check_id(id)?;
        self.store.find_reservation(id).await
    }

    pub async fn reservation_details(
        &self,
        id: ReservationId,
    ) -> Result<ReservationDetails, EngineError> {
        let reservation = self
            .get_reservation(id)
            .await?
            .ok_or(EngineError::reservation_not_found(id))?;
        let bike = self.store.find_bike(reservation.bike_id).await?;
        let customer = self.store.find_customer(reservation.customer_id).await?;
        Ok(ReservationDetails {
            reservation,
            bike,
            customer,
        })
    }

    /// Persist the draft as-is. Does not check availability: callers that
    /// need the no-overlap guarantee go through `submit_booking`.
    pub async fn add_reservation(&self, draft: ReservationDraft) -> Result<Reservation, EngineError> {
        self.require_bike(draft.bike_id).await?;
        let _guard = self.lock_bikes(&[draft.bike_id]).await;
        self.insert_locked(draft).await
    }

    /// Replace every mutable field of reservation `id`. Unknown ids are a no-op.
    pub async fn update_reservation(
        &self,
        id: ReservationId,
        draft: ReservationDraft,
    ) -> Result<(), EngineError> {
        check_id(id)?;
        let Some((existing, _guards)) = self.lock_reservation(id, Some(draft.bike_id)).await? else {
            debug!("update of unknown reservation {id} ignored");
            return Ok(());
        };
        self.replace_locked(&existing, draft).await
    }

    /// Idempotent: deleting an unknown id succeeds without effect.
    pub async fn delete_reservation(&self, id: ReservationId) -> Result<(), EngineError> {
        check_id(id)?;
        let Some((existing, _guards)) = self.lock_reservation(id, None).await? else {
            debug!("delete of unknown reservation {id} ignored");
            return Ok(());
        };
        if self.store.remove_reservation(id).await? {
            metrics::counter!(crate::observability::RESERVATION_WRITES_TOTAL, "op" => "delete")
                .increment(1);
            info!("reservation {id} deleted from bike {}", existing.bike_id);
            self.refresh_bike_status(existing.bike_id, now()).await?;
        }
        Ok(())
    }

    /// Validate references and range, then insert. Caller holds the bike lock.
    pub(super) async fn insert_locked(
        &self,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        let _customers = self.customer_gate.read().await;
        self.validate_draft(&draft).await?;
        let reservation = self.store.insert_reservation(draft).await?;
        metrics::counter!(crate::observability::RESERVATION_WRITES_TOTAL, "op" => "insert")
            .increment(1);
        info!(
            "reservation {} created on bike {} for customer {}",
            reservation.id, reservation.bike_id, reservation.customer_id
        );
        self.refresh_bike_status(reservation.bike_id, now()).await?;
        Ok(reservation)
    }

    /// Caller holds the locks of both the old and the new bike.
    pub(super) async fn replace_locked(
        &self,
        existing: &Reservation,
        draft: ReservationDraft,
    ) -> Result<(), EngineError> {
        let _customers = self.customer_gate.read().await;
        self.validate_draft(&draft).await?;
        if !self.store.replace_reservation(existing.id, draft).await? {
            debug!("reservation {} vanished before update", existing.id);
            return Ok(());
        }
        metrics::counter!(crate::observability::RESERVATION_WRITES_TOTAL, "op" => "update")
            .increment(1);
        info!("reservation {} updated on bike {}", existing.id, draft.bike_id);
        let now = now();
        self.refresh_bike_status(draft.bike_id, now).await?;
        if existing.bike_id != draft.bike_id {
            self.refresh_bike_status(existing.bike_id, now).await?;
        }
        Ok(())
    }

    async fn validate_draft(&self, draft: &ReservationDraft) -> Result<(), EngineError> {
        validate_range(draft.start, draft.end)?;
        check_id(draft.bike_id)?;
        check_id(draft.customer_id)?;
        if self.store.find_bike(draft.bike_id).await?.is_none() {
            return Err(EngineError::bike_not_found(draft.bike_id));
        }
        if self.store.find_customer(draft.customer_id).await?.is_none() {
            return Err(EngineError::customer_not_found(draft.customer_id));
        }
        Ok(())
    }
}
