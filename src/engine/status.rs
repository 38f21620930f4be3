use tracing::{debug, info};

use crate::model::*;

use super::active::ongoing;
use super::error::check_id;
use super::{Engine, EngineError};

/// `Unavailable` iff some reservation's `[start, end)` contains `now`.
pub fn derive_status(reservations: &[Reservation], now: Timestamp) -> BikeStatus {
    if ongoing(reservations, now).is_empty() {
        BikeStatus::Available
    } else {
        BikeStatus::Unavailable
    }
}

impl Engine {
    /// Live status, computed from reservations. The stored field is ignored.
    pub async fn bike_status(&self, bike_id: BikeId, now: Timestamp) -> Result<BikeStatus, EngineError> {
        check_id(bike_id)?;
        if self.store.find_bike(bike_id).await?.is_none() {
            return Err(EngineError::bike_not_found(bike_id));
        }
        let reservations = self.store.list_reservations_for_bike(bike_id).await?;
        Ok(derive_status(&reservations, now))
    }

    /// Re-derive the bike's status and write it back if the cached value is
    /// stale. A bike that no longer exists is skipped.
    pub async fn refresh_bike_status(
        &self,
        bike_id: BikeId,
        now: Timestamp,
    ) -> Result<Option<BikeStatus>, EngineError> {
        let Some(bike) = self.store.find_bike(bike_id).await? else {
            return Ok(None);
        };
        let reservations = self.store.list_reservations_for_bike(bike_id).await?;
        let status = derive_status(&reservations, now);
        if status != bike.status {
            self.store.set_bike_status(bike_id, status).await?;
            metrics::counter!(crate::observability::STATUS_CHANGES_TOTAL).increment(1);
            info!("bike {bike_id}: status {:?} -> {status:?}", bike.status);
        } else {
            debug!("bike {bike_id}: status {status:?} unchanged");
        }
        Ok(Some(status))
    }

    /// Refresh every bike. Returns how many cached statuses changed.
    pub async fn refresh_all_statuses(&self, now: Timestamp) -> Result<usize, EngineError> {
        let mut changed = 0;
        for bike in self.store.list_bikes().await? {
            let _guard = self.lock_bikes(&[bike.id]).await;
            if let Some(status) = self.refresh_bike_status(bike.id, now).await?
                && status != bike.status
            {
                changed += 1;
            }
        }
        Ok(changed)
    }
}
