mod active;
mod booking;
mod catalog;
mod error;
mod form;
mod overlap;
mod reservations;
mod status;

pub use active::{DISPLAY_FORMAT, DisplayReservation, format_display, format_display_in, ongoing};
pub use booking::{BookingOutcome, BookingRejection, BookingRequest, CUSTOMER_FIELD, ValidationErrors};
pub use error::{EngineError, INVALID_RANGE, RESERVATION_OVERLAP};
pub use form::{BikeBookingData, BikeOption, CustomerOption, FormValues};
pub use overlap::{first_conflict, overlaps, validate_range};
pub use reservations::ReservationDetails;
pub use status::derive_status;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::model::*;
use crate::store::Store;

use error::check_id;

/// Reservation scheduling and availability engine.
///
/// Holds no reservation state of its own: every operation reads current
/// state from the store. The only owned state is the per-bike lock table
/// that serializes check-then-write sequences on the same bike, and the
/// customer gate.
pub struct Engine {
    store: Arc<dyn Store>,
    /// One entry per existing bike that has been locked at least once.
    bike_locks: DashMap<BikeId, Arc<Mutex<()>>>,
    /// Reservation writes hold it shared; customer writes hold it
    /// exclusively, so a customer can't vanish between a reservation's
    /// reference check and its insert, and identity keys stay unique.
    customer_gate: RwLock<()>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            bike_locks: DashMap::new(),
            customer_gate: RwLock::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// `NotFound` unless `bike_id` is well-formed and names an existing bike.
    /// Run before `lock_bikes` so unknown ids never get a lock entry.
    pub(super) async fn require_bike(&self, bike_id: BikeId) -> Result<(), EngineError> {
        check_id(bike_id)?;
        if self.store.find_bike(bike_id).await?.is_none() {
            return Err(EngineError::bike_not_found(bike_id));
        }
        Ok(())
    }

    /// Drop the lock entry of a deleted bike. The caller still holds the guard.
    pub(super) fn forget_bike_lock(&self, bike_id: BikeId) {
        self.bike_locks.remove(&bike_id);
    }

    /// Lock every listed bike, in ascending id order so two writers touching
    /// the same pair of bikes can't deadlock.
    pub(super) async fn lock_bikes(&self, bike_ids: &[BikeId]) -> Vec<OwnedMutexGuard<()>> {
        let mut ids = bike_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = self
                .bike_locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value()
                .clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    /// Lock the bike currently holding reservation `id` (plus `also`) and
    /// return the reservation as seen under the lock. Retries if the
    /// reservation moved to another bike while waiting. `also` must name an
    /// existing bike.
    pub(super) async fn lock_reservation(
        &self,
        id: ReservationId,
        also: Option<BikeId>,
    ) -> Result<Option<(Reservation, Vec<OwnedMutexGuard<()>>)>, EngineError> {
        loop {
            let Some(seen) = self.store.find_reservation(id).await? else {
                return Ok(None);
            };
            if let Some(other) = also {
                self.require_bike(other).await?;
            }
            let mut bikes = vec![seen.bike_id];
            bikes.extend(also);
            let guards = self.lock_bikes(&bikes).await;
            match self.store.find_reservation(id).await? {
                Some(current) if current.bike_id == seen.bike_id => {
                    return Ok(Some((current, guards)));
                }
                Some(_) => continue,
                None => return Ok(None),
            }
        }
    }
}

pub(crate) fn now() -> Timestamp {
    chrono::Utc::now()
}
