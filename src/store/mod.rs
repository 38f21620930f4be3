mod datastore;
mod journal;

pub use datastore::Datastore;

use async_trait::async_trait;

use crate::engine::EngineError;
use crate::model::*;

/// The storage collaborator. Every call observes current, committed state;
/// the engine never caches across calls.
///
/// `replace_*` and `remove_*` return `false` when the id does not resolve
/// and leave storage untouched.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_bike(&self, id: BikeId) -> Result<Option<Bike>, EngineError>;
    async fn list_bikes(&self) -> Result<Vec<Bike>, EngineError>;
    async fn insert_bike(&self, draft: BikeDraft) -> Result<Bike, EngineError>;
    async fn replace_bike(&self, id: BikeId, draft: BikeDraft) -> Result<bool, EngineError>;
    async fn set_bike_status(&self, id: BikeId, status: BikeStatus) -> Result<bool, EngineError>;
    async fn remove_bike(&self, id: BikeId) -> Result<bool, EngineError>;

    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, EngineError>;
    async fn list_customers(&self) -> Result<Vec<Customer>, EngineError>;
    /// Lowest id wins if several customers carry `key`.
    async fn find_customer_by_user_key(&self, key: &str) -> Result<Option<Customer>, EngineError>;
    async fn insert_customer(&self, draft: CustomerDraft) -> Result<Customer, EngineError>;
    async fn replace_customer(
        &self,
        id: CustomerId,
        draft: CustomerDraft,
    ) -> Result<bool, EngineError>;
    async fn remove_customer(&self, id: CustomerId) -> Result<bool, EngineError>;

    async fn find_reservation(&self, id: ReservationId)
    -> Result<Option<Reservation>, EngineError>;
    async fn list_reservations(&self) -> Result<Vec<Reservation>, EngineError>;
    /// Index lookup by bike, ordered by start.
    async fn list_reservations_for_bike(
        &self,
        bike_id: BikeId,
    ) -> Result<Vec<Reservation>, EngineError>;
    async fn list_reservations_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Reservation>, EngineError>;
    async fn insert_reservation(
        &self,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError>;
    async fn replace_reservation(
        &self,
        id: ReservationId,
        draft: ReservationDraft,
    ) -> Result<bool, EngineError>;
    async fn remove_reservation(&self, id: ReservationId) -> Result<bool, EngineError>;
}
