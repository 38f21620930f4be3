use tracing::info;

use crate::model::*;

use super::error::check_id;
use super::status::derive_status;
use super::{Engine, EngineError, now};

impl Engine {
    /// All bikes with status derived at `now`, not read from the cache.
    pub async fn list_bikes(&self, now: Timestamp) -> Result<Vec<Bike>, EngineError> {
        let mut bikes = self.store.list_bikes().await?;
        for bike in &mut bikes {
            let reservations = self.store.list_reservations_for_bike(bike.id).await?;
            bike.status = derive_status(&reservations, now);
        }
        Ok(bikes)
    }

    pub async fn get_bike(&self, id: BikeId, now: Timestamp) -> Result<Option<Bike>, EngineError> {
        check_id(id)?;
        let Some(mut bike) = self.store.find_bike(id).await? else {
            return Ok(None);
        };
        let reservations = self.store.list_reservations_for_bike(id).await?;
        bike.status = derive_status(&reservations, now);
        Ok(Some(bike))
    }

    pub async fn add_bike(&self, draft: BikeDraft) -> Result<Bike, EngineError> {
        let bike = self.store.insert_bike(draft).await?;
        info!("bike {} added ({}, {}/h)", bike.id, bike.kind, bike.price_per_hour);
        Ok(bike)
    }

    pub async fn update_bike(&self, id: BikeId, draft: BikeDraft) -> Result<(), EngineError> {
        check_id(id)?;
        if !self.store.replace_bike(id, draft).await? {
            return Err(EngineError::bike_not_found(id));
        }
        info!("bike {id} updated");
        Ok(())
    }

    /// Refused while the bike still has reservations. Unknown ids are a no-op.
    pub async fn delete_bike(&self, id: BikeId) -> Result<(), EngineError> {
        check_id(id)?;
        if self.store.find_bike(id).await?.is_none() {
            return Ok(());
        }
        let _guard = self.lock_bikes(&[id]).await;
        if !self.store.list_reservations_for_bike(id).await?.is_empty() {
            return Err(EngineError::HasReservations { entity: "bike", id });
        }
        if self.store.remove_bike(id).await? {
            self.forget_bike_lock(id);
            info!("bike {id} deleted");
        }
        Ok(())
    }

    pub async fn list_customers(&self) -> Result<Vec<Customer>, EngineError> {
        self.store.list_customers().await
    }

    pub async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, EngineError> {
        check_id(id)?;
        self.store.find_customer(id).await
    }

    pub async fn add_customer(&self, draft: CustomerDraft) -> Result<Customer, EngineError> {
        let _gate = self.customer_gate.write().await;
        self.ensure_user_key_free(draft.user_key.as_deref(), None).await?;
        let customer = self.store.insert_customer(draft).await?;
        info!("customer {} added", customer.id);
        Ok(customer)
    }

    pub async fn update_customer(
        &self,
        id: CustomerId,
        draft: CustomerDraft,
    ) -> Result<(), EngineError> {
        check_id(id)?;
        let _gate = self.customer_gate.write().await;
        self.ensure_user_key_free(draft.user_key.as_deref(), Some(id)).await?;
        if !self.store.replace_customer(id, draft).await? {
            return Err(EngineError::customer_not_found(id));
        }
        info!("customer {id} updated");
        Ok(())
    }

    /// Refused while the customer still has reservations. Unknown ids are a no-op.
    pub async fn delete_customer(&self, id: CustomerId) -> Result<(), EngineError> {
        check_id(id)?;
        let _gate = self.customer_gate.write().await;
        if !self.store.list_reservations_for_customer(id).await?.is_empty() {
            return Err(EngineError::HasReservations {
                entity: "customer",
                id,
            });
        }
        if self.store.remove_customer(id).await? {
            info!("customer {id} deleted");
        }
        Ok(())
    }

    /// Link a provisioned identity to the customer so client-scoped forms
    /// can find it. A key belongs to at most one customer.
    pub async fn link_customer_account(
        &self,
        id: CustomerId,
        user_key: &str,
    ) -> Result<Customer, EngineError> {
        check_id(id)?;
        let _gate = self.customer_gate.write().await;
        let customer = self
            .store
            .find_customer(id)
            .await?
            .ok_or(EngineError::customer_not_found(id))?;
        self.ensure_user_key_free(Some(user_key), Some(id)).await?;
        let draft = CustomerDraft {
            name: customer.name,
            email: customer.email,
            phone: customer.phone,
            id_code: customer.id_code,
            id_series: customer.id_series,
            user_key: Some(user_key.to_owned()),
        };
        if !self.store.replace_customer(id, draft.clone()).await? {
            return Err(EngineError::customer_not_found(id));
        }
        info!("customer {id} linked to account {user_key}");
        Ok(Customer {
            id,
            name: draft.name,
            email: draft.email,
            phone: draft.phone,
            id_code: draft.id_code,
            id_series: draft.id_series,
            user_key: draft.user_key,
        })
    }

    /// Caller holds the customer gate exclusively.
    async fn ensure_user_key_free(
        &self,
        user_key: Option<&str>,
        for_customer: Option<CustomerId>,
    ) -> Result<(), EngineError> {
        let Some(key) = user_key else {
            return Ok(());
        };
        match self.store.find_customer_by_user_key(key).await? {
            Some(owner) if Some(owner.id) != for_customer => Err(EngineError::UserKeyTaken {
                key: key.to_owned(),
                owner: owner.id,
            }),
            _ => Ok(()),
        }
    }

    /// Rewrite the cached status of every bike from its reservations.
    pub async fn reconcile_statuses(&self) -> Result<usize, EngineError> {
        let changed = self.refresh_all_statuses(now()).await?;
        info!("status reconciliation: {changed} bikes changed");
        Ok(changed)
    }
}
