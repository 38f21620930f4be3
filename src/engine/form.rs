use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::*;

use super::active::DisplayReservation;
use super::error::check_id;
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BikeOption {
    pub id: BikeId,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerOption {
    pub id: CustomerId,
    pub label: String,
    pub user_key: Option<String>,
}

impl From<&Customer> for CustomerOption {
    fn from(c: &Customer) -> Self {
        Self {
            id: c.id,
            label: c.name.clone(),
            user_key: c.user_key.clone(),
        }
    }
}

/// Everything a booking form needs to render. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormValues {
    pub bikes: Vec<BikeOption>,
    /// Empty for a client with no linked customer record: that viewer can't book.
    pub customers: Vec<CustomerOption>,
    /// `None` only when no bike is selected.
    pub price_per_hour: Option<Decimal>,
    pub active_reservations: Vec<DisplayReservation>,
    pub selected_bike_id: Option<BikeId>,
}

impl FormValues {
    pub fn can_book(&self) -> bool {
        !self.customers.is_empty()
    }
}

/// JSON body of the per-bike data endpoint the booking form polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BikeBookingData {
    pub price_per_hour: Decimal,
    pub active_reservations: Vec<DisplayReservation>,
}

impl Engine {
    /// Customers the viewer may pick: all of them for an administrator,
    /// otherwise only the one linked to the caller's identity key.
    pub async fn selectable_customers(
        &self,
        viewer: &ViewerContext,
    ) -> Result<Vec<Customer>, EngineError> {
        match viewer {
            ViewerContext::Administrator => self.store.list_customers().await,
            ViewerContext::Client { customer_key } => Ok(self
                .store
                .find_customer_by_user_key(customer_key)
                .await?
                .into_iter()
                .collect()),
        }
    }

    pub async fn bike_price(&self, bike_id: BikeId) -> Result<Decimal, EngineError> {
        check_id(bike_id)?;
        self.store
            .find_bike(bike_id)
            .await?
            .map(|b| b.price_per_hour)
            .ok_or(EngineError::bike_not_found(bike_id))
    }

    pub async fn build_form_values(
        &self,
        selected_bike_id: Option<BikeId>,
        viewer: &ViewerContext,
        exclude: Option<ReservationId>,
    ) -> Result<FormValues, EngineError> {
        let bikes = self
            .store
            .list_bikes()
            .await?
            .iter()
            .map(|b| BikeOption {
                id: b.id,
                label: b.label(),
            })
            .collect();
        let customers = self
            .selectable_customers(viewer)
            .await?
            .iter()
            .map(CustomerOption::from)
            .collect();

        let (price_per_hour, active_reservations) = match selected_bike_id {
            Some(bike_id) => (
                Some(self.bike_price(bike_id).await?),
                self.display_reservations(bike_id, exclude).await?,
            ),
            None => (None, Vec::new()),
        };

        let values = FormValues {
            bikes,
            customers,
            price_per_hour,
            active_reservations,
            selected_bike_id,
        };
        debug!(
            "form values: {} bikes, {} customers, admin={}",
            values.bikes.len(),
            values.customers.len(),
            viewer.is_admin()
        );
        Ok(values)
    }

    pub async fn bike_booking_data(
        &self,
        bike_id: BikeId,
        exclude: Option<ReservationId>,
    ) -> Result<BikeBookingData, EngineError> {
        Ok(BikeBookingData {
            price_per_hour: self.bike_price(bike_id).await?,
            active_reservations: self.display_reservations(bike_id, exclude).await?,
        })
    }
}
