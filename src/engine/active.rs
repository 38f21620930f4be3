use std::fmt::Display;

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::*;

use super::error::check_id;
use super::{Engine, EngineError};

/// `dd/MM/yyyy HH:mm`.
pub const DISPLAY_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Render an instant in the system's local time.
pub fn format_display(ts: Timestamp) -> String {
    format_display_in(ts, &Local)
}

pub fn format_display_in<Tz>(ts: Timestamp, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    ts.with_timezone(tz).format(DISPLAY_FORMAT).to_string()
}

/// A reservation as the booking form's date picker sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayReservation {
    pub start_date: String,
    pub end_date: String,
}

impl DisplayReservation {
    pub fn from_reservation_in<Tz>(r: &Reservation, tz: &Tz) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        Self {
            start_date: format_display_in(r.start, tz),
            end_date: format_display_in(r.end, tz),
        }
    }
}

/// Reservations whose `[start, end)` contains `now`.
pub fn ongoing(reservations: &[Reservation], now: Timestamp) -> Vec<Reservation> {
    reservations
        .iter()
        .filter(|r| r.start <= now && now < r.end)
        .cloned()
        .collect()
}

impl Engine {
    pub async fn ongoing_reservations(
        &self,
        bike_id: BikeId,
        now: Timestamp,
    ) -> Result<Vec<Reservation>, EngineError> {
        check_id(bike_id)?;
        let all = self.store.list_reservations_for_bike(bike_id).await?;
        Ok(ongoing(&all, now))
    }

    /// Every reservation on the bike except `exclude`, formatted in local
    /// time. Recomputed on each call.
    pub async fn display_reservations(
        &self,
        bike_id: BikeId,
        exclude: Option<ReservationId>,
    ) -> Result<Vec<DisplayReservation>, EngineError> {
        self.display_reservations_in(bike_id, exclude, &Local).await
    }

    pub async fn display_reservations_in<Tz>(
        &self,
        bike_id: BikeId,
        exclude: Option<ReservationId>,
        tz: &Tz,
    ) -> Result<Vec<DisplayReservation>, EngineError>
    where
        Tz: TimeZone + Sync,
        Tz::Offset: Display,
    {
        check_id(bike_id)?;
        let rows: Vec<DisplayReservation> = self
            .store
            .list_reservations_for_bike(bike_id)
            .await?
            .iter()
            .filter(|r| Some(r.id) != exclude)
            .map(|r| DisplayReservation::from_reservation_in(r, tz))
            .collect();
        debug!("bike {bike_id}: {} display reservations", rows.len());
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn at(day: u32, hour: u32, minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2030, 1, day, hour, minute, 0).unwrap()
    }

    fn reservation(id: ReservationId, start: Timestamp, end: Timestamp) -> Reservation {
        Reservation {
            id,
            bike_id: 1,
            customer_id: 1,
            start,
            end,
        }
    }

    #[test]
    fn format_is_day_month_year_24h() {
        assert_eq!(format_display_in(at(5, 7, 3), &Utc), "05/01/2030 07:03");
        assert_eq!(format_display_in(at(31, 23, 59), &Utc), "31/01/2030 23:59");
    }

    #[test]
    fn format_applies_offset() {
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(format_display_in(at(31, 23, 30), &plus_two), "01/02/2030 01:30");
    }

    #[test]
    fn display_reservation_serializes_camel_case() {
        let d = DisplayReservation::from_reservation_in(&reservation(1, at(1, 9, 0), at(1, 10, 0)), &Utc);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"startDate": "01/01/2030 09:00", "endDate": "01/01/2030 10:00"})
        );
    }

    #[test]
    fn ongoing_is_half_open() {
        let rows = vec![
            reservation(1, at(1, 9, 0), at(1, 10, 0)),
            reservation(2, at(1, 10, 0), at(1, 11, 0)),
        ];
        let hits = ongoing(&rows, at(1, 10, 0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
        assert!(ongoing(&rows, at(1, 11, 0)).is_empty());
        assert_eq!(ongoing(&rows, at(1, 9, 0))[0].id, 1);
    }
}
