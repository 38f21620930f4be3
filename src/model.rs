use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instants are always stored in UTC; local time only exists at display.
pub type Timestamp = DateTime<Utc>;

pub type BikeId = i64;
pub type CustomerId = i64;
pub type ReservationId = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Two spans conflict iff each starts before the other ends.
    /// Touching spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BikeType {
    Simple,
    Mountain,
    Hybrid,
    Double,
}

impl fmt::Display for BikeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BikeType::Simple => "Simple",
            BikeType::Mountain => "Mountain",
            BikeType::Hybrid => "Hybrid",
            BikeType::Double => "Double",
        };
        f.write_str(name)
    }
}

/// Cached projection of "does any reservation span now". Never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BikeStatus {
    #[default]
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bike {
    pub id: BikeId,
    pub kind: BikeType,
    pub price_per_hour: Decimal,
    pub status: BikeStatus,
    pub image: Option<Vec<u8>>,
}

impl Bike {
    /// Label shown in booking dropdowns.
    pub fn label(&self) -> String {
        format!("#{} {} ({}/h)", self.id, self.kind, self.price_per_hour)
    }
}

/// Mutable fields of a bike, as submitted by a create/edit form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BikeDraft {
    pub kind: BikeType,
    pub price_per_hour: Decimal,
    pub image: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub id_code: Option<String>,
    pub id_series: Option<String>,
    /// External identity key; `None` until an account is provisioned.
    pub user_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomerDraft {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub id_code: Option<String>,
    pub id_series: Option<String>,
    pub user_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub bike_id: BikeId,
    pub customer_id: CustomerId,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// The full mutable field set of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDraft {
    pub bike_id: BikeId,
    pub customer_id: CustomerId,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl ReservationDraft {
    pub fn into_reservation(self, id: ReservationId) -> Reservation {
        Reservation {
            id,
            bike_id: self.bike_id,
            customer_id: self.customer_id,
            start: self.start,
            end: self.end,
        }
    }
}

impl From<&Reservation> for ReservationDraft {
    fn from(r: &Reservation) -> Self {
        Self {
            bike_id: r.bike_id,
            customer_id: r.customer_id,
            start: r.start,
            end: r.end,
        }
    }
}

/// Who is looking at a booking form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerContext {
    Administrator,
    /// `customer_key` is the caller's external identity key.
    Client { customer_key: String },
}

impl ViewerContext {
    pub fn is_admin(&self) -> bool {
        matches!(self, ViewerContext::Administrator)
    }
}

/// Storage log record. Every write to the datastore is exactly one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BikeSaved { bike: Bike },
    BikeStatusChanged { id: BikeId, status: BikeStatus },
    BikeRemoved { id: BikeId },
    CustomerSaved { customer: Customer },
    CustomerRemoved { id: CustomerId },
    ReservationInserted { reservation: Reservation },
    ReservationReplaced { reservation: Reservation },
    ReservationRemoved { id: ReservationId },
    /// Highest ids handed out so far; written at the head of a compacted log
    /// so ids of deleted rows are never reused.
    SequenceCheckpoint {
        bike: BikeId,
        customer: CustomerId,
        reservation: ReservationId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2030, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn span_contains_instant_is_half_open() {
        let s = Span::new(at(9), at(11));
        assert!(s.contains_instant(at(9)));
        assert!(s.contains_instant(at(10)));
        assert!(!s.contains_instant(at(11)));
        assert!(!s.contains_instant(at(8)));
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(at(9), at(11));
        let b = Span::new(at(10), at(12));
        let c = Span::new(at(11), at(13));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // back-to-back
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_overlap_containment_and_identity() {
        let outer = Span::new(at(8), at(16));
        let inner = Span::new(at(10), at(11));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
        assert!(outer.overlaps(&outer));
    }

    #[test]
    fn span_overlap_by_one_second() {
        let a = Span::new(at(9), at(10) + Duration::seconds(1));
        let b = Span::new(at(10), at(11));
        assert!(a.overlaps(&b));
    }

    #[test]
    fn draft_roundtrip_keeps_fields() {
        let r = Reservation {
            id: 7,
            bike_id: 2,
            customer_id: 3,
            start: at(9),
            end: at(10),
        };
        let draft = ReservationDraft::from(&r);
        assert_eq!(draft.into_reservation(7), r);
    }

    #[test]
    fn bike_label_includes_type_and_rate() {
        let bike = Bike {
            id: 4,
            kind: BikeType::Mountain,
            price_per_hour: Decimal::new(1500, 2),
            status: BikeStatus::Available,
            image: None,
        };
        assert_eq!(bike.label(), "#4 Mountain (15.00/h)");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationInserted {
            reservation: Reservation {
                id: 1,
                bike_id: 1,
                customer_id: 1,
                start: at(9),
                end: at(10),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
