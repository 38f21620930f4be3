use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::info;

use crate::engine::EngineError;
use crate::model::*;
use crate::wal::Wal;

use super::Store;
use super::journal::{WalCommand, wal_writer_loop};

/// Monotonic id allocator. Holds the last id handed out.
#[derive(Default)]
struct Sequence(AtomicI64);

impl Sequence {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn observe(&self, id: i64) {
        self.0.fetch_max(id, Ordering::SeqCst);
    }

    fn last(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// In-memory tables, optionally journaled to a write-ahead log.
///
/// Every write is one `Event`: appended to the WAL (if any), then applied.
pub struct Datastore {
    bikes: DashMap<BikeId, Bike>,
    customers: DashMap<CustomerId, Customer>,
    reservations: DashMap<ReservationId, Reservation>,
    /// Bike → reservation ids.
    by_bike: DashMap<BikeId, Vec<ReservationId>>,
    bike_seq: Sequence,
    customer_seq: Sequence,
    reservation_seq: Sequence,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Writers hold it shared across append+apply; compaction holds it
    /// exclusively so a snapshot never misses an appended event.
    gate: RwLock<()>,
}

impl Default for Datastore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Datastore {
    pub fn in_memory() -> Self {
        Self {
            bikes: DashMap::new(),
            customers: DashMap::new(),
            reservations: DashMap::new(),
            by_bike: DashMap::new(),
            bike_seq: Sequence::default(),
            customer_seq: Sequence::default(),
            reservation_seq: Sequence::default(),
            wal_tx: None,
            gate: RwLock::new(()),
        }
    }

    /// Replay the WAL at `path`, drop any torn tail, and start its
    /// group-commit writer. Must be called from within a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::recover(path)?;
        let wal = Wal::open(path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, rx));

        let mut store = Self::in_memory();
        for event in &events {
            store.apply(event);
        }
        store.wal_tx = Some(tx);
        info!(
            "datastore replayed {} events: {} bikes, {} customers, {} reservations",
            events.len(),
            store.bikes.len(),
            store.customers.len(),
            store.reservations.len()
        );
        Ok(store)
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    fn apply(&self, event: &Event) {
        match event {
            Event::BikeSaved { bike } => {
                self.bike_seq.observe(bike.id);
                self.bikes.insert(bike.id, bike.clone());
            }
            Event::BikeStatusChanged { id, status } => {
                if let Some(mut bike) = self.bikes.get_mut(id) {
                    bike.status = *status;
                }
            }
            Event::BikeRemoved { id } => {
                self.bikes.remove(id);
            }
            Event::CustomerSaved { customer } => {
                self.customer_seq.observe(customer.id);
                self.customers.insert(customer.id, customer.clone());
            }
            Event::CustomerRemoved { id } => {
                self.customers.remove(id);
            }
            Event::ReservationInserted { reservation } => {
                self.reservation_seq.observe(reservation.id);
                self.reservations.insert(reservation.id, reservation.clone());
                self.by_bike
                    .entry(reservation.bike_id)
                    .or_default()
                    .push(reservation.id);
            }
            Event::ReservationReplaced { reservation } => {
                let previous_bike = match self.reservations.get_mut(&reservation.id) {
                    Some(mut existing) => {
                        let previous_bike = existing.bike_id;
                        *existing = reservation.clone();
                        previous_bike
                    }
                    None => return,
                };
                if previous_bike != reservation.bike_id {
                    self.unindex(previous_bike, reservation.id);
                    self.by_bike
                        .entry(reservation.bike_id)
                        .or_default()
                        .push(reservation.id);
                }
            }
            Event::ReservationRemoved { id } => {
                if let Some((_, removed)) = self.reservations.remove(id) {
                    self.unindex(removed.bike_id, *id);
                }
            }
            Event::SequenceCheckpoint {
                bike,
                customer,
                reservation,
            } => {
                self.bike_seq.observe(*bike);
                self.customer_seq.observe(*customer);
                self.reservation_seq.observe(*reservation);
            }
        }
    }

    fn unindex(&self, bike_id: BikeId, reservation_id: ReservationId) {
        if let Some(mut ids) = self.by_bike.get_mut(&bike_id) {
            ids.retain(|id| *id != reservation_id);
        }
    }

    /// Append to the WAL (if journaled), then apply.
    async fn commit(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        if let Some(tx) = &self.wal_tx {
            let (response, rx) = oneshot::channel();
            tx.send(WalCommand::Append {
                event: event.clone(),
                response,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
            rx.await
                .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
                .map_err(|e| EngineError::Storage(e.to_string()))?;
        }
        self.apply(&event);
        Ok(())
    }

    /// Minimal event list that recreates the current state.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events = vec![Event::SequenceCheckpoint {
            bike: self.bike_seq.last(),
            customer: self.customer_seq.last(),
            reservation: self.reservation_seq.last(),
        }];
        let mut customers: Vec<Customer> = self.customers.iter().map(|e| e.value().clone()).collect();
        customers.sort_by_key(|c| c.id);
        events.extend(customers.into_iter().map(|customer| Event::CustomerSaved { customer }));

        let mut bikes: Vec<Bike> = self.bikes.iter().map(|e| e.value().clone()).collect();
        bikes.sort_by_key(|b| b.id);
        events.extend(bikes.into_iter().map(|bike| Event::BikeSaved { bike }));

        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);
        events.extend(
            reservations
                .into_iter()
                .map(|reservation| Event::ReservationInserted { reservation }),
        );
        events
    }

    /// Rewrite the WAL as a snapshot of current state. No-op when in-memory.
    pub async fn compact(&self) -> Result<usize, EngineError> {
        let Some(tx) = &self.wal_tx else {
            return Ok(0);
        };
        let _gate = self.gate.write().await;
        let snapshot = self.snapshot();
        let len = snapshot.len();
        let (response, rx) = oneshot::channel();
        tx.send(WalCommand::Compact { snapshot, response })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        Ok(len)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(tx) = &self.wal_tx else {
            return 0;
        };
        let (response, rx) = oneshot::channel();
        if tx
            .send(WalCommand::AppendsSinceCompact { response })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn sorted_by_id<T: Clone>(map: &DashMap<i64, T>) -> Vec<T> {
    let mut rows: Vec<(i64, T)> = map.iter().map(|e| (*e.key(), e.value().clone())).collect();
    rows.sort_by_key(|(id, _)| *id);
    rows.into_iter().map(|(_, row)| row).collect()
}

#[async_trait]
impl Store for Datastore {
    async fn find_bike(&self, id: BikeId) -> Result<Option<Bike>, EngineError> {
        Ok(self.bikes.get(&id).map(|b| b.value().clone()))
    }

    async fn list_bikes(&self) -> Result<Vec<Bike>, EngineError> {
        Ok(sorted_by_id(&self.bikes))
    }

    async fn insert_bike(&self, draft: BikeDraft) -> Result<Bike, EngineError> {
        let bike = Bike {
            id: self.bike_seq.next(),
            kind: draft.kind,
            price_per_hour: draft.price_per_hour,
            status: BikeStatus::Available,
            image: draft.image,
        };
        self.commit(Event::BikeSaved { bike: bike.clone() }).await?;
        Ok(bike)
    }

    async fn replace_bike(&self, id: BikeId, draft: BikeDraft) -> Result<bool, EngineError> {
        let Some(status) = self.bikes.get(&id).map(|b| b.status) else {
            return Ok(false);
        };
        let bike = Bike {
            id,
            kind: draft.kind,
            price_per_hour: draft.price_per_hour,
            status,
            image: draft.image,
        };
        self.commit(Event::BikeSaved { bike }).await?;
        Ok(true)
    }

    async fn set_bike_status(&self, id: BikeId, status: BikeStatus) -> Result<bool, EngineError> {
        if !self.bikes.contains_key(&id) {
            return Ok(false);
        }
        self.commit(Event::BikeStatusChanged { id, status }).await?;
        Ok(true)
    }

    async fn remove_bike(&self, id: BikeId) -> Result<bool, EngineError> {
        if !self.bikes.contains_key(&id) {
            return Ok(false);
        }
        self.commit(Event::BikeRemoved { id }).await?;
        Ok(true)
    }

    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, EngineError> {
        Ok(self.customers.get(&id).map(|c| c.value().clone()))
    }

    async fn list_customers(&self) -> Result<Vec<Customer>, EngineError> {
        Ok(sorted_by_id(&self.customers))
    }

    async fn find_customer_by_user_key(&self, key: &str) -> Result<Option<Customer>, EngineError> {
        Ok(self
            .customers
            .iter()
            .filter(|c| c.user_key.as_deref() == Some(key))
            .min_by_key(|c| c.id)
            .map(|c| c.value().clone()))
    }

    async fn insert_customer(&self, draft: CustomerDraft) -> Result<Customer, EngineError> {
        let customer = Customer {
            id: self.customer_seq.next(),
            name: draft.name,
            email: draft.email,
            phone: draft.phone,
            id_code: draft.id_code,
            id_series: draft.id_series,
            user_key: draft.user_key,
        };
        self.commit(Event::CustomerSaved {
            customer: customer.clone(),
        })
        .await?;
        Ok(customer)
    }

    async fn replace_customer(
        &self,
        id: CustomerId,
        draft: CustomerDraft,
    ) -> Result<bool, EngineError> {
        if !self.customers.contains_key(&id) {
            return Ok(false);
        }
        let customer = Customer {
            id,
            name: draft.name,
            email: draft.email,
            phone: draft.phone,
            id_code: draft.id_code,
            id_series: draft.id_series,
            user_key: draft.user_key,
        };
        self.commit(Event::CustomerSaved { customer }).await?;
        Ok(true)
    }

    async fn remove_customer(&self, id: CustomerId) -> Result<bool, EngineError> {
        if !self.customers.contains_key(&id) {
            return Ok(false);
        }
        self.commit(Event::CustomerRemoved { id }).await?;
        Ok(true)
    }

    async fn find_reservation(
        &self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, EngineError> {
        Ok(self.reservations.get(&id).map(|r| r.value().clone()))
    }

    async fn list_reservations(&self) -> Result<Vec<Reservation>, EngineError> {
        Ok(sorted_by_id(&self.reservations))
    }

    async fn list_reservations_for_bike(
        &self,
        bike_id: BikeId,
    ) -> Result<Vec<Reservation>, EngineError> {
        let ids = self
            .by_bike
            .get(&bike_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut rows: Vec<Reservation> = ids
            .iter()
            .filter_map(|id| self.reservations.get(id).map(|r| r.value().clone()))
            .collect();
        rows.sort_by_key(|r| (r.start, r.id));
        Ok(rows)
    }

    async fn list_reservations_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Reservation>, EngineError> {
        let mut rows: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|r| r.customer_id == customer_id)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|r| (r.start, r.id));
        Ok(rows)
    }

    async fn insert_reservation(
        &self,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        let reservation = draft.into_reservation(self.reservation_seq.next());
        self.commit(Event::ReservationInserted {
            reservation: reservation.clone(),
        })
        .await?;
        Ok(reservation)
    }

    async fn replace_reservation(
        &self,
        id: ReservationId,
        draft: ReservationDraft,
    ) -> Result<bool, EngineError> {
        if !self.reservations.contains_key(&id) {
            return Ok(false);
        }
        self.commit(Event::ReservationReplaced {
            reservation: draft.into_reservation(id),
        })
        .await?;
        Ok(true)
    }

    async fn remove_reservation(&self, id: ReservationId) -> Result<bool, EngineError> {
        if !self.reservations.contains_key(&id) {
            return Ok(false);
        }
        self.commit(Event::ReservationRemoved { id }).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentabike_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn bike_draft() -> BikeDraft {
        BikeDraft {
            kind: BikeType::Hybrid,
            price_per_hour: Decimal::new(800, 2),
            image: None,
        }
    }

    fn draft(bike_id: BikeId, from: u32, to: u32) -> ReservationDraft {
        ReservationDraft {
            bike_id,
            customer_id: 1,
            start: Utc.with_ymd_and_hms(2030, 3, 1, from, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2030, 3, 1, to, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn ids_are_assigned_sequentially() {
        let store = Datastore::in_memory();
        let a = store.insert_bike(bike_draft()).await.unwrap();
        let b = store.insert_bike(bike_draft()).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        store.remove_bike(b.id).await.unwrap();
        let c = store.insert_bike(bike_draft()).await.unwrap();
        assert_eq!(c.id, 3);
    }

    #[tokio::test]
    async fn reservation_index_follows_bike_changes() {
        let store = Datastore::in_memory();
        let r = store.insert_reservation(draft(1, 9, 10)).await.unwrap();
        assert_eq!(store.list_reservations_for_bike(1).await.unwrap().len(), 1);

        assert!(store.replace_reservation(r.id, draft(2, 9, 10)).await.unwrap());
        assert!(store.list_reservations_for_bike(1).await.unwrap().is_empty());
        assert_eq!(store.list_reservations_for_bike(2).await.unwrap()[0].id, r.id);

        assert!(store.remove_reservation(r.id).await.unwrap());
        assert!(store.list_reservations_for_bike(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reservations_for_bike_sorted_by_start() {
        let store = Datastore::in_memory();
        store.insert_reservation(draft(1, 14, 15)).await.unwrap();
        store.insert_reservation(draft(1, 8, 9)).await.unwrap();
        store.insert_reservation(draft(1, 11, 12)).await.unwrap();
        let starts: Vec<u32> = store
            .list_reservations_for_bike(1)
            .await
            .unwrap()
            .iter()
            .map(|r| chrono::Timelike::hour(&r.start))
            .collect();
        assert_eq!(starts, vec![8, 11, 14]);
    }

    #[tokio::test]
    async fn missing_ids_are_noops() {
        let store = Datastore::in_memory();
        assert!(!store.replace_reservation(99, draft(1, 9, 10)).await.unwrap());
        assert!(!store.remove_reservation(99).await.unwrap());
        assert!(!store.replace_bike(99, bike_draft()).await.unwrap());
        assert!(!store.set_bike_status(99, BikeStatus::Unavailable).await.unwrap());
        assert!(store.list_reservations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn customer_lookup_by_user_key() {
        let store = Datastore::in_memory();
        store
            .insert_customer(CustomerDraft {
                name: "John Doe".into(),
                email: "john@example.com".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let jane = store
            .insert_customer(CustomerDraft {
                name: "Jane Doe".into(),
                email: "jane@example.com".into(),
                user_key: Some("user-jane".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let found = store.find_customer_by_user_key("user-jane").await.unwrap();
        assert_eq!(found, Some(jane));
        assert!(store.find_customer_by_user_key("nobody").await.unwrap().is_none());

        // Legacy logs may hold a shared key; the lookup stays deterministic.
        for name in ["Later One", "Later Two"] {
            store
                .insert_customer(CustomerDraft {
                    name: name.into(),
                    email: "later@example.com".into(),
                    user_key: Some("user-jane".into()),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let found = store.find_customer_by_user_key("user-jane").await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(2));
    }

    #[tokio::test]
    async fn durable_store_replays_after_reopen() {
        let path = test_wal_path("reopen.wal");
        let reservation_id = {
            let store = Datastore::open(&path).unwrap();
            assert!(store.is_durable());
            let bike = store.insert_bike(bike_draft()).await.unwrap();
            store.set_bike_status(bike.id, BikeStatus::Unavailable).await.unwrap();
            let r = store.insert_reservation(draft(bike.id, 9, 10)).await.unwrap();
            store.insert_reservation(draft(bike.id, 11, 12)).await.unwrap();
            store.remove_reservation(r.id + 1).await.unwrap();
            r.id
        };

        let store = Datastore::open(&path).unwrap();
        let bike = store.find_bike(1).await.unwrap().unwrap();
        assert_eq!(bike.status, BikeStatus::Unavailable);
        let rows = store.list_reservations_for_bike(1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, reservation_id);

        // Deleted id 2 is not reused.
        let next = store.insert_reservation(draft(1, 13, 14)).await.unwrap();
        assert_eq!(next.id, 3);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn compaction_preserves_state_and_sequences() {
        let path = test_wal_path("compact.wal");
        {
            let store = Datastore::open(&path).unwrap();
            store.insert_bike(bike_draft()).await.unwrap();
            for hour in 0..10 {
                let r = store.insert_reservation(draft(1, hour, hour + 1)).await.unwrap();
                store.remove_reservation(r.id).await.unwrap();
            }
            let kept = store.insert_reservation(draft(1, 20, 21)).await.unwrap();
            assert_eq!(kept.id, 11);
            assert_eq!(store.appends_since_compact().await, 22);

            let written = store.compact().await.unwrap();
            assert_eq!(written, 3); // checkpoint + bike + reservation
            assert_eq!(store.appends_since_compact().await, 0);
        }

        let store = Datastore::open(&path).unwrap();
        assert_eq!(store.list_reservations().await.unwrap().len(), 1);
        let next = store.insert_reservation(draft(1, 22, 23)).await.unwrap();
        assert_eq!(next.id, 12);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn writes_after_torn_tail_survive_restart() {
        use std::io::Write;

        let path = test_wal_path("torn_tail.wal");
        {
            let store = Datastore::open(&path).unwrap();
            store.insert_bike(bike_draft()).await.unwrap();
            store.insert_reservation(draft(1, 9, 10)).await.unwrap();
        }
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x10, 0, 0, 0, 1, 2, 3]).unwrap();
        }
        {
            let store = Datastore::open(&path).unwrap();
            assert_eq!(store.list_reservations().await.unwrap().len(), 1);
            let second = store.insert_reservation(draft(1, 11, 12)).await.unwrap();
            assert_eq!(second.id, 2);
        }

        let store = Datastore::open(&path).unwrap();
        let ids: Vec<ReservationId> = store
            .list_reservations()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
        let _ = std::fs::remove_file(&path);
    }
}
