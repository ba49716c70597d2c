//! Transactional storage for the engine.
//!
//! Each engine operation opens one [`StoreTx`], reads what it needs (taking
//! exclusive locks where it is about to write), and commits. Dropping a
//! transaction without committing rolls it back.
//!
//! Two backends:
//! - [`PgStore`]: pooled PostgreSQL with `SELECT … FOR UPDATE` row locks,
//!   selected through a [`Locker`].
//! - [`MemoryStore`]: a single writer. Every transaction holds one async mutex
//!   for its whole lifetime, so transactions are serialized and
//!   [`LockMode`] has nothing further to do.

mod locker;
mod memory;
mod postgres;

pub use locker::{Locker, NoopLocker, RowLocker};
pub use memory::MemoryStore;
pub use postgres::{connect, PgStore};

use crate::error::Result;
use crate::models::{
    Booking, City, IdempotencyRecord, Operator, Route, Ticket, Trip, TripStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Whether a read must hold the rows it returns until the transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn insert_city(&mut self, city: &City) -> Result<()>;
    async fn city(&mut self, id: &str) -> Result<Option<City>>;
    async fn insert_operator(&mut self, operator: &Operator) -> Result<()>;
    async fn operator(&mut self, id: &str) -> Result<Option<Operator>>;
    /// Returns `false` when no such operator exists.
    async fn set_operator_online(&mut self, id: &str, online: bool) -> Result<bool>;
    async fn insert_route(&mut self, route: &Route) -> Result<()>;
    async fn route(&mut self, id: &str) -> Result<Option<Route>>;
    async fn routes_for_operator(&mut self, operator_id: &str) -> Result<Vec<Route>>;

    async fn trip(&mut self, id: &str, lock: LockMode) -> Result<Option<Trip>>;
    async fn insert_trip(&mut self, trip: &Trip) -> Result<()>;
    async fn set_trip_status(&mut self, id: &str, status: TripStatus) -> Result<()>;
    async fn set_seats_available(&mut self, id: &str, seats_available: i32) -> Result<()>;
    async fn trips_for_routes(
        &mut self,
        route_ids: &[String],
        departing_since: DateTime<Utc>,
    ) -> Result<Vec<Trip>>;

    /// Seat numbers held by non-canceled tickets of the trip.
    async fn taken_seats(&mut self, trip_id: &str, lock: LockMode) -> Result<BTreeSet<i32>>;
    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<()>;
    async fn ticket(&mut self, id: &str, lock: LockMode) -> Result<Option<Ticket>>;
    /// Tickets of a booking ordered by seat number.
    async fn tickets_for_booking(&mut self, booking_id: &str, lock: LockMode)
        -> Result<Vec<Ticket>>;
    /// Boarded tickets of the trips whose `boarded_at` is at or after `boarded_since`.
    async fn boarded_tickets_for_trips(
        &mut self,
        trip_ids: &[String],
        boarded_since: DateTime<Utc>,
    ) -> Result<Vec<Ticket>>;
    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<()>;

    async fn booking(&mut self, id: &str, lock: LockMode) -> Result<Option<Booking>>;
    async fn insert_booking(&mut self, booking: &Booking) -> Result<()>;
    async fn update_booking(&mut self, booking: &Booking) -> Result<()>;
    async fn bookings_for_trips(
        &mut self,
        trip_ids: &[String],
        created_since: DateTime<Utc>,
    ) -> Result<Vec<Booking>>;

    async fn idempotency(&mut self, key: &str, lock: LockMode)
        -> Result<Option<IdempotencyRecord>>;
    /// Insert unless the key already exists; returns whether this call
    /// created the record.
    async fn insert_idempotency(&mut self, record: &IdempotencyRecord) -> Result<bool>;
    async fn attach_idempotency_booking(&mut self, key: &str, booking_id: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
