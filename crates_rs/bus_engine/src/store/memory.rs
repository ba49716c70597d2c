use super::{LockMode, Store, StoreTx};
use crate::error::{EngineError, Result};
use crate::models::{
    Booking, City, IdempotencyRecord, Operator, Route, Ticket, TicketStatus, Trip, TripStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct Tables {
    cities: HashMap<String, City>,
    operators: HashMap<String, Operator>,
    routes: HashMap<String, Route>,
    trips: HashMap<String, Trip>,
    bookings: HashMap<String, Booking>,
    tickets: HashMap<String, Ticket>,
    idempotency: HashMap<String, IdempotencyRecord>,
}

/// In-process store for tests and local runs. One transaction at a time:
/// `begin` waits for the previous transaction to commit or drop. A
/// transaction reads the committed tables in place and copies them on its
/// first write.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = self.tables.clone().lock_owned().await;
        Ok(Box::new(MemoryTx {
            guard,
            working: None,
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    /// Uncommitted copy, taken on the first write.
    working: Option<Tables>,
}

impl MemoryTx {
    fn read(&self) -> &Tables {
        self.working.as_ref().unwrap_or(&*self.guard)
    }

    fn write(&mut self) -> &mut Tables {
        let committed = &self.guard;
        self.working.get_or_insert_with(|| (**committed).clone())
    }
}

fn insert_new<T: Clone>(
    table: &mut HashMap<String, T>,
    id: &str,
    row: &T,
    op: &'static str,
) -> Result<()> {
    if table.contains_key(id) {
        tracing::error!(id, op, "duplicate primary key");
        return Err(EngineError::Storage(op));
    }
    table.insert(id.to_string(), row.clone());
    Ok(())
}

fn replace_existing<T: Clone>(
    table: &mut HashMap<String, T>,
    id: &str,
    row: &T,
    op: &'static str,
) -> Result<()> {
    match table.get_mut(id) {
        Some(slot) => {
            *slot = row.clone();
            Ok(())
        }
        None => {
            tracing::error!(id, op, "update of missing row");
            Err(EngineError::Storage(op))
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_city(&mut self, city: &City) -> Result<()> {
        insert_new(&mut self.write().cities, &city.id, city, "insert city")
    }

    async fn city(&mut self, id: &str) -> Result<Option<City>> {
        Ok(self.read().cities.get(id).cloned())
    }

    async fn insert_operator(&mut self, operator: &Operator) -> Result<()> {
        insert_new(
            &mut self.write().operators,
            &operator.id,
            operator,
            "insert operator",
        )
    }

    async fn operator(&mut self, id: &str) -> Result<Option<Operator>> {
        Ok(self.read().operators.get(id).cloned())
    }

    async fn set_operator_online(&mut self, id: &str, online: bool) -> Result<bool> {
        Ok(match self.write().operators.get_mut(id) {
            Some(op) => {
                op.is_online = online;
                true
            }
            None => false,
        })
    }

    async fn insert_route(&mut self, route: &Route) -> Result<()> {
        insert_new(&mut self.write().routes, &route.id, route, "insert route")
    }

    async fn route(&mut self, id: &str) -> Result<Option<Route>> {
        Ok(self.read().routes.get(id).cloned())
    }

    async fn routes_for_operator(&mut self, operator_id: &str) -> Result<Vec<Route>> {
        let mut routes: Vec<Route> = self
            .read()
            .routes
            .values()
            .filter(|r| r.operator_id == operator_id)
            .cloned()
            .collect();
        routes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(routes)
    }

    async fn trip(&mut self, id: &str, _lock: LockMode) -> Result<Option<Trip>> {
        Ok(self.read().trips.get(id).cloned())
    }

    async fn insert_trip(&mut self, trip: &Trip) -> Result<()> {
        insert_new(&mut self.write().trips, &trip.id, trip, "insert trip")
    }

    async fn set_trip_status(&mut self, id: &str, status: TripStatus) -> Result<()> {
        match self.write().trips.get_mut(id) {
            Some(trip) => {
                trip.status = status;
                Ok(())
            }
            None => Err(EngineError::Storage("update trip status")),
        }
    }

    async fn set_seats_available(&mut self, id: &str, seats_available: i32) -> Result<()> {
        match self.write().trips.get_mut(id) {
            Some(trip) => {
                trip.seats_available = seats_available;
                Ok(())
            }
            None => Err(EngineError::Storage("update trip seats")),
        }
    }

    async fn trips_for_routes(
        &mut self,
        route_ids: &[String],
        departing_since: DateTime<Utc>,
    ) -> Result<Vec<Trip>> {
        let mut trips: Vec<Trip> = self
            .read()
            .trips
            .values()
            .filter(|t| route_ids.contains(&t.route_id) && t.depart_at >= departing_since)
            .cloned()
            .collect();
        trips.sort_by(|a, b| a.depart_at.cmp(&b.depart_at).then_with(|| a.id.cmp(&b.id)));
        Ok(trips)
    }

    async fn taken_seats(&mut self, trip_id: &str, _lock: LockMode) -> Result<BTreeSet<i32>> {
        Ok(self
            .read()
            .tickets
            .values()
            .filter(|t| t.trip_id == trip_id && t.status.holds_seat())
            .map(|t| t.seat_no)
            .collect())
    }

    async fn insert_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        if ticket.status.holds_seat()
            && self.read().tickets.values().any(|t| {
                t.trip_id == ticket.trip_id && t.seat_no == ticket.seat_no && t.status.holds_seat()
            })
        {
            tracing::error!(
                trip_id = %ticket.trip_id,
                seat_no = ticket.seat_no,
                "seat already held by a live ticket"
            );
            return Err(EngineError::Storage("insert ticket"));
        }
        insert_new(&mut self.write().tickets, &ticket.id, ticket, "insert ticket")
    }

    async fn ticket(&mut self, id: &str, _lock: LockMode) -> Result<Option<Ticket>> {
        Ok(self.read().tickets.get(id).cloned())
    }

    async fn tickets_for_booking(
        &mut self,
        booking_id: &str,
        _lock: LockMode,
    ) -> Result<Vec<Ticket>> {
        let mut tickets: Vec<Ticket> = self
            .read()
            .tickets
            .values()
            .filter(|t| t.booking_id == booking_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.seat_no);
        Ok(tickets)
    }

    async fn boarded_tickets_for_trips(
        &mut self,
        trip_ids: &[String],
        boarded_since: DateTime<Utc>,
    ) -> Result<Vec<Ticket>> {
        let mut tickets: Vec<Ticket> = self
            .read()
            .tickets
            .values()
            .filter(|t| {
                trip_ids.contains(&t.trip_id)
                    && t.status == TicketStatus::Boarded
                    && t.boarded_at.is_some_and(|at| at >= boarded_since)
            })
            .cloned()
            .collect();
        tickets.sort_by(|a, b| a.trip_id.cmp(&b.trip_id).then(a.seat_no.cmp(&b.seat_no)));
        Ok(tickets)
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> Result<()> {
        replace_existing(&mut self.write().tickets, &ticket.id, ticket, "update ticket")
    }

    async fn booking(&mut self, id: &str, _lock: LockMode) -> Result<Option<Booking>> {
        Ok(self.read().bookings.get(id).cloned())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        insert_new(
            &mut self.write().bookings,
            &booking.id,
            booking,
            "insert booking",
        )
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<()> {
        replace_existing(
            &mut self.write().bookings,
            &booking.id,
            booking,
            "update booking",
        )
    }

    async fn bookings_for_trips(
        &mut self,
        trip_ids: &[String],
        created_since: DateTime<Utc>,
    ) -> Result<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .read()
            .bookings
            .values()
            .filter(|b| trip_ids.contains(&b.trip_id) && b.created_at >= created_since)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(bookings)
    }

    async fn idempotency(
        &mut self,
        key: &str,
        _lock: LockMode,
    ) -> Result<Option<IdempotencyRecord>> {
        Ok(self.read().idempotency.get(key).cloned())
    }

    async fn insert_idempotency(&mut self, record: &IdempotencyRecord) -> Result<bool> {
        if self.read().idempotency.contains_key(&record.key) {
            return Ok(false);
        }
        self.write()
            .idempotency
            .insert(record.key.clone(), record.clone());
        Ok(true)
    }

    async fn attach_idempotency_booking(&mut self, key: &str, booking_id: &str) -> Result<()> {
        match self.write().idempotency.get_mut(key) {
            Some(record) => {
                record.booking_id = Some(booking_id.to_string());
                Ok(())
            }
            None => Err(EngineError::Storage("attach idempotency booking")),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        if let Some(working) = working {
            *guard = working;
        }
        Ok(())
    }
}
