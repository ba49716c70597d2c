#![allow(dead_code)]

use bus_engine::{
    BookRequest, BusEngine, EngineMode, FixedClock, InMemoryLedger, LockMode, MemoryStore,
    NewRoute, NewTrip, Operator, Route, SeatRequest, Store, TicketSigner, Trip,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::sync::Arc;

pub const TICKET_SECRET: &str = "integration-ticket-secret";
pub const OPERATOR_WALLET: &str = "op-wallet";

pub fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-04-01T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub struct World {
    pub engine: Arc<BusEngine>,
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<InMemoryLedger>,
    pub operator: Operator,
    pub route: Route,
}

#[derive(Clone, Copy)]
pub enum Payments {
    On,
    Off,
    TestMode,
}

pub async fn world(payments: Payments) -> World {
    world_with_operator_wallet(payments, Some(OPERATOR_WALLET)).await
}

pub async fn world_with_operator_wallet(payments: Payments, wallet: Option<&str>) -> World {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let mut engine = BusEngine::new(store.clone(), TicketSigner::new(TICKET_SECRET).unwrap())
        .with_clock(Arc::new(FixedClock(now())));
    match payments {
        Payments::On => engine = engine.with_payments(ledger.clone()),
        Payments::Off => {}
        Payments::TestMode => {
            engine = engine
                .with_payments(ledger.clone())
                .with_mode(EngineMode::Test)
        }
    }

    let origin = engine.create_city("Damascus", Some("SY")).await.unwrap();
    let dest = engine.create_city("Aleppo", Some("SY")).await.unwrap();
    let operator = engine.create_operator("Kadmous", wallet).await.unwrap();
    let operator = engine.set_operator_online(&operator.id, true).await.unwrap();
    let route = engine
        .create_route(NewRoute {
            origin_city_id: origin.id,
            dest_city_id: dest.id,
            operator_id: operator.id.clone(),
            bus_model: Some("Volvo 9700".into()),
            features: None,
        })
        .await
        .unwrap();

    World {
        engine: Arc::new(engine),
        store,
        ledger,
        operator,
        route,
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl World {
    /// Draft trip departing `depart_in` after the fixed clock.
    pub async fn draft_trip(&self, seats_total: i32, price_cents: i64, depart_in: Duration) -> Trip {
        let depart = now() + depart_in;
        self.engine
            .create_trip(NewTrip {
                route_id: self.route.id.clone(),
                depart_at: ts(depart),
                arrive_at: ts(depart + Duration::hours(5)),
                price_cents,
                seats_total,
                currency: None,
            })
            .await
            .unwrap()
    }

    pub async fn published_trip(
        &self,
        seats_total: i32,
        price_cents: i64,
        depart_in: Duration,
    ) -> Trip {
        let trip = self.draft_trip(seats_total, price_cents, depart_in).await;
        self.engine.publish_trip(&trip.id).await.unwrap()
    }

    /// A payment-less engine over the same store whose clock reads `later`
    /// past the fixed instant.
    pub fn engine_at(&self, later: Duration) -> BusEngine {
        BusEngine::new(self.store.clone(), TicketSigner::new(TICKET_SECRET).unwrap())
            .with_clock(Arc::new(FixedClock(now() + later)))
    }

    pub async fn seats_available(&self, trip_id: &str) -> i32 {
        self.engine.trip(trip_id).await.unwrap().seats_available
    }

    /// Checks the counter against the live tickets held on the trip.
    pub async fn assert_seat_invariants(&self, trip_id: &str) {
        let trip = self.engine.trip(trip_id).await.unwrap();
        let mut tx = self.store.begin().await.unwrap();
        let taken = tx.taken_seats(trip_id, LockMode::Shared).await.unwrap();
        assert!(trip.seats_available >= 0);
        assert!(trip.seats_available <= trip.seats_total);
        assert_eq!(
            i32::try_from(taken.len()).unwrap(),
            trip.seats_total - trip.seats_available,
            "live tickets must match the seat counter"
        );
        assert!(taken.iter().all(|sn| (1..=trip.seats_total).contains(sn)));
    }
}

pub fn count(seats: i32, wallet: Option<&str>, key: Option<&str>) -> BookRequest {
    BookRequest {
        seats: SeatRequest::Count(seats),
        wallet_id: wallet.map(str::to_string),
        customer_phone: Some("+963900000000".into()),
        idempotency_key: key.map(str::to_string),
    }
}

pub fn numbers(seats: &[i32], wallet: Option<&str>, key: Option<&str>) -> BookRequest {
    BookRequest {
        seats: SeatRequest::Numbers(seats.to_vec()),
        wallet_id: wallet.map(str::to_string),
        customer_phone: None,
        idempotency_key: key.map(str::to_string),
    }
}
