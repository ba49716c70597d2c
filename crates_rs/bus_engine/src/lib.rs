//! Seat inventory and booking engine for scheduled bus trips.
//!
//! The engine owns trips' seat counters, bookings and tickets. Reference data
//! (cities, operators, routes) is imported by an administrative caller, and
//! money moves through an external [`payments::PaymentGateway`].
//!
//! Every operation runs in its own store transaction; see [`store`] for the
//! locking contract the backends provide.

pub mod allocator;
pub mod booking;
pub mod clock;
pub mod engine;
pub mod error;
pub mod models;
pub mod payments;
pub mod reference;
pub mod refund;
pub mod secret_policy;
pub mod stats;
pub mod store;
pub mod tickets;
pub mod trips;

pub use allocator::{SeatRequest, MAX_SEATS_PER_BOOKING};
pub use booking::{BookRequest, BookingReceipt, MAX_IDEMPOTENCY_KEY_LEN};
pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{BusEngine, EngineMode};
pub use error::{EngineError, ErrorKind, Result};
pub use models::*;
pub use payments::{
    HttpPaymentGateway, InMemoryLedger, PaymentError, PaymentGateway, TransferAction,
    TransferRequest,
};
pub use reference::NewRoute;
pub use refund::CancelOutcome;
pub use stats::{OperatorStats, StatsPeriod};
pub use store::{LockMode, MemoryStore, PgStore, Store, StoreTx};
pub use tickets::{
    BoardOutcome, BookingTickets, SignedTicket, TicketPayload, TicketSecretError, TicketSigner,
};
pub use trips::{NewTrip, Quote};
