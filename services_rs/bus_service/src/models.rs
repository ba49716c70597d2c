use bus_engine::{
    BoardOutcome, Booking, BookingTickets, CancelOutcome, City, NewRoute, NewTrip, Operator,
    OperatorStats, Quote, Route, SeatRequest, SignedTicket, Ticket, Trip,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CityIn {
    pub name: String,
    pub country: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct CityOut {
    pub id: String,
    pub name: String,
    pub country: Option<String>,
}

impl From<City> for CityOut {
    fn from(c: City) -> Self {
        Self {
            id: c.id,
            name: c.name,
            country: c.country,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OperatorIn {
    pub name: String,
    pub wallet_id: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct OperatorOut {
    pub id: String,
    pub name: String,
    pub wallet_id: Option<String>,
    pub is_online: bool,
}

impl From<Operator> for OperatorOut {
    fn from(o: Operator) -> Self {
        Self {
            id: o.id,
            name: o.name,
            wallet_id: o.wallet_id,
            is_online: o.is_online,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RouteIn {
    pub origin_city_id: String,
    pub dest_city_id: String,
    pub operator_id: String,
    pub bus_model: Option<String>,
    pub features: Option<String>,
}

impl From<RouteIn> for NewRoute {
    fn from(r: RouteIn) -> Self {
        Self {
            origin_city_id: r.origin_city_id,
            dest_city_id: r.dest_city_id,
            operator_id: r.operator_id,
            bus_model: r.bus_model,
            features: r.features,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct RouteOut {
    pub id: String,
    pub origin_city_id: String,
    pub dest_city_id: String,
    pub operator_id: String,
    pub bus_model: Option<String>,
    pub features: Option<String>,
}

impl From<Route> for RouteOut {
    fn from(r: Route) -> Self {
        Self {
            id: r.id,
            origin_city_id: r.origin_city_id,
            dest_city_id: r.dest_city_id,
            operator_id: r.operator_id,
            bus_model: r.bus_model,
            features: r.features,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TripIn {
    pub route_id: String,
    pub depart_at_iso: String,
    pub arrive_at_iso: String,
    pub price_cents: i64,
    pub currency: Option<String>,
    #[serde(default = "default_seats_total")]
    pub seats_total: i32,
}

fn default_seats_total() -> i32 {
    40
}

impl From<TripIn> for NewTrip {
    fn from(t: TripIn) -> Self {
        Self {
            route_id: t.route_id,
            depart_at: t.depart_at_iso,
            arrive_at: t.arrive_at_iso,
            price_cents: t.price_cents,
            seats_total: t.seats_total,
            currency: t.currency,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct TripOut {
    pub id: String,
    pub route_id: String,
    pub depart_at: DateTime<Utc>,
    pub arrive_at: DateTime<Utc>,
    pub price_cents: i64,
    pub currency: String,
    pub seats_total: i32,
    pub seats_available: i32,
    pub status: String,
}

impl From<Trip> for TripOut {
    fn from(t: Trip) -> Self {
        Self {
            id: t.id,
            route_id: t.route_id,
            depart_at: t.depart_at,
            arrive_at: t.arrive_at,
            price_cents: t.price_cents,
            currency: t.currency,
            seats_total: t.seats_total,
            seats_available: t.seats_available,
            status: t.status.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuoteParams {
    pub seats: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct QuoteOut {
    pub trip_id: String,
    pub seats: i32,
    pub total_cents: i64,
    pub currency: String,
    pub seats_available: i32,
}

impl From<Quote> for QuoteOut {
    fn from(q: Quote) -> Self {
        Self {
            trip_id: q.trip_id,
            seats: q.seats,
            total_cents: q.total_cents,
            currency: q.currency,
            seats_available: q.seats_available,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BookReq {
    #[serde(default = "default_book_seats")]
    pub seats: i32,
    pub wallet_id: Option<String>,
    pub customer_phone: Option<String>,
    pub seat_numbers: Option<Vec<i32>>,
}

fn default_book_seats() -> i32 {
    1
}

impl BookReq {
    /// Explicit seat numbers win over a bare count.
    pub fn seat_request(&self) -> SeatRequest {
        match &self.seat_numbers {
            Some(numbers) => SeatRequest::Numbers(numbers.clone()),
            None => SeatRequest::Count(self.seats),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct TicketOut {
    pub id: String,
    pub booking_id: String,
    pub trip_id: String,
    pub seat_no: i32,
    pub status: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub boarded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl From<Ticket> for TicketOut {
    fn from(t: Ticket) -> Self {
        Self {
            id: t.id,
            booking_id: t.booking_id,
            trip_id: t.trip_id,
            seat_no: t.seat_no,
            status: t.status.to_string(),
            issued_at: t.issued_at,
            boarded_at: t.boarded_at,
            payload: None,
        }
    }
}

impl From<SignedTicket> for TicketOut {
    fn from(t: SignedTicket) -> Self {
        Self {
            payload: Some(t.payload),
            ..Self::from(t.ticket)
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct BookingOut {
    pub id: String,
    pub trip_id: String,
    pub seats: i32,
    pub status: String,
    pub price_cents: Option<i64>,
    pub payments_txn_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub wallet_id: Option<String>,
    pub customer_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tickets: Option<Vec<TicketOut>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub replayed: bool,
}

impl BookingOut {
    pub fn new(booking: Booking, tickets: Option<Vec<SignedTicket>>, replayed: bool) -> Self {
        Self {
            id: booking.id,
            trip_id: booking.trip_id,
            seats: booking.seats,
            status: booking.status.to_string(),
            price_cents: booking.price_cents,
            payments_txn_id: booking.payments_txn_id,
            created_at: booking.created_at,
            wallet_id: booking.wallet_id,
            customer_phone: booking.customer_phone,
            tickets: tickets.map(|ts| ts.into_iter().map(TicketOut::from).collect()),
            replayed,
        }
    }
}

impl From<BookingTickets> for BookingOut {
    fn from(v: BookingTickets) -> Self {
        Self::new(v.booking, Some(v.tickets), false)
    }
}

#[derive(Debug, Serialize)]
pub struct BookingCancelOut {
    pub booking: BookingOut,
    pub refund_cents: i64,
    pub refund_currency: String,
    pub refund_pct: u8,
    pub refund_txn_id: Option<String>,
}

impl From<CancelOutcome> for BookingCancelOut {
    fn from(c: CancelOutcome) -> Self {
        Self {
            booking: BookingOut::new(c.booking, None, false),
            refund_cents: c.refund_cents,
            refund_currency: c.refund_currency,
            refund_pct: c.refund_pct,
            refund_txn_id: c.refund_txn_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BoardReq {
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct BoardOut {
    pub status: &'static str,
    pub ticket: TicketOut,
}

impl From<BoardOutcome> for BoardOut {
    fn from(o: BoardOutcome) -> Self {
        let status = o.status_label();
        let ticket = match o {
            BoardOutcome::Boarded(t) | BoardOutcome::AlreadyBoarded(t) => t,
        };
        Self {
            status,
            ticket: ticket.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OperatorStatsParams {
    pub period: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OperatorStatsOut {
    pub operator_id: String,
    pub period: String,
    pub trips: i32,
    pub bookings: i32,
    pub confirmed_bookings: i32,
    pub seats_sold: i32,
    pub seats_total: i32,
    pub seats_boarded: i32,
    pub revenue_cents: i64,
}

impl From<OperatorStats> for OperatorStatsOut {
    fn from(s: OperatorStats) -> Self {
        Self {
            operator_id: s.operator_id,
            period: s.period,
            trips: s.trips,
            bookings: s.bookings,
            confirmed_bookings: s.confirmed_bookings,
            seats_sold: s.seats_sold,
            seats_total: s.seats_total,
            seats_boarded: s.seats_boarded,
            revenue_cents: s.revenue_cents,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub env: String,
    pub service: &'static str,
    pub version: &'static str,
}
