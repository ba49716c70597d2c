use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} status: {value}")]
pub struct UnknownStatus {
    kind: &'static str,
    value: String,
}

macro_rules! status_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownStatus;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw.trim() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownStatus {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

status_enum!(TripStatus, "trip", {
    Draft => "draft",
    Published => "published",
    Canceled => "canceled",
});

status_enum!(BookingStatus, "booking", {
    Pending => "pending",
    Confirmed => "confirmed",
    Canceled => "canceled",
    Failed => "failed",
});

status_enum!(TicketStatus, "ticket", {
    Pending => "pending",
    Issued => "issued",
    Boarded => "boarded",
    Canceled => "canceled",
});

impl TicketStatus {
    /// Whether a ticket in this status still occupies its seat.
    pub fn holds_seat(self) -> bool {
        !matches!(self, Self::Canceled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub id: String,
    pub name: String,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub wallet_id: Option<String>,
    pub is_online: bool,
}

impl Operator {
    /// Wallet that receives booking payments, if one is configured.
    pub fn payout_wallet(&self) -> Option<&str> {
        self.wallet_id
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub origin_city_id: String,
    pub dest_city_id: String,
    pub operator_id: String,
    pub bus_model: Option<String>,
    pub features: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub route_id: String,
    pub depart_at: DateTime<Utc>,
    pub arrive_at: DateTime<Utc>,
    pub price_cents: i64,
    pub currency: String,
    pub seats_total: i32,
    pub seats_available: i32,
    pub status: TripStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub trip_id: String,
    /// Per-seat price captured at booking time. `None` for rows written before
    /// bookings carried their own price.
    pub price_cents: Option<i64>,
    pub customer_phone: Option<String>,
    pub wallet_id: Option<String>,
    pub seats: i32,
    pub status: BookingStatus,
    pub payments_txn_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// Total charged for the booking, using `fallback_price_cents` per seat when
    /// the booking predates per-booking pricing.
    pub fn amount_cents(&self, fallback_price_cents: i64) -> i64 {
        self.price_cents.unwrap_or(fallback_price_cents) * i64::from(self.seats)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub booking_id: String,
    pub trip_id: String,
    pub seat_no: i32,
    pub status: TicketStatus,
    pub issued_at: Option<DateTime<Utc>>,
    pub boarded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub trip_id: String,
    pub wallet_id: Option<String>,
    pub seats: i32,
    pub seat_numbers_hash: Option<String>,
    /// Unset until the reservation that claimed the key commits.
    pub booking_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
