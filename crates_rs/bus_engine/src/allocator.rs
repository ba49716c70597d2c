//! Seat allocation.
//!
//! Reservation locks the trip row (and, for explicit seat requests, the trip's
//! live ticket rows), re-reads the taken seats inside that lock, and writes the
//! decremented counter and the new tickets in the caller's transaction.
//! Release is guarded by the booking status so a booking's seats are credited
//! back at most once.

use crate::error::{EngineError, Result};
use crate::models::{BookingStatus, Ticket, TicketStatus, Trip};
use crate::store::{LockMode, StoreTx};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

pub const MAX_SEATS_PER_BOOKING: i32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeatRequest {
    /// Any free seats, lowest numbers first.
    Count(i32),
    /// Exactly these seat numbers.
    Numbers(Vec<i32>),
}

impl SeatRequest {
    pub fn seats(&self) -> i32 {
        match self {
            Self::Count(n) => *n,
            Self::Numbers(v) => i32::try_from(v.len()).unwrap_or(i32::MAX),
        }
    }

    /// Checks that need no trip data: seat count bounds and duplicate numbers.
    pub fn check_shape(&self) -> Result<()> {
        let n = self.seats();
        if !(1..=MAX_SEATS_PER_BOOKING).contains(&n) {
            return Err(EngineError::InvalidSeatCount);
        }
        if let Self::Numbers(v) = self {
            let mut seen = HashSet::with_capacity(v.len());
            if !v.iter().all(|sn| seen.insert(*sn)) {
                return Err(EngineError::DuplicateSeatNumber);
            }
        }
        Ok(())
    }

    pub fn check_range(&self, seats_total: i32) -> Result<()> {
        if let Self::Numbers(v) = self {
            if v.iter().any(|sn| *sn < 1 || *sn > seats_total) {
                return Err(EngineError::SeatOutOfRange);
            }
        }
        Ok(())
    }

    /// Lowercase hex SHA-256 of the ascending, comma-joined seat list; `None`
    /// for count requests.
    pub fn numbers_hash(&self) -> Option<String> {
        let Self::Numbers(v) = self else {
            return None;
        };
        let mut sorted = v.clone();
        sorted.sort_unstable();
        let normalized = sorted
            .iter()
            .map(|sn| sn.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Some(hex::encode(Sha256::digest(normalized.as_bytes())))
    }
}

/// Lowest `want` seat numbers in `1..=seats_total` not in `taken`, or `None`
/// if fewer than `want` are free.
pub fn pick_seats(seats_total: i32, taken: &BTreeSet<i32>, want: i32) -> Option<Vec<i32>> {
    let want = usize::try_from(want).ok()?;
    let picked: Vec<i32> = (1..=seats_total)
        .filter(|sn| !taken.contains(sn))
        .take(want)
        .collect();
    (picked.len() == want).then_some(picked)
}

#[derive(Debug, Clone)]
pub(crate) struct Reservation {
    /// The trip as it stands after the reservation.
    pub trip: Trip,
    pub tickets: Vec<Ticket>,
}

pub(crate) async fn reserve(
    tx: &mut dyn StoreTx,
    trip_id: &str,
    req: &SeatRequest,
    booking_id: &str,
    ticket_status: TicketStatus,
    now: DateTime<Utc>,
) -> Result<Reservation> {
    let mut trip = tx
        .trip(trip_id, LockMode::Exclusive)
        .await?
        .ok_or_else(|| EngineError::not_found("trip", trip_id))?;
    req.check_range(trip.seats_total)?;

    let want = req.seats();
    let seat_numbers = match req {
        SeatRequest::Numbers(requested) => {
            let taken = tx.taken_seats(trip_id, LockMode::Exclusive).await?;
            if requested.iter().any(|sn| taken.contains(sn)) {
                return Err(EngineError::SeatsAlreadyBooked);
            }
            if trip.seats_available < want {
                return Err(EngineError::NotEnoughSeats);
            }
            let mut v = requested.clone();
            v.sort_unstable();
            v
        }
        SeatRequest::Count(_) => {
            if trip.seats_available < want {
                return Err(EngineError::NotEnoughSeats);
            }
            let taken = tx.taken_seats(trip_id, LockMode::Shared).await?;
            pick_seats(trip.seats_total, &taken, want).ok_or(EngineError::NotEnoughSeats)?
        }
    };

    trip.seats_available -= want;
    tx.set_seats_available(trip_id, trip.seats_available).await?;

    let issued_at = (ticket_status == TicketStatus::Issued).then_some(now);
    let mut tickets = Vec::with_capacity(seat_numbers.len());
    for seat_no in seat_numbers {
        let ticket = Ticket {
            id: Uuid::new_v4().to_string(),
            booking_id: booking_id.to_string(),
            trip_id: trip_id.to_string(),
            seat_no,
            status: ticket_status,
            issued_at,
            boarded_at: None,
        };
        tx.insert_ticket(&ticket).await?;
        tickets.push(ticket);
    }
    tracing::debug!(trip_id, booking_id, seats = want, "seats reserved");
    Ok(Reservation { trip, tickets })
}

/// Cancel the booking's live, unboarded tickets and credit their seats back to
/// the trip. A booking that is already failed or canceled credits nothing.
/// Returns the number of seats credited.
pub(crate) async fn release(tx: &mut dyn StoreTx, booking_id: &str) -> Result<i32> {
    let booking = tx
        .booking(booking_id, LockMode::Exclusive)
        .await?
        .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
    if matches!(booking.status, BookingStatus::Failed | BookingStatus::Canceled) {
        return Ok(0);
    }

    let trip = tx
        .trip(&booking.trip_id, LockMode::Exclusive)
        .await?
        .ok_or_else(|| EngineError::not_found("trip", booking.trip_id.as_str()))?;
    let tickets = tx.tickets_for_booking(booking_id, LockMode::Exclusive).await?;

    let mut released = 0;
    for mut ticket in tickets {
        if matches!(ticket.status, TicketStatus::Boarded | TicketStatus::Canceled) {
            continue;
        }
        ticket.status = TicketStatus::Canceled;
        tx.update_ticket(&ticket).await?;
        released += 1;
    }

    let seats_available = (trip.seats_available + released).min(trip.seats_total);
    tx.set_seats_available(&trip.id, seats_available).await?;
    tracing::debug!(booking_id, trip_id = %trip.id, released, "seats released");
    Ok(released)
}
