//! Booking state machine.
//!
//! `pending → confirmed`, `pending → failed` and `confirmed → canceled` are the
//! only transitions. A paid booking is reserved and committed as `pending`,
//! charged outside any transaction, then confirmed; a rejected charge releases
//! the seats and marks it `failed`.

use crate::allocator::{self, SeatRequest};
use crate::engine::{BusEngine, EngineMode};
use crate::error::{EngineError, Result};
use crate::models::{Booking, BookingStatus, IdempotencyRecord, TicketStatus, TripStatus};
use crate::payments::TransferRequest;
use crate::reference::operator_for_trip;
use crate::store::{LockMode, StoreTx};
use crate::tickets::{BookingTickets, SignedTicket};
use serde::Serialize;
use uuid::Uuid;

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 120;
const MAX_WALLET_ID_LEN: usize = 36;
const MAX_PHONE_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct BookRequest {
    pub seats: SeatRequest,
    pub wallet_id: Option<String>,
    pub customer_phone: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub tickets: Vec<SignedTicket>,
    /// Set when an idempotency key resolved to a booking made by an earlier
    /// request.
    pub replayed: bool,
}

impl Booking {
    pub fn transition_to(&mut self, next: BookingStatus) -> Result<()> {
        use BookingStatus::*;
        match (self.status, next) {
            (Pending, Confirmed) | (Pending, Failed) | (Confirmed, Canceled) => {
                self.status = next;
                Ok(())
            }
            (from, to) => Err(EngineError::InvalidTransition { from, to }),
        }
    }
}

fn optional_field(raw: Option<&str>, field: &str, max_len: usize) -> Result<Option<String>> {
    let Some(v) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if v.chars().count() > max_len {
        return Err(EngineError::validation(format!("{field} too long")));
    }
    Ok(Some(v.to_string()))
}

/// Normalized, validated booking parameters.
struct BookParams {
    trip_id: String,
    seats: SeatRequest,
    wallet_id: Option<String>,
    customer_phone: Option<String>,
    idempotency_key: Option<String>,
}

impl BookParams {
    fn fingerprint_matches(&self, record: &IdempotencyRecord) -> bool {
        record.trip_id == self.trip_id
            && record.wallet_id.as_deref().unwrap_or("") == self.wallet_id.as_deref().unwrap_or("")
            && record.seats == self.seats.seats()
            && record.seat_numbers_hash == self.seats.numbers_hash()
    }
}

/// Where a request stands once its booking exists.
enum Claim {
    /// Just created; charge it if payments are on.
    Open(String),
    /// Pending booking found under a reused key; its charge is retried.
    Resumed(String),
    /// Booking made by an earlier request with the same key, returned as-is.
    Settled(String),
}

impl BusEngine {
    pub async fn book(&self, trip_id: &str, req: BookRequest) -> Result<BookingReceipt> {
        let params = self.validate_book(trip_id, req)?;

        let trip = self.trip(&params.trip_id).await?;
        if trip.status != TripStatus::Published && !self.is_test_mode() {
            return Err(EngineError::TripNotPublished);
        }
        params.seats.check_range(trip.seats_total)?;

        let claim = match params.idempotency_key.as_deref() {
            Some(key) => self.lookup_idempotent(&params, key).await?,
            None => None,
        };
        let claim = match claim {
            Some(claim) => claim,
            None => self.reserve_booking(&params).await?,
        };
        let (booking_id, replayed) = match claim {
            Claim::Settled(id) => return self.receipt(&id, true).await,
            Claim::Resumed(id) => (id, true),
            Claim::Open(id) => (id, false),
        };

        if self.payment_gateway().is_none() {
            return self.receipt(&booking_id, replayed).await;
        }
        self.collect_payment(&booking_id).await?;
        self.receipt(&booking_id, replayed).await
    }

    fn is_test_mode(&self) -> bool {
        self.mode() == EngineMode::Test
    }

    fn validate_book(&self, trip_id: &str, req: BookRequest) -> Result<BookParams> {
        let trip_id = trip_id.trim();
        if trip_id.is_empty() {
            return Err(EngineError::validation("trip_id required"));
        }
        req.seats.check_shape()?;
        let wallet_id = optional_field(req.wallet_id.as_deref(), "wallet_id", MAX_WALLET_ID_LEN)?;
        if self.payments_required() && wallet_id.is_none() {
            return Err(EngineError::WalletRequired);
        }
        let customer_phone =
            optional_field(req.customer_phone.as_deref(), "customer_phone", MAX_PHONE_LEN)?;
        let idempotency_key = req
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        if idempotency_key
            .as_deref()
            .is_some_and(|k| k.chars().count() > MAX_IDEMPOTENCY_KEY_LEN)
        {
            return Err(EngineError::validation("Idempotency-Key too long"));
        }
        Ok(BookParams {
            trip_id: trip_id.to_string(),
            seats: req.seats,
            wallet_id,
            customer_phone,
            idempotency_key,
        })
    }

    /// Resolve an existing record for `key`, or claim the key with a record
    /// that has no booking yet. The claim commits on its own. `None` means a
    /// booking still has to be reserved.
    async fn lookup_idempotent(&self, params: &BookParams, key: &str) -> Result<Option<Claim>> {
        let mut tx = self.store.begin().await?;
        if let Some(record) = tx.idempotency(key, LockMode::Shared).await? {
            if !params.fingerprint_matches(&record) {
                return Err(EngineError::IdempotencyConflict);
            }
            return match record.booking_id {
                Some(id) => self.existing_claim(tx.as_mut(), id).await.map(Some),
                None => Ok(None),
            };
        }

        let record = IdempotencyRecord {
            key: key.to_string(),
            trip_id: params.trip_id.clone(),
            wallet_id: params.wallet_id.clone(),
            seats: params.seats.seats(),
            seat_numbers_hash: params.seats.numbers_hash(),
            booking_id: None,
            created_at: self.now(),
        };
        if !tx.insert_idempotency(&record).await? {
            tracing::debug!(key, "idempotency key claimed concurrently");
        }
        tx.commit().await?;
        Ok(None)
    }

    async fn existing_claim(&self, tx: &mut dyn StoreTx, booking_id: String) -> Result<Claim> {
        let booking = tx
            .booking(&booking_id, LockMode::Shared)
            .await?
            .ok_or_else(|| EngineError::not_found("booking", booking_id.as_str()))?;
        if booking.status == BookingStatus::Pending && self.payments_required() {
            tracing::info!(booking_id = %booking_id, "resuming pending booking");
            Ok(Claim::Resumed(booking_id))
        } else {
            Ok(Claim::Settled(booking_id))
        }
    }

    /// Reserve seats and write the booking in one transaction. With a key, the
    /// record is re-read under lock first so that only one request per key
    /// creates a booking.
    async fn reserve_booking(&self, params: &BookParams) -> Result<Claim> {
        let mut tx = self.store.begin().await?;
        if let Some(key) = params.idempotency_key.as_deref() {
            let record = tx.idempotency(key, LockMode::Exclusive).await?;
            match record {
                Some(rec) if !params.fingerprint_matches(&rec) => {
                    return Err(EngineError::IdempotencyConflict);
                }
                Some(IdempotencyRecord {
                    booking_id: Some(id),
                    ..
                }) => return self.existing_claim(tx.as_mut(), id).await,
                _ => {}
            }
        }

        let now = self.now();
        let paid = self.payments_required();
        let ticket_status = if paid {
            TicketStatus::Pending
        } else {
            TicketStatus::Issued
        };
        let booking_id = Uuid::new_v4().to_string();
        let reservation = allocator::reserve(
            tx.as_mut(),
            &params.trip_id,
            &params.seats,
            &booking_id,
            ticket_status,
            now,
        )
        .await?;
        if reservation.trip.status != TripStatus::Published && !self.is_test_mode() {
            return Err(EngineError::TripNotPublished);
        }

        let mut booking = Booking {
            id: booking_id.clone(),
            trip_id: params.trip_id.clone(),
            price_cents: Some(reservation.trip.price_cents),
            customer_phone: params.customer_phone.clone(),
            wallet_id: params.wallet_id.clone(),
            seats: params.seats.seats(),
            status: BookingStatus::Pending,
            payments_txn_id: None,
            created_at: now,
        };
        if !paid {
            booking.transition_to(BookingStatus::Confirmed)?;
        }
        tx.insert_booking(&booking).await?;
        if let Some(key) = params.idempotency_key.as_deref() {
            tx.attach_idempotency_booking(key, &booking_id).await?;
        }
        tx.commit().await?;

        tracing::info!(
            booking_id = %booking_id,
            trip_id = %params.trip_id,
            seats = booking.seats,
            status = %booking.status,
            "booking created"
        );
        Ok(Claim::Open(booking_id))
    }

    /// Charge a pending booking and confirm it, or fail it and release its
    /// seats when the charge cannot be made.
    async fn collect_payment(&self, booking_id: &str) -> Result<()> {
        let Some(gateway) = self.payment_gateway() else {
            return Ok(());
        };

        let (booking, trip, operator) = {
            let mut tx = self.store.begin().await?;
            let booking = tx
                .booking(booking_id, LockMode::Shared)
                .await?
                .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
            let trip = tx
                .trip(&booking.trip_id, LockMode::Shared)
                .await?
                .ok_or_else(|| EngineError::not_found("trip", booking.trip_id.as_str()))?;
            let operator = operator_for_trip(tx.as_mut(), &trip).await?;
            (booking, trip, operator)
        };
        if booking.status != BookingStatus::Pending {
            return Ok(());
        }

        let Some(op_wallet) = operator.payout_wallet() else {
            tracing::error!(operator_id = %operator.id, "operator wallet not configured");
            self.fail_booking(booking_id).await?;
            return Err(EngineError::OperatorWalletMissing);
        };
        let Some(payer) = booking.wallet_id.as_deref() else {
            self.fail_booking(booking_id).await?;
            return Err(EngineError::WalletRequired);
        };

        let mut txn_id = None;
        if payer != op_wallet {
            let amount = booking.amount_cents(trip.price_cents);
            let req = TransferRequest::booking_charge(booking_id, payer, op_wallet, amount);
            match gateway.transfer(req).await {
                Ok(receipt) => txn_id = receipt.txn_id,
                Err(e) => {
                    tracing::warn!(error = %e, booking_id, "booking charge failed");
                    self.fail_booking(booking_id).await?;
                    return Err(e.into());
                }
            }
        }
        self.confirm_booking(booking_id, txn_id).await
    }

    async fn confirm_booking(&self, booking_id: &str, txn_id: Option<String>) -> Result<()> {
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let mut booking = tx
            .booking(booking_id, LockMode::Exclusive)
            .await?
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
        if booking.status == BookingStatus::Confirmed {
            return Ok(());
        }
        let current = booking.status;
        booking.transition_to(BookingStatus::Confirmed).map_err(|e| {
            tracing::error!(booking_id, status = %current, "charged booking cannot be confirmed");
            e
        })?;
        booking.payments_txn_id = txn_id;
        tx.update_booking(&booking).await?;

        for mut ticket in tx.tickets_for_booking(booking_id, LockMode::Exclusive).await? {
            if ticket.status != TicketStatus::Pending {
                continue;
            }
            ticket.status = TicketStatus::Issued;
            ticket.issued_at.get_or_insert(now);
            tx.update_ticket(&ticket).await?;
        }
        tx.commit().await?;
        tracing::info!(booking_id, "booking confirmed");
        Ok(())
    }

    /// Compensate a pending booking: release its seats and mark it failed.
    async fn fail_booking(&self, booking_id: &str) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let mut booking = tx
            .booking(booking_id, LockMode::Exclusive)
            .await?
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
        if booking.status != BookingStatus::Pending {
            return Ok(());
        }
        let released = allocator::release(tx.as_mut(), booking_id).await?;
        booking.transition_to(BookingStatus::Failed)?;
        tx.update_booking(&booking).await?;
        tx.commit().await?;
        tracing::info!(booking_id, released, "booking failed; seats released");
        Ok(())
    }

    async fn receipt(&self, booking_id: &str, replayed: bool) -> Result<BookingReceipt> {
        let BookingTickets { booking, tickets } = self.booking_tickets(booking_id).await?;
        Ok(BookingReceipt {
            booking,
            tickets,
            replayed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            id: "b".into(),
            trip_id: "t".into(),
            price_cents: Some(100),
            customer_phone: None,
            wallet_id: None,
            seats: 1,
            status,
            payments_txn_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn allowed_transitions() {
        let mut b = booking(BookingStatus::Pending);
        b.transition_to(BookingStatus::Confirmed).unwrap();
        b.transition_to(BookingStatus::Canceled).unwrap();
        assert_eq!(b.status, BookingStatus::Canceled);

        let mut b = booking(BookingStatus::Pending);
        b.transition_to(BookingStatus::Failed).unwrap();
    }

    #[test]
    fn everything_else_is_an_invalid_transition() {
        for (from, to) in [
            (BookingStatus::Failed, BookingStatus::Confirmed),
            (BookingStatus::Canceled, BookingStatus::Confirmed),
            (BookingStatus::Pending, BookingStatus::Canceled),
            (BookingStatus::Confirmed, BookingStatus::Failed),
            (BookingStatus::Confirmed, BookingStatus::Confirmed),
        ] {
            let mut b = booking(from);
            let err = b.transition_to(to).unwrap_err();
            assert!(matches!(err, EngineError::InvalidTransition { .. }));
            assert_eq!(b.status, from);
        }
    }

    #[test]
    fn optional_fields_trim_and_bound() {
        assert_eq!(optional_field(Some("  "), "wallet_id", 36).unwrap(), None);
        assert_eq!(
            optional_field(Some(" w-1 "), "wallet_id", 36).unwrap().as_deref(),
            Some("w-1")
        );
        assert!(optional_field(Some(&"9".repeat(33)), "customer_phone", 32).is_err());
    }
}
