//! Cancellation with time-tiered refunds.
//!
//! The whole cancellation, refund transfer included, happens inside one store
//! transaction: if the payments service rejects the refund nothing is
//! persisted and the booking stays confirmed.

use crate::allocator;
use crate::engine::BusEngine;
use crate::error::{EngineError, Result};
use crate::models::{Booking, BookingStatus, TicketStatus};
use crate::payments::TransferRequest;
use crate::reference::operator_for_trip;
use crate::store::LockMode;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Percentage of the booking amount refunded when canceling at `now`.
/// Zero once the trip has departed.
pub fn refund_pct(now: DateTime<Utc>, depart_at: DateTime<Utc>) -> u8 {
    let until = depart_at - now;
    if until < Duration::zero() {
        0
    } else if until >= Duration::days(30) {
        100
    } else if until >= Duration::days(7) {
        70
    } else if until >= Duration::hours(48) {
        40
    } else {
        20
    }
}

/// `amount * pct / 100`, rounded half up.
pub fn refund_cents(amount_cents: i64, pct: u8) -> i64 {
    (amount_cents * i64::from(pct) + 50).div_euclid(100)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub booking: Booking,
    pub refund_cents: i64,
    pub refund_pct: u8,
    pub refund_currency: String,
    pub refund_txn_id: Option<String>,
}

impl BusEngine {
    pub async fn cancel_booking(&self, booking_id: &str) -> Result<CancelOutcome> {
        let booking_id = booking_id.trim();
        if booking_id.is_empty() {
            return Err(EngineError::validation("booking_id required"));
        }

        let mut tx = self.store.begin().await?;
        let mut booking = tx
            .booking(booking_id, LockMode::Exclusive)
            .await?
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
        match booking.status {
            BookingStatus::Canceled => return Err(EngineError::AlreadyCanceled),
            BookingStatus::Confirmed => {}
            from => {
                return Err(EngineError::InvalidTransition {
                    from,
                    to: BookingStatus::Canceled,
                })
            }
        }

        let trip = tx
            .trip(&booking.trip_id, LockMode::Exclusive)
            .await?
            .ok_or_else(|| EngineError::not_found("trip", booking.trip_id.as_str()))?;
        let pct = refund_pct(self.now(), trip.depart_at);
        if pct == 0 {
            return Err(EngineError::DeparturePassed);
        }
        let tickets = tx.tickets_for_booking(booking_id, LockMode::Exclusive).await?;
        if tickets.iter().any(|t| t.status == TicketStatus::Boarded) {
            return Err(EngineError::AlreadyBoarded);
        }

        let refund = refund_cents(booking.amount_cents(trip.price_cents), pct);
        allocator::release(tx.as_mut(), booking_id).await?;
        booking.transition_to(BookingStatus::Canceled)?;
        tx.update_booking(&booking).await?;

        let mut refund_txn_id = None;
        if let (Some(gateway), Some(customer_wallet)) =
            (self.payment_gateway(), booking.wallet_id.as_deref())
        {
            if refund > 0 {
                let operator = operator_for_trip(tx.as_mut(), &trip).await?;
                let Some(op_wallet) = operator.payout_wallet() else {
                    tracing::error!(operator_id = %operator.id, "operator wallet not configured for refund");
                    return Err(EngineError::OperatorWalletMissing);
                };
                if op_wallet != customer_wallet {
                    let req =
                        TransferRequest::booking_refund(booking_id, op_wallet, customer_wallet, refund);
                    let receipt = gateway.transfer(req).await.map_err(|e| {
                        tracing::warn!(error = %e, booking_id, "refund transfer failed");
                        EngineError::RefundFailed(e.to_string())
                    })?;
                    refund_txn_id = receipt.txn_id;
                }
            }
        }

        tx.commit().await?;
        tracing::info!(booking_id, refund_cents = refund, refund_pct = pct, "booking canceled");
        Ok(CancelOutcome {
            booking,
            refund_cents: refund,
            refund_pct: pct,
            refund_currency: trip.currency,
            refund_txn_id,
        })
    }
}
