//! Ticket authority: signs boarding payloads and boards tickets.
//!
//! Wire format (versionless; new fields are appended, never reordered):
//!
//! ```text
//! TICKET|id=<ticket>|b=<booking>|trip=<trip>|seat=<n>|sig=<hex hmac-sha256>
//! ```
//!
//! The signature covers `id:b:trip:seat`.

use crate::engine::BusEngine;
use crate::error::{EngineError, Result};
use crate::models::{Booking, BookingStatus, Ticket, TicketStatus};
use crate::secret_policy::{self, SecretPolicyError};
use crate::store::LockMode;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const PAYLOAD_TAG: &str = "TICKET";

#[derive(Debug, thiserror::Error)]
pub enum TicketSecretError {
    #[error("ticket secret must not be empty")]
    Empty,
    #[error(transparent)]
    Policy(#[from] SecretPolicyError),
    #[error("ticket secret rejected by hmac")]
    InvalidKey,
}

/// HMAC-SHA256 key for boarding payloads.
#[derive(Clone)]
pub struct TicketSigner {
    mac: HmacSha256,
}

impl TicketSigner {
    pub fn new(secret: &str) -> std::result::Result<Self, TicketSecretError> {
        if secret.is_empty() {
            return Err(TicketSecretError::Empty);
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| TicketSecretError::InvalidKey)?;
        Ok(Self { mac })
    }

    /// Build a signer after applying the deployment secret policy for `env_name`.
    pub fn for_environment(
        env_name: &str,
        secret: &str,
    ) -> std::result::Result<Self, TicketSecretError> {
        secret_policy::enforce(env_name, "BUS_TICKET_SECRET", Some(secret), true)?;
        Self::new(secret)
    }

    fn signature(&self, ticket_id: &str, booking_id: &str, trip_id: &str, seat: i32) -> String {
        let mut mac = self.mac.clone();
        mac.update(format!("{ticket_id}:{booking_id}:{trip_id}:{seat}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn sign(&self, ticket: &Ticket) -> TicketPayload {
        TicketPayload {
            ticket_id: ticket.id.clone(),
            booking_id: ticket.booking_id.clone(),
            trip_id: ticket.trip_id.clone(),
            seat_no: ticket.seat_no,
            sig: self.signature(&ticket.id, &ticket.booking_id, &ticket.trip_id, ticket.seat_no),
        }
    }

    /// Constant-time signature check.
    pub fn verify(&self, payload: &TicketPayload) -> bool {
        let expected = self.signature(
            &payload.ticket_id,
            &payload.booking_id,
            &payload.trip_id,
            payload.seat_no,
        );
        let provided = payload.sig.to_ascii_lowercase();
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }
}

impl fmt::Debug for TicketSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TicketSigner(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketPayload {
    pub ticket_id: String,
    pub booking_id: String,
    pub trip_id: String,
    pub seat_no: i32,
    pub sig: String,
}

impl TicketPayload {
    /// Unknown fields are ignored; every known field is required.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.trim().split('|');
        if parts.next() != Some(PAYLOAD_TAG) {
            return Err(EngineError::MalformedPayload);
        }
        let (mut id, mut b, mut trip, mut seat, mut sig) = (None, None, None, None, None);
        for kv in parts {
            let Some((k, v)) = kv.split_once('=') else {
                continue;
            };
            match k {
                "id" => id = Some(v),
                "b" => b = Some(v),
                "trip" => trip = Some(v),
                "seat" => {
                    seat = Some(
                        v.parse::<i32>()
                            .map_err(|_| EngineError::MalformedPayload)?,
                    )
                }
                "sig" => sig = Some(v),
                _ => {}
            }
        }
        let field = |v: Option<&str>| {
            v.filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or(EngineError::MalformedPayload)
        };
        Ok(Self {
            ticket_id: field(id)?,
            booking_id: field(b)?,
            trip_id: field(trip)?,
            seat_no: seat.ok_or(EngineError::MalformedPayload)?,
            sig: field(sig)?,
        })
    }
}

impl fmt::Display for TicketPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PAYLOAD_TAG}|id={}|b={}|trip={}|seat={}|sig={}",
            self.ticket_id, self.booking_id, self.trip_id, self.seat_no, self.sig
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedTicket {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub payload: String,
}

impl SignedTicket {
    pub(crate) fn new(signer: &TicketSigner, ticket: Ticket) -> Self {
        let payload = signer.sign(&ticket).to_string();
        Self { ticket, payload }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingTickets {
    pub booking: Booking,
    pub tickets: Vec<SignedTicket>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardOutcome {
    Boarded(Ticket),
    /// Boarding was already recorded; the ticket keeps its first `boarded_at`.
    AlreadyBoarded(Ticket),
}

impl BoardOutcome {
    pub fn ticket(&self) -> &Ticket {
        match self {
            Self::Boarded(t) | Self::AlreadyBoarded(t) => t,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Boarded(_) => "boarded",
            Self::AlreadyBoarded(_) => "already_boarded",
        }
    }
}

impl BusEngine {
    pub async fn board(&self, raw_payload: &str) -> Result<BoardOutcome> {
        let payload = TicketPayload::parse(raw_payload)?;
        if !self.signer.verify(&payload) {
            tracing::warn!(ticket_id = %payload.ticket_id, "ticket signature mismatch");
            return Err(EngineError::InvalidSignature);
        }

        let mut tx = self.store.begin().await?;
        let mut ticket = tx
            .ticket(&payload.ticket_id, LockMode::Exclusive)
            .await?
            .filter(|t| {
                t.booking_id == payload.booking_id
                    && t.trip_id == payload.trip_id
                    && t.seat_no == payload.seat_no
            })
            .ok_or(EngineError::TicketNotFound)?;

        match ticket.status {
            TicketStatus::Canceled => return Err(EngineError::TicketCanceled),
            TicketStatus::Boarded => return Ok(BoardOutcome::AlreadyBoarded(ticket)),
            TicketStatus::Pending | TicketStatus::Issued => {}
        }

        if self.payments_required() {
            let booking = tx
                .booking(&ticket.booking_id, LockMode::Shared)
                .await?
                .ok_or(EngineError::TicketNotFound)?;
            if booking.status != BookingStatus::Confirmed {
                return Err(EngineError::BookingNotConfirmed);
            }
        }

        ticket.status = TicketStatus::Boarded;
        ticket.boarded_at = Some(self.now());
        tx.update_ticket(&ticket).await?;
        tx.commit().await?;
        tracing::info!(ticket_id = %ticket.id, trip_id = %ticket.trip_id, "ticket boarded");
        Ok(BoardOutcome::Boarded(ticket))
    }

    /// The booking with its tickets and their signed payloads, ordered by seat.
    pub async fn booking_tickets(&self, booking_id: &str) -> Result<BookingTickets> {
        let booking_id = booking_id.trim();
        let mut tx = self.store.begin().await?;
        let booking = tx
            .booking(booking_id, LockMode::Shared)
            .await?
            .ok_or_else(|| EngineError::not_found("booking", booking_id))?;
        let tickets = tx
            .tickets_for_booking(booking_id, LockMode::Shared)
            .await?
            .into_iter()
            .map(|t| SignedTicket::new(&self.signer, t))
            .collect();
        Ok(BookingTickets { booking, tickets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> Ticket {
        Ticket {
            id: "t-1".into(),
            booking_id: "b-1".into(),
            trip_id: "DAMASCUS-ALEPPO-20260503-0705".into(),
            seat_no: 7,
            status: TicketStatus::Issued,
            issued_at: None,
            boarded_at: None,
        }
    }

    #[test]
    fn signed_payload_parses_and_verifies() {
        let signer = TicketSigner::new("bus-ticket-secret-for-tests").unwrap();
        let wire = signer.sign(&ticket()).to_string();
        assert!(wire.starts_with("TICKET|id=t-1|b=b-1|trip=DAMASCUS-ALEPPO-20260503-0705|seat=7|sig="));
        let parsed = TicketPayload::parse(&wire).unwrap();
        assert_eq!(parsed.seat_no, 7);
        assert!(signer.verify(&parsed));
    }

    #[test]
    fn tampered_seat_fails_verification() {
        let signer = TicketSigner::new("bus-ticket-secret-for-tests").unwrap();
        let mut p = signer.sign(&ticket());
        p.seat_no = 8;
        assert!(!signer.verify(&p));

        let other = TicketSigner::new("another-secret-entirely").unwrap();
        assert!(!other.verify(&signer.sign(&ticket())));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        for raw in [
            "",
            "PASS|id=a|b=b|trip=t|seat=1|sig=00",
            "TICKET|id=a|b=b|trip=t|sig=00",
            "TICKET|id=a|b=b|trip=t|seat=x|sig=00",
            "TICKET|id=|b=b|trip=t|seat=1|sig=00",
        ] {
            assert!(
                matches!(TicketPayload::parse(raw), Err(EngineError::MalformedPayload)),
                "{raw}"
            );
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let p = TicketPayload::parse("TICKET|id=a|b=b|trip=t|seat=1|v=2|sig=00").unwrap();
        assert_eq!(p.sig, "00");
    }

    #[test]
    fn production_rejects_placeholder_secret() {
        assert!(matches!(
            TicketSigner::for_environment("prod", "change-me-bus-ticket"),
            Err(TicketSecretError::Policy(_))
        ));
        assert!(TicketSigner::for_environment("dev", "change-me-bus-ticket").is_ok());
        assert_eq!(
            format!("{:?}", TicketSigner::new("s3cr3t").unwrap()),
            "TicketSigner(<redacted>)"
        );
    }
}
