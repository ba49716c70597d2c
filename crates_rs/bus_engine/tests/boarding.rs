mod common;

use bus_engine::{
    BoardOutcome, Booking, BookingStatus, EngineError, Store, Ticket, TicketPayload, TicketStatus,
};
use chrono::Duration;
use common::{count, now, numbers, world, Payments};

fn tamper(payload: &str) -> String {
    let mut raw = payload.to_string();
    let last = raw.pop().unwrap();
    raw.push(if last == '0' { '1' } else { '0' });
    raw
}

#[tokio::test]
async fn boarding_is_recorded_once() {
    let w = world(Payments::Off).await;
    let trip = w.published_trip(10, 1_000, Duration::days(1)).await;
    let receipt = w.engine.book(&trip.id, numbers(&[4], None, None)).await.unwrap();
    let payload = &receipt.tickets[0].payload;

    let first = w.engine.board(payload).await.unwrap();
    assert_eq!(first.status_label(), "boarded");
    assert_eq!(first.ticket().status, TicketStatus::Boarded);
    assert_eq!(first.ticket().boarded_at, Some(now()));

    let later = w.engine_at(Duration::hours(1));
    let second = later.board(payload).await.unwrap();
    assert!(matches!(second, BoardOutcome::AlreadyBoarded(_)));
    assert_eq!(second.status_label(), "already_boarded");
    assert_eq!(second.ticket().boarded_at, Some(now()));

    // boarding keeps the seat occupied
    assert_eq!(w.seats_available(&trip.id).await, 9);
    w.assert_seat_invariants(&trip.id).await;
}

#[tokio::test]
async fn payload_round_trips_through_its_wire_form() {
    let w = world(Payments::Off).await;
    let trip = w.published_trip(10, 1_000, Duration::days(1)).await;
    let receipt = w.engine.book(&trip.id, numbers(&[7], None, None)).await.unwrap();
    let signed = &receipt.tickets[0];

    let parsed = TicketPayload::parse(&signed.payload).unwrap();
    assert_eq!(parsed.ticket_id, signed.ticket.id);
    assert_eq!(parsed.booking_id, receipt.booking.id);
    assert_eq!(parsed.trip_id, trip.id);
    assert_eq!(parsed.seat_no, 7);
    assert!(w.engine.signer().verify(&parsed));
}

#[tokio::test]
async fn tampered_signature_is_rejected_before_lookup() {
    let w = world(Payments::Off).await;
    let trip = w.published_trip(10, 1_000, Duration::days(1)).await;
    let receipt = w.engine.book(&trip.id, count(1, None, None)).await.unwrap();

    let err = w
        .engine
        .board(&tamper(&receipt.tickets[0].payload))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSignature));

    let view = w.engine.booking_tickets(&receipt.booking.id).await.unwrap();
    assert_eq!(view.tickets[0].ticket.status, TicketStatus::Issued);
}

#[tokio::test]
async fn altered_seat_breaks_the_signature() {
    let w = world(Payments::Off).await;
    let trip = w.published_trip(10, 1_000, Duration::days(1)).await;
    let receipt = w.engine.book(&trip.id, numbers(&[2], None, None)).await.unwrap();
    let forged = receipt.tickets[0].payload.replace("|seat=2|", "|seat=3|");

    let err = w.engine.board(&forged).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSignature));
}

#[tokio::test]
async fn malformed_payloads_are_rejected() {
    let w = world(Payments::Off).await;
    for raw in [
        "",
        "hello",
        "TICKET|id=t|b=b|trip=x|sig=00",
        "TICKET|id=t|b=b|trip=x|seat=two|sig=00",
        "TICKET|id=t|b=|trip=x|seat=1|sig=00",
        "BUS|id=t|b=b|trip=x|seat=1|sig=00",
    ] {
        let err = w.engine.board(raw).await.unwrap_err();
        assert!(matches!(err, EngineError::MalformedPayload), "{raw:?}: {err:?}");
    }
}

#[tokio::test]
async fn unknown_ticket_with_valid_signature_is_not_found() {
    let w = world(Payments::Off).await;
    let ghost = Ticket {
        id: "ghost".into(),
        booking_id: "no-booking".into(),
        trip_id: "no-trip".into(),
        seat_no: 1,
        status: TicketStatus::Issued,
        issued_at: Some(now()),
        boarded_at: None,
    };
    let payload = w.engine.signer().sign(&ghost).to_string();

    let err = w.engine.board(&payload).await.unwrap_err();
    assert!(matches!(err, EngineError::TicketNotFound));
}

#[tokio::test]
async fn ticket_of_failed_booking_is_canceled() {
    let w = world(Payments::On).await;
    let trip = w.published_trip(10, 1_000, Duration::days(1)).await;
    let err = w
        .engine
        .book(&trip.id, count(1, Some("broke"), Some("k-1")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds));

    let replay = w
        .engine
        .book(&trip.id, count(1, Some("broke"), Some("k-1")))
        .await
        .unwrap();
    assert_eq!(replay.booking.status, BookingStatus::Failed);

    let err = w.engine.board(&replay.tickets[0].payload).await.unwrap_err();
    assert!(matches!(err, EngineError::TicketCanceled));
}

#[tokio::test]
async fn pending_booking_cannot_board_when_payments_are_required() {
    let w = world(Payments::On).await;
    let trip = w.published_trip(10, 1_000, Duration::days(1)).await;

    let booking = Booking {
        id: "pending-booking".into(),
        trip_id: trip.id.clone(),
        price_cents: Some(1_000),
        customer_phone: None,
        wallet_id: Some("rider".into()),
        seats: 1,
        status: BookingStatus::Pending,
        payments_txn_id: None,
        created_at: now(),
    };
    let ticket = Ticket {
        id: "pending-ticket".into(),
        booking_id: booking.id.clone(),
        trip_id: trip.id.clone(),
        seat_no: 5,
        status: TicketStatus::Pending,
        issued_at: None,
        boarded_at: None,
    };
    let mut tx = w.store.begin().await.unwrap();
    tx.insert_booking(&booking).await.unwrap();
    tx.insert_ticket(&ticket).await.unwrap();
    tx.commit().await.unwrap();

    let payload = w.engine.signer().sign(&ticket).to_string();
    let err = w.engine.board(&payload).await.unwrap_err();
    assert!(matches!(err, EngineError::BookingNotConfirmed));
}

#[tokio::test]
async fn booking_tickets_are_ordered_by_seat() {
    let w = world(Payments::Off).await;
    let trip = w.published_trip(10, 1_000, Duration::days(1)).await;
    let receipt = w
        .engine
        .book(&trip.id, numbers(&[9, 1, 5], None, None))
        .await
        .unwrap();

    let view = w.engine.booking_tickets(&receipt.booking.id).await.unwrap();
    let seats: Vec<i32> = view.tickets.iter().map(|t| t.ticket.seat_no).collect();
    assert_eq!(seats, vec![1, 5, 9]);
    for t in &view.tickets {
        let parsed = TicketPayload::parse(&t.payload).unwrap();
        assert!(w.engine.signer().verify(&parsed));
    }
}
