use crate::models::BookingStatus;
use crate::payments::PaymentError;

/// Coarse classification used by callers to pick a response (HTTP status,
/// retry policy, UI message).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape; nothing was mutated.
    Validation,
    NotFound,
    /// State conflict; retrying with different parameters may succeed.
    Conflict,
    Forbidden,
    Unauthorized,
    /// Payment rejected; seats were released.
    Payment,
    /// A collaborator failed while the engine was mid-operation.
    Upstream,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Validation(String),

    #[error("operator offline")]
    OperatorOffline,

    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("trip canceled")]
    TripCanceled,

    #[error("trip not published")]
    TripNotPublished,

    #[error("invalid seats; book between 1 and 10 seats")]
    InvalidSeatCount,

    #[error("seat_numbers must be unique")]
    DuplicateSeatNumber,

    #[error("seat_numbers out of range")]
    SeatOutOfRange,

    #[error("one or more selected seats already booked")]
    SeatsAlreadyBooked,

    #[error("not enough seats")]
    NotEnoughSeats,

    #[error("Idempotency-Key reused with different parameters")]
    IdempotencyConflict,

    #[error("wallet_id required for booking")]
    WalletRequired,

    #[error("operator wallet not configured")]
    OperatorWalletMissing,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("cannot transfer to same wallet")]
    SameWalletTransfer,

    #[error("payment failed")]
    PaymentFailed,

    #[error("booking cannot move from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("booking already canceled")]
    AlreadyCanceled,

    #[error("departure passed; cannot cancel")]
    DeparturePassed,

    #[error("one or more tickets already boarded")]
    AlreadyBoarded,

    #[error("refund failed: {0}")]
    RefundFailed(String),

    #[error("invalid payload")]
    MalformedPayload,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("ticket not found")]
    TicketNotFound,

    #[error("ticket canceled")]
    TicketCanceled,

    #[error("booking not confirmed")]
    BookingNotConfirmed,

    /// Storage failure. The context names the operation; driver details are
    /// logged where the error is raised and never carried here.
    #[error("database error ({0})")]
    Storage(&'static str),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::Validation(detail.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::TicketNotFound => ErrorKind::NotFound,
            Self::Validation(_)
            | Self::InvalidTimeRange(_)
            | Self::InvalidSeatCount
            | Self::DuplicateSeatNumber
            | Self::SeatOutOfRange
            | Self::WalletRequired
            | Self::MalformedPayload => ErrorKind::Validation,
            Self::TripCanceled
            | Self::TripNotPublished
            | Self::SeatsAlreadyBooked
            | Self::NotEnoughSeats
            | Self::IdempotencyConflict
            | Self::InvalidTransition { .. }
            | Self::AlreadyCanceled
            | Self::DeparturePassed
            | Self::AlreadyBoarded
            | Self::TicketCanceled
            | Self::BookingNotConfirmed => ErrorKind::Conflict,
            Self::OperatorOffline => ErrorKind::Forbidden,
            Self::InvalidSignature => ErrorKind::Unauthorized,
            Self::InsufficientFunds | Self::SameWalletTransfer | Self::PaymentFailed => {
                ErrorKind::Payment
            }
            Self::RefundFailed(_) => ErrorKind::Upstream,
            Self::OperatorWalletMissing | Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

impl From<PaymentError> for EngineError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InsufficientFunds => Self::InsufficientFunds,
            PaymentError::SameWallet => Self::SameWalletTransfer,
            PaymentError::Timeout | PaymentError::Other(_) => Self::PaymentFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_errors_normalize_to_three_categories() {
        assert!(matches!(
            EngineError::from(PaymentError::InsufficientFunds),
            EngineError::InsufficientFunds
        ));
        assert!(matches!(
            EngineError::from(PaymentError::SameWallet),
            EngineError::SameWalletTransfer
        ));
        assert!(matches!(
            EngineError::from(PaymentError::Timeout),
            EngineError::PaymentFailed
        ));
        assert!(matches!(
            EngineError::from(PaymentError::Other("ledger down".into())),
            EngineError::PaymentFailed
        ));
    }

    #[test]
    fn storage_errors_do_not_leak_driver_text() {
        let e = EngineError::Storage("trip lookup");
        assert_eq!(e.to_string(), "database error (trip lookup)");
        assert_eq!(e.kind(), ErrorKind::Internal);
    }

    #[test]
    fn conflicts_and_validation_are_classified() {
        assert_eq!(EngineError::SeatsAlreadyBooked.kind(), ErrorKind::Conflict);
        assert_eq!(EngineError::InvalidSeatCount.kind(), ErrorKind::Validation);
        assert_eq!(EngineError::InvalidSignature.kind(), ErrorKind::Unauthorized);
        assert_eq!(EngineError::PaymentFailed.kind(), ErrorKind::Payment);
    }
}
