//! The payments collaborator as the engine consumes it: a single idempotent
//! wallet-to-wallet transfer.

mod http;
mod memory;

pub use http::HttpPaymentGateway;
pub use memory::InMemoryLedger;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAction {
    Charge,
    Refund,
}

impl TransferAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Charge => "charge",
            Self::Refund => "refund",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub booking_id: String,
    pub action: TransferAction,
    pub from_wallet: String,
    pub to_wallet: String,
    pub amount_cents: i64,
    /// Replaying a request with the same key must not move money twice.
    pub idempotency_key: String,
    pub reference: String,
}

impl TransferRequest {
    pub fn booking_charge(booking_id: &str, from: &str, to: &str, amount_cents: i64) -> Self {
        Self {
            booking_id: booking_id.to_string(),
            action: TransferAction::Charge,
            from_wallet: from.to_string(),
            to_wallet: to.to_string(),
            amount_cents,
            idempotency_key: format!("bus-book-{booking_id}"),
            reference: format!("booking-charge-{booking_id}"),
        }
    }

    pub fn booking_refund(booking_id: &str, from: &str, to: &str, amount_cents: i64) -> Self {
        Self {
            booking_id: booking_id.to_string(),
            action: TransferAction::Refund,
            from_wallet: from.to_string(),
            to_wallet: to.to_string(),
            amount_cents,
            idempotency_key: format!("bus-refund-{booking_id}"),
            reference: format!("booking-refund-{booking_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub txn_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("cannot transfer to same wallet")]
    SameWallet,
    #[error("payment timed out")]
    Timeout,
    #[error("payment failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn transfer(&self, req: TransferRequest) -> Result<TransferReceipt, PaymentError>;
}

/// Map a payments-service error detail to a normalized category.
pub(crate) fn classify_failure(detail: &str) -> PaymentError {
    let low = detail.to_lowercase();
    if low.contains("insufficient") && (low.contains("fund") || low.contains("balance")) {
        return PaymentError::InsufficientFunds;
    }
    if low.contains("same wallet") {
        return PaymentError::SameWallet;
    }
    PaymentError::Other(detail.trim().chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_keys_are_derived_from_the_booking_id() {
        let charge = TransferRequest::booking_charge("b-1", "rider", "op", 500);
        assert_eq!(charge.idempotency_key, "bus-book-b-1");
        let refund = TransferRequest::booking_refund("b-1", "op", "rider", 200);
        assert_eq!(refund.idempotency_key, "bus-refund-b-1");
        assert_eq!(charge.action, TransferAction::Charge);
        assert_eq!(refund.action.as_str(), "refund");
        assert_eq!(refund.booking_id, "b-1");
        assert_eq!(refund.from_wallet, "op");
    }

    #[test]
    fn classify_failure_recognizes_ledger_details() {
        assert_eq!(
            classify_failure("Insufficient balance"),
            PaymentError::InsufficientFunds
        );
        assert_eq!(
            classify_failure("cannot transfer to same wallet"),
            PaymentError::SameWallet
        );
        assert_eq!(
            classify_failure("wallet frozen"),
            PaymentError::Other("wallet frozen".into())
        );
    }
}
