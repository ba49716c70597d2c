use super::{PaymentError, PaymentGateway, TransferReceipt, TransferRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Ledger {
    balances: HashMap<String, i64>,
    applied: HashMap<String, TransferReceipt>,
    transfers: Vec<TransferRequest>,
    outage: Option<PaymentError>,
}

/// Wallet ledger kept in process. Honors idempotency keys the way the payments
/// service does, so retried transfers are applied once.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<Ledger>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deposit(&self, wallet_id: &str, amount_cents: i64) {
        let mut ledger = self.inner.lock().await;
        *ledger.balances.entry(wallet_id.to_string()).or_insert(0) += amount_cents;
    }

    pub async fn balance(&self, wallet_id: &str) -> i64 {
        let ledger = self.inner.lock().await;
        ledger.balances.get(wallet_id).copied().unwrap_or(0)
    }

    /// Transfers that moved money, in application order.
    pub async fn transfers(&self) -> Vec<TransferRequest> {
        self.inner.lock().await.transfers.clone()
    }

    /// Make every subsequent transfer fail with `err` (`None` restores service).
    pub async fn set_outage(&self, err: Option<PaymentError>) {
        self.inner.lock().await.outage = err;
    }
}

#[async_trait]
impl PaymentGateway for InMemoryLedger {
    async fn transfer(&self, req: TransferRequest) -> Result<TransferReceipt, PaymentError> {
        let mut ledger = self.inner.lock().await;
        if let Some(receipt) = ledger.applied.get(&req.idempotency_key) {
            return Ok(receipt.clone());
        }
        if let Some(err) = ledger.outage.clone() {
            return Err(err);
        }
        if req.from_wallet == req.to_wallet {
            return Err(PaymentError::SameWallet);
        }
        if req.amount_cents <= 0 {
            return Err(PaymentError::Other("amount must be > 0".to_string()));
        }
        let available = ledger.balances.get(&req.from_wallet).copied().unwrap_or(0);
        if available < req.amount_cents {
            return Err(PaymentError::InsufficientFunds);
        }

        *ledger.balances.entry(req.from_wallet.clone()).or_insert(0) -= req.amount_cents;
        *ledger.balances.entry(req.to_wallet.clone()).or_insert(0) += req.amount_cents;
        let receipt = TransferReceipt {
            txn_id: Some(Uuid::new_v4().to_string()),
        };
        ledger
            .applied
            .insert(req.idempotency_key.clone(), receipt.clone());
        ledger.transfers.push(req);
        Ok(receipt)
    }
}
