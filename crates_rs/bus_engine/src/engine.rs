use crate::clock::{Clock, SystemClock};
use crate::payments::PaymentGateway;
use crate::store::Store;
use crate::tickets::TicketSigner;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// `Test` relaxes the production rules: unpublished trips are bookable and no
/// money moves, even when a payment gateway is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
    #[default]
    Production,
    Test,
}

/// Entry point for every engine operation. Cheap to share behind an `Arc`;
/// all state lives in the store.
pub struct BusEngine {
    pub(crate) store: Arc<dyn Store>,
    payments: Option<Arc<dyn PaymentGateway>>,
    pub(crate) signer: TicketSigner,
    clock: Arc<dyn Clock>,
    mode: EngineMode,
}

impl BusEngine {
    pub fn new(store: Arc<dyn Store>, signer: TicketSigner) -> Self {
        Self {
            store,
            payments: None,
            signer,
            clock: Arc::new(SystemClock),
            mode: EngineMode::Production,
        }
    }

    pub fn with_payments(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.payments = Some(gateway);
        self
    }

    pub fn with_mode(mut self, mode: EngineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn signer(&self) -> &TicketSigner {
        &self.signer
    }

    /// Whether bookings must be paid before they are confirmed.
    pub fn payments_required(&self) -> bool {
        self.payment_gateway().is_some()
    }

    /// The gateway money moves through, or `None` when payments are disabled.
    pub(crate) fn payment_gateway(&self) -> Option<&dyn PaymentGateway> {
        match self.mode {
            EngineMode::Test => None,
            EngineMode::Production => self.payments.as_deref(),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl fmt::Debug for BusEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusEngine")
            .field("mode", &self.mode)
            .field("payments", &self.payments.is_some())
            .finish_non_exhaustive()
    }
}
