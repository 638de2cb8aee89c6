//! A transmission on its way through the outputs.

use tlx_common::Transmission;
use tlx_store::EntryId;

/// Where a delivery came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Freshly serialized from a batch.
    Live,
    /// Loaded from the overflow store; the entry stays on disk until the
    /// loader sees the outcome.
    Replay(EntryId),
}

/// Final outcome reported through a [`Receipt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the endpoint.
    Delivered,
    /// Written to the overflow store.
    Persisted,
    /// Not sent; a replayed payload stays where it is.
    Deferred,
    /// Permanently rejected or could not be stored; dropped.
    Rejected,
    /// Discarded during shutdown or after an internal failure.
    Abandoned,
}

type Callback = Box<dyn FnOnce(DeliveryOutcome) + Send>;

/// One-shot completion callback. Dropping an uncompleted receipt reports
/// [`DeliveryOutcome::Abandoned`].
#[derive(Default)]
pub struct Receipt(Option<Callback>);

impl Receipt {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(DeliveryOutcome) + Send + 'static,
    {
        Receipt(Some(Box::new(callback)))
    }

    pub fn none() -> Self {
        Receipt(None)
    }

    fn fire(&mut self, outcome: DeliveryOutcome) {
        if let Some(callback) = self.0.take() {
            callback(outcome);
        }
    }
}

impl Drop for Receipt {
    fn drop(&mut self) {
        self.fire(DeliveryOutcome::Abandoned);
    }
}

impl std::fmt::Debug for Receipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Receipt").field(&self.0.is_some()).finish()
    }
}

#[derive(Debug)]
pub struct Delivery {
    pub transmission: Transmission,
    /// Network attempts made so far.
    pub attempts: u32,
    pub origin: Origin,
    receipt: Receipt,
}

impl Delivery {
    pub fn live(transmission: Transmission) -> Self {
        Delivery {
            transmission,
            attempts: 0,
            origin: Origin::Live,
            receipt: Receipt::none(),
        }
    }

    pub fn replay(transmission: Transmission, entry: EntryId, receipt: Receipt) -> Self {
        Delivery {
            transmission,
            attempts: 0,
            origin: Origin::Replay(entry),
            receipt,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_receipt(mut self, receipt: Receipt) -> Self {
        self.receipt = receipt;
        self
    }

    pub fn is_replay(&self) -> bool {
        matches!(self.origin, Origin::Replay(_))
    }

    /// Report the outcome and consume the delivery.
    pub fn complete(mut self, outcome: DeliveryOutcome) {
        self.receipt.fire(outcome);
    }
}
