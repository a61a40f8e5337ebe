use bonkarena_types::{Cents, LedgerEvent, LedgerKind};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::trace;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Fan-out of balance notifications to the UI.
///
/// Publishing is fire-and-forget. The bus also remembers the last value it
/// published per ledger, which is what the UI is currently showing.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    sender: broadcast::Sender<LedgerEvent>,
    displayed: Mutex<[Option<Cents>; 4]>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    /// A `capacity` of `0` uses the default capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CHANNEL_CAPACITY
        } else {
            capacity
        };
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                sender,
                displayed: Mutex::new([None; 4]),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.inner.sender.subscribe()
    }

    pub fn publish(&self, ledger: LedgerKind, balance: Cents) {
        let mut displayed = self
            .inner
            .displayed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        displayed[ledger.index()] = Some(balance);
        if self
            .inner
            .sender
            .send(LedgerEvent::BalanceChanged { ledger, balance })
            .is_err()
        {
            trace!(%ledger, %balance, "no subscribers for balance update");
        }
    }

    /// Last value published for `ledger`, if any.
    pub fn displayed(&self, ledger: LedgerKind) -> Option<Cents> {
        let displayed = self
            .inner
            .displayed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        displayed[ledger.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::default();
        let mut receiver = bus.subscribe();

        bus.publish(LedgerKind::Global, Cents::new(300));
        assert_eq!(
            receiver.recv().await.unwrap(),
            LedgerEvent::BalanceChanged {
                ledger: LedgerKind::Global,
                balance: Cents::new(300),
            }
        );
        assert_eq!(bus.displayed(LedgerKind::Global), Some(Cents::new(300)));
        assert_eq!(bus.displayed(LedgerKind::Arena), None);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(0);
        bus.publish(LedgerKind::Credits, Cents::new(1));
        assert_eq!(bus.displayed(LedgerKind::Credits), Some(Cents::new(1)));
    }
}
