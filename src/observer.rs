/*!
 # Notification observers

 Inbound notification bytes are fanned out to every registered observer in
 registration order. A panicking observer is logged and skipped; delivery to
 the remaining observers continues.
*/

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{error, trace};

use crate::protocol::hex;

/// Receives notification payloads from a device
pub trait NotificationObserver: Send + Sync {
    /// Called once per notification
    fn received(&self, data: &[u8]);
}

impl<F> NotificationObserver for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn received(&self, data: &[u8]) {
        self(data)
    }
}

/// Forwards payloads into a channel, for callers that await replies
#[derive(Debug, Clone)]
pub struct ChannelObserver(mpsc::UnboundedSender<Vec<u8>>);

impl ChannelObserver {
    /// Creates the observer and the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl NotificationObserver for ChannelObserver {
    fn received(&self, data: &[u8]) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.0.send(data.to_vec());
    }
}

/// Handle returned on registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered set of observers
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Arc<dyn NotificationObserver>)>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an observer; it is called after all earlier registrations
    pub fn register(&self, observer: Arc<dyn NotificationObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Removes an observer, returning whether it was registered
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(candidate, _)| *candidate != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `data` to every observer, returning how many completed normally
    pub fn dispatch(&self, data: &[u8]) -> usize {
        // Snapshot so observers may (un)register from inside the callback
        let snapshot: Vec<_> = self.observers.read().clone();
        trace!(observers = snapshot.len(), data = %hex(data), "dispatching notification");

        let mut delivered = 0;
        for (id, observer) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| observer.received(data))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(?id, "Notification observer panicked"),
            }
        }
        delivered
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}
