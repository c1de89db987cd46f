//! Lifecycle notifications for the host.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::handle::AdHandle;

/// Something the host may want to react to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdEvent {
    /// GPU resources are built (or rebuilt after a refresh).
    Ready(AdHandle),
    /// A fetch failed. On a refresh the previous creative stays up.
    Failed {
        /// Affected instance.
        handle: AdHandle,
        /// Human-readable cause.
        reason: String,
    },
    /// The instance's slot is gone; its handle is now invalid.
    Released(AdHandle),
}

/// Bounded, lossy event publisher. A host that never drains the channel
/// costs at most `capacity` events of memory.
pub(crate) struct EventSink {
    tx: Sender<AdEvent>,
    rx: Receiver<AdEvent>,
}

impl EventSink {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { tx, rx }
    }

    pub(crate) fn publish(&self, event: AdEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::debug!("event channel full; dropping {event:?}");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub(crate) fn receiver(&self) -> Receiver<AdEvent> {
        self.rx.clone()
    }
}
