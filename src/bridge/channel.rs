//! Per-request event channel between a bridge and its controller.
//!
//! The controller creates the channel and registers the receiving half
//! before the remote `send` call, so nothing emitted by the bridge can be
//! missed. Delivery order on the channel carries no meaning; the envelope
//! index does.

use tokio::sync::mpsc;

use crate::error::BridgeError;
use crate::wire::types::{BodyEvent, ChannelEvent, Envelope};

/// Create a connected sender/receiver pair.
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

/// Bridge-side half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

impl EventSender {
    /// Deliver an indexed message.
    pub fn emit(&self, index: u64, message: BodyEvent) -> Result<(), BridgeError> {
        self.deliver(ChannelEvent::Message(Envelope { index, message }))
    }

    /// Deliver the out-of-band end marker.
    pub fn end(&self) -> Result<(), BridgeError> {
        self.deliver(ChannelEvent::End)
    }

    /// Deliver a pre-built event, as decoded from a transport.
    pub fn deliver(&self, event: ChannelEvent) -> Result<(), BridgeError> {
        self.tx.send(event).map_err(|_| BridgeError::ChannelClosed)
    }

    /// True once the controller has unregistered the channel.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the controller unregisters the channel.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Controller-side half.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl EventReceiver {
    /// Next event, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    /// Unregister: later emits fail with [`BridgeError::ChannelClosed`].
    pub fn close(&mut self) {
        self.rx.close();
    }
}
