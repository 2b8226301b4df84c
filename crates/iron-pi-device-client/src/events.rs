//! Events emitted by the device client
//!
//! Every event goes to every subscriber that exists at the moment it is
//! emitted. Subscribers that fall more than the buffer size behind lose the
//! oldest events; the loss is logged and delivery continues.

use std::fmt;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use iron_pi_config::MAX_EVENT_BUFFER;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{trace, warn};

use crate::error::ClientError;
use crate::types::{DeviceInputStates, HardwareInfo};

/// An event observed by [`DeviceClient`](crate::DeviceClient) subscribers
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The driver reported input values
    DeviceInputStates(DeviceInputStates),
    /// The driver finished hardware detection
    DevicesDetected(HardwareInfo),
    /// The connection to the driver failed
    Error(Arc<ClientError>),
    /// A connection to the driver was established
    Connection,
    /// An established connection was lost
    Close,
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceInputStates(_) => EventKind::DeviceInputStates,
            Self::DevicesDetected(_) => EventKind::DevicesDetected,
            Self::Error(_) => EventKind::Error,
            Self::Connection => EventKind::Connection,
            Self::Close => EventKind::Close,
        }
    }
}

/// Payload-free name of a [`ClientEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DeviceInputStates,
    DevicesDetected,
    Error,
    Connection,
    Close,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        Self::DeviceInputStates,
        Self::DevicesDetected,
        Self::Error,
        Self::Connection,
        Self::Close,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceInputStates => "deviceInputStates",
            Self::DevicesDetected => "devicesDetected",
            Self::Error => "error",
            Self::Connection => "connection",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fan-out point for client events
#[derive(Debug)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.clamp(1, MAX_EVENT_BUFFER));
        Self { tx }
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(receivers) => trace!(event = %kind, receivers, "Emitted client event"),
            Err(_) => trace!(event = %kind, "No subscribers for client event"),
        }
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live registration for client events
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// stops delivery to it.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ClientEvent>,
}

impl Subscription {
    /// Wait for the next event
    ///
    /// Returns `None` once the client has been dropped.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber fell behind, events were dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is already buffered
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber fell behind, events were dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}

    /// Convert into a `Stream` of events
    pub fn into_stream(self) -> impl Stream<Item = ClientEvent> + Send + Unpin {
        BroadcastStream::new(self.rx).filter_map(|item| {
            futures::future::ready(match item {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(missed, "Event stream fell behind, events were dropped");
                    None
                }
            })
        })
    }
}
