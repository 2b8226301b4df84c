//! High-level client for the iron-pi driver
//!
//! [`DeviceClient`] sits between callers and a [`FrameSink`] transport:
//! commands are encoded with a [`Codec`] and handed to the transport; inbound
//! frames are decoded and republished as typed [`ClientEvent`]s.

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use iron_pi_config::ClientConfig;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::codec::{Codec, DriverCodec};
use crate::error::{ClientError, TransportError};
use crate::events::{ClientEvent, EventBus, Subscription};
use crate::transport::{
    ConnectionState, FrameSink, TransportListener, TransportOptions, UnixTransport,
};
use crate::types::{HardwareInfo, SetLeds, SetOutputs};

/// Client for the iron-pi hardware driver
///
/// # Example
///
/// ```no_run
/// use iron_pi_device_client::{ClientConfig, ClientEvent, DeviceClient};
///
/// # async fn example() {
/// let client = DeviceClient::new(ClientConfig::default());
/// let mut events = client.subscribe();
/// client.start();
///
/// while let Some(event) = events.recv().await {
///     if let ClientEvent::DevicesDetected(info) = event {
///         println!("{} devices", info.devices.len());
///     }
/// }
/// # }
/// ```
pub struct DeviceClient<C: Codec = DriverCodec, T: FrameSink = UnixTransport> {
    relay: Arc<Relay<C>>,
    transport: T,
}

impl DeviceClient {
    /// Create a client using the default codec. Does not connect.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_codec(config, DriverCodec)
    }
}

impl<C: Codec> DeviceClient<C, UnixTransport> {
    /// Create a client that speaks through `codec`. Does not connect.
    pub fn with_codec(config: ClientConfig, codec: C) -> Self {
        let socket_path = config.resolved_socket_path();
        let options = TransportOptions {
            reconnect: config.reconnect.clone(),
            send_queue: config.send_queue,
        };

        debug!(path = %socket_path.display(), "Creating device client");
        Self::with_transport(codec, config.event_buffer, move |listener| {
            UnixTransport::new(socket_path, options, listener)
        })
    }
}

impl<C: Codec, T: FrameSink> DeviceClient<C, T> {
    /// Create a client over a transport built by `build`
    ///
    /// `build` receives the listener the transport must report its lifecycle
    /// events and inbound frames to.
    pub fn with_transport<F>(codec: C, event_buffer: usize, build: F) -> Self
    where
        F: FnOnce(Arc<dyn TransportListener>) -> T,
    {
        let relay = Arc::new(Relay {
            codec,
            hardware_info: RwLock::new(None),
            events: EventBus::new(event_buffer),
        });
        let transport = build(Arc::clone(&relay) as Arc<dyn TransportListener>);

        Self { relay, transport }
    }

    /// Begin connecting to the driver
    pub fn start(&self) {
        self.transport.start();
    }

    /// Hardware reported by the most recent detection notification
    pub fn hardware_info(&self) -> Option<HardwareInfo> {
        self.relay
            .hardware_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send a `setOutputs` command
    ///
    /// Returns once the encoded frame is handed to the transport; delivery
    /// failures are reported through `Error` events.
    pub fn set_outputs(&self, cmd: &SetOutputs) -> Result<(), ClientError> {
        let frame = self
            .relay
            .codec
            .encode_set_outputs(cmd)
            .map_err(ClientError::Encode)?;

        debug!(devices = cmd.outputs.len(), len = frame.len(), "Sending setOutputs");
        self.transport.send(frame);
        Ok(())
    }

    /// Send a `setLeds` command
    pub fn set_leds(&self, cmd: &SetLeds) -> Result<(), ClientError> {
        let frame = self
            .relay
            .codec
            .encode_set_leds(cmd)
            .map_err(ClientError::Encode)?;

        debug!(devices = cmd.leds.len(), len = frame.len(), "Sending setLeds");
        self.transport.send(frame);
        Ok(())
    }

    /// Validate and send an untyped `{"outputs": [...]}` command
    pub fn set_outputs_json(&self, value: Value) -> Result<(), ClientError> {
        let cmd = SetOutputs::from_value(value)?;
        self.set_outputs(&cmd)
    }

    /// Validate and send an untyped `{"leds": [...]}` command
    pub fn set_leds_json(&self, value: Value) -> Result<(), ClientError> {
        let cmd = SetLeds::from_value(value)?;
        self.set_leds(&cmd)
    }

    pub fn subscribe(&self) -> Subscription {
        self.relay.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Stop the transport after flushing queued commands
    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }
}

/// Receives transport callbacks and turns them into client events
struct Relay<C> {
    codec: C,
    hardware_info: RwLock<Option<HardwareInfo>>,
    events: EventBus,
}

impl<C: Codec> Relay<C> {
    fn handle_frame(&self, frame: &[u8]) {
        let message = match self.codec.decode_message_from_driver(frame) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, len = frame.len(), "could not process an incoming IPC message");
                return;
            }
        };

        if let Some(info) = message.hardware_info {
            info!(devices = info.devices.len(), "Driver reported detected hardware");
            *self
                .hardware_info
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(info.clone());
            self.events.emit(ClientEvent::DevicesDetected(info));
        }

        if let Some(states) = message.device_input_states {
            self.events.emit(ClientEvent::DeviceInputStates(states));
        }
    }
}

impl<C: Codec> TransportListener for Relay<C> {
    fn on_connection(&self) {
        self.events.emit(ClientEvent::Connection);
    }

    fn on_close(&self) {
        self.events.emit(ClientEvent::Close);
    }

    fn on_error(&self, error: TransportError) {
        let error = ClientError::Socket { source: error };
        debug!("{}", error);
        self.events.emit(ClientEvent::Error(Arc::new(error)));
    }

    fn on_message(&self, frame: Bytes) {
        self.handle_frame(&frame);
    }
}
