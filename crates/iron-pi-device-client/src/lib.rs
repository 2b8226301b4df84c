//! Client for the iron-pi hardware driver
//!
//! The driver process owns the I/O hardware and listens on a local UNIX
//! socket (`/tmp/socket-iron-pi` by default). This crate connects to it, sends
//! output and LED commands, and publishes the driver's notifications as typed
//! events.
//!
//! ## Layers
//!
//! - [`transport`]: persistent socket connection with reconnection and
//!   length-prefixed framing
//! - [`codec`]: translation between typed messages and frame payloads
//! - [`client`]: validation, hardware-info cache and event fan-out
//!
//! ## Example
//!
//! ```no_run
//! use iron_pi_device_client::{ClientConfig, DeviceClient, DeviceOutputState, SetOutputs};
//!
//! # async fn example() -> Result<(), iron_pi_device_client::ClientError> {
//! let client = DeviceClient::new(ClientConfig::default());
//! client.start();
//!
//! client.set_outputs(&SetOutputs {
//!     outputs: vec![DeviceOutputState { address: 1, levels: vec![true, false] }],
//! })?;
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use client::DeviceClient;
pub use codec::{Codec, DriverCodec};
pub use error::{ClientError, CodecError, TransportError};
pub use events::{ClientEvent, EventKind, Subscription};
pub use iron_pi_config::{ClientConfig, ReconnectPolicy, SendPolicy, SendQueueConfig, UNIX_SOCKET_PATH};
pub use transport::{ConnectionState, FrameSink, TransportListener, TransportOptions, UnixTransport};
pub use types::*;
