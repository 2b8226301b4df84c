//! Encoding of driver messages
//!
//! The client never looks inside a frame. It hands outbound commands to a
//! [`Codec`] and passes the resulting bytes to the transport, and hands every
//! inbound frame back to the codec for decoding.
//!
//! [`DriverCodec`] is the stock implementation: one JSON document per frame.
//! Commands are tagged with a `type` field:
//!
//! - `{"type": "setOutputs", "outputs": [...]}`
//! - `{"type": "setLeds", "leds": [...]}`
//!
//! Notifications from the driver are a `MessageFromDriver` object with
//! optional `hardwareInfo` and `deviceInputStates` members.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::error::CodecError;
use crate::types::{MessageFromDriver, SetLeds, SetOutputs};

/// Converts between typed driver messages and frame payloads
///
/// Implementations must be stateless from the client's point of view; the
/// client may call them from the transport task and from caller threads.
pub trait Codec: Send + Sync + 'static {
    fn encode_set_outputs(&self, cmd: &SetOutputs) -> Result<Bytes, CodecError>;

    fn encode_set_leds(&self, cmd: &SetLeds) -> Result<Bytes, CodecError>;

    fn decode_message_from_driver(&self, frame: &[u8]) -> Result<MessageFromDriver, CodecError>;
}

impl<C: Codec + ?Sized> Codec for Arc<C> {
    fn encode_set_outputs(&self, cmd: &SetOutputs) -> Result<Bytes, CodecError> {
        (**self).encode_set_outputs(cmd)
    }

    fn encode_set_leds(&self, cmd: &SetLeds) -> Result<Bytes, CodecError> {
        (**self).encode_set_leds(cmd)
    }

    fn decode_message_from_driver(&self, frame: &[u8]) -> Result<MessageFromDriver, CodecError> {
        (**self).decode_message_from_driver(frame)
    }
}

/// Commands as they appear on the wire
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum MessageToDriver<'a> {
    SetOutputs(&'a SetOutputs),
    SetLeds(&'a SetLeds),
}

/// JSON-per-frame codec
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverCodec;

impl DriverCodec {
    fn encode(message: &MessageToDriver<'_>) -> Result<Bytes, CodecError> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(CodecError::Encode)
    }
}

impl Codec for DriverCodec {
    fn encode_set_outputs(&self, cmd: &SetOutputs) -> Result<Bytes, CodecError> {
        Self::encode(&MessageToDriver::SetOutputs(cmd))
    }

    fn encode_set_leds(&self, cmd: &SetLeds) -> Result<Bytes, CodecError> {
        Self::encode(&MessageToDriver::SetLeds(cmd))
    }

    fn decode_message_from_driver(&self, frame: &[u8]) -> Result<MessageFromDriver, CodecError> {
        if frame.is_empty() {
            return Err(CodecError::EmptyFrame);
        }
        serde_json::from_slice(frame).map_err(CodecError::Decode)
    }
}
