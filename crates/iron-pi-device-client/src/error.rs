//! Error types for the device client, its transport and its codec

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned to callers of [`DeviceClient`](crate::DeviceClient) or
/// delivered through the `Error` event
#[derive(Debug, Error)]
pub enum ClientError {
    /// A command payload does not have the required shape.
    /// Raised before anything is encoded or sent.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// The codec could not encode an outbound command
    #[error("Failed to encode command: {0}")]
    Encode(#[source] CodecError),

    /// The connection to the driver failed. Only ever delivered as an event.
    #[error("IronPiDeviceClient socket error: {source}")]
    Socket {
        #[source]
        source: TransportError,
    },
}

/// Errors raised by the transport connection
///
/// These never surface from `start()` or `send()`; they are handed to the
/// transport's listener and the connection keeps trying to recover.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to connect to the driver socket
    #[error("Failed to connect to driver socket at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a frame to the socket
    #[error("Failed to send frame to driver: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Failed to read a frame from the socket
    #[error("Failed to receive frame from driver: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The outbound queue is full and the frame was dropped
    #[error("Outbound queue full ({capacity} frames), dropping frame")]
    QueueFull { capacity: usize },

    /// A frame is longer than the framing allows; it was not sent
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// Reconnection attempts are exhausted; the transport has stopped
    #[error("Failed to connect to driver after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    /// `start()` was called outside of a tokio runtime
    #[error("Transport must be started from within a tokio runtime")]
    NoRuntime,
}

/// Errors raised by a [`Codec`](crate::Codec)
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to serialize an outbound message
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// An inbound frame is malformed
    #[error("Failed to decode message from driver: {0}")]
    Decode(#[source] serde_json::Error),

    /// An inbound frame carries no payload
    #[error("Received an empty frame")]
    EmptyFrame,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_socket_error_preserves_cause() {
        let err = ClientError::Socket {
            source: TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pipe closed",
            )),
        };

        let message = err.to_string();
        assert!(message.starts_with("IronPiDeviceClient socket error"), "{}", message);
        assert!(message.contains("pipe closed"), "{}", message);

        let cause = err.source().expect("socket error should carry a source");
        assert!(cause.downcast_ref::<TransportError>().is_some());
    }

    #[test]
    fn test_connection_failed_includes_path() {
        let err = TransportError::ConnectionFailed {
            path: PathBuf::from("/tmp/socket-iron-pi"),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().contains("/tmp/socket-iron-pi"));
    }
}
