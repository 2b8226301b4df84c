//! UNIX socket transport to the iron-pi driver
//!
//! `UnixTransport` owns a single logical connection to the driver socket and
//! exchanges length-prefixed binary frames over it. Frame contents are opaque
//! at this layer.
//!
//! ## Framing
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | Payload          |
//! +----------------------------+------------------+
//! ```
//!
//! ## Reconnection
//!
//! A background task connects, serves the connection until it drops, then
//! reconnects with exponential backoff (see [`ReconnectPolicy`]). The backoff
//! resets after every successful connection. With `max_retries: None` the task
//! never gives up.
//!
//! ## Lifecycle events
//!
//! Events are delivered synchronously from the connection task to the
//! [`TransportListener`] given at construction:
//!
//! - `on_connection` when the socket is established
//! - `on_close` when an established socket is lost
//! - `on_error` for every connect, read or write failure (non-fatal), and
//!   for frames rejected by `send`
//! - `on_message` once per inbound frame

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use iron_pi_config::{ReconnectPolicy, SendPolicy, SendQueueConfig, MAX_SEND_QUEUE_CAPACITY};
use tokio::net::UnixStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Largest frame accepted in either direction (1 MiB)
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Build the codec that delimits frames on the socket
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Connection state of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }
}

/// Receiver of transport lifecycle events
pub trait TransportListener: Send + Sync + 'static {
    fn on_connection(&self) {}

    fn on_close(&self) {}

    fn on_error(&self, error: TransportError);

    fn on_message(&self, frame: Bytes);
}

/// Outbound side of a transport, as seen by the device client
///
/// None of these methods report errors to the caller; failures go to the
/// transport's listener.
pub trait FrameSink: Send + Sync {
    /// Begin connecting. Idempotent and non-blocking.
    ///
    /// A transport that gave up after exhausting its retries starts over;
    /// one that was shut down stays stopped.
    fn start(&self);

    /// Enqueue one frame for transmission
    fn send(&self, frame: Bytes);

    fn state(&self) -> ConnectionState;

    /// Stop the transport, flushing frames that are already queued
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

/// Reconnection and queueing behaviour of a [`UnixTransport`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    pub reconnect: ReconnectPolicy,
    pub send_queue: SendQueueConfig,
}

/// State shared between the transport handle and its connection task
struct Shared {
    socket_path: PathBuf,
    options: TransportOptions,
    listener: Arc<dyn TransportListener>,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// Persistent connection to the driver's UNIX socket
pub struct UnixTransport {
    shared: Arc<Shared>,
    outbound_tx: mpsc::Sender<Bytes>,
    /// Taken by the first `start()`
    outbound_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    /// Hands the queue back when the connection task ends
    task: Mutex<Option<JoinHandle<mpsc::Receiver<Bytes>>>>,
}

impl std::fmt::Debug for UnixTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixTransport")
            .field("socket_path", &self.shared.socket_path)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl UnixTransport {
    /// Create a transport for `socket_path`. Nothing connects until `start()`.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        options: TransportOptions,
        listener: Arc<dyn TransportListener>,
    ) -> Self {
        let capacity = options
            .send_queue
            .capacity
            .clamp(1, MAX_SEND_QUEUE_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        Self {
            shared: Arc::new(Shared {
                socket_path: socket_path.into(),
                options,
                listener,
                state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
                cancel: CancellationToken::new(),
            }),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            task: Mutex::new(None),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.shared.socket_path
    }
}

impl FrameSink for UnixTransport {
    fn start(&self) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("Driver transport started outside of a tokio runtime");
                self.shared.listener.on_error(TransportError::NoRuntime);
                return;
            }
        };

        if self.shared.cancel.is_cancelled() {
            debug!("Driver transport was shut down, not starting");
            return;
        }

        let mut task = lock(&self.task);
        let outbound = match lock(&self.outbound_rx).take() {
            Some(outbound) => outbound,
            None => match task.as_mut().and_then(|t| FutureExt::now_or_never(t)) {
                Some(Ok(outbound)) => {
                    info!("Restarting driver transport after it gave up");
                    outbound
                }
                Some(Err(e)) => {
                    warn!("Driver transport task ended abnormally: {}", e);
                    *task = None;
                    return;
                }
                None => {
                    debug!("Driver transport already started");
                    return;
                }
            },
        };

        self.shared.set_state(ConnectionState::Connecting);
        *task = Some(runtime.spawn(run_connection(Arc::clone(&self.shared), outbound)));
    }

    fn send(&self, frame: Bytes) {
        let queue = &self.shared.options.send_queue;

        if frame.len() > MAX_FRAME_LENGTH {
            warn!(
                len = frame.len(),
                max = MAX_FRAME_LENGTH,
                "Frame exceeds maximum length, dropping frame"
            );
            self.shared.listener.on_error(TransportError::FrameTooLarge {
                len: frame.len(),
                max: MAX_FRAME_LENGTH,
            });
            return;
        }

        if queue.policy == SendPolicy::Drop && self.shared.state() != ConnectionState::Connected {
            debug!(len = frame.len(), "Driver not connected, dropping frame");
            return;
        }

        match self.outbound_tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                warn!(
                    len = frame.len(),
                    capacity = queue.capacity,
                    "Outbound queue full, dropping frame"
                );
                self.shared.listener.on_error(TransportError::QueueFull {
                    capacity: queue.capacity,
                });
            }
            Err(TrySendError::Closed(frame)) => {
                debug!(len = frame.len(), "Driver transport stopped, dropping frame");
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        async move {
            self.shared.cancel.cancel();

            let task = lock(&self.task).take();
            if let Some(task) = task {
                if let Err(e) = task.await.map(drop) {
                    warn!("Driver transport task ended abnormally: {}", e);
                }
            }
        }
        .boxed()
    }
}

impl Drop for UnixTransport {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a served connection ended
enum Outcome {
    /// Shutdown was requested or the transport was dropped
    Stopped,
    /// The socket closed or failed; reconnect
    Lost,
}

/// Connection loop: connect, serve, back off, repeat
async fn run_connection(
    shared: Arc<Shared>,
    mut outbound: mpsc::Receiver<Bytes>,
) -> mpsc::Receiver<Bytes> {
    let policy = &shared.options.reconnect;
    let mut delay = policy.initial_delay();
    let mut failures: u32 = 0;

    loop {
        shared.set_state(ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            result = UnixStream::connect(&shared.socket_path) => result,
        };

        match connected {
            Ok(stream) => {
                failures = 0;
                delay = policy.initial_delay();

                shared.set_state(ConnectionState::Connected);
                info!(
                    path = %shared.socket_path.display(),
                    "Connected to driver socket"
                );
                shared.listener.on_connection();

                let outcome = serve(&shared, stream, &mut outbound).await;

                shared.set_state(ConnectionState::Disconnected);
                shared.listener.on_close();

                match outcome {
                    Outcome::Stopped => break,
                    Outcome::Lost => {
                        if shared.options.send_queue.policy == SendPolicy::Drop {
                            discard_pending(&mut outbound);
                        }
                        warn!("Driver socket connection lost. Attempting to reconnect...");
                    }
                }
            }
            Err(source) => {
                failures += 1;
                shared.set_state(ConnectionState::Disconnected);

                warn!(
                    attempt = failures,
                    max_retries = ?policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %source,
                    "Driver socket connection failed, retrying..."
                );
                shared.listener.on_error(TransportError::ConnectionFailed {
                    path: shared.socket_path.clone(),
                    source,
                });

                if let Some(max_retries) = policy.max_retries {
                    if failures > max_retries {
                        warn!(
                            attempts = failures,
                            "Failed to connect to driver socket after all retry attempts"
                        );
                        shared
                            .listener
                            .on_error(TransportError::MaxRetriesExceeded { attempts: failures });
                        break;
                    }
                }
            }
        }

        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }
        delay = policy.next_delay(delay);
    }

    shared.set_state(ConnectionState::Disconnected);
    debug!("Driver transport task stopped");
    outbound
}

/// Pump frames in both directions until the connection ends
async fn serve(
    shared: &Shared,
    stream: UnixStream,
    outbound: &mut mpsc::Receiver<Bytes>,
) -> Outcome {
    let mut framed = Framed::new(stream, frame_codec());

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                flush_pending(&mut framed, outbound).await;
                return Outcome::Stopped;
            }
            inbound = framed.next() => match inbound {
                Some(Ok(frame)) => {
                    debug!(len = frame.len(), "Received frame from driver");
                    shared.listener.on_message(frame.freeze());
                }
                Some(Err(e)) => {
                    warn!("Failed to read from driver socket: {}", e);
                    shared.listener.on_error(TransportError::ReceiveFailed(e));
                    return Outcome::Lost;
                }
                None => {
                    debug!("Driver closed the socket (EOF)");
                    return Outcome::Lost;
                }
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let len = frame.len();
                    if let Err(e) = framed.send(frame).await {
                        warn!("Failed to write to driver socket: {}", e);
                        shared.listener.on_error(TransportError::SendFailed(e));
                        return Outcome::Lost;
                    }
                    debug!(len, "Sent frame to driver");
                }
                // Every sender is gone: the transport handle was dropped
                None => return Outcome::Stopped,
            },
        }
    }
}

async fn flush_pending(
    framed: &mut Framed<UnixStream, LengthDelimitedCodec>,
    outbound: &mut mpsc::Receiver<Bytes>,
) {
    let mut flushed = 0usize;

    while let Ok(frame) = outbound.try_recv() {
        if let Err(e) = framed.feed(frame).await {
            warn!("Failed to flush frame to driver socket: {}", e);
            return;
        }
        flushed += 1;
    }

    if let Err(e) = SinkExt::<Bytes>::flush(framed).await {
        warn!("Failed to flush driver socket: {}", e);
        return;
    }

    if flushed > 0 {
        debug!(flushed, "Flushed queued frames before shutdown");
    }
}

fn discard_pending(outbound: &mut mpsc::Receiver<Bytes>) {
    let mut dropped = 0usize;
    while outbound.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!(dropped, "Discarded frames queued before the connection was lost");
    }
}
