//! Configuration data model

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Default UNIX socket path the iron-pi driver listens on
pub const UNIX_SOCKET_PATH: &str = "/tmp/socket-iron-pi";

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Largest accepted `event-buffer`
pub const MAX_EVENT_BUFFER: usize = 1 << 16;

/// Default number of outbound frames held while the socket is busy or down
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 64;

/// Largest accepted send-queue `capacity`
pub const MAX_SEND_QUEUE_CAPACITY: usize = 1 << 20;

/// Initial delay between reconnection attempts (500ms)
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

/// Maximum delay between reconnection attempts (10 seconds)
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize)]
pub struct Config {
    pub log_level: LogLevel,
    pub client: ClientConfig,
}

/// Settings consumed by the device client and its transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientConfig {
    /// Override of [`UNIX_SOCKET_PATH`]. `None` or an empty path means the default.
    pub socket_path: Option<PathBuf>,
    /// Capacity of the event broadcast buffer
    pub event_buffer: usize,
    pub reconnect: ReconnectPolicy,
    pub send_queue: SendQueueConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            reconnect: ReconnectPolicy::default(),
            send_queue: SendQueueConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at a specific socket
    pub fn with_socket_path(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// The socket path to connect to, falling back to [`UNIX_SOCKET_PATH`]
    pub fn resolved_socket_path(&self) -> PathBuf {
        match &self.socket_path {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => PathBuf::from(UNIX_SOCKET_PATH),
        }
    }
}

/// Exponential backoff applied when the driver socket is unavailable
///
/// The delay starts at `initial_delay_ms`, doubles after every failed attempt
/// and is capped at `max_delay_ms`. It resets once a connection succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failed attempts tolerated before giving up.
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay to wait after `current`, doubled and capped
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay())
    }
}

/// What happens to frames sent while the driver is not connected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendPolicy {
    /// Hold frames until the next connection, up to the queue capacity
    #[default]
    Queue,
    /// Discard frames while disconnected
    Drop,
}

impl std::str::FromStr for SendPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "drop" => Ok(Self::Drop),
            _ => Err(format!("Unknown send-queue policy: {} (expected \"queue\" or \"drop\")", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SendQueueConfig {
    pub policy: SendPolicy,
    pub capacity: usize,
}

impl Default for SendQueueConfig {
    fn default() -> Self {
        Self {
            policy: SendPolicy::Queue,
            capacity: DEFAULT_SEND_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}
