use rustls::ClientConfig as RustlsClientConfig;
use rustls::ServerConfig as RustlsServerConfig;
use std::sync::Arc;

pub(crate) const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;
pub(crate) const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_COMPRESS_LEVEL: u32 = 1;
// 15 bits for the stream id, so a connection can never request more than this many
// concurrently live streams.
pub(crate) const MAX_STREAMS_IN_THEORY: u16 = 1 << 15;
pub(crate) const DEFAULT_MAX_STREAMS: u16 = 1024;
pub(crate) const DEFAULT_RETRY_INTERVAL_SECS: u64 = 5;
pub(crate) const DEFAULT_POOL_WAIT_MILLIS: u64 = 200;

/// Predicate the responder runs over the inbound upgrade request's headers before
/// accepting the handshake.
pub type HeaderVerify = Arc<dyn Fn(&[(String, String)]) -> bool + Send + Sync>;

/// Handshake/pong/close timeouts, all in seconds.
#[derive(Clone, Debug)]
pub struct TimeoutConfig {
    pub handshake: u64,
    pub pong: u64,
    pub close: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            handshake: DEFAULT_TIMEOUT_SECS,
            pong: DEFAULT_TIMEOUT_SECS,
            close: DEFAULT_TIMEOUT_SECS / 2,
        }
    }
}

/// Per-connection options shared by both initiator and responder roles.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Responder-only: reject the handshake unless this predicate passes over the
    /// inbound request headers.
    pub header_verify: Option<HeaderVerify>,

    pub enable_streams: bool,
    /// Capped to `MAX_STREAMS_IN_THEORY` (2^15) during setup.
    pub max_streams: u16,

    pub chunk_size: usize,
    pub buffer_size: usize,
    /// 0 means unlimited.
    pub max_payload_size: usize,

    pub trigger_on_start: bool,
    pub synchronize: bool,

    pub enable_compress: bool,
    /// 0 is normalized to `DEFAULT_COMPRESS_LEVEL` during setup.
    pub compress_level: u32,

    /// Negative disables the heartbeat.
    pub ping_interval: i64,

    pub timeout: TimeoutConfig,

    /// Overrides the default `258EAFA5-...` magic used in the accept-key digest.
    pub magic_key: Option<Vec<u8>>,
    /// Must be a non-zero length multiple of 4 when present.
    pub private_mask: Option<Vec<u8>>,
    pub always_mask: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            header_verify: None,
            enable_streams: false,
            max_streams: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_payload_size: 0,
            trigger_on_start: false,
            synchronize: false,
            enable_compress: false,
            compress_level: 0,
            ping_interval: -1,
            timeout: TimeoutConfig::default(),
            magic_key: None,
            private_mask: None,
            always_mask: false,
        }
    }
}

impl ConnectionConfig {
    /// Normalizes and validates the raw user-supplied config before a dial/take-over
    /// proceeds.
    pub(crate) fn normalize(mut self) -> Result<Self, crate::error::Error> {
        if !self.enable_streams {
            self.max_streams = 0;
        } else if self.max_streams == 0 {
            self.max_streams = DEFAULT_MAX_STREAMS;
        }
        if self.max_streams > MAX_STREAMS_IN_THEORY {
            self.max_streams = MAX_STREAMS_IN_THEORY;
        }
        if let Some(mask) = &self.private_mask {
            if mask.is_empty() || mask.len() % 4 != 0 {
                return Err(crate::error::Error::Compression(
                    "PrivateMask length must be a non-zero multiple of 4".into(),
                ));
            }
        }
        if self.chunk_size < DEFAULT_CHUNK_SIZE {
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.buffer_size < DEFAULT_BUFFER_SIZE {
            self.buffer_size = DEFAULT_BUFFER_SIZE;
        }
        if self.compress_level == 0 {
            self.compress_level = DEFAULT_COMPRESS_LEVEL;
        }
        Ok(self)
    }
}

/// TLS toggle for the initiator side: a transport factory swap, nothing more.
#[derive(Clone, Default)]
pub struct ClientTlsConfig {
    pub use_tls: bool,
    pub rustls_config: Option<Arc<RustlsClientConfig>>,
}

/// TLS toggle for the responder side.
#[derive(Clone, Default)]
pub struct ServerTlsConfig {
    pub rustls_config: Option<Arc<RustlsServerConfig>>,
}

/// Extra per-dial options (URL, basic-auth, extra headers) layered on top of
/// `ConnectionConfig` for the initiator role.
#[derive(Clone, Default)]
pub struct DialConfig {
    pub connection: ConnectionConfig,
    pub tls: ClientTlsConfig,
    pub extra_headers: Vec<(String, String)>,
}

/// Pool-wide options.
#[derive(Clone)]
pub struct PoolConfig {
    pub name: String,
    /// 0 means unlimited.
    pub size: usize,
    pub client_retry: u32,
    pub retry_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            name: String::new(),
            size: 0,
            client_retry: 0,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
        }
    }
}

/// Per-connection pool membership descriptor.
#[derive(Clone, Debug, Default)]
pub struct NodeConfig {
    /// Random name assigned if empty.
    pub name: String,
    pub group: String,
}
