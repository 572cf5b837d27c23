use crate::connection::Status;
use httparse::Error as HttpParseError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

/// The crate's single fallible-operation error type.
#[derive(Error, Debug)]
pub enum Error {
    // -- Transport / plumbing --------------------------------------------------------------
    #[error("{source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("{source}")]
    FromUtf8 {
        #[from]
        source: FromUtf8Error,
    },

    #[error("channel communication error")]
    CommunicationError,

    // -- Write-path signals -----------------------------------------------------------------
    #[error("wrote after the connection was closed")]
    WriteAfterClose,

    #[error("can't write yet, connection status is {0:?}")]
    CantWriteYet(Status),

    // -- Message read-path signals (not faults) -----------------------------------------------
    #[error("message is not yet complete")]
    MsgYetComplete,

    #[error("ReadIter is incompatible with synchronized delivery")]
    ReadIterUnsupportedSynchronized,

    #[error("ReadIter buffer size must be at least 1")]
    ReadIterBufferTooSmall,

    // -- Size limits --------------------------------------------------------------------------
    #[error("message exceeds the configured max payload size")]
    MsgTooLarge,

    // -- Handshake ------------------------------------------------------------------------------
    #[error("malformed handshake response/request")]
    MalformedHandshake,

    #[error("server didn't return 101 Switching Protocols")]
    NoUpgrade,

    #[error("Sec-Websocket-Accept key didn't match the expected digest")]
    AcceptKeyMismatch,

    #[error("request method is not GET")]
    MethodNotGet,

    #[error("HTTP version too low, need HTTP/1.1 or higher")]
    HttpVersionTooLow,

    #[error("Connection: Upgrade header missing or invalid")]
    NoConnectionUpgradeHeader,

    #[error("Upgrade: websocket header missing or invalid")]
    NoUpgradeWebsocketHeader,

    #[error("Sec-Websocket-Version too low, need 13 or higher")]
    WebsocketVersionTooLow,

    #[error("Sec-Websocket-Key missing or shorter than 24 bytes")]
    InvalidWebsocketKey,

    #[error("header verifier rejected the handshake")]
    HeaderVerifyRejected,

    #[error("responder couldn't hijack the underlying transport")]
    HijackFailed,

    // -- Framing errors, all fail the connection --------------------------------------------
    #[error("RSV3 must be zero")]
    Rsv3NotZero,

    #[error("control frame must not be fragmented")]
    ControlFrameFragmented,

    #[error("control frame payload can't exceed 125 bytes")]
    ControlFramePayloadTooLarge,

    #[error("continuation opcode with no fragmented message in progress")]
    InvalidContinuationFrame,

    #[error("a fragmented message is already in progress on this stream")]
    FragmentedInProgress,

    #[error("compression bit set but compression was not negotiated")]
    CompressionNotNegotiated,

    #[error("stream bit set but stream multiplexing was not negotiated")]
    StreamingNotNegotiated,

    #[error("frame from an initiator must be masked")]
    UnmaskedFromInitiator,

    #[error("stream-tagged frame declared a size smaller than the 2-byte stream header")]
    StreamHeaderTooSmall,

    #[error("stream id 0 is reserved and illegal")]
    StreamIdZero,

    #[error("unrecognized opcode: {0}")]
    InvalidOpcode(u8),

    #[error("declared frame size exceeds the configured max payload size")]
    MaxPayloadSize,

    #[error("fragment_size `{0}` can't exceed max_frame_size `{1}`")]
    CustomFragmentSizeExceeded(usize, usize),

    // -- Stream multiplexer --------------------------------------------------------------------
    #[error("all stream ids are in use, none free to allocate")]
    StreamIdsExhausted,

    // -- Compression --------------------------------------------------------------------------
    #[error("compression failure: {0}")]
    Compression(String),

    #[error("max_window_bits should be a value between 8 and 15")]
    InvalidMaxWindowBits,

    // -- URL grammar ----------------------------------------------------------------------------
    #[error("{source}")]
    UrlParse {
        #[from]
        source: ParseError,
    },

    #[error("invalid scheme in WebSocket URL, expected ws:// or wss://")]
    InvalidSchemeUrl,

    #[error("URL has no host")]
    UrlNoHost,

    #[error("URL path contains a control byte (<0x20 or 0x7F)")]
    UrlInvalidPath,

    #[error("use_tls = {0} doesn't match the URL scheme {1}")]
    SchemeAgainstTlsConfig(bool, String),

    // -- HTTP textual parsing ---------------------------------------------------------------------
    #[error("{source}")]
    HttpParse {
        #[from]
        source: HttpParseError,
    },

    #[error("incomplete HTTP request/response")]
    IncompleteHttpMessage,

    // -- Pool -----------------------------------------------------------------------------------
    #[error("a connection named `{0}` is already registered in the pool")]
    DuplicateNodeName(String),

    #[error("pool is at capacity")]
    PoolAtCapacity,

    #[error("pool is closed")]
    PoolClosed,

    #[error("no connection named `{0}` in the pool")]
    NoSuchNode(String),
}
