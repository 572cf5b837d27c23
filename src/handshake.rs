//! The upgrade exchange: `connect_async` dials out as the initiator, `accept_async`
//! takes over an already-accepted `TcpStream` as the responder. Both negotiate the two
//! non-standard extensions and hand back a `Connection` whose reader task is already
//! running.

use crate::config::{ConnectionConfig, DialConfig, ServerTlsConfig};
use crate::connection::{Connection, Negotiated, Role};
use crate::error::Error;
use crate::extensions::{
    format_extensions_header, merge_extensions, parse_extensions, parse_max_streams_header, requested_extension,
    MAX_STREAMS_HEADER,
};
use crate::request::{build_error_response, build_switching_protocols_response, build_upgrade_request, parse_request, parse_response, ParsedHeaders};
use crate::transport::Transport;
use crate::utils::{accept_digest, generate_challenge_key};
use log::debug;
use pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;

/// Reads from `transport` until a full textual HTTP message is available, bounded by
/// `MAX_HANDSHAKE_BYTES` so a peer that never sends a blank-line terminator can't pin
/// an unbounded buffer.
async fn read_http_message<T>(transport: &mut T) -> Result<Vec<u8>, Error>
where
    T: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(buffer);
        }
        if buffer.len() >= MAX_HANDSHAKE_BYTES {
            return Err(Error::MalformedHandshake);
        }
        let n = transport.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::MalformedHandshake);
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Dials `ws_url` with default connection options.
pub async fn connect_async(ws_url: &str) -> Result<Connection, Error> {
    connect_async_with_config(ws_url, DialConfig::default()).await
}

/// Dials `ws_url` as the initiator, upgrading to WebSocket and negotiating whichever
/// extensions `config` enables. Returns once the reader task is confirmed running.
pub async fn connect_async_with_config(ws_url: &str, dial: DialConfig) -> Result<Connection, Error> {
    let target = crate::request::parse_dial_url(ws_url)?;
    if dial.tls.use_tls != target.use_tls {
        return Err(Error::SchemeAgainstTlsConfig(dial.tls.use_tls, ws_url.to_string()));
    }
    let connection_config = dial.connection.clone().normalize()?;

    let tcp = TcpStream::connect(&target.host_with_port).await?;
    let mut transport = if target.use_tls {
        let tls_config = match &dial.tls.rustls_config {
            Some(cfg) => Arc::clone(cfg),
            None => Arc::new(default_client_tls_config()),
        };
        let connector = tokio_rustls::TlsConnector::from(tls_config);
        let host_only = target.host_header.rsplit_once(':').map(|(h, _)| h).unwrap_or(&target.host_header);
        let server_name = ServerName::try_from(host_only.to_string()).map_err(|_| Error::UrlNoHost)?;
        let stream = connector.connect(server_name, tcp).await?;
        Transport::RustlsClient(Box::new(stream))
    } else {
        Transport::Plain(tcp)
    };

    let challenge_key = generate_challenge_key();
    let request = build_upgrade_request(&target, &challenge_key, &dial);
    transport.write_all(request.as_bytes()).await?;
    transport.flush().await?;

    let raw_response = read_http_message(&mut transport).await?;
    let response = parse_response(&raw_response)?;

    if response.status_code != Some(101) {
        return Err(Error::NoUpgrade);
    }
    if !header_contains(&response, "connection", "upgrade") {
        return Err(Error::NoConnectionUpgradeHeader);
    }
    if !header_contains(&response, "upgrade", "websocket") {
        return Err(Error::NoUpgradeWebsocketHeader);
    }
    let expected_digest = accept_digest(&challenge_key, connection_config.magic_key.as_deref());
    if response.header("sec-websocket-accept") != Some(expected_digest.as_str()) {
        return Err(Error::AcceptKeyMismatch);
    }

    let negotiated = negotiate_from_response(&response, &connection_config);
    debug!("initiator handshake to {} completed, negotiated={:?}", ws_url, negotiated);

    let (connection, read_half) = Connection::new(Role::Initiator, transport, connection_config, negotiated);
    let reader = connection.clone();
    tokio::spawn(async move {
        let _ = reader.start(read_half).await;
    });
    connection.wait_ready().await;
    Ok(connection)
}

fn header_contains(parsed: &ParsedHeaders, name: &str, token: &str) -> bool {
    parsed
        .header(name)
        .map(|value| value.to_lowercase().split(',').any(|part| part.trim() == token))
        .unwrap_or(false)
}

fn negotiate_from_response(response: &ParsedHeaders, config: &ConnectionConfig) -> Negotiated {
    let theirs = response.header("sec-websocket-extensions").and_then(parse_extensions);
    let ours = requested_extension(config.enable_compress);
    let merged = merge_extensions(ours.as_ref(), theirs.as_ref());

    let their_max_streams = response.header(MAX_STREAMS_HEADER).and_then(parse_max_streams_header);
    let streams = config.enable_streams && their_max_streams.is_some();
    let max_streams = their_max_streams.unwrap_or(0).min(config.max_streams.max(1));

    Negotiated {
        compress: merged.is_some(),
        compress_level: config.compress_level,
        streams,
        max_streams,
    }
}

fn default_client_tls_config() -> rustls::ClientConfig {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// Takes over an already-accepted `TcpStream` as the responder with default options.
/// The caller is responsible for `TcpListener::accept`; this crate never binds a
/// listener itself.
pub async fn accept_async(stream: TcpStream) -> Result<Connection, Error> {
    accept_async_with_config(stream, ConnectionConfig::default(), None).await
}

/// Takes over `stream` as the responder, optionally terminating TLS with
/// `tls_config` before the HTTP upgrade exchange.
pub async fn accept_async_with_config(
    stream: TcpStream,
    config: ConnectionConfig,
    tls_config: Option<ServerTlsConfig>,
) -> Result<Connection, Error> {
    let mut transport = match tls_config.and_then(|tls| tls.rustls_config) {
        Some(rustls_config) => {
            let acceptor = tokio_rustls::TlsAcceptor::from(rustls_config);
            let stream = acceptor.accept(stream).await?;
            Transport::RustlsServer(Box::new(stream))
        }
        None => Transport::Plain(stream),
    };

    let config = match config.normalize() {
        Ok(config) => config,
        Err(e) => {
            let response = build_error_response(500, "Internal Server Error", "invalid connection configuration");
            let _ = transport.write_all(response.as_bytes()).await;
            let _ = transport.flush().await;
            return Err(e);
        }
    };

    let raw_request = read_http_message(&mut transport).await?;
    let request = parse_request(&raw_request)?;

    if let Err(e) = validate_upgrade_request(&request, &config) {
        let (status, reason, body) = reject_reason(&e);
        let response = build_error_response(status, reason, body);
        let _ = transport.write_all(response.as_bytes()).await;
        let _ = transport.flush().await;
        return Err(e);
    }

    let challenge_key = request.header("sec-websocket-key").unwrap_or_default().to_string();
    let accept = accept_digest(&challenge_key, config.magic_key.as_deref());

    let (negotiated, extensions_header, max_streams_offer) = negotiate_from_request(&request, &config);
    let response = build_switching_protocols_response(&accept, extensions_header.as_deref(), max_streams_offer);
    transport.write_all(response.as_bytes()).await?;
    transport.flush().await?;

    let (connection, read_half) = Connection::new(Role::Responder, transport, config, negotiated);
    let reader = connection.clone();
    tokio::spawn(async move {
        let _ = reader.start(read_half).await;
    });
    connection.wait_ready().await;
    Ok(connection)
}

fn validate_upgrade_request(request: &ParsedHeaders, config: &ConnectionConfig) -> Result<(), Error> {
    if request.method.as_deref() != Some("GET") {
        return Err(Error::MethodNotGet);
    }
    if request.version < 1 {
        return Err(Error::HttpVersionTooLow);
    }
    if !header_contains(request, "connection", "upgrade") {
        return Err(Error::NoConnectionUpgradeHeader);
    }
    if !header_contains(request, "upgrade", "websocket") {
        return Err(Error::NoUpgradeWebsocketHeader);
    }
    let version: u32 = request.header("sec-websocket-version").and_then(|v| v.parse().ok()).unwrap_or(0);
    if version < 13 {
        return Err(Error::WebsocketVersionTooLow);
    }
    let key = request.header("sec-websocket-key").unwrap_or("");
    if key.len() < 24 {
        return Err(Error::InvalidWebsocketKey);
    }
    if let Some(verify) = &config.header_verify {
        let headers: Vec<(String, String)> = request.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if !verify(&headers) {
            return Err(Error::HeaderVerifyRejected);
        }
    }
    Ok(())
}

fn reject_reason(error: &Error) -> (u16, &'static str, &'static str) {
    match error {
        Error::MethodNotGet => (405, "Method Not Allowed", "method must be GET"),
        Error::HttpVersionTooLow => (400, "Bad Request", "HTTP/1.1 or higher required"),
        Error::NoConnectionUpgradeHeader => (426, "Upgrade Required", "Connection: Upgrade header required"),
        Error::NoUpgradeWebsocketHeader => (400, "Bad Request", "Upgrade: websocket header required"),
        Error::WebsocketVersionTooLow => (400, "Bad Request", "Sec-WebSocket-Version must be 13 or higher"),
        Error::InvalidWebsocketKey => (400, "Bad Request", "Sec-WebSocket-Key missing or too short"),
        Error::HeaderVerifyRejected => (401, "Unauthorized", "rejected by header verifier"),
        _ => (400, "Bad Request", "malformed handshake"),
    }
}

fn negotiate_from_request(
    request: &ParsedHeaders,
    config: &ConnectionConfig,
) -> (Negotiated, Option<String>, Option<u16>) {
    let theirs = request.header("sec-websocket-extensions").and_then(parse_extensions);
    let ours = requested_extension(config.enable_compress);
    let merged = merge_extensions(ours.as_ref(), theirs.as_ref());
    let extensions_header = merged.as_ref().and_then(format_extensions_header);

    let their_max_streams = request.header(MAX_STREAMS_HEADER).and_then(parse_max_streams_header);
    let streams = config.enable_streams && their_max_streams.is_some();
    let max_streams = their_max_streams.unwrap_or(0).min(config.max_streams.max(1));
    let max_streams_offer = if streams { Some(max_streams) } else { None };

    (
        Negotiated {
            compress: merged.is_some(),
            compress_level: config.compress_level,
            streams,
            max_streams,
        },
        extensions_header,
        max_streams_offer,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    #[test]
    fn negotiate_from_response_requires_their_max_streams_header() {
        let mut config = ConnectionConfig::default();
        config.enable_streams = true;
        config.max_streams = 32;
        let response = parse_response(b"HTTP/1.1 101 Switching Protocols\r\n\r\n").unwrap();
        let negotiated = negotiate_from_response(&response, &config);
        assert!(!negotiated.streams);
    }

    #[test]
    fn negotiate_from_response_caps_max_streams_to_our_offer() {
        let mut config = ConnectionConfig::default();
        config.enable_streams = true;
        config.max_streams = 4;
        let raw = b"HTTP/1.1 101 Switching Protocols\r\nWebson-Max-Streams: 999\r\n\r\n";
        let response = parse_response(raw).unwrap();
        let negotiated = negotiate_from_response(&response, &config);
        assert!(negotiated.streams);
        assert_eq!(negotiated.max_streams, 4);
    }

    #[test]
    fn validate_upgrade_request_rejects_missing_upgrade_header() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let request = parse_request(raw).unwrap();
        let config = ConnectionConfig::default();
        assert!(matches!(
            validate_upgrade_request(&request, &config),
            Err(Error::NoUpgradeWebsocketHeader)
        ));
    }

    #[test]
    fn validate_upgrade_request_accepts_well_formed_request() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let request = parse_request(raw).unwrap();
        let config = ConnectionConfig::default();
        assert!(validate_upgrade_request(&request, &config).is_ok());
    }
}
