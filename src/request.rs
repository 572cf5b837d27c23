//! Textual HTTP construction/parsing for the upgrade exchange. URL grammar is a pure
//! function over `url::Url` so it round-trips without I/O, and header parsing goes
//! through `httparse`, generalized to also carry the two non-standard extension
//! headers this crate negotiates.

use crate::config::DialConfig;
use crate::error::Error;
use crate::extensions::{format_extensions_header, format_max_streams_header, requested_extension, MAX_STREAMS_HEADER};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use httparse::Status;
use std::collections::HashMap;
use url::Url;

/// Everything extracted from a `ws://`/`wss://` URL needed to dial.
pub(crate) struct DialTarget {
    pub host_with_port: String,
    pub host_header: String,
    pub path_and_query: String,
    pub use_tls: bool,
    pub basic_auth: Option<(String, String)>,
}

pub(crate) fn parse_dial_url(ws_url: &str) -> Result<DialTarget, Error> {
    let parsed = Url::parse(ws_url)?;

    let (default_port, use_tls) = match parsed.scheme() {
        "ws" => (80, false),
        "wss" => (443, true),
        _ => return Err(Error::InvalidSchemeUrl),
    };

    let host = parsed.host_str().ok_or(Error::UrlNoHost)?;
    let port = parsed.port().unwrap_or(default_port);
    let host_with_port = format!("{}:{}", host, port);
    let host_header = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let path_and_query = match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    };
    if path_and_query.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(Error::UrlInvalidPath);
    }

    let basic_auth = if !parsed.username().is_empty() {
        Some((parsed.username().to_string(), parsed.password().unwrap_or("").to_string()))
    } else {
        None
    };

    Ok(DialTarget {
        host_with_port,
        host_header,
        path_and_query,
        use_tls,
        basic_auth,
    })
}

/// Builds the initiator's `GET ... HTTP/1.1` upgrade request.
pub(crate) fn build_upgrade_request(target: &DialTarget, challenge_key: &str, dial: &DialConfig) -> String {
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\nSec-WebSocket-Key: {}\r\n",
        target.path_and_query, target.host_header, challenge_key,
    );

    if let Some((user, pass)) = &target.basic_auth {
        let credentials = BASE64_STANDARD.encode(format!("{}:{}", user, pass));
        request.push_str(&format!("Authorization: Basic {}\r\n", credentials));
    }

    if let Some(extensions) = requested_extension(dial.connection.enable_compress) {
        if let Some(value) = format_extensions_header(&extensions) {
            request.push_str(&format!("Sec-WebSocket-Extensions: {}\r\n", value));
        }
    }
    if dial.connection.enable_streams {
        request.push_str(&format!(
            "{}: {}\r\n",
            MAX_STREAMS_HEADER,
            format_max_streams_header(dial.connection.max_streams)
        ));
    }
    for (key, value) in &dial.extra_headers {
        request.push_str(&format!("{}: {}\r\n", key, value));
    }
    request.push_str("\r\n");
    request
}

/// A parsed textual HTTP message: the status/request line plus lower-cased headers.
pub(crate) struct ParsedHeaders {
    pub status_code: Option<u16>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub version: u8,
    pub headers: HashMap<String, String>,
}

impl ParsedHeaders {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Parses the initiator's view of the responder's `101 Switching Protocols` response.
pub(crate) fn parse_response(buffer: &[u8]) -> Result<ParsedHeaders, Error> {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut response = httparse::Response::new(&mut header_storage);
    match response.parse(buffer)? {
        Status::Complete(_) => {}
        Status::Partial => return Err(Error::IncompleteHttpMessage),
    }

    let headers = collect_headers(response.headers);
    Ok(ParsedHeaders {
        status_code: response.code,
        method: None,
        path: None,
        version: response.version.unwrap_or(0),
        headers,
    })
}

/// Parses the responder's view of the initiator's `GET ... HTTP/1.1` upgrade request.
pub(crate) fn parse_request(buffer: &[u8]) -> Result<ParsedHeaders, Error> {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut request = httparse::Request::new(&mut header_storage);
    match request.parse(buffer)? {
        Status::Complete(_) => {}
        Status::Partial => return Err(Error::IncompleteHttpMessage),
    }

    let headers = collect_headers(request.headers);
    Ok(ParsedHeaders {
        status_code: None,
        method: request.method.map(str::to_string),
        path: request.path.map(str::to_string),
        version: request.version.unwrap_or(0),
        headers,
    })
}

fn collect_headers(raw: &[httparse::Header]) -> HashMap<String, String> {
    raw.iter()
        .map(|h| (h.name.to_lowercase(), String::from_utf8_lossy(h.value).into_owned()))
        .collect()
}

/// Renders a `101 Switching Protocols` response with the accept digest and whatever
/// extensions were actually negotiated.
pub(crate) fn build_switching_protocols_response(
    accept_digest: &str,
    negotiated_extensions_header: Option<&str>,
    negotiated_max_streams: Option<u16>,
) -> String {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n",
        accept_digest
    );
    if let Some(value) = negotiated_extensions_header {
        response.push_str(&format!("Sec-WebSocket-Extensions: {}\r\n", value));
    }
    if let Some(max_streams) = negotiated_max_streams {
        response.push_str(&format!("{}: {}\r\n", MAX_STREAMS_HEADER, format_max_streams_header(max_streams)));
    }
    response.push_str("\r\n");
    response
}

/// Renders a plain-text HTTP error response for a rejected upgrade.
pub(crate) fn build_error_response(status_code: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_code,
        reason,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    #[test]
    fn parse_dial_url_splits_host_port_and_path() {
        let target = parse_dial_url("ws://example.com:9001/chat?room=1").unwrap();
        assert_eq!(target.host_with_port, "example.com:9001");
        assert_eq!(target.path_and_query, "/chat?room=1");
        assert!(!target.use_tls);
    }

    #[test]
    fn parse_dial_url_defaults_port_by_scheme() {
        let plain = parse_dial_url("ws://example.com/").unwrap();
        assert_eq!(plain.host_with_port, "example.com:80");
        let secure = parse_dial_url("wss://example.com/").unwrap();
        assert_eq!(secure.host_with_port, "example.com:443");
        assert!(secure.use_tls);
    }

    #[test]
    fn parse_dial_url_rejects_non_ws_scheme() {
        assert!(matches!(parse_dial_url("http://example.com"), Err(Error::InvalidSchemeUrl)));
    }

    #[test]
    fn parse_dial_url_extracts_basic_auth() {
        let target = parse_dial_url("ws://user:pass@example.com/").unwrap();
        assert_eq!(target.basic_auth, Some(("user".to_string(), "pass".to_string())));
    }

    #[test]
    fn build_upgrade_request_includes_key_and_extensions() {
        let target = parse_dial_url("ws://example.com/chat").unwrap();
        let mut dial = DialConfig::default();
        dial.connection = ConnectionConfig {
            enable_compress: true,
            enable_streams: true,
            max_streams: 8,
            ..ConnectionConfig::default()
        };
        let request = build_upgrade_request(&target, "dGhlIHNhbXBsZSBub25jZQ==", &dial);
        assert!(request.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n"));
        assert!(request.contains("Sec-WebSocket-Extensions: permessage-deflate"));
        assert!(request.contains("Webson-Max-Streams: 8\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn parse_request_reads_method_path_and_headers() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: example.com\r\nSec-WebSocket-Key: abc\r\n\r\n";
        let parsed = parse_request(raw).unwrap();
        assert_eq!(parsed.method.as_deref(), Some("GET"));
        assert_eq!(parsed.path.as_deref(), Some("/chat"));
        assert_eq!(parsed.header("sec-websocket-key"), Some("abc"));
    }

    #[test]
    fn parse_response_reads_status_code() {
        let raw = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.status_code, Some(101));
        assert_eq!(parsed.header("upgrade"), Some("websocket"));
    }
}
