//! Negotiation of the two non-standard extensions: compression via
//! `Sec-WebSocket-Extensions: permessage-deflate; server_no_context_takeover;
//! client_no_context_takeover`, and stream multiplexing via the custom
//! `Webson-Max-Streams: <N>` request/response header pair. Only the no-context-takeover
//! variant is ever negotiated, since compression here is always per-message with no
//! carried window state.

const PERMESSAGE_DEFLATE: &str = "permessage-deflate";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";

pub(crate) const MAX_STREAMS_HEADER: &str = "Webson-Max-Streams";

/// A parsed `Sec-WebSocket-Extensions` value. Only `permessage-deflate` is understood;
/// any other extension token in the header is ignored rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CompressionExtension {
    pub permessage_deflate: bool,
    pub client_no_context_takeover: bool,
    pub server_no_context_takeover: bool,
    pub client_max_window_bits: Option<u8>,
    pub server_max_window_bits: Option<u8>,
}

pub(crate) fn parse_extensions(header_value: &str) -> Option<CompressionExtension> {
    let mut extensions = CompressionExtension::default();
    for token in header_value.split(';') {
        let token = token.trim();
        if token == PERMESSAGE_DEFLATE {
            extensions.permessage_deflate = true;
        } else if token.starts_with(CLIENT_NO_CONTEXT_TAKEOVER) {
            extensions.client_no_context_takeover = true;
        } else if token.starts_with(SERVER_NO_CONTEXT_TAKEOVER) {
            extensions.server_no_context_takeover = true;
        } else if token.starts_with(CLIENT_MAX_WINDOW_BITS) {
            extensions.client_max_window_bits = parse_window_bits(token);
        } else if token.starts_with(SERVER_MAX_WINDOW_BITS) {
            extensions.server_max_window_bits = parse_window_bits(token);
        }
    }
    if !extensions.permessage_deflate {
        return None;
    }
    Some(extensions)
}

fn parse_window_bits(token: &str) -> Option<u8> {
    if !token.contains('=') {
        return Some(15);
    }
    token.split('=').last()?.trim().parse::<u8>().ok()
}

/// Produces the extension this crate is willing to offer/accept: compression is only
/// ever negotiated with both sides resetting context every message.
pub(crate) fn requested_extension(enable_compress: bool) -> Option<CompressionExtension> {
    if !enable_compress {
        return None;
    }
    Some(CompressionExtension {
        permessage_deflate: true,
        client_no_context_takeover: true,
        server_no_context_takeover: true,
        client_max_window_bits: None,
        server_max_window_bits: None,
    })
}

/// Intersects an offer with what the peer actually sent back. Compression is only
/// considered negotiated when both sides agree on `permessage-deflate` and both
/// no-context-takeover flags end up set — this crate never runs compression with a
/// carried window.
pub(crate) fn merge_extensions(
    ours: Option<&CompressionExtension>,
    theirs: Option<&CompressionExtension>,
) -> Option<CompressionExtension> {
    let ours = ours?;
    let theirs = theirs?;
    if !ours.permessage_deflate || !theirs.permessage_deflate {
        return None;
    }
    if !theirs.client_no_context_takeover || !theirs.server_no_context_takeover {
        return None;
    }
    Some(CompressionExtension {
        permessage_deflate: true,
        client_no_context_takeover: true,
        server_no_context_takeover: true,
        client_max_window_bits: min_option(ours.client_max_window_bits, theirs.client_max_window_bits),
        server_max_window_bits: min_option(ours.server_max_window_bits, theirs.server_max_window_bits),
    })
}

fn min_option(a: Option<u8>, b: Option<u8>) -> Option<u8> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Formats a `Sec-WebSocket-Extensions` header value, or `None` if compression isn't
/// being offered/accepted at all.
pub(crate) fn format_extensions_header(extensions: &CompressionExtension) -> Option<String> {
    if !extensions.permessage_deflate {
        return None;
    }
    let mut value = String::from(PERMESSAGE_DEFLATE);
    if extensions.client_no_context_takeover {
        value.push_str("; ");
        value.push_str(CLIENT_NO_CONTEXT_TAKEOVER);
    }
    if extensions.server_no_context_takeover {
        value.push_str("; ");
        value.push_str(SERVER_NO_CONTEXT_TAKEOVER);
    }
    if let Some(bits) = extensions.client_max_window_bits {
        value.push_str(&format!("; {}={}", CLIENT_MAX_WINDOW_BITS, bits));
    }
    if let Some(bits) = extensions.server_max_window_bits {
        value.push_str(&format!("; {}={}", SERVER_MAX_WINDOW_BITS, bits));
    }
    Some(value)
}

/// Formats the `Webson-Max-Streams` header value an initiator or responder offers.
pub(crate) fn format_max_streams_header(max_streams: u16) -> String {
    max_streams.to_string()
}

/// Parses a received `Webson-Max-Streams` value; a malformed value is treated as
/// "streaming not offered" rather than a hard failure, matching how an unrecognized
/// `Sec-WebSocket-Extensions` token is ignored rather than rejected.
pub(crate) fn parse_max_streams_header(header_value: &str) -> Option<u16> {
    header_value.trim().parse::<u16>().ok().filter(|&n| n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_permessage_deflate() {
        let extensions = parse_extensions(PERMESSAGE_DEFLATE).unwrap();
        assert!(extensions.permessage_deflate);
        assert!(!extensions.client_no_context_takeover);
        assert!(!extensions.server_no_context_takeover);
    }

    #[test]
    fn parses_full_no_context_takeover_offer() {
        let header = "permessage-deflate; server_no_context_takeover; client_no_context_takeover";
        let extensions = parse_extensions(header).unwrap();
        assert!(extensions.permessage_deflate);
        assert!(extensions.client_no_context_takeover);
        assert!(extensions.server_no_context_takeover);
    }

    #[test]
    fn parses_window_bits_with_and_without_value() {
        let header = "permessage-deflate; client_max_window_bits; server_max_window_bits=10";
        let extensions = parse_extensions(header).unwrap();
        assert_eq!(extensions.client_max_window_bits, Some(15));
        assert_eq!(extensions.server_max_window_bits, Some(10));
    }

    #[test]
    fn no_permessage_deflate_token_yields_none() {
        assert!(parse_extensions("some-other-extension").is_none());
    }

    #[test]
    fn merge_requires_both_no_context_takeover_flags_from_peer() {
        let ours = requested_extension(true).unwrap();
        let mut theirs = ours.clone();
        theirs.server_no_context_takeover = false;
        assert!(merge_extensions(Some(&ours), Some(&theirs)).is_none());
    }

    #[test]
    fn merge_succeeds_when_peer_echoes_no_context_takeover() {
        let ours = requested_extension(true).unwrap();
        let theirs = ours.clone();
        let merged = merge_extensions(Some(&ours), Some(&theirs)).unwrap();
        assert!(merged.client_no_context_takeover);
        assert!(merged.server_no_context_takeover);
    }

    #[test]
    fn header_round_trips_through_parse_and_format() {
        let extensions = requested_extension(true).unwrap();
        let header = format_extensions_header(&extensions).unwrap();
        let parsed = parse_extensions(&header).unwrap();
        assert_eq!(parsed, extensions);
    }

    #[test]
    fn max_streams_header_round_trips() {
        let header = format_max_streams_header(1024);
        assert_eq!(parse_max_streams_header(&header), Some(1024));
    }

    #[test]
    fn max_streams_header_rejects_zero_and_garbage() {
        assert_eq!(parse_max_streams_header("0"), None);
        assert_eq!(parse_max_streams_header("not-a-number"), None);
    }
}
