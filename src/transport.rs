//! The plain/TLS duplex abstraction connections are built on top of: an enum over a
//! plain `TcpStream` and each TLS backend's stream type, implementing
//! `AsyncRead`/`AsyncWrite` by delegating to whichever variant is live.

use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as RustlsClientStream;
use tokio_rustls::server::TlsStream as RustlsServerStream;

#[cfg(feature = "feature-native-tls")]
use tokio_native_tls::TlsStream as NativeTlsStream;

/// Either a bare TCP socket or one wrapped in TLS, on either role. Handshake code talks
/// to this type, never to `TcpStream` directly, so dial/accept paths are TLS-agnostic.
pub(crate) enum Transport {
    Plain(TcpStream),
    RustlsClient(Box<RustlsClientStream<TcpStream>>),
    RustlsServer(Box<RustlsServerStream<TcpStream>>),
    #[cfg(feature = "feature-native-tls")]
    NativeTls(Box<NativeTlsStream<TcpStream>>),
    /// In-memory pipe standing in for a socket in connection-level tests.
    #[cfg(test)]
    Duplex(tokio::io::DuplexStream),
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::RustlsClient(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Transport::RustlsServer(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            #[cfg(feature = "feature-native-tls")]
            Transport::NativeTls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            #[cfg(test)]
            Transport::Duplex(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::RustlsClient(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Transport::RustlsServer(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            #[cfg(feature = "feature-native-tls")]
            Transport::NativeTls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            #[cfg(test)]
            Transport::Duplex(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::RustlsClient(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Transport::RustlsServer(s) => Pin::new(s.as_mut()).poll_flush(cx),
            #[cfg(feature = "feature-native-tls")]
            Transport::NativeTls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            #[cfg(test)]
            Transport::Duplex(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::RustlsClient(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Transport::RustlsServer(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            #[cfg(feature = "feature-native-tls")]
            Transport::NativeTls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            #[cfg(test)]
            Transport::Duplex(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
