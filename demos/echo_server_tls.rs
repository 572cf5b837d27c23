use log::{error, info};
use pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};
use socket_flow::config::{ConnectionConfig, ServerTlsConfig};
use socket_flow::handshake::accept_async_with_config;
use socket_flow::message::MessageType;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

async fn handle_connection(peer: SocketAddr, stream: TcpStream, tls_config: ServerTlsConfig) {
    match accept_async_with_config(stream, ConnectionConfig::default(), Some(tls_config)).await {
        Ok(connection) => {
            info!("{} connected over TLS as {}", peer, connection.name());
            for message_type in [MessageType::Text, MessageType::Binary] {
                connection.on_message(
                    message_type,
                    Arc::new(move |message, connection| {
                        let connection = connection.clone();
                        let payload = message.read().unwrap_or_default();
                        tokio::spawn(async move {
                            if connection.dispatch(message_type, payload).await.is_err() {
                                error!("failed to echo message back to {}", peer);
                            }
                        });
                    }),
                );
            }
        }
        Err(err) => error!("Error when performing handshake with {}: {}", peer, err),
    }
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    certs(&mut BufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    private_key(&mut BufReader::new(File::open(path)?))?.ok_or(io::Error::new(ErrorKind::Other, "no private key found"))
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let addr = "127.0.0.1:9002";
    let certs = load_certs(Path::new("server.crt"))?;
    let key = load_key(Path::new("server.key"))?;

    let rustls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let tls_config = ServerTlsConfig { rustls_config: Some(Arc::new(rustls_config)) };

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on: {}", addr);

    while let Ok((stream, peer)) = listener.accept().await {
        info!("Peer address: {}", peer);
        tokio::spawn(handle_connection(peer, stream, tls_config.clone()));
    }

    Ok(())
}
