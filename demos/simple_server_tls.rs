//! TLS variant of `simple_server`: the same pool-backed chat broadcast, terminating
//! TLS on each accepted socket before the upgrade exchange.
use log::{error, info};
use pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, private_key};
use socket_flow::config::{ConnectionConfig, NodeConfig, PoolConfig, ServerTlsConfig};
use socket_flow::handshake::accept_async_with_config;
use socket_flow::message::MessageType;
use socket_flow::pool::Pool;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    certs(&mut BufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    private_key(&mut BufReader::new(File::open(path)?))?.ok_or(io::Error::new(ErrorKind::Other, "no private key found"))
}

async fn handle_connection(pool: Pool, peer: SocketAddr, stream: TcpStream, tls_config: ServerTlsConfig) {
    let connection = match accept_async_with_config(stream, ConnectionConfig::default(), Some(tls_config)).await {
        Ok(connection) => connection,
        Err(err) => {
            error!("handshake with {} failed: {}", peer, err);
            return;
        }
    };

    let handler_pool = pool.clone();
    connection.on_message(
        MessageType::Text,
        Arc::new(move |message, connection| {
            let pool = handler_pool.clone();
            let name = connection.name();
            let text = message.read_text().unwrap_or_default();
            tokio::spawn(async move {
                info!("{}: {}", name, text);
                pool.except(&name, MessageType::Text, format!("{}: {}", name, text).as_bytes()).await;
            });
        }),
    );

    if let Err(err) = pool.add(connection, NodeConfig::default()).await {
        error!("could not add {} to the pool: {}", peer, err);
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let certs = load_certs(Path::new("cert.pem"))?;
    let key = load_key(Path::new("key.pem"))?;
    let rustls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let tls_config = ServerTlsConfig { rustls_config: Some(Arc::new(rustls_config)) };

    let port: u16 = 8080;
    let pool = Pool::new(PoolConfig { name: "chat-tls".into(), ..PoolConfig::default() });
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Server started on address 127.0.0.1:{}", port);

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(handle_connection(pool.clone(), peer, stream, tls_config.clone()));
    }
}
