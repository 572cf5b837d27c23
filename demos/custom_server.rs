//! Rejects any upgrade request that doesn't carry an `Authorization: Bearer ...`
//! header, demonstrating `ConnectionConfig::header_verify`.
use log::*;
use socket_flow::config::ConnectionConfig;
use socket_flow::handshake::accept_async_with_config;
use socket_flow::message::MessageType;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

fn require_bearer_token(headers: &[(String, String)]) -> bool {
    headers
        .iter()
        .any(|(name, value)| name.eq_ignore_ascii_case("authorization") && value.starts_with("Bearer "))
}

async fn handle_connection(peer: SocketAddr, stream: TcpStream) {
    let config = ConnectionConfig { header_verify: Some(Arc::new(require_bearer_token)), ..ConnectionConfig::default() };
    match accept_async_with_config(stream, config, None).await {
        Ok(connection) => {
            info!("{} authorized as {}", peer, connection.name());
            connection.on_message(
                MessageType::Text,
                Arc::new(move |message, connection| {
                    let connection = connection.clone();
                    let payload = message.read().unwrap_or_default();
                    tokio::spawn(async move {
                        let _ = connection.dispatch(MessageType::Text, payload).await;
                    });
                }),
            );
        }
        Err(err) => error!("rejected {}: {}", peer, err),
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let addr = "127.0.0.1:9000";
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        tokio::spawn(handle_connection(peer, stream));
    }
}
