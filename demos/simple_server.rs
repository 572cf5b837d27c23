//! A pool-backed chat server: every connection is added to a shared `Pool` and every
//! text message one client sends is broadcast to the rest (`except` its own sender).
use log::*;
use socket_flow::config::{NodeConfig, PoolConfig};
use socket_flow::handshake::accept_async;
use socket_flow::message::MessageType;
use socket_flow::pool::Pool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

async fn handle_connection(pool: Pool, peer: SocketAddr, stream: TcpStream) {
    let connection = match accept_async(stream).await {
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
async fn main() {
    env_logger::init();

    let port: u16 = 8080;
    let pool = Pool::new(PoolConfig { name: "chat".into(), ..PoolConfig::default() });
    let listener = TcpListener::bind(("127.0.0.1", port)).await.expect("Can't listen");
    info!("Server started on address 127.0.0.1:{}", port);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("accept failed: {}", err);
                continue;
            }
        };
        tokio::spawn(handle_connection(pool.clone(), peer, stream));
    }
}
