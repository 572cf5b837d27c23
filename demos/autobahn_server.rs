//! Autobahn|Testsuite-compatible echo server: accepts with compression enabled and
//! echoes back whatever it receives, which is all the suite's fuzzing cases check.
use log::*;
use socket_flow::config::ConnectionConfig;
use socket_flow::handshake::accept_async_with_config;
use socket_flow::message::MessageType;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

async fn handle_connection(peer: SocketAddr, stream: TcpStream) {
    let config = ConnectionConfig { enable_compress: true, ..ConnectionConfig::default() };
    match accept_async_with_config(stream, config, None).await {
        Ok(connection) => {
            for message_type in [MessageType::Text, MessageType::Binary] {
                connection.on_message(
                    message_type,
                    Arc::new(move |message, connection| {
                        let connection = connection.clone();
                        let payload = message.read().unwrap_or_default();
                        tokio::spawn(async move {
                            if connection.dispatch(message_type, payload).await.is_err() {
                                error!("Failed to send message");
                            }
                        });
                    }),
                );
            }
        }
        Err(err) => error!("Error when performing handshake: {}", err),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let addr = "127.0.0.1:9002";
    let listener = TcpListener::bind(&addr).await.expect("Can't listen");
    info!("Listening on: {}", addr);

    while let Ok((stream, peer)) = listener.accept().await {
        info!("Peer address: {}", peer);
        tokio::spawn(handle_connection(peer, stream));
    }
}
