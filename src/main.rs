//! Thin demo binary: an echo server that accepts plain-TCP connections and echoes
//! every text/binary message back to its sender, logging every status transition.
//! The richer demos (TLS, streaming, pooling) live under `demos/`.

use log::{error, info};
use socket_flow::connection::Status;
use socket_flow::handshake::accept_async;
use socket_flow::message::MessageType;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
pub async fn main() -> io::Result<()> {
    env_logger::init();
    let listener = TcpListener::bind("127.0.0.1:9000").await?;
    info!("listening on 127.0.0.1:9000");

    loop {
        let (socket, peer) = listener.accept().await?;
        tokio::spawn(async move {
            match accept_async(socket).await {
                Ok(connection) => {
                    info!("accepted {}", peer);
                    connection.on_status(
                        Status::Closed,
                        Arc::new(move |_prev, connection| {
                            info!("{} closed", connection.name());
                        }),
                    );
                    connection.on_message(
                        MessageType::Text,
                        Arc::new(move |message, connection| {
                            let connection = connection.clone();
                            tokio::spawn(async move {
                                if let Ok(text) = message.read_text() {
                                    let _ = connection.dispatch(MessageType::Text, text.into_bytes()).await;
                                }
                            });
                        }),
                    );
                }
                Err(e) => error!("handshake with {} failed: {}", peer, e),
            }
        });
    }
}
