use log::*;
use socket_flow::handshake::accept_async;
use socket_flow::message::MessageType;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

async fn handle_connection(peer: SocketAddr, stream: TcpStream) {
    match accept_async(stream).await {
        Ok(connection) => {
            info!("{} connected as {}", peer, connection.name());
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
        Err(err) => error!("handshake with {} failed: {}", peer, err),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let addr = "127.0.0.1:9002";
    let listener = TcpListener::bind(&addr).await.expect("Can't listen");
    info!("Listening on: {}", addr);

    while let Ok((stream, _)) = listener.accept().await {
        let peer = stream.peer_addr().expect("connected streams should have a peer address");
        info!("Peer address: {}", peer);

        tokio::spawn(handle_connection(peer, stream));
    }
}
