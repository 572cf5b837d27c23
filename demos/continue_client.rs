//! Streams whatever arrives on stdin to the server as a single, fragmented message,
//! exercising `Connection::dispatch_reader` (continuation frames) instead of
//! buffering the whole payload up front.
use log::*;
use socket_flow::handshake::connect_async;
use socket_flow::message::MessageType;
use tokio::io::stdin;

async fn handle_connection(addr: &str) {
    match connect_async(addr).await {
        Ok(connection) => {
            info!("streaming stdin to {}", addr);
            if connection.dispatch_reader(MessageType::Binary, stdin()).await.is_err() {
                error!("Error occurred when streaming data in chunks");
            }

            connection.close().await.unwrap();
        }
        Err(err) => error!("Error when performing handshake: {}", err),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    handle_connection("ws://127.0.0.1:9002").await;
}
