use log::*;
use socket_flow::handshake::connect_async;
use socket_flow::message::MessageType;
use std::sync::Arc;

async fn handle_connection(addr: &str) {
    match connect_async(addr).await {
        Ok(connection) => {
            connection.on_message(
                MessageType::Text,
                Arc::new(|message, _connection| {
                    if let Ok(text) = message.read_text() {
                        info!("Received message: {}", text);
                    }
                }),
            );
            // keep the demo process alive while the reader task runs in the background
            std::future::pending::<()>().await;
        }
        Err(err) => error!("Error when performing handshake: {}", err),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    handle_connection("wss://api.gemini.com/v1/marketdata/BTCUSD").await;
}
