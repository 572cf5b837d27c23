use socket_flow::handshake::connect_async;
use socket_flow::message::MessageType;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    let url = "ws://127.0.0.1:9002";
    let connection_count = 100; // Number of WebSocket clients
    let message_count = 1000; // Messages per client
    let message_size = 16384; // Size of each message in bytes

    let (tx, mut rx) = mpsc::unbounded_channel();

    for _ in 0..connection_count {
        let tx = tx.clone();
        tokio::spawn(async move {
            let connection = connect_async(url).await.unwrap();
            let (echo_tx, mut echo_rx) = mpsc::channel::<()>(1);
            connection.on_message(
                MessageType::Binary,
                Arc::new(move |_message, _connection| {
                    let _ = echo_tx.try_send(());
                }),
            );

            let payload = vec![b'a'; message_size];
            let start = Instant::now();

            for _ in 0..message_count {
                connection.dispatch(MessageType::Binary, payload.clone()).await.unwrap();
                echo_rx.recv().await.unwrap();
            }

            let duration = start.elapsed();
            let _ = connection.close().await;
            tx.send(duration).unwrap();
        });
    }

    drop(tx); // Close the channel

    let mut total_duration = Duration::new(0, 0);
    while let Some(duration) = rx.recv().await {
        total_duration += duration;
    }

    let avg_latency = total_duration / (connection_count as u32 * message_count as u32);
    println!("Average Latency: {:?}", avg_latency);
}
