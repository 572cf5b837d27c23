use rand::distr::Alphanumeric;
use rand::{thread_rng, Rng};
use socket_flow::handshake::connect_async;
use socket_flow::message::MessageType;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{interval, Duration};

async fn handle_connection(addr: &str) {
    let connection = match connect_async(addr).await {
        Ok(connection) => connection,
        Err(err) => {
            eprintln!("Error when performing handshake: {}", err);
            return;
        }
    };

    let received = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(Notify::new());
    {
        let received = Arc::clone(&received);
        let done = Arc::clone(&done);
        connection.on_message(
            MessageType::Binary,
            Arc::new(move |message, _connection| {
                let text = String::from_utf8_lossy(&message.read().unwrap_or_default()).into_owned();
                println!("Received message: {}", text);
                // close the connection once 3 messages have been echoed back
                if received.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                    done.notify_one();
                }
            }),
        );
    }

    let mut ticker = interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = done.notified() => {
                if connection.close().await.is_err() {
                    eprintln!("Error occurred when closing connection");
                }
                break;
            }
            _ = ticker.tick() => {
                let binary_data = Vec::from(generate_random_string());
                if connection.dispatch(MessageType::Binary, binary_data).await.is_err() {
                    eprintln!("Failed to send message");
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    handle_connection("ws://127.0.0.1:9002").await;
}

fn generate_random_string() -> String {
    thread_rng().sample_iter(&Alphanumeric).take(30).map(char::from).collect()
}
