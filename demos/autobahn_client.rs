//! Drives the Autobahn|Testsuite fuzzing server through every test case, echoing
//! back whatever each case sends (the compliance behavior the suite actually checks).
use log::*;
use socket_flow::config::{ConnectionConfig, DialConfig};
use socket_flow::connection::Status;
use socket_flow::error::Error;
use socket_flow::handshake::connect_async_with_config;
use socket_flow::message::MessageType;
use std::sync::Arc;
use tokio::sync::Notify;

const AGENT: &str = "socket-flow";

fn dial_config() -> DialConfig {
    DialConfig { connection: ConnectionConfig { enable_compress: true, ..ConnectionConfig::default() }, ..DialConfig::default() }
}

async fn run_test(case: u32) -> Result<(), Error> {
    info!("Running test case {}", case);
    let case_url = format!("ws://127.0.0.1:9001/runCase?case={}&agent={}", case, AGENT);
    let connection = connect_async_with_config(&case_url, dial_config()).await?;

    let done = Arc::new(Notify::new());
    {
        let done = Arc::clone(&done);
        connection.on_status(
            Status::Closed,
            Arc::new(move |_prev, _connection| {
                done.notify_one();
            }),
        );
    }
    for message_type in [MessageType::Text, MessageType::Binary] {
        connection.on_message(
            message_type,
            Arc::new(move |message, connection| {
                let connection = connection.clone();
                let payload = message.read().unwrap_or_default();
                tokio::spawn(async move {
                    let _ = connection.dispatch(message_type, payload).await;
                });
            }),
        );
    }

    done.notified().await;
    Ok(())
}

async fn update_reports() -> Result<(), Error> {
    info!("updating reports");
    let url = format!("ws://127.0.0.1:9001/updateReports?agent={}", AGENT);
    let connection = connect_async_with_config(&url, dial_config()).await?;
    info!("closing connection");
    connection.close().await?;
    Ok(())
}

async fn get_case_count() -> u32 {
    let connection = connect_async_with_config("ws://127.0.0.1:9001/getCaseCount", dial_config())
        .await
        .expect("could not dial the Autobahn server");

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    connection.on_message(
        MessageType::Text,
        Arc::new(move |message, _connection| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(message.read_text().unwrap_or_default());
            }
        }),
    );

    let text = rx.await.expect("getCaseCount never answered");
    let _ = connection.close().await;
    text.parse::<u32>().expect("couldn't convert test case count to a number")
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let total = get_case_count().await;

    for case in 1..=total {
        if let Err(e) = run_test(case).await {
            error!("Testcase {} failed: {}", case, e)
        }
    }

    update_reports().await.expect("Error updating reports");
}
