use log::*;
use pki_types::CertificateDer;
use rand::distr::Alphanumeric;
use rand::{thread_rng, Rng};
use socket_flow::config::{ClientTlsConfig, DialConfig};
use socket_flow::handshake::connect_async_with_config;
use socket_flow::message::MessageType;
use std::fs::File;
use std::io::{self, BufReader};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{interval, Duration};

fn build_tls_config(ca_file: &str) -> io::Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut BufReader::new(File::open(ca_file)?)).collect::<Result<_, _>>()?;
    for cert in certs {
        roots.add(cert).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    }
    Ok(rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth())
}

async fn handle_connection(addr: &str) {
    let rustls_config = match build_tls_config("ca.crt") {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!("failed to load ca.crt: {}", err);
            return;
        }
    };
    let dial = DialConfig {
        tls: ClientTlsConfig { use_tls: true, rustls_config: Some(rustls_config) },
        ..DialConfig::default()
    };

    let connection = match connect_async_with_config(addr, dial).await {
        Ok(connection) => connection,
        Err(err) => {
            error!("Error when performing handshake: {}", err);
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
                if let Ok(text) = message.read_text() {
                    info!("Received message: {}", text);
                }
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
                    error!("Error occurred when closing connection");
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
    env_logger::init();
    handle_connection("wss://localhost:9002").await;
}

fn generate_random_string() -> String {
    thread_rng().sample_iter(&Alphanumeric).take(30).map(char::from).collect()
}
