//! link-probe: connect a client to a gateway and print what happens.
//!
//! Usage: `link-probe [ws://host:port/ws]`. Sends a `probe` envelope
//! every few seconds; the default gateway handler echoes it back.

use std::time::Duration;

use anyhow::Result;
use chatlink::{Envelope, LinkClient, LinkConfig, LinkEvent};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    chat_relay::logging::init("info");

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:8080/ws".to_string());
    info!(%url, "probing gateway");

    let client = LinkClient::new(LinkConfig::new(url.as_str()).debug(true));
    let events = client.subscribe();
    client.connect()?;

    let printer = tokio::task::spawn_blocking(move || {
        for event in events.iter() {
            match event {
                LinkEvent::Open => info!("open"),
                LinkEvent::Reconnected => info!("reconnected"),
                LinkEvent::Message(envelope) => {
                    info!(kind = %envelope.kind, data = %envelope.data, "message")
                }
                LinkEvent::Close(close) => {
                    info!(code = close.code, name = close.name, "close")
                }
                LinkEvent::Error(classification) => info!(
                    kind = classification.kind.as_str(),
                    message = %classification.message,
                    "error"
                ),
                LinkEvent::Reconnecting {
                    attempt,
                    max_attempts,
                    delay,
                } => info!(attempt, max_attempts, ?delay, "reconnecting"),
                LinkEvent::MaxReconnectAttemptsReached => {
                    info!("gave up; run with a reachable gateway or restart it");
                    break;
                }
            }
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let outcome = client.send(Envelope::new(
                    "probe",
                    serde_json::json!({ "note": "link-probe" }),
                ))?;
                info!(?outcome, state = client.state().as_str(), "probe sent");
            }
        }
    }

    info!("shutting down");
    client.shutdown().await?;
    printer.abort();
    Ok(())
}
