//! Shared utilities for chatlink integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chatlink::{ConnectionState, Envelope, LinkClient, LinkEvent};
use crossbeam_channel::Receiver;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Scriptable mock gateway: echoes envelopes, answers application
/// pings, and can misbehave on demand.
pub struct MockGateway {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    behavior: Arc<Behavior>,
}

#[derive(Default)]
struct BehaviorFlags {
    /// Drop accepted TCP streams before the WebSocket handshake.
    refuse: AtomicBool,
    /// Stop answering application `ping` envelopes.
    suppress_pongs: AtomicBool,
    /// Completed WebSocket handshakes.
    accepted: AtomicUsize,
}

struct Behavior {
    flags: BehaviorFlags,
    /// Drop live connections without a close frame.
    kill: Notify,
    /// Close live connections with a normal 1000 frame.
    close_normal: Notify,
}

impl MockGateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let behavior = Arc::new(Behavior {
            flags: BehaviorFlags::default(),
            kill: Notify::new(),
            close_normal: Notify::new(),
        });

        let shutdown_task = shutdown.clone();
        let behavior_task = behavior.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let behavior = behavior_task.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, behavior).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_task.notified() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown,
            behavior,
        }
    }

    async fn handle_connection(stream: tokio::net::TcpStream, behavior: Arc<Behavior>) {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::accept_async;
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;
        use tokio_tungstenite::tungstenite::Message;

        if behavior.flags.refuse.load(Ordering::Acquire) {
            // Dropped pre-handshake: the client sees a connect failure.
            return;
        }

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };
        behavior.flags.accepted.fetch_add(1, Ordering::AcqRel);

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(raw))) => {
                            let reply = match Envelope::from_json(&raw) {
                                Ok(envelope) if envelope.is_ping() => {
                                    if behavior.flags.suppress_pongs.load(Ordering::Acquire) {
                                        continue;
                                    }
                                    Envelope::pong().to_json().unwrap()
                                }
                                // Echo everything else verbatim.
                                _ => raw,
                            };
                            if write.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if write.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) | None => break,
                    }
                }
                _ = behavior.kill.notified() => {
                    // Abrupt drop: no close frame on the wire.
                    break;
                }
                _ = behavior.close_normal.notified() => {
                    let _ = write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "test close".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Completed handshakes so far; rises again after a reconnect.
    pub fn accepted(&self) -> usize {
        self.behavior.flags.accepted.load(Ordering::Acquire)
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.behavior.flags.refuse.store(refuse, Ordering::Release);
    }

    pub fn set_suppress_pongs(&self, suppress: bool) {
        self.behavior
            .flags
            .suppress_pongs
            .store(suppress, Ordering::Release);
    }

    /// Drop every live connection without a close frame.
    pub fn kill_connections(&self) {
        self.behavior.kill.notify_waiters();
    }

    /// Close every live connection with a normal 1000 frame.
    pub fn close_connections_normally(&self) {
        self.behavior.close_normal.notify_waiters();
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Poll until the client reaches `target` or the timeout passes.
pub async fn wait_for_state(client: &LinkClient, target: ConnectionState, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if client.state() == target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "timed out waiting for state {:?}, still {:?}",
        target,
        client.state()
    );
}

/// Drain the event stream until one matches, or time out.
pub async fn wait_for_event<F>(
    events: &Receiver<LinkEvent>,
    timeout: Duration,
    mut matches: F,
) -> LinkEvent
where
    F: FnMut(&LinkEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        while let Ok(event) = events.try_recv() {
            if matches(&event) {
                return event;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for event");
}
