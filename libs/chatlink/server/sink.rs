//! Transport sink abstraction for registered connections.
//!
//! The registry never touches a socket directly; it talks to a
//! `ConnectionSink`, so delivery bookkeeping can be tested without a
//! network.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::{LinkError, Result};

/// Outbound frame handed to a connection's write task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Write side of one registered connection.
///
/// Implementations must not block; the registry calls them while
/// holding its lock.
pub trait ConnectionSink: Send + Sync {
    fn send(&self, text: String) -> Result<()>;
    fn is_open(&self) -> bool;
    fn close(&self, code: u16, reason: &str) -> Result<()>;
}

/// Production sink: frames go over an unbounded channel to the
/// per-socket write task.
pub struct ChannelSink {
    tx: UnboundedSender<SinkFrame>,
    open: AtomicBool,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<SinkFrame>) {
        let (tx, rx) = unbounded_channel();
        (
            Self {
                tx,
                open: AtomicBool::new(true),
            },
            rx,
        )
    }
}

impl ConnectionSink for ChannelSink {
    fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(LinkError::ConnectionClosed("sink closed".into()));
        }
        self.tx.send(SinkFrame::Text(text)).map_err(|e| {
            self.open.store(false, Ordering::Release);
            LinkError::ChannelSend(e.to_string())
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn close(&self, code: u16, reason: &str) -> Result<()> {
        // First close wins.
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(SinkFrame::Close {
                code,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory sink that records every frame. Test support.
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<SinkFrame>>,
    closed: AtomicBool,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `send` calls fail, as a broken socket would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    pub fn frames(&self) -> Vec<SinkFrame> {
        self.frames.lock().clone()
    }

    /// Text payloads delivered so far.
    pub fn texts(&self) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .filter_map(|frame| match frame {
                SinkFrame::Text(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// The close frame, if one was delivered.
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.frames.lock().iter().find_map(|frame| match frame {
            SinkFrame::Close { code, reason } => Some((*code, reason.clone())),
            _ => None,
        })
    }
}

impl ConnectionSink for RecordingSink {
    fn send(&self, text: String) -> Result<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(LinkError::WebSocket("simulated send failure".into()));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::ConnectionClosed("sink closed".into()));
        }
        self.frames.lock().push(SinkFrame::Text(text));
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn close(&self, code: u16, reason: &str) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.frames.lock().push(SinkFrame::Close {
                code,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }
}
