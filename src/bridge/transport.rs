use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use super::protocol::{InboundMessage, OutboundMessage};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("transport is closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound half of the connection to the renderer. Only the owning thread
/// sends, so implementations need no ordering of their own.
pub trait Transport {
    fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError>;

    fn close(&mut self) {}

    fn is_open(&self) -> bool {
        true
    }
}

/// Receives decoded inbound traffic on the transport's own thread.
pub trait InboundSink: Send + Sync {
    fn deliver(&self, message: InboundMessage);

    fn disconnected(&self);
}

#[derive(Debug, Default)]
struct MemoryState {
    sent: Vec<OutboundMessage>,
    disconnected: bool,
    closed: bool,
}

/// In-process transport that records every message. Clones share the same
/// log, so a test can keep one clone and hand the other to the session.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.with_state(|state| state.sent.clone())
    }

    /// Returns and forgets everything sent so far.
    pub fn take(&self) -> Vec<OutboundMessage> {
        self.with_state(|state| std::mem::take(&mut state.sent))
    }

    /// Makes every later send fail as if the peer went away.
    pub fn disconnect(&self) {
        self.with_state(|state| state.disconnected = true);
    }

    pub fn is_closed(&self) -> bool {
        self.with_state(|state| state.closed)
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.with_state(|state| {
            if state.disconnected || state.closed {
                return Err(TransportError::Closed);
            }
            state.sent.push(message.clone());
            Ok(())
        })
    }

    fn close(&mut self) {
        self.with_state(|state| state.closed = true);
    }

    fn is_open(&self) -> bool {
        self.with_state(|state| !state.disconnected && !state.closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widget::WidgetId;

    fn destroy(id: u64) -> OutboundMessage {
        OutboundMessage::Destroy {
            id: WidgetId::new(id),
            name: format!("Button/{id}"),
        }
    }

    #[test]
    fn clones_share_the_log() {
        let observer = MemoryTransport::new();
        let mut transport = observer.clone();
        transport.send(&destroy(1)).unwrap();
        transport.send(&destroy(2)).unwrap();

        assert_eq!(observer.take(), vec![destroy(1), destroy(2)]);
        assert!(observer.messages().is_empty());
    }

    #[test]
    fn disconnected_transport_rejects_sends() {
        let observer = MemoryTransport::new();
        let mut transport = observer.clone();
        observer.disconnect();
        assert!(!transport.is_open());
        assert!(matches!(
            transport.send(&destroy(1)),
            Err(TransportError::Closed)
        ));
        assert!(observer.messages().is_empty());
    }
}
