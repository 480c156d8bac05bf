//! Wire-level bridge to the remote renderer.

mod protocol;
mod session;
mod transport;
mod websocket;

pub use protocol::{routing_name, EventPayload, InboundMessage, OutboundMessage};
pub use session::{BridgeSession, FlushReport, HandleState};
pub use transport::{InboundSink, MemoryTransport, Transport, TransportError};
pub use websocket::WebSocketTransport;
