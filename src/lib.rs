//! Bridge between a thread-affine widget tree and an out-of-process renderer.
//!
//! Two mechanisms carry the crate: the [`dispatch`] queue lets any thread hand
//! work to the single owning thread, and the [`mirror`] + [`bridge`] pair turns
//! widget mutations into CREATE / UPDATE / DESTROY messages keyed by stable
//! widget identities. [`Display`] ties them together on the owning thread.

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod display;
pub mod error;
pub mod event;
pub mod mirror;
pub mod widget;

pub use bridge::{BridgeSession, HandleState, MemoryTransport, Transport, WebSocketTransport};
pub use config::BridgeConfig;
pub use dispatch::{DispatchQueue, TaskFailure, TaskHandle};
pub use display::Display;
pub use error::BridgeError;
pub use event::{Event, EventKind, EventTable, Listener};
pub use mirror::{AttrValue, Attribute, StateMirror};
pub use widget::{WidgetId, WidgetKind};
