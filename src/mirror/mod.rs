//! Per-widget shadow state and its wire encoding.

mod attr;
mod codec;
mod state;

pub use attr::{AttrValue, Attribute, Rect, ResourceId, Rgba};
pub use codec::{AttributeCodec, JsonCodec};
pub use state::{Delta, StateMirror};
