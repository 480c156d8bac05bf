use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::{Event, EventKind};
use crate::widget::WidgetId;

/// Messages sent to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Create {
        id: WidgetId,
        name: String,
        widget: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<WidgetId>,
        attributes: Map<String, Value>,
    },
    Update {
        id: WidgetId,
        name: String,
        attributes: Map<String, Value>,
    },
    Destroy {
        id: WidgetId,
        name: String,
    },
    Properties {
        properties: Map<String, Value>,
    },
    Custom {
        id: WidgetId,
        name: String,
        payload: Value,
    },
}

impl OutboundMessage {
    pub fn id(&self) -> Option<WidgetId> {
        match self {
            Self::Create { id, .. }
            | Self::Update { id, .. }
            | Self::Destroy { id, .. }
            | Self::Custom { id, .. } => Some(*id),
            Self::Properties { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages received from the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Event {
        id: WidgetId,
        kind: EventKind,
        #[serde(default)]
        payload: EventPayload,
    },
    ClientReady {
        #[serde(default)]
        session: Option<String>,
    },
}

impl InboundMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Event fields supplied by the renderer; everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventPayload {
    pub detail: i32,
    pub x: i32,
    pub y: i32,
    pub button: i32,
    pub state_mask: i32,
    pub character: Option<char>,
    pub key_code: i32,
    pub text: Option<String>,
    pub item: Option<WidgetId>,
    pub doit: Option<bool>,
    pub data: Value,
}

impl EventPayload {
    pub fn into_event(self, kind: EventKind, widget: WidgetId, time: u64) -> Event {
        Event {
            time,
            detail: self.detail,
            x: self.x,
            y: self.y,
            button: self.button,
            state_mask: self.state_mask,
            character: self.character,
            key_code: self.key_code,
            text: self.text,
            item: self.item,
            doit: self.doit.unwrap_or(true),
            data: self.data,
            ..Event::for_widget(kind, widget)
        }
    }
}

/// Channel-style name a renderer can route on, e.g. `Button/7/Selection`.
pub fn routing_name(type_tag: &str, id: WidgetId, event: Option<EventKind>) -> String {
    match event {
        Some(kind) => format!("{type_tag}/{id}/{}", kind.name()),
        None => format!("{type_tag}/{id}"),
    }
}
