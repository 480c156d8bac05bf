use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{routing_name, OutboundMessage};
use super::transport::Transport;
use crate::error::BridgeError;
use crate::mirror::{AttributeCodec, Delta, JsonCodec};
use crate::widget::{TypeTags, WidgetId, WidgetRegistry};

/// Remote lifecycle of one widget identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Uncreated,
    Created,
    Destroyed,
}

#[derive(Debug, Clone)]
struct RemoteHandle {
    type_tag: String,
}

/// Counts of what one flush put on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub created: usize,
    pub updated: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.updated == 0
    }
}

enum Synced {
    Created(Delta),
    Updated(Delta),
}

/// Live mapping from widget identities to remote handles plus the transport.
///
/// A handle exists exactly while a CREATE has been sent for the identity and
/// no DESTROY has followed. Once the transport fails the session is dead and
/// every flush is a no-op.
pub struct BridgeSession {
    id: Uuid,
    transport: Box<dyn Transport>,
    codec: Box<dyn AttributeCodec>,
    handles: HashMap<WidgetId, RemoteHandle>,
    destroyed: HashSet<WidgetId>,
    dirty: BTreeSet<WidgetId>,
    properties: Map<String, Value>,
    alive: bool,
    ready: bool,
    ready_seen: bool,
}

impl BridgeSession {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            id: Uuid::new_v4(),
            transport,
            codec: Box::new(JsonCodec),
            handles: HashMap::new(),
            destroyed: HashSet::new(),
            dirty: BTreeSet::new(),
            properties: Map::new(),
            alive: true,
            ready: true,
            ready_seen: false,
        }
    }

    /// Defers every flush until the renderer reports `client_ready`.
    pub fn with_client_ready_gate(mut self, gate: bool) -> Self {
        self.ready = !gate;
        self
    }

    /// Uses a caller-chosen session id, e.g. one already handed to a sink.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_codec(mut self, codec: Box<dyn AttributeCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn state(&self, id: WidgetId) -> HandleState {
        if self.handles.contains_key(&id) {
            HandleState::Created
        } else if self.destroyed.contains(&id) {
            HandleState::Destroyed
        } else {
            HandleState::Uncreated
        }
    }

    pub fn mark_dirty(&mut self, id: WidgetId) {
        if !self.destroyed.contains(&id) {
            self.dirty.insert(id);
        }
    }

    pub fn is_dirty(&self, id: WidgetId) -> bool {
        self.dirty.contains(&id)
    }

    /// Sends every dirty widget. All CREATEs go first, parents before
    /// descendants, so no UPDATE names an identity the renderer lacks.
    pub fn flush(
        &mut self,
        registry: &mut WidgetRegistry,
        tags: &TypeTags,
    ) -> Result<FlushReport, BridgeError> {
        let mut report = FlushReport::default();
        if !self.alive || !self.ready || self.dirty.is_empty() {
            return Ok(report);
        }

        let mut pending: Vec<WidgetId> = std::mem::take(&mut self.dirty)
            .into_iter()
            .filter(|id| registry.contains(*id))
            .collect();
        pending.sort_by_key(|id| {
            (
                self.handles.contains_key(id),
                registry.depth(*id),
                *id,
            )
        });

        for (index, id) in pending.iter().enumerate() {
            match self.sync_widget(registry, tags, *id) {
                Ok(Some(Synced::Created(_))) => report.created += 1,
                Ok(Some(Synced::Updated(_))) => report.updated += 1,
                Ok(None) => {}
                Err(err) => {
                    self.dirty.extend(pending[index..].iter().copied());
                    self.mark_dead(&err);
                    return Err(err);
                }
            }
        }

        if !report.is_empty() {
            debug!(
                target = "bridge",
                created = report.created,
                updated = report.updated,
                "flushed widget state"
            );
        }
        Ok(report)
    }

    /// Flushes one widget, creating any uncreated ancestors first. Returns the
    /// delta that went on the wire.
    pub fn flush_one(
        &mut self,
        registry: &mut WidgetRegistry,
        tags: &TypeTags,
        id: WidgetId,
    ) -> Result<Delta, BridgeError> {
        registry.check_live(id)?;
        if !self.alive || !self.ready {
            return Ok(Delta::new());
        }

        let mut chain = vec![id];
        let mut cursor = registry.get(id).and_then(|node| node.parent());
        while let Some(parent) = cursor {
            if self.handles.contains_key(&parent) {
                break;
            }
            chain.push(parent);
            cursor = registry.get(parent).and_then(|node| node.parent());
        }

        let mut sent = Delta::new();
        for widget in chain.into_iter().rev() {
            self.dirty.remove(&widget);
            match self.sync_widget(registry, tags, widget) {
                Ok(Some(Synced::Created(delta) | Synced::Updated(delta))) if widget == id => {
                    sent = delta;
                }
                Ok(_) => {}
                Err(err) => {
                    self.dirty.insert(widget);
                    self.mark_dead(&err);
                    return Err(err);
                }
            }
        }
        Ok(sent)
    }

    fn sync_widget(
        &mut self,
        registry: &mut WidgetRegistry,
        tags: &TypeTags,
        id: WidgetId,
    ) -> Result<Option<Synced>, BridgeError> {
        let Some(node) = registry.get_mut(id) else {
            return Ok(None);
        };

        if let Some(handle) = self.handles.get(&id) {
            let delta = node.mirror_mut().flush();
            let attributes = self.codec.encode_delta(&delta);
            if attributes.is_empty() {
                return Ok(None);
            }
            let message = OutboundMessage::Update {
                id,
                name: routing_name(&handle.type_tag, id, None),
                attributes,
            };
            if let Err(err) = self.transport.send(&message) {
                node.mirror_mut().requeue(&delta);
                return Err(err.into());
            }
            return Ok(Some(Synced::Updated(delta)));
        }

        let type_tag = tags.tag(node.kind()).to_string();
        let delta = node.mirror_mut().flush_all();
        let message = OutboundMessage::Create {
            id,
            name: routing_name(&type_tag, id, None),
            widget: type_tag.clone(),
            parent: node.parent(),
            attributes: self.codec.encode_delta(&delta),
        };
        if let Err(err) = self.transport.send(&message) {
            node.mirror_mut().mark_all_dirty();
            return Err(err.into());
        }
        self.handles.insert(id, RemoteHandle { type_tag });
        Ok(Some(Synced::Created(delta)))
    }

    /// Emits DESTROY if the identity has a remote handle and retires it.
    /// Returns whether a message was sent.
    pub fn destroy(&mut self, id: WidgetId) -> Result<bool, BridgeError> {
        self.dirty.remove(&id);
        if !self.destroyed.insert(id) {
            return Ok(false);
        }
        let Some(handle) = self.handles.remove(&id) else {
            return Ok(false);
        };
        if !self.alive {
            return Ok(false);
        }

        let message = OutboundMessage::Destroy {
            id,
            name: routing_name(&handle.type_tag, id, None),
        };
        if let Err(err) = self.transport.send(&message) {
            let err = BridgeError::from(err);
            self.mark_dead(&err);
            return Err(err);
        }
        Ok(true)
    }

    /// Handles the renderer's `client_ready`. A repeated ready means the
    /// renderer restarted, so every live widget is created again.
    pub fn handle_ready(&mut self, registry: &mut WidgetRegistry) -> Result<(), BridgeError> {
        if !self.alive {
            return Err(BridgeError::SessionDead);
        }

        let resync = self.ready_seen;
        self.ready_seen = true;
        self.ready = true;

        if resync {
            info!(target = "bridge", session = %self.id, "renderer restarted, resending widget tree");
            self.handles.clear();
            for id in registry.ids() {
                if let Some(node) = registry.get_mut(id) {
                    node.mirror_mut().mark_all_dirty();
                }
                self.dirty.insert(id);
            }
        } else {
            info!(target = "bridge", session = %self.id, "renderer ready");
        }

        let message = OutboundMessage::Properties {
            properties: self.properties.clone(),
        };
        if let Err(err) = self.transport.send(&message) {
            let err = BridgeError::from(err);
            self.mark_dead(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Sends a CUSTOM message for an already created widget. Returns whether
    /// it went on the wire; a dead session drops it like any other send.
    pub fn send_custom(
        &mut self,
        id: WidgetId,
        event: &str,
        payload: Value,
    ) -> Result<bool, BridgeError> {
        if !self.alive {
            debug!(target = "bridge", widget = %id, "custom message on dead session dropped");
            return Ok(false);
        }
        let Some(handle) = self.handles.get(&id) else {
            debug!(target = "bridge", widget = %id, "custom message for uncreated widget dropped");
            return Ok(false);
        };

        let message = OutboundMessage::Custom {
            id,
            name: format!("{}/{id}/{event}", handle.type_tag),
            payload,
        };
        if let Err(err) = self.transport.send(&message) {
            let err = BridgeError::from(err);
            self.mark_dead(&err);
            return Err(err);
        }
        Ok(true)
    }

    /// Marks the session dead after a transport failure or disconnect.
    pub fn mark_dead(&mut self, reason: &dyn std::fmt::Display) {
        if self.alive {
            warn!(target = "bridge", session = %self.id, reason = %reason, "bridge session is dead");
        }
        self.alive = false;
        self.ready = false;
        self.transport.close();
    }

    pub fn close(&mut self) {
        self.alive = false;
        self.ready = false;
        self.transport.close();
    }
}
