use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::event::EventTable;
use crate::mirror::{AttrValue, Attribute, StateMirror};

/// Stable widget identity; the join key between a widget, its mirror and its
/// remote handle. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(u64);

impl WidgetId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct IdAllocator {
    next: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdAllocator {
    fn allocate(&mut self) -> WidgetId {
        let id = WidgetId(self.next);
        self.next += 1;
        id
    }

    fn issued(&self, id: WidgetId) -> bool {
        id.0 > 0 && id.0 < self.next
    }
}

/// Concrete widget kinds known to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WidgetKind {
    Shell,
    Composite,
    Group,
    Button,
    Label,
    Text,
    Link,
    Combo,
    List,
    Table,
    TableColumn,
    TableItem,
    Tree,
    TreeColumn,
    TreeItem,
    TabFolder,
    TabItem,
    ToolBar,
    ToolItem,
    ProgressBar,
    Sash,
    Canvas,
    Menu,
    MenuItem,
    ToolTip,
}

impl WidgetKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Shell => "Shell",
            Self::Composite => "Composite",
            Self::Group => "Group",
            Self::Button => "Button",
            Self::Label => "Label",
            Self::Text => "Text",
            Self::Link => "Link",
            Self::Combo => "Combo",
            Self::List => "List",
            Self::Table => "Table",
            Self::TableColumn => "TableColumn",
            Self::TableItem => "TableItem",
            Self::Tree => "Tree",
            Self::TreeColumn => "TreeColumn",
            Self::TreeItem => "TreeItem",
            Self::TabFolder => "TabFolder",
            Self::TabItem => "TabItem",
            Self::ToolBar => "ToolBar",
            Self::ToolItem => "ToolItem",
            Self::ProgressBar => "ProgressBar",
            Self::Sash => "Sash",
            Self::Canvas => "Canvas",
            Self::Menu => "Menu",
            Self::MenuItem => "MenuItem",
            Self::ToolTip => "ToolTip",
        }
    }
}

/// Table from widget kind to the renderer-visible type tag.
///
/// Every kind starts out tagged with its own name. Platform adapters register
/// their implementation names, which are stored with the implementation prefix
/// stripped (`PlatformButton` becomes `Button`).
#[derive(Debug, Clone)]
pub struct TypeTags {
    prefix: String,
    tags: HashMap<WidgetKind, String>,
}

impl Default for TypeTags {
    fn default() -> Self {
        Self::new("")
    }
}

impl TypeTags {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            tags: HashMap::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn strip<'a>(&self, implementation_name: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return implementation_name;
        }
        match implementation_name.strip_prefix(self.prefix.as_str()) {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ => implementation_name,
        }
    }

    pub fn register(&mut self, kind: WidgetKind, implementation_name: &str) -> &str {
        let tag = self.strip(implementation_name).to_string();
        self.tags.insert(kind, tag);
        self.tag(kind)
    }

    pub fn tag(&self, kind: WidgetKind) -> &str {
        self.tags
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.name())
    }
}

/// Callbacks implemented by platform adapters.
pub trait WidgetLifecycle {
    fn on_created(&self, _id: WidgetId, _kind: WidgetKind) {}

    fn on_disposed(&self, _id: WidgetId) {}
}

/// Lifecycle hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLifecycle;

impl WidgetLifecycle for NoopLifecycle {}

/// One local widget with its mirror and listeners.
pub struct WidgetNode {
    id: WidgetId,
    kind: WidgetKind,
    parent: Option<WidgetId>,
    mirror: StateMirror,
    events: Rc<EventTable>,
    children: Vec<Option<WidgetId>>,
    disposing: bool,
}

impl WidgetNode {
    fn new(id: WidgetId, kind: WidgetKind, parent: Option<WidgetId>) -> Self {
        Self {
            id,
            kind,
            parent,
            mirror: StateMirror::new(id),
            events: Rc::new(EventTable::new()),
            children: Vec::new(),
            disposing: false,
        }
    }

    pub fn id(&self) -> WidgetId {
        self.id
    }

    pub fn kind(&self) -> WidgetKind {
        self.kind
    }

    pub fn parent(&self) -> Option<WidgetId> {
        self.parent
    }

    pub fn mirror(&self) -> &StateMirror {
        &self.mirror
    }

    pub fn mirror_mut(&mut self) -> &mut StateMirror {
        &mut self.mirror
    }

    pub fn events(&self) -> &Rc<EventTable> {
        &self.events
    }

    /// Child slots in insertion order; removed children leave `None`.
    pub fn children(&self) -> &[Option<WidgetId>] {
        &self.children
    }

    pub fn live_children(&self) -> impl Iterator<Item = WidgetId> + '_ {
        self.children.iter().flatten().copied()
    }

    pub fn is_disposing(&self) -> bool {
        self.disposing
    }

    pub(crate) fn begin_dispose(&mut self) -> bool {
        !std::mem::replace(&mut self.disposing, true)
    }

    fn push_child(&mut self, child: WidgetId) {
        self.children.push(Some(child));
        self.sync_children();
    }

    /// Nulls `child`'s slot in place.
    pub(crate) fn null_child(&mut self, child: WidgetId) -> bool {
        match self.children.iter_mut().find(|slot| **slot == Some(child)) {
            Some(slot) => {
                *slot = None;
                self.sync_children();
                true
            }
            None => false,
        }
    }

    fn sync_children(&mut self) {
        self.mirror
            .set(Attribute::Children, AttrValue::Widgets(self.children.clone()));
    }
}

impl fmt::Debug for WidgetNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// Session-scoped widget registry keyed by identity.
#[derive(Debug, Default)]
pub struct WidgetRegistry {
    ids: IdAllocator,
    nodes: HashMap<WidgetId, WidgetNode>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh identity and links the widget under `parent`.
    pub fn insert(
        &mut self,
        kind: WidgetKind,
        parent: Option<WidgetId>,
    ) -> Result<WidgetId, BridgeError> {
        if let Some(parent) = parent {
            self.check_live(parent)?;
        }

        let id = self.ids.allocate();
        self.nodes.insert(id, WidgetNode::new(id, kind, parent));
        if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.push_child(id);
        }
        Ok(id)
    }

    /// Errors with `WidgetDisposed` for retired identities and `UnknownWidget`
    /// for identities never issued.
    pub fn check_live(&self, id: WidgetId) -> Result<(), BridgeError> {
        if self.nodes.contains_key(&id) {
            Ok(())
        } else if self.is_retired(id) {
            Err(BridgeError::WidgetDisposed(id))
        } else {
            Err(BridgeError::UnknownWidget(id))
        }
    }

    pub fn get(&self, id: WidgetId) -> Option<&WidgetNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: WidgetId) -> Option<&mut WidgetNode> {
        self.nodes.get_mut(&id)
    }

    pub fn node(&self, id: WidgetId) -> Result<&WidgetNode, BridgeError> {
        self.check_live(id)?;
        self.nodes.get(&id).ok_or(BridgeError::UnknownWidget(id))
    }

    pub fn node_mut(&mut self, id: WidgetId) -> Result<&mut WidgetNode, BridgeError> {
        self.check_live(id)?;
        self.nodes.get_mut(&id).ok_or(BridgeError::UnknownWidget(id))
    }

    /// Removes the widget and nulls its slot in the parent.
    pub fn remove(&mut self, id: WidgetId) -> Option<WidgetNode> {
        let node = self.nodes.remove(&id)?;
        if let Some(parent) = node.parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.null_child(id);
        }
        Some(node)
    }

    pub fn contains(&self, id: WidgetId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn is_retired(&self, id: WidgetId) -> bool {
        self.ids.issued(id) && !self.nodes.contains_key(&id)
    }

    /// Number of live ancestors above `id`.
    pub fn depth(&self, id: WidgetId) -> usize {
        let mut depth = 0;
        let mut cursor = self.nodes.get(&id).and_then(WidgetNode::parent);
        while let Some(parent) = cursor {
            depth += 1;
            cursor = self.nodes.get(&parent).and_then(WidgetNode::parent);
        }
        depth
    }

    pub fn roots(&self) -> Vec<WidgetId> {
        let mut roots: Vec<WidgetId> = self
            .nodes
            .values()
            .filter(|node| node.parent.is_none())
            .map(WidgetNode::id)
            .collect();
        roots.sort();
        roots
    }

    pub fn ids(&self) -> Vec<WidgetId> {
        let mut ids: Vec<WidgetId> = self.nodes.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
