use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::widget::WidgetId;

/// Kinds of events a widget or display filter can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    KeyDown,
    KeyUp,
    MouseDown,
    MouseUp,
    MouseMove,
    MouseEnter,
    MouseExit,
    MouseDoubleClick,
    Paint,
    Move,
    Resize,
    Dispose,
    Selection,
    DefaultSelection,
    FocusIn,
    FocusOut,
    Expand,
    Collapse,
    Modify,
    Verify,
    Show,
    Hide,
    Close,
    Activate,
    Deactivate,
    PreExternalEventDispatch,
    PostExternalEventDispatch,
}

impl EventKind {
    pub const ALL: [EventKind; 27] = [
        Self::KeyDown,
        Self::KeyUp,
        Self::MouseDown,
        Self::MouseUp,
        Self::MouseMove,
        Self::MouseEnter,
        Self::MouseExit,
        Self::MouseDoubleClick,
        Self::Paint,
        Self::Move,
        Self::Resize,
        Self::Dispose,
        Self::Selection,
        Self::DefaultSelection,
        Self::FocusIn,
        Self::FocusOut,
        Self::Expand,
        Self::Collapse,
        Self::Modify,
        Self::Verify,
        Self::Show,
        Self::Hide,
        Self::Close,
        Self::Activate,
        Self::Deactivate,
        Self::PreExternalEventDispatch,
        Self::PostExternalEventDispatch,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    /// Name used in routing names, e.g. `Button/7/Selection`.
    pub fn name(self) -> &'static str {
        match self {
            Self::KeyDown => "KeyDown",
            Self::KeyUp => "KeyUp",
            Self::MouseDown => "MouseDown",
            Self::MouseUp => "MouseUp",
            Self::MouseMove => "MouseMove",
            Self::MouseEnter => "MouseEnter",
            Self::MouseExit => "MouseExit",
            Self::MouseDoubleClick => "MouseDoubleClick",
            Self::Paint => "Paint",
            Self::Move => "Move",
            Self::Resize => "Resize",
            Self::Dispose => "Dispose",
            Self::Selection => "Selection",
            Self::DefaultSelection => "DefaultSelection",
            Self::FocusIn => "FocusIn",
            Self::FocusOut => "FocusOut",
            Self::Expand => "Expand",
            Self::Collapse => "Collapse",
            Self::Modify => "Modify",
            Self::Verify => "Verify",
            Self::Show => "Show",
            Self::Hide => "Hide",
            Self::Close => "Close",
            Self::Activate => "Activate",
            Self::Deactivate => "Deactivate",
            Self::PreExternalEventDispatch => "PreExternalEventDispatch",
            Self::PostExternalEventDispatch => "PostExternalEventDispatch",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An event as seen by listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub widget: Option<WidgetId>,
    /// Milliseconds since the display was created.
    pub time: u64,
    pub detail: i32,
    pub x: i32,
    pub y: i32,
    pub button: i32,
    pub state_mask: i32,
    pub character: Option<char>,
    pub key_code: i32,
    pub text: Option<String>,
    pub item: Option<WidgetId>,
    /// Listeners clear this to veto the operation.
    pub doit: bool,
    pub data: Value,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            widget: None,
            time: 0,
            detail: 0,
            x: 0,
            y: 0,
            button: 0,
            state_mask: 0,
            character: None,
            key_code: 0,
            text: None,
            item: None,
            doit: true,
            data: Value::Null,
        }
    }

    pub fn for_widget(kind: EventKind, widget: WidgetId) -> Self {
        Self {
            widget: Some(widget),
            ..Self::new(kind)
        }
    }
}

/// Shared listener reference. Two `Listener`s are equal when they wrap the
/// same closure allocation.
#[derive(Clone)]
pub struct Listener(Rc<dyn Fn(&mut Event)>);

impl Listener {
    pub fn new(callback: impl Fn(&mut Event) + 'static) -> Self {
        Self(Rc::new(callback))
    }

    pub fn call(&self, event: &mut Event) {
        (self.0)(event)
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.addr()).finish()
    }
}

struct Registration {
    listener: Listener,
    live: Cell<bool>,
}

/// Per-object registry from event kind to listeners in hook order.
///
/// Confined to the owning thread. Dispatch iterates a snapshot taken when it
/// starts; a registration removed mid-dispatch is tombstoned and skipped.
pub struct EventTable {
    buckets: RefCell<Vec<Vec<Rc<Registration>>>>,
    size: Cell<usize>,
}

impl Default for EventTable {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTable {
    pub fn new() -> Self {
        Self {
            buckets: RefCell::new(vec![Vec::new(); EventKind::COUNT]),
            size: Cell::new(0),
        }
    }

    pub fn hook(&self, kind: EventKind, listener: Listener) {
        self.buckets.borrow_mut()[kind.index()].push(Rc::new(Registration {
            listener,
            live: Cell::new(true),
        }));
        self.size.set(self.size.get() + 1);
    }

    /// Removes the first registration of `listener` for `kind`.
    pub fn unhook(&self, kind: EventKind, listener: &Listener) -> bool {
        let removed = {
            let mut buckets = self.buckets.borrow_mut();
            let bucket = &mut buckets[kind.index()];
            match bucket
                .iter()
                .position(|registration| registration.listener == *listener)
            {
                Some(position) => Some(bucket.remove(position)),
                None => None,
            }
        };

        match removed {
            Some(registration) => {
                registration.live.set(false);
                self.size.set(self.size.get() - 1);
                true
            }
            None => false,
        }
    }

    pub fn hooks(&self, kind: EventKind) -> bool {
        !self.buckets.borrow()[kind.index()].is_empty()
    }

    pub fn size(&self) -> usize {
        self.size.get()
    }

    pub fn is_empty(&self) -> bool {
        self.size.get() == 0
    }

    pub fn listeners(&self, kind: EventKind) -> Vec<Listener> {
        self.buckets.borrow()[kind.index()]
            .iter()
            .map(|registration| registration.listener.clone())
            .collect()
    }

    /// Notifies every listener registered for `event.kind`, in hook order.
    pub fn send_event(&self, event: &mut Event) {
        let snapshot = self.buckets.borrow()[event.kind.index()].clone();
        for registration in snapshot {
            if registration.live.get() {
                registration.listener.call(event);
            }
        }
    }

    /// Drops every registration, tombstoning any still referenced by a
    /// dispatch in progress.
    pub fn clear(&self) {
        let buckets = std::mem::take(&mut *self.buckets.borrow_mut());
        for registration in buckets.iter().flatten() {
            registration.live.set(false);
        }
        *self.buckets.borrow_mut() = vec![Vec::new(); EventKind::COUNT];
        self.size.set(0);
    }
}

impl fmt::Debug for EventTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTable")
            .field("size", &self.size.get())
            .finish_non_exhaustive()
    }
}
