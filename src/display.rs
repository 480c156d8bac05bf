//! The owning-thread context.
//!
//! A [`Display`] ties together the dispatch queue, the session-scoped widget
//! registry, the display-wide filter table and the bridge session. It is
//! `!Send`: whatever thread creates it becomes the owning thread, and other
//! threads reach it only through [`Display::dispatcher`].

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::bridge::{BridgeSession, FlushReport, HandleState, InboundMessage, InboundSink, Transport};
use crate::config::BridgeConfig;
use crate::dispatch::{run_guarded, DispatchQueue, DrainObserver, IdleSignal, TaskFailure, Wakeup};
use crate::error::BridgeError;
use crate::event::{Event, EventKind, EventTable, Listener};
use crate::mirror::{AttrValue, Attribute, Delta};
use crate::widget::{NoopLifecycle, TypeTags, WidgetId, WidgetKind, WidgetLifecycle, WidgetRegistry};

thread_local! {
    static CURRENT: RefCell<Weak<DisplayInner>> = RefCell::new(Weak::new());
}

type ErrorHandler = Rc<dyn Fn(&TaskFailure)>;

struct DisplayInner {
    queue: Arc<DispatchQueue>,
    idle: Arc<IdleSignal>,
    registry: RefCell<WidgetRegistry>,
    tags: RefCell<TypeTags>,
    session: RefCell<Option<BridgeSession>>,
    next_session: Cell<Option<Uuid>>,
    filters: Rc<EventTable>,
    error_handler: RefCell<Option<ErrorHandler>>,
    lifecycle: RefCell<Rc<dyn WidgetLifecycle>>,
    started: Instant,
    closing: Cell<bool>,
    disposed: Cell<bool>,
    idle_wait: Duration,
    client_ready_gate: bool,
    properties: Map<String, Value>,
}

impl Drop for DisplayInner {
    fn drop(&mut self) {
        self.queue.dispose();
        if let Some(session) = self.session.get_mut().as_mut() {
            session.close();
        }
    }
}

#[derive(Clone)]
pub struct Display {
    inner: Rc<DisplayInner>,
}

impl Display {
    /// Creates the display for the calling thread, which becomes its owning
    /// thread. Fails if that thread already has a live display.
    pub fn new(config: &BridgeConfig) -> Result<Self, BridgeError> {
        if Self::current().is_some() {
            return Err(BridgeError::DisplayExists);
        }

        let idle = Arc::new(IdleSignal::new());
        let waker: Arc<dyn Wakeup> = idle.clone();
        let inner = Rc::new(DisplayInner {
            queue: Arc::new(DispatchQueue::new(waker)),
            idle,
            registry: RefCell::new(WidgetRegistry::new()),
            tags: RefCell::new(TypeTags::new(config.type_prefix.clone())),
            session: RefCell::new(None),
            next_session: Cell::new(None),
            filters: Rc::new(EventTable::new()),
            error_handler: RefCell::new(None),
            lifecycle: RefCell::new(Rc::new(NoopLifecycle)),
            started: Instant::now(),
            closing: Cell::new(false),
            disposed: Cell::new(false),
            idle_wait: config.idle_wait(),
            client_ready_gate: config.wait_for_client_ready,
            properties: config.renderer_properties(),
        });
        CURRENT.with(|current| *current.borrow_mut() = Rc::downgrade(&inner));
        debug!(target = "display", "display created");
        Ok(Self { inner })
    }

    /// The live display of the calling thread, if any.
    pub fn current() -> Option<Display> {
        CURRENT
            .with(|current| current.borrow().upgrade())
            .map(|inner| Display { inner })
    }

    /// Runs `f` against the calling thread's display.
    pub fn with_current<R>(f: impl FnOnce(&Display) -> R) -> Result<R, BridgeError> {
        let display = Self::current().ok_or(BridgeError::InvalidThread)?;
        display.check_device()?;
        Ok(f(&display))
    }

    /// Handle other threads use to reach this display.
    pub fn dispatcher(&self) -> Arc<DispatchQueue> {
        Arc::clone(&self.inner.queue)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    fn check_device(&self) -> Result<(), BridgeError> {
        if self.inner.disposed.get() || self.inner.closing.get() {
            Err(BridgeError::DeviceDisposed)
        } else {
            Ok(())
        }
    }

    /// Milliseconds since the display was created.
    pub fn time(&self) -> u64 {
        self.inner.started.elapsed().as_millis() as u64
    }

    pub fn set_error_handler(&self, handler: impl Fn(&TaskFailure) + 'static) {
        *self.inner.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    pub fn set_lifecycle(&self, lifecycle: Rc<dyn WidgetLifecycle>) {
        *self.inner.lifecycle.borrow_mut() = lifecycle;
    }

    fn lifecycle(&self) -> Rc<dyn WidgetLifecycle> {
        Rc::clone(&self.inner.lifecycle.borrow())
    }

    fn report_failure(&self, failure: &TaskFailure) {
        let handler = self.inner.error_handler.borrow().clone();
        match handler {
            Some(handler) => handler(failure),
            None => error!(target = "display", error = %failure, "unhandled task failure"),
        }
    }

    // Work submission

    pub fn async_exec<F>(&self, work: F) -> Result<(), BridgeError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.inner.queue.submit_async(work)
    }

    /// Runs inline: the caller is always on the owning thread.
    pub fn sync_exec<F>(&self, work: F) -> Result<(), BridgeError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.inner.queue.submit_sync(work)
    }

    pub fn wake(&self) {
        self.inner.queue.wake();
    }

    // Bridge session

    /// Starts a bridge session over `transport`, replacing any previous one.
    /// Every live widget is resent to the new renderer.
    pub fn connect(&self, transport: Box<dyn Transport>) -> Result<(), BridgeError> {
        self.check_device()?;
        let session_id = self.inner.next_session.take().unwrap_or_else(Uuid::new_v4);
        let mut session = BridgeSession::new(transport)
            .with_id(session_id)
            .with_client_ready_gate(self.inner.client_ready_gate)
            .with_properties(self.inner.properties.clone());

        {
            let mut registry = self.inner.registry.borrow_mut();
            for id in registry.ids() {
                if let Some(node) = registry.get_mut(id) {
                    node.mirror_mut().mark_all_dirty();
                }
                session.mark_dirty(id);
            }
        }

        debug!(target = "display", session = %session.id(), "bridge session attached");
        if let Some(mut previous) = self.inner.session.replace(Some(session)) {
            previous.close();
        }
        Ok(())
    }

    /// Sink for the transport of the next [`Display::connect`]. Traffic it
    /// carries re-enters through the dispatch queue and is dropped once that
    /// session has been replaced.
    pub fn inbound_sink(&self) -> Arc<dyn InboundSink> {
        let session = self.inner.next_session.get().unwrap_or_else(Uuid::new_v4);
        self.inner.next_session.set(Some(session));
        self.sink_for(session)
    }

    /// Sink bound to the session that is attached right now.
    pub fn session_sink(&self) -> Result<Arc<dyn InboundSink>, BridgeError> {
        let session = self.session_id().ok_or(BridgeError::SessionDead)?;
        Ok(self.sink_for(session))
    }

    fn sink_for(&self, session: Uuid) -> Arc<dyn InboundSink> {
        Arc::new(QueueSink {
            queue: self.dispatcher(),
            session,
        })
    }

    fn session_id(&self) -> Option<Uuid> {
        self.inner.session.borrow().as_ref().map(BridgeSession::id)
    }

    fn is_current_session(&self, session: Uuid, what: &str) -> bool {
        let current = self.session_id();
        if current == Some(session) {
            return true;
        }
        debug!(
            target = "bridge",
            %session,
            current = ?current,
            what,
            "traffic from a replaced session dropped"
        );
        false
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .session
            .borrow()
            .as_ref()
            .is_some_and(BridgeSession::is_alive)
    }

    pub fn is_client_ready(&self) -> bool {
        self.inner
            .session
            .borrow()
            .as_ref()
            .is_some_and(BridgeSession::is_ready)
    }

    pub fn handle_state(&self, id: WidgetId) -> HandleState {
        self.inner
            .session
            .borrow()
            .as_ref()
            .map_or(HandleState::Uncreated, |session| session.state(id))
    }

    fn mark_session_dirty(&self, id: WidgetId) {
        if let Some(session) = self.inner.session.borrow_mut().as_mut() {
            session.mark_dirty(id);
        }
    }

    /// Decodes one inbound message on the owning thread.
    pub fn handle_inbound(&self, message: InboundMessage) {
        match message {
            InboundMessage::Event { id, kind, payload } => {
                if !self.inner.registry.borrow().contains(id) {
                    if self.inner.registry.borrow().is_retired(id) {
                        warn!(target = "bridge", widget = %id, kind = %kind, "event for destroyed widget dropped");
                    } else {
                        warn!(target = "bridge", widget = %id, kind = %kind, "event for unknown widget dropped");
                    }
                    return;
                }
                let event = payload.into_event(kind, id, self.time());
                if let Err(err) = self.send_event(id, event) {
                    warn!(target = "bridge", widget = %id, error = %err, "failed to dispatch inbound event");
                }
            }
            InboundMessage::ClientReady { .. } => {
                let result = {
                    let mut session = self.inner.session.borrow_mut();
                    let Some(session) = session.as_mut() else {
                        warn!(target = "bridge", "client ready without a session");
                        return;
                    };
                    session.handle_ready(&mut self.inner.registry.borrow_mut())
                };
                if let Err(err) = result.and_then(|_| self.flush().map(|_| ())) {
                    warn!(target = "bridge", error = %err, "failed to sync renderer");
                }
            }
        }
    }

    /// Marks the session dead after the renderer went away.
    pub fn session_lost(&self) {
        if let Some(session) = self.inner.session.borrow_mut().as_mut() {
            session.mark_dead(&"renderer disconnected");
        }
    }

    fn inbound_from(&self, session: Uuid, message: InboundMessage) {
        if self.is_current_session(session, "message") {
            self.handle_inbound(message);
        }
    }

    fn lost_from(&self, session: Uuid) {
        if self.is_current_session(session, "disconnect") {
            self.session_lost();
        }
    }

    // Widgets

    pub fn register_kind(&self, kind: WidgetKind, implementation_name: &str) -> String {
        self.inner
            .tags
            .borrow_mut()
            .register(kind, implementation_name)
            .to_string()
    }

    pub fn type_tag(&self, kind: WidgetKind) -> String {
        self.inner.tags.borrow().tag(kind).to_string()
    }

    pub fn create_widget(
        &self,
        kind: WidgetKind,
        parent: Option<WidgetId>,
    ) -> Result<WidgetId, BridgeError> {
        self.check_device()?;
        let id = self.inner.registry.borrow_mut().insert(kind, parent)?;
        self.mark_session_dirty(id);
        if let Some(parent) = parent {
            self.mark_session_dirty(parent);
        }
        debug!(target = "display", widget = %id, kind = kind.name(), "widget created");
        self.lifecycle().on_created(id, kind);
        Ok(id)
    }

    pub fn is_live(&self, id: WidgetId) -> bool {
        self.inner.registry.borrow().contains(id)
    }

    pub fn widget_kind(&self, id: WidgetId) -> Result<WidgetKind, BridgeError> {
        Ok(self.inner.registry.borrow().node(id)?.kind())
    }

    pub fn parent(&self, id: WidgetId) -> Result<Option<WidgetId>, BridgeError> {
        Ok(self.inner.registry.borrow().node(id)?.parent())
    }

    pub fn children(&self, id: WidgetId) -> Result<Vec<WidgetId>, BridgeError> {
        Ok(self
            .inner
            .registry
            .borrow()
            .node(id)?
            .live_children()
            .collect())
    }

    /// Stores an attribute value; the widget is queued for the next flush
    /// only if the value changed.
    pub fn set(&self, id: WidgetId, attr: Attribute, value: AttrValue) -> Result<bool, BridgeError> {
        self.check_device()?;
        let changed = self
            .inner
            .registry
            .borrow_mut()
            .node_mut(id)?
            .mirror_mut()
            .set(attr, value);
        if changed {
            self.mark_session_dirty(id);
        }
        Ok(changed)
    }

    pub fn get(&self, id: WidgetId, attr: Attribute) -> Result<Option<AttrValue>, BridgeError> {
        self.check_device()?;
        Ok(self
            .inner
            .registry
            .borrow()
            .node(id)?
            .mirror()
            .get(attr)
            .cloned())
    }

    pub fn set_text(&self, id: WidgetId, text: impl Into<String>) -> Result<bool, BridgeError> {
        self.set(id, Attribute::Text, AttrValue::Text(text.into()))
    }

    pub fn text(&self, id: WidgetId) -> Result<Option<String>, BridgeError> {
        self.check_device()?;
        Ok(self.inner.registry.borrow().node(id)?.mirror().text())
    }

    pub fn mark_dirty(&self, id: WidgetId, attr: Attribute) -> Result<bool, BridgeError> {
        self.check_device()?;
        let marked = self
            .inner
            .registry
            .borrow_mut()
            .node_mut(id)?
            .mirror_mut()
            .mark_dirty(attr);
        if marked {
            self.mark_session_dirty(id);
        }
        Ok(marked)
    }

    /// Flushes one widget. With a session the delta goes on the wire; without
    /// one it is handed to the caller.
    pub fn flush_widget(&self, id: WidgetId) -> Result<Delta, BridgeError> {
        self.check_device()?;
        let mut session = self.inner.session.borrow_mut();
        let mut registry = self.inner.registry.borrow_mut();
        match session.as_mut() {
            Some(session) => session.flush_one(&mut registry, &self.inner.tags.borrow(), id),
            None => Ok(registry.node_mut(id)?.mirror_mut().flush()),
        }
    }

    /// Sends every pending change to the renderer.
    pub fn flush(&self) -> Result<FlushReport, BridgeError> {
        self.check_device()?;
        let mut session = self.inner.session.borrow_mut();
        let Some(session) = session.as_mut() else {
            return Ok(FlushReport::default());
        };
        session.flush(
            &mut self.inner.registry.borrow_mut(),
            &self.inner.tags.borrow(),
        )
    }

    /// Sends an ad hoc message after flushing the widget's pending state.
    /// Returns whether it went on the wire; without a live session nothing is
    /// sent, like a flush.
    pub fn send_custom(&self, id: WidgetId, name: &str, payload: Value) -> Result<bool, BridgeError> {
        self.flush_widget(id)?;
        let mut session = self.inner.session.borrow_mut();
        match session.as_mut() {
            Some(session) => session.send_custom(id, name, payload),
            None => Ok(false),
        }
    }

    // Events

    fn events(&self, id: WidgetId) -> Result<Rc<EventTable>, BridgeError> {
        Ok(Rc::clone(self.inner.registry.borrow().node(id)?.events()))
    }

    pub fn hook(&self, id: WidgetId, kind: EventKind, listener: Listener) -> Result<(), BridgeError> {
        self.check_device()?;
        self.events(id)?.hook(kind, listener);
        Ok(())
    }

    pub fn unhook(&self, id: WidgetId, kind: EventKind, listener: &Listener) -> Result<bool, BridgeError> {
        self.check_device()?;
        Ok(self.events(id)?.unhook(kind, listener))
    }

    pub fn hooks(&self, id: WidgetId, kind: EventKind) -> Result<bool, BridgeError> {
        self.check_device()?;
        Ok(self.events(id)?.hooks(kind))
    }

    pub fn add_filter(&self, kind: EventKind, listener: Listener) -> Result<(), BridgeError> {
        self.check_device()?;
        self.inner.filters.hook(kind, listener);
        Ok(())
    }

    pub fn remove_filter(&self, kind: EventKind, listener: &Listener) -> Result<bool, BridgeError> {
        self.check_device()?;
        Ok(self.inner.filters.unhook(kind, listener))
    }

    /// Delivers `event` to the display filters, then to the widget's
    /// listeners. Returns the event as the listeners left it.
    pub fn send_event(&self, id: WidgetId, mut event: Event) -> Result<Event, BridgeError> {
        self.check_device()?;
        let table = self.events(id)?;
        event.widget = Some(id);
        if event.time == 0 {
            event.time = self.time();
        }
        self.dispatch(&table, &mut event);
        Ok(event)
    }

    fn dispatch(&self, table: &EventTable, event: &mut Event) {
        if self.inner.filters.hooks(event.kind) {
            self.inner.filters.send_event(event);
        }
        table.send_event(event);
    }

    /// Queues `event` for delivery on a later drain.
    pub fn post_event(&self, id: WidgetId, event: Event) -> Result<(), BridgeError> {
        self.check_device()?;
        self.inner.registry.borrow().check_live(id)?;
        self.inner.queue.submit_async(move || {
            Display::with_current(|display| display.send_event(id, event))??;
            Ok(())
        })
    }

    fn notify_filters(&self, kind: EventKind) {
        if !self.inner.filters.hooks(kind) {
            return;
        }
        let mut event = Event::new(kind);
        event.time = self.time();
        let filters = Rc::clone(&self.inner.filters);
        if let Err(failure) = run_guarded(|| {
            filters.send_event(&mut event);
            Ok(())
        }) {
            self.report_failure(&failure);
        }
    }

    // Disposal

    /// Disposes a widget and its descendants. Disposing twice is a no-op.
    pub fn dispose_widget(&self, id: WidgetId) -> Result<(), BridgeError> {
        self.check_device()?;
        {
            let registry = self.inner.registry.borrow();
            if registry.is_retired(id) {
                return Ok(());
            }
            registry.check_live(id)?;
        }

        let mut failures = Vec::new();
        self.release(id, &mut failures);
        self.report_release_failures(failures);
        Ok(())
    }

    fn release(&self, id: WidgetId, failures: &mut Vec<TaskFailure>) {
        let (table, children) = {
            let mut registry = self.inner.registry.borrow_mut();
            let Some(node) = registry.get_mut(id) else {
                return;
            };
            if !node.begin_dispose() {
                return;
            }
            (Rc::clone(node.events()), node.live_children().collect::<Vec<_>>())
        };

        if table.hooks(EventKind::Dispose) || self.inner.filters.hooks(EventKind::Dispose) {
            let mut event = Event::for_widget(EventKind::Dispose, id);
            event.time = self.time();
            if let Err(failure) = run_guarded(|| {
                self.dispatch(&table, &mut event);
                Ok(())
            }) {
                failures.push(failure);
            }
        }

        for child in children {
            self.release(child, failures);
        }
        // Children created by Dispose listeners are released too.
        let late: Vec<WidgetId> = self
            .inner
            .registry
            .borrow()
            .get(id)
            .map(|node| node.live_children().collect())
            .unwrap_or_default();
        for child in late {
            self.release(child, failures);
        }

        table.clear();
        let parent = self
            .inner
            .registry
            .borrow_mut()
            .remove(id)
            .and_then(|node| node.parent());
        if let Some(parent) = parent {
            self.mark_session_dirty(parent);
        }

        if let Some(session) = self.inner.session.borrow_mut().as_mut() {
            if let Err(err) = session.destroy(id) {
                warn!(target = "bridge", widget = %id, error = %err, "failed to send destroy");
            }
        }
        debug!(target = "display", widget = %id, "widget disposed");
        self.lifecycle().on_disposed(id);
    }

    fn report_release_failures(&self, failures: Vec<TaskFailure>) {
        let mut failures = failures.into_iter();
        let Some(first) = failures.next() else {
            return;
        };
        let suppressed = failures.count();
        if suppressed > 0 {
            warn!(target = "display", suppressed, "further dispose listeners failed");
        }
        self.report_failure(&first);
    }

    /// Tears the display down: pending work is dropped and blocked callers
    /// are released, every widget is disposed and the transport is closed.
    pub fn dispose(&self) {
        if self.inner.closing.replace(true) || self.inner.disposed.get() {
            return;
        }

        self.inner.queue.dispose();

        let roots = self.inner.registry.borrow().roots();
        let mut failures = Vec::new();
        for root in roots {
            self.release(root, &mut failures);
        }
        self.report_release_failures(failures);

        if let Some(mut session) = self.inner.session.borrow_mut().take() {
            session.close();
        }
        self.inner.registry.borrow_mut().clear();
        self.inner.filters.clear();
        self.inner.disposed.set(true);

        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current.ptr_eq(&Rc::downgrade(&self.inner)) {
                *current = Weak::new();
            }
        });
        debug!(target = "display", "display disposed");
    }

    // Event loop

    /// Runs at most one queued task, then flushes. Returns whether a task ran.
    pub fn read_and_dispatch(&self) -> bool {
        self.drain(false)
    }

    /// Runs queued tasks (all of them when `all`), then flushes.
    pub fn drain(&self, all: bool) -> bool {
        if self.check_device().is_err() {
            return false;
        }
        let ran = self
            .inner
            .queue
            .drain_with(all, &mut DisplayObserver { display: self });
        if let Err(err) = self.flush() {
            if !err.is_disposed() {
                warn!(target = "display", error = %err, "flush failed");
            }
        }
        ran
    }

    /// Idles until woken or the configured wait elapses.
    pub fn sleep(&self) -> bool {
        if !self.inner.queue.is_empty() {
            return true;
        }
        self.inner.idle.wait(self.inner.idle_wait)
    }

    /// Pumps the loop until `done` returns true or the display is disposed.
    pub fn run_until(&self, mut done: impl FnMut(&Display) -> bool) {
        while !self.is_disposed() && !done(self) {
            if !self.read_and_dispatch() {
                self.sleep();
            }
        }
    }
}

struct DisplayObserver<'a> {
    display: &'a Display,
}

impl DrainObserver for DisplayObserver<'_> {
    fn before_run(&mut self) {
        self.display
            .notify_filters(EventKind::PreExternalEventDispatch);
    }

    fn after_run(&mut self) {
        self.display
            .notify_filters(EventKind::PostExternalEventDispatch);
    }

    fn on_async_failure(&mut self, failure: &TaskFailure) {
        self.display.report_failure(failure);
    }
}

struct QueueSink {
    queue: Arc<DispatchQueue>,
    session: Uuid,
}

impl InboundSink for QueueSink {
    fn deliver(&self, message: InboundMessage) {
        let session = self.session;
        let submitted = self.queue.submit_async(move || {
            Display::with_current(|display| display.inbound_from(session, message))?;
            Ok(())
        });
        if let Err(err) = submitted {
            debug!(target = "bridge", error = %err, "inbound message dropped");
        }
    }

    fn disconnected(&self) {
        let session = self.session;
        let submitted = self.queue.submit_async(move || {
            Display::with_current(|display| display.lost_from(session))?;
            Ok(())
        });
        if let Err(err) = submitted {
            debug!(target = "bridge", error = %err, "disconnect notice dropped");
        }
    }
}
