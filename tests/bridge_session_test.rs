use std::cell::Cell;
use std::rc::Rc;
use std::thread;

use serde_json::json;
use widget_bridge::bridge::{EventPayload, InboundMessage, MemoryTransport, OutboundMessage};
use widget_bridge::{
    Attribute, AttrValue, BridgeConfig, BridgeError, Display, EventKind, HandleState, Listener,
    WidgetId, WidgetKind,
};

fn display(wait_for_client_ready: bool) -> (Display, MemoryTransport) {
    let config = BridgeConfig {
        wait_for_client_ready,
        idle_wait_ms: 5,
        ..BridgeConfig::default()
    };
    let display = Display::new(&config).unwrap();
    let wire = MemoryTransport::new();
    display.connect(Box::new(wire.clone())).unwrap();
    (display, wire)
}

fn references(messages: &[OutboundMessage], id: WidgetId) -> usize {
    messages
        .iter()
        .filter(|message| message.id() == Some(id))
        .count()
}

fn event(id: WidgetId, kind: EventKind) -> InboundMessage {
    InboundMessage::Event {
        id,
        kind,
        payload: EventPayload::default(),
    }
}

#[test]
fn widget_lifecycle_end_to_end() {
    let (display, wire) = display(false);
    let shell = display.create_widget(WidgetKind::Shell, None).unwrap();
    let button = display.create_widget(WidgetKind::Button, Some(shell)).unwrap();
    display.set_text(button, "Start").unwrap();

    display.flush().unwrap();
    let created = wire.take();
    assert_eq!(created.len(), 2);
    match &created[1] {
        OutboundMessage::Create {
            id,
            widget,
            parent,
            attributes,
            ..
        } => {
            assert_eq!(*id, button);
            assert_eq!(widget, "Button");
            assert_eq!(*parent, Some(shell));
            assert_eq!(attributes["text"], "Start");
        }
        other => panic!("expected create, got {other:?}"),
    }

    display.set_text(button, "Stop").unwrap();
    display.flush().unwrap();
    let updates = wire.take();
    assert_eq!(updates.len(), 1);
    match &updates[0] {
        OutboundMessage::Update { id, attributes, .. } => {
            assert_eq!(*id, button);
            assert_eq!(attributes.len(), 1);
            assert_eq!(attributes["text"], "Stop");
        }
        other => panic!("expected update, got {other:?}"),
    }

    display.dispose_widget(button).unwrap();
    display.flush().unwrap();
    let after = wire.take();
    assert_eq!(
        after[0],
        OutboundMessage::Destroy {
            id: button,
            name: format!("Button/{button}"),
        }
    );
    assert_eq!(references(&after, button), 1);
    assert_eq!(display.handle_state(button), HandleState::Destroyed);

    assert!(matches!(
        display.set_text(button, "ghost"),
        Err(BridgeError::WidgetDisposed(id)) if id == button
    ));
    display.flush().unwrap();
    assert_eq!(references(&wire.take(), button), 0);
    display.dispose();
}

#[test]
fn repeated_mutation_before_flush_sends_final_value() {
    let (display, wire) = display(false);
    let label = display.create_widget(WidgetKind::Label, None).unwrap();
    display.flush().unwrap();
    wire.take();

    display.set_text(label, "one").unwrap();
    display.set_text(label, "two").unwrap();
    display.set_text(label, "three").unwrap();
    display.flush().unwrap();

    let sent = wire.take();
    assert_eq!(sent.len(), 1);
    let OutboundMessage::Update { attributes, .. } = &sent[0] else {
        panic!("expected update");
    };
    assert_eq!(attributes["text"], "three");

    display.flush().unwrap();
    assert!(wire.take().is_empty());
    display.dispose();
}

#[test]
fn unchanged_value_is_not_resent() {
    let (display, wire) = display(false);
    let label = display.create_widget(WidgetKind::Label, None).unwrap();
    display.set_text(label, "same").unwrap();
    display.flush().unwrap();
    wire.take();

    assert!(!display.set_text(label, "same").unwrap());
    display.flush().unwrap();
    assert!(wire.take().is_empty());
    display.dispose();
}

#[test]
fn removed_child_leaves_no_gap_on_the_wire() {
    let (display, wire) = display(false);
    let shell = display.create_widget(WidgetKind::Shell, None).unwrap();
    let first = display.create_widget(WidgetKind::Label, Some(shell)).unwrap();
    let second = display.create_widget(WidgetKind::Label, Some(shell)).unwrap();
    let third = display.create_widget(WidgetKind::Label, Some(shell)).unwrap();
    display.flush().unwrap();
    wire.take();

    display.dispose_widget(second).unwrap();
    display.flush().unwrap();

    let sent = wire.take();
    let update = sent
        .iter()
        .find_map(|message| match message {
            OutboundMessage::Update { id, attributes, .. } if *id == shell => Some(attributes),
            _ => None,
        })
        .expect("shell update");
    assert_eq!(
        update["children"],
        json!([first.get(), third.get()])
    );
    assert_eq!(
        display.get(shell, Attribute::Children).unwrap(),
        Some(AttrValue::Widgets(vec![Some(first), None, Some(third)]))
    );
    display.dispose();
}

#[test]
fn parents_are_created_before_descendants() {
    let (display, wire) = display(false);
    let shell = display.create_widget(WidgetKind::Shell, None).unwrap();
    let group = display.create_widget(WidgetKind::Group, Some(shell)).unwrap();
    let _button = display.create_widget(WidgetKind::Button, Some(group)).unwrap();
    let _label = display.create_widget(WidgetKind::Label, Some(shell)).unwrap();
    display.flush().unwrap();

    let mut created = Vec::new();
    for message in wire.take() {
        if let OutboundMessage::Create { id, parent, .. } = message {
            if let Some(parent) = parent {
                assert!(created.contains(&parent), "{id} created before {parent}");
            }
            created.push(id);
        }
    }
    assert_eq!(created.len(), 4);
    display.dispose();
}

#[test]
fn inbound_events_run_on_the_owning_thread() {
    let (display, _wire) = display(false);
    let button = display.create_widget(WidgetKind::Button, None).unwrap();
    let owner = thread::current().id();
    let hits = Rc::new(Cell::new(0));
    let seen = Rc::clone(&hits);
    display
        .hook(
            button,
            EventKind::Selection,
            Listener::new(move |event| {
                assert_eq!(thread::current().id(), owner);
                assert_eq!(event.widget, Some(button));
                seen.set(seen.get() + 1);
            }),
        )
        .unwrap();

    let sink = display.session_sink().unwrap();
    thread::spawn(move || sink.deliver(event(button, EventKind::Selection)))
        .join()
        .unwrap();
    assert_eq!(hits.get(), 0);

    display.drain(true);
    assert_eq!(hits.get(), 1);
    display.dispose();
}

#[test]
fn events_for_unknown_or_destroyed_widgets_are_dropped() {
    let (display, _wire) = display(false);
    let button = display.create_widget(WidgetKind::Button, None).unwrap();
    let hits = Rc::new(Cell::new(0));
    let seen = Rc::clone(&hits);
    display
        .hook(
            button,
            EventKind::Selection,
            Listener::new(move |_| seen.set(seen.get() + 1)),
        )
        .unwrap();
    display.dispose_widget(button).unwrap();

    display.handle_inbound(event(button, EventKind::Selection));
    display.handle_inbound(event(WidgetId::new(4242), EventKind::Selection));
    assert_eq!(hits.get(), 0);
    assert!(!display.is_disposed());
    display.dispose();
}

#[test]
fn transport_failure_kills_the_session() {
    let (display, wire) = display(false);
    let label = display.create_widget(WidgetKind::Label, None).unwrap();
    display.flush().unwrap();
    wire.take();

    wire.disconnect();
    display.set_text(label, "lost").unwrap();
    assert!(matches!(display.flush(), Err(BridgeError::Transport(_))));
    assert!(!display.is_connected());

    display.set_text(label, "still lost").unwrap();
    assert!(display.flush().unwrap().is_empty());
    assert!(wire.messages().is_empty());
    display.dispose();
}

#[test]
fn renderer_disconnect_marks_session_dead() {
    let (display, wire) = display(false);
    display.create_widget(WidgetKind::Shell, None).unwrap();

    display.session_sink().unwrap().disconnected();
    display.drain(true);
    assert!(!display.is_connected());
    assert!(wire.messages().is_empty());
    display.dispose();
}

#[test]
fn replaced_session_ignores_its_old_sink() {
    let config = BridgeConfig {
        wait_for_client_ready: false,
        idle_wait_ms: 5,
        ..BridgeConfig::default()
    };
    let display = Display::new(&config).unwrap();
    let old_sink = display.inbound_sink();
    let old_wire = MemoryTransport::new();
    display.connect(Box::new(old_wire.clone())).unwrap();
    let button = display.create_widget(WidgetKind::Button, None).unwrap();
    let hits = Rc::new(Cell::new(0));
    let seen = Rc::clone(&hits);
    display
        .hook(
            button,
            EventKind::Selection,
            Listener::new(move |_| seen.set(seen.get() + 1)),
        )
        .unwrap();

    let new_sink = display.inbound_sink();
    let wire = MemoryTransport::new();
    display.connect(Box::new(wire.clone())).unwrap();
    assert!(old_wire.is_closed());

    old_sink.deliver(event(button, EventKind::Selection));
    old_sink.disconnected();
    display.drain(true);
    assert!(display.is_connected());
    assert_eq!(hits.get(), 0);

    new_sink.deliver(event(button, EventKind::Selection));
    display.drain(true);
    assert_eq!(hits.get(), 1);

    display.flush().unwrap();
    assert!(matches!(
        wire.take()[0],
        OutboundMessage::Create { id, .. } if id == button
    ));

    new_sink.disconnected();
    display.drain(true);
    assert!(!display.is_connected());
    display.dispose();
}

#[test]
fn added_child_is_created_before_parent_lists_it() {
    let (display, wire) = display(false);
    let shell = display.create_widget(WidgetKind::Shell, None).unwrap();
    display.flush().unwrap();
    wire.take();

    let group = display.create_widget(WidgetKind::Group, Some(shell)).unwrap();
    display.create_widget(WidgetKind::Button, Some(group)).unwrap();
    display.flush().unwrap();

    let mut created = vec![shell];
    for message in wire.take() {
        match message {
            OutboundMessage::Create { id, parent, .. } => {
                assert!(parent.is_some_and(|parent| created.contains(&parent)));
                created.push(id);
            }
            OutboundMessage::Update { id, attributes, .. } => {
                assert!(created.contains(&id));
                if let Some(children) = attributes.get("children") {
                    for child in children.as_array().unwrap() {
                        let child = WidgetId::new(child.as_u64().unwrap());
                        assert!(created.contains(&child), "{id} listed {child} before its create");
                    }
                }
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    assert_eq!(created.len(), 3);
    display.dispose();
}

#[test]
fn custom_message_without_live_session_is_dropped() {
    let (display, wire) = display(false);
    let shell = display.create_widget(WidgetKind::Shell, None).unwrap();
    display.flush().unwrap();
    wire.take();

    display.session_lost();
    assert!(!display.send_custom(shell, "Focus", json!({})).unwrap());
    assert!(wire.messages().is_empty());
    display.dispose();
}

#[test]
fn listener_queries_after_dispose_are_errors() {
    let (display, _wire) = display(false);
    let shell = display.create_widget(WidgetKind::Shell, None).unwrap();
    let filter = Listener::new(|_| {});
    display.add_filter(EventKind::KeyDown, filter.clone()).unwrap();
    assert!(!display.hooks(shell, EventKind::KeyDown).unwrap());
    display.dispose();

    assert!(matches!(
        display.add_filter(EventKind::KeyDown, filter.clone()),
        Err(BridgeError::DeviceDisposed)
    ));
    assert!(matches!(
        display.remove_filter(EventKind::KeyDown, &filter),
        Err(BridgeError::DeviceDisposed)
    ));
    assert!(matches!(
        display.hooks(shell, EventKind::KeyDown),
        Err(BridgeError::DeviceDisposed)
    ));
}

#[test]
fn flushes_wait_for_client_ready() {
    let (display, wire) = display(true);
    let shell = display.create_widget(WidgetKind::Shell, None).unwrap();
    display.set_text(shell, "Main").unwrap();
    assert!(display.flush().unwrap().is_empty());
    assert!(wire.messages().is_empty());
    assert_eq!(display.handle_state(shell), HandleState::Uncreated);

    display.handle_inbound(InboundMessage::ClientReady { session: None });
    let sent = wire.take();
    assert_eq!(sent.len(), 2);
    let OutboundMessage::Properties { properties } = &sent[0] else {
        panic!("expected properties first, got {:?}", sent[0]);
    };
    assert_eq!(properties["theme"], "light");
    assert!(matches!(sent[1], OutboundMessage::Create { id, .. } if id == shell));
    display.dispose();
}

#[test]
fn repeated_client_ready_resends_the_tree() {
    let (display, wire) = display(true);
    display.handle_inbound(InboundMessage::ClientReady { session: None });
    let shell = display.create_widget(WidgetKind::Shell, None).unwrap();
    let label = display.create_widget(WidgetKind::Label, Some(shell)).unwrap();
    display.set_text(label, "kept").unwrap();
    display.flush().unwrap();
    wire.take();

    display.handle_inbound(InboundMessage::ClientReady { session: None });
    let resent = wire.take();
    let creates: Vec<&OutboundMessage> = resent
        .iter()
        .filter(|message| matches!(message, OutboundMessage::Create { .. }))
        .collect();
    assert_eq!(creates.len(), 2);
    let OutboundMessage::Create { attributes, .. } = creates[1] else {
        unreachable!();
    };
    assert_eq!(attributes["text"], "kept");
    display.dispose();
}

#[test]
fn custom_messages_follow_pending_state() {
    let (display, wire) = display(false);
    let shell = display.create_widget(WidgetKind::Shell, None).unwrap();
    let button = display.create_widget(WidgetKind::Button, Some(shell)).unwrap();

    assert!(display
        .send_custom(button, "Focus", json!({"reason": "keyboard"}))
        .unwrap());

    let sent = wire.take();
    assert_eq!(sent.len(), 3);
    assert!(matches!(sent[0], OutboundMessage::Create { id, .. } if id == shell));
    assert!(matches!(sent[1], OutboundMessage::Create { id, .. } if id == button));
    assert_eq!(
        sent[2],
        OutboundMessage::Custom {
            id: button,
            name: format!("Button/{button}/Focus"),
            payload: json!({"reason": "keyboard"}),
        }
    );
    display.dispose();
}

#[test]
fn registered_implementation_names_lose_their_prefix() {
    let (display, wire) = display(false);
    assert_eq!(display.register_kind(WidgetKind::Button, "PlatformButton"), "Button");
    assert_eq!(
        display.register_kind(WidgetKind::Canvas, "PlatformChartCanvas"),
        "ChartCanvas"
    );
    let canvas = display.create_widget(WidgetKind::Canvas, None).unwrap();
    display.flush().unwrap();

    let sent = wire.take();
    assert!(matches!(
        &sent[0],
        OutboundMessage::Create { id, widget, name, .. }
            if *id == canvas && widget == "ChartCanvas" && *name == format!("ChartCanvas/{canvas}")
    ));
    display.dispose();
}

#[test]
fn dispose_destroys_every_remote_handle() {
    let (display, wire) = display(false);
    let shell = display.create_widget(WidgetKind::Shell, None).unwrap();
    let button = display.create_widget(WidgetKind::Button, Some(shell)).unwrap();
    display.flush().unwrap();
    wire.take();

    display.dispose();
    let destroyed: Vec<WidgetId> = wire
        .take()
        .iter()
        .filter(|message| matches!(message, OutboundMessage::Destroy { .. }))
        .filter_map(OutboundMessage::id)
        .collect();
    assert_eq!(destroyed, vec![button, shell]);
    assert!(wire.is_closed());
}
