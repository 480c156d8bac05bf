use std::cell::Cell;
use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use widget_bridge::{
    BridgeConfig, Display, EventKind, Listener, WebSocketTransport, WidgetId, WidgetKind,
};

fn main() -> Result<()> {
    setup_tracing();

    let config = BridgeConfig::from_env().context("load bridge config")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("bridge host runtime")?;

    let display = Display::new(&config)?;
    let transport = WebSocketTransport::bind(config.bind, display.inbound_sink())
        .context("bind renderer transport")?;
    let bound_addr = transport.local_addr();
    display.connect(Box::new(transport))?;
    println!("BRIDGE_HOST_READY {bound_addr}");

    let dispatcher = display.dispatcher();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target = "display", "interrupt received, shutting down");
            let _ = dispatcher.submit_async(|| {
                Display::with_current(Display::dispose)?;
                Ok(())
            });
        }
    });

    build_demo(&display)?;
    let endpoint = BridgeConfig::endpoint_for(bound_addr)?;
    info!(target = "display", %endpoint, "host ready");

    display.run_until(|display| !display.is_connected());
    display.dispose();
    runtime.shutdown_background();
    Ok(())
}

/// Shell with a label and a button; each click updates the label.
fn build_demo(display: &Display) -> Result<()> {
    display.register_kind(WidgetKind::Shell, "PlatformShell");
    display.register_kind(WidgetKind::Label, "PlatformLabel");
    display.register_kind(WidgetKind::Button, "PlatformButton");

    let shell = display.create_widget(WidgetKind::Shell, None)?;
    display.set_text(shell, "Widget Bridge")?;
    let label = display.create_widget(WidgetKind::Label, Some(shell))?;
    display.set_text(label, "No clicks yet")?;
    let button = display.create_widget(WidgetKind::Button, Some(shell))?;
    display.set_text(button, "Click me")?;

    let clicks = Rc::new(Cell::new(0u32));
    display.hook(
        button,
        EventKind::Selection,
        Listener::new(move |_| {
            clicks.set(clicks.get() + 1);
            update_label(label, clicks.get());
        }),
    )?;
    Ok(())
}

fn update_label(label: WidgetId, clicks: u32) {
    let text = match clicks {
        1 => String::from("Clicked once"),
        n => format!("Clicked {n} times"),
    };
    match Display::with_current(|display| display.set_text(label, text)) {
        Ok(Ok(_)) => {}
        Ok(Err(err)) | Err(err) => {
            warn!(target = "display", widget = %label, error = %err, "failed to update label");
        }
    }
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}
