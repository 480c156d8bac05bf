use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::protocol::{InboundMessage, OutboundMessage};
use super::transport::{InboundSink, Transport, TransportError};

/// WebSocket server the renderer connects to.
///
/// A dedicated worker thread runs a current-thread runtime that accepts a
/// single renderer connection. Outbound messages are encoded on the owning
/// thread and handed to the worker over a channel; inbound frames are decoded
/// on the worker and passed to the [`InboundSink`].
pub struct WebSocketTransport {
    local_addr: SocketAddr,
    outbound: Option<mpsc::UnboundedSender<String>>,
    closed: Arc<AtomicBool>,
}

impl WebSocketTransport {
    pub fn bind(addr: SocketAddr, sink: Arc<dyn InboundSink>) -> Result<Self, TransportError> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (outbound, receiver) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let worker_closed = Arc::clone(&closed);

        thread::Builder::new()
            .name("bridge-transport".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        error!(target = "transport", error = %err, "failed to start transport runtime");
                        worker_closed.store(true, Ordering::SeqCst);
                        sink.disconnected();
                        return;
                    }
                };

                if let Err(err) = runtime.block_on(serve(listener, receiver, sink.as_ref())) {
                    warn!(target = "transport", error = %err, "renderer connection failed");
                }
                worker_closed.store(true, Ordering::SeqCst);
                sink.disconnected();
            })?;

        info!(target = "transport", addr = %local_addr, "waiting for renderer");
        Ok(Self {
            local_addr,
            outbound: Some(outbound),
            closed,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for WebSocketTransport {
    fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed)?;
        let text = message.encode()?;
        outbound.send(text).map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        if self.outbound.take().is_some() {
            debug!(target = "transport", addr = %self.local_addr, "closing renderer transport");
        }
    }

    fn is_open(&self) -> bool {
        self.outbound.is_some() && !self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn serve(
    listener: std::net::TcpListener,
    mut outbound: mpsc::UnboundedReceiver<String>,
    sink: &dyn InboundSink,
) -> Result<(), TransportError> {
    let listener = TcpListener::from_std(listener)?;

    // Messages sent before the renderer connects are held until the handshake.
    let mut backlog = Vec::new();
    let stream = loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                info!(target = "transport", %peer, "renderer connected");
                break stream;
            }
            message = outbound.recv() => match message {
                Some(text) => backlog.push(text),
                None => return Ok(()),
            },
        }
    };

    let mut socket = tokio_tungstenite::accept_async(stream).await?;
    for text in backlog {
        socket.send(Message::Text(text.into())).await?;
    }

    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(text) => socket.send(Message::Text(text.into())).await?,
                None => {
                    let _ = socket.close(None).await;
                    return Ok(());
                }
            },
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => match InboundMessage::decode(text.as_str()) {
                    Ok(message) => sink.deliver(message),
                    Err(err) => {
                        warn!(target = "transport", error = %err, "dropping malformed message");
                    }
                },
                Some(Ok(Message::Ping(data))) => socket.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(_))) | None => {
                    info!(target = "transport", "renderer disconnected");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
            },
        }
    }
}
