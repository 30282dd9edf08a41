//! Participating device: a [`Reconciler`] driven by a reconnecting
//! WebSocket connection to the relay.
//!
//! [`Client::spawn`] starts a background connection task and returns a handle
//! plus a bounded receiver of [`ClientEvent`]s. The task reconnects with
//! exponential backoff and replays [`Reconciler::on_open`] on every open.

pub mod cache;
pub mod media;
pub mod reconciler;

pub use reconciler::{ClientRole, ReconcileOutcome, Reconciler};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::protocol::{decode, encode, Decoded, Frame};
use futures::{Sink, SinkExt, StreamExt};
use media::{resolve_title, SourceRef, TitleLookup};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Reconnect delay: starts at `initial`, doubles per failure, capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            next: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    Reconciled(ReconcileOutcome),
}

/// Handle to a device's relay connection
pub struct Client {
    outbound: mpsc::UnboundedSender<Frame>,
    connected: Arc<AtomicBool>,
    reconciler: Arc<Mutex<Reconciler>>,
    title_lookup_timeout: Duration,
    task: JoinHandle<()>,
}

impl Client {
    /// Start the connection task
    #[must_use = "the event receiver must be used to receive events"]
    pub fn spawn(
        config: ClientConfig,
        reconciler: Reconciler,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let connected = Arc::new(AtomicBool::new(false));
        let reconciler = Arc::new(Mutex::new(reconciler));

        let task = tokio::spawn(run_connection(
            config.url.clone(),
            Backoff::new(config.initial_backoff, config.max_backoff),
            reconciler.clone(),
            outbound_rx,
            connected.clone(),
            event_tx,
        ));

        let client = Self {
            outbound: outbound_tx,
            connected,
            reconciler,
            title_lookup_timeout: config.title_lookup_timeout,
            task,
        };
        (client, event_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn reconciler(&self) -> Arc<Mutex<Reconciler>> {
        self.reconciler.clone()
    }

    /// Queue a frame for the relay. Fails while disconnected; nothing is
    /// buffered for later delivery.
    pub fn send(&self, frame: Frame) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::Disconnected);
        }
        self.outbound
            .send(frame)
            .map_err(|_| ClientError::Disconnected)
    }

    /// Run a local action against the reconciler and send its frame.
    /// The local update stands even if sending fails.
    pub async fn perform<F>(&self, action: F) -> Result<(), ClientError>
    where
        F: FnOnce(&mut Reconciler) -> Result<Frame, ClientError>,
    {
        let frame = {
            let mut reconciler = self.reconciler.lock().await;
            action(&mut reconciler)?
        };
        self.send(frame)
    }

    /// Parse a link, look up its title and submit it
    pub async fn submit_clip(
        &self,
        raw_url: &str,
        manual_start: u32,
        lookup: &dyn TitleLookup,
    ) -> Result<(), ClientError> {
        let source = SourceRef::parse(raw_url, manual_start)?;
        let title = resolve_title(lookup, &source, self.title_lookup_timeout).await;
        self.perform(|r| r.submit(source, title)).await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_connection(
    url: String,
    mut backoff: Backoff,
    reconciler: Arc<Mutex<Reconciler>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    connected: Arc<AtomicBool>,
    event_tx: mpsc::Sender<ClientEvent>,
) {
    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                tracing::info!("Connected to relay at {}", url);
                backoff.reset();

                // Frames queued against the previous connection are stale
                while outbound_rx.try_recv().is_ok() {}

                let (mut sink, mut incoming) = stream.split();
                connected.store(true, Ordering::Release);
                emit(&event_tx, ClientEvent::Connected);

                let greetings = reconciler.lock().await.on_open();
                let mut open = true;
                for frame in &greetings {
                    if !send_frame(&mut sink, frame).await {
                        open = false;
                        break;
                    }
                }

                while open {
                    tokio::select! {
                        Some(frame) = outbound_rx.recv() => {
                            if !send_frame(&mut sink, &frame).await {
                                break;
                            }
                        }
                        msg = incoming.next() => {
                            match msg {
                                Some(Ok(WsMessage::Text(text))) => {
                                    let follow_ups =
                                        handle_inbound(text.as_str(), &reconciler, &event_tx).await;
                                    for frame in &follow_ups {
                                        if !send_frame(&mut sink, frame).await {
                                            open = false;
                                            break;
                                        }
                                    }
                                }
                                Some(Ok(WsMessage::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::warn!("Relay connection error: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                }

                connected.store(false, Ordering::Release);
                emit(&event_tx, ClientEvent::Disconnected);
                tracing::info!("Disconnected from relay");
            }
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", url, e);
            }
        }

        let delay = backoff.next_delay();
        tracing::debug!("Reconnecting in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

/// Reconcile one inbound frame; returns frames the outcome requires us to send
async fn handle_inbound(
    text: &str,
    reconciler: &Arc<Mutex<Reconciler>>,
    event_tx: &mpsc::Sender<ClientEvent>,
) -> Vec<Frame> {
    match decode(text) {
        Ok(Decoded::Frame(frame)) => {
            let mut reconciler = reconciler.lock().await;
            let outcome = reconciler.reconcile(frame);
            let follow_ups = match outcome {
                ReconcileOutcome::Relocated { .. } => reconciler.on_open(),
                _ => Vec::new(),
            };
            emit(event_tx, ClientEvent::Reconciled(outcome));
            follow_ups
        }
        Ok(Decoded::Passthrough { kind }) => {
            tracing::debug!("Ignoring unknown message type {}", kind);
            Vec::new()
        }
        Err(e) => {
            tracing::debug!("Dropping malformed frame: {}", e);
            Vec::new()
        }
    }
}

/// Send one frame; false once the connection is unusable
async fn send_frame<S>(sink: &mut S, frame: &Frame) -> bool
where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = match encode(frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode {}: {}", frame.message.kind(), e);
            return true;
        }
    };
    match sink.send(WsMessage::Text(text.into())).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to send {}: {}", frame.message.kind(), e);
            false
        }
    }
}

/// Emit an event without blocking the connection task. A full channel drops
/// the event with a warning.
fn emit(event_tx: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            tracing::warn!("Event channel full, dropping {:?}", dropped);
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!("Event channel closed, receiver dropped");
        }
    }
}
