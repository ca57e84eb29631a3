//! Realtime link to the gateway.
//!
//! The link owns one background task that connects, pumps frames both ways
//! and reconnects with exponential backoff when the socket drops. Commands
//! offered while the link is down are discarded rather than queued: channel
//! membership does not survive a reconnect, so the session controller
//! re-issues its joins on `LinkEvent::Connected` instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crewdesk_types::events::{ClientCommand, ServerEvent};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// What the link reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Event(ServerEvent),
}

/// Fire-and-forget sink for realtime commands.
pub trait Outbox: Send + Sync {
    /// Returns false when the command was discarded.
    fn send(&self, cmd: ClientCommand) -> bool;
}

/// Reconnect delay: starts at one second and doubles up to thirty.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { next: INITIAL_BACKOFF }
    }
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_BACKOFF);
        delay
    }

    pub fn reset(&mut self) {
        self.next = INITIAL_BACKOFF;
    }
}

pub struct RealtimeLink {
    commands: mpsc::Sender<ClientCommand>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl RealtimeLink {
    /// Start the link task. `url` is the gateway endpoint (see
    /// `HttpChatApi::gateway_url`); the token rides in the query string.
    pub fn spawn(url: &str, token: &str) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let connected = Arc::new(AtomicBool::new(false));

        let endpoint = format!("{url}?token={token}");
        let task = tokio::spawn(run(endpoint, cmd_rx, event_tx, connected.clone()));

        let link = Self {
            commands: cmd_tx,
            connected,
            task,
        };
        (link, event_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Outbox for RealtimeLink {
    fn send(&self, cmd: ClientCommand) -> bool {
        if !self.is_connected() {
            debug!("link down, discarding {}", cmd.name());
            return false;
        }
        match self.commands.try_send(cmd) {
            Ok(()) => true,
            Err(e) => {
                warn!("command buffer unavailable, discarding {}", e.into_inner().name());
                false
            }
        }
    }
}

enum Exit {
    /// Socket dropped; reconnect.
    Lost,
    /// Owner went away; stop for good.
    Shutdown,
}

async fn run(
    endpoint: String,
    mut commands: mpsc::Receiver<ClientCommand>,
    events: mpsc::Sender<LinkEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut backoff = Backoff::default();

    loop {
        match connect_async(endpoint.as_str()).await {
            Ok((socket, _)) => {
                backoff.reset();

                // Anything queued in the gap belongs to the previous session.
                while commands.try_recv().is_ok() {}

                connected.store(true, Ordering::Release);
                info!("realtime link connected");
                if events.send(LinkEvent::Connected).await.is_err() {
                    return;
                }

                let exit = pump(socket, &mut commands, &events).await;

                connected.store(false, Ordering::Release);
                match exit {
                    Exit::Shutdown => return,
                    Exit::Lost => {
                        info!("realtime link lost");
                        if events.send(LinkEvent::Disconnected).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("realtime connect failed: {}", e);
                if events.is_closed() {
                    return;
                }
            }
        }

        let delay = backoff.next_delay();
        debug!("reconnecting in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

async fn pump(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    commands: &mut mpsc::Receiver<ClientCommand>,
    events: &mpsc::Sender<LinkEvent>,
) -> Exit {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Exit::Shutdown;
                };
                let text = match serde_json::to_string(&cmd) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("could not encode {}: {}", cmd.name(), e);
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    return Exit::Lost;
                }
            }
            frame = stream.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        debug!("realtime read error: {}", e);
                        return Exit::Lost;
                    }
                    None => return Exit::Lost,
                };
                match frame {
                    WsMessage::Text(text) => match serde_json::from_str::<ServerEvent>(text.as_str()) {
                        Ok(event) => {
                            trace!("event {:?}", event);
                            if events.send(LinkEvent::Event(event)).await.is_err() {
                                return Exit::Shutdown;
                            }
                        }
                        Err(e) => warn!("unrecognized event ignored: {}", e),
                    },
                    // Pings are answered by tungstenite itself.
                    WsMessage::Close(_) => return Exit::Lost,
                    _ => {}
                }
            }
        }
    }
}
