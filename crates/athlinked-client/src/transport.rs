//! WebSocket transport for one page/tab.
//!
//! [`SessionController::connect`] opens the socket, announces the user
//! straight away and hands back a channel of decoded [`ServerEvent`]s.
//! Sends are fire-and-forget: nothing is queued across reconnects and
//! nothing is retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use athlinked_shared::protocol::{
    Announce, ClientEvent, MarkReadRequest, SendMessageRequest, ServerEvent,
};
use athlinked_shared::{ConversationId, UserId};

use crate::error::ClientError;
use crate::session::{Session, SessionState};

const EVENT_BUFFER: usize = 256;
const OUTGOING_BUFFER: usize = 64;

enum Outgoing {
    Event(ClientEvent),
    Close,
}

pub struct SessionController {
    url: String,
    user: UserId,
    session: Arc<Mutex<Session>>,
    /// Bumped on every close so a stale reader cannot tear down a newer
    /// connection.
    epoch: Arc<AtomicU64>,
    outgoing: Option<mpsc::Sender<Outgoing>>,
    events: mpsc::Sender<ServerEvent>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Connect to `url` (e.g. `ws://host:8080/ws`) and announce `user`.
    ///
    /// The returned receiver yields every server event for the lifetime of
    /// the controller, across reconnects.
    pub async fn connect(
        url: impl Into<String>,
        user: UserId,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), ClientError> {
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        let mut controller = Self {
            url: url.into(),
            user,
            session: Arc::new(Mutex::new(Session::new())),
            epoch: Arc::new(AtomicU64::new(0)),
            outgoing: None,
            events,
            writer: None,
            reader: None,
        };
        controller.open().await?;
        Ok((controller, events_rx))
    }

    async fn open(&mut self) -> Result<(), ClientError> {
        self.session.lock().await.begin_connect()?;

        let stream = match connect_async(self.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                self.session.lock().await.disconnect();
                return Err(e.into());
            }
        };
        self.session.lock().await.connected()?;

        let (mut sink, mut read) = stream.split();

        let announce = ClientEvent::Announce(Announce {
            user_id: self.user.as_str().to_string(),
        });
        if let Err(e) = sink.send(Message::Text(announce.to_json()?)).await {
            self.session.lock().await.disconnect();
            return Err(e.into());
        }
        self.session.lock().await.announce(self.user.clone())?;
        info!(url = %self.url, user = %self.user, "Session announced");

        let (outgoing, mut outgoing_rx) = mpsc::channel::<Outgoing>(OUTGOING_BUFFER);
        let writer = tokio::spawn(async move {
            while let Some(item) = outgoing_rx.recv().await {
                let frame = match item {
                    Outgoing::Event(event) => match event.to_json() {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            warn!(event = event.name(), error = %e, "Failed to encode event");
                            continue;
                        }
                    },
                    Outgoing::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = sink.send(frame).await {
                    warn!(error = %e, "WebSocket send failed");
                    break;
                }
            }
        });

        let events = self.events.clone();
        let session = Arc::clone(&self.session);
        let epoch = Arc::clone(&self.epoch);
        let opened_in = epoch.load(Ordering::SeqCst);
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerEvent::from_json(&text) {
                        Ok(event) => {
                            if events.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Undecodable server frame"),
                    },
                    Ok(Message::Close(_)) => {
                        debug!("Server closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
            let mut session = session.lock().await;
            if epoch.load(Ordering::SeqCst) == opened_in {
                session.disconnect();
            }
        });

        self.outgoing = Some(outgoing);
        self.writer = Some(writer);
        self.reader = Some(reader);
        Ok(())
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state().clone()
    }

    pub async fn send_message(&self, request: SendMessageRequest) -> Result<(), ClientError> {
        self.push(ClientEvent::SendMessage(request)).await
    }

    pub async fn mark_read(&self, conversation_id: &ConversationId) -> Result<(), ClientError> {
        self.push(ClientEvent::MarkRead(MarkReadRequest {
            conversation_id: conversation_id.as_str().to_string(),
        }))
        .await
    }

    async fn push(&self, event: ClientEvent) -> Result<(), ClientError> {
        if !self.session.lock().await.is_announced() {
            return Err(ClientError::NotAnnounced);
        }
        let outgoing = self.outgoing.as_ref().ok_or(ClientError::Closed)?;
        outgoing
            .send(Outgoing::Event(event))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Send a close frame and tear the session down.
    pub async fn close(&mut self) {
        if let Some(outgoing) = self.outgoing.take() {
            let _ = outgoing.send(Outgoing::Close).await;
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let mut session = self.session.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        session.disconnect();
        info!(user = %self.user, "Session closed");
    }

    /// Drop the current socket and open a fresh one. The user is announced
    /// again; nothing from the previous connection carries over.
    pub async fn reconnect(&mut self) -> Result<(), ClientError> {
        self.close().await;
        self.open().await
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
