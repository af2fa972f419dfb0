//! Transport over the WebSocket relay.
//!
//! One connection carries every room this process joins. A writer task
//! drains the outgoing frame channel into the socket; a reader task decodes
//! incoming frames and routes them to the room they belong to.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use super::{PeerId, RoomEvent, RoomHandle, RoomKey, RoomLink, Transport};
use crate::protocol::{FrameKind, ProtocolError, RelayFrame};

type RoomRoutes = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<RoomEvent>>>>;

fn lock_routes(
    routes: &RoomRoutes,
) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<RoomEvent>>> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RelayTransport {
    peer_id: PeerId,
    outgoing: mpsc::UnboundedSender<RelayFrame>,
    routes: RoomRoutes,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RelayTransport {
    /// Connect to a relay at `url` (e.g. `ws://127.0.0.1:9090`).
    pub async fn connect(url: &str) -> Result<Self, ProtocolError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            log::warn!("Failed to connect to relay {url}: {e}");
            ProtocolError::ConnectionClosed
        })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let peer_id = Uuid::new_v4();
        let connected = Arc::new(AtomicBool::new(true));

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RelayFrame>();
        let writer_connected = connected.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let encoded = match frame.encode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::warn!("Dropping unencodable frame: {e}");
                        continue;
                    }
                };
                if ws_writer.send(Message::Binary(encoded.into())).await.is_err() {
                    break;
                }
            }
            writer_connected.store(false, Ordering::Release);
            let _ = ws_writer.close().await;
        });

        // Reader task: route incoming frames to their rooms
        let routes: RoomRoutes = Arc::new(Mutex::new(HashMap::new()));
        let reader_routes = routes.clone();
        let reader_connected = connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match RelayFrame::decode(&data) {
                        Ok(frame) => Self::route(&reader_routes, peer_id, frame),
                        Err(e) => log::warn!("Failed to decode relay frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            log::info!("Relay connection for peer {peer_id} closed");
            reader_connected.store(false, Ordering::Release);
            // Closing every route ends the rooms' event streams.
            lock_routes(&reader_routes).clear();
        });

        log::info!("Connected to relay {url} as peer {peer_id}");
        Ok(Self {
            peer_id,
            outgoing: out_tx,
            routes,
            connected,
            reader,
            writer,
        })
    }

    fn route(routes: &RoomRoutes, own: PeerId, frame: RelayFrame) {
        if !frame.is_for(own) {
            return;
        }
        let event = match frame.kind {
            FrameKind::PeerJoined => RoomEvent::PeerJoined(frame.peer_id),
            FrameKind::PeerLeft => RoomEvent::PeerLeft(frame.peer_id),
            FrameKind::Action => match String::from_utf8(frame.payload) {
                Ok(body) => RoomEvent::Message {
                    from: frame.peer_id,
                    action: frame.action,
                    body,
                },
                Err(_) => {
                    log::warn!("Dropping non-UTF-8 action from {}", frame.peer_id);
                    return;
                }
            },
            FrameKind::Join | FrameKind::Leave => return,
        };
        if let Some(route) = lock_routes(routes).get(&frame.room) {
            let _ = route.send(event);
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Transport for RelayTransport {
    fn join(&self, app_id: &str, room: &str) -> Result<RoomHandle, ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let key = RoomKey::new(app_id, room).to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        lock_routes(&self.routes).insert(key.clone(), tx);
        self.outgoing
            .send(RelayFrame::join(self.peer_id, &key))
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        let link = RelayLink {
            peer_id: self.peer_id,
            room: key,
            outgoing: self.outgoing.clone(),
            routes: self.routes.clone(),
            left: AtomicBool::new(false),
        };
        Ok(RoomHandle {
            link: Arc::new(link),
            events: rx,
        })
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

struct RelayLink {
    peer_id: PeerId,
    room: String,
    outgoing: mpsc::UnboundedSender<RelayFrame>,
    routes: RoomRoutes,
    left: AtomicBool,
}

impl RoomLink for RelayLink {
    fn local_peer(&self) -> PeerId {
        self.peer_id
    }

    fn send(&self, target: Option<PeerId>, action: &str, body: &str) {
        if self.left.load(Ordering::Acquire) {
            return;
        }
        let payload = body.as_bytes().to_vec();
        let frame = RelayFrame::action(self.peer_id, &self.room, target, action, payload);
        if self.outgoing.send(frame).is_err() {
            log::debug!("Relay connection gone, dropping '{action}' for {}", self.room);
        }
    }

    fn leave(&self) {
        if self.left.swap(true, Ordering::AcqRel) {
            return;
        }
        lock_routes(&self.routes).remove(&self.room);
        let _ = self.outgoing.send(RelayFrame::leave(self.peer_id, &self.room));
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.leave();
    }
}
