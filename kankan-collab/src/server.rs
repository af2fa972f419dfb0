//! WebSocket relay for board rooms.
//!
//! ```text
//! Peer A ──┐                                   ┌──► Peer B
//!          ├── RelayFrame ── Room (app/board) ─┤
//! Peer C ──┘        (BroadcastGroup fan-out)   └──► Peer C
//! ```
//!
//! The relay only forwards frames between members of a room and announces
//! joins and departures. It never holds board state and never answers sync
//! actions itself, so every peer stays an equal replica.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, RoomManager};
use crate::config::RelayConfig;
use crate::protocol::{FrameKind, RelayFrame};

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub frames_relayed: u64,
}

#[derive(Default)]
struct AtomicRelayStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    frames_relayed: AtomicU64,
}

/// Rooms a single connection is a member of.
struct Membership {
    group: Arc<BroadcastGroup>,
    forwarder: JoinHandle<()>,
}

pub struct RelayServer {
    config: RelayConfig,
    listener: TcpListener,
    room_manager: Arc<RoomManager>,
    stats: Arc<AtomicRelayStats>,
}

impl RelayServer {
    /// Bind the listening socket.
    pub async fn bind(config: RelayConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        Ok(Self {
            room_manager: Arc::new(RoomManager::new(config.room_capacity)),
            config,
            listener,
            stats: Arc::new(AtomicRelayStats::default()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// `ws://` URL clients connect to.
    pub fn url(&self) -> std::io::Result<String> {
        Ok(format!("ws://{}", self.local_addr()?))
    }

    pub fn room_manager(&self) -> Arc<RoomManager> {
        self.room_manager.clone()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            frames_relayed: self.stats.frames_relayed.load(Ordering::Relaxed),
        }
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> std::io::Result<()> {
        log::info!(
            "Relay listening on {} (room capacity {})",
            self.local_addr()?,
            self.config.room_capacity
        );

        loop {
            let (stream, addr) = self.listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let room_manager = self.room_manager.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, room_manager, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Serve one WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        room_manager: Arc<RoomManager>,
        stats: Arc<AtomicRelayStats>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);

        // Frames for this connection, fed by the per-room forwarders.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Arc<RelayFrame>>();
        let mut peer_id: Option<Uuid> = None;
        let mut memberships: HashMap<String, Membership> = HashMap::new();

        let result: Result<(), Box<dyn std::error::Error + Send + Sync>> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let frame = match RelayFrame::decode(&data) {
                                    Ok(frame) => frame,
                                    Err(e) => {
                                        log::warn!("Failed to decode frame from {addr}: {e}");
                                        continue;
                                    }
                                };
                                let own = *peer_id.get_or_insert(frame.peer_id);
                                if frame.peer_id != own {
                                    log::warn!(
                                        "Dropping frame from {addr} with foreign peer id {}",
                                        frame.peer_id
                                    );
                                    continue;
                                }
                                Self::handle_frame(
                                    frame,
                                    &room_manager,
                                    &stats,
                                    &out_tx,
                                    &mut memberships,
                                )
                                .await;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }

                    Some(frame) = out_rx.recv() => {
                        let encoded = frame.encode()?;
                        ws_sender.send(Message::Binary(encoded.into())).await?;
                    }
                }
            }
            Ok(())
        }
        .await;

        // Cleanup: leave every room this connection joined
        if let Some(pid) = peer_id {
            for (room, membership) in memberships.drain() {
                Self::leave_room(pid, &room, membership, &room_manager).await;
            }
        }
        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn handle_frame(
        frame: RelayFrame,
        room_manager: &Arc<RoomManager>,
        stats: &Arc<AtomicRelayStats>,
        out_tx: &mpsc::UnboundedSender<Arc<RelayFrame>>,
        memberships: &mut HashMap<String, Membership>,
    ) {
        match frame.kind {
            FrameKind::Join => {
                if memberships.contains_key(&frame.room) {
                    return;
                }
                let peer = frame.peer_id;
                let group = room_manager.get_or_create(&frame.room).await;
                let (mut rx, existing) = group.add_peer(peer).await;

                // Tell the newcomer who is already here.
                for other in existing {
                    let joined = RelayFrame::peer_joined(other, &frame.room, Some(peer));
                    let _ = out_tx.send(Arc::new(joined));
                }
                group.broadcast(RelayFrame::peer_joined(peer, &frame.room, None));

                let out = out_tx.clone();
                let room = frame.room.clone();
                let forwarder = tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(frame) => {
                                if frame.is_for(peer) && out.send(frame).is_err() {
                                    break;
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("Peer {peer} lagged by {n} frames in {room}");
                            }
                            Err(_) => break,
                        }
                    }
                });
                log::info!("Peer {peer} joined room {}", frame.room);
                memberships.insert(frame.room, Membership { group, forwarder });
            }

            FrameKind::Leave => {
                if let Some(membership) = memberships.remove(&frame.room) {
                    Self::leave_room(frame.peer_id, &frame.room, membership, room_manager).await;
                }
            }

            FrameKind::Action => match memberships.get(&frame.room) {
                Some(membership) => {
                    log::trace!(
                        "Relaying '{}' from {} in {} ({} bytes)",
                        frame.action,
                        frame.peer_id,
                        frame.room,
                        frame.payload.len()
                    );
                    stats.frames_relayed.fetch_add(1, Ordering::Relaxed);
                    membership.group.broadcast(frame);
                }
                None => log::debug!("Dropping action for unjoined room {}", frame.room),
            },

            FrameKind::PeerJoined | FrameKind::PeerLeft => {
                log::debug!("Ignoring relay-only frame {:?} from client", frame.kind);
            }
        }
    }

    async fn leave_room(
        peer: Uuid,
        room: &str,
        membership: Membership,
        room_manager: &RoomManager,
    ) {
        membership.forwarder.abort();
        if membership.group.remove_peer(&peer).await {
            membership.group.broadcast(RelayFrame::peer_left(peer, room));
        }
        if room_manager.remove_if_empty(room).await {
            log::info!("Room {room} removed (empty)");
        }
        log::info!("Peer {peer} left room {room}");
    }
}
