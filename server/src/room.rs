use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{error::TryRecvError, unbounded_channel, UnboundedReceiver, UnboundedSender};

use hub::{ClientFrame, ConnectionId, Merge, PresenceUpdate, RoomState, ServerFrame};

use crate::fanout::{ConnectionTx, Fanout};
use crate::registry::{RoomEntry, RoomRegistry};

#[derive(Debug)]
pub enum RoomCommand {
    Join {
        connection_id: ConnectionId,
        tx: ConnectionTx,
    },
    Frame {
        from: ConnectionId,
        frame: ClientFrame,
    },
    Leave {
        from: ConnectionId,
    },
}

pub type RoomTx = UnboundedSender<RoomCommand>;

struct RoomWorker {
    name: String,
    state: RoomState,
    fanout: Fanout,
    merge: Arc<dyn Merge>,
    registry: RoomRegistry,
    occupancy: Arc<AtomicUsize>,
}

/// Spawns the room's single-owner task. Every mutation of the room's state
/// goes through its command queue, so merge + broadcast is atomic with
/// respect to other frames for the same room; distinct rooms run on
/// distinct tasks.
pub(crate) fn spawn_room(registry: RoomRegistry, name: &str) -> RoomEntry {
    let (tx, mut rx) = unbounded_channel::<RoomCommand>();
    let occupancy = Arc::new(AtomicUsize::new(0));
    let merge = registry.merge();
    let mut worker = RoomWorker {
        name: name.to_string(),
        state: RoomState::new(merge.as_ref()),
        fanout: Fanout::new(),
        merge,
        registry,
        occupancy: occupancy.clone(),
    };

    tokio::spawn(async move {
        log::info!("room {:?} - started", worker.name);
        while let Some(command) = rx.recv().await {
            worker.handle(command);
            if worker.state.is_empty() && worker.try_retire(&mut rx) {
                break;
            }
        }
        log::info!("room {:?} - terminated", worker.name);
    });

    RoomEntry { tx, occupancy }
}

impl RoomWorker {
    fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join { connection_id, tx } => self.handle_join(connection_id, tx),
            RoomCommand::Frame { from, frame } => self.handle_frame(from, frame),
            RoomCommand::Leave { from } => {
                // closing an already-detached connection is a no-op
                if self.state.contains(&from) {
                    self.drop_connections(vec![from]);
                }
            }
        }
    }

    fn handle_join(&mut self, connection_id: ConnectionId, tx: ConnectionTx) {
        self.state.join(connection_id);
        self.fanout.insert(connection_id, tx);
        self.occupancy
            .store(self.state.connections().len(), Ordering::Relaxed);
        log::info!("connection {} joined room {:?}", connection_id, self.name);

        // base state first, then presence, before any later broadcast
        let synced = self.fanout.send(
            &connection_id,
            ServerFrame::Sync {
                state: self.state.document().to_vec(),
            },
        ) && self.fanout.send(
            &connection_id,
            ServerFrame::PresenceSnapshot {
                entries: self.state.presence_snapshot(),
            },
        );
        if !synced {
            self.drop_connections(vec![connection_id]);
        }
    }

    fn handle_frame(&mut self, from: ConnectionId, frame: ClientFrame) {
        if !self.state.contains(&from) {
            log::warn!("frame from detached connection {}", from);
            return;
        }
        match frame {
            ClientFrame::Update { delta } => self.handle_update(from, &delta),
            ClientFrame::Presence(update) => {
                self.state.apply_presence(from, &update);
                let dead = self.fanout.broadcast(
                    self.state.connections(),
                    Some(from),
                    &ServerFrame::Presence(update),
                );
                self.drop_connections(dead);
            }
            ClientFrame::PresenceQuery => {
                let snapshot = ServerFrame::PresenceSnapshot {
                    entries: self.state.presence_snapshot(),
                };
                if !self.fanout.send(&from, snapshot) {
                    self.drop_connections(vec![from]);
                }
            }
        }
    }

    fn handle_update(&mut self, from: ConnectionId, delta: &[u8]) {
        match self.state.apply_update(self.merge.as_ref(), delta) {
            Ok(Some(relay)) => {
                let dead = self.fanout.broadcast(
                    self.state.connections(),
                    Some(from),
                    &ServerFrame::Update { delta: relay },
                );
                self.drop_connections(dead);
            }
            Ok(None) => {
                log::debug!("duplicate delta from connection {}", from);
            }
            Err(e) => {
                // a conforming replica never produces an inapplicable delta
                log::error!(
                    "merge failure in room {:?} from connection {}: {}",
                    self.name,
                    from,
                    e.reason
                );
            }
        }
    }

    /// Detaches connections, announcing their presence removal to the
    /// remaining peers. A removal broadcast may itself surface more dead
    /// peers; they are reaped in the same pass.
    fn drop_connections(&mut self, mut dead: Vec<ConnectionId>) {
        while let Some(connection_id) = dead.pop() {
            if !self.state.contains(&connection_id) {
                continue;
            }
            let removed = self.state.leave(&connection_id);
            self.fanout.remove(&connection_id);
            self.occupancy
                .store(self.state.connections().len(), Ordering::Relaxed);
            log::info!("connection {} left room {:?}", connection_id, self.name);

            if !removed.is_empty() {
                let frame = ServerFrame::Presence(PresenceUpdate::removal(removed));
                dead.extend(self.fanout.broadcast(self.state.connections(), None, &frame));
            }
        }
    }

    /// Unregisters the empty room. Joins are sent under the registry lock,
    /// so draining the queue while holding it decides the race: a buffered
    /// join revives the room, an emptied queue retires it for good.
    fn try_retire(&mut self, rx: &mut UnboundedReceiver<RoomCommand>) -> bool {
        loop {
            let mut rooms = self.registry.rooms();
            match rx.try_recv() {
                Ok(command) => {
                    drop(rooms);
                    self.handle(command);
                    if !self.state.is_empty() {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {
                    rooms.remove(&self.name);
                    log::info!("room {:?} - evicted", self.name);
                    return true;
                }
            }
        }
    }
}
