use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use hub::{ConnectionId, Merge};

use crate::fanout::ConnectionTx;
use crate::room::{spawn_room, RoomCommand, RoomTx};

pub const DEFAULT_ROOM: &str = "default";

pub struct RoomEntry {
    pub tx: RoomTx,
    pub occupancy: Arc<AtomicUsize>,
}

pub struct RoomInfo {
    pub name: String,
    pub connections: usize,
}

/// Process-wide map from room name to its owner task. Injectable: every
/// server (and every test) constructs its own registry; dropping it lets the
/// room tasks drain and finish. Rooms are created lazily on first join and
/// evicted once their last connection leaves.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    rooms: Mutex<HashMap<String, RoomEntry>>,
    merge: Arc<dyn Merge>,
    connection_id_source: AtomicU64,
}

impl RoomRegistry {
    pub fn new(merge: Arc<dyn Merge>) -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: Mutex::new(HashMap::new()),
                merge,
                connection_id_source: AtomicU64::new(0),
            }),
        }
    }

    /// Resolves the room (creating it if absent) and registers the
    /// connection in one step. The Join command is sent while the registry
    /// lock is held, so a concurrently retiring room task either drains it
    /// before unregistering or has already removed its entry, in which case
    /// a fresh room is spawned. Two live rooms for one name cannot exist.
    pub fn join(&self, room_name: &str, conn_tx: ConnectionTx) -> (ConnectionId, RoomTx) {
        let connection_id = self.new_connection_id();
        let mut command = RoomCommand::Join {
            connection_id,
            tx: conn_tx,
        };

        let mut rooms = self.rooms();
        if let Some(entry) = rooms.get(room_name) {
            match entry.tx.send(command) {
                Ok(()) => return (connection_id, entry.tx.clone()),
                Err(err) => {
                    // only reachable if the room task died without
                    // unregistering itself
                    log::error!("room {:?} task is gone, respawning", room_name);
                    command = err.0;
                }
            }
        }

        let entry = spawn_room(self.clone(), room_name);
        entry.tx.send(command).expect("must succeed");
        let tx = entry.tx.clone();
        rooms.insert(room_name.to_string(), entry);
        (connection_id, tx)
    }

    pub fn overview(&self) -> Vec<RoomInfo> {
        let rooms = self.rooms();
        let mut infos = rooms
            .iter()
            .map(|(name, entry)| RoomInfo {
                name: name.clone(),
                connections: entry.occupancy.load(Ordering::Relaxed),
            })
            .collect::<Vec<_>>();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub(crate) fn merge(&self) -> Arc<dyn Merge> {
        self.inner.merge.clone()
    }

    pub(crate) fn rooms(&self) -> MutexGuard<'_, HashMap<String, RoomEntry>> {
        self.inner.rooms.lock().expect("registry lock poisoned")
    }

    fn new_connection_id(&self) -> ConnectionId {
        self.inner.connection_id_source.fetch_add(1, Ordering::Relaxed) + 1
    }
}
