use std::collections::HashMap;

use hub::{ConnectionId, ServerFrame};

pub type ConnectionTx = tokio::sync::mpsc::Sender<ServerFrame>;

/// Outbound sinks for every connection attached to one room. Sends never
/// block the room task: a full or closed queue marks the peer dead and the
/// room reaps it, so one slow peer cannot stall delivery to the others.
pub struct Fanout {
    sinks: HashMap<ConnectionId, ConnectionTx>,
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            sinks: HashMap::new(),
        }
    }

    pub fn insert(&mut self, connection_id: ConnectionId, tx: ConnectionTx) {
        self.sinks.insert(connection_id, tx);
    }

    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<ConnectionTx> {
        self.sinks.remove(connection_id)
    }

    /// Delivers to one connection. Returns false if the peer is gone or its
    /// queue overflowed.
    pub fn send(&mut self, to: &ConnectionId, frame: ServerFrame) -> bool {
        if let Some(tx) = self.sinks.get_mut(to) {
            if let Err(e) = tx.try_send(frame) {
                log::warn!("egress to connection {} failed: {}", to, e);
                false
            } else {
                true
            }
        } else {
            log::warn!("egress to unknown connection {}", to);
            false
        }
    }

    /// Delivers to every connection except `except`. Returns the ids whose
    /// delivery failed so the caller can detach them.
    pub fn broadcast(
        &mut self,
        recipients: &[ConnectionId],
        except: Option<ConnectionId>,
        frame: &ServerFrame,
    ) -> Vec<ConnectionId> {
        let mut dead = Vec::new();
        for connection_id in recipients {
            if except.map_or(false, |origin| origin == *connection_id) {
                continue;
            }
            if !self.send(connection_id, frame.clone()) {
                dead.push(*connection_id);
            }
        }
        dead
    }
}
