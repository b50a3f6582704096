use std::collections::HashMap;

use crate::merge::{Merge, MergeError, MergeOutcome};
use crate::message::{ConnectionId, ParticipantId, PresenceEntry, PresenceUpdate};

struct PresenceRecord {
    payload: Vec<u8>,
    owner: ConnectionId,
}

/// One room's replica: the opaque document, the ephemeral presence table and
/// the attached connections. Presence is last-writer-wins per participant id
/// and never goes through the document merge.
pub struct RoomState {
    document: Vec<u8>,
    presence: HashMap<ParticipantId, PresenceRecord>,
    connections: Vec<ConnectionId>,
}

impl RoomState {
    pub fn new(merge: &dyn Merge) -> Self {
        Self {
            document: merge.initial_state(),
            presence: HashMap::new(),
            connections: Vec::new(),
        }
    }

    pub fn document(&self) -> &[u8] {
        &self.document
    }

    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains(connection_id)
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn join(&mut self, connection_id: ConnectionId) {
        self.connections.push(connection_id);
    }

    /// Detaches a connection and drops every presence entry it owned.
    /// Returns the removed participant ids so the caller can broadcast
    /// their removal.
    pub fn leave(&mut self, connection_id: &ConnectionId) -> Vec<ParticipantId> {
        self.connections.retain(|c| c != connection_id);
        let removed = self
            .presence
            .iter()
            .filter(|(_, record)| record.owner == *connection_id)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in &removed {
            self.presence.remove(id);
        }
        removed
    }

    /// Merges one delta into the document. `Ok(Some(relay))` carries the
    /// minimal delta to broadcast; `Ok(None)` means the delta was already
    /// contained. On error the document is untouched.
    pub fn apply_update(
        &mut self,
        merge: &dyn Merge,
        delta: &[u8],
    ) -> Result<Option<Vec<u8>>, MergeError> {
        match merge.merge(&self.document, delta)? {
            MergeOutcome::Applied { state, relay } => {
                self.document = state;
                Ok(Some(relay))
            }
            MergeOutcome::Unchanged => Ok(None),
        }
    }

    pub fn apply_presence(&mut self, from: ConnectionId, update: &PresenceUpdate) {
        for id in update.added.iter().chain(update.updated.iter()) {
            self.presence.insert(
                *id,
                PresenceRecord {
                    payload: update.payload.clone(),
                    owner: from,
                },
            );
        }
        for id in &update.removed {
            if self.presence.remove(id).is_none() {
                log::debug!("removal of unknown presence id {}", id);
            }
        }
    }

    pub fn presence_snapshot(&self) -> Vec<PresenceEntry> {
        let mut entries = self
            .presence
            .iter()
            .map(|(id, record)| PresenceEntry {
                participant_id: *id,
                payload: record.payload.clone(),
            })
            .collect::<Vec<_>>();
        entries.sort_by_key(|e| e.participant_id);
        entries
    }
}
