use serde::{Deserialize, Serialize};

pub type ConnectionId = u64;
pub type ParticipantId = u64;

/// Inbound wire frames. Encoded with bincode; the enum tag is the kind
/// discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientFrame {
    Update { delta: Vec<u8> },
    Presence(PresenceUpdate),
    PresenceQuery,
}

/// Outbound wire frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Full document state. Always the first frame a connection receives.
    Sync { state: Vec<u8> },
    Update { delta: Vec<u8> },
    Presence(PresenceUpdate),
    PresenceSnapshot { entries: Vec<PresenceEntry> },
}

/// One presence change set. The payload applies to every added/updated id;
/// its content is opaque to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub payload: Vec<u8>,
    pub added: Vec<ParticipantId>,
    pub updated: Vec<ParticipantId>,
    pub removed: Vec<ParticipantId>,
}

impl PresenceUpdate {
    pub fn removal(removed: Vec<ParticipantId>) -> Self {
        Self {
            payload: Vec::new(),
            added: Vec::new(),
            updated: Vec::new(),
            removed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub participant_id: ParticipantId,
    pub payload: Vec<u8>,
}
