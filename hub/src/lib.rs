pub extern crate bincode;
pub extern crate serde;
pub extern crate serde_json;

mod merge;
mod message;
mod room;

pub use merge::{Merge, MergeError, MergeOutcome, OpSetMerge};
pub use message::{
    ClientFrame, ConnectionId, ParticipantId, PresenceEntry, PresenceUpdate, ServerFrame,
};
pub use room::RoomState;
