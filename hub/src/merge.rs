use std::collections::BTreeSet;

/// Merge failure. Leaves the caller's state untouched; by construction a
/// conforming replica never produces an inapplicable delta, so seeing one
/// signals a protocol or implementation bug.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeError {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The delta changed the document. `relay` is the minimal delta other
    /// replicas need to catch up.
    Applied { state: Vec<u8>, relay: Vec<u8> },
    /// The delta was already fully contained in the current state.
    Unchanged,
}

/// The document merge contract the hub is written against. Implementations
/// must be commutative, associative and idempotent over sets of deltas:
/// applying the same deltas in any order, with repeats, yields the same
/// state bytes.
pub trait Merge: Send + Sync {
    fn initial_state(&self) -> Vec<u8>;

    fn merge(&self, state: &[u8], delta: &[u8]) -> Result<MergeOutcome, MergeError>;
}

type OpSet = BTreeSet<Vec<u8>>;

/// Grow-only operation-set document. State and delta are both encoded sets
/// of opaque operation byte-strings; merge is set union. Enough for
/// append-only collaborators (counter increments, whiteboard shape ops)
/// while keeping operation contents opaque to the hub.
pub struct OpSetMerge;

impl OpSetMerge {
    /// Encodes a delta carrying a single operation.
    pub fn delta_for_op(op: &[u8]) -> Vec<u8> {
        let mut ops = OpSet::new();
        ops.insert(op.to_vec());
        bincode::serialize(&ops).expect("must succeed")
    }

    /// Decodes a state (or delta) back into its operations.
    pub fn ops(state: &[u8]) -> Result<Vec<Vec<u8>>, MergeError> {
        let ops: OpSet = bincode::deserialize(state).map_err(|e| MergeError {
            reason: format!("undecodable op set: {}", e),
        })?;
        Ok(ops.into_iter().collect())
    }
}

impl Merge for OpSetMerge {
    fn initial_state(&self) -> Vec<u8> {
        bincode::serialize(&OpSet::new()).expect("must succeed")
    }

    fn merge(&self, state: &[u8], delta: &[u8]) -> Result<MergeOutcome, MergeError> {
        let mut ops: OpSet = bincode::deserialize(state).map_err(|e| MergeError {
            reason: format!("undecodable document state: {}", e),
        })?;
        let incoming: OpSet = bincode::deserialize(delta).map_err(|e| MergeError {
            reason: format!("undecodable delta: {}", e),
        })?;

        let fresh: OpSet = incoming.difference(&ops).cloned().collect();
        if fresh.is_empty() {
            return Ok(MergeOutcome::Unchanged);
        }
        ops.extend(fresh.iter().cloned());
        Ok(MergeOutcome::Applied {
            state: bincode::serialize(&ops).expect("must succeed"),
            relay: bincode::serialize(&fresh).expect("must succeed"),
        })
    }
}
