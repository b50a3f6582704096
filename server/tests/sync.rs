use std::sync::Arc;

use tokio::sync::mpsc::{channel, Receiver};
use tokio::time::{delay_for, timeout, Duration};

use hub::{
    ClientFrame, ConnectionId, OpSetMerge, ParticipantId, PresenceEntry, PresenceUpdate,
    ServerFrame,
};
use server::registry::RoomRegistry;
use server::room::{RoomCommand, RoomTx};

struct TestPeer {
    id: ConnectionId,
    room_tx: RoomTx,
    rx: Receiver<ServerFrame>,
}

impl TestPeer {
    fn send(&self, frame: ClientFrame) {
        self.room_tx
            .send(RoomCommand::Frame {
                from: self.id,
                frame,
            })
            .expect("room must be alive");
    }

    fn leave(&self) {
        self.room_tx
            .send(RoomCommand::Leave { from: self.id })
            .expect("room must be alive");
    }

    async fn recv(&mut self) -> ServerFrame {
        timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("egress channel closed")
    }

    async fn expect_update(&mut self) -> Vec<u8> {
        match self.recv().await {
            ServerFrame::Update { delta } => delta,
            other => panic!("expected update, got {:?}", other),
        }
    }

    async fn expect_presence(&mut self) -> PresenceUpdate {
        match self.recv().await {
            ServerFrame::Presence(update) => update,
            other => panic!("expected presence, got {:?}", other),
        }
    }

    async fn expect_snapshot(&mut self) -> Vec<PresenceEntry> {
        match self.recv().await {
            ServerFrame::PresenceSnapshot { entries } => entries,
            other => panic!("expected presence snapshot, got {:?}", other),
        }
    }

    async fn expect_sync(&mut self) -> Vec<u8> {
        match self.recv().await {
            ServerFrame::Sync { state } => state,
            other => panic!("expected sync, got {:?}", other),
        }
    }
}

fn registry() -> RoomRegistry {
    RoomRegistry::new(Arc::new(OpSetMerge))
}

fn join(registry: &RoomRegistry, room: &str) -> TestPeer {
    let (tx, rx) = channel(64);
    let (id, room_tx) = registry.join(room, tx);
    TestPeer { id, room_tx, rx }
}

/// Joins and consumes the Sync + PresenceSnapshot handshake.
async fn join_synced(registry: &RoomRegistry, room: &str) -> TestPeer {
    let mut peer = join(registry, room);
    peer.expect_sync().await;
    peer.expect_snapshot().await;
    peer
}

fn delta(op: &str) -> Vec<u8> {
    OpSetMerge::delta_for_op(op.as_bytes())
}

fn announce(id: ParticipantId) -> ClientFrame {
    ClientFrame::Presence(PresenceUpdate {
        payload: format!("cursor:{}", id).into_bytes(),
        added: vec![id],
        updated: Vec::new(),
        removed: Vec::new(),
    })
}

#[tokio::test]
async fn it_broadcasts_updates_to_peers_without_self_echo() {
    let registry = registry();
    let mut c1 = join_synced(&registry, "whiteboard-room").await;
    let mut c2 = join_synced(&registry, "whiteboard-room").await;
    let mut c3 = join_synced(&registry, "whiteboard-room").await;

    let line = delta(r#"{"op":"append","value":{"type":"line","points":[[0,0],[1,1]]}}"#);
    c1.send(ClientFrame::Update {
        delta: line.clone(),
    });

    for peer in vec![&mut c2, &mut c3] {
        assert_eq!(peer.expect_update().await, line);
    }

    // the origin gets no echo: the next frame it sees is its own query reply
    c1.send(ClientFrame::PresenceQuery);
    c1.expect_snapshot().await;
}

#[tokio::test]
async fn it_syncs_full_state_to_newcomers_before_later_updates() {
    let registry = registry();
    let mut c1 = join_synced(&registry, "doc").await;
    c1.send(ClientFrame::Update { delta: delta("op-1") });
    c1.send(ClientFrame::Update { delta: delta("op-2") });

    let mut c2 = join(&registry, "doc");
    let state = c2.expect_sync().await;
    let mut ops = OpSetMerge::ops(&state).expect("state must decode");
    ops.sort();
    assert_eq!(ops, vec![b"op-1".to_vec(), b"op-2".to_vec()]);
    c2.expect_snapshot().await;

    c1.send(ClientFrame::Update { delta: delta("op-3") });
    let relayed = c2.expect_update().await;
    assert_eq!(
        OpSetMerge::ops(&relayed).expect("delta must decode"),
        vec![b"op-3".to_vec()]
    );
}

#[tokio::test]
async fn it_cleans_up_presence_after_disconnect() {
    let registry = registry();
    let c1 = join_synced(&registry, "room").await;
    let mut c2 = join_synced(&registry, "room").await;

    c1.send(announce(1));
    assert_eq!(c2.expect_presence().await.added, vec![1]);

    c1.leave();
    assert_eq!(c2.expect_presence().await.removed, vec![1]);

    c2.send(ClientFrame::PresenceQuery);
    assert!(c2.expect_snapshot().await.is_empty());
}

#[tokio::test]
async fn it_isolates_rooms_from_each_other() {
    let registry = registry();
    let c1 = join_synced(&registry, "a").await;
    let mut c2 = join_synced(&registry, "b").await;

    c1.send(ClientFrame::Update { delta: delta("only-in-a") });

    // c2's next frame is its own query reply, not the foreign update
    c2.send(ClientFrame::PresenceQuery);
    c2.expect_snapshot().await;

    // and room b's document never saw the delta
    let mut c3 = join(&registry, "b");
    let state = c3.expect_sync().await;
    assert!(OpSetMerge::ops(&state).expect("state must decode").is_empty());

    let overview = registry.overview();
    assert_eq!(
        overview
            .iter()
            .map(|info| (info.name.as_str(), info.connections))
            .collect::<Vec<_>>(),
        vec![("a", 1), ("b", 2)]
    );
}

#[tokio::test]
async fn it_suppresses_rebroadcast_of_duplicate_deltas() {
    let registry = registry();
    let c1 = join_synced(&registry, "room").await;
    let mut c2 = join_synced(&registry, "room").await;

    let d = delta("op-1");
    c1.send(ClientFrame::Update { delta: d.clone() });
    c1.send(ClientFrame::Update { delta: d.clone() });

    assert_eq!(c2.expect_update().await, d);
    // the retransmit produced no second broadcast
    c2.send(ClientFrame::PresenceQuery);
    c2.expect_snapshot().await;
}

#[tokio::test]
async fn it_evicts_empty_rooms_and_rejoins_fresh() {
    let registry = registry();
    let c1 = join_synced(&registry, "scratch").await;
    c1.send(ClientFrame::Update { delta: delta("op-1") });
    c1.leave();

    for _ in 0..100 {
        if registry.overview().is_empty() {
            break;
        }
        delay_for(Duration::from_millis(10)).await;
    }
    assert!(registry.overview().is_empty());

    // a later join re-creates the room with a fresh document
    let mut c2 = join(&registry, "scratch");
    let state = c2.expect_sync().await;
    assert!(OpSetMerge::ops(&state).expect("state must decode").is_empty());
}

#[tokio::test]
async fn it_keeps_registries_independent() {
    let registry_a = registry();
    let registry_b = registry();

    let a1 = join_synced(&registry_a, "shared-name").await;
    let mut b1 = join_synced(&registry_b, "shared-name").await;

    a1.send(ClientFrame::Update { delta: delta("op-1") });

    b1.send(ClientFrame::PresenceQuery);
    b1.expect_snapshot().await;

    assert_eq!(registry_a.overview().len(), 1);
    assert_eq!(registry_b.overview().len(), 1);
}

#[tokio::test]
async fn it_answers_presence_queries_with_every_participant() {
    let registry = registry();
    let mut c1 = join_synced(&registry, "whiteboard-room").await;
    let mut c2 = join_synced(&registry, "whiteboard-room").await;
    let mut c3 = join_synced(&registry, "whiteboard-room").await;

    c1.send(announce(1));
    c2.send(announce(2));
    c3.send(announce(3));

    // everyone sees the two announcements they did not make themselves
    assert_eq!(c1.expect_presence().await.added, vec![2]);
    assert_eq!(c1.expect_presence().await.added, vec![3]);
    assert_eq!(c2.expect_presence().await.added, vec![1]);
    assert_eq!(c2.expect_presence().await.added, vec![3]);
    assert_eq!(c3.expect_presence().await.added, vec![1]);
    assert_eq!(c3.expect_presence().await.added, vec![2]);

    // query replies are inclusive of the querier's own id
    c2.send(ClientFrame::PresenceQuery);
    let ids = c2
        .expect_snapshot()
        .await
        .into_iter()
        .map(|entry| entry.participant_id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn it_drops_unresponsive_connections_without_blocking_peers() {
    let registry = registry();
    let mut c1 = join_synced(&registry, "room").await;

    // a peer whose outbound queue is never drained; the join handshake
    // already overflows it and the room detaches the peer
    let (tx, _unread_rx) = channel(1);
    let _ = registry.join("room", tx);

    c1.send(ClientFrame::PresenceQuery);
    c1.expect_snapshot().await;

    let overview = registry.overview();
    assert_eq!(overview.len(), 1);
    assert_eq!(overview[0].connections, 1);

    // the healthy peer still receives broadcasts
    let c2 = join_synced(&registry, "room").await;
    c2.send(ClientFrame::Update { delta: delta("op-1") });
    assert_eq!(c1.expect_update().await, delta("op-1"));
}
