//! Integration tests driving the matchmaker, relay, and store together.

use crate::harness::{Harness, TestClient};
use std::collections::HashSet;
use std::time::Duration;
use studymatch_protocol::{
    initiates, ConnectionId, JoinResponse, Participant, RoomId, ServerEvent,
};
use studymatch_store::Store;
use uuid::Uuid;

// ============================================================================
// Helpers
// ============================================================================

async fn next_event(client: &TestClient) -> ServerEvent {
    client
        .recv_timeout(Duration::from_millis(100))
        .await
        .expect("expected an event, got none")
}

fn expect_matched(response: JoinResponse) -> (RoomId, Vec<Participant>) {
    match response {
        JoinResponse::Matched {
            room_id,
            participants,
        } => (room_id, participants),
        other => panic!("Expected a match, got {:?}", other),
    }
}

fn expect_waiting(response: JoinResponse) {
    match response {
        JoinResponse::Waiting => {}
        other => panic!("Expected to keep waiting, got {:?}", other),
    }
}

fn names(participants: &[Participant]) -> Vec<&str> {
    participants.iter().map(|p| p.name.as_str()).collect()
}

/// Collect the next `count` arrival announcements, in any order.
async fn arrivals(client: &TestClient, count: usize) -> HashSet<ConnectionId> {
    let mut seen = HashSet::new();
    for _ in 0..count {
        match next_event(client).await {
            ServerEvent::PeerArrived { connection_id } => {
                seen.insert(connection_id);
            }
            other => panic!("Expected peerArrived, got {:?}", other),
        }
    }
    seen
}

// ============================================================================
// Matchmaking
// ============================================================================

#[tokio::test]
async fn test_second_join_completes_a_pair() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");

    // First join waits alone.
    expect_waiting(ana.join("calculus", 2).await);

    // Second join completes the pair, oldest first.
    let (room_id, participants) = expect_matched(ben.join("calculus", 2).await);
    assert_eq!(names(&participants), ["Ana", "Ben"]);

    // Both queues get the match notification.
    match next_event(&ana).await {
        ServerEvent::Matched {
            room_id: pushed,
            participants,
        } => {
            assert_eq!(pushed, room_id);
            assert_eq!(names(&participants), ["Ana", "Ben"]);
        }
        other => panic!("Expected matched event, got {:?}", other),
    }
    match next_event(&ben).await {
        ServerEvent::Matched { room_id: pushed, .. } => assert_eq!(pushed, room_id),
        other => panic!("Expected matched event, got {:?}", other),
    }

    // The room is queryable afterward.
    assert!(harness.store.room(room_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_group_of_three_waits_for_the_third() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");
    let cleo = harness.connect("Cleo");

    expect_waiting(ana.join("calculus", 3).await);
    expect_waiting(ben.join("calculus", 3).await);

    let (_, participants) = expect_matched(cleo.join("calculus", 3).await);
    assert_eq!(names(&participants), ["Ana", "Ben", "Cleo"]);

    // Nobody is left in the queue.
    assert!(harness.store.waiting_members().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_subject_and_size_never_mix() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");
    let cleo = harness.connect("Cleo");
    let dan = harness.connect("Dan");

    expect_waiting(ana.join("calculus", 2).await);

    // A different subject or a different size pairs with neither.
    expect_waiting(ben.join("algebra", 2).await);
    expect_waiting(cleo.join("calculus", 3).await);

    // The same subject and size does.
    let (_, participants) = expect_matched(dan.join("calculus", 2).await);
    assert_eq!(names(&participants), ["Ana", "Dan"]);
}

#[tokio::test]
async fn test_leaving_gives_up_the_queue_spot() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");
    let cleo = harness.connect("Cleo");

    expect_waiting(ana.join("calculus", 2).await);
    assert!(ana.leave().await);

    // Ana is gone, so Ben starts a fresh wait.
    expect_waiting(ben.join("calculus", 2).await);

    let (_, participants) = expect_matched(cleo.join("calculus", 2).await);
    assert_eq!(names(&participants), ["Ben", "Cleo"]);

    // Leaving again is a no-op.
    assert!(!ana.leave().await);
}

#[tokio::test]
async fn test_rejoining_moves_to_the_back_of_the_queue() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");
    let cleo = harness.connect("Cleo");

    expect_waiting(ana.join("physics", 3).await);
    expect_waiting(ben.join("physics", 3).await);

    // Ana joins again: still one entry, now behind Ben.
    expect_waiting(ana.join("physics", 3).await);
    assert_eq!(harness.store.waiting_members().await.unwrap().len(), 2);

    let (_, participants) = expect_matched(cleo.join("physics", 3).await);
    assert_eq!(names(&participants), ["Ben", "Ana", "Cleo"]);
}

#[tokio::test]
async fn test_new_preferences_replace_the_old_entry() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");
    let cleo = harness.connect("Cleo");

    expect_waiting(ana.join("calculus", 2).await);

    // Ana switches subjects; her calculus spot is gone.
    expect_waiting(ana.join("statistics", 2).await);
    expect_waiting(ben.join("calculus", 2).await);
    assert_eq!(harness.store.waiting_members().await.unwrap().len(), 2);

    let (_, participants) = expect_matched(cleo.join("statistics", 2).await);
    assert_eq!(names(&participants), ["Ana", "Cleo"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_fill_rooms_exactly_once() {
    let harness = Harness::new();

    let clients: Vec<TestClient> = ["Ana", "Ben", "Cleo", "Dan", "Eve", "Finn", "Gus", "Hana"]
        .into_iter()
        .map(|name| harness.connect(name))
        .collect();

    // All eight join at once.
    let mut handles = Vec::new();
    for client in clients {
        handles.push(tokio::spawn(async move {
            let response = client.join("statistics", 2).await;
            (client, response)
        }));
    }
    let mut clients = Vec::new();
    for handle in handles {
        let (client, _response) = handle.await.unwrap();
        clients.push(client);
    }

    // Every client ended up bound to a room of exactly two.
    let mut rooms = HashSet::new();
    for client in &clients {
        let member = harness
            .store
            .latest_member_by_client(&client.client_id)
            .await
            .unwrap()
            .expect("member should still exist");
        let room_id = member.room_id.expect("member should be bound to a room");
        rooms.insert(room_id);

        let roster = harness.store.room_participants(room_id).await.unwrap();
        assert_eq!(roster.len(), 2);
    }
    assert_eq!(rooms.len(), 4);

    // Exactly one match notification reached each queue.
    for client in &clients {
        let mut matched = 0;
        while let Some(event) = client.try_recv().await {
            if let ServerEvent::Matched { .. } = event {
                matched += 1;
            }
        }
        assert_eq!(
            matched, 1,
            "client {} saw {} match events",
            client.name, matched
        );
    }
}

// ============================================================================
// Reconnects and disconnects
// ============================================================================

#[tokio::test]
async fn test_rebind_redirects_the_match_to_the_new_connection() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");

    expect_waiting(ana.join("calculus", 2).await);

    // Ana's socket reconnects with a fresh connection id before the old
    // one is reaped.
    let ana2 = harness.reconnect(&ana);
    assert_eq!(ana2.rebind().await, 1);

    let ben = harness.connect("Ben");
    let (room_id, participants) = expect_matched(ben.join("calculus", 2).await);

    // The roster and the push both use the new connection.
    assert_eq!(participants[0].connection_id, ana2.connection_id);
    match next_event(&ana2).await {
        ServerEvent::Matched { room_id: pushed, .. } => assert_eq!(pushed, room_id),
        other => panic!("Expected matched event, got {:?}", other),
    }
    assert!(ana.try_recv().await.is_none());
}

#[tokio::test]
async fn test_rebind_leaves_matched_members_alone() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");

    expect_waiting(ana.join("calculus", 2).await);
    let (room_id, _) = expect_matched(ben.join("calculus", 2).await);

    let ana2 = harness.reconnect(&ana);
    assert_eq!(ana2.rebind().await, 0);

    // The room still lists the connection Ana was matched with.
    let roster = harness.store.room_participants(room_id).await.unwrap();
    assert_eq!(roster[0].connection_id, ana.connection_id);
}

#[tokio::test]
async fn test_disconnect_while_waiting_abandons_the_queue() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");

    expect_waiting(ana.join("calculus", 2).await);
    ana.disconnect().await;

    let ben = harness.connect("Ben");
    expect_waiting(ben.join("calculus", 2).await);

    let waiting = harness.store.waiting_members().await.unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].name, "Ben");
}

#[tokio::test]
async fn test_disconnect_after_match_keeps_the_roster() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");

    expect_waiting(ana.join("calculus", 2).await);
    let (room_id, _) = expect_matched(ben.join("calculus", 2).await);

    ben.disconnect().await;

    let roster = harness.store.room_participants(room_id).await.unwrap();
    assert_eq!(roster.len(), 2);

    let member = harness
        .store
        .latest_member_by_client(&ben.client_id)
        .await
        .unwrap()
        .expect("member should still exist");
    assert_eq!(member.room_id, Some(room_id));
}

// ============================================================================
// Presence and signaling
// ============================================================================

#[tokio::test]
async fn test_room_presence_is_announced_both_ways() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");
    let cleo = harness.connect("Cleo");

    expect_waiting(ana.join("biology", 3).await);
    expect_waiting(ben.join("biology", 3).await);
    let (room_id, _) = expect_matched(cleo.join("biology", 3).await);
    ana.drain().await;
    ben.drain().await;
    cleo.drain().await;

    ana.enter_room(room_id);
    ben.enter_room(room_id);
    cleo.enter_room(room_id);

    // Everyone saw the other two arrive.
    let ana_saw = arrivals(&ana, 2).await;
    assert!(ana_saw.contains(&ben.connection_id));
    assert!(ana_saw.contains(&cleo.connection_id));
    let ben_saw = arrivals(&ben, 2).await;
    assert!(ben_saw.contains(&ana.connection_id));
    assert!(ben_saw.contains(&cleo.connection_id));
    let cleo_saw = arrivals(&cleo, 2).await;
    assert!(cleo_saw.contains(&ana.connection_id));
    assert!(cleo_saw.contains(&ben.connection_id));

    // Exits are announced to whoever stays.
    ben.exit_room(room_id);
    match next_event(&ana).await {
        ServerEvent::PeerLeft { connection_id } => assert_eq!(connection_id, ben.connection_id),
        other => panic!("Expected peerLeft, got {:?}", other),
    }
    match next_event(&cleo).await {
        ServerEvent::PeerLeft { connection_id } => assert_eq!(connection_id, ben.connection_id),
        other => panic!("Expected peerLeft, got {:?}", other),
    }
    assert!(ben.try_recv().await.is_none());
}

#[tokio::test]
async fn test_entering_a_second_room_exits_the_first() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");

    let first = RoomId(Uuid::new_v4());
    let second = RoomId(Uuid::new_v4());
    ana.enter_room(first);
    ben.enter_room(first);
    ana.drain().await;
    ben.drain().await;

    ana.enter_room(second);
    match next_event(&ben).await {
        ServerEvent::PeerLeft { connection_id } => assert_eq!(connection_id, ana.connection_id),
        other => panic!("Expected peerLeft, got {:?}", other),
    }

    // Re-entering the room she is already in changes nothing.
    ana.drain().await;
    ana.enter_room(second);
    assert!(ana.try_recv().await.is_none());
    assert!(ben.try_recv().await.is_none());
}

#[tokio::test]
async fn test_signals_relay_verbatim() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");

    let offer = serde_json::json!({
        "sdp": {"type": "offer", "sdp": "v=0\r\no=- 46117 2 IN IP4 127.0.0.1"},
    });
    ana.signal(&ben.connection_id, offer.clone());
    match next_event(&ben).await {
        ServerEvent::Signal { from, payload } => {
            assert_eq!(from, ana.connection_id);
            assert_eq!(payload, offer);
        }
        other => panic!("Expected signal, got {:?}", other),
    }

    // Answers travel the other way.
    let answer = serde_json::json!({"sdp": {"type": "answer"}});
    ben.signal(&ana.connection_id, answer.clone());
    match next_event(&ana).await {
        ServerEvent::Signal { from, payload } => {
            assert_eq!(from, ben.connection_id);
            assert_eq!(payload, answer);
        }
        other => panic!("Expected signal, got {:?}", other),
    }
}

#[tokio::test]
async fn test_signal_to_a_gone_peer_is_dropped() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");

    ben.disconnect().await;
    ana.signal(&ben.connection_id, serde_json::json!({"candidate": "a=1"}));
    assert!(ana.try_recv().await.is_none());

    // Ana's own connection is unaffected.
    let cleo = harness.connect("Cleo");
    ana.signal(&cleo.connection_id, serde_json::json!({"candidate": "a=2"}));
    match next_event(&cleo).await {
        ServerEvent::Signal { from, .. } => assert_eq!(from, ana.connection_id),
        other => panic!("Expected signal, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rooms_never_backfill() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");

    expect_waiting(ana.join("chemistry", 2).await);
    let (first_room, _) = expect_matched(ben.join("chemistry", 2).await);

    // Ben drops out; the room keeps its roster and takes nobody new.
    ben.disconnect().await;

    let cleo = harness.connect("Cleo");
    expect_waiting(cleo.join("chemistry", 2).await);
    assert_eq!(
        harness
            .store
            .room_participants(first_room)
            .await
            .unwrap()
            .len(),
        2
    );

    let dan = harness.connect("Dan");
    let (second_room, participants) = expect_matched(dan.join("chemistry", 2).await);
    assert_ne!(second_room, first_room);
    assert_eq!(names(&participants), ["Cleo", "Dan"]);
}

// ============================================================================
// Full flow
// ============================================================================

#[tokio::test]
async fn test_full_session_flow() {
    let harness = Harness::new();
    let ana = harness.connect("Ana");
    let ben = harness.connect("Ben");

    // Queue up and match.
    expect_waiting(ana.join("calculus", 2).await);
    let (room_id, participants) = expect_matched(ben.join("calculus", 2).await);
    assert_eq!(names(&participants), ["Ana", "Ben"]);
    ana.drain().await;
    ben.drain().await;

    // Both announce themselves in the room.
    ana.enter_room(room_id);
    ben.enter_room(room_id);
    assert!(arrivals(&ana, 1).await.contains(&ben.connection_id));
    assert!(arrivals(&ben, 1).await.contains(&ana.connection_id));

    // Exactly one side starts the WebRTC handshake.
    assert_ne!(
        initiates(&ana.connection_id, &ben.connection_id),
        initiates(&ben.connection_id, &ana.connection_id)
    );
    let (caller, callee) = if initiates(&ana.connection_id, &ben.connection_id) {
        (&ana, &ben)
    } else {
        (&ben, &ana)
    };

    caller.signal(
        &callee.connection_id,
        serde_json::json!({"sdp": {"type": "offer"}}),
    );
    match next_event(callee).await {
        ServerEvent::Signal { payload, .. } => assert_eq!(payload["sdp"]["type"], "offer"),
        other => panic!("Expected signal, got {:?}", other),
    }
    callee.signal(
        &caller.connection_id,
        serde_json::json!({"sdp": {"type": "answer"}}),
    );
    match next_event(caller).await {
        ServerEvent::Signal { payload, .. } => assert_eq!(payload["sdp"]["type"], "answer"),
        other => panic!("Expected signal, got {:?}", other),
    }

    // Ben hangs up; Ana is told.
    ben.disconnect().await;
    match next_event(&ana).await {
        ServerEvent::PeerLeft { connection_id } => assert_eq!(connection_id, ben.connection_id),
        other => panic!("Expected peerLeft, got {:?}", other),
    }
}
