//! End-to-end lifecycle tests against the full engine
//!
//! Drives the public `CallEngine` surface with a recording sink and an
//! in-memory store, the way a transport would.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use huddle_call_engine::config::EngineConfig;
use huddle_call_engine::database::InMemoryChatDirectory;
use huddle_call_engine::engine::CallEngine;
use huddle_call_engine::events::{CallEvent, EventSink};
use huddle_call_engine::types::{
    CallKind, CallStatus, ChatId, ConnectionId, EndReason, ParticipantStatus, UserId,
};
use huddle_call_engine::CallEngineError;

struct RecordingSink {
    delivered: Mutex<Vec<(ConnectionId, CallEvent)>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
        })
    }

    async fn events_for(&self, connection: &ConnectionId) -> Vec<CallEvent> {
        self.delivered
            .lock()
            .await
            .iter()
            .filter(|(conn, _)| conn == connection)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, connection: &ConnectionId, event: CallEvent) {
        self.delivered
            .lock()
            .await
            .push((connection.clone(), event));
    }
}

struct Fixture {
    engine: Arc<CallEngine>,
    sink: Arc<RecordingSink>,
    chat: ChatId,
}

async fn fixture(members: &[&UserId]) -> Fixture {
    fixture_with_ring_timeout(members, Duration::from_secs(45)).await
}

async fn fixture_with_ring_timeout(members: &[&UserId], ring_timeout: Duration) -> Fixture {
    let chat = ChatId::from("chat-1");
    let chats = Arc::new(InMemoryChatDirectory::new());
    for member in members {
        chats.add_member(&chat, member);
    }
    let sink = RecordingSink::new();
    let engine = CallEngine::builder()
        .with_config(EngineConfig::default().with_ring_timeout(ring_timeout))
        .with_in_memory_database()
        .with_chat_directory(chats)
        .with_event_sink(sink.clone())
        .build()
        .await
        .unwrap();
    Fixture { engine, sink, chat }
}

fn alice() -> UserId {
    UserId::from("alice")
}

fn bob() -> UserId {
    UserId::from("bob")
}

fn conn(name: &str) -> ConnectionId {
    ConnectionId::from(name)
}

#[tokio::test]
async fn voice_call_accept_and_hang_up() {
    let f = fixture(&[&alice(), &bob()]).await;
    let alice_conn = conn("alice-1");
    let bob_conn = conn("bob-1");
    f.engine.connection_opened(&alice(), &alice_conn);
    f.engine.connection_opened(&bob(), &bob_conn);

    let session_id = f
        .engine
        .initiate_call(&alice(), &alice_conn, &f.chat, CallKind::Voice, vec![bob()])
        .await
        .unwrap();
    assert_eq!(f.engine.live_session_count(), 1);

    // Bob's device got the invitation, Alice saw the ring confirmation.
    let bob_events = f.sink.events_for(&bob_conn).await;
    assert!(matches!(bob_events[0], CallEvent::Incoming { .. }));
    let alice_events = f.sink.events_for(&alice_conn).await;
    assert!(matches!(alice_events[0], CallEvent::Ringing { .. }));

    f.engine
        .accept_call(&session_id, &bob(), &bob_conn)
        .await
        .unwrap();
    // Accepting twice from the same user is a silent no-op.
    f.engine
        .accept_call(&session_id, &bob(), &bob_conn)
        .await
        .unwrap();

    f.engine
        .end_call(&session_id, &alice(), None)
        .await
        .unwrap();
    assert_eq!(f.engine.live_session_count(), 0);

    let record = f.engine.call_record(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Ended);
    assert_eq!(record.end_reason, Some(EndReason::Completed));
    assert!(record.started_at.is_some());
    assert!(record.ended_at.is_some());
    assert_eq!(record.participants.len(), 1);
    assert_eq!(record.participants[0].status, ParticipantStatus::Left);

    // The caller never appears as a participant row.
    assert!(record.participants.iter().all(|p| p.user_id != alice()));

    // A second end finds nothing live.
    let again = f.engine.end_call(&session_id, &alice(), None).await;
    assert!(matches!(again, Err(CallEngineError::NotFound { .. })));
}

#[tokio::test]
async fn cancel_before_anyone_joins_is_recorded_as_cancelled() {
    let f = fixture(&[&alice(), &bob()]).await;
    let alice_conn = conn("alice-1");
    f.engine.connection_opened(&alice(), &alice_conn);

    let session_id = f
        .engine
        .initiate_call(&alice(), &alice_conn, &f.chat, CallKind::Voice, vec![bob()])
        .await
        .unwrap();
    f.engine
        .end_call(&session_id, &alice(), None)
        .await
        .unwrap();

    let record = f.engine.call_record(&session_id).await.unwrap().unwrap();
    assert_eq!(record.end_reason, Some(EndReason::Cancelled));
    assert!(record.started_at.is_none());
    assert_eq!(record.participants[0].status, ParticipantStatus::Missed);
}

#[tokio::test]
async fn everyone_rejecting_ends_the_session_as_rejected() {
    let carol = UserId::from("carol");
    let f = fixture(&[&alice(), &bob(), &carol]).await;
    let alice_conn = conn("alice-1");
    f.engine.connection_opened(&alice(), &alice_conn);

    let session_id = f
        .engine
        .initiate_call(
            &alice(),
            &alice_conn,
            &f.chat,
            CallKind::Video,
            vec![bob(), carol.clone()],
        )
        .await
        .unwrap();

    f.engine
        .reject_call(&session_id, &bob(), Some("busy".into()))
        .await
        .unwrap();
    assert_eq!(f.engine.live_session_count(), 1);

    f.engine
        .reject_call(&session_id, &carol, None)
        .await
        .unwrap();
    assert_eq!(f.engine.live_session_count(), 0);

    let record = f.engine.call_record(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Rejected);
    assert_eq!(record.end_reason, Some(EndReason::Rejected));
    assert!(record
        .participants
        .iter()
        .all(|p| p.status == ParticipantStatus::Rejected));
}

#[tokio::test]
async fn unanswered_call_rings_out_as_missed() {
    let f = fixture_with_ring_timeout(&[&alice(), &bob()], Duration::from_millis(100)).await;
    let alice_conn = conn("alice-1");
    f.engine.connection_opened(&alice(), &alice_conn);

    let session_id = f
        .engine
        .initiate_call(&alice(), &alice_conn, &f.chat, CallKind::Voice, vec![bob()])
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(f.engine.live_session_count(), 0);

    let record = f.engine.call_record(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Missed);
    assert_eq!(record.end_reason, Some(EndReason::Missed));
    assert_eq!(record.participants[0].status, ParticipantStatus::Missed);

    let alice_events = f.sink.events_for(&alice_conn).await;
    assert!(alice_events
        .iter()
        .any(|e| matches!(e, CallEvent::Missed { .. })));
}

#[tokio::test]
async fn accepting_cancels_the_ring_timer() {
    let f = fixture_with_ring_timeout(&[&alice(), &bob()], Duration::from_millis(100)).await;
    let alice_conn = conn("alice-1");
    let bob_conn = conn("bob-1");
    f.engine.connection_opened(&alice(), &alice_conn);
    f.engine.connection_opened(&bob(), &bob_conn);

    let session_id = f
        .engine
        .initiate_call(&alice(), &alice_conn, &f.chat, CallKind::Voice, vec![bob()])
        .await
        .unwrap();
    f.engine
        .accept_call(&session_id, &bob(), &bob_conn)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(f.engine.live_session_count(), 1);
    let record = f.engine.call_record(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Ongoing);
}

#[tokio::test]
async fn concurrent_initiations_in_one_chat_yield_one_winner() {
    let f = fixture(&[&alice(), &bob()]).await;
    let alice_conn = conn("alice-1");
    let bob_conn = conn("bob-1");
    f.engine.connection_opened(&alice(), &alice_conn);
    f.engine.connection_opened(&bob(), &bob_conn);

    let alice_id = alice();
    let bob_id = bob();
    let (first, second) = tokio::join!(
        f.engine
            .initiate_call(&alice_id, &alice_conn, &f.chat, CallKind::Voice, vec![bob()]),
        f.engine
            .initiate_call(&bob_id, &bob_conn, &f.chat, CallKind::Voice, vec![alice()]),
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(CallEngineError::Conflict { .. }))));
    assert_eq!(f.engine.live_session_count(), 1);
}

#[tokio::test]
async fn non_member_cannot_start_a_call() {
    let f = fixture(&[&alice()]).await;
    let mallory = UserId::from("mallory");
    let mallory_conn = conn("mallory-1");
    f.engine.connection_opened(&mallory, &mallory_conn);

    let result = f
        .engine
        .initiate_call(&mallory, &mallory_conn, &f.chat, CallKind::Voice, vec![alice()])
        .await;
    assert!(matches!(result, Err(CallEngineError::Permission { .. })));

    let no_targets = f
        .engine
        .initiate_call(&alice(), &conn("alice-1"), &f.chat, CallKind::Voice, vec![])
        .await;
    assert!(matches!(no_targets, Err(CallEngineError::Validation { .. })));
}

#[tokio::test]
async fn losing_the_last_connection_synthesizes_a_leave() {
    let f = fixture(&[&alice(), &bob()]).await;
    let alice_conn = conn("alice-1");
    let bob_conn = conn("bob-1");
    f.engine.connection_opened(&alice(), &alice_conn);
    f.engine.connection_opened(&bob(), &bob_conn);

    let session_id = f
        .engine
        .initiate_call(&alice(), &alice_conn, &f.chat, CallKind::Voice, vec![bob()])
        .await
        .unwrap();
    f.engine
        .accept_call(&session_id, &bob(), &bob_conn)
        .await
        .unwrap();

    // Bob's only device drops; Alice is then alone, so the call completes.
    f.engine.connection_closed(&bob_conn).await;
    let alice_events = f.sink.events_for(&alice_conn).await;
    assert!(alice_events
        .iter()
        .any(|e| matches!(e, CallEvent::ParticipantLeft { reason, .. } if reason == "disconnected")));

    f.engine.connection_closed(&alice_conn).await;
    assert_eq!(f.engine.live_session_count(), 0);

    let record = f.engine.call_record(&session_id).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Ended);
    assert_eq!(record.end_reason, Some(EndReason::Completed));
}

#[tokio::test]
async fn invitations_fan_out_to_every_device() {
    let f = fixture(&[&alice(), &bob()]).await;
    let alice_conn = conn("alice-1");
    let bob_phone = conn("bob-phone");
    let bob_laptop = conn("bob-laptop");
    f.engine.connection_opened(&alice(), &alice_conn);
    f.engine.connection_opened(&bob(), &bob_phone);
    f.engine.connection_opened(&bob(), &bob_laptop);

    f.engine
        .initiate_call(&alice(), &alice_conn, &f.chat, CallKind::Video, vec![bob()])
        .await
        .unwrap();

    for device in [&bob_phone, &bob_laptop] {
        let events = f.sink.events_for(device).await;
        assert!(
            matches!(events[0], CallEvent::Incoming { call_kind: CallKind::Video, .. }),
            "device {device} missed the invitation"
        );
    }
}

#[tokio::test]
async fn screen_share_is_exclusive_per_session() {
    let f = fixture(&[&alice(), &bob()]).await;
    let alice_conn = conn("alice-1");
    let bob_conn = conn("bob-1");
    f.engine.connection_opened(&alice(), &alice_conn);
    f.engine.connection_opened(&bob(), &bob_conn);

    let session_id = f
        .engine
        .initiate_call(&alice(), &alice_conn, &f.chat, CallKind::Video, vec![bob()])
        .await
        .unwrap();
    f.engine
        .accept_call(&session_id, &bob(), &bob_conn)
        .await
        .unwrap();

    f.engine
        .set_screen_share(&session_id, &alice(), true)
        .await
        .unwrap();
    let denied = f.engine.set_screen_share(&session_id, &bob(), true).await;
    assert!(matches!(denied, Err(CallEngineError::Conflict { .. })));

    // Releasing frees the slot for the other participant.
    f.engine
        .set_screen_share(&session_id, &alice(), false)
        .await
        .unwrap();
    f.engine
        .set_screen_share(&session_id, &bob(), true)
        .await
        .unwrap();

    let snapshot = f.engine.media_snapshot(&session_id).await.unwrap();
    let bob_media = snapshot
        .iter()
        .find(|(uid, _)| *uid == bob())
        .map(|(_, state)| *state)
        .unwrap();
    assert!(bob_media.screen_sharing);
}

#[tokio::test]
async fn history_survives_across_sessions() {
    let f = fixture(&[&alice(), &bob()]).await;
    let alice_conn = conn("alice-1");
    f.engine.connection_opened(&alice(), &alice_conn);

    let first = f
        .engine
        .initiate_call(&alice(), &alice_conn, &f.chat, CallKind::Voice, vec![bob()])
        .await
        .unwrap();
    f.engine.end_call(&first, &alice(), None).await.unwrap();

    let second = f
        .engine
        .initiate_call(&alice(), &alice_conn, &f.chat, CallKind::Video, vec![bob()])
        .await
        .unwrap();
    f.engine.end_call(&second, &alice(), None).await.unwrap();

    let history = f.engine.call_history(&f.chat).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|s| s.status.is_terminal()));
}
