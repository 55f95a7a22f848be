//! End-to-end fabric tests: submission, subscription lifecycle, monitors,
//! session fan-out, and disconnect cleanup, driven through the same
//! dispatch path the WebSocket handler uses.

use async_trait::async_trait;
use chordwise_common::api::auth::sign_token;
use chordwise_common::config::ServerConfig;
use chordwise_common::events::{
    ChordSegment, ClientEvent, DerivedMetadata, JobStatus, KeySignature, Mode, PracticePayload,
    ServerEvent,
};
use chordwise_common::Error;
use chordwise_server::analysis::{DerivationError, Deriver, ProgressReporter};
use chordwise_server::db::init_database_pool;
use chordwise_server::jobs::SourceReference;
use chordwise_server::realtime::connection::handle_client_event;
use chordwise_server::realtime::{DbRevocationCache, SharedSecretVerifier};
use chordwise_server::AppState;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

const SECRET: i64 = 987654;
const SOURCE: &str = "https://example.com/watch?v=abc12345678";

/// Deriver that pauses long enough for tests to observe the processing
/// phase, then completes or fails
struct PacedDeriver {
    fail: bool,
    pace: Duration,
}

#[async_trait]
impl Deriver for PacedDeriver {
    async fn derive(
        &self,
        _source: &SourceReference,
        progress: &ProgressReporter,
    ) -> Result<DerivedMetadata, DerivationError> {
        progress.report(10, "Fetching source audio");
        tokio::time::sleep(self.pace).await;
        progress.report(45, "Analyzing audio features");
        tokio::time::sleep(self.pace).await;
        if self.fail {
            return Err(DerivationError::AnalysisFailed("decoder crashed".to_string()));
        }
        progress.report(80, "Estimating key and chords");
        Ok(DerivedMetadata {
            tempo_bpm: 92.0,
            key: KeySignature::from_pitch_class(9, Mode::Minor),
            chord_segments: vec![ChordSegment {
                start_seconds: 0.0,
                end_seconds: 4.0,
                chord: "Am".to_string(),
            }],
        })
    }
}

async fn test_state(fail: bool) -> AppState {
    let pool = init_database_pool(":memory:").await.unwrap();
    let config = ServerConfig {
        database_path: ":memory:".to_string(),
        shared_secret: SECRET,
        monitor_poll_interval_ms: 20,
        handshake_timeout_ms: 500,
        ..Default::default()
    };
    AppState::new(
        pool.clone(),
        config,
        Arc::new(PacedDeriver {
            fail,
            pace: Duration::from_millis(30),
        }),
        Arc::new(SharedSecretVerifier::new(SECRET)),
        Arc::new(DbRevocationCache::new(pool)),
    )
}

/// Register a fake active connection and return its event stream
async fn connect(state: &AppState, identity: &str) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
    let connection_id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    state.registry.register(connection_id, identity, tx).await;
    (connection_id, rx)
}

async fn await_terminal(state: &AppState, job_id: &str) {
    for _ in 0..400 {
        let snapshot = state.orchestrator.status(job_id).await.unwrap();
        if snapshot.status.is_terminal() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never reached a terminal state", job_id);
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_submission_scenario() {
    let state = test_state(false).await;
    let snapshot = state.orchestrator.submit(SOURCE).await.unwrap();

    // Immediate acknowledgment: pending, well-formed id
    assert_eq!(snapshot.status, JobStatus::Pending);
    assert!(snapshot.job_id.starts_with("job_"));

    await_terminal(&state, &snapshot.job_id).await;
    let done = state.orchestrator.status(&snapshot.job_id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    let results = done.results.expect("completed job carries results");
    assert_eq!(results.key.to_string(), "A minor");
    assert!(done.error_message.is_none());
}

#[tokio::test]
async fn test_failed_submission_scenario() {
    let state = test_state(true).await;
    let snapshot = state.orchestrator.submit(SOURCE).await.unwrap();
    await_terminal(&state, &snapshot.job_id).await;

    let done = state.orchestrator.status(&snapshot.job_id).await.unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.results.is_none());
    assert!(done
        .error_message
        .as_deref()
        .unwrap()
        .contains("decoder crashed"));
}

#[tokio::test]
async fn test_subscribe_unknown_job_creates_no_state() {
    let state = test_state(false).await;
    let (conn, mut rx) = connect(&state, "user-1").await;

    let err = handle_client_event(
        &state,
        conn,
        "user-1",
        ClientEvent::SubscribeJob {
            job_id: "job_1700000000_zzzzzz".to_string(),
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(state.registry.job_subscriber_count("job_1700000000_zzzzzz").await, 0);
    assert_eq!(state.registry.monitor_count().await, 0);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_one_monitor_regardless_of_subscriber_count() {
    let state = test_state(false).await;
    let snapshot = state.orchestrator.submit(SOURCE).await.unwrap();
    let job_id = snapshot.job_id.clone();

    let (conn_a, _rx_a) = connect(&state, "user-1").await;
    let (conn_b, _rx_b) = connect(&state, "user-2").await;

    let subscribe = || ClientEvent::SubscribeJob {
        job_id: job_id.clone(),
    };
    handle_client_event(&state, conn_a, "user-1", subscribe()).await.unwrap();
    handle_client_event(&state, conn_b, "user-2", subscribe()).await.unwrap();

    assert_eq!(state.registry.monitor_count().await, 1);
    assert_eq!(state.registry.job_subscriber_count(&job_id).await, 2);

    handle_client_event(
        &state,
        conn_a,
        "user-1",
        ClientEvent::UnsubscribeJob {
            job_id: job_id.clone(),
        },
    )
    .await
    .unwrap();
    assert_eq!(state.registry.monitor_count().await, 1);

    handle_client_event(
        &state,
        conn_b,
        "user-2",
        ClientEvent::UnsubscribeJob {
            job_id: job_id.clone(),
        },
    )
    .await
    .unwrap();
    assert_eq!(state.registry.monitor_count().await, 0);
    assert_eq!(state.registry.job_subscriber_count(&job_id).await, 0);
}

#[tokio::test]
async fn test_subscriber_observes_monotonic_updates() {
    let state = test_state(false).await;
    let snapshot = state.orchestrator.submit(SOURCE).await.unwrap();
    let job_id = snapshot.job_id.clone();

    let (conn, mut rx) = connect(&state, "user-1").await;
    handle_client_event(
        &state,
        conn,
        "user-1",
        ClientEvent::SubscribeJob {
            job_id: job_id.clone(),
        },
    )
    .await
    .unwrap();

    await_terminal(&state, &job_id).await;
    // Let the monitor take its final tick
    tokio::time::sleep(Duration::from_millis(80)).await;

    let mut last_seq = -1;
    let mut last_status_rank = 0;
    let mut terminal_updates = 0;
    for event in drain(&mut rx) {
        let ServerEvent::JobUpdate { seq, status, .. } = event else {
            continue;
        };
        assert!(seq >= last_seq, "older snapshot after newer one");
        last_seq = seq;

        let rank = match status {
            JobStatus::Pending => 1,
            JobStatus::Processing => 2,
            JobStatus::Completed | JobStatus::Failed => 3,
        };
        assert!(rank >= last_status_rank, "status moved backwards");
        last_status_rank = rank;

        if status.is_terminal() {
            terminal_updates += 1;
        }
    }
    assert_eq!(terminal_updates, 1, "terminal state delivered exactly once");

    // Monitor stopped itself on the terminal snapshot although the
    // subscriber never unsubscribed
    assert_eq!(state.registry.monitor_count().await, 0);
}

#[tokio::test]
async fn test_late_subscriber_sees_terminal_snapshot() {
    let state = test_state(false).await;
    let snapshot = state.orchestrator.submit(SOURCE).await.unwrap();
    await_terminal(&state, &snapshot.job_id).await;

    let (conn, mut rx) = connect(&state, "user-1").await;
    handle_client_event(
        &state,
        conn,
        "user-1",
        ClientEvent::SubscribeJob {
            job_id: snapshot.job_id.clone(),
        },
    )
    .await
    .unwrap();

    let events = drain(&mut rx);
    let got_terminal = events.iter().any(|event| {
        matches!(
            event,
            ServerEvent::JobUpdate {
                status: JobStatus::Completed,
                ..
            }
        )
    });
    assert!(got_terminal, "immediate snapshot must carry the terminal state");
}

#[tokio::test]
async fn test_practice_fanout_excludes_sender() {
    let state = test_state(false).await;
    state.sessions.create_session("sess-1", "user-1").await.unwrap();

    // The same identity on three devices
    let (sender, mut sender_rx) = connect(&state, "user-1").await;
    let (peer_a, mut peer_a_rx) = connect(&state, "user-1").await;
    let (peer_b, mut peer_b_rx) = connect(&state, "user-1").await;

    for conn in [sender, peer_a, peer_b] {
        handle_client_event(
            &state,
            conn,
            "user-1",
            ClientEvent::JoinSession {
                session_id: "sess-1".to_string(),
            },
        )
        .await
        .unwrap();
    }

    let payload = PracticePayload {
        session_id: "sess-1".to_string(),
        timestamp: 7.5,
        current_chord: "F".to_string(),
        accuracy: 0.7,
        mistake_detected: true,
        encouragement: Some("keep the wrist loose".to_string()),
        pitch_data: None,
        timing_data: None,
    };
    handle_client_event(
        &state,
        sender,
        "user-1",
        ClientEvent::PracticeData { payload },
    )
    .await
    .unwrap();

    let sender_events = drain(&mut sender_rx);
    assert!(
        !sender_events
            .iter()
            .any(|e| matches!(e, ServerEvent::PracticeFeedback { .. })),
        "sender must not receive its own event"
    );

    for rx in [&mut peer_a_rx, &mut peer_b_rx] {
        let events = drain(rx);
        let feedback = events
            .iter()
            .find_map(|e| match e {
                ServerEvent::PracticeFeedback { feedback } => Some(feedback),
                _ => None,
            })
            .expect("room member receives feedback");
        assert_eq!(feedback.sender_identity, "user-1");
        assert_eq!(feedback.current_chord, "F");
    }
}

#[tokio::test]
async fn test_session_ownership_gating() {
    let state = test_state(false).await;
    state.sessions.create_session("sess-1", "user-1").await.unwrap();

    let (conn, _rx) = connect(&state, "user-2").await;

    let err = handle_client_event(
        &state,
        conn,
        "user-2",
        ClientEvent::JoinSession {
            session_id: "sess-1".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Authorization(_)));

    let err = handle_client_event(
        &state,
        conn,
        "user-2",
        ClientEvent::JoinSession {
            session_id: "sess-unknown".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    assert_eq!(state.registry.room_member_count("sess-1").await, 0);
}

#[tokio::test]
async fn test_practice_data_requires_membership() {
    let state = test_state(false).await;
    state.sessions.create_session("sess-1", "user-1").await.unwrap();
    let (conn, _rx) = connect(&state, "user-1").await;

    let payload = PracticePayload {
        session_id: "sess-1".to_string(),
        timestamp: 1.0,
        current_chord: "C".to_string(),
        accuracy: 1.0,
        mistake_detected: false,
        encouragement: None,
        pitch_data: None,
        timing_data: None,
    };
    let err = handle_client_event(
        &state,
        conn,
        "user-1",
        ClientEvent::PracticeData { payload },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Authorization(_)));
}

#[tokio::test]
async fn test_disconnect_cleanup() {
    let state = test_state(false).await;
    state.sessions.create_session("sess-1", "user-1").await.unwrap();
    let snapshot = state.orchestrator.submit(SOURCE).await.unwrap();
    let job_id = snapshot.job_id.clone();

    let (conn, mut rx) = connect(&state, "user-1").await;
    handle_client_event(
        &state,
        conn,
        "user-1",
        ClientEvent::SubscribeJob {
            job_id: job_id.clone(),
        },
    )
    .await
    .unwrap();
    handle_client_event(
        &state,
        conn,
        "user-1",
        ClientEvent::JoinSession {
            session_id: "sess-1".to_string(),
        },
    )
    .await
    .unwrap();

    // Connection closes: the same cleanup the socket handler runs
    let orphaned = state.registry.remove_connection(conn).await;
    for handle in orphaned {
        handle.stop();
    }

    assert_eq!(state.registry.connection_count().await, 0);
    assert_eq!(state.registry.job_subscriber_count(&job_id).await, 0);
    assert_eq!(state.registry.room_member_count("sess-1").await, 0);
    assert_eq!(state.registry.monitor_count().await, 0);

    // Nothing is delivered after close
    drain(&mut rx);
    await_terminal(&state, &job_id).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_ping_pong() {
    let state = test_state(false).await;
    let (conn, mut rx) = connect(&state, "user-1").await;

    handle_client_event(&state, conn, "user-1", ClientEvent::Ping)
        .await
        .unwrap();
    let events = drain(&mut rx);
    assert!(matches!(events.as_slice(), [ServerEvent::Pong { .. }]));
}

#[tokio::test]
async fn test_expired_token_leaves_no_registry_state() {
    let state = test_state(false).await;
    let expired = sign_token("user-1", Utc::now().timestamp() - 60, SECRET);

    let err = state.auth.authenticate(Some(&expired)).await.unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    assert_eq!(state.registry.connection_count().await, 0);
}
