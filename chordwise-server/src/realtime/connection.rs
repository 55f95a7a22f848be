//! Persistent connection handling
//!
//! Connections progress connecting → authenticated → active → closed. The
//! credential is verified before the upgrade completes, so a refused
//! connection never touches the registry. Once active, inbound frames are
//! deserialized into the closed [`ClientEvent`] set and dispatched through
//! one handler; a forward task drains the connection's outbound channel
//! into the socket. On close every membership the connection holds is
//! detached before the connection object is dropped.

use crate::error::ApiError;
use crate::jobs::monitor::spawn_monitor;
use crate::realtime::registry::ConnectionId;
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use chordwise_common::events::{ClientEvent, PracticeFeedback, ServerEvent};
use chordwise_common::{Error, Result};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Handshake parameters
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Pull the credential out of the handshake: `?token=` query parameter or
/// `Authorization: Bearer` header
fn handshake_token(params: &WsQuery, headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(token) = &params.token {
        return Some(token.clone());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

/// GET /ws — authenticate, then upgrade
///
/// The credential is checked before the upgrade is accepted, so a refused
/// connection never reaches the socket loop or the registry.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsQuery>,
    headers: axum::http::HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let token = handshake_token(&params, &headers);
    let identity = match state.auth.authenticate(token.as_deref()).await {
        Ok(identity) => identity,
        Err(err) => {
            tracing::info!(error = %err, "Connection refused at handshake");
            return ApiError::from(err).into_response();
        }
    };

    match ws {
        Some(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state, identity)),
        None => ApiError::from(Error::Validation(
            "websocket upgrade required".to_string(),
        ))
        .into_response(),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: String) {
    let connection_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.registry.register(connection_id, &identity, tx).await;

    tracing::info!(
        connection_id = %connection_id,
        identity = %identity,
        "Connection active"
    );

    let (mut sink, mut stream) = socket.split();

    // Forward task: everything addressed to this connection goes out
    // through its own channel, in order.
    let forward = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    state
        .registry
        .send_to(
            connection_id,
            ServerEvent::Connected {
                message: "connected".to_string(),
                timestamp: Utc::now(),
                identity: identity.clone(),
            },
        )
        .await;

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                dispatch_frame(&state, connection_id, &identity, &text).await;
            }
            Message::Close(_) => break,
            // Ping/Pong control frames are answered by the transport
            _ => {}
        }
    }

    // Disconnect cleanup: detach every membership, then stop any monitors
    // left without subscribers.
    let orphaned = state.registry.remove_connection(connection_id).await;
    for handle in orphaned {
        tracing::debug!(job_id = %handle.job_id(), "Stopping monitor after last subscriber left");
        handle.stop();
    }
    forward.abort();

    tracing::info!(
        connection_id = %connection_id,
        identity = %identity,
        "Connection closed"
    );
}

async fn dispatch_frame(state: &AppState, connection_id: ConnectionId, identity: &str, text: &str) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            let err = Error::Validation(format!("unrecognized event: {}", e));
            state
                .registry
                .send_to(connection_id, ServerEvent::from_error(&err))
                .await;
            return;
        }
    };

    if let Err(err) = handle_client_event(state, connection_id, identity, event).await {
        state
            .registry
            .send_to(connection_id, ServerEvent::from_error(&err))
            .await;
    }
}

/// Dispatch one inbound event for an active connection.
///
/// Public so the fabric can be exercised end-to-end without a socket.
pub async fn handle_client_event(
    state: &AppState,
    connection_id: ConnectionId,
    identity: &str,
    event: ClientEvent,
) -> Result<()> {
    match event {
        ClientEvent::SubscribeJob { job_id } => {
            subscribe_job(state, connection_id, &job_id).await
        }
        ClientEvent::UnsubscribeJob { job_id } => {
            if let Some(handle) = state.registry.unsubscribe_job(connection_id, &job_id).await {
                handle.stop();
            }
            Ok(())
        }
        ClientEvent::JoinSession { session_id } => {
            join_session(state, connection_id, identity, &session_id).await
        }
        ClientEvent::LeaveSession { session_id } => {
            state.registry.leave_session(connection_id, &session_id).await;
            state
                .registry
                .send_to(connection_id, ServerEvent::SessionLeft { session_id })
                .await;
            Ok(())
        }
        ClientEvent::PracticeData { payload } => {
            publish_practice_event(state, connection_id, identity, payload).await
        }
        ClientEvent::Ping => {
            state
                .registry
                .send_to(
                    connection_id,
                    ServerEvent::Pong {
                        timestamp: Utc::now(),
                    },
                )
                .await;
            Ok(())
        }
    }
}

/// Subscribe a connection to a job: registry membership, monitor startup
/// for the first subscriber, and an immediate snapshot to the requester.
async fn subscribe_job(state: &AppState, connection_id: ConnectionId, job_id: &str) -> Result<()> {
    // Unknown job ids fail before any membership is created
    let snapshot = state.orchestrator.status(job_id).await?;

    let outcome = state.registry.subscribe_job(connection_id, job_id).await;
    if outcome.first_subscriber {
        let handle = spawn_monitor(
            job_id.to_string(),
            state.orchestrator.store().clone(),
            state.notifier.clone(),
            state.registry.clone(),
            Duration::from_millis(state.config.monitor_poll_interval_ms),
        );
        // The subscriber may already be gone again; the registry hands the
        // handle back and we stop it instead of leaking the timer.
        if let Some(rejected) = state.registry.install_monitor(job_id, handle).await {
            rejected.stop();
        }
    }

    // Do not wait for the next poll tick
    state.notifier.send_snapshot_to(connection_id, &snapshot).await;
    Ok(())
}

/// Join a session room, gated by ownership
async fn join_session(
    state: &AppState,
    connection_id: ConnectionId,
    identity: &str,
    session_id: &str,
) -> Result<()> {
    let owner = state
        .sessions
        .owner_of(session_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("session not found: {}", session_id)))?;

    if owner != identity {
        return Err(Error::Authorization(format!(
            "session {} does not belong to {}",
            session_id, identity
        )));
    }

    state.registry.join_session(connection_id, session_id).await;
    state
        .registry
        .send_to(
            connection_id,
            ServerEvent::SessionJoined {
                session_id: session_id.to_string(),
            },
        )
        .await;
    Ok(())
}

/// Persist a practice event, then fan it out to every other room member
async fn publish_practice_event(
    state: &AppState,
    connection_id: ConnectionId,
    identity: &str,
    payload: chordwise_common::events::PracticePayload,
) -> Result<()> {
    if !state
        .registry
        .is_session_member(connection_id, &payload.session_id)
        .await
    {
        return Err(Error::Authorization(format!(
            "join session {} before publishing practice data",
            payload.session_id
        )));
    }

    // Append-only persistence; failures propagate to the requester
    state.sessions.append_practice_event(identity, &payload).await?;

    let feedback = PracticeFeedback::from_payload(&payload, identity);
    let session_id = payload.session_id.clone();
    state
        .registry
        .broadcast_session_except(
            &session_id,
            connection_id,
            &ServerEvent::PracticeFeedback { feedback },
        )
        .await;
    Ok(())
}
