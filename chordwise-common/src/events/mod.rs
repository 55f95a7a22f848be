//! Wire event types for the notification fabric
//!
//! Both directions of the persistent connection speak a closed set of
//! tagged variants. Inbound frames deserialize into [`ClientEvent`] and are
//! dispatched through one handler per connection; outbound frames are
//! [`ServerEvent`] values serialized as they are sent.

mod job_types;
mod practice_types;

pub use job_types::{
    ChordSegment, DerivedMetadata, JobSnapshot, JobStatus, KeySignature, Mode, PITCH_CLASS_NAMES,
};
pub use practice_types::{PracticeFeedback, PracticePayload};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events a client may send over the persistent connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe to progress updates for a job
    SubscribeJob { job_id: String },
    /// Unsubscribe from a job; repeating is a no-op
    UnsubscribeJob { job_id: String },
    /// Join a practice session room (must be owned by the caller)
    JoinSession { session_id: String },
    /// Leave a practice session room; repeating is a no-op
    LeaveSession { session_id: String },
    /// Publish practice telemetry to the other room members
    PracticeData {
        #[serde(flatten)]
        payload: PracticePayload,
    },
    /// Liveness probe
    Ping,
}

impl ClientEvent {
    /// Event tag as transmitted on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::SubscribeJob { .. } => "subscribe_job",
            ClientEvent::UnsubscribeJob { .. } => "unsubscribe_job",
            ClientEvent::JoinSession { .. } => "join_session",
            ClientEvent::LeaveSession { .. } => "leave_session",
            ClientEvent::PracticeData { .. } => "practice_data",
            ClientEvent::Ping => "ping",
        }
    }
}

/// Events the server pushes to connected clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake acknowledgment, sent once after authentication
    Connected {
        message: String,
        timestamp: DateTime<Utc>,
        identity: String,
    },
    /// Job progress snapshot; `seq` orders updates per job
    JobUpdate {
        job_id: String,
        seq: i64,
        status: JobStatus,
        progress_percentage: u8,
        current_step: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        results: Option<DerivedMetadata>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    SessionJoined { session_id: String },
    SessionLeft { session_id: String },
    /// Practice telemetry from another member of the room
    PracticeFeedback {
        #[serde(flatten)]
        feedback: PracticeFeedback,
    },
    /// Structured error surfaced to the requester
    Error { message: String, code: String },
    Pong { timestamp: DateTime<Utc> },
}

impl ServerEvent {
    /// Event tag as transmitted on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::JobUpdate { .. } => "job_update",
            ServerEvent::SessionJoined { .. } => "session_joined",
            ServerEvent::SessionLeft { .. } => "session_left",
            ServerEvent::PracticeFeedback { .. } => "practice_feedback",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong { .. } => "pong",
        }
    }

    /// Build a `job_update` event from a store snapshot
    pub fn job_update(snapshot: &JobSnapshot) -> Self {
        ServerEvent::JobUpdate {
            job_id: snapshot.job_id.clone(),
            seq: snapshot.seq,
            status: snapshot.status,
            progress_percentage: snapshot.progress_percentage,
            current_step: snapshot.current_step.clone(),
            results: snapshot.results.clone(),
            error_message: snapshot.error_message.clone(),
        }
    }

    /// Build a structured `error` event from a common error
    pub fn from_error(err: &crate::Error) -> Self {
        ServerEvent::Error {
            message: err.to_string(),
            code: err.code().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_tags() {
        let json = r#"{"type":"subscribe_job","job_id":"job_1700000000_x7y2z9"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match &event {
            ClientEvent::SubscribeJob { job_id } => {
                assert_eq!(job_id, "job_1700000000_x7y2z9")
            }
            other => panic!("wrong variant: {:?}", other),
        }
        assert_eq!(event.event_type(), "subscribe_job");

        let ping: ClientEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping.event_type(), "ping");
    }

    #[test]
    fn test_practice_data_flattened() {
        let json = r#"{
            "type": "practice_data",
            "session_id": "sess-1",
            "timestamp": 12.5,
            "current_chord": "Am",
            "accuracy": 0.92,
            "mistake_detected": false
        }"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::PracticeData { payload } => {
                assert_eq!(payload.session_id, "sess-1");
                assert_eq!(payload.current_chord, "Am");
                assert!(payload.pitch_data.is_none());
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_inbound_event_rejected() {
        let json = r#"{"type":"drop_tables"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn test_server_event_serialization() {
        let event = ServerEvent::Pong {
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"pong\""));

        let err = ServerEvent::from_error(&crate::Error::NotFound("job_x".into()));
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"code\":\"NOT_FOUND\""));
        assert!(json.contains("\"type\":\"error\""));
    }

    #[test]
    fn test_job_update_omits_absent_fields() {
        let snapshot = JobSnapshot {
            job_id: "job_1700000000_x7y2z9".to_string(),
            status: JobStatus::Processing,
            progress_percentage: 40,
            current_step: "Analyzing audio features".to_string(),
            source_reference: "https://example.com/watch?v=abc12345678".to_string(),
            results: None,
            error_message: None,
            seq: 2,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&ServerEvent::job_update(&snapshot)).unwrap();
        assert!(json.contains("\"type\":\"job_update\""));
        assert!(json.contains("\"seq\":2"));
        assert!(!json.contains("results"));
        assert!(!json.contains("error_message"));
    }

    #[test]
    fn test_practice_feedback_flattened_fanout() {
        let payload = PracticePayload {
            session_id: "sess-1".to_string(),
            timestamp: 3.25,
            current_chord: "G".to_string(),
            accuracy: 0.8,
            mistake_detected: true,
            encouragement: Some("almost".to_string()),
            pitch_data: Some(serde_json::json!({"f0": 196.0})),
            timing_data: None,
        };
        let feedback = PracticeFeedback::from_payload(&payload, "user-7");
        let event = ServerEvent::PracticeFeedback { feedback };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"practice_feedback\""));
        assert!(json.contains("\"sender_identity\":\"user-7\""));
        // Raw detail stays server-side
        assert!(!json.contains("pitch_data"));
    }
}
