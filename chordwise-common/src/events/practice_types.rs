//! Practice session event payloads

use serde::{Deserialize, Serialize};

/// Inbound practice telemetry from a client in a session room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticePayload {
    pub session_id: String,
    /// Client-side timestamp, seconds into the practice take
    pub timestamp: f64,
    pub current_chord: String,
    /// Detection accuracy 0.0–1.0
    pub accuracy: f64,
    pub mistake_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encouragement: Option<String>,
    /// Raw pitch detail, persisted but not fanned out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch_data: Option<serde_json::Value>,
    /// Raw timing detail, persisted but not fanned out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing_data: Option<serde_json::Value>,
}

/// Outbound feedback fanned out to the other members of a session room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeFeedback {
    pub session_id: String,
    pub timestamp: f64,
    pub current_chord: String,
    pub accuracy: f64,
    pub mistake_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encouragement: Option<String>,
    pub sender_identity: String,
}

impl PracticeFeedback {
    /// Build the fan-out feedback from an inbound payload, attaching the
    /// sender identity and dropping the raw detail fields
    pub fn from_payload(payload: &PracticePayload, sender_identity: &str) -> Self {
        Self {
            session_id: payload.session_id.clone(),
            timestamp: payload.timestamp,
            current_chord: payload.current_chord.clone(),
            accuracy: payload.accuracy,
            mistake_detected: payload.mistake_detected,
            encouragement: payload.encouragement.clone(),
            sender_identity: sender_identity.to_string(),
        }
    }
}
