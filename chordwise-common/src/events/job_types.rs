//! Job lifecycle types
//!
//! A processing job moves through a monotonic state machine:
//! pending → processing → {completed | failed}. No job re-enters a prior
//! state; completed and failed are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pitch-class names, index 0 = C
pub const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Processing job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, execution not yet started
    Pending,
    /// Background derivation in progress
    Processing,
    /// Derivation finished, results present
    Completed,
    /// Derivation failed, error message present
    Failed,
}

impl JobStatus {
    /// Terminal states admit no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the monotonic state machine permits `self → next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Major/minor mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
        }
    }
}

/// Estimated musical key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignature {
    /// Tonic name, e.g. "C", "F#"
    pub tonic: String,
    pub mode: Mode,
}

impl KeySignature {
    /// Build from a pitch-class index (0 = C) and mode
    pub fn from_pitch_class(pitch_class: usize, mode: Mode) -> Self {
        Self {
            tonic: PITCH_CLASS_NAMES[pitch_class % 12].to_string(),
            mode,
        }
    }

    /// Pitch-class index of the tonic (0 = C), None for unknown names
    pub fn pitch_class(&self) -> Option<usize> {
        PITCH_CLASS_NAMES.iter().position(|n| *n == self.tonic)
    }
}

impl std::fmt::Display for KeySignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.tonic, self.mode.as_str())
    }
}

/// One chord segment of the derived chord timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordSegment {
    pub start_seconds: f64,
    pub end_seconds: f64,
    /// Chord label, e.g. "C", "Am", "F#m"
    pub chord: String,
}

/// Derived musical metadata, the results payload of a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetadata {
    pub tempo_bpm: f64,
    pub key: KeySignature,
    pub chord_segments: Vec<ChordSegment>,
}

/// Point-in-time view of a processing job
///
/// `seq` increases with every store write; subscribers drop updates whose
/// sequence number is not newer than the last one they observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub progress_percentage: u8,
    pub current_step: String,
    pub source_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<DerivedMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// Rough completion estimate from elapsed time and progress so far;
    /// None before any measurable progress or after a terminal state
    pub fn estimated_remaining_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        if self.status.is_terminal() || self.progress_percentage == 0 {
            return None;
        }
        let elapsed = (now - self.created_at).num_seconds().max(0) as f64;
        let rate = elapsed / self.progress_percentage as f64;
        let remaining = (100u8.saturating_sub(self.progress_percentage)) as f64 * rate;
        Some(remaining as u64)
    }
}
