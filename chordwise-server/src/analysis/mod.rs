//! Derivation collaborators
//!
//! The orchestrator consumes one opaque [`Deriver`]; the production
//! implementation composes a media fetch, an external feature analyzer, and
//! the key-estimation contract in [`key_profile`]. Signal processing itself
//! happens inside the analyzer binary and is out of scope here.

pub mod key_profile;

use crate::jobs::source::SourceReference;
use async_trait::async_trait;
use chordwise_common::events::{ChordSegment, DerivedMetadata};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Derivation pipeline failures; recorded on the job as status=failed
#[derive(Debug, Error)]
pub enum DerivationError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("analyzer unavailable: {0}")]
    AnalyzerUnavailable(String),

    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("analyzer output unreadable: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One stage-progress report from inside a derivation
#[derive(Debug, Clone)]
pub struct StageProgress {
    pub percent: u8,
    pub step: String,
}

/// Lossy progress channel handed to the deriver; the orchestrator drains
/// the receiving side and turns reports into store writes + broadcasts
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<StageProgress>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StageProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a stage boundary; dropped if nobody is listening
    pub fn report(&self, percent: u8, step: &str) {
        let _ = self.tx.send(StageProgress {
            percent,
            step: step.to_string(),
        });
    }
}

/// The derivation collaborator: source reference in, musical metadata out
#[async_trait]
pub trait Deriver: Send + Sync {
    async fn derive(
        &self,
        source: &SourceReference,
        progress: &ProgressReporter,
    ) -> Result<DerivedMetadata, DerivationError>;
}

/// Raw features produced by the analyzer for one piece of audio
#[derive(Debug, Clone)]
pub struct RawFeatures {
    pub tempo_bpm: f64,
    pub pitch_class_profile: [f64; 12],
    pub chord_segments: Vec<ChordSegment>,
}

/// A fetched media asset on local disk; the file is removed on drop
#[derive(Debug)]
pub struct MediaAsset {
    path: PathBuf,
}

impl MediaAsset {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for MediaAsset {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Media fetch collaborator
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceReference) -> Result<MediaAsset, DerivationError>;
}

/// Fetches the referenced media over HTTP into a temp file
pub struct HttpMediaFetcher {
    client: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new(timeout: Duration) -> Result<Self, DerivationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DerivationError::SourceUnavailable(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, source: &SourceReference) -> Result<MediaAsset, DerivationError> {
        let response = self
            .client
            .get(source.url())
            .send()
            .await
            .map_err(|e| DerivationError::SourceUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DerivationError::SourceUnavailable(format!(
                "{} returned {}",
                source.video_id(),
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DerivationError::SourceUnavailable(e.to_string()))?;

        let path = std::env::temp_dir().join(format!("chordwise_{}.media", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, &bytes).await?;
        Ok(MediaAsset::new(path))
    }
}

/// Feature extraction collaborator (opaque signal processing)
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn extract(&self, asset: &MediaAsset) -> Result<RawFeatures, DerivationError>;
}

/// JSON emitted by the external analyzer binary
#[derive(Debug, Deserialize)]
struct AnalyzerOutput {
    rhythm: AnalyzerRhythm,
    tonal: AnalyzerTonal,
    #[serde(default)]
    chords: Vec<AnalyzerChord>,
}

#[derive(Debug, Deserialize)]
struct AnalyzerRhythm {
    bpm: f64,
}

#[derive(Debug, Deserialize)]
struct AnalyzerTonal {
    pitch_class_profile: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct AnalyzerChord {
    start: f64,
    end: f64,
    label: String,
}

/// Client for the external command-line analyzer
///
/// Runs `<binary> <media-file>` and parses the JSON document the analyzer
/// writes to stdout.
pub struct AnalyzerClient {
    binary_path: String,
}

impl AnalyzerClient {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    fn parse_output(stdout: &[u8]) -> Result<RawFeatures, DerivationError> {
        let output: AnalyzerOutput = serde_json::from_slice(stdout)
            .map_err(|e| DerivationError::ParseError(e.to_string()))?;

        let profile: [f64; 12] = output
            .tonal
            .pitch_class_profile
            .as_slice()
            .try_into()
            .map_err(|_| {
                DerivationError::ParseError(format!(
                    "pitch_class_profile has {} elements, expected 12",
                    output.tonal.pitch_class_profile.len()
                ))
            })?;

        Ok(RawFeatures {
            tempo_bpm: output.rhythm.bpm,
            pitch_class_profile: profile,
            chord_segments: output
                .chords
                .into_iter()
                .map(|c| ChordSegment {
                    start_seconds: c.start,
                    end_seconds: c.end,
                    chord: c.label,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl FeatureExtractor for AnalyzerClient {
    async fn extract(&self, asset: &MediaAsset) -> Result<RawFeatures, DerivationError> {
        let output = tokio::process::Command::new(&self.binary_path)
            .arg(asset.path())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    DerivationError::AnalyzerUnavailable(self.binary_path.clone())
                }
                _ => DerivationError::AnalysisFailed(e.to_string()),
            })?;

        if !output.status.success() {
            return Err(DerivationError::AnalysisFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Self::parse_output(&output.stdout)
    }
}

/// Production deriver: fetch, extract, estimate
pub struct PipelineDeriver {
    fetcher: Arc<dyn MediaFetcher>,
    extractor: Arc<dyn FeatureExtractor>,
}

impl PipelineDeriver {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self { fetcher, extractor }
    }
}

#[async_trait]
impl Deriver for PipelineDeriver {
    async fn derive(
        &self,
        source: &SourceReference,
        progress: &ProgressReporter,
    ) -> Result<DerivedMetadata, DerivationError> {
        progress.report(10, "Fetching source audio");
        let asset = self.fetcher.fetch(source).await?;

        progress.report(45, "Analyzing audio features");
        let features = self.extractor.extract(&asset).await?;

        progress.report(80, "Estimating key and chords");
        let histogram = key_profile::chord_histogram(&features.chord_segments);
        let key = key_profile::estimate_key(&features.pitch_class_profile, &histogram);

        tracing::debug!(
            video_id = %source.video_id(),
            tempo_bpm = features.tempo_bpm,
            key = %key,
            segments = features.chord_segments.len(),
            "Derivation finished"
        );

        Ok(DerivedMetadata {
            tempo_bpm: features.tempo_bpm,
            key,
            chord_segments: features.chord_segments,
        })
    }
}
