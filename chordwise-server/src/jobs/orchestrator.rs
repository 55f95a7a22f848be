//! Job orchestration
//!
//! Owns the job lifecycle: submission validates the source reference and
//! persists a pending job, execution runs on a spawned task that never
//! blocks the caller, and every store write triggers exactly one broadcast
//! through the notifier.

use crate::analysis::{Deriver, ProgressReporter};
use crate::db::JobStore;
use crate::jobs::source::SourceReference;
use crate::realtime::notifier::JobNotifier;
use chordwise_common::events::JobSnapshot;
use chordwise_common::{Error, Result};
use chrono::Utc;
use std::sync::Arc;

const JOB_ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a job id of the form `job_<unix-seconds>_<6 base36 chars>`
fn generate_job_id() -> String {
    let mut n = uuid::Uuid::new_v4().as_u128();
    let mut suffix = [0u8; 6];
    for slot in suffix.iter_mut() {
        *slot = JOB_ID_ALPHABET[(n % 36) as usize];
        n /= 36;
    }
    format!(
        "job_{}_{}",
        Utc::now().timestamp(),
        std::str::from_utf8(&suffix).expect("alphabet is ASCII")
    )
}

/// Coordinates job submission and background execution
#[derive(Clone)]
pub struct JobOrchestrator {
    store: JobStore,
    deriver: Arc<dyn Deriver>,
    notifier: Arc<JobNotifier>,
}

impl JobOrchestrator {
    pub fn new(store: JobStore, deriver: Arc<dyn Deriver>, notifier: Arc<JobNotifier>) -> Self {
        Self {
            store,
            deriver,
            notifier,
        }
    }

    /// Validate and accept a submission. Returns the pending snapshot
    /// immediately; execution continues on a background task.
    pub async fn submit(&self, raw_source: &str) -> Result<JobSnapshot> {
        let source = SourceReference::parse(raw_source)?;
        let job_id = generate_job_id();
        let snapshot = self.store.create(&job_id, source.url()).await?;

        tracing::info!(
            job_id = %job_id,
            video_id = %source.video_id(),
            "Job submitted"
        );

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run_pipeline(&job_id, &source).await {
                // Store write failures land here; the derivation's own
                // failures were already recorded on the job.
                tracing::error!(job_id = %job_id, error = %e, "Job pipeline aborted");
            }
        });

        Ok(snapshot)
    }

    /// Read-only snapshot lookup
    pub async fn status(&self, job_id: &str) -> Result<JobSnapshot> {
        self.store
            .load(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job not found: {}", job_id)))
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    async fn run_pipeline(&self, job_id: &str, source: &SourceReference) -> Result<()> {
        self.advance(job_id, 5, "Starting derivation").await?;

        let (reporter, mut progress_rx) = ProgressReporter::channel();
        let derive_fut = self.deriver.derive(source, &reporter);
        tokio::pin!(derive_fut);

        // Drain stage reports while the derivation runs; each report is a
        // store write plus one broadcast.
        let outcome = loop {
            tokio::select! {
                stage = progress_rx.recv() => {
                    if let Some(stage) = stage {
                        self.advance(job_id, stage.percent, &stage.step).await?;
                    }
                }
                result = &mut derive_fut => break result,
            }
        };

        // Reports buffered at completion time still precede the terminal
        // write.
        while let Ok(stage) = progress_rx.try_recv() {
            self.advance(job_id, stage.percent, &stage.step).await?;
        }

        match outcome {
            Ok(metadata) => {
                let snapshot = self.store.complete(job_id, &metadata).await?;
                tracing::info!(
                    job_id = %job_id,
                    tempo_bpm = metadata.tempo_bpm,
                    key = %metadata.key,
                    "Job completed"
                );
                self.notifier.broadcast(&snapshot).await;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Derivation failed");
                let snapshot = self.store.fail(job_id, &e.to_string()).await?;
                self.notifier.broadcast(&snapshot).await;
            }
        }
        Ok(())
    }

    async fn advance(&self, job_id: &str, percent: u8, step: &str) -> Result<()> {
        let snapshot = self.store.mark_processing(job_id, step, percent).await?;
        self.notifier.broadcast(&snapshot).await;
        Ok(())
    }
}
