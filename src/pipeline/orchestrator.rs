//! Cascade orchestrator: four independent image entry points plus the
//! tabular seizure screen.
//!
//! Every request moves through `received → preprocessed → scored → labeled →
//! done`, logged against a request id. Decoding, transforms, forward passes
//! and final-stage resolution run on the blocking pool under the configured
//! timeout. Nothing is retried; a final-stage resolution failure is reported
//! as such and never replaced by a default model.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::catalog::{ArchitectureCandidate, Subtype};
use super::resolver::ResolveError;
use super::seizure::{is_valid_csv, SeizureError};
use super::stages::{ClassificationResult, StageClassifier, StageError, StageKind};
use super::transform::{decode_rgb, TransformError};
use crate::core_state::CoreState;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("Invalid image: {0}")]
    InvalidImage(#[from] TransformError),

    #[error("Unknown subtype: {0}")]
    UnknownSubtype(String),

    #[error("Model unavailable for subtype {subtype}")]
    ModelUnavailable {
        subtype: Subtype,
        #[source]
        source: ResolveError,
    },

    #[error("Model resolution failed: {0}")]
    Resolve(#[source] ResolveError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Seizure(#[from] SeizureError),

    #[error("{0} stage is not configured")]
    StageUnavailable(&'static str),

    #[error("{stage} stage timed out after {}s", .after.as_secs())]
    Timeout { stage: &'static str, after: Duration },

    #[error("Inference task failed: {0}")]
    Join(String),
}

/// Stage-4 result with the subtype it was requested for and the
/// architecture the checkpoint resolved to.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub result: ClassificationResult,
    pub subtype: Subtype,
    pub candidate: ArchitectureCandidate,
}

// ── Request trace ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Received,
    Preprocessed,
    Scored,
    Labeled,
    Done,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Received => "received",
            Phase::Preprocessed => "preprocessed",
            Phase::Scored => "scored",
            Phase::Labeled => "labeled",
            Phase::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RequestTrace {
    id: Uuid,
    stage: &'static str,
    started: Instant,
}

impl RequestTrace {
    fn begin(stage: &'static str) -> Self {
        let trace = Self {
            id: Uuid::new_v4(),
            stage,
            started: Instant::now(),
        };
        trace.advance(Phase::Received);
        trace
    }

    fn advance(&self, phase: Phase) {
        debug!(request_id = %self.id, stage = self.stage, phase = phase.as_str(), "Request phase");
    }

    fn finish(&self, label: &str, confidence: Option<f32>) {
        info!(
            request_id = %self.id,
            stage = self.stage,
            phase = Phase::Done.as_str(),
            label,
            confidence,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Request complete"
        );
    }

    fn fail(&self, error: &CascadeError) {
        warn!(request_id = %self.id, stage = self.stage, error = %error, "Request failed");
    }
}

// ═══════════════════════════════════════════════════════════
// CascadeOrchestrator
// ═══════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct CascadeOrchestrator {
    state: Arc<CoreState>,
    timeout: Duration,
}

impl CascadeOrchestrator {
    pub fn new(state: Arc<CoreState>) -> Self {
        let timeout = state.config.inference_timeout();
        Self { state, timeout }
    }

    pub fn state(&self) -> &Arc<CoreState> {
        &self.state
    }

    pub async fn screen_modality(&self, image: Vec<u8>) -> Result<ClassificationResult, CascadeError> {
        self.classify_startup_stage(StageKind::Modality, "modality", image)
            .await
    }

    pub async fn classify_family(&self, image: Vec<u8>) -> Result<ClassificationResult, CascadeError> {
        self.classify_startup_stage(StageKind::Family, "family", image)
            .await
    }

    pub async fn classify_subtype(&self, image: Vec<u8>) -> Result<ClassificationResult, CascadeError> {
        self.classify_startup_stage(StageKind::Subtype, "subtype", image)
            .await
    }

    /// Resolve the subtype's final checkpoint and classify `image` with it.
    pub async fn diagnose(&self, image: Vec<u8>, subtype: Subtype) -> Result<Diagnosis, CascadeError> {
        let trace = RequestTrace::begin("final");
        let state = Arc::clone(&self.state);

        let outcome = self
            .run_blocking(trace.stage, move || {
                let rgb = decode_rgb(&image)?;
                let model = state.final_model(subtype).map_err(|e| match e {
                    ResolveError::Unresolvable { .. } => CascadeError::ModelUnavailable {
                        subtype,
                        source: e,
                    },
                    other => CascadeError::Resolve(other),
                })?;
                let candidate = model.candidate();
                let classifier = StageClassifier::new(StageKind::Final(subtype), model);
                let result = run_stage(&classifier, &rgb, &trace)?;
                Ok(Diagnosis {
                    result,
                    subtype,
                    candidate,
                })
            })
            .await;

        match &outcome {
            Ok(diagnosis) => {
                trace.finish(&diagnosis.result.label, Some(diagnosis.result.confidence))
            }
            Err(e) => trace.fail(e),
        }
        outcome
    }

    /// Parse a subtype name, rejecting unknown values before any model I/O.
    pub fn parse_subtype(raw: &str) -> Result<Subtype, CascadeError> {
        raw.trim()
            .parse()
            .map_err(|_| CascadeError::UnknownSubtype(raw.to_string()))
    }

    /// Label each CSV row as seizure or non-seizure.
    pub async fn screen_seizure(&self, csv: Vec<u8>) -> Result<Vec<&'static str>, CascadeError> {
        let screen = self
            .state
            .seizure()
            .cloned()
            .ok_or(CascadeError::StageUnavailable("seizure"))?;
        let trace = RequestTrace::begin("seizure");

        let outcome = self
            .run_blocking(trace.stage, move || {
                let labels = screen.screen(&csv)?;
                trace.advance(Phase::Labeled);
                Ok(labels)
            })
            .await;

        match &outcome {
            Ok(labels) => trace.finish(&format!("{} rows", labels.len()), None),
            Err(e) => trace.fail(e),
        }
        outcome
    }

    /// Tabular acceptance check for CSV uploads to the modality endpoint.
    pub fn accepts_csv(&self, csv: &[u8]) -> bool {
        is_valid_csv(csv, self.state.csv_reference())
    }

    async fn classify_startup_stage(
        &self,
        kind: StageKind,
        stage: &'static str,
        image: Vec<u8>,
    ) -> Result<ClassificationResult, CascadeError> {
        let classifier = self
            .state
            .classifier(kind)
            .cloned()
            .ok_or(CascadeError::StageUnavailable(stage))?;
        let trace = RequestTrace::begin(stage);

        let outcome = self
            .run_blocking(stage, move || {
                let rgb = decode_rgb(&image)?;
                run_stage(&classifier, &rgb, &trace)
            })
            .await;

        match &outcome {
            Ok(result) => trace.finish(&result.label, Some(result.confidence)),
            Err(e) => trace.fail(e),
        }
        outcome
    }

    /// Run `work` on the blocking pool under the request timeout. On timeout
    /// the task keeps its model until it finishes on its own.
    async fn run_blocking<T, F>(&self, stage: &'static str, work: F) -> Result<T, CascadeError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, CascadeError> + Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(work);
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(CascadeError::Join(join.to_string())),
            Err(_) => Err(CascadeError::Timeout {
                stage,
                after: self.timeout,
            }),
        }
    }
}

fn run_stage(
    classifier: &StageClassifier,
    image: &image::RgbImage,
    trace: &RequestTrace,
) -> Result<ClassificationResult, CascadeError> {
    let tensor = classifier.preprocess(image)?;
    trace.advance(Phase::Preprocessed);
    let output = classifier.score(&tensor)?;
    trace.advance(Phase::Scored);
    let result = classifier.kind().interpret(&output)?;
    trace.advance(Phase::Labeled);
    Ok(result)
}
