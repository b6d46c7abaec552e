//! Architecture resolution: find the first candidate a checkpoint binds to.
//!
//! Final-stage checkpoints were trained elsewhere and saved without their
//! architecture. Resolution treats that as a small ordered search: walk the
//! slot's candidates, instantiate each, bind, and keep the first one that
//! binds. This is best-effort recovery, not a proof that the candidate is the
//! architecture the weights were trained on.
//!
//! Failure classification:
//! - structural (wrong candidate): shape/name mismatch, family not in the
//!   library → recorded, search continues;
//! - unexpected (broken system): checkpoint I/O or container errors, backend
//!   failures on an already shape-checked tensor → search aborts.

use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use ndarray::ArrayD;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::binding::{bind, BindError, BindMode, BindReport};
use super::catalog::{ArchitectureCandidate, ModelSlot};
use super::checkpoint::{load_checkpoint, CheckpointError, StateDict};
use super::network::{ModelLibrary, Network, NetworkError};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// No candidate in the slot's list binds this checkpoint.
    #[error("Model unavailable for {slot}: no architecture candidate binds ({} tried)", .rejected.len())]
    Unresolvable {
        slot: ModelSlot,
        rejected: Vec<CandidateRejection>,
    },

    #[error("Candidate {candidate} failed unexpectedly: {source}")]
    Network {
        candidate: ArchitectureCandidate,
        #[source]
        source: NetworkError,
    },
}

/// Why one candidate was skipped.
#[derive(Debug, Clone)]
pub struct CandidateRejection {
    pub candidate: ArchitectureCandidate,
    pub reason: String,
}

impl fmt::Display for CandidateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.candidate, self.reason)
    }
}

// ═══════════════════════════════════════════════════════════
// ResolvedModel
// ═══════════════════════════════════════════════════════════

/// A bound, evaluation-mode network for one slot.
pub struct ResolvedModel {
    slot: ModelSlot,
    candidate: ArchitectureCandidate,
    report: BindReport,
    network: Box<dyn Network>,
    /// Present when the backend cannot run `forward` concurrently.
    inference_lock: Option<Mutex<()>>,
}

impl ResolvedModel {
    pub fn slot(&self) -> ModelSlot {
        self.slot
    }

    pub fn candidate(&self) -> ArchitectureCandidate {
        self.candidate
    }

    pub fn bind_report(&self) -> &BindReport {
        &self.report
    }

    pub fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, NetworkError> {
        match &self.inference_lock {
            Some(lock) => {
                let _guard = lock
                    .lock()
                    .map_err(|_| NetworkError::Backend("Inference lock poisoned".into()))?;
                self.network.forward(input)
            }
            None => self.network.forward(input),
        }
    }

    pub fn is_serialized(&self) -> bool {
        self.inference_lock.is_some()
    }
}

impl fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("slot", &self.slot)
            .field("candidate", &self.candidate)
            .field("bound", &self.report.bound.len())
            .field("missing", &self.report.missing.len())
            .field("unexpected", &self.report.unexpected.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════
// ArchitectureResolver
// ═══════════════════════════════════════════════════════════

/// Walks candidate lists against a model library. Holds no mutable state.
pub struct ArchitectureResolver<'a> {
    library: &'a dyn ModelLibrary,
}

impl<'a> ArchitectureResolver<'a> {
    pub fn new(library: &'a dyn ModelLibrary) -> Self {
        Self { library }
    }

    /// Load `path` and resolve it for `slot` with the slot's own candidate
    /// list and bind mode.
    pub fn resolve(&self, slot: ModelSlot, path: &Path) -> Result<ResolvedModel, ResolveError> {
        let state = load_checkpoint(path)?;
        self.resolve_state(slot, slot.candidates(), &state, slot.bind_mode())
    }

    /// Resolve an already-loaded state dict against an explicit candidate list.
    pub fn resolve_state(
        &self,
        slot: ModelSlot,
        candidates: &[ArchitectureCandidate],
        state: &StateDict,
        mode: BindMode,
    ) -> Result<ResolvedModel, ResolveError> {
        let mut rejected = Vec::new();

        for candidate in candidates {
            let mut network = match self.library.instantiate(candidate) {
                Ok(network) => network,
                Err(NetworkError::UnsupportedArchitecture(_)) => {
                    debug!(%slot, %candidate, "Candidate not provided by model library");
                    rejected.push(CandidateRejection {
                        candidate: *candidate,
                        reason: "not provided by model library".into(),
                    });
                    continue;
                }
                Err(source) => {
                    return Err(ResolveError::Network {
                        candidate: *candidate,
                        source,
                    })
                }
            };

            match bind(network.as_mut(), state, mode) {
                Ok(report) => {
                    network.set_eval();
                    if report.bound.is_empty() {
                        warn!(%slot, %candidate, "Candidate accepted with no parameters bound");
                    }
                    info!(
                        %slot,
                        %candidate,
                        bound = report.bound.len(),
                        missing = report.missing.len(),
                        unexpected = report.unexpected.len(),
                        skipped = rejected.len(),
                        "Architecture resolved"
                    );
                    let inference_lock =
                        (!network.supports_concurrent_inference()).then(|| Mutex::new(()));
                    return Ok(ResolvedModel {
                        slot,
                        candidate: *candidate,
                        report,
                        network,
                        inference_lock,
                    });
                }
                Err(e) if e.is_structural() => {
                    debug!(%slot, %candidate, error = %e, "Candidate rejected");
                    rejected.push(CandidateRejection {
                        candidate: *candidate,
                        reason: e.to_string(),
                    });
                }
                Err(BindError::Network(source)) => {
                    return Err(ResolveError::Network {
                        candidate: *candidate,
                        source,
                    })
                }
                Err(other) => {
                    return Err(ResolveError::Network {
                        candidate: *candidate,
                        source: NetworkError::Backend(other.to_string()),
                    })
                }
            }
        }

        warn!(%slot, tried = rejected.len(), "No architecture candidate binds checkpoint");
        Err(ResolveError::Unresolvable { slot, rejected })
    }
}
