//! Shared, immutable cascade context.
//!
//! `CoreState::initialize` resolves the stage 1–3 models (and the optional
//! seizure model) once at startup. The result is wrapped in `Arc` and shared
//! by every request. Teardown is dropping the last `Arc`; models are released
//! with it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::CascadeConfig;
use crate::pipeline::catalog::{ModelSlot, Subtype};
use crate::pipeline::checkpoint::CheckpointStore;
use crate::pipeline::network::ModelLibrary;
use crate::pipeline::resolver::{ArchitectureResolver, ResolveError, ResolvedModel};
use crate::pipeline::seizure::{read_reference_columns, SeizureError, SeizureScreen};
use crate::pipeline::stages::{StageClassifier, StageKind};

/// Errors from building the shared state.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Cannot load {slot} model: {source}")]
    Resolve {
        slot: ModelSlot,
        #[source]
        source: ResolveError,
    },

    #[error("Cannot read CSV reference: {0}")]
    Reference(#[source] SeizureError),
}

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    pub config: CascadeConfig,
    library: Arc<dyn ModelLibrary>,
    store: CheckpointStore,
    modality: StageClassifier,
    family: StageClassifier,
    subtype: StageClassifier,
    seizure: Option<SeizureScreen>,
    csv_reference: Option<Vec<String>>,
    /// Present only when `cache_final_models` is enabled.
    final_cache: Option<RwLock<HashMap<Subtype, Arc<ResolvedModel>>>>,
    pub started_at: DateTime<Utc>,
}

impl CoreState {
    pub fn initialize(
        config: CascadeConfig,
        library: Arc<dyn ModelLibrary>,
    ) -> Result<Self, CoreError> {
        let store = config.checkpoint_store();
        info!(
            models_dir = %config.models_dir.display(),
            library = library.name(),
            "Loading cascade models"
        );

        let (modality, family, subtype) = {
            let resolver = ArchitectureResolver::new(library.as_ref());
            let load = |slot: ModelSlot, kind: StageKind| -> Result<StageClassifier, CoreError> {
                let model = resolve_slot(&resolver, &store, slot)?;
                Ok(StageClassifier::new(kind, Arc::new(model)))
            };
            (
                load(ModelSlot::Modality, StageKind::Modality)?,
                load(ModelSlot::Family, StageKind::Family)?,
                load(ModelSlot::SubtypeRouter, StageKind::Subtype)?,
            )
        };

        let seizure = if store.has_seizure() {
            let resolver = ArchitectureResolver::new(library.as_ref());
            let model = resolve_slot(&resolver, &store, ModelSlot::Seizure)?;
            Some(SeizureScreen::new(Arc::new(model)))
        } else {
            warn!("No seizure checkpoint configured; tabular screen disabled");
            None
        };

        let csv_reference = config
            .csv_reference_path()
            .map(|path| read_reference_columns(&path))
            .transpose()
            .map_err(CoreError::Reference)?;

        let final_cache = config
            .cache_final_models
            .then(|| RwLock::new(HashMap::new()));

        info!(
            seizure = seizure.is_some(),
            csv_reference = csv_reference.is_some(),
            cache_final_models = config.cache_final_models,
            "Cascade ready"
        );

        Ok(Self {
            config,
            library,
            store,
            modality,
            family,
            subtype,
            seizure,
            csv_reference,
            final_cache,
            started_at: Utc::now(),
        })
    }

    /// Classifier for one of the startup-loaded image stages.
    /// Final stages are resolved per request through [`Self::final_model`].
    pub fn classifier(&self, kind: StageKind) -> Option<&StageClassifier> {
        match kind {
            StageKind::Modality => Some(&self.modality),
            StageKind::Family => Some(&self.family),
            StageKind::Subtype => Some(&self.subtype),
            StageKind::Final(_) => None,
        }
    }

    pub fn seizure(&self) -> Option<&SeizureScreen> {
        self.seizure.as_ref()
    }

    pub fn csv_reference(&self) -> Option<&[String]> {
        self.csv_reference.as_deref()
    }

    /// Resolve the final-stage model for `subtype`. Blocking: reads the
    /// checkpoint from disk unless it is already cached.
    pub fn final_model(&self, subtype: Subtype) -> Result<Arc<ResolvedModel>, ResolveError> {
        if let Some(cache) = &self.final_cache {
            let cached = cache
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&subtype)
                .cloned();
            if let Some(model) = cached {
                return Ok(model);
            }
        }

        let slot = ModelSlot::Final(subtype);
        let path = self.store.path_for(slot)?;
        let model = Arc::new(ArchitectureResolver::new(self.library.as_ref()).resolve(slot, path)?);

        if let Some(cache) = &self.final_cache {
            cache
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(subtype)
                .or_insert_with(|| Arc::clone(&model));
        }
        Ok(model)
    }

    pub fn cached_final_models(&self) -> usize {
        self.final_cache.as_ref().map_or(0, |cache| {
            cache.read().unwrap_or_else(PoisonError::into_inner).len()
        })
    }
}

impl fmt::Debug for CoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreState")
            .field("library", &self.library.name())
            .field("modality", self.modality.model())
            .field("family", self.family.model())
            .field("subtype", self.subtype.model())
            .field("seizure", &self.seizure.is_some())
            .field("csv_reference", &self.csv_reference.is_some())
            .field("cached_final_models", &self.cached_final_models())
            .field("started_at", &self.started_at)
            .finish()
    }
}

fn resolve_slot(
    resolver: &ArchitectureResolver<'_>,
    store: &CheckpointStore,
    slot: ModelSlot,
) -> Result<ResolvedModel, CoreError> {
    store
        .path_for(slot)
        .map_err(ResolveError::from)
        .and_then(|path| resolver.resolve(slot, path))
        .map_err(|source| CoreError::Resolve { slot, source })
}
