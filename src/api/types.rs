//! Shared handler context and response bodies.

use std::sync::Arc;

use serde::Serialize;

use crate::core_state::CoreState;
use crate::pipeline::catalog::Subtype;
use crate::pipeline::orchestrator::CascadeOrchestrator;

/// State handed to every handler via `State<ApiContext>`.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub cascade: CascadeOrchestrator,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self {
            cascade: CascadeOrchestrator::new(Arc::clone(&core)),
            core,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Response bodies
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// `POST /predict`. Confidence is the raw 0–1 gate score; `null` for CSV.
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub prediction: String,
    pub confidence: Option<f32>,
}

/// `POST /classify`. Confidence in percent.
#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub class_label: String,
    pub confidence: f32,
}

#[derive(Debug, Serialize)]
pub struct SubtypeResponse {
    pub subtype_prediction: String,
    pub subtype_confidence: f32,
}

#[derive(Debug, Serialize)]
pub struct DiagnoseResponse {
    pub diagnosis: String,
    pub diagnosis_confidence: f32,
    pub subtype: Subtype,
}

/// `POST /epilepsy`: one row answers with `result`, several with `results`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EpilepsyResponse {
    Single { result: &'static str },
    Many { results: Vec<&'static str> },
}

impl EpilepsyResponse {
    pub fn from_labels(mut labels: Vec<&'static str>) -> Self {
        if labels.len() == 1 {
            if let Some(result) = labels.pop() {
                return EpilepsyResponse::Single { result };
            }
        }
        EpilepsyResponse::Many { results: labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epilepsy_shape_depends_on_row_count() {
        let single = serde_json::to_value(EpilepsyResponse::from_labels(vec!["Seizure"])).unwrap();
        assert_eq!(single, serde_json::json!({"result": "Seizure"}));

        let many = serde_json::to_value(EpilepsyResponse::from_labels(vec![
            "Seizure",
            "Non-seizure",
        ]))
        .unwrap();
        assert_eq!(many, serde_json::json!({"results": ["Seizure", "Non-seizure"]}));
    }

    #[test]
    fn csv_prediction_serializes_null_confidence() {
        let body = PredictResponse {
            prediction: "Our Modality".into(),
            confidence: None,
        };
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            serde_json::json!({"prediction": "Our Modality", "confidence": null})
        );
    }
}
