//! Stage classifiers: one resolved model + transform + label mapping each.
//!
//! Confidence semantics differ per stage and are kept that way:
//! the modality gate reports the raw sigmoid score (0–1), every other stage
//! reports a percentage (0–100). `ConfidenceScale` travels with each result so
//! callers never have to guess.

use std::sync::Arc;

use image::RgbImage;
use ndarray::ArrayD;
use serde::Serialize;
use thiserror::Error;

use super::catalog::Subtype;
use super::network::NetworkError;
use super::resolver::ResolvedModel;
use super::transform::{ImageTransform, TransformError};

/// Modality gate boundary (policy). Rounded scores strictly below it are in scope.
pub const MODALITY_THRESHOLD: f32 = 0.5;
/// Family classifier boundary. Scores strictly above it select index 1.
pub const FAMILY_THRESHOLD: f32 = 0.5;

pub const MODALITY_IN_SCOPE: &str = "Our Modality";
pub const MODALITY_OUT_OF_SCOPE: &str = "Not Our Modality";
pub const FAMILY_LABELS: [&str; 2] = ["Cancer", "Neurological Disorder"];
pub const DIAGNOSIS_DISEASE: &str = "Disease Detected";
pub const DIAGNOSIS_NORMAL: &str = "Normal";

#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Forward pass failed: {0}")]
    Forward(#[from] NetworkError),

    #[error("Unexpected model output shape {found:?}, expected {expected}")]
    OutputShape { found: Vec<usize>, expected: String },

    #[error("Model produced non-finite scores")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceScale {
    /// Raw score in [0, 1].
    Unit,
    /// Percentage in [0, 100].
    Percent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
    pub scale: ConfidenceScale,
    pub is_final: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Modality,
    Family,
    Subtype,
    Final(Subtype),
}

impl StageKind {
    pub fn transform(&self) -> ImageTransform {
        match self {
            StageKind::Subtype => ImageTransform::CenterCrop,
            _ => ImageTransform::Normalized,
        }
    }

    /// Map raw model output to a labeled result.
    pub fn interpret(&self, output: &ArrayD<f32>) -> Result<ClassificationResult, StageError> {
        match self {
            StageKind::Modality => Ok(modality_decision(single_score(output)?)),
            StageKind::Family => Ok(family_decision(single_score(output)?)),
            StageKind::Subtype => subtype_decision(&logits(output, Some(Subtype::ALL.len()))?),
            StageKind::Final(_) => final_decision(&logits(output, None)?),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Decision rules
// ═══════════════════════════════════════════════════════════

/// Round to three decimals, the precision the gate reports.
fn round3(score: f32) -> f32 {
    (score * 1000.0).round() / 1000.0
}

/// The decision uses the rounded score, so 0.4996 is out of scope.
pub fn modality_decision(score: f32) -> ClassificationResult {
    let confidence = round3(score);
    let label = if confidence < MODALITY_THRESHOLD {
        MODALITY_IN_SCOPE
    } else {
        MODALITY_OUT_OF_SCOPE
    };
    ClassificationResult {
        label: label.to_string(),
        confidence,
        scale: ConfidenceScale::Unit,
        is_final: false,
    }
}

pub fn family_decision(probability: f32) -> ClassificationResult {
    let index = usize::from(probability > FAMILY_THRESHOLD);
    let confidence = if index == 1 {
        probability * 100.0
    } else {
        100.0 - probability * 100.0
    };
    ClassificationResult {
        label: FAMILY_LABELS[index].to_string(),
        confidence,
        scale: ConfidenceScale::Percent,
        is_final: false,
    }
}

pub fn subtype_decision(logits: &[f32]) -> Result<ClassificationResult, StageError> {
    let (index, probability) = top_class(logits)?;
    let subtype = Subtype::from_index(index).ok_or_else(|| StageError::OutputShape {
        found: vec![logits.len()],
        expected: format!("{} subtype logits", Subtype::ALL.len()),
    })?;
    Ok(ClassificationResult {
        label: subtype.as_str().to_string(),
        confidence: probability * 100.0,
        scale: ConfidenceScale::Percent,
        is_final: false,
    })
}

/// Index 1 is disease; every other index (including extra classes of
/// multi-class checkpoints) reads as normal.
pub fn final_decision(logits: &[f32]) -> Result<ClassificationResult, StageError> {
    let (index, probability) = top_class(logits)?;
    let label = if index == 1 {
        DIAGNOSIS_DISEASE
    } else {
        DIAGNOSIS_NORMAL
    };
    Ok(ClassificationResult {
        label: label.to_string(),
        confidence: probability * 100.0,
        scale: ConfidenceScale::Percent,
        is_final: true,
    })
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Argmax of the softmax; the first maximum wins ties.
fn top_class(logits: &[f32]) -> Result<(usize, f32), StageError> {
    if logits.is_empty() {
        return Err(StageError::OutputShape {
            found: vec![0],
            expected: "at least one logit".into(),
        });
    }
    if logits.iter().any(|l| !l.is_finite()) {
        return Err(StageError::NonFinite);
    }
    let probabilities = softmax(logits);
    let mut best = 0;
    for (i, p) in probabilities.iter().enumerate() {
        if *p > probabilities[best] {
            best = i;
        }
    }
    Ok((best, probabilities[best]))
}

/// Exactly one score per (single) sample.
fn single_score(output: &ArrayD<f32>) -> Result<f32, StageError> {
    if output.len() != 1 {
        return Err(StageError::OutputShape {
            found: output.shape().to_vec(),
            expected: "(1, 1)".into(),
        });
    }
    let score = output.iter().next().copied().unwrap_or(f32::NAN);
    if !score.is_finite() {
        return Err(StageError::NonFinite);
    }
    Ok(score)
}

/// Logits of the first sample of a `(1, classes)` output.
fn logits(output: &ArrayD<f32>, classes: Option<usize>) -> Result<Vec<f32>, StageError> {
    let shape = output.shape();
    let valid = shape.len() == 2 && shape[0] == 1 && classes.map_or(shape[1] > 0, |c| shape[1] == c);
    if !valid {
        return Err(StageError::OutputShape {
            found: shape.to_vec(),
            expected: match classes {
                Some(c) => format!("(1, {c})"),
                None => "(1, classes)".into(),
            },
        });
    }
    Ok(output.iter().copied().collect())
}

// ═══════════════════════════════════════════════════════════
// StageClassifier
// ═══════════════════════════════════════════════════════════

/// `classify(image) -> ClassificationResult` for one stage.
#[derive(Debug, Clone)]
pub struct StageClassifier {
    kind: StageKind,
    model: Arc<ResolvedModel>,
}

impl StageClassifier {
    pub fn new(kind: StageKind, model: Arc<ResolvedModel>) -> Self {
        Self { kind, model }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn model(&self) -> &ResolvedModel {
        &self.model
    }

    pub fn preprocess(&self, image: &RgbImage) -> Result<ArrayD<f32>, StageError> {
        Ok(self.kind.transform().apply(image)?)
    }

    pub fn score(&self, tensor: &ArrayD<f32>) -> Result<ArrayD<f32>, StageError> {
        Ok(self.model.forward(tensor)?)
    }

    pub fn classify(&self, image: &RgbImage) -> Result<ClassificationResult, StageError> {
        let tensor = self.preprocess(image)?;
        let output = self.score(&tensor)?;
        self.kind.interpret(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::catalog::ModelSlot;
    use crate::pipeline::resolver::ArchitectureResolver;
    use crate::pipeline::test_support::{constant_state, logit, logits_for, TestLibrary};
    use image::Rgb;
    use ndarray::{arr2, IxDyn};

    #[test]
    fn modality_boundary_both_sides() {
        let inside = modality_decision(0.49);
        assert_eq!(inside.label, MODALITY_IN_SCOPE);
        assert_eq!(inside.confidence, 0.49);
        assert_eq!(inside.scale, ConfidenceScale::Unit);

        assert_eq!(modality_decision(0.51).label, MODALITY_OUT_OF_SCOPE);
        assert_eq!(modality_decision(0.5).label, MODALITY_OUT_OF_SCOPE);
    }

    #[test]
    fn modality_decides_on_rounded_score() {
        let result = modality_decision(0.4996);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.label, MODALITY_OUT_OF_SCOPE);

        let result = modality_decision(0.4994);
        assert_eq!(result.label, MODALITY_IN_SCOPE);
    }

    #[test]
    fn family_confidence_mirrors_for_first_class() {
        let neuro = family_decision(0.8);
        assert_eq!(neuro.label, "Neurological Disorder");
        assert!((neuro.confidence - 80.0).abs() < 1e-4);

        let cancer = family_decision(0.2);
        assert_eq!(cancer.label, "Cancer");
        assert!((cancer.confidence - 80.0).abs() < 1e-4);

        let boundary = family_decision(0.5);
        assert_eq!(boundary.label, "Cancer");
        assert!((boundary.confidence - 50.0).abs() < 1e-4);
    }

    #[test]
    fn subtype_picks_third_class() {
        let result = subtype_decision(&logits_for(&[0.1, 0.1, 0.6, 0.1, 0.1])).unwrap();
        assert_eq!(result.label, "cancer_lung");
        assert!((result.confidence - 60.0).abs() < 1e-3);
        assert!(!result.is_final);
    }

    #[test]
    fn final_diagnosis_both_outcomes() {
        let disease = final_decision(&logits_for(&[0.3, 0.7])).unwrap();
        assert_eq!(disease.label, DIAGNOSIS_DISEASE);
        assert!((disease.confidence - 70.0).abs() < 1e-3);
        assert!(disease.is_final);

        let normal = final_decision(&logits_for(&[0.8, 0.2])).unwrap();
        assert_eq!(normal.label, DIAGNOSIS_NORMAL);
        assert!((normal.confidence - 80.0).abs() < 1e-3);
    }

    #[test]
    fn final_extra_classes_read_as_normal() {
        let result = final_decision(&logits_for(&[0.1, 0.2, 0.6, 0.1])).unwrap();
        assert_eq!(result.label, DIAGNOSIS_NORMAL);
        assert!((result.confidence - 60.0).abs() < 1e-3);
    }

    #[test]
    fn ties_resolve_to_first_class() {
        let result = final_decision(&[1.0, 1.0]).unwrap();
        assert_eq!(result.label, DIAGNOSIS_NORMAL);
        assert!((result.confidence - 50.0).abs() < 1e-4);
    }

    #[test]
    fn softmax_sums_to_one_and_is_stable() {
        let p = softmax(&[1000.0, 1000.0, 999.0]);
        let sum: f32 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(p.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn malformed_outputs_are_stage_errors() {
        let wrong_width = arr2(&[[0.1f32, 0.2, 0.3]]).into_dyn();
        assert!(matches!(
            StageKind::Subtype.interpret(&wrong_width),
            Err(StageError::OutputShape { .. })
        ));
        assert!(matches!(
            StageKind::Modality.interpret(&wrong_width),
            Err(StageError::OutputShape { .. })
        ));
        let nan = ArrayD::from_elem(IxDyn(&[1, 1]), f32::NAN);
        assert!(matches!(
            StageKind::Family.interpret(&nan),
            Err(StageError::NonFinite)
        ));
        let batch = ArrayD::from_elem(IxDyn(&[2, 2]), 0.0);
        assert!(StageKind::Final(Subtype::NeuroMs).interpret(&batch).is_err());
    }

    #[test]
    fn classifier_runs_transform_model_and_labels() {
        let library = TestLibrary::new();
        let resolver = ArchitectureResolver::new(&library);
        let state = constant_state(3, &[logit(0.3)]);
        let slot = ModelSlot::Modality;
        let model = resolver
            .resolve_state(slot, slot.candidates(), &state, slot.bind_mode())
            .unwrap();

        let classifier = StageClassifier::new(StageKind::Modality, Arc::new(model));
        let image = RgbImage::from_pixel(64, 48, Rgb([90, 120, 200]));
        let result = classifier.classify(&image).unwrap();
        assert_eq!(result.label, MODALITY_IN_SCOPE);
        assert!((result.confidence - 0.3).abs() < 1e-3);
    }

    #[test]
    fn stage_transforms_match_training() {
        assert_eq!(StageKind::Subtype.transform(), ImageTransform::CenterCrop);
        assert_eq!(StageKind::Modality.transform(), ImageTransform::Normalized);
        assert_eq!(StageKind::Family.transform(), ImageTransform::Normalized);
        assert_eq!(
            StageKind::Final(Subtype::CancerColon).transform(),
            ImageTransform::Normalized
        );
    }
}
