//! Static model catalog: subtypes, architecture families, and the ordered
//! candidate lists the resolver walks for every model slot.
//!
//! Candidate order is policy. Within a slot, the family believed correct is
//! tried first, and within a family the class counts most likely to match the
//! training setup come first. Reordering changes which checkpoint parameters
//! are actually used, so lists are fixed here and nowhere else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Subtypes
// ═══════════════════════════════════════════════════════════

/// Disease subtype. Declaration order is the stage-3 class order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subtype {
    CancerBreast,
    CancerColon,
    CancerLung,
    NeuroAlzheimers,
    NeuroMs,
}

impl Subtype {
    /// All subtypes, in stage-3 output index order.
    pub const ALL: [Subtype; 5] = [
        Subtype::CancerBreast,
        Subtype::CancerColon,
        Subtype::CancerLung,
        Subtype::NeuroAlzheimers,
        Subtype::NeuroMs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subtype::CancerBreast => "cancer_breast",
            Subtype::CancerColon => "cancer_colon",
            Subtype::CancerLung => "cancer_lung",
            Subtype::NeuroAlzheimers => "neuro_alzheimers",
            Subtype::NeuroMs => "neuro_ms",
        }
    }

    /// Subtype for a stage-3 output index.
    pub fn from_index(index: usize) -> Option<Subtype> {
        Self::ALL.get(index).copied()
    }

    /// Default checkpoint file name inside the models directory.
    pub fn default_checkpoint_file(&self) -> &'static str {
        match self {
            Subtype::CancerBreast => "Breast.safetensors",
            Subtype::CancerColon => "Colon.safetensors",
            Subtype::CancerLung => "Lung.safetensors",
            Subtype::NeuroAlzheimers => "Alzheimer.safetensors",
            Subtype::NeuroMs => "MultipleSclerosis.safetensors",
        }
    }
}

impl fmt::Display for Subtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised for any identifier outside the closed subtype set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown subtype: {0}")]
pub struct UnknownSubtype(pub String);

impl FromStr for Subtype {
    type Err = UnknownSubtype;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|subtype| subtype.as_str() == s)
            .ok_or_else(|| UnknownSubtype(s.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════
// Architecture families + candidates
// ═══════════════════════════════════════════════════════════

/// Network architecture family, named the way the model library names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchitectureFamily {
    /// Two conv blocks + two linear layers with sigmoid output (stage 1).
    SimpleCnn,
    /// ResNet-18 with a dropout → linear → sigmoid head (stage 2).
    Resnet18Sigmoid,
    Resnet18,
    EfficientnetB0,
    TfEfficientnetB0,
    EfficientnetB3,
    TfEfficientnetB3,
    TfEfficientnetv2B3,
    ConvnextBase,
    /// 1-D conv + LSTM over tabular feature rows (seizure screen).
    CnnLstm1d,
}

impl ArchitectureFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchitectureFamily::SimpleCnn => "simple_cnn",
            ArchitectureFamily::Resnet18Sigmoid => "resnet18_sigmoid",
            ArchitectureFamily::Resnet18 => "resnet18",
            ArchitectureFamily::EfficientnetB0 => "efficientnet_b0",
            ArchitectureFamily::TfEfficientnetB0 => "tf_efficientnet_b0",
            ArchitectureFamily::EfficientnetB3 => "efficientnet_b3",
            ArchitectureFamily::TfEfficientnetB3 => "tf_efficientnet_b3",
            ArchitectureFamily::TfEfficientnetv2B3 => "tf_efficientnetv2_b3",
            ArchitectureFamily::ConvnextBase => "convnext_base",
            ArchitectureFamily::CnnLstm1d => "cnn_lstm_1d",
        }
    }
}

impl fmt::Display for ArchitectureFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a slot's search space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchitectureCandidate {
    pub family: ArchitectureFamily,
    pub num_classes: usize,
}

impl ArchitectureCandidate {
    pub const fn new(family: ArchitectureFamily, num_classes: usize) -> Self {
        Self {
            family,
            num_classes,
        }
    }
}

impl fmt::Display for ArchitectureCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.num_classes)
    }
}

use ArchitectureFamily as F;

const SIMPLE_CNN: &[ArchitectureCandidate] = &[ArchitectureCandidate::new(F::SimpleCnn, 1)];

const RESNET18_SIGMOID: &[ArchitectureCandidate] =
    &[ArchitectureCandidate::new(F::Resnet18Sigmoid, 1)];

const EFFICIENTNET_B0_5: &[ArchitectureCandidate] =
    &[ArchitectureCandidate::new(F::EfficientnetB0, 5)];

const CNN_LSTM: &[ArchitectureCandidate] = &[ArchitectureCandidate::new(F::CnnLstm1d, 1)];

// Class count is the outer loop, variant the inner one.
const ALZHEIMERS: &[ArchitectureCandidate] = &[
    ArchitectureCandidate::new(F::EfficientnetB3, 2),
    ArchitectureCandidate::new(F::TfEfficientnetB3, 2),
    ArchitectureCandidate::new(F::TfEfficientnetv2B3, 2),
    ArchitectureCandidate::new(F::EfficientnetB3, 4),
    ArchitectureCandidate::new(F::TfEfficientnetB3, 4),
    ArchitectureCandidate::new(F::TfEfficientnetv2B3, 4),
    ArchitectureCandidate::new(F::EfficientnetB3, 6),
    ArchitectureCandidate::new(F::TfEfficientnetB3, 6),
    ArchitectureCandidate::new(F::TfEfficientnetv2B3, 6),
];

const MULTIPLE_SCLEROSIS: &[ArchitectureCandidate] =
    &[ArchitectureCandidate::new(F::ConvnextBase, 2)];

const LUNG: &[ArchitectureCandidate] = &[
    ArchitectureCandidate::new(F::EfficientnetB0, 2),
    ArchitectureCandidate::new(F::TfEfficientnetB0, 2),
    ArchitectureCandidate::new(F::EfficientnetB0, 3),
    ArchitectureCandidate::new(F::TfEfficientnetB0, 3),
];

const RESNET18_BINARY: &[ArchitectureCandidate] = &[ArchitectureCandidate::new(F::Resnet18, 2)];

// ═══════════════════════════════════════════════════════════
// Model slots
// ═══════════════════════════════════════════════════════════

/// A place in the cascade that holds exactly one resolved model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelSlot {
    Modality,
    Family,
    SubtypeRouter,
    Final(Subtype),
    Seizure,
}

impl ModelSlot {
    /// Ordered search space for this slot.
    pub fn candidates(&self) -> &'static [ArchitectureCandidate] {
        match self {
            ModelSlot::Modality => SIMPLE_CNN,
            ModelSlot::Family => RESNET18_SIGMOID,
            ModelSlot::SubtypeRouter => EFFICIENTNET_B0_5,
            ModelSlot::Seizure => CNN_LSTM,
            ModelSlot::Final(subtype) => match subtype {
                Subtype::NeuroAlzheimers => ALZHEIMERS,
                Subtype::NeuroMs => MULTIPLE_SCLEROSIS,
                Subtype::CancerLung => LUNG,
                Subtype::CancerBreast | Subtype::CancerColon => RESNET18_BINARY,
            },
        }
    }

    /// Final-stage checkpoints were saved without architecture metadata and
    /// are bound best-effort; every other slot must match exactly.
    pub fn bind_mode(&self) -> super::binding::BindMode {
        match self {
            ModelSlot::Final(_) => super::binding::BindMode::BestEffort,
            _ => super::binding::BindMode::Strict,
        }
    }
}

impl fmt::Display for ModelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSlot::Modality => f.write_str("modality"),
            ModelSlot::Family => f.write_str("family"),
            ModelSlot::SubtypeRouter => f.write_str("subtype"),
            ModelSlot::Final(subtype) => write!(f, "final:{subtype}"),
            ModelSlot::Seizure => f.write_str("seizure"),
        }
    }
}
