//! Deterministic model-library double for tests.
//!
//! `LinearNet` averages every input channel over its remaining axes and
//! applies one linear layer, so image stages, the seizure screen and the
//! resolver can be exercised without a neural backend. Families can carry an
//! extra `stem.weight` of a family-specific length, which makes candidates of
//! different families structurally distinguishable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use ndarray::{Array1, Array2, ArrayD, Axis, IxDyn};

use super::catalog::{ArchitectureCandidate, ArchitectureFamily, Subtype};
use super::checkpoint::{save_checkpoint, CheckpointStore, StateDict};
use super::network::{ModelLibrary, Network, NetworkError, ParameterSpec};

pub struct LinearNet {
    in_features: usize,
    weight: Array2<f32>,
    bias: Array1<f32>,
    stem: Option<Array1<f32>>,
    sigmoid: bool,
    eval: bool,
    concurrent: bool,
    latency: Option<Duration>,
}

impl LinearNet {
    pub fn new(in_features: usize, classes: usize) -> Self {
        Self {
            in_features,
            weight: Array2::zeros((classes, in_features)),
            bias: Array1::zeros(classes),
            stem: None,
            sigmoid: false,
            eval: false,
            concurrent: true,
            latency: None,
        }
    }

    pub fn with_stem(mut self, len: usize) -> Self {
        self.stem = Some(Array1::zeros(len));
        self
    }

    pub fn with_sigmoid(mut self) -> Self {
        self.sigmoid = true;
        self
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }
}

impl Network for LinearNet {
    fn parameters(&self) -> Vec<ParameterSpec> {
        let mut specs = vec![
            ParameterSpec::new("head.weight", self.weight.shape()),
            ParameterSpec::new("head.bias", self.bias.shape()),
        ];
        if let Some(stem) = &self.stem {
            specs.push(ParameterSpec::new("stem.weight", stem.shape()));
        }
        specs
    }

    fn assign(&mut self, name: &str, value: &ArrayD<f32>) -> Result<(), NetworkError> {
        let to_backend = |e: ndarray::ShapeError| NetworkError::Backend(e.to_string());
        match name {
            "head.weight" => {
                self.weight = value
                    .clone()
                    .into_dimensionality()
                    .map_err(to_backend)?
            }
            "head.bias" => {
                self.bias = value
                    .clone()
                    .into_dimensionality()
                    .map_err(to_backend)?
            }
            "stem.weight" if self.stem.is_some() => {
                self.stem = Some(value.clone().into_dimensionality().map_err(to_backend)?)
            }
            other => return Err(NetworkError::UnknownParameter(other.to_string())),
        }
        Ok(())
    }

    fn set_eval(&mut self) {
        self.eval = true;
    }

    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, NetworkError> {
        if !self.eval {
            return Err(NetworkError::Backend("forward called outside eval mode".into()));
        }
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        if input.ndim() < 2 || input.shape()[1] != self.in_features {
            return Err(NetworkError::InvalidInput(format!(
                "expected (batch, {}, ..), got {:?}",
                self.in_features,
                input.shape()
            )));
        }
        let batch = input.shape()[0];
        let flat = input
            .to_shape((batch, self.in_features, input.len() / (batch * self.in_features).max(1)))
            .map_err(|e| NetworkError::InvalidInput(e.to_string()))?;
        let features = flat
            .mean_axis(Axis(2))
            .ok_or_else(|| NetworkError::InvalidInput("empty input".into()))?;

        let mut out = features.dot(&self.weight.t()) + &self.bias;
        if self.sigmoid {
            out.mapv_inplace(|x| 1.0 / (1.0 + (-x).exp()));
        }
        Ok(out.into_dyn())
    }

    fn supports_concurrent_inference(&self) -> bool {
        self.concurrent
    }
}

/// Library double. Every family is a `LinearNet`; stems and input widths are
/// configurable per family.
#[derive(Default)]
pub struct TestLibrary {
    stems: HashMap<ArchitectureFamily, usize>,
    features: HashMap<ArchitectureFamily, usize>,
    unsupported: HashSet<ArchitectureFamily>,
    serialized: bool,
    latency: Option<Duration>,
}

impl TestLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stem(mut self, family: ArchitectureFamily, len: usize) -> Self {
        self.stems.insert(family, len);
        self
    }

    pub fn with_features(mut self, family: ArchitectureFamily, n: usize) -> Self {
        self.features.insert(family, n);
        self
    }

    pub fn without(mut self, family: ArchitectureFamily) -> Self {
        self.unsupported.insert(family);
        self
    }

    /// Networks report that forward must not run concurrently.
    pub fn serialized(mut self) -> Self {
        self.serialized = true;
        self
    }

    /// Every forward pass sleeps for `latency` first.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn build(&self, candidate: &ArchitectureCandidate) -> LinearNet {
        let features = self.features.get(&candidate.family).copied().unwrap_or(3);
        let mut net = LinearNet::new(features, candidate.num_classes);
        if let Some(len) = self.stems.get(&candidate.family) {
            net = net.with_stem(*len);
        }
        if matches!(
            candidate.family,
            ArchitectureFamily::SimpleCnn
                | ArchitectureFamily::Resnet18Sigmoid
                | ArchitectureFamily::CnnLstm1d
        ) {
            net = net.with_sigmoid();
        }
        net.concurrent = !self.serialized;
        net.latency = self.latency;
        net
    }
}

impl ModelLibrary for TestLibrary {
    fn instantiate(
        &self,
        candidate: &ArchitectureCandidate,
    ) -> Result<Box<dyn Network>, NetworkError> {
        if self.unsupported.contains(&candidate.family) {
            return Err(NetworkError::UnsupportedArchitecture(*candidate));
        }
        Ok(Box::new(self.build(candidate)))
    }

    fn name(&self) -> &'static str {
        "test-linear"
    }
}

/// State dict holding the given head weights (row-major, classes × features)
/// and biases, plus an optional stem.
pub fn head_state(weights: &[f32], classes: usize, bias: &[f32], stem: Option<usize>) -> StateDict {
    let features = weights.len() / classes;
    let mut state = StateDict::new();
    state.insert(
        "head.weight",
        ArrayD::from_shape_vec(IxDyn(&[classes, features]), weights.to_vec())
            .expect("weights fit shape"),
    );
    state.insert(
        "head.bias",
        ArrayD::from_shape_vec(IxDyn(&[classes]), bias.to_vec()).expect("bias fits shape"),
    );
    if let Some(len) = stem {
        state.insert("stem.weight", ArrayD::from_elem(IxDyn(&[len]), 1.0));
    }
    state
}

/// Bias-only head whose output is exactly `bias`, whatever the input.
pub fn constant_state(features: usize, bias: &[f32]) -> StateDict {
    head_state(&vec![0.0; features * bias.len()], bias.len(), bias, None)
}

/// Logits `ln(p)` reproduce `p` after softmax when `p` sums to 1.
pub fn logits_for(probabilities: &[f32]) -> Vec<f32> {
    probabilities.iter().map(|p| p.ln()).collect()
}

/// Sigmoid inverse, for building heads with a known score.
pub fn logit(p: f32) -> f32 {
    (p / (1.0 - p)).ln()
}

/// Solid-color PNG, as an uploaded scan would arrive.
pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb(color));
    let mut cursor = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut cursor, image::ImageOutputFormat::Png)
        .expect("encode png");
    cursor.into_inner()
}

/// Write a full set of checkpoints into `dir` and return the matching store.
/// Stage 1 scores `modality`, stage 2 `family`, stage 3 and stage 4 emit the
/// given probabilities.
pub fn write_fixture_store(
    dir: &Path,
    modality: f32,
    family: f32,
    subtype_probs: &[f32; 5],
    final_probs: &[f32; 2],
    seizure: Option<f32>,
) -> CheckpointStore {
    let write = |name: &str, state: &StateDict| {
        let path = dir.join(name);
        save_checkpoint(&path, state, None).expect("fixture checkpoint");
        path
    };

    let modality_path = write("modality.safetensors", &constant_state(3, &[logit(modality)]));
    let family_path = write("family.safetensors", &constant_state(3, &[logit(family)]));
    let subtype_path = write(
        "subtype.safetensors",
        &constant_state(3, &logits_for(subtype_probs)),
    );

    let mut finals = BTreeMap::new();
    for subtype in Subtype::ALL {
        let path = write(
            subtype.default_checkpoint_file(),
            &constant_state(3, &logits_for(final_probs)),
        );
        finals.insert(subtype, path);
    }

    let seizure_path =
        seizure.map(|p| write("seizure.safetensors", &constant_state(2, &[logit(p)])));

    CheckpointStore::new(modality_path, family_path, subtype_path, finals, seizure_path)
}

/// Library matching `write_fixture_store`: seizure rows carry two features.
pub fn fixture_library() -> TestLibrary {
    TestLibrary::new().with_features(ArchitectureFamily::CnnLstm1d, 2)
}
