//! Seam to the external model library.
//!
//! The cascade never looks inside a network. It needs four things from one:
//! the parameter names and shapes it declares, a way to overwrite one of them,
//! a switch into inference mode, and `forward(tensor) -> tensor`.

use ndarray::ArrayD;
use thiserror::Error;

use super::catalog::ArchitectureCandidate;

#[derive(Error, Debug)]
pub enum NetworkError {
    /// The library has no implementation for this (family, classes) pair.
    #[error("Architecture not provided by model library: {0}")]
    UnsupportedArchitecture(ArchitectureCandidate),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Input tensor rejected: {0}")]
    InvalidInput(String),

    #[error("Model backend error: {0}")]
    Backend(String),
}

/// A declared parameter of an instantiated network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, shape: &[usize]) -> Self {
        Self {
            name: name.into(),
            shape: shape.to_vec(),
        }
    }
}

/// An instantiated network with freshly initialized parameters.
pub trait Network: Send + Sync {
    /// Every parameter and buffer the network would load from a state dict.
    fn parameters(&self) -> Vec<ParameterSpec>;

    /// Overwrite one parameter. Callers validate the shape first.
    fn assign(&mut self, name: &str, value: &ArrayD<f32>) -> Result<(), NetworkError>;

    /// Switch to deterministic inference (dropout off, running statistics
    /// for normalization layers).
    fn set_eval(&mut self) {}

    fn forward(&self, input: &ArrayD<f32>) -> Result<ArrayD<f32>, NetworkError>;

    /// Whether `forward` may run on several threads at once.
    fn supports_concurrent_inference(&self) -> bool {
        true
    }
}

/// Factory for uninitialized networks.
pub trait ModelLibrary: Send + Sync {
    fn instantiate(
        &self,
        candidate: &ArchitectureCandidate,
    ) -> Result<Box<dyn Network>, NetworkError>;

    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;
}
