//! Parameter binding: copying checkpoint tensors onto an instantiated network.
//!
//! Two named modes:
//! - `Strict`: every declared parameter must be present and every checkpoint
//!   entry must be claimed. Used for models whose architecture is known.
//! - `BestEffort`: missing and unexpected names are tolerated and reported.
//!   Used for checkpoints saved without architecture metadata, possibly
//!   under a slightly different architecture revision.
//!
//! In both modes a shape mismatch on a shared name is structural and fatal.
//! Shapes are checked before anything is assigned, so a rejected bind never
//! leaves a half-loaded network behind.

use thiserror::Error;

use super::checkpoint::StateDict;
use super::network::{Network, NetworkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    Strict,
    BestEffort,
}

#[derive(Error, Debug)]
pub enum BindError {
    #[error("Shape mismatch for '{name}': network expects {expected:?}, checkpoint has {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Strict bind: {missing} missing and {unexpected} unexpected parameters")]
    NameMismatch {
        missing: usize,
        unexpected: usize,
        report: BindReport,
    },

    #[error("Network rejected parameter: {0}")]
    Network(#[from] NetworkError),
}

impl BindError {
    /// Structural failures mean "wrong candidate", not "broken system".
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            BindError::ShapeMismatch { .. } | BindError::NameMismatch { .. }
        )
    }
}

/// What a bind touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindReport {
    /// Declared parameters loaded from the checkpoint.
    pub bound: Vec<String>,
    /// Declared parameters the checkpoint lacks (left at initialization).
    pub missing: Vec<String>,
    /// Checkpoint entries no declared parameter claims.
    pub unexpected: Vec<String>,
}

impl BindReport {
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Bind `state` onto `network` under `mode`.
pub fn bind(
    network: &mut dyn Network,
    state: &StateDict,
    mode: BindMode,
) -> Result<BindReport, BindError> {
    let declared = network.parameters();
    let mut report = BindReport::default();

    for spec in &declared {
        match state.get(&spec.name) {
            Some(tensor) if tensor.shape() != spec.shape.as_slice() => {
                return Err(BindError::ShapeMismatch {
                    name: spec.name.clone(),
                    expected: spec.shape.clone(),
                    found: tensor.shape().to_vec(),
                });
            }
            Some(_) => report.bound.push(spec.name.clone()),
            None => report.missing.push(spec.name.clone()),
        }
    }

    report.unexpected = state
        .names()
        .filter(|name| !declared.iter().any(|spec| spec.name == *name))
        .map(str::to_string)
        .collect();

    if mode == BindMode::Strict && !report.is_exact() {
        return Err(BindError::NameMismatch {
            missing: report.missing.len(),
            unexpected: report.unexpected.len(),
            report,
        });
    }

    for name in &report.bound {
        if let Some(tensor) = state.get(name) {
            network.assign(name, tensor)?;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::LinearNet;
    use ndarray::{ArrayD, IxDyn};

    fn tensor(shape: &[usize], value: f32) -> ArrayD<f32> {
        ArrayD::from_elem(IxDyn(shape), value)
    }

    #[test]
    fn exact_checkpoint_binds_in_both_modes() {
        let mut state = StateDict::new();
        state.insert("head.weight", tensor(&[2, 3], 0.1));
        state.insert("head.bias", tensor(&[2], 0.0));

        for mode in [BindMode::Strict, BindMode::BestEffort] {
            let mut net = LinearNet::new(3, 2);
            let report = bind(&mut net, &state, mode).unwrap();
            assert!(report.is_exact());
            assert_eq!(report.bound.len(), 2);
            assert_eq!(net.weight()[[0, 0]], 0.1);
        }
    }

    #[test]
    fn best_effort_tolerates_missing_and_extra_names() {
        let mut state = StateDict::new();
        state.insert("head.weight", tensor(&[2, 3], 0.5));
        state.insert("aux_head.weight", tensor(&[7], 1.0));

        let mut net = LinearNet::new(3, 2);
        let report = bind(&mut net, &state, BindMode::BestEffort).unwrap();
        assert_eq!(report.bound, vec!["head.weight".to_string()]);
        assert_eq!(report.missing, vec!["head.bias".to_string()]);
        assert_eq!(report.unexpected, vec!["aux_head.weight".to_string()]);
        assert_eq!(net.weight()[[1, 2]], 0.5);
    }

    #[test]
    fn strict_rejects_missing_names() {
        let mut state = StateDict::new();
        state.insert("head.weight", tensor(&[2, 3], 0.5));

        let mut net = LinearNet::new(3, 2);
        let err = bind(&mut net, &state, BindMode::Strict).unwrap_err();
        assert!(err.is_structural());
        match err {
            BindError::NameMismatch {
                missing,
                unexpected,
                ..
            } => {
                assert_eq!(missing, 1);
                assert_eq!(unexpected, 0);
            }
            other => panic!("expected NameMismatch, got {other:?}"),
        }
        // Nothing was assigned.
        assert_eq!(net.weight()[[0, 0]], 0.0);
    }

    #[test]
    fn shape_mismatch_is_fatal_even_best_effort() {
        let mut state = StateDict::new();
        state.insert("head.weight", tensor(&[4, 3], 0.5));
        state.insert("head.bias", tensor(&[4], 0.5));

        let mut net = LinearNet::new(3, 2);
        let err = bind(&mut net, &state, BindMode::BestEffort).unwrap_err();
        assert!(err.is_structural());
        assert!(matches!(err, BindError::ShapeMismatch { ref name, .. } if name == "head.weight"));
        assert_eq!(net.weight()[[0, 0]], 0.0);
    }

    #[test]
    fn backend_failure_is_not_structural() {
        let err = BindError::Network(NetworkError::Backend("device lost".into()));
        assert!(!err.is_structural());
    }
}
