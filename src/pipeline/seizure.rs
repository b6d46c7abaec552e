//! Tabular seizure screen and CSV acceptance for the modality endpoint.
//!
//! Each CSV row is one EEG window. Feature columns are every column whose
//! values all parse as numbers, minus the label (`y`) and bookkeeping
//! (`original_row`) columns, ordered by column name. The network emits one
//! probability per row.

use std::sync::Arc;

use ndarray::{Array3, ArrayD};
use thiserror::Error;

use super::network::NetworkError;
use super::resolver::ResolvedModel;

/// Probability at or above which a row is labeled a seizure.
/// Policy constant. Almost any signal flags the row.
pub const SEIZURE_THRESHOLD: f32 = 0.0001;

pub const SEIZURE: &str = "Seizure";
pub const NON_SEIZURE: &str = "Non-seizure";

/// Columns never used as features.
const EXCLUDED_COLUMNS: [&str; 2] = ["y", "original_row"];

/// Rows read when validating an upload.
const VALIDATION_ROWS: usize = 5;

#[derive(Error, Debug)]
pub enum SeizureError {
    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV has no data rows")]
    NoRows,

    #[error("CSV has no numeric feature columns")]
    NoFeatures,

    #[error("Forward pass failed: {0}")]
    Forward(#[from] NetworkError),

    #[error("Expected {expected} scores, model returned {found}")]
    ScoreCount { expected: usize, found: usize },
}

pub fn seizure_label(probability: f32) -> &'static str {
    if probability >= SEIZURE_THRESHOLD {
        SEIZURE
    } else {
        NON_SEIZURE
    }
}

/// Numeric feature matrix shaped `(rows, features, 1)`.
#[derive(Debug)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub values: Array3<f32>,
}

pub fn parse_features(bytes: &[u8]) -> Result<FeatureTable, SeizureError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    if rows.is_empty() {
        return Err(SeizureError::NoRows);
    }

    let mut selected: Vec<(String, usize)> = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| !EXCLUDED_COLUMNS.contains(&name.as_str()))
        .filter(|(i, _)| {
            rows.iter()
                .all(|row| row.get(*i).is_some_and(|v| v.trim().parse::<f32>().is_ok()))
        })
        .map(|(i, name)| (name.clone(), i))
        .collect();
    selected.sort_by(|a, b| a.0.cmp(&b.0));

    if selected.is_empty() {
        return Err(SeizureError::NoFeatures);
    }

    let values = Array3::from_shape_fn((rows.len(), selected.len(), 1), |(r, f, _)| {
        rows[r][selected[f].1].trim().parse::<f32>().unwrap_or(f32::NAN)
    });

    Ok(FeatureTable {
        columns: selected.into_iter().map(|(name, _)| name).collect(),
        values,
    })
}

/// Accept a CSV when it has a header and its first rows parse; with a
/// reference header, the column count and the column-name set must also match.
pub fn is_valid_csv(bytes: &[u8], reference: Option<&[String]>) -> bool {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        tracing::debug!("CSV upload is empty");
        return false;
    }
    let mut reader = csv::Reader::from_reader(bytes);
    let headers: Vec<String> = match reader.headers() {
        Ok(h) => h.iter().map(str::to_string).collect(),
        Err(e) => {
            tracing::debug!(error = %e, "CSV header unreadable");
            return false;
        }
    };
    if headers.is_empty() {
        return false;
    }
    if reader
        .records()
        .take(VALIDATION_ROWS)
        .any(|record| record.is_err())
    {
        return false;
    }

    let Some(reference) = reference else {
        return true;
    };
    if headers.len() != reference.len() {
        tracing::debug!(
            found = headers.len(),
            expected = reference.len(),
            "CSV column count mismatch"
        );
        return false;
    }
    let mut found = headers.clone();
    let mut expected = reference.to_vec();
    found.sort();
    expected.sort();
    found == expected
}

/// Reference header read from a CSV file on disk.
pub fn read_reference_columns(path: &std::path::Path) -> Result<Vec<String>, SeizureError> {
    let mut reader = csv::Reader::from_path(path)?;
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

/// Seizure model + labeling.
#[derive(Debug, Clone)]
pub struct SeizureScreen {
    model: Arc<ResolvedModel>,
}

impl SeizureScreen {
    pub fn new(model: Arc<ResolvedModel>) -> Self {
        Self { model }
    }

    pub fn screen(&self, csv: &[u8]) -> Result<Vec<&'static str>, SeizureError> {
        let table = parse_features(csv)?;
        let rows = table.values.shape()[0];
        let input: ArrayD<f32> = table.values.into_dyn();
        let output = self.model.forward(&input)?;
        if output.len() != rows {
            return Err(SeizureError::ScoreCount {
                expected: rows,
                found: output.len(),
            });
        }
        Ok(output.iter().map(|p| seizure_label(*p)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::catalog::{ArchitectureFamily, ModelSlot};
    use crate::pipeline::resolver::ArchitectureResolver;
    use crate::pipeline::test_support::{head_state, TestLibrary};

    #[test]
    fn threshold_both_sides() {
        assert_eq!(seizure_label(0.0001), SEIZURE);
        assert_eq!(seizure_label(0.5), SEIZURE);
        assert_eq!(seizure_label(0.00009), NON_SEIZURE);
        assert_eq!(seizure_label(0.0), NON_SEIZURE);
    }

    #[test]
    fn features_exclude_labels_and_sort_by_name() {
        let csv = b"x2,y,original_row,x1,note\n1.5,1,7,0.5,abc\n2.5,0,8,-1,def\n";
        let table = parse_features(csv).unwrap();
        assert_eq!(table.columns, vec!["x1".to_string(), "x2".to_string()]);
        assert_eq!(table.values.shape(), &[2, 2, 1]);
        assert_eq!(table.values[[0, 0, 0]], 0.5);
        assert_eq!(table.values[[1, 1, 0]], 2.5);
    }

    #[test]
    fn features_require_rows_and_numeric_columns() {
        assert!(matches!(parse_features(b"a,b\n"), Err(SeizureError::NoRows)));
        assert!(matches!(
            parse_features(b"y,name\n1,abc\n"),
            Err(SeizureError::NoFeatures)
        ));
    }

    #[test]
    fn csv_validation_against_reference() {
        let reference = vec!["b".to_string(), "a".to_string()];
        assert!(is_valid_csv(b"a,b\n1,2\n", Some(&reference)));
        assert!(!is_valid_csv(b"a,c\n1,2\n", Some(&reference)));
        assert!(!is_valid_csv(b"a,b,c\n1,2,3\n", Some(&reference)));
        assert!(is_valid_csv(b"anything,goes\n1,2\n", None));
        assert!(!is_valid_csv(b"a,b\n1,2,3\n", None));
        assert!(!is_valid_csv(b"", None));
        assert!(!is_valid_csv(b"", Some(&reference)));
        assert!(!is_valid_csv(b" \n\n", None));
    }

    #[test]
    fn screen_labels_every_row() {
        let library = TestLibrary::new().with_features(ArchitectureFamily::CnnLstm1d, 2);
        let resolver = ArchitectureResolver::new(&library);
        // score = sigmoid(10 * x1 - 12): row 1 ≈ 6e-6, row 2 ≈ 0.88.
        let state = head_state(&[10.0, 0.0], 1, &[-12.0], None);
        let slot = ModelSlot::Seizure;
        let model = resolver
            .resolve_state(slot, slot.candidates(), &state, slot.bind_mode())
            .unwrap();

        let screen = SeizureScreen::new(Arc::new(model));
        let labels = screen.screen(b"x1,x2,y\n0.0,3.0,0\n1.0,3.0,1\n").unwrap();
        assert_eq!(labels, vec![NON_SEIZURE, SEIZURE]);
    }
}
