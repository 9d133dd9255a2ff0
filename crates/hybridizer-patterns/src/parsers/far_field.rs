//! Parser for full-wave derived far-field records.
//!
//! The record is a JSON object keyed by field-group name. Each group holds
//! the sampling axes (radians) and the $\theta$/$\phi$ complex components
//! indexed `[snapshot, theta, phi]` in the `ndarray` serde layout, with
//! complex numbers written as `[re, im]`. Only snapshot 0 is used.

use std::collections::BTreeMap;

use ndarray::Array3;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::PatternTable;
use crate::provider::PatternError;

/// One field group of a far-field record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarFieldGroup {
    pub theta: Vec<f64>,
    pub phi: Vec<f64>,
    pub e_theta: Array3<Complex64>,
    pub e_phi: Array3<Complex64>,
}

/// Parse group `group` of a far-field record.
pub fn parse_far_field(content: &str, group: &str) -> Result<PatternTable, PatternError> {
    let mut record: BTreeMap<String, FarFieldGroup> = serde_json::from_str(content)?;
    let data = record.remove(group).ok_or_else(|| {
        PatternError::NotFound(format!(
            "field group '{}' (available: {})",
            group,
            record.keys().cloned().collect::<Vec<_>>().join(", ")
        ))
    })?;

    let (nt, np) = (data.theta.len(), data.phi.len());
    for (label, arr) in [("e_theta", &data.e_theta), ("e_phi", &data.e_phi)] {
        let shape = arr.shape();
        if shape[0] == 0 || shape[1] != nt || shape[2] != np {
            return Err(PatternError::DataError(format!(
                "{} has shape {:?}, expected [>=1, {}, {}]",
                label, shape, nt, np
            )));
        }
    }

    let mut table = PatternTable::default();
    for (i, &t) in data.theta.iter().enumerate() {
        for (j, &p) in data.phi.iter().enumerate() {
            table.push(t, p, data.e_theta[[0, i, j]], data.e_phi[[0, i, j]]);
        }
    }
    Ok(table)
}
