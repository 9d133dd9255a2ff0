//! Parser for azimuth/elevation sampled antenna tables.
//!
//! The format is plain text:
//! ```text
//! <title line>
//! <column header line>
//! <theta_deg> <phi_deg> <abs_gain> <abs_theta> <phase_theta> <abs_phi> <phase_phi> <axial_ratio>
//! ...
//! ```
//!
//! Gains are in dB when the column header mentions `dB`, otherwise linear.
//! Phases are in degrees. Each row is converted to a pair of linear complex
//! phasors $|E| e^{j\varphi}$.

use num_complex::Complex64;

use super::PatternTable;
use crate::provider::PatternError;

const COLUMNS: usize = 8;

/// Convert a field-magnitude value in dB to a linear magnitude.
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Parse an antenna table from a string.
pub fn parse_table(content: &str) -> Result<PatternTable, PatternError> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() < 3 {
        return Err(PatternError::Format {
            line: 1,
            message: "Pattern table needs two header lines and at least one row".into(),
        });
    }

    let in_db = lines[0..2]
        .iter()
        .any(|l| l.to_ascii_lowercase().contains("db"));
    let magnitude = |v: f64| if in_db { db_to_linear(v) } else { v };

    let mut table = PatternTable::default();
    for (idx, line) in lines[2..].iter().enumerate() {
        let line_no = idx + 3;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let values = line
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|_| PatternError::Format {
                    line: line_no,
                    message: format!("Invalid number: {}", tok),
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        if values.len() != COLUMNS {
            return Err(PatternError::Format {
                line: line_no,
                message: format!("Expected {} columns, got {}", COLUMNS, values.len()),
            });
        }

        let e_theta = Complex64::from_polar(magnitude(values[3]), values[4].to_radians());
        let e_phi = Complex64::from_polar(magnitude(values[5]), values[6].to_radians());
        table.push(values[0].to_radians(), values[1].to_radians(), e_theta, e_phi);
    }

    if table.is_empty() {
        return Err(PatternError::Format {
            line: lines.len(),
            message: "Pattern table has no data rows".into(),
        });
    }

    log::debug!(
        "Parsed pattern table: {} samples ({})",
        table.len(),
        if in_db { "dB" } else { "linear" }
    );
    Ok(table)
}
