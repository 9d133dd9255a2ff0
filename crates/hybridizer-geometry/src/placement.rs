//! Geometric placement of array elements.
//!
//! A [`Placement`] generates element positions together with the orientation
//! implied by the placement geometry: elements on a line face horizontally
//! away from it, elements on a parabolic arc face its focus.

use serde::{Deserialize, Serialize};

use crate::orientation::Orientation;
use crate::position::Position;

/// Element position plus the orientation derived from its placement.
#[derive(Debug, Clone, Copy)]
pub struct PlacedElement {
    pub position: Position,
    pub orientation: Orientation,
}

/// Placement rule for one or more array elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Placement {
    /// A single element facing `facing`.
    Point { position: Position, facing: Position },
    /// `count` elements evenly spaced from `start` to `end` (inclusive).
    Line {
        start: Position,
        end: Position,
        count: usize,
    },
    /// `count` elements on the parabola $p(u) = v + u\hat{w} + \frac{u^2}{4f}\hat{a}$
    /// for $u \in [-w/2, w/2]$, where $\hat{a}$ is the opening axis.
    Parabola {
        vertex: Position,
        axis: Position,
        focal_length: f64,
        width: f64,
        count: usize,
    },
}

/// Horizontal direction perpendicular to `dir` (rotated +90° about $z$),
/// falling back to $+x$ for vertical directions.
fn horizontal_normal(dir: &Position) -> Position {
    let flat = Position::new(dir.x, dir.y, 0.0).rotate_z(std::f64::consts::FRAC_PI_2);
    flat.normalised().unwrap_or(Position::new(1.0, 0.0, 0.0))
}

impl Placement {
    /// Expand the rule into concrete element placements.
    pub fn elements(&self) -> Vec<PlacedElement> {
        match self {
            Placement::Point { position, facing } => vec![PlacedElement {
                position: *position,
                orientation: Orientation::facing(*facing),
            }],
            Placement::Line { start, end, count } => {
                let span = *end - *start;
                let orientation = Orientation::facing(horizontal_normal(&span));
                (0..*count)
                    .map(|i| {
                        let t = if *count > 1 {
                            i as f64 / (*count - 1) as f64
                        } else {
                            0.5
                        };
                        PlacedElement {
                            position: *start + span * t,
                            orientation,
                        }
                    })
                    .collect()
            }
            Placement::Parabola {
                vertex,
                axis,
                focal_length,
                width,
                count,
            } => {
                let a = axis.normalised().unwrap_or(Position::new(0.0, 0.0, 1.0));
                let w = horizontal_normal(&a);
                let focus = *vertex + a * *focal_length;
                (0..*count)
                    .map(|i| {
                        let t = if *count > 1 {
                            i as f64 / (*count - 1) as f64 - 0.5
                        } else {
                            0.0
                        };
                        let u = t * width;
                        let position = *vertex + w * u + a * (u * u / (4.0 * focal_length));
                        PlacedElement {
                            position,
                            orientation: Orientation::facing(focus - position),
                        }
                    })
                    .collect()
            }
        }
    }
}
