//! # Hybridizer Geometry
//!
//! Spatial primitives for the hybridizer field engine. This crate provides:
//!
//! - **Positions** ([`position`]): 3D point/vector value type with spherical
//!   angles and rotation about the vertical axis.
//! - **Orientations** ([`orientation`]): rotations between an element's
//!   local pattern frame and the global frame.
//! - **Grids** ([`grid`]): uniform rectilinear discretisation with box and
//!   face-slice child grids and radius queries.
//! - **Placement** ([`placement`]): line and parabola array layouts.

pub mod grid;
pub mod orientation;
pub mod placement;
pub mod position;

pub use grid::{Grid, GridError, GridMember, Resolution, SubGridKind, SubGridRecord};
pub use orientation::Orientation;
pub use placement::{PlacedElement, Placement};
pub use position::{spherical_basis, Position};
