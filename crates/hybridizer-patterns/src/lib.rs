//! # Hybridizer Patterns
//!
//! Antenna radiation patterns for the hybridizer field engine. Every antenna
//! type implements the [`RadiationPattern`](provider::RadiationPattern)
//! trait, which returns a complex $\theta$/$\phi$ pattern component for a
//! direction in the element's local frame.
//!
//! ## Available pattern sources
//!
//! | Source | Module | Lookup |
//! |--------|--------|--------|
//! | Half-wave dipole, isotropic, plane wave | [`closed_form`] | Formula |
//! | 8-column text table (dB or linear) | [`parsers::table`] | Interpolated |
//! | JSON far-field record | [`parsers::far_field`] | Interpolated |
//!
//! ## Interpolation
//!
//! Tabulated samples are triangulated in the $(\theta, \phi)$ plane (cell by
//! cell for complete lattices, Delaunay otherwise) and evaluated with
//! barycentric weights ([`interpolation::TriangulatedInterpolator`]).
//! Built interpolators are persisted in a content-addressed on-disk cache
//! ([`cache::InterpolatorCache`]).

pub mod cache;
pub mod closed_form;
pub mod interpolation;
pub mod parsers;
pub mod provider;
pub mod registry;
pub mod tabulated;

pub use cache::{CacheError, CacheKey, InterpolatorCache, CACHE_FORMAT_VERSION};
pub use closed_form::{half_wave_dipole_factor, ClosedFormPattern};
pub use interpolation::TriangulatedInterpolator;
pub use parsers::PatternTable;
pub use provider::{wrap_angles, PatternComponent, PatternError, PatternKind, RadiationPattern};
pub use registry::{PatternRegistry, BUILTIN_PATTERNS};
pub use tabulated::TabulatedPattern;
