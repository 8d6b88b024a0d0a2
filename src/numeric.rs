//! Floating-point type of weights and bin contents
//!
//! Bin contents accumulate many weights of both signs, so double precision is
//! the default. The `f32` feature selects single precision instead, which
//! halves the memory footprint of large histogram sets.

/// Floating-point type used throughout the crate
#[cfg(feature = "f32")]
pub type Float = f32;

/// Floating-point type used throughout the crate
#[cfg(not(feature = "f32"))]
pub type Float = f64;
