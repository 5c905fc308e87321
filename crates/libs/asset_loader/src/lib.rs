#[cfg(feature = "ash")]
pub mod acceleration_structures;
mod error;
mod geometry;

#[cfg(feature = "ash")]
pub mod globals;

pub use crate::error::{Error, Result};
pub use crate::geometry::{load_file, Mesh};
