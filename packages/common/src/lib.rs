//! Shared building blocks for the trellis crates: property values, id
//! generation and the common error type.

pub mod error;
pub mod id;
pub mod value;

pub use error::*;
pub use id::*;
pub use value::*;
