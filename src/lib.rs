//! Workspace root; everything lives in [`conclave`].

pub use conclave::*;
