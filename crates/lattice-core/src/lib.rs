//! Lattice CI Core
//!
//! Document types, the expression language, and error handling shared by
//! the matrix resolver and the step planner. This crate has minimal
//! dependencies and no I/O beyond loading a workflow file.

pub mod error;
pub mod expression;
pub mod fields;
pub mod host;
pub mod interpolation;
pub mod pipeline;

pub use error::{Error, Result, RuleKind};
pub use fields::{FieldMap, OrderedMap};
pub use host::HostFacts;
