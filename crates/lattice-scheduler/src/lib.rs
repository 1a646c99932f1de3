//! Matrix resolution and step planning for Lattice CI.

pub mod matrix;
pub mod plan;
pub mod workflow;

pub use matrix::{MatrixExpansion, MatrixJob, MatrixResolver};
pub use plan::{ResolvedStep, StepPlanner};
pub use workflow::{CompiledWorkflow, JobPlan};
