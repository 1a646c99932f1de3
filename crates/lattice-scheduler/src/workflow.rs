//! Whole-document resolution: validate everything, then expand and plan.

use crate::matrix::{MatrixExpansion, MatrixJob, MatrixResolver};
use crate::plan::{ResolvedStep, StepPlanner};
use lattice_core::pipeline::WorkflowDefinition;
use lattice_core::{HostFacts, Result};
use serde::Serialize;
use tracing::info;

/// One job and the steps it will run.
#[derive(Debug, Clone, Serialize)]
pub struct JobPlan {
    pub job: MatrixJob,
    pub steps: Vec<ResolvedStep>,
}

/// A workflow whose matrix and steps have both been validated.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub expansion: MatrixExpansion,
    pub planner: StepPlanner,
}

impl CompiledWorkflow {
    /// Validate rules and steps before producing any job.
    pub fn compile(definition: &WorkflowDefinition) -> Result<Self> {
        let planner = StepPlanner::compile(&definition.matrix, &definition.steps)?;
        let expansion = MatrixResolver::new().expand(&definition.name, &definition.matrix)?;

        info!(
            workflow = %definition.name,
            jobs = expansion.len(),
            steps = definition.steps.len(),
            "Workflow resolved"
        );

        Ok(Self { expansion, planner })
    }

    pub fn jobs(&self) -> &[MatrixJob] {
        &self.expansion.jobs
    }

    /// Plan a single job by index.
    pub fn plan_job(&self, index: usize, host: &HostFacts) -> Option<Result<JobPlan>> {
        let job = self.expansion.jobs.get(index)?;
        Some(self.planner.plan(&job.fields, host).map(|steps| JobPlan {
            job: job.clone(),
            steps,
        }))
    }

    /// Plan every job. Fails as a whole if any job fails.
    pub fn plan_all(&self, host: &HostFacts) -> Result<Vec<JobPlan>> {
        self.expansion
            .jobs
            .iter()
            .map(|job| {
                self.planner.plan(&job.fields, host).map(|steps| JobPlan {
                    job: job.clone(),
                    steps,
                })
            })
            .collect()
    }

    /// Jobs that run `step_id` on `host`.
    pub fn qualifying_jobs(&self, host: &HostFacts, step_id: &str) -> Result<Vec<&MatrixJob>> {
        self.planner
            .qualifying_jobs(&self.expansion.jobs, host, step_id)
    }
}
