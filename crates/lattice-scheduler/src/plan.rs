//! Per-job step planning.
//!
//! A [`StepPlanner`] is compiled once from the step list, which parses every
//! predicate and template and checks that each `job.<field>` reference names
//! an axis or declared field. Planning a job then evaluates the predicates
//! against that job and the host fact sheet and keeps only the steps that run.

use crate::matrix::MatrixJob;
use lattice_core::expression::{Expr, Resolver, Scope, Value};
use lattice_core::interpolation::Template;
use lattice_core::pipeline::{MatrixConfig, StepDefinition};
use lattice_core::{Error, FieldMap, HostFacts, OrderedMap, Result};
use serde::Serialize;
use tracing::debug;

/// A step that will run, with every parameter bound to a concrete value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedStep {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub params: OrderedMap<Value>,
    pub env: OrderedMap<String>,
}

#[derive(Debug, Clone)]
struct CompiledStep {
    id: String,
    name: String,
    action: Option<String>,
    if_expr: Option<Expr>,
    unless: Option<Expr>,
    params: Vec<(String, Template)>,
    env: Vec<(String, Template)>,
}

/// Compiled step list for one matrix.
#[derive(Debug, Clone)]
pub struct StepPlanner {
    steps: Vec<CompiledStep>,
    defaults: FieldMap,
}

impl StepPlanner {
    /// Parse and check every step against the matrix's known fields.
    pub fn compile(matrix: &MatrixConfig, steps: &[StepDefinition]) -> Result<Self> {
        let mut compiled: Vec<CompiledStep> = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(Error::InvalidStep {
                    index,
                    step: step.display_name().to_string(),
                    reason: "step id must not be empty".to_string(),
                });
            }
            if compiled.iter().any(|c| c.id == step.id) {
                return Err(Error::InvalidStep {
                    index,
                    step: step.id.clone(),
                    reason: "step id is used more than once".to_string(),
                });
            }

            let if_expr = step
                .if_expr
                .as_deref()
                .map(|src| parse_predicate(&step.id, src))
                .transpose()?;
            let unless = step
                .unless
                .as_deref()
                .map(|src| parse_predicate(&step.id, src))
                .transpose()?;
            let params = compile_templates(&step.id, &step.params)?;
            let env = compile_templates(&step.id, &step.env)?;

            let references = if_expr
                .iter()
                .chain(unless.iter())
                .flat_map(Expr::references)
                .chain(params.iter().flat_map(|(_, t)| t.references()))
                .chain(env.iter().flat_map(|(_, t)| t.references()));
            for reference in references {
                if reference.scope == Scope::Job && !matrix.is_known_field(&reference.name) {
                    return Err(Error::UnknownField {
                        step: step.id.clone(),
                        field: reference.name.clone(),
                    });
                }
            }

            compiled.push(CompiledStep {
                id: step.id.clone(),
                name: step.display_name().to_string(),
                action: step.action.clone(),
                if_expr,
                unless,
                params,
                env,
            });
        }

        let defaults = matrix
            .fields
            .iter()
            .filter_map(|(name, spec)| spec.default.clone().map(|d| (name, d)))
            .collect();

        Ok(Self {
            steps: compiled,
            defaults,
        })
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.id.as_str())
    }

    /// The steps that run for `job` on `host`, in declaration order.
    pub fn plan(&self, job: &FieldMap, host: &HostFacts) -> Result<Vec<ResolvedStep>> {
        let mut plan = Vec::new();

        for step in &self.steps {
            let scope = JobScope {
                step: &step.id,
                job,
                host,
                defaults: &self.defaults,
            };

            if !self.should_run(step, &scope)? {
                debug!(step = %step.id, job = %job, "Step skipped");
                continue;
            }

            let mut params = OrderedMap::new();
            for (name, template) in &step.params {
                params.insert(name.clone(), template.render(&scope)?);
            }
            let mut env = OrderedMap::new();
            for (name, template) in &step.env {
                env.insert(name.clone(), template.render(&scope)?.into_string());
            }

            plan.push(ResolvedStep {
                id: step.id.clone(),
                name: step.name.clone(),
                action: step.action.clone(),
                params,
                env,
            });
        }

        Ok(plan)
    }

    /// Jobs whose plan on `host` includes `step_id`, e.g. the jobs that
    /// upload coverage.
    pub fn qualifying_jobs<'a>(
        &self,
        jobs: &'a [MatrixJob],
        host: &HostFacts,
        step_id: &str,
    ) -> Result<Vec<&'a MatrixJob>> {
        let step = self
            .steps
            .iter()
            .find(|step| step.id == step_id)
            .ok_or_else(|| Error::UnknownStep(step_id.to_string()))?;

        let mut qualifying = Vec::new();
        for job in jobs {
            let scope = JobScope {
                step: &step.id,
                job: &job.fields,
                host,
                defaults: &self.defaults,
            };
            if self.should_run(step, &scope)? {
                qualifying.push(job);
            }
        }
        Ok(qualifying)
    }

    /// `if` must hold and `unless` must not. `unless` is only evaluated when
    /// `if` holds.
    fn should_run(&self, step: &CompiledStep, scope: &JobScope<'_>) -> Result<bool> {
        if let Some(expr) = &step.if_expr
            && !expr.evaluate(scope)?.is_truthy()
        {
            return Ok(false);
        }
        if let Some(expr) = &step.unless
            && expr.evaluate(scope)?.is_truthy()
        {
            return Ok(false);
        }
        Ok(true)
    }
}

fn parse_predicate(step: &str, source: &str) -> Result<Expr> {
    // Predicates may be written with or without the `${{ }}` wrapper.
    let trimmed = source.trim();
    let inner = trimmed
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .unwrap_or(trimmed);

    Expr::parse(inner).map_err(|e| Error::InvalidExpression {
        step: step.to_string(),
        expression: source.to_string(),
        message: e.to_string(),
    })
}

fn compile_templates(step: &str, map: &OrderedMap<String>) -> Result<Vec<(String, Template)>> {
    map.iter()
        .map(|(name, source)| {
            Template::parse(source)
                .map(|template| (name.to_string(), template))
                .map_err(|e| Error::InvalidExpression {
                    step: step.to_string(),
                    expression: source.clone(),
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Reference lookup for one step evaluated against one job.
struct JobScope<'a> {
    step: &'a str,
    job: &'a FieldMap,
    host: &'a HostFacts,
    defaults: &'a FieldMap,
}

impl Resolver for JobScope<'_> {
    fn job_field(&self, name: &str) -> Result<String> {
        self.job
            .get(name)
            .or_else(|| self.defaults.get(name))
            .cloned()
            .ok_or_else(|| Error::MissingField {
                step: self.step.to_string(),
                field: name.to_string(),
                job: self.job.to_string(),
            })
    }

    fn host_fact(&self, name: &str) -> Result<String> {
        self.host
            .get(name)
            .map(str::to_string)
            .ok_or_else(|| Error::MissingHostFact {
                step: self.step.to_string(),
                fact: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixResolver;
    use lattice_core::pipeline::{AxisSet, FieldSpec};
    use pretty_assertions::assert_eq;

    fn row(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect()
    }

    fn matrix() -> MatrixConfig {
        let axes = AxisSet::new([
            ("os", vec!["linux", "mac", "win"]),
            ("toolchain", vec!["stable", "pinned"]),
            ("suite", vec!["std", "nostd", "examples"]),
        ])
        .unwrap();
        let mut matrix = MatrixConfig::new(axes);
        matrix.fields.insert("cache", FieldSpec::default());
        matrix.fields.insert("coverage_flag", FieldSpec::with_default(""));
        matrix.fields.insert("wgpu_flag", FieldSpec::with_default(""));
        matrix
    }

    fn ids(plan: &[ResolvedStep]) -> Vec<&str> {
        plan.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn test_steps_keep_declaration_order_and_skip_false_predicates() {
        let steps = vec![
            StepDefinition::new("checkout"),
            StepDefinition::new("linux-only").when("host.os == 'linux'"),
            StepDefinition::new("test").param("suite", "${{ job.suite }}"),
        ];
        let planner = StepPlanner::compile(&matrix(), &steps).unwrap();
        let job = row(&[("os", "linux"), ("toolchain", "stable"), ("suite", "std")]);

        let on_linux = planner.plan(&job, &HostFacts::new("linux")).unwrap();
        assert_eq!(ids(&on_linux), vec!["checkout", "linux-only", "test"]);

        let on_mac = planner.plan(&job, &HostFacts::new("macos")).unwrap();
        assert_eq!(ids(&on_mac), vec!["checkout", "test"]);
        assert_eq!(on_mac[1].params.get("suite"), Some(&Value::from("std")));
    }

    #[test]
    fn test_coverage_step_runs_for_exactly_matching_jobs() {
        let matrix = matrix();
        let steps = vec![StepDefinition::new("coverage").when(
            "host.os == 'linux' && job.toolchain == 'stable' && job.suite == 'std'",
        )];
        let planner = StepPlanner::compile(&matrix, &steps).unwrap();
        let expansion = MatrixResolver::new().expand("ci", &matrix).unwrap();
        let host = HostFacts::new("linux");

        for job in &expansion.jobs {
            let plan = planner.plan(&job.fields, &host).unwrap();
            let expected = job.fields.get("toolchain").map(String::as_str) == Some("stable")
                && job.fields.get("suite").map(String::as_str) == Some("std");
            assert_eq!(ids(&plan) == vec!["coverage"], expected, "{}", job.display_name);
        }

        let qualifying = planner
            .qualifying_jobs(&expansion.jobs, &host, "coverage")
            .unwrap();
        assert_eq!(qualifying.len(), 3);

        let on_windows = planner
            .qualifying_jobs(&expansion.jobs, &HostFacts::new("windows"), "coverage")
            .unwrap();
        assert!(on_windows.is_empty());
    }

    #[test]
    fn test_composite_flags_tolerate_absent_optional_fields() {
        let steps = vec![StepDefinition::new("test")
            .param("flags", "${{ join(' ', job.coverage_flag, job.wgpu_flag) }}")];
        let planner = StepPlanner::compile(&matrix(), &steps).unwrap();
        let host = HostFacts::new("linux");

        let bare = row(&[("os", "linux"), ("toolchain", "stable"), ("suite", "std")]);
        let plan = planner.plan(&bare, &host).unwrap();
        assert_eq!(plan[0].params.get("flags"), Some(&Value::from("")));

        let mut one = bare.clone();
        one.insert("wgpu_flag", "--features wgpu".to_string());
        let plan = planner.plan(&one, &host).unwrap();
        assert_eq!(plan[0].params.get("flags"), Some(&Value::from("--features wgpu")));

        let mut both = one.clone();
        both.insert("coverage_flag", "--coverage".to_string());
        let plan = planner.plan(&both, &host).unwrap();
        assert_eq!(
            plan[0].params.get("flags"),
            Some(&Value::from("--coverage --features wgpu"))
        );
    }

    #[test]
    fn test_missing_field_without_default_fails_the_plan() {
        let steps = vec![
            StepDefinition::new("setup").param("cache-key", "${{ job.cache }}-${{ job.os }}"),
        ];
        let planner = StepPlanner::compile(&matrix(), &steps).unwrap();
        let job = row(&[("os", "linux"), ("toolchain", "stable"), ("suite", "std")]);

        let err = planner.plan(&job, &HostFacts::new("linux")).unwrap_err();
        match err {
            Error::MissingField { step, field, job } => {
                assert_eq!(step, "setup");
                assert_eq!(field, "cache");
                assert_eq!(job, "{os: linux, toolchain: stable, suite: std}");
            }
            other => panic!("unexpected error: {other}"),
        }

        let mut cached = job.clone();
        cached.insert("cache", "stable".to_string());
        let plan = planner.plan(&cached, &HostFacts::new("linux")).unwrap();
        assert_eq!(
            plan[0].params.get("cache-key"),
            Some(&Value::from("stable-linux"))
        );
    }

    #[test]
    fn test_appended_row_without_axis_field_fails_when_referenced() {
        let steps = vec![StepDefinition::new("test").when("job.suite == 'std'")];
        let planner = StepPlanner::compile(&matrix(), &steps).unwrap();
        let appended = row(&[("os", "freebsd"), ("cache", "bsd")]);

        let err = planner.plan(&appended, &HostFacts::new("freebsd")).unwrap_err();
        assert!(matches!(err, Error::MissingField { ref field, .. } if field == "suite"));
    }

    #[test]
    fn test_declared_axis_default_covers_appended_rows() {
        let mut matrix = matrix();
        matrix.fields.insert("suite", FieldSpec::with_default("std"));
        let steps = vec![StepDefinition::new("test").when("job.suite == 'std'")];
        let planner = StepPlanner::compile(&matrix, &steps).unwrap();
        let appended = row(&[("os", "freebsd"), ("cache", "bsd")]);

        let plan = planner.plan(&appended, &HostFacts::new("freebsd")).unwrap();
        assert_eq!(ids(&plan), vec!["test"]);
    }

    #[test]
    fn test_planner_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StepPlanner>();
        assert_send_sync::<MatrixResolver>();
        assert_send_sync::<ResolvedStep>();
    }

    #[test]
    fn test_unknown_field_is_rejected_at_compile_time() {
        let steps = vec![StepDefinition::new("gpu").when("job.gpu == 'true'")];
        let err = StepPlanner::compile(&matrix(), &steps).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownField { ref step, ref field } if step == "gpu" && field == "gpu"
        ));

        let steps = vec![StepDefinition::new("env").env("X", "${{ job.nope }}")];
        assert!(StepPlanner::compile(&matrix(), &steps).is_err());

        let steps = vec![StepDefinition::new("multiline").param("p", "${{\n job.nope\n}}")];
        let err = StepPlanner::compile(&matrix(), &steps).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownField { ref step, ref field } if step == "multiline" && field == "nope"
        ));
    }

    #[test]
    fn test_unclosed_placeholder_is_rejected_at_compile_time() {
        let steps = vec![StepDefinition::new("setup").param("cache-key", "${{ job.nope ")];
        let err = StepPlanner::compile(&matrix(), &steps).unwrap_err();
        match err {
            Error::InvalidExpression {
                step, expression, message,
            } => {
                assert_eq!(step, "setup");
                assert_eq!(expression, "${{ job.nope ");
                assert!(message.contains("unclosed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_expression_names_the_step() {
        let steps = vec![StepDefinition::new("broken").when("job.os = 'linux'")];
        let err = StepPlanner::compile(&matrix(), &steps).unwrap_err();
        match err {
            Error::InvalidExpression {
                step, expression, ..
            } => {
                assert_eq!(step, "broken");
                assert_eq!(expression, "job.os = 'linux'");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_step_ids_are_rejected() {
        let steps = vec![StepDefinition::new("test"), StepDefinition::new("test")];
        let err = StepPlanner::compile(&matrix(), &steps).unwrap_err();
        assert!(matches!(err, Error::InvalidStep { index: 1, .. }));
    }

    #[test]
    fn test_unless_and_host_facts() {
        let steps = vec![
            StepDefinition::new("gpu-tests")
                .when("host.os == 'linux'")
                .unless("host.gpu == false"),
        ];
        let planner = StepPlanner::compile(&matrix(), &steps).unwrap();
        let job = row(&[("os", "linux"), ("toolchain", "stable"), ("suite", "std")]);

        let with_gpu = HostFacts::new("linux").with_fact("gpu", "true");
        assert_eq!(ids(&planner.plan(&job, &with_gpu).unwrap()), vec!["gpu-tests"]);

        let without_gpu = HostFacts::new("linux").with_fact("gpu", "false");
        assert!(planner.plan(&job, &without_gpu).unwrap().is_empty());

        // `unless` is not consulted when `if` already failed.
        assert!(planner.plan(&job, &HostFacts::new("macos")).unwrap().is_empty());

        let err = planner.plan(&job, &HostFacts::new("linux")).unwrap_err();
        assert!(matches!(err, Error::MissingHostFact { ref fact, .. } if fact == "gpu"));
    }

    #[test]
    fn test_wrapped_predicate_and_typed_params() {
        let steps = vec![
            StepDefinition::new("coverage")
                .when("${{ job.suite == 'std' }}")
                .param("upload", "${{ job.toolchain == 'stable' }}")
                .env("RUST_TOOLCHAIN", "${{ job.toolchain }}"),
        ];
        let planner = StepPlanner::compile(&matrix(), &steps).unwrap();
        let job = row(&[("os", "mac"), ("toolchain", "pinned"), ("suite", "std")]);

        let plan = planner.plan(&job, &HostFacts::new("macos")).unwrap();
        assert_eq!(plan[0].params.get("upload"), Some(&Value::Bool(false)));
        assert_eq!(
            plan[0].env.get("RUST_TOOLCHAIN").map(String::as_str),
            Some("pinned")
        );
    }

    #[test]
    fn test_unknown_step_in_qualifying_jobs() {
        let planner = StepPlanner::compile(&matrix(), &[]).unwrap();
        let err = planner
            .qualifying_jobs(&[], &HostFacts::new("linux"), "coverage")
            .unwrap_err();
        assert!(matches!(err, Error::UnknownStep(ref id) if id == "coverage"));
    }
}
