//! Command handlers.

use crate::commands::HostArgs;
use crate::config::{CliConfig, OutputFormat};
use console::style;
use lattice_core::pipeline::WorkflowDefinition;
use lattice_core::{FieldMap, HostFacts};
use lattice_scheduler::{CompiledWorkflow, JobPlan, MatrixJob};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

type CliResult = Result<(), Box<dyn std::error::Error>>;

pub(crate) const STARTER_TEMPLATE: &str = r#"name: my-matrix

matrix:
  axes:
    os: [linux, macos, windows]
    toolchain: [stable]
    suite: [std]

  fields:
    cache_key: {}
    coverage_flag:
      default: ""

  include:
    - toolchain: stable
      cache_key: stable
    - os: linux
      suite: std
      coverage_flag: --coverage

  exclude: []

steps:
  - id: setup
    action: setup-toolchain
    params:
      toolchain: "${{ job.toolchain }}"
      cache-key: "${{ job.cache_key }}-${{ job.os }}"

  - id: test
    action: run-tests
    params:
      suite: "${{ job.suite }}"
      flags: "${{ join(' ', job.coverage_flag) }}"

  - id: coverage
    action: upload-coverage
    if: host.os == 'linux' && job.coverage_flag != ''
"#;

/// Write a starter matrix document.
pub fn init(path: &str) -> CliResult {
    let path = Path::new(path);

    if path.exists() {
        println!("{} {} already exists", style("!").yellow(), path.display());
        return Ok(());
    }

    std::fs::write(path, STARTER_TEMPLATE)?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(())
}

fn load(path: &str) -> Result<(WorkflowDefinition, CompiledWorkflow), Box<dyn std::error::Error>> {
    debug!(path, "Loading matrix document");
    let definition = WorkflowDefinition::load(path)?;
    let compiled = CompiledWorkflow::compile(&definition)?;
    Ok((definition, compiled))
}

/// Build the host fact sheet: current OS, then config, then flags.
/// `--host-os` wins over an `os` fact from either source.
pub fn host_facts(config: &CliConfig, args: &HostArgs) -> HostFacts {
    let mut host = HostFacts::current();
    if let Some(os) = &config.host_os {
        host.set("os", os.as_str());
    }
    for (name, value) in config.host_facts.iter() {
        host.set(name, value.as_str());
    }
    for (name, value) in &args.facts {
        host.set(name.as_str(), value.as_str());
    }
    if let Some(os) = &args.host_os {
        host.set("os", os.as_str());
    }
    host
}

/// Validate a matrix document.
pub fn validate(path: &str) -> CliResult {
    let (definition, compiled) = load(path)?;
    let expansion = &compiled.expansion;

    println!(
        "{} Matrix \"{}\" is valid",
        style("✓").green(),
        definition.name
    );
    println!(
        "  Axes: {}",
        definition
            .matrix
            .axes
            .iter()
            .map(|axis| format!("{} ({})", axis.name, axis.values.len()))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  Base rows: {}, jobs after include/exclude: {}",
        definition.matrix.axes.combinations(),
        expansion.len()
    );
    println!("  Steps: {}", definition.steps.len());

    for warning in &expansion.warnings {
        println!("  {} {}", style("!").yellow(), warning);
    }

    Ok(())
}

/// List the expanded jobs.
pub fn expand(path: &str, filters: &[(String, String)], format: OutputFormat) -> CliResult {
    let (_, compiled) = load(path)?;
    let selector: FieldMap = filters.iter().cloned().collect();
    let jobs = compiled.expansion.find(&selector);

    match format {
        OutputFormat::Table => {
            for job in &jobs {
                print_job(job);
            }
            println!("\n{} job(s)", jobs.len());
            Ok(())
        }
        _ => print_structured(&jobs, format),
    }
}

/// Show the step plan for one or all jobs.
pub fn plan(
    config: &CliConfig,
    path: &str,
    job: Option<usize>,
    host_args: &HostArgs,
    format: OutputFormat,
) -> CliResult {
    let (_, compiled) = load(path)?;
    let host = host_facts(config, host_args);

    let plans: Vec<JobPlan> = match job {
        Some(index) => {
            let plan = compiled
                .plan_job(index, &host)
                .ok_or_else(|| format!("No job with index {}", index))??;
            vec![plan]
        }
        None => compiled.plan_all(&host)?,
    };

    match format {
        OutputFormat::Table => {
            println!("Host: {}", style(&host.os).bold());
            for plan in &plans {
                print_job(&plan.job);
                if plan.steps.is_empty() {
                    println!("    {}", style("(no steps)").dim());
                }
                for step in &plan.steps {
                    println!("    {} {}", style("▶").cyan(), step.name);
                    for (name, value) in step.params.iter() {
                        println!("        {} = {}", name, value);
                    }
                    for (name, value) in step.env.iter() {
                        println!("        ${} = {}", name, value);
                    }
                }
            }
            Ok(())
        }
        _ => print_structured(&plans, format),
    }
}

/// List the jobs that run a step.
pub fn qualify(
    config: &CliConfig,
    path: &str,
    step: &str,
    host_args: &HostArgs,
    format: OutputFormat,
) -> CliResult {
    let (_, compiled) = load(path)?;
    let host = host_facts(config, host_args);
    let jobs = compiled.qualifying_jobs(&host, step)?;

    match format {
        OutputFormat::Table => {
            for job in &jobs {
                print_job(job);
            }
            println!("\n{} job(s) run {}", jobs.len(), style(step).bold());
            Ok(())
        }
        _ => print_structured(&jobs, format),
    }
}

/// Print the JSON schema of the matrix document.
pub fn schema() -> CliResult {
    let schema = schemars::schema_for!(WorkflowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> CliResult {
    println!("Current configuration:");
    println!("  output_format: {:?}", config.output_format);
    println!(
        "  host_os: {}",
        config.host_os.as_deref().unwrap_or("(current OS)")
    );
    if config.host_facts.is_empty() {
        println!("  host_facts: (none)");
    } else {
        println!("  host_facts:");
        for (name, value) in config.host_facts.iter() {
            println!("    {}: {}", name, value);
        }
    }

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> CliResult {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

fn print_job(job: &MatrixJob) {
    println!("{:>4}  {}", style(job.index).dim(), job.display_name);
}

fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> CliResult {
    let output = match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        _ => serde_json::to_string_pretty(value)?,
    };
    println!("{}", output);
    Ok(())
}
