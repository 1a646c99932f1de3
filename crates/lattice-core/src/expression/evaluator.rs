//! Expression evaluation against a job and a host fact sheet.

use crate::error::Result;
use crate::expression::parser::{BinaryOp, Expr, Function, Scope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The result of evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    String(String),
}

impl Value {
    /// Predicate truthiness: empty strings and `"false"` are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::String(s) => !(s.is_empty() || s == "false"),
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::String(s) => s,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Supplies reference values during evaluation.
///
/// Implementations decide what a missing field means (a documented default
/// or a configuration error).
pub trait Resolver {
    fn job_field(&self, name: &str) -> Result<String>;
    fn host_fact(&self, name: &str) -> Result<String>;
}

impl Expr {
    pub fn evaluate(&self, resolver: &dyn Resolver) -> Result<Value> {
        match self {
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Reference(r) => match r.scope {
                Scope::Job => resolver.job_field(&r.name).map(Value::String),
                Scope::Host => resolver.host_fact(&r.name).map(Value::String),
            },
            Expr::Not(inner) => Ok(Value::Bool(!inner.evaluate(resolver)?.is_truthy())),
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    if !left.evaluate(resolver)?.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(right.evaluate(resolver)?.is_truthy()))
                }
                BinaryOp::Or => {
                    if left.evaluate(resolver)?.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(right.evaluate(resolver)?.is_truthy()))
                }
                BinaryOp::Eq | BinaryOp::Ne => {
                    let l = left.evaluate(resolver)?.into_string();
                    let r = right.evaluate(resolver)?.into_string();
                    Ok(Value::Bool((l == r) == (*op == BinaryOp::Eq)))
                }
            },
            Expr::Call { function, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.evaluate(resolver)?.into_string());
                }
                Ok(call(*function, values))
            }
        }
    }
}

fn call(function: Function, mut args: Vec<String>) -> Value {
    match function {
        Function::Join => {
            let separator = args.remove(0);
            let parts: Vec<String> = args.into_iter().filter(|s| !s.is_empty()).collect();
            Value::String(parts.join(&separator))
        }
        Function::Contains => Value::Bool(args[0].contains(args[1].as_str())),
        Function::StartsWith => Value::Bool(args[0].starts_with(args[1].as_str())),
        Function::EndsWith => Value::Bool(args[0].ends_with(args[1].as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashMap;

    struct MapResolver {
        job: HashMap<&'static str, &'static str>,
        host: HashMap<&'static str, &'static str>,
    }

    impl Resolver for MapResolver {
        fn job_field(&self, name: &str) -> Result<String> {
            self.job
                .get(name)
                .map(|v| v.to_string())
                .ok_or_else(|| Error::UnknownField {
                    step: "test".to_string(),
                    field: name.to_string(),
                })
        }

        fn host_fact(&self, name: &str) -> Result<String> {
            self.host
                .get(name)
                .map(|v| v.to_string())
                .ok_or_else(|| Error::MissingHostFact {
                    step: "test".to_string(),
                    fact: name.to_string(),
                })
        }
    }

    fn resolver() -> MapResolver {
        MapResolver {
            job: HashMap::from([
                ("os", "linux"),
                ("toolchain", "stable"),
                ("suite", "std"),
                ("coverage_flag", "--coverage"),
                ("wgpu_flag", ""),
            ]),
            host: HashMap::from([("os", "linux"), ("gpu", "true")]),
        }
    }

    fn eval(input: &str) -> Result<Value> {
        Expr::parse(input).unwrap().evaluate(&resolver())
    }

    #[test]
    fn test_predicate() {
        let value =
            eval("host.os == 'linux' && job.toolchain == 'stable' && job.suite == 'std'").unwrap();
        assert_eq!(value, Value::Bool(true));

        let value = eval("host.os == 'linux' && job.suite != 'std'").unwrap();
        assert_eq!(value, Value::Bool(false));
    }

    #[test]
    fn test_equality_compares_string_forms() {
        assert_eq!(eval("host.gpu == true").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_short_circuit_skips_missing_fields() {
        assert_eq!(
            eval("job.suite == 'nostd' && job.missing == 'x'").unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            eval("job.suite == 'std' || job.missing == 'x'").unwrap(),
            Value::Bool(true)
        );
        assert!(eval("job.suite == 'std' && job.missing == 'x'").is_err());
    }

    #[test]
    fn test_join_skips_empty_parts() {
        assert_eq!(
            eval("join(' ', job.coverage_flag, job.wgpu_flag, '--locked')").unwrap(),
            Value::String("--coverage --locked".to_string())
        );
        assert_eq!(
            eval("join(' ', job.wgpu_flag, '')").unwrap(),
            Value::String(String::new())
        );
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(eval("startsWith(job.toolchain, 'sta')").unwrap(), Value::Bool(true));
        assert_eq!(eval("endsWith(job.os, 'ux')").unwrap(), Value::Bool(true));
        assert_eq!(eval("contains(job.coverage_flag, 'cov')").unwrap(), Value::Bool(true));
        assert_eq!(eval("!contains(job.os, 'win')").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_missing_host_fact() {
        let err = eval("host.vulkan == 'true'").unwrap_err();
        assert!(matches!(err, Error::MissingHostFact { ref fact, .. } if fact == "vulkan"));
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::from("yes").is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::from("false").is_truthy());
        assert!(!Value::from(false).is_truthy());
    }
}
