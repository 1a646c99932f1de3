//! `${{ ... }}` templates for step parameters and environment bindings.

use crate::error::Result;
use crate::expression::{Expr, ParseError, Reference, Resolver, Value};
use regex::Regex;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\$\{\{(.*?)\}\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Expr(Expr),
}

/// A parsed parameter template.
///
/// Supports:
/// - plain text, kept as-is
/// - `${{ job.field }}` / `${{ matrix.field }}` - job field
/// - `${{ host.fact }}` - host fact
/// - `${{ join(' ', job.a, job.b) }}` - any expression
///
/// A template that is exactly one placeholder keeps the expression's type,
/// so `${{ job.suite == 'std' }}` renders as a boolean.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(input: &str) -> std::result::Result<Self, ParseError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(input) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(literal(input, last, whole.start())?);
            }
            let expr = Expr::parse(inner.as_str()).map_err(|e| ParseError {
                message: e.message,
                position: inner.start() + e.position,
            })?;
            segments.push(Segment::Expr(expr));
            last = whole.end();
        }
        if last < input.len() {
            segments.push(literal(input, last, input.len())?);
        }

        Ok(Self { segments })
    }

    pub fn references(&self) -> Vec<&Reference> {
        self.segments
            .iter()
            .flat_map(|segment| match segment {
                Segment::Expr(expr) => expr.references(),
                Segment::Literal(_) => Vec::new(),
            })
            .collect()
    }

    pub fn render(&self, resolver: &dyn Resolver) -> Result<Value> {
        if let [Segment::Expr(expr)] = self.segments.as_slice() {
            return expr.evaluate(resolver);
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr(expr) => out.push_str(&expr.evaluate(resolver)?.into_string()),
            }
        }
        Ok(Value::String(out))
    }
}

/// Text between placeholders. An opening `${{` here was never closed.
fn literal(input: &str, start: usize, end: usize) -> std::result::Result<Segment, ParseError> {
    let text = &input[start..end];
    match text.find("${{") {
        Some(offset) => Err(ParseError {
            message: "unclosed '${{' placeholder".to_string(),
            position: start + offset,
        }),
        None => Ok(Segment::Literal(text.to_string())),
    }
}
