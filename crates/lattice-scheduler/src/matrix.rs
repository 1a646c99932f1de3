//! Matrix expansion: axes × include rules × exclude rules → jobs.

use lattice_core::pipeline::{AxisSet, MatrixConfig};
use lattice_core::{Error, FieldMap, Result, RuleKind};
use serde::Serialize;
use tracing::{debug, warn};

/// A single job in an expanded matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixJob {
    pub index: usize,
    pub display_name: String,
    pub fields: FieldMap,
}

/// Result of matrix expansion.
#[derive(Debug, Clone, Serialize)]
pub struct MatrixExpansion {
    pub name: String,
    pub jobs: Vec<MatrixJob>,
    pub fail_fast: bool,
    pub max_parallel: Option<u32>,
    /// Non-fatal findings, such as include rules that can never merge.
    pub warnings: Vec<String>,
}

impl MatrixExpansion {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs whose fields contain every entry of `selector`.
    pub fn find(&self, selector: &FieldMap) -> Vec<&MatrixJob> {
        self.jobs
            .iter()
            .filter(|job| job.fields.matches_all(selector))
            .collect()
    }
}

/// Resolver for matrix configurations.
///
/// Every stage is a pure function of its inputs: the same configuration
/// always yields the same jobs in the same order.
pub struct MatrixResolver;

impl MatrixResolver {
    pub fn new() -> Self {
        Self
    }

    /// Validate and expand a matrix into named, indexed jobs.
    pub fn expand(&self, name: &str, matrix: &MatrixConfig) -> Result<MatrixExpansion> {
        let warnings = self.validate(matrix)?;
        let rows = self.resolve_unchecked(matrix);

        let jobs = rows
            .into_iter()
            .enumerate()
            .map(|(index, fields)| MatrixJob {
                index,
                display_name: self.format_display_name(name, &fields),
                fields,
            })
            .collect();

        Ok(MatrixExpansion {
            name: name.to_string(),
            jobs,
            fail_fast: matrix.fail_fast,
            max_parallel: matrix.max_parallel,
            warnings,
        })
    }

    /// Validate and resolve a matrix into its ordered job rows.
    pub fn resolve(&self, matrix: &MatrixConfig) -> Result<Vec<FieldMap>> {
        self.validate(matrix)?;
        Ok(self.resolve_unchecked(matrix))
    }

    /// Check every rule and field declaration. Returns warnings for rules
    /// that are legal but probably not what the author meant.
    pub fn validate(&self, matrix: &MatrixConfig) -> Result<Vec<String>> {
        for (name, _) in matrix.fields.iter() {
            if name.trim().is_empty() {
                return Err(Error::InvalidField {
                    field: name.to_string(),
                    reason: "field name must not be empty".to_string(),
                });
            }
        }

        let mut warnings = Vec::new();

        for (index, rule) in matrix.include.iter().enumerate() {
            self.check_rule(matrix, RuleKind::Include, index, rule)?;

            if !rule.keys().any(|field| matrix.axes.contains(field)) {
                warn!(index, rule = %rule, "Include rule sets no axis fields");
                warnings.push(format!(
                    "include rule #{} {} sets no axis fields; it can never merge and always becomes its own job",
                    index, rule
                ));
            }
        }

        for (index, rule) in matrix.exclude.iter().enumerate() {
            self.check_rule(matrix, RuleKind::Exclude, index, rule)?;
        }

        Ok(warnings)
    }

    fn check_rule(
        &self,
        matrix: &MatrixConfig,
        kind: RuleKind,
        index: usize,
        rule: &FieldMap,
    ) -> Result<()> {
        if rule.is_empty() {
            return Err(Error::EmptyRule { kind, index });
        }
        for field in rule.keys() {
            if !matrix.is_known_field(field) {
                return Err(Error::InvalidRule {
                    kind,
                    index,
                    rule: rule.to_string(),
                    field: field.to_string(),
                    reason: "is not an axis or a declared field".to_string(),
                });
            }
        }
        Ok(())
    }

    fn resolve_unchecked(&self, matrix: &MatrixConfig) -> Vec<FieldMap> {
        let rows = self.generate_combinations(&matrix.axes);
        debug!(rows = rows.len(), "Generated base rows");

        let rows = self.apply_includes(&matrix.axes, rows, &matrix.include);
        debug!(rows = rows.len(), "Applied include rules");

        let rows = self.apply_excludes(rows, &matrix.exclude);
        debug!(rows = rows.len(), "Applied exclude rules");

        rows
    }

    /// Cartesian product; the first-declared axis is the outermost loop.
    fn generate_combinations(&self, axes: &AxisSet) -> Vec<FieldMap> {
        let mut result = vec![FieldMap::new()];

        for axis in axes.iter() {
            let mut new_result = Vec::with_capacity(result.len() * axis.values.len());

            for combo in &result {
                for value in &axis.values {
                    let mut new_combo = combo.clone();
                    new_combo.insert(axis.name.clone(), value.clone());
                    new_result.push(new_combo);
                }
            }

            result = new_result;
        }

        result
    }

    /// Merge each rule into every row it matches, or append it as a new row.
    ///
    /// A rule matches a row when the axis fields they share are non-empty and
    /// all equal. Non-axis fields never block a match and are overwritten by
    /// later rules.
    fn apply_includes(
        &self,
        axes: &AxisSet,
        mut rows: Vec<FieldMap>,
        includes: &[FieldMap],
    ) -> Vec<FieldMap> {
        for (index, rule) in includes.iter().enumerate() {
            let mut merged = 0;

            for row in rows.iter_mut() {
                if !self.matches_include(axes, row, rule) {
                    continue;
                }
                for (field, value) in rule.iter() {
                    if !(axes.contains(field) && row.contains_key(field)) {
                        row.insert(field, value.clone());
                    }
                }
                merged += 1;
            }

            if merged == 0 {
                debug!(index, rule = %rule, "Include rule appended as new row");
                rows.push(rule.clone());
            } else {
                debug!(index, rows = merged, "Include rule merged");
            }
        }

        rows
    }

    fn matches_include(&self, axes: &AxisSet, row: &FieldMap, rule: &FieldMap) -> bool {
        let mut overlap = rule
            .iter()
            .filter(|(field, _)| axes.contains(field) && row.contains_key(field))
            .peekable();

        overlap.peek().is_some() && overlap.all(|(field, value)| row.get(field) == Some(value))
    }

    fn apply_excludes(&self, mut rows: Vec<FieldMap>, excludes: &[FieldMap]) -> Vec<FieldMap> {
        rows.retain(|row| !excludes.iter().any(|exclude| row.matches_all(exclude)));
        rows
    }

    fn format_display_name(&self, name: &str, fields: &FieldMap) -> String {
        if fields.is_empty() {
            return name.to_string();
        }

        let parts: Vec<String> = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        format!("{} ({})", name, parts.join(", "))
    }
}

impl Default for MatrixResolver {
    fn default() -> Self {
        Self::new()
    }
}
