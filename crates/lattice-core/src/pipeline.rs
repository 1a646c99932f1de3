//! Workflow definition types.
//!
//! These types represent the user-authored matrix document: axes, include
//! and exclude tables, declared fields and the step list.

use crate::error::{Error, Result};
use crate::fields::{FieldMap, MapValue, OrderedMap, optional_scalar};
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Parse a workflow document from YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read and parse a workflow document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixConfig {
    pub axes: AxisSet,
    /// Fields that are not axes but may be set by include rules.
    #[serde(default)]
    pub fields: OrderedMap<FieldSpec>,
    #[serde(default)]
    pub include: Vec<FieldMap>,
    #[serde(default)]
    pub exclude: Vec<FieldMap>,
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    #[serde(default)]
    pub max_parallel: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl MatrixConfig {
    pub fn new(axes: AxisSet) -> Self {
        Self {
            axes,
            fields: OrderedMap::new(),
            include: vec![],
            exclude: vec![],
            fail_fast: true,
            max_parallel: None,
        }
    }

    /// Whether `name` is an axis or a declared field.
    pub fn is_known_field(&self, name: &str) -> bool {
        self.axes.contains(name) || self.fields.contains_key(name)
    }

    /// The documented default for a field, if it is absence-tolerant.
    pub fn default_for(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|spec| spec.default.as_deref())
    }
}

/// Declaration of a job field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FieldSpec {
    /// Value used when a job does not set the field.
    #[serde(default, deserialize_with = "optional_scalar")]
    #[schemars(with = "Option<String>")]
    pub default: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn with_default(default: impl Into<String>) -> Self {
        Self {
            default: Some(default.into()),
            description: None,
        }
    }
}

impl MapValue for FieldSpec {
    fn deserialize_value<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        Option::<FieldSpec>::deserialize(deserializer).map(Option::unwrap_or_default)
    }
}

/// A named dimension of the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Axis {
    pub name: String,
    pub values: Vec<String>,
}

/// The declared axes, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "OrderedMap<Vec<String>>",
    into = "OrderedMap<Vec<String>>"
)]
pub struct AxisSet {
    axes: Vec<Axis>,
}

impl AxisSet {
    /// Build an axis set, checking that names are unique and every axis has values.
    pub fn new<N, V, I>(axes: I) -> Result<Self>
    where
        N: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (N, Vec<V>)>,
    {
        let mut set = Vec::new();
        for (name, values) in axes {
            let name = name.into();
            let values: Vec<String> = values.into_iter().map(Into::into).collect();

            if name.trim().is_empty() {
                return Err(Error::InvalidAxis {
                    axis: name,
                    reason: "axis name must not be empty".to_string(),
                });
            }
            if set.iter().any(|axis: &Axis| axis.name == name) {
                return Err(Error::InvalidAxis {
                    axis: name,
                    reason: "declared more than once".to_string(),
                });
            }
            if values.is_empty() {
                return Err(Error::InvalidAxis {
                    axis: name,
                    reason: "must have at least one value".to_string(),
                });
            }
            for (i, value) in values.iter().enumerate() {
                if values[..i].contains(value) {
                    return Err(Error::InvalidAxis {
                        axis: name,
                        reason: format!("value '{}' listed more than once", value),
                    });
                }
            }

            set.push(Axis { name, values });
        }
        if set.is_empty() {
            return Err(Error::InvalidAxis {
                axis: "(none)".to_string(),
                reason: "the matrix must declare at least one axis".to_string(),
            });
        }
        Ok(Self { axes: set })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Axis> {
        self.axes.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.axes.iter().map(|axis| axis.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|axis| axis.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Number of base rows the cartesian product yields.
    pub fn combinations(&self) -> usize {
        self.axes.iter().map(|axis| axis.values.len()).product()
    }
}

impl TryFrom<OrderedMap<Vec<String>>> for AxisSet {
    type Error = Error;

    fn try_from(map: OrderedMap<Vec<String>>) -> Result<Self> {
        AxisSet::new(map)
    }
}

impl From<AxisSet> for OrderedMap<Vec<String>> {
    fn from(set: AxisSet) -> Self {
        set.axes
            .into_iter()
            .map(|axis| (axis.name, axis.values))
            .collect()
    }
}

impl JsonSchema for AxisSet {
    fn schema_name() -> String {
        "AxisSet".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        <OrderedMap<Vec<String>>>::json_schema(generator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Opaque identifier of the external action this step invokes.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(rename = "if", default)]
    pub if_expr: Option<String>,
    #[serde(default)]
    pub unless: Option<String>,
    #[serde(default)]
    pub params: OrderedMap<String>,
    #[serde(default)]
    pub env: OrderedMap<String>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            action: None,
            if_expr: None,
            unless: None,
            params: OrderedMap::new(),
            env: OrderedMap::new(),
        }
    }

    pub fn when(mut self, expr: impl Into<String>) -> Self {
        self.if_expr = Some(expr.into());
        self
    }

    pub fn unless(mut self, expr: impl Into<String>) -> Self {
        self.unless = Some(expr.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.params.insert(name, template.into());
        self
    }

    pub fn env(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.env.insert(name, template.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_set_rejects_empty_axis() {
        let err = AxisSet::new([("os", Vec::<String>::new())]).unwrap_err();
        assert!(matches!(err, Error::InvalidAxis { ref axis, .. } if axis == "os"));
    }

    #[test]
    fn test_axis_set_rejects_no_axes() {
        let err = AxisSet::new(Vec::<(String, Vec<String>)>::new()).unwrap_err();
        assert!(err.to_string().contains("at least one axis"));

        let err = serde_yaml::from_str::<AxisSet>("{}").unwrap_err();
        assert!(err.to_string().contains("at least one axis"));
    }

    #[test]
    fn test_axis_set_rejects_duplicate_values() {
        let err = AxisSet::new([("os", vec!["linux", "linux"])]).unwrap_err();
        assert!(err.to_string().contains("'linux' listed more than once"));
    }

    #[test]
    fn test_axis_set_rejects_duplicate_names() {
        let err = AxisSet::new([("os", vec!["linux"]), ("os", vec!["macos"])]).unwrap_err();
        assert!(err.to_string().contains("declared more than once"));
    }

    #[test]
    fn test_combinations() {
        let axes = AxisSet::new([
            ("os", vec!["linux", "macos", "windows"]),
            ("toolchain", vec!["stable", "1.85.0"]),
        ])
        .unwrap();
        assert_eq!(axes.combinations(), 6);
        assert_eq!(axes.names().collect::<Vec<_>>(), vec!["os", "toolchain"]);
    }

    #[test]
    fn test_field_spec_accepts_null() {
        let yaml = "cache_key:\ncoverage_flag: { default: '' }\n";
        let fields: OrderedMap<FieldSpec> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(fields.get("cache_key"), Some(&FieldSpec::default()));
        assert_eq!(fields.get("coverage_flag"), Some(&FieldSpec::with_default("")));
    }

    #[test]
    fn test_step_builder() {
        let step = StepDefinition::new("coverage")
            .when("job.suite == 'std'")
            .param("flags", "${{ job.coverage_flag }}");
        assert_eq!(step.display_name(), "coverage");
        assert_eq!(step.if_expr.as_deref(), Some("job.suite == 'std'"));
        assert_eq!(step.params.len(), 1);
    }
}
