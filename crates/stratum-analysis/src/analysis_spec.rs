//! Immutable specification entities and the frozen [`AnalysisSpec`] registry.
//!
//! Every entity here is a value record produced exactly once, at assembly
//! time, for a given analysis definition (including its full inheritance
//! chain). The frozen registry is shared read-only (`Arc`) by every instance
//! of that definition; only instance state (parameter values, bindings)
//! varies per run.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::data_format::DataFormat;
use crate::data_space::{DataSpace, RowFrequency};
use crate::expression::{Operation, Value, ValueKind};
use crate::salience::{CheckSalience, ColumnSalience, ParameterSalience};

// ---------------------------------------------------------------------------
// ColumnSpec
// ---------------------------------------------------------------------------

/// A column the analysis can derive (or require) when applied to a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub format: DataFormat,
    pub desc: String,
    pub row_frequency: RowFrequency,
    pub salience: ColumnSalience,
    /// Definitions contributing to this slot, most derived first.
    pub defined_in: Vec<String>,
    /// Field-level overrides applied when inherited, as (field, value) pairs.
    pub modified: Vec<(String, String)>,
    /// Subanalysis alias: (subanalysis name, column name within it).
    pub mapped_from: Option<(String, String)>,
}

// ---------------------------------------------------------------------------
// Parameter
// ---------------------------------------------------------------------------

/// A free variable of the analysis, optionally constrained by a closed
/// choice set or by numeric bounds (mutually exclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub kind: ValueKind,
    pub desc: String,
    pub salience: ParameterSalience,
    pub choices: Option<Vec<Value>>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    /// Required unless salience is `Required`.
    pub default: Option<Value>,
    pub defined_in: Vec<String>,
    pub modified: Vec<(String, String)>,
    pub mapped_from: Option<(String, String)>,
}

/// Why a candidate parameter value was rejected.
///
/// Checked on every write, not only at assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterViolation {
    KindMismatch { expected: ValueKind, actual: ValueKind },
    NotAChoice { value: Value, choices: Vec<Value> },
    BelowLowerBound { value: Value, bound: f64 },
    AboveUpperBound { value: Value, bound: f64 },
    NotNumeric { value: Value },
}

impl fmt::Display for ParameterViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KindMismatch { expected, actual } => {
                write!(f, "expected a {expected} value, got {actual}")
            }
            Self::NotAChoice { value, choices } => {
                let rendered: Vec<String> = choices.iter().map(ToString::to_string).collect();
                write!(f, "{value} is not one of: {}", rendered.join(", "))
            }
            Self::BelowLowerBound { value, bound } => {
                write!(f, "{value} is below the lower bound {bound}")
            }
            Self::AboveUpperBound { value, bound } => {
                write!(f, "{value} is above the upper bound {bound}")
            }
            Self::NotNumeric { value } => {
                write!(f, "{value} is not numeric but bounds are declared")
            }
        }
    }
}

impl Parameter {
    /// Check a candidate value against the declared kind, choices, and
    /// bounds.
    pub fn check_value(&self, value: &Value) -> Result<(), ParameterViolation> {
        if value.kind() != self.kind {
            return Err(ParameterViolation::KindMismatch {
                expected: self.kind,
                actual: value.kind(),
            });
        }
        if let Some(choices) = &self.choices {
            if !choices.contains(value) {
                return Err(ParameterViolation::NotAChoice {
                    value: value.clone(),
                    choices: choices.clone(),
                });
            }
            return Ok(());
        }
        if self.lower_bound.is_some() || self.upper_bound.is_some() {
            let numeric = value
                .as_f64()
                .ok_or_else(|| ParameterViolation::NotNumeric {
                    value: value.clone(),
                })?;
            if let Some(bound) = self.lower_bound {
                if numeric < bound {
                    return Err(ParameterViolation::BelowLowerBound {
                        value: value.clone(),
                        bound,
                    });
                }
            }
            if let Some(bound) = self.upper_bound {
                if numeric > bound {
                    return Err(ParameterViolation::AboveUpperBound {
                        value: value.clone(),
                        bound,
                    });
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Switch, PipelineBuilder, Check
// ---------------------------------------------------------------------------

/// A named discriminator grouping mutually-exclusive pipeline builders for
/// the same output. A switch declares what it reads but carries no condition
/// of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Switch {
    pub name: String,
    pub desc: String,
    pub inputs: Vec<String>,
    pub parameters: Vec<String>,
    pub defined_in: Vec<String>,
}

/// A rule that, under an optional condition and optional switch, consumes
/// columns/parameters and produces one or more output columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineBuilder {
    pub name: String,
    pub desc: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub parameters: Vec<String>,
    pub condition: Option<Operation>,
    pub switch: Option<String>,
    pub defined_in: Vec<String>,
}

impl PipelineBuilder {
    /// Structural identity of the (condition, switch) pair, used for
    /// ambiguity grouping. Two builders with an equal pair for the same
    /// output are rejected at assembly.
    pub fn condition_switch_identity(&self) -> (Option<String>, Option<String>) {
        (
            self.condition.as_ref().map(Operation::identity),
            self.switch.clone(),
        )
    }
}

/// A quality-control check runnable on a generated column to grade the
/// probability that the analysis failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    pub column: String,
    pub desc: String,
    pub inputs: Vec<String>,
    pub parameters: Vec<String>,
    pub salience: CheckSalience,
    pub defined_in: Vec<String>,
}

// ---------------------------------------------------------------------------
// SubanalysisSpec
// ---------------------------------------------------------------------------

/// A nested analysis composed into a parent, with selected attributes
/// aliased into the parent's namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubanalysisSpec {
    pub name: String,
    pub desc: String,
    /// The assembled specification of the nested definition.
    pub spec: Arc<AnalysisSpec>,
    /// Ordered, deduplicated (name-in-subanalysis, name-in-parent) pairs.
    pub mappings: Vec<(String, String)>,
    pub defined_in: Vec<String>,
    pub modified: Vec<(String, String)>,
}

impl SubanalysisSpec {
    /// The parent-side name an attribute of the subanalysis is aliased to,
    /// if any. Absence means "not an aliased attribute", not an error.
    pub fn mapping(&self, name: &str) -> Option<&str> {
        self.mappings
            .iter()
            .find(|(inner, _)| inner == name)
            .map(|(_, parent)| parent.as_str())
    }
}

// ---------------------------------------------------------------------------
// AnalysisSpec
// ---------------------------------------------------------------------------

/// The validated, immutable registry of one analysis definition: every
/// entity kind, name-unique and name-sorted, plus the hierarchy space.
///
/// Constructed only by the assembler; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSpec {
    name: String,
    space: DataSpace,
    columns: Vec<ColumnSpec>,
    parameters: Vec<Parameter>,
    builders: Vec<PipelineBuilder>,
    switches: Vec<Switch>,
    checks: Vec<Check>,
    subanalyses: Vec<SubanalysisSpec>,
    digest: String,
}

impl AnalysisSpec {
    /// Freeze validated collections into a registry. Collections must
    /// already be name-unique; they are sorted by name here.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn freeze(
        name: String,
        space: DataSpace,
        mut columns: Vec<ColumnSpec>,
        mut parameters: Vec<Parameter>,
        mut builders: Vec<PipelineBuilder>,
        mut switches: Vec<Switch>,
        mut checks: Vec<Check>,
        mut subanalyses: Vec<SubanalysisSpec>,
    ) -> Self {
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        parameters.sort_by(|a, b| a.name.cmp(&b.name));
        builders.sort_by(|a, b| a.name.cmp(&b.name));
        switches.sort_by(|a, b| a.name.cmp(&b.name));
        checks.sort_by(|a, b| a.name.cmp(&b.name));
        subanalyses.sort_by(|a, b| a.name.cmp(&b.name));
        let mut spec = Self {
            name,
            space,
            columns,
            parameters,
            builders,
            switches,
            checks,
            subanalyses,
            digest: String::new(),
        };
        spec.digest = spec.compute_digest();
        spec
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space(&self) -> &DataSpace {
        &self.space
    }

    /// Canonical SHA-256 digest of the frozen registry. Identical
    /// definitions assemble to identical digests.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn pipeline_builders(&self) -> &[PipelineBuilder] {
        &self.builders
    }

    pub fn switches(&self) -> &[Switch] {
        &self.switches
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    pub fn subanalyses(&self) -> &[SubanalysisSpec] {
        &self.subanalyses
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn pipeline_builder(&self, name: &str) -> Option<&PipelineBuilder> {
        self.builders.iter().find(|b| b.name == name)
    }

    pub fn switch(&self, name: &str) -> Option<&Switch> {
        self.switches.iter().find(|s| s.name == name)
    }

    pub fn check(&self, name: &str) -> Option<&Check> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn subanalysis(&self, name: &str) -> Option<&SubanalysisSpec> {
        self.subanalyses.iter().find(|s| s.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// All checks inspecting the named column.
    pub fn column_checks<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Check> {
        self.checks.iter().filter(move |c| c.column == column)
    }

    fn compute_digest(&self) -> String {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.space.name().as_bytes());
        for axis in self.space.axes() {
            buf.push(0x1f);
            buf.extend_from_slice(axis.as_bytes());
        }
        buf.push(0);
        for column in &self.columns {
            buf.extend_from_slice(column.name.as_bytes());
            buf.push(0x1f);
            buf.extend_from_slice(column.format.name().as_bytes());
            buf.push(0x1f);
            buf.extend_from_slice(&column.row_frequency.bits().to_le_bytes());
            buf.push(column.salience.level());
            if let Some((sub, inner)) = &column.mapped_from {
                buf.extend_from_slice(sub.as_bytes());
                buf.push(b'.');
                buf.extend_from_slice(inner.as_bytes());
            }
            buf.push(0);
        }
        for parameter in &self.parameters {
            buf.extend_from_slice(parameter.name.as_bytes());
            buf.push(0x1f);
            buf.extend_from_slice(parameter.kind.to_string().as_bytes());
            buf.push(parameter.salience.level());
            buf.push(0);
        }
        for builder in &self.builders {
            buf.extend_from_slice(builder.name.as_bytes());
            buf.push(0x1f);
            for output in &builder.outputs {
                buf.extend_from_slice(output.as_bytes());
                buf.push(b',');
            }
            if let Some(condition) = &builder.condition {
                buf.extend_from_slice(&condition.canonical_bytes());
            }
            if let Some(switch) = &builder.switch {
                buf.extend_from_slice(switch.as_bytes());
            }
            buf.push(0);
        }
        for switch in &self.switches {
            buf.extend_from_slice(switch.name.as_bytes());
            buf.push(0);
        }
        for check in &self.checks {
            buf.extend_from_slice(check.name.as_bytes());
            buf.push(0x1f);
            buf.extend_from_slice(check.column.as_bytes());
            buf.push(0);
        }
        for sub in &self.subanalyses {
            buf.extend_from_slice(sub.name.as_bytes());
            buf.push(0x1f);
            buf.extend_from_slice(sub.spec.digest().as_bytes());
            for (inner, parent) in &sub.mappings {
                buf.extend_from_slice(inner.as_bytes());
                buf.push(b'>');
                buf.extend_from_slice(parent.as_bytes());
                buf.push(b',');
            }
            buf.push(0);
        }
        let digest = Sha256::digest(&buf);
        format!("sha256:{}", hex::encode(digest))
    }
}
