//! Instantiated analyses and the dataset collaborator contract.
//!
//! An [`AnalysisInstance`] owns the only mutable state in the system: bound
//! parameter values (validated against their declared constraints on every
//! write), column-slot bindings, and nested subanalysis instances. It never
//! owns or mutates the frozen [`AnalysisSpec`] it references.
//!
//! The dataset itself is an external collaborator reached through the narrow
//! [`Dataset`] trait: the only question this crate ever asks a dataset is
//! "do you have a column with this name, and what is its format?".

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis_spec::{AnalysisSpec, ParameterViolation};
use crate::data_format::DataFormat;
use crate::expression::Value;
use crate::subanalysis::Subanalysis;

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// The dataset collaborator: column lookup by name.
pub trait Dataset {
    /// The resolved format of the named dataset column, or `None` when the
    /// dataset has no such column.
    fn lookup(&self, column_name: &str) -> Option<&DataFormat>;
}

/// A BTreeMap-backed [`Dataset`] for tests and tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDataset {
    columns: BTreeMap<String, DataFormat>,
}

impl TableDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, format: DataFormat) -> Self {
        self.columns.insert(name.into(), format);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, format: DataFormat) {
        self.columns.insert(name.into(), format);
    }
}

impl Dataset for TableDataset {
    fn lookup(&self, column_name: &str) -> Option<&DataFormat> {
        self.columns.get(column_name)
    }
}

// ---------------------------------------------------------------------------
// InstanceError
// ---------------------------------------------------------------------------

/// Errors mutating or reading instance state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstanceError {
    /// No parameter with this name in the spec.
    UnknownParameter { name: String },
    /// No column with this name in the spec.
    UnknownColumn { name: String },
    /// No subanalysis with this name in the spec.
    UnknownSubanalysis { name: String },
    /// The value violates the parameter's declared constraints.
    Constraint {
        parameter: String,
        violation: ParameterViolation,
    },
    /// The attribute is a read-only alias mapped into the parent analysis.
    MappedAttributeReadOnly {
        subanalysis: String,
        attribute: String,
        mapped_to: String,
    },
}

impl fmt::Display for InstanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownParameter { name } => write!(f, "unknown parameter '{name}'"),
            Self::UnknownColumn { name } => write!(f, "unknown column '{name}'"),
            Self::UnknownSubanalysis { name } => write!(f, "unknown subanalysis '{name}'"),
            Self::Constraint {
                parameter,
                violation,
            } => write!(f, "invalid value for parameter '{parameter}': {violation}"),
            Self::MappedAttributeReadOnly {
                subanalysis,
                attribute,
                mapped_to,
            } => write!(
                f,
                "cannot set '{attribute}' in subanalysis '{subanalysis}': it is mapped to \
                 '{mapped_to}' in the parent analysis and must be set there"
            ),
        }
    }
}

impl std::error::Error for InstanceError {}

// ---------------------------------------------------------------------------
// AnalysisContext
// ---------------------------------------------------------------------------

/// Read access to instantiated analysis state, implemented both by
/// [`AnalysisInstance`] and by the subanalysis mapping facade so that
/// expression evaluation and dispatch delegate into nested analyses
/// uniformly.
pub trait AnalysisContext {
    /// The frozen spec this state belongs to.
    fn spec(&self) -> &AnalysisSpec;

    /// The current bound value of a parameter, if set.
    fn parameter_value(&self, name: &str) -> Option<&Value>;

    /// The dataset column name currently bound to a column slot, if any.
    fn column_binding(&self, name: &str) -> Option<&str>;

    /// A read view of a nested subanalysis.
    fn subanalysis(&self, name: &str) -> Option<Subanalysis<'_>>;
}

// ---------------------------------------------------------------------------
// AnalysisInstance
// ---------------------------------------------------------------------------

/// One instantiation of an assembled analysis definition.
#[derive(Debug, Clone)]
pub struct AnalysisInstance {
    spec: Arc<AnalysisSpec>,
    parameter_values: BTreeMap<String, Value>,
    column_bindings: BTreeMap<String, String>,
    nested: BTreeMap<String, AnalysisInstance>,
}

impl AnalysisInstance {
    /// Instantiate a spec: parameter defaults are bound, and one nested
    /// instance is created per declared subanalysis, recursively.
    pub fn new(spec: Arc<AnalysisSpec>) -> Self {
        let parameter_values = spec
            .parameters()
            .iter()
            .filter_map(|p| p.default.clone().map(|v| (p.name.clone(), v)))
            .collect();
        let nested = spec
            .subanalyses()
            .iter()
            .map(|s| (s.name.clone(), AnalysisInstance::new(Arc::clone(&s.spec))))
            .collect();
        Self {
            spec,
            parameter_values,
            column_bindings: BTreeMap::new(),
            nested,
        }
    }

    pub fn spec_arc(&self) -> &Arc<AnalysisSpec> {
        &self.spec
    }

    /// Bind a parameter value. The value is checked against the parameter's
    /// declared kind, choices, and bounds on every write.
    pub fn set_parameter(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), InstanceError> {
        let value = value.into();
        let parameter = self
            .spec
            .parameter(name)
            .ok_or_else(|| InstanceError::UnknownParameter {
                name: name.to_string(),
            })?;
        parameter
            .check_value(&value)
            .map_err(|violation| InstanceError::Constraint {
                parameter: name.to_string(),
                violation,
            })?;
        self.parameter_values.insert(name.to_string(), value);
        Ok(())
    }

    /// Bind a column slot to a named dataset column.
    pub fn bind_column(
        &mut self,
        slot: &str,
        dataset_column: impl Into<String>,
    ) -> Result<(), InstanceError> {
        if self.spec.column(slot).is_none() {
            return Err(InstanceError::UnknownColumn {
                name: slot.to_string(),
            });
        }
        self.column_bindings
            .insert(slot.to_string(), dataset_column.into());
        Ok(())
    }

    /// Remove a column-slot binding, if present.
    pub fn unbind_column(&mut self, slot: &str) {
        self.column_bindings.remove(slot);
    }

    /// The nested instance backing a declared subanalysis.
    pub fn nested_instance(&self, name: &str) -> Option<&AnalysisInstance> {
        self.nested.get(name)
    }

    pub(crate) fn nested_instance_mut(&mut self, name: &str) -> Option<&mut AnalysisInstance> {
        self.nested.get_mut(name)
    }
}

impl AnalysisContext for AnalysisInstance {
    fn spec(&self) -> &AnalysisSpec {
        &self.spec
    }

    fn parameter_value(&self, name: &str) -> Option<&Value> {
        self.parameter_values.get(name)
    }

    fn column_binding(&self, name: &str) -> Option<&str> {
        self.column_bindings.get(name).map(String::as_str)
    }

    fn subanalysis(&self, name: &str) -> Option<Subanalysis<'_>> {
        let entry = self.spec.subanalysis(name)?;
        let inner = self.nested.get(name)?;
        Some(Subanalysis::new(entry, self, inner))
    }
}
