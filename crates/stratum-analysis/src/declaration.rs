//! Raw, unvalidated declarations and the definition-authoring surface.
//!
//! An [`AnalysisDefinition`] is the explicit registration API a domain
//! author uses to declare columns, parameters, subanalyses, pipeline
//! builders, switches, and checks for one analysis definition. Declarations
//! are plain value structs; nothing is validated until the assembler runs.
//!
//! Inheritance and subanalysis aliasing are declared through an explicit
//! [`DeclOrigin`] rather than any implicit shadowing: a derived definition
//! re-declaring a base attribute without `Inherited` is rejected at
//! assembly ("silent shadow"). Fields left as `None` on an `Inherited` or
//! `MappedFrom` declaration are inferred from the source entity; fields set
//! locally override it and are recorded in the entity's `modified` list.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis_spec::AnalysisSpec;
use crate::data_format::DataFormat;
use crate::data_space::{DataSpace, RowFrequency};
use crate::expression::{Operation, Value, ValueKind};
use crate::salience::{CheckSalience, ColumnSalience, ParameterSalience};

// ---------------------------------------------------------------------------
// DeclOrigin
// ---------------------------------------------------------------------------

/// Where a declared column or parameter comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeclOrigin {
    /// Declared fresh in this definition.
    #[default]
    Local,
    /// Explicitly inherited from a base definition in the chain.
    Inherited,
    /// Aliased from an attribute of a declared subanalysis.
    MappedFrom {
        subanalysis: String,
        source: String,
    },
}

// ---------------------------------------------------------------------------
// Column declaration
// ---------------------------------------------------------------------------

/// A raw column declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDecl {
    pub name: String,
    pub origin: DeclOrigin,
    /// Required for `Local`; optional re-annotation otherwise (must be a
    /// sub-format of the source format).
    pub format: Option<DataFormat>,
    pub desc: Option<String>,
    /// Defaults to the leaf frequency of the definition's space.
    pub row_frequency: Option<RowFrequency>,
    pub salience: Option<ColumnSalience>,
}

impl ColumnDecl {
    pub fn new(name: impl Into<String>, format: DataFormat) -> Self {
        Self {
            name: name.into(),
            origin: DeclOrigin::Local,
            format: Some(format),
            desc: None,
            row_frequency: None,
            salience: None,
        }
    }

    /// Explicitly inherit the column from a base definition.
    pub fn inherited(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: DeclOrigin::Inherited,
            format: None,
            desc: None,
            row_frequency: None,
            salience: None,
        }
    }

    /// Alias a column of a declared subanalysis into this definition's
    /// namespace.
    pub fn mapped_from(
        name: impl Into<String>,
        subanalysis: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            origin: DeclOrigin::MappedFrom {
                subanalysis: subanalysis.into(),
                source: source.into(),
            },
            format: None,
            desc: None,
            row_frequency: None,
            salience: None,
        }
    }

    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_row_frequency(mut self, freq: RowFrequency) -> Self {
        self.row_frequency = Some(freq);
        self
    }

    pub fn with_salience(mut self, salience: ColumnSalience) -> Self {
        self.salience = Some(salience);
        self
    }
}

// ---------------------------------------------------------------------------
// Parameter declaration
// ---------------------------------------------------------------------------

/// A raw parameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    pub origin: DeclOrigin,
    /// Required for `Local`; inferred otherwise.
    pub kind: Option<ValueKind>,
    pub desc: Option<String>,
    pub salience: Option<ParameterSalience>,
    /// Required unless salience is `Required`.
    pub default: Option<Value>,
    /// Mutually exclusive with bounds.
    pub choices: Option<Vec<Value>>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
}

impl ParameterDecl {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            origin: DeclOrigin::Local,
            kind: Some(kind),
            desc: None,
            salience: None,
            default: None,
            choices: None,
            lower_bound: None,
            upper_bound: None,
        }
    }

    pub fn inherited(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: DeclOrigin::Inherited,
            kind: None,
            desc: None,
            salience: None,
            default: None,
            choices: None,
            lower_bound: None,
            upper_bound: None,
        }
    }

    pub fn mapped_from(
        name: impl Into<String>,
        subanalysis: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            origin: DeclOrigin::MappedFrom {
                subanalysis: subanalysis.into(),
                source: source.into(),
            },
            kind: None,
            desc: None,
            salience: None,
            default: None,
            choices: None,
            lower_bound: None,
            upper_bound: None,
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// On an inherited or mapped declaration this re-states the value kind;
    /// the assembler rejects a kind that differs from the source's.
    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_salience(mut self, salience: ParameterSalience) -> Self {
        self.salience = Some(salience);
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_choices(mut self, choices: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_bounds(mut self, lower: impl Into<Option<f64>>, upper: impl Into<Option<f64>>) -> Self {
        self.lower_bound = lower.into();
        self.upper_bound = upper.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Builder, switch, and check declarations
// ---------------------------------------------------------------------------

/// A raw pipeline-builder declaration.
///
/// `args` lists, in order, the names the builder's computation reads; the
/// assembler partitions them into column inputs and parameters by matching
/// against the definition's declared names. A name matching neither is an
/// assembly error (it signals a missing explicit inheritance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderDecl {
    pub name: String,
    pub desc: Option<String>,
    pub args: Vec<String>,
    pub outputs: Vec<String>,
    pub condition: Option<Operation>,
    pub switch: Option<String>,
}

impl BuilderDecl {
    pub fn new(
        name: impl Into<String>,
        outputs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            desc: None,
            args: Vec::new(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            condition: None,
            switch: None,
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, condition: Operation) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_switch(mut self, switch: impl Into<String>) -> Self {
        self.switch = Some(switch.into());
        self
    }
}

/// A raw switch declaration. Like builders, `args` is partitioned into
/// column inputs and parameters at assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchDecl {
    pub name: String,
    pub desc: Option<String>,
    pub args: Vec<String>,
}

impl SwitchDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: None,
            args: Vec::new(),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// A raw quality-control check declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDecl {
    pub name: String,
    pub column: String,
    pub desc: Option<String>,
    pub args: Vec<String>,
    pub salience: CheckSalience,
}

impl CheckDecl {
    pub fn new(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            desc: None,
            args: Vec::new(),
            salience: CheckSalience::default(),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_salience(mut self, salience: CheckSalience) -> Self {
        self.salience = salience;
        self
    }
}

// ---------------------------------------------------------------------------
// Subanalysis declaration
// ---------------------------------------------------------------------------

/// A raw subanalysis declaration: a nested assembled definition plus the
/// explicit (name-in-subanalysis, name-in-parent) mappings. Implicit
/// mappings from `MappedFrom` columns/parameters are added at assembly.
///
/// Like columns and parameters, a subanalysis inherited from the base chain
/// must be declared through [`SubanalysisDecl::inherited`]; on such a
/// declaration the mappings extend the inherited ones, and `spec` (when
/// given) replaces the nested specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubanalysisDecl {
    pub name: String,
    pub origin: DeclOrigin,
    pub desc: Option<String>,
    /// Required for `Local`; optional re-specification when inherited.
    pub spec: Option<Arc<AnalysisSpec>>,
    pub mappings: Vec<(String, String)>,
}

impl SubanalysisDecl {
    pub fn new(name: impl Into<String>, spec: Arc<AnalysisSpec>) -> Self {
        Self {
            name: name.into(),
            origin: DeclOrigin::Local,
            desc: None,
            spec: Some(spec),
            mappings: Vec::new(),
        }
    }

    /// Explicitly inherit the subanalysis from a base definition.
    pub fn inherited(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: DeclOrigin::Inherited,
            desc: None,
            spec: None,
            mappings: Vec::new(),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Replace the nested specification of an inherited subanalysis. Every
    /// inherited mapping must still resolve against the replacement.
    pub fn with_spec(mut self, spec: Arc<AnalysisSpec>) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn with_mapping(
        mut self,
        in_subanalysis: impl Into<String>,
        in_parent: impl Into<String>,
    ) -> Self {
        self.mappings
            .push((in_subanalysis.into(), in_parent.into()));
        self
    }
}

// ---------------------------------------------------------------------------
// AnalysisDefinition
// ---------------------------------------------------------------------------

/// One analysis definition's raw declarations, ready for assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDefinition {
    pub name: String,
    pub space: DataSpace,
    pub columns: Vec<ColumnDecl>,
    pub parameters: Vec<ParameterDecl>,
    pub builders: Vec<BuilderDecl>,
    pub switches: Vec<SwitchDecl>,
    pub checks: Vec<CheckDecl>,
    pub subanalyses: Vec<SubanalysisDecl>,
}

impl AnalysisDefinition {
    pub fn new(name: impl Into<String>, space: DataSpace) -> Self {
        Self {
            name: name.into(),
            space,
            columns: Vec::new(),
            parameters: Vec::new(),
            builders: Vec::new(),
            switches: Vec::new(),
            checks: Vec::new(),
            subanalyses: Vec::new(),
        }
    }

    pub fn declare_column(mut self, decl: ColumnDecl) -> Self {
        self.columns.push(decl);
        self
    }

    pub fn declare_parameter(mut self, decl: ParameterDecl) -> Self {
        self.parameters.push(decl);
        self
    }

    pub fn declare_builder(mut self, decl: BuilderDecl) -> Self {
        self.builders.push(decl);
        self
    }

    pub fn declare_switch(mut self, decl: SwitchDecl) -> Self {
        self.switches.push(decl);
        self
    }

    pub fn declare_check(mut self, decl: CheckDecl) -> Self {
        self.checks.push(decl);
        self
    }

    pub fn declare_subanalysis(mut self, decl: SubanalysisDecl) -> Self {
        self.subanalyses.push(decl);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_space::DataSpace;

    #[test]
    fn local_column_defaults() {
        let decl = ColumnDecl::new("t1w", DataFormat::new("nifti"));
        assert_eq!(decl.origin, DeclOrigin::Local);
        assert!(decl.format.is_some());
        assert!(decl.salience.is_none());
    }

    #[test]
    fn mapped_from_carries_source() {
        let decl = ColumnDecl::mapped_from("outer", "sub", "inner");
        assert_eq!(
            decl.origin,
            DeclOrigin::MappedFrom {
                subanalysis: "sub".to_string(),
                source: "inner".to_string(),
            }
        );
    }

    #[test]
    fn definition_accumulates_declarations() {
        let space = DataSpace::new("samples", ["sample"]).unwrap();
        let definition = AnalysisDefinition::new("demo", space)
            .declare_column(ColumnDecl::new("raw", DataFormat::new("text")))
            .declare_parameter(
                ParameterDecl::new("iterations", ValueKind::Int).with_default(10i64),
            )
            .declare_builder(BuilderDecl::new("derive", ["raw"]));
        assert_eq!(definition.columns.len(), 1);
        assert_eq!(definition.parameters.len(), 1);
        assert_eq!(definition.builders.len(), 1);
    }

    #[test]
    fn parameter_builder_methods_compose() {
        let decl = ParameterDecl::new("threshold", ValueKind::Float)
            .with_desc("clamp level")
            .with_bounds(0.0, 1.0)
            .with_default(0.5);
        assert_eq!(decl.lower_bound, Some(0.0));
        assert_eq!(decl.upper_bound, Some(1.0));
        assert_eq!(decl.default, Some(Value::Float(0.5)));
    }
}
