//! The specification assembler.
//!
//! [`assemble`] turns one [`AnalysisDefinition`] plus its explicit base
//! chain into a frozen [`AnalysisSpec`]. All validation happens here, in a
//! fixed order: resolve declarations (local, inherited, mapped), partition
//! builder arguments into column inputs and parameters, merge the base
//! chain, then run the whole-registry checks (uniqueness, output coverage,
//! column coverage, non-ambiguity). Any failure aborts the assembly; no
//! partial registry is ever produced.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis_spec::{
    AnalysisSpec, Check, ColumnSpec, Parameter, ParameterViolation, PipelineBuilder,
    SubanalysisSpec, Switch,
};
use crate::declaration::{
    AnalysisDefinition, BuilderDecl, CheckDecl, ColumnDecl, DeclOrigin, ParameterDecl,
    SubanalysisDecl, SwitchDecl,
};
use crate::expression::{ExpressionError, ValueKind};
use crate::merge::{self, EntitySets, LocalNames};
use crate::salience::ColumnSalience;

/// Attribute names the engine reserves for itself.
const RESERVED_NAMES: &[&str] = &["dataset"];

// ---------------------------------------------------------------------------
// AssemblyError
// ---------------------------------------------------------------------------

/// Why an assembly was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssemblyError {
    /// Two entities of the same namespace share a name.
    DuplicateName { kind: String, name: String },
    /// The name is reserved by the engine.
    ReservedName { name: String },
    /// A base in the chain was assembled over a different hierarchy space.
    SpaceMismatch {
        base: String,
        base_space: String,
        derived_space: String,
    },
    /// An `Inherited` declaration matches nothing in the base chain.
    UnresolvedInheritance { kind: String, name: String },
    /// A `MappedFrom` declaration or explicit mapping matches nothing.
    UnresolvedMapping { subanalysis: String, name: String },
    /// A mapping pairs attributes of different kinds, or of different
    /// parameter value kinds.
    MappingMismatch {
        subanalysis: String,
        inner: String,
        parent: String,
    },
    /// The same subanalysis attribute is mapped to two parent names.
    ConflictingMapping { subanalysis: String, name: String },
    /// An inherited or mapped column re-annotated to a format that is not a
    /// sub-format of the source format.
    IncompatibleReannotation {
        column: String,
        declared: String,
        source: String,
    },
    /// A local column declaration without a format.
    MissingFormat { column: String },
    /// A local parameter declaration without a value kind.
    MissingKind { parameter: String },
    /// A local subanalysis declaration without a nested specification.
    MissingSpec { subanalysis: String },
    /// An inherited or mapped parameter re-declared with a different value
    /// kind.
    IncompatibleKind {
        parameter: String,
        declared: ValueKind,
        source: ValueKind,
    },
    /// A parameter declares both a choice set and numeric bounds.
    ChoicesWithBounds { parameter: String },
    /// A parameter below `Required` salience has no default value.
    MissingDefault { parameter: String },
    /// A parameter default violates the parameter's own constraints.
    InvalidDefault {
        parameter: String,
        violation: ParameterViolation,
    },
    /// A builder, switch, or check argument names neither a declared column
    /// nor a declared parameter. Usually a missing explicit inheritance.
    UnrecognizedArgument { owner: String, argument: String },
    /// A builder condition failed construction-time validation.
    InvalidCondition {
        builder: String,
        source: ExpressionError,
    },
    /// A builder output names no declared column.
    UnknownOutput { builder: String, output: String },
    /// A builder references an undeclared switch.
    UnknownSwitch { builder: String, switch: String },
    /// A check targets an undeclared column.
    UnknownCheckColumn { check: String, column: String },
    /// A column below the externally-supplied threshold has no producing
    /// builder and no subanalysis mapping.
    OrphanedColumn {
        column: String,
        salience: ColumnSalience,
    },
    /// An externally-supplied column is not read by any builder, switch, or
    /// check.
    UnusedColumn { column: String },
    /// Two builders produce the same output under an identical
    /// (condition, switch) pair.
    AmbiguousBuilders { output: String, builders: Vec<String> },
    /// A base attribute re-declared locally without the explicit
    /// `Inherited` origin.
    SilentOverride { base: String, names: Vec<String> },
    /// A builder override drops outputs its base version declared.
    OutputRemovingOverride {
        builder: String,
        base: String,
        missing: Vec<String>,
    },
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName { kind, name } => {
                write!(f, "duplicate {kind} name '{name}'")
            }
            Self::ReservedName { name } => {
                write!(f, "'{name}' is a reserved attribute name")
            }
            Self::SpaceMismatch {
                base,
                base_space,
                derived_space,
            } => write!(
                f,
                "base '{base}' was assembled over space {base_space}, \
                 the derived definition uses {derived_space}"
            ),
            Self::UnresolvedInheritance { kind, name } => write!(
                f,
                "inherited {kind} '{name}' matches nothing in the base chain"
            ),
            Self::UnresolvedMapping { subanalysis, name } => write!(
                f,
                "mapping for '{name}' in subanalysis '{subanalysis}' matches no \
                 declared attribute"
            ),
            Self::MappingMismatch {
                subanalysis,
                inner,
                parent,
            } => write!(
                f,
                "mapping '{inner}' -> '{parent}' in subanalysis '{subanalysis}' \
                 pairs incompatible attributes"
            ),
            Self::ConflictingMapping { subanalysis, name } => write!(
                f,
                "'{name}' in subanalysis '{subanalysis}' is mapped to more than \
                 one parent attribute"
            ),
            Self::IncompatibleReannotation {
                column,
                declared,
                source,
            } => write!(
                f,
                "column '{column}' re-annotated to '{declared}', which is not a \
                 sub-format of '{source}'"
            ),
            Self::MissingFormat { column } => {
                write!(f, "column '{column}' declares no data format")
            }
            Self::MissingKind { parameter } => {
                write!(f, "parameter '{parameter}' declares no value kind")
            }
            Self::MissingSpec { subanalysis } => write!(
                f,
                "subanalysis '{subanalysis}' declares no nested specification"
            ),
            Self::IncompatibleKind {
                parameter,
                declared,
                source,
            } => write!(
                f,
                "parameter '{parameter}' re-declared as {declared}, its source \
                 declares {source}"
            ),
            Self::ChoicesWithBounds { parameter } => write!(
                f,
                "parameter '{parameter}' declares both choices and bounds"
            ),
            Self::MissingDefault { parameter } => write!(
                f,
                "parameter '{parameter}' needs a default value (only parameters \
                 with 'required' salience may omit one)"
            ),
            Self::InvalidDefault {
                parameter,
                violation,
            } => write!(
                f,
                "default value for parameter '{parameter}' is invalid: {violation}"
            ),
            Self::UnrecognizedArgument { owner, argument } => write!(
                f,
                "'{owner}' reads '{argument}', which is neither a declared column \
                 nor a declared parameter"
            ),
            Self::InvalidCondition { builder, source } => {
                write!(f, "condition of builder '{builder}' is invalid: {source}")
            }
            Self::UnknownOutput { builder, output } => write!(
                f,
                "builder '{builder}' produces '{output}', which is not a declared \
                 column"
            ),
            Self::UnknownSwitch { builder, switch } => write!(
                f,
                "builder '{builder}' references undeclared switch '{switch}'"
            ),
            Self::UnknownCheckColumn { check, column } => write!(
                f,
                "check '{check}' targets undeclared column '{column}'"
            ),
            Self::OrphanedColumn { column, salience } => write!(
                f,
                "column '{column}' (salience {salience}) has no producing builder \
                 and cannot be supplied externally"
            ),
            Self::UnusedColumn { column } => write!(
                f,
                "column '{column}' is not read by any builder, switch, or check"
            ),
            Self::AmbiguousBuilders { output, builders } => write!(
                f,
                "builders [{}] produce '{output}' under the same condition and \
                 switch",
                builders.join(", ")
            ),
            Self::SilentOverride { base, names } => write!(
                f,
                "[{}] shadow attributes of base '{base}' without an explicit \
                 inherited declaration",
                names.join(", ")
            ),
            Self::OutputRemovingOverride {
                builder,
                base,
                missing,
            } => write!(
                f,
                "override of builder '{builder}' drops outputs [{}] declared in \
                 base '{base}'",
                missing.join(", ")
            ),
        }
    }
}

impl std::error::Error for AssemblyError {}

// ---------------------------------------------------------------------------
// assemble
// ---------------------------------------------------------------------------

/// Assemble a definition and its explicit base chain (most derived first)
/// into a frozen, shareable spec.
pub fn assemble(
    definition: &AnalysisDefinition,
    bases: &[Arc<AnalysisSpec>],
) -> Result<Arc<AnalysisSpec>, AssemblyError> {
    check_reserved_names(definition)?;

    // Subanalyses resolve first: mapped declarations look attributes up in
    // their nested specs.
    let mut subanalyses = resolve_subanalyses(definition, bases)?;
    let mut implicit_mappings: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();

    let columns = resolve_columns(definition, bases, &subanalyses, &mut implicit_mappings)?;
    let parameters = resolve_parameters(definition, bases, &subanalyses, &mut implicit_mappings)?;

    let column_names: BTreeSet<String> = columns.iter().map(|c| c.name.clone()).collect();
    let parameter_names: BTreeSet<String> = parameters.iter().map(|p| p.name.clone()).collect();

    finish_mappings(
        &mut subanalyses,
        implicit_mappings,
        &column_names,
        &parameter_names,
        bases,
    )?;

    let builders = resolve_builders(definition, &column_names, &parameter_names)?;
    let switches = resolve_switches(definition, &column_names, &parameter_names)?;
    let checks = resolve_checks(definition, &column_names, &parameter_names)?;

    let locals = LocalNames {
        columns: local_names(&definition.columns, |c| (&c.name, &c.origin)),
        parameters: local_names(&definition.parameters, |p| (&p.name, &p.origin)),
        subanalyses: local_names(&definition.subanalyses, |s| (&s.name, &s.origin)),
    };

    let mut sets = EntitySets {
        columns,
        parameters,
        builders,
        switches,
        checks,
        subanalyses,
    };
    merge::merge_with_bases(&mut sets, &locals, &definition.space, bases)?;

    check_uniqueness(&sets)?;
    check_references(&sets)?;
    check_column_coverage(&sets)?;
    check_non_ambiguity(&sets)?;

    Ok(Arc::new(AnalysisSpec::freeze(
        definition.name.clone(),
        definition.space.clone(),
        sets.columns,
        sets.parameters,
        sets.builders,
        sets.switches,
        sets.checks,
        sets.subanalyses,
    )))
}

fn check_reserved_names(definition: &AnalysisDefinition) -> Result<(), AssemblyError> {
    let declared = definition
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .chain(definition.parameters.iter().map(|p| p.name.as_str()))
        .chain(definition.subanalyses.iter().map(|s| s.name.as_str()))
        .chain(definition.builders.iter().map(|b| b.name.as_str()))
        .chain(definition.switches.iter().map(|s| s.name.as_str()))
        .chain(definition.checks.iter().map(|c| c.name.as_str()));
    for name in declared {
        if RESERVED_NAMES.contains(&name) {
            return Err(AssemblyError::ReservedName {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn local_names<'a, T, F>(decls: &'a [T], project: F) -> BTreeSet<String>
where
    F: Fn(&'a T) -> (&'a String, &'a DeclOrigin),
{
    decls
        .iter()
        .map(project)
        .filter(|(_, origin)| **origin == DeclOrigin::Local)
        .map(|(name, _)| name.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

fn resolve_columns(
    definition: &AnalysisDefinition,
    bases: &[Arc<AnalysisSpec>],
    subanalyses: &[SubanalysisSpec],
    implicit_mappings: &mut BTreeMap<String, Vec<(String, String)>>,
) -> Result<Vec<ColumnSpec>, AssemblyError> {
    definition
        .columns
        .iter()
        .map(|decl| match &decl.origin {
            DeclOrigin::Local => resolve_local_column(definition, decl),
            DeclOrigin::Inherited => resolve_inherited_column(definition, decl, bases),
            DeclOrigin::MappedFrom {
                subanalysis,
                source,
            } => {
                let spec = resolve_mapped_column(definition, decl, subanalysis, source, subanalyses)?;
                implicit_mappings
                    .entry(subanalysis.clone())
                    .or_default()
                    .push((source.clone(), decl.name.clone()));
                Ok(spec)
            }
        })
        .collect()
}

fn resolve_local_column(
    definition: &AnalysisDefinition,
    decl: &ColumnDecl,
) -> Result<ColumnSpec, AssemblyError> {
    let format = decl
        .format
        .clone()
        .ok_or_else(|| AssemblyError::MissingFormat {
            column: decl.name.clone(),
        })?;
    Ok(ColumnSpec {
        name: decl.name.clone(),
        format,
        desc: decl.desc.clone().unwrap_or_default(),
        row_frequency: decl.row_frequency.unwrap_or_else(|| definition.space.leaf()),
        salience: decl.salience.unwrap_or_default(),
        defined_in: vec![definition.name.clone()],
        modified: Vec::new(),
        mapped_from: None,
    })
}

fn resolve_inherited_column(
    definition: &AnalysisDefinition,
    decl: &ColumnDecl,
    bases: &[Arc<AnalysisSpec>],
) -> Result<ColumnSpec, AssemblyError> {
    let base = bases
        .iter()
        .find_map(|b| b.column(&decl.name))
        .ok_or_else(|| AssemblyError::UnresolvedInheritance {
            kind: "column".to_string(),
            name: decl.name.clone(),
        })?;
    let mut spec = base.clone();
    if let Some(format) = &decl.format {
        if !format.is_subformat_of(&spec.format) {
            return Err(AssemblyError::IncompatibleReannotation {
                column: decl.name.clone(),
                declared: format.to_string(),
                source: spec.format.to_string(),
            });
        }
        spec.modified
            .push(("format".to_string(), format.to_string()));
        spec.format = format.clone();
    }
    if let Some(desc) = &decl.desc {
        spec.modified.push(("desc".to_string(), desc.clone()));
        spec.desc = desc.clone();
    }
    if let Some(freq) = decl.row_frequency {
        spec.modified
            .push(("row_frequency".to_string(), definition.space.describe(freq)));
        spec.row_frequency = freq;
    }
    if let Some(salience) = decl.salience {
        spec.modified
            .push(("salience".to_string(), salience.to_string()));
        spec.salience = salience;
    }
    spec.defined_in.insert(0, definition.name.clone());
    Ok(spec)
}

fn resolve_mapped_column(
    definition: &AnalysisDefinition,
    decl: &ColumnDecl,
    subanalysis: &str,
    source: &str,
    subanalyses: &[SubanalysisSpec],
) -> Result<ColumnSpec, AssemblyError> {
    let sub = subanalyses
        .iter()
        .find(|s| s.name == subanalysis)
        .ok_or_else(|| AssemblyError::UnresolvedMapping {
            subanalysis: subanalysis.to_string(),
            name: decl.name.clone(),
        })?;
    let inner = sub
        .spec
        .column(source)
        .ok_or_else(|| AssemblyError::UnresolvedMapping {
            subanalysis: subanalysis.to_string(),
            name: source.to_string(),
        })?;
    let format = match &decl.format {
        Some(format) => {
            if !format.is_subformat_of(&inner.format) {
                return Err(AssemblyError::IncompatibleReannotation {
                    column: decl.name.clone(),
                    declared: format.to_string(),
                    source: inner.format.to_string(),
                });
            }
            format.clone()
        }
        None => inner.format.clone(),
    };
    Ok(ColumnSpec {
        name: decl.name.clone(),
        format,
        desc: decl.desc.clone().unwrap_or_else(|| inner.desc.clone()),
        row_frequency: decl.row_frequency.unwrap_or(inner.row_frequency),
        salience: decl.salience.unwrap_or(inner.salience),
        defined_in: vec![definition.name.clone()],
        modified: Vec::new(),
        mapped_from: Some((subanalysis.to_string(), source.to_string())),
    })
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

fn resolve_parameters(
    definition: &AnalysisDefinition,
    bases: &[Arc<AnalysisSpec>],
    subanalyses: &[SubanalysisSpec],
    implicit_mappings: &mut BTreeMap<String, Vec<(String, String)>>,
) -> Result<Vec<Parameter>, AssemblyError> {
    definition
        .parameters
        .iter()
        .map(|decl| {
            let parameter = match &decl.origin {
                DeclOrigin::Local => resolve_local_parameter(definition, decl)?,
                DeclOrigin::Inherited => resolve_inherited_parameter(definition, decl, bases)?,
                DeclOrigin::MappedFrom {
                    subanalysis,
                    source,
                } => {
                    let parameter =
                        resolve_mapped_parameter(definition, decl, subanalysis, source, subanalyses)?;
                    implicit_mappings
                        .entry(subanalysis.clone())
                        .or_default()
                        .push((source.clone(), decl.name.clone()));
                    parameter
                }
            };
            check_parameter_constraints(&parameter)?;
            Ok(parameter)
        })
        .collect()
}

fn resolve_local_parameter(
    definition: &AnalysisDefinition,
    decl: &ParameterDecl,
) -> Result<Parameter, AssemblyError> {
    let kind = decl.kind.ok_or_else(|| AssemblyError::MissingKind {
        parameter: decl.name.clone(),
    })?;
    Ok(Parameter {
        name: decl.name.clone(),
        kind,
        desc: decl.desc.clone().unwrap_or_default(),
        salience: decl.salience.unwrap_or_default(),
        choices: decl.choices.clone(),
        lower_bound: decl.lower_bound,
        upper_bound: decl.upper_bound,
        default: decl.default.clone(),
        defined_in: vec![definition.name.clone()],
        modified: Vec::new(),
        mapped_from: None,
    })
}

fn resolve_inherited_parameter(
    definition: &AnalysisDefinition,
    decl: &ParameterDecl,
    bases: &[Arc<AnalysisSpec>],
) -> Result<Parameter, AssemblyError> {
    let base = bases
        .iter()
        .find_map(|b| b.parameter(&decl.name))
        .ok_or_else(|| AssemblyError::UnresolvedInheritance {
            kind: "parameter".to_string(),
            name: decl.name.clone(),
        })?;
    let mut parameter = base.clone();
    if let Some(kind) = decl.kind {
        if kind != parameter.kind {
            return Err(AssemblyError::IncompatibleKind {
                parameter: decl.name.clone(),
                declared: kind,
                source: parameter.kind,
            });
        }
    }
    if let Some(desc) = &decl.desc {
        parameter.modified.push(("desc".to_string(), desc.clone()));
        parameter.desc = desc.clone();
    }
    if let Some(salience) = decl.salience {
        parameter
            .modified
            .push(("salience".to_string(), salience.to_string()));
        parameter.salience = salience;
    }
    if let Some(default) = &decl.default {
        parameter
            .modified
            .push(("default".to_string(), default.to_string()));
        parameter.default = Some(default.clone());
    }
    if let Some(choices) = &decl.choices {
        let rendered: Vec<String> = choices.iter().map(ToString::to_string).collect();
        parameter
            .modified
            .push(("choices".to_string(), rendered.join(", ")));
        parameter.choices = Some(choices.clone());
    }
    if let Some(bound) = decl.lower_bound {
        parameter
            .modified
            .push(("lower_bound".to_string(), bound.to_string()));
        parameter.lower_bound = Some(bound);
    }
    if let Some(bound) = decl.upper_bound {
        parameter
            .modified
            .push(("upper_bound".to_string(), bound.to_string()));
        parameter.upper_bound = Some(bound);
    }
    parameter.defined_in.insert(0, definition.name.clone());
    Ok(parameter)
}

fn resolve_mapped_parameter(
    definition: &AnalysisDefinition,
    decl: &ParameterDecl,
    subanalysis: &str,
    source: &str,
    subanalyses: &[SubanalysisSpec],
) -> Result<Parameter, AssemblyError> {
    let sub = subanalyses
        .iter()
        .find(|s| s.name == subanalysis)
        .ok_or_else(|| AssemblyError::UnresolvedMapping {
            subanalysis: subanalysis.to_string(),
            name: decl.name.clone(),
        })?;
    let inner = sub
        .spec
        .parameter(source)
        .ok_or_else(|| AssemblyError::UnresolvedMapping {
            subanalysis: subanalysis.to_string(),
            name: source.to_string(),
        })?;
    if let Some(kind) = decl.kind {
        if kind != inner.kind {
            return Err(AssemblyError::IncompatibleKind {
                parameter: decl.name.clone(),
                declared: kind,
                source: inner.kind,
            });
        }
    }
    let mut parameter = inner.clone();
    parameter.name = decl.name.clone();
    parameter.defined_in = vec![definition.name.clone()];
    parameter.modified = Vec::new();
    parameter.mapped_from = Some((subanalysis.to_string(), source.to_string()));
    if let Some(desc) = &decl.desc {
        parameter.desc = desc.clone();
    }
    if let Some(salience) = decl.salience {
        parameter.salience = salience;
    }
    if let Some(default) = &decl.default {
        parameter.default = Some(default.clone());
    }
    // Declared constraints replace the source's; the combined result still
    // goes through the whole-parameter constraint check, so declaring
    // choices over inherited bounds (or vice versa) is rejected there.
    if let Some(choices) = &decl.choices {
        parameter.choices = Some(choices.clone());
    }
    if decl.lower_bound.is_some() {
        parameter.lower_bound = decl.lower_bound;
    }
    if decl.upper_bound.is_some() {
        parameter.upper_bound = decl.upper_bound;
    }
    Ok(parameter)
}

/// Declaration-level constraint validation, applied to every resolved
/// parameter regardless of origin.
fn check_parameter_constraints(parameter: &Parameter) -> Result<(), AssemblyError> {
    use crate::salience::ParameterSalience;

    if parameter.choices.is_some()
        && (parameter.lower_bound.is_some() || parameter.upper_bound.is_some())
    {
        return Err(AssemblyError::ChoicesWithBounds {
            parameter: parameter.name.clone(),
        });
    }
    match &parameter.default {
        Some(default) => parameter.check_value(default).map_err(|violation| {
            AssemblyError::InvalidDefault {
                parameter: parameter.name.clone(),
                violation,
            }
        }),
        None if parameter.salience == ParameterSalience::Required => Ok(()),
        None => Err(AssemblyError::MissingDefault {
            parameter: parameter.name.clone(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Subanalyses and mappings
// ---------------------------------------------------------------------------

fn resolve_subanalyses(
    definition: &AnalysisDefinition,
    bases: &[Arc<AnalysisSpec>],
) -> Result<Vec<SubanalysisSpec>, AssemblyError> {
    definition
        .subanalyses
        .iter()
        .map(|decl| resolve_subanalysis(definition, decl, bases))
        .collect()
}

fn resolve_subanalysis(
    definition: &AnalysisDefinition,
    decl: &SubanalysisDecl,
    bases: &[Arc<AnalysisSpec>],
) -> Result<SubanalysisSpec, AssemblyError> {
    let sub = match &decl.origin {
        DeclOrigin::Local => {
            let spec = decl.spec.clone().ok_or_else(|| AssemblyError::MissingSpec {
                subanalysis: decl.name.clone(),
            })?;
            SubanalysisSpec {
                name: decl.name.clone(),
                desc: decl.desc.clone().unwrap_or_default(),
                spec,
                mappings: decl.mappings.clone(),
                defined_in: vec![definition.name.clone()],
                modified: Vec::new(),
            }
        }
        DeclOrigin::Inherited => {
            let base = bases
                .iter()
                .find_map(|b| b.subanalysis(&decl.name))
                .ok_or_else(|| AssemblyError::UnresolvedInheritance {
                    kind: "subanalysis".to_string(),
                    name: decl.name.clone(),
                })?;
            let mut sub = base.clone();
            if let Some(spec) = &decl.spec {
                sub.modified
                    .push(("spec".to_string(), spec.digest().to_string()));
                sub.spec = Arc::clone(spec);
            }
            if let Some(desc) = &decl.desc {
                sub.modified.push(("desc".to_string(), desc.clone()));
                sub.desc = desc.clone();
            }
            if !decl.mappings.is_empty() {
                let rendered: Vec<String> = decl
                    .mappings
                    .iter()
                    .map(|(inner, parent)| format!("{inner} -> {parent}"))
                    .collect();
                sub.modified
                    .push(("mappings".to_string(), rendered.join(", ")));
                sub.mappings.extend(decl.mappings.iter().cloned());
            }
            sub.defined_in.insert(0, definition.name.clone());
            sub
        }
        // A subanalysis cannot be aliased out of another subanalysis.
        DeclOrigin::MappedFrom { subanalysis, .. } => {
            return Err(AssemblyError::UnresolvedMapping {
                subanalysis: subanalysis.clone(),
                name: decl.name.clone(),
            })
        }
    };
    // Inherited mappings must also survive a spec re-specification, so the
    // combined table is validated against the effective nested spec.
    for (inner, _) in &sub.mappings {
        if sub.spec.column(inner).is_none() && sub.spec.parameter(inner).is_none() {
            return Err(AssemblyError::UnresolvedMapping {
                subanalysis: sub.name.clone(),
                name: inner.clone(),
            });
        }
    }
    Ok(sub)
}

/// Fold implicit mappings (from `MappedFrom` declarations) into the
/// explicit tables, validate the parent side of every pair, then sort and
/// deduplicate.
fn finish_mappings(
    subanalyses: &mut [SubanalysisSpec],
    implicit: BTreeMap<String, Vec<(String, String)>>,
    column_names: &BTreeSet<String>,
    parameter_names: &BTreeSet<String>,
    bases: &[Arc<AnalysisSpec>],
) -> Result<(), AssemblyError> {
    for sub in subanalyses.iter_mut() {
        if let Some(extra) = implicit.get(&sub.name) {
            sub.mappings.extend(extra.iter().cloned());
        }
        sub.mappings.sort();
        sub.mappings.dedup();
        for window in sub.mappings.windows(2) {
            if window[0].0 == window[1].0 {
                return Err(AssemblyError::ConflictingMapping {
                    subanalysis: sub.name.clone(),
                    name: window[0].0.clone(),
                });
            }
        }
        for (inner, parent) in &sub.mappings {
            let inner_is_column = sub.spec.column(inner).is_some();
            // Mappings carried by an inherited subanalysis may point at
            // parent attributes that arrive through inherit-by-name rather
            // than an explicit re-declaration, so the base chain is
            // consulted after the locally resolved names.
            let (parent_is_column, parent_is_parameter) = if column_names.contains(parent) {
                (true, false)
            } else if parameter_names.contains(parent) {
                (false, true)
            } else {
                (
                    bases.iter().any(|b| b.column(parent).is_some()),
                    bases.iter().any(|b| b.parameter(parent).is_some()),
                )
            };
            if !parent_is_column && !parent_is_parameter {
                return Err(AssemblyError::UnresolvedMapping {
                    subanalysis: sub.name.clone(),
                    name: parent.clone(),
                });
            }
            if inner_is_column != parent_is_column {
                return Err(AssemblyError::MappingMismatch {
                    subanalysis: sub.name.clone(),
                    inner: inner.clone(),
                    parent: parent.clone(),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Builders, switches, checks
// ---------------------------------------------------------------------------

/// Split a declared `args` list into column inputs and parameters. A name
/// matching neither set is rejected.
fn partition_args(
    owner: &str,
    args: &[String],
    column_names: &BTreeSet<String>,
    parameter_names: &BTreeSet<String>,
) -> Result<(Vec<String>, Vec<String>), AssemblyError> {
    let mut inputs = Vec::new();
    let mut parameters = Vec::new();
    for arg in args {
        if column_names.contains(arg) {
            inputs.push(arg.clone());
        } else if parameter_names.contains(arg) {
            parameters.push(arg.clone());
        } else {
            return Err(AssemblyError::UnrecognizedArgument {
                owner: owner.to_string(),
                argument: arg.clone(),
            });
        }
    }
    Ok((inputs, parameters))
}

fn resolve_builders(
    definition: &AnalysisDefinition,
    column_names: &BTreeSet<String>,
    parameter_names: &BTreeSet<String>,
) -> Result<Vec<PipelineBuilder>, AssemblyError> {
    definition
        .builders
        .iter()
        .map(|decl| resolve_builder(definition, decl, column_names, parameter_names))
        .collect()
}

fn resolve_builder(
    definition: &AnalysisDefinition,
    decl: &BuilderDecl,
    column_names: &BTreeSet<String>,
    parameter_names: &BTreeSet<String>,
) -> Result<PipelineBuilder, AssemblyError> {
    let (inputs, parameters) =
        partition_args(&decl.name, &decl.args, column_names, parameter_names)?;
    if let Some(condition) = &decl.condition {
        condition
            .validate(column_names, parameter_names)
            .map_err(|source| AssemblyError::InvalidCondition {
                builder: decl.name.clone(),
                source,
            })?;
    }
    Ok(PipelineBuilder {
        name: decl.name.clone(),
        desc: decl.desc.clone().unwrap_or_default(),
        inputs,
        outputs: decl.outputs.clone(),
        parameters,
        condition: decl.condition.clone(),
        switch: decl.switch.clone(),
        defined_in: vec![definition.name.clone()],
    })
}

fn resolve_switches(
    definition: &AnalysisDefinition,
    column_names: &BTreeSet<String>,
    parameter_names: &BTreeSet<String>,
) -> Result<Vec<Switch>, AssemblyError> {
    definition
        .switches
        .iter()
        .map(|decl: &SwitchDecl| {
            let (inputs, parameters) =
                partition_args(&decl.name, &decl.args, column_names, parameter_names)?;
            Ok(Switch {
                name: decl.name.clone(),
                desc: decl.desc.clone().unwrap_or_default(),
                inputs,
                parameters,
                defined_in: vec![definition.name.clone()],
            })
        })
        .collect()
}

fn resolve_checks(
    definition: &AnalysisDefinition,
    column_names: &BTreeSet<String>,
    parameter_names: &BTreeSet<String>,
) -> Result<Vec<Check>, AssemblyError> {
    definition
        .checks
        .iter()
        .map(|decl: &CheckDecl| {
            let (inputs, parameters) =
                partition_args(&decl.name, &decl.args, column_names, parameter_names)?;
            Ok(Check {
                name: decl.name.clone(),
                column: decl.column.clone(),
                desc: decl.desc.clone().unwrap_or_default(),
                inputs,
                parameters,
                salience: decl.salience,
                defined_in: vec![definition.name.clone()],
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Whole-registry checks
// ---------------------------------------------------------------------------

fn check_uniqueness(sets: &EntitySets) -> Result<(), AssemblyError> {
    // Columns, parameters, and subanalyses share the instance attribute
    // namespace; builders, switches, and checks each get their own.
    let mut attributes: BTreeMap<&str, &str> = BTreeMap::new();
    let shared = sets
        .columns
        .iter()
        .map(|c| (c.name.as_str(), "column"))
        .chain(sets.parameters.iter().map(|p| (p.name.as_str(), "parameter")))
        .chain(sets.subanalyses.iter().map(|s| (s.name.as_str(), "subanalysis")));
    for (name, kind) in shared {
        if attributes.insert(name, kind).is_some() {
            return Err(AssemblyError::DuplicateName {
                kind: "attribute".to_string(),
                name: name.to_string(),
            });
        }
    }
    unique_names(sets.builders.iter().map(|b| b.name.as_str()), "builder")?;
    unique_names(sets.switches.iter().map(|s| s.name.as_str()), "switch")?;
    unique_names(sets.checks.iter().map(|c| c.name.as_str()), "check")?;
    Ok(())
}

fn unique_names<'a>(
    names: impl Iterator<Item = &'a str>,
    kind: &str,
) -> Result<(), AssemblyError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(AssemblyError::DuplicateName {
                kind: kind.to_string(),
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn check_references(sets: &EntitySets) -> Result<(), AssemblyError> {
    let columns: BTreeSet<&str> = sets.columns.iter().map(|c| c.name.as_str()).collect();
    let switches: BTreeSet<&str> = sets.switches.iter().map(|s| s.name.as_str()).collect();
    for builder in &sets.builders {
        for output in &builder.outputs {
            if !columns.contains(output.as_str()) {
                return Err(AssemblyError::UnknownOutput {
                    builder: builder.name.clone(),
                    output: output.clone(),
                });
            }
        }
        if let Some(switch) = &builder.switch {
            if !switches.contains(switch.as_str()) {
                return Err(AssemblyError::UnknownSwitch {
                    builder: builder.name.clone(),
                    switch: switch.clone(),
                });
            }
        }
    }
    for check in &sets.checks {
        if !columns.contains(check.column.as_str()) {
            return Err(AssemblyError::UnknownCheckColumn {
                check: check.name.clone(),
                column: check.column.clone(),
            });
        }
    }
    Ok(())
}

/// Every column must be producible (by a builder or through a subanalysis
/// mapping) or be an externally-supplied input that something actually
/// reads.
fn check_column_coverage(sets: &EntitySets) -> Result<(), AssemblyError> {
    let produced: BTreeSet<&str> = sets
        .builders
        .iter()
        .flat_map(|b| b.outputs.iter().map(String::as_str))
        .collect();
    let read: BTreeSet<&str> = sets
        .builders
        .iter()
        .flat_map(|b| b.inputs.iter())
        .chain(sets.switches.iter().flat_map(|s| s.inputs.iter()))
        .chain(sets.checks.iter().flat_map(|c| c.inputs.iter()))
        .map(String::as_str)
        .collect();
    for column in &sets.columns {
        if produced.contains(column.name.as_str()) || column.mapped_from.is_some() {
            continue;
        }
        if column.salience < ColumnSalience::EXTERNALLY_SUPPLIED {
            return Err(AssemblyError::OrphanedColumn {
                column: column.name.clone(),
                salience: column.salience,
            });
        }
        if !read.contains(column.name.as_str()) {
            return Err(AssemblyError::UnusedColumn {
                column: column.name.clone(),
            });
        }
    }
    Ok(())
}

/// Two builders for the same output with a structurally identical
/// (condition, switch) pair can never be told apart at dispatch.
fn check_non_ambiguity(sets: &EntitySets) -> Result<(), AssemblyError> {
    let mut outputs: BTreeSet<&str> = BTreeSet::new();
    for builder in &sets.builders {
        outputs.extend(builder.outputs.iter().map(String::as_str));
    }
    for output in outputs {
        let mut seen: BTreeMap<(Option<String>, Option<String>), Vec<String>> = BTreeMap::new();
        for builder in sets
            .builders
            .iter()
            .filter(|b| b.outputs.iter().any(|o| o == output))
        {
            seen.entry(builder.condition_switch_identity())
                .or_default()
                .push(builder.name.clone());
        }
        if let Some(conflict) = seen.values().find(|names| names.len() > 1) {
            return Err(AssemblyError::AmbiguousBuilders {
                output: output.to_string(),
                builders: conflict.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_format::DataFormat;
    use crate::data_space::DataSpace;
    use crate::expression::{Operation, Value, ValueKind};
    use crate::salience::{ColumnSalience, ParameterSalience};

    fn space() -> DataSpace {
        DataSpace::new("samples", ["sample"]).unwrap()
    }

    /// A definition with one supplied input, one derived output, and one
    /// parameter, wired through a single builder.
    fn minimal_definition() -> AnalysisDefinition {
        AnalysisDefinition::new("demo", space())
            .declare_column(
                ColumnDecl::new("raw", DataFormat::new("text"))
                    .with_salience(ColumnSalience::Primary),
            )
            .declare_column(ColumnDecl::new("derived", DataFormat::new("text")))
            .declare_parameter(
                ParameterDecl::new("iterations", ValueKind::Int).with_default(10i64),
            )
            .declare_builder(
                BuilderDecl::new("derive", ["derived"]).with_args(["raw", "iterations"]),
            )
    }

    // -- resolution -------------------------------------------------------

    #[test]
    fn minimal_definition_assembles() {
        let spec = assemble(&minimal_definition(), &[]).unwrap();
        assert_eq!(spec.name(), "demo");
        assert_eq!(spec.columns().len(), 2);
        assert_eq!(spec.parameters().len(), 1);
        assert_eq!(spec.pipeline_builders().len(), 1);
    }

    #[test]
    fn args_partition_into_inputs_and_parameters() {
        let spec = assemble(&minimal_definition(), &[]).unwrap();
        let builder = spec.pipeline_builder("derive").unwrap();
        assert_eq!(builder.inputs, ["raw"]);
        assert_eq!(builder.parameters, ["iterations"]);
    }

    #[test]
    fn unrecognized_argument_rejected() {
        let definition = minimal_definition().declare_builder(
            BuilderDecl::new("broken", ["derived"]).with_args(["no_such_thing"]),
        );
        // The duplicate output also makes this ambiguous, but argument
        // resolution runs first.
        assert_eq!(
            assemble(&definition, &[]).unwrap_err(),
            AssemblyError::UnrecognizedArgument {
                owner: "broken".to_string(),
                argument: "no_such_thing".to_string(),
            }
        );
    }

    #[test]
    fn row_frequency_defaults_to_leaf() {
        let spec = assemble(&minimal_definition(), &[]).unwrap();
        assert_eq!(spec.column("raw").unwrap().row_frequency, space().leaf());
    }

    #[test]
    fn defined_in_records_the_definition() {
        let spec = assemble(&minimal_definition(), &[]).unwrap();
        assert_eq!(spec.column("derived").unwrap().defined_in, ["demo"]);
    }

    // -- declaration validation -------------------------------------------

    #[test]
    fn reserved_name_rejected() {
        let definition = minimal_definition()
            .declare_parameter(ParameterDecl::new("dataset", ValueKind::Int).with_default(1i64));
        assert_eq!(
            assemble(&definition, &[]).unwrap_err(),
            AssemblyError::ReservedName {
                name: "dataset".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_attribute_rejected() {
        let definition = minimal_definition()
            .declare_parameter(ParameterDecl::new("raw", ValueKind::Int).with_default(1i64));
        assert!(matches!(
            assemble(&definition, &[]),
            Err(AssemblyError::DuplicateName { .. })
        ));
    }

    #[test]
    fn missing_default_rejected() {
        let definition =
            minimal_definition().declare_parameter(ParameterDecl::new("loose", ValueKind::Int));
        assert_eq!(
            assemble(&definition, &[]).unwrap_err(),
            AssemblyError::MissingDefault {
                parameter: "loose".to_string(),
            }
        );
    }

    #[test]
    fn required_salience_needs_no_default() {
        let definition = minimal_definition().declare_parameter(
            ParameterDecl::new("mandatory", ValueKind::Int)
                .with_salience(ParameterSalience::Required),
        );
        assert!(assemble(&definition, &[]).is_ok());
    }

    #[test]
    fn choices_with_bounds_rejected() {
        let definition = minimal_definition().declare_parameter(
            ParameterDecl::new("confused", ValueKind::Int)
                .with_choices([1i64, 2i64])
                .with_bounds(0.0, 10.0)
                .with_default(1i64),
        );
        assert_eq!(
            assemble(&definition, &[]).unwrap_err(),
            AssemblyError::ChoicesWithBounds {
                parameter: "confused".to_string(),
            }
        );
    }

    #[test]
    fn default_violating_bounds_rejected() {
        let definition = minimal_definition().declare_parameter(
            ParameterDecl::new("clamped", ValueKind::Float)
                .with_bounds(0.0, 1.0)
                .with_default(2.5f64),
        );
        assert!(matches!(
            assemble(&definition, &[]),
            Err(AssemblyError::InvalidDefault { .. })
        ));
    }

    // -- reference checks -------------------------------------------------

    #[test]
    fn unknown_output_rejected() {
        let definition = minimal_definition()
            .declare_builder(BuilderDecl::new("ghost", ["no_such_column"]));
        assert_eq!(
            assemble(&definition, &[]).unwrap_err(),
            AssemblyError::UnknownOutput {
                builder: "ghost".to_string(),
                output: "no_such_column".to_string(),
            }
        );
    }

    #[test]
    fn unknown_switch_rejected() {
        let definition = AnalysisDefinition::new("demo", space())
            .declare_column(
                ColumnDecl::new("raw", DataFormat::new("text"))
                    .with_salience(ColumnSalience::Primary),
            )
            .declare_column(ColumnDecl::new("derived", DataFormat::new("text")))
            .declare_builder(
                BuilderDecl::new("derive", ["derived"])
                    .with_args(["raw"])
                    .with_switch("no_such_switch"),
            );
        assert!(matches!(
            assemble(&definition, &[]),
            Err(AssemblyError::UnknownSwitch { .. })
        ));
    }

    #[test]
    fn unknown_check_column_rejected() {
        let definition = minimal_definition()
            .declare_check(CheckDecl::new("sanity", "no_such_column").with_args(["derived"]));
        assert!(matches!(
            assemble(&definition, &[]),
            Err(AssemblyError::UnknownCheckColumn { .. })
        ));
    }

    #[test]
    fn invalid_condition_surfaces_at_assembly() {
        let definition = AnalysisDefinition::new("demo", space())
            .declare_column(
                ColumnDecl::new("raw", DataFormat::new("text"))
                    .with_salience(ColumnSalience::Primary),
            )
            .declare_column(ColumnDecl::new("derived", DataFormat::new("text")))
            .declare_builder(
                BuilderDecl::new("derive", ["derived"])
                    .with_args(["raw"])
                    .with_condition(Operation::value_of("no_such_parameter")),
            );
        assert!(matches!(
            assemble(&definition, &[]),
            Err(AssemblyError::InvalidCondition { .. })
        ));
    }

    // -- coverage ---------------------------------------------------------

    #[test]
    fn orphaned_column_rejected() {
        // Supporting salience, below the externally-supplied threshold, and
        // nothing produces it.
        let definition =
            minimal_definition().declare_column(ColumnDecl::new("stray", DataFormat::new("text")));
        assert_eq!(
            assemble(&definition, &[]).unwrap_err(),
            AssemblyError::OrphanedColumn {
                column: "stray".to_string(),
                salience: ColumnSalience::Supporting,
            }
        );
    }

    #[test]
    fn unused_input_column_rejected() {
        let definition = minimal_definition().declare_column(
            ColumnDecl::new("ignored", DataFormat::new("text"))
                .with_salience(ColumnSalience::Primary),
        );
        assert_eq!(
            assemble(&definition, &[]).unwrap_err(),
            AssemblyError::UnusedColumn {
                column: "ignored".to_string(),
            }
        );
    }

    #[test]
    fn publication_output_with_producer_accepted() {
        let definition = AnalysisDefinition::new("demo", space())
            .declare_column(
                ColumnDecl::new("raw", DataFormat::new("text"))
                    .with_salience(ColumnSalience::Primary),
            )
            .declare_column(
                ColumnDecl::new("out", DataFormat::new("text"))
                    .with_salience(ColumnSalience::Publication),
            )
            .declare_builder(BuilderDecl::new("derive", ["out"]).with_args(["raw"]));
        assert!(assemble(&definition, &[]).is_ok());
    }

    // -- ambiguity --------------------------------------------------------

    #[test]
    fn identical_condition_switch_pair_rejected() {
        let definition = minimal_definition().declare_builder(
            BuilderDecl::new("derive_again", ["derived"]).with_args(["raw"]),
        );
        assert_eq!(
            assemble(&definition, &[]).unwrap_err(),
            AssemblyError::AmbiguousBuilders {
                output: "derived".to_string(),
                builders: vec!["derive".to_string(), "derive_again".to_string()],
            }
        );
    }

    #[test]
    fn distinct_conditions_accepted() {
        let definition = minimal_definition().declare_builder(
            BuilderDecl::new("derive_fast", ["derived"])
                .with_args(["raw"])
                .with_condition(Operation::eq(Operation::value_of("iterations"), 1i64)),
        );
        assert!(assemble(&definition, &[]).is_ok());
    }

    // -- subanalysis mappings ---------------------------------------------

    fn inner_spec() -> Arc<AnalysisSpec> {
        let definition = AnalysisDefinition::new("inner", space())
            .declare_column(
                ColumnDecl::new("source", DataFormat::new("text"))
                    .with_salience(ColumnSalience::Primary),
            )
            .declare_column(ColumnDecl::new("product", DataFormat::new("text")))
            .declare_parameter(ParameterDecl::new("depth", ValueKind::Int).with_default(3i64))
            .declare_builder(
                BuilderDecl::new("produce", ["product"]).with_args(["source", "depth"]),
            );
        assemble(&definition, &[]).unwrap()
    }

    #[test]
    fn mapped_column_collects_implicit_mapping() {
        let definition = AnalysisDefinition::new("outer", space())
            .declare_subanalysis(SubanalysisDecl::new("sub", inner_spec()))
            .declare_column(ColumnDecl::mapped_from("result", "sub", "product"))
            .declare_column(
                ColumnDecl::new("raw", DataFormat::new("text"))
                    .with_salience(ColumnSalience::Primary),
            )
            .declare_builder(BuilderDecl::new("use_result", ["result"]).with_args(["raw"]));
        let spec = assemble(&definition, &[]).unwrap();
        let sub = spec.subanalysis("sub").unwrap();
        assert_eq!(sub.mapping("product"), Some("result"));
        assert_eq!(
            spec.column("result").unwrap().mapped_from,
            Some(("sub".to_string(), "product".to_string()))
        );
        // The mapped column's format is inferred from the source column.
        assert_eq!(spec.column("result").unwrap().format, DataFormat::new("text"));
    }

    #[test]
    fn mapping_to_unknown_inner_attribute_rejected() {
        let definition = AnalysisDefinition::new("outer", space()).declare_subanalysis(
            SubanalysisDecl::new("sub", inner_spec()).with_mapping("no_such_thing", "raw"),
        );
        assert!(matches!(
            assemble(&definition, &[]),
            Err(AssemblyError::UnresolvedMapping { .. })
        ));
    }

    #[test]
    fn mapping_to_unknown_parent_attribute_rejected() {
        let definition = AnalysisDefinition::new("outer", space()).declare_subanalysis(
            SubanalysisDecl::new("sub", inner_spec()).with_mapping("depth", "no_such_thing"),
        );
        assert!(matches!(
            assemble(&definition, &[]),
            Err(AssemblyError::UnresolvedMapping { .. })
        ));
    }

    #[test]
    fn mapped_parameter_kind_cannot_change() {
        let definition = AnalysisDefinition::new("outer", space())
            .declare_subanalysis(SubanalysisDecl::new("sub", inner_spec()))
            .declare_parameter(
                ParameterDecl::mapped_from("speed", "sub", "depth").with_kind(ValueKind::Str),
            );
        assert_eq!(
            assemble(&definition, &[]).unwrap_err(),
            AssemblyError::IncompatibleKind {
                parameter: "speed".to_string(),
                declared: ValueKind::Str,
                source: ValueKind::Int,
            }
        );
    }

    #[test]
    fn mapped_parameter_constraints_can_be_tightened() {
        let definition = AnalysisDefinition::new("outer", space())
            .declare_subanalysis(SubanalysisDecl::new("sub", inner_spec()))
            .declare_parameter(
                ParameterDecl::mapped_from("speed", "sub", "depth").with_bounds(1.0, 5.0),
            );
        let spec = assemble(&definition, &[]).unwrap();
        let speed = spec.parameter("speed").unwrap();
        assert_eq!(speed.lower_bound, Some(1.0));
        assert_eq!(speed.upper_bound, Some(5.0));
        // The source's default carries over and passes the new bounds.
        assert_eq!(speed.default, Some(Value::Int(3)));
    }

    #[test]
    fn mapped_parameter_default_must_satisfy_tightened_bounds() {
        let definition = AnalysisDefinition::new("outer", space())
            .declare_subanalysis(SubanalysisDecl::new("sub", inner_spec()))
            .declare_parameter(
                ParameterDecl::mapped_from("speed", "sub", "depth").with_bounds(5.0, 9.0),
            );
        assert!(matches!(
            assemble(&definition, &[]).unwrap_err(),
            AssemblyError::InvalidDefault { .. }
        ));
    }

    #[test]
    fn mapping_across_kinds_rejected() {
        // "depth" is a parameter in the subanalysis, "raw" a parent column.
        let definition = AnalysisDefinition::new("outer", space())
            .declare_column(
                ColumnDecl::new("raw", DataFormat::new("text"))
                    .with_salience(ColumnSalience::Primary),
            )
            .declare_column(ColumnDecl::new("derived", DataFormat::new("text")))
            .declare_builder(BuilderDecl::new("derive", ["derived"]).with_args(["raw"]))
            .declare_subanalysis(
                SubanalysisDecl::new("sub", inner_spec()).with_mapping("depth", "raw"),
            );
        assert!(matches!(
            assemble(&definition, &[]),
            Err(AssemblyError::MappingMismatch { .. })
        ));
    }

    // -- determinism ------------------------------------------------------

    #[test]
    fn identical_definitions_assemble_to_identical_digests() {
        let a = assemble(&minimal_definition(), &[]).unwrap();
        let b = assemble(&minimal_definition(), &[]).unwrap();
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn different_definitions_assemble_to_different_digests() {
        let a = assemble(&minimal_definition(), &[]).unwrap();
        let changed = minimal_definition().declare_column(
            ColumnDecl::new("extra", DataFormat::new("text"))
                .with_salience(ColumnSalience::Primary),
        );
        let changed = changed.declare_builder(
            BuilderDecl::new("consume", ["derived"])
                .with_args(["extra"])
                .with_condition(Operation::is_provided("extra")),
        );
        let b = assemble(&changed, &[]).unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn errors_serialize() {
        let err = AssemblyError::UnusedColumn {
            column: "x".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: AssemblyError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
        assert!(err.to_string().contains("'x'"));
    }

    #[test]
    fn parameter_default_round_trips_into_spec() {
        let spec = assemble(&minimal_definition(), &[]).unwrap();
        assert_eq!(
            spec.parameter("iterations").unwrap().default,
            Some(Value::Int(10))
        );
    }
}
