//! The inheritance merge engine.
//!
//! A definition's base chain is an explicit, linear, most-derived-first list
//! of already-assembled specs supplied by the caller; there is no implicit
//! resolution order to compute. Merging walks the chain and folds inherited
//! entities into the derived candidate set under the safe-override rules:
//!
//! - the hierarchy space must be identical across the whole chain;
//! - columns, parameters, and subanalyses are inherited by name unless the
//!   derived definition went through the explicit `Inherited` origin;
//!   re-declaring a base name locally is a forbidden "silent shadow";
//! - pipeline builders, switches, and checks are inherited by name; a
//!   re-declared builder must preserve every output of the base version
//!   (overrides may add outputs, never remove one).

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::analysis_spec::{
    AnalysisSpec, Check, ColumnSpec, Parameter, PipelineBuilder, SubanalysisSpec, Switch,
};
use crate::assembler::AssemblyError;
use crate::data_space::DataSpace;

/// The working candidate set for one assembly, before freezing.
#[derive(Debug, Default)]
pub(crate) struct EntitySets {
    pub columns: Vec<ColumnSpec>,
    pub parameters: Vec<Parameter>,
    pub builders: Vec<PipelineBuilder>,
    pub switches: Vec<Switch>,
    pub checks: Vec<Check>,
    pub subanalyses: Vec<SubanalysisSpec>,
}

/// Names declared locally without the explicit override mechanism, per
/// entity kind. Used to detect silent shadows of inherited attributes.
#[derive(Debug, Default)]
pub(crate) struct LocalNames {
    pub columns: BTreeSet<String>,
    pub parameters: BTreeSet<String>,
    pub subanalyses: BTreeSet<String>,
}

/// Merge inherited entities from the base chain into the local candidate
/// set, enforcing the safe-override rules.
pub(crate) fn merge_with_bases(
    sets: &mut EntitySets,
    locals: &LocalNames,
    space: &DataSpace,
    bases: &[Arc<AnalysisSpec>],
) -> Result<(), AssemblyError> {
    for base in bases {
        if base.space() != space {
            return Err(AssemblyError::SpaceMismatch {
                base: base.name().to_string(),
                base_space: base.space().to_string(),
                derived_space: space.to_string(),
            });
        }

        check_silent_shadows(base, locals)?;
        check_builder_overrides(base, &sets.builders)?;

        inherit_by_name(&mut sets.columns, base.columns(), |c| &c.name);
        inherit_by_name(&mut sets.parameters, base.parameters(), |p| &p.name);
        inherit_by_name(&mut sets.subanalyses, base.subanalyses(), |s| &s.name);
        inherit_by_name(&mut sets.builders, base.pipeline_builders(), |b| &b.name);
        inherit_by_name(&mut sets.switches, base.switches(), |s| &s.name);
        inherit_by_name(&mut sets.checks, base.checks(), |c| &c.name);
    }
    Ok(())
}

/// Append base entities whose names are not already in the derived set.
fn inherit_by_name<T: Clone>(derived: &mut Vec<T>, base: &[T], name: impl Fn(&T) -> &String) {
    let present: BTreeSet<String> = derived.iter().map(|e| name(e).clone()).collect();
    derived.extend(
        base.iter()
            .filter(|e| !present.contains(name(e)))
            .cloned(),
    );
}

/// A base attribute re-declared locally without the explicit `Inherited`
/// origin is an error; overrides must be explicit and recorded.
fn check_silent_shadows(base: &AnalysisSpec, locals: &LocalNames) -> Result<(), AssemblyError> {
    let mut shadowed: Vec<String> = Vec::new();
    shadowed.extend(
        base.column_names()
            .filter(|n| locals.columns.contains(*n))
            .map(str::to_string),
    );
    shadowed.extend(
        base.parameter_names()
            .filter(|n| locals.parameters.contains(*n))
            .map(str::to_string),
    );
    shadowed.extend(
        base.subanalyses()
            .iter()
            .filter(|s| locals.subanalyses.contains(&s.name))
            .map(|s| s.name.clone()),
    );
    if shadowed.is_empty() {
        Ok(())
    } else {
        Err(AssemblyError::SilentOverride {
            base: base.name().to_string(),
            names: shadowed,
        })
    }
}

/// A locally re-declared builder must keep every output its base version
/// declared; it may only add outputs.
fn check_builder_overrides(
    base: &AnalysisSpec,
    derived_builders: &[PipelineBuilder],
) -> Result<(), AssemblyError> {
    for base_builder in base.pipeline_builders() {
        let Some(builder) = derived_builders
            .iter()
            .find(|b| b.name == base_builder.name)
        else {
            continue;
        };
        let missing: Vec<String> = base_builder
            .outputs
            .iter()
            .filter(|o| !builder.outputs.contains(o))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(AssemblyError::OutputRemovingOverride {
                builder: builder.name.clone(),
                base: base.name().to_string(),
                missing,
            });
        }
    }
    Ok(())
}
