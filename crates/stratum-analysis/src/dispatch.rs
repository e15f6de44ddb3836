//! The pipeline resolution dispatcher.
//!
//! [`resolve`] answers "which single pipeline builder is responsible for
//! producing this column, right now, on this dataset". Resolution is a pure
//! function of the frozen spec, the instance state reachable through
//! [`AnalysisContext`], and the dataset; it mutates nothing and is fully
//! deterministic:
//!
//! 1. the column must exist;
//! 2. candidates are the builders listing the column among their outputs;
//! 3. conditional candidates whose condition evaluates to `true` are
//!    selected; if none, the unconditional candidates are the fallback;
//! 4. if nothing is selected and the column is mapped, resolution delegates
//!    into the owning subanalysis, recursively;
//! 5. a switch (including "no switch") occurring more than once among the
//!    selected builders is ambiguous;
//! 6. ties between distinct switches break by builder name order.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::analysis_spec::{AnalysisSpec, PipelineBuilder};
use crate::expression::{ExpressionError, Operation, Value};
use crate::instance::{AnalysisContext, Dataset};

// ---------------------------------------------------------------------------
// DispatchError
// ---------------------------------------------------------------------------

/// Why no single builder could be selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchError {
    /// The requested column is not in the spec.
    UnknownColumn { column: String },
    /// No candidate builder applies under the current instance state.
    NoApplicableBuilder {
        column: String,
        candidates: Vec<String>,
    },
    /// More than one selected builder shares a switch (or shares "no
    /// switch").
    AmbiguousBuilders {
        column: String,
        builders: Vec<String>,
    },
    /// The column is mapped but the context has no instance for the owning
    /// subanalysis.
    MissingSubanalysis {
        column: String,
        subanalysis: String,
    },
    /// A builder condition evaluated to a non-boolean value.
    NonBooleanCondition { builder: String, value: Value },
    /// A builder condition failed to evaluate.
    Expression {
        builder: String,
        source: ExpressionError,
    },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownColumn { column } => write!(f, "unknown column '{column}'"),
            Self::NoApplicableBuilder { column, candidates } => write!(
                f,
                "no applicable builder for column '{column}' (candidates: [{}])",
                candidates.join(", ")
            ),
            Self::AmbiguousBuilders { column, builders } => write!(
                f,
                "builders [{}] are simultaneously applicable for column '{column}'",
                builders.join(", ")
            ),
            Self::MissingSubanalysis {
                column,
                subanalysis,
            } => write!(
                f,
                "column '{column}' is mapped from subanalysis '{subanalysis}', \
                 which has no instance in this context"
            ),
            Self::NonBooleanCondition { builder, value } => write!(
                f,
                "condition of builder '{builder}' evaluated to {value}, not a \
                 boolean"
            ),
            Self::Expression { builder, source } => {
                write!(f, "condition of builder '{builder}' failed: {source}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

// ---------------------------------------------------------------------------
// resolve
// ---------------------------------------------------------------------------

/// Select the single pipeline builder responsible for `column_name` under
/// the current instance state and dataset.
pub fn resolve(
    spec: &AnalysisSpec,
    column_name: &str,
    ctx: &dyn AnalysisContext,
    dataset: &dyn Dataset,
) -> Result<PipelineBuilder, DispatchError> {
    let column = spec
        .column(column_name)
        .ok_or_else(|| DispatchError::UnknownColumn {
            column: column_name.to_string(),
        })?;

    let candidates: Vec<&PipelineBuilder> = spec
        .pipeline_builders()
        .iter()
        .filter(|b| b.outputs.iter().any(|o| o == column_name))
        .collect();

    let mut selected = Vec::new();
    for builder in &candidates {
        let Some(condition) = &builder.condition else {
            continue;
        };
        if condition_holds(builder, condition, ctx, dataset)? {
            selected.push(*builder);
        }
    }
    if selected.is_empty() {
        selected.extend(candidates.iter().filter(|b| b.condition.is_none()));
    }

    // A switch discriminates between selected builders, so each switch
    // value (including "no switch") may occur at most once.
    let mut by_switch: BTreeMap<Option<&str>, Vec<&str>> = BTreeMap::new();
    for builder in &selected {
        by_switch
            .entry(builder.switch.as_deref())
            .or_default()
            .push(builder.name.as_str());
    }
    if let Some(conflict) = by_switch.values().find(|names| names.len() > 1) {
        return Err(DispatchError::AmbiguousBuilders {
            column: column_name.to_string(),
            builders: conflict.iter().map(|n| n.to_string()).collect(),
        });
    }

    // Builders are name-sorted in the frozen spec, so the first selected
    // builder is the deterministic tie-break between distinct switches.
    match selected.first() {
        Some(builder) => Ok((*builder).clone()),
        // A mapped column without a local producer is resolved inside the
        // owning subanalysis, with the facade as the context so mapped
        // reads redirect to the parent.
        None => match &column.mapped_from {
            Some((subanalysis, source)) => {
                let view = ctx.subanalysis(subanalysis).ok_or_else(|| {
                    DispatchError::MissingSubanalysis {
                        column: column_name.to_string(),
                        subanalysis: subanalysis.clone(),
                    }
                })?;
                resolve(view.entry().spec.as_ref(), source, &view, dataset)
            }
            None => Err(DispatchError::NoApplicableBuilder {
                column: column_name.to_string(),
                candidates: candidates.iter().map(|b| b.name.clone()).collect(),
            }),
        },
    }
}

fn condition_holds(
    builder: &PipelineBuilder,
    condition: &Operation,
    ctx: &dyn AnalysisContext,
    dataset: &dyn Dataset,
) -> Result<bool, DispatchError> {
    let value = condition
        .evaluate(ctx, dataset)
        .map_err(|source| DispatchError::Expression {
            builder: builder.name.clone(),
            source,
        })?;
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(DispatchError::NonBooleanCondition {
            builder: builder.name.clone(),
            value: other,
        }),
    }
}
