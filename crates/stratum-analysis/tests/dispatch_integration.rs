#![forbid(unsafe_code)]
//! End-to-end pipeline resolution: assemble a definition, instantiate it,
//! bind state, and resolve builders for requested columns, all through the
//! public API.

use std::sync::Arc;

use stratum_analysis::analysis_spec::AnalysisSpec;
use stratum_analysis::assembler::assemble;
use stratum_analysis::data_format::DataFormat;
use stratum_analysis::data_space::DataSpace;
use stratum_analysis::declaration::{
    AnalysisDefinition, BuilderDecl, ColumnDecl, ParameterDecl, SubanalysisDecl,
};
use stratum_analysis::dispatch::{resolve, DispatchError};
use stratum_analysis::expression::{Operation, ValueKind};
use stratum_analysis::instance::{AnalysisContext, AnalysisInstance, TableDataset};
use stratum_analysis::salience::ColumnSalience;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn study_space() -> DataSpace {
    DataSpace::new("study", ["member", "timepoint"]).unwrap()
}

fn nifti() -> DataFormat {
    DataFormat::new("nifti")
}

fn nifti_gz() -> DataFormat {
    DataFormat::extending("nifti_gz", &nifti())
}

/// The canonical two-builder setup: a publication-grade output `out`, a
/// conditional fast path and an unconditional thorough path.
fn mode_spec() -> Arc<AnalysisSpec> {
    let definition = AnalysisDefinition::new("modal", study_space())
        .declare_column(
            ColumnDecl::new("raw", nifti()).with_salience(ColumnSalience::Primary),
        )
        .declare_column(
            ColumnDecl::new("out", nifti()).with_salience(ColumnSalience::Publication),
        )
        .declare_parameter(
            ParameterDecl::new("mode", ValueKind::Str)
                .with_choices(["fast", "slow"])
                .with_default("slow"),
        )
        .declare_builder(
            BuilderDecl::new("b1", ["out"])
                .with_args(["raw", "mode"])
                .with_condition(Operation::eq(Operation::value_of("mode"), "fast")),
        )
        .declare_builder(BuilderDecl::new("b2", ["out"]).with_args(["raw"]));
    assemble(&definition, &[]).unwrap()
}

fn dataset() -> TableDataset {
    TableDataset::new()
        .with_column("scan-001", nifti())
        .with_column("scan-002", nifti_gz())
        .with_column("notes", DataFormat::new("text"))
}

// ---------------------------------------------------------------------------
// Condition-driven selection
// ---------------------------------------------------------------------------

#[test]
fn mode_parameter_steers_builder_selection() {
    let mut instance = AnalysisInstance::new(mode_spec());

    instance.set_parameter("mode", "fast").unwrap();
    let builder = resolve(instance.spec_arc(), "out", &instance, &dataset()).unwrap();
    assert_eq!(builder.name, "b1");

    instance.set_parameter("mode", "slow").unwrap();
    let builder = resolve(instance.spec_arc(), "out", &instance, &dataset()).unwrap();
    assert_eq!(builder.name, "b2");
}

#[test]
fn resolution_is_repeatable_under_unchanged_state() {
    let instance = AnalysisInstance::new(mode_spec());
    let first = resolve(instance.spec_arc(), "out", &instance, &dataset()).unwrap();
    let second = resolve(instance.spec_arc(), "out", &instance, &dataset()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn resolution_does_not_mutate_instance_state() {
    let mut instance = AnalysisInstance::new(mode_spec());
    instance.set_parameter("mode", "fast").unwrap();
    let _ = resolve(instance.spec_arc(), "out", &instance, &dataset()).unwrap();
    assert_eq!(
        instance.parameter_value("mode"),
        Some(&stratum_analysis::Value::Str("fast".into()))
    );
}

// ---------------------------------------------------------------------------
// Format-sensitive conditions
// ---------------------------------------------------------------------------

#[test]
fn is_provided_as_accepts_subformats() {
    let definition = AnalysisDefinition::new("formats", study_space())
        .declare_column(
            ColumnDecl::new("anat", nifti()).with_salience(ColumnSalience::Primary),
        )
        .declare_column(ColumnDecl::new("out", nifti()))
        .declare_builder(
            BuilderDecl::new("from_nifti", ["out"])
                .with_args(["anat"])
                .with_condition(Operation::is_provided_as("anat", "nifti")),
        )
        .declare_builder(BuilderDecl::new("fallback", ["out"]).with_args(["anat"]));
    let spec = assemble(&definition, &[]).unwrap();
    let mut instance = AnalysisInstance::new(spec);

    // Unbound slot: the condition is false, the fallback applies.
    let builder = resolve(instance.spec_arc(), "out", &instance, &dataset()).unwrap();
    assert_eq!(builder.name, "fallback");

    // Bound to an exact-format column.
    instance.bind_column("anat", "scan-001").unwrap();
    let builder = resolve(instance.spec_arc(), "out", &instance, &dataset()).unwrap();
    assert_eq!(builder.name, "from_nifti");

    // Bound to a sub-format column: still satisfied.
    instance.bind_column("anat", "scan-002").unwrap();
    let builder = resolve(instance.spec_arc(), "out", &instance, &dataset()).unwrap();
    assert_eq!(builder.name, "from_nifti");

    // Bound to an unrelated format: not satisfied.
    instance.bind_column("anat", "notes").unwrap();
    let builder = resolve(instance.spec_arc(), "out", &instance, &dataset()).unwrap();
    assert_eq!(builder.name, "fallback");
}

#[test]
fn binding_to_a_missing_dataset_column_is_an_error() {
    let definition = AnalysisDefinition::new("formats", study_space())
        .declare_column(
            ColumnDecl::new("anat", nifti()).with_salience(ColumnSalience::Primary),
        )
        .declare_column(ColumnDecl::new("out", nifti()))
        .declare_builder(
            BuilderDecl::new("from_nifti", ["out"])
                .with_args(["anat"])
                .with_condition(Operation::is_provided("anat")),
        )
        .declare_builder(BuilderDecl::new("fallback", ["out"]).with_args(["anat"]));
    let spec = assemble(&definition, &[]).unwrap();
    let mut instance = AnalysisInstance::new(spec);
    instance.bind_column("anat", "gone").unwrap();
    assert!(matches!(
        resolve(instance.spec_arc(), "out", &instance, &dataset()).unwrap_err(),
        DispatchError::Expression { .. }
    ));
}

// ---------------------------------------------------------------------------
// Delegation through subanalyses
// ---------------------------------------------------------------------------

#[test]
fn resolution_delegates_through_a_mapped_column() {
    let inner = AnalysisDefinition::new("inner", study_space())
        .declare_column(
            ColumnDecl::new("source", nifti()).with_salience(ColumnSalience::Primary),
        )
        .declare_column(ColumnDecl::new("product", nifti()))
        .declare_parameter(
            ParameterDecl::new("mode", ValueKind::Str)
                .with_choices(["fast", "slow"])
                .with_default("slow"),
        )
        .declare_builder(
            BuilderDecl::new("fast_path", ["product"])
                .with_args(["source", "mode"])
                .with_condition(Operation::eq(Operation::value_of("mode"), "fast")),
        )
        .declare_builder(BuilderDecl::new("slow_path", ["product"]).with_args(["source"]));
    let inner_spec = assemble(&inner, &[]).unwrap();

    let outer = AnalysisDefinition::new("outer", study_space())
        .declare_parameter(
            ParameterDecl::new("speed", ValueKind::Str)
                .with_choices(["fast", "slow"])
                .with_default("slow"),
        )
        .declare_subanalysis(
            SubanalysisDecl::new("sub", inner_spec).with_mapping("mode", "speed"),
        )
        .declare_column(ColumnDecl::mapped_from("result", "sub", "product"))
        .declare_column(
            ColumnDecl::new("raw", nifti()).with_salience(ColumnSalience::Primary),
        )
        .declare_column(ColumnDecl::new("summary", DataFormat::new("csv")))
        .declare_builder(
            BuilderDecl::new("summarize", ["summary"]).with_args(["raw", "result"]),
        );
    let spec = assemble(&outer, &[]).unwrap();
    let mut instance = AnalysisInstance::new(spec);

    // The parent's mapped parameter steers the nested selection.
    let builder = resolve(instance.spec_arc(), "result", &instance, &dataset()).unwrap();
    assert_eq!(builder.name, "slow_path");
    assert_eq!(builder.defined_in, ["inner"]);

    instance.set_parameter("speed", "fast").unwrap();
    let builder = resolve(instance.spec_arc(), "result", &instance, &dataset()).unwrap();
    assert_eq!(builder.name, "fast_path");
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[test]
fn failed_resolution_reports_the_candidate_set() {
    let definition = AnalysisDefinition::new("strict", study_space())
        .declare_column(
            ColumnDecl::new("raw", nifti()).with_salience(ColumnSalience::Primary),
        )
        .declare_column(ColumnDecl::new("out", nifti()))
        .declare_parameter(
            ParameterDecl::new("mode", ValueKind::Str)
                .with_choices(["fast", "slow"])
                .with_default("slow"),
        )
        .declare_builder(
            BuilderDecl::new("only_fast", ["out"])
                .with_args(["raw", "mode"])
                .with_condition(Operation::eq(Operation::value_of("mode"), "fast")),
        );
    let spec = assemble(&definition, &[]).unwrap();
    let instance = AnalysisInstance::new(spec);
    let err = resolve(instance.spec_arc(), "out", &instance, &dataset()).unwrap_err();
    assert_eq!(
        err,
        DispatchError::NoApplicableBuilder {
            column: "out".to_string(),
            candidates: vec!["only_fast".to_string()],
        }
    );
    let rendered = err.to_string();
    assert!(rendered.contains("out"));
    assert!(rendered.contains("only_fast"));
}

#[test]
fn dispatch_errors_serialize_for_reports() {
    let err = DispatchError::AmbiguousBuilders {
        column: "out".to_string(),
        builders: vec!["a".to_string(), "b".to_string()],
    };
    let json = serde_json::to_string(&err).unwrap();
    let back: DispatchError = serde_json::from_str(&json).unwrap();
    assert_eq!(err, back);
}
