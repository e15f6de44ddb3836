#![forbid(unsafe_code)]
//! Declarative analysis specifications over hierarchical datasets.
//!
//! An analysis definition declares named columns (data artifacts), free
//! parameters, quality checks, and the pipeline builders that can derive
//! column data under run-time conditions. This crate turns those raw
//! declarations, plus an explicit chain of base definitions, into one
//! validated immutable [`AnalysisSpec`](analysis_spec::AnalysisSpec), and at
//! run time deterministically selects the single pipeline builder responsible
//! for any requested column.
//!
//! Design principles:
//! 1. Assembly is a pure, one-shot validation: a definition either becomes a
//!    frozen spec or fails with a precise diagnostic. No partial registries.
//! 2. All keyed state is ordered (`BTreeMap`/name-sorted tuples) so assembly
//!    and dispatch are deterministic and safe to memoize.
//! 3. Dispatch is read-only over the frozen spec; ambiguity and absence are
//!    both signaled, never guessed.
//! 4. Nested analyses compose through an explicit name-mapping facade, not
//!    through any implicit attribute interception.

pub mod analysis_spec;
pub mod assembler;
pub mod data_format;
pub mod data_space;
pub mod declaration;
pub mod dispatch;
pub mod expression;
pub mod instance;
mod merge;
pub mod salience;
pub mod subanalysis;

pub use analysis_spec::AnalysisSpec;
pub use assembler::{assemble, AssemblyError};
pub use declaration::AnalysisDefinition;
pub use dispatch::{resolve, DispatchError};
pub use expression::{Operation, Value, ValueKind};
pub use instance::{AnalysisContext, AnalysisInstance, Dataset};
