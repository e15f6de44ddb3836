//! The subanalysis mapping facade.
//!
//! A nested analysis instance is reached through [`Subanalysis`], a read
//! view that redirects attribute reads for mapped names to the *parent*
//! instance under the mapped name and passes every other name through to the
//! nested instance untouched. Mapped attributes are read-only aliases: they
//! must be set via the parent, and the parent-side write path rejects
//! attempts to set them through the facade.
//!
//! The facade implements [`AnalysisContext`], so condition evaluation and
//! pipeline resolution recurse into nested analyses without special cases.

use crate::analysis_spec::{AnalysisSpec, SubanalysisSpec};
use crate::expression::Value;
use crate::instance::{AnalysisContext, AnalysisInstance, InstanceError};

/// Read view of one nested subanalysis of a parent instance. The nested
/// instance is resolved once, at construction, so reads cannot stray.
#[derive(Debug, Clone, Copy)]
pub struct Subanalysis<'a> {
    entry: &'a SubanalysisSpec,
    parent: &'a AnalysisInstance,
    inner: &'a AnalysisInstance,
}

impl<'a> Subanalysis<'a> {
    pub(crate) fn new(
        entry: &'a SubanalysisSpec,
        parent: &'a AnalysisInstance,
        inner: &'a AnalysisInstance,
    ) -> Self {
        Self {
            entry,
            parent,
            inner,
        }
    }

    /// The subanalysis entry in the parent spec.
    pub fn entry(&self) -> &SubanalysisSpec {
        self.entry
    }

    /// The parent-side alias for a name in the subanalysis, if mapped.
    pub fn mapped_name(&self, name: &str) -> Option<&str> {
        self.entry.mapping(name)
    }
}

impl AnalysisContext for Subanalysis<'_> {
    fn spec(&self) -> &AnalysisSpec {
        &self.entry.spec
    }

    fn parameter_value(&self, name: &str) -> Option<&Value> {
        match self.entry.mapping(name) {
            Some(parent_name) => self.parent.parameter_value(parent_name),
            None => self.inner.parameter_value(name),
        }
    }

    fn column_binding(&self, name: &str) -> Option<&str> {
        match self.entry.mapping(name) {
            Some(parent_name) => self.parent.column_binding(parent_name),
            None => self.inner.column_binding(name),
        }
    }

    fn subanalysis(&self, name: &str) -> Option<Subanalysis<'_>> {
        self.inner.subanalysis(name)
    }
}

impl AnalysisInstance {
    /// Set a parameter of a nested subanalysis through the mapping facade.
    ///
    /// Writing to a mapped name is rejected: mapped attributes are read-only
    /// aliases and must be set on the parent under the mapped name.
    pub fn set_subanalysis_parameter(
        &mut self,
        subanalysis: &str,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), InstanceError> {
        let entry = self
            .spec_arc()
            .subanalysis(subanalysis)
            .ok_or_else(|| InstanceError::UnknownSubanalysis {
                name: subanalysis.to_string(),
            })?;
        if let Some(mapped_to) = entry.mapping(name) {
            return Err(InstanceError::MappedAttributeReadOnly {
                subanalysis: subanalysis.to_string(),
                attribute: name.to_string(),
                mapped_to: mapped_to.to_string(),
            });
        }
        let nested = self
            .nested_instance_mut(subanalysis)
            .ok_or_else(|| InstanceError::UnknownSubanalysis {
                name: subanalysis.to_string(),
            })?;
        nested.set_parameter(name, value)
    }

    /// Bind a column slot of a nested subanalysis through the mapping
    /// facade. Mapped slots are rejected the same way as mapped parameters.
    pub fn bind_subanalysis_column(
        &mut self,
        subanalysis: &str,
        slot: &str,
        dataset_column: impl Into<String>,
    ) -> Result<(), InstanceError> {
        let entry = self
            .spec_arc()
            .subanalysis(subanalysis)
            .ok_or_else(|| InstanceError::UnknownSubanalysis {
                name: subanalysis.to_string(),
            })?;
        if let Some(mapped_to) = entry.mapping(slot) {
            return Err(InstanceError::MappedAttributeReadOnly {
                subanalysis: subanalysis.to_string(),
                attribute: slot.to_string(),
                mapped_to: mapped_to.to_string(),
            });
        }
        let nested = self
            .nested_instance_mut(subanalysis)
            .ok_or_else(|| InstanceError::UnknownSubanalysis {
                name: subanalysis.to_string(),
            })?;
        nested.bind_column(slot, dataset_column)
    }
}
