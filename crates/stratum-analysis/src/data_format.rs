//! Data formats with an explicit sub-format lineage.
//!
//! A column's declared format constrains what a dataset may bind into its
//! slot. Formats form a single-inheritance hierarchy recorded as an ordered
//! ancestor list, so sub-format checks need no global registry: a format is
//! compatible with a requirement when it *is* the required format or carries
//! it in its lineage.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named data format and the ordered names of its ancestors, nearest first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataFormat {
    name: String,
    lineage: Vec<String>,
}

impl DataFormat {
    /// A root format with no ancestors.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lineage: Vec::new(),
        }
    }

    /// A format derived from `parent`, inheriting its full lineage.
    pub fn extending(name: impl Into<String>, parent: &DataFormat) -> Self {
        let mut lineage = Vec::with_capacity(parent.lineage.len() + 1);
        lineage.push(parent.name.clone());
        lineage.extend(parent.lineage.iter().cloned());
        Self {
            name: name.into(),
            lineage,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ancestor names, nearest first.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// Whether this format equals `other` or descends from it.
    pub fn is_subformat_of(&self, other: &DataFormat) -> bool {
        self.has_ancestor(&other.name)
    }

    /// Whether this format's name or any ancestor name equals `name`.
    pub fn has_ancestor(&self, name: &str) -> bool {
        self.name == name || self.lineage.iter().any(|a| a == name)
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_is_subformat_of_itself() {
        let nifti = DataFormat::new("nifti");
        assert!(nifti.is_subformat_of(&nifti));
    }

    #[test]
    fn extending_inherits_lineage() {
        let image = DataFormat::new("image");
        let nifti = DataFormat::extending("nifti", &image);
        let nifti_gz = DataFormat::extending("nifti-gz", &nifti);
        assert_eq!(nifti_gz.lineage(), ["nifti", "image"]);
        assert!(nifti_gz.is_subformat_of(&nifti));
        assert!(nifti_gz.is_subformat_of(&image));
        assert!(!image.is_subformat_of(&nifti_gz));
    }

    #[test]
    fn unrelated_formats_are_incompatible() {
        let nifti = DataFormat::new("nifti");
        let dicom = DataFormat::new("dicom");
        assert!(!nifti.is_subformat_of(&dicom));
        assert!(!dicom.has_ancestor("nifti"));
    }

    #[test]
    fn serde_round_trip() {
        let image = DataFormat::new("image");
        let nifti = DataFormat::extending("nifti", &image);
        let json = serde_json::to_string(&nifti).unwrap();
        let back: DataFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(nifti, back);
    }
}
