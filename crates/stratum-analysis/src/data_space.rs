//! Hierarchy spaces and row frequencies.
//!
//! A [`DataSpace`] names the orthogonal axes along which rows of a dataset
//! are organised (e.g. `group`, `member`, `timepoint` in a longitudinal
//! clinical study). A [`RowFrequency`] is a bit vector over those axes: each
//! set bit means the data is specific to a particular branch at that layer.
//! The all-bits-set frequency is the "leaf" of the tree (e.g. a single
//! scanning session); the empty frequency is a singleton per dataset.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of axes in a space.
const MAX_AXES: usize = 32;

// ---------------------------------------------------------------------------
// DataSpaceError
// ---------------------------------------------------------------------------

/// Errors constructing spaces or frequencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSpaceError {
    /// A space must have at least one axis.
    NoAxes { space: String },
    /// Too many axes for the bit-vector representation.
    TooManyAxes { space: String, count: usize },
    /// Duplicate axis name within one space.
    DuplicateAxis { space: String, axis: String },
    /// Axis name not present in the space.
    UnknownAxis { space: String, axis: String },
}

impl fmt::Display for DataSpaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAxes { space } => write!(f, "space '{space}' has no axes"),
            Self::TooManyAxes { space, count } => {
                write!(f, "space '{space}' has {count} axes, maximum is {MAX_AXES}")
            }
            Self::DuplicateAxis { space, axis } => {
                write!(f, "space '{space}' declares axis '{axis}' more than once")
            }
            Self::UnknownAxis { space, axis } => {
                write!(f, "space '{space}' has no axis named '{axis}'")
            }
        }
    }
}

impl std::error::Error for DataSpaceError {}

// ---------------------------------------------------------------------------
// RowFrequency
// ---------------------------------------------------------------------------

/// A level in a dataset's hierarchy, as a bit vector over the space's axes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RowFrequency(u32);

impl RowFrequency {
    /// The dataset-singleton frequency (no axis bits set).
    pub const ROOT: RowFrequency = RowFrequency(0);

    /// Raw bit representation.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// True when exactly one axis bit is set, i.e. the frequency is a basis
    /// layer of the tree rather than a combination.
    pub fn is_basis(self) -> bool {
        self.0.count_ones() == 1
    }

    /// The basis frequencies this frequency decomposes into, ascending.
    pub fn span(self) -> Vec<RowFrequency> {
        let mut v = self.0;
        let mut basis = Vec::new();
        while v != 0 {
            let w = v & (v - 1);
            basis.push(RowFrequency(w ^ v));
            v = w;
        }
        basis
    }

    /// Whether every axis this frequency is specific to also appears in
    /// `child`. Matching frequencies count as parents only when `if_match`.
    pub fn is_parent_of(self, child: RowFrequency, if_match: bool) -> bool {
        (self.0 & child.0) == self.0 && (child != self || if_match)
    }

    /// Union of frequency values.
    pub fn union(freqs: impl IntoIterator<Item = RowFrequency>) -> RowFrequency {
        freqs
            .into_iter()
            .fold(RowFrequency::ROOT, |acc, f| RowFrequency(acc.0 | f.0))
    }
}

// ---------------------------------------------------------------------------
// DataSpace
// ---------------------------------------------------------------------------

/// A named hierarchy space: the ordered set of axes a dataset's tree is
/// organised along. Axis `i` corresponds to bit `1 << i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSpace {
    name: String,
    axes: Vec<String>,
}

impl DataSpace {
    /// Create a space from ordered axis names.
    pub fn new(
        name: impl Into<String>,
        axes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, DataSpaceError> {
        let name = name.into();
        let axes: Vec<String> = axes.into_iter().map(Into::into).collect();
        if axes.is_empty() {
            return Err(DataSpaceError::NoAxes { space: name });
        }
        if axes.len() > MAX_AXES {
            return Err(DataSpaceError::TooManyAxes {
                space: name,
                count: axes.len(),
            });
        }
        for (i, axis) in axes.iter().enumerate() {
            if axes[..i].contains(axis) {
                return Err(DataSpaceError::DuplicateAxis {
                    space: name,
                    axis: axis.clone(),
                });
            }
        }
        Ok(Self { name, axes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn axes(&self) -> &[String] {
        &self.axes
    }

    /// The leaf frequency: specific to every axis of the space.
    pub fn leaf(&self) -> RowFrequency {
        RowFrequency((1u32 << self.axes.len()) - 1)
    }

    /// Build a frequency from a set of axis names.
    pub fn frequency(&self, axes: &[&str]) -> Result<RowFrequency, DataSpaceError> {
        let mut bits = 0u32;
        for axis in axes {
            let idx = self.axes.iter().position(|a| a == axis).ok_or_else(|| {
                DataSpaceError::UnknownAxis {
                    space: self.name.clone(),
                    axis: (*axis).to_string(),
                }
            })?;
            bits |= 1 << idx;
        }
        Ok(RowFrequency(bits))
    }

    /// Render a frequency as its axis names joined with `+`, or `dataset`
    /// for the root frequency.
    pub fn describe(&self, freq: RowFrequency) -> String {
        if freq == RowFrequency::ROOT {
            return "dataset".to_string();
        }
        let names: Vec<&str> = self
            .axes
            .iter()
            .enumerate()
            .filter(|(i, _)| freq.bits() & (1 << i) != 0)
            .map(|(_, a)| a.as_str())
            .collect();
        names.join("+")
    }
}

impl fmt::Display for DataSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.axes.join(","))
    }
}
