//! Ordered salience rankings for columns, parameters, and checks.
//!
//! Salience is a total order over importance. For columns it decides whether
//! a slot must be supplied externally rather than derived; for parameters it
//! decides whether a default value may be omitted; for checks it grades how
//! strongly a failure indicates a real analysis failure rather than noise.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ColumnSalience
// ---------------------------------------------------------------------------

/// Importance ranking of a column, from scratch data up to primary inputs.
///
/// Columns at or above [`ColumnSalience::Publication`] are considered
/// externally suppliable: they may exist without any producing pipeline
/// builder. Anything below must be derived or mapped from a subanalysis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum ColumnSalience {
    /// Data only temporarily stored to pass between pipelines.
    Temp,
    /// Derivatives that typically only need checking when debugging workflows.
    Debug,
    /// Derivatives kept for quality assurance of analysis workflows.
    Qa,
    /// Derivatives kept to support the main results.
    #[default]
    Supporting,
    /// Results that would typically be used as main outputs in publications.
    Publication,
    /// Primary input data, or derivatives that are difficult to regenerate.
    Primary,
}

impl ColumnSalience {
    /// Numeric level, higher is more salient.
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Threshold at or above which a column may be supplied externally
    /// instead of being produced by a pipeline builder.
    pub const EXTERNALLY_SUPPLIED: ColumnSalience = ColumnSalience::Publication;
}

impl fmt::Display for ColumnSalience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Temp => "temp",
            Self::Debug => "debug",
            Self::Qa => "qa",
            Self::Supporting => "supporting",
            Self::Publication => "publication",
            Self::Primary => "primary",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// ParameterSalience
// ---------------------------------------------------------------------------

/// How important it is for a user to set a parameter explicitly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum ParameterSalience {
    /// Only relevant when debugging the analysis itself.
    Debug,
    /// An arbitrary knob with no recommended setting.
    Arbitrary,
    /// Has a sensible default but users are encouraged to review it.
    #[default]
    Recommended,
    /// The appropriate value depends on properties of the dataset.
    Dependent,
    /// Users should check the value is appropriate before running.
    Check,
    /// No default is possible; the user must supply a value.
    Required,
}

impl ParameterSalience {
    /// Numeric level, higher is more salient.
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ParameterSalience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Arbitrary => "arbitrary",
            Self::Recommended => "recommended",
            Self::Dependent => "dependent",
            Self::Check => "check",
            Self::Required => "required",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// CheckSalience
// ---------------------------------------------------------------------------

/// How strongly a failing check indicates a genuine analysis failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum CheckSalience {
    /// Only meaningful when debugging the analysis.
    Debug,
    /// Failure hints at a potential problem.
    #[default]
    Potential,
    /// Failure is suspicious and worth manual review.
    Suspicious,
    /// Failure probably indicates a real analysis failure.
    Probable,
    /// Failure definitely indicates a real analysis failure.
    Definite,
}

impl CheckSalience {
    /// Numeric level, higher is more salient.
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for CheckSalience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Potential => "potential",
            Self::Suspicious => "suspicious",
            Self::Probable => "probable",
            Self::Definite => "definite",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_salience_is_totally_ordered() {
        assert!(ColumnSalience::Temp < ColumnSalience::Debug);
        assert!(ColumnSalience::Debug < ColumnSalience::Qa);
        assert!(ColumnSalience::Qa < ColumnSalience::Supporting);
        assert!(ColumnSalience::Supporting < ColumnSalience::Publication);
        assert!(ColumnSalience::Publication < ColumnSalience::Primary);
    }

    #[test]
    fn externally_supplied_threshold_is_publication() {
        assert!(ColumnSalience::Primary >= ColumnSalience::EXTERNALLY_SUPPLIED);
        assert!(ColumnSalience::Publication >= ColumnSalience::EXTERNALLY_SUPPLIED);
        assert!(ColumnSalience::Supporting < ColumnSalience::EXTERNALLY_SUPPLIED);
    }

    #[test]
    fn parameter_salience_required_is_highest() {
        assert!(ParameterSalience::Required > ParameterSalience::Check);
        assert!(ParameterSalience::Required > ParameterSalience::Debug);
    }

    #[test]
    fn levels_match_declaration_order() {
        assert_eq!(ColumnSalience::Temp.level(), 0);
        assert_eq!(ColumnSalience::Primary.level(), 5);
        assert_eq!(CheckSalience::Definite.level(), 4);
    }

    #[test]
    fn display_names_are_lowercase() {
        assert_eq!(ColumnSalience::Publication.to_string(), "publication");
        assert_eq!(ParameterSalience::Required.to_string(), "required");
        assert_eq!(CheckSalience::Suspicious.to_string(), "suspicious");
    }

    #[test]
    fn serde_round_trip() {
        let s = ColumnSalience::Qa;
        let json = serde_json::to_string(&s).unwrap();
        let back: ColumnSalience = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }
}
