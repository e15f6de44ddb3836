//! The condition expression model.
//!
//! Pipeline builders may carry a condition: a small interpreted expression
//! over the instantiated analysis (parameter values, column bindings) and the
//! dataset it is applied to. Expressions are built with explicit constructor
//! functions into an [`Operation`] tree, resolved and validated once at
//! assembly time, and evaluated at dispatch time.
//!
//! Two operators inspect analysis state directly:
//! - `value_of(parameter)` yields the bound value of a parameter;
//! - `is_provided(column[, format])` tests whether a column slot is bound to
//!   a dataset column (optionally of a required format or sub-format).
//!
//! Every other operator is a fixed comparison/boolean operator over
//! recursively evaluated operands.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::instance::{AnalysisContext, Dataset};

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A literal or bound value in the expression space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
        }
    }

    /// Numeric view, for bound checking.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// The declared type of a parameter or expression value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Str,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// ExpressionError
// ---------------------------------------------------------------------------

/// Errors raised while validating or evaluating a condition expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ExpressionError {
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    #[error("operator '{operator}' expects {expected} operand(s), got {actual}")]
    OperandArity {
        operator: String,
        expected: String,
        actual: usize,
    },
    #[error("operand of '{operator}' must be {expected}")]
    OperandKind {
        operator: String,
        expected: String,
    },
    #[error("'value_of' target '{0}' is not a declared parameter")]
    NotAParameter(String),
    #[error("'is_provided' target '{0}' is not a declared column")]
    NotAColumn(String),
    #[error("parameter '{0}' has no bound value")]
    UnsetParameter(String),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("unknown column slot '{0}'")]
    UnknownColumn(String),
    #[error("column slot '{slot}' is bound to '{bound}' but the dataset has no such column")]
    MissingDatasetColumn { slot: String, bound: String },
    #[error("cannot apply '{operator}' to {left} and {right}")]
    TypeMismatch {
        operator: String,
        left: ValueKind,
        right: ValueKind,
    },
    #[error("operator '{operator}' requires boolean operands")]
    NotBoolean { operator: String },
}

// ---------------------------------------------------------------------------
// Operation tree
// ---------------------------------------------------------------------------

/// One operand of an [`Operation`]: a literal, a named attribute reference,
/// or a nested operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operand", content = "value")]
pub enum Operand {
    Literal(Value),
    Ref(String),
    Op(Box<Operation>),
}

/// A node in a condition expression tree.
///
/// `operator` is one of `value_of`, `is_provided`, or a fixed
/// comparison/boolean operator (`eq`, `ne`, `lt`, `le`, `gt`, `ge`, `and`,
/// `or`, `not`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operator: String,
    pub operands: Vec<Operand>,
}

const BINARY_OPERATORS: [&str; 6] = ["eq", "ne", "lt", "le", "gt", "ge"];
const BOOLEAN_OPERATORS: [&str; 2] = ["and", "or"];

impl Operation {
    fn op(operator: &str, operands: Vec<Operand>) -> Self {
        Self {
            operator: operator.to_string(),
            operands,
        }
    }

    /// The current bound value of the named parameter.
    pub fn value_of(parameter: impl Into<String>) -> Self {
        Self::op("value_of", vec![Operand::Ref(parameter.into())])
    }

    /// Whether the named column slot is bound to a dataset column.
    pub fn is_provided(column: impl Into<String>) -> Self {
        Self::op("is_provided", vec![Operand::Ref(column.into())])
    }

    /// Whether the named column slot is bound to a dataset column whose
    /// format equals, or descends from, the required format.
    pub fn is_provided_as(column: impl Into<String>, format: impl Into<String>) -> Self {
        Self::op(
            "is_provided",
            vec![
                Operand::Ref(column.into()),
                Operand::Literal(Value::Str(format.into())),
            ],
        )
    }

    pub fn eq(left: impl Into<Operand>, right: impl Into<Operand>) -> Self {
        Self::op("eq", vec![left.into(), right.into()])
    }

    pub fn ne(left: impl Into<Operand>, right: impl Into<Operand>) -> Self {
        Self::op("ne", vec![left.into(), right.into()])
    }

    pub fn lt(left: impl Into<Operand>, right: impl Into<Operand>) -> Self {
        Self::op("lt", vec![left.into(), right.into()])
    }

    pub fn le(left: impl Into<Operand>, right: impl Into<Operand>) -> Self {
        Self::op("le", vec![left.into(), right.into()])
    }

    pub fn gt(left: impl Into<Operand>, right: impl Into<Operand>) -> Self {
        Self::op("gt", vec![left.into(), right.into()])
    }

    pub fn ge(left: impl Into<Operand>, right: impl Into<Operand>) -> Self {
        Self::op("ge", vec![left.into(), right.into()])
    }

    pub fn and(left: Operation, right: Operation) -> Self {
        Self::op("and", vec![Operand::Op(Box::new(left)), Operand::Op(Box::new(right))])
    }

    pub fn or(left: Operation, right: Operation) -> Self {
        Self::op("or", vec![Operand::Op(Box::new(left)), Operand::Op(Box::new(right))])
    }

    pub fn not(inner: Operation) -> Self {
        Self::op("not", vec![Operand::Op(Box::new(inner))])
    }

    // -----------------------------------------------------------------------
    // Assembly-time resolution
    // -----------------------------------------------------------------------

    /// Validate operator arity and operand kinds, and resolve every named
    /// reference against the declared column and parameter names.
    ///
    /// Called once by the assembler; a failure here is an assembly error and
    /// is never deferred to dispatch.
    pub fn validate(
        &self,
        column_names: &BTreeSet<String>,
        parameter_names: &BTreeSet<String>,
    ) -> Result<(), ExpressionError> {
        match self.operator.as_str() {
            "value_of" => {
                if self.operands.len() != 1 {
                    return Err(self.arity_error("1"));
                }
                match &self.operands[0] {
                    Operand::Ref(name) if parameter_names.contains(name) => Ok(()),
                    Operand::Ref(name) => Err(ExpressionError::NotAParameter(name.clone())),
                    _ => Err(ExpressionError::OperandKind {
                        operator: self.operator.clone(),
                        expected: "a parameter name".to_string(),
                    }),
                }
            }
            "is_provided" => {
                if self.operands.is_empty() || self.operands.len() > 2 {
                    return Err(self.arity_error("1 or 2"));
                }
                match &self.operands[0] {
                    Operand::Ref(name) if column_names.contains(name) => {}
                    Operand::Ref(name) => {
                        return Err(ExpressionError::NotAColumn(name.clone()));
                    }
                    _ => {
                        return Err(ExpressionError::OperandKind {
                            operator: self.operator.clone(),
                            expected: "a column name".to_string(),
                        });
                    }
                }
                if let Some(second) = self.operands.get(1) {
                    if !matches!(second, Operand::Literal(Value::Str(_))) {
                        return Err(ExpressionError::OperandKind {
                            operator: self.operator.clone(),
                            expected: "a format name literal".to_string(),
                        });
                    }
                }
                Ok(())
            }
            op if BINARY_OPERATORS.contains(&op) || BOOLEAN_OPERATORS.contains(&op) => {
                if self.operands.len() != 2 {
                    return Err(self.arity_error("2"));
                }
                for operand in &self.operands {
                    self.validate_operand(operand, column_names, parameter_names)?;
                }
                Ok(())
            }
            "not" => {
                if self.operands.len() != 1 {
                    return Err(self.arity_error("1"));
                }
                self.validate_operand(&self.operands[0], column_names, parameter_names)
            }
            other => Err(ExpressionError::UnknownOperator(other.to_string())),
        }
    }

    fn validate_operand(
        &self,
        operand: &Operand,
        column_names: &BTreeSet<String>,
        parameter_names: &BTreeSet<String>,
    ) -> Result<(), ExpressionError> {
        match operand {
            Operand::Literal(_) => Ok(()),
            // A bare reference inside a generic operator reads a parameter.
            Operand::Ref(name) if parameter_names.contains(name) => Ok(()),
            Operand::Ref(name) => Err(ExpressionError::NotAParameter(name.clone())),
            Operand::Op(inner) => inner.validate(column_names, parameter_names),
        }
    }

    fn arity_error(&self, expected: &str) -> ExpressionError {
        ExpressionError::OperandArity {
            operator: self.operator.clone(),
            expected: expected.to_string(),
            actual: self.operands.len(),
        }
    }

    // -----------------------------------------------------------------------
    // Run-time evaluation
    // -----------------------------------------------------------------------

    /// Evaluate the expression against an analysis context and dataset.
    pub fn evaluate(
        &self,
        ctx: &dyn AnalysisContext,
        dataset: &dyn Dataset,
    ) -> Result<Value, ExpressionError> {
        match self.operator.as_str() {
            "value_of" => {
                let name = self.ref_operand(0)?;
                parameter_value(ctx, name)
            }
            "is_provided" => {
                let slot = self.ref_operand(0)?;
                if ctx.spec().column(slot).is_none() {
                    return Err(ExpressionError::UnknownColumn(slot.to_string()));
                }
                let Some(bound) = ctx.column_binding(slot) else {
                    return Ok(Value::Bool(false));
                };
                let format = dataset.lookup(bound).ok_or_else(|| {
                    ExpressionError::MissingDatasetColumn {
                        slot: slot.to_string(),
                        bound: bound.to_string(),
                    }
                })?;
                match self.operands.get(1) {
                    None => Ok(Value::Bool(true)),
                    Some(Operand::Literal(Value::Str(required))) => {
                        Ok(Value::Bool(format.has_ancestor(required)))
                    }
                    Some(_) => Err(ExpressionError::OperandKind {
                        operator: self.operator.clone(),
                        expected: "a format name literal".to_string(),
                    }),
                }
            }
            op if BINARY_OPERATORS.contains(&op) => {
                let left = self.evaluate_operand(0, ctx, dataset)?;
                let right = self.evaluate_operand(1, ctx, dataset)?;
                compare(op, &left, &right)
            }
            op if BOOLEAN_OPERATORS.contains(&op) => {
                let left = self.boolean_operand(0, ctx, dataset)?;
                let right = self.boolean_operand(1, ctx, dataset)?;
                Ok(Value::Bool(match op {
                    "and" => left && right,
                    _ => left || right,
                }))
            }
            "not" => {
                let inner = self.boolean_operand(0, ctx, dataset)?;
                Ok(Value::Bool(!inner))
            }
            other => Err(ExpressionError::UnknownOperator(other.to_string())),
        }
    }

    fn ref_operand(&self, index: usize) -> Result<&str, ExpressionError> {
        match self.operands.get(index) {
            Some(Operand::Ref(name)) => Ok(name),
            _ => Err(ExpressionError::OperandKind {
                operator: self.operator.clone(),
                expected: "an attribute name".to_string(),
            }),
        }
    }

    fn evaluate_operand(
        &self,
        index: usize,
        ctx: &dyn AnalysisContext,
        dataset: &dyn Dataset,
    ) -> Result<Value, ExpressionError> {
        match self.operands.get(index) {
            Some(Operand::Literal(v)) => Ok(v.clone()),
            Some(Operand::Ref(name)) => parameter_value(ctx, name),
            Some(Operand::Op(inner)) => inner.evaluate(ctx, dataset),
            None => Err(self.arity_error("more")),
        }
    }

    fn boolean_operand(
        &self,
        index: usize,
        ctx: &dyn AnalysisContext,
        dataset: &dyn Dataset,
    ) -> Result<bool, ExpressionError> {
        match self.evaluate_operand(index, ctx, dataset)? {
            Value::Bool(b) => Ok(b),
            _ => Err(ExpressionError::NotBoolean {
                operator: self.operator.clone(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Structural identity
    // -----------------------------------------------------------------------

    /// Deterministic byte encoding of the tree, used to group builders by
    /// condition identity (not by evaluated truth).
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.operator.as_bytes());
        buf.push(0x1f);
        for operand in &self.operands {
            match operand {
                Operand::Literal(Value::Bool(v)) => {
                    buf.push(b'b');
                    buf.push(u8::from(*v));
                }
                Operand::Literal(Value::Int(v)) => {
                    buf.push(b'i');
                    buf.extend_from_slice(&v.to_le_bytes());
                }
                Operand::Literal(Value::Float(v)) => {
                    buf.push(b'f');
                    buf.extend_from_slice(&v.to_bits().to_le_bytes());
                }
                Operand::Literal(Value::Str(v)) => {
                    buf.push(b's');
                    buf.extend_from_slice(v.as_bytes());
                    buf.push(0);
                }
                Operand::Ref(name) => {
                    buf.push(b'r');
                    buf.extend_from_slice(name.as_bytes());
                    buf.push(0);
                }
                Operand::Op(inner) => {
                    buf.push(b'(');
                    inner.encode(buf);
                    buf.push(b')');
                }
            }
        }
        buf.push(0x1e);
    }

    /// Canonical SHA-256 identity of the expression tree.
    pub fn identity(&self) -> String {
        let digest = Sha256::digest(self.canonical_bytes());
        format!("sha256:{}", hex::encode(digest))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.operator)?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match operand {
                Operand::Literal(v) => write!(f, "{v}")?,
                Operand::Ref(name) => f.write_str(name)?,
                Operand::Op(inner) => write!(f, "{inner}")?,
            }
        }
        f.write_str(")")
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Literal(v)
    }
}

impl From<Operation> for Operand {
    fn from(op: Operation) -> Self {
        Operand::Op(Box::new(op))
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Operand::Literal(Value::Str(v.to_string()))
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Literal(Value::Int(v))
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Literal(Value::Float(v))
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::Literal(Value::Bool(v))
    }
}

fn parameter_value(ctx: &dyn AnalysisContext, name: &str) -> Result<Value, ExpressionError> {
    match ctx.parameter_value(name) {
        Some(v) => Ok(v.clone()),
        None if ctx.spec().parameter(name).is_some() => {
            Err(ExpressionError::UnsetParameter(name.to_string()))
        }
        None => Err(ExpressionError::UnknownParameter(name.to_string())),
    }
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    use std::cmp::Ordering;

    let mismatch = || ExpressionError::TypeMismatch {
        operator: op.to_string(),
        left: left.kind(),
        right: right.kind(),
    };
    if left.kind() != right.kind() {
        return Err(mismatch());
    }
    if matches!(op, "eq" | "ne") {
        let equal = left == right;
        return Ok(Value::Bool(if op == "eq" { equal } else { !equal }));
    }
    let ordering = match (left, right) {
        (Value::Int(l), Value::Int(r)) => l.cmp(r),
        (Value::Float(l), Value::Float(r)) => l.total_cmp(r),
        (Value::Str(l), Value::Str(r)) => l.cmp(r),
        // Booleans have no ordering operators.
        _ => return Err(mismatch()),
    };
    let result = match op {
        "lt" => ordering == Ordering::Less,
        "le" => ordering != Ordering::Greater,
        "gt" => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    };
    Ok(Value::Bool(result))
}
