//! # Scalar Expressions and Variables
//!
//! Plan nodes describe relational operators; this module describes the row-level
//! values flowing between them.
//!
//! ## Variables
//! Every column an operator produces is a `Variable`: a name that is unique within
//! the plan plus a `DataType`. Rules compare output schemas as *sets* of variables,
//! so two variables are the same column if and only if name and type are equal.
//!
//! ## Expressions
//! `Expr` is a recursive tree of variable references, literals, operators and
//! function calls. Conjunctions and disjunctions are stored as flat lists, which keeps
//! predicate splitting and merging (filter merging, predicate pushdown) simple.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Reference to a table in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Bigint,
    Double,
    Varchar,
    Date,
}

impl DataType {
    /// Fixed per-value width used when no column statistics are available.
    pub fn default_width(&self) -> f64 {
        match self {
            DataType::Boolean => 1.0,
            DataType::Bigint | DataType::Double => 8.0,
            DataType::Date => 4.0,
            DataType::Varchar => 24.0,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "boolean",
            DataType::Bigint => "bigint",
            DataType::Double => "double",
            DataType::Varchar => "varchar",
            DataType::Date => "date",
        };
        f.write_str(name)
    }
}

/// A named, typed column produced by a plan node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub data_type: DataType,
}

impl Variable {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// Reference this variable from an expression.
    pub fn to_expr(&self) -> Expr {
        Expr::Variable(self.clone())
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.data_type)
    }
}

/// Scalar value for expressions.
///
/// Uses `OrderedFloat` for `f64` so that literals can take part in Eq/Hash
/// comparisons (pattern predicates and structural plan equality rely on it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since 1970-01-01.
    Date(i32),
}

impl ScalarValue {
    /// Numeric view used by range estimates. Strings and booleans have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(v.into_inner()),
            Self::Date(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{}", v.into_inner()),
            Self::Utf8(v) => write!(f, "'{v}'"),
            Self::Date(v) => write!(f, "DATE {v}"),
        }
    }
}

/// Scalar expressions used in predicates, projections, join conditions, etc.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Variable(Variable),
    Literal(ScalarValue),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    /// Conjunction stored as a flat list.
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn literal_true() -> Self {
        Expr::Literal(ScalarValue::Bool(true))
    }

    pub fn literal_false() -> Self {
        Expr::Literal(ScalarValue::Bool(false))
    }

    pub fn equal(left: Expr, right: Expr) -> Self {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Literal(ScalarValue::Bool(true)))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Expr::Literal(ScalarValue::Bool(false)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Expr::Literal(ScalarValue::Null))
    }

    /// All variables referenced by this expression, in first-seen order.
    pub fn variables(&self) -> Vec<&Variable> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a Variable>) {
        match self {
            Expr::Variable(v) => {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_variables(out),
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_variables(out);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_variables(out);
                }
            }
        }
    }

    /// Names of the referenced variables.
    pub fn variable_names(&self) -> BTreeSet<String> {
        self.variables().into_iter().map(|v| v.name.clone()).collect()
    }

    /// Flatten AND-chains: (A AND (B AND C)) → [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Build a conjunction, dropping `true` terms. An empty input yields `true`.
    pub fn combine_conjuncts(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        let mut conjuncts: Vec<Expr> = Vec::new();
        for expr in exprs {
            for conjunct in expr.conjuncts() {
                if !conjunct.is_true() && !conjuncts.contains(conjunct) {
                    conjuncts.push(conjunct.clone());
                }
            }
        }
        match conjuncts.len() {
            0 => Expr::literal_true(),
            1 => conjuncts.remove(0),
            _ => Expr::And(conjuncts),
        }
    }

    /// `left = right` where both sides are variables.
    pub fn as_variable_equality(&self) -> Option<(&Variable, &Variable)> {
        match self {
            Expr::BinaryOp {
                op: BinaryOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Variable(l), Expr::Variable(r)) => Some((l, r)),
                _ => None,
            },
            _ => None,
        }
    }

    /// `variable = literal` in either orientation.
    pub fn as_constant_binding(&self) -> Option<(&Variable, &ScalarValue)> {
        match self {
            Expr::BinaryOp {
                op: BinaryOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Variable(v), Expr::Literal(c)) | (Expr::Literal(c), Expr::Variable(v))
                    if *c != ScalarValue::Null =>
                {
                    Some((v, c))
                }
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Variable(v) => f.write_str(&v.name),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "(NOT {operand})"),
                UnaryOp::Neg => write!(f, "(-{operand})"),
                UnaryOp::IsNull => write!(f, "({operand} IS NULL)"),
                UnaryOp::IsNotNull => write!(f, "({operand} IS NOT NULL)"),
            },
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                let sep = if matches!(self, Expr::And(_)) { " AND " } else { " OR " };
                f.write_str("(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// SQL join types.
///
/// Only Inner and Cross joins are symmetric; the others have fixed left/right
/// semantics and must never be commuted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    /// Left rows with at least one match on the right. Produces left columns only.
    Semi,
    /// Left rows with no match on the right. Produces left columns only.
    Anti,
    Cross,
}

impl JoinType {
    /// Whether the right side's columns appear in the join output.
    pub fn outputs_right(&self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Aggregate function call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggExpr {
    pub func: AggFunc,
    pub arg: Expr,
    pub distinct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
    pub nulls_first: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Variable {
        Variable::new(name, DataType::Bigint)
    }

    #[test]
    fn test_combine_conjuncts_drops_true() {
        let a = Expr::equal(var("a").to_expr(), var("b").to_expr());
        let combined = Expr::combine_conjuncts(vec![Expr::literal_true(), a.clone()]);
        assert_eq!(combined, a);
        assert!(Expr::combine_conjuncts(Vec::new()).is_true());
    }

    #[test]
    fn test_combine_conjuncts_flattens() {
        let a = Expr::equal(var("a").to_expr(), var("b").to_expr());
        let b = Expr::binary(BinaryOp::Gt, var("c").to_expr(), Expr::Literal(ScalarValue::Int64(3)));
        let nested = Expr::And(vec![a.clone(), Expr::And(vec![b.clone(), a.clone()])]);
        assert_eq!(Expr::combine_conjuncts(vec![nested]), Expr::And(vec![a, b]));
    }

    #[test]
    fn test_variables_are_deduplicated() {
        let e = Expr::And(vec![
            Expr::equal(var("a").to_expr(), var("b").to_expr()),
            Expr::binary(BinaryOp::Lt, var("a").to_expr(), Expr::Literal(ScalarValue::Int64(1))),
        ]);
        let names: Vec<_> = e.variables().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_constant_binding_either_side() {
        let lit = Expr::Literal(ScalarValue::Int64(5));
        let e = Expr::equal(lit.clone(), var("x").to_expr());
        let (v, c) = e.as_constant_binding().unwrap();
        assert_eq!(v.name, "x");
        assert_eq!(*c, ScalarValue::Int64(5));
        assert!(Expr::equal(var("x").to_expr(), Expr::Literal(ScalarValue::Null))
            .as_constant_binding()
            .is_none());
    }

    #[test]
    fn test_display() {
        let e = Expr::And(vec![
            Expr::equal(var("a").to_expr(), var("b").to_expr()),
            Expr::UnaryOp {
                op: UnaryOp::IsNull,
                operand: Box::new(var("c").to_expr()),
            },
        ]);
        assert_eq!(e.to_string(), "((a = b) AND (c IS NULL))");
    }
}
