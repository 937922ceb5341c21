//! Boolean predicate expressions over event fields.
//!
//! An [`Expression`] is an arbitrary AND/OR/NOT tree whose leaves are
//! [`Predicate`]s. A predicate pairs an extractor (the left-hand side) with a
//! relational operator and a value. Expressions are resolved per layout by
//! [`crate::Partition::eval`], which binds extractors to concrete columns.

use crate::ops::{CurriedPredicate, RelOp};
use event_core::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The left-hand side of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Extractor {
    /// A concrete field, referenced by bare or `<layout>.<field>` name.
    Field(String),
    /// The `#type` attribute: matches the layout name.
    Type,
    /// The `#timestamp` attribute: redirected to the column of timestamp type
    /// bearing the `timestamp` attribute.
    Timestamp,
}

impl fmt::Display for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extractor::Field(name) => write!(f, "{}", name),
            Extractor::Type => write!(f, "#type"),
            Extractor::Timestamp => write!(f, "#timestamp"),
        }
    }
}

/// A single relational predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub lhs: Extractor,
    pub op: RelOp,
    pub rhs: Value,
}

impl Predicate {
    pub fn new(lhs: Extractor, op: RelOp, rhs: Value) -> Self {
        Self { lhs, op, rhs }
    }

    /// Drop the extractor, leaving only `(op, rhs)`.
    pub fn curried(&self) -> CurriedPredicate {
        CurriedPredicate::new(self.op, self.rhs.clone())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// A boolean expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Conjunction(Vec<Expression>),
    Disjunction(Vec<Expression>),
    Negation(Box<Expression>),
    Predicate(Predicate),
}

impl Expression {
    /// A predicate on a named field.
    pub fn field(name: impl Into<String>, op: RelOp, rhs: impl Into<Value>) -> Self {
        Expression::Predicate(Predicate::new(Extractor::Field(name.into()), op, rhs.into()))
    }

    /// A predicate on the `#type` attribute.
    pub fn type_(op: RelOp, rhs: impl Into<Value>) -> Self {
        Expression::Predicate(Predicate::new(Extractor::Type, op, rhs.into()))
    }

    /// A predicate on the `#timestamp` attribute.
    pub fn timestamp(op: RelOp, rhs: impl Into<Value>) -> Self {
        Expression::Predicate(Predicate::new(Extractor::Timestamp, op, rhs.into()))
    }

    /// Combine expressions with AND logic, flattening nested conjunctions.
    pub fn and(exprs: Vec<Expression>) -> Self {
        let mut flattened = Vec::new();
        for expr in exprs {
            match expr {
                Expression::Conjunction(inner) => flattened.extend(inner),
                other => flattened.push(other),
            }
        }
        match flattened.len() {
            1 => flattened.into_iter().next().unwrap(),
            _ => Expression::Conjunction(flattened),
        }
    }

    /// Combine expressions with OR logic, flattening nested disjunctions.
    pub fn or(exprs: Vec<Expression>) -> Self {
        let mut flattened = Vec::new();
        for expr in exprs {
            match expr {
                Expression::Disjunction(inner) => flattened.extend(inner),
                other => flattened.push(other),
            }
        }
        match flattened.len() {
            1 => flattened.into_iter().next().unwrap(),
            _ => Expression::Disjunction(flattened),
        }
    }

    /// Negate an expression.
    pub fn not(expr: Expression) -> Self {
        Expression::Negation(Box::new(expr))
    }

    /// Flatten the expression into its predicates, in depth-first order.
    ///
    /// The position of a predicate in the returned vector is its stable
    /// identity during evaluation: [`crate::Partition::eval`] and the
    /// evaluator both key predicate hits by it.
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.collect_predicates(&mut out);
        out
    }

    /// Number of predicates in this subtree.
    pub fn predicate_count(&self) -> usize {
        match self {
            Expression::Conjunction(xs) | Expression::Disjunction(xs) => {
                xs.iter().map(|x| x.predicate_count()).sum()
            }
            Expression::Negation(x) => x.predicate_count(),
            Expression::Predicate(_) => 1,
        }
    }

    fn collect_predicates<'a>(&'a self, out: &mut Vec<&'a Predicate>) {
        match self {
            Expression::Conjunction(xs) | Expression::Disjunction(xs) => {
                for x in xs {
                    x.collect_predicates(out);
                }
            }
            Expression::Negation(x) => x.collect_predicates(out),
            Expression::Predicate(pred) => out.push(pred),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Conjunction(xs) => {
                write!(f, "(")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " && ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, ")")
            }
            Expression::Disjunction(xs) => {
                write!(f, "(")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " || ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, ")")
            }
            Expression::Negation(x) => write!(f, "! {}", x),
            Expression::Predicate(pred) => write!(f, "{}", pred),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattening_preserves_depth_first_order() {
        let expr = Expression::and(vec![
            Expression::field("a", RelOp::Equal, 1u64),
            Expression::or(vec![
                Expression::field("b", RelOp::Less, 2u64),
                Expression::not(Expression::field("c", RelOp::Equal, 3u64)),
            ]),
        ]);
        let preds = expr.predicates();
        assert_eq!(preds.len(), 3);
        assert_eq!(preds[0].lhs, Extractor::Field("a".into()));
        assert_eq!(preds[1].lhs, Extractor::Field("b".into()));
        assert_eq!(preds[2].lhs, Extractor::Field("c".into()));
    }

    #[test]
    fn and_or_flatten_nested_trees() {
        let inner = Expression::and(vec![
            Expression::field("a", RelOp::Equal, 1u64),
            Expression::field("b", RelOp::Equal, 2u64),
        ]);
        let expr = Expression::and(vec![inner, Expression::field("c", RelOp::Equal, 3u64)]);
        match expr {
            Expression::Conjunction(xs) => assert_eq!(xs.len(), 3),
            other => panic!("expected flattened conjunction, got {}", other),
        }
    }

    #[test]
    fn single_element_combinators_collapse() {
        let expr = Expression::or(vec![Expression::field("a", RelOp::Equal, 1u64)]);
        assert!(matches!(expr, Expression::Predicate(_)));
    }

    #[test]
    fn display_renders_operators() {
        let expr = Expression::and(vec![
            Expression::field("service", RelOp::Equal, "http"),
            Expression::not(Expression::field("bytes", RelOp::Greater, 100u64)),
        ]);
        assert_eq!(expr.to_string(), r#"(service == "http" && ! bytes > 100)"#);
    }
}
