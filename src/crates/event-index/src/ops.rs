//! Relational operators and curried predicates.

use event_core::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A relational operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    NotIn,
    Match,
    NotMatch,
}

impl RelOp {
    /// The operator with inverted polarity.
    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Equal => RelOp::NotEqual,
            RelOp::NotEqual => RelOp::Equal,
            RelOp::Less => RelOp::GreaterEqual,
            RelOp::LessEqual => RelOp::Greater,
            RelOp::Greater => RelOp::LessEqual,
            RelOp::GreaterEqual => RelOp::Less,
            RelOp::In => RelOp::NotIn,
            RelOp::NotIn => RelOp::In,
            RelOp::Match => RelOp::NotMatch,
            RelOp::NotMatch => RelOp::Match,
        }
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelOp::Equal => "==",
            RelOp::NotEqual => "!=",
            RelOp::Less => "<",
            RelOp::LessEqual => "<=",
            RelOp::Greater => ">",
            RelOp::GreaterEqual => ">=",
            RelOp::In => "in",
            RelOp::NotIn => "!in",
            RelOp::Match => "~",
            RelOp::NotMatch => "!~",
        };
        write!(f, "{}", s)
    }
}

/// A predicate stripped of its extractor: only the operator and the
/// right-hand side remain, to be evaluated against a specific column index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurriedPredicate {
    pub op: RelOp,
    pub rhs: Value,
}

impl CurriedPredicate {
    pub fn new(op: RelOp, rhs: Value) -> Self {
        Self { op, rhs }
    }
}

impl fmt::Display for CurriedPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.rhs)
    }
}

fn matches_pattern(subject: &str, pattern: &str) -> bool {
    // Patterns match the whole subject.
    match regex::Regex::new(&format!("^(?:{})$", pattern)) {
        Ok(re) => re.is_match(subject),
        Err(_) => false,
    }
}

/// Evaluate `lhs op rhs` over plain values.
///
/// This is the scalar counterpart of an index lookup, used for the `#type`
/// short-circuit and for meta-index pruning. Kind mismatches and operators
/// without meaning for the operand kinds evaluate to `false`.
pub fn evaluate_value(lhs: &Value, op: RelOp, rhs: &Value) -> bool {
    match op {
        RelOp::Equal => match (lhs, rhs) {
            (Value::Str(s), Value::Pattern(p)) => matches_pattern(s, p),
            _ => lhs == rhs,
        },
        RelOp::NotEqual => !evaluate_value(lhs, RelOp::Equal, rhs),
        RelOp::Less => lhs.partial_cmp_same(rhs) == Some(Ordering::Less),
        RelOp::LessEqual => matches!(
            lhs.partial_cmp_same(rhs),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        RelOp::Greater => lhs.partial_cmp_same(rhs) == Some(Ordering::Greater),
        RelOp::GreaterEqual => matches!(
            lhs.partial_cmp_same(rhs),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        RelOp::In => match (lhs, rhs) {
            (_, Value::Vector(xs)) | (_, Value::Set(xs)) => {
                xs.iter().any(|x| evaluate_value(lhs, RelOp::Equal, x))
            }
            (Value::Address(addr), Value::Subnet(net)) => net.contains(addr),
            (Value::Subnet(inner), Value::Subnet(outer)) => outer.contains_subnet(inner),
            (Value::Str(needle), Value::Str(haystack)) => haystack.contains(needle.as_str()),
            _ => false,
        },
        RelOp::NotIn => !evaluate_value(lhs, RelOp::In, rhs),
        RelOp::Match => match (lhs, rhs) {
            (Value::Str(s), Value::Pattern(p)) => matches_pattern(s, p),
            _ => false,
        },
        RelOp::NotMatch => !evaluate_value(lhs, RelOp::Match, rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_core::Subnet;

    #[test]
    fn scalar_comparisons() {
        assert!(evaluate_value(&Value::Count(3), RelOp::Less, &Value::Count(5)));
        assert!(!evaluate_value(&Value::Count(3), RelOp::Less, &Value::Int(5)));
        assert!(evaluate_value(
            &Value::from("http"),
            RelOp::Equal,
            &Value::from("http")
        ));
        assert!(evaluate_value(
            &Value::from("http"),
            RelOp::NotEqual,
            &Value::from("dns")
        ));
    }

    #[test]
    fn membership() {
        let set = Value::Set(vec![Value::Count(1), Value::Count(2)]);
        assert!(evaluate_value(&Value::Count(2), RelOp::In, &set));
        assert!(evaluate_value(&Value::Count(3), RelOp::NotIn, &set));

        let net = Value::Subnet(Subnet::new("10.0.0.0".parse().unwrap(), 8));
        assert!(evaluate_value(
            &Value::Address("10.2.3.4".parse().unwrap()),
            RelOp::In,
            &net
        ));
    }

    #[test]
    fn pattern_matching_is_anchored() {
        let pattern = Value::Pattern("ht+p".into());
        assert!(evaluate_value(&Value::from("http"), RelOp::Match, &pattern));
        assert!(!evaluate_value(&Value::from("xhttp"), RelOp::Match, &pattern));
        assert!(evaluate_value(&Value::from("dns"), RelOp::NotMatch, &pattern));
    }

    #[test]
    fn operator_negation_round_trips() {
        for op in [
            RelOp::Equal,
            RelOp::NotEqual,
            RelOp::Less,
            RelOp::LessEqual,
            RelOp::Greater,
            RelOp::GreaterEqual,
            RelOp::In,
            RelOp::NotIn,
            RelOp::Match,
            RelOp::NotMatch,
        ] {
            assert_eq!(op.negate().negate(), op);
        }
    }
}
