use super::Fault;
use super::value::{SequencePool, Value, node_string, string_to_number};
use crate::compiler::ir::RelOp;
use crate::model::Navigator;
use compact_str::CompactString;

/// A single comparable value, after node-sets have been broken up.
enum Atomic {
    Bool(bool),
    Num(f64),
    Str(CompactString),
}

impl Atomic {
    fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Num(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
        }
    }

    fn as_number(&self) -> f64 {
        match self {
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Num(n) => *n,
            Self::Str(s) => string_to_number(s),
        }
    }
}

fn compare_atomic(op: RelOp, left: &Atomic, right: &Atomic) -> bool {
    match op {
        RelOp::Eq | RelOp::Ne => {
            let equal = match (left, right) {
                (Atomic::Bool(_), _) | (_, Atomic::Bool(_)) => left.as_bool() == right.as_bool(),
                (Atomic::Num(_), _) | (_, Atomic::Num(_)) => left.as_number() == right.as_number(),
                (Atomic::Str(a), Atomic::Str(b)) => a == b,
            };
            if op == RelOp::Eq { equal } else { !equal }
        }
        RelOp::Lt => left.as_number() < right.as_number(),
        RelOp::Le => left.as_number() <= right.as_number(),
        RelOp::Gt => left.as_number() > right.as_number(),
        RelOp::Ge => left.as_number() >= right.as_number(),
    }
}

fn scalar(value: &Value) -> Option<Atomic> {
    match value {
        Value::Boolean(b) => Some(Atomic::Bool(*b)),
        Value::Number(n) => Some(Atomic::Num(*n)),
        Value::String(s) => Some(Atomic::Str(s.clone())),
        Value::Sequence(_) => None,
    }
}

/// XPath 1.0 general comparison.
pub(crate) fn compare_values<N: Navigator>(
    op: RelOp,
    left: &Value,
    right: &Value,
    pool: &SequencePool,
    nav: &mut N,
) -> Result<bool, Fault> {
    match (left, right) {
        (Value::Sequence(a), Value::Sequence(b)) => {
            let rights = pool
                .get(*b)?
                .iter()
                .map(|&pos| node_string(nav, pos).map(Atomic::Str))
                .collect::<Result<Vec<_>, _>>()?;
            for &pos in pool.get(*a)? {
                let l = Atomic::Str(node_string(nav, pos)?);
                if rights.iter().any(|r| compare_atomic(op, &l, r)) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        (Value::Sequence(seq), other) => compare_node_set(op, *seq, other, pool, nav),
        (other, Value::Sequence(seq)) => compare_node_set(op.swapped(), *seq, other, pool, nav),
        _ => match (scalar(left), scalar(right)) {
            (Some(l), Some(r)) => Ok(compare_atomic(op, &l, &r)),
            _ => Ok(false),
        },
    }
}

/// `node-set op scalar`; callers swap the operator when the node-set is on the right.
fn compare_node_set<N: Navigator>(
    op: RelOp,
    seq: super::value::SeqRef,
    other: &Value,
    pool: &SequencePool,
    nav: &mut N,
) -> Result<bool, Fault> {
    let nodes = pool.get(seq)?;
    if let Value::Boolean(b) = other {
        return Ok(compare_atomic(op, &Atomic::Bool(!nodes.is_empty()), &Atomic::Bool(*b)));
    }
    let Some(other) = scalar(other) else {
        return Ok(false);
    };
    for &pos in nodes {
        let text = node_string(nav, pos)?;
        let node = match other {
            Atomic::Num(_) => Atomic::Num(string_to_number(&text)),
            _ => Atomic::Str(text),
        };
        if compare_atomic(op, &node, &other) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn s(v: &str) -> Atomic {
        Atomic::Str(v.into())
    }

    #[rstest]
    #[case(RelOp::Eq, Atomic::Num(1.0), s("1"), true)]
    #[case(RelOp::Eq, Atomic::Bool(true), s("x"), true)]
    #[case(RelOp::Eq, s("a"), s("a"), true)]
    #[case(RelOp::Ne, Atomic::Num(f64::NAN), Atomic::Num(f64::NAN), true)]
    #[case(RelOp::Eq, Atomic::Num(f64::NAN), Atomic::Num(f64::NAN), false)]
    #[case(RelOp::Lt, s("2"), s("10"), true)]
    #[case(RelOp::Ge, Atomic::Bool(true), Atomic::Num(1.0), true)]
    #[case(RelOp::Lt, s("abc"), Atomic::Num(1.0), false)]
    fn scalar_comparisons(#[case] op: RelOp, #[case] left: Atomic, #[case] right: Atomic, #[case] expected: bool) {
        assert_eq!(compare_atomic(op, &left, &right), expected);
    }
}
