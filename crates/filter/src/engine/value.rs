use super::Fault;
use crate::error::FilterError;
use crate::model::{Navigator, NodePos};
use compact_str::{CompactString, format_compact};

/// Handle to a pooled [`NodeSequence`]. Stale handles are detected through the generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeqRef {
    index: u32,
    generation: u32,
}

#[derive(Debug, Default)]
pub struct NodeSequence {
    items: Vec<NodePos>,
    refs: u32,
    generation: u32,
}

impl NodeSequence {
    pub fn items(&self) -> &[NodePos] {
        &self.items
    }
}

/// Reusable node sequences for one evaluation context.
#[derive(Debug, Default)]
pub struct SequencePool {
    slots: Vec<NodeSequence>,
    free: Vec<u32>,
}

impl SequencePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh empty sequence with one reference.
    pub fn acquire(&mut self) -> Result<SeqRef, FilterError> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index =
                    u32::try_from(self.slots.len()).map_err(|_| FilterError::Internal("sequence pool exhausted"))?;
                self.slots.push(NodeSequence::default());
                index
            }
        };
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(FilterError::Internal("free list points past the pool"))?;
        slot.items.clear();
        slot.refs = 1;
        Ok(SeqRef { index, generation: slot.generation })
    }

    pub fn from_items(&mut self, items: &[NodePos]) -> Result<SeqRef, FilterError> {
        let seq = self.acquire()?;
        self.items_mut(seq)?.extend_from_slice(items);
        Ok(seq)
    }

    fn slot(&self, seq: SeqRef) -> Result<&NodeSequence, FilterError> {
        match self.slots.get(seq.index as usize) {
            Some(slot) if slot.generation == seq.generation && slot.refs > 0 => Ok(slot),
            _ => Err(FilterError::Internal("stale sequence reference")),
        }
    }

    fn slot_mut(&mut self, seq: SeqRef) -> Result<&mut NodeSequence, FilterError> {
        match self.slots.get_mut(seq.index as usize) {
            Some(slot) if slot.generation == seq.generation && slot.refs > 0 => Ok(slot),
            _ => Err(FilterError::Internal("stale sequence reference")),
        }
    }

    pub fn get(&self, seq: SeqRef) -> Result<&[NodePos], FilterError> {
        self.slot(seq).map(NodeSequence::items)
    }

    /// Mutable access for the owner of a freshly acquired sequence.
    pub fn items_mut(&mut self, seq: SeqRef) -> Result<&mut Vec<NodePos>, FilterError> {
        self.slot_mut(seq).map(|slot| &mut slot.items)
    }

    pub fn add_ref(&mut self, seq: SeqRef, count: usize) -> Result<(), FilterError> {
        let slot = self.slot_mut(seq)?;
        slot.refs = slot.refs.saturating_add(u32::try_from(count).unwrap_or(u32::MAX));
        Ok(())
    }

    pub fn release(&mut self, seq: SeqRef) -> Result<(), FilterError> {
        let slot = self.slot_mut(seq)?;
        slot.refs -= 1;
        if slot.refs == 0 {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(seq.index);
        }
        Ok(())
    }

    /// Release the sequence held by `value`, if any.
    pub fn release_value(&mut self, value: &Value) -> Result<(), FilterError> {
        match value {
            Value::Sequence(seq) => self.release(*seq),
            _ => Ok(()),
        }
    }

    /// Sequences currently referenced.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Return every slot to the free list. Outstanding handles become stale.
    pub fn reset(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            if slot.refs > 0 {
                slot.refs = 0;
                slot.generation = slot.generation.wrapping_add(1);
            }
            slot.items.clear();
            self.free.push(u32::try_from(index).unwrap_or(u32::MAX));
        }
    }
}

/// One operand on the value stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Number(f64),
    String(CompactString),
    Sequence(SeqRef),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Sequence(_) => "node-set",
        }
    }

    pub fn sequence(&self) -> Result<SeqRef, FilterError> {
        match self {
            Self::Sequence(seq) => Ok(*seq),
            other => Err(FilterError::UnsupportedType(format!("expected a node-set, found a {}", other.type_name()))),
        }
    }

    pub fn to_boolean(&self, pool: &SequencePool) -> Result<bool, FilterError> {
        Ok(match self {
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Sequence(seq) => !pool.get(*seq)?.is_empty(),
        })
    }

    pub fn to_number<N: Navigator>(&self, pool: &SequencePool, nav: &mut N) -> Result<f64, Fault> {
        Ok(match self {
            Self::Boolean(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => string_to_number(s),
            Self::Sequence(_) => string_to_number(&self.to_xpath_string(pool, nav)?),
        })
    }

    pub fn to_xpath_string<N: Navigator>(&self, pool: &SequencePool, nav: &mut N) -> Result<CompactString, Fault> {
        Ok(match self {
            Self::Boolean(b) => CompactString::const_new(if *b { "true" } else { "false" }),
            Self::Number(n) => number_to_string(*n),
            Self::String(s) => s.clone(),
            Self::Sequence(seq) => match pool.get(*seq)?.first() {
                Some(&pos) => node_string(nav, pos)?,
                None => CompactString::default(),
            },
        })
    }
}

/// String value of the node at `pos`. Seeking is free, so this never charges quota.
pub fn node_string<N: Navigator>(nav: &mut N, pos: NodePos) -> Result<CompactString, Fault> {
    nav.set_position(pos)?;
    Ok(nav.string_value()?)
}

pub(crate) fn is_xml_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// XPath `number(string)`: optional minus, digits with at most one point, surrounding
/// whitespace. Anything else is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(is_xml_whitespace);
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut seen_digit = false;
    let mut seen_point = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_point => seen_point = true,
            _ => return f64::NAN,
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

pub fn number_to_string(n: f64) -> CompactString {
    if n.is_nan() {
        CompactString::const_new("NaN")
    } else if n.is_infinite() {
        CompactString::const_new(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n == 0.0 {
        CompactString::const_new("0")
    } else {
        format_compact!("{n}")
    }
}

/// Evaluation result handed to callers; sequences are copied out of the pool.
#[derive(Debug, Clone, PartialEq)]
pub enum XPathResult {
    Boolean(bool),
    Number(f64),
    String(CompactString),
    NodeSet(Vec<NodePos>),
}

impl XPathResult {
    pub fn to_boolean(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::NodeSet(nodes) => !nodes.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("12", 12.0)]
    #[case(" -3.5\n", -3.5)]
    #[case(".5", 0.5)]
    #[case("7.", 7.0)]
    fn numbers_parse(#[case] input: &str, #[case] expected: f64) {
        assert_eq!(string_to_number(input), expected);
    }

    #[rstest]
    #[case("")]
    #[case("+1")]
    #[case("1e3")]
    #[case("1.2.3")]
    #[case("-")]
    #[case("abc")]
    fn non_numbers_are_nan(#[case] input: &str) {
        assert!(string_to_number(input).is_nan());
    }

    #[rstest]
    #[case(f64::NAN, "NaN")]
    #[case(f64::INFINITY, "Infinity")]
    #[case(f64::NEG_INFINITY, "-Infinity")]
    #[case(-0.0, "0")]
    #[case(42.0, "42")]
    #[case(0.25, "0.25")]
    #[case(-1.5, "-1.5")]
    fn numbers_format(#[case] input: f64, #[case] expected: &str) {
        assert_eq!(number_to_string(input), expected);
    }

    #[test]
    fn released_sequences_go_stale() {
        let mut pool = SequencePool::new();
        let seq = pool.from_items(&[1, 2]).unwrap();
        pool.add_ref(seq, 1).unwrap();
        pool.release(seq).unwrap();
        assert_eq!(pool.get(seq).unwrap(), &[1, 2]);
        pool.release(seq).unwrap();
        assert!(matches!(pool.get(seq), Err(FilterError::Internal(_))));
        assert_eq!(pool.live(), 0);

        let reused = pool.acquire().unwrap();
        assert_ne!(reused, seq);
        assert!(pool.get(reused).unwrap().is_empty());
    }

    #[test]
    fn reset_invalidates_everything() {
        let mut pool = SequencePool::new();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.reset();
        assert_eq!(pool.live(), 0);
        assert!(pool.get(a).is_err());
        assert!(pool.release(b).is_err());
    }

    #[test]
    fn boolean_coercions() {
        let mut pool = SequencePool::new();
        let empty = Value::Sequence(pool.acquire().unwrap());
        assert!(!empty.to_boolean(&pool).unwrap());
        assert!(!Value::Number(f64::NAN).to_boolean(&pool).unwrap());
        assert!(Value::String("false".into()).to_boolean(&pool).unwrap());
        assert!(!Value::String(CompactString::default()).to_boolean(&pool).unwrap());
    }
}
