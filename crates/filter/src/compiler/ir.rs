use crate::engine::functions::Function;
use crate::error::FilterError;
use crate::model::{NodeKind, NodeTypeMask};
use crate::subexpr::SubExprId;
use compact_str::CompactString;
use std::fmt;
use string_cache::DefaultAtom as Atom;

/// Index of an opcode inside an [`OpcodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u32);

impl OpId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectAxis {
    SelfAxis,
    Child,
    Attribute,
    Descendant,
    DescendantOrSelf,
}

impl SelectAxis {
    pub const fn name(self) -> &'static str {
        match self {
            Self::SelfAxis => "self",
            Self::Child => "child",
            Self::Attribute => "attribute",
            Self::Descendant => "descendant",
            Self::DescendantOrSelf => "descendant-or-self",
        }
    }
}

/// Qualified-name test. `None` on either side is a wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QNameTest {
    pub ns: Option<Atom>,
    pub local: Option<Atom>,
}

impl QNameTest {
    pub const ANY: Self = Self { ns: None, local: None };

    pub fn exact(ns: &str, local: &str) -> Self {
        Self { ns: Some(Atom::from(ns)), local: Some(Atom::from(local)) }
    }

    pub fn is_exact(&self) -> bool {
        self.ns.is_some() && self.local.is_some()
    }

    pub fn is_wildcard(&self) -> bool {
        self.ns.is_none() && self.local.is_none()
    }

    /// Exact name, then namespace wildcard, then local wildcard, then full wildcard.
    pub fn matches(&self, ns: &str, local: &str) -> bool {
        match (&self.ns, &self.local) {
            (Some(n), Some(l)) => l.as_ref() == local && n.as_ref() == ns,
            (None, Some(l)) => l.as_ref() == local,
            (Some(n), None) => n.as_ref() == ns,
            (None, None) => true,
        }
    }
}

impl fmt::Display for QNameTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) if ns.is_empty() => {}
            Some(ns) => write!(f, "{{{ns}}}")?,
            None => f.write_str("*:")?,
        }
        match &self.local {
            Some(local) => f.write_str(local),
            None => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectCriteria {
    pub axis: SelectAxis,
    pub mask: NodeTypeMask,
    /// Applied to named kinds only (elements, attributes, processing instructions).
    pub test: QNameTest,
}

impl SelectCriteria {
    pub fn matches_kind(&self, kind: NodeKind) -> bool {
        self.mask.contains(kind)
    }
}

impl fmt::Display for SelectCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::", self.axis.name())?;
        if self.mask == NodeTypeMask::ELEMENT || self.mask == NodeTypeMask::ATTRIBUTE {
            write!(f, "{}", self.test)
        } else if self.mask == NodeTypeMask::TEXT {
            f.write_str("text()")
        } else if self.mask == NodeTypeMask::COMMENT {
            f.write_str("comment()")
        } else if self.mask == NodeTypeMask::PROCESSING_INSTRUCTION {
            write!(f, "processing-instruction({})", self.test)
        } else {
            f.write_str("node()")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelOp {
    /// The operator that gives the same result with swapped operands.
    pub const fn swapped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => other,
        }
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Op {
    PushString(CompactString),
    PushNumber(f64),
    PushBool(bool),
    /// Push the root node once per iteration.
    PushRoot,
    /// Push the current context node once per iteration.
    PushContextNode,
    Select(SelectCriteria),
    /// Open a context frame over every node of the sequences on top of the value stack.
    PushContext,
    /// Keep the nodes whose predicate value holds, close the context frame.
    ApplyFilter,
    /// Merge per-context-node sequences back into one sequence per input, close the frame.
    Gather,
    Compare(RelOp),
    Arith(ArithOp),
    Negate,
    Union,
    ToBoolean,
    /// Jump past `target` when every iteration's top boolean equals `when`.
    BranchIfAll { when: bool, target: OpId },
    Logical(LogicalOp),
    Call { func: Function, argc: usize },
    SubExprRef(SubExprId),
}

impl Op {
    /// Exact structural equality: same kind and same payload. Numbers compare by bit pattern.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::PushString(a), Self::PushString(b)) => a == b,
            (Self::PushNumber(a), Self::PushNumber(b)) => a.to_bits() == b.to_bits(),
            (Self::PushBool(a), Self::PushBool(b)) => a == b,
            (Self::Select(a), Self::Select(b)) => a == b,
            (Self::Compare(a), Self::Compare(b)) => a == b,
            (Self::Arith(a), Self::Arith(b)) => a == b,
            (Self::BranchIfAll { when: a, .. }, Self::BranchIfAll { when: b, .. }) => a == b,
            (Self::Logical(a), Self::Logical(b)) => a == b,
            (Self::Call { func: fa, argc: na }, Self::Call { func: fb, argc: nb }) => fa == fb && na == nb,
            (Self::SubExprRef(a), Self::SubExprRef(b)) => a == b,
            (Self::PushRoot, Self::PushRoot)
            | (Self::PushContextNode, Self::PushContextNode)
            | (Self::PushContext, Self::PushContext)
            | (Self::ApplyFilter, Self::ApplyFilter)
            | (Self::Gather, Self::Gather)
            | (Self::Negate, Self::Negate)
            | (Self::Union, Self::Union)
            | (Self::ToBoolean, Self::ToBoolean) => true,
            _ => false,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::PushString(_) => "push.string",
            Self::PushNumber(_) => "push.number",
            Self::PushBool(_) => "push.bool",
            Self::PushRoot => "push.root",
            Self::PushContextNode => "push.context-node",
            Self::Select(_) => "select",
            Self::PushContext => "context.push",
            Self::ApplyFilter => "context.filter",
            Self::Gather => "context.gather",
            Self::Compare(_) => "compare",
            Self::Arith(_) => "arith",
            Self::Negate => "negate",
            Self::Union => "union",
            Self::ToBoolean => "to-boolean",
            Self::BranchIfAll { .. } => "branch.if-all",
            Self::Logical(_) => "logical",
            Self::Call { .. } => "call",
            Self::SubExprRef(_) => "subexpr",
        }
    }

    fn default_flags(&self) -> OpFlags {
        match self {
            Self::PushString(_) | Self::PushNumber(_) | Self::PushBool(_) => OpFlags::LITERAL,
            Self::PushRoot => OpFlags::STARTER,
            Self::Call { func, argc: 0 } if func.is_node_set_starter() => OpFlags::STARTER,
            Self::Select(_) => OpFlags::SELECT,
            Self::BranchIfAll { .. } => OpFlags::BRANCH,
            _ => OpFlags::NONE,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        match self {
            Self::PushString(s) => write!(f, " {s:?}"),
            Self::PushNumber(n) => write!(f, " {n}"),
            Self::PushBool(b) => write!(f, " {b}"),
            Self::Select(criteria) => write!(f, " {criteria}"),
            Self::Compare(op) => write!(f, " {}", op.symbol()),
            Self::Arith(op) => write!(f, " {op:?}"),
            Self::BranchIfAll { when, target } => write!(f, " {when} -> after {target}"),
            Self::Logical(op) => write!(f, " {op:?}"),
            Self::Call { func, argc } => write!(f, " {}#{argc}", func.name()),
            Self::SubExprRef(id) => write!(f, " {id}"),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpFlags(u8);

impl OpFlags {
    pub const NONE: Self = Self(0);
    pub const LITERAL: Self = Self(1);
    pub const SELECT: Self = Self(1 << 1);
    /// A self/child select directly after another select; fused into its predecessor's walk.
    pub const COMPRESSIBLE: Self = Self(1 << 2);
    pub const STARTER: Self = Self(1 << 3);
    pub const BRANCH: Self = Self(1 << 4);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    fn with(self, other: Self, on: bool) -> Self {
        if on { Self(self.0 | other.0) } else { Self(self.0 & !other.0) }
    }
}

#[derive(Debug, Clone)]
pub struct Opcode {
    pub op: Op,
    pub flags: OpFlags,
    pub prev: Option<OpId>,
    pub next: Option<OpId>,
}

impl Opcode {
    pub fn is_starter(&self) -> bool {
        self.flags.contains(OpFlags::STARTER)
    }

    pub fn is_select(&self) -> bool {
        self.flags.contains(OpFlags::SELECT)
    }

    pub fn is_compressible(&self) -> bool {
        self.flags.contains(OpFlags::COMPRESSIBLE)
    }
}

/// A doubly linked run of opcodes inside an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chain {
    pub head: Option<OpId>,
    pub tail: Option<OpId>,
}

impl Chain {
    pub const EMPTY: Self = Self { head: None, tail: None };

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Slot storage for opcodes shared by every chain of a table.
#[derive(Debug, Clone, Default)]
pub struct OpcodeArena {
    slots: Vec<Option<Opcode>>,
    free: Vec<OpId>,
}

impl OpcodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live opcodes.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn alloc(&mut self, op: Op) -> OpId {
        let code = Opcode { flags: op.default_flags(), op, prev: None, next: None };
        if let Some(id) = self.free.pop() {
            self.slots[id.index()] = Some(code);
            id
        } else {
            let id = OpId(u32::try_from(self.slots.len()).unwrap_or(u32::MAX));
            self.slots.push(Some(code));
            id
        }
    }

    pub fn get(&self, id: OpId) -> Result<&Opcode, FilterError> {
        self.slots.get(id.index()).and_then(Option::as_ref).ok_or(FilterError::Internal("dangling opcode id"))
    }

    pub fn get_mut(&mut self, id: OpId) -> Result<&mut Opcode, FilterError> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut).ok_or(FilterError::Internal("dangling opcode id"))
    }

    pub fn free(&mut self, id: OpId) {
        if let Some(slot) = self.slots.get_mut(id.index())
            && slot.take().is_some()
        {
            self.free.push(id);
        }
    }

    pub fn free_chain(&mut self, chain: Chain) {
        let mut cursor = chain.head;
        while let Some(id) = cursor {
            cursor = self.get(id).ok().and_then(|code| code.next);
            self.free(id);
        }
    }

    pub fn append(&mut self, chain: &mut Chain, op: Op) -> OpId {
        let id = self.alloc(op);
        if let Some(tail) = chain.tail
            && let Some(Some(code)) = self.slots.get_mut(tail.index())
        {
            code.next = Some(id);
            if let Some(Some(new)) = self.slots.get_mut(id.index()) {
                new.prev = Some(tail);
            }
        } else {
            chain.head = Some(id);
        }
        chain.tail = Some(id);
        id
    }

    pub fn iter(&self, chain: Chain) -> ChainIter<'_> {
        ChainIter { arena: self, cursor: chain.head }
    }

    /// Replace the run `first..=last` of `chain` with the single opcode `replacement` and
    /// return the detached run as its own chain.
    pub fn replace_run(&mut self, chain: &mut Chain, first: OpId, last: OpId, replacement: OpId) -> Result<Chain, FilterError> {
        let prev = self.get(first)?.prev;
        let next = self.get(last)?.next;
        {
            let code = self.get_mut(replacement)?;
            code.prev = prev;
            code.next = next;
        }
        match prev {
            Some(p) => self.get_mut(p)?.next = Some(replacement),
            None => chain.head = Some(replacement),
        }
        match next {
            Some(n) => self.get_mut(n)?.prev = Some(replacement),
            None => chain.tail = Some(replacement),
        }
        self.get_mut(first)?.prev = None;
        self.get_mut(last)?.next = None;
        Ok(Chain { head: Some(first), tail: Some(last) })
    }

    /// Cut `chain` after `at`; `chain` keeps the front, the remainder is returned.
    pub fn split_after(&mut self, chain: &mut Chain, at: OpId) -> Result<Chain, FilterError> {
        let Some(rest_head) = self.get(at)?.next else {
            return Ok(Chain::EMPTY);
        };
        self.get_mut(at)?.next = None;
        self.get_mut(rest_head)?.prev = None;
        let rest = Chain { head: Some(rest_head), tail: chain.tail };
        chain.tail = Some(at);
        Ok(rest)
    }

    /// Link `back` after `front`.
    pub fn concat(&mut self, front: Chain, back: Chain) -> Result<Chain, FilterError> {
        match (front.tail, back.head) {
            (None, _) => Ok(back),
            (_, None) => Ok(front),
            (Some(tail), Some(head)) => {
                self.get_mut(tail)?.next = Some(head);
                self.get_mut(head)?.prev = Some(tail);
                Ok(Chain { head: front.head, tail: back.tail })
            }
        }
    }

    /// Recompute the compressible flag: a self/child select directly preceded by a select.
    pub fn refresh_flags(&mut self, chain: Chain) -> Result<(), FilterError> {
        let mut previous_select = false;
        let mut cursor = chain.head;
        while let Some(id) = cursor {
            let code = self.get_mut(id)?;
            let compressible = previous_select
                && matches!(&code.op, Op::Select(c) if matches!(c.axis, SelectAxis::Child | SelectAxis::SelfAxis));
            code.flags = code.flags.with(OpFlags::COMPRESSIBLE, compressible);
            previous_select = code.is_select();
            cursor = code.next;
        }
        Ok(())
    }

    pub fn display(&self, chain: Chain) -> ChainDisplay<'_> {
        ChainDisplay { arena: self, chain }
    }
}

pub struct ChainIter<'a> {
    arena: &'a OpcodeArena,
    cursor: Option<OpId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (OpId, &'a Opcode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let code = self.arena.get(id).ok()?;
        self.cursor = code.next;
        Some((id, code))
    }
}

/// IR dump: one `id: op` line per opcode.
pub struct ChainDisplay<'a> {
    arena: &'a OpcodeArena,
    chain: Chain,
}

impl fmt::Display for ChainDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, code) in self.arena.iter(self.chain) {
            let marker = if code.is_compressible() { "~" } else { " " };
            writeln!(f, "{id}:{marker}{}", code.op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(axis: SelectAxis, local: &str) -> Op {
        Op::Select(SelectCriteria { axis, mask: NodeTypeMask::ELEMENT, test: QNameTest::exact("", local) })
    }

    #[test]
    fn numeric_literals_compare_by_bits() {
        assert!(Op::PushNumber(f64::NAN).same_as(&Op::PushNumber(f64::NAN)));
        assert!(!Op::PushNumber(0.0).same_as(&Op::PushNumber(-0.0)));
        assert!(!Op::PushString("a".into()).same_as(&Op::PushString("b".into())));
        assert!(!Op::PushRoot.same_as(&Op::PushContextNode));
    }

    #[test]
    fn qname_tests_in_specificity_order() {
        let exact = QNameTest::exact("urn:1", "foo");
        let any_ns = QNameTest { ns: None, local: Some(Atom::from("foo")) };
        let any_local = QNameTest { ns: Some(Atom::from("urn:1")), local: None };
        assert!(exact.matches("urn:1", "foo") && !exact.matches("urn:2", "foo"));
        assert!(any_ns.matches("urn:2", "foo") && !any_ns.matches("urn:1", "bar"));
        assert!(any_local.matches("urn:1", "bar") && !any_local.matches("", "foo"));
        assert!(QNameTest::ANY.matches("", ""));
    }

    #[test]
    fn replace_run_and_split_relink_neighbours() {
        let mut arena = OpcodeArena::new();
        let mut chain = Chain::EMPTY;
        let root = arena.append(&mut chain, Op::PushRoot);
        let a = arena.append(&mut chain, select(SelectAxis::Child, "a"));
        let b = arena.append(&mut chain, select(SelectAxis::Child, "b"));
        let tail = arena.append(&mut chain, Op::ToBoolean);
        arena.refresh_flags(chain).unwrap();
        assert!(!arena.get(a).unwrap().is_compressible());
        assert!(arena.get(b).unwrap().is_compressible());

        let marker = arena.alloc(Op::PushBool(true));
        let run = arena.replace_run(&mut chain, root, b, marker).unwrap();
        let ids: Vec<_> = arena.iter(chain).map(|(id, _)| id).collect();
        assert_eq!(ids, vec![marker, tail]);
        assert_eq!(arena.iter(run).count(), 3);

        let mut front = run;
        let back = arena.split_after(&mut front, root).unwrap();
        assert_eq!(arena.iter(front).count(), 1);
        assert_eq!(arena.iter(back).map(|(id, _)| id).collect::<Vec<_>>(), vec![a, b]);
        let joined = arena.concat(front, back).unwrap();
        assert_eq!(arena.iter(joined).count(), 3);

        let live = arena.len();
        arena.free_chain(joined);
        assert_eq!(arena.len(), live - 3);
        let reused = arena.alloc(Op::Negate);
        assert!([root, a, b].contains(&reused));
    }
}
