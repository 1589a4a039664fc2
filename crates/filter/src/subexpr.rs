//! Common-subexpression elimination across the filters of one table.
//!
//! Every expression starter (`/` or a zero-argument node-set message function) opens a run of
//! plain selects. Runs are detached from their filter chain and stored in a forest keyed by
//! structural equality, so filters with the same leading path share one node per common
//! prefix. The filter chain keeps a [`Op::SubExprRef`] in place of the run.
//!
//! Each forest node owns one variable slot. During evaluation the slot caches the node's
//! result for the current message; a miss evaluates the parent first and then the node's own
//! chain from the parent's result.

use crate::compiler::ir::{Chain, Op, OpId, OpcodeArena, SelectAxis};
use crate::consts::{ENVELOPE, HEADER, SOAP11_NS, SOAP12_NS};
use crate::engine::Function;
use crate::error::FilterError;
use crate::model::NodeTypeMask;
use compact_str::CompactString;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubExprId(u32);

impl SubExprId {
    const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SubExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direct children of a header node that test one exact element name, keyed by
/// namespace and then local name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderIndex {
    names: HashMap<CompactString, HashMap<CompactString, SubExprId>>,
}

impl HeaderIndex {
    pub fn lookup(&self, ns: &str, local: &str) -> Option<SubExprId> {
        self.names.get(ns).and_then(|locals| locals.get(local)).copied()
    }

    pub fn contains(&self, id: SubExprId) -> bool {
        self.iter().any(|child| child == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = SubExprId> + '_ {
        self.names.values().flat_map(HashMap::values).copied()
    }

    pub fn len(&self) -> usize {
        self.names.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn insert(&mut self, ns: &str, local: &str, id: SubExprId) {
        self.names.entry(ns.into()).or_default().insert(local.into(), id);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubExprKind {
    #[default]
    Plain,
    /// The node selects the SOAP `Header` element; its indexed children fill in one pass.
    Header(HeaderIndex),
}

#[derive(Debug, Clone)]
pub struct SubExpr {
    var: usize,
    refs: usize,
    chain: Chain,
    parent: Option<SubExprId>,
    children: Vec<SubExprId>,
    kind: SubExprKind,
}

impl SubExpr {
    pub fn var(&self) -> usize {
        self.var
    }

    /// Number of filter references passing through this node.
    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn parent(&self) -> Option<SubExprId> {
        self.parent
    }

    pub fn children(&self) -> &[SubExprId] {
        &self.children
    }

    pub fn kind(&self) -> &SubExprKind {
        &self.kind
    }

    pub fn header_index(&self) -> Option<&HeaderIndex> {
        match &self.kind {
            SubExprKind::Header(index) => Some(index),
            SubExprKind::Plain => None,
        }
    }
}

/// Storage for shared subexpressions. Ids stay stable while a node lives.
#[derive(Debug, Clone, Default)]
pub struct SubExprForest {
    nodes: Vec<Option<SubExpr>>,
    free: Vec<SubExprId>,
    roots: Vec<SubExprId>,
    var_count: usize,
}

const DANGLING: FilterError = FilterError::Internal("dangling subexpression id");

impl SubExprForest {
    pub fn get(&self, id: SubExprId) -> Result<&SubExpr, FilterError> {
        self.nodes.get(id.index()).and_then(Option::as_ref).ok_or(DANGLING)
    }

    fn get_mut(&mut self, id: SubExprId) -> Result<&mut SubExpr, FilterError> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut).ok_or(DANGLING)
    }

    /// Variable slots a processing context needs for this forest.
    pub fn var_count(&self) -> usize {
        self.var_count
    }

    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn roots(&self) -> &[SubExprId] {
        &self.roots
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubExprId, &SubExpr)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, node)| node.as_ref().map(|node| (SubExprId(u32::try_from(index).unwrap_or(u32::MAX)), node)))
    }

    fn insert(&mut self, chain: Chain, parent: Option<SubExprId>, refs: usize) -> SubExprId {
        let node = SubExpr { var: self.var_count, refs, chain, parent, children: Vec::new(), kind: SubExprKind::Plain };
        self.var_count += 1;
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.index()] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                SubExprId(u32::try_from(self.nodes.len() - 1).unwrap_or(u32::MAX))
            }
        }
    }

    fn delete(&mut self, id: SubExprId) -> Option<SubExpr> {
        let node = self.nodes.get_mut(id.index()).and_then(Option::take)?;
        self.free.push(id);
        Some(node)
    }

    fn siblings_mut(&mut self, parent: Option<SubExprId>) -> Result<&mut Vec<SubExprId>, FilterError> {
        match parent {
            Some(parent) => Ok(&mut self.get_mut(parent)?.children),
            None => Ok(&mut self.roots),
        }
    }

    /// Ops along the path from the forest root to `id`, root first.
    fn path_ops<'a>(&self, arena: &'a OpcodeArena, id: SubExprId) -> Result<Vec<&'a Op>, FilterError> {
        let mut chains = Vec::new();
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            let sub = self.get(node)?;
            chains.push(sub.chain);
            cursor = sub.parent;
        }
        Ok(chains.iter().rev().flat_map(|chain| arena.iter(*chain).map(|(_, code)| &code.op)).collect())
    }
}

/// Shares leading paths between the filters registered under keys of type `K`.
#[derive(Debug, Clone)]
pub struct SubExprEliminator<K> {
    forest: SubExprForest,
    filters: HashMap<K, Vec<SubExprId>>,
}

impl<K> Default for SubExprEliminator<K> {
    fn default() -> Self {
        Self { forest: SubExprForest::default(), filters: HashMap::new() }
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> SubExprEliminator<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forest(&self) -> &SubExprForest {
        &self.forest
    }

    pub fn contains(&self, key: &K) -> bool {
        self.filters.contains_key(key)
    }

    /// Subexpressions referenced by the filter, in chain order.
    pub fn terminals(&self, key: &K) -> &[SubExprId] {
        self.filters.get(key).map_or(&[], Vec::as_slice)
    }

    /// Detach every starter run of `chain` into the shared forest.
    pub fn add(&mut self, key: K, arena: &mut OpcodeArena, chain: &mut Chain) -> Result<(), FilterError> {
        if self.filters.contains_key(&key) {
            return Err(FilterError::DuplicateFilter);
        }
        let mut terminals = Vec::new();
        let mut cursor = chain.head;
        while let Some(id) = cursor {
            let code = arena.get(id)?;
            if !code.is_starter() {
                cursor = code.next;
                continue;
            }
            let mut last = id;
            let mut next = code.next;
            while let Some(candidate) = next {
                let code = arena.get(candidate)?;
                if !code.is_select() {
                    break;
                }
                last = candidate;
                next = code.next;
            }
            let placeholder = arena.alloc(Op::PushBool(false));
            let run = arena.replace_run(chain, id, last, placeholder)?;
            let terminal = self.find_or_create(arena, run)?;
            arena.get_mut(placeholder)?.op = Op::SubExprRef(terminal);
            terminals.push(terminal);
            cursor = next;
        }
        for &terminal in &terminals {
            let mut up = Some(terminal);
            while let Some(node) = up {
                let sub = self.forest.get_mut(node)?;
                sub.refs += 1;
                up = sub.parent;
            }
        }
        arena.refresh_flags(*chain)?;
        trace!(?key, shared = terminals.len(), nodes = self.forest.len(), "subexpressions added");
        self.filters.insert(key, terminals);
        self.refresh_kinds(arena)
    }

    /// Walk the forest along `run`, sharing every matching prefix. Matched opcodes of the run
    /// are freed; the unmatched tail becomes a new node.
    fn find_or_create(&mut self, arena: &mut OpcodeArena, run: Chain) -> Result<SubExprId, FilterError> {
        let ops: Vec<OpId> = arena.iter(run).map(|(id, _)| id).collect();
        let mut parent: Option<SubExprId> = None;
        let mut pos = 0;
        loop {
            let candidates = match parent {
                Some(p) => self.forest.get(p)?.children.clone(),
                None => self.forest.roots.clone(),
            };
            let wanted = &arena.get(ops[pos])?.op;
            let mut found = None;
            for candidate in candidates {
                let head = self.forest.get(candidate)?.chain.head.ok_or(DANGLING)?;
                if arena.get(head)?.op.same_as(wanted) {
                    found = Some(candidate);
                    break;
                }
            }

            let Some(node) = found else {
                if let Some(&first) = ops.get(pos)
                    && pos > 0
                {
                    arena.get_mut(first)?.prev = None;
                }
                let tail = Chain { head: Some(ops[pos]), tail: ops.last().copied() };
                let id = self.forest.insert(tail, parent, 0);
                self.forest.siblings_mut(parent)?.push(id);
                trace!(%id, ?parent, ops = ops.len() - pos, "subexpression created");
                return Ok(id);
            };

            let node_ops: Vec<OpId> = arena.iter(self.forest.get(node)?.chain).map(|(id, _)| id).collect();
            let mut matched = 0;
            while matched < node_ops.len()
                && pos + matched < ops.len()
                && arena.get(node_ops[matched])?.op.same_as(&arena.get(ops[pos + matched])?.op)
            {
                matched += 1;
            }
            for &op in &ops[pos..pos + matched] {
                arena.free(op);
            }
            pos += matched;

            let shared = if matched == node_ops.len() { node } else { self.split(arena, node, node_ops[matched - 1])? };
            if pos == ops.len() {
                return Ok(shared);
            }
            parent = Some(shared);
        }
    }

    /// Cut `node`'s chain after `at`. The front moves to a new parent; `node` keeps its id.
    fn split(&mut self, arena: &mut OpcodeArena, node: SubExprId, at: OpId) -> Result<SubExprId, FilterError> {
        let (mut front, old_parent, refs) = {
            let sub = self.forest.get(node)?;
            (sub.chain, sub.parent, sub.refs)
        };
        let back = arena.split_after(&mut front, at)?;
        let new_parent = self.forest.insert(front, old_parent, refs);
        self.forest.get_mut(new_parent)?.children.push(node);
        {
            let sub = self.forest.get_mut(node)?;
            sub.chain = back;
            sub.parent = Some(new_parent);
        }
        for slot in self.forest.siblings_mut(old_parent)?.iter_mut() {
            if *slot == node {
                *slot = new_parent;
            }
        }
        trace!(%node, %new_parent, "subexpression split");
        Ok(new_parent)
    }

    /// Drop the filter's references, prune unreferenced nodes, merge pass-through parents and
    /// renumber variable slots. Returns `false` when the key was not registered.
    pub fn remove(&mut self, key: &K, arena: &mut OpcodeArena) -> Result<bool, FilterError> {
        let Some(terminals) = self.filters.remove(key) else {
            return Ok(false);
        };
        for &terminal in &terminals {
            let mut up = Some(terminal);
            while let Some(node) = up {
                let sub = self.forest.get_mut(node)?;
                sub.refs = sub.refs.checked_sub(1).ok_or(FilterError::Internal("subexpression reference underflow"))?;
                up = sub.parent;
            }
        }
        for &terminal in &terminals {
            let mut up = Some(terminal);
            while let Some(node) = up {
                let Ok(sub) = self.forest.get(node) else { break };
                up = sub.parent;
                if sub.refs == 0 {
                    self.prune(arena, node)?;
                }
            }
        }
        self.merge_pass_through(arena)?;
        self.renumber();
        trace!(?key, nodes = self.forest.len(), vars = self.forest.var_count, "subexpressions removed");
        self.refresh_kinds(arena)?;
        Ok(true)
    }

    fn prune(&mut self, arena: &mut OpcodeArena, id: SubExprId) -> Result<(), FilterError> {
        let Some(node) = self.forest.delete(id) else {
            return Ok(());
        };
        self.forest.siblings_mut(node.parent)?.retain(|&child| child != id);
        arena.free_chain(node.chain);
        for child in node.children {
            if let Ok(orphan) = self.forest.get_mut(child) {
                orphan.parent = None;
            }
            self.prune(arena, child)?;
        }
        Ok(())
    }

    fn merge_pass_through(&mut self, arena: &mut OpcodeArena) -> Result<(), FilterError> {
        loop {
            let candidate = self.forest.iter().find_map(|(id, node)| match node.children.as_slice() {
                [only] => self.forest.get(*only).ok().filter(|child| child.refs == node.refs).map(|_| (id, *only)),
                _ => None,
            });
            let Some((parent, child)) = candidate else {
                return Ok(());
            };
            let removed = self.forest.delete(parent).ok_or(DANGLING)?;
            let child_chain = self.forest.get(child)?.chain;
            let merged = arena.concat(removed.chain, child_chain)?;
            {
                let sub = self.forest.get_mut(child)?;
                sub.chain = merged;
                sub.parent = removed.parent;
            }
            for slot in self.forest.siblings_mut(removed.parent)?.iter_mut() {
                if *slot == parent {
                    *slot = child;
                }
            }
            trace!(%parent, %child, "subexpression merged into child");
        }
    }

    fn renumber(&mut self) {
        let mut next = 0;
        for node in self.forest.nodes.iter_mut().flatten() {
            node.var = next;
            next += 1;
        }
        self.forest.var_count = next;
    }

    fn refresh_kinds(&mut self, arena: &OpcodeArena) -> Result<(), FilterError> {
        let ids: Vec<SubExprId> = self.forest.iter().map(|(id, _)| id).collect();
        for id in ids {
            let kind = if is_header_path(&self.forest.path_ops(arena, id)?) {
                let mut index = HeaderIndex::default();
                for &child in &self.forest.get(id)?.children {
                    let mut ops = arena.iter(self.forest.get(child)?.chain);
                    if let (Some((_, code)), None) = (ops.next(), ops.next())
                        && let Op::Select(criteria) = &code.op
                        && criteria.axis == SelectAxis::Child
                        && criteria.mask == NodeTypeMask::ELEMENT
                        && let (Some(ns), Some(local)) = (&criteria.test.ns, &criteria.test.local)
                    {
                        index.insert(ns, local, child);
                    }
                }
                SubExprKind::Header(index)
            } else {
                SubExprKind::Plain
            };
            self.forest.get_mut(id)?.kind = kind;
        }
        Ok(())
    }
}

fn exact_child<'a>(op: &'a Op, local: &str) -> Option<&'a str> {
    match op {
        Op::Select(c)
            if c.axis == SelectAxis::Child
                && c.mask == NodeTypeMask::ELEMENT
                && c.test.local.as_ref().is_some_and(|l| l.as_ref() == local) =>
        {
            c.test.ns.as_deref()
        }
        _ => None,
    }
}

/// `/soap:Envelope/soap:Header` for either envelope version, or `sm:header()`.
fn is_header_path(ops: &[&Op]) -> bool {
    match ops {
        [Op::Call { func: Function::Header, argc: 0 }] => true,
        [Op::PushRoot, envelope, header] => match (exact_child(envelope, ENVELOPE), exact_child(header, HEADER)) {
            (Some(a), Some(b)) => a == b && (a == SOAP11_NS || a == SOAP12_NS),
            _ => false,
        },
        _ => false,
    }
}
