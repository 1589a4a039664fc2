use super::{FilterTable, Hit, TableOptions, mismatch};
use crate::compiler::compile_filter;
use crate::compiler::ir::{Chain, Op, OpcodeArena, RelOp};
use crate::engine::{Function, ScratchPool, Vm};
use crate::error::{FilterError, Result};
use crate::filter::{Filter, FilterKind};
use crate::message::MatchTarget;
use crate::model::{NodePos, QuotaNavigator};
use crate::subexpr::{SubExprEliminator, SubExprForest, SubExprId};
use crate::trie::Trie;
use compact_str::CompactString;
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

const TABLE: &str = "xpath";

/// How a registered filter is answered at match time.
#[derive(Debug, Clone)]
enum Branch {
    /// Run the filter's chain.
    General,
    /// `path = 'literal'`: any selected node with that string value.
    Equals { subexpr: SubExprId, literal: CompactString },
    /// `starts-with(path, 'literal')`: the first selected node's string value.
    StartsWith { subexpr: SubExprId, literal: CompactString },
}

#[derive(Debug, Default)]
struct LiteralIndex {
    equals: HashMap<CompactString, Vec<Filter>>,
    prefixes: Trie<Vec<Filter>>,
}

impl LiteralIndex {
    fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.prefixes.is_empty()
    }
}

#[derive(Debug)]
struct Entry<T> {
    data: T,
    chain: Chain,
    seq: u64,
    branch: Branch,
}

/// Holds XPath filters compiled into one shared opcode arena.
///
/// Leading location paths are shared between filters through a [`SubExprEliminator`], so each
/// distinct path is walked at most once per message. Filters of the form `path = 'literal'`
/// and `starts-with(path, 'literal')` are not evaluated one by one: the path is selected once
/// and its string values are looked up in a hash map or prefix trie.
///
/// Every filter runs against a fresh copy of the node quota. Reusing a shared result charges
/// the steps it originally cost, so a filter exhausts the quota here exactly when it would on
/// its own.
#[derive(Debug)]
pub struct XPathFilterTable<T> {
    options: TableOptions,
    arena: OpcodeArena,
    eliminator: SubExprEliminator<Filter>,
    entries: HashMap<Filter, Entry<T>>,
    general: Vec<Filter>,
    literals: HashMap<SubExprId, LiteralIndex>,
    scratch: ScratchPool,
    next_seq: u64,
}

impl<T> Default for XPathFilterTable<T> {
    fn default() -> Self {
        Self::new(TableOptions::default())
    }
}

impl<T> XPathFilterTable<T> {
    pub fn new(options: TableOptions) -> Self {
        debug!(node_quota = %options.node_quota, "xpath filter table created");
        Self {
            options,
            arena: OpcodeArena::new(),
            eliminator: SubExprEliminator::new(),
            entries: HashMap::new(),
            general: Vec::new(),
            literals: HashMap::new(),
            scratch: ScratchPool::new(options.scratch_capacity),
            next_seq: 0,
        }
    }

    pub fn options(&self) -> TableOptions {
        self.options
    }

    pub fn arena(&self) -> &OpcodeArena {
        &self.arena
    }

    pub fn subexprs(&self) -> &SubExprForest {
        self.eliminator.forest()
    }

    pub fn scratch(&self) -> &ScratchPool {
        &self.scratch
    }

    /// The filter's chain after subexpression elimination.
    pub fn chain(&self, filter: &Filter) -> Option<Chain> {
        self.entries.get(filter).map(|e| e.chain)
    }

    /// Number of filters answered through the literal index instead of evaluation.
    pub fn indexed_len(&self) -> usize {
        self.entries.len() - self.general.len()
    }

    fn index(&mut self, filter: &Filter, branch: &Branch) {
        match branch {
            Branch::General => self.general.push(filter.clone()),
            Branch::Equals { subexpr, literal } => {
                let index = self.literals.entry(*subexpr).or_default();
                index.equals.entry(literal.clone()).or_default().push(filter.clone());
            }
            Branch::StartsWith { subexpr, literal } => {
                let index = self.literals.entry(*subexpr).or_default();
                index.prefixes.add(literal, Vec::new).push(filter.clone());
            }
        }
    }

    fn unindex(&mut self, filter: &Filter, branch: &Branch) {
        match branch {
            Branch::General => self.general.retain(|f| f != filter),
            Branch::Equals { subexpr, literal } => {
                if let Some(index) = self.literals.get_mut(subexpr) {
                    if let Some(filters) = index.equals.get_mut(literal) {
                        filters.retain(|f| f != filter);
                        if filters.is_empty() {
                            index.equals.remove(literal);
                        }
                    }
                    if index.is_empty() {
                        self.literals.remove(subexpr);
                    }
                }
            }
            Branch::StartsWith { subexpr, literal } => {
                if let Some(index) = self.literals.get_mut(subexpr) {
                    if let Some(filters) = index.prefixes.find_mut(literal) {
                        filters.retain(|f| f != filter);
                        if filters.is_empty() {
                            index.prefixes.remove(literal);
                        }
                    }
                    if index.is_empty() {
                        self.literals.remove(subexpr);
                    }
                }
            }
        }
    }

    fn run<'a, M: MatchTarget>(&'a self, target: &M, hits: &mut Vec<&'a Filter>) -> Result<()> {
        let mut nav = QuotaNavigator::new(target.navigator(), self.options.node_quota);
        let mut ctx = self.scratch.acquire();
        let mut vm = Vm::new(&self.arena, &mut ctx, &mut nav).with_subexprs(self.eliminator.forest());
        vm.begin()?;

        let mut nodes: Vec<NodePos> = Vec::new();
        for (&subexpr, index) in &self.literals {
            vm.navigator().reset_quota();
            vm.set_label("literal index");
            nodes.clear();
            guard(vm.subexpr_nodes(subexpr, &mut nodes), None)?;
            if !index.equals.is_empty() {
                for &pos in &nodes {
                    let value = vm.string_value(pos)?;
                    if let Some(filters) = index.equals.get(value.as_str()) {
                        hits.extend(filters);
                    }
                }
            }
            if !index.prefixes.is_empty() {
                let first = match nodes.first() {
                    Some(&pos) => vm.string_value(pos)?,
                    None => CompactString::default(),
                };
                for (_, filters) in index.prefixes.collect_prefixes(&first) {
                    hits.extend(filters);
                }
            }
        }

        for filter in &self.general {
            let Some(entry) = self.entries.get(filter) else {
                return Err(FilterError::Internal("general filter without table entry"));
            };
            vm.navigator().reset_quota();
            if let FilterKind::XPath(xpath) = filter.kind() {
                vm.set_label(xpath.xpath());
            }
            if guard(vm.evaluate_bool(entry.chain), Some(filter))? {
                hits.push(filter);
            }
        }
        Ok(())
    }

    fn seq(&self, filter: &Filter) -> u64 {
        self.entries.get(filter).map_or(u64::MAX, |e| e.seq)
    }
}

fn guard<R>(result: Result<R>, filter: Option<&Filter>) -> Result<R> {
    if let Err(FilterError::QuotaExceeded { max }) = &result {
        match filter {
            Some(filter) => warn!(%filter, max, "node quota exceeded, match aborted"),
            None => warn!(max, "node quota exceeded in literal index, match aborted"),
        }
    }
    result
}

/// Recognize chains answerable from the literal index.
fn classify(arena: &OpcodeArena, chain: Chain) -> Branch {
    let ops: SmallVec<[&Op; 5]> = arena.iter(chain).map(|(_, code)| &code.op).collect();
    match ops.as_slice() {
        [Op::SubExprRef(subexpr), Op::PushString(literal), Op::Compare(RelOp::Eq), Op::ToBoolean]
        | [Op::PushString(literal), Op::SubExprRef(subexpr), Op::Compare(RelOp::Eq), Op::ToBoolean] => {
            Branch::Equals { subexpr: *subexpr, literal: literal.clone() }
        }
        [
            Op::SubExprRef(subexpr),
            Op::PushString(literal),
            Op::Call { func: Function::StartsWith, argc: 2 },
            Op::ToBoolean,
        ] => Branch::StartsWith { subexpr: *subexpr, literal: literal.clone() },
        _ => Branch::General,
    }
}

impl<T> FilterTable<T> for XPathFilterTable<T> {
    fn add(&mut self, filter: Filter, data: T) -> Result<()> {
        let FilterKind::XPath(xpath) = filter.kind() else {
            return Err(mismatch(TABLE, &filter));
        };
        if self.entries.contains_key(&filter) {
            return Err(FilterError::DuplicateFilter);
        }
        let mut chain = compile_filter(xpath.xpath(), xpath.namespaces(), &mut self.arena)?;
        if let Err(err) = self.eliminator.add(filter.clone(), &mut self.arena, &mut chain) {
            self.arena.free_chain(chain);
            return Err(err);
        }
        let branch = classify(&self.arena, chain);
        trace!(%filter, ?branch, "xpath filter indexed");
        self.index(&filter, &branch);
        let seq = self.next_seq;
        self.next_seq += 1;
        debug!(%filter, filters = self.entries.len() + 1, subexprs = self.eliminator.forest().len(), "xpath filter added");
        self.entries.insert(filter, Entry { data, chain, seq, branch });
        Ok(())
    }

    fn remove(&mut self, filter: &Filter) -> Result<Option<T>> {
        let Some(entry) = self.entries.remove(filter) else {
            return Ok(None);
        };
        self.unindex(filter, &entry.branch);
        self.eliminator.remove(filter, &mut self.arena)?;
        self.arena.free_chain(entry.chain);
        debug!(%filter, filters = self.entries.len(), subexprs = self.eliminator.forest().len(), "xpath filter removed");
        Ok(Some(entry.data))
    }

    fn clear(&mut self) {
        self.arena = OpcodeArena::new();
        self.eliminator = SubExprEliminator::new();
        self.entries.clear();
        self.general.clear();
        self.literals.clear();
        debug!("xpath filter table cleared");
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(&self, filter: &Filter) -> Option<&T> {
        self.entries.get(filter).map(|e| &e.data)
    }

    fn collect_matching<'a, M: MatchTarget>(&'a self, target: &M, out: &mut Vec<Hit<'a, T>>) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let mut hits = Vec::new();
        self.run(target, &mut hits)?;
        hits.sort_by_key(|f| self.seq(f));
        hits.dedup();
        for filter in hits {
            if let Some(entry) = self.entries.get(filter) {
                out.push((filter, &entry.data));
            }
        }
        Ok(())
    }
}
