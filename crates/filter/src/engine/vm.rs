use super::Fault;
use super::compare::compare_values;
use super::context::{CachedSubExpr, ContextItem, ProcessingContext};
use super::functions;
use super::select::{select_fused, sort_dedup};
use super::value::{SeqRef, Value, XPathResult, node_string};
use crate::compiler::ir::{ArithOp, Chain, LogicalOp, Op, OpId, Opcode, OpcodeArena, SelectCriteria};
use crate::error::FilterError;
use crate::model::{Navigator, NodeKind, NodePos, QuotaNavigator};
use crate::subexpr::{SubExprForest, SubExprId};
use compact_str::CompactString;
use itertools::Itertools;
use smallvec::SmallVec;
use std::mem;

type OpResult = Result<Option<OpId>, Fault>;

/// Runs opcode chains against one message.
///
/// A `Vm` borrows the processing context and the quota navigator for the duration of one
/// message. [`begin`](Self::begin) must be called before the first evaluation; subexpression
/// results cached by earlier evaluations stay valid until the next `begin`.
pub struct Vm<'a, N: Navigator> {
    arena: &'a OpcodeArena,
    forest: Option<&'a SubExprForest>,
    ctx: &'a mut ProcessingContext,
    nav: &'a mut QuotaNavigator<N>,
    label: &'a str,
}

impl<'a, N: Navigator> Vm<'a, N> {
    pub fn new(arena: &'a OpcodeArena, ctx: &'a mut ProcessingContext, nav: &'a mut QuotaNavigator<N>) -> Self {
        Self { arena, forest: None, ctx, nav, label: "" }
    }

    #[must_use]
    pub fn with_subexprs(mut self, forest: &'a SubExprForest) -> Self {
        self.forest = Some(forest);
        self
    }

    /// Name used in navigator errors; usually the filter's expression text.
    #[must_use]
    pub fn with_label(mut self, label: &'a str) -> Self {
        self.label = label;
        self
    }

    pub fn set_label(&mut self, label: &'a str) {
        self.label = label;
    }

    pub fn navigator(&self) -> &QuotaNavigator<N> {
        self.nav
    }

    /// Reset per-message state: the root context frame and empty subexpression slots.
    pub fn begin(&mut self) -> Result<(), FilterError> {
        let root = self.nav.root_position();
        self.ctx.begin(root, self.forest.map_or(0, SubExprForest::var_count))
    }

    pub fn evaluate(&mut self, chain: Chain) -> Result<XPathResult, FilterError> {
        let value = self.run_to_value(chain)?;
        let result = match &value {
            Value::Boolean(b) => XPathResult::Boolean(*b),
            Value::Number(n) => XPathResult::Number(*n),
            Value::String(s) => XPathResult::String(s.clone()),
            Value::Sequence(seq) => XPathResult::NodeSet(self.ctx.pool.get(*seq)?.to_vec()),
        };
        self.ctx.pool.release_value(&value)?;
        Ok(result)
    }

    pub fn evaluate_bool(&mut self, chain: Chain) -> Result<bool, FilterError> {
        let value = self.run_to_value(chain)?;
        let result = value.to_boolean(&self.ctx.pool);
        self.ctx.pool.release_value(&value)?;
        result
    }

    /// Nodes selected by a shared subexpression, loading it if this message has not yet.
    pub fn subexpr_nodes(&mut self, id: SubExprId, out: &mut Vec<NodePos>) -> Result<(), FilterError> {
        let seq = self.load_subexpr(id, 1).map_err(|fault| fault.into_error(self.label, "subexpr"))?;
        out.extend_from_slice(self.ctx.pool.get(seq)?);
        self.ctx.pool.release(seq)
    }

    pub fn string_value(&mut self, pos: NodePos) -> Result<CompactString, FilterError> {
        node_string(self.nav, pos).map_err(|fault| fault.into_error(self.label, "string-value"))
    }

    fn run_to_value(&mut self, chain: Chain) -> Result<Value, FilterError> {
        self.run(chain)?;
        let mut out = mem::take(&mut self.ctx.scratch_values);
        self.ctx.values.pop_frame_into(&mut out)?;
        let value = match out.as_slice() {
            [_] => out.pop().ok_or(FilterError::Internal("empty result frame")),
            _ => Err(FilterError::Internal("result frame does not hold one value")),
        };
        out.clear();
        self.ctx.scratch_values = out;
        value
    }

    fn run(&mut self, chain: Chain) -> Result<(), FilterError> {
        let mut cursor = chain.head;
        while let Some(id) = cursor {
            let code = self.arena.get(id)?;
            cursor = self.exec(code).map_err(|fault| fault.into_error(self.label, code.op.name()))?;
        }
        Ok(())
    }

    fn exec(&mut self, code: &'a Opcode) -> OpResult {
        match &code.op {
            Op::PushString(s) => self.push_scalar(&Value::String(s.clone()))?,
            Op::PushNumber(n) => self.push_scalar(&Value::Number(*n))?,
            Op::PushBool(b) => self.push_scalar(&Value::Boolean(*b))?,
            Op::PushRoot => self.push_root()?,
            Op::PushContextNode => self.push_context_nodes()?,
            Op::Select(first) => return self.select(first, code.next),
            Op::PushContext => self.push_context()?,
            Op::ApplyFilter => self.apply_filter()?,
            Op::Gather => self.gather()?,
            Op::Compare(op) => {
                let op = *op;
                self.binary(|ctx, nav, l, r| Ok(Value::Boolean(compare_values(op, l, r, &ctx.pool, nav)?)))?;
            }
            Op::Arith(op) => {
                let op = *op;
                self.binary(|ctx, nav, l, r| {
                    let (a, b) = (l.to_number(&ctx.pool, nav)?, r.to_number(&ctx.pool, nav)?);
                    Ok(Value::Number(match op {
                        ArithOp::Add => a + b,
                        ArithOp::Sub => a - b,
                        ArithOp::Mul => a * b,
                        ArithOp::Div => a / b,
                        ArithOp::Mod => a % b,
                    }))
                })?;
            }
            Op::Logical(op) => {
                let op = *op;
                self.binary(|ctx, _, l, r| {
                    let (a, b) = (l.to_boolean(&ctx.pool)?, r.to_boolean(&ctx.pool)?);
                    Ok(Value::Boolean(match op {
                        LogicalOp::And => a && b,
                        LogicalOp::Or => a || b,
                    }))
                })?;
            }
            Op::Union => self.binary(|ctx, _, l, r| {
                let (a, b) = (ctx.pool.get(l.sequence()?)?, ctx.pool.get(r.sequence()?)?);
                let merged: Vec<NodePos> = a.iter().merge(b.iter()).dedup().copied().collect();
                Ok(Value::Sequence(ctx.pool.from_items(&merged)?))
            })?,
            Op::Negate => self.map_top(|ctx, nav, v| Ok(Value::Number(-v.to_number(&ctx.pool, nav)?)))?,
            Op::ToBoolean => self.map_top(|ctx, _, v| Ok(Value::Boolean(v.to_boolean(&ctx.pool)?)))?,
            Op::BranchIfAll { when, target } => {
                let decided = self.ctx.values.top()?.iter().all(|v| matches!(v, Value::Boolean(b) if b == when));
                if decided {
                    return Ok(self.arena.get(*target)?.next);
                }
            }
            Op::Call { func, argc } => self.call(*func, *argc)?,
            Op::SubExprRef(id) => self.push_subexpr(*id)?,
        }
        Ok(code.next)
    }

    fn push_scalar(&mut self, value: &Value) -> Result<(), Fault> {
        let n = self.ctx.iterations()?;
        self.ctx.values.push_frame();
        for _ in 0..n {
            self.ctx.values.push(value.clone())?;
        }
        Ok(())
    }

    fn push_shared(&mut self, seq: SeqRef, n: usize) -> Result<(), Fault> {
        self.ctx.values.push_frame();
        for _ in 0..n {
            self.ctx.values.push(Value::Sequence(seq))?;
        }
        Ok(())
    }

    fn push_root(&mut self) -> Result<(), Fault> {
        let n = self.ctx.iterations()?;
        if n == 0 {
            self.ctx.values.push_frame();
            return Ok(());
        }
        let seq = self.ctx.pool.from_items(&[self.nav.root_position()])?;
        self.ctx.pool.add_ref(seq, n - 1)?;
        self.push_shared(seq, n)
    }

    fn push_context_nodes(&mut self) -> Result<(), Fault> {
        let ctx = &mut *self.ctx;
        ctx.values.push_frame();
        let items = ctx.contexts.top()?;
        for item in items {
            let seq = ctx.pool.from_items(&[item.node])?;
            ctx.values.push(Value::Sequence(seq))?;
        }
        Ok(())
    }

    /// Evaluate a select plus any fused selects after it; returns the opcode after the run.
    fn select(&mut self, first: &'a SelectCriteria, next: Option<OpId>) -> OpResult {
        let mut rest: SmallVec<[&SelectCriteria; 4]> = SmallVec::new();
        let mut after = next;
        while let Some(id) = after {
            let code = self.arena.get(id)?;
            match &code.op {
                Op::Select(criteria) if code.is_compressible() => {
                    rest.push(criteria);
                    after = code.next;
                }
                _ => break,
            }
        }

        let ctx = &mut *self.ctx;
        let mut inputs = mem::take(&mut ctx.scratch_nodes);
        let mut walk = mem::take(&mut ctx.scratch_walk);
        let count = ctx.values.top()?.len();
        for index in 0..count {
            let old = ctx.values.top()?[index].sequence()?;
            inputs.clear();
            inputs.extend_from_slice(ctx.pool.get(old)?);
            let out = ctx.pool.acquire()?;
            select_fused(first, &rest, self.nav, &inputs, &mut walk, ctx.pool.items_mut(out)?)?;
            ctx.pool.release(old)?;
            ctx.values.top_mut()?[index] = Value::Sequence(out);
        }
        inputs.clear();
        walk.clear();
        ctx.scratch_nodes = inputs;
        ctx.scratch_walk = walk;
        Ok(after)
    }

    fn push_context(&mut self) -> Result<(), Fault> {
        let ctx = &mut *self.ctx;
        let mut items = mem::take(&mut ctx.scratch_items);
        for (group, value) in ctx.values.top()?.iter().enumerate() {
            let nodes = ctx.pool.get(value.sequence()?)?;
            let size = nodes.len();
            items.extend(nodes.iter().enumerate().map(|(i, &node)| ContextItem { node, position: i + 1, size, group }));
        }
        ctx.contexts.push_frame();
        for item in items.drain(..) {
            ctx.contexts.push(item)?;
        }
        ctx.scratch_items = items;
        Ok(())
    }

    /// Pop the predicate results and their context frame, then rebuild every input sequence
    /// from the nodes whose predicate held. A number predicate compares against the position.
    fn apply_filter(&mut self) -> Result<(), Fault> {
        let ctx = &mut *self.ctx;
        let mut predicates = mem::take(&mut ctx.scratch_values);
        let mut items = mem::take(&mut ctx.scratch_items);
        ctx.values.pop_frame_into(&mut predicates)?;
        ctx.contexts.pop_frame_into(&mut items)?;
        if predicates.len() != items.len() {
            return Err(FilterError::Internal("predicate frame does not match its context frame").into());
        }
        let count = ctx.values.top()?.len();
        let mut cursor = 0;
        for group in 0..count {
            let old = ctx.values.top()?[group].sequence()?;
            let out = ctx.pool.acquire()?;
            while let Some(item) = items.get(cursor).filter(|item| item.group == group) {
                let keep = match &predicates[cursor] {
                    #[allow(clippy::cast_precision_loss)]
                    Value::Number(n) => *n == item.position as f64,
                    other => other.to_boolean(&ctx.pool)?,
                };
                if keep {
                    ctx.pool.items_mut(out)?.push(item.node);
                }
                cursor += 1;
            }
            ctx.pool.release(old)?;
            ctx.values.top_mut()?[group] = Value::Sequence(out);
        }
        for value in predicates.drain(..) {
            ctx.pool.release_value(&value)?;
        }
        items.clear();
        ctx.scratch_values = predicates;
        ctx.scratch_items = items;
        Ok(())
    }

    /// Merge the per-context-node step results back into one sequence per input.
    fn gather(&mut self) -> Result<(), Fault> {
        let ctx = &mut *self.ctx;
        let mut results = mem::take(&mut ctx.scratch_values);
        let mut items = mem::take(&mut ctx.scratch_items);
        let mut merged = mem::take(&mut ctx.scratch_nodes);
        ctx.values.pop_frame_into(&mut results)?;
        ctx.contexts.pop_frame_into(&mut items)?;
        if results.len() != items.len() {
            return Err(FilterError::Internal("step frame does not match its context frame").into());
        }
        let count = ctx.values.top()?.len();
        let mut cursor = 0;
        for group in 0..count {
            merged.clear();
            while items.get(cursor).is_some_and(|item| item.group == group) {
                merged.extend_from_slice(ctx.pool.get(results[cursor].sequence()?)?);
                cursor += 1;
            }
            sort_dedup(&mut merged);
            let old = ctx.values.top()?[group].sequence()?;
            let out = ctx.pool.from_items(&merged)?;
            ctx.pool.release(old)?;
            ctx.values.top_mut()?[group] = Value::Sequence(out);
        }
        for value in results.drain(..) {
            ctx.pool.release_value(&value)?;
        }
        items.clear();
        merged.clear();
        ctx.scratch_values = results;
        ctx.scratch_items = items;
        ctx.scratch_nodes = merged;
        Ok(())
    }

    fn binary<F>(&mut self, mut f: F) -> Result<(), Fault>
    where
        F: FnMut(&mut ProcessingContext, &mut QuotaNavigator<N>, &Value, &Value) -> Result<Value, Fault>,
    {
        let n = self.ctx.iterations()?;
        let mut operands = mem::take(&mut self.ctx.scratch_values);
        self.ctx.values.pop_frames_into(2, &mut operands)?;
        if operands.len() != 2 * n {
            return Err(FilterError::Internal("operand frames do not match the iteration count").into());
        }
        self.ctx.values.push_frame();
        for i in 0..n {
            let value = f(self.ctx, self.nav, &operands[i], &operands[n + i])?;
            self.ctx.values.push(value)?;
        }
        for value in operands.drain(..) {
            self.ctx.pool.release_value(&value)?;
        }
        self.ctx.scratch_values = operands;
        Ok(())
    }

    fn map_top<F>(&mut self, mut f: F) -> Result<(), Fault>
    where
        F: FnMut(&mut ProcessingContext, &mut QuotaNavigator<N>, &Value) -> Result<Value, Fault>,
    {
        let count = self.ctx.values.top()?.len();
        for index in 0..count {
            let old = self.ctx.values.top()?[index].clone();
            let new = f(self.ctx, self.nav, &old)?;
            self.ctx.pool.release_value(&old)?;
            self.ctx.values.top_mut()?[index] = new;
        }
        Ok(())
    }

    fn call(&mut self, func: functions::Function, argc: usize) -> Result<(), Fault> {
        let n = self.ctx.iterations()?;
        let mut args = mem::take(&mut self.ctx.scratch_values);
        self.ctx.values.pop_frames_into(argc, &mut args)?;
        if args.len() != argc * n {
            return Err(FilterError::Internal("argument frames do not match the iteration count").into());
        }
        let ctx = &mut *self.ctx;
        ctx.values.push_frame();
        let mut current: SmallVec<[Value; 4]> = SmallVec::new();
        for i in 0..n {
            current.clear();
            current.extend((0..argc).map(|a| args[a * n + i].clone()));
            let item = ctx.contexts.top()?[i];
            let value = functions::call(func, &current, &item, &mut ctx.pool, self.nav)?;
            ctx.values.push(value)?;
        }
        for value in args.drain(..) {
            ctx.pool.release_value(&value)?;
        }
        ctx.scratch_values = args;
        Ok(())
    }

    fn push_subexpr(&mut self, id: SubExprId) -> Result<(), Fault> {
        let n = self.ctx.iterations()?;
        if n == 0 {
            self.ctx.values.push_frame();
            return Ok(());
        }
        let seq = self.load_subexpr(id, n)?;
        self.push_shared(seq, n)
    }

    /// Load a shared subexpression for `n` iterations and return it with `n` new references.
    ///
    /// Reuse charges the recorded cost once per iteration, so the quota sees the same total
    /// as evaluating the run separately for each reference.
    fn load_subexpr(&mut self, id: SubExprId, n: usize) -> Result<SeqRef, Fault> {
        let forest = self.forest.ok_or(FilterError::Internal("subexpression reference without a forest"))?;
        let node = forest.get(id)?;
        if let Some(cached) = self.ctx.cached(node.var()) {
            self.nav.increase_by(cached.cost.saturating_mul(n))?;
            self.ctx.pool.add_ref(cached.seq, n)?;
            return Ok(cached.seq);
        }

        let marker = self.nav.marker();
        let indexed_by = node.parent().filter(|&parent| {
            forest.get(parent).ok().and_then(|p| p.header_index()).is_some_and(|index| index.contains(id))
        });
        let cached = match indexed_by {
            Some(header) => {
                self.fill_header(forest, header)?;
                self.ctx.cached(node.var()).ok_or(FilterError::Internal("header fill missed an indexed child"))?
            }
            None => {
                let seed = match node.parent() {
                    Some(parent) => Some(self.load_subexpr(parent, 1)?),
                    None => None,
                };
                let seq = self.run_isolated(node.chain(), seed)?;
                let cached = CachedSubExpr { seq, cost: self.nav.elapsed(marker) };
                self.ctx.vars[node.var()] = Some(cached);
                cached
            }
        };
        self.nav.increase_by(cached.cost.saturating_mul(n - 1))?;
        self.ctx.pool.add_ref(cached.seq, n)?;
        Ok(cached.seq)
    }

    /// One pass over the header's children fills every indexed child at once. Each child
    /// records the cost of the header plus the scan, the same as selecting it on its own.
    fn fill_header(&mut self, forest: &SubExprForest, header_id: SubExprId) -> Result<(), Fault> {
        let header = forest.get(header_id)?;
        let index = header.header_index().ok_or(FilterError::Internal("header fill on a plain subexpression"))?;
        let parent_seq = self.load_subexpr(header_id, 1)?;
        let parent_cost = self.ctx.cached(header.var()).map_or(0, |c| c.cost);

        let mut slots: SmallVec<[(SubExprId, usize, SeqRef); 8]> = SmallVec::new();
        for child in index.iter() {
            let var = forest.get(child)?.var();
            if self.ctx.cached(var).is_none() {
                slots.push((child, var, self.ctx.pool.acquire()?));
            }
        }

        let marker = self.nav.marker();
        let parents = self.ctx.pool.get(parent_seq)?.to_vec();
        for parent in parents {
            self.nav.set_position(parent)?;
            if !self.nav.move_to_first_child()? {
                continue;
            }
            loop {
                if self.nav.kind() == NodeKind::Element
                    && let Some(child) = index.lookup(self.nav.namespace_uri(), self.nav.local_name())
                    && let Some((_, _, seq)) = slots.iter().find(|(id, _, _)| *id == child)
                {
                    self.ctx.pool.items_mut(*seq)?.push(self.nav.position());
                }
                if !self.nav.move_to_next()? {
                    break;
                }
            }
        }
        let cost = parent_cost + self.nav.elapsed(marker);
        for (_, var, seq) in slots {
            self.ctx.vars[var] = Some(CachedSubExpr { seq, cost });
        }
        self.ctx.pool.release(parent_seq)?;
        Ok(())
    }

    /// Run a subexpression chain for a single iteration rooted at the document root.
    /// `seed` is consumed as the chain's input sequence.
    fn run_isolated(&mut self, chain: Chain, seed: Option<SeqRef>) -> Result<SeqRef, Fault> {
        let root = self.nav.root_position();
        self.ctx.contexts.push_frame();
        self.ctx.contexts.push(ContextItem { node: root, position: 1, size: 1, group: 0 })?;
        if let Some(seq) = seed {
            self.ctx.values.push_frame();
            self.ctx.values.push(Value::Sequence(seq))?;
        }
        let value = self.run_to_value(chain)?;
        let mut items = mem::take(&mut self.ctx.scratch_items);
        self.ctx.contexts.pop_frame_into(&mut items)?;
        items.clear();
        self.ctx.scratch_items = items;
        Ok(value.sequence()?)
    }
}
