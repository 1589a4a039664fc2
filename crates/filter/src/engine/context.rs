use super::stack::EvalStack;
use super::value::{SeqRef, SequencePool, Value};
use crate::error::FilterError;
use crate::model::NodePos;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};
use tracing::trace;

/// One context node of the current iteration set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextItem {
    pub node: NodePos,
    /// 1-based position within the node's own step result.
    pub position: usize,
    pub size: usize,
    /// Index of the enclosing iteration this item was expanded from.
    pub group: usize,
}

/// Per-message cache entry of a shared subexpression.
#[derive(Debug, Clone, Copy)]
pub struct CachedSubExpr {
    pub seq: SeqRef,
    /// Navigator steps it took to compute, charged again on every reuse.
    pub cost: usize,
}

/// Mutable evaluation state. Reused across messages through a [`ScratchPool`].
#[derive(Debug, Default)]
pub struct ProcessingContext {
    pub(crate) values: EvalStack<Value>,
    pub(crate) contexts: EvalStack<ContextItem>,
    pub(crate) pool: SequencePool,
    pub(crate) vars: Vec<Option<CachedSubExpr>>,
    pub(crate) scratch_values: Vec<Value>,
    pub(crate) scratch_items: Vec<ContextItem>,
    pub(crate) scratch_nodes: Vec<NodePos>,
    pub(crate) scratch_walk: Vec<NodePos>,
}

impl ProcessingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for a new message: one root context item and `var_count` empty variable slots.
    pub fn begin(&mut self, root: NodePos, var_count: usize) -> Result<(), FilterError> {
        self.reset();
        self.vars.resize(var_count, None);
        self.contexts.push_frame();
        self.contexts.push(ContextItem { node: root, position: 1, size: 1, group: 0 })
    }

    pub fn reset(&mut self) {
        self.values.clear();
        self.contexts.clear();
        self.pool.reset();
        self.vars.clear();
        self.scratch_values.clear();
        self.scratch_items.clear();
        self.scratch_nodes.clear();
        self.scratch_walk.clear();
    }

    /// Number of parallel evaluations in flight: the size of the top context frame.
    pub fn iterations(&self) -> Result<usize, FilterError> {
        self.contexts.top().map(<[ContextItem]>::len)
    }

    pub fn pool(&self) -> &SequencePool {
        &self.pool
    }

    pub fn cached(&self, var: usize) -> Option<CachedSubExpr> {
        self.vars.get(var).copied().flatten()
    }
}

/// Bounded free list of processing contexts shared by the matchers of one table.
#[derive(Debug)]
pub struct ScratchPool {
    free: Mutex<Vec<Box<ProcessingContext>>>,
    capacity: usize,
}

impl ScratchPool {
    pub const DEFAULT_CAPACITY: usize = 8;

    pub fn new(capacity: usize) -> Self {
        Self { free: Mutex::new(Vec::new()), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take an idle context or allocate a new one.
    pub fn acquire(&self) -> ScratchGuard<'_> {
        let context = self.free.lock().unwrap_or_else(PoisonError::into_inner).pop().unwrap_or_default();
        ScratchGuard { pool: self, context: Some(context) }
    }

    /// Idle contexts currently held.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop every idle context. Returns how many were released.
    pub fn reclaim(&self) -> usize {
        let released = std::mem::take(&mut *self.free.lock().unwrap_or_else(PoisonError::into_inner)).len();
        trace!(released, "reclaimed scratch contexts");
        released
    }

    fn give_back(&self, mut context: Box<ProcessingContext>) {
        context.reset();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.capacity {
            free.push(context);
        }
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl Clone for ScratchPool {
    /// Scratch state is never shared between copies; the clone starts empty.
    fn clone(&self) -> Self {
        Self::new(self.capacity)
    }
}

/// A borrowed context, reset and returned to its pool on drop (error paths included).
pub struct ScratchGuard<'a> {
    pool: &'a ScratchPool,
    context: Option<Box<ProcessingContext>>,
}

impl Deref for ScratchGuard<'_> {
    type Target = ProcessingContext;

    fn deref(&self) -> &ProcessingContext {
        self.context.as_deref().unwrap_or_else(|| unreachable!("scratch context taken before drop"))
    }
}

impl DerefMut for ScratchGuard<'_> {
    fn deref_mut(&mut self) -> &mut ProcessingContext {
        self.context.as_deref_mut().unwrap_or_else(|| unreachable!("scratch context taken before drop"))
    }
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool.give_back(context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_bounded_and_reclaimable() {
        let pool = ScratchPool::new(1);
        {
            let _a = pool.acquire();
            let _b = pool.acquire();
        }
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.reclaim(), 1);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn returned_contexts_are_reset() {
        let pool = ScratchPool::new(2);
        {
            let mut guard = pool.acquire();
            let ctx: &mut ProcessingContext = &mut guard;
            ctx.begin(0, 3).unwrap();
            ctx.values.push_frame();
            let seq = ctx.pool.acquire().unwrap();
            ctx.values.push(Value::Sequence(seq)).unwrap();
        }
        let guard = pool.acquire();
        let ctx: &ProcessingContext = &guard;
        assert!(ctx.values.is_empty());
        assert!(ctx.vars.is_empty());
        assert_eq!(ctx.pool().live(), 0);
    }

    #[test]
    fn root_frame_has_one_iteration() {
        let mut ctx = ProcessingContext::new();
        ctx.begin(0, 0).unwrap();
        assert_eq!(ctx.iterations().unwrap(), 1);
        assert!(ctx.cached(0).is_none());
    }
}
