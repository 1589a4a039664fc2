//! Stack machine evaluating compiled filter chains.
//!
//! Evaluation runs all iterations of an expression in lockstep: every operand on the value
//! stack is a frame holding one value per context item of the top sequence frame. Predicates
//! push a new sequence frame (one item per candidate node) and pop it when they are applied.

mod compare;
pub mod context;
pub mod functions;
pub mod select;
pub mod stack;
pub mod value;
mod vm;

pub use context::{CachedSubExpr, ContextItem, ProcessingContext, ScratchGuard, ScratchPool};
pub use functions::Function;
pub use stack::{EvalStack, StackFrame};
pub use value::{NodeSequence, SeqRef, SequencePool, Value, XPathResult};
pub use vm::Vm;

use crate::error::{FilterError, NavigatorError};

/// Failure inside an opcode, before the opcode name is attached.
#[derive(Debug)]
pub(crate) enum Fault {
    Nav(NavigatorError),
    Error(FilterError),
}

impl Fault {
    pub(crate) fn into_error(self, filter: &str, opcode: &'static str) -> FilterError {
        match self {
            Self::Nav(err) => FilterError::from_navigator(err, filter, opcode),
            Self::Error(err) => err,
        }
    }
}

impl From<NavigatorError> for Fault {
    fn from(err: NavigatorError) -> Self {
        Self::Nav(err)
    }
}

impl From<FilterError> for Fault {
    fn from(err: FilterError) -> Self {
        Self::Error(err)
    }
}
