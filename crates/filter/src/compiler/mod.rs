//! Lowers the XPath AST into an opcode chain.
//!
//! Every compiled expression lives in an [`OpcodeArena`] owned by whoever evaluates it:
//! a standalone [`CompiledXPath`] owns its own arena, while a query matcher compiles all of
//! its filters into one shared arena so the subexpression eliminator can splice chains.

use crate::engine::functions::Function;
use crate::error::{FilterError, Result};
use crate::filter::{XPathMessageContext, XPathVariable};
use crate::model::NodeTypeMask;
use crate::parser::{ast, parse_xpath};
use compact_str::CompactString;
use std::fmt;
use string_cache::DefaultAtom as Atom;

pub mod ir;

use ir::{ArithOp, Chain, LogicalOp, Op, OpcodeArena, QNameTest, RelOp, SelectAxis, SelectCriteria};

/// Parse and compile `text` into `arena`. The chain leaves one value per iteration.
pub fn compile_xpath(text: &str, ctx: &XPathMessageContext, arena: &mut OpcodeArena) -> Result<Chain> {
    let ast = parse_xpath(text)?;
    compile_expr(&ast, ctx, arena)
}

/// Compile a filter: like [`compile_xpath`] with the result converted to a boolean.
pub fn compile_filter(text: &str, ctx: &XPathMessageContext, arena: &mut OpcodeArena) -> Result<Chain> {
    let ast = parse_xpath(text)?;
    let mut c = Compiler::new(ctx, arena);
    match c.lower_expr(&ast) {
        Ok(()) => {
            c.emit(Op::ToBoolean);
            c.finish()
        }
        Err(err) => Err(c.abandon(err)),
    }
}

pub fn compile_expr(expr: &ast::Expr, ctx: &XPathMessageContext, arena: &mut OpcodeArena) -> Result<Chain> {
    let mut c = Compiler::new(ctx, arena);
    match c.lower_expr(expr) {
        Ok(()) => c.finish(),
        Err(err) => Err(c.abandon(err)),
    }
}

struct Compiler<'a> {
    ctx: &'a XPathMessageContext,
    arena: &'a mut OpcodeArena,
    chain: Chain,
}

type CResult<T> = Result<T, FilterError>;

impl<'a> Compiler<'a> {
    fn new(ctx: &'a XPathMessageContext, arena: &'a mut OpcodeArena) -> Self {
        Self { ctx, arena, chain: Chain::EMPTY }
    }

    fn emit(&mut self, op: Op) -> ir::OpId {
        self.arena.append(&mut self.chain, op)
    }

    fn finish(self) -> CResult<Chain> {
        self.arena.refresh_flags(self.chain)?;
        Ok(self.chain)
    }

    /// Release the partially built chain so a failed compile leaves the arena as it was.
    fn abandon(self, err: FilterError) -> FilterError {
        self.arena.free_chain(self.chain);
        err
    }

    fn lower_expr(&mut self, e: &ast::Expr) -> CResult<()> {
        use ast::Expr as E;
        match e {
            E::Literal(ast::Literal::String(s)) => {
                self.emit(Op::PushString(CompactString::from(s.as_str())));
            }
            E::Literal(ast::Literal::Number(n)) => {
                self.emit(Op::PushNumber(*n));
            }
            E::VarRef(name) => self.lower_variable(name)?,
            E::FunctionCall { name, args } => self.lower_call(name, args)?,
            E::Binary { left, op, right } => self.lower_binary(left, *op, right)?,
            E::Negate(inner) => {
                self.lower_expr(inner)?;
                self.emit(Op::Negate);
            }
            E::Union(left, right) => {
                self.lower_expr(left)?;
                self.lower_expr(right)?;
                self.emit(Op::Union);
            }
            E::Filter { primary, predicates } => {
                self.lower_expr(primary)?;
                self.lower_predicates(predicates)?;
            }
            E::Path { start, steps } => self.lower_path(start, steps)?,
        }
        Ok(())
    }

    fn lower_variable(&mut self, name: &ast::QName) -> CResult<()> {
        let key = name.to_string();
        let value = self.ctx.variable(&key).ok_or(FilterError::UnknownVariable(key))?;
        let op = match value {
            XPathVariable::String(s) => Op::PushString(s.clone()),
            XPathVariable::Number(n) => Op::PushNumber(*n),
            XPathVariable::Boolean(b) => Op::PushBool(*b),
        };
        self.emit(op);
        Ok(())
    }

    fn lower_call(&mut self, name: &ast::QName, args: &[ast::Expr]) -> CResult<()> {
        let ns = self.resolve_prefix(name.prefix.as_deref())?;
        let resolved = Function::resolve(ns, &name.local, args.len())
            .ok_or_else(|| FilterError::UnknownFunction { name: name.to_string(), arity: args.len() })?;
        match resolved.func {
            Function::True => {
                self.emit(Op::PushBool(true));
                return Ok(());
            }
            Function::False => {
                self.emit(Op::PushBool(false));
                return Ok(());
            }
            _ => {}
        }
        for a in args {
            self.lower_expr(a)?;
        }
        let mut argc = args.len();
        if resolved.takes_context_node {
            self.emit(Op::PushContextNode);
            argc = 1;
        }
        self.emit(Op::Call { func: resolved.func, argc });
        Ok(())
    }

    fn lower_binary(&mut self, left: &ast::Expr, op: ast::BinaryOp, right: &ast::Expr) -> CResult<()> {
        use ast::BinaryOp as B;
        let op = match op {
            B::And => return self.lower_logical(left, LogicalOp::And, right),
            B::Or => return self.lower_logical(left, LogicalOp::Or, right),
            B::Eq => Op::Compare(RelOp::Eq),
            B::Ne => Op::Compare(RelOp::Ne),
            B::Lt => Op::Compare(RelOp::Lt),
            B::Le => Op::Compare(RelOp::Le),
            B::Gt => Op::Compare(RelOp::Gt),
            B::Ge => Op::Compare(RelOp::Ge),
            B::Add => Op::Arith(ArithOp::Add),
            B::Sub => Op::Arith(ArithOp::Sub),
            B::Mul => Op::Arith(ArithOp::Mul),
            B::Div => Op::Arith(ArithOp::Div),
            B::Mod => Op::Arith(ArithOp::Mod),
        };
        self.lower_expr(left)?;
        self.lower_expr(right)?;
        self.emit(op);
        Ok(())
    }

    /// `l and r` lowers to `l, to-boolean, branch(false), r, to-boolean, and`; the branch
    /// skips the right operand once every iteration is decided.
    fn lower_logical(&mut self, left: &ast::Expr, op: LogicalOp, right: &ast::Expr) -> CResult<()> {
        self.lower_expr(left)?;
        let decided = self.emit(Op::ToBoolean);
        let when = op == LogicalOp::Or;
        let branch = self.emit(Op::BranchIfAll { when, target: decided });
        self.lower_expr(right)?;
        self.emit(Op::ToBoolean);
        let join = self.emit(Op::Logical(op));
        self.arena.get_mut(branch)?.op = Op::BranchIfAll { when, target: join };
        Ok(())
    }

    fn lower_predicates(&mut self, predicates: &[ast::Expr]) -> CResult<()> {
        for p in predicates {
            self.emit(Op::PushContext);
            self.lower_expr(p)?;
            self.emit(Op::ApplyFilter);
        }
        Ok(())
    }

    fn lower_path(&mut self, start: &ast::PathStart, steps: &[ast::Step]) -> CResult<()> {
        // Root and context starts hold exactly one node per iteration, so a first step's
        // predicates can filter its result directly.
        let mut single_input = match start {
            ast::PathStart::Root => {
                self.emit(Op::PushRoot);
                true
            }
            ast::PathStart::Context => {
                self.emit(Op::PushContextNode);
                true
            }
            ast::PathStart::Expr(e) => {
                self.lower_expr(e)?;
                false
            }
        };
        for step in steps {
            let criteria = self.lower_node_test(step)?;
            if step.predicates.is_empty() {
                self.emit(Op::Select(criteria));
            } else if single_input {
                self.emit(Op::Select(criteria));
                self.lower_predicates(&step.predicates)?;
            } else {
                self.emit(Op::PushContext);
                self.emit(Op::PushContextNode);
                self.emit(Op::Select(criteria));
                self.lower_predicates(&step.predicates)?;
                self.emit(Op::Gather);
            }
            single_input = false;
        }
        Ok(())
    }

    fn lower_node_test(&self, step: &ast::Step) -> CResult<SelectCriteria> {
        let axis = match step.axis {
            ast::Axis::SelfAxis => SelectAxis::SelfAxis,
            ast::Axis::Child => SelectAxis::Child,
            ast::Axis::Attribute => SelectAxis::Attribute,
            ast::Axis::Descendant => SelectAxis::Descendant,
            ast::Axis::DescendantOrSelf => SelectAxis::DescendantOrSelf,
            other => return Err(FilterError::UnsupportedAxis(other.name())),
        };
        let principal =
            if axis == SelectAxis::Attribute { NodeTypeMask::ATTRIBUTE } else { NodeTypeMask::ELEMENT };
        let (mask, test) = match &step.test {
            ast::NodeTest::Name(q) => {
                let ns = self.resolve_prefix(q.prefix.as_deref())?;
                (principal, QNameTest::exact(ns, &q.local))
            }
            ast::NodeTest::AnyName => (principal, QNameTest::ANY),
            ast::NodeTest::NamespaceWildcard(prefix) => {
                let ns = self.resolve_prefix(Some(prefix))?;
                (principal, QNameTest { ns: Some(Atom::from(ns)), local: None })
            }
            ast::NodeTest::Kind(kind) if axis == SelectAxis::Attribute => match kind {
                ast::NodeType::Node => (NodeTypeMask::ATTRIBUTE, QNameTest::ANY),
                ast::NodeType::Text | ast::NodeType::Comment => (NodeTypeMask::NONE, QNameTest::ANY),
            },
            ast::NodeTest::Kind(ast::NodeType::Node) => (NodeTypeMask::ALL, QNameTest::ANY),
            ast::NodeTest::Kind(ast::NodeType::Text) => (NodeTypeMask::TEXT, QNameTest::ANY),
            ast::NodeTest::Kind(ast::NodeType::Comment) => (NodeTypeMask::COMMENT, QNameTest::ANY),
            ast::NodeTest::ProcessingInstruction(_) if axis == SelectAxis::Attribute => {
                (NodeTypeMask::NONE, QNameTest::ANY)
            }
            ast::NodeTest::ProcessingInstruction(target) => (
                NodeTypeMask::PROCESSING_INSTRUCTION,
                QNameTest { ns: None, local: target.as_deref().map(Atom::from) },
            ),
        };
        Ok(SelectCriteria { axis, mask, test })
    }

    /// Unprefixed names are in no namespace.
    fn resolve_prefix(&self, prefix: Option<&str>) -> CResult<&'a str> {
        match prefix {
            None => Ok(""),
            Some(p) => self.ctx.lookup_namespace(p).ok_or_else(|| FilterError::UnknownPrefix(p.to_string())),
        }
    }
}

/// A standalone compiled expression with its own arena.
#[derive(Debug, Clone)]
pub struct CompiledXPath {
    source: String,
    arena: OpcodeArena,
    chain: Chain,
}

impl CompiledXPath {
    /// Compile `text` as a filter (boolean result).
    pub fn filter(text: &str, ctx: &XPathMessageContext) -> Result<Self> {
        let mut arena = OpcodeArena::new();
        let chain = compile_filter(text, ctx, &mut arena)?;
        Ok(Self { source: text.to_string(), arena, chain })
    }

    /// Compile `text` keeping its natural result type.
    pub fn expression(text: &str, ctx: &XPathMessageContext) -> Result<Self> {
        let mut arena = OpcodeArena::new();
        let chain = compile_xpath(text, ctx, &mut arena)?;
        Ok(Self { source: text.to_string(), arena, chain })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn arena(&self) -> &OpcodeArena {
        &self.arena
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }
}

impl fmt::Display for CompiledXPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.arena.display(self.chain))
    }
}
