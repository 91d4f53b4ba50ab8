//! The control stack, operand stash, and the instruction set the machine
//! consumes.
//!
//! Control items are either prepared AST nodes awaiting evaluation or
//! instructions deposited by earlier dispatches. The control contents at any
//! instant encode the future of the computation, which is what makes
//! suspension between pops a complete snapshot.

use serde::{Deserialize, Serialize};

use crate::{
    ast::{BinaryOp, DeclarationKind, Span, UnaryOp},
    env::EnvId,
    prepare::NodeId,
    value::Value,
};

/// An element of the control stack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) enum ControlItem {
    /// Re-enter dispatch on a prepared node.
    Node(NodeId),
    Instr(Instruction),
}

/// Instructions deposited on control by node dispatch.
///
/// Each instruction declares a fixed arity on the stash; the machine only
/// pops what the executing tag permits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) enum Instruction {
    /// Consume two operands, push the operator result.
    BinaryOp { op: BinaryOp, span: Span },
    /// Consume one operand, push the operator result.
    UnaryOp { op: UnaryOp, span: Span },
    /// Consume the test value, push the chosen branch (or `Undefined` when a
    /// bare `if` has no alternate).
    Branch {
        cons: NodeId,
        alt: Option<NodeId>,
        span: Span,
    },
    /// Discard the stash top.
    Pop,
    /// Consume `argc` arguments plus the callee and run the call protocol.
    ApplyN { argc: u16, span: Span },
    /// Caller resumption point. Restores `env` and truncates the stash to
    /// `stash_base` when the function returns (or falls off its body, which
    /// produces `Undefined`).
    ReturnMarker { env: EnvId, stash_base: u32 },
    /// Consume the return value and unwind control to the nearest marker.
    Return { span: Span },
    /// Consume one value, assign to the nearest declaration, push the value
    /// back (assignment is an expression).
    AssignTo { name: crate::intern::StringId, span: Span },
    /// Consume the initialiser, transition the binding to declared, push the
    /// statement value `Undefined`.
    Define {
        name: crate::intern::StringId,
        kind: DeclarationKind,
        span: Span,
    },
    /// Consume `count` elements, push a fresh array.
    ArrayLit { count: u32, span: Span },
    /// Consume tail then head, push a fresh pair.
    PairCons { span: Span },
    /// Consume index then array, push the element.
    ArrayAccess { span: Span },
    /// Consume value, index, array; store; push the value back.
    ArrayAssign { span: Span },
    /// Consume the test value; when true, re-arm the loop.
    WhileTest { test: NodeId, body: NodeId, span: Span },
    /// Consume the test value; when true, run body then update, then re-test.
    ForTest {
        test: NodeId,
        body: NodeId,
        update: NodeId,
        span: Span,
    },
    /// Make `env` current.
    EnvEnter { env: EnvId },
    /// Restore the environment saved at scope entry.
    EnvLeave { restore: EnvId },
}

impl Instruction {
    /// Short tag name for tracing and conformance comparison.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::BinaryOp { .. } => "BinaryOp",
            Self::UnaryOp { .. } => "UnaryOp",
            Self::Branch { .. } => "Branch",
            Self::Pop => "Pop",
            Self::ApplyN { .. } => "ApplyN",
            Self::ReturnMarker { .. } => "ReturnMarker",
            Self::Return { .. } => "Return",
            Self::AssignTo { .. } => "AssignTo",
            Self::Define { .. } => "Define",
            Self::ArrayLit { .. } => "ArrayLit",
            Self::PairCons { .. } => "PairCons",
            Self::ArrayAccess { .. } => "ArrayAccess",
            Self::ArrayAssign { .. } => "ArrayAssign",
            Self::WhileTest { .. } => "WhileTest",
            Self::ForTest { .. } => "ForTest",
            Self::EnvEnter { .. } => "EnvEnter",
            Self::EnvLeave { .. } => "EnvLeave",
        }
    }
}

/// LIFO stack of pending work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Control {
    items: Vec<ControlItem>,
}

impl Control {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: ControlItem) {
        self.items.push(item);
    }

    pub fn push_node(&mut self, node: NodeId) {
        self.push(ControlItem::Node(node));
    }

    pub fn push_instr(&mut self, instr: Instruction) {
        self.push(ControlItem::Instr(instr));
    }

    pub fn pop(&mut self) -> Option<ControlItem> {
        self.items.pop()
    }

    #[must_use]
    pub fn peek(&self) -> Option<&ControlItem> {
        self.items.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// LIFO stack of operand values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Stash {
    values: Vec<Value>,
}

impl Stash {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Pops an operand an executing instruction is entitled to.
    ///
    /// # Panics
    /// Panics when the stash is empty; instruction arity discipline makes
    /// that an internal machine bug, not a user error.
    pub fn pop(&mut self) -> Value {
        self.values.pop().expect("stash underflow: instruction arity violated")
    }

    /// Pops the program result when control runs out: the stash top, or
    /// `Undefined` when nothing was produced.
    pub fn pop_result(&mut self) -> Value {
        self.values.pop().unwrap_or(Value::Undefined)
    }

    /// Drops values pushed after a call began; used by return markers.
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }
}
