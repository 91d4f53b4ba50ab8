//! The CSE machine: an explicit-control evaluator.
//!
//! Evaluation never recurses through the host stack. Each step pops one
//! control item and either dispatches a prepared node (pushing its children
//! and the instruction that will combine them) or executes an instruction
//! against the stash. Because all pending work lives on the control stack,
//! the boundary between two pops is a complete snapshot: suspension,
//! resumption, breakpoints and interrupts all happen there.
//!
//! The call protocol reuses an existing return marker when the pending item
//! just above an application is a marker or a return unwinder; that single
//! rule is what bounds control depth for tail-recursive programs.

use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use smallvec::SmallVec;

use crate::{
    ast::{BinaryOp, Span, UnaryOp},
    builtins::{BuiltinCtx, Builtins, HostHooks},
    control::{Control, ControlItem, Instruction, Stash},
    env::{AssignFailure, EnvId, Environments, LookupFailure},
    error::{RuntimeError, RuntimeErrorKind},
    heap::{Closure, Heap, HeapData},
    intern::Interner,
    prepare::{Module, NodeId, NodeKind},
    tracer::{StepTracer, TraceEvent},
    value::Value,
};

/// How often the wall clock is consulted, in steps.
const TIME_CHECK_INTERVAL: u64 = 128;

/// Multiplier applied to the time budget when the one-time extension is
/// allowed.
const TIMEOUT_EXTENSION_FACTOR: u32 = 10;

/// The live `(Control, Stash, currentEnv)` triple of a session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct MachineState {
    pub control: Control,
    pub stash: Stash,
    pub env: EnvId,
}

impl MachineState {
    pub fn new(env: EnvId) -> Self {
        Self {
            control: Control::new(),
            stash: Stash::new(),
            env,
        }
    }
}

/// Why the machine stopped.
#[derive(Debug)]
pub(crate) enum MachineOutcome {
    Finished(Value),
    Suspended(SuspendReason),
    Failed(RuntimeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SuspendReason {
    StepLimit,
    Breakpoint(u64),
}

/// Per-run limits and counters, owned by the session and borrowed for the
/// duration of one `run`/`resume` call.
pub(crate) struct RunBudget<'a> {
    /// Steps allowed in this invocation; `None` runs until done.
    pub step_limit: Option<u64>,
    /// Total step counter across the whole evaluation.
    pub steps_total: &'a mut u64,
    /// Suspend when `steps_total` enters this set.
    pub breakpoints: &'a BTreeSet<u64>,
    /// Last breakpoint that fired, so resuming does not re-fire it.
    pub breakpoint_fired: &'a mut Option<u64>,
    /// Wall-clock budget; measured from this invocation's start.
    pub max_exec_time: Option<Duration>,
    /// Whether the budget may be multiplied once before timing out.
    pub allow_time_extension: bool,
    /// Set once the extension has been spent.
    pub time_extended: &'a mut bool,
    /// Report step-limit exhaustion as a potential infinite loop.
    pub throw_infinite_loops: bool,
    /// Control depth guard.
    pub max_control_depth: usize,
    /// External interrupt flag, observed between pops.
    pub interrupted: &'a AtomicBool,
}

pub(crate) struct Machine<'a, T: StepTracer> {
    module: &'a Module,
    state: &'a mut MachineState,
    envs: &'a mut Environments,
    heap: &'a mut Heap,
    interner: &'a mut Interner,
    builtins: &'a Builtins,
    hooks: &'a mut dyn HostHooks,
    tracer: &'a mut T,
    budget: RunBudget<'a>,
}

impl<'a, T: StepTracer> Machine<'a, T> {
    #[expect(clippy::too_many_arguments, reason = "the machine borrows every session part once")]
    pub fn new(
        module: &'a Module,
        state: &'a mut MachineState,
        envs: &'a mut Environments,
        heap: &'a mut Heap,
        interner: &'a mut Interner,
        builtins: &'a Builtins,
        hooks: &'a mut dyn HostHooks,
        tracer: &'a mut T,
        budget: RunBudget<'a>,
    ) -> Self {
        Self {
            module,
            state,
            envs,
            heap,
            interner,
            builtins,
            hooks,
            tracer,
            budget,
        }
    }

    /// Steps until the control empties, a budget trips, or an error occurs.
    pub fn run(&mut self) -> MachineOutcome {
        let started = Instant::now();
        let mut steps_this_run: u64 = 0;

        loop {
            if self.budget.interrupted.load(Ordering::Relaxed) {
                return MachineOutcome::Failed(RuntimeError::new(
                    RuntimeErrorKind::Interrupted,
                    self.current_span(),
                ));
            }

            if steps_this_run % TIME_CHECK_INTERVAL == 0
                && let Some(limit) = self.budget.max_exec_time
            {
                let effective = if *self.budget.time_extended {
                    limit * TIMEOUT_EXTENSION_FACTOR
                } else {
                    limit
                };
                if started.elapsed() > effective {
                    if self.budget.allow_time_extension && !*self.budget.time_extended {
                        *self.budget.time_extended = true;
                    } else {
                        return MachineOutcome::Failed(RuntimeError::new(
                            RuntimeErrorKind::Timeout {
                                millis: u64::try_from(effective.as_millis()).unwrap_or(u64::MAX),
                            },
                            self.current_span(),
                        ));
                    }
                }
            }

            if self.state.control.is_empty() {
                let result = self.state.stash.pop_result();
                self.tracer.on_halt(*self.budget.steps_total);
                return MachineOutcome::Finished(result);
            }

            if self.state.control.len() > self.budget.max_control_depth {
                return MachineOutcome::Failed(RuntimeError::new(
                    RuntimeErrorKind::StackOverflow {
                        depth: self.state.control.len(),
                    },
                    self.current_span(),
                ));
            }

            if let Some(limit) = self.budget.step_limit
                && steps_this_run >= limit
            {
                if self.budget.throw_infinite_loops {
                    return MachineOutcome::Failed(RuntimeError::new(
                        RuntimeErrorKind::PotentialInfiniteLoop {
                            steps: *self.budget.steps_total,
                        },
                        self.current_span(),
                    ));
                }
                return MachineOutcome::Suspended(SuspendReason::StepLimit);
            }

            let total = *self.budget.steps_total;
            if self.budget.breakpoints.contains(&total) && *self.budget.breakpoint_fired != Some(total) {
                *self.budget.breakpoint_fired = Some(total);
                return MachineOutcome::Suspended(SuspendReason::Breakpoint(total));
            }

            let item = self.state.control.pop().expect("checked non-empty above");
            *self.budget.steps_total += 1;
            steps_this_run += 1;
            self.trace(&item);

            let result = match item {
                ControlItem::Node(id) => self.dispatch_node(id),
                ControlItem::Instr(instr) => self.dispatch_instr(instr),
            };
            if let Err(error) = result {
                return MachineOutcome::Failed(error);
            }
        }
    }

    fn trace(&mut self, item: &ControlItem) {
        let (category, tag) = match item {
            ControlItem::Node(id) => ("node", self.module.kind(*id).tag()),
            ControlItem::Instr(instr) => ("instr", instr.tag()),
        };
        self.tracer.on_step(TraceEvent {
            step: *self.budget.steps_total,
            category,
            tag,
        });
    }

    /// Location of the item the machine is about to execute.
    fn current_span(&self) -> Span {
        match self.state.control.peek() {
            Some(ControlItem::Node(id)) => self.module.span(*id),
            Some(ControlItem::Instr(instr)) => instr_span(instr).unwrap_or(Span::UNKNOWN),
            None => Span::UNKNOWN,
        }
    }

    // --- node dispatch -----------------------------------------------------

    fn dispatch_node(&mut self, id: NodeId) -> Result<(), RuntimeError> {
        let module = self.module;
        let span = module.span(id);
        match module.kind(id) {
            NodeKind::Literal(value) => {
                self.state.stash.push(*value);
                Ok(())
            }
            NodeKind::Name(name) => {
                let value = self.lookup(*name, span)?;
                self.state.stash.push(value);
                Ok(())
            }
            NodeKind::Binary { op, left, right } => {
                self.state.control.push_instr(Instruction::BinaryOp { op: *op, span });
                self.state.control.push_node(*right);
                self.state.control.push_node(*left);
                Ok(())
            }
            NodeKind::Unary { op, operand } => {
                self.state.control.push_instr(Instruction::UnaryOp { op: *op, span });
                self.state.control.push_node(*operand);
                Ok(())
            }
            NodeKind::Conditional { test, cons, alt } => {
                self.state.control.push_instr(Instruction::Branch {
                    cons: *cons,
                    alt: Some(*alt),
                    span,
                });
                self.state.control.push_node(*test);
                Ok(())
            }
            NodeKind::If { test, cons, alt } => {
                self.state.control.push_instr(Instruction::Branch {
                    cons: *cons,
                    alt: *alt,
                    span,
                });
                self.state.control.push_node(*test);
                Ok(())
            }
            NodeKind::Call { callee, args } => {
                self.state.control.push_instr(Instruction::ApplyN {
                    argc: u16::try_from(args.len()).expect("argument count exceeds u16"),
                    span,
                });
                for &arg in args.iter().rev() {
                    self.state.control.push_node(arg);
                }
                self.state.control.push_node(*callee);
                Ok(())
            }
            NodeKind::Lambda { params, body, name } => {
                let closure = Closure {
                    params: params.clone(),
                    body: *body,
                    env: self.state.env,
                    name: *name,
                };
                let cell = self.heap.alloc(HeapData::Closure(closure));
                self.envs.record_alloc(self.state.env, cell);
                self.state.stash.push(Value::Ref(cell));
                Ok(())
            }
            NodeKind::VarDecl { kind, name, init } => {
                self.state.control.push_instr(Instruction::Define {
                    name: *name,
                    kind: *kind,
                    span,
                });
                self.state.control.push_node(*init);
                Ok(())
            }
            NodeKind::Assign { name, value } => {
                self.state.control.push_instr(Instruction::AssignTo { name: *name, span });
                self.state.control.push_node(*value);
                Ok(())
            }
            NodeKind::MemberAssign { object, index, value } => {
                self.state.control.push_instr(Instruction::ArrayAssign { span });
                self.state.control.push_node(*value);
                self.state.control.push_node(*index);
                self.state.control.push_node(*object);
                Ok(())
            }
            NodeKind::Member { object, index } => {
                self.state.control.push_instr(Instruction::ArrayAccess { span });
                self.state.control.push_node(*index);
                self.state.control.push_node(*object);
                Ok(())
            }
            NodeKind::ArrayLit { elements } => {
                self.state.control.push_instr(Instruction::ArrayLit {
                    count: u32::try_from(elements.len()).expect("array literal exceeds u32"),
                    span,
                });
                for &element in elements.iter().rev() {
                    self.state.control.push_node(element);
                }
                Ok(())
            }
            NodeKind::Block { body, decls } => {
                if body.is_empty() {
                    self.state.stash.push(Value::Undefined);
                    return Ok(());
                }
                let env = self.envs.extend(self.state.env, "block", None);
                for (name, kind) in decls {
                    self.envs.declare(env, *name, *kind);
                }
                self.state.control.push_instr(Instruction::EnvLeave {
                    restore: self.state.env,
                });
                self.push_statements(body);
                self.state.control.push_instr(Instruction::EnvEnter { env });
                Ok(())
            }
            NodeKind::Sequence { body } => {
                if body.is_empty() {
                    self.state.stash.push(Value::Undefined);
                    return Ok(());
                }
                self.push_statements(body);
                Ok(())
            }
            NodeKind::Return { arg } => {
                self.state.control.push_instr(Instruction::Return { span });
                match arg {
                    Some(arg) => self.state.control.push_node(*arg),
                    None => self.state.stash.push(Value::Undefined),
                }
                Ok(())
            }
            NodeKind::ExprStmt { expr } => {
                self.state.control.push_node(*expr);
                Ok(())
            }
            NodeKind::While { test, body } => {
                // seed the loop value: a loop that never runs is undefined
                self.state.stash.push(Value::Undefined);
                self.state.control.push_instr(Instruction::WhileTest {
                    test: *test,
                    body: *body,
                    span,
                });
                self.state.control.push_node(*test);
                Ok(())
            }
            NodeKind::For {
                init,
                test,
                update,
                body,
                decl,
            } => {
                let env = self.envs.extend(self.state.env, "for", None);
                if let Some((name, kind)) = decl {
                    self.envs.declare(env, *name, *kind);
                }
                self.state.stash.push(Value::Undefined);
                self.state.control.push_instr(Instruction::EnvLeave {
                    restore: self.state.env,
                });
                self.state.control.push_instr(Instruction::ForTest {
                    test: *test,
                    body: *body,
                    update: *update,
                    span,
                });
                self.state.control.push_node(*test);
                if let Some(init) = init {
                    self.state.control.push_instr(Instruction::Pop);
                    self.state.control.push_node(*init);
                }
                self.state.control.push_instr(Instruction::EnvEnter { env });
                Ok(())
            }
        }
    }

    /// Pushes a statement list so each non-final statement's value is
    /// popped and the final one's remains.
    fn push_statements(&mut self, body: &[NodeId]) {
        let last = body.len() - 1;
        for (i, &stmt) in body.iter().enumerate().rev() {
            if i != last {
                self.state.control.push_instr(Instruction::Pop);
            }
            self.state.control.push_node(stmt);
        }
    }

    fn lookup(&self, name: crate::intern::StringId, span: Span) -> Result<Value, RuntimeError> {
        self.envs.lookup(self.state.env, name).map_err(|failure| {
            let text = self.interner.resolve(name).to_owned();
            let kind = match failure {
                LookupFailure::Undeclared => RuntimeErrorKind::UndefinedVariable(text),
                LookupFailure::NotYetDeclared => RuntimeErrorKind::UseBeforeDeclaration(text),
            };
            RuntimeError::new(kind, span)
        })
    }

    // --- instruction dispatch ---------------------------------------------

    fn dispatch_instr(&mut self, instr: Instruction) -> Result<(), RuntimeError> {
        match instr {
            Instruction::BinaryOp { op, span } => {
                let right = self.state.stash.pop();
                let left = self.state.stash.pop();
                let result = self.apply_binary(op, left, right, span)?;
                self.state.stash.push(result);
                Ok(())
            }
            Instruction::UnaryOp { op, span } => {
                let operand = self.state.stash.pop();
                let result = self.apply_unary(op, operand, span)?;
                self.state.stash.push(result);
                Ok(())
            }
            Instruction::Branch { cons, alt, span } => {
                let test = self.state.stash.pop();
                let Some(test) = test.as_bool() else {
                    return Err(self.type_mismatch("conditional test", "boolean", test, span));
                };
                if test {
                    self.state.control.push_node(cons);
                } else {
                    match alt {
                        Some(alt) => self.state.control.push_node(alt),
                        None => self.state.stash.push(Value::Undefined),
                    }
                }
                Ok(())
            }
            Instruction::Pop => {
                self.state.stash.pop();
                Ok(())
            }
            Instruction::ApplyN { argc, span } => self.apply(argc, span),
            Instruction::ReturnMarker { env, stash_base } => {
                // reached without an explicit return: the call's value is
                // undefined
                self.state.stash.truncate(stash_base as usize);
                self.state.stash.push(Value::Undefined);
                self.state.env = env;
                Ok(())
            }
            Instruction::Return { span } => {
                let value = self.state.stash.pop();
                loop {
                    match self.state.control.pop() {
                        Some(ControlItem::Instr(Instruction::ReturnMarker { env, stash_base })) => {
                            self.state.stash.truncate(stash_base as usize);
                            self.state.stash.push(value);
                            self.state.env = env;
                            return Ok(());
                        }
                        Some(_) => {}
                        None => {
                            return Err(RuntimeError::new(RuntimeErrorKind::ReturnOutsideFunction, span));
                        }
                    }
                }
            }
            Instruction::AssignTo { name, span } => {
                let value = self.state.stash.pop();
                self.envs.assign(self.state.env, name, value).map_err(|failure| {
                    let text = self.interner.resolve(name).to_owned();
                    let kind = match failure {
                        AssignFailure::ConstTarget => RuntimeErrorKind::ConstAssignment(text),
                        AssignFailure::Undeclared => RuntimeErrorKind::UndefinedVariable(text),
                        AssignFailure::NotYetDeclared => RuntimeErrorKind::UseBeforeDeclaration(text),
                    };
                    RuntimeError::new(kind, span)
                })?;
                self.state.stash.push(value);
                Ok(())
            }
            Instruction::Define { name, kind, .. } => {
                let value = self.state.stash.pop();
                self.envs.define(self.state.env, name, kind, value);
                self.state.stash.push(Value::Undefined);
                Ok(())
            }
            Instruction::ArrayLit { count, .. } => {
                let mut elements = vec![Value::Undefined; count as usize];
                for slot in elements.iter_mut().rev() {
                    *slot = self.state.stash.pop();
                }
                let cell = self.heap.alloc(HeapData::Array(elements));
                self.envs.record_alloc(self.state.env, cell);
                self.state.stash.push(Value::Ref(cell));
                Ok(())
            }
            Instruction::PairCons { .. } => {
                let tail = self.state.stash.pop();
                let head = self.state.stash.pop();
                let cell = self.heap.alloc(HeapData::Pair([head, tail]));
                self.envs.record_alloc(self.state.env, cell);
                self.state.stash.push(Value::Ref(cell));
                Ok(())
            }
            Instruction::ArrayAccess { span } => {
                let index = self.state.stash.pop();
                let object = self.state.stash.pop();
                let (cell, index) = self.check_array_access(object, index, span)?;
                let HeapData::Array(elements) = self.heap.get(cell) else {
                    unreachable!("check_array_access returned a non-array cell");
                };
                let Some(&value) = elements.get(index) else {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::IndexOutOfRange {
                            index: index as f64,
                            length: elements.len(),
                        },
                        span,
                    ));
                };
                self.state.stash.push(value);
                Ok(())
            }
            Instruction::ArrayAssign { span } => {
                let value = self.state.stash.pop();
                let index = self.state.stash.pop();
                let object = self.state.stash.pop();
                let (cell, index) = self.check_array_access(object, index, span)?;
                let HeapData::Array(elements) = self.heap.get_mut(cell) else {
                    unreachable!("check_array_access returned a non-array cell");
                };
                if index >= elements.len() {
                    elements.resize(index + 1, Value::Undefined);
                }
                elements[index] = value;
                self.state.stash.push(value);
                Ok(())
            }
            Instruction::WhileTest { test, body, span } => {
                let t = self.state.stash.pop();
                let Some(t) = t.as_bool() else {
                    return Err(self.type_mismatch("while loop test", "boolean", t, span));
                };
                if t {
                    self.state.control.push_instr(Instruction::WhileTest { test, body, span });
                    self.state.control.push_node(test);
                    self.state.control.push_node(body);
                    self.state.control.push_instr(Instruction::Pop);
                }
                Ok(())
            }
            Instruction::ForTest {
                test,
                body,
                update,
                span,
            } => {
                let t = self.state.stash.pop();
                let Some(t) = t.as_bool() else {
                    return Err(self.type_mismatch("for loop test", "boolean", t, span));
                };
                if t {
                    self.state.control.push_instr(Instruction::ForTest {
                        test,
                        body,
                        update,
                        span,
                    });
                    self.state.control.push_node(test);
                    self.state.control.push_instr(Instruction::Pop);
                    self.state.control.push_node(update);
                    self.state.control.push_node(body);
                    self.state.control.push_instr(Instruction::Pop);
                }
                Ok(())
            }
            Instruction::EnvEnter { env } => {
                self.state.env = env;
                Ok(())
            }
            Instruction::EnvLeave { restore } => {
                self.state.env = restore;
                Ok(())
            }
        }
    }

    /// The call protocol.
    fn apply(&mut self, argc: u16, span: Span) -> Result<(), RuntimeError> {
        let mut args: SmallVec<[Value; 8]> = SmallVec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.state.stash.pop());
        }
        args.reverse();
        let callee = self.state.stash.pop();

        match callee {
            Value::Ref(cell) if matches!(self.heap.get(cell), HeapData::Closure(_)) => {
                let HeapData::Closure(closure) = self.heap.get(cell) else {
                    unreachable!("matched closure above");
                };
                let closure = closure.clone();
                if closure.params.len() != args.len() {
                    let name = closure
                        .name
                        .map_or_else(|| "function".to_owned(), |n| self.interner.resolve(n).to_owned());
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::ArityMismatch {
                            name,
                            expected: closure.params.len(),
                            got: args.len(),
                        },
                        span,
                    ));
                }

                // Tail position: the pending item just above the application
                // is a return marker, or the return unwinder that would reach
                // one. Reuse the existing marker instead of pushing a new
                // one, and discard the dead control segment the unwinder
                // would have skipped, so tail recursion runs in constant
                // control depth.
                match self.state.control.peek() {
                    Some(ControlItem::Instr(Instruction::Return { .. })) => {
                        self.state.control.pop();
                        while !matches!(
                            self.state.control.peek(),
                            None | Some(ControlItem::Instr(Instruction::ReturnMarker { .. }))
                        ) {
                            self.state.control.pop();
                        }
                    }
                    Some(ControlItem::Instr(Instruction::ReturnMarker { .. })) => {}
                    _ => {
                        self.state.control.push_instr(Instruction::ReturnMarker {
                            env: self.state.env,
                            stash_base: u32::try_from(self.state.stash.len()).expect("stash exceeds u32"),
                        });
                    }
                }

                let frame_name = closure
                    .name
                    .map_or_else(|| "lambda".to_owned(), |n| self.interner.resolve(n).to_owned());
                let call_env = self.envs.extend(closure.env, frame_name, Some(span));
                for (&param, &arg) in closure.params.iter().zip(args.iter()) {
                    self.envs.bind_param(call_env, param, arg);
                }
                self.state.env = call_env;
                self.state.control.push_node(closure.body);
                Ok(())
            }
            Value::Builtin(id) => {
                let def = self.builtins.get(id);
                if !def.arity.accepts(args.len()) {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::ArityMismatch {
                            name: def.name.to_owned(),
                            expected: def.arity.expected(),
                            got: args.len(),
                        },
                        span,
                    ));
                }
                if Some(id) == self.builtins.pair_id() {
                    // allocation primitives lower to machine instructions
                    self.state.stash.push(args[0]);
                    self.state.stash.push(args[1]);
                    self.state.control.push_instr(Instruction::PairCons { span });
                    return Ok(());
                }
                let invoke = def.invoke;
                let mut ctx = BuiltinCtx {
                    heap: &mut *self.heap,
                    interner: &mut *self.interner,
                    attribution: Some((&mut *self.envs, self.state.env)),
                    builtins: self.builtins,
                    hooks: &mut *self.hooks,
                    span,
                };
                let result = invoke(&mut ctx, &args)?;
                self.state.stash.push(result);
                Ok(())
            }
            other => Err(RuntimeError::new(
                RuntimeErrorKind::NotAFunction {
                    repr: other.scalar_repr(self.interner),
                },
                span,
            )),
        }
    }

    fn check_array_access(&self, object: Value, index: Value, span: Span) -> Result<(crate::heap::HeapId, usize), RuntimeError> {
        let Value::Ref(cell) = object else {
            return Err(RuntimeError::new(
                RuntimeErrorKind::NotAnArray {
                    repr: object.scalar_repr(self.interner),
                },
                span,
            ));
        };
        if !matches!(self.heap.get(cell), HeapData::Array(_)) {
            return Err(RuntimeError::new(
                RuntimeErrorKind::NotAnArray {
                    repr: object.scalar_repr(self.interner),
                },
                span,
            ));
        }
        let Some(n) = index.as_number() else {
            return Err(self.type_mismatch("array index", "number", index, span));
        };
        if n.fract() != 0.0 || n < 0.0 {
            let HeapData::Array(elements) = self.heap.get(cell) else {
                unreachable!("checked array above");
            };
            return Err(RuntimeError::new(
                RuntimeErrorKind::IndexOutOfRange {
                    index: n,
                    length: elements.len(),
                },
                span,
            ));
        }
        Ok((cell, n as usize))
    }

    fn apply_binary(&mut self, op: BinaryOp, left: Value, right: Value, span: Span) -> Result<Value, RuntimeError> {
        match op {
            BinaryOp::Eq => return Ok(Value::Bool(left == right)),
            BinaryOp::Neq => return Ok(Value::Bool(left != right)),
            _ => {}
        }
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(match op {
                BinaryOp::Add => Value::Number(a + b),
                BinaryOp::Sub => Value::Number(a - b),
                BinaryOp::Mul => Value::Number(a * b),
                BinaryOp::Div => Value::Number(a / b),
                BinaryOp::Mod => Value::Number(a % b),
                BinaryOp::Lt => Value::Bool(a < b),
                BinaryOp::Leq => Value::Bool(a <= b),
                BinaryOp::Gt => Value::Bool(a > b),
                BinaryOp::Geq => Value::Bool(a >= b),
                BinaryOp::Eq | BinaryOp::Neq => unreachable!("handled above"),
            }),
            (Value::Str(a), Value::Str(b)) => {
                let a_text = self.interner.resolve(a);
                let b_text = self.interner.resolve(b);
                match op {
                    BinaryOp::Add => {
                        let joined = format!("{a_text}{b_text}");
                        Ok(Value::Str(self.interner.intern(&joined)))
                    }
                    BinaryOp::Lt => Ok(Value::Bool(a_text < b_text)),
                    BinaryOp::Leq => Ok(Value::Bool(a_text <= b_text)),
                    BinaryOp::Gt => Ok(Value::Bool(a_text > b_text)),
                    BinaryOp::Geq => Ok(Value::Bool(a_text >= b_text)),
                    _ => Err(self.type_mismatch(&format!("operand of {op}"), "number", left, span)),
                }
            }
            (Value::Number(_) | Value::Str(_), other) | (other, _) => Err(self.type_mismatch(
                &format!("operand of {op}"),
                "number or string",
                other,
                span,
            )),
        }
    }

    fn apply_unary(&mut self, op: UnaryOp, operand: Value, span: Span) -> Result<Value, RuntimeError> {
        match op {
            UnaryOp::Minus => match operand {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(self.type_mismatch("operand of unary -", "number", other, span)),
            },
            UnaryOp::Not => match operand {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(self.type_mismatch("operand of !", "boolean", other, span)),
            },
        }
    }

    fn type_mismatch(&self, context: &str, expected: &'static str, got: Value, span: Span) -> RuntimeError {
        RuntimeError::new(
            RuntimeErrorKind::TypeMismatch {
                context: context.to_owned(),
                expected: expected.to_owned(),
                got: got.scalar_repr(self.interner),
            },
            span,
        )
    }
}

fn instr_span(instr: &Instruction) -> Option<Span> {
    match instr {
        Instruction::BinaryOp { span, .. }
        | Instruction::UnaryOp { span, .. }
        | Instruction::Branch { span, .. }
        | Instruction::ApplyN { span, .. }
        | Instruction::Return { span, .. }
        | Instruction::AssignTo { span, .. }
        | Instruction::Define { span, .. }
        | Instruction::ArrayLit { span, .. }
        | Instruction::PairCons { span }
        | Instruction::ArrayAccess { span }
        | Instruction::ArrayAssign { span }
        | Instruction::WhileTest { span, .. }
        | Instruction::ForTest { span, .. } => Some(*span),
        Instruction::Pop
        | Instruction::ReturnMarker { .. }
        | Instruction::EnvEnter { .. }
        | Instruction::EnvLeave { .. } => None,
    }
}
