//! Sessions: the outward-facing orchestrator.
//!
//! A session owns the environment tree, the heap, the error log and the live
//! `(control, stash, environment)` triple of at most one evaluation. It is
//! created empty, populated by injecting builtins, and then drives programs
//! through the prepare pass and the machine, exposing
//! `Finished`/`Error`/`Suspended` outcomes with `resume` continuing a
//! suspension from exactly the same triple.
//!
//! Suspended sessions can be serialised with [`Session::dump`] and restored
//! with [`Session::load`]; builtin implementations are function pointers and
//! are re-attached on load.

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    ast,
    builtins::{BuiltinDef, Builtins, HostHooks},
    env::{Environments, GLOBAL_ENV},
    error::{ErrorFormatter, SlangError},
    heap::{Heap, stringify_quoted},
    intern::Interner,
    machine::{Machine, MachineOutcome, MachineState, RunBudget, SuspendReason},
    prepare::{Module, prepare},
    tracer::{NoopTracer, StepTracer},
    value::Value,
};

/// Language level of the Source family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Source1,
    Source2,
    Source3,
    Source4,
}

impl Level {
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::Source1 => 1,
            Self::Source2 => 2,
            Self::Source3 => 3,
            Self::Source4 => 4,
        }
    }

    /// Pairs and list operations arrive at level 2.
    #[must_use]
    pub fn allows_pairs(self) -> bool {
        self >= Self::Source2
    }

    /// `let`, assignment and the pair mutators arrive at level 3.
    #[must_use]
    pub fn allows_mutation(self) -> bool {
        self >= Self::Source3
    }

    #[must_use]
    pub fn allows_loops(self) -> bool {
        self >= Self::Source3
    }

    #[must_use]
    pub fn allows_arrays(self) -> bool {
        self >= Self::Source3
    }
}

/// Language variant. Every variant evaluates on the same machine; the
/// variant is carried for validators and tooling that care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    Default,
    Typed,
    ExplicitControl,
}

/// Requested evaluator. There is one machine; `Native` and `Auto` select it
/// too, so hosts can pass their configuration through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMethod {
    #[default]
    Auto,
    Native,
    CseMachine,
}

/// Evaluation options recognised by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOptions {
    /// Steps allowed per `run`/`resume` invocation before suspending.
    pub step_limit: Option<u64>,
    /// Visualiser step cap; the smaller of this and `step_limit` applies.
    pub env_steps: Option<u64>,
    /// Wall-clock budget per invocation.
    pub max_exec_time: Option<Duration>,
    /// Allow the one-time tenfold extension of `max_exec_time` instead of
    /// failing at the first overrun.
    pub should_increase_timeout: bool,
    pub execution_method: ExecutionMethod,
    /// Report step-limit exhaustion as a potential-infinite-loop error
    /// instead of suspending.
    pub throw_infinite_loops: bool,
    /// Control depth guard against runaway non-tail recursion.
    pub max_control_depth: usize,
    /// Step indices (of the total step counter) that suspend evaluation.
    pub breakpoints: BTreeSet<u64>,
    /// Prefix formatted errors with the originating file name.
    pub should_add_file_name: Option<bool>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            step_limit: None,
            env_steps: None,
            max_exec_time: None,
            should_increase_timeout: false,
            execution_method: ExecutionMethod::Auto,
            throw_infinite_loops: false,
            max_control_depth: 131_072,
            breakpoints: BTreeSet::new(),
            should_add_file_name: None,
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Running,
    Suspended,
    Finished,
    Errored,
}

/// Why a `Suspended` outcome was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Suspension {
    StepLimit,
    Breakpoint(u64),
}

/// Result of driving an evaluation.
#[derive(Debug)]
pub enum Outcome {
    Finished { value: Value },
    Suspended { reason: Suspension },
    Error { errors: Vec<SlangError> },
}

impl Outcome {
    #[must_use]
    pub fn into_finished(self) -> Option<Value> {
        match self {
            Self::Finished { value } => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }
}

/// Misuse of the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The requested transition is not valid from the current state.
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {operation} a session in state {state:?}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Handle for interrupting a running evaluation from outside.
///
/// The flag is observed between machine steps and surfaces as an
/// interrupted-error before the next value is produced.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// AST-rewriting procedure applied at prepare time.
pub type Transformer = fn(ast::Node) -> ast::Node;

/// An evaluation context.
#[derive(Debug, Serialize, Deserialize)]
pub struct Session {
    level: Level,
    variant: Variant,
    options: EvalOptions,
    interner: Interner,
    envs: Environments,
    heap: Heap,
    #[serde(skip)]
    builtins: Builtins,
    errors: Vec<SlangError>,
    state: SessionState,
    /// Total machine steps of the current evaluation.
    steps_total: u64,
    breakpoint_fired: Option<u64>,
    time_extended: bool,
    module: Option<Module>,
    machine: Option<MachineState>,
    #[serde(skip)]
    interrupt: InterruptHandle,
    /// Named AST-rewriting procedures, applied in registration order.
    #[serde(skip)]
    transformers: IndexMap<String, Transformer>,
}

impl Session {
    #[must_use]
    pub fn new(level: Level, variant: Variant) -> Self {
        Self::with_options(level, variant, EvalOptions::default())
    }

    #[must_use]
    pub fn with_options(level: Level, variant: Variant, options: EvalOptions) -> Self {
        Self {
            level,
            variant,
            options,
            interner: Interner::new(),
            envs: Environments::new(),
            heap: Heap::new(),
            builtins: Builtins::new(),
            errors: Vec::new(),
            state: SessionState::Idle,
            steps_total: 0,
            breakpoint_fired: None,
            time_extended: false,
            module: None,
            machine: None,
            interrupt: InterruptHandle::default(),
            transformers: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        self.variant
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn errors(&self) -> &[SlangError] {
        &self.errors
    }

    /// Total machine steps taken by the current evaluation.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps_total
    }

    #[must_use]
    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut EvalOptions {
        &mut self.options
    }

    #[must_use]
    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Installs builtins as `const` bindings in the global environment.
    ///
    /// The table is immutable for the rest of the session's lifetime.
    pub fn inject_builtins(&mut self, defs: Vec<BuiltinDef>) {
        for def in defs {
            let name = self.interner.intern(def.name);
            let id = self.builtins.register(def);
            self.envs.bind_param(GLOBAL_ENV, name, Value::Builtin(id));
        }
    }

    /// Registers a named transformer; re-registering a name replaces it.
    pub fn register_transformer(&mut self, name: impl Into<String>, transformer: Transformer) {
        self.transformers.insert(name.into(), transformer);
    }

    /// A clonable handle that marks this session interrupted.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Renders a value the way the language echoes results.
    #[must_use]
    pub fn render(&self, value: Value) -> String {
        stringify_quoted(value, &self.heap, &self.interner, &self.builtins)
    }

    /// Formats the session's error log.
    #[must_use]
    pub fn format_errors(&self, verbose: bool) -> String {
        let mut formatter = ErrorFormatter::new(verbose);
        formatter.include_source = self.options.should_add_file_name.unwrap_or(true);
        formatter.format_all(&self.errors, &self.interner)
    }

    /// Discards any suspended evaluation and returns the session to `Idle`.
    pub fn reset(&mut self) {
        self.machine = None;
        self.module = None;
        self.state = SessionState::Idle;
    }

    /// Evaluates a program.
    ///
    /// Valid from `Idle`, `Finished` and `Errored` (subsequent programs share
    /// the session's environment tree); a suspended evaluation must be
    /// resumed or reset first.
    pub fn run(&mut self, program: &ast::Node, hooks: &mut dyn HostHooks) -> Result<Outcome, SessionError> {
        self.run_traced(program, hooks, &mut NoopTracer)
    }

    /// Like [`Session::run`], reporting every step to `tracer`.
    pub fn run_traced<T: StepTracer>(
        &mut self,
        program: &ast::Node,
        hooks: &mut dyn HostHooks,
        tracer: &mut T,
    ) -> Result<Outcome, SessionError> {
        match self.state {
            SessionState::Idle | SessionState::Finished | SessionState::Errored => {}
            state => {
                return Err(SessionError::InvalidState {
                    operation: "run a new program in",
                    state,
                });
            }
        }

        let module = if self.transformers.is_empty() {
            prepare(program, self.level, &mut self.interner)
        } else {
            let mut transformed = program.clone();
            for transformer in self.transformers.values() {
                transformed = transformer(transformed);
            }
            prepare(&transformed, self.level, &mut self.interner)
        };
        let module = match module {
            Ok(module) => module,
            Err(errors) => {
                self.errors.extend(errors);
                self.state = SessionState::Errored;
                return Ok(Outcome::Error {
                    errors: self.errors.clone(),
                });
            }
        };

        let mut machine_state = MachineState::new(GLOBAL_ENV);
        machine_state.control.push_node(module.root());
        self.module = Some(module);
        self.machine = Some(machine_state);
        self.steps_total = 0;
        self.breakpoint_fired = None;
        self.time_extended = false;
        self.interrupt.0.store(false, Ordering::Relaxed);

        self.drive(hooks, tracer)
    }

    /// Continues a suspended evaluation from exactly the control, stash and
    /// environment it stopped at.
    pub fn resume(&mut self, hooks: &mut dyn HostHooks) -> Result<Outcome, SessionError> {
        self.resume_traced(hooks, &mut NoopTracer)
    }

    /// Like [`Session::resume`], reporting every step to `tracer`.
    pub fn resume_traced<T: StepTracer>(
        &mut self,
        hooks: &mut dyn HostHooks,
        tracer: &mut T,
    ) -> Result<Outcome, SessionError> {
        if self.state != SessionState::Suspended {
            return Err(SessionError::InvalidState {
                operation: "resume",
                state: self.state,
            });
        }
        self.drive(hooks, tracer)
    }

    fn drive<T: StepTracer>(&mut self, hooks: &mut dyn HostHooks, tracer: &mut T) -> Result<Outcome, SessionError> {
        let module = self.module.as_ref().expect("drive called without a module");
        let mut machine_state = self.machine.take().expect("drive called without machine state");
        self.state = SessionState::Running;

        let step_limit = match (self.options.step_limit, self.options.env_steps) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (limit, None) | (None, limit) => limit,
        };
        let budget = RunBudget {
            step_limit,
            steps_total: &mut self.steps_total,
            breakpoints: &self.options.breakpoints,
            breakpoint_fired: &mut self.breakpoint_fired,
            max_exec_time: self.options.max_exec_time,
            allow_time_extension: self.options.should_increase_timeout,
            time_extended: &mut self.time_extended,
            throw_infinite_loops: self.options.throw_infinite_loops,
            max_control_depth: self.options.max_control_depth,
            interrupted: &self.interrupt.0,
        };

        let outcome = Machine::new(
            module,
            &mut machine_state,
            &mut self.envs,
            &mut self.heap,
            &mut self.interner,
            &self.builtins,
            hooks,
            tracer,
            budget,
        )
        .run();

        match outcome {
            MachineOutcome::Finished(value) => {
                self.machine = None;
                self.state = SessionState::Finished;
                Ok(Outcome::Finished { value })
            }
            MachineOutcome::Suspended(reason) => {
                self.machine = Some(machine_state);
                self.state = SessionState::Suspended;
                let reason = match reason {
                    SuspendReason::StepLimit => Suspension::StepLimit,
                    SuspendReason::Breakpoint(step) => Suspension::Breakpoint(step),
                };
                Ok(Outcome::Suspended { reason })
            }
            MachineOutcome::Failed(error) => {
                // abort: unwind control and stash to empty, log, stay
                // inspectable but not resumable
                self.machine = None;
                self.errors.push(error.into());
                self.state = SessionState::Errored;
                Ok(Outcome::Error {
                    errors: self.errors.clone(),
                })
            }
        }
    }

    /// Serialises the session, including any suspended evaluation.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Restores a dumped session.
    ///
    /// `builtins` must be the same set, in the same order, that the dumped
    /// session was created with: builtin values refer to the table by index.
    pub fn load(bytes: &[u8], builtins: Vec<BuiltinDef>) -> Result<Self, postcard::Error> {
        let mut session: Self = postcard::from_bytes(bytes)?;
        for def in builtins {
            session.builtins.register(def);
        }
        session
            .interrupt
            .0
            .store(false, Ordering::Relaxed);
        Ok(session)
    }
}
