//! Builtin functions and the host interface.
//!
//! A builtin is `(name, arity, kind, invoke)`. The loader installs the whole
//! set into the global environment as `const` bindings whose value is a
//! [`Value::Builtin`]; the machine's call protocol then dispatches closures,
//! builtins and everything else uniformly. The only side effects the
//! machine ever performs go through [`HostHooks`].
//!
//! Builtin implementations are plain function pointers, so the table itself
//! is not serialised: restoring a dumped session re-attaches the table by
//! name.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    ast::Span,
    env::{EnvId, Environments},
    error::{RuntimeError, RuntimeErrorKind},
    heap::{Heap, HeapData, stringify_quoted},
    intern::Interner,
    session::Level,
    value::{BuiltinId, Value},
};

/// Whether a builtin touches the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuiltinKind {
    Pure,
    SideEffectful,
}

/// Number of arguments a builtin accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arity {
    Exact(u8),
    Variadic,
}

impl Arity {
    #[must_use]
    pub fn accepts(self, got: usize) -> bool {
        match self {
            Self::Exact(n) => got == n as usize,
            Self::Variadic => true,
        }
    }

    #[must_use]
    pub fn expected(self) -> usize {
        match self {
            Self::Exact(n) => n as usize,
            Self::Variadic => 0,
        }
    }
}

/// Host side-effect interface.
///
/// `raw_display` receives already-rendered text; `prompt` may return `None`
/// for a cancelled prompt, which surfaces as `null`.
pub trait HostHooks: std::fmt::Debug {
    fn raw_display(&mut self, text: &str);

    fn prompt(&mut self, message: &str) -> Option<String> {
        let _ = message;
        None
    }

    fn alert(&mut self, text: &str) {
        self.raw_display(text);
    }

    /// Side channel for list visualisation; receives the rendered structure.
    fn visualise_list(&mut self, rendered: &str) {
        let _ = rendered;
    }
}

/// Hooks that write displays to stdout and alerts to stderr.
#[derive(Debug, Default)]
pub struct StdHooks;

impl HostHooks for StdHooks {
    fn raw_display(&mut self, text: &str) {
        println!("{text}");
    }

    fn alert(&mut self, text: &str) {
        eprintln!("{text}");
    }
}

/// Hooks that collect everything, for tests and embedding.
#[derive(Debug, Default)]
pub struct CollectHooks {
    pub displayed: Vec<String>,
    pub alerts: Vec<String>,
    pub visualised: Vec<String>,
    /// Queued answers returned by successive `prompt` calls.
    pub prompt_replies: VecDeque<String>,
}

impl CollectHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostHooks for CollectHooks {
    fn raw_display(&mut self, text: &str) {
        self.displayed.push(text.to_owned());
    }

    fn prompt(&mut self, _message: &str) -> Option<String> {
        self.prompt_replies.pop_front()
    }

    fn alert(&mut self, text: &str) {
        self.alerts.push(text.to_owned());
    }

    fn visualise_list(&mut self, rendered: &str) {
        self.visualised.push(rendered.to_owned());
    }
}

/// Hooks that swallow all output.
#[derive(Debug, Default)]
pub struct NullHooks;

impl HostHooks for NullHooks {
    fn raw_display(&mut self, _text: &str) {}
}

/// Mutable machine state a builtin may touch, plus the call-site span for
/// error locations.
pub struct BuiltinCtx<'a> {
    pub heap: &'a mut Heap,
    pub interner: &'a mut Interner,
    /// Frame arena and current environment for allocation attribution.
    /// `None` when the caller has no frame graph (the stack VM).
    pub attribution: Option<(&'a mut Environments, EnvId)>,
    pub builtins: &'a Builtins,
    pub hooks: &'a mut dyn HostHooks,
    pub span: Span,
}

impl BuiltinCtx<'_> {
    /// Allocates a cell, attributing it to the current frame when one exists.
    pub fn alloc(&mut self, data: HeapData) -> Value {
        let id = self.heap.alloc(data);
        if let Some((envs, env)) = self.attribution.as_mut() {
            envs.record_alloc(*env, id);
        }
        Value::Ref(id)
    }

    #[must_use]
    pub fn render(&self, value: Value) -> String {
        stringify_quoted(value, self.heap, self.interner, self.builtins)
    }

    pub fn fail(&self, kind: RuntimeErrorKind) -> RuntimeError {
        RuntimeError::new(kind, self.span)
    }

    fn type_error(&self, context: &str, expected: &'static str, got: Value) -> RuntimeError {
        self.fail(RuntimeErrorKind::TypeMismatch {
            context: context.to_owned(),
            expected: expected.to_owned(),
            got: got.scalar_repr(self.interner),
        })
    }
}

/// Implementation signature for a builtin.
pub type BuiltinImpl = fn(&mut BuiltinCtx<'_>, &[Value]) -> Result<Value, RuntimeError>;

/// A named builtin ready for injection.
#[derive(Debug, Clone)]
pub struct BuiltinDef {
    pub name: &'static str,
    pub arity: Arity,
    pub kind: BuiltinKind,
    pub invoke: BuiltinImpl,
}

impl BuiltinDef {
    #[must_use]
    pub fn pure(name: &'static str, arity: u8, invoke: BuiltinImpl) -> Self {
        Self {
            name,
            arity: Arity::Exact(arity),
            kind: BuiltinKind::Pure,
            invoke,
        }
    }

    #[must_use]
    pub fn effectful(name: &'static str, arity: u8, invoke: BuiltinImpl) -> Self {
        Self {
            name,
            arity: Arity::Exact(arity),
            kind: BuiltinKind::SideEffectful,
            invoke,
        }
    }
}

/// The session's builtin table. Immutable after injection.
#[derive(Debug, Clone, Default)]
pub struct Builtins {
    defs: Vec<BuiltinDef>,
    /// Cached id of `pair`, whose application lowers to the `PairCons`
    /// machine instruction instead of a host call.
    pair: Option<BuiltinId>,
}

impl Builtins {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: BuiltinDef) -> BuiltinId {
        let id = BuiltinId(u32::try_from(self.defs.len()).expect("builtin table exceeds u32"));
        if def.name == "pair" {
            self.pair = Some(id);
        }
        self.defs.push(def);
        id
    }

    #[must_use]
    pub fn get(&self, id: BuiltinId) -> &BuiltinDef {
        &self.defs[id.index()]
    }

    #[must_use]
    pub fn name(&self, id: BuiltinId) -> &'static str {
        self.defs[id.index()].name
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<BuiltinId> {
        self.defs
            .iter()
            .position(|d| d.name == name)
            .map(|i| BuiltinId(u32::try_from(i).expect("checked at register")))
    }

    #[must_use]
    pub fn pair_id(&self) -> Option<BuiltinId> {
        self.pair
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BuiltinId, &BuiltinDef)> {
        self.defs
            .iter()
            .enumerate()
            .map(|(i, d)| (BuiltinId(u32::try_from(i).expect("checked at register")), d))
    }
}

// ---------------------------------------------------------------------------
// The standard builtin set
// ---------------------------------------------------------------------------

/// The builtin set for a language level.
///
/// Levels 1 has no list support; pairs and list operations arrive at level
/// 2, mutators at level 3.
#[must_use]
pub fn source_builtins(level: Level) -> Vec<BuiltinDef> {
    let mut defs = vec![
        BuiltinDef::effectful("display", 1, display),
        BuiltinDef::effectful("error", 1, raise_error),
        BuiltinDef::effectful("prompt", 1, prompt),
        BuiltinDef::effectful("alert", 1, alert),
        BuiltinDef::pure("stringify", 1, stringify_builtin),
        BuiltinDef::pure("is_number", 1, |ctx, args| type_probe(ctx, args, "number")),
        BuiltinDef::pure("is_string", 1, |ctx, args| type_probe(ctx, args, "string")),
        BuiltinDef::pure("is_boolean", 1, |ctx, args| type_probe(ctx, args, "boolean")),
        BuiltinDef::pure("is_function", 1, is_function),
        BuiltinDef::pure("is_undefined", 1, |ctx, args| type_probe(ctx, args, "undefined")),
        BuiltinDef::pure("math_abs", 1, |ctx, args| math1(ctx, args, "math_abs", f64::abs)),
        BuiltinDef::pure("math_floor", 1, |ctx, args| math1(ctx, args, "math_floor", f64::floor)),
        BuiltinDef::pure("math_ceil", 1, |ctx, args| math1(ctx, args, "math_ceil", f64::ceil)),
        BuiltinDef::pure("math_sqrt", 1, |ctx, args| math1(ctx, args, "math_sqrt", f64::sqrt)),
        BuiltinDef::pure("math_pow", 2, math_pow),
    ];
    if level.allows_pairs() {
        defs.extend([
            BuiltinDef::pure("pair", 2, pair),
            BuiltinDef::pure("head", 1, head),
            BuiltinDef::pure("tail", 1, tail),
            BuiltinDef::pure("is_pair", 1, is_pair),
            BuiltinDef::pure("is_null", 1, is_null),
            BuiltinDef::pure("is_list", 1, is_list),
            BuiltinDef {
                name: "list",
                arity: Arity::Variadic,
                kind: BuiltinKind::Pure,
                invoke: list,
            },
            BuiltinDef::pure("length", 1, length),
            BuiltinDef::effectful("draw_data", 1, draw_data),
        ]);
    }
    if level.allows_mutation() {
        defs.extend([
            BuiltinDef::pure("set_head", 2, set_head),
            BuiltinDef::pure("set_tail", 2, set_tail),
        ]);
    }
    defs
}

fn display(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let rendered = ctx.render(args[0]);
    ctx.hooks.raw_display(&rendered);
    Ok(args[0])
}

fn raise_error(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let message = match args[0] {
        Value::Str(id) => ctx.interner.resolve(id).to_owned(),
        other => ctx.render(other),
    };
    Err(ctx.fail(RuntimeErrorKind::UserRaised(message)))
}

fn prompt(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let message = ctx.render(args[0]);
    match ctx.hooks.prompt(&message) {
        Some(reply) => Ok(Value::Str(ctx.interner.intern(&reply))),
        None => Ok(Value::Null),
    }
}

fn alert(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let rendered = ctx.render(args[0]);
    ctx.hooks.alert(&rendered);
    Ok(Value::Undefined)
}

fn stringify_builtin(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let rendered = ctx.render(args[0]);
    Ok(Value::Str(ctx.interner.intern(&rendered)))
}

fn type_probe(_ctx: &mut BuiltinCtx<'_>, args: &[Value], name: &'static str) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(args[0].type_name() == name))
}

fn is_function(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let result = match args[0] {
        Value::Builtin(_) => true,
        Value::Ref(id) => matches!(
            ctx.heap.get(id),
            HeapData::Closure(_) | HeapData::VmClosure { .. }
        ),
        _ => false,
    };
    Ok(Value::Bool(result))
}

fn math1(
    ctx: &mut BuiltinCtx<'_>,
    args: &[Value],
    name: &str,
    f: fn(f64) -> f64,
) -> Result<Value, RuntimeError> {
    let n = args[0]
        .as_number()
        .ok_or_else(|| ctx.type_error(name, "number", args[0]))?;
    Ok(Value::Number(f(n)))
}

fn math_pow(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let base = args[0]
        .as_number()
        .ok_or_else(|| ctx.type_error("math_pow", "number", args[0]))?;
    let exp = args[1]
        .as_number()
        .ok_or_else(|| ctx.type_error("math_pow", "number", args[1]))?;
    Ok(Value::Number(base.powf(exp)))
}

fn pair(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(ctx.alloc(HeapData::Pair([args[0], args[1]])))
}

fn expect_pair(ctx: &BuiltinCtx<'_>, value: Value, name: &str) -> Result<crate::heap::HeapId, RuntimeError> {
    if let Value::Ref(id) = value
        && matches!(ctx.heap.get(id), HeapData::Pair(_))
    {
        return Ok(id);
    }
    Err(ctx.type_error(name, "pair", value))
}

fn head(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let id = expect_pair(ctx, args[0], "head")?;
    let HeapData::Pair([head, _]) = *ctx.heap.get(id) else {
        unreachable!("expect_pair returned a non-pair cell");
    };
    Ok(head)
}

fn tail(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let id = expect_pair(ctx, args[0], "tail")?;
    let HeapData::Pair([_, tail]) = *ctx.heap.get(id) else {
        unreachable!("expect_pair returned a non-pair cell");
    };
    Ok(tail)
}

fn set_head(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let id = expect_pair(ctx, args[0], "set_head")?;
    let HeapData::Pair(cell) = ctx.heap.get_mut(id) else {
        unreachable!("expect_pair returned a non-pair cell");
    };
    cell[0] = args[1];
    Ok(Value::Undefined)
}

fn set_tail(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let id = expect_pair(ctx, args[0], "set_tail")?;
    let HeapData::Pair(cell) = ctx.heap.get_mut(id) else {
        unreachable!("expect_pair returned a non-pair cell");
    };
    cell[1] = args[1];
    Ok(Value::Undefined)
}

fn is_pair(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let result = matches!(args[0], Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Pair(_)));
    Ok(Value::Bool(result))
}

fn is_null(_ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(args[0] == Value::Null))
}

fn is_list(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    // walk tails with a visited set so cyclic structures answer false
    let mut visited = ahash::AHashSet::new();
    let mut current = args[0];
    loop {
        match current {
            Value::Null => return Ok(Value::Bool(true)),
            Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Pair(_)) => {
                if !visited.insert(id) {
                    return Ok(Value::Bool(false));
                }
                let HeapData::Pair([_, tail]) = *ctx.heap.get(id) else {
                    unreachable!("matched pair above");
                };
                current = tail;
            }
            _ => return Ok(Value::Bool(false)),
        }
    }
}

fn list(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut result = Value::Null;
    for &arg in args.iter().rev() {
        result = ctx.alloc(HeapData::Pair([arg, result]));
    }
    Ok(result)
}

fn length(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut count = 0u64;
    let mut visited = ahash::AHashSet::new();
    let mut current = args[0];
    loop {
        match current {
            Value::Null => return Ok(Value::Number(count as f64)),
            Value::Ref(id) if matches!(ctx.heap.get(id), HeapData::Pair(_)) => {
                if !visited.insert(id) {
                    return Err(ctx.type_error("length", "list", args[0]));
                }
                let HeapData::Pair([_, tail]) = *ctx.heap.get(id) else {
                    unreachable!("matched pair above");
                };
                count += 1;
                current = tail;
            }
            other => return Err(ctx.type_error("length", "list", other)),
        }
    }
}

fn draw_data(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let rendered = ctx.render(args[0]);
    ctx.hooks.visualise_list(&rendered);
    Ok(args[0])
}
