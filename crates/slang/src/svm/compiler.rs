//! AST to stack-VM compiler.
//!
//! Compilation keeps a compile-time scope chain that mirrors the runtime
//! environment chain exactly: one scope per function (its parameters) and
//! one per block that declares names (its `NEWENV`). A name therefore
//! resolves to a fixed `(envDepth, index)` lexical address; closures need no
//! free-variable analysis because `NEWC` captures the whole chain.
//!
//! Expressions emit code that leaves their value on the operand stack;
//! statements emit code that leaves the stack unchanged. Forward branches
//! are emitted with a zero offset and patched once the target is known,
//! using byte offsets relative to the next instruction as the wire format
//! demands.

use std::fmt;

use ahash::AHashMap;

use crate::{
    ast::{BinaryOp, Span, UnaryOp},
    builtins::{Builtins, source_builtins},
    error::SlangError,
    intern::{Interner, StringId},
    prepare::{Module, NodeId, NodeKind, prepare},
    session::Level,
    value::Value,
};

use super::program::{Instr, Program, SvmFunction};

/// Compile-time failures.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// A name that no enclosing scope declares and that is not a builtin.
    UndefinedVariable { name: String, span: Span },
    /// A scope exceeds the 8-bit lexical address space.
    TooManyLocals { span: Span },
    /// A shape this target does not support.
    UnsupportedConstruct { what: String, span: Span },
    /// The program failed the prepare pass.
    Prepare(Vec<SlangError>),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedVariable { name, .. } => write!(f, "undefined variable {name}"),
            Self::TooManyLocals { .. } => write!(f, "too many names in one scope"),
            Self::UnsupportedConstruct { what, .. } => write!(f, "cannot compile {what}"),
            Self::Prepare(errors) => {
                write!(f, "program failed preparation: ")?;
                for (i, error) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Compiles a program tree for the stack VM.
///
/// The builtin table is the standard set for `level`; primitive call
/// indices in the emitted code refer to that table, and
/// [`super::vm::run`] reconstructs the same table from the same level.
pub fn compile(program: &crate::ast::Node, level: Level) -> Result<Program, CompileError> {
    let mut interner = Interner::new();
    let module = prepare(program, level, &mut interner).map_err(CompileError::Prepare)?;
    let mut builtins = Builtins::new();
    for def in source_builtins(level) {
        builtins.register(def);
    }
    Compiler::new(&module, &interner, &builtins).compile_module()
}

pub(crate) struct Compiler<'a> {
    module: &'a Module,
    interner: &'a Interner,
    builtins: &'a Builtins,
    functions: Vec<Option<SvmFunction>>,
    strings: Vec<String>,
    string_ids: AHashMap<String, u32>,
    scopes: Vec<Scope>,
}

struct Scope {
    names: Vec<StringId>,
}

/// A lexical address: environment distance and slot.
#[derive(Debug, Clone, Copy)]
struct Address {
    depth: u8,
    index: u8,
}

impl<'a> Compiler<'a> {
    pub fn new(module: &'a Module, interner: &'a Interner, builtins: &'a Builtins) -> Self {
        Self {
            module,
            interner,
            builtins,
            functions: Vec::new(),
            strings: Vec::new(),
            string_ids: AHashMap::new(),
            scopes: Vec::new(),
        }
    }

    pub fn compile_module(mut self) -> Result<Program, CompileError> {
        let entry = self.compile_function(&[], self.module.root(), true)?;
        let functions = self
            .functions
            .into_iter()
            .map(|f| f.expect("every reserved function slot is filled"))
            .collect();
        Ok(Program {
            entry,
            functions,
            strings: self.strings,
        })
    }

    /// Compiles one function; `is_module` marks the entry function, whose
    /// final expression statement becomes the program result under `DONE`.
    fn compile_function(&mut self, params: &[StringId], body: NodeId, is_module: bool) -> Result<u32, CompileError> {
        let index = u32::try_from(self.functions.len()).expect("function table exceeds u32");
        self.functions.push(None);

        self.scopes.push(Scope {
            names: params.to_vec(),
        });
        let mut em = Emitter::default();

        if is_module {
            let value_left = self.compile_module_block(&mut em, body)?;
            if !value_left {
                em.emit(Instr::LgcU);
            }
            em.emit(Instr::Done);
        } else {
            self.compile_stmt(&mut em, body)?;
            // fell off the body without a return
            em.emit(Instr::RetU);
        }

        self.scopes.pop();

        let arity = u16::try_from(params.len()).expect("parameter count exceeds u16");
        self.functions[index as usize] = Some(SvmFunction {
            stack_size: em.max_stack,
            env_size: arity,
            arity,
            instrs: em.instrs,
        });
        Ok(index)
    }

    fn compile_module_block(&mut self, em: &mut Emitter, id: NodeId) -> Result<bool, CompileError> {
        let span = self.module.span(id);
        let NodeKind::Block { body, decls } = self.module.kind(id) else {
            return Err(CompileError::UnsupportedConstruct {
                what: "module without a block body".to_owned(),
                span,
            });
        };
        let scoped = self.enter_block_scope(decls, em, span)?;
        let mut value_left = false;
        let last = body.len().checked_sub(1);
        for (i, &stmt) in body.iter().enumerate() {
            if Some(i) == last
                && let NodeKind::ExprStmt { expr } = self.module.kind(stmt)
            {
                self.compile_expr(em, *expr)?;
                value_left = true;
            } else {
                self.compile_stmt(em, stmt)?;
            }
        }
        if scoped {
            em.emit(Instr::PopEnv);
            self.scopes.pop();
        }
        Ok(value_left)
    }

    fn enter_block_scope(
        &mut self,
        decls: &[(StringId, crate::ast::DeclarationKind)],
        em: &mut Emitter,
        span: Span,
    ) -> Result<bool, CompileError> {
        if decls.is_empty() {
            return Ok(false);
        }
        let count = u8::try_from(decls.len()).map_err(|_| CompileError::TooManyLocals { span })?;
        self.scopes.push(Scope {
            names: decls.iter().map(|(name, _)| *name).collect(),
        });
        em.emit(Instr::NewEnv(count));
        Ok(true)
    }

    fn resolve(&self, name: StringId) -> Option<Address> {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if let Some(index) = scope.names.iter().rposition(|&n| n == name) {
                return Some(Address {
                    depth: u8::try_from(depth).expect("lexical depth exceeds u8"),
                    index: u8::try_from(index).expect("slot index exceeds u8"),
                });
            }
        }
        None
    }

    fn load(&self, em: &mut Emitter, address: Address) {
        if address.depth == 0 {
            em.emit(Instr::Ldl(address.index));
        } else {
            em.emit(Instr::Ldp {
                depth: address.depth,
                index: address.index,
            });
        }
    }

    fn store(&self, em: &mut Emitter, address: Address) {
        if address.depth == 0 {
            em.emit(Instr::Stl(address.index));
        } else {
            em.emit(Instr::Stp {
                depth: address.depth,
                index: address.index,
            });
        }
    }

    fn string_index(&mut self, text: &str) -> u32 {
        if let Some(&id) = self.string_ids.get(text) {
            return id;
        }
        let id = u32::try_from(self.strings.len()).expect("string pool exceeds u32");
        self.strings.push(text.to_owned());
        self.string_ids.insert(text.to_owned(), id);
        id
    }

    // --- statements --------------------------------------------------------

    fn compile_stmt(&mut self, em: &mut Emitter, id: NodeId) -> Result<(), CompileError> {
        let module = self.module;
        let span = module.span(id);
        match module.kind(id) {
            NodeKind::VarDecl { name, init, .. } => {
                self.compile_expr(em, *init)?;
                let address = self.resolve(*name).ok_or_else(|| CompileError::UndefinedVariable {
                    name: self.interner.resolve(*name).to_owned(),
                    span,
                })?;
                self.store(em, address);
                Ok(())
            }
            NodeKind::ExprStmt { expr } => {
                self.compile_expr(em, *expr)?;
                em.emit(Instr::PopG);
                Ok(())
            }
            NodeKind::Return { arg } => match arg {
                Some(arg) => self.compile_tail_expr(em, *arg),
                None => {
                    em.emit(Instr::RetU);
                    Ok(())
                }
            },
            NodeKind::If { test, cons, alt } => {
                self.compile_expr(em, *test)?;
                let to_else = em.emit_forward(Instr::Brf(0));
                self.compile_stmt(em, *cons)?;
                match alt {
                    Some(alt) => {
                        let to_end = em.emit_forward(Instr::Br(0));
                        em.patch_forward(to_else);
                        self.compile_stmt(em, *alt)?;
                        em.patch_forward(to_end);
                    }
                    None => em.patch_forward(to_else),
                }
                Ok(())
            }
            NodeKind::While { test, body } => {
                let loop_start = em.here();
                self.compile_expr(em, *test)?;
                let to_exit = em.emit_forward(Instr::Brf(0));
                self.compile_stmt(em, *body)?;
                em.emit_branch_back(loop_start);
                em.patch_forward(to_exit);
                Ok(())
            }
            NodeKind::For {
                init,
                test,
                update,
                body,
                decl,
            } => {
                let scoped = if let Some((name, _)) = decl {
                    self.scopes.push(Scope { names: vec![*name] });
                    em.emit(Instr::NewEnv(1));
                    true
                } else {
                    false
                };
                if let Some(init) = init {
                    self.compile_stmt(em, *init)?;
                }
                let loop_start = em.here();
                self.compile_expr(em, *test)?;
                let to_exit = em.emit_forward(Instr::Brf(0));
                self.compile_stmt(em, *body)?;
                self.compile_expr(em, *update)?;
                em.emit(Instr::PopG);
                em.emit_branch_back(loop_start);
                em.patch_forward(to_exit);
                if scoped {
                    em.emit(Instr::PopEnv);
                    self.scopes.pop();
                }
                Ok(())
            }
            NodeKind::Block { body, decls } => {
                let scoped = self.enter_block_scope(decls, em, span)?;
                for &stmt in body {
                    self.compile_stmt(em, stmt)?;
                }
                if scoped {
                    em.emit(Instr::PopEnv);
                    self.scopes.pop();
                }
                Ok(())
            }
            NodeKind::Sequence { body } => {
                for &stmt in body {
                    self.compile_stmt(em, stmt)?;
                }
                Ok(())
            }
            // an expression in statement position
            _ => {
                self.compile_expr(em, id)?;
                em.emit(Instr::PopG);
                Ok(())
            }
        }
    }

    // --- expressions -------------------------------------------------------

    fn compile_expr(&mut self, em: &mut Emitter, id: NodeId) -> Result<(), CompileError> {
        let module = self.module;
        let span = module.span(id);
        match module.kind(id) {
            NodeKind::Literal(value) => {
                self.compile_literal(em, *value);
                Ok(())
            }
            NodeKind::Name(name) => match self.resolve(*name) {
                Some(address) => {
                    self.load(em, address);
                    Ok(())
                }
                None => {
                    let text = self.interner.resolve(*name);
                    if self.builtins.lookup(text).is_some() {
                        Err(CompileError::UnsupportedConstruct {
                            what: format!("primitive {text} used as a value"),
                            span,
                        })
                    } else {
                        Err(CompileError::UndefinedVariable {
                            name: text.to_owned(),
                            span,
                        })
                    }
                }
            },
            NodeKind::Binary { op, left, right } => {
                self.compile_expr(em, *left)?;
                self.compile_expr(em, *right)?;
                em.emit(binary_instr(*op));
                Ok(())
            }
            NodeKind::Unary { op, operand } => {
                self.compile_expr(em, *operand)?;
                em.emit(match op {
                    UnaryOp::Minus => Instr::NegG,
                    UnaryOp::Not => Instr::NotG,
                });
                Ok(())
            }
            NodeKind::Conditional { test, cons, alt } => {
                self.compile_expr(em, *test)?;
                let to_alt = em.emit_forward(Instr::Brf(0));
                let depth = em.cur_stack;
                self.compile_expr(em, *cons)?;
                let to_end = em.emit_forward(Instr::Br(0));
                em.patch_forward(to_alt);
                em.cur_stack = depth;
                self.compile_expr(em, *alt)?;
                em.patch_forward(to_end);
                Ok(())
            }
            NodeKind::Call { callee, args } => self.compile_call(em, *callee, args, span, false),
            NodeKind::Lambda { params, body, .. } => {
                let params = params.clone();
                let fn_index = self.compile_function(&params, *body, false)?;
                em.emit(Instr::NewC { fn_index });
                Ok(())
            }
            NodeKind::Assign { name, value } => {
                self.compile_expr(em, *value)?;
                let address = self.resolve(*name).ok_or_else(|| CompileError::UndefinedVariable {
                    name: self.interner.resolve(*name).to_owned(),
                    span,
                })?;
                self.store(em, address);
                self.load(em, address);
                Ok(())
            }
            NodeKind::Member { object, index } => {
                self.compile_expr(em, *object)?;
                self.compile_expr(em, *index)?;
                em.emit(Instr::LdaG);
                Ok(())
            }
            NodeKind::MemberAssign { object, index, value } => {
                self.compile_expr(em, *object)?;
                self.compile_expr(em, *index)?;
                self.compile_expr(em, *value)?;
                em.emit(Instr::StaG);
                // the assignment's value: re-read the slot
                self.compile_expr(em, *object)?;
                self.compile_expr(em, *index)?;
                em.emit(Instr::LdaG);
                Ok(())
            }
            NodeKind::ArrayLit { elements } => {
                em.emit(Instr::NewA);
                for (i, &element) in elements.iter().enumerate() {
                    em.emit(Instr::Dup);
                    em.emit(Instr::LgcI(i32::try_from(i).expect("array literal exceeds i32")));
                    self.compile_expr(em, element)?;
                    em.emit(Instr::StaG);
                }
                Ok(())
            }
            other => Err(CompileError::UnsupportedConstruct {
                what: format!("{} in expression position", other.tag()),
                span,
            }),
        }
    }

    fn compile_literal(&mut self, em: &mut Emitter, value: Value) {
        match value {
            Value::Number(n) => {
                let as_i32 = n as i32;
                if n.fract() == 0.0 && f64::from(as_i32) == n {
                    em.emit(Instr::LgcI(as_i32));
                } else {
                    em.emit(Instr::LgcF64(n));
                }
            }
            Value::Bool(false) => em.emit(Instr::LgcB0),
            Value::Bool(true) => em.emit(Instr::LgcB1),
            Value::Undefined => em.emit(Instr::LgcU),
            Value::Null => em.emit(Instr::LgcN),
            Value::Str(id) => {
                let index = self.string_index(self.interner.resolve(id));
                em.emit(Instr::LgcS(index));
            }
            Value::Ref(_) | Value::Builtin(_) | Value::Opaque(_) => {
                unreachable!("prepared literals are scalars")
            }
        }
    }

    fn compile_call(
        &mut self,
        em: &mut Emitter,
        callee: NodeId,
        args: &[NodeId],
        span: Span,
        tail: bool,
    ) -> Result<(), CompileError> {
        let argc = u8::try_from(args.len()).map_err(|_| CompileError::UnsupportedConstruct {
            what: "call with more than 255 arguments".to_owned(),
            span,
        })?;

        // a call to an unshadowed primitive compiles to CALLP (or NEWP)
        if let NodeKind::Name(name) = self.module.kind(callee)
            && self.resolve(*name).is_none()
        {
            let text = self.interner.resolve(*name);
            let Some(prim) = self.builtins.lookup(text) else {
                return Err(CompileError::UndefinedVariable {
                    name: text.to_owned(),
                    span,
                });
            };
            for &arg in args {
                self.compile_expr(em, arg)?;
            }
            if text == "pair" && args.len() == 2 {
                em.emit(Instr::NewP);
            } else {
                let prim = u8::try_from(prim.index()).map_err(|_| CompileError::UnsupportedConstruct {
                    what: format!("primitive table index for {text} exceeds u8"),
                    span,
                })?;
                em.emit(Instr::CallP { prim, argc });
            }
            if tail {
                em.emit(Instr::RetG);
            }
            return Ok(());
        }

        self.compile_expr(em, callee)?;
        for &arg in args {
            self.compile_expr(em, arg)?;
        }
        em.emit(if tail { Instr::CallT(argc) } else { Instr::Call(argc) });
        Ok(())
    }

    /// Compiles an expression in tail position: calls become `CALLT`,
    /// conditionals propagate tailness into both branches, everything else
    /// returns its value.
    fn compile_tail_expr(&mut self, em: &mut Emitter, id: NodeId) -> Result<(), CompileError> {
        let module = self.module;
        let span = module.span(id);
        match module.kind(id) {
            NodeKind::Call { callee, args } => self.compile_call(em, *callee, args, span, true),
            NodeKind::Conditional { test, cons, alt } => {
                self.compile_expr(em, *test)?;
                let to_alt = em.emit_forward(Instr::Brf(0));
                let depth = em.cur_stack;
                self.compile_tail_expr(em, *cons)?;
                em.patch_forward(to_alt);
                em.cur_stack = depth;
                self.compile_tail_expr(em, *alt)
            }
            _ => {
                self.compile_expr(em, id)?;
                em.emit(Instr::RetG);
                Ok(())
            }
        }
    }
}

fn binary_instr(op: BinaryOp) -> Instr {
    match op {
        BinaryOp::Add => Instr::AddG,
        BinaryOp::Sub => Instr::SubG,
        BinaryOp::Mul => Instr::MulG,
        BinaryOp::Div => Instr::DivG,
        BinaryOp::Mod => Instr::ModG,
        BinaryOp::Eq => Instr::EqG,
        BinaryOp::Neq => Instr::NeqG,
        BinaryOp::Lt => Instr::LtG,
        BinaryOp::Leq => Instr::LeG,
        BinaryOp::Gt => Instr::GtG,
        BinaryOp::Geq => Instr::GeG,
    }
}

/// Instruction buffer with byte-offset bookkeeping, forward-jump patching
/// and stack-depth tracking.
#[derive(Debug, Default)]
struct Emitter {
    instrs: Vec<Instr>,
    /// Byte offset of each instruction.
    offsets: Vec<usize>,
    byte_len: usize,
    cur_stack: i32,
    max_stack: u16,
}

impl Emitter {
    fn emit(&mut self, instr: Instr) {
        self.offsets.push(self.byte_len);
        self.byte_len += instr.byte_len();
        self.adjust(stack_effect(instr));
        self.instrs.push(instr);
    }

    /// Emits a branch with a placeholder offset; patch with
    /// [`Emitter::patch_forward`].
    fn emit_forward(&mut self, instr: Instr) -> usize {
        let site = self.instrs.len();
        self.emit(instr);
        site
    }

    /// Points a placeholder branch at the current position.
    fn patch_forward(&mut self, site: usize) {
        let after_branch = self.offsets[site] + self.instrs[site].byte_len();
        let offset = i32::try_from(self.byte_len - after_branch).expect("branch offset exceeds i32");
        self.instrs[site] = match self.instrs[site] {
            Instr::Br(_) => Instr::Br(offset),
            Instr::Brt(_) => Instr::Brt(offset),
            Instr::Brf(_) => Instr::Brf(offset),
            other => unreachable!("patching a non-branch instruction {other:?}"),
        };
    }

    /// Emits an unconditional branch back to a previously recorded byte
    /// position.
    fn emit_branch_back(&mut self, target_byte: usize) {
        let after_branch = self.byte_len + Instr::Br(0).byte_len();
        let offset = i32::try_from(target_byte as i64 - after_branch as i64).expect("branch offset exceeds i32");
        self.emit(Instr::Br(offset));
    }

    /// Current byte position, used as a backward-branch target.
    fn here(&self) -> usize {
        self.byte_len
    }

    fn adjust(&mut self, effect: i32) {
        self.cur_stack += effect;
        if self.cur_stack > i32::from(self.max_stack) {
            self.max_stack = u16::try_from(self.cur_stack).expect("stack depth exceeds u16");
        }
    }
}

/// Net operand-stack effect of an instruction.
fn stack_effect(instr: Instr) -> i32 {
    match instr {
        Instr::LgcI(_)
        | Instr::LgcF64(_)
        | Instr::LgcS(_)
        | Instr::LgcB0
        | Instr::LgcB1
        | Instr::LgcU
        | Instr::LgcN
        | Instr::NewA
        | Instr::NewC { .. }
        | Instr::Ldl(_)
        | Instr::Ldp { .. }
        | Instr::Dup => 1,
        Instr::Nop
        | Instr::NegG
        | Instr::NegN
        | Instr::NotG
        | Instr::Br(_)
        | Instr::Jmp(_)
        | Instr::RetN
        | Instr::RetU
        | Instr::NewEnv(_)
        | Instr::PopEnv => 0,
        Instr::AddG
        | Instr::SubG
        | Instr::MulG
        | Instr::DivG
        | Instr::ModG
        | Instr::AddN
        | Instr::SubN
        | Instr::MulN
        | Instr::DivN
        | Instr::ModN
        | Instr::AddS
        | Instr::EqG
        | Instr::NeqG
        | Instr::LtG
        | Instr::GtG
        | Instr::LeG
        | Instr::GeG
        | Instr::NewP
        | Instr::LdaG
        | Instr::Stl(_)
        | Instr::Stp { .. }
        | Instr::Brt(_)
        | Instr::Brf(_)
        | Instr::PopG
        | Instr::RetG
        | Instr::RetB
        | Instr::Done => -1,
        Instr::StaG => -3,
        Instr::Call(argc) | Instr::CallT(argc) => -i32::from(argc),
        Instr::CallP { argc, .. } => 1 - i32::from(argc),
    }
}
