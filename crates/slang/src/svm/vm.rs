//! Direct executor for compiled programs.
//!
//! A frame stack plus a shared operand stack; environments are slot vectors
//! chained by parent index, matching the `(envDepth, index)` addresses the
//! compiler assigns. Values, pairs and arrays use the same model as the
//! step evaluator, so results from both agree.
//!
//! Malformed *programs* (bad branch targets, slot indices past the declared
//! env size) indicate a compiler bug and panic; malformed *values* (calling
//! a number, indexing past an array) are runtime errors like anywhere else.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    ast::Span,
    builtins::{BuiltinCtx, Builtins, HostHooks, source_builtins},
    error::{RuntimeError, RuntimeErrorKind},
    heap::{Heap, HeapData, stringify_quoted},
    intern::Interner,
    session::Level,
    value::Value,
};

use super::program::{Instr, Program};

/// Frame-stack depth guard.
const MAX_FRAMES: usize = 16_384;

/// A finished run: the value plus the heap and interner needed to render it.
#[derive(Debug)]
pub struct SvmResult {
    pub value: Value,
    heap: Heap,
    interner: Interner,
    builtins: Builtins,
}

impl SvmResult {
    /// Renders the result the way the language echoes values.
    #[must_use]
    pub fn render(&self) -> String {
        stringify_quoted(self.value, &self.heap, &self.interner, &self.builtins)
    }
}

/// Runs a program against the standard builtin set for `level`.
///
/// The level must match the one the program was compiled with; primitive
/// call indices refer to that table.
pub fn run(program: &Program, level: Level, hooks: &mut dyn HostHooks) -> Result<SvmResult, RuntimeError> {
    let mut builtins = Builtins::new();
    for def in source_builtins(level) {
        builtins.register(def);
    }
    run_with(program, builtins, hooks)
}

/// Runs a program against an explicit builtin table.
pub fn run_with(
    program: &Program,
    builtins: Builtins,
    hooks: &mut dyn HostHooks,
) -> Result<SvmResult, RuntimeError> {
    let mut vm = Vm::new(program, builtins, hooks);
    let value = vm.run()?;
    Ok(SvmResult {
        value,
        heap: vm.heap,
        interner: vm.interner,
        builtins: vm.builtins,
    })
}

#[derive(Debug)]
struct VmEnv {
    parent: Option<u32>,
    slots: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    fn_index: usize,
    ip: usize,
    env: u32,
    stack_base: usize,
}

/// Byte-offset bookkeeping for one function, so byte-relative branches can
/// land on instruction indices.
struct FnLayout {
    byte_of: Vec<usize>,
    index_of_byte: AHashMap<usize, usize>,
}

impl FnLayout {
    fn new(instrs: &[Instr]) -> Self {
        let mut byte_of = Vec::with_capacity(instrs.len());
        let mut index_of_byte = AHashMap::with_capacity(instrs.len());
        let mut byte = 0usize;
        for (index, instr) in instrs.iter().enumerate() {
            byte_of.push(byte);
            index_of_byte.insert(byte, index);
            byte += instr.byte_len();
        }
        Self {
            byte_of,
            index_of_byte,
        }
    }

    fn target(&self, from_index: usize, from_len: usize, offset: i64) -> usize {
        let next_byte = self.byte_of[from_index] + from_len;
        let target_byte = i64::try_from(next_byte).expect("code size fits i64") + offset;
        let target_byte = usize::try_from(target_byte).expect("branch target is negative");
        *self
            .index_of_byte
            .get(&target_byte)
            .expect("branch target does not align with an instruction")
    }
}

struct Vm<'a> {
    program: &'a Program,
    layouts: Vec<FnLayout>,
    builtins: Builtins,
    hooks: &'a mut dyn HostHooks,
    heap: Heap,
    interner: Interner,
    envs: Vec<VmEnv>,
    stack: Vec<Value>,
    frames: Vec<Frame>,
}

impl<'a> Vm<'a> {
    fn new(program: &'a Program, builtins: Builtins, hooks: &'a mut dyn HostHooks) -> Self {
        let layouts = program.functions.iter().map(|f| FnLayout::new(&f.instrs)).collect();
        let entry = program.entry_function();
        let envs = vec![VmEnv {
            parent: None,
            slots: vec![Value::Undefined; entry.env_size as usize],
        }];
        let frames = vec![Frame {
            fn_index: program.entry as usize,
            ip: 0,
            env: 0,
            stack_base: 0,
        }];
        Self {
            program,
            layouts,
            builtins,
            hooks,
            heap: Heap::new(),
            interner: Interner::new(),
            envs,
            stack: Vec::new(),
            frames,
        }
    }

    fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            let frame = *self.frames.last().expect("frame stack never empties mid-run");
            let function = &self.program.functions[frame.fn_index];
            let instr = function.instrs[frame.ip];
            self.frames.last_mut().expect("checked above").ip += 1;

            match instr {
                Instr::Nop => {}
                Instr::LgcI(v) => self.stack.push(Value::Number(f64::from(v))),
                Instr::LgcF64(v) => self.stack.push(Value::Number(v)),
                Instr::LgcS(index) => {
                    let text = &self.program.strings[index as usize];
                    let id = self.interner.intern(text);
                    self.stack.push(Value::Str(id));
                }
                Instr::LgcB0 => self.stack.push(Value::Bool(false)),
                Instr::LgcB1 => self.stack.push(Value::Bool(true)),
                Instr::LgcU => self.stack.push(Value::Undefined),
                Instr::LgcN => self.stack.push(Value::Null),

                Instr::AddG | Instr::SubG | Instr::MulG | Instr::DivG | Instr::ModG => {
                    let right = self.pop();
                    let left = self.pop();
                    let result = self.arith_generic(instr, left, right)?;
                    self.stack.push(result);
                }
                Instr::AddN | Instr::SubN | Instr::MulN | Instr::DivN | Instr::ModN => {
                    let right_value = self.pop();
                    let left_value = self.pop();
                    let right = self.number(right_value, "numeric operation")?;
                    let left = self.number(left_value, "numeric operation")?;
                    let result = match instr {
                        Instr::AddN => left + right,
                        Instr::SubN => left - right,
                        Instr::MulN => left * right,
                        Instr::DivN => left / right,
                        Instr::ModN => left % right,
                        _ => unreachable!("matched arm above"),
                    };
                    self.stack.push(Value::Number(result));
                }
                Instr::AddS => {
                    let right = self.pop();
                    let left = self.pop();
                    let (Value::Str(a), Value::Str(b)) = (left, right) else {
                        return Err(self.type_mismatch("string concatenation", "string", left));
                    };
                    let joined = format!("{}{}", self.interner.resolve(a), self.interner.resolve(b));
                    let id = self.interner.intern(&joined);
                    self.stack.push(Value::Str(id));
                }
                Instr::NegG | Instr::NegN => {
                    let value = self.pop();
                    let n = self.number(value, "unary -")?;
                    self.stack.push(Value::Number(-n));
                }
                Instr::NotG => {
                    let v = self.pop();
                    let Some(b) = v.as_bool() else {
                        return Err(self.type_mismatch("operand of !", "boolean", v));
                    };
                    self.stack.push(Value::Bool(!b));
                }

                Instr::EqG => {
                    let right = self.pop();
                    let left = self.pop();
                    self.stack.push(Value::Bool(left == right));
                }
                Instr::NeqG => {
                    let right = self.pop();
                    let left = self.pop();
                    self.stack.push(Value::Bool(left != right));
                }
                Instr::LtG | Instr::GtG | Instr::LeG | Instr::GeG => {
                    let right = self.pop();
                    let left = self.pop();
                    let result = self.compare(instr, left, right)?;
                    self.stack.push(Value::Bool(result));
                }

                Instr::NewC { fn_index } => {
                    let env = frame.env;
                    let cell = self.heap.alloc(HeapData::VmClosure { fn_index, env });
                    self.stack.push(Value::Ref(cell));
                }
                Instr::NewP => {
                    let tail = self.pop();
                    let head = self.pop();
                    let cell = self.heap.alloc(HeapData::Pair([head, tail]));
                    self.stack.push(Value::Ref(cell));
                }
                Instr::NewA => {
                    let cell = self.heap.alloc(HeapData::Array(Vec::new()));
                    self.stack.push(Value::Ref(cell));
                }

                Instr::Ldl(index) => {
                    let value = self.envs[frame.env as usize].slots[index as usize];
                    self.stack.push(value);
                }
                Instr::Stl(index) => {
                    let value = self.pop();
                    self.envs[frame.env as usize].slots[index as usize] = value;
                }
                Instr::Ldp { depth, index } => {
                    let env = self.walk_env(frame.env, depth);
                    self.stack.push(self.envs[env as usize].slots[index as usize]);
                }
                Instr::Stp { depth, index } => {
                    let value = self.pop();
                    let env = self.walk_env(frame.env, depth);
                    self.envs[env as usize].slots[index as usize] = value;
                }

                Instr::LdaG => {
                    let index = self.pop();
                    let object = self.pop();
                    let (cell, index) = self.check_array(object, index)?;
                    let HeapData::Array(elements) = self.heap.get(cell) else {
                        unreachable!("check_array returned a non-array cell");
                    };
                    let Some(&value) = elements.get(index) else {
                        return Err(RuntimeError::new(
                            RuntimeErrorKind::IndexOutOfRange {
                                index: index as f64,
                                length: elements.len(),
                            },
                            Span::UNKNOWN,
                        ));
                    };
                    self.stack.push(value);
                }
                Instr::StaG => {
                    let value = self.pop();
                    let index = self.pop();
                    let object = self.pop();
                    let (cell, index) = self.check_array(object, index)?;
                    let HeapData::Array(elements) = self.heap.get_mut(cell) else {
                        unreachable!("check_array returned a non-array cell");
                    };
                    if index >= elements.len() {
                        elements.resize(index + 1, Value::Undefined);
                    }
                    elements[index] = value;
                }
                Instr::Dup => {
                    let top = *self.stack.last().expect("DUP on an empty stack");
                    self.stack.push(top);
                }
                Instr::PopG => {
                    self.pop();
                }

                Instr::Br(offset) => self.branch(frame.fn_index, i64::from(offset)),
                Instr::Brt(offset) => {
                    let v = self.pop();
                    let Some(b) = v.as_bool() else {
                        return Err(self.type_mismatch("branch condition", "boolean", v));
                    };
                    if b {
                        self.branch(frame.fn_index, i64::from(offset));
                    }
                }
                Instr::Brf(offset) => {
                    let v = self.pop();
                    let Some(b) = v.as_bool() else {
                        return Err(self.type_mismatch("branch condition", "boolean", v));
                    };
                    if !b {
                        self.branch(frame.fn_index, i64::from(offset));
                    }
                }
                Instr::Jmp(byte) => {
                    let frame_mut = self.frames.last_mut().expect("frame stack never empties mid-run");
                    let layout = &self.layouts[frame_mut.fn_index];
                    frame_mut.ip = *layout
                        .index_of_byte
                        .get(&(byte as usize))
                        .expect("jump target does not align with an instruction");
                }

                Instr::Call(argc) => self.call(argc, false)?,
                Instr::CallT(argc) => self.call(argc, true)?,
                Instr::CallP { prim, argc } => self.call_primitive(prim, argc)?,

                Instr::RetG => {
                    let value = self.pop();
                    if let Some(result) = self.do_return(value) {
                        return Ok(result);
                    }
                }
                Instr::RetN => {
                    if let Some(result) = self.do_return(Value::Null) {
                        return Ok(result);
                    }
                }
                Instr::RetU => {
                    if let Some(result) = self.do_return(Value::Undefined) {
                        return Ok(result);
                    }
                }
                Instr::RetB => {
                    let value = self.pop();
                    if value.as_bool().is_none() {
                        return Err(self.type_mismatch("boolean return", "boolean", value));
                    }
                    if let Some(result) = self.do_return(value) {
                        return Ok(result);
                    }
                }

                Instr::NewEnv(size) => {
                    let env = u32::try_from(self.envs.len()).expect("environment arena exceeds u32");
                    self.envs.push(VmEnv {
                        parent: Some(frame.env),
                        slots: vec![Value::Undefined; size as usize],
                    });
                    self.frames.last_mut().expect("frame stack never empties mid-run").env = env;
                }
                Instr::PopEnv => {
                    let parent = self.envs[frame.env as usize]
                        .parent
                        .expect("POPENV with no parent environment");
                    self.frames.last_mut().expect("frame stack never empties mid-run").env = parent;
                }

                Instr::Done => {
                    let base = frame.stack_base;
                    let value = if self.stack.len() > base {
                        self.pop()
                    } else {
                        Value::Undefined
                    };
                    return Ok(value);
                }
            }
        }
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    fn branch(&mut self, fn_index: usize, offset: i64) {
        let frame = self.frames.last_mut().expect("frame stack never empties mid-run");
        let from_index = frame.ip - 1;
        let from_len = self.program.functions[fn_index].instrs[from_index].byte_len();
        frame.ip = self.layouts[fn_index].target(from_index, from_len, offset);
    }

    fn walk_env(&self, mut env: u32, depth: u8) -> u32 {
        for _ in 0..depth {
            env = self.envs[env as usize]
                .parent
                .expect("lexical address deeper than the environment chain");
        }
        env
    }

    fn do_return(&mut self, value: Value) -> Option<Value> {
        let frame = self.frames.pop().expect("return with no frame");
        self.stack.truncate(frame.stack_base);
        if self.frames.is_empty() {
            return Some(value);
        }
        self.stack.push(value);
        None
    }

    fn call(&mut self, argc: u8, tail: bool) -> Result<(), RuntimeError> {
        let mut args: SmallVec<[Value; 8]> = SmallVec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.pop());
        }
        args.reverse();
        let callee = self.pop();

        let Value::Ref(cell) = callee else {
            return Err(self.not_a_function(callee));
        };
        let HeapData::VmClosure { fn_index, env } = *self.heap.get(cell) else {
            return Err(self.not_a_function(callee));
        };

        let function = &self.program.functions[fn_index as usize];
        if usize::from(function.arity) != args.len() {
            return Err(RuntimeError::new(
                RuntimeErrorKind::ArityMismatch {
                    name: "function".to_owned(),
                    expected: usize::from(function.arity),
                    got: args.len(),
                },
                Span::UNKNOWN,
            ));
        }

        let stack_base = if tail {
            let old = self.frames.pop().expect("tail call with no frame");
            self.stack.truncate(old.stack_base);
            old.stack_base
        } else {
            self.stack.len()
        };

        if self.frames.len() >= MAX_FRAMES {
            return Err(RuntimeError::new(
                RuntimeErrorKind::StackOverflow { depth: self.frames.len() },
                Span::UNKNOWN,
            ));
        }

        let mut slots = Vec::with_capacity(function.env_size as usize);
        slots.extend(args);
        slots.resize(function.env_size as usize, Value::Undefined);
        let new_env = u32::try_from(self.envs.len()).expect("environment arena exceeds u32");
        self.envs.push(VmEnv {
            parent: Some(env),
            slots,
        });
        self.frames.push(Frame {
            fn_index: fn_index as usize,
            ip: 0,
            env: new_env,
            stack_base,
        });
        Ok(())
    }

    fn call_primitive(&mut self, prim: u8, argc: u8) -> Result<(), RuntimeError> {
        let mut args: SmallVec<[Value; 8]> = SmallVec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.pop());
        }
        args.reverse();

        if usize::from(prim) >= self.builtins.len() {
            return Err(RuntimeError::new(
                RuntimeErrorKind::BuiltinFailure {
                    name: format!("primitive #{prim}"),
                    message: "not present in the builtin table".to_owned(),
                },
                Span::UNKNOWN,
            ));
        }
        let id = crate::value::BuiltinId(u32::from(prim));
        let def = self.builtins.get(id);
        if !def.arity.accepts(args.len()) {
            return Err(RuntimeError::new(
                RuntimeErrorKind::ArityMismatch {
                    name: def.name.to_owned(),
                    expected: def.arity.expected(),
                    got: args.len(),
                },
                Span::UNKNOWN,
            ));
        }
        let invoke = def.invoke;
        let mut ctx = BuiltinCtx {
            heap: &mut self.heap,
            interner: &mut self.interner,
            attribution: None,
            builtins: &self.builtins,
            hooks: &mut *self.hooks,
            span: Span::UNKNOWN,
        };
        let result = invoke(&mut ctx, &args)?;
        self.stack.push(result);
        Ok(())
    }

    fn arith_generic(&mut self, instr: Instr, left: Value, right: Value) -> Result<Value, RuntimeError> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(match instr {
                Instr::AddG => a + b,
                Instr::SubG => a - b,
                Instr::MulG => a * b,
                Instr::DivG => a / b,
                Instr::ModG => a % b,
                _ => unreachable!("caller passes arithmetic opcodes only"),
            })),
            (Value::Str(a), Value::Str(b)) if matches!(instr, Instr::AddG) => {
                let joined = format!("{}{}", self.interner.resolve(a), self.interner.resolve(b));
                let id = self.interner.intern(&joined);
                Ok(Value::Str(id))
            }
            (Value::Number(_) | Value::Str(_), other) | (other, _) => {
                Err(self.type_mismatch("arithmetic operation", "number or string", other))
            }
        }
    }

    fn compare(&self, instr: Instr, left: Value, right: Value) -> Result<bool, RuntimeError> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(match instr {
                Instr::LtG => a < b,
                Instr::GtG => a > b,
                Instr::LeG => a <= b,
                Instr::GeG => a >= b,
                _ => unreachable!("caller passes comparison opcodes only"),
            }),
            (Value::Str(a), Value::Str(b)) => {
                let a = self.interner.resolve(a);
                let b = self.interner.resolve(b);
                Ok(match instr {
                    Instr::LtG => a < b,
                    Instr::GtG => a > b,
                    Instr::LeG => a <= b,
                    Instr::GeG => a >= b,
                    _ => unreachable!("caller passes comparison opcodes only"),
                })
            }
            (Value::Number(_) | Value::Str(_), other) | (other, _) => {
                Err(self.type_mismatch("comparison", "number or string", other))
            }
        }
    }

    fn check_array(&self, object: Value, index: Value) -> Result<(crate::heap::HeapId, usize), RuntimeError> {
        let Value::Ref(cell) = object else {
            return Err(RuntimeError::new(
                RuntimeErrorKind::NotAnArray {
                    repr: object.scalar_repr(&self.interner),
                },
                Span::UNKNOWN,
            ));
        };
        if !matches!(self.heap.get(cell), HeapData::Array(_)) {
            return Err(RuntimeError::new(
                RuntimeErrorKind::NotAnArray {
                    repr: object.scalar_repr(&self.interner),
                },
                Span::UNKNOWN,
            ));
        }
        let Some(n) = index.as_number() else {
            return Err(self.type_mismatch("array index", "number", index));
        };
        if n.fract() != 0.0 || n < 0.0 {
            return Err(RuntimeError::new(
                RuntimeErrorKind::IndexOutOfRange { index: n, length: 0 },
                Span::UNKNOWN,
            ));
        }
        Ok((cell, n as usize))
    }

    fn number(&self, value: Value, context: &str) -> Result<f64, RuntimeError> {
        value
            .as_number()
            .ok_or_else(|| self.type_mismatch(context, "number", value))
    }

    fn type_mismatch(&self, context: &str, expected: &'static str, got: Value) -> RuntimeError {
        RuntimeError::new(
            RuntimeErrorKind::TypeMismatch {
                context: context.to_owned(),
                expected: expected.to_owned(),
                got: got.scalar_repr(&self.interner),
            },
            Span::UNKNOWN,
        )
    }

    fn not_a_function(&self, callee: Value) -> RuntimeError {
        RuntimeError::new(
            RuntimeErrorKind::NotAFunction {
                repr: callee.scalar_repr(&self.interner),
            },
            Span::UNKNOWN,
        )
    }
}
