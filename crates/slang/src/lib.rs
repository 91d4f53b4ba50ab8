#![doc = include_str!("../../../README.md")]

pub mod ast;
mod builtins;
mod control;
mod env;
mod error;
mod heap;
mod intern;
mod machine;
mod prepare;
mod session;
pub mod svm;
pub mod tracer;
mod value;

pub use crate::{
    builtins::{
        Arity, BuiltinCtx, BuiltinDef, BuiltinImpl, BuiltinKind, Builtins, CollectHooks, HostHooks, NullHooks,
        StdHooks, source_builtins,
    },
    env::{AssignFailure, Binding, EnvId, Environments, Frame, GLOBAL_ENV, LookupFailure},
    error::{
        ErrorFormatter, ErrorKind, ImportError, RuntimeError, RuntimeErrorKind, Severity, SlangError, SyntaxError,
        TypeError,
    },
    heap::{Closure, Heap, HeapData, HeapId, stringify, stringify_quoted},
    intern::{Interner, StringId},
    prepare::{Module, NodeId},
    session::{
        EvalOptions, ExecutionMethod, InterruptHandle, Level, Outcome, Session, SessionError, SessionState,
        Suspension, Transformer, Variant,
    },
    value::{BuiltinId, OpaqueId, Value, format_number},
};
