//! Error taxonomy shared by the evaluator, compiler and session layer.
//!
//! Every error carries a kind, a severity, a source [`Span`], a short
//! `explain` message and a longer `elaborate` message. Formatting is done by
//! [`ErrorFormatter`], whose verbosity is per-formatter state rather than a
//! process-wide flag.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{ast::Span, intern::Interner};

/// How bad an error is. Warnings accumulate without aborting evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

/// The broad error families of the system.
///
/// `Import` and `Type` errors come from collaborators outside this crate
/// (the import preprocessor and the optional typechecker); they appear here
/// so session error logs can carry them uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    Import,
    Syntax,
    Type,
    Runtime,
}

/// Failures raised while the machine is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuntimeErrorKind {
    /// Name was never declared in any enclosing environment.
    UndefinedVariable(String),
    /// Name is declared in this scope but not yet initialised.
    UseBeforeDeclaration(String),
    /// Assignment to a `const` binding.
    ConstAssignment(String),
    /// Call applied to a value that is neither a closure nor a builtin.
    NotAFunction { repr: String },
    /// Closure or builtin called with the wrong number of arguments.
    ArityMismatch { name: String, expected: usize, got: usize },
    /// Operator applied to operand(s) of the wrong type.
    TypeMismatch {
        context: String,
        expected: String,
        got: String,
    },
    /// Division by zero, for variants that forbid it.
    DivisionByZero,
    /// Array index that is negative, fractional, or past the end on a read.
    IndexOutOfRange { index: f64, length: usize },
    /// Member access on a value that is not an array.
    NotAnArray { repr: String },
    /// Control depth guard tripped (runaway non-tail recursion).
    StackOverflow { depth: usize },
    /// Wall-clock budget exhausted.
    Timeout { millis: u64 },
    /// The host marked the session interrupted.
    Interrupted,
    /// Step budget exhausted with infinite-loop reporting enabled.
    PotentialInfiniteLoop { steps: u64 },
    /// `return` evaluated outside any function body.
    ReturnOutsideFunction,
    /// Raised by the `error` builtin.
    UserRaised(String),
    /// A host-provided builtin failed.
    BuiltinFailure { name: String, message: String },
}

/// A runtime error with the location of the node or instruction that raised
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub span: Span,
}

impl RuntimeError {
    #[must_use]
    pub fn new(kind: RuntimeErrorKind, span: Span) -> Self {
        Self { kind, span }
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        Severity::Error
    }

    /// One-line description of what went wrong.
    #[must_use]
    pub fn explain(&self) -> String {
        match &self.kind {
            RuntimeErrorKind::UndefinedVariable(name) => format!("Name {name} not declared."),
            RuntimeErrorKind::UseBeforeDeclaration(name) => {
                format!("Name {name} declared later in current scope but not yet assigned")
            }
            RuntimeErrorKind::ConstAssignment(name) => {
                format!("Cannot assign new value to constant {name}.")
            }
            RuntimeErrorKind::NotAFunction { repr } => format!("Calling non-function value {repr}."),
            RuntimeErrorKind::ArityMismatch { name, expected, got } => {
                let plural = if *expected == 1 { "" } else { "s" };
                format!("Expected {expected} argument{plural} for {name}, but got {got}.")
            }
            RuntimeErrorKind::TypeMismatch { context, expected, got } => {
                format!("Expected {expected} in {context}, got {got}.")
            }
            RuntimeErrorKind::DivisionByZero => "Division by zero.".to_owned(),
            RuntimeErrorKind::IndexOutOfRange { index, length } => {
                format!("Array index {index} out of range for array of length {length}.")
            }
            RuntimeErrorKind::NotAnArray { repr } => format!("Indexing non-array value {repr}."),
            RuntimeErrorKind::StackOverflow { .. } => "Maximum call stack size exceeded.".to_owned(),
            RuntimeErrorKind::Timeout { millis } => {
                format!("Execution aborted after running for {millis} ms.")
            }
            RuntimeErrorKind::Interrupted => "Execution aborted by user.".to_owned(),
            RuntimeErrorKind::PotentialInfiniteLoop { .. } => {
                "Potential infinite loop detected.".to_owned()
            }
            RuntimeErrorKind::ReturnOutsideFunction => "Return not allowed outside of a function.".to_owned(),
            RuntimeErrorKind::UserRaised(message) => format!("Error: {message}"),
            RuntimeErrorKind::BuiltinFailure { name, message } => {
                format!("Error in builtin {name}: {message}")
            }
        }
    }

    /// Longer guidance shown by verbose formatting.
    #[must_use]
    pub fn elaborate(&self) -> String {
        match &self.kind {
            RuntimeErrorKind::UndefinedVariable(name) => format!(
                "Before you can read the value of {name}, you need to declare it as a variable or a constant."
            ),
            RuntimeErrorKind::UseBeforeDeclaration(name) => format!(
                "The name {name} is declared in this scope, but the declaration has not been evaluated yet."
            ),
            RuntimeErrorKind::ConstAssignment(name) => format!(
                "As {name} was declared as a constant, you cannot assign a new value to it."
            ),
            RuntimeErrorKind::NotAFunction { repr } => format!(
                "Because {repr} is not a function, you cannot run {repr}(...)."
            ),
            RuntimeErrorKind::ArityMismatch { .. } => {
                "Try calling the function again with the number of arguments it declares.".to_owned()
            }
            RuntimeErrorKind::TypeMismatch { .. } => {
                "The operator only accepts operands of the listed type.".to_owned()
            }
            RuntimeErrorKind::StackOverflow { depth } => format!(
                "The evaluation reached a nesting depth of {depth} pending operations. \
                 A recursive call that is not in tail position grows this depth on every call."
            ),
            RuntimeErrorKind::PotentialInfiniteLoop { steps } => format!(
                "The program exceeded its step budget of {steps} steps without finishing. \
                 Check that every loop and recursion makes progress towards termination."
            ),
            RuntimeErrorKind::Timeout { .. } => {
                "The program ran past its wall-clock budget. It may contain an infinite loop, \
                 or it may simply need a larger time allowance."
                    .to_owned()
            }
            _ => self.explain(),
        }
    }
}

/// Syntax errors: constructs outside the active language level, or shapes the
/// lowering pass cannot accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    #[must_use]
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Import-phase errors, produced by the (external) import preprocessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportError {
    pub message: String,
    pub span: Span,
}

/// Typechecker errors, produced by the (external) typed-variant checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeError {
    pub message: String,
    pub span: Span,
}

/// Any error a session can log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlangError {
    Import(ImportError),
    Syntax(SyntaxError),
    Type(TypeError),
    Runtime(RuntimeError),
}

impl SlangError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Import(_) => ErrorKind::Import,
            Self::Syntax(_) => ErrorKind::Syntax,
            Self::Type(_) => ErrorKind::Type,
            Self::Runtime(_) => ErrorKind::Runtime,
        }
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        Severity::Error
    }

    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Self::Import(e) => e.span,
            Self::Syntax(e) => e.span,
            Self::Type(e) => e.span,
            Self::Runtime(e) => e.span,
        }
    }

    #[must_use]
    pub fn explain(&self) -> String {
        match self {
            Self::Import(e) => e.message.clone(),
            Self::Syntax(e) => e.message.clone(),
            Self::Type(e) => e.message.clone(),
            Self::Runtime(e) => e.explain(),
        }
    }

    #[must_use]
    pub fn elaborate(&self) -> String {
        match self {
            Self::Runtime(e) => e.elaborate(),
            _ => self.explain(),
        }
    }
}

impl From<RuntimeError> for SlangError {
    fn from(error: RuntimeError) -> Self {
        Self::Runtime(error)
    }
}

impl From<SyntaxError> for SlangError {
    fn from(error: SyntaxError) -> Self {
        Self::Syntax(error)
    }
}

impl fmt::Display for SlangError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.explain())
    }
}

impl std::error::Error for SlangError {}

/// Renders errors as `[file] Line L, Column C: explain`, appending the
/// elaboration when `verbose` is set. Both flags are per-formatter state,
/// never process-wide.
#[derive(Debug, Clone, Copy)]
pub struct ErrorFormatter {
    pub verbose: bool,
    /// Prefix messages with the originating file name when one is known.
    pub include_source: bool,
}

impl Default for ErrorFormatter {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ErrorFormatter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            include_source: true,
        }
    }

    #[must_use]
    pub fn format(&self, error: &SlangError, interner: &Interner) -> String {
        let span = error.span();
        let mut out = String::new();
        if self.include_source
            && let Some(source) = span.source
        {
            out.push('[');
            out.push_str(interner.resolve(source));
            out.push_str("] ");
        }
        if span.start.is_unknown() {
            out.push_str(&error.explain());
        } else {
            out.push_str(&format!(
                "Line {}, Column {}: {}",
                span.start.line,
                span.start.column,
                error.explain()
            ));
        }
        if self.verbose {
            out.push('\n');
            out.push_str(&error.elaborate());
        }
        out
    }

    /// Formats a whole error log, one error per line.
    #[must_use]
    pub fn format_all(&self, errors: &[SlangError], interner: &Interner) -> String {
        errors
            .iter()
            .map(|e| self.format(e, interner))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
