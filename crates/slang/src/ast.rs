//! The ECMAScript-style syntax tree accepted by the evaluator and compiler.
//!
//! An upstream parser produces this tree; the crate never sees source text.
//! The node kinds mirror the estree shapes for the constructs the Source
//! language family supports, plus [`Node::StatementSequence`], a flat
//! statement list that does not introduce a new environment.
//!
//! Constructor helpers (e.g. [`Node::number`], [`Node::call`]) build nodes
//! with [`Loc::unknown`] locations; hosts that track positions attach real
//! locations via [`Node::at`].

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::intern::{Interner, StringId};

/// A line/column pair, 1-based lines as parsers conventionally emit them.
///
/// Unknown positions are encoded as `{-1, -1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: i32,
    pub column: i32,
}

impl Position {
    pub const UNKNOWN: Self = Self { line: -1, column: -1 };

    #[must_use]
    pub fn new(line: i32, column: i32) -> Self {
        Self { line, column }
    }

    #[must_use]
    pub fn is_unknown(self) -> bool {
        self.line < 0
    }
}

/// Source extent of a node, with an optional originating file name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Loc {
    pub source: Option<String>,
    pub start: Position,
    pub end: Position,
}

impl Loc {
    #[must_use]
    pub fn new(start: Position, end: Position) -> Self {
        Self {
            source: None,
            start,
            end,
        }
    }

    /// The location used when a parser did not record one.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            source: None,
            start: Position::UNKNOWN,
            end: Position::UNKNOWN,
        }
    }
}

/// Compact location carried on prepared nodes, instructions and errors.
///
/// The file name, when present, is interned so spans stay `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub source: Option<StringId>,
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub const UNKNOWN: Self = Self {
        source: None,
        start: Position::UNKNOWN,
        end: Position::UNKNOWN,
    };

    pub(crate) fn from_loc(loc: &Loc, interner: &mut Interner) -> Self {
        Self {
            source: loc.source.as_deref().map(|s| interner.intern(s)),
            start: loc.start,
            end: loc.end,
        }
    }
}

/// Binary operators of the language: arithmetic, string concatenation via
/// `+`, and comparisons. Strict (in)equality is included here because the
/// machine treats it as an ordinary two-operand instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "===")]
    Eq,
    #[strum(serialize = "!==")]
    Neq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Leq,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Geq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum LogicalOp {
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum UnaryOp {
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "!")]
    Not,
}

/// Declaration kind for `const` and `let` bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum DeclarationKind {
    #[strum(serialize = "const")]
    Const,
    #[strum(serialize = "let")]
    Let,
}

/// Literal payloads. Numbers are IEEE-754 doubles like the rest of the
/// language; `Undefined` appears for synthesized defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Undefined,
}

/// A syntax-tree node.
///
/// Every variant carries its [`Loc`]; trees built with the constructor
/// helpers start with unknown locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Program {
        body: Vec<Node>,
        loc: Loc,
    },
    /// A flat statement list evaluated in the *current* environment.
    StatementSequence {
        body: Vec<Node>,
        loc: Loc,
    },
    Literal {
        value: LiteralValue,
        loc: Loc,
    },
    Identifier {
        name: String,
        loc: Loc,
    },
    BinaryExpression {
        operator: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
        loc: Loc,
    },
    LogicalExpression {
        operator: LogicalOp,
        left: Box<Node>,
        right: Box<Node>,
        loc: Loc,
    },
    UnaryExpression {
        operator: UnaryOp,
        argument: Box<Node>,
        loc: Loc,
    },
    ConditionalExpression {
        test: Box<Node>,
        consequent: Box<Node>,
        alternate: Box<Node>,
        loc: Loc,
    },
    CallExpression {
        callee: Box<Node>,
        arguments: Vec<Node>,
        loc: Loc,
    },
    FunctionDeclaration {
        name: String,
        params: Vec<String>,
        body: Box<Node>,
        loc: Loc,
    },
    FunctionExpression {
        name: Option<String>,
        params: Vec<String>,
        body: Box<Node>,
        loc: Loc,
    },
    /// Arrow functions allow an expression body; declaration and function
    /// expression bodies are always blocks.
    ArrowFunctionExpression {
        params: Vec<String>,
        body: Box<Node>,
        loc: Loc,
    },
    VariableDeclaration {
        kind: DeclarationKind,
        name: String,
        init: Box<Node>,
        loc: Loc,
    },
    AssignmentExpression {
        target: Box<Node>,
        value: Box<Node>,
        loc: Loc,
    },
    BlockStatement {
        body: Vec<Node>,
        loc: Loc,
    },
    ReturnStatement {
        argument: Option<Box<Node>>,
        loc: Loc,
    },
    IfStatement {
        test: Box<Node>,
        consequent: Box<Node>,
        alternate: Option<Box<Node>>,
        loc: Loc,
    },
    WhileStatement {
        test: Box<Node>,
        body: Box<Node>,
        loc: Loc,
    },
    ForStatement {
        init: Option<Box<Node>>,
        test: Box<Node>,
        update: Box<Node>,
        body: Box<Node>,
        loc: Loc,
    },
    ExpressionStatement {
        expression: Box<Node>,
        loc: Loc,
    },
    ArrayExpression {
        elements: Vec<Node>,
        loc: Loc,
    },
    MemberExpression {
        object: Box<Node>,
        property: Box<Node>,
        loc: Loc,
    },
}

impl Node {
    /// Returns this node's location.
    #[must_use]
    pub fn loc(&self) -> &Loc {
        match self {
            Self::Program { loc, .. }
            | Self::StatementSequence { loc, .. }
            | Self::Literal { loc, .. }
            | Self::Identifier { loc, .. }
            | Self::BinaryExpression { loc, .. }
            | Self::LogicalExpression { loc, .. }
            | Self::UnaryExpression { loc, .. }
            | Self::ConditionalExpression { loc, .. }
            | Self::CallExpression { loc, .. }
            | Self::FunctionDeclaration { loc, .. }
            | Self::FunctionExpression { loc, .. }
            | Self::ArrowFunctionExpression { loc, .. }
            | Self::VariableDeclaration { loc, .. }
            | Self::AssignmentExpression { loc, .. }
            | Self::BlockStatement { loc, .. }
            | Self::ReturnStatement { loc, .. }
            | Self::IfStatement { loc, .. }
            | Self::WhileStatement { loc, .. }
            | Self::ForStatement { loc, .. }
            | Self::ExpressionStatement { loc, .. }
            | Self::ArrayExpression { loc, .. }
            | Self::MemberExpression { loc, .. } => loc,
        }
    }

    fn loc_mut(&mut self) -> &mut Loc {
        match self {
            Self::Program { loc, .. }
            | Self::StatementSequence { loc, .. }
            | Self::Literal { loc, .. }
            | Self::Identifier { loc, .. }
            | Self::BinaryExpression { loc, .. }
            | Self::LogicalExpression { loc, .. }
            | Self::UnaryExpression { loc, .. }
            | Self::ConditionalExpression { loc, .. }
            | Self::CallExpression { loc, .. }
            | Self::FunctionDeclaration { loc, .. }
            | Self::FunctionExpression { loc, .. }
            | Self::ArrowFunctionExpression { loc, .. }
            | Self::VariableDeclaration { loc, .. }
            | Self::AssignmentExpression { loc, .. }
            | Self::BlockStatement { loc, .. }
            | Self::ReturnStatement { loc, .. }
            | Self::IfStatement { loc, .. }
            | Self::WhileStatement { loc, .. }
            | Self::ForStatement { loc, .. }
            | Self::ExpressionStatement { loc, .. }
            | Self::ArrayExpression { loc, .. }
            | Self::MemberExpression { loc, .. } => loc,
        }
    }

    /// Attaches a location, returning the node for chaining.
    #[must_use]
    pub fn at(mut self, loc: Loc) -> Self {
        *self.loc_mut() = loc;
        self
    }

    // --- constructor helpers ---

    #[must_use]
    pub fn program(body: Vec<Self>) -> Self {
        Self::Program {
            body,
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn sequence(body: Vec<Self>) -> Self {
        Self::StatementSequence {
            body,
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn number(value: f64) -> Self {
        Self::Literal {
            value: LiteralValue::Number(value),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal {
            value: LiteralValue::String(value.into()),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::Literal {
            value: LiteralValue::Boolean(value),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn null() -> Self {
        Self::Literal {
            value: LiteralValue::Null,
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn undefined() -> Self {
        Self::Literal {
            value: LiteralValue::Undefined,
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Identifier {
            name: name.into(),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn binary(operator: BinaryOp, left: Self, right: Self) -> Self {
        Self::BinaryExpression {
            operator,
            left: Box::new(left),
            right: Box::new(right),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn logical(operator: LogicalOp, left: Self, right: Self) -> Self {
        Self::LogicalExpression {
            operator,
            left: Box::new(left),
            right: Box::new(right),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn unary(operator: UnaryOp, argument: Self) -> Self {
        Self::UnaryExpression {
            operator,
            argument: Box::new(argument),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn conditional(test: Self, consequent: Self, alternate: Self) -> Self {
        Self::ConditionalExpression {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn call(callee: Self, arguments: Vec<Self>) -> Self {
        Self::CallExpression {
            callee: Box::new(callee),
            arguments,
            loc: Loc::unknown(),
        }
    }

    /// Convenience for calling a named function or builtin.
    #[must_use]
    pub fn call_name(name: impl Into<String>, arguments: Vec<Self>) -> Self {
        Self::call(Self::name(name), arguments)
    }

    #[must_use]
    pub fn arrow(params: Vec<&str>, body: Self) -> Self {
        Self::ArrowFunctionExpression {
            params: params.into_iter().map(str::to_owned).collect(),
            body: Box::new(body),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn function_decl(name: impl Into<String>, params: Vec<&str>, body: Self) -> Self {
        Self::FunctionDeclaration {
            name: name.into(),
            params: params.into_iter().map(str::to_owned).collect(),
            body: Box::new(body),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn const_decl(name: impl Into<String>, init: Self) -> Self {
        Self::VariableDeclaration {
            kind: DeclarationKind::Const,
            name: name.into(),
            init: Box::new(init),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn let_decl(name: impl Into<String>, init: Self) -> Self {
        Self::VariableDeclaration {
            kind: DeclarationKind::Let,
            name: name.into(),
            init: Box::new(init),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn assign(target: Self, value: Self) -> Self {
        Self::AssignmentExpression {
            target: Box::new(target),
            value: Box::new(value),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn block(body: Vec<Self>) -> Self {
        Self::BlockStatement {
            body,
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn ret(argument: Self) -> Self {
        Self::ReturnStatement {
            argument: Some(Box::new(argument)),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn ret_empty() -> Self {
        Self::ReturnStatement {
            argument: None,
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn if_stmt(test: Self, consequent: Self, alternate: Option<Self>) -> Self {
        Self::IfStatement {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: alternate.map(Box::new),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn while_stmt(test: Self, body: Self) -> Self {
        Self::WhileStatement {
            test: Box::new(test),
            body: Box::new(body),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn for_stmt(init: Option<Self>, test: Self, update: Self, body: Self) -> Self {
        Self::ForStatement {
            init: init.map(Box::new),
            test: Box::new(test),
            update: Box::new(update),
            body: Box::new(body),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn expr_stmt(expression: Self) -> Self {
        Self::ExpressionStatement {
            expression: Box::new(expression),
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn array(elements: Vec<Self>) -> Self {
        Self::ArrayExpression {
            elements,
            loc: Loc::unknown(),
        }
    }

    #[must_use]
    pub fn member(object: Self, property: Self) -> Self {
        Self::MemberExpression {
            object: Box::new(object),
            property: Box::new(property),
            loc: Loc::unknown(),
        }
    }
}
