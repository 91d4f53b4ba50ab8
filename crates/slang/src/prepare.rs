//! Lowering from the external syntax tree to the prepared module.
//!
//! Preparation interns identifiers, flattens the tree into a node arena
//! (machine control items stay small and copyable), applies session
//! transformers, and enforces the coarse per-level grammar gates. It also
//! performs the two desugarings the machine relies on:
//!
//! - logical operators become conditionals (`a && b` ⇒ `a ? b : false`,
//!   `a || b` ⇒ `a ? true : b`), which is where short-circuiting comes from;
//! - expression-bodied arrow functions become block bodies with a single
//!   `return`, so every function body is a block and the return protocol is
//!   uniform. Function declarations become `const` bindings of a named
//!   lambda.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    ast::{self, BinaryOp, DeclarationKind, LiteralValue, LogicalOp, Span, UnaryOp},
    error::{SlangError, SyntaxError},
    intern::{Interner, StringId},
    session::Level,
    value::Value,
};

/// Index of a prepared node inside its [`Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("module exceeds u32 nodes"))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A prepared program: the flat node arena plus its root block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
}

impl Module {
    #[must_use]
    pub(crate) fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    #[must_use]
    pub(crate) fn span(&self, id: NodeId) -> Span {
        self.nodes[id.index()].span
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

/// Prepared node kinds. Statements and expressions share one arena because
/// the machine's control stack treats them uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum NodeKind {
    Literal(Value),
    Name(StringId),
    Binary {
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    },
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Conditional {
        test: NodeId,
        cons: NodeId,
        alt: NodeId,
    },
    Call {
        callee: NodeId,
        args: SmallVec<[NodeId; 4]>,
    },
    Lambda {
        params: SmallVec<[StringId; 4]>,
        /// Always a `Block` after desugaring.
        body: NodeId,
        name: Option<StringId>,
    },
    VarDecl {
        kind: DeclarationKind,
        name: StringId,
        init: NodeId,
    },
    Assign {
        name: StringId,
        value: NodeId,
    },
    MemberAssign {
        object: NodeId,
        index: NodeId,
        value: NodeId,
    },
    Block {
        body: Vec<NodeId>,
        /// Names declared directly in this block, pre-declared on entry for
        /// the temporal dead zone.
        decls: Vec<(StringId, DeclarationKind)>,
    },
    /// Statement list evaluated without a new environment.
    Sequence {
        body: Vec<NodeId>,
    },
    Return {
        arg: Option<NodeId>,
    },
    If {
        test: NodeId,
        cons: NodeId,
        alt: Option<NodeId>,
    },
    While {
        test: NodeId,
        body: NodeId,
    },
    For {
        init: Option<NodeId>,
        test: NodeId,
        update: NodeId,
        body: NodeId,
        /// Loop-control declaration from the init clause, if any.
        decl: Option<(StringId, DeclarationKind)>,
    },
    ExprStmt {
        expr: NodeId,
    },
    ArrayLit {
        elements: Vec<NodeId>,
    },
    Member {
        object: NodeId,
        index: NodeId,
    },
}

impl NodeKind {
    /// Short name for tracing.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Literal(_) => "Literal",
            Self::Name(_) => "Name",
            Self::Binary { .. } => "Binary",
            Self::Unary { .. } => "Unary",
            Self::Conditional { .. } => "Conditional",
            Self::Call { .. } => "Call",
            Self::Lambda { .. } => "Lambda",
            Self::VarDecl { .. } => "VarDecl",
            Self::Assign { .. } => "Assign",
            Self::MemberAssign { .. } => "MemberAssign",
            Self::Block { .. } => "Block",
            Self::Sequence { .. } => "Sequence",
            Self::Return { .. } => "Return",
            Self::If { .. } => "If",
            Self::While { .. } => "While",
            Self::For { .. } => "For",
            Self::ExprStmt { .. } => "ExprStmt",
            Self::ArrayLit { .. } => "ArrayLit",
            Self::Member { .. } => "Member",
        }
    }
}

/// Lowers a program tree into a [`Module`].
///
/// All level violations are collected before returning, so a learner sees
/// every offending construct at once.
pub(crate) fn prepare(
    program: &ast::Node,
    level: Level,
    interner: &mut Interner,
) -> Result<Module, Vec<SlangError>> {
    let mut lowerer = Lowerer {
        nodes: Vec::new(),
        interner,
        errors: Vec::new(),
        level,
    };

    let body = match program {
        ast::Node::Program { body, .. } => body.as_slice(),
        // a bare statement is accepted as a one-statement program
        other => std::slice::from_ref(other),
    };
    let span = Span::from_loc(program.loc(), lowerer.interner);
    let root = lowerer.lower_block_like(body, span);

    if lowerer.errors.is_empty() {
        Ok(Module {
            nodes: lowerer.nodes,
            root,
        })
    } else {
        Err(lowerer.errors)
    }
}

struct Lowerer<'a> {
    nodes: Vec<Node>,
    interner: &'a mut Interner,
    errors: Vec<SlangError>,
    level: Level,
}

impl Lowerer<'_> {
    fn push(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(Node { kind, span });
        id
    }

    fn span_of(&mut self, node: &ast::Node) -> Span {
        Span::from_loc(node.loc(), self.interner)
    }

    fn error(&mut self, message: impl Into<String>, span: Span) -> NodeId {
        self.errors.push(SyntaxError::new(message, span).into());
        self.push(NodeKind::Literal(Value::Undefined), span)
    }

    fn unsupported(&mut self, construct: &str, span: Span) -> NodeId {
        let level = self.level;
        self.error(
            format!("{construct} is not allowed at Source \u{a7}{}.", level.number()),
            span,
        )
    }

    /// Collects the names a statement list declares directly, in order.
    ///
    /// Statement sequences do not open a scope, so their declarations belong
    /// to the enclosing block and are scanned through.
    fn collect_decls(&mut self, body: &[ast::Node]) -> Vec<(StringId, DeclarationKind)> {
        let mut decls = Vec::new();
        self.collect_decls_into(body, &mut decls);
        decls
    }

    fn collect_decls_into(&mut self, body: &[ast::Node], decls: &mut Vec<(StringId, DeclarationKind)>) {
        for stmt in body {
            match stmt {
                ast::Node::VariableDeclaration { kind, name, .. } => {
                    decls.push((self.interner.intern(name), *kind));
                }
                ast::Node::FunctionDeclaration { name, .. } => {
                    decls.push((self.interner.intern(name), DeclarationKind::Const));
                }
                ast::Node::StatementSequence { body: inner, .. } => {
                    self.collect_decls_into(inner, decls);
                }
                _ => {}
            }
        }
    }

    fn lower_block_like(&mut self, body: &[ast::Node], span: Span) -> NodeId {
        let decls = self.collect_decls(body);
        let lowered: Vec<NodeId> = body.iter().map(|stmt| self.lower(stmt)).collect();
        self.push(
            NodeKind::Block {
                body: lowered,
                decls,
            },
            span,
        )
    }

    fn lower(&mut self, node: &ast::Node) -> NodeId {
        let span = self.span_of(node);
        match node {
            ast::Node::Program { body, .. } => self.lower_block_like(body, span),
            ast::Node::BlockStatement { body, .. } => self.lower_block_like(body, span),
            ast::Node::StatementSequence { body, .. } => {
                let lowered: Vec<NodeId> = body.iter().map(|stmt| self.lower(stmt)).collect();
                self.push(NodeKind::Sequence { body: lowered }, span)
            }
            ast::Node::Literal { value, .. } => {
                let value = self.lower_literal(value);
                self.push(NodeKind::Literal(value), span)
            }
            ast::Node::Identifier { name, .. } => {
                let id = self.interner.intern(name);
                self.push(NodeKind::Name(id), span)
            }
            ast::Node::BinaryExpression {
                operator, left, right, ..
            } => {
                let left = self.lower(left);
                let right = self.lower(right);
                self.push(
                    NodeKind::Binary {
                        op: *operator,
                        left,
                        right,
                    },
                    span,
                )
            }
            ast::Node::LogicalExpression {
                operator, left, right, ..
            } => {
                // short-circuit via the conditional form
                let test = self.lower(left);
                let (cons, alt) = match operator {
                    LogicalOp::And => {
                        let cons = self.lower(right);
                        let alt = self.push(NodeKind::Literal(Value::Bool(false)), span);
                        (cons, alt)
                    }
                    LogicalOp::Or => {
                        let cons = self.push(NodeKind::Literal(Value::Bool(true)), span);
                        let alt = self.lower(right);
                        (cons, alt)
                    }
                };
                self.push(NodeKind::Conditional { test, cons, alt }, span)
            }
            ast::Node::UnaryExpression { operator, argument, .. } => {
                let operand = self.lower(argument);
                self.push(
                    NodeKind::Unary {
                        op: *operator,
                        operand,
                    },
                    span,
                )
            }
            ast::Node::ConditionalExpression {
                test,
                consequent,
                alternate,
                ..
            } => {
                let test = self.lower(test);
                let cons = self.lower(consequent);
                let alt = self.lower(alternate);
                self.push(NodeKind::Conditional { test, cons, alt }, span)
            }
            ast::Node::CallExpression { callee, arguments, .. } => {
                let callee = self.lower(callee);
                let args: SmallVec<[NodeId; 4]> = arguments.iter().map(|a| self.lower(a)).collect();
                self.push(NodeKind::Call { callee, args }, span)
            }
            ast::Node::FunctionDeclaration {
                name, params, body, ..
            } => {
                let name_id = self.interner.intern(name);
                let lambda = self.lower_function(Some(name_id), params, body, span);
                self.push(
                    NodeKind::VarDecl {
                        kind: DeclarationKind::Const,
                        name: name_id,
                        init: lambda,
                    },
                    span,
                )
            }
            ast::Node::FunctionExpression {
                name, params, body, ..
            } => {
                let name_id = name.as_deref().map(|n| self.interner.intern(n));
                self.lower_function(name_id, params, body, span)
            }
            ast::Node::ArrowFunctionExpression { params, body, .. } => {
                self.lower_function(None, params, body, span)
            }
            ast::Node::VariableDeclaration { kind, name, init, .. } => {
                if *kind == DeclarationKind::Let && !self.level.allows_mutation() {
                    return self.unsupported("let", span);
                }
                let name_id = self.interner.intern(name);
                let init = self.lower(init);
                self.push(
                    NodeKind::VarDecl {
                        kind: *kind,
                        name: name_id,
                        init,
                    },
                    span,
                )
            }
            // Plain assignment is not gated here: without `let` every target
            // is a constant, so lower levels fail at runtime with the
            // constant-assignment error.
            ast::Node::AssignmentExpression { target, value, .. } => {
                match target.as_ref() {
                    ast::Node::Identifier { name, .. } => {
                        let name_id = self.interner.intern(name);
                        let value = self.lower(value);
                        self.push(NodeKind::Assign { name: name_id, value }, span)
                    }
                    ast::Node::MemberExpression { object, property, .. } => {
                        if !self.level.allows_arrays() {
                            return self.unsupported("array assignment", span);
                        }
                        let object = self.lower(object);
                        let index = self.lower(property);
                        let value = self.lower(value);
                        self.push(
                            NodeKind::MemberAssign {
                                object,
                                index,
                                value,
                            },
                            span,
                        )
                    }
                    _ => self.error("Invalid assignment target.", span),
                }
            }
            ast::Node::ReturnStatement { argument, .. } => {
                let arg = argument.as_deref().map(|a| self.lower(a));
                self.push(NodeKind::Return { arg }, span)
            }
            ast::Node::IfStatement {
                test,
                consequent,
                alternate,
                ..
            } => {
                let test = self.lower(test);
                let cons = self.lower(consequent);
                let alt = alternate.as_deref().map(|a| self.lower(a));
                self.push(NodeKind::If { test, cons, alt }, span)
            }
            ast::Node::WhileStatement { test, body, .. } => {
                if !self.level.allows_loops() {
                    return self.unsupported("while loop", span);
                }
                let test = self.lower(test);
                let body = self.lower(body);
                self.push(NodeKind::While { test, body }, span)
            }
            ast::Node::ForStatement {
                init,
                test,
                update,
                body,
                ..
            } => {
                if !self.level.allows_loops() {
                    return self.unsupported("for loop", span);
                }
                let decl = match init.as_deref() {
                    Some(ast::Node::VariableDeclaration { kind, name, .. }) => {
                        Some((self.interner.intern(name), *kind))
                    }
                    _ => None,
                };
                let init = init.as_deref().map(|i| self.lower(i));
                let test = self.lower(test);
                let update = self.lower(update);
                let body = self.lower(body);
                self.push(
                    NodeKind::For {
                        init,
                        test,
                        update,
                        body,
                        decl,
                    },
                    span,
                )
            }
            ast::Node::ExpressionStatement { expression, .. } => {
                let expr = self.lower(expression);
                self.push(NodeKind::ExprStmt { expr }, span)
            }
            ast::Node::ArrayExpression { elements, .. } => {
                if !self.level.allows_arrays() {
                    return self.unsupported("array literal", span);
                }
                let elements: Vec<NodeId> = elements.iter().map(|e| self.lower(e)).collect();
                self.push(NodeKind::ArrayLit { elements }, span)
            }
            ast::Node::MemberExpression { object, property, .. } => {
                if !self.level.allows_arrays() {
                    return self.unsupported("member access", span);
                }
                let object = self.lower(object);
                let index = self.lower(property);
                self.push(NodeKind::Member { object, index }, span)
            }
        }
    }

    fn lower_literal(&mut self, value: &LiteralValue) -> Value {
        match value {
            LiteralValue::Number(n) => Value::Number(*n),
            LiteralValue::String(s) => Value::Str(self.interner.intern(s)),
            LiteralValue::Boolean(b) => Value::Bool(*b),
            LiteralValue::Null => Value::Null,
            LiteralValue::Undefined => Value::Undefined,
        }
    }

    /// Lowers a function of any syntactic flavour into a `Lambda` whose body
    /// is always a block.
    fn lower_function(
        &mut self,
        name: Option<StringId>,
        params: &[String],
        body: &ast::Node,
        span: Span,
    ) -> NodeId {
        let params: SmallVec<[StringId; 4]> = params.iter().map(|p| self.interner.intern(p)).collect();
        let body_id = match body {
            ast::Node::BlockStatement { body: stmts, .. } => {
                let body_span = self.span_of(body);
                self.lower_block_like(stmts, body_span)
            }
            // expression body: wrap as { return expr; }
            expr => {
                let expr_span = self.span_of(expr);
                let value = self.lower(expr);
                let ret = self.push(NodeKind::Return { arg: Some(value) }, expr_span);
                self.push(
                    NodeKind::Block {
                        body: vec![ret],
                        decls: Vec::new(),
                    },
                    expr_span,
                )
            }
        };
        self.push(
            NodeKind::Lambda {
                params,
                body: body_id,
                name,
            },
            span,
        )
    }
}
