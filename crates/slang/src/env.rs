//! Lexical environments.
//!
//! Frames form a tree rooted at the global environment; children are only
//! ever created with an already-existing parent, so the parent chain is
//! acyclic by construction. Bindings keep declaration order (a visualiser
//! walks them in source order) and track the declared/undeclared transition
//! that gives `const`/`let` their temporal dead zone.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    ast::{DeclarationKind, Span},
    heap::HeapId,
    intern::StringId,
    value::Value,
};

/// Identity of an environment frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvId(u32);

impl EnvId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("environment arena exceeds u32 capacity"))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The global environment is always frame 0.
pub const GLOBAL_ENV: EnvId = EnvId(0);

/// One name slot in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub kind: DeclarationKind,
    /// `false` between block entry and evaluation of the declaration.
    pub declared: bool,
    pub value: Value,
}

/// A lexical scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Display name: `"global"`, `"program"`, `"block"`, or the called
    /// function's name.
    pub name: String,
    pub parent: Option<EnvId>,
    pub bindings: IndexMap<StringId, Binding>,
    /// Heap cells first allocated while this frame was current. Ownership
    /// attribution for a visualiser only; does not affect lifetime.
    pub heap: Vec<HeapId>,
    /// Call site for frames created by function application.
    pub call_site: Option<Span>,
}

/// Why a name lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupFailure {
    /// No enclosing frame declares the name.
    Undeclared,
    /// The nearest declaring frame has not evaluated the declaration yet.
    NotYetDeclared,
}

/// Why an assignment failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignFailure {
    Undeclared,
    NotYetDeclared,
    ConstTarget,
}

/// Arena of all frames created during a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environments {
    frames: Vec<Frame>,
}

impl Default for Environments {
    fn default() -> Self {
        Self::new()
    }
}

impl Environments {
    /// Creates the arena with an empty global frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                name: "global".to_owned(),
                parent: None,
                bindings: IndexMap::new(),
                heap: Vec::new(),
                call_site: None,
            }],
        }
    }

    #[must_use]
    pub fn get(&self, id: EnvId) -> &Frame {
        &self.frames[id.index()]
    }

    pub fn get_mut(&mut self, id: EnvId) -> &mut Frame {
        &mut self.frames[id.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Creates a child frame of `parent`.
    pub fn extend(&mut self, parent: EnvId, name: impl Into<String>, call_site: Option<Span>) -> EnvId {
        debug_assert!(parent.index() < self.frames.len(), "parent must already exist");
        let id = EnvId::new(self.frames.len());
        self.frames.push(Frame {
            name: name.into(),
            parent: Some(parent),
            bindings: IndexMap::new(),
            heap: Vec::new(),
            call_site,
        });
        id
    }

    /// Records `name` in `env` as declared-but-uninitialised.
    pub fn declare(&mut self, env: EnvId, name: StringId, kind: DeclarationKind) {
        self.get_mut(env).bindings.insert(
            name,
            Binding {
                kind,
                declared: false,
                value: Value::Undefined,
            },
        );
    }

    /// Transitions `name` in exactly `env` to declared with `value`.
    ///
    /// Names declared at scope entry get their slot updated; statement
    /// sequences introduce names without a scope-entry scan, so a missing
    /// slot is created on the spot.
    pub fn define(&mut self, env: EnvId, name: StringId, kind: DeclarationKind, value: Value) {
        let binding = self
            .get_mut(env)
            .bindings
            .entry(name)
            .or_insert(Binding {
                kind,
                declared: false,
                value: Value::Undefined,
            });
        binding.declared = true;
        binding.value = value;
    }

    /// Declares and immediately defines, for parameter binding.
    pub fn bind_param(&mut self, env: EnvId, name: StringId, value: Value) {
        self.get_mut(env).bindings.insert(
            name,
            Binding {
                kind: DeclarationKind::Const,
                declared: true,
                value,
            },
        );
    }

    /// Resolves `name` starting from `env` and walking parents.
    ///
    /// The nearest frame that contains the name decides the outcome, so a
    /// not-yet-declared inner binding shadows an initialised outer one.
    pub fn lookup(&self, env: EnvId, name: StringId) -> Result<Value, LookupFailure> {
        let mut current = Some(env);
        while let Some(id) = current {
            let frame = self.get(id);
            if let Some(binding) = frame.bindings.get(&name) {
                return if binding.declared {
                    Ok(binding.value)
                } else {
                    Err(LookupFailure::NotYetDeclared)
                };
            }
            current = frame.parent;
        }
        Err(LookupFailure::Undeclared)
    }

    /// Assigns to the nearest declaration of `name`.
    pub fn assign(&mut self, env: EnvId, name: StringId, value: Value) -> Result<(), AssignFailure> {
        let mut current = Some(env);
        while let Some(id) = current {
            let frame = self.get(id);
            if frame.bindings.contains_key(&name) {
                let binding = self.get_mut(id).bindings.get_mut(&name).expect("checked above");
                if !binding.declared {
                    return Err(AssignFailure::NotYetDeclared);
                }
                if binding.kind == DeclarationKind::Const {
                    return Err(AssignFailure::ConstTarget);
                }
                binding.value = value;
                return Ok(());
            }
            current = self.get(id).parent;
        }
        Err(AssignFailure::Undeclared)
    }

    /// Attributes a fresh heap cell to the frame that was current when it
    /// was allocated.
    pub fn record_alloc(&mut self, env: EnvId, cell: HeapId) {
        self.get_mut(env).heap.push(cell);
    }

    /// Walks the parent chain to the root, returning the depth.
    ///
    /// Used by tests to check acyclicity; the arena makes cycles impossible,
    /// but the walk must terminate regardless.
    #[must_use]
    pub fn depth_of(&self, env: EnvId) -> usize {
        let mut depth = 0;
        let mut current = self.get(env).parent;
        while let Some(id) = current {
            depth += 1;
            current = self.get(id).parent;
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Interner;

    #[test]
    fn lookup_walks_parents_and_stops_at_shadow() {
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let mut envs = Environments::new();
        envs.declare(GLOBAL_ENV, x, DeclarationKind::Const);
        envs.define(GLOBAL_ENV, x, DeclarationKind::Const, Value::Number(1.0));

        let inner = envs.extend(GLOBAL_ENV, "block", None);
        assert_eq!(envs.lookup(inner, x), Ok(Value::Number(1.0)));

        // an undeclared inner slot shadows the outer value
        envs.declare(inner, x, DeclarationKind::Let);
        assert_eq!(envs.lookup(inner, x), Err(LookupFailure::NotYetDeclared));
    }

    #[test]
    fn assigning_a_const_fails() {
        let mut interner = Interner::new();
        let x = interner.intern("x");
        let mut envs = Environments::new();
        envs.declare(GLOBAL_ENV, x, DeclarationKind::Const);
        envs.define(GLOBAL_ENV, x, DeclarationKind::Const, Value::Number(1.0));
        assert_eq!(
            envs.assign(GLOBAL_ENV, x, Value::Number(2.0)),
            Err(AssignFailure::ConstTarget)
        );
    }

    #[test]
    fn parent_chain_is_finite() {
        let mut envs = Environments::new();
        let mut current = GLOBAL_ENV;
        for _ in 0..100 {
            current = envs.extend(current, "block", None);
        }
        assert_eq!(envs.depth_of(current), 100);
    }
}
