//! Arena for reference-shared runtime objects.
//!
//! Pairs, arrays and closures are allocated here and referenced by
//! [`HeapId`]; identity equality on the id is the language's `===` for these
//! types, and reference sharing is what lets `set_tail` build cycles. Cells
//! live for the whole session: ownership attribution for a visualiser is
//! recorded on the allocating environment frame, not here.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    builtins::Builtins,
    env::EnvId,
    intern::{Interner, StringId},
    prepare::NodeId,
    value::{Value, format_number},
};

/// Identity of a heap cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapId(u32);

impl HeapId {
    fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("heap exceeds u32 capacity"))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A user function value: parameter names, a body node in the prepared
/// module, and the captured environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closure {
    pub params: SmallVec<[StringId; 4]>,
    pub body: NodeId,
    pub env: EnvId,
    pub name: Option<StringId>,
}

/// Payload of a heap cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeapData {
    Pair([Value; 2]),
    Array(Vec<Value>),
    Closure(Closure),
    /// A function compiled for the stack VM: function-table index plus the
    /// captured VM environment. The stack VM allocates these in the same
    /// arena so both evaluators share one value model.
    VmClosure { fn_index: u32, env: u32 },
}

impl HeapData {
    /// Variant name for stats and tracing.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Pair(_) => "pair",
            Self::Array(_) => "array",
            Self::Closure(_) => "closure",
            Self::VmClosure { .. } => "closure",
        }
    }
}

/// The session-wide allocation arena.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Heap {
    cells: Vec<HeapData>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        let id = HeapId::new(self.cells.len());
        self.cells.push(data);
        id
    }

    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.cells[id.index()]
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.cells[id.index()]
    }

    /// Number of live cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Renders a value for `display` and friends.
///
/// Pairs and arrays print in bracket notation; a reference already on the
/// current rendering path prints as `...<circular>`, which is what makes
/// display of cyclic structure terminate. Pair tails are followed
/// iteratively so long lists do not recurse through the host stack.
#[must_use]
pub fn stringify(value: Value, heap: &Heap, interner: &Interner, builtins: &Builtins) -> String {
    let mut out = String::new();
    let mut on_path = AHashSet::new();
    write_value(&mut out, value, heap, interner, builtins, &mut on_path, false);
    out
}

/// Like [`stringify`], but wraps string values in quotes the way the
/// language echoes results.
#[must_use]
pub fn stringify_quoted(value: Value, heap: &Heap, interner: &Interner, builtins: &Builtins) -> String {
    let mut out = String::new();
    let mut on_path = AHashSet::new();
    write_value(&mut out, value, heap, interner, builtins, &mut on_path, true);
    out
}

fn write_value(
    out: &mut String,
    value: Value,
    heap: &Heap,
    interner: &Interner,
    builtins: &Builtins,
    on_path: &mut AHashSet<HeapId>,
    quote_strings: bool,
) {
    match value {
        Value::Undefined => out.push_str("undefined"),
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&format_number(n)),
        Value::Str(id) => {
            if quote_strings {
                out.push('"');
                out.push_str(interner.resolve(id));
                out.push('"');
            } else {
                out.push_str(interner.resolve(id));
            }
        }
        Value::Builtin(id) => {
            out.push_str("<builtin ");
            out.push_str(builtins.name(id));
            out.push('>');
        }
        Value::Opaque(id) => {
            out.push_str(&format!("<object #{}>", id.0));
        }
        Value::Ref(id) => write_ref(out, id, heap, interner, builtins, on_path),
    }
}

fn write_ref(
    out: &mut String,
    id: HeapId,
    heap: &Heap,
    interner: &Interner,
    builtins: &Builtins,
    on_path: &mut AHashSet<HeapId>,
) {
    if !on_path.insert(id) {
        out.push_str("...<circular>");
        return;
    }
    match heap.get(id) {
        HeapData::Pair(_) => {
            // Follow the tail iteratively: [h1, [h2, [..., t]]] closes all
            // brackets at the end. Heads still recurse.
            let mut depth = 0usize;
            let mut chain: SmallVec<[HeapId; 8]> = SmallVec::new();
            let mut current = id;
            loop {
                let HeapData::Pair([head, tail]) = *heap.get(current) else {
                    unreachable!("pair chain walked onto a non-pair cell");
                };
                out.push('[');
                depth += 1;
                chain.push(current);
                write_value(out, head, heap, interner, builtins, on_path, true);
                out.push_str(", ");
                match tail {
                    Value::Ref(next) if matches!(heap.get(next), HeapData::Pair(_)) => {
                        if on_path.insert(next) {
                            current = next;
                        } else {
                            out.push_str("...<circular>");
                            break;
                        }
                    }
                    other => {
                        write_value(out, other, heap, interner, builtins, on_path, true);
                        break;
                    }
                }
            }
            out.push_str(&"]".repeat(depth));
            for link in chain {
                on_path.remove(&link);
            }
        }
        HeapData::Array(elements) => {
            out.push('[');
            for (i, &element) in elements.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, element, heap, interner, builtins, on_path, true);
            }
            out.push(']');
            on_path.remove(&id);
        }
        HeapData::Closure(closure) => {
            match closure.name {
                Some(name) => {
                    out.push_str("<function ");
                    out.push_str(interner.resolve(name));
                    out.push('>');
                }
                None => out.push_str("<function>"),
            }
            on_path.remove(&id);
        }
        HeapData::VmClosure { fn_index, .. } => {
            out.push_str(&format!("<function #{fn_index}>"));
            on_path.remove(&id);
        }
    }
}
