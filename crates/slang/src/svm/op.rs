//! Opcode numbering for the stack VM.
//!
//! The numeric values are the on-wire encoding and must stay stable; gaps
//! between families leave room without renumbering. `FromRepr` gives the
//! assembler its strict unknown-opcode rejection.

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr, IntoStaticStr};

/// One byte of opcode. Operand shapes are fixed per opcode; see
/// [`super::program::Instr`] for the decoded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    #[strum(serialize = "NOP")]
    Nop = 0x00,
    /// Load an i32 constant as a number.
    #[strum(serialize = "LGCI")]
    LgcI = 0x01,
    /// Load an f64 constant.
    #[strum(serialize = "LGCF64")]
    LgcF64 = 0x02,
    /// Load a string from the constant pool.
    #[strum(serialize = "LGCS")]
    LgcS = 0x03,
    #[strum(serialize = "LGCB0")]
    LgcB0 = 0x04,
    #[strum(serialize = "LGCB1")]
    LgcB1 = 0x05,
    #[strum(serialize = "LGCU")]
    LgcU = 0x06,
    #[strum(serialize = "LGCN")]
    LgcN = 0x07,

    // arithmetic, generic then typed
    #[strum(serialize = "ADDG")]
    AddG = 0x10,
    #[strum(serialize = "SUBG")]
    SubG = 0x11,
    #[strum(serialize = "MULG")]
    MulG = 0x12,
    #[strum(serialize = "DIVG")]
    DivG = 0x13,
    #[strum(serialize = "MODG")]
    ModG = 0x14,
    #[strum(serialize = "NEGG")]
    NegG = 0x15,
    #[strum(serialize = "NOTG")]
    NotG = 0x16,
    #[strum(serialize = "ADDN")]
    AddN = 0x17,
    #[strum(serialize = "SUBN")]
    SubN = 0x18,
    #[strum(serialize = "MULN")]
    MulN = 0x19,
    #[strum(serialize = "DIVN")]
    DivN = 0x1A,
    #[strum(serialize = "MODN")]
    ModN = 0x1B,
    #[strum(serialize = "NEGN")]
    NegN = 0x1C,
    /// String concatenation.
    #[strum(serialize = "ADDS")]
    AddS = 0x1D,

    // comparison
    #[strum(serialize = "EQG")]
    EqG = 0x20,
    #[strum(serialize = "NEQG")]
    NeqG = 0x21,
    #[strum(serialize = "LTG")]
    LtG = 0x22,
    #[strum(serialize = "GTG")]
    GtG = 0x23,
    #[strum(serialize = "LEG")]
    LeG = 0x24,
    #[strum(serialize = "GEG")]
    GeG = 0x25,

    // memory
    /// Create a closure over the current environment chain.
    #[strum(serialize = "NEWC")]
    NewC = 0x30,
    /// Pop tail and head, push a pair.
    #[strum(serialize = "NEWP")]
    NewP = 0x31,
    /// Push an empty array.
    #[strum(serialize = "NEWA")]
    NewA = 0x32,
    /// Load a slot of the current environment.
    #[strum(serialize = "LDL")]
    Ldl = 0x33,
    /// Store to a slot of the current environment.
    #[strum(serialize = "STL")]
    Stl = 0x34,
    /// Load a slot `envDepth` frames up the chain.
    #[strum(serialize = "LDP")]
    Ldp = 0x35,
    /// Store to a slot `envDepth` frames up the chain.
    #[strum(serialize = "STP")]
    Stp = 0x36,
    /// Pop index and array, push the element.
    #[strum(serialize = "LDAG")]
    LdaG = 0x37,
    /// Pop value, index and array; store.
    #[strum(serialize = "STAG")]
    StaG = 0x38,
    #[strum(serialize = "DUP")]
    Dup = 0x39,
    /// Discard the stack top.
    #[strum(serialize = "POPG")]
    PopG = 0x3A,

    // control
    /// Unconditional branch, byte offset from the next instruction.
    #[strum(serialize = "BR")]
    Br = 0x40,
    /// Branch when the popped value is `true`.
    #[strum(serialize = "BRT")]
    Brt = 0x41,
    /// Branch when the popped value is `false`.
    #[strum(serialize = "BRF")]
    Brf = 0x42,
    /// Jump to an absolute byte offset within the current function.
    #[strum(serialize = "JMP")]
    Jmp = 0x43,
    #[strum(serialize = "CALL")]
    Call = 0x44,
    /// Tail call: replace the current frame.
    #[strum(serialize = "CALLT")]
    CallT = 0x45,
    /// Call a primitive by table index.
    #[strum(serialize = "CALLP")]
    CallP = 0x46,
    /// Return the stack top.
    #[strum(serialize = "RETG")]
    RetG = 0x47,
    /// Return `null`.
    #[strum(serialize = "RETN")]
    RetN = 0x48,
    /// Return `undefined`.
    #[strum(serialize = "RETU")]
    RetU = 0x49,
    /// Return the stack top, which must be a boolean.
    #[strum(serialize = "RETB")]
    RetB = 0x4A,

    // environment
    #[strum(serialize = "NEWENV")]
    NewEnv = 0x50,
    #[strum(serialize = "POPENV")]
    PopEnv = 0x51,

    /// Program terminator; the stack top (if any) is the result.
    #[strum(serialize = "DONE")]
    Done = 0xFF,
}
