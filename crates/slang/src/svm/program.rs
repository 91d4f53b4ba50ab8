//! The compiled program model: functions of decoded instructions plus the
//! deduplicated string pool.

use serde::{Deserialize, Serialize};

use super::op::Opcode;

/// A decoded instruction. Branch operands are byte offsets relative to the
/// start of the *next* instruction, exactly as encoded on the wire, so the
/// decoded and encoded forms round-trip without rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    Nop,
    LgcI(i32),
    LgcF64(f64),
    LgcS(u32),
    LgcB0,
    LgcB1,
    LgcU,
    LgcN,
    AddG,
    SubG,
    MulG,
    DivG,
    ModG,
    NegG,
    NotG,
    AddN,
    SubN,
    MulN,
    DivN,
    ModN,
    NegN,
    AddS,
    EqG,
    NeqG,
    LtG,
    GtG,
    LeG,
    GeG,
    NewC { fn_index: u32 },
    NewP,
    NewA,
    Ldl(u8),
    Stl(u8),
    Ldp { depth: u8, index: u8 },
    Stp { depth: u8, index: u8 },
    LdaG,
    StaG,
    Dup,
    PopG,
    Br(i32),
    Brt(i32),
    Brf(i32),
    Jmp(u32),
    Call(u8),
    CallT(u8),
    CallP { prim: u8, argc: u8 },
    RetG,
    RetN,
    RetU,
    RetB,
    NewEnv(u8),
    PopEnv,
    Done,
}

impl Instr {
    #[must_use]
    pub fn opcode(self) -> Opcode {
        match self {
            Self::Nop => Opcode::Nop,
            Self::LgcI(_) => Opcode::LgcI,
            Self::LgcF64(_) => Opcode::LgcF64,
            Self::LgcS(_) => Opcode::LgcS,
            Self::LgcB0 => Opcode::LgcB0,
            Self::LgcB1 => Opcode::LgcB1,
            Self::LgcU => Opcode::LgcU,
            Self::LgcN => Opcode::LgcN,
            Self::AddG => Opcode::AddG,
            Self::SubG => Opcode::SubG,
            Self::MulG => Opcode::MulG,
            Self::DivG => Opcode::DivG,
            Self::ModG => Opcode::ModG,
            Self::NegG => Opcode::NegG,
            Self::NotG => Opcode::NotG,
            Self::AddN => Opcode::AddN,
            Self::SubN => Opcode::SubN,
            Self::MulN => Opcode::MulN,
            Self::DivN => Opcode::DivN,
            Self::ModN => Opcode::ModN,
            Self::NegN => Opcode::NegN,
            Self::AddS => Opcode::AddS,
            Self::EqG => Opcode::EqG,
            Self::NeqG => Opcode::NeqG,
            Self::LtG => Opcode::LtG,
            Self::GtG => Opcode::GtG,
            Self::LeG => Opcode::LeG,
            Self::GeG => Opcode::GeG,
            Self::NewC { .. } => Opcode::NewC,
            Self::NewP => Opcode::NewP,
            Self::NewA => Opcode::NewA,
            Self::Ldl(_) => Opcode::Ldl,
            Self::Stl(_) => Opcode::Stl,
            Self::Ldp { .. } => Opcode::Ldp,
            Self::Stp { .. } => Opcode::Stp,
            Self::LdaG => Opcode::LdaG,
            Self::StaG => Opcode::StaG,
            Self::Dup => Opcode::Dup,
            Self::PopG => Opcode::PopG,
            Self::Br(_) => Opcode::Br,
            Self::Brt(_) => Opcode::Brt,
            Self::Brf(_) => Opcode::Brf,
            Self::Jmp(_) => Opcode::Jmp,
            Self::Call(_) => Opcode::Call,
            Self::CallT(_) => Opcode::CallT,
            Self::CallP { .. } => Opcode::CallP,
            Self::RetG => Opcode::RetG,
            Self::RetN => Opcode::RetN,
            Self::RetU => Opcode::RetU,
            Self::RetB => Opcode::RetB,
            Self::NewEnv(_) => Opcode::NewEnv,
            Self::PopEnv => Opcode::PopEnv,
            Self::Done => Opcode::Done,
        }
    }

    /// Encoded size: one opcode byte plus the operand bytes.
    #[must_use]
    pub fn byte_len(self) -> usize {
        1 + match self {
            Self::LgcF64(_) => 8,
            Self::LgcI(_) | Self::LgcS(_) | Self::NewC { .. } | Self::Br(_) | Self::Brt(_) | Self::Brf(_) | Self::Jmp(_) => 4,
            Self::Ldp { .. } | Self::Stp { .. } | Self::CallP { .. } => 2,
            Self::Ldl(_) | Self::Stl(_) | Self::Call(_) | Self::CallT(_) | Self::NewEnv(_) => 1,
            _ => 0,
        }
    }
}

/// One compiled function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmFunction {
    /// Operand stack high-water mark, fixed at compile time.
    pub stack_size: u16,
    /// Slots in the function's own environment (its parameters).
    pub env_size: u16,
    pub arity: u16,
    pub instrs: Vec<Instr>,
}

/// A compiled program: entry function, function table, string pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub entry: u32,
    pub functions: Vec<SvmFunction>,
    /// Deduplicated string literals referenced by `LGCS`.
    pub strings: Vec<String>,
}

impl Program {
    #[must_use]
    pub fn entry_function(&self) -> &SvmFunction {
        &self.functions[self.entry as usize]
    }
}
