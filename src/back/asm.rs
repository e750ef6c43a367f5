//! The register-oriented assembly IR.
//!
//! Between TAC and the machine: instructions still reference variables, but
//! as *pseudo* operands that a later pass maps to concrete stack slots or
//! data labels.  Every operand carries an [AsmType] whose width selects the
//! load/store variant at machine lowering.
//!
//! Width discipline: plain scalars always live in word-sized (or larger)
//! stack slots and are accessed as words, kept zero- or sign-extended.
//! Narrow accesses happen only where real byte layout exists: through
//! pointers, inside aggregates, and in static data.  The operand's type
//! records exactly that access width.

use crate::common::*;
use crate::front::sym::InitCell;
use crate::front::types::{Type, TypeTable};
use crate::middle::tac::{BinOp, Cond, UnOp};

use crate::back::machine::Reg;

/// The access width of an operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AsmType {
    Byte,
    Half,
    Word,
    /// An aggregate; only its address is ever taken.
    ByteArray { size: u32, align: u32 },
}

impl AsmType {
    /// The assembly type of a source-language type.  `long` shares the
    /// word width on this 32-bit target.
    pub fn of(ty: &Type, types: &TypeTable) -> AsmType {
        if ty.is_aggregate() {
            return AsmType::ByteArray {
                size: types.size_of(ty),
                align: types.align_of(ty),
            };
        }
        match types.size_of(ty) {
            1 => AsmType::Byte,
            2 => AsmType::Half,
            _ => AsmType::Word,
        }
    }

    pub fn width(self) -> u32 {
        match self {
            AsmType::Byte => 1,
            AsmType::Half => 2,
            AsmType::Word => 4,
            AsmType::ByteArray { size, .. } => size,
        }
    }
}

/// Operand kinds.  `Pseudo` and `PseudoMem` are placeholders that the
/// operand-mapping pass replaces; none survive into machine lowering.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum OpKind {
    Lit(i32),
    Reg(Reg),
    Pseudo(Id),
    /// A fixed offset inside a named aggregate.
    PseudoMem(Id, i32),
    /// `[reg + imm]`
    Memory(Reg, i32),
    /// A data label plus a constant addend.
    Data(Id, i32),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Operand {
    pub kind: OpKind,
    pub ty: AsmType,
}

impl Operand {
    pub fn lit(v: i32) -> Operand {
        Operand {
            kind: OpKind::Lit(v),
            ty: AsmType::Word,
        }
    }

    pub fn reg(r: Reg) -> Operand {
        Operand {
            kind: OpKind::Reg(r),
            ty: AsmType::Word,
        }
    }

    pub fn pseudo(name: Id, ty: AsmType) -> Operand {
        Operand {
            kind: OpKind::Pseudo(name),
            ty,
        }
    }

    pub fn pseudo_mem(name: Id, offset: i32, ty: AsmType) -> Operand {
        Operand {
            kind: OpKind::PseudoMem(name, offset),
            ty,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        matches!(self.kind, OpKind::Pseudo(_) | OpKind::PseudoMem(..))
    }
}

#[derive(Debug)]
pub enum Instruction {
    Mov {
        dst: Operand,
        src: Operand,
    },
    Unary {
        op: UnOp,
        dst: Operand,
        src: Operand,
    },
    Binary {
        op: BinOp,
        dst: Operand,
        src1: Operand,
        src2: Operand,
    },
    Cmp {
        src1: Operand,
        src2: Operand,
    },
    Push(Operand),
    Call(Id),
    /// Call through a function-pointer value.
    CallReg(Operand),
    Jump(Id),
    CondJump(Cond, Id),
    Label(Id),
    Ret,
    GetAddress {
        dst: Operand,
        src: Operand,
    },
    /// Read through the pointer in `ptr` at width `ty`.
    Load {
        ty: AsmType,
        dst: Operand,
        ptr: Operand,
    },
    Store {
        ty: AsmType,
        ptr: Operand,
        src: Operand,
    },
    Boundary(Loc),
    Trunc {
        bytes: u32,
        dst: Operand,
        src: Operand,
    },
    Extend {
        bytes: u32,
        dst: Operand,
        src: Operand,
    },
}

impl Instruction {
    /// Visit every operand, for the pseudo-rewrite pass.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        use Instruction::*;
        match self {
            Mov { dst, src }
            | Unary { dst, src, .. }
            | GetAddress { dst, src }
            | Trunc { dst, src, .. }
            | Extend { dst, src, .. } => vec![dst, src],
            Binary {
                dst, src1, src2, ..
            } => vec![dst, src1, src2],
            Cmp { src1, src2 } => vec![src1, src2],
            Push(src) | CallReg(src) => vec![src],
            Load { dst, ptr, .. } => vec![dst, ptr],
            Store { ptr, src, .. } => vec![ptr, src],
            Call(_) | Jump(_) | CondJump(..) | Label(_) | Ret | Boundary(_) => vec![],
        }
    }
}

#[derive(Debug)]
pub enum TopLevel {
    Func {
        name: Id,
        global: bool,
        body: Vec<Instruction>,
        frame_size: u32,
        /// Local-to-slot assignments, kept for debuggers.
        locals: Vec<(Id, i32)>,
    },
    StaticVar {
        name: Id,
        global: bool,
        align: u32,
        inits: Vec<InitCell>,
    },
    StaticConst {
        name: Id,
        align: u32,
        inits: Vec<InitCell>,
    },
    Section(&'static str),
}

#[derive(Debug, Default)]
pub struct Program {
    pub items: Vec<TopLevel>,
}
