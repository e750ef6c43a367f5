//! The Topaz-32 machine model and assembly printer.
//!
//! Topaz-32 is a 32-bit register machine with 32 general registers and a
//! small load/store instruction set.
//!
//! # Registers
//!
//! - `r0` is hardwired to zero.
//! - `r1`..`r8` carry integer arguments; `r1` also carries the return
//!   value.
//! - `r9` and `r10` are reserved as compiler scratch: no value lives in
//!   them across more than one lowered instruction.
//! - `r11`..`r28` are caller-saved by convention.
//! - `r29` (`ra`) holds the return address, `r30` (`bp`) the base pointer,
//!   `r31` (`sp`) the stack pointer.  The callee saves and restores `ra`
//!   and `bp`.
//!
//! # Call stack frame
//!
//! The stack grows down.  A function's prologue saves the return address
//! at `[sp, -4]` and the caller's base pointer at `[sp, -8]`, drops `sp` by
//! 8, and makes `bp` point at the new stack top.  After that:
//!
//! ```txt
//!   [bp, 8+4k]  stack argument k (for calls with more than 8 arguments)
//!   [bp, 4]     saved return address
//!   [bp, 0]     saved caller bp        <- bp
//!   [bp, -4]..  locals and temporaries
//!                                      <- sp after the frame allocation
//! ```
//!
//! Locals live at negative offsets from `bp` in slots of at least 4 bytes.
//! Outgoing stack arguments are pushed below the frame and released by the
//! caller after the call returns.
//!
//! # Flags and branches
//!
//! ALU operations set the condition flags; a compare is a subtraction into
//! `r0`.  The conditional branch family reads the flags in signed
//! (`bgt`/`bge`/`blt`/`ble`), unsigned (`ba`/`bae`/`bb`/`bbe`), and
//! equality (`beq`/`bne`) forms.  Relative branches take a short
//! instruction-count offset; `br` jumps to an absolute address held in a
//! register and writes the current program counter to its first operand,
//! which is also the portable way to read the PC (`br rX, r0` falls
//! through).
//!
//! # Multiplication, division, shifts
//!
//! The core has no multiply or divide.  The compiler calls runtime
//! helpers (`smul`, `udiv`, `uleft_shift`, ...) that take their operands
//! in `r1`/`r2` and return through `r1`.

use derive_more::Display;

use crate::common::{Id, Loc};

/// Registers for the Topaz-32 machine, in register-file order.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Reg {
    #[display("r0")]
    R0,
    #[display("r1")]
    R1,
    #[display("r2")]
    R2,
    #[display("r3")]
    R3,
    #[display("r4")]
    R4,
    #[display("r5")]
    R5,
    #[display("r6")]
    R6,
    #[display("r7")]
    R7,
    #[display("r8")]
    R8,
    #[display("r9")]
    R9,
    #[display("r10")]
    R10,
    #[display("r11")]
    R11,
    #[display("r12")]
    R12,
    #[display("r13")]
    R13,
    #[display("r14")]
    R14,
    #[display("r15")]
    R15,
    #[display("r16")]
    R16,
    #[display("r17")]
    R17,
    #[display("r18")]
    R18,
    #[display("r19")]
    R19,
    #[display("r20")]
    R20,
    #[display("r21")]
    R21,
    #[display("r22")]
    R22,
    #[display("r23")]
    R23,
    #[display("r24")]
    R24,
    #[display("r25")]
    R25,
    #[display("r26")]
    R26,
    #[display("r27")]
    R27,
    #[display("r28")]
    R28,
    #[display("ra")]
    Ra,
    #[display("bp")]
    Bp,
    #[display("sp")]
    Sp,
}

/// Argument registers, in argument order.
pub static ARG_REGISTERS: [Reg; 8] = [
    Reg::R1,
    Reg::R2,
    Reg::R3,
    Reg::R4,
    Reg::R5,
    Reg::R6,
    Reg::R7,
    Reg::R8,
];

/// The two registers reserved for lowering scratch.
pub const SCRATCH1: Reg = Reg::R9;
pub const SCRATCH2: Reg = Reg::R10;

/// Machine opcodes.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum MOp {
    // ALU, register and immediate forms
    #[display("and")]
    And,
    #[display("andi")]
    AndI,
    #[display("or")]
    Or,
    #[display("ori")]
    OrI,
    #[display("xor")]
    Xor,
    #[display("xori")]
    XorI,
    #[display("not")]
    Not,
    #[display("add")]
    Add,
    #[display("addi")]
    AddI,
    #[display("sub")]
    Sub,
    #[display("subi")]
    SubI,
    // Shifts and rotations
    #[display("lsl")]
    Lsl,
    #[display("lsr")]
    Lsr,
    #[display("asr")]
    Asr,
    #[display("rol")]
    Rol,
    #[display("ror")]
    Ror,
    #[display("lslc")]
    Lslc,
    #[display("lsrc")]
    Lsrc,
    // Moves
    #[display("mov")]
    Mov,
    #[display("movi")]
    MovI,
    // Register-indexed loads and stores (word / 2-byte / byte)
    #[display("lwa")]
    Lwa,
    #[display("lda")]
    Lda,
    #[display("lba")]
    Lba,
    #[display("swa")]
    Swa,
    #[display("sda")]
    Sda,
    #[display("sba")]
    Sba,
    // Label-addressed loads and stores
    #[display("lw")]
    Lw,
    #[display("ld")]
    Ld,
    #[display("lb")]
    Lb,
    #[display("sw")]
    Sw,
    #[display("sd")]
    Sd,
    #[display("sb")]
    Sb,
    // Width micro-ops
    #[display("sxtb")]
    Sxtb,
    #[display("sxtd")]
    Sxtd,
    #[display("tncb")]
    Tncb,
    #[display("tncd")]
    Tncd,
    // Relative conditional branches
    #[display("beq")]
    Beq,
    #[display("bne")]
    Bne,
    #[display("bgt")]
    Bgt,
    #[display("bge")]
    Bge,
    #[display("blt")]
    Blt,
    #[display("ble")]
    Ble,
    #[display("ba")]
    Ba,
    #[display("bae")]
    Bae,
    #[display("bb")]
    Bb,
    #[display("bbe")]
    Bbe,
    /// Absolute branch through a register; writes the PC to `ra`.
    #[display("br")]
    Br,
    // Calls
    #[display("call")]
    Call,
    #[display("callr")]
    CallR,
    #[display("ret")]
    Ret,
    // Stack
    #[display("push")]
    Push,
    #[display("pushd")]
    PushD,
    #[display("pushb")]
    PushB,
    #[display("pop")]
    Pop,
    #[display("popd")]
    PopD,
    #[display("popb")]
    PopB,
}

/// One concrete machine instruction.
///
/// The field layout is uniform; which fields are meaningful depends on the
/// opcode (see the printer).  `loc` is the closest source position, carried
/// for debuggers.
#[derive(Debug)]
pub struct Instr {
    pub op: MOp,
    pub ra: Reg,
    pub rb: Reg,
    pub rc: Reg,
    pub imm: i32,
    pub label: Option<Id>,
    pub loc: Option<Loc>,
}

impl Instr {
    pub fn new(op: MOp) -> Instr {
        Instr {
            op,
            ra: Reg::R0,
            rb: Reg::R0,
            rc: Reg::R0,
            imm: 0,
            label: None,
            loc: None,
        }
    }

    pub fn rrr(op: MOp, ra: Reg, rb: Reg, rc: Reg) -> Instr {
        Instr {
            ra,
            rb,
            rc,
            ..Instr::new(op)
        }
    }

    pub fn rri(op: MOp, ra: Reg, rb: Reg, imm: i32) -> Instr {
        Instr {
            ra,
            rb,
            imm,
            ..Instr::new(op)
        }
    }

    pub fn rr(op: MOp, ra: Reg, rb: Reg) -> Instr {
        Instr {
            ra,
            rb,
            ..Instr::new(op)
        }
    }

    pub fn ri(op: MOp, ra: Reg, imm: i32) -> Instr {
        Instr {
            ra,
            imm,
            ..Instr::new(op)
        }
    }

    pub fn r(op: MOp, ra: Reg) -> Instr {
        Instr { ra, ..Instr::new(op) }
    }

    /// Register plus label (with addend), for `movi` and label-addressed
    /// memory access.
    pub fn rl(op: MOp, ra: Reg, label: Id, addend: i32) -> Instr {
        Instr {
            ra,
            label: Some(label),
            imm: addend,
            ..Instr::new(op)
        }
    }

    pub fn l(op: MOp, label: Id) -> Instr {
        Instr {
            label: Some(label),
            ..Instr::new(op)
        }
    }

    pub fn i(op: MOp, imm: i32) -> Instr {
        Instr { imm, ..Instr::new(op) }
    }
}

impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use MOp::*;
        let op = self.op;
        let target = || match (&self.label, self.imm) {
            (Some(l), 0) => format!("{l}"),
            (Some(l), n) => format!("{l}+{n}"),
            (None, n) => format!("{n}"),
        };
        match op {
            And | Or | Xor | Add | Sub | Lsl | Lsr | Asr | Rol | Ror | Lslc | Lsrc => {
                write!(f, "{op} {}, {}, {}", self.ra, self.rb, self.rc)
            }
            AndI | OrI | XorI | AddI | SubI => {
                write!(f, "{op} {}, {}, {}", self.ra, self.rb, self.imm)
            }
            Not | Mov | Sxtb | Sxtd | Tncb | Tncd | Br => {
                write!(f, "{op} {}, {}", self.ra, self.rb)
            }
            MovI => write!(f, "{op} {}, {}", self.ra, target()),
            Lwa | Lda | Lba | Swa | Sda | Sba => {
                write!(f, "{op} {}, {}, {}", self.ra, self.rb, self.imm)
            }
            Lw | Ld | Lb | Sw | Sd | Sb => write!(f, "{op} {}, {}", self.ra, target()),
            Beq | Bne | Bgt | Bge | Blt | Ble | Ba | Bae | Bb | Bbe => {
                write!(f, "{op} {}", target())
            }
            Call => write!(f, "{op} {}", target()),
            CallR | Push | PushD | PushB | Pop | PopD | PopB => {
                write!(f, "{op} {}", self.ra)
            }
            Ret => write!(f, "{op}"),
        }
    }
}

/// A line of the output program: an instruction, a label, or a directive.
#[derive(Debug)]
pub enum Item {
    Label(Id),
    Instr(Instr),
    Section(&'static str),
    Global(Id),
    Align(u32),
    /// `.fill 1, size, value`
    Fill { size: u32, value: FillValue },
    Space(u32),
    Comment(String),
}

#[derive(Debug)]
pub enum FillValue {
    Imm(u64),
    Sym(Id),
}

/// The final machine program, as a flat item sequence.
#[derive(Debug, Default)]
pub struct Program {
    pub items: Vec<Item>,
}

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for item in &self.items {
            match item {
                Item::Label(name) => writeln!(f, "{name}:")?,
                Item::Instr(i) => writeln!(f, "    {i}")?,
                Item::Section(name) => writeln!(f, ".section {name}")?,
                Item::Global(name) => writeln!(f, ".global {name}")?,
                Item::Align(n) => writeln!(f, ".align {n}")?,
                Item::Fill { size, value } => match value {
                    FillValue::Imm(v) => writeln!(f, ".fill 1, {size}, {v}")?,
                    FillValue::Sym(s) => writeln!(f, ".fill 1, {size}, {s}")?,
                },
                Item::Space(n) => writeln!(f, ".space {n}")?,
                Item::Comment(text) => writeln!(f, "    # {text}")?,
            }
        }
        Ok(())
    }
}
