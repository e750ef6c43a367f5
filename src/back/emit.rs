//! Lowering from the assembly IR to concrete Topaz-32 instructions.
//!
//! The general template: load source operands into the two scratch
//! registers, run the core operation, store the result back.  Moves,
//! compares, jumps, and pushes are fast-pathed.  Multiplication, division,
//! modulo, and shifts become runtime helper calls.  Conditional jumps
//! expand to a short inverted branch over a two-instruction absolute jump,
//! which keeps branch offsets short while reaching arbitrary labels.

use crate::back::asm::{self, AsmType, OpKind, Operand};
use crate::back::machine::*;
use crate::common::*;
use crate::front::sym::InitCell;
use crate::middle::tac::{BinOp, Cond, UnOp};

pub fn emit(program: &asm::Program) -> Result<Program, Error> {
    let mut out = Emitter {
        items: Vec::new(),
        loc: None,
        func: None,
    };
    for item in &program.items {
        out.top_level(item)?;
    }
    Ok(Program { items: out.items })
}

struct Emitter {
    items: Vec<Item>,
    loc: Option<Loc>,
    func: Option<Id>,
}

impl Emitter {
    fn bug(&self, msg: impl Into<String>) -> Error {
        let mut e = Error::new("machine lowering", msg);
        if let Some(func) = self.func {
            e = e.in_func(func);
        }
        if let Some(loc) = self.loc {
            e = e.at(loc);
        }
        e
    }

    fn push(&mut self, mut instr: Instr) {
        instr.loc = self.loc;
        self.items.push(Item::Instr(instr));
    }

    fn comment(&mut self, text: impl Into<String>) {
        self.items.push(Item::Comment(text.into()));
    }

    fn top_level(&mut self, item: &asm::TopLevel) -> Result<(), Error> {
        match item {
            asm::TopLevel::Section(name) => {
                self.items.push(Item::Section(*name));
                Ok(())
            }
            asm::TopLevel::Func {
                name,
                global,
                body,
                ..
            } => self.function(*name, *global, body),
            asm::TopLevel::StaticVar {
                name,
                global,
                align,
                inits,
            } => {
                self.static_data(*name, *global, *align, inits);
                Ok(())
            }
            asm::TopLevel::StaticConst { name, align, inits } => {
                self.static_data(*name, false, *align, inits);
                Ok(())
            }
        }
    }

    fn static_data(&mut self, name: Id, global: bool, align: u32, inits: &[InitCell]) {
        if global {
            self.items.push(Item::Global(name));
        }
        self.items.push(Item::Align(align.max(1)));
        self.items.push(Item::Label(name));
        for cell in inits {
            match cell {
                InitCell::Char(v) => self.fill(1, *v as u8 as u64),
                InitCell::UChar(v) => self.fill(1, *v as u64),
                InitCell::Short(v) => self.fill(2, *v as u16 as u64),
                InitCell::UShort(v) => self.fill(2, *v as u64),
                InitCell::Int(v) | InitCell::Long(v) => self.fill(4, *v as u32 as u64),
                InitCell::UInt(v) | InitCell::ULong(v) => self.fill(4, *v as u64),
                InitCell::Zero(n) => self.items.push(Item::Space(*n)),
                InitCell::String(bytes) => {
                    // Byte strings appear as literal byte fills.
                    for b in bytes {
                        self.fill(1, *b as u64);
                    }
                }
                InitCell::Pointer(sym) => self.items.push(Item::Fill {
                    size: 4,
                    value: FillValue::Sym(*sym),
                }),
            }
        }
    }

    fn fill(&mut self, size: u32, value: u64) {
        self.items.push(Item::Fill {
            size,
            value: FillValue::Imm(value),
        });
    }

    fn function(&mut self, name: Id, global: bool, body: &[asm::Instruction]) -> Result<(), Error> {
        self.func = Some(name);
        // Debuggers step into the function at its first source line.
        self.loc = body.iter().find_map(|i| match i {
            asm::Instruction::Boundary(loc) => Some(*loc),
            _ => None,
        });
        if global {
            self.items.push(Item::Global(name));
        }
        self.items.push(Item::Label(name));
        self.comment("Function Prologue");
        if let Some(loc) = self.loc {
            self.comment(loc.to_string());
        }
        self.push(Instr::rri(MOp::Swa, Reg::Ra, Reg::Sp, -4));
        self.push(Instr::rri(MOp::Swa, Reg::Bp, Reg::Sp, -8));
        self.push(Instr::rri(MOp::SubI, Reg::Sp, Reg::Sp, 8));
        self.push(Instr::rr(MOp::Mov, Reg::Bp, Reg::Sp));
        for insn in body {
            self.instruction(insn)?;
        }
        self.func = None;
        self.loc = None;
        Ok(())
    }

    // ----- operand access -----

    /// Load an operand into a register, choosing the load variant from the
    /// operand kind and width.
    fn load(&mut self, op: &Operand, into: Reg) -> Result<(), Error> {
        match (&op.kind, op.ty) {
            (OpKind::Lit(v), _) => self.push(Instr::ri(MOp::MovI, into, *v)),
            (OpKind::Reg(r), _) => self.push(Instr::rr(MOp::Mov, into, *r)),
            (OpKind::Memory(base, off), ty) => {
                let op = match ty {
                    AsmType::Byte => MOp::Lba,
                    AsmType::Half => MOp::Lda,
                    _ => MOp::Lwa,
                };
                self.push(Instr::rri(op, into, *base, *off));
            }
            (OpKind::Data(label, addend), ty) => {
                let op = match ty {
                    AsmType::Byte => MOp::Lb,
                    AsmType::Half => MOp::Ld,
                    _ => MOp::Lw,
                };
                self.push(Instr::rl(op, into, *label, *addend));
            }
            (OpKind::Pseudo(name), _) | (OpKind::PseudoMem(name, _), _) => {
                return Err(self.bug(format!("pseudo operand '{name}' survived mapping")))
            }
        }
        Ok(())
    }

    /// Store a register into an operand, symmetric to [Self::load].
    fn store(&mut self, from: Reg, op: &Operand) -> Result<(), Error> {
        match (&op.kind, op.ty) {
            (OpKind::Reg(r), _) => self.push(Instr::rr(MOp::Mov, *r, from)),
            (OpKind::Memory(base, off), ty) => {
                let op = match ty {
                    AsmType::Byte => MOp::Sba,
                    AsmType::Half => MOp::Sda,
                    _ => MOp::Swa,
                };
                self.push(Instr::rri(op, from, *base, *off));
            }
            (OpKind::Data(label, addend), ty) => {
                let op = match ty {
                    AsmType::Byte => MOp::Sb,
                    AsmType::Half => MOp::Sd,
                    _ => MOp::Sw,
                };
                self.push(Instr::rl(op, from, *label, *addend));
            }
            (OpKind::Lit(_), _) => return Err(self.bug("store into a literal")),
            (OpKind::Pseudo(name), _) | (OpKind::PseudoMem(name, _), _) => {
                return Err(self.bug(format!("pseudo operand '{name}' survived mapping")))
            }
        }
        Ok(())
    }

    // ----- instructions -----

    fn instruction(&mut self, insn: &asm::Instruction) -> Result<(), Error> {
        use asm::Instruction as A;
        match insn {
            A::Boundary(loc) => {
                self.loc = Some(*loc);
                self.comment(loc.to_string());
                Ok(())
            }
            A::Label(name) => {
                self.items.push(Item::Label(*name));
                Ok(())
            }
            A::Mov { dst, src } => self.mov(dst, src),
            A::Unary { op, dst, src } => {
                self.load(src, SCRATCH1)?;
                match op {
                    UnOp::Complement => self.push(Instr::rr(MOp::Not, SCRATCH1, SCRATCH1)),
                    UnOp::Negate => {
                        self.push(Instr::rrr(MOp::Sub, SCRATCH1, Reg::R0, SCRATCH1))
                    }
                    UnOp::UnaryPlus => {}
                    UnOp::BoolNot => return Err(self.bug("unexpected boolean not")),
                }
                self.store(SCRATCH1, dst)
            }
            A::Binary {
                op,
                dst,
                src1,
                src2,
            } => self.binary(*op, dst, src1, src2),
            A::Cmp { src1, src2 } => {
                // A compare is a subtraction into the zero register; only
                // the flags survive.
                self.load(src1, SCRATCH1)?;
                self.load(src2, SCRATCH2)?;
                self.push(Instr::rrr(MOp::Sub, Reg::R0, SCRATCH1, SCRATCH2));
                Ok(())
            }
            A::Jump(target) => {
                self.absolute_jump(*target);
                Ok(())
            }
            A::CondJump(cond, target) => {
                // Branch over the absolute jump when the condition fails.
                self.push(Instr::i(branch_op(invert(*cond)), 2));
                self.absolute_jump(*target);
                Ok(())
            }
            A::Push(src) => {
                self.load(src, SCRATCH1)?;
                self.push(Instr::r(MOp::Push, SCRATCH1));
                Ok(())
            }
            A::Call(name) => {
                self.push(Instr::l(MOp::Call, *name));
                Ok(())
            }
            A::CallReg(fun) => {
                self.load(fun, SCRATCH1)?;
                self.push(Instr::r(MOp::CallR, SCRATCH1));
                Ok(())
            }
            A::Ret => {
                self.push(Instr::rr(MOp::Mov, Reg::Sp, Reg::Bp));
                self.push(Instr::rri(MOp::Lwa, Reg::Ra, Reg::Bp, 4));
                self.push(Instr::rri(MOp::Lwa, Reg::Bp, Reg::Bp, 0));
                self.push(Instr::rri(MOp::AddI, Reg::Sp, Reg::Sp, 8));
                self.push(Instr::new(MOp::Ret));
                Ok(())
            }
            A::GetAddress { dst, src } => self.get_address(dst, src),
            A::Load { ty, dst, ptr } => {
                self.load(ptr, SCRATCH1)?;
                let op = match ty {
                    AsmType::Byte => MOp::Lba,
                    AsmType::Half => MOp::Lda,
                    _ => MOp::Lwa,
                };
                self.push(Instr::rri(op, SCRATCH2, SCRATCH1, 0));
                self.store(SCRATCH2, dst)
            }
            A::Store { ty, ptr, src } => {
                self.load(src, SCRATCH2)?;
                self.load(ptr, SCRATCH1)?;
                let op = match ty {
                    AsmType::Byte => MOp::Sba,
                    AsmType::Half => MOp::Sda,
                    _ => MOp::Swa,
                };
                self.push(Instr::rri(op, SCRATCH2, SCRATCH1, 0));
                Ok(())
            }
            A::Trunc { bytes, dst, src } => {
                self.load(src, SCRATCH1)?;
                let op = match bytes {
                    1 => MOp::Tncb,
                    2 => MOp::Tncd,
                    other => return Err(self.bug(format!("truncation to {other} bytes"))),
                };
                self.push(Instr::rr(op, SCRATCH1, SCRATCH1));
                self.store(SCRATCH1, dst)
            }
            A::Extend { bytes, dst, src } => {
                self.load(src, SCRATCH1)?;
                let op = match bytes {
                    1 => MOp::Sxtb,
                    2 => MOp::Sxtd,
                    other => return Err(self.bug(format!("extension from {other} bytes"))),
                };
                self.push(Instr::rr(op, SCRATCH1, SCRATCH1));
                self.store(SCRATCH1, dst)
            }
        }
    }

    fn mov(&mut self, dst: &Operand, src: &Operand) -> Result<(), Error> {
        // Register and literal endpoints avoid the scratch round-trip.
        match (&dst.kind, &src.kind) {
            (OpKind::Reg(d), _) => return self.load(src, *d),
            (_, OpKind::Reg(s)) => return self.store(*s, dst),
            _ => {}
        }
        self.load(src, SCRATCH1)?;
        self.store(SCRATCH1, dst)
    }

    fn binary(
        &mut self,
        op: BinOp,
        dst: &Operand,
        src1: &Operand,
        src2: &Operand,
    ) -> Result<(), Error> {
        if op.needs_helper() {
            // Arguments in r1/r2, result read back from r1.
            self.load(src1, Reg::R1)?;
            self.load(src2, Reg::R2)?;
            self.push(Instr::l(MOp::Call, helper_name(op)));
            return self.store(Reg::R1, dst);
        }
        // In-place register adjustment, e.g. the stack-pointer bumps around
        // calls and frames.
        if let (OpKind::Reg(d), OpKind::Reg(s), OpKind::Lit(imm)) =
            (&dst.kind, &src1.kind, &src2.kind)
        {
            if d == s {
                self.push(Instr::rri(imm_op(op), *d, *s, *imm));
                return Ok(());
            }
        }
        self.load(src1, SCRATCH1)?;
        if let OpKind::Lit(imm) = src2.kind {
            self.push(Instr::rri(imm_op(op), SCRATCH1, SCRATCH1, imm));
        } else {
            self.load(src2, SCRATCH2)?;
            self.push(Instr::rrr(reg_op(op), SCRATCH1, SCRATCH1, SCRATCH2));
        }
        self.store(SCRATCH1, dst)
    }

    fn get_address(&mut self, dst: &Operand, src: &Operand) -> Result<(), Error> {
        match &src.kind {
            OpKind::Memory(base, off) => {
                self.push(Instr::rri(MOp::AddI, SCRATCH1, *base, *off));
            }
            OpKind::Data(label, addend) => {
                // The data address is computed PC-relative so the code is
                // position-independent: `br rX, r0` captures the program
                // counter and falls through.
                self.push(Instr::rl(MOp::MovI, SCRATCH1, *label, *addend));
                self.push(Instr::rr(MOp::Br, SCRATCH2, Reg::R0));
                self.push(Instr::rrr(MOp::Add, SCRATCH1, SCRATCH1, SCRATCH2));
            }
            other => return Err(self.bug(format!("address of operand {other:?}"))),
        }
        self.store(SCRATCH1, dst)
    }

    fn absolute_jump(&mut self, target: Id) {
        self.push(Instr::rl(MOp::MovI, SCRATCH1, target, 0));
        self.push(Instr::rr(MOp::Br, Reg::R0, SCRATCH1));
    }
}

fn invert(cond: Cond) -> Cond {
    match cond {
        Cond::E => Cond::NE,
        Cond::NE => Cond::E,
        Cond::G => Cond::LE,
        Cond::GE => Cond::L,
        Cond::L => Cond::GE,
        Cond::LE => Cond::G,
        Cond::A => Cond::BE,
        Cond::AE => Cond::B,
        Cond::B => Cond::AE,
        Cond::BE => Cond::A,
    }
}

fn branch_op(cond: Cond) -> MOp {
    match cond {
        Cond::E => MOp::Beq,
        Cond::NE => MOp::Bne,
        Cond::G => MOp::Bgt,
        Cond::GE => MOp::Bge,
        Cond::L => MOp::Blt,
        Cond::LE => MOp::Ble,
        Cond::A => MOp::Ba,
        Cond::AE => MOp::Bae,
        Cond::B => MOp::Bb,
        Cond::BE => MOp::Bbe,
    }
}

fn reg_op(op: BinOp) -> MOp {
    match op {
        BinOp::Add => MOp::Add,
        BinOp::Sub => MOp::Sub,
        BinOp::And => MOp::And,
        BinOp::Or => MOp::Or,
        BinOp::Xor => MOp::Xor,
        _ => unreachable!("helper operations never reach the ALU template"),
    }
}

fn imm_op(op: BinOp) -> MOp {
    match op {
        BinOp::Add => MOp::AddI,
        BinOp::Sub => MOp::SubI,
        BinOp::And => MOp::AndI,
        BinOp::Or => MOp::OrI,
        BinOp::Xor => MOp::XorI,
        _ => unreachable!("helper operations never reach the ALU template"),
    }
}

/// Runtime helpers for the operations the core lacks.
fn helper_name(op: BinOp) -> Id {
    let name = match op {
        BinOp::SMul => "smul",
        BinOp::UMul => "umul",
        BinOp::SDiv => "sdiv",
        BinOp::UDiv => "udiv",
        BinOp::SMod => "smod",
        BinOp::UMod => "umod",
        BinOp::Asl => "sleft_shift",
        BinOp::Asr => "sright_shift",
        BinOp::Lsl => "uleft_shift",
        BinOp::Lsr => "uright_shift",
        _ => unreachable!("only helper operations are named"),
    };
    id(name)
}
