//! Lowering from TAC to the assembly IR.
//!
//! Runs per function in three substages: instruction translation (TAC
//! values become literal or pseudo operands, calls become the argument
//! convention), pseudo mapping (statics map to data labels, everything else
//! gets a stack slot), and an in-place rewrite that replaces every pseudo
//! operand with its concrete mapping.  The synthesized `sub sp, sp, frame`
//! prologue gets its size patched in after the mapping.

use crate::back::asm::*;
use crate::back::machine::{Reg, ARG_REGISTERS};
use crate::common::*;
use crate::front::sym::{Symbol, Tables};
use crate::front::types::Type;
use crate::middle::tac;
use crate::middle::tac::{BinOp, UnOp};

pub fn codegen(program: &tac::Program, tables: &Tables) -> Result<Program, Error> {
    let mut items = Vec::new();
    items.push(TopLevel::Section("text"));
    for func in &program.funcs {
        let tac::TopLevel::Func {
            name,
            global,
            params,
            body,
        } = func
        else {
            return Err(Error::new("asm lowering", "static entry in the function list"));
        };
        items.push(lower_function(*name, *global, params, body, tables)?);
    }
    items.push(TopLevel::Section("data"));
    for item in &program.statics {
        match item {
            tac::TopLevel::StaticVar {
                name,
                global,
                ty,
                inits,
            } => items.push(TopLevel::StaticVar {
                name: *name,
                global: *global,
                align: tables.types.align_of(ty),
                inits: inits.clone(),
            }),
            tac::TopLevel::StaticConst { name, ty, inits } => items.push(TopLevel::StaticConst {
                name: *name,
                align: tables.types.align_of(ty),
                inits: inits.clone(),
            }),
            tac::TopLevel::Func { .. } => {
                return Err(Error::new("asm lowering", "function in the static list"))
            }
        }
    }
    Ok(Program { items })
}

fn lower_function(
    name: Id,
    global: bool,
    params: &[Id],
    body: &[tac::Instruction],
    tables: &Tables,
) -> Result<TopLevel, Error> {
    let mut gen = FuncGen {
        tables,
        func: name,
        out: Vec::new(),
    };

    // Incoming arguments: the first eight come in registers, the rest were
    // pushed by the caller and sit above the saved bp/ra pair.
    for (i, param) in params.iter().enumerate() {
        let dst = gen.var_operand(*param)?;
        let src = if i < ARG_REGISTERS.len() {
            Operand::reg(ARG_REGISTERS[i])
        } else {
            let slot = 8 + 4 * (i - ARG_REGISTERS.len()) as i32;
            Operand {
                kind: OpKind::Memory(Reg::Bp, slot),
                ty: AsmType::Word,
            }
        };
        gen.out.push(Instruction::Mov { dst, src });
    }

    for insn in body {
        gen.instruction(insn)?;
    }

    // Map pseudos to concrete operands, then rewrite them in place.
    let mut map = PseudoMap {
        tables,
        func: name,
        map: Map::new(),
        frame: 0,
        locals: Vec::new(),
    };
    let mut code = gen.out;
    for insn in &mut code {
        for op in insn.operands_mut() {
            map.rewrite(op)?;
        }
    }
    debug_assert!(code.iter_mut().all(|i| i.operands_mut().iter().all(|o| !o.is_pseudo())));

    let frame_size = map.frame;
    code.insert(
        0,
        Instruction::Binary {
            op: BinOp::Sub,
            dst: Operand::reg(Reg::Sp),
            src1: Operand::reg(Reg::Sp),
            src2: Operand::lit(frame_size as i32),
        },
    );

    Ok(TopLevel::Func {
        name,
        global,
        body: code,
        frame_size,
        locals: map.locals,
    })
}

struct FuncGen<'a> {
    tables: &'a Tables,
    func: Id,
    out: Vec<Instruction>,
}

impl<'a> FuncGen<'a> {
    fn bug(&self, msg: impl Into<String>) -> Error {
        Error::new("asm lowering", msg).in_func(self.func)
    }

    fn emit(&mut self, insn: Instruction) {
        self.out.push(insn);
    }

    fn symbol(&self, name: Id) -> Result<&Symbol, Error> {
        self.tables
            .symbols
            .expect(name)
            .map_err(|e| Error::new(e.op, e.msg).in_func(self.func))
    }

    /// Plain scalars are accessed as whole slots; statics and aggregates
    /// keep their true width so the right load/store variant is chosen.
    fn var_operand(&self, name: Id) -> Result<Operand, Error> {
        let sym = self.symbol(name)?;
        let ty = if sym.is_static_storage() || sym.ty.is_aggregate() || sym.ty.is_function() {
            AsmType::of(&sym.ty, &self.tables.types)
        } else {
            AsmType::Word
        };
        Ok(Operand::pseudo(name, ty))
    }

    fn operand(&self, v: &tac::Value) -> Result<Operand, Error> {
        match v {
            tac::Value::Const(bits, _) => Ok(Operand::lit(*bits as u32 as i32)),
            tac::Value::Var(name, _) => self.var_operand(*name),
        }
    }

    fn scalar_ty(&self, ty: &Type) -> AsmType {
        AsmType::of(ty, &self.tables.types)
    }

    fn instruction(&mut self, insn: &tac::Instruction) -> Result<(), Error> {
        use tac::Instruction as T;
        match insn {
            T::Return(value) => {
                if let Some(v) = value {
                    let src = self.operand(v)?;
                    self.emit(Instruction::Mov {
                        dst: Operand::reg(Reg::R1),
                        src,
                    });
                }
                self.emit(Instruction::Ret);
                Ok(())
            }
            T::Unary { op, dst, src } => {
                let dst = self.operand(dst)?;
                let src = self.operand(src)?;
                match op {
                    UnOp::UnaryPlus => self.emit(Instruction::Mov { dst, src }),
                    UnOp::Complement | UnOp::Negate => {
                        self.emit(Instruction::Unary { op: *op, dst, src })
                    }
                    UnOp::BoolNot => {
                        return Err(self.bug("boolean not must be lowered before assembly"))
                    }
                }
                Ok(())
            }
            T::Binary {
                op,
                dst,
                src1,
                src2,
            } => {
                let dst = self.operand(dst)?;
                let src1 = self.operand(src1)?;
                let src2 = self.operand(src2)?;
                self.emit(Instruction::Binary {
                    op: *op,
                    dst,
                    src1,
                    src2,
                });
                Ok(())
            }
            T::Cmp { src1, src2 } => {
                let src1 = self.operand(src1)?;
                let src2 = self.operand(src2)?;
                self.emit(Instruction::Cmp { src1, src2 });
                Ok(())
            }
            T::CondJump { cond, target } => {
                self.emit(Instruction::CondJump(*cond, *target));
                Ok(())
            }
            T::Jump { target } => {
                self.emit(Instruction::Jump(*target));
                Ok(())
            }
            T::Label(name) => {
                self.emit(Instruction::Label(*name));
                Ok(())
            }
            T::Copy { dst, src } => {
                let dst = self.operand(dst)?;
                let src = self.operand(src)?;
                self.emit(Instruction::Mov { dst, src });
                Ok(())
            }
            T::Call { name, dst, args } => {
                self.call_sequence(args, dst, CallTarget::Direct(*name))
            }
            T::CallIndirect { fun, dst, args } => {
                let fun = self.operand(fun)?;
                self.call_sequence(args, dst, CallTarget::Register(fun))
            }
            T::GetAddress { dst, src } => {
                let dst = self.operand(dst)?;
                let src = self.operand(src)?;
                self.emit(Instruction::GetAddress { dst, src });
                Ok(())
            }
            T::Load { dst, ptr } => {
                let ty = self.scalar_ty(dst.ty());
                let dst = self.operand(dst)?;
                let ptr = self.operand(ptr)?;
                self.emit(Instruction::Load { ty, dst, ptr });
                Ok(())
            }
            T::Store { ptr, src } => {
                let ty = self.scalar_ty(src.ty());
                let ptr = self.operand(ptr)?;
                let src = self.operand(src)?;
                self.emit(Instruction::Store { ty, ptr, src });
                Ok(())
            }
            T::CopyToOffset { dst, offset, src } => {
                let ty = self.scalar_ty(src.ty());
                let src = self.operand(src)?;
                self.emit(Instruction::Mov {
                    dst: Operand::pseudo_mem(*dst, *offset as i32, ty),
                    src,
                });
                Ok(())
            }
            T::CopyFromOffset { dst, src, offset } => {
                let ty = self.scalar_ty(dst.ty());
                let signed = dst.ty().is_signed();
                let width = ty.width();
                let dst = self.operand(dst)?;
                let src = Operand::pseudo_mem(*src, *offset as i32, ty);
                if signed && width < 4 {
                    // Narrow signed fields sign-extend on the way out.
                    self.emit(Instruction::Extend {
                        bytes: width,
                        dst,
                        src,
                    });
                } else {
                    self.emit(Instruction::Mov { dst, src });
                }
                Ok(())
            }
            T::Trunc { dst, src, bytes } => {
                let dst = self.operand(dst)?;
                let src = self.operand(src)?;
                self.emit(Instruction::Trunc {
                    bytes: *bytes,
                    dst,
                    src,
                });
                Ok(())
            }
            T::Extend {
                dst,
                src,
                src_bytes,
            } => {
                let dst = self.operand(dst)?;
                let src = self.operand(src)?;
                self.emit(Instruction::Extend {
                    bytes: *src_bytes,
                    dst,
                    src,
                });
                Ok(())
            }
            T::Boundary(loc) => {
                self.emit(Instruction::Boundary(*loc));
                Ok(())
            }
        }
    }

    /// The call convention: eight register arguments, the rest pushed
    /// right-to-left, caller releases the pushed slots, result in `r1`.
    fn call_sequence(
        &mut self,
        args: &[tac::Value],
        dst: &Option<tac::Value>,
        target: CallTarget,
    ) -> Result<(), Error> {
        let reg_args = args.len().min(ARG_REGISTERS.len());
        for (i, arg) in args[..reg_args].iter().enumerate() {
            let src = self.operand(arg)?;
            self.emit(Instruction::Mov {
                dst: Operand::reg(ARG_REGISTERS[i]),
                src,
            });
        }
        let stack_args = &args[reg_args..];
        for arg in stack_args.iter().rev() {
            let src = self.operand(arg)?;
            self.emit(Instruction::Push(src));
        }
        match target {
            CallTarget::Direct(name) => self.emit(Instruction::Call(name)),
            CallTarget::Register(fun) => self.emit(Instruction::CallReg(fun)),
        }
        if !stack_args.is_empty() {
            self.emit(Instruction::Binary {
                op: BinOp::Add,
                dst: Operand::reg(Reg::Sp),
                src1: Operand::reg(Reg::Sp),
                src2: Operand::lit(4 * stack_args.len() as i32),
            });
        }
        if let Some(dst) = dst {
            let dst = self.operand(dst)?;
            self.emit(Instruction::Mov {
                dst,
                src: Operand::reg(Reg::R1),
            });
        }
        Ok(())
    }
}

enum CallTarget {
    Direct(Id),
    Register(Operand),
}

/// The pseudo-to-concrete operand mapping of one function.
struct PseudoMap<'a> {
    tables: &'a Tables,
    func: Id,
    map: Map<Id, OpKind>,
    frame: u32,
    locals: Vec<(Id, i32)>,
}

impl<'a> PseudoMap<'a> {
    fn resolve(&mut self, name: Id) -> Result<OpKind, Error> {
        if let Some(kind) = self.map.get(&name) {
            return Ok(kind.clone());
        }
        let sym = self
            .tables
            .symbols
            .expect(name)
            .map_err(|e| Error::new(e.op, e.msg).in_func(self.func))?;
        let kind = if sym.is_static_storage() || sym.ty.is_function() {
            OpKind::Data(name, 0)
        } else {
            // A fresh stack slot: at least 4 bytes, aligned to the slot
            // size.
            let size = self.tables.types.size_of(&sym.ty).max(4);
            let align = self.tables.types.align_of(&sym.ty).max(4);
            self.frame = (self.frame + size).div_ceil(align) * align;
            let offset = -(self.frame as i32);
            self.locals.push((name, offset));
            OpKind::Memory(Reg::Bp, offset)
        };
        self.map.insert(name, kind.clone());
        Ok(kind)
    }

    fn rewrite(&mut self, op: &mut Operand) -> Result<(), Error> {
        match op.kind.clone() {
            OpKind::Pseudo(name) => {
                op.kind = self.resolve(name)?;
                Ok(())
            }
            OpKind::PseudoMem(name, offset) => {
                op.kind = match self.resolve(name)? {
                    OpKind::Memory(reg, base) => OpKind::Memory(reg, base + offset),
                    OpKind::Data(label, base) => OpKind::Data(label, base + offset),
                    other => {
                        return Err(Error::new(
                            "asm lowering",
                            format!("aggregate '{name}' mapped to {other:?}"),
                        )
                        .in_func(self.func))
                    }
                };
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
