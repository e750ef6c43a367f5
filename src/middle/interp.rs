//! A direct interpreter for TAC programs.
//!
//! A testing aid, not part of the compiler proper: it executes the middle
//! end's output so end-to-end programs can be checked without the target
//! machine.  The model is a flat byte memory holding the statics, a
//! downward-growing stack of frames (every variable gets a real address, so
//! address-of works), and a fake code region that gives every function an
//! address so function-pointer values can round-trip.

use crate::common::*;
use crate::front::sym::{InitCell, Tables};
use crate::front::types::Type;
use crate::middle::tac::*;

const MEMORY_SIZE: usize = 1 << 20;
/// Functions get fake addresses spaced out of this region.
const CODE_BASE: u32 = 16;
const CODE_STRIDE: u32 = 4;

/// The observable result of a program run.
pub struct Outcome {
    /// `main`'s return value.
    pub exit: i32,
    /// Everything written through `putchar`.
    pub stdout: Vec<u8>,
}

/// Run a TAC program's `main`.
pub fn interpret(program: &Program, tables: &Tables) -> Result<Outcome, Error> {
    let mut interp = Interp::new(program, tables)?;
    let exit = interp.call(id("main"), &[])? as i32;
    Ok(Outcome {
        exit,
        stdout: interp.stdout,
    })
}

struct Interp<'a> {
    tables: &'a Tables,
    funcs: Map<Id, &'a TopLevel>,
    fn_addrs: Map<Id, u32>,
    addr_fns: Map<u32, Id>,
    globals: Map<Id, u32>,
    mem: Vec<u8>,
    sp: u32,
    statics_end: u32,
    stdout: Vec<u8>,
}

impl<'a> Interp<'a> {
    fn new(program: &'a Program, tables: &'a Tables) -> Result<Self, Error> {
        let mut interp = Interp {
            tables,
            funcs: Map::new(),
            fn_addrs: Map::new(),
            addr_fns: Map::new(),
            globals: Map::new(),
            mem: vec![0; MEMORY_SIZE],
            sp: MEMORY_SIZE as u32,
            statics_end: 0,
            stdout: Vec::new(),
        };
        let mut code = CODE_BASE;
        for f in &program.funcs {
            if let TopLevel::Func { name, .. } = f {
                interp.funcs.insert(*name, f);
                interp.fn_addrs.insert(*name, code);
                interp.addr_fns.insert(code, *name);
                code += CODE_STRIDE;
            }
        }
        // Place all statics first so pointer cells can refer to any of
        // them, then fill in the bytes.
        let mut next = code;
        for item in &program.statics {
            let (name, ty) = match item {
                TopLevel::StaticVar { name, ty, .. } | TopLevel::StaticConst { name, ty, .. } => {
                    (name, ty)
                }
                TopLevel::Func { .. } => continue,
            };
            let align = tables.types.align_of(ty).max(1);
            next = next.div_ceil(align) * align;
            interp.globals.insert(*name, next);
            next += tables.types.size_of(ty).max(1);
        }
        interp.statics_end = next;
        for item in &program.statics {
            let (name, cells) = match item {
                TopLevel::StaticVar { name, inits, .. }
                | TopLevel::StaticConst {
                    name, inits, ..
                } => (name, inits),
                TopLevel::Func { .. } => continue,
            };
            let mut at = interp.globals[name];
            for cell in cells {
                at = interp.fill_cell(at, cell)?;
            }
        }
        Ok(interp)
    }

    fn fill_cell(&mut self, at: u32, cell: &InitCell) -> Result<u32, Error> {
        use InitCell::*;
        let end = match cell {
            Char(v) => {
                self.write(at, *v as u32, 1);
                at + 1
            }
            UChar(v) => {
                self.write(at, *v as u32, 1);
                at + 1
            }
            Short(v) => {
                self.write(at, *v as u32, 2);
                at + 2
            }
            UShort(v) => {
                self.write(at, *v as u32, 2);
                at + 2
            }
            Int(v) | Long(v) => {
                self.write(at, *v as u32, 4);
                at + 4
            }
            UInt(v) | ULong(v) => {
                self.write(at, *v, 4);
                at + 4
            }
            Zero(n) => at + n,
            String(bytes) => {
                self.mem[at as usize..at as usize + bytes.len()].copy_from_slice(bytes);
                at + bytes.len() as u32
            }
            Pointer(sym) => {
                let target = self
                    .globals
                    .get(sym)
                    .copied()
                    .or_else(|| self.fn_addrs.get(sym).copied())
                    .ok_or_else(|| {
                        Error::new("tac interpreter", format!("unresolved pointer cell '{sym}'"))
                    })?;
                self.write(at, target, 4);
                at + 4
            }
        };
        Ok(end)
    }

    fn write(&mut self, addr: u32, value: u32, width: u32) {
        let bytes = value.to_le_bytes();
        let addr = addr as usize;
        self.mem[addr..addr + width as usize].copy_from_slice(&bytes[..width as usize]);
    }

    fn read(&self, addr: u32, width: u32, signed: bool) -> u32 {
        let addr = addr as usize;
        match (width, signed) {
            (1, false) => self.mem[addr] as u32,
            (1, true) => self.mem[addr] as i8 as i32 as u32,
            (2, false) => u16::from_le_bytes([self.mem[addr], self.mem[addr + 1]]) as u32,
            (2, true) => {
                i16::from_le_bytes([self.mem[addr], self.mem[addr + 1]]) as i32 as u32
            }
            _ => u32::from_le_bytes([
                self.mem[addr],
                self.mem[addr + 1],
                self.mem[addr + 2],
                self.mem[addr + 3],
            ]),
        }
    }

    fn scalar_width(&self, ty: &Type) -> u32 {
        self.tables.types.size_of(ty).clamp(1, 4)
    }

    fn call(&mut self, name: Id, args: &[u32]) -> Result<u32, Error> {
        let Some(&item) = self.funcs.get(&name) else {
            // The runtime's output helper is the one builtin.
            if name.as_str() == "putchar" {
                let c = *args.first().unwrap_or(&0);
                self.stdout.push(c as u8);
                return Ok(c);
            }
            return Err(Error::new(
                "tac interpreter",
                format!("call to an undefined function '{name}'"),
            ));
        };
        let TopLevel::Func { params, body, .. } = item else {
            unreachable!("funcs map holds functions only");
        };

        // Allocate one frame slot per distinct variable in the body.
        let saved_sp = self.sp;
        let mut env: Map<Id, u32> = Map::new();
        let mut names: Set<Id> = params.iter().copied().collect();
        collect_vars(body, &mut names);
        for var in &names {
            if self.globals.contains_key(var) || self.fn_addrs.contains_key(var) {
                continue;
            }
            let sym = self
                .tables
                .symbols
                .expect(*var)
                .map_err(|e| Error::new("tac interpreter", e.msg).in_func(name))?;
            let size = self.tables.types.size_of(&sym.ty).max(4);
            let align = self.tables.types.align_of(&sym.ty).max(4);
            if self.sp < self.statics_end + size + align {
                return Err(Error::new("tac interpreter", "out of stack memory"));
            }
            self.sp = (self.sp - size) / align * align;
            env.insert(*var, self.sp);
        }
        for (param, value) in params.iter().zip(args.iter()) {
            let addr = env[param];
            self.write(addr, *value, 4);
        }

        // Pre-scan branch targets.
        let mut labels: Map<Id, usize> = Map::new();
        for (i, insn) in body.iter().enumerate() {
            if let Instruction::Label(l) = insn {
                labels.insert(*l, i);
            }
        }

        let result = self.run(body, &labels, &env, name);
        self.sp = saved_sp;
        result
    }

    fn run(
        &mut self,
        body: &[Instruction],
        labels: &Map<Id, usize>,
        env: &Map<Id, u32>,
        func: Id,
    ) -> Result<u32, Error> {
        let bug = |msg: String| Error::new("tac interpreter", msg).in_func(func);
        let mut pc = 0usize;
        let mut flags: (u32, u32) = (0, 0);
        while pc < body.len() {
            match &body[pc] {
                Instruction::Boundary(_) | Instruction::Label(_) => {}
                Instruction::Return(value) => {
                    return match value {
                        Some(v) => self.value(v, env, func),
                        None => Ok(0),
                    };
                }
                Instruction::Unary { op, dst, src } => {
                    let v = self.value(src, env, func)?;
                    let r = match op {
                        UnOp::Complement => !v,
                        UnOp::Negate => v.wrapping_neg(),
                        UnOp::BoolNot => (v == 0) as u32,
                        UnOp::UnaryPlus => v,
                    };
                    self.set_var(dst, r, env, func)?;
                }
                Instruction::Binary {
                    op,
                    dst,
                    src1,
                    src2,
                } => {
                    let a = self.value(src1, env, func)?;
                    let b = self.value(src2, env, func)?;
                    let r = apply_alu(*op, a, b)
                        .ok_or_else(|| bug("division by zero".into()))?;
                    self.set_var(dst, r, env, func)?;
                }
                Instruction::Cmp { src1, src2 } => {
                    flags = (self.value(src1, env, func)?, self.value(src2, env, func)?);
                }
                Instruction::CondJump { cond, target } => {
                    if eval_cond(*cond, flags) {
                        pc = *labels
                            .get(target)
                            .ok_or_else(|| bug(format!("undefined label '{target}'")))?;
                        continue;
                    }
                }
                Instruction::Jump { target } => {
                    pc = *labels
                        .get(target)
                        .ok_or_else(|| bug(format!("undefined label '{target}'")))?;
                    continue;
                }
                Instruction::Copy { dst, src } => {
                    let v = self.value(src, env, func)?;
                    self.set_var(dst, v, env, func)?;
                }
                Instruction::Call { name, dst, args } => {
                    let mut values = Vec::with_capacity(args.len());
                    for a in args {
                        values.push(self.value(a, env, func)?);
                    }
                    let r = self.call(*name, &values)?;
                    if let Some(dst) = dst {
                        self.set_var(dst, r, env, func)?;
                    }
                }
                Instruction::CallIndirect { fun, dst, args } => {
                    let mut values = Vec::with_capacity(args.len());
                    for a in args {
                        values.push(self.value(a, env, func)?);
                    }
                    let addr = self.value(fun, env, func)?;
                    let callee = *self
                        .addr_fns
                        .get(&addr)
                        .ok_or_else(|| bug(format!("indirect call to address {addr:#x}")))?;
                    let r = self.call(callee, &values)?;
                    if let Some(dst) = dst {
                        self.set_var(dst, r, env, func)?;
                    }
                }
                Instruction::GetAddress { dst, src } => {
                    let Value::Var(name, _) = src else {
                        return Err(bug("address of a constant".into()));
                    };
                    let addr = self.addr_of(*name, env, func)?;
                    self.set_var(dst, addr, env, func)?;
                }
                Instruction::Load { dst, ptr } => {
                    let addr = self.value(ptr, env, func)?;
                    let width = self.scalar_width(dst.ty());
                    let v = self.read(addr, width, dst.ty().is_signed());
                    self.set_var(dst, v, env, func)?;
                }
                Instruction::Store { ptr, src } => {
                    let addr = self.value(ptr, env, func)?;
                    let v = self.value(src, env, func)?;
                    let width = self.scalar_width(src.ty());
                    self.write(addr, v, width);
                }
                Instruction::CopyToOffset { dst, offset, src } => {
                    let base = self.addr_of(*dst, env, func)?;
                    let v = self.value(src, env, func)?;
                    let width = self.scalar_width(src.ty());
                    self.write(base + offset, v, width);
                }
                Instruction::CopyFromOffset { dst, src, offset } => {
                    let base = self.addr_of(*src, env, func)?;
                    let width = self.scalar_width(dst.ty());
                    let v = self.read(base + offset, width, dst.ty().is_signed());
                    self.set_var(dst, v, env, func)?;
                }
                Instruction::Trunc { dst, src, bytes } => {
                    let v = self.value(src, env, func)?;
                    let masked = match bytes {
                        1 => v & 0xff,
                        2 => v & 0xffff,
                        _ => v,
                    };
                    self.set_var(dst, masked, env, func)?;
                }
                Instruction::Extend {
                    dst,
                    src,
                    src_bytes,
                } => {
                    let v = self.value(src, env, func)?;
                    let extended = match src_bytes {
                        1 => v as u8 as i8 as i32 as u32,
                        2 => v as u16 as i16 as i32 as u32,
                        _ => v,
                    };
                    self.set_var(dst, extended, env, func)?;
                }
            }
            pc += 1;
        }
        // The lowering appends a trailing return, so this is unreachable
        // for well-formed programs.
        Ok(0)
    }

    fn addr_of(&self, name: Id, env: &Map<Id, u32>, func: Id) -> Result<u32, Error> {
        env.get(&name)
            .or_else(|| self.globals.get(&name))
            .or_else(|| self.fn_addrs.get(&name))
            .copied()
            .ok_or_else(|| {
                Error::new("tac interpreter", format!("no storage for '{name}'")).in_func(func)
            })
    }

    /// Frame slots hold whole canonical words; statics keep their real
    /// byte-accurate width and extend on the way out.
    fn value(&self, v: &Value, env: &Map<Id, u32>, func: Id) -> Result<u32, Error> {
        match v {
            Value::Const(bits, _) => Ok(*bits as u32),
            Value::Var(name, ty) => {
                if let Some(addr) = self.fn_addrs.get(name) {
                    return Ok(*addr);
                }
                if let Some(addr) = self.globals.get(name) {
                    return Ok(self.read(*addr, self.scalar_width(ty), ty.is_signed()));
                }
                let addr = self.addr_of(*name, env, func)?;
                Ok(self.read(addr, 4, false))
            }
        }
    }

    fn set_var(
        &mut self,
        dst: &Value,
        value: u32,
        env: &Map<Id, u32>,
        func: Id,
    ) -> Result<(), Error> {
        let Value::Var(name, ty) = dst else {
            return Err(
                Error::new("tac interpreter", "store into a constant").in_func(func)
            );
        };
        if let Some(addr) = self.globals.get(name).copied() {
            self.write(addr, value, self.scalar_width(ty));
            return Ok(());
        }
        let addr = self.addr_of(*name, env, func)?;
        self.write(addr, canonical(value, self.scalar_width(ty), ty.is_signed()), 4);
        Ok(())
    }
}

/// Re-extend a value to its canonical 32-bit form for a frame slot.
fn canonical(value: u32, width: u32, signed: bool) -> u32 {
    match (width, signed) {
        (1, false) => value & 0xff,
        (1, true) => value as u8 as i8 as i32 as u32,
        (2, false) => value & 0xffff,
        (2, true) => value as u16 as i16 as i32 as u32,
        _ => value,
    }
}

fn apply_alu(op: BinOp, a: u32, b: u32) -> Option<u32> {
    use BinOp::*;
    Some(match op {
        Add => a.wrapping_add(b),
        Sub => a.wrapping_sub(b),
        SMul => (a as i32).wrapping_mul(b as i32) as u32,
        UMul => a.wrapping_mul(b),
        SDiv => {
            if b == 0 {
                return None;
            }
            (a as i32).wrapping_div(b as i32) as u32
        }
        UDiv => {
            if b == 0 {
                return None;
            }
            a / b
        }
        SMod => {
            if b == 0 {
                return None;
            }
            (a as i32).wrapping_rem(b as i32) as u32
        }
        UMod => {
            if b == 0 {
                return None;
            }
            a % b
        }
        And => a & b,
        Or => a | b,
        Xor => a ^ b,
        Asl | Lsl => a.wrapping_shl(b & 31),
        Asr => ((a as i32).wrapping_shr(b & 31)) as u32,
        Lsr => a.wrapping_shr(b & 31),
    })
}

fn eval_cond(cond: Cond, (a, b): (u32, u32)) -> bool {
    use Cond::*;
    match cond {
        E => a == b,
        NE => a != b,
        G => (a as i32) > (b as i32),
        GE => (a as i32) >= (b as i32),
        L => (a as i32) < (b as i32),
        LE => (a as i32) <= (b as i32),
        A => a > b,
        AE => a >= b,
        B => a < b,
        BE => a <= b,
    }
}

/// Every variable mentioned anywhere in a function body.
fn collect_vars(body: &[Instruction], out: &mut Set<Id>) {
    fn value(v: &Value, out: &mut Set<Id>) {
        if let Value::Var(name, _) = v {
            out.insert(*name);
        }
    }
    for insn in body {
        match insn {
            Instruction::Return(Some(v)) => value(v, out),
            Instruction::Return(None)
            | Instruction::Label(_)
            | Instruction::Jump { .. }
            | Instruction::CondJump { .. }
            | Instruction::Boundary(_) => {}
            Instruction::Unary { dst, src, .. } => {
                value(dst, out);
                value(src, out);
            }
            Instruction::Binary {
                dst, src1, src2, ..
            } => {
                value(dst, out);
                value(src1, out);
                value(src2, out);
            }
            Instruction::Cmp { src1, src2 } => {
                value(src1, out);
                value(src2, out);
            }
            Instruction::Copy { dst, src } => {
                value(dst, out);
                value(src, out);
            }
            Instruction::Call { dst, args, .. } => {
                if let Some(dst) = dst {
                    value(dst, out);
                }
                for a in args {
                    value(a, out);
                }
            }
            Instruction::CallIndirect { fun, dst, args } => {
                value(fun, out);
                if let Some(dst) = dst {
                    value(dst, out);
                }
                for a in args {
                    value(a, out);
                }
            }
            Instruction::GetAddress { dst, src } => {
                value(dst, out);
                value(src, out);
            }
            Instruction::Load { dst, ptr } => {
                value(dst, out);
                value(ptr, out);
            }
            Instruction::Store { ptr, src } => {
                value(ptr, out);
                value(src, out);
            }
            Instruction::CopyToOffset { dst, src, .. } => {
                out.insert(*dst);
                value(src, out);
            }
            Instruction::CopyFromOffset { dst, src, .. } => {
                value(dst, out);
                out.insert(*src);
            }
            Instruction::Trunc { dst, src, .. } | Instruction::Extend { dst, src, .. } => {
                value(dst, out);
                value(src, out);
            }
        }
    }
}
