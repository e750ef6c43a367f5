//! Three-address code, the middle-end IR.
//!
//! A function body is a flat instruction list; values are either typed
//! constants or typed variable references.  Signedness decisions are made
//! when TAC is produced: the ALU opcode set names signed and unsigned
//! variants explicitly, so no later stage re-derives signedness.

use derive_more::Display;

use crate::common::*;
use crate::front::sym::InitCell;
use crate::front::types::Type;

/// A TAC operand.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Value {
    /// Constant bits, zero-extended to 64; reinterpreted according to the
    /// type's signedness at use sites.
    Const(u64, Type),
    Var(Id, Type),
}

impl Value {
    pub fn ty(&self) -> &Type {
        match self {
            Value::Const(_, ty) | Value::Var(_, ty) => ty,
        }
    }

    /// An `int`-typed constant.
    pub fn int(v: i64) -> Value {
        Value::Const(v as u64, Type::Int)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Const(bits, ty) => {
                if ty.is_signed() {
                    write!(f, "${}", *bits as i64)
                } else {
                    write!(f, "${bits}")
                }
            }
            Value::Var(name, _) => write!(f, "{name}"),
        }
    }
}

/// The one ALU opcode set of the compiler.  Both shift-left spellings are
/// kept because the machine distinguishes them, even though they compute the
/// same bits.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum BinOp {
    #[display("add")]
    Add,
    #[display("sub")]
    Sub,
    #[display("smul")]
    SMul,
    #[display("umul")]
    UMul,
    #[display("sdiv")]
    SDiv,
    #[display("udiv")]
    UDiv,
    #[display("smod")]
    SMod,
    #[display("umod")]
    UMod,
    #[display("and")]
    And,
    #[display("or")]
    Or,
    #[display("xor")]
    Xor,
    #[display("asl")]
    Asl,
    #[display("lsl")]
    Lsl,
    #[display("asr")]
    Asr,
    #[display("lsr")]
    Lsr,
}

impl BinOp {
    /// Does the operation need a runtime helper on the target machine?
    pub fn needs_helper(self) -> bool {
        use BinOp::*;
        !matches!(self, Add | Sub | And | Or | Xor)
    }
}

/// Scalar unary operations.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum UnOp {
    #[display("complement")]
    Complement,
    #[display("negate")]
    Negate,
    #[display("not")]
    BoolNot,
    #[display("plus")]
    UnaryPlus,
}

/// Comparison conditions over the flags of the most recent `Cmp`.
/// `E..LE` are signed, `A..BE` unsigned.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Cond {
    #[display("e")]
    E,
    #[display("ne")]
    NE,
    #[display("g")]
    G,
    #[display("ge")]
    GE,
    #[display("l")]
    L,
    #[display("le")]
    LE,
    #[display("a")]
    A,
    #[display("ae")]
    AE,
    #[display("b")]
    B,
    #[display("be")]
    BE,
}

#[derive(Debug)]
pub enum Instruction {
    Return(Option<Value>),
    Unary {
        op: UnOp,
        dst: Value,
        src: Value,
    },
    Binary {
        op: BinOp,
        dst: Value,
        src1: Value,
        src2: Value,
    },
    /// Sets the implicit flags consumed by the next `CondJump`.
    Cmp {
        src1: Value,
        src2: Value,
    },
    CondJump {
        cond: Cond,
        target: Id,
    },
    Jump {
        target: Id,
    },
    Label(Id),
    Copy {
        dst: Value,
        src: Value,
    },
    Call {
        name: Id,
        dst: Option<Value>,
        args: Vec<Value>,
    },
    CallIndirect {
        fun: Value,
        dst: Option<Value>,
        args: Vec<Value>,
    },
    /// Compute the address of a variable.
    GetAddress {
        dst: Value,
        src: Value,
    },
    /// Read a scalar through a pointer.
    Load {
        dst: Value,
        ptr: Value,
    },
    /// Write a scalar through a pointer.
    Store {
        ptr: Value,
        src: Value,
    },
    /// Write a scalar at a fixed offset inside a named aggregate.
    CopyToOffset {
        dst: Id,
        offset: u32,
        src: Value,
    },
    /// Read a scalar from a fixed offset inside a named aggregate.
    CopyFromOffset {
        dst: Value,
        src: Id,
        offset: u32,
    },
    /// Integer narrowing to `bytes`.
    Trunc {
        dst: Value,
        src: Value,
        bytes: u32,
    },
    /// Sign-extending widening from `src_bytes`.
    Extend {
        dst: Value,
        src: Value,
        src_bytes: u32,
    },
    /// Source-line marker for the debugger; not an operation.
    Boundary(Loc),
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Instruction::*;
        match self {
            Return(None) => write!(f, "    ret"),
            Return(Some(v)) => write!(f, "    ret {v}"),
            Unary { op, dst, src } => write!(f, "    {dst} <- {op} {src}"),
            Binary {
                op,
                dst,
                src1,
                src2,
            } => write!(f, "    {dst} <- {op} {src1}, {src2}"),
            Cmp { src1, src2 } => write!(f, "    cmp {src1}, {src2}"),
            CondJump { cond, target } => write!(f, "    j{cond} {target}"),
            Jump { target } => write!(f, "    jmp {target}"),
            Label(name) => write!(f, "{name}:"),
            Copy { dst, src } => write!(f, "    {dst} <- {src}"),
            Call { name, dst, args } => {
                write!(f, "    ")?;
                if let Some(dst) = dst {
                    write!(f, "{dst} <- ")?;
                }
                write!(f, "call {name}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            CallIndirect { fun, dst, args } => {
                write!(f, "    ")?;
                if let Some(dst) = dst {
                    write!(f, "{dst} <- ")?;
                }
                write!(f, "call *{fun}(")?;
                write_args(f, args)?;
                write!(f, ")")
            }
            GetAddress { dst, src } => write!(f, "    {dst} <- &{src}"),
            Load { dst, ptr } => write!(f, "    {dst} <- *{ptr}"),
            Store { ptr, src } => write!(f, "    *{ptr} <- {src}"),
            CopyToOffset { dst, offset, src } => write!(f, "    {dst}[{offset}] <- {src}"),
            CopyFromOffset { dst, src, offset } => write!(f, "    {dst} <- {src}[{offset}]"),
            Trunc { dst, src, bytes } => write!(f, "    {dst} <- trunc{bytes} {src}"),
            Extend {
                dst,
                src,
                src_bytes,
            } => write!(f, "    {dst} <- extend{src_bytes} {src}"),
            Boundary(loc) => write!(f, "    # {loc}"),
        }
    }
}

fn write_args(f: &mut std::fmt::Formatter<'_>, args: &[Value]) -> std::fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

#[derive(Debug)]
pub enum TopLevel {
    Func {
        name: Id,
        global: bool,
        params: Vec<Id>,
        body: Vec<Instruction>,
    },
    StaticVar {
        name: Id,
        global: bool,
        ty: Type,
        inits: Vec<InitCell>,
    },
    StaticConst {
        name: Id,
        ty: Type,
        inits: Vec<InitCell>,
    },
}

/// A whole TAC program: static data first, then the functions in source
/// order.
#[derive(Debug, Default)]
pub struct Program {
    pub statics: Vec<TopLevel>,
    pub funcs: Vec<TopLevel>,
}

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for item in self.statics.iter().chain(self.funcs.iter()) {
            match item {
                TopLevel::Func {
                    name,
                    global,
                    params,
                    body,
                } => {
                    let vis = if *global { "global " } else { "" };
                    write!(f, "{vis}fun {name}(")?;
                    for (i, p) in params.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{p}")?;
                    }
                    writeln!(f, "):")?;
                    for insn in body {
                        writeln!(f, "{insn}")?;
                    }
                }
                TopLevel::StaticVar {
                    name,
                    global,
                    ty,
                    inits,
                } => {
                    let vis = if *global { "global " } else { "" };
                    writeln!(f, "{vis}static {name}: {ty} = {inits:?}")?;
                }
                TopLevel::StaticConst { name, ty, inits } => {
                    writeln!(f, "const {name}: {ty} = {inits:?}")?;
                }
            }
        }
        Ok(())
    }
}
