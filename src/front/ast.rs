//! The abstract syntax tree.
//!
//! The parser builds it with placeholder types and labels; the checker
//! rewrites it into the typed, label-resolved form the middle end consumes.

use crate::common::{Id, Loc};
use crate::front::types::Type;

#[derive(Debug)]
pub struct Program {
    pub decls: Vec<Declaration>,
}

#[derive(Debug)]
pub enum Declaration {
    Fun(FunDecl),
    Var(VarDecl),
    Tag(TagDecl),
}

#[derive(Debug)]
pub struct FunDecl {
    pub name: Id,
    /// Always a `Type::Fun`.
    pub ty: Type,
    pub params: Vec<Id>,
    pub storage: Option<StorageSpec>,
    pub body: Option<Vec<BlockItem>>,
    pub loc: Loc,
}

#[derive(Debug)]
pub struct VarDecl {
    pub name: Id,
    pub ty: Type,
    pub storage: Option<StorageSpec>,
    /// Handler named by a `_Cleanup(f)` specifier.
    pub cleanup: Option<Id>,
    pub init: Option<Initializer>,
    pub loc: Loc,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StorageSpec {
    Static,
    Extern,
}

/// A struct, union, or enum declaration.
#[derive(Debug)]
pub enum TagDecl {
    Struct {
        tag: Id,
        members: Option<Vec<(Id, Type)>>,
        loc: Loc,
    },
    Union {
        tag: Id,
        members: Option<Vec<(Id, Type)>>,
        loc: Loc,
    },
    Enum {
        tag: Id,
        enumerators: Vec<(Id, Option<Expr>)>,
        loc: Loc,
    },
}

#[derive(Debug)]
pub enum Initializer {
    Scalar(Expr),
    List(Vec<Initializer>),
}

#[derive(Debug)]
pub enum BlockItem {
    Stmt(Stmt),
    Decl(Declaration),
}

#[derive(Debug)]
pub enum Stmt {
    Return(Option<Expr>, Loc),
    Expression(Expr),
    If {
        cond: Expr,
        then: Box<Stmt>,
        els: Option<Box<Stmt>>,
    },
    Compound(Vec<BlockItem>),
    /// `label` is the enclosing loop's label, attached by the resolver.
    Break {
        label: Id,
    },
    Continue {
        label: Id,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
        label: Id,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
        label: Id,
    },
    For {
        init: ForInit,
        cond: Option<Expr>,
        post: Option<Expr>,
        body: Box<Stmt>,
        label: Id,
    },
    Switch {
        cond: Expr,
        body: Box<Stmt>,
        label: Id,
        /// Case values in source order, resolved by the checker.
        cases: Vec<i64>,
        has_default: bool,
    },
    /// `label` is the enclosing switch's label; `value` is the constant
    /// value of `expr`, evaluated by the checker.
    Case {
        expr: Expr,
        value: i64,
        label: Id,
        body: Box<Stmt>,
    },
    Default {
        label: Id,
        body: Box<Stmt>,
    },
    Labeled {
        name: Id,
        body: Box<Stmt>,
    },
    Goto {
        name: Id,
    },
    Null,
}

#[derive(Debug)]
pub enum ForInit {
    Decl(Vec<Declaration>),
    Expr(Option<Expr>),
}

#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    /// Filled by the checker; `Void` until then.
    pub ty: Type,
    pub loc: Loc,
}

impl Expr {
    pub fn new(kind: ExprKind, loc: Loc) -> Self {
        Expr {
            kind,
            ty: Type::Void,
            loc,
        }
    }

    pub fn typed(kind: ExprKind, ty: Type, loc: Loc) -> Self {
        Expr { kind, ty, loc }
    }
}

#[derive(Debug)]
pub enum ExprKind {
    /// An integer or character literal; the bits are kept zero-extended and
    /// reinterpreted according to the expression type's signedness.
    Literal(u64),
    Str(Vec<u8>),
    Var(Id),
    Unary(UnaryOp, Box<Expr>),
    PostIncr(Box<Expr>),
    PostDecr(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Assign(Box<Expr>, Box<Expr>),
    CompoundAssign(AssignOp, Box<Expr>, Box<Expr>),
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    Call(Box<Expr>, Vec<Expr>),
    Cast(Type, Box<Expr>),
    Deref(Box<Expr>),
    AddrOf(Box<Expr>),
    Subscript(Box<Expr>, Box<Expr>),
    SizeOfExpr(Box<Expr>),
    SizeOfType(Type),
    Dot(Box<Expr>, Id),
    Arrow(Box<Expr>, Id),
    Comma(Box<Expr>, Box<Expr>),
    /// A GNU statement expression `({ ... })`.
    StmtExpr(Vec<BlockItem>),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Complement,
    Negate,
    Not,
    Plus,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    LogAnd,
    LogOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_relational(&self) -> bool {
        use BinaryOp::*;
        matches!(self, Eq | Ne | Lt | Le | Gt | Ge)
    }
}

/// The operator of a compound assignment.  Keeping this separate from
/// [BinaryOp] makes "compound to binary" a total mapping.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AssignOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl AssignOp {
    pub fn binary(self) -> BinaryOp {
        match self {
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Sub => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Div => BinaryOp::Div,
            AssignOp::Mod => BinaryOp::Mod,
            AssignOp::BitAnd => BinaryOp::BitAnd,
            AssignOp::BitOr => BinaryOp::BitOr,
            AssignOp::BitXor => BinaryOp::BitXor,
            AssignOp::Shl => BinaryOp::Shl,
            AssignOp::Shr => BinaryOp::Shr,
        }
    }
}
