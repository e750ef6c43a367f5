//! Lowering from the typed AST to three-address code.
//!
//! This is where the language's semantics are encoded: short-circuit
//! evaluation, pointer-arithmetic scaling, compound assignment, aggregate
//! initialization, field resolution, integer conversions, and cleanup
//! handlers.  Instructions are emitted in source evaluation order.
//!
//! Every expression lowers to an [ExprResult] that classifies how the value
//! is reached: ready to use, behind a pointer, or at a fixed offset inside a
//! named aggregate.  All interior uses collapse the latter two with a `Load`
//! or `CopyFromOffset`.

use crate::common::*;
use crate::front::ast;
use crate::front::ast::{BinaryOp, ExprKind, UnaryOp};
use crate::front::sym::{Attr, InitCell, StaticInit, Tables};
use crate::front::types::Type;
use crate::middle::names::NameGen;
use crate::middle::tac::*;

/// How an expression's value is reached.
enum ExprResult {
    /// The value is ready to use.
    Plain(Value),
    /// The value is in memory behind the pointer.
    DereferencedPointer(Value),
    /// The value is at a fixed offset inside a named aggregate local.
    SubObject { base: Id, offset: u32, ty: Type },
}

use ExprResult::*;

/// Lower a checked program to TAC.
pub fn lower(program: &ast::Program, tables: &mut Tables) -> Result<Program, Error> {
    let mut lw = Lowerer {
        tables,
        names: NameGen::new(),
        func: id("?"),
        out: Vec::new(),
    };
    let mut funcs = Vec::new();
    for decl in &program.decls {
        if let ast::Declaration::Fun(f) = decl {
            if f.body.is_some() {
                funcs.push(lw.function(f)?);
            }
        }
    }
    // Static storage is materialized from the symbol table, which by now
    // also holds the string constants synthesized during lowering.
    let mut statics = Vec::new();
    for (name, sym) in lw.tables.symbols.iter() {
        match &sym.attr {
            Attr::Static {
                global,
                init: StaticInit::Initial(cells),
                ..
            } => statics.push(TopLevel::StaticVar {
                name: *name,
                global: *global,
                ty: sym.ty.clone(),
                inits: cells.clone(),
            }),
            Attr::Static {
                global,
                init: StaticInit::Tentative,
                ..
            } => statics.push(TopLevel::StaticVar {
                name: *name,
                global: *global,
                ty: sym.ty.clone(),
                inits: vec![InitCell::Zero(lw.tables.types.size_of(&sym.ty))],
            }),
            Attr::Const { init } => statics.push(TopLevel::StaticConst {
                name: *name,
                ty: sym.ty.clone(),
                inits: init.clone(),
            }),
            // Pure extern declarations emit nothing.
            _ => {}
        }
    }
    Ok(Program { statics, funcs })
}

struct Lowerer<'a> {
    tables: &'a mut Tables,
    names: NameGen,
    func: Id,
    out: Vec<Instruction>,
}

impl<'a> Lowerer<'a> {
    fn bug(&self, msg: impl Into<String>) -> Error {
        Error::new("tac lowering", msg).in_func(self.func)
    }

    fn emit(&mut self, insn: Instruction) {
        self.out.push(insn);
    }

    fn temp(&mut self, ty: &Type) -> Value {
        self.names
            .fresh_temp(self.func, ty, &mut self.tables.symbols)
    }

    fn dst_for(&mut self, ty: &Type) -> Option<Value> {
        self.names
            .fresh_dst(self.func, ty, &mut self.tables.symbols)
    }

    fn label(&mut self, tag: &str) -> Id {
        self.names.fresh_label(self.func, tag)
    }

    fn size_of(&self, ty: &Type) -> u32 {
        self.tables.types.size_of(ty)
    }

    /// Constant bits canonicalized to the type's width.
    fn const_of(&self, v: i64, ty: &Type) -> Value {
        let bits = match self.size_of(ty) {
            1 => v as u8 as u64,
            2 => v as u16 as u64,
            4 => v as u32 as u64,
            _ => v as u64,
        };
        Value::Const(bits, ty.clone())
    }

    fn zero(&self, ty: &Type) -> Value {
        Value::Const(0, ty.clone())
    }

    // ----- functions and blocks -----

    fn function(&mut self, f: &ast::FunDecl) -> Result<TopLevel, Error> {
        self.func = f.name;
        self.out = Vec::new();
        let body = f.body.as_ref().expect("definition checked by caller");
        self.emit(Instruction::Boundary(f.loc));
        self.block(body)?;
        // Unconditional trailing return; dead when the body already
        // returned on every path.
        self.emit(Instruction::Return(Some(Value::int(0))));
        let global = match &self.tables.symbols.expect(f.name)?.attr {
            Attr::Fun { global, .. } => *global,
            _ => return Err(self.bug(format!("'{}' is not a function symbol", f.name))),
        };
        Ok(TopLevel::Func {
            name: f.name,
            global,
            params: f.params.clone(),
            body: std::mem::take(&mut self.out),
        })
    }

    /// Lower a block's items, then run the cleanup handlers of the locals
    /// the block introduced, in reverse declaration order.
    fn block(&mut self, items: &[ast::BlockItem]) -> Result<(), Error> {
        let mut scope = Vec::new();
        for item in items {
            self.block_item(item, &mut scope)?;
        }
        self.run_cleanups(scope)
    }

    fn block_item(
        &mut self,
        item: &ast::BlockItem,
        scope: &mut Vec<Id>,
    ) -> Result<(), Error> {
        match item {
            ast::BlockItem::Stmt(s) => self.stmt(s),
            ast::BlockItem::Decl(d) => self.decl_item(d, scope),
        }
    }

    fn decl_item(&mut self, decl: &ast::Declaration, scope: &mut Vec<Id>) -> Result<(), Error> {
        match decl {
            ast::Declaration::Var(v) if v.storage.is_none() => {
                self.emit(Instruction::Boundary(v.loc));
                self.local_init(v)?;
                if v.cleanup.is_some() {
                    scope.push(v.name);
                }
                Ok(())
            }
            // Tags, prototypes, and static locals are already in the tables.
            _ => Ok(()),
        }
    }

    /// The identifier set is consumed here so no local is cleaned up twice.
    fn run_cleanups(&mut self, scope: Vec<Id>) -> Result<(), Error> {
        for name in scope.into_iter().rev() {
            let sym = self.tables.symbols.expect(name)?;
            let Attr::Local {
                cleanup: Some(handler),
            } = sym.attr
            else {
                continue;
            };
            let ty = sym.ty.clone();
            let ptr = self.temp(&ty.clone().ptr_to());
            self.emit(Instruction::GetAddress {
                dst: ptr.clone(),
                src: Value::Var(name, ty),
            });
            self.emit(Instruction::Call {
                name: handler,
                dst: None,
                args: vec![ptr],
            });
        }
        Ok(())
    }

    // ----- statements -----

    fn stmt(&mut self, s: &ast::Stmt) -> Result<(), Error> {
        use ast::Stmt;
        match s {
            Stmt::Null => Ok(()),
            Stmt::Expression(e) => {
                self.emit(Instruction::Boundary(e.loc));
                self.expr(e).map(|_| ())
            }
            Stmt::Return(value, loc) => {
                self.emit(Instruction::Boundary(*loc));
                let value = match value {
                    Some(e) => Some(self.plain(e)?),
                    None => None,
                };
                self.emit(Instruction::Return(value));
                Ok(())
            }
            Stmt::If { cond, then, els } => {
                self.emit(Instruction::Boundary(cond.loc));
                let v = self.plain(cond)?;
                let zero = self.zero(v.ty());
                self.emit(Instruction::Cmp { src1: v, src2: zero });
                let end = self.label("endif");
                match els {
                    None => {
                        self.emit(Instruction::CondJump {
                            cond: Cond::E,
                            target: end,
                        });
                        self.stmt(then)?;
                    }
                    Some(els) => {
                        let else_label = self.label("else");
                        self.emit(Instruction::CondJump {
                            cond: Cond::E,
                            target: else_label,
                        });
                        self.stmt(then)?;
                        self.emit(Instruction::Jump { target: end });
                        self.emit(Instruction::Label(else_label));
                        self.stmt(els)?;
                    }
                }
                self.emit(Instruction::Label(end));
                Ok(())
            }
            Stmt::Labeled { name, body } => {
                self.emit(Instruction::Label(*name));
                self.stmt(body)
            }
            Stmt::Goto { name } => {
                self.emit(Instruction::Jump { target: *name });
                Ok(())
            }
            Stmt::Break { label } => {
                self.emit(Instruction::Jump {
                    target: suffixed(*label, "break"),
                });
                Ok(())
            }
            Stmt::Continue { label } => {
                self.emit(Instruction::Jump {
                    target: suffixed(*label, "continue"),
                });
                Ok(())
            }
            Stmt::While { cond, body, label } => {
                let continue_l = suffixed(*label, "continue");
                let break_l = suffixed(*label, "break");
                self.emit(Instruction::Label(continue_l));
                self.emit(Instruction::Boundary(cond.loc));
                let v = self.plain(cond)?;
                let zero = self.zero(v.ty());
                self.emit(Instruction::Cmp { src1: v, src2: zero });
                self.emit(Instruction::CondJump {
                    cond: Cond::E,
                    target: break_l,
                });
                self.stmt(body)?;
                self.emit(Instruction::Jump { target: continue_l });
                self.emit(Instruction::Label(break_l));
                Ok(())
            }
            Stmt::DoWhile { body, cond, label } => {
                let start = suffixed(*label, "start");
                self.emit(Instruction::Label(start));
                self.stmt(body)?;
                self.emit(Instruction::Label(suffixed(*label, "continue")));
                self.emit(Instruction::Boundary(cond.loc));
                let v = self.plain(cond)?;
                let zero = self.zero(v.ty());
                self.emit(Instruction::Cmp { src1: v, src2: zero });
                self.emit(Instruction::CondJump {
                    cond: Cond::NE,
                    target: start,
                });
                self.emit(Instruction::Label(suffixed(*label, "break")));
                Ok(())
            }
            Stmt::For {
                init,
                cond,
                post,
                body,
                label,
            } => {
                let start = suffixed(*label, "start");
                let break_l = suffixed(*label, "break");
                let mut for_scope = Vec::new();
                match init {
                    ast::ForInit::Decl(decls) => {
                        for d in decls {
                            self.decl_item(d, &mut for_scope)?;
                        }
                    }
                    ast::ForInit::Expr(Some(e)) => {
                        self.emit(Instruction::Boundary(e.loc));
                        self.expr(e)?;
                    }
                    ast::ForInit::Expr(None) => {}
                }
                self.emit(Instruction::Label(start));
                if let Some(cond) = cond {
                    self.emit(Instruction::Boundary(cond.loc));
                    let v = self.plain(cond)?;
                    let zero = self.zero(v.ty());
                    self.emit(Instruction::Cmp { src1: v, src2: zero });
                    self.emit(Instruction::CondJump {
                        cond: Cond::E,
                        target: break_l,
                    });
                }
                self.stmt(body)?;
                self.emit(Instruction::Label(suffixed(*label, "continue")));
                if let Some(post) = post {
                    self.expr(post)?;
                }
                self.emit(Instruction::Jump { target: start });
                self.emit(Instruction::Label(break_l));
                // Locals from the for-init scope are cleaned up after the
                // loop is left.
                self.run_cleanups(for_scope)
            }
            Stmt::Switch {
                cond,
                body,
                label,
                cases,
                has_default,
            } => {
                self.emit(Instruction::Boundary(cond.loc));
                let v = self.plain(cond)?;
                let cond_ty = v.ty().clone();
                for case in cases {
                    let k = self.const_of(*case, &cond_ty);
                    self.emit(Instruction::Cmp {
                        src1: v.clone(),
                        src2: k,
                    });
                    self.emit(Instruction::CondJump {
                        cond: Cond::E,
                        target: suffixed(*label, &format!("case.{case}")),
                    });
                }
                let fallthrough = if *has_default {
                    suffixed(*label, "default")
                } else {
                    suffixed(*label, "break")
                };
                self.emit(Instruction::Jump {
                    target: fallthrough,
                });
                self.stmt(body)?;
                self.emit(Instruction::Label(suffixed(*label, "break")));
                Ok(())
            }
            Stmt::Case {
                value, label, body, ..
            } => {
                self.emit(Instruction::Label(suffixed(
                    *label,
                    &format!("case.{value}"),
                )));
                self.stmt(body)
            }
            Stmt::Default { label, body } => {
                self.emit(Instruction::Label(suffixed(*label, "default")));
                self.stmt(body)
            }
            Stmt::Compound(items) => self.block(items),
        }
    }

    // ----- local initialization -----

    fn local_init(&mut self, v: &ast::VarDecl) -> Result<(), Error> {
        let Some(init) = &v.init else {
            return Ok(());
        };
        match init {
            ast::Initializer::Scalar(e) if !v.ty.is_aggregate() => {
                // A single scalar initializer is just an assignment.
                let value = self.plain(e)?;
                self.emit(Instruction::Copy {
                    dst: Value::Var(v.name, v.ty.clone()),
                    src: value,
                });
                Ok(())
            }
            _ => self.init_at(v.name, &v.ty, Some(init), 0),
        }
    }

    /// Recursively walk the declared type together with the initializer
    /// tree, writing one scalar per cell.  Cells without an initializer are
    /// zero-filled.
    fn init_at(
        &mut self,
        base: Id,
        ty: &Type,
        init: Option<&ast::Initializer>,
        offset: u32,
    ) -> Result<(), Error> {
        match (ty, init) {
            (Type::Array(elem, n), Some(ast::Initializer::Scalar(e)))
                if matches!(e.kind, ExprKind::Str(_)) =>
            {
                let ExprKind::Str(bytes) = &e.kind else {
                    unreachable!()
                };
                // One store per byte, padded with zeros to the array length.
                for i in 0..*n {
                    let byte = bytes.get(i as usize).copied().unwrap_or(0);
                    let src = Value::Const(byte as u64, (**elem).clone());
                    self.emit(Instruction::CopyToOffset {
                        dst: base,
                        offset: offset + i,
                        src,
                    });
                }
                Ok(())
            }
            (Type::Array(elem, n), init) => {
                let items = match init {
                    Some(ast::Initializer::List(items)) => items.as_slice(),
                    Some(ast::Initializer::Scalar(_)) => {
                        return Err(self.bug("scalar initializer for an array"))
                    }
                    None => &[],
                };
                let elem_size = self.size_of(elem);
                for i in 0..*n {
                    self.init_at(base, elem, items.get(i as usize), offset + i * elem_size)?;
                }
                Ok(())
            }
            (Type::Struct(tag), init) => {
                let members = self.struct_members(*tag)?;
                let items = match init {
                    Some(ast::Initializer::List(items)) => items.as_slice(),
                    Some(ast::Initializer::Scalar(_)) => {
                        return Err(self.bug("scalar initializer for a struct"))
                    }
                    None => &[],
                };
                for (i, (mty, moff)) in members.iter().enumerate() {
                    self.init_at(base, mty, items.get(i), offset + moff)?;
                }
                Ok(())
            }
            (Type::Union(tag), init) => {
                let members = self.struct_members(*tag)?;
                let Some((mty, moff)) = members.first().cloned() else {
                    return Err(self.bug("union with no members"));
                };
                let item = match init {
                    Some(ast::Initializer::List(items)) => items.first(),
                    Some(ast::Initializer::Scalar(_)) => {
                        return Err(self.bug("scalar initializer for a union"))
                    }
                    None => None,
                };
                self.init_at(base, &mty, item, offset + moff)
            }
            (_, Some(ast::Initializer::Scalar(e))) => {
                let value = self.plain(e)?;
                self.emit(Instruction::CopyToOffset {
                    dst: base,
                    offset,
                    src: value,
                });
                Ok(())
            }
            (scalar, Some(ast::Initializer::List(_))) => {
                Err(self.bug(format!("aggregate initializer for scalar '{scalar}'")))
            }
            (scalar, None) => {
                let zero = self.zero(scalar);
                self.emit(Instruction::CopyToOffset {
                    dst: base,
                    offset,
                    src: zero,
                });
                Ok(())
            }
        }
    }

    fn struct_members(&self, tag: Id) -> Result<Vec<(Type, u32)>, Error> {
        use crate::front::types::Tag;
        match self.tables.types.lookup(tag) {
            Some(Tag::Struct(layout)) | Some(Tag::Union(layout)) => Ok(layout
                .members
                .iter()
                .map(|m| (m.ty.clone(), m.offset))
                .collect()),
            _ => Err(self.bug(format!("unknown aggregate tag '{tag}'"))),
        }
    }

    // ----- expressions -----

    /// Lower an expression and collapse the result to a plain value.
    fn plain(&mut self, e: &ast::Expr) -> Result<Value, Error> {
        let result = self.expr(e)?;
        self.to_plain(result, &e.ty)
    }

    fn to_plain(&mut self, result: ExprResult, ty: &Type) -> Result<Value, Error> {
        match result {
            Plain(v) => Ok(v),
            DereferencedPointer(ptr) => {
                let dst = self.temp(ty);
                self.emit(Instruction::Load {
                    dst: dst.clone(),
                    ptr,
                });
                Ok(dst)
            }
            SubObject { base, offset, ty } => {
                let dst = self.temp(&ty);
                self.emit(Instruction::CopyFromOffset {
                    dst: dst.clone(),
                    src: base,
                    offset,
                });
                Ok(dst)
            }
        }
    }

    /// Read an lvalue's current value without consuming the location.
    fn read_lvalue(&mut self, place: &ExprResult, ty: &Type) -> Result<Value, Error> {
        match place {
            Plain(v) => Ok(v.clone()),
            DereferencedPointer(ptr) => {
                let dst = self.temp(ty);
                self.emit(Instruction::Load {
                    dst: dst.clone(),
                    ptr: ptr.clone(),
                });
                Ok(dst)
            }
            SubObject { base, offset, ty } => {
                let dst = self.temp(ty);
                self.emit(Instruction::CopyFromOffset {
                    dst: dst.clone(),
                    src: *base,
                    offset: *offset,
                });
                Ok(dst)
            }
        }
    }

    /// Store a value into an lvalue's location.
    fn write_lvalue(&mut self, place: &ExprResult, value: Value) -> Result<(), Error> {
        match place {
            Plain(Value::Var(name, ty)) => {
                self.emit(Instruction::Copy {
                    dst: Value::Var(*name, ty.clone()),
                    src: value,
                });
                Ok(())
            }
            Plain(Value::Const(..)) => Err(self.bug("store into a constant")),
            DereferencedPointer(ptr) => {
                self.emit(Instruction::Store {
                    ptr: ptr.clone(),
                    src: value,
                });
                Ok(())
            }
            SubObject { base, offset, .. } => {
                self.emit(Instruction::CopyToOffset {
                    dst: *base,
                    offset: *offset,
                    src: value,
                });
                Ok(())
            }
        }
    }

    fn expr(&mut self, e: &ast::Expr) -> Result<ExprResult, Error> {
        match &e.kind {
            ExprKind::Literal(bits) => Ok(Plain(self.const_of(*bits as i64, &e.ty))),
            ExprKind::Var(name) => Ok(Plain(Value::Var(*name, e.ty.clone()))),
            ExprKind::Str(bytes) => {
                let name = self.tables.symbols.add_string(bytes);
                Ok(Plain(Value::Var(name, e.ty.clone())))
            }
            ExprKind::Unary(UnaryOp::Not, inner) => {
                let v = self.plain(inner)?;
                let dst = self.temp(&e.ty);
                let end = self.label("not_end");
                self.emit(Instruction::Copy {
                    dst: dst.clone(),
                    src: self.const_of(1, &e.ty),
                });
                let zero = self.zero(v.ty());
                self.emit(Instruction::Cmp { src1: v, src2: zero });
                self.emit(Instruction::CondJump {
                    cond: Cond::E,
                    target: end,
                });
                self.emit(Instruction::Copy {
                    dst: dst.clone(),
                    src: self.zero(&e.ty),
                });
                self.emit(Instruction::Label(end));
                Ok(Plain(dst))
            }
            ExprKind::Unary(op, inner) => {
                let v = self.plain(inner)?;
                let dst = self.temp(&e.ty);
                let op = match op {
                    UnaryOp::Complement => UnOp::Complement,
                    UnaryOp::Negate => UnOp::Negate,
                    UnaryOp::Plus => UnOp::UnaryPlus,
                    UnaryOp::Not => unreachable!("handled above"),
                };
                self.emit(Instruction::Unary {
                    op,
                    dst: dst.clone(),
                    src: v,
                });
                Ok(Plain(dst))
            }
            ExprKind::Binary(BinaryOp::LogAnd, lhs, rhs) => {
                self.short_circuit(lhs, rhs, false, &e.ty)
            }
            ExprKind::Binary(BinaryOp::LogOr, lhs, rhs) => {
                self.short_circuit(lhs, rhs, true, &e.ty)
            }
            ExprKind::Binary(op, lhs, rhs) if op.is_relational() => {
                let a = self.plain(lhs)?;
                let b = self.plain(rhs)?;
                // Condition signedness comes from the operand type, not the
                // (always `int`) result type.
                let cond = cond_for(*op, a.ty());
                let dst = self.temp(&e.ty);
                let end = self.label("rel_end");
                self.emit(Instruction::Copy {
                    dst: dst.clone(),
                    src: self.const_of(1, &e.ty),
                });
                self.emit(Instruction::Cmp { src1: a, src2: b });
                self.emit(Instruction::CondJump { cond, target: end });
                self.emit(Instruction::Copy {
                    dst: dst.clone(),
                    src: self.zero(&e.ty),
                });
                self.emit(Instruction::Label(end));
                Ok(Plain(dst))
            }
            ExprKind::Binary(op @ (BinaryOp::Add | BinaryOp::Sub), lhs, rhs) => {
                self.additive(*op, lhs, rhs, e)
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let a = self.plain(lhs)?;
                let b = self.plain(rhs)?;
                let alu = alu_for(*op, &e.ty)
                    .ok_or_else(|| self.bug(format!("unexpected operator '{op:?}'")))?;
                let dst = self.temp(&e.ty);
                self.emit(Instruction::Binary {
                    op: alu,
                    dst: dst.clone(),
                    src1: a,
                    src2: b,
                });
                Ok(Plain(dst))
            }
            ExprKind::Assign(lhs, rhs) => {
                let place = self.expr(lhs)?;
                let value = self.plain(rhs)?;
                self.write_lvalue(&place, value.clone())?;
                Ok(Plain(value))
            }
            ExprKind::CompoundAssign(op, lhs, rhs) => self.compound_assign(*op, lhs, rhs),
            ExprKind::PostIncr(inner) => self.post_step(inner, BinOp::Add),
            ExprKind::PostDecr(inner) => self.post_step(inner, BinOp::Sub),
            ExprKind::Conditional { cond, then, els } => {
                let v = self.plain(cond)?;
                let zero = self.zero(v.ty());
                self.emit(Instruction::Cmp { src1: v, src2: zero });
                let else_label = self.label("ternary_else");
                let end = self.label("ternary_end");
                self.emit(Instruction::CondJump {
                    cond: Cond::E,
                    target: else_label,
                });
                let dst = self.dst_for(&e.ty);
                let tv = self.plain(then)?;
                if let Some(dst) = &dst {
                    self.emit(Instruction::Copy {
                        dst: dst.clone(),
                        src: tv,
                    });
                }
                self.emit(Instruction::Jump { target: end });
                self.emit(Instruction::Label(else_label));
                let ev = self.plain(els)?;
                if let Some(dst) = &dst {
                    self.emit(Instruction::Copy {
                        dst: dst.clone(),
                        src: ev,
                    });
                }
                self.emit(Instruction::Label(end));
                Ok(Plain(dst.unwrap_or(Value::Const(0, Type::Void))))
            }
            ExprKind::Call(callee, args) => self.call(callee, args, &e.ty),
            ExprKind::Cast(target, inner) => {
                let v = self.plain(inner)?;
                if target.is_void() {
                    return Ok(Plain(v));
                }
                let v = self.cast_value(v, target);
                Ok(Plain(v))
            }
            ExprKind::AddrOf(inner) => {
                let place = self.expr(inner)?;
                match place {
                    Plain(Value::Var(name, ty)) => {
                        let dst = self.temp(&e.ty);
                        self.emit(Instruction::GetAddress {
                            dst: dst.clone(),
                            src: Value::Var(name, ty),
                        });
                        Ok(Plain(dst))
                    }
                    Plain(Value::Const(..)) => {
                        Err(self.bug("address of a constant"))
                    }
                    // The address of `*p` is just `p`.
                    DereferencedPointer(ptr) => Ok(Plain(ptr)),
                    SubObject { base, offset, .. } => {
                        let base_ty = self.tables.symbols.expect(base)?.ty.clone();
                        let addr = self.temp(&e.ty);
                        self.emit(Instruction::GetAddress {
                            dst: addr.clone(),
                            src: Value::Var(base, base_ty),
                        });
                        if offset == 0 {
                            return Ok(Plain(addr));
                        }
                        let dst = self.temp(&e.ty);
                        self.emit(Instruction::Binary {
                            op: BinOp::Add,
                            dst: dst.clone(),
                            src1: addr,
                            src2: Value::Const(offset as u64, Type::Long),
                        });
                        Ok(Plain(dst))
                    }
                }
            }
            ExprKind::Deref(inner) => {
                let ptr = self.plain(inner)?;
                Ok(DereferencedPointer(ptr))
            }
            ExprKind::Subscript(base, index) => {
                let a = self.plain(base)?;
                let i = self.plain(index)?;
                let elem_size = self.size_of(&e.ty);
                let scaled = self.temp(i.ty());
                let mul = if i.ty().is_signed() {
                    BinOp::SMul
                } else {
                    BinOp::UMul
                };
                let size_const = Value::Const(elem_size as u64, i.ty().clone());
                self.emit(Instruction::Binary {
                    op: mul,
                    dst: scaled.clone(),
                    src1: i,
                    src2: size_const,
                });
                let addr = self.temp(a.ty());
                self.emit(Instruction::Binary {
                    op: BinOp::Add,
                    dst: addr.clone(),
                    src1: a,
                    src2: scaled,
                });
                Ok(DereferencedPointer(addr))
            }
            ExprKind::SizeOfExpr(inner) => {
                let size = self.size_of(&inner.ty);
                Ok(Plain(Value::Const(size as u64, e.ty.clone())))
            }
            ExprKind::SizeOfType(ty) => {
                let size = self.size_of(ty);
                Ok(Plain(Value::Const(size as u64, e.ty.clone())))
            }
            ExprKind::Dot(base, member) => {
                let m = self
                    .tables
                    .types
                    .struct_member(&base.ty, *member)
                    .ok_or_else(|| {
                        self.bug(format!("no member '{member}' in '{}'", base.ty))
                    })?;
                let offset = m.offset;
                let place = self.expr(base)?;
                match place {
                    Plain(Value::Var(name, _)) => Ok(SubObject {
                        base: name,
                        offset,
                        ty: e.ty.clone(),
                    }),
                    Plain(Value::Const(..)) => Err(self.bug("member of a constant")),
                    SubObject {
                        base, offset: outer, ..
                    } => Ok(SubObject {
                        base,
                        offset: outer + offset,
                        ty: e.ty.clone(),
                    }),
                    DereferencedPointer(ptr) => {
                        let moved = self.member_pointer(ptr, offset, &e.ty);
                        Ok(DereferencedPointer(moved))
                    }
                }
            }
            ExprKind::Arrow(base, member) => {
                let pointee = base
                    .ty
                    .pointee()
                    .ok_or_else(|| self.bug("'->' through a non-pointer"))?
                    .clone();
                let m = self
                    .tables
                    .types
                    .struct_member(&pointee, *member)
                    .ok_or_else(|| {
                        self.bug(format!("no member '{member}' in '{pointee}'"))
                    })?;
                let offset = m.offset;
                let ptr = self.plain(base)?;
                let moved = self.member_pointer(ptr, offset, &e.ty);
                Ok(DereferencedPointer(moved))
            }
            ExprKind::Comma(lhs, rhs) => {
                self.expr(lhs)?;
                self.expr(rhs)
            }
            ExprKind::StmtExpr(items) => {
                let mut scope = Vec::new();
                let (last, rest) = match items.split_last() {
                    Some(split) => split,
                    None => return Ok(Plain(Value::Const(0, Type::Void))),
                };
                for item in rest {
                    self.block_item(item, &mut scope)?;
                }
                let result = match last {
                    ast::BlockItem::Stmt(ast::Stmt::Expression(final_expr)) => {
                        let v = self.plain(final_expr)?;
                        match self.dst_for(&final_expr.ty) {
                            Some(dst) => {
                                self.emit(Instruction::Copy {
                                    dst: dst.clone(),
                                    src: v,
                                });
                                Plain(dst)
                            }
                            None => Plain(Value::Const(0, Type::Void)),
                        }
                    }
                    other => {
                        self.block_item(other, &mut scope)?;
                        Plain(Value::Const(0, Type::Void))
                    }
                };
                self.run_cleanups(scope)?;
                Ok(result)
            }
        }
    }

    /// `&&` / `||` lower to compare-and-branch over a preset default.
    fn short_circuit(
        &mut self,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        is_or: bool,
        ty: &Type,
    ) -> Result<ExprResult, Error> {
        let (default, final_, skip) = if is_or {
            (1, 0, Cond::NE)
        } else {
            (0, 1, Cond::E)
        };
        let dst = self.temp(ty);
        let end = self.label(if is_or { "or_end" } else { "and_end" });
        self.emit(Instruction::Copy {
            dst: dst.clone(),
            src: self.const_of(default, ty),
        });
        let a = self.plain(lhs)?;
        let zero = self.zero(a.ty());
        self.emit(Instruction::Cmp { src1: a, src2: zero });
        self.emit(Instruction::CondJump {
            cond: skip,
            target: end,
        });
        let b = self.plain(rhs)?;
        let zero = self.zero(b.ty());
        self.emit(Instruction::Cmp { src1: b, src2: zero });
        self.emit(Instruction::CondJump {
            cond: skip,
            target: end,
        });
        self.emit(Instruction::Copy {
            dst: dst.clone(),
            src: self.const_of(final_, ty),
        });
        self.emit(Instruction::Label(end));
        Ok(Plain(dst))
    }

    /// `+`/`-` over the four operand-shape cases.
    fn additive(
        &mut self,
        op: BinaryOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
        e: &ast::Expr,
    ) -> Result<ExprResult, Error> {
        let lptr = lhs.ty.is_pointer();
        let rptr = rhs.ty.is_pointer();
        if lptr && rptr {
            // Pointer difference is a raw subtraction.
            let a = self.plain(lhs)?;
            let b = self.plain(rhs)?;
            let dst = self.temp(&e.ty);
            self.emit(Instruction::Binary {
                op: BinOp::Sub,
                dst: dst.clone(),
                src1: a,
                src2: b,
            });
            return Ok(Plain(dst));
        }
        if lptr || rptr {
            let ptr_ty = if lptr { &lhs.ty } else { &rhs.ty };
            let pointee_size = self.size_of(
                ptr_ty
                    .pointee()
                    .ok_or_else(|| self.bug("pointer arithmetic on a non-pointer"))?,
            );
            // Operands evaluate in source order regardless of which side
            // holds the pointer.
            let a = self.plain(lhs)?;
            let b = self.plain(rhs)?;
            let (p, i) = if lptr { (a, b) } else { (b, a) };
            let scaled = self.scale_index(i, pointee_size);
            let dst = self.temp(&e.ty);
            let alu = if op == BinaryOp::Add {
                BinOp::Add
            } else {
                BinOp::Sub
            };
            self.emit(Instruction::Binary {
                op: alu,
                dst: dst.clone(),
                src1: p,
                src2: scaled,
            });
            return Ok(Plain(dst));
        }
        let a = self.plain(lhs)?;
        let b = self.plain(rhs)?;
        let alu = if op == BinaryOp::Add {
            BinOp::Add
        } else {
            BinOp::Sub
        };
        let dst = self.temp(&e.ty);
        self.emit(Instruction::Binary {
            op: alu,
            dst: dst.clone(),
            src1: a,
            src2: b,
        });
        Ok(Plain(dst))
    }

    /// Multiply an index by the pointee size.  The scaling multiply always
    /// directly precedes the pointer add or subtract.
    fn scale_index(&mut self, index: Value, pointee_size: u32) -> Value {
        let scaled = self.temp(index.ty());
        let mul = if index.ty().is_signed() {
            BinOp::SMul
        } else {
            BinOp::UMul
        };
        let size_const = Value::Const(pointee_size as u64, index.ty().clone());
        self.emit(Instruction::Binary {
            op: mul,
            dst: scaled.clone(),
            src1: index,
            src2: size_const,
        });
        scaled
    }

    fn member_pointer(&mut self, ptr: Value, offset: u32, member_ty: &Type) -> Value {
        if offset == 0 {
            return ptr;
        }
        let dst = self.temp(&member_ty.clone().ptr_to());
        self.emit(Instruction::Binary {
            op: BinOp::Add,
            dst: dst.clone(),
            src1: ptr,
            src2: Value::Const(offset as u64, Type::Long),
        });
        dst
    }

    fn call(
        &mut self,
        callee: &ast::Expr,
        args: &[ast::Expr],
        ret: &Type,
    ) -> Result<ExprResult, Error> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.plain(arg)?);
        }
        let dst = self.dst_for(ret);
        // A direct call needs a named function symbol; everything else goes
        // through a function-pointer value.
        if let ExprKind::Var(name) = &callee.kind {
            let is_fun = matches!(
                self.tables.symbols.get(*name),
                Some(crate::front::sym::Symbol {
                    attr: Attr::Fun { .. },
                    ..
                })
            );
            if is_fun {
                self.emit(Instruction::Call {
                    name: *name,
                    dst: dst.clone(),
                    args: values,
                });
                return Ok(Plain(dst.unwrap_or(Value::Const(0, Type::Void))));
            }
        }
        let fun = self.plain(callee)?;
        self.emit(Instruction::CallIndirect {
            fun,
            dst: dst.clone(),
            args: values,
        });
        Ok(Plain(dst.unwrap_or(Value::Const(0, Type::Void))))
    }

    fn compound_assign(
        &mut self,
        op: ast::AssignOp,
        lhs: &ast::Expr,
        rhs: &ast::Expr,
    ) -> Result<ExprResult, Error> {
        let place = self.expr(lhs)?;
        let current = self.read_lvalue(&place, &lhs.ty)?;
        let rhs_v = self.plain(rhs)?;

        if lhs.ty.is_pointer() {
            let pointee_size = self.size_of(
                lhs.ty
                    .pointee()
                    .ok_or_else(|| self.bug("pointer compound assignment"))?,
            );
            let scaled = self.scale_index(rhs_v, pointee_size);
            let alu = match op {
                ast::AssignOp::Add => BinOp::Add,
                ast::AssignOp::Sub => BinOp::Sub,
                _ => return Err(self.bug("invalid pointer compound assignment")),
            };
            let result = self.temp(&lhs.ty);
            self.emit(Instruction::Binary {
                op: alu,
                dst: result.clone(),
                src1: current,
                src2: scaled,
            });
            self.write_lvalue(&place, result.clone())?;
            return Ok(Plain(result));
        }

        let common = match op {
            ast::AssignOp::Shl | ast::AssignOp::Shr => lhs.ty.promote(),
            _ => lhs.ty.common_type(&rhs.ty),
        };
        let widened = self.cast_value(current, &common);
        let bop = op.binary();
        let result = if needs_division_emulation(&lhs.ty, &common, op) {
            self.emulated_division(bop, widened, rhs_v, &common)?
        } else {
            let alu = alu_for(bop, &common)
                .ok_or_else(|| self.bug(format!("unexpected operator '{bop:?}'")))?;
            let dst = self.temp(&common);
            self.emit(Instruction::Binary {
                op: alu,
                dst: dst.clone(),
                src1: widened,
                src2: rhs_v,
            });
            dst
        };
        let stored = self.cast_value(result, &lhs.ty);
        self.write_lvalue(&place, stored.clone())?;
        Ok(Plain(stored))
    }

    /// Mixed-width, mixed-sign division support: the backend only has to
    /// divide unsigned if a possibly negative divisor is folded to its
    /// absolute value first and the quotient is negated afterwards.
    fn emulated_division(
        &mut self,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
        common: &Type,
    ) -> Result<Value, Error> {
        let rhs_neg = self.temp(&Type::Int);
        let abs_rhs = self.temp(common);
        let nonneg = self.label("div_nonneg");
        self.emit(Instruction::Copy {
            dst: rhs_neg.clone(),
            src: Value::int(0),
        });
        self.emit(Instruction::Copy {
            dst: abs_rhs.clone(),
            src: rhs.clone(),
        });
        let zero = self.zero(common);
        self.emit(Instruction::Cmp {
            src1: rhs.clone(),
            src2: zero,
        });
        self.emit(Instruction::CondJump {
            cond: Cond::GE,
            target: nonneg,
        });
        self.emit(Instruction::Unary {
            op: UnOp::Negate,
            dst: abs_rhs.clone(),
            src: rhs,
        });
        self.emit(Instruction::Copy {
            dst: rhs_neg.clone(),
            src: Value::int(1),
        });
        self.emit(Instruction::Label(nonneg));
        let alu = if op == BinaryOp::Div {
            BinOp::UDiv
        } else {
            BinOp::UMod
        };
        let quotient = self.temp(common);
        self.emit(Instruction::Binary {
            op: alu,
            dst: quotient.clone(),
            src1: lhs,
            src2: abs_rhs,
        });
        if op == BinaryOp::Div {
            let done = self.label("div_done");
            let zero = Value::int(0);
            self.emit(Instruction::Cmp {
                src1: rhs_neg,
                src2: zero,
            });
            self.emit(Instruction::CondJump {
                cond: Cond::E,
                target: done,
            });
            self.emit(Instruction::Unary {
                op: UnOp::Negate,
                dst: quotient.clone(),
                src: quotient.clone(),
            });
            self.emit(Instruction::Label(done));
        }
        Ok(quotient)
    }

    fn post_step(&mut self, inner: &ast::Expr, op: BinOp) -> Result<ExprResult, Error> {
        let place = self.expr(inner)?;
        let current = self.read_lvalue(&place, &inner.ty)?;
        let old = self.temp(&inner.ty);
        self.emit(Instruction::Copy {
            dst: old.clone(),
            src: current.clone(),
        });
        let step = match inner.ty.pointee() {
            Some(pointee) => self.size_of(pointee) as u64,
            None => 1,
        };
        let new = self.temp(&inner.ty);
        self.emit(Instruction::Binary {
            op,
            dst: new.clone(),
            src1: current,
            src2: Value::Const(step, inner.ty.clone()),
        });
        self.write_lvalue(&place, new)?;
        Ok(Plain(old))
    }

    /// Width conversion of a value: equal sizes and unsigned widening reuse
    /// the value, narrowing truncates, signed widening sign-extends.
    fn cast_value(&mut self, v: Value, target: &Type) -> Value {
        let from = v.ty().clone();
        let from_size = self.size_of(&from);
        let to_size = self.size_of(target);
        if to_size == from_size {
            return retyped(v, target);
        }
        if to_size < from_size {
            let dst = self.temp(target);
            self.emit(Instruction::Trunc {
                dst: dst.clone(),
                src: v,
                bytes: to_size,
            });
            return dst;
        }
        if from.is_unsigned() {
            return retyped(v, target);
        }
        let dst = self.temp(target);
        self.emit(Instruction::Extend {
            dst: dst.clone(),
            src: v,
            src_bytes: from_size,
        });
        dst
    }
}

/// `<label>.suffix`
fn suffixed(label: Id, suffix: &str) -> Id {
    id(&format!("{label}.{suffix}"))
}

fn retyped(v: Value, ty: &Type) -> Value {
    match v {
        Value::Const(bits, _) => Value::Const(bits, ty.clone()),
        Value::Var(name, _) => Value::Var(name, ty.clone()),
    }
}

/// The signed/unsigned condition for a relational operator.
fn cond_for(op: BinaryOp, operand_ty: &Type) -> Cond {
    let signed = operand_ty.is_signed();
    match op {
        BinaryOp::Eq => Cond::E,
        BinaryOp::Ne => Cond::NE,
        BinaryOp::Lt => {
            if signed {
                Cond::L
            } else {
                Cond::B
            }
        }
        BinaryOp::Le => {
            if signed {
                Cond::LE
            } else {
                Cond::BE
            }
        }
        BinaryOp::Gt => {
            if signed {
                Cond::G
            } else {
                Cond::A
            }
        }
        BinaryOp::Ge => {
            if signed {
                Cond::GE
            } else {
                Cond::AE
            }
        }
        _ => unreachable!("not a relational operator"),
    }
}

/// Pick the ALU opcode for an arithmetic/bitwise/shift operator, with
/// signedness taken from the result type (the left operand for shifts).
fn alu_for(op: BinaryOp, ty: &Type) -> Option<BinOp> {
    let signed = ty.is_signed();
    Some(match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => {
            if signed {
                BinOp::SMul
            } else {
                BinOp::UMul
            }
        }
        BinaryOp::Div => {
            if signed {
                BinOp::SDiv
            } else {
                BinOp::UDiv
            }
        }
        BinaryOp::Mod => {
            if signed {
                BinOp::SMod
            } else {
                BinOp::UMod
            }
        }
        BinaryOp::BitAnd => BinOp::And,
        BinaryOp::BitOr => BinOp::Or,
        BinaryOp::BitXor => BinOp::Xor,
        BinaryOp::Shl => {
            if signed {
                BinOp::Asl
            } else {
                BinOp::Lsl
            }
        }
        BinaryOp::Shr => {
            if signed {
                BinOp::Asr
            } else {
                BinOp::Lsr
            }
        }
        _ => return None,
    })
}

/// The emulation applies when the operation is widened into a signed type
/// but the stored type is narrower and unsigned.
fn needs_division_emulation(lhs_ty: &Type, common: &Type, op: ast::AssignOp) -> bool {
    matches!(op, ast::AssignOp::Div | ast::AssignOp::Mod)
        && common.is_signed()
        && lhs_ty.is_unsigned()
}
