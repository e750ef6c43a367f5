//! The checker.
//!
//! Three jobs in one AST rewrite: name resolution (locals get unique names,
//! enum constants become literals), type checking (every expression gets a
//! type, implicit conversions become explicit casts, arrays and function
//! designators decay into address-of nodes), and label resolution (loops and
//! switches get unique labels, `break`/`continue`/`case`/`default` learn
//! their targets).  It also builds the global symbol table and the type
//! table, and lowers static initializers to byte-accurate cell lists.

use std::fmt::Debug;

use derive_more::derive::Display;

use crate::common::*;
use crate::front::ast::*;
use crate::front::sym::*;
use crate::front::types::{Tag, Type};

#[derive(Display)]
#[display("Check error: {}", self.0)]
pub struct CheckError(String);

impl Debug for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

fn err<T>(loc: Loc, msg: impl std::fmt::Display) -> Result<T, CheckError> {
    Err(CheckError(format!("{msg} at {loc}")))
}

pub fn check_program(program: Program) -> Result<(Program, Tables), CheckError> {
    let mut checker = Checker::default();
    checker.scopes.push(Map::new());
    let mut decls = Vec::new();
    for decl in program.decls {
        match decl {
            Declaration::Fun(f) => decls.push(Declaration::Fun(checker.fun_decl(f)?)),
            Declaration::Var(v) => decls.push(Declaration::Var(checker.file_var(v)?)),
            Declaration::Tag(t) => {
                checker.tag_decl(&t)?;
                decls.push(Declaration::Tag(t));
            }
        }
    }
    Ok((Program { decls }, checker.tables))
}

#[derive(Clone)]
enum ScopeEntry {
    Var { unique: Id, ty: Type },
    EnumConst(i64),
}

struct SwitchCtx {
    label: Id,
    cases: Vec<i64>,
    has_default: bool,
}

#[derive(Default)]
struct Checker {
    tables: Tables,
    scopes: Vec<Map<Id, ScopeEntry>>,
    rename: u32,
    labels: u32,
    ret_ty: Option<Type>,
    fn_name: Option<Id>,
    fn_labels: Map<Id, Id>,
    break_targets: Vec<Id>,
    continue_targets: Vec<Id>,
    switches: Vec<SwitchCtx>,
}

impl Checker {
    // ----- scopes -----

    fn declare(&mut self, name: Id, entry: ScopeEntry) {
        self.scopes.last_mut().unwrap().insert(name, entry);
    }

    fn resolve(&self, name: Id) -> Option<&ScopeEntry> {
        self.scopes.iter().rev().find_map(|s| s.get(&name))
    }

    fn unique(&mut self, name: Id) -> Id {
        let n = self.rename;
        self.rename += 1;
        id(&format!("{name}.{n}"))
    }

    fn fresh_label(&mut self, tag: &str) -> Id {
        let func = self.fn_name.expect("label outside a function");
        let n = self.labels;
        self.labels += 1;
        id(&format!("{func}.{tag}.{n}"))
    }

    // ----- tags and enums -----

    fn tag_decl(&mut self, decl: &TagDecl) -> Result<(), CheckError> {
        match decl {
            TagDecl::Struct {
                tag,
                members: Some(members),
                ..
            } => {
                let layout = self.tables.types.layout_struct(members.clone());
                self.tables.types.define(*tag, Tag::Struct(layout));
            }
            TagDecl::Union {
                tag,
                members: Some(members),
                ..
            } => {
                let layout = self.tables.types.layout_union(members.clone());
                self.tables.types.define(*tag, Tag::Union(layout));
            }
            TagDecl::Enum {
                tag, enumerators, ..
            } => {
                self.tables.types.define(*tag, Tag::Enum);
                let mut next = 0i64;
                for (name, value) in enumerators {
                    if let Some(e) = value {
                        // Enum values may reference earlier constants.
                        next = self.eval_const(e)?;
                    }
                    self.declare(*name, ScopeEntry::EnumConst(next));
                    next += 1;
                }
            }
            _ => {} // forward declarations introduce nothing to compute
        }
        Ok(())
    }

    // ----- functions -----

    fn fun_decl(&mut self, f: FunDecl) -> Result<FunDecl, CheckError> {
        let FunDecl {
            name,
            ty,
            params,
            storage,
            body,
            loc,
        } = f;
        let Type::Fun(ret, param_tys) = ty.clone() else {
            return err(loc, format!("'{name}' is not a function"));
        };
        if !(ret.is_scalar() || ret.is_void()) {
            return err(loc, "function return type must be scalar or void");
        }
        for p in &param_tys {
            if !p.is_scalar() {
                return err(loc, "function parameters must be scalar");
            }
        }
        let global = storage != Some(StorageSpec::Static);
        let already_defined = matches!(
            self.tables.symbols.get(name),
            Some(Symbol {
                attr: Attr::Fun { defined: true, .. },
                ..
            })
        );
        if already_defined && body.is_some() {
            return err(loc, format!("function '{name}' is defined twice"));
        }
        self.declare(
            name,
            ScopeEntry::Var {
                unique: name,
                ty: ty.clone(),
            },
        );
        self.tables.symbols.insert(
            name,
            Symbol {
                ty: ty.clone(),
                attr: Attr::Fun {
                    defined: already_defined || body.is_some(),
                    global,
                },
            },
        );
        let Some(body) = body else {
            return Ok(FunDecl {
                name,
                ty,
                params,
                storage,
                body: None,
                loc,
            });
        };

        self.ret_ty = Some((*ret).clone());
        self.fn_name = Some(name);
        self.labels = 0;
        self.fn_labels = Map::new();
        collect_goto_labels(&body, name, &mut self.fn_labels);

        self.scopes.push(Map::new());
        let mut unique_params = Vec::with_capacity(params.len());
        for (pname, pty) in params.iter().zip(param_tys.iter()) {
            let unique = self.unique(*pname);
            self.declare(
                *pname,
                ScopeEntry::Var {
                    unique,
                    ty: pty.clone(),
                },
            );
            self.tables.symbols.add_local(unique, pty.clone(), None);
            unique_params.push(unique);
        }
        let body = self.block_items(body)?;
        self.scopes.pop();
        self.ret_ty = None;
        self.fn_name = None;

        Ok(FunDecl {
            name,
            ty,
            params: unique_params,
            storage,
            body: Some(body),
            loc,
        })
    }

    // ----- file-scope variables -----

    fn file_var(&mut self, v: VarDecl) -> Result<VarDecl, CheckError> {
        let ty = self.complete_array(v.ty.clone(), v.init.as_ref());
        self.declare(
            v.name,
            ScopeEntry::Var {
                unique: v.name,
                ty: ty.clone(),
            },
        );
        let init = match &v.init {
            Some(init) => StaticInit::Initial(self.static_cells(&ty, init, v.loc)?),
            None if v.storage == Some(StorageSpec::Extern) => StaticInit::None,
            None => StaticInit::Tentative,
        };
        let storage = if matches!(init, StaticInit::None) {
            Storage::Extern
        } else {
            Storage::Static
        };
        self.tables.symbols.insert(
            v.name,
            Symbol {
                ty: ty.clone(),
                attr: Attr::Static {
                    global: v.storage != Some(StorageSpec::Static),
                    storage,
                    init,
                },
            },
        );
        Ok(VarDecl { ty, init: None, ..v })
    }

    fn complete_array(&self, ty: Type, init: Option<&Initializer>) -> Type {
        match (ty, init) {
            (Type::Array(elem, 0), Some(Initializer::List(items))) => {
                Type::Array(elem, items.len() as u32)
            }
            (Type::Array(elem, 0), Some(Initializer::Scalar(e))) => {
                if let ExprKind::Str(bytes) = &e.kind {
                    Type::Array(elem, bytes.len() as u32 + 1)
                } else {
                    Type::Array(elem, 0)
                }
            }
            (ty, _) => ty,
        }
    }

    // ----- static initializers -----

    fn static_cells(
        &mut self,
        ty: &Type,
        init: &Initializer,
        loc: Loc,
    ) -> Result<Vec<InitCell>, CheckError> {
        let mut cells = Vec::new();
        self.static_cells_into(ty, init, loc, &mut cells)?;
        Ok(cells)
    }

    fn static_cells_into(
        &mut self,
        ty: &Type,
        init: &Initializer,
        loc: Loc,
        cells: &mut Vec<InitCell>,
    ) -> Result<(), CheckError> {
        match (ty, init) {
            (Type::Array(elem, n), Initializer::Scalar(e))
                if matches!(e.kind, ExprKind::Str(_)) =>
            {
                let ExprKind::Str(bytes) = &e.kind else {
                    unreachable!()
                };
                if !elem.is_char_like() {
                    return err(loc, "string initializer for a non-character array");
                }
                let take = bytes.len().min(*n as usize);
                cells.push(InitCell::String(bytes[..take].to_vec()));
                if (*n as usize) > take {
                    cells.push(InitCell::Zero(*n - take as u32));
                }
                Ok(())
            }
            (Type::Array(elem, n), Initializer::List(items)) => {
                if items.len() > *n as usize {
                    return err(loc, "too many array initializers");
                }
                for item in items {
                    self.static_cells_into(elem, item, loc, cells)?;
                }
                let missing = *n - items.len() as u32;
                if missing > 0 {
                    cells.push(InitCell::Zero(missing * self.tables.types.size_of(elem)));
                }
                Ok(())
            }
            (Type::Struct(tag), Initializer::List(items)) => {
                let Some(Tag::Struct(layout)) = self.tables.types.lookup(*tag).cloned() else {
                    return err(loc, "initializer for an incomplete struct");
                };
                if items.len() > layout.members.len() {
                    return err(loc, "too many struct initializers");
                }
                let mut offset = 0u32;
                for (item, member) in items.iter().zip(layout.members.iter()) {
                    if member.offset > offset {
                        cells.push(InitCell::Zero(member.offset - offset));
                    }
                    self.static_cells_into(&member.ty, item, loc, cells)?;
                    offset = member.offset + self.tables.types.size_of(&member.ty);
                }
                if layout.size > offset {
                    cells.push(InitCell::Zero(layout.size - offset));
                }
                Ok(())
            }
            (Type::Union(tag), Initializer::List(items)) => {
                let Some(Tag::Union(layout)) = self.tables.types.lookup(*tag).cloned() else {
                    return err(loc, "initializer for an incomplete union");
                };
                let (Some(item), Some(member)) = (items.first(), layout.members.first()) else {
                    return err(loc, "empty union initializer");
                };
                self.static_cells_into(&member.ty, item, loc, cells)?;
                let used = self.tables.types.size_of(&member.ty);
                if layout.size > used {
                    cells.push(InitCell::Zero(layout.size - used));
                }
                Ok(())
            }
            (_, Initializer::List(items)) if items.len() == 1 => {
                self.static_cells_into(ty, &items[0], loc, cells)
            }
            (_, Initializer::List(_)) => err(loc, "aggregate initializer for a scalar"),
            (_, Initializer::Scalar(e)) => {
                if ty.is_pointer() {
                    cells.push(self.pointer_cell(e, loc)?);
                    return Ok(());
                }
                let v = self.eval_const(e)?;
                let v = truncate_to(v, self.tables.types.size_of(ty), ty.is_signed());
                cells.push(match ty {
                    Type::Char | Type::SChar => InitCell::Char(v as i8),
                    Type::UChar => InitCell::UChar(v as u8),
                    Type::Short => InitCell::Short(v as i16),
                    Type::UShort => InitCell::UShort(v as u16),
                    Type::Int | Type::Enum(_) => InitCell::Int(v as i32),
                    Type::UInt => InitCell::UInt(v as u32),
                    Type::Long => InitCell::Long(v as i32),
                    Type::ULong => InitCell::ULong(v as u32),
                    other => return err(loc, format!("cannot statically initialize '{other}'")),
                });
                Ok(())
            }
        }
    }

    /// A word-sized pointer cell: the address of a function, a static, a
    /// string constant, or null.
    fn pointer_cell(&mut self, e: &Expr, loc: Loc) -> Result<InitCell, CheckError> {
        match &e.kind {
            ExprKind::Var(name) => self.named_pointer_cell(*name, loc),
            ExprKind::AddrOf(inner) => match &inner.kind {
                ExprKind::Var(name) => self.named_pointer_cell(*name, loc),
                ExprKind::Str(bytes) => {
                    let name = self.string_const(bytes);
                    Ok(InitCell::Pointer(name))
                }
                _ => err(loc, "static pointer initializer must name a symbol"),
            },
            ExprKind::Str(bytes) => {
                let name = self.string_const(bytes);
                Ok(InitCell::Pointer(name))
            }
            _ => {
                let v = self.eval_const(e)?;
                if v == 0 {
                    Ok(InitCell::UInt(0))
                } else {
                    err(loc, "static pointer initializer must be a symbol or null")
                }
            }
        }
    }

    fn named_pointer_cell(&mut self, name: Id, loc: Loc) -> Result<InitCell, CheckError> {
        match self.resolve(name) {
            Some(ScopeEntry::Var { unique, .. }) => Ok(InitCell::Pointer(*unique)),
            _ => err(loc, format!("'{name}' does not name a static object")),
        }
    }

    /// Register an anonymous string constant and return its name.
    fn string_const(&mut self, bytes: &[u8]) -> Id {
        self.tables.symbols.add_string(bytes)
    }

    // ----- block items and statements -----

    fn block_items(&mut self, items: Vec<BlockItem>) -> Result<Vec<BlockItem>, CheckError> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                BlockItem::Stmt(s) => out.push(BlockItem::Stmt(self.stmt(s)?)),
                BlockItem::Decl(d) => out.push(BlockItem::Decl(self.block_decl(d)?)),
            }
        }
        Ok(out)
    }

    fn block_decl(&mut self, decl: Declaration) -> Result<Declaration, CheckError> {
        match decl {
            Declaration::Tag(t) => {
                self.tag_decl(&t)?;
                Ok(Declaration::Tag(t))
            }
            Declaration::Fun(f) => {
                if f.body.is_some() {
                    return err(f.loc, "nested function definitions are not supported");
                }
                self.fun_decl(f).map(Declaration::Fun)
            }
            Declaration::Var(v) => self.local_var(v).map(Declaration::Var),
        }
    }

    fn local_var(&mut self, v: VarDecl) -> Result<VarDecl, CheckError> {
        let ty = self.complete_array(v.ty.clone(), v.init.as_ref());
        if ty.is_function() {
            return err(v.loc, "function declarators need a prototype declaration");
        }
        match v.storage {
            Some(StorageSpec::Extern) => {
                self.declare(
                    v.name,
                    ScopeEntry::Var {
                        unique: v.name,
                        ty: ty.clone(),
                    },
                );
                if self.tables.symbols.get(v.name).is_none() {
                    self.tables.symbols.insert(
                        v.name,
                        Symbol {
                            ty: ty.clone(),
                            attr: Attr::Static {
                                global: true,
                                storage: Storage::Extern,
                                init: StaticInit::None,
                            },
                        },
                    );
                }
                Ok(VarDecl { ty, init: None, ..v })
            }
            Some(StorageSpec::Static) => {
                let unique = self.unique(v.name);
                let init = match &v.init {
                    Some(init) => StaticInit::Initial(self.static_cells(&ty, init, v.loc)?),
                    None => StaticInit::Tentative,
                };
                self.declare(
                    v.name,
                    ScopeEntry::Var {
                        unique,
                        ty: ty.clone(),
                    },
                );
                self.tables.symbols.insert(
                    unique,
                    Symbol {
                        ty: ty.clone(),
                        attr: Attr::Static {
                            global: false,
                            storage: Storage::Static,
                            init,
                        },
                    },
                );
                Ok(VarDecl {
                    name: unique,
                    ty,
                    init: None,
                    ..v
                })
            }
            None => {
                let unique = self.unique(v.name);
                let cleanup = match v.cleanup {
                    Some(handler) => Some(self.cleanup_handler(handler, v.loc)?),
                    None => None,
                };
                self.declare(
                    v.name,
                    ScopeEntry::Var {
                        unique,
                        ty: ty.clone(),
                    },
                );
                self.tables
                    .symbols
                    .add_local(unique, ty.clone(), cleanup);
                let init = match v.init {
                    Some(init) => Some(self.initializer(&ty, init, v.loc)?),
                    None => None,
                };
                Ok(VarDecl {
                    name: unique,
                    ty,
                    cleanup,
                    init,
                    ..v
                })
            }
        }
    }

    fn cleanup_handler(&mut self, handler: Id, loc: Loc) -> Result<Id, CheckError> {
        match self.resolve(handler) {
            Some(ScopeEntry::Var { unique, ty }) if ty.is_function() => Ok(*unique),
            _ => err(loc, format!("cleanup handler '{handler}' is not a function")),
        }
    }

    fn initializer(
        &mut self,
        ty: &Type,
        init: Initializer,
        loc: Loc,
    ) -> Result<Initializer, CheckError> {
        match (ty, init) {
            (Type::Array(elem, n), Initializer::Scalar(e))
                if matches!(e.kind, ExprKind::Str(_)) =>
            {
                let ExprKind::Str(bytes) = &e.kind else {
                    unreachable!()
                };
                if !elem.is_char_like() {
                    return err(loc, "string initializer for a non-character array");
                }
                if bytes.len() > *n as usize {
                    return err(loc, "string initializer is longer than the array");
                }
                Ok(Initializer::Scalar(e))
            }
            (Type::Array(elem, n), Initializer::List(items)) => {
                if items.len() > *n as usize {
                    return err(loc, "too many array initializers");
                }
                let items = items
                    .into_iter()
                    .map(|i| self.initializer(elem, i, loc))
                    .collect::<Result<_, _>>()?;
                Ok(Initializer::List(items))
            }
            (Type::Struct(tag), Initializer::List(items)) => {
                let Some(Tag::Struct(layout)) = self.tables.types.lookup(*tag).cloned() else {
                    return err(loc, "initializer for an incomplete struct");
                };
                if items.len() > layout.members.len() {
                    return err(loc, "too many struct initializers");
                }
                let items = items
                    .into_iter()
                    .zip(layout.members.iter())
                    .map(|(i, m)| self.initializer(&m.ty, i, loc))
                    .collect::<Result<_, _>>()?;
                Ok(Initializer::List(items))
            }
            (Type::Union(tag), Initializer::List(items)) => {
                let Some(Tag::Union(layout)) = self.tables.types.lookup(*tag).cloned() else {
                    return err(loc, "initializer for an incomplete union");
                };
                let (Some(item), Some(member)) = (items.into_iter().next(), layout.members.first())
                else {
                    return err(loc, "empty union initializer");
                };
                Ok(Initializer::List(vec![self.initializer(
                    &member.ty, item, loc,
                )?]))
            }
            (_, Initializer::List(items)) if items.len() == 1 => {
                self.initializer(ty, items.into_iter().next().unwrap(), loc)
            }
            (_, Initializer::List(_)) => err(loc, "aggregate initializer for a scalar"),
            (_, Initializer::Scalar(e)) => {
                let e = self.check_and_convert(e)?;
                let e = self.convert_by_assignment(e, ty, loc)?;
                Ok(Initializer::Scalar(e))
            }
        }
    }

    fn stmt(&mut self, s: Stmt) -> Result<Stmt, CheckError> {
        match s {
            Stmt::Null => Ok(Stmt::Null),
            Stmt::Expression(e) => Ok(Stmt::Expression(self.check_and_convert(e)?)),
            Stmt::Return(e, loc) => {
                let ret = self.ret_ty.clone().expect("return outside a function");
                match e {
                    None if ret.is_void() => Ok(Stmt::Return(None, loc)),
                    None => err(loc, "non-void function must return a value"),
                    Some(_) if ret.is_void() => err(loc, "void function returns a value"),
                    Some(e) => {
                        let e = self.check_and_convert(e)?;
                        let e = self.convert_by_assignment(e, &ret, loc)?;
                        Ok(Stmt::Return(Some(e), loc))
                    }
                }
            }
            Stmt::If { cond, then, els } => {
                let cond = self.scalar_cond(cond)?;
                let then = Box::new(self.stmt(*then)?);
                let els = match els {
                    Some(e) => Some(Box::new(self.stmt(*e)?)),
                    None => None,
                };
                Ok(Stmt::If { cond, then, els })
            }
            Stmt::Compound(items) => {
                self.scopes.push(Map::new());
                let items = self.block_items(items)?;
                self.scopes.pop();
                Ok(Stmt::Compound(items))
            }
            Stmt::While { cond, body, .. } => {
                let label = self.fresh_label("loop");
                let cond = self.scalar_cond(cond)?;
                self.break_targets.push(label);
                self.continue_targets.push(label);
                let body = Box::new(self.stmt(*body)?);
                self.break_targets.pop();
                self.continue_targets.pop();
                Ok(Stmt::While { cond, body, label })
            }
            Stmt::DoWhile { body, cond, .. } => {
                let label = self.fresh_label("loop");
                self.break_targets.push(label);
                self.continue_targets.push(label);
                let body = Box::new(self.stmt(*body)?);
                self.break_targets.pop();
                self.continue_targets.pop();
                let cond = self.scalar_cond(cond)?;
                Ok(Stmt::DoWhile { body, cond, label })
            }
            Stmt::For {
                init,
                cond,
                post,
                body,
                ..
            } => {
                let label = self.fresh_label("loop");
                self.scopes.push(Map::new());
                let init = match init {
                    ForInit::Decl(decls) => ForInit::Decl(
                        decls
                            .into_iter()
                            .map(|d| self.block_decl(d))
                            .collect::<Result<_, _>>()?,
                    ),
                    ForInit::Expr(Some(e)) => ForInit::Expr(Some(self.check_and_convert(e)?)),
                    ForInit::Expr(None) => ForInit::Expr(None),
                };
                let cond = match cond {
                    Some(c) => Some(self.scalar_cond(c)?),
                    None => None,
                };
                let post = match post {
                    Some(p) => Some(self.check_and_convert(p)?),
                    None => None,
                };
                self.break_targets.push(label);
                self.continue_targets.push(label);
                let body = Box::new(self.stmt(*body)?);
                self.break_targets.pop();
                self.continue_targets.pop();
                self.scopes.pop();
                Ok(Stmt::For {
                    init,
                    cond,
                    post,
                    body,
                    label,
                })
            }
            Stmt::Switch { cond, body, .. } => {
                let label = self.fresh_label("switch");
                let cond = self.check_and_convert(cond)?;
                if !cond.ty.is_integer() {
                    return err(cond.loc, "switch condition must have integer type");
                }
                let promoted = cond.ty.promote();
                let cond = self.convert_to(cond, promoted)?;
                self.switches.push(SwitchCtx {
                    label,
                    cases: Vec::new(),
                    has_default: false,
                });
                self.break_targets.push(label);
                let body = Box::new(self.stmt(*body)?);
                self.break_targets.pop();
                let ctx = self.switches.pop().unwrap();
                Ok(Stmt::Switch {
                    cond,
                    body,
                    label,
                    cases: ctx.cases,
                    has_default: ctx.has_default,
                })
            }
            Stmt::Case {
                expr, body, ..
            } => {
                let checked = self.check_and_convert(expr)?;
                let value = self.eval_const(&checked)?;
                let loc = checked.loc;
                let Some(ctx) = self.switches.last_mut() else {
                    return err(loc, "'case' outside a switch");
                };
                if ctx.cases.contains(&value) {
                    return err(loc, format!("duplicate case value {value}"));
                }
                ctx.cases.push(value);
                let label = ctx.label;
                let body = Box::new(self.stmt(*body)?);
                Ok(Stmt::Case {
                    expr: checked,
                    value,
                    label,
                    body,
                })
            }
            Stmt::Default { body, .. } => {
                let Some(ctx) = self.switches.last_mut() else {
                    return Err(CheckError("'default' outside a switch".into()));
                };
                if ctx.has_default {
                    return Err(CheckError("duplicate 'default' label".into()));
                }
                ctx.has_default = true;
                let label = ctx.label;
                let body = Box::new(self.stmt(*body)?);
                Ok(Stmt::Default { label, body })
            }
            Stmt::Break { .. } => match self.break_targets.last() {
                Some(label) => Ok(Stmt::Break { label: *label }),
                None => Err(CheckError("'break' outside a loop or switch".into())),
            },
            Stmt::Continue { .. } => match self.continue_targets.last() {
                Some(label) => Ok(Stmt::Continue { label: *label }),
                None => Err(CheckError("'continue' outside a loop".into())),
            },
            Stmt::Labeled { name, body } => {
                let Some(renamed) = self.fn_labels.get(&name).copied() else {
                    return Err(CheckError(format!("label '{name}' was not collected")));
                };
                let body = Box::new(self.stmt(*body)?);
                Ok(Stmt::Labeled {
                    name: renamed,
                    body,
                })
            }
            Stmt::Goto { name } => match self.fn_labels.get(&name) {
                Some(renamed) => Ok(Stmt::Goto { name: *renamed }),
                None => Err(CheckError(format!("goto to an unknown label '{name}'"))),
            },
        }
    }

    fn scalar_cond(&mut self, e: Expr) -> Result<Expr, CheckError> {
        let e = self.check_and_convert(e)?;
        if !e.ty.is_scalar() {
            return err(e.loc, "condition must have scalar type");
        }
        Ok(e)
    }

    // ----- expressions -----

    /// Check an expression and apply array/function decay to the result.
    fn check_and_convert(&mut self, e: Expr) -> Result<Expr, CheckError> {
        let e = self.expr(e)?;
        Ok(decay(e))
    }

    fn expr(&mut self, e: Expr) -> Result<Expr, CheckError> {
        let loc = e.loc;
        match e.kind {
            ExprKind::Literal(v) => Ok(Expr {
                kind: ExprKind::Literal(v),
                ty: e.ty,
                loc,
            }),
            ExprKind::Str(bytes) => {
                let ty = Type::Char.array_of(bytes.len() as u32 + 1);
                Ok(Expr::typed(ExprKind::Str(bytes), ty, loc))
            }
            ExprKind::Var(name) => match self.resolve(name) {
                Some(ScopeEntry::EnumConst(v)) => {
                    Ok(Expr::typed(ExprKind::Literal(*v as u64), Type::Int, loc))
                }
                Some(ScopeEntry::Var { unique, ty }) => {
                    Ok(Expr::typed(ExprKind::Var(*unique), ty.clone(), loc))
                }
                None => err(loc, format!("use of undeclared identifier '{name}'")),
            },
            ExprKind::Unary(UnaryOp::Not, inner) => {
                let inner = self.check_and_convert(*inner)?;
                if !inner.ty.is_scalar() {
                    return err(loc, "'!' needs a scalar operand");
                }
                Ok(Expr::typed(
                    ExprKind::Unary(UnaryOp::Not, Box::new(inner)),
                    Type::Int,
                    loc,
                ))
            }
            ExprKind::Unary(op, inner) => {
                let inner = self.check_and_convert(*inner)?;
                if !inner.ty.is_arithmetic() {
                    return err(loc, "unary operand must be arithmetic");
                }
                let promoted = inner.ty.promote();
                let inner = self.convert_to(inner, promoted.clone())?;
                Ok(Expr::typed(
                    ExprKind::Unary(op, Box::new(inner)),
                    promoted,
                    loc,
                ))
            }
            ExprKind::PostIncr(inner) => {
                let inner = self.lvalue(*inner)?;
                let ty = inner.ty.clone();
                if !ty.is_scalar() {
                    return err(loc, "'++' needs a scalar operand");
                }
                Ok(Expr::typed(ExprKind::PostIncr(Box::new(inner)), ty, loc))
            }
            ExprKind::PostDecr(inner) => {
                let inner = self.lvalue(*inner)?;
                let ty = inner.ty.clone();
                if !ty.is_scalar() {
                    return err(loc, "'--' needs a scalar operand");
                }
                Ok(Expr::typed(ExprKind::PostDecr(Box::new(inner)), ty, loc))
            }
            ExprKind::Binary(op, lhs, rhs) => self.binary(op, *lhs, *rhs, loc),
            ExprKind::Assign(lhs, rhs) => {
                let lhs = self.lvalue(*lhs)?;
                let rhs = self.check_and_convert(*rhs)?;
                let rhs = self.convert_by_assignment(rhs, &lhs.ty, loc)?;
                let ty = lhs.ty.clone();
                Ok(Expr::typed(
                    ExprKind::Assign(Box::new(lhs), Box::new(rhs)),
                    ty,
                    loc,
                ))
            }
            ExprKind::CompoundAssign(op, lhs, rhs) => {
                let lhs = self.lvalue(*lhs)?;
                let rhs = self.check_and_convert(*rhs)?;
                let ty = lhs.ty.clone();
                let rhs = if ty.is_pointer() {
                    if !matches!(op, AssignOp::Add | AssignOp::Sub) {
                        return err(loc, "invalid compound assignment to a pointer");
                    }
                    if !rhs.ty.is_integer() {
                        return err(loc, "pointer adjustment must be an integer");
                    }
                    rhs
                } else if matches!(op, AssignOp::Shl | AssignOp::Shr) {
                    let promoted = rhs.ty.promote();
                    self.convert_to(rhs, promoted)?
                } else {
                    if !ty.is_arithmetic() || !rhs.ty.is_arithmetic() {
                        return err(loc, "compound assignment needs arithmetic operands");
                    }
                    let common = ty.common_type(&rhs.ty);
                    self.convert_to(rhs, common)?
                };
                Ok(Expr::typed(
                    ExprKind::CompoundAssign(op, Box::new(lhs), Box::new(rhs)),
                    ty,
                    loc,
                ))
            }
            ExprKind::Conditional { cond, then, els } => {
                let cond = self.scalar_cond(*cond)?;
                let then = self.check_and_convert(*then)?;
                let els = self.check_and_convert(*els)?;
                let (then, els, ty) = if then.ty.is_arithmetic() && els.ty.is_arithmetic() {
                    let common = then.ty.common_type(&els.ty);
                    (
                        self.convert_to(then, common.clone())?,
                        self.convert_to(els, common.clone())?,
                        common,
                    )
                } else if then.ty == els.ty {
                    let ty = then.ty.clone();
                    (then, els, ty)
                } else if then.ty.is_pointer() && is_null_literal(&els) {
                    let ty = then.ty.clone();
                    let els = self.convert_to(els, ty.clone())?;
                    (then, els, ty)
                } else if els.ty.is_pointer() && is_null_literal(&then) {
                    let ty = els.ty.clone();
                    let then = self.convert_to(then, ty.clone())?;
                    (then, els, ty)
                } else {
                    return err(loc, "incompatible branches of '?:'");
                };
                Ok(Expr::typed(
                    ExprKind::Conditional {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        els: Box::new(els),
                    },
                    ty,
                    loc,
                ))
            }
            ExprKind::Call(callee, args) => self.call(*callee, args, loc),
            ExprKind::Cast(target, inner) => {
                let inner = self.check_and_convert(*inner)?;
                if !(target.is_scalar() || target.is_void()) {
                    return err(loc, "can only cast to scalar or void");
                }
                if !target.is_void() && !inner.ty.is_scalar() {
                    return err(loc, "can only cast from scalar types");
                }
                Ok(Expr::typed(
                    ExprKind::Cast(target.clone(), Box::new(inner)),
                    target,
                    loc,
                ))
            }
            ExprKind::Deref(inner) => {
                let inner = self.check_and_convert(*inner)?;
                match inner.ty.pointee().cloned() {
                    Some(pointee) => Ok(Expr::typed(
                        ExprKind::Deref(Box::new(inner)),
                        pointee,
                        loc,
                    )),
                    None => err(loc, "cannot dereference a non-pointer"),
                }
            }
            ExprKind::AddrOf(inner) => {
                let inner = self.expr(*inner)?;
                if !(is_lvalue(&inner) || inner.ty.is_function()) {
                    return err(loc, "cannot take the address of this expression");
                }
                let ty = inner.ty.clone().ptr_to();
                Ok(Expr::typed(ExprKind::AddrOf(Box::new(inner)), ty, loc))
            }
            ExprKind::Subscript(base, index) => {
                let base = self.check_and_convert(*base)?;
                let index = self.check_and_convert(*index)?;
                let (ptr, idx) = if base.ty.is_pointer() && index.ty.is_integer() {
                    (base, index)
                } else if index.ty.is_pointer() && base.ty.is_integer() {
                    (index, base)
                } else {
                    return err(loc, "subscript needs a pointer and an integer");
                };
                let elem = ptr.ty.pointee().cloned().expect("checked above");
                Ok(Expr::typed(
                    ExprKind::Subscript(Box::new(ptr), Box::new(idx)),
                    elem,
                    loc,
                ))
            }
            ExprKind::SizeOfExpr(inner) => {
                let inner = self.expr(*inner)?;
                Ok(Expr::typed(
                    ExprKind::SizeOfExpr(Box::new(inner)),
                    Type::UInt,
                    loc,
                ))
            }
            ExprKind::SizeOfType(ty) => {
                Ok(Expr::typed(ExprKind::SizeOfType(ty), Type::UInt, loc))
            }
            ExprKind::Dot(base, member) => {
                let base = self.expr(*base)?;
                let Some(m) = self.tables.types.struct_member(&base.ty, member) else {
                    return err(loc, format!("no member '{member}' in '{}'", base.ty));
                };
                let ty = m.ty.clone();
                Ok(Expr::typed(ExprKind::Dot(Box::new(base), member), ty, loc))
            }
            ExprKind::Arrow(base, member) => {
                let base = self.check_and_convert(*base)?;
                let Some(inner) = base.ty.pointee().cloned() else {
                    return err(loc, "'->' needs a pointer to a struct or union");
                };
                let Some(m) = self.tables.types.struct_member(&inner, member) else {
                    return err(loc, format!("no member '{member}' in '{inner}'"));
                };
                let ty = m.ty.clone();
                Ok(Expr::typed(ExprKind::Arrow(Box::new(base), member), ty, loc))
            }
            ExprKind::Comma(lhs, rhs) => {
                let lhs = self.check_and_convert(*lhs)?;
                let rhs = self.check_and_convert(*rhs)?;
                let ty = rhs.ty.clone();
                Ok(Expr::typed(
                    ExprKind::Comma(Box::new(lhs), Box::new(rhs)),
                    ty,
                    loc,
                ))
            }
            ExprKind::StmtExpr(items) => {
                self.scopes.push(Map::new());
                let items = self.block_items(items)?;
                self.scopes.pop();
                let ty = match items.last() {
                    Some(BlockItem::Stmt(Stmt::Expression(e))) => e.ty.clone(),
                    _ => Type::Void,
                };
                Ok(Expr::typed(ExprKind::StmtExpr(items), ty, loc))
            }
        }
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: Expr,
        rhs: Expr,
        loc: Loc,
    ) -> Result<Expr, CheckError> {
        use BinaryOp::*;
        let lhs = self.check_and_convert(lhs)?;
        let rhs = self.check_and_convert(rhs)?;
        match op {
            LogAnd | LogOr => {
                if !(lhs.ty.is_scalar() && rhs.ty.is_scalar()) {
                    return err(loc, "logical operands must be scalar");
                }
                Ok(Expr::typed(
                    ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                    Type::Int,
                    loc,
                ))
            }
            Eq | Ne | Lt | Le | Gt | Ge => {
                let (lhs, rhs) = if lhs.ty.is_arithmetic() && rhs.ty.is_arithmetic() {
                    let common = lhs.ty.common_type(&rhs.ty);
                    (
                        self.convert_to(lhs, common.clone())?,
                        self.convert_to(rhs, common)?,
                    )
                } else if lhs.ty.is_pointer() && is_null_literal(&rhs) {
                    let ty = lhs.ty.clone();
                    let rhs = self.convert_to(rhs, ty)?;
                    (lhs, rhs)
                } else if rhs.ty.is_pointer() && is_null_literal(&lhs) {
                    let ty = rhs.ty.clone();
                    let lhs = self.convert_to(lhs, ty)?;
                    (lhs, rhs)
                } else if lhs.ty.is_pointer() && lhs.ty == rhs.ty {
                    (lhs, rhs)
                } else {
                    return err(loc, "incomparable operand types");
                };
                Ok(Expr::typed(
                    ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                    Type::Int,
                    loc,
                ))
            }
            Shl | Shr => {
                if !(lhs.ty.is_arithmetic() && rhs.ty.is_arithmetic()) {
                    return err(loc, "shift operands must be integers");
                }
                let lty = lhs.ty.promote();
                let lhs = self.convert_to(lhs, lty.clone())?;
                let rty = rhs.ty.promote();
                let rhs = self.convert_to(rhs, rty)?;
                Ok(Expr::typed(
                    ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                    lty,
                    loc,
                ))
            }
            Add | Sub => {
                if lhs.ty.is_arithmetic() && rhs.ty.is_arithmetic() {
                    let common = lhs.ty.common_type(&rhs.ty);
                    let lhs = self.convert_to(lhs, common.clone())?;
                    let rhs = self.convert_to(rhs, common.clone())?;
                    return Ok(Expr::typed(
                        ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                        common,
                        loc,
                    ));
                }
                if lhs.ty.is_pointer() && rhs.ty.is_integer() {
                    let ty = lhs.ty.clone();
                    let rhs = self.convert_to(rhs, Type::Long)?;
                    return Ok(Expr::typed(
                        ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                        ty,
                        loc,
                    ));
                }
                if op == Add && lhs.ty.is_integer() && rhs.ty.is_pointer() {
                    let ty = rhs.ty.clone();
                    let lhs = self.convert_to(lhs, Type::Long)?;
                    return Ok(Expr::typed(
                        ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                        ty,
                        loc,
                    ));
                }
                if op == Sub && lhs.ty.is_pointer() && lhs.ty == rhs.ty {
                    return Ok(Expr::typed(
                        ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                        Type::Long,
                        loc,
                    ));
                }
                err(loc, "invalid operands to additive operator")
            }
            Mul | Div | Mod | BitAnd | BitOr | BitXor => {
                if !(lhs.ty.is_arithmetic() && rhs.ty.is_arithmetic()) {
                    return err(loc, "arithmetic operands required");
                }
                let common = lhs.ty.common_type(&rhs.ty);
                let lhs = self.convert_to(lhs, common.clone())?;
                let rhs = self.convert_to(rhs, common.clone())?;
                Ok(Expr::typed(
                    ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                    common,
                    loc,
                ))
            }
        }
    }

    fn call(&mut self, callee: Expr, args: Vec<Expr>, loc: Loc) -> Result<Expr, CheckError> {
        // A call to a plain function name stays direct; anything else is a
        // call through a function pointer.
        let direct = match &callee.kind {
            ExprKind::Var(name) => match self.resolve(*name) {
                Some(ScopeEntry::Var { unique, ty }) if ty.is_function() => {
                    Some((*unique, ty.clone()))
                }
                _ => None,
            },
            _ => None,
        };
        let callee = match direct {
            Some((unique, ty)) => Expr::typed(ExprKind::Var(unique), ty, callee.loc),
            None => self.check_and_convert(callee)?,
        };
        let fun_ty = match &callee.ty {
            Type::Fun(..) => callee.ty.clone(),
            Type::Pointer(inner) if inner.is_function() => (**inner).clone(),
            other => return err(loc, format!("cannot call a value of type '{other}'")),
        };
        let Type::Fun(ret, param_tys) = fun_ty else {
            unreachable!()
        };
        if args.len() != param_tys.len() {
            return err(
                loc,
                format!(
                    "call passes {} arguments, expected {}",
                    args.len(),
                    param_tys.len()
                ),
            );
        }
        let mut checked = Vec::with_capacity(args.len());
        for (arg, pty) in args.into_iter().zip(param_tys.iter()) {
            let arg = self.check_and_convert(arg)?;
            checked.push(self.convert_by_assignment(arg, pty, loc)?);
        }
        Ok(Expr::typed(
            ExprKind::Call(Box::new(callee), checked),
            (*ret).clone(),
            loc,
        ))
    }

    fn lvalue(&mut self, e: Expr) -> Result<Expr, CheckError> {
        let e = self.expr(e)?;
        if !is_lvalue(&e) {
            return err(e.loc, "expression is not assignable");
        }
        Ok(e)
    }

    /// Insert a cast if the expression does not already have the type.
    fn convert_to(&mut self, e: Expr, ty: Type) -> Result<Expr, CheckError> {
        if e.ty == ty {
            return Ok(e);
        }
        let loc = e.loc;
        Ok(Expr::typed(ExprKind::Cast(ty.clone(), Box::new(e)), ty, loc))
    }

    /// The conversions applied to initializers, assignments, arguments, and
    /// return values.
    fn convert_by_assignment(
        &mut self,
        e: Expr,
        ty: &Type,
        loc: Loc,
    ) -> Result<Expr, CheckError> {
        if e.ty == *ty {
            return Ok(e);
        }
        if e.ty.is_arithmetic() && ty.is_arithmetic() {
            return self.convert_to(e, ty.clone());
        }
        if ty.is_pointer() && is_null_literal(&e) {
            return self.convert_to(e, ty.clone());
        }
        err(
            loc,
            format!("cannot convert from '{}' to '{}'", e.ty, ty),
        )
    }

    // ----- constant expressions -----

    /// Evaluate a constant expression.  Works on unchecked expressions too
    /// (enum values, static initializers): enum constants resolve through
    /// the scopes, anything else named is not constant.
    fn eval_const(&self, e: &Expr) -> Result<i64, CheckError> {
        use BinaryOp::*;
        match &e.kind {
            ExprKind::Literal(v) => Ok(*v as i64),
            ExprKind::Var(name) => match self.resolve(*name) {
                Some(ScopeEntry::EnumConst(v)) => Ok(*v),
                _ => err(e.loc, format!("'{name}' is not a constant")),
            },
            ExprKind::Unary(op, inner) => {
                let v = self.eval_const(inner)?;
                Ok(match op {
                    UnaryOp::Negate => v.wrapping_neg(),
                    UnaryOp::Complement => !v,
                    UnaryOp::Not => (v == 0) as i64,
                    UnaryOp::Plus => v,
                })
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let a = self.eval_const(lhs)?;
                let b = self.eval_const(rhs)?;
                Ok(match op {
                    Add => a.wrapping_add(b),
                    Sub => a.wrapping_sub(b),
                    Mul => a.wrapping_mul(b),
                    Div if b != 0 => a.wrapping_div(b),
                    Mod if b != 0 => a.wrapping_rem(b),
                    Div | Mod => return err(e.loc, "division by zero in constant"),
                    BitAnd => a & b,
                    BitOr => a | b,
                    BitXor => a ^ b,
                    Shl => a.wrapping_shl(b as u32),
                    Shr => a.wrapping_shr(b as u32),
                    Eq => (a == b) as i64,
                    Ne => (a != b) as i64,
                    Lt => (a < b) as i64,
                    Le => (a <= b) as i64,
                    Gt => (a > b) as i64,
                    Ge => (a >= b) as i64,
                    LogAnd => (a != 0 && b != 0) as i64,
                    LogOr => (a != 0 || b != 0) as i64,
                })
            }
            ExprKind::Conditional { cond, then, els } => {
                if self.eval_const(cond)? != 0 {
                    self.eval_const(then)
                } else {
                    self.eval_const(els)
                }
            }
            ExprKind::Comma(_, rhs) => self.eval_const(rhs),
            ExprKind::Cast(ty, inner) => {
                let v = self.eval_const(inner)?;
                let width = self.tables.types.size_of(ty);
                Ok(truncate_to(v, width, ty.is_signed()))
            }
            ExprKind::SizeOfType(ty) => Ok(self.tables.types.size_of(ty) as i64),
            ExprKind::SizeOfExpr(inner) if !inner.ty.is_void() => {
                Ok(self.tables.types.size_of(&inner.ty) as i64)
            }
            _ => err(e.loc, "not a constant expression"),
        }
    }
}

/// Mask a constant to `width` bytes and re-extend by signedness.
fn truncate_to(v: i64, width: u32, signed: bool) -> i64 {
    match (width, signed) {
        (1, true) => v as i8 as i64,
        (1, false) => v as u8 as i64,
        (2, true) => v as i16 as i64,
        (2, false) => v as u16 as i64,
        (4, true) => v as i32 as i64,
        (4, false) => v as u32 as i64,
        _ => v,
    }
}

fn is_lvalue(e: &Expr) -> bool {
    matches!(
        e.kind,
        ExprKind::Var(_)
            | ExprKind::Deref(_)
            | ExprKind::Subscript(..)
            | ExprKind::Dot(..)
            | ExprKind::Arrow(..)
    )
}

fn is_null_literal(e: &Expr) -> bool {
    matches!(e.kind, ExprKind::Literal(0))
}

/// Array and function values decay to pointers; the decayed form is an
/// explicit address-of node so the middle end sees ordinary addresses.
fn decay(e: Expr) -> Expr {
    match &e.ty {
        Type::Array(elem, _) => {
            let ty = (**elem).clone().ptr_to();
            let loc = e.loc;
            Expr::typed(ExprKind::AddrOf(Box::new(e)), ty, loc)
        }
        Type::Fun(..) => {
            let ty = e.ty.clone().ptr_to();
            let loc = e.loc;
            Expr::typed(ExprKind::AddrOf(Box::new(e)), ty, loc)
        }
        _ => e,
    }
}

/// Pre-collect the goto labels of a function body, renaming them to
/// `<function>.<label>` so they are unique per program.
fn collect_goto_labels(items: &[BlockItem], func: Id, out: &mut Map<Id, Id>) {
    fn visit(stmt: &Stmt, func: Id, out: &mut Map<Id, Id>) {
        match stmt {
            Stmt::Labeled { name, body } => {
                out.insert(*name, id(&format!("{func}.{name}")));
                visit(body, func, out);
            }
            Stmt::If { then, els, .. } => {
                visit(then, func, out);
                if let Some(els) = els {
                    visit(els, func, out);
                }
            }
            Stmt::Compound(items) => {
                for item in items {
                    if let BlockItem::Stmt(s) = item {
                        visit(s, func, out);
                    }
                }
            }
            Stmt::While { body, .. }
            | Stmt::DoWhile { body, .. }
            | Stmt::For { body, .. }
            | Stmt::Switch { body, .. }
            | Stmt::Case { body, .. }
            | Stmt::Default { body, .. } => visit(body, func, out),
            _ => {}
        }
    }
    for item in items {
        if let BlockItem::Stmt(s) = item {
            visit(s, func, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse::parse;

    fn check_ok(src: &str) -> (Program, Tables) {
        check_program(parse("t.c", src).unwrap()).unwrap()
    }

    #[test]
    fn locals_get_unique_names() {
        let (p, tables) = check_ok("int main(void) { int x = 1; { int x = 2; } return x; }");
        let Declaration::Fun(f) = &p.decls[0] else {
            panic!()
        };
        let body = f.body.as_ref().unwrap();
        let BlockItem::Decl(Declaration::Var(outer)) = &body[0] else {
            panic!()
        };
        let BlockItem::Stmt(Stmt::Compound(inner_items)) = &body[1] else {
            panic!()
        };
        let BlockItem::Decl(Declaration::Var(inner)) = &inner_items[0] else {
            panic!()
        };
        assert_ne!(outer.name, inner.name);
        assert!(tables.symbols.get(outer.name).is_some());
        assert!(tables.symbols.get(inner.name).is_some());
    }

    #[test]
    fn enum_constants_become_literals() {
        let (p, _) = check_ok("enum m { A, B = 4, C }; int main(void) { return C; }");
        let Declaration::Fun(f) = &p.decls[1] else {
            panic!()
        };
        let BlockItem::Stmt(Stmt::Return(Some(e), _)) = &f.body.as_ref().unwrap()[0] else {
            panic!()
        };
        assert!(matches!(e.kind, ExprKind::Literal(5)));
    }

    #[test]
    fn arrays_decay_to_addresses() {
        let (p, _) = check_ok("int main(void) { int a[3]; int *p = a; return 0; }");
        let Declaration::Fun(f) = &p.decls[0] else {
            panic!()
        };
        let BlockItem::Decl(Declaration::Var(v)) = &f.body.as_ref().unwrap()[1] else {
            panic!()
        };
        let Some(Initializer::Scalar(e)) = &v.init else {
            panic!()
        };
        assert!(matches!(e.kind, ExprKind::AddrOf(_)));
        assert_eq!(e.ty, Type::Int.ptr_to());
    }

    #[test]
    fn loops_get_labels_and_breaks_resolve() {
        let (p, _) = check_ok("int main(void) { while (1) { break; } return 0; }");
        let Declaration::Fun(f) = &p.decls[0] else {
            panic!()
        };
        let BlockItem::Stmt(Stmt::While { label, body, .. }) = &f.body.as_ref().unwrap()[0] else {
            panic!()
        };
        let Stmt::Compound(items) = body.as_ref() else {
            panic!()
        };
        let BlockItem::Stmt(Stmt::Break { label: target }) = &items[0] else {
            panic!()
        };
        assert_eq!(label, target);
        assert!(label.as_str().contains("loop"));
    }

    #[test]
    fn static_initializer_cells_cover_the_type() {
        let (_, tables) = check_ok("int data[4] = {1, 2}; ");
        let sym = tables.symbols.get(id("data")).unwrap();
        let Attr::Static {
            init: StaticInit::Initial(cells),
            ..
        } = &sym.attr
        else {
            panic!()
        };
        let total: u32 = cells.iter().map(|c| c.size()).sum();
        assert_eq!(total, tables.types.size_of(&sym.ty));
        assert_eq!(cells[0], InitCell::Int(1));
        assert_eq!(cells[1], InitCell::Int(2));
        assert_eq!(cells[2], InitCell::Zero(8));
    }

    #[test]
    fn mismatched_types_are_rejected() {
        let p = parse("t.c", "int main(void) { int *p; p = 5; return 0; }").unwrap();
        assert!(check_program(p).is_err());
    }
}
