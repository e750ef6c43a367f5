//! The parser.
//!
//! A recursive-descent parser with precedence climbing for binary operators
//! and the classic two-phase treatment of C declarators: the declarator
//! syntax is parsed into a small tree, then folded over the base type to
//! produce the declared name and type.

use std::fmt::Debug;

use derive_more::derive::Display;

use super::ast::*;
use super::lex::*;
use crate::common::{id, Id, Loc};
use crate::front::types::Type;

#[derive(Display)]
#[display("Parse error: {}", self.0)]
pub struct ParseError(String);

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl ParseError {
    fn new(msg: impl Into<String>) -> Self {
        ParseError(msg.into())
    }

    fn at(loc: Loc, msg: impl std::fmt::Display) -> Self {
        ParseError(format!("{msg} at {loc}"))
    }
}

pub fn parse(file: &str, input: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(file, input)
        .tokens()
        .map_err(|e| ParseError::new(e.to_string()))?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        file: id(file),
    };
    parser.program()
}

/// The placeholder label the resolver replaces.
fn no_label() -> Id {
    id("?")
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
    file: Id,
}

/// Collected declaration specifiers.
struct Specs {
    base: Type,
    storage: Option<StorageSpec>,
    cleanup: Option<Id>,
    /// A struct/union/enum definition written inline in the specifiers.
    tag: Option<TagDecl>,
    loc: Loc,
}

/// A parsed declarator, before the base type is folded in.
enum Declarator {
    Abstract,
    Name(Id),
    Pointer(Box<Declarator>),
    Array(Box<Declarator>, u32),
    Fun(Box<Declarator>, Vec<(Option<Id>, Type)>),
}

impl Declarator {
    /// Fold the base type through the declarator, yielding the declared name
    /// (if any) and the full type.
    fn derive(self, base: Type) -> (Option<Id>, Type) {
        match self {
            Declarator::Abstract => (None, base),
            Declarator::Name(n) => (Some(n), base),
            Declarator::Pointer(inner) => inner.derive(base.ptr_to()),
            Declarator::Array(inner, n) => inner.derive(base.array_of(n)),
            Declarator::Fun(inner, params) => {
                let ptypes = params.into_iter().map(|(_, t)| t).collect();
                inner.derive(Type::Fun(Box::new(base), ptypes))
            }
        }
    }

    /// Parameter names, for function definitions.  Only meaningful when the
    /// declarator's outermost derivation is a function.
    fn param_names(&self) -> Option<&Vec<(Option<Id>, Type)>> {
        match self {
            Declarator::Fun(inner, params) => match inner.as_ref() {
                Declarator::Name(_) => Some(params),
                _ => None,
            },
            Declarator::Pointer(inner) => inner.param_names(),
            _ => None,
        }
    }
}

const TYPE_STARTERS: &[TokenKind] = &[
    TokenKind::KwInt,
    TokenKind::KwChar,
    TokenKind::KwShort,
    TokenKind::KwLong,
    TokenKind::KwUnsigned,
    TokenKind::KwSigned,
    TokenKind::KwVoid,
    TokenKind::KwStruct,
    TokenKind::KwUnion,
    TokenKind::KwEnum,
];

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn peek2_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos + 1).map(|t| t.kind)
    }

    fn loc(&self) -> Loc {
        self.peek()
            .map(|t| t.loc)
            .unwrap_or(Loc::new(self.file, 0, 0))
    }

    fn bump(&mut self) -> Result<Token<'src>, ParseError> {
        let t = self
            .peek()
            .copied()
            .ok_or_else(|| ParseError::new("unexpected end of input"))?;
        self.pos += 1;
        Ok(t)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        match self.peek() {
            Some(t) if t.kind == kind => self.bump(),
            Some(t) => Err(ParseError::at(t.loc, format!("expected '{kind}', found '{}'", t.text))),
            None => Err(ParseError::new(format!("expected '{kind}', found end of input"))),
        }
    }

    fn expect_ident(&mut self) -> Result<Id, ParseError> {
        let t = self.expect(TokenKind::Id)?;
        Ok(id(t.text))
    }

    fn at_type_start(&self) -> bool {
        self.peek_kind().is_some_and(|k| TYPE_STARTERS.contains(&k))
    }

    fn at_declaration_start(&self) -> bool {
        self.at_type_start()
            || matches!(
                self.peek_kind(),
                Some(TokenKind::KwStatic) | Some(TokenKind::KwExtern) | Some(TokenKind::KwCleanup)
            )
    }

    // ----- program and declarations -----

    fn program(&mut self) -> Result<Program, ParseError> {
        let mut decls = Vec::new();
        while self.peek().is_some() {
            decls.extend(self.declaration()?);
        }
        Ok(Program { decls })
    }

    /// Parse one declaration statement, which may introduce several
    /// declarations (`int a, b;`, or a tag definition plus a variable).
    fn declaration(&mut self) -> Result<Vec<Declaration>, ParseError> {
        let specs = self.specifiers()?;
        let mut out = Vec::new();
        if let Some(tag) = specs.tag {
            out.push(Declaration::Tag(tag));
        }
        // A bare `struct S;` / `enum E { ... };` declaration.
        if self.eat(TokenKind::Semi) {
            return Ok(out);
        }
        let mut first = true;
        loop {
            let decl = self.declarator()?;
            let params = decl.param_names().cloned();
            let (name, ty) = decl.derive(specs.base.clone());
            let name = name
                .ok_or_else(|| ParseError::at(specs.loc, "declaration without a name"))?;
            if first && ty.is_function() && self.check(TokenKind::LBrace) {
                let params = self.definition_params(params, specs.loc)?;
                let body = self.compound_items()?;
                out.push(Declaration::Fun(FunDecl {
                    name,
                    ty,
                    params,
                    storage: specs.storage,
                    body: Some(body),
                    loc: specs.loc,
                }));
                return Ok(out);
            }
            first = false;
            if ty.is_function() {
                let params = params
                    .map(|ps| {
                        ps.into_iter()
                            .map(|(n, _)| n.unwrap_or_else(no_label))
                            .collect()
                    })
                    .unwrap_or_default();
                out.push(Declaration::Fun(FunDecl {
                    name,
                    ty,
                    params,
                    storage: specs.storage,
                    body: None,
                    loc: specs.loc,
                }));
            } else {
                let init = if self.eat(TokenKind::Assign) {
                    Some(self.initializer()?)
                } else {
                    None
                };
                out.push(Declaration::Var(VarDecl {
                    name,
                    ty,
                    storage: specs.storage,
                    cleanup: specs.cleanup,
                    init,
                    loc: specs.loc,
                }));
            }
            if self.eat(TokenKind::Comma) {
                continue;
            }
            self.expect(TokenKind::Semi)?;
            return Ok(out);
        }
    }

    fn definition_params(
        &mut self,
        params: Option<Vec<(Option<Id>, Type)>>,
        loc: Loc,
    ) -> Result<Vec<Id>, ParseError> {
        let params =
            params.ok_or_else(|| ParseError::at(loc, "function definition needs a parameter list"))?;
        params
            .into_iter()
            .map(|(n, _)| n.ok_or_else(|| ParseError::at(loc, "unnamed parameter in function definition")))
            .collect()
    }

    fn specifiers(&mut self) -> Result<Specs, ParseError> {
        let loc = self.loc();
        let mut storage = None;
        let mut cleanup = None;
        let mut tag = None;
        let mut base = None;
        let mut signedness: Option<bool> = None; // Some(true) = unsigned
        let mut width: Option<TokenKind> = None; // char/short/long
        let mut saw_int = false;
        loop {
            match self.peek_kind() {
                Some(TokenKind::KwStatic) => {
                    self.bump()?;
                    storage = Some(StorageSpec::Static);
                }
                Some(TokenKind::KwExtern) => {
                    self.bump()?;
                    storage = Some(StorageSpec::Extern);
                }
                Some(TokenKind::KwCleanup) => {
                    self.bump()?;
                    self.expect(TokenKind::LParen)?;
                    cleanup = Some(self.expect_ident()?);
                    self.expect(TokenKind::RParen)?;
                }
                Some(TokenKind::KwUnsigned) => {
                    self.bump()?;
                    signedness = Some(true);
                }
                Some(TokenKind::KwSigned) => {
                    self.bump()?;
                    signedness = Some(false);
                }
                Some(TokenKind::KwInt) => {
                    self.bump()?;
                    saw_int = true;
                }
                Some(k @ (TokenKind::KwChar | TokenKind::KwShort | TokenKind::KwLong)) => {
                    self.bump()?;
                    width = Some(k);
                }
                Some(TokenKind::KwVoid) => {
                    self.bump()?;
                    base = Some(Type::Void);
                }
                Some(TokenKind::KwStruct) | Some(TokenKind::KwUnion) => {
                    let (ty, decl) = self.struct_or_union_spec()?;
                    base = Some(ty);
                    tag = decl;
                }
                Some(TokenKind::KwEnum) => {
                    let (ty, decl) = self.enum_spec()?;
                    base = Some(ty);
                    tag = decl;
                }
                _ => break,
            }
        }
        let base = match (base, width, signedness, saw_int) {
            (Some(t), None, None, false) => t,
            (None, Some(TokenKind::KwChar), None, false) => Type::Char,
            (None, Some(TokenKind::KwChar), Some(false), false) => Type::SChar,
            (None, Some(TokenKind::KwChar), Some(true), false) => Type::UChar,
            (None, Some(TokenKind::KwShort), Some(true), _) => Type::UShort,
            (None, Some(TokenKind::KwShort), _, _) => Type::Short,
            (None, Some(TokenKind::KwLong), Some(true), _) => Type::ULong,
            (None, Some(TokenKind::KwLong), _, _) => Type::Long,
            (None, None, Some(true), _) => Type::UInt,
            (None, None, _, true) => Type::Int,
            (None, None, Some(false), false) => Type::Int,
            _ => return Err(ParseError::at(loc, "invalid type specifier combination")),
        };
        Ok(Specs {
            base,
            storage,
            cleanup,
            tag,
            loc,
        })
    }

    fn struct_or_union_spec(&mut self) -> Result<(Type, Option<TagDecl>), ParseError> {
        let loc = self.loc();
        let is_union = self.bump()?.kind == TokenKind::KwUnion;
        let tag = self.expect_ident()?;
        let ty = if is_union {
            Type::Union(tag)
        } else {
            Type::Struct(tag)
        };
        if !self.eat(TokenKind::LBrace) {
            return Ok((ty, None));
        }
        let mut members = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            let specs = self.specifiers()?;
            loop {
                let (name, mty) = self.declarator()?.derive(specs.base.clone());
                let name =
                    name.ok_or_else(|| ParseError::at(specs.loc, "unnamed aggregate member"))?;
                members.push((name, mty));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Semi)?;
        }
        let decl = if is_union {
            TagDecl::Union {
                tag,
                members: Some(members),
                loc,
            }
        } else {
            TagDecl::Struct {
                tag,
                members: Some(members),
                loc,
            }
        };
        Ok((ty, Some(decl)))
    }

    fn enum_spec(&mut self) -> Result<(Type, Option<TagDecl>), ParseError> {
        let loc = self.loc();
        self.bump()?; // enum
        let tag = self.expect_ident()?;
        if !self.eat(TokenKind::LBrace) {
            return Ok((Type::Enum(tag), None));
        }
        let mut enumerators = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let value = if self.eat(TokenKind::Assign) {
                Some(self.conditional()?)
            } else {
                None
            };
            enumerators.push((name, value));
            if !self.eat(TokenKind::Comma) {
                break;
            }
            // Trailing comma before the closing brace.
            if self.check(TokenKind::RBrace) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok((
            Type::Enum(tag),
            Some(TagDecl::Enum {
                tag,
                enumerators,
                loc,
            }),
        ))
    }

    // ----- declarators -----

    fn declarator(&mut self) -> Result<Declarator, ParseError> {
        if self.eat(TokenKind::Star) {
            return Ok(Declarator::Pointer(Box::new(self.declarator()?)));
        }
        self.direct_declarator()
    }

    fn direct_declarator(&mut self) -> Result<Declarator, ParseError> {
        let mut decl = match self.peek_kind() {
            Some(TokenKind::Id) => {
                let name = self.expect_ident()?;
                Declarator::Name(name)
            }
            Some(TokenKind::LParen) => {
                // `(` opens a grouped declarator unless it starts a
                // parameter list (of an abstract function declarator).
                if self.peek2_kind() == Some(TokenKind::RParen)
                    || self
                        .peek2_kind()
                        .is_some_and(|k| TYPE_STARTERS.contains(&k))
                {
                    Declarator::Abstract
                } else {
                    self.bump()?;
                    let inner = self.declarator()?;
                    self.expect(TokenKind::RParen)?;
                    inner
                }
            }
            _ => Declarator::Abstract,
        };
        loop {
            if self.eat(TokenKind::LBracket) {
                let len = if self.check(TokenKind::RBracket) {
                    // Incomplete array; the checker completes the length
                    // from the initializer.
                    0
                } else {
                    self.array_length()?
                };
                self.expect(TokenKind::RBracket)?;
                decl = Declarator::Array(Box::new(decl), len);
            } else if self.eat(TokenKind::LParen) {
                let params = self.param_list()?;
                decl = Declarator::Fun(Box::new(decl), params);
            } else {
                return Ok(decl);
            }
        }
    }

    fn array_length(&mut self) -> Result<u32, ParseError> {
        let t = self.bump()?;
        let (value, _) = match t.kind {
            TokenKind::Num | TokenKind::HexNum => parse_int_literal(t.text),
            _ => return Err(ParseError::at(t.loc, "expected an integer array length")),
        };
        Ok(value as u32)
    }

    fn param_list(&mut self) -> Result<Vec<(Option<Id>, Type)>, ParseError> {
        if self.eat(TokenKind::RParen) {
            return Ok(Vec::new());
        }
        // `(void)` declares an empty parameter list.
        if self.check(TokenKind::KwVoid) && self.peek2_kind() == Some(TokenKind::RParen) {
            self.bump()?;
            self.bump()?;
            return Ok(Vec::new());
        }
        let mut params = Vec::new();
        loop {
            let specs = self.specifiers()?;
            let (name, ty) = self.declarator()?.derive(specs.base);
            // Array and function parameters adjust to pointers.
            let ty = match ty {
                Type::Array(elem, _) => Type::Pointer(elem),
                f @ Type::Fun(..) => f.ptr_to(),
                other => other,
            };
            params.push((name, ty));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    /// A type name: specifiers plus an abstract declarator.
    fn type_name(&mut self) -> Result<Type, ParseError> {
        let specs = self.specifiers()?;
        let loc = specs.loc;
        let (name, ty) = self.declarator()?.derive(specs.base);
        if name.is_some() {
            return Err(ParseError::at(loc, "unexpected name in type name"));
        }
        Ok(ty)
    }

    // ----- statements -----

    fn compound_items(&mut self) -> Result<Vec<BlockItem>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut items = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            if self.at_declaration_start() {
                for d in self.declaration()? {
                    items.push(BlockItem::Decl(d));
                }
            } else {
                items.push(BlockItem::Stmt(self.statement()?));
            }
        }
        Ok(items)
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::Semi) => {
                self.bump()?;
                Ok(Stmt::Null)
            }
            Some(TokenKind::LBrace) => Ok(Stmt::Compound(self.compound_items()?)),
            Some(TokenKind::KwReturn) => {
                let loc = self.bump()?.loc;
                let value = if self.check(TokenKind::Semi) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Return(value, loc))
            }
            Some(TokenKind::KwIf) => {
                self.bump()?;
                self.expect(TokenKind::LParen)?;
                let cond = self.expression()?;
                self.expect(TokenKind::RParen)?;
                let then = Box::new(self.statement()?);
                let els = if self.eat(TokenKind::KwElse) {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If { cond, then, els })
            }
            Some(TokenKind::KwWhile) => {
                self.bump()?;
                self.expect(TokenKind::LParen)?;
                let cond = self.expression()?;
                self.expect(TokenKind::RParen)?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While {
                    cond,
                    body,
                    label: no_label(),
                })
            }
            Some(TokenKind::KwDo) => {
                self.bump()?;
                let body = Box::new(self.statement()?);
                self.expect(TokenKind::KwWhile)?;
                self.expect(TokenKind::LParen)?;
                let cond = self.expression()?;
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::DoWhile {
                    body,
                    cond,
                    label: no_label(),
                })
            }
            Some(TokenKind::KwFor) => {
                self.bump()?;
                self.expect(TokenKind::LParen)?;
                let init = if self.at_declaration_start() {
                    ForInit::Decl(self.declaration()?)
                } else if self.eat(TokenKind::Semi) {
                    ForInit::Expr(None)
                } else {
                    let e = self.expression()?;
                    self.expect(TokenKind::Semi)?;
                    ForInit::Expr(Some(e))
                };
                let cond = if self.check(TokenKind::Semi) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(TokenKind::Semi)?;
                let post = if self.check(TokenKind::RParen) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(TokenKind::RParen)?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::For {
                    init,
                    cond,
                    post,
                    body,
                    label: no_label(),
                })
            }
            Some(TokenKind::KwSwitch) => {
                self.bump()?;
                self.expect(TokenKind::LParen)?;
                let cond = self.expression()?;
                self.expect(TokenKind::RParen)?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::Switch {
                    cond,
                    body,
                    label: no_label(),
                    cases: Vec::new(),
                    has_default: false,
                })
            }
            Some(TokenKind::KwCase) => {
                self.bump()?;
                let expr = self.conditional()?;
                self.expect(TokenKind::Colon)?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::Case {
                    expr,
                    value: 0,
                    label: no_label(),
                    body,
                })
            }
            Some(TokenKind::KwDefault) => {
                self.bump()?;
                self.expect(TokenKind::Colon)?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::Default {
                    label: no_label(),
                    body,
                })
            }
            Some(TokenKind::KwBreak) => {
                self.bump()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Break { label: no_label() })
            }
            Some(TokenKind::KwContinue) => {
                self.bump()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Continue { label: no_label() })
            }
            Some(TokenKind::KwGoto) => {
                self.bump()?;
                let name = self.expect_ident()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Goto { name })
            }
            Some(TokenKind::Id) if self.peek2_kind() == Some(TokenKind::Colon) => {
                let name = self.expect_ident()?;
                self.expect(TokenKind::Colon)?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::Labeled { name, body })
            }
            _ => {
                let e = self.expression()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Expression(e))
            }
        }
    }

    fn initializer(&mut self) -> Result<Initializer, ParseError> {
        if self.eat(TokenKind::LBrace) {
            let mut items = Vec::new();
            loop {
                items.push(self.initializer()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
                if self.check(TokenKind::RBrace) {
                    break;
                }
            }
            self.expect(TokenKind::RBrace)?;
            Ok(Initializer::List(items))
        } else {
            Ok(Initializer::Scalar(self.assignment()?))
        }
    }

    // ----- expressions -----

    fn expression(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.assignment()?;
        while self.check(TokenKind::Comma) {
            let loc = self.bump()?.loc;
            let rhs = self.assignment()?;
            e = Expr::new(ExprKind::Comma(Box::new(e), Box::new(rhs)), loc);
        }
        Ok(e)
    }

    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.conditional()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Assign) => None,
            Some(TokenKind::PlusAssign) => Some(AssignOp::Add),
            Some(TokenKind::MinusAssign) => Some(AssignOp::Sub),
            Some(TokenKind::StarAssign) => Some(AssignOp::Mul),
            Some(TokenKind::SlashAssign) => Some(AssignOp::Div),
            Some(TokenKind::PercentAssign) => Some(AssignOp::Mod),
            Some(TokenKind::AmpAssign) => Some(AssignOp::BitAnd),
            Some(TokenKind::PipeAssign) => Some(AssignOp::BitOr),
            Some(TokenKind::CaretAssign) => Some(AssignOp::BitXor),
            Some(TokenKind::ShlAssign) => Some(AssignOp::Shl),
            Some(TokenKind::ShrAssign) => Some(AssignOp::Shr),
            _ => return Ok(lhs),
        };
        let loc = self.bump()?.loc;
        let rhs = self.assignment()?;
        let kind = match op {
            None => ExprKind::Assign(Box::new(lhs), Box::new(rhs)),
            Some(op) => ExprKind::CompoundAssign(op, Box::new(lhs), Box::new(rhs)),
        };
        Ok(Expr::new(kind, loc))
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let cond = self.binary(1)?;
        if !self.check(TokenKind::Question) {
            return Ok(cond);
        }
        let loc = self.bump()?.loc;
        let then = self.expression()?;
        self.expect(TokenKind::Colon)?;
        let els = self.conditional()?;
        Ok(Expr::new(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                els: Box::new(els),
            },
            loc,
        ))
    }

    fn binary_op(kind: TokenKind) -> Option<(BinaryOp, u8)> {
        use TokenKind::*;
        Some(match kind {
            OrOr => (BinaryOp::LogOr, 1),
            AndAnd => (BinaryOp::LogAnd, 2),
            Pipe => (BinaryOp::BitOr, 3),
            Caret => (BinaryOp::BitXor, 4),
            Amp => (BinaryOp::BitAnd, 5),
            EqEq => (BinaryOp::Eq, 6),
            NotEq => (BinaryOp::Ne, 6),
            Lt => (BinaryOp::Lt, 7),
            Le => (BinaryOp::Le, 7),
            Gt => (BinaryOp::Gt, 7),
            Ge => (BinaryOp::Ge, 7),
            Shl => (BinaryOp::Shl, 8),
            Shr => (BinaryOp::Shr, 8),
            Plus => (BinaryOp::Add, 9),
            Minus => (BinaryOp::Sub, 9),
            Star => (BinaryOp::Mul, 10),
            Slash => (BinaryOp::Div, 10),
            Percent => (BinaryOp::Mod, 10),
            _ => return None,
        })
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = self.peek_kind().and_then(Self::binary_op) {
            if prec < min_prec {
                break;
            }
            let loc = self.bump()?.loc;
            let rhs = self.binary(prec + 1)?;
            lhs = Expr::new(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), loc);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.bump()?;
                let e = self.unary()?;
                Ok(Expr::new(ExprKind::Unary(UnaryOp::Negate, Box::new(e)), loc))
            }
            Some(TokenKind::Plus) => {
                self.bump()?;
                let e = self.unary()?;
                Ok(Expr::new(ExprKind::Unary(UnaryOp::Plus, Box::new(e)), loc))
            }
            Some(TokenKind::Tilde) => {
                self.bump()?;
                let e = self.unary()?;
                Ok(Expr::new(
                    ExprKind::Unary(UnaryOp::Complement, Box::new(e)),
                    loc,
                ))
            }
            Some(TokenKind::Not) => {
                self.bump()?;
                let e = self.unary()?;
                Ok(Expr::new(ExprKind::Unary(UnaryOp::Not, Box::new(e)), loc))
            }
            Some(TokenKind::Star) => {
                self.bump()?;
                let e = self.unary()?;
                Ok(Expr::new(ExprKind::Deref(Box::new(e)), loc))
            }
            Some(TokenKind::Amp) => {
                self.bump()?;
                let e = self.unary()?;
                Ok(Expr::new(ExprKind::AddrOf(Box::new(e)), loc))
            }
            Some(TokenKind::PlusPlus) | Some(TokenKind::MinusMinus) => {
                // Pre-increment desugars to compound assignment.
                let op = if self.bump()?.kind == TokenKind::PlusPlus {
                    AssignOp::Add
                } else {
                    AssignOp::Sub
                };
                let e = self.unary()?;
                let one = Expr::typed(ExprKind::Literal(1), Type::Int, loc);
                Ok(Expr::new(
                    ExprKind::CompoundAssign(op, Box::new(e), Box::new(one)),
                    loc,
                ))
            }
            Some(TokenKind::KwSizeof) => {
                self.bump()?;
                if self.check(TokenKind::LParen)
                    && self
                        .peek2_kind()
                        .is_some_and(|k| TYPE_STARTERS.contains(&k))
                {
                    self.bump()?;
                    let ty = self.type_name()?;
                    self.expect(TokenKind::RParen)?;
                    Ok(Expr::new(ExprKind::SizeOfType(ty), loc))
                } else {
                    let e = self.unary()?;
                    Ok(Expr::new(ExprKind::SizeOfExpr(Box::new(e)), loc))
                }
            }
            Some(TokenKind::LParen)
                if self
                    .peek2_kind()
                    .is_some_and(|k| TYPE_STARTERS.contains(&k)) =>
            {
                self.bump()?;
                let ty = self.type_name()?;
                self.expect(TokenKind::RParen)?;
                let e = self.unary()?;
                Ok(Expr::new(ExprKind::Cast(ty, Box::new(e)), loc))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.primary()?;
        loop {
            let loc = self.loc();
            match self.peek_kind() {
                Some(TokenKind::LParen) => {
                    self.bump()?;
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RParen) {
                        loop {
                            args.push(self.assignment()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    e = Expr::new(ExprKind::Call(Box::new(e), args), loc);
                }
                Some(TokenKind::LBracket) => {
                    self.bump()?;
                    let index = self.expression()?;
                    self.expect(TokenKind::RBracket)?;
                    e = Expr::new(ExprKind::Subscript(Box::new(e), Box::new(index)), loc);
                }
                Some(TokenKind::Dot) => {
                    self.bump()?;
                    let member = self.expect_ident()?;
                    e = Expr::new(ExprKind::Dot(Box::new(e), member), loc);
                }
                Some(TokenKind::Arrow) => {
                    self.bump()?;
                    let member = self.expect_ident()?;
                    e = Expr::new(ExprKind::Arrow(Box::new(e), member), loc);
                }
                Some(TokenKind::PlusPlus) => {
                    self.bump()?;
                    e = Expr::new(ExprKind::PostIncr(Box::new(e)), loc);
                }
                Some(TokenKind::MinusMinus) => {
                    self.bump()?;
                    e = Expr::new(ExprKind::PostDecr(Box::new(e)), loc);
                }
                _ => return Ok(e),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let t = self.bump()?;
        match t.kind {
            TokenKind::Num | TokenKind::HexNum => {
                let (value, ty) = parse_int_literal(t.text);
                Ok(Expr::typed(ExprKind::Literal(value), ty, t.loc))
            }
            TokenKind::CharLit => {
                let value = unescape_char(t.text)
                    .ok_or_else(|| ParseError::at(t.loc, "bad character literal"))?;
                Ok(Expr::typed(ExprKind::Literal(value as u64), Type::Int, t.loc))
            }
            TokenKind::Str => {
                let bytes = unescape_string(t.text)
                    .ok_or_else(|| ParseError::at(t.loc, "bad string literal"))?;
                Ok(Expr::new(ExprKind::Str(bytes), t.loc))
            }
            TokenKind::Id => Ok(Expr::new(ExprKind::Var(id(t.text)), t.loc)),
            TokenKind::LParen => {
                if self.check(TokenKind::LBrace) {
                    let items = self.compound_items()?;
                    self.expect(TokenKind::RParen)?;
                    return Ok(Expr::new(ExprKind::StmtExpr(items), t.loc));
                }
                let e = self.expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(e)
            }
            _ => Err(ParseError::at(
                t.loc,
                format!("expected an expression, found '{}'", t.text),
            )),
        }
    }
}

/// Parse an integer literal with optional `u`/`l` suffixes into its value
/// and type.
fn parse_int_literal(text: &str) -> (u64, Type) {
    let body = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let suffix = &text[body.len()..];
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        body.parse().unwrap_or(0)
    };
    let unsigned = suffix.contains(['u', 'U']);
    let long = suffix.contains(['l', 'L']);
    let ty = match (unsigned, long) {
        (true, true) => Type::ULong,
        (true, false) => Type::UInt,
        (false, true) => Type::Long,
        (false, false) => Type::Int,
    };
    (value, ty)
}

fn unescape(c: char) -> u8 {
    match c {
        'n' => b'\n',
        't' => b'\t',
        'r' => b'\r',
        '0' => 0,
        other => other as u8,
    }
}

fn unescape_char(text: &str) -> Option<i64> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut chars = inner.chars();
    let first = chars.next()?;
    if first == '\\' {
        Some(unescape(chars.next()?) as i64)
    } else {
        Some(first as i64)
    }
}

fn unescape_string(text: &str) -> Option<Vec<u8>> {
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    let mut bytes = Vec::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            bytes.push(unescape(chars.next()?));
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        parse("t.c", src).unwrap()
    }

    #[test]
    fn function_definition() {
        let p = parse_ok("int add(int a, int b) { return a + b; }");
        assert_eq!(p.decls.len(), 1);
        match &p.decls[0] {
            Declaration::Fun(f) => {
                assert_eq!(f.name.as_str(), "add");
                assert_eq!(f.params.len(), 2);
                assert!(f.body.is_some());
                match &f.ty {
                    Type::Fun(ret, params) => {
                        assert_eq!(**ret, Type::Int);
                        assert_eq!(params.len(), 2);
                    }
                    other => panic!("expected function type, got {other}"),
                }
            }
            _ => panic!("expected a function"),
        }
    }

    #[test]
    fn function_pointer_array_declarator() {
        let p = parse_ok("int main(void) { int (*t[2])(int); return 0; }");
        let Declaration::Fun(f) = &p.decls[0] else {
            panic!("expected a function");
        };
        let body = f.body.as_ref().unwrap();
        let BlockItem::Decl(Declaration::Var(v)) = &body[0] else {
            panic!("expected a declaration");
        };
        // t : array(ptr(fun(int, [int])), 2)
        let Type::Array(elem, 2) = &v.ty else {
            panic!("expected an array of 2, got {}", v.ty);
        };
        let Type::Pointer(inner) = elem.as_ref() else {
            panic!("expected pointer elements");
        };
        assert!(matches!(inner.as_ref(), Type::Fun(..)));
    }

    #[test]
    fn struct_definition_with_variable() {
        let p = parse_ok("struct pt { int x; int y; } ; struct pt origin;");
        assert!(matches!(p.decls[0], Declaration::Tag(TagDecl::Struct { .. })));
        assert!(matches!(&p.decls[1], Declaration::Var(v) if v.ty == Type::Struct(id("pt"))));
    }

    #[test]
    fn precedence_and_ternary() {
        let p = parse_ok("int f(int n) { return n < 2 ? n : n * 2 + 1; }");
        let Declaration::Fun(f) = &p.decls[0] else {
            panic!()
        };
        let BlockItem::Stmt(Stmt::Return(Some(e), _)) = &f.body.as_ref().unwrap()[0] else {
            panic!("expected return")
        };
        assert!(matches!(e.kind, ExprKind::Conditional { .. }));
    }

    #[test]
    fn cleanup_specifier() {
        let p = parse_ok("void reset(int *p); int main(void) { _Cleanup(reset) int x = 5; return x; }");
        let Declaration::Fun(f) = &p.decls[1] else {
            panic!()
        };
        let BlockItem::Decl(Declaration::Var(v)) = &f.body.as_ref().unwrap()[0] else {
            panic!("expected declaration")
        };
        assert_eq!(v.cleanup, Some(id("reset")));
    }

    #[test]
    fn statement_expression() {
        let p = parse_ok("int main(void) { return ({ int x = 1; x + 1; }); }");
        let Declaration::Fun(f) = &p.decls[0] else {
            panic!()
        };
        let BlockItem::Stmt(Stmt::Return(Some(e), _)) = &f.body.as_ref().unwrap()[0] else {
            panic!()
        };
        assert!(matches!(e.kind, ExprKind::StmtExpr(_)));
    }
}
