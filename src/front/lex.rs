//! The lexer.

use derive_more::Display;
use regex::Regex;

use crate::common::{id, Id, Loc};

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// Where the token starts.
    pub loc: Loc,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Display, Debug)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("hexnum")]
    HexNum,
    #[display("charlit")]
    CharLit,
    #[display("string")]
    Str,
    // Keywords
    #[display("int")]
    KwInt,
    #[display("char")]
    KwChar,
    #[display("short")]
    KwShort,
    #[display("long")]
    KwLong,
    #[display("unsigned")]
    KwUnsigned,
    #[display("signed")]
    KwSigned,
    #[display("void")]
    KwVoid,
    #[display("struct")]
    KwStruct,
    #[display("union")]
    KwUnion,
    #[display("enum")]
    KwEnum,
    #[display("return")]
    KwReturn,
    #[display("if")]
    KwIf,
    #[display("else")]
    KwElse,
    #[display("while")]
    KwWhile,
    #[display("do")]
    KwDo,
    #[display("for")]
    KwFor,
    #[display("break")]
    KwBreak,
    #[display("continue")]
    KwContinue,
    #[display("goto")]
    KwGoto,
    #[display("switch")]
    KwSwitch,
    #[display("case")]
    KwCase,
    #[display("default")]
    KwDefault,
    #[display("sizeof")]
    KwSizeof,
    #[display("static")]
    KwStatic,
    #[display("extern")]
    KwExtern,
    #[display("_Cleanup")]
    KwCleanup,
    // Punctuation, longest spellings first so the matcher order is valid
    #[display("<<=")]
    ShlAssign,
    #[display(">>=")]
    ShrAssign,
    #[display("->")]
    Arrow,
    #[display("++")]
    PlusPlus,
    #[display("--")]
    MinusMinus,
    #[display("<<")]
    Shl,
    #[display(">>")]
    Shr,
    #[display("<=")]
    Le,
    #[display(">=")]
    Ge,
    #[display("==")]
    EqEq,
    #[display("!=")]
    NotEq,
    #[display("&&")]
    AndAnd,
    #[display("||")]
    OrOr,
    #[display("+=")]
    PlusAssign,
    #[display("-=")]
    MinusAssign,
    #[display("*=")]
    StarAssign,
    #[display("/=")]
    SlashAssign,
    #[display("%=")]
    PercentAssign,
    #[display("&=")]
    AmpAssign,
    #[display("|=")]
    PipeAssign,
    #[display("^=")]
    CaretAssign,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("%")]
    Percent,
    #[display("&")]
    Amp,
    #[display("|")]
    Pipe,
    #[display("^")]
    Caret,
    #[display("~")]
    Tilde,
    #[display("!")]
    Not,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
    #[display("=")]
    Assign,
    #[display("?")]
    Question,
    #[display(":")]
    Colon,
    #[display(";")]
    Semi,
    #[display(",")]
    Comma,
    #[display(".")]
    Dot,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
}

pub struct LexError(pub Loc, pub char);

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// The punctuation table, in matcher order.
const PUNCT: &[(&str, TokenKind)] = &[
    ("<<=", TokenKind::ShlAssign),
    (">>=", TokenKind::ShrAssign),
    ("->", TokenKind::Arrow),
    ("++", TokenKind::PlusPlus),
    ("--", TokenKind::MinusMinus),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::NotEq),
    ("&&", TokenKind::AndAnd),
    ("||", TokenKind::OrOr),
    ("+=", TokenKind::PlusAssign),
    ("-=", TokenKind::MinusAssign),
    ("*=", TokenKind::StarAssign),
    ("/=", TokenKind::SlashAssign),
    ("%=", TokenKind::PercentAssign),
    ("&=", TokenKind::AmpAssign),
    ("|=", TokenKind::PipeAssign),
    ("^=", TokenKind::CaretAssign),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("&", TokenKind::Amp),
    ("|", TokenKind::Pipe),
    ("^", TokenKind::Caret),
    ("~", TokenKind::Tilde),
    ("!", TokenKind::Not),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("=", TokenKind::Assign),
    ("?", TokenKind::Question),
    (":", TokenKind::Colon),
    (";", TokenKind::Semi),
    (",", TokenKind::Comma),
    (".", TokenKind::Dot),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
];

const KEYWORDS: &[(&str, TokenKind)] = &[
    ("int", TokenKind::KwInt),
    ("char", TokenKind::KwChar),
    ("short", TokenKind::KwShort),
    ("long", TokenKind::KwLong),
    ("unsigned", TokenKind::KwUnsigned),
    ("signed", TokenKind::KwSigned),
    ("void", TokenKind::KwVoid),
    ("struct", TokenKind::KwStruct),
    ("union", TokenKind::KwUnion),
    ("enum", TokenKind::KwEnum),
    ("return", TokenKind::KwReturn),
    ("if", TokenKind::KwIf),
    ("else", TokenKind::KwElse),
    ("while", TokenKind::KwWhile),
    ("do", TokenKind::KwDo),
    ("for", TokenKind::KwFor),
    ("break", TokenKind::KwBreak),
    ("continue", TokenKind::KwContinue),
    ("goto", TokenKind::KwGoto),
    ("switch", TokenKind::KwSwitch),
    ("case", TokenKind::KwCase),
    ("default", TokenKind::KwDefault),
    ("sizeof", TokenKind::KwSizeof),
    ("static", TokenKind::KwStatic),
    ("extern", TokenKind::KwExtern),
    ("_Cleanup", TokenKind::KwCleanup),
];

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    file: Id,
    line: u32,
    col: u32,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(file: &str, input: &'input str) -> Self {
        let mut matchers = vec![
            (
                Regex::new(r"\A'(?:\\.|[^'\\])'").unwrap(),
                TokenKind::CharLit,
            ),
            (
                Regex::new(r#"\A"(?:\\.|[^"\\])*""#).unwrap(),
                TokenKind::Str,
            ),
            (
                Regex::new(r"\A0[xX][0-9a-fA-F]+[uUlL]*").unwrap(),
                TokenKind::HexNum,
            ),
            (Regex::new(r"\A[0-9]+[uUlL]*").unwrap(), TokenKind::Num),
            (
                Regex::new(r"\A[A-Za-z_][A-Za-z0-9_]*").unwrap(),
                TokenKind::Id,
            ),
        ];
        for (text, kind) in PUNCT {
            matchers.push((Regex::new(&format!(r"\A{}", regex::escape(text))).unwrap(), *kind));
        }
        Lexer {
            input,
            pos: 0,
            file: id(file),
            line: 1,
            col: 1,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://[^\n]*)|(?:/\*[\s\S]*?\*/))*")
                .unwrap(),
            matchers,
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    pub fn loc(&self) -> Loc {
        Loc::new(self.file, self.line, self.col)
    }

    /// Advance the position over `text`, keeping line/column current.
    fn advance(&mut self, len: usize) {
        let text = &self.input[self.pos..self.pos + len];
        for ch in text.chars() {
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos += len;
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.advance(m.end());
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let loc = self.loc();
        let rest = &self.input[self.pos..];
        // First matcher wins; the table is ordered so longer spellings come
        // before their prefixes.
        let matched = self
            .matchers
            .iter()
            .find_map(|(re, kind)| re.find(rest).map(|m| (m.end(), *kind)));
        let Some((len, kind)) = matched else {
            return Err(LexError(loc, rest.chars().next().unwrap_or('\0')));
        };
        let text = &rest[..len];
        let kind = if kind == TokenKind::Id {
            KEYWORDS
                .iter()
                .find(|(kw, _)| *kw == text)
                .map(|(_, k)| *k)
                .unwrap_or(TokenKind::Id)
        } else {
            kind
        };
        self.advance(len);
        Ok(Some(Token { kind, text, loc }))
    }

    /// Lex the whole input.
    pub fn tokens(mut self) -> Result<Vec<Token<'input>>, LexError> {
        let mut out = Vec::new();
        while let Some(token) = self.next()? {
            out.push(token);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new("t.c", input)
            .tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        use TokenKind::*;
        assert_eq!(
            kinds("int main unsigned x _Cleanup"),
            vec![KwInt, Id, KwUnsigned, Id, KwCleanup]
        );
    }

    #[test]
    fn longest_punctuation_wins() {
        use TokenKind::*;
        assert_eq!(kinds("<<= << < <= ->"), vec![ShlAssign, Shl, Lt, Le, Arrow]);
    }

    #[test]
    fn comments_and_positions() {
        let toks = Lexer::new("t.c", "// line one\nx /* mid */ 42")
            .tokens()
            .unwrap();
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[0].loc.line, 2);
        assert_eq!(toks[0].loc.col, 1);
        assert_eq!(toks[1].kind, TokenKind::Num);
        assert_eq!(toks[1].text, "42");
    }

    #[test]
    fn literals() {
        use TokenKind::*;
        assert_eq!(kinds(r#"'a' '\n' "hi" 0x1F 10u"#), vec![CharLit, CharLit, Str, HexNum, Num]);
    }
}
