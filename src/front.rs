//! The front-end of the compiler.

pub mod ast;
pub mod check;
pub mod lex;
pub mod parse;
pub mod sym;
pub mod types;

pub use check::check_program;
pub use parse::parse;
pub use sym::Tables;

use derive_more::Display;

/// A checked compilation unit: the typed, label-resolved AST plus the
/// symbol and type tables the later stages read.
pub struct Unit {
    pub program: ast::Program,
    pub tables: Tables,
}

/// Any error the front end can produce.
#[derive(Display)]
pub enum FrontError {
    #[display("{_0}")]
    Parse(parse::ParseError),
    #[display("{_0}")]
    Check(check::CheckError),
}

impl std::fmt::Debug for FrontError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// Run the whole front end over a source file.
pub fn check(file: &str, input: &str) -> Result<Unit, FrontError> {
    let ast = parse(file, input).map_err(FrontError::Parse)?;
    let (program, tables) = check_program(ast).map_err(FrontError::Check)?;
    Ok(Unit { program, tables })
}
