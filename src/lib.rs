//! This is the compiler as a library.  See `src/bin` directory for the
//! executable programs using this library.
//!
//! The pipeline is front (source text to a typed, label-resolved AST plus
//! symbol and type tables), middle (AST to three-address code), back
//! (three-address code to Topaz-32 assembly).  Each stage is a pure function
//! over the previous stage's output plus the shared tables.

pub mod common;
pub mod front;
pub mod middle;
pub mod back;

use common::Error;

/// Compile a source file all the way to Topaz-32 assembly text.
pub fn compile(file: &str, input: &str) -> Result<String, Error> {
    let mut unit = front::check(file, input).map_err(Error::from_front)?;
    let tac = middle::lower(&unit.program, &mut unit.tables)?;
    let asm = back::codegen(&tac, &unit.tables)?;
    let machine = back::emit(&asm)?;
    Ok(machine.to_string())
}
