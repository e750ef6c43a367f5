//! the main compiler binary. takes a source file and an optional output
//! stage (final machine assembly by default).
//!
//! run with `--help` for more info.

use clap::{Parser, ValueEnum};

use topaz::{back, front, middle};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// the output format
    #[arg(value_enum, short, long, default_value_t = Output::Machine)]
    out: Output,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Output {
    /// the list of tokens
    Tokens,
    /// the ast data structure
    Ast,
    /// three-address code
    Tac,
    /// the register-oriented assembly IR
    Asm,
    /// the final Topaz-32 assembly text
    Machine,
}

fn main() {
    use Output::*;
    let args = Args::parse();

    let input = String::from_utf8(std::fs::read(&args.file).expect("file should be readable"))
        .expect("input characters should be utf8");

    match args.out {
        Tokens => {
            let mut lexer = front::lex::Lexer::new(&args.file, &input);
            loop {
                match lexer.next() {
                    Ok(Some(token)) => println!("{token}"),
                    Ok(None) => break,
                    Err(e) => {
                        eprintln!("{e}");
                        std::process::exit(1);
                    }
                }
            }
        }
        Ast => {
            println!("{:#?}", front::parse(&args.file, &input).unwrap());
        }
        Tac => {
            let mut unit = front::check(&args.file, &input).unwrap();
            let tac = middle::lower(&unit.program, &mut unit.tables).unwrap();
            println!("{tac}");
        }
        Asm => {
            let mut unit = front::check(&args.file, &input).unwrap();
            let tac = middle::lower(&unit.program, &mut unit.tables).unwrap();
            println!("{:#?}", back::codegen(&tac, &unit.tables).unwrap());
        }
        Machine => match topaz::compile(&args.file, &input) {
            Ok(text) => print!("{text}"),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
    }
}
