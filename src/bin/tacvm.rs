//! runs a source file through the front end and the TAC interpreter.
//! the process exit code is the program's `main` return value.

use std::io::Write;

use clap::Parser;

use topaz::{front, middle};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
}

fn main() {
    let args = Args::parse();

    let input = String::from_utf8(std::fs::read(&args.file).expect("file should be readable"))
        .expect("input characters should be utf8");

    let mut unit = match front::check(&args.file, &input) {
        Ok(unit) => unit,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    let result = middle::lower(&unit.program, &mut unit.tables)
        .and_then(|tac| middle::interpret(&tac, &unit.tables));
    match result {
        Ok(outcome) => {
            std::io::stdout()
                .write_all(&outcome.stdout)
                .expect("stdout should be writable");
            std::process::exit(outcome.exit & 0xff);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    }
}
