//! the main compiler binary. takes a source file, an optional output format
//! (assembly by default), and an optimization flag.
//!
//! run with `--help` for more info.

use std::process::ExitCode;

use tinyc::common::Diagnostics;
use tinyc::compile::{compile, Options};
use tinyc::front::lex;

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// the output format
    #[arg(value_enum, short, long, default_value_t = Output::Asm)]
    out: Output,
    /// turn on optimizations
    #[arg(short = 'O', default_value_t = false)]
    optimize: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Output {
    /// the list of tokens
    Tokens,
    /// the ast, as an indented outline
    Ast,
    /// the resulting assembly code
    Asm,
}

fn main() -> ExitCode {
    use Output::*;
    let args = Args::parse();

    let input = String::from_utf8(std::fs::read(&args.file).expect("file should be readable"))
        .expect("input characters should be utf8");

    match args.out {
        Tokens => {
            let mut diags = Diagnostics::default();
            for token in lex::tokenize(&input, &mut diags) {
                println!("{token}");
            }
            let failed = diags.errors() > 0;
            report(diags.into_messages(), failed)
        }
        Ast => {
            let result = compile(
                &input,
                &Options {
                    optimize: args.optimize,
                    ast: true,
                },
            );
            if let Some(ast) = &result.ast {
                print!("{ast}");
            }
            report(result.diagnostics, result.errors > 0)
        }
        Asm => {
            let result = compile(
                &input,
                &Options {
                    optimize: args.optimize,
                    ast: false,
                },
            );
            if let Some(asm) = &result.asm {
                print!("{asm}");
            }
            report(result.diagnostics, result.errors > 0)
        }
    }
}

fn report(diagnostics: Vec<String>, failed: bool) -> ExitCode {
    for line in &diagnostics {
        eprintln!("{line}");
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
