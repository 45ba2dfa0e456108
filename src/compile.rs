//! The compilation driver.
//!
//! Runs the pipeline end to end and aggregates the per-pass results: parse,
//! fold (when optimizing), the semantic passes, then code generation and
//! the peephole loop.  Semantic passes all run even when earlier ones
//! reported errors, so one invocation surfaces every diagnostic; code
//! generation only runs when the error count is still zero.

use crate::back;
use crate::common::Diagnostics;
use crate::front;
use crate::middle;

#[derive(Clone, Copy, Debug, Default)]
pub struct Options {
    /// Enable constant folding, static conditionals, and the peephole loop.
    pub optimize: bool,
    /// Also produce the human-readable AST dump.
    pub ast: bool,
}

/// The result of one compilation.
#[derive(Debug)]
pub struct Compilation {
    /// The assembly text; absent when errors suppressed code generation.
    pub asm: Option<String>,
    /// The AST dump, when requested and the input parsed.
    pub ast: Option<String>,
    pub errors: u32,
    pub warnings: u32,
    /// Total rewrites across the folder, the generator, and the peephole
    /// optimizers.
    pub optimized: u32,
    /// Diagnostic lines in the order they were produced, prefixed
    /// `Error: ` or `Warning: `.
    pub diagnostics: Vec<String>,
}

pub fn compile(source: &str, options: &Options) -> Compilation {
    let mut diags = Diagnostics::default();
    let mut optimized = 0;

    let mut program = front::parse(source, &mut diags);
    let parsed = diags.errors() == 0;
    if options.optimize && parsed {
        optimized += middle::fold(&mut program);
    }

    let mut symbols = None;
    if diags.errors() == 0 {
        let mut table = middle::resolve(&mut program, &mut diags);
        middle::check_signatures(&program, &mut table, &mut diags);
        middle::layout_parameters(&program, &mut table);
        middle::estimate_registers(&mut program);
        symbols = Some(table);
    }

    let mut asm = None;
    if diags.errors() == 0 {
        if let Some(table) = symbols.as_mut() {
            let (mut code, generated) = back::generate(&program, table, options.optimize);
            optimized += generated;
            if options.optimize {
                let (optimized_code, rewrites) = back::optimize(code);
                code = optimized_code;
                optimized += rewrites;
            }
            asm = Some(back::render(&code));
        }
    }

    let ast = (options.ast && parsed).then(|| front::print(&program));

    Compilation {
        asm,
        ast,
        errors: diags.errors(),
        warnings: diags.warnings(),
        optimized,
        diagnostics: diags.into_messages(),
    }
}
