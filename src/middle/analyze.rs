//! Post-resolution analysis passes: function arity checking, parameter
//! frame layout, and register-need estimation.

use crate::common::Diagnostics;
use crate::front::ast::*;

use super::symbol::Symbols;

/// Record each function's declared arity and check every call against it.
///
/// Definitions are authoritative: if forward calls recorded a different
/// arity on a shared undefined-function entry, the mismatch is reported
/// when the definition is reached.  Calls to a function whose arity is
/// already known are checked on the spot; a first call to an undefined
/// function records its arity for the calls after it.
pub fn check_signatures(program: &Program, symbols: &mut Symbols, diags: &mut Diagnostics) {
    for item in &program.items {
        if let ExternalDeclaration::Function(function) = item {
            let ident = &function.declarator.ident;
            let declared = function.parameters.len();
            if let Some(id) = ident.symbol {
                match symbols[id].parameters {
                    Some(recorded) if recorded != declared => {
                        diags.error(format!(
                            "Line {}: '{}' requires {} parameters.",
                            ident.line, ident.name, declared
                        ));
                    }
                    _ => {}
                }
                symbols[id].parameters = Some(declared);
            }
            check_compound(&function.body, symbols, diags);
        }
    }
}

fn check_compound(compound: &Compound, symbols: &mut Symbols, diags: &mut Diagnostics) {
    for statement in &compound.statements {
        check_stmt(statement, symbols, diags);
    }
}

fn check_stmt(statement: &Stmt, symbols: &mut Symbols, diags: &mut Diagnostics) {
    match statement {
        Stmt::Empty => {}
        Stmt::Expr(expr) | Stmt::Return(expr) => check_expr(expr, symbols, diags),
        Stmt::Compound(compound) => check_compound(compound, symbols, diags),
        Stmt::If { cond, then, els } => {
            check_expr(cond, symbols, diags);
            check_stmt(then, symbols, diags);
            if let Some(els) = els {
                check_stmt(els, symbols, diags);
            }
        }
        Stmt::While { cond, body } => {
            check_expr(cond, symbols, diags);
            check_stmt(body, symbols, diags);
        }
    }
}

fn check_expr(expr: &Expr, symbols: &mut Symbols, diags: &mut Diagnostics) {
    match &expr.kind {
        ExprKind::Constant(_) | ExprKind::Ident(_) => {}
        ExprKind::Unary { expr, .. } => check_expr(expr, symbols, diags),
        ExprKind::Binary { left, right, .. } => {
            check_expr(left, symbols, diags);
            check_expr(right, symbols, diags);
        }
        ExprKind::Assign { value, .. } => check_expr(value, symbols, diags),
        ExprKind::Call { callee, args, line } => {
            if let Some(id) = callee.symbol {
                match symbols[id].parameters {
                    Some(expected) if expected != args.len() => {
                        diags.error(format!(
                            "Line {}: '{}' requires {} parameters.",
                            line, callee.name, expected
                        ));
                    }
                    None => symbols[id].parameters = Some(args.len()),
                    _ => {}
                }
            }
            for arg in args {
                check_expr(arg, symbols, diags);
            }
        }
    }
}

/// Assign each parameter its frame offset.
///
/// After `push ebp`, `[ebp+0]` holds the saved base pointer and `[ebp+4]`
/// the return address, so the first argument lives at `[ebp+8]` and each
/// one after is 4 bytes further up.
pub fn layout_parameters(program: &Program, symbols: &mut Symbols) {
    for item in &program.items {
        if let ExternalDeclaration::Function(function) = item {
            let mut offset = 8;
            for parameter in &function.parameters {
                if let Some(id) = parameter.declarator.ident.symbol {
                    symbols[id].offset = Some(offset);
                }
                offset += 4;
            }
        }
    }
}

/// Annotate every expression with the number of registers its evaluation
/// needs beyond `eax`.
///
/// Constants and frame- or data-resident variables have a direct operand
/// form and need none; anything that must be computed occupies `eax` and
/// counts as one.  The generator only distinguishes 0 from 1.
pub fn estimate_registers(program: &mut Program) {
    for item in &mut program.items {
        if let ExternalDeclaration::Function(function) = item {
            estimate_compound(&mut function.body);
        }
    }
}

fn estimate_compound(compound: &mut Compound) {
    for statement in &mut compound.statements {
        estimate_stmt(statement);
    }
}

fn estimate_stmt(statement: &mut Stmt) {
    match statement {
        Stmt::Empty => {}
        Stmt::Expr(expr) | Stmt::Return(expr) => estimate_expr(expr),
        Stmt::Compound(compound) => estimate_compound(compound),
        Stmt::If { cond, then, els } => {
            estimate_expr(cond);
            estimate_stmt(then);
            if let Some(els) = els {
                estimate_stmt(els);
            }
        }
        Stmt::While { cond, body } => {
            estimate_expr(cond);
            estimate_stmt(body);
        }
    }
}

fn estimate_expr(expr: &mut Expr) {
    expr.registers = match &mut expr.kind {
        // Constants and resolved variables have a direct operand form.
        ExprKind::Constant(_) | ExprKind::Ident(_) => 0,
        ExprKind::Unary { expr, .. } => {
            estimate_expr(expr);
            1
        }
        ExprKind::Binary { left, right, .. } => {
            estimate_expr(left);
            estimate_expr(right);
            1
        }
        ExprKind::Assign { value, .. } => {
            estimate_expr(value);
            1
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                estimate_expr(arg);
            }
            1
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::common::Diagnostics;
    use crate::front::parse;
    use crate::middle::resolve;

    use super::*;

    fn analyze(source: &str) -> (Program, Symbols, Diagnostics) {
        let mut diags = Diagnostics::default();
        let mut program = parse(source, &mut diags);
        assert_eq!(diags.errors(), 0, "parse failed: {:?}", diags.messages());
        let mut symbols = resolve(&mut program, &mut diags);
        check_signatures(&program, &mut symbols, &mut diags);
        layout_parameters(&program, &mut symbols);
        estimate_registers(&mut program);
        (program, symbols, diags)
    }

    #[test]
    fn parameter_offsets_step_by_four_from_eight() {
        let (program, symbols, _) = analyze("int f(int a, int b, int c) { return a; }");
        let ExternalDeclaration::Function(f) = &program.items[0] else {
            panic!("expected a function");
        };
        let offsets: Vec<i32> = f
            .parameters
            .iter()
            .map(|p| symbols[p.declarator.ident.symbol.unwrap()].offset.unwrap())
            .collect();
        assert_eq!(offsets, [8, 12, 16]);
    }

    #[test]
    fn wrong_argument_count_is_an_error() {
        let (_, _, diags) =
            analyze("int f(int a, int b) { return a + b; } int main() { return f(1); }");
        assert_eq!(diags.errors(), 1);
        assert!(diags.messages()[0].contains("'f' requires 2 parameters"));
    }

    #[test]
    fn forward_call_arity_mismatch_is_caught_at_the_definition() {
        let (_, _, diags) =
            analyze("int main() { return g(1); } int g(int a, int b) { return a + b; }");
        assert_eq!(diags.warnings(), 1);
        assert_eq!(diags.errors(), 1);
        assert!(diags.messages()[0].contains("Undeclared function 'g'"));
        assert!(diags.messages()[1].contains("'g' requires 2 parameters"));
    }

    #[test]
    fn undefined_function_calls_must_agree_on_arity() {
        let (_, _, diags) = analyze("int main() { f(1); f(1, 2); return 0; }");
        assert_eq!(diags.warnings(), 1);
        assert_eq!(diags.errors(), 1);
    }

    #[test]
    fn nested_call_arguments_are_checked_too() {
        let (_, _, diags) =
            analyze("int f(int a) { return a; } int main() { return f(f(1, 2)); }");
        assert_eq!(diags.errors(), 1);
    }

    #[test]
    fn register_needs_distinguish_direct_operands() {
        let (program, _, _) = analyze("int main() { int a; a = 1; return a + 2 * a; }");
        let ExternalDeclaration::Function(f) = &program.items[0] else {
            panic!("expected a function");
        };
        let Stmt::Return(expr) = &f.body.statements[1] else {
            panic!("expected a return");
        };
        assert_eq!(expr.registers, 1);
        let ExprKind::Binary { left, right, .. } = &expr.kind else {
            panic!("expected a binary expression");
        };
        assert_eq!(left.registers, 0);
        assert_eq!(right.registers, 1);
    }
}
