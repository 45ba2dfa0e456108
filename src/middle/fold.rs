//! The constant folder.
//!
//! Rewrites constant sub-expressions to their value, bottom-up, and
//! reports how many rewrites it made so the driver can add them to the
//! `optimized` tally.  Folding twice is equivalent to folding once.

use crate::front::ast::*;

/// Fold constant sub-expressions in place.  Returns the rewrite count.
pub fn fold(program: &mut Program) -> u32 {
    let mut folded = 0;
    for item in &mut program.items {
        if let ExternalDeclaration::Function(function) = item {
            fold_compound(&mut function.body, &mut folded);
        }
    }
    folded
}

fn fold_compound(compound: &mut Compound, folded: &mut u32) {
    for statement in &mut compound.statements {
        fold_stmt(statement, folded);
    }
}

fn fold_stmt(statement: &mut Stmt, folded: &mut u32) {
    match statement {
        Stmt::Empty => {}
        Stmt::Expr(expr) | Stmt::Return(expr) => fold_expr(expr, folded),
        Stmt::Compound(compound) => fold_compound(compound, folded),
        Stmt::If { cond, then, els } => {
            fold_expr(cond, folded);
            fold_stmt(then, folded);
            if let Some(els) = els {
                fold_stmt(els, folded);
            }
        }
        Stmt::While { cond, body } => {
            fold_expr(cond, folded);
            fold_stmt(body, folded);
        }
    }
}

fn fold_expr(expr: &mut Expr, folded: &mut u32) {
    match &mut expr.kind {
        ExprKind::Constant(_) | ExprKind::Ident(_) => {}
        ExprKind::Unary { op, expr: operand } => {
            fold_expr(operand, folded);
            if *op == UnaryOp::Neg {
                if let ExprKind::Constant(value) = operand.kind {
                    *folded += 1;
                    expr.kind = ExprKind::Constant(value.wrapping_neg());
                }
            }
        }
        ExprKind::Binary { op, left, right } => {
            fold_expr(left, folded);
            fold_expr(right, folded);
            if let (ExprKind::Constant(a), ExprKind::Constant(b)) = (&left.kind, &right.kind) {
                if let Some(value) = fold_binary(*op, *a, *b) {
                    *folded += 1;
                    expr.kind = ExprKind::Constant(value);
                }
            }
        }
        ExprKind::Assign { value, .. } => fold_expr(value, folded),
        ExprKind::Call { args, .. } => {
            for arg in args {
                fold_expr(arg, folded);
            }
        }
    }
}

fn fold_binary(op: BinOp, a: i32, b: i32) -> Option<i32> {
    let value = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        // A constant zero divisor is left for the program to fault on.
        BinOp::Div if b == 0 => return None,
        BinOp::Div => fold_div(a, b),
        // The logical operators compare against literal 1, not truthiness.
        BinOp::And => (a == 1 && b == 1) as i32,
        BinOp::Or => (a == 1 || b == 1) as i32,
        BinOp::Eq => (a == b) as i32,
        BinOp::Ne => (a != b) as i32,
        BinOp::Lt => (a < b) as i32,
        BinOp::Le => (a <= b) as i32,
        BinOp::Gt => (a > b) as i32,
        BinOp::Ge => (a >= b) as i32,
    };
    Some(value)
}

/// Division rule: floor division when both operands are positive, ceiling
/// division otherwise.
fn fold_div(a: i32, b: i32) -> i32 {
    if a > 0 && b > 0 {
        return a / b;
    }
    let quotient = a.wrapping_div(b);
    let remainder = a.wrapping_rem(b);
    // via the floored quotient and remainder
    let (floored, modulo) = if remainder != 0 && ((remainder < 0) != (b < 0)) {
        (quotient - 1, remainder + b)
    } else {
        (quotient, remainder)
    };
    if modulo == 0 {
        floored
    } else {
        floored + 1
    }
}
