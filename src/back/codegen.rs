//! The code generator.
//!
//! Lowers the analyzed AST to the flat [Item] stream.  The discipline is a
//! single accumulator: every expression leaves its value in `eax`, and
//! when two values must be live at once the earlier one is spilled to a
//! frame temporary.
//!
//! # Frame layout
//!
//! Locals and temporaries sit at negative offsets from `ebp`.  `last_alloc`
//! is the current depth and `top_alloc` the deepest point reached; the
//! prologue's `sub esp, N` is patched to `-top_alloc` once the body is
//! generated.  Compound statements restore `last_alloc` on exit so sibling
//! blocks reuse the same slots.
//!
//! # Evaluation shapes
//!
//! A binary operation picks one of three shapes from the operands'
//! register estimates:
//!
//! - *L*: right operand has a direct form; evaluate left into `eax` and
//!   combine with the operand directly.
//! - *R*: left operand has a direct form and the operation commutes;
//!   evaluate right into `eax` and fold the left operand in.
//! - *RSL* ("right, save, left"): evaluate right, spill it, evaluate left,
//!   combine with the spilled temporary.  Preserves operand order for
//!   subtraction, division, and ordered comparisons.

use crate::common::{Id, Kind};
use crate::front::ast::*;
use crate::middle::symbol::Symbols;

use super::asm::*;

use Operand::*;
use Register::*;

/// Generate code for a fully analyzed program.  Returns the item stream
/// and the number of rewrites the generator itself performed (statically
/// decided conditionals).
pub fn generate(program: &Program, symbols: &mut Symbols, optimize: bool) -> (Vec<Item>, u32) {
    let mut generator = Generator {
        code: Vec::new(),
        symbols,
        nlabel: 0,
        last_alloc: 0,
        top_alloc: 0,
        return_label: None,
        optimize,
        optimized: 0,
    };
    generator.program(program);
    (generator.code, generator.optimized)
}

struct Generator<'a> {
    code: Vec<Item>,
    symbols: &'a mut Symbols,
    /// Label counter; monotone across the whole program, never reset
    /// between functions, so label names are unique and deterministic.
    nlabel: u32,
    last_alloc: i32,
    top_alloc: i32,
    return_label: Option<Label>,
    optimize: bool,
    optimized: u32,
}

impl Generator<'_> {
    // ------------------------------------------------------------------
    // Emission helpers.
    // ------------------------------------------------------------------

    fn emit(&mut self, item: Item) {
        self.code.push(item);
    }

    fn op(&mut self, op: Op, args: Vec<Operand>) {
        self.emit(Item::Code(Instruction::new(op, args)));
    }

    fn op_c(&mut self, op: Op, args: Vec<Operand>, comment: impl Into<String>) {
        self.emit(Item::Code(Instruction::with_comment(op, args, comment)));
    }

    fn label(&mut self, label: Label, global: bool) {
        self.emit(Item::Label { label, global });
    }

    fn new_label(&mut self, prefix: &str) -> Label {
        self.nlabel += 1;
        Label(Id::new(format!("{}_{}", prefix, self.nlabel)))
    }

    /// Reserve the next 4-byte frame slot and return its address.
    fn allocate(&mut self) -> Operand {
        self.last_alloc -= 4;
        self.top_alloc = self.top_alloc.min(self.last_alloc);
        Mem {
            base: Ebp,
            offset: self.last_alloc,
        }
    }

    fn release(&mut self) {
        self.last_alloc += 4;
    }

    // ------------------------------------------------------------------
    // Program structure.
    // ------------------------------------------------------------------

    /// Globals first, as `GLOBAL`/`COMMON` pairs, then the text section
    /// with every function body.
    fn program(&mut self, program: &Program) {
        for item in &program.items {
            if let ExternalDeclaration::Declaration(declaration) = item {
                for declarator in &declaration.declarators {
                    let label = mangled(declarator.ident.name);
                    if let Some(id) = declarator.ident.symbol {
                        self.symbols[id].label = Some(label.0);
                    }
                    self.emit(Item::Directive(Directive::Global(label)));
                    self.emit(Item::Directive(Directive::Common { label, bytes: 4 }));
                }
            }
        }
        self.emit(Item::Directive(Directive::Section(Section::Text)));
        for item in &program.items {
            if let ExternalDeclaration::Function(function) = item {
                self.function(function);
            }
        }
    }

    fn function(&mut self, function: &FunctionDefinition) {
        let name = function.declarator.ident.name;
        let label = mangled(name);
        let return_label = Label(Id::new(format!("return_{name}")));
        self.return_label = Some(return_label);
        self.last_alloc = 0;
        self.top_alloc = 0;

        self.emit(Item::Directive(Directive::Global(label)));
        self.label(label, true);
        self.op(Op::Push, vec![Reg(Ebp)]);
        self.op(Op::Mov, vec![Reg(Ebp), Reg(Esp)]);
        // Frame size is patched in once the body is generated
        let frame_size = self.code.len();
        self.op(Op::Sub, vec![Reg(Esp), Imm(0)]);

        self.compound(&function.body);

        if let Item::Code(instruction) = &mut self.code[frame_size] {
            instruction.args[1] = Imm(-self.top_alloc);
        }
        self.label(return_label, false);
        self.op(Op::Mov, vec![Reg(Esp), Reg(Ebp)]);
        self.op(Op::Pop, vec![Reg(Ebp)]);
        self.op(Op::Ret, vec![]);
        self.return_label = None;
    }

    fn compound(&mut self, compound: &Compound) {
        let saved = self.last_alloc;
        for declaration in &compound.declarations {
            for declarator in &declaration.declarators {
                self.allocate();
                if let Some(id) = declarator.ident.symbol {
                    self.symbols[id].offset = Some(self.last_alloc);
                }
            }
        }
        for statement in &compound.statements {
            self.statement(statement);
        }
        self.last_alloc = saved;
    }

    // ------------------------------------------------------------------
    // Statements.
    // ------------------------------------------------------------------

    fn statement(&mut self, statement: &Stmt) {
        match statement {
            Stmt::Empty => {}
            Stmt::Expr(expr) => self.expr(expr),
            Stmt::Compound(compound) => self.compound(compound),
            Stmt::If { cond, then, els } => self.if_statement(cond, then, els.as_deref()),
            Stmt::While { cond, body } => self.while_loop(cond, body),
            Stmt::Return(expr) => {
                self.expr(expr);
                let Some(return_label) = self.return_label else {
                    unreachable!("return statement outside a function body");
                };
                self.op(Op::Jmp, vec![LabelRef(return_label)]);
            }
        }
    }

    fn if_statement(&mut self, cond: &Expr, then: &Stmt, els: Option<&Stmt>) {
        // A constant condition decides the branch statically.
        if self.optimize {
            if let ExprKind::Constant(value) = cond.kind {
                self.optimized += 1;
                if value != 0 {
                    self.statement(then);
                } else if let Some(els) = els {
                    self.statement(els);
                }
                return;
            }
        }

        let else_label = self.new_label("if_else");
        let done_label = self.new_label("if_done");
        self.expr(cond);
        self.op_c(Op::Cmp, vec![Reg(Eax), Imm(0)], "compare (if)");
        match els {
            None => {
                self.op(Op::Je, vec![LabelRef(done_label)]);
                self.statement(then);
            }
            Some(els) => {
                self.op(Op::Je, vec![LabelRef(else_label)]);
                self.statement(then);
                self.op(Op::Jmp, vec![LabelRef(done_label)]);
                self.label(else_label, false);
                self.statement(els);
            }
        }
        self.label(done_label, false);
    }

    fn while_loop(&mut self, cond: &Expr, body: &Stmt) {
        let test_label = self.new_label("while_test");
        let done_label = self.new_label("while_done");
        self.label(test_label, false);
        self.expr(cond);
        self.op_c(Op::Cmp, vec![Reg(Eax), Imm(0)], "compare (while)");
        self.op(Op::Je, vec![LabelRef(done_label)]);
        self.statement(body);
        self.op(Op::Jmp, vec![LabelRef(test_label)]);
        self.label(done_label, false);
    }

    // ------------------------------------------------------------------
    // Expressions.  Every one leaves its value in `eax`.
    // ------------------------------------------------------------------

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Constant(value) => {
                self.op_c(Op::Mov, vec![Reg(Eax), Imm(*value)], "constant");
            }
            ExprKind::Ident(ident) => self.load(ident),
            ExprKind::Unary { op, expr } => self.unary(*op, expr),
            ExprKind::Binary { op, left, right } => self.binary(*op, left, right),
            ExprKind::Assign { op, target, value } => self.assign(*op, target, value),
            ExprKind::Call { callee, args, .. } => self.call(callee, args),
        }
    }

    fn load(&mut self, ident: &Ident) {
        match self.address(ident) {
            addr @ Mem { .. } => {
                self.op_c(Op::Mov, vec![Reg(Eax), addr], format!("id: {}", ident.name));
            }
            addr => {
                self.op_c(
                    Op::Mov,
                    vec![Reg(Eax), addr],
                    format!("id (global): {}", ident.name),
                );
            }
        }
    }

    /// The direct address of a resolved variable: a frame slot for locals
    /// and parameters, a data reference for globals.
    fn address(&self, ident: &Ident) -> Operand {
        let Some(id) = ident.symbol else {
            unreachable!("unresolved identifier reached code generation");
        };
        let symbol = &self.symbols[id];
        match (symbol.offset, symbol.label) {
            (Some(offset), _) => Mem { base: Ebp, offset },
            (None, Some(label)) => Data(Label(label)),
            (None, None) => unreachable!("variable has neither a frame slot nor a label"),
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr) {
        match op {
            UnaryOp::Neg => {
                self.expr(operand);
                self.op_c(Op::Neg, vec![Reg(Eax)], "negative");
            }
            UnaryOp::PreInc => self.step(operand, Op::Inc, "increment"),
            UnaryOp::PreDec => self.step(operand, Op::Dec, "decrement"),
        }
    }

    /// `++x` / `--x`: load, adjust, store back.
    fn step(&mut self, operand: &Expr, op: Op, comment: &str) {
        let ExprKind::Ident(ident) = &operand.kind else {
            unreachable!("++/-- applies to an identifier");
        };
        let addr = self.address(ident);
        self.load(ident);
        self.op_c(op, vec![Reg(Eax)], comment);
        self.op_c(
            Op::Mov,
            vec![addr, Reg(Eax)],
            format!("assign {}", ident.name),
        );
    }

    fn assign(&mut self, op: AssignOp, target: &Ident, value: &Expr) {
        let addr = self.address(target);
        self.expr(value);
        match op {
            AssignOp::Assign => {}
            AssignOp::AddAssign => {
                self.op_c(Op::Add, vec![Reg(Eax), addr], "add");
            }
            // x -= e computes -e + x
            AssignOp::SubAssign => {
                self.op_c(Op::Neg, vec![Reg(Eax)], "minus");
                self.op_c(Op::Add, vec![Reg(Eax), addr], "minus");
            }
        }
        self.op_c(
            Op::Mov,
            vec![addr, Reg(Eax)],
            format!("assign {}", target.name),
        );
    }

    fn binary(&mut self, op: BinOp, left: &Expr, right: &Expr) {
        if op.is_logical() {
            self.logical(op, left, right);
        } else if op.is_compare() {
            self.compare(op, left, right);
        } else {
            self.arithmetic(op, left, right);
        }
    }

    /// The direct operand form of a zero-register expression.
    fn direct(&self, expr: &Expr) -> Operand {
        match &expr.kind {
            ExprKind::Constant(value) => Imm(*value),
            ExprKind::Ident(ident) => self.address(ident),
            _ => unreachable!("operands with a zero register estimate are constants or identifiers"),
        }
    }

    fn arithmetic(&mut self, op: BinOp, left: &Expr, right: &Expr) {
        if right.registers == 0 {
            self.arithmetic_l(op, left, right);
        } else if left.registers == 0 && op.is_commutative() {
            self.arithmetic_r(op, left, right);
        } else {
            self.arithmetic_rsl(op, left, right);
        }
    }

    fn arithmetic_l(&mut self, op: BinOp, left: &Expr, right: &Expr) {
        self.expr(left);
        let operand = self.direct(right);
        if op == BinOp::Div {
            self.op(Op::Cdq, vec![]);
            if let Imm(_) = operand {
                // idiv has no immediate form; spill the divisor
                let temp = self.allocate();
                self.op_c(Op::Mov, vec![temp, operand], "right temp");
                self.op_c(Op::Idiv, vec![temp], "calc (L)");
                self.release();
            } else {
                self.op_c(Op::Idiv, vec![operand], "calc (L)");
            }
        } else {
            self.op_c(arith_mnemonic(op), vec![Reg(Eax), operand], "calc (L)");
        }
    }

    fn arithmetic_r(&mut self, op: BinOp, left: &Expr, right: &Expr) {
        self.expr(right);
        let operand = self.direct(left);
        self.op_c(arith_mnemonic(op), vec![Reg(Eax), operand], "calc (R)");
    }

    fn arithmetic_rsl(&mut self, op: BinOp, left: &Expr, right: &Expr) {
        self.expr(right);
        let temp = self.allocate();
        self.op_c(Op::Mov, vec![temp, Reg(Eax)], "right temp");
        self.expr(left);
        if op == BinOp::Div {
            self.op(Op::Cdq, vec![]);
            self.op_c(Op::Idiv, vec![temp], "calc (RSL)");
        } else {
            self.op_c(arith_mnemonic(op), vec![Reg(Eax), temp], "calc (RSL)");
        }
        self.release();
    }

    fn compare(&mut self, op: BinOp, left: &Expr, right: &Expr) {
        if right.registers == 0 {
            self.expr(left);
            let operand = self.direct(right);
            self.op_c(Op::Cmp, vec![Reg(Eax), operand], "compare (L)");
        } else if left.registers == 0 && op.is_commutative() {
            self.expr(right);
            let operand = self.direct(left);
            self.op_c(Op::Cmp, vec![Reg(Eax), operand], "compare (R)");
        } else {
            self.expr(right);
            let temp = self.allocate();
            self.op_c(Op::Mov, vec![temp, Reg(Eax)], "right temp");
            self.expr(left);
            self.op_c(Op::Cmp, vec![Reg(Eax), temp], "compare (RSL)");
            self.release();
        }
        self.op_c(Op::Set(condition(op)), vec![Reg(Al)], "set flag");
        self.op(Op::Movzx, vec![Reg(Eax), Reg(Al)]);
    }

    /// Short-circuit `&&` and `||`, branching on a scratch slot that holds
    /// the value to compare against and, at the join, the result.
    fn logical(&mut self, op: BinOp, left: &Expr, right: &Expr) {
        let temp = self.allocate();
        let (prefix, early, late, probe, result) = match op {
            BinOp::And => ("and", 0, 1, "is false?", "logical and"),
            BinOp::Or => ("or", 1, 0, "is true?", "logical or"),
            _ => unreachable!("logical lowering takes && or ||"),
        };
        let join = self.new_label(prefix);
        let early_comment = if early == 0 { "false" } else { "true" };
        let late_comment = if late == 0 { "false" } else { "true" };

        self.op_c(Op::Mov, vec![temp, Imm(early)], early_comment);
        self.expr(left);
        self.op_c(Op::Cmp, vec![Reg(Eax), temp], probe);
        self.op(Op::Je, vec![LabelRef(join)]);
        self.expr(right);
        self.op_c(Op::Cmp, vec![Reg(Eax), temp], probe);
        self.op(Op::Je, vec![LabelRef(join)]);
        self.op_c(Op::Mov, vec![temp, Imm(late)], late_comment);
        self.label(join, false);
        self.op_c(Op::Mov, vec![Reg(Eax), temp], result);
    }

    fn call(&mut self, callee: &Ident, args: &[Expr]) {
        let label = mangled(callee.name);
        if self.callee_kind(callee) == Kind::UndefinedFunction {
            self.emit(Item::Directive(Directive::Extern(label)));
        }

        // cdecl: arguments are pushed right to left
        for (index, arg) in args.iter().enumerate().rev() {
            let comment = format!("argument {}", index + 1);
            match &arg.kind {
                ExprKind::Constant(value) => self.op_c(Op::Push, vec![Imm(*value)], comment),
                ExprKind::Ident(ident) if self.frame_offset(ident).is_some() => {
                    let addr = self.address(ident);
                    self.op_c(Op::Push, vec![addr], comment);
                }
                _ => {
                    self.expr(arg);
                    self.op_c(Op::Push, vec![Reg(Eax)], comment);
                }
            }
        }

        self.op(Op::Call, vec![LabelRef(label)]);
        self.op_c(
            Op::Add,
            vec![Reg(Esp), Imm(4 * args.len() as i32)],
            "Release argument stack",
        );
    }

    /// The callee's kind as recorded on its symbol entry, which is current
    /// even when a forward-call stub was later upgraded by a definition.
    fn callee_kind(&self, callee: &Ident) -> Kind {
        callee
            .symbol
            .map_or(callee.kind, |id| self.symbols[id].kind)
    }

    fn frame_offset(&self, ident: &Ident) -> Option<i32> {
        ident.symbol.and_then(|id| self.symbols[id].offset)
    }
}

fn mangled(name: Id) -> Label {
    Label(Id::new(format!("_{name}")))
}

fn arith_mnemonic(op: BinOp) -> Op {
    match op {
        BinOp::Add => Op::Add,
        BinOp::Sub => Op::Sub,
        BinOp::Mul => Op::Imul,
        BinOp::Div => Op::Idiv,
        _ => unreachable!("not an arithmetic operator: {op}"),
    }
}

fn condition(op: BinOp) -> Cond {
    match op {
        BinOp::Eq => Cond::E,
        BinOp::Ne => Cond::Ne,
        BinOp::Lt => Cond::L,
        BinOp::Le => Cond::Le,
        BinOp::Gt => Cond::G,
        BinOp::Ge => Cond::Ge,
        _ => unreachable!("not a comparison operator: {op}"),
    }
}
