//! Human-readable AST dump.

use super::ast::*;

/// Render the tree in an indented outline, one node per `+` line with its
/// scalar attributes beneath it.
pub fn print(program: &Program) -> String {
    let mut printer = Printer::default();
    printer.node("Program");
    printer.nested("Items", |p| {
        for item in &program.items {
            match item {
                ExternalDeclaration::Declaration(declaration) => p.declaration(declaration),
                ExternalDeclaration::Function(function) => p.function(function),
            }
        }
    });
    printer.text
}

#[derive(Default)]
struct Printer {
    text: String,
    indent: usize,
}

impl Printer {
    fn write(&mut self, line: &str) {
        self.text.push_str(&"  ".repeat(self.indent));
        self.text.push_str(line);
        self.text.push('\n');
    }

    fn node(&mut self, name: &str) {
        self.write(&format!("+ {name}"));
    }

    fn attr(&mut self, key: &str, value: impl std::fmt::Display) {
        self.write(&format!("  {key}: {value}"));
    }

    /// A labelled child section, indented one step.
    fn nested(&mut self, label: &str, body: impl FnOnce(&mut Self)) {
        self.write(&format!("  {label}:"));
        self.indent += 2;
        body(self);
        self.indent -= 2;
    }

    fn declaration(&mut self, declaration: &Declaration) {
        self.node("Declaration");
        self.nested("Declarators", |p| {
            for declarator in &declaration.declarators {
                p.declarator(declarator);
            }
        });
    }

    fn declarator(&mut self, declarator: &Declarator) {
        self.node("Declarator");
        self.nested("Identifier", |p| p.ident(&declarator.ident));
    }

    fn function(&mut self, function: &FunctionDefinition) {
        self.node("FunctionDefinition");
        self.nested("Declarator", |p| p.declarator(&function.declarator));
        if !function.parameters.is_empty() {
            self.nested("Parameters", |p| {
                for parameter in &function.parameters {
                    p.node("ParameterDeclaration");
                    p.nested("Declarator", |p| p.declarator(&parameter.declarator));
                }
            });
        }
        self.nested("Body", |p| p.compound(&function.body));
    }

    fn compound(&mut self, compound: &Compound) {
        self.node("CompoundStatement");
        if !compound.declarations.is_empty() {
            self.nested("Declarations", |p| {
                for declaration in &compound.declarations {
                    p.declaration(declaration);
                }
            });
        }
        if !compound.statements.is_empty() {
            self.nested("Statements", |p| {
                for statement in &compound.statements {
                    p.statement(statement);
                }
            });
        }
    }

    fn statement(&mut self, statement: &Stmt) {
        match statement {
            Stmt::Empty => self.node("EmptyStatement"),
            Stmt::Expr(expr) => {
                self.node("ExpressionStatement");
                self.nested("Expression", |p| p.expr(expr));
            }
            Stmt::Compound(compound) => self.compound(compound),
            Stmt::If { cond, then, els } => {
                self.node("IfStatement");
                self.nested("Condition", |p| p.expr(cond));
                self.nested("Then", |p| p.statement(then));
                if let Some(els) = els {
                    self.nested("Else", |p| p.statement(els));
                }
            }
            Stmt::While { cond, body } => {
                self.node("WhileLoop");
                self.nested("Condition", |p| p.expr(cond));
                self.nested("Body", |p| p.statement(body));
            }
            Stmt::Return(expr) => {
                self.node("ReturnStatement");
                self.nested("Expression", |p| p.expr(expr));
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Constant(value) => {
                self.node("Constant");
                self.attr("value", value);
            }
            ExprKind::Ident(ident) => self.ident(ident),
            ExprKind::Unary { op, expr } => {
                self.node("UnaryOperator");
                self.attr("op", op);
                self.nested("Expression", |p| p.expr(expr));
            }
            ExprKind::Binary { op, left, right } => {
                self.node("BinaryOperator");
                self.attr("op", op);
                self.nested("Left", |p| p.expr(left));
                self.nested("Right", |p| p.expr(right));
            }
            ExprKind::Assign { op, target, value } => {
                self.node("Assignment");
                self.attr("op", op);
                self.nested("Target", |p| p.ident(target));
                self.nested("Value", |p| p.expr(value));
            }
            ExprKind::Call { callee, args, .. } => {
                self.node("FunctionExpression");
                self.nested("Function", |p| p.ident(callee));
                if !args.is_empty() {
                    self.nested("Arguments", |p| {
                        for arg in args {
                            p.expr(arg);
                        }
                    });
                }
            }
        }
    }

    fn ident(&mut self, ident: &Ident) {
        self.node("Identifier");
        self.attr("name", ident.name);
        self.attr("line", ident.line);
        self.attr("kind", ident.kind);
    }
}

#[cfg(test)]
mod tests {
    use crate::common::Diagnostics;
    use crate::front::parse;

    use super::*;

    #[test]
    fn dump_shows_nodes_and_attributes() {
        let mut diags = Diagnostics::default();
        let program = parse("int main() { return 1 + 2; }", &mut diags);
        let dump = print(&program);
        assert!(dump.contains("+ FunctionDefinition"));
        assert!(dump.contains("name: main"));
        assert!(dump.contains("op: +"));
        assert!(dump.contains("+ ReturnStatement"));
    }
}
