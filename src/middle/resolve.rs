//! Symbol resolution.
//!
//! One walk over the AST classifies identifiers by context, inserts
//! declarations into the scoped table, and binds every use to its
//! [SymbolId](crate::common::SymbolId).  Scopes are pushed around function
//! definitions and compound statements, so a function's parameters live one
//! scope outside its body.
//!
//! All problems are reported as diagnostics and the walk continues; the
//! driver decides afterwards whether code generation may proceed.

use crate::common::{Diagnostics, Kind, SymbolId};
use crate::front::ast::*;

use super::symbol::{ScopeStack, Symbol, Symbols};

/// Resolve all identifiers in `program`, returning the symbol arena.
pub fn resolve(program: &mut Program, diags: &mut Diagnostics) -> Symbols {
    let mut resolver = Resolver {
        symbols: Symbols::default(),
        scopes: ScopeStack::new(),
        diags,
    };

    for item in &mut program.items {
        match item {
            ExternalDeclaration::Declaration(declaration) => resolver.declare_variables(declaration),
            ExternalDeclaration::Function(function) => resolver.function(function),
        }
    }

    resolver.symbols
}

struct Resolver<'d> {
    symbols: Symbols,
    scopes: ScopeStack,
    diags: &'d mut Diagnostics,
}

impl Resolver<'_> {
    fn function(&mut self, function: &mut FunctionDefinition) {
        let ident = &mut function.declarator.ident;
        ident.kind = Kind::Function;
        self.declare_function(ident);

        self.scopes.push();
        for parameter in &mut function.parameters {
            let ident = &mut parameter.declarator.ident;
            ident.kind = Kind::Parameter;
            self.declare_parameter(ident);
        }
        self.compound(&mut function.body);
        self.scopes.pop();
    }

    fn compound(&mut self, compound: &mut Compound) {
        self.scopes.push();
        for declaration in &mut compound.declarations {
            self.declare_variables(declaration);
        }
        for statement in &mut compound.statements {
            self.statement(statement);
        }
        self.scopes.pop();
    }

    fn statement(&mut self, statement: &mut Stmt) {
        match statement {
            Stmt::Empty => {}
            Stmt::Expr(expr) | Stmt::Return(expr) => self.expr(expr),
            Stmt::Compound(compound) => self.compound(compound),
            Stmt::If { cond, then, els } => {
                self.expr(cond);
                self.statement(then);
                if let Some(els) = els {
                    self.statement(els);
                }
            }
            Stmt::While { cond, body } => {
                self.expr(cond);
                self.statement(body);
            }
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::Constant(_) => {}
            ExprKind::Ident(ident) => self.resolve_use(ident),
            ExprKind::Unary { expr, .. } => self.expr(expr),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Assign { target, value, .. } => {
                self.resolve_use(target);
                self.expr(value);
            }
            ExprKind::Call { callee, args, .. } => {
                callee.kind = Kind::FunctionCall;
                self.resolve_use(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Declarations.
    // ------------------------------------------------------------------

    fn declare_variables(&mut self, declaration: &mut Declaration) {
        for declarator in &mut declaration.declarators {
            let ident = &mut declarator.ident;
            ident.kind = Kind::Variable;
            self.declare_variable(ident);
        }
    }

    fn declare_variable(&mut self, ident: &mut Ident) {
        if let Some(existing) = self.scopes.lookup(ident.name) {
            match self.symbols[existing].kind {
                Kind::Variable if self.scopes.lookup_current(ident.name).is_some() => {
                    self.redeclaration(ident);
                    return;
                }
                Kind::Function | Kind::UndefinedFunction => {
                    self.diags.error(format!(
                        "Line {}: '{}' is already declared as a function.",
                        ident.line, ident.name
                    ));
                    return;
                }
                Kind::Parameter => {
                    self.insert(ident);
                    self.diags.warning(format!(
                        "Line {}: Declaration of '{}' shadows parameter.",
                        ident.line, ident.name
                    ));
                    return;
                }
                _ => {}
            }
        }
        self.insert(ident);
    }

    fn declare_parameter(&mut self, ident: &mut Ident) {
        if let Some(existing) = self.scopes.lookup_current(ident.name) {
            if self.symbols[existing].kind == Kind::Parameter {
                self.redeclaration(ident);
                return;
            }
        }
        self.insert(ident);
    }

    fn declare_function(&mut self, ident: &mut Ident) {
        if let Some(existing) = self.scopes.lookup_current(ident.name) {
            match self.symbols[existing].kind {
                Kind::Variable | Kind::Function => {
                    self.redeclaration(ident);
                    return;
                }
                // A forward call synthesized a stub; the definition takes
                // the entry over so call sites and definition share it.
                Kind::UndefinedFunction => {
                    self.symbols[existing].kind = Kind::Function;
                    self.symbols[existing].line = ident.line;
                    ident.symbol = Some(existing);
                    return;
                }
                _ => {}
            }
        }
        self.insert(ident);
    }

    /// Insert a fresh symbol for `ident` at the current scope and bind the
    /// identifier to it.
    fn insert(&mut self, ident: &mut Ident) {
        let mut symbol = Symbol::new(ident.name, ident.kind, ident.line);
        symbol.level = self.scopes.level();
        let id = self.symbols.insert(symbol);
        self.scopes.bind(ident.name, id);
        ident.symbol = Some(id);
    }

    fn redeclaration(&mut self, ident: &Ident) {
        self.diags.error(format!(
            "Line {}: Redeclaration of identifier '{}'.",
            ident.line, ident.name
        ));
    }

    // ------------------------------------------------------------------
    // Uses.
    // ------------------------------------------------------------------

    fn resolve_use(&mut self, ident: &mut Ident) {
        match ident.kind {
            Kind::FunctionCall => self.resolve_call(ident),
            Kind::Fresh => self.resolve_variable(ident),
            // Declarators are bound at their declaration site.
            _ => {}
        }
    }

    fn resolve_call(&mut self, ident: &mut Ident) {
        match self.scopes.lookup(ident.name) {
            Some(id) => match self.symbols[id].kind {
                Kind::Function | Kind::UndefinedFunction => self.bind(ident, id),
                _ => {
                    ident.kind = Kind::Fresh;
                    self.diags.error(format!(
                        "Line {}: '{}' is not a function.",
                        ident.line, ident.name
                    ));
                }
            },
            None => {
                // Synthesize a stub at root scope so later calls (and a
                // later definition) agree on one entry.
                let symbol = Symbol::new(ident.name, Kind::UndefinedFunction, ident.line);
                let id = self.symbols.insert(symbol);
                self.scopes.bind_root(ident.name, id);
                self.bind(ident, id);
                self.diags.warning(format!(
                    "Line {}: Undeclared function '{}'.",
                    ident.line, ident.name
                ));
            }
        }
    }

    fn resolve_variable(&mut self, ident: &mut Ident) {
        match self.scopes.lookup(ident.name) {
            Some(id) => match self.symbols[id].kind {
                Kind::Variable | Kind::Parameter => self.bind(ident, id),
                _ => {
                    self.diags.error(format!(
                        "Line {}: '{}' is not a variable.",
                        ident.line, ident.name
                    ));
                }
            },
            None => {
                self.diags.error(format!(
                    "Line {}: Undeclared variable '{}'.",
                    ident.line, ident.name
                ));
            }
        }
    }

    fn bind(&mut self, ident: &mut Ident, id: SymbolId) {
        ident.symbol = Some(id);
        ident.kind = self.symbols[id].kind;
    }
}

#[cfg(test)]
mod tests {
    use crate::front::parse;

    use super::*;

    fn analyze(source: &str) -> (Program, Symbols, Diagnostics) {
        let mut diags = Diagnostics::default();
        let mut program = parse(source, &mut diags);
        assert_eq!(diags.errors(), 0, "parse failed: {:?}", diags.messages());
        let symbols = resolve(&mut program, &mut diags);
        (program, symbols, diags)
    }

    #[test]
    fn redeclaration_in_the_same_scope_is_an_error() {
        let (_, _, diags) = analyze("int main() { int a; int a; return 0; }");
        assert_eq!(diags.errors(), 1);
        assert_eq!(diags.warnings(), 0);
        assert!(diags.messages()[0].contains("Redeclaration of identifier 'a'"));
    }

    #[test]
    fn shadowing_in_a_nested_block_is_allowed() {
        let (_, _, diags) = analyze("int main() { int a; { int a; a = 1; } return 0; }");
        assert_eq!(diags.errors(), 0);
        assert_eq!(diags.warnings(), 0);
    }

    #[test]
    fn shadowing_a_parameter_warns_but_binds() {
        let (_, _, diags) = analyze("int f(int a) { int a; a = 1; return a; }");
        assert_eq!(diags.errors(), 0);
        assert_eq!(diags.warnings(), 1);
        assert!(diags.messages()[0].contains("shadows parameter"));
    }

    #[test]
    fn a_variable_may_not_reuse_a_function_name() {
        let (_, _, diags) = analyze("int f() { return 0; } int main() { int f; return 0; }");
        assert_eq!(diags.errors(), 1);
        assert!(diags.messages()[0].contains("already declared as a function"));
    }

    #[test]
    fn undeclared_variable_is_an_error() {
        let (_, _, diags) = analyze("int main() { return x; }");
        assert_eq!(diags.errors(), 1);
        assert!(diags.messages()[0].contains("Undeclared variable 'x'"));
    }

    #[test]
    fn undeclared_function_is_a_warning_with_a_root_stub() {
        let (program, symbols, diags) = analyze("int main() { return f(1); }");
        assert_eq!(diags.errors(), 0);
        assert_eq!(diags.warnings(), 1);
        assert!(diags.messages()[0].contains("Undeclared function 'f'"));

        let ExternalDeclaration::Function(main) = &program.items[0] else {
            panic!("expected a function");
        };
        let Stmt::Return(expr) = &main.body.statements[0] else {
            panic!("expected a return");
        };
        let ExprKind::Call { callee, .. } = &expr.kind else {
            panic!("expected a call");
        };
        let id = callee.symbol.unwrap();
        assert_eq!(symbols[id].kind, Kind::UndefinedFunction);
        assert_eq!(symbols[id].level, 0);
    }

    #[test]
    fn forward_calls_and_the_definition_share_one_entry() {
        let (program, symbols, _) =
            analyze("int main() { return g(1, 2); } int g(int a, int b) { return a + b; }");
        let ExternalDeclaration::Function(main) = &program.items[0] else {
            panic!("expected main");
        };
        let Stmt::Return(expr) = &main.body.statements[0] else {
            panic!("expected a return");
        };
        let ExprKind::Call { callee, .. } = &expr.kind else {
            panic!("expected a call");
        };
        let ExternalDeclaration::Function(g) = &program.items[1] else {
            panic!("expected g");
        };
        assert_eq!(callee.symbol, g.declarator.ident.symbol);
        assert_eq!(symbols[callee.symbol.unwrap()].kind, Kind::Function);
    }

    #[test]
    fn calling_a_variable_is_an_error() {
        let (_, _, diags) = analyze("int main() { int a; return a(); }");
        assert_eq!(diags.errors(), 1);
        assert!(diags.messages()[0].contains("'a' is not a function"));
    }

    #[test]
    fn using_a_function_as_a_variable_is_an_error() {
        let (_, _, diags) = analyze("int f() { return 0; } int main() { return f + 1; }");
        assert_eq!(diags.errors(), 1);
        assert!(diags.messages()[0].contains("'f' is not a variable"));
    }
}
