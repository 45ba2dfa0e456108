//! The parser.
//!
//! A recursive-descent parser over the token stream.  Syntax errors are
//! reported as diagnostics and recovery skips to the next `;` or `}`, so a
//! single run surfaces every error it can.  The returned [Program] is
//! partial when errors occurred; the driver never lowers such a program.

use crate::common::{Diagnostics, Id};

use super::ast::*;
use super::lex::{tokenize, Token, TokenKind};

pub fn parse(source: &str, diags: &mut Diagnostics) -> Program {
    let tokens = tokenize(source, diags);
    Parser {
        tokens,
        pos: 0,
        diags,
    }
    .program()
}

/// Raised internally on a syntax error after it has been reported; callers
/// unwind to the nearest recovery point.
struct SyntaxError;

type Parsed<T> = Result<T, SyntaxError>;

struct Parser<'src, 'd> {
    tokens: Vec<Token<'src>>,
    pos: usize,
    diags: &'d mut Diagnostics,
}

impl<'src> Parser<'src, '_> {
    fn program(mut self) -> Program {
        let mut items = Vec::new();
        while !self.at_end() {
            match self.external_declaration() {
                Ok(item) => items.push(item),
                Err(SyntaxError) => self.recover(),
            }
        }
        Program { items }
    }

    /// `declaration` and `function_definition` share the `int declarator`
    /// prefix; the token after the first declarator decides which one it is.
    fn external_declaration(&mut self) -> Parsed<ExternalDeclaration> {
        self.expect(TokenKind::Int)?;
        let declarator = self.declarator()?;

        if self.at(TokenKind::LParen) {
            self.bump();
            let parameters = self.parameter_list()?;
            self.expect(TokenKind::RParen)?;
            let body = self.compound()?;
            Ok(ExternalDeclaration::Function(FunctionDefinition {
                declarator,
                parameters,
                body,
            }))
        } else {
            let mut declarators = vec![declarator];
            while self.at(TokenKind::Comma) {
                self.bump();
                declarators.push(self.declarator()?);
            }
            self.expect(TokenKind::Semicolon)?;
            Ok(ExternalDeclaration::Declaration(Declaration { declarators }))
        }
    }

    fn declaration(&mut self) -> Parsed<Declaration> {
        self.expect(TokenKind::Int)?;
        let mut declarators = vec![self.declarator()?];
        while self.at(TokenKind::Comma) {
            self.bump();
            declarators.push(self.declarator()?);
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(Declaration { declarators })
    }

    fn declarator(&mut self) -> Parsed<Declarator> {
        Ok(Declarator {
            ident: self.identifier()?,
        })
    }

    fn parameter_list(&mut self) -> Parsed<Vec<ParameterDeclaration>> {
        let mut parameters = Vec::new();
        if self.at(TokenKind::RParen) {
            return Ok(parameters);
        }
        loop {
            self.expect(TokenKind::Int)?;
            parameters.push(ParameterDeclaration {
                declarator: self.declarator()?,
            });
            if !self.at(TokenKind::Comma) {
                return Ok(parameters);
            }
            self.bump();
        }
    }

    /// `{ declaration* statement* }`; declarations always precede the
    /// statements of a block.
    fn compound(&mut self) -> Parsed<Compound> {
        self.expect(TokenKind::LBrace)?;
        let mut declarations = Vec::new();
        while self.at(TokenKind::Int) {
            match self.declaration() {
                Ok(declaration) => declarations.push(declaration),
                Err(SyntaxError) => self.recover_in_block(),
            }
        }
        let mut statements = Vec::new();
        while !self.at(TokenKind::RBrace) && !self.at_end() {
            match self.statement() {
                Ok(statement) => statements.push(statement),
                Err(SyntaxError) => self.recover_in_block(),
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Compound {
            declarations,
            statements,
        })
    }

    fn statement(&mut self) -> Parsed<Stmt> {
        match self.kind() {
            Some(TokenKind::Semicolon) => {
                self.bump();
                Ok(Stmt::Empty)
            }
            Some(TokenKind::LBrace) => Ok(Stmt::Compound(self.compound()?)),
            Some(TokenKind::If) => {
                self.bump();
                self.expect(TokenKind::LParen)?;
                let cond = self.expr()?;
                self.expect(TokenKind::RParen)?;
                let then = Box::new(self.statement()?);
                // `else` binds to the nearest `if`
                let els = if self.at(TokenKind::Else) {
                    self.bump();
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If { cond, then, els })
            }
            Some(TokenKind::While) => {
                self.bump();
                self.expect(TokenKind::LParen)?;
                let cond = self.expr()?;
                self.expect(TokenKind::RParen)?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { cond, body })
            }
            Some(TokenKind::Return) => {
                self.bump();
                let expr = self.expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Return(expr))
            }
            _ => {
                let expr = self.expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions, one method per precedence level.
    // ------------------------------------------------------------------

    fn expr(&mut self) -> Parsed<Expr> {
        self.assign()
    }

    fn assign(&mut self) -> Parsed<Expr> {
        if self.at(TokenKind::Id) {
            let op = match self.kind_ahead(1) {
                Some(TokenKind::Equals) => Some(AssignOp::Assign),
                Some(TokenKind::PlusEq) => Some(AssignOp::AddAssign),
                Some(TokenKind::MinusEq) => Some(AssignOp::SubAssign),
                _ => None,
            };
            if let Some(op) = op {
                let target = self.identifier()?;
                self.bump();
                let value = Box::new(self.assign()?);
                return Ok(Expr::new(ExprKind::Assign { op, target, value }));
            }
        }
        self.logical_or()
    }

    fn logical_or(&mut self) -> Parsed<Expr> {
        let mut left = self.logical_and()?;
        while self.at(TokenKind::LOr) {
            self.bump();
            left = binary(BinOp::Or, left, self.logical_and()?);
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Parsed<Expr> {
        let mut left = self.equality()?;
        while self.at(TokenKind::LAnd) {
            self.bump();
            left = binary(BinOp::And, left, self.equality()?);
        }
        Ok(left)
    }

    fn equality(&mut self) -> Parsed<Expr> {
        let mut left = self.relational()?;
        loop {
            let op = match self.kind() {
                Some(TokenKind::Eq) => BinOp::Eq,
                Some(TokenKind::Neq) => BinOp::Ne,
                _ => return Ok(left),
            };
            self.bump();
            left = binary(op, left, self.relational()?);
        }
    }

    fn relational(&mut self) -> Parsed<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = match self.kind() {
                Some(TokenKind::Lt) => BinOp::Lt,
                Some(TokenKind::Lte) => BinOp::Le,
                Some(TokenKind::Gt) => BinOp::Gt,
                Some(TokenKind::Gte) => BinOp::Ge,
                _ => return Ok(left),
            };
            self.bump();
            left = binary(op, left, self.additive()?);
        }
    }

    fn additive(&mut self) -> Parsed<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.bump();
            left = binary(op, left, self.multiplicative()?);
        }
    }

    fn multiplicative(&mut self) -> Parsed<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.kind() {
                Some(TokenKind::Mult) => BinOp::Mul,
                Some(TokenKind::Div) => BinOp::Div,
                _ => return Ok(left),
            };
            self.bump();
            left = binary(op, left, self.unary()?);
        }
    }

    fn unary(&mut self) -> Parsed<Expr> {
        match self.kind() {
            Some(TokenKind::Minus) => {
                self.bump();
                let expr = Box::new(self.unary()?);
                Ok(Expr::new(ExprKind::Unary {
                    op: UnaryOp::Neg,
                    expr,
                }))
            }
            // `++` and `--` apply to identifiers only
            Some(TokenKind::Inc) => {
                self.bump();
                let ident = self.identifier()?;
                Ok(Expr::new(ExprKind::Unary {
                    op: UnaryOp::PreInc,
                    expr: Box::new(Expr::new(ExprKind::Ident(ident))),
                }))
            }
            Some(TokenKind::Dec) => {
                self.bump();
                let ident = self.identifier()?;
                Ok(Expr::new(ExprKind::Unary {
                    op: UnaryOp::PreDec,
                    expr: Box::new(Expr::new(ExprKind::Ident(ident))),
                }))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Parsed<Expr> {
        if self.at(TokenKind::Id) && self.kind_ahead(1) == Some(TokenKind::LParen) {
            let callee = self.identifier()?;
            let line = callee.line;
            self.bump();
            let mut args = Vec::new();
            if !self.at(TokenKind::RParen) {
                loop {
                    args.push(self.assign()?);
                    if !self.at(TokenKind::Comma) {
                        break;
                    }
                    self.bump();
                }
            }
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::new(ExprKind::Call { callee, args, line }));
        }
        self.primary()
    }

    fn primary(&mut self) -> Parsed<Expr> {
        match self.kind() {
            Some(TokenKind::Id) => Ok(Expr::new(ExprKind::Ident(self.identifier()?))),
            Some(TokenKind::Constant) => {
                let token = self.expect(TokenKind::Constant)?;
                match token.text().parse::<i32>() {
                    Ok(value) => Ok(Expr::constant(value)),
                    Err(_) => {
                        self.diags.error(format!(
                            "Line {}: Constant '{}' out of range.",
                            token.line(),
                            token.text()
                        ));
                        Err(SyntaxError)
                    }
                }
            }
            Some(TokenKind::LParen) => {
                self.bump();
                let expr = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            _ => Err(self.syntax_error()),
        }
    }

    fn identifier(&mut self) -> Parsed<Ident> {
        let token = self.expect(TokenKind::Id)?;
        Ok(Ident::new(Id::new(token.text().to_string()), token.line()))
    }

    // ------------------------------------------------------------------
    // Token-stream plumbing.
    // ------------------------------------------------------------------

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<Token<'src>> {
        self.tokens.get(self.pos).copied()
    }

    fn kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind())
    }

    fn kind_ahead(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + n).map(Token::kind)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.kind() == Some(kind)
    }

    fn bump(&mut self) -> Option<Token<'src>> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Parsed<Token<'src>> {
        if self.at(kind) {
            match self.bump() {
                Some(token) => Ok(token),
                None => Err(self.syntax_error()),
            }
        } else {
            Err(self.syntax_error())
        }
    }

    fn syntax_error(&mut self) -> SyntaxError {
        match self.peek() {
            Some(token) => {
                self.diags.error(format!(
                    "Line {}: Syntax error at '{}'.",
                    token.line(),
                    token.text()
                ));
            }
            None => {
                let line = self.tokens.last().map_or(1, |t| t.line());
                self.diags
                    .error(format!("Line {line}: Syntax error at end of input."));
            }
        }
        SyntaxError
    }

    /// Panic-mode recovery at top level: skip past the next `;` or `}`.
    fn recover(&mut self) {
        while let Some(token) = self.bump() {
            if matches!(token.kind(), TokenKind::Semicolon | TokenKind::RBrace) {
                return;
            }
        }
    }

    /// Recovery inside a block: consume through the next `;`, but stop in
    /// front of `}` so the enclosing compound still sees its close brace.
    fn recover_in_block(&mut self) {
        loop {
            match self.kind() {
                None | Some(TokenKind::RBrace) => return,
                Some(TokenKind::Semicolon) => {
                    self.bump();
                    return;
                }
                _ => {
                    self.bump();
                }
            }
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::new(ExprKind::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_clean(source: &str) -> Program {
        let mut diags = Diagnostics::default();
        let program = parse(source, &mut diags);
        assert_eq!(diags.errors(), 0, "{:?}", diags.messages());
        program
    }

    #[test]
    fn declarations_and_functions_share_a_prefix() {
        let program = parse_clean("int x, y; int main() { return 0; }");
        assert_eq!(program.items.len(), 2);
        assert!(matches!(program.items[0], ExternalDeclaration::Declaration(ref d) if d.declarators.len() == 2));
        assert!(matches!(program.items[1], ExternalDeclaration::Function(_)));
    }

    #[test]
    fn precedence_nests_multiplication_below_addition() {
        let program = parse_clean("int main() { return 1 + 2 * 3; }");
        let ExternalDeclaration::Function(f) = &program.items[0] else {
            panic!("expected a function");
        };
        let Stmt::Return(expr) = &f.body.statements[0] else {
            panic!("expected a return");
        };
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("expected a binary expression");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn else_binds_to_the_nearest_if() {
        let program = parse_clean("int main() { if (1) if (2) return 1; else return 2; return 0; }");
        let ExternalDeclaration::Function(f) = &program.items[0] else {
            panic!("expected a function");
        };
        let Stmt::If { then, els, .. } = &f.body.statements[0] else {
            panic!("expected an if");
        };
        assert!(els.is_none());
        assert!(matches!(**then, Stmt::If { els: Some(_), .. }));
    }

    #[test]
    fn assignment_is_right_associative() {
        let program = parse_clean("int main() { int a, b; a = b = 1; return a; }");
        let ExternalDeclaration::Function(f) = &program.items[0] else {
            panic!("expected a function");
        };
        let Stmt::Expr(expr) = &f.body.statements[0] else {
            panic!("expected an expression statement");
        };
        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("expected an assignment");
        };
        assert!(matches!(value.kind, ExprKind::Assign { .. }));
    }

    #[test]
    fn recovery_reports_every_error_in_one_run() {
        let mut diags = Diagnostics::default();
        parse("int main() { return @; } int f( { return 0; }", &mut diags);
        assert!(diags.errors() >= 2, "{:?}", diags.messages());
    }

    #[test]
    fn constant_out_of_range_is_an_error() {
        let mut diags = Diagnostics::default();
        parse("int main() { return 99999999999; }", &mut diags);
        assert_eq!(diags.errors(), 1);
        assert!(diags.messages()[0].contains("out of range"));
    }
}
