//! The abstract syntax tree.
//!
//! Nodes are closed sum types; each analysis pass is a match over variants
//! with recursion into children as the default behavior.  Optional slots
//! (an absent else-branch, an empty parameter list) use `Option` and empty
//! vectors.  Identifier occurrences carry the annotations the passes
//! install: a [Kind] tag and, after resolution, the [SymbolId] of the
//! entry they are bound to.

use derive_more::Display;

use crate::common::{Id, Kind, SymbolId};

#[derive(Debug)]
pub struct Program {
    pub items: Vec<ExternalDeclaration>,
}

/// A top-level item: a global declaration or a function definition.
#[derive(Debug)]
pub enum ExternalDeclaration {
    Declaration(Declaration),
    Function(FunctionDefinition),
}

/// `int a, b, c;` at global or local scope.
#[derive(Debug)]
pub struct Declaration {
    pub declarators: Vec<Declarator>,
}

#[derive(Debug)]
pub struct Declarator {
    pub ident: Ident,
}

#[derive(Debug)]
pub struct FunctionDefinition {
    pub declarator: Declarator,
    pub parameters: Vec<ParameterDeclaration>,
    pub body: Compound,
}

#[derive(Debug)]
pub struct ParameterDeclaration {
    pub declarator: Declarator,
}

/// A braced block: declarations first, then statements.
#[derive(Debug, Default)]
pub struct Compound {
    pub declarations: Vec<Declaration>,
    pub statements: Vec<Stmt>,
}

#[derive(Debug)]
pub enum Stmt {
    /// A lone `;`.
    Empty,
    Expr(Expr),
    Compound(Compound),
    If {
        cond: Expr,
        then: Box<Stmt>,
        els: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Return(Expr),
}

/// An expression together with its register-need estimate.
///
/// `registers` is 0 when the value has a direct operand form (a constant or
/// a frame-resident variable) and 1 when evaluating it occupies `eax`.  The
/// estimation pass fills it in; the code generator picks evaluation shapes
/// from it.
#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub registers: u8,
}

#[derive(Debug)]
pub enum ExprKind {
    Constant(i32),
    Ident(Ident),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Ident,
        value: Box<Expr>,
    },
    Call {
        callee: Ident,
        args: Vec<Expr>,
        line: u32,
    },
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr { kind, registers: 0 }
    }

    pub fn constant(value: i32) -> Self {
        Expr::new(ExprKind::Constant(value))
    }
}

/// An identifier occurrence.
#[derive(Debug)]
pub struct Ident {
    pub name: Id,
    pub line: u32,
    pub kind: Kind,
    pub symbol: Option<SymbolId>,
}

impl Ident {
    pub fn new(name: Id, line: u32) -> Self {
        Ident {
            name,
            line,
            kind: Kind::Fresh,
            symbol: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum UnaryOp {
    #[display("-")]
    Neg,
    #[display("++")]
    PreInc,
    #[display("--")]
    PreDec,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum BinOp {
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("&&")]
    And,
    #[display("||")]
    Or,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
}

impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    pub fn is_compare(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    /// Operand order does not matter for these, which admits the cheaper
    /// right-first evaluation shape.
    pub fn is_commutative(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul | BinOp::Eq | BinOp::Ne)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum AssignOp {
    #[display("=")]
    Assign,
    #[display("+=")]
    AddAssign,
    #[display("-=")]
    SubAssign,
}
