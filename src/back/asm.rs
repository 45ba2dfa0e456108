//! The 32-bit x86 (NASM syntax) assembly IR.
//!
//! The code generator produces a flat stream of [Item]s; the peephole
//! optimizers rewrite it; [render] turns it into text.  There is no
//! register allocator: every value is computed in `eax` and spilled to the
//! frame when a second one is live, so only the four registers below ever
//! appear in operands.
//!
//! # Rendering conventions
//!
//! Instructions are indented four spaces with the mnemonic padded to 11
//! columns.  NASM needs an operand-size qualifier when no register operand
//! implies one, so ` dword` is appended to the mnemonic exactly when the
//! argument list is non-empty and contains neither a register nor a label
//! reference.  Memory operands render with an explicit sign, `[ebp-4]` or
//! `[esp+0]`.

use derive_more::Display;

use crate::common::Id;

use Operand::*;
use Register::*;

/// Registers that can appear in operands.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Register {
    #[display("al")]
    Al,
    #[display("eax")]
    Eax,
    #[display("ebp")]
    Ebp,
    #[display("esp")]
    Esp,
}

/// Condition codes, as spelled in `set` instructions.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Cond {
    #[display("e")]
    E,
    #[display("ne")]
    Ne,
    #[display("l")]
    L,
    #[display("le")]
    Le,
    #[display("g")]
    G,
    #[display("ge")]
    Ge,
}

/// Instruction mnemonics.  A closed set: everything the generator and the
/// rewriters can produce.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Op {
    #[display("mov")]
    Mov,
    #[display("movzx")]
    Movzx,
    #[display("push")]
    Push,
    #[display("pop")]
    Pop,
    #[display("add")]
    Add,
    #[display("sub")]
    Sub,
    #[display("imul")]
    Imul,
    #[display("idiv")]
    Idiv,
    #[display("cdq")]
    Cdq,
    #[display("neg")]
    Neg,
    #[display("inc")]
    Inc,
    #[display("dec")]
    Dec,
    #[display("cmp")]
    Cmp,
    #[display("xor")]
    Xor,
    #[display("set{_0}")]
    Set(Cond),
    #[display("je")]
    Je,
    #[display("jmp")]
    Jmp,
    #[display("call")]
    Call,
    #[display("ret")]
    Ret,
}

/// A label name.  Interned, so copies are cheap and comparisons are by
/// value.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[display("{_0}")]
pub struct Label(pub Id);

impl Label {
    pub fn named(name: &str) -> Label {
        Label(Id::new(name.to_string()))
    }
}

/// Instruction operands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operand {
    Imm(i32),
    Reg(Register),
    /// Base-plus-displacement memory access.
    Mem { base: Register, offset: i32 },
    /// A memory access through a data label, `[_x]`.
    Data(Label),
    /// A label used as a jump or call target.
    LabelRef(Label),
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Imm(value) => write!(f, "{value}"),
            Reg(register) => write!(f, "{register}"),
            Mem { base, offset } => write!(f, "[{base}{offset:+}]"),
            Data(label) => write!(f, "[{label}]"),
            LabelRef(label) => write!(f, "{label}"),
        }
    }
}

/// One instruction: mnemonic, ordered operands, optional trailing comment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub args: Vec<Operand>,
    pub comment: Option<String>,
}

impl Instruction {
    pub fn new(op: Op, args: Vec<Operand>) -> Self {
        Instruction {
            op,
            args,
            comment: None,
        }
    }

    pub fn with_comment(op: Op, args: Vec<Operand>, comment: impl Into<String>) -> Self {
        Instruction {
            op,
            args,
            comment: Some(comment.into()),
        }
    }

    /// NASM can infer the operand size from a register operand and needs no
    /// size for plain jump targets; everything else gets `dword`.
    fn needs_width(&self) -> bool {
        !self.args.is_empty()
            && self
                .args
                .iter()
                .all(|arg| !matches!(arg, Reg(_) | LabelRef(_)))
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut op = self.op.to_string();
        if self.needs_width() {
            op.push_str(" dword");
        }
        let args = self
            .args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        match &self.comment {
            None => {
                let line = format!("    {op:<11} {args}");
                write!(f, "{}", line.trim_end())
            }
            Some(comment) => write!(f, "    {op:<11} {args:<15} ; {comment}"),
        }
    }
}

/// Assembler directives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Directive {
    Global(Label),
    Extern(Label),
    /// A zero-initialized common symbol of the given size in bytes.
    Common { label: Label, bytes: u32 },
    Section(Section),
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Section {
    #[display("text")]
    Text,
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Directive::Global(label) => write!(f, "    {:<11} {label}", "GLOBAL"),
            Directive::Extern(label) => write!(f, "    {:<11} {label}", "EXTERN"),
            Directive::Common { label, bytes } => {
                write!(f, "    {:<11} {label} {bytes}", "COMMON")
            }
            Directive::Section(section) => write!(f, "section .{section}"),
        }
    }
}

/// One element of the flat output stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Item {
    Code(Instruction),
    /// A label definition.  `global` marks exported labels, which the
    /// optimizers must neither alias nor delete.
    Label { label: Label, global: bool },
    Comment(String),
    Directive(Directive),
}

impl std::fmt::Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Item::Code(instruction) => write!(f, "{instruction}"),
            Item::Label { label, .. } => write!(f, "{label}:"),
            Item::Comment(text) => write!(f, "; {text}"),
            Item::Directive(directive) => write!(f, "{directive}"),
        }
    }
}

/// Render the item stream, one line per item, with a final newline.
pub fn render(code: &[Item]) -> String {
    let mut text = String::new();
    for item in code {
        text.push_str(&item.to_string());
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn register_operands_suppress_the_width_qualifier() {
        let code = Instruction::new(Op::Mov, vec![Reg(Eax), Imm(0)]);
        assert_eq!(code.to_string(), "    mov         eax, 0");
    }

    #[test]
    fn memory_and_immediate_operands_need_dword() {
        let code = Instruction::new(
            Op::Mov,
            vec![
                Mem {
                    base: Ebp,
                    offset: -4,
                },
                Imm(0),
            ],
        );
        assert_eq!(code.to_string(), "    mov dword   [ebp-4], 0");

        let push = Instruction::new(Op::Push, vec![Imm(2)]);
        assert_eq!(push.to_string(), "    push dword  2");
    }

    #[test]
    fn jump_targets_take_no_width() {
        let code = Instruction::new(Op::Jmp, vec![LabelRef(Label::named("while_test_1"))]);
        assert_eq!(code.to_string(), "    jmp         while_test_1");
    }

    #[test]
    fn zero_argument_instructions_have_no_trailing_padding() {
        assert_eq!(Instruction::new(Op::Ret, vec![]).to_string(), "    ret");
        assert_eq!(Instruction::new(Op::Cdq, vec![]).to_string(), "    cdq");
    }

    #[test]
    fn comments_sit_in_a_fixed_column() {
        let code = Instruction::with_comment(Op::Mov, vec![Reg(Eax), Imm(7)], "constant");
        assert_eq!(code.to_string(), "    mov         eax, 7          ; constant");
    }

    #[test]
    fn memory_operands_always_show_a_sign() {
        let above = Mem {
            base: Ebp,
            offset: 8,
        };
        let below = Mem {
            base: Ebp,
            offset: -4,
        };
        let zero = Mem {
            base: Esp,
            offset: 0,
        };
        assert_eq!(above.to_string(), "[ebp+8]");
        assert_eq!(below.to_string(), "[ebp-4]");
        assert_eq!(zero.to_string(), "[esp+0]");
    }

    #[test]
    fn directives_and_labels_render_as_lines() {
        let label = Label::named("_main");
        assert_eq!(
            Directive::Global(label).to_string(),
            "    GLOBAL      _main"
        );
        assert_eq!(
            Directive::Common { label, bytes: 4 }.to_string(),
            "    COMMON      _main 4"
        );
        assert_eq!(
            Directive::Section(Section::Text).to_string(),
            "section .text"
        );
        assert_eq!(
            Item::Label {
                label,
                global: true
            }
            .to_string(),
            "_main:"
        );
    }

    #[test]
    fn set_instructions_spell_their_condition() {
        let code = Instruction::new(Op::Set(Cond::Le), vec![Reg(Al)]);
        assert_eq!(code.to_string(), "    setle       al");
    }

    #[test]
    fn render_terminates_every_line() {
        let items = vec![
            Item::Directive(Directive::Section(Section::Text)),
            Item::Code(Instruction::new(Op::Ret, vec![])),
        ];
        assert_eq!(render(&items), "section .text\n    ret\n");
    }
}
