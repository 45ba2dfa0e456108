//! The lexer.

use derive_more::Display;
use regex::Regex;

use crate::common::Diagnostics;

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    kind: TokenKind,
    /// What part of the input this token carries.
    text: &'src str,
    /// The 1-based source line the token starts on.
    line: u32,
}

impl<'src> Token<'src> {
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn text(&self) -> &'src str {
        self.text
    }

    pub fn line(&self) -> u32 {
        self.line
    }
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("constant")]
    Constant,
    #[display("int")]
    Int,
    #[display("if")]
    If,
    #[display("else")]
    Else,
    #[display("return")]
    Return,
    #[display("while")]
    While,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Mult,
    #[display("/")]
    Div,
    #[display("&&")]
    LAnd,
    #[display("||")]
    LOr,
    #[display("==")]
    Eq,
    #[display("!=")]
    Neq,
    #[display("<")]
    Lt,
    #[display("<=")]
    Lte,
    #[display(">")]
    Gt,
    #[display(">=")]
    Gte,
    #[display("++")]
    Inc,
    #[display("--")]
    Dec,
    #[display("=")]
    Equals,
    #[display("+=")]
    PlusEq,
    #[display("-=")]
    MinusEq,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display(",")]
    Comma,
    #[display(";")]
    Semicolon,
}

/// Keywords are lexed as identifiers first and reclassified here.
const KEYWORDS: [(&str, TokenKind); 5] = [
    ("int", TokenKind::Int),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("return", TokenKind::Return),
    ("while", TokenKind::While),
];

pub struct LexError(u32, char);

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Line {}: Illegal character '{}'.", self.0, self.1)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    line: u32,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;

        // Multi-character operators come before their single-character
        // prefixes so that e.g. `++` never lexes as two `+` tokens.
        let table: [(&str, TokenKind); 25] = [
            (r"\A&&", LAnd),
            (r"\A\|\|", LOr),
            (r"\A==", Eq),
            (r"\A!=", Neq),
            (r"\A<=", Lte),
            (r"\A>=", Gte),
            (r"\A\+\+", Inc),
            (r"\A--", Dec),
            (r"\A\+=", PlusEq),
            (r"\A-=", MinusEq),
            (r"\A\+", Plus),
            (r"\A-", Minus),
            (r"\A\*", Mult),
            (r"\A/", Div),
            (r"\A<", Lt),
            (r"\A>", Gt),
            (r"\A=", Equals),
            (r"\A\(", LParen),
            (r"\A\)", RParen),
            (r"\A\{", LBrace),
            (r"\A\}", RBrace),
            (r"\A,", Comma),
            (r"\A;", Semicolon),
            (r"\A[A-Za-z][A-Za-z0-9_]*", Id),
            (r"\A\d+", Constant),
        ];

        Lexer {
            input,
            pos: 0,
            line: 1,
            whitespace: Regex::new(r"\A(?:[ \t\r\n]+|/\*[\s\S]*?\*/)*").unwrap(),
            matchers: table
                .into_iter()
                .map(|(pattern, kind)| (Regex::new(pattern).unwrap(), kind))
                .collect(),
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.line += m.as_str().matches('\n').count() as u32;
            self.pos += m.end();
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    /// On an error the lexer has already skipped past the offending
    /// character, so the caller may keep calling `next`.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }

        let rest = &self.input[self.pos..];
        for (matcher, kind) in &self.matchers {
            if let Some(m) = matcher.find(rest) {
                let text = m.as_str();
                let kind = if *kind == TokenKind::Id {
                    KEYWORDS
                        .iter()
                        .find(|(word, _)| *word == text)
                        .map_or(TokenKind::Id, |(_, keyword)| *keyword)
                } else {
                    *kind
                };
                self.pos += m.end();
                return Ok(Some(Token {
                    kind,
                    text,
                    line: self.line,
                }));
            }
        }

        // Nothing matched; report the character and resume after it.
        let c = rest.chars().next().unwrap_or('\0');
        self.pos += c.len_utf8();
        Err(LexError(self.line, c))
    }
}

/// Lex the whole input, reporting illegal characters as diagnostics.
pub fn tokenize<'input>(input: &'input str, diags: &mut Diagnostics) -> Vec<Token<'input>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        match lexer.next() {
            Ok(Some(token)) => tokens.push(token),
            Ok(None) => break,
            Err(error) => diags.error(error),
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let mut diags = Diagnostics::default();
        let tokens = tokenize(input, &mut diags);
        assert_eq!(diags.errors(), 0);
        tokens.into_iter().map(|t| t.kind()).collect()
    }

    #[test]
    fn multi_character_operators_win() {
        use TokenKind::*;
        assert_eq!(kinds("++ += + -- -= - == = <= <"), [
            Inc, PlusEq, Plus, Dec, MinusEq, Minus, Eq, Equals, Lte, Lt,
        ]);
    }

    #[test]
    fn keywords_are_carved_out_of_identifiers() {
        use TokenKind::*;
        assert_eq!(kinds("int intx if iffy"), [Int, Id, If, Id]);
    }

    #[test]
    fn comments_and_newlines_advance_the_line_counter() {
        let mut diags = Diagnostics::default();
        let tokens = tokenize("a /* line\nline */ b\nc", &mut diags);
        let lines: Vec<u32> = tokens.iter().map(|t| t.line()).collect();
        assert_eq!(lines, [1, 2, 3]);
    }

    #[test]
    fn illegal_characters_are_reported_and_skipped() {
        let mut diags = Diagnostics::default();
        let tokens = tokenize("a @ b", &mut diags);
        assert_eq!(tokens.len(), 2);
        assert_eq!(diags.errors(), 1);
        assert_eq!(diags.messages()[0], "Error: Line 1: Illegal character '@'.");
    }
}
