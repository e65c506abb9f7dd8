//! The token definition for the cohort query language.

use std::fmt;

/// A token is a single unit of the language, with a specific kind and location.
///
/// `lexeme` holds the literal value of the token: the unescaped contents for
/// string literals and the source text for everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            span,
        }
    }

    /// Byte offset where the token starts.
    pub fn position(&self) -> usize {
        self.span.start
    }
}

/// The kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Keywords
    Value,    // "value"
    Field,    // "field"
    Instance, // "instance"
    Array,    // "array"
    Any,      // "any"
    Expr,     // "expr"
    And,      // "AND"
    Or,       // "OR"

    // Literals
    String,
    Number,

    // Punctuation
    LParen, // (
    RParen, // )

    // Comparison operators
    Eq,     // =
    NotEq,  // !=
    Gt,     // >
    Lt,     // <
    Exists, // "exists"
    Count,  // "count"

    // Arithmetic operators, only meaningful inside expr(...)
    Plus,  // +
    Minus, // -
    Star,  // *
    Slash, // /

    // Special
    Eof, // End of input
}

impl TokenKind {
    pub fn is_comparison_operator(self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::NotEq
                | TokenKind::Gt
                | TokenKind::Lt
                | TokenKind::Exists
                | TokenKind::Count
        )
    }

    pub fn is_conjunction(self) -> bool {
        matches!(self, TokenKind::And | TokenKind::Or)
    }

    /// How the token kind reads in an error message.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Value => "'value'",
            TokenKind::Field => "'field'",
            TokenKind::Instance => "'instance'",
            TokenKind::Array => "'array'",
            TokenKind::Any => "'any'",
            TokenKind::Expr => "'expr'",
            TokenKind::And => "'AND'",
            TokenKind::Or => "'OR'",
            TokenKind::String => "string literal",
            TokenKind::Number => "number",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::Eq => "'='",
            TokenKind::NotEq => "'!='",
            TokenKind::Gt => "'>'",
            TokenKind::Lt => "'<'",
            TokenKind::Exists => "'exists'",
            TokenKind::Count => "'count'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Eof => "end of input",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
