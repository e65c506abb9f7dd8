//! Error types for every compiler stage.

use thiserror::Error;

use crate::token::TokenKind;

/// A specialized Result type for the reducer and generator stages.
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors raised while turning source text into tokens.
///
/// Lexing stops at the first error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexError {
    /// A character that cannot start any token.
    #[error("unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },

    /// A string literal without its closing quote.
    #[error("unterminated string literal starting at position {position}")]
    UnterminatedString { position: usize },

    /// A bare word that is not a keyword.
    #[error("\"{word}\" at position {position} is not a keyword; did you mean to put it in quotes?")]
    UnknownWord { word: String, position: usize },
}

impl LexError {
    /// Byte offset of the offending input.
    pub fn position(&self) -> usize {
        match self {
            LexError::UnexpectedCharacter { position, .. }
            | LexError::UnterminatedString { position }
            | LexError::UnknownWord { position, .. } => *position,
        }
    }
}

/// A grammar violation, or input nested past the parser's limits.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// No alternative matches the lookahead token.
    #[error("expected {} at position {position}, found {found}", describe_expected(.expected))]
    UnexpectedToken {
        position: usize,
        /// Token kinds that would have been accepted here.
        expected: Vec<TokenKind>,
        found: TokenKind,
    },

    /// Parentheses nested more than `limit` levels deep.
    #[error("parentheses nested deeper than {limit} levels at position {position}")]
    NestingTooDeep { position: usize, limit: usize },

    /// A single `expr(...)` with more than `limit` arithmetic operators.
    #[error("more than {limit} arithmetic operators in one expression at position {position}")]
    ExpressionTooLong { position: usize, limit: usize },
}

impl ParseError {
    pub fn new(position: usize, expected: Vec<TokenKind>, found: TokenKind) -> Self {
        ParseError::UnexpectedToken {
            position,
            expected,
            found,
        }
    }

    /// Byte offset of the token the parser stopped at.
    pub fn position(&self) -> usize {
        match self {
            ParseError::UnexpectedToken { position, .. }
            | ParseError::NestingTooDeep { position, .. }
            | ParseError::ExpressionTooLong { position, .. } => *position,
        }
    }
}

fn describe_expected(expected: &[TokenKind]) -> String {
    match expected {
        [] => "nothing".to_string(),
        [only] => only.describe().to_string(),
        [init @ .., last] => {
            let init: Vec<_> = init.iter().map(|kind| kind.describe()).collect();
            format!("{} or {}", init.join(", "), last.describe())
        }
    }
}

/// Every way a compilation can fail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The CST has a shape the grammar cannot produce.
    #[error("internal reduction error: {message}")]
    Reduction { message: String },

    /// The field metadata lookup could not resolve a field.
    #[error("unknown field \"{field_id}\": {reason}")]
    UnknownField { field_id: String, reason: String },

    /// A literal cannot be used with the comparison it appears in.
    #[error("malformed value for field \"{field_id}\": {reason}")]
    MalformedValue { field_id: String, reason: String },
}

impl CompileError {
    pub fn reduction(message: impl Into<String>) -> Self {
        CompileError::Reduction {
            message: message.into(),
        }
    }

    pub fn unknown_field(field_id: impl Into<String>, reason: impl Into<String>) -> Self {
        CompileError::UnknownField {
            field_id: field_id.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_value(field_id: impl Into<String>, reason: impl Into<String>) -> Self {
        CompileError::MalformedValue {
            field_id: field_id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_lists_expected_kinds() {
        let error = ParseError::new(
            12,
            vec![TokenKind::LParen, TokenKind::Value, TokenKind::Expr],
            TokenKind::Eof,
        );
        assert_eq!(
            error.to_string(),
            "expected '(', 'value' or 'expr' at position 12, found end of input"
        );
    }

    #[test]
    fn test_lex_error_position() {
        let error = LexError::UnexpectedCharacter {
            character: '#',
            position: 7,
        };
        assert_eq!(error.position(), 7);
        assert_eq!(error.to_string(), "unexpected character '#' at position 7");
    }

    #[test]
    fn test_stage_errors_convert_into_compile_error() {
        let error: CompileError = LexError::UnterminatedString { position: 3 }.into();
        assert!(matches!(error, CompileError::Lex(_)));

        let error: CompileError = ParseError::new(0, vec![TokenKind::Eof], TokenKind::RParen).into();
        assert!(matches!(error, CompileError::Parse(_)));
    }

    #[test]
    fn test_nesting_error_message() {
        let error = ParseError::NestingTooDeep {
            position: 64,
            limit: 64,
        };
        assert_eq!(error.position(), 64);
        assert_eq!(
            error.to_string(),
            "parentheses nested deeper than 64 levels at position 64"
        );
    }
}
