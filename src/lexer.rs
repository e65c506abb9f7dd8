//! 查询语言的词法分析器
//!
//! 按以下优先级识别 token：带引号的字符串、数字、关键字、括号、比较运算符。
//! 空白字符在 token 之间被丢弃。遇到第一个无法识别的字符即停止。

use crate::error::LexError;
use crate::token::{Span, Token, TokenKind};

/// 关键字及其规范拼写
const KEYWORDS: &[(&str, TokenKind)] = &[
    ("value", TokenKind::Value),
    ("field", TokenKind::Field),
    ("instance", TokenKind::Instance),
    ("array", TokenKind::Array),
    ("any", TokenKind::Any),
    ("expr", TokenKind::Expr),
    ("AND", TokenKind::And),
    ("OR", TokenKind::Or),
    ("exists", TokenKind::Exists),
    ("count", TokenKind::Count),
];

pub struct Lexer<'a> {
    input: &'a str,
    /// 输入字符串中的当前位置（字节索引）
    position: usize,
    /// 为 true 时关键字必须使用规范拼写
    preserve_case: bool,
    /// 已经产生 Eof 或遇到错误
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            position: 0,
            preserve_case: true,
            finished: false,
        }
    }

    /// 设置关键字是否区分大小写。字符串字面量的内容在两种模式下都不会被改写。
    pub fn preserve_case(mut self, preserve_case: bool) -> Self {
        self.preserve_case = preserve_case;
        self
    }

    /// 将整个输入切分为 token 序列，最后一个 token 总是 Eof
    pub fn tokenize(self) -> Result<Vec<Token>, LexError> {
        self.collect()
    }

    /// 返回当前位置的字符，不推进位置
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// 返回下一个位置的字符，不推进位置
    fn peek_next(&self) -> Option<char> {
        self.input[self.position..].chars().nth(1)
    }

    /// 推进位置一个字符并返回该字符
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    /// 跳过空白字符
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn skip_digits(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// 以源文本作为 lexeme 构造 token
    fn token(&self, kind: TokenKind, start: usize) -> Token {
        Token::new(
            kind,
            &self.input[start..self.position],
            Span::new(start, self.position),
        )
    }

    /// 读取数字字面量：整数或小数，不处理符号
    fn read_number(&mut self, start: usize) -> Token {
        self.skip_digits();
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.bump(); // 消费 '.'
            self.skip_digits();
        }
        self.token(TokenKind::Number, start)
    }

    /// 读取双引号包围的字符串字面量，支持 `\"` 和 `\\` 转义
    /// 注意：开始的引号已经被调用者消费
    fn read_string(&mut self, start: usize) -> Result<Token, LexError> {
        let mut content = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some(escaped) => content.push(escaped),
                    None => return Err(LexError::UnterminatedString { position: start }),
                },
                Some(c) => content.push(c),
                None => return Err(LexError::UnterminatedString { position: start }),
            }
        }
        Ok(Token::new(
            TokenKind::String,
            content,
            Span::new(start, self.position),
        ))
    }

    /// 读取关键字。不带引号的非关键字单词是错误
    fn read_word(&mut self, start: usize) -> Result<Token, LexError> {
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let word = &self.input[start..self.position];
        match self.match_keyword(word) {
            Some(kind) => Ok(self.token(kind, start)),
            None => Err(LexError::UnknownWord {
                word: word.to_string(),
                position: start,
            }),
        }
    }

    fn match_keyword(&self, word: &str) -> Option<TokenKind> {
        KEYWORDS
            .iter()
            .find(|(spelling, _)| {
                if self.preserve_case {
                    *spelling == word
                } else {
                    spelling.eq_ignore_ascii_case(word)
                }
            })
            .map(|(_, kind)| *kind)
    }

    /// 返回下一个 token；到达输入末尾时返回 Eof
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();
        let start = self.position;

        let Some(c) = self.bump() else {
            return Ok(Token::new(TokenKind::Eof, "", Span::new(start, start)));
        };

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '=' => TokenKind::Eq,
            '>' => TokenKind::Gt,
            '<' => TokenKind::Lt,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::NotEq
                } else {
                    return Err(LexError::UnexpectedCharacter {
                        character: '!',
                        position: start,
                    });
                }
            }
            '"' => return self.read_string(start),
            c if c.is_ascii_digit() => return Ok(self.read_number(start)),
            c if c.is_alphabetic() => return self.read_word(start),
            other => {
                return Err(LexError::UnexpectedCharacter {
                    character: other,
                    position: start,
                })
            }
        };
        Ok(self.token(kind, start))
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_token();
        self.finished = match &result {
            Ok(token) => token.kind == TokenKind::Eof,
            Err(_) => true,
        };
        Some(result)
    }
}

/// 对查询字符串进行分词
pub fn tokenize(source: &str, preserve_case: bool) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).preserve_case(preserve_case).tokenize()
}
