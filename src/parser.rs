//! 查询语言的语法分析器
//!
//! ## 解析流程图
//!
//! ```text
//! parse()
//!   ├─ condition_group()
//!   │    ├─ condition()
//!   │    │    ├─ "("     → condition_group() + ")"
//!   │    │    ├─ "value" → "(" field_description() ")" comparison_operator() target_value()
//!   │    │    └─ "expr"  → "(" expression() ")" comparison_operator() NUMBER
//!   │    │
//!   │    └─ condition_group_prime()
//!   │         ├─ AND / OR → condition()，循环直到遇到 ")" / Eof
//!   │         └─ ")" / Eof → ε
//!   │
//!   └─ 期望 Eof（剩余未消费的 token 视为错误）
//! ```
//!
//! ## 关于 AND / OR
//!
//! 语法没有为 AND 和 OR 定义优先级，两者都只是 `CONDITION_GROUP_PRIME` 链上的一环。
//! 链如何折叠成二叉树由 reducer 决定，这里只忠实记录每一个产生式，包括 ε。
//!
//! 链本身用循环读取，再从尾部构造 `CONDITION_GROUP_PRIME` 链表，所以链的长度不受栈深度限制。
//! 只有括号会让解析器递归，嵌套层数由 [`MAX_NESTING_DEPTH`] 限制。
//!
//! ## 算术表达式
//!
//! `expr(...)` 内部使用常规的 TERM / FACTOR 文法，`*` 和 `/` 优先于 `+` 和 `-`。
//! 每个 `expr(...)` 最多包含 [`MAX_EXPRESSION_OPERATORS`] 个运算符。

use crate::cst::{
    ComparisonOperator, Condition, ConditionGroup, ConditionGroupPrime, Expression,
    ExpressionPrime, Factor, FieldDescription, IndexSlot, TargetValue, Term, TermPrime,
};
use crate::error::ParseError;
use crate::token::{Span, Token, TokenKind};

/// 括号（条件分组和算术括号）的最大嵌套层数
pub const MAX_NESTING_DEPTH: usize = 64;

/// 单个 `expr(...)` 中算术运算符的最大数量
pub const MAX_EXPRESSION_OPERATORS: usize = 128;

const CONDITION_START: &[TokenKind] = &[TokenKind::LParen, TokenKind::Value, TokenKind::Expr];
const COMPARISON_OPERATORS: &[TokenKind] = &[
    TokenKind::Eq,
    TokenKind::NotEq,
    TokenKind::Gt,
    TokenKind::Lt,
    TokenKind::Exists,
    TokenKind::Count,
];

pub struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    /// 当前所在的括号层数
    depth: usize,
    /// 当前 `expr(...)` 中已读取的运算符数量
    operators: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
            operators: 0,
        }
    }

    /// 返回当前 token 的类型，越过末尾时视为 Eof
    fn peek_kind(&self) -> TokenKind {
        self.tokens
            .get(self.position)
            .map_or(TokenKind::Eof, |token| token.kind)
    }

    /// 当前 token 在源文本中的位置
    fn current_position(&self) -> usize {
        match self.tokens.get(self.position) {
            Some(token) => token.position(),
            None => self.tokens.last().map_or(0, |token| token.span.end),
        }
    }

    /// 返回当前 token 并推进位置
    fn advance(&mut self) -> Token {
        match self.tokens.get(self.position) {
            Some(token) => {
                self.position += 1;
                token.clone()
            }
            None => {
                let end = self.current_position();
                Token::new(TokenKind::Eof, "", Span::new(end, end))
            }
        }
    }

    fn error(&self, expected: &[TokenKind]) -> ParseError {
        ParseError::new(self.current_position(), expected.to_vec(), self.peek_kind())
    }

    /// 进入一层括号，超过上限时返回错误
    fn enter(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ParseError::NestingTooDeep {
                position: self.current_position(),
                limit: MAX_NESTING_DEPTH,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// 记录一个算术运算符，超过上限时返回错误
    fn count_operator(&mut self) -> Result<(), ParseError> {
        if self.operators >= MAX_EXPRESSION_OPERATORS {
            return Err(ParseError::ExpressionTooLong {
                position: self.current_position(),
                limit: MAX_EXPRESSION_OPERATORS,
            });
        }
        self.operators += 1;
        Ok(())
    }

    /// 期望特定类型的 token 并推进，否则返回错误
    fn expect(&mut self, expected: TokenKind) -> Result<Token, ParseError> {
        self.expect_one_of(&[expected])
    }

    fn expect_one_of(&mut self, expected: &[TokenKind]) -> Result<Token, ParseError> {
        if expected.contains(&self.peek_kind()) {
            Ok(self.advance())
        } else {
            Err(self.error(expected))
        }
    }

    /// 解析完整的 token 序列，必须恰好消费到 Eof
    pub fn parse(&mut self) -> Result<ConditionGroup, ParseError> {
        let group = self.condition_group()?;
        self.expect(TokenKind::Eof)?;
        Ok(group)
    }

    /// `CONDITION_GROUP := CONDITION CONDITION_GROUP_PRIME`
    fn condition_group(&mut self) -> Result<ConditionGroup, ParseError> {
        let condition = self.condition()?;
        let prime = self.condition_group_prime()?;
        Ok(ConditionGroup { condition, prime })
    }

    /// `CONDITION_GROUP_PRIME := (AND | OR) CONDITION CONDITION_GROUP_PRIME | ε`
    ///
    /// 先按顺序收集每一环，再从尾部（ε）开始向前构造链表
    fn condition_group_prime(&mut self) -> Result<ConditionGroupPrime, ParseError> {
        let mut links = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::And | TokenKind::Or => {
                    let conjunction = self.advance();
                    let condition = self.condition()?;
                    links.push((conjunction, condition));
                }
                TokenKind::RParen | TokenKind::Eof => break,
                _ => {
                    return Err(self.error(&[
                        TokenKind::And,
                        TokenKind::Or,
                        TokenKind::RParen,
                        TokenKind::Eof,
                    ]))
                }
            }
        }

        let prime = links.into_iter().rev().fold(
            ConditionGroupPrime::Epsilon,
            |prime, (conjunction, condition)| ConditionGroupPrime::Link {
                conjunction,
                condition: Box::new(condition),
                prime: Box::new(prime),
            },
        );
        Ok(prime)
    }

    /// `CONDITION`
    fn condition(&mut self) -> Result<Condition, ParseError> {
        match self.peek_kind() {
            TokenKind::LParen => {
                self.enter()?;
                let open = self.advance();
                let group = self.condition_group()?;
                let close = self.expect(TokenKind::RParen)?;
                self.leave();
                Ok(Condition::Parenthesis {
                    open,
                    group: Box::new(group),
                    close,
                })
            }
            TokenKind::Value => {
                let value = self.advance();
                let open = self.expect(TokenKind::LParen)?;
                let field = self.field_description()?;
                let close = self.expect(TokenKind::RParen)?;
                let operator = self.comparison_operator()?;
                let target = self.target_value()?;
                Ok(Condition::Comparison {
                    value,
                    open,
                    field,
                    close,
                    operator,
                    target,
                })
            }
            TokenKind::Expr => {
                let expr = self.advance();
                let open = self.expect(TokenKind::LParen)?;
                self.operators = 0;
                let expression = self.expression()?;
                let close = self.expect(TokenKind::RParen)?;
                let operator = self.comparison_operator()?;
                let target = self.expect(TokenKind::Number)?;
                Ok(Condition::Expression {
                    expr,
                    open,
                    expression,
                    close,
                    operator,
                    target,
                })
            }
            _ => Err(self.error(CONDITION_START)),
        }
    }

    fn comparison_operator(&mut self) -> Result<ComparisonOperator, ParseError> {
        let token = self.expect_one_of(COMPARISON_OPERATORS)?;
        Ok(ComparisonOperator { token })
    }

    /// `FIELD_DESCRIPTION := "field" (STRING | NUMBER) INSTANCE_SLOT ARRAY_SLOT`
    fn field_description(&mut self) -> Result<FieldDescription, ParseError> {
        let field = self.expect(TokenKind::Field)?;
        let identifier = self.expect_one_of(&[TokenKind::String, TokenKind::Number])?;
        let instance = self.index_slot(TokenKind::Instance)?;
        let array = self.index_slot(TokenKind::Array)?;
        Ok(FieldDescription {
            field,
            identifier,
            instance,
            array,
        })
    }

    /// `INSTANCE_SLOT` / `ARRAY_SLOT`：关键字后跟数字或 `any`，否则为 ε
    fn index_slot(&mut self, keyword: TokenKind) -> Result<IndexSlot, ParseError> {
        if self.peek_kind() != keyword {
            return Ok(IndexSlot::Epsilon);
        }
        let keyword = self.advance();
        let index = self.expect_one_of(&[TokenKind::Number, TokenKind::Any])?;
        Ok(IndexSlot::Index { keyword, index })
    }

    /// `TARGET_VALUE := STRING | NUMBER | "value" "(" FIELD_DESCRIPTION ")"`
    fn target_value(&mut self) -> Result<TargetValue, ParseError> {
        match self.peek_kind() {
            TokenKind::String | TokenKind::Number => Ok(TargetValue::Literal(self.advance())),
            TokenKind::Value => {
                let value = self.advance();
                let open = self.expect(TokenKind::LParen)?;
                let field = self.field_description()?;
                let close = self.expect(TokenKind::RParen)?;
                Ok(TargetValue::Field {
                    value,
                    open,
                    field,
                    close,
                })
            }
            _ => Err(self.error(&[TokenKind::String, TokenKind::Number, TokenKind::Value])),
        }
    }

    /// `EXPRESSION := TERM EXPRESSION_PRIME`
    fn expression(&mut self) -> Result<Expression, ParseError> {
        let term = self.term()?;
        let prime = self.expression_prime()?;
        Ok(Expression { term, prime })
    }

    /// `EXPRESSION_PRIME := ("+" | "-") TERM EXPRESSION_PRIME | ε`，ε 只出现在 ")" 之前
    fn expression_prime(&mut self) -> Result<ExpressionPrime, ParseError> {
        let mut links = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Plus | TokenKind::Minus => {
                    self.count_operator()?;
                    let operator = self.advance();
                    let term = self.term()?;
                    links.push((operator, term));
                }
                TokenKind::RParen => break,
                _ => return Err(self.error(&[TokenKind::Plus, TokenKind::Minus, TokenKind::RParen])),
            }
        }

        let prime = links.into_iter().rev().fold(
            ExpressionPrime::Epsilon,
            |prime, (operator, term)| ExpressionPrime::Link {
                operator,
                term,
                prime: Box::new(prime),
            },
        );
        Ok(prime)
    }

    /// `TERM := FACTOR TERM_PRIME`
    fn term(&mut self) -> Result<Term, ParseError> {
        let factor = self.factor()?;
        let prime = self.term_prime()?;
        Ok(Term { factor, prime })
    }

    /// `TERM_PRIME := ("*" | "/") FACTOR TERM_PRIME | ε`
    fn term_prime(&mut self) -> Result<TermPrime, ParseError> {
        let mut links = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Star | TokenKind::Slash => {
                    self.count_operator()?;
                    let operator = self.advance();
                    let factor = self.factor()?;
                    links.push((operator, factor));
                }
                TokenKind::RParen | TokenKind::Plus | TokenKind::Minus => break,
                _ => {
                    return Err(self.error(&[
                        TokenKind::Star,
                        TokenKind::Slash,
                        TokenKind::Plus,
                        TokenKind::Minus,
                        TokenKind::RParen,
                    ]))
                }
            }
        }

        let prime = links.into_iter().rev().fold(
            TermPrime::Epsilon,
            |prime, (operator, factor)| TermPrime::Link {
                operator,
                factor,
                prime: Box::new(prime),
            },
        );
        Ok(prime)
    }

    /// `FACTOR := "(" EXPRESSION ")" | NUMBER | "value" "(" FIELD_DESCRIPTION ")"`
    fn factor(&mut self) -> Result<Factor, ParseError> {
        match self.peek_kind() {
            TokenKind::LParen => {
                self.enter()?;
                let open = self.advance();
                let expression = self.expression()?;
                let close = self.expect(TokenKind::RParen)?;
                self.leave();
                Ok(Factor::Parenthesis {
                    open,
                    expression: Box::new(expression),
                    close,
                })
            }
            TokenKind::Number => Ok(Factor::Number(self.advance())),
            TokenKind::Value => {
                let value = self.advance();
                let open = self.expect(TokenKind::LParen)?;
                let field = self.field_description()?;
                let close = self.expect(TokenKind::RParen)?;
                Ok(Factor::Field {
                    value,
                    open,
                    field,
                    close,
                })
            }
            _ => Err(self.error(&[TokenKind::LParen, TokenKind::Number, TokenKind::Value])),
        }
    }
}

/// 解析 token 序列
pub fn parse(tokens: &[Token]) -> Result<ConditionGroup, ParseError> {
    Parser::new(tokens).parse()
}
