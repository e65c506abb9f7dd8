//! Concrete syntax tree produced by the parser.
//!
//! Every grammar rule has its own type and keeps every terminal it matched
//! as a [`Token`] leaf, in source order. Optional slots carry an explicit
//! `Epsilon` variant when they matched nothing, so the end of a chain is
//! never confused with a missing node.
//!
//! ```text
//! CONDITION_GROUP       := CONDITION CONDITION_GROUP_PRIME
//! CONDITION_GROUP_PRIME := (AND | OR) CONDITION CONDITION_GROUP_PRIME | ε
//! CONDITION             := "(" CONDITION_GROUP ")"
//!                        | "value" "(" FIELD_DESCRIPTION ")" COMPARISON_OPERATOR TARGET_VALUE
//!                        | "expr" "(" EXPRESSION ")" COMPARISON_OPERATOR NUMBER
//! FIELD_DESCRIPTION     := "field" (STRING | NUMBER) INSTANCE_SLOT ARRAY_SLOT
//! INSTANCE_SLOT         := "instance" (NUMBER | "any") | ε
//! ARRAY_SLOT            := "array" (NUMBER | "any") | ε
//! TARGET_VALUE          := STRING | NUMBER | "value" "(" FIELD_DESCRIPTION ")"
//! EXPRESSION            := TERM EXPRESSION_PRIME
//! EXPRESSION_PRIME      := ("+" | "-") TERM EXPRESSION_PRIME | ε
//! TERM                  := FACTOR TERM_PRIME
//! TERM_PRIME            := ("*" | "/") FACTOR TERM_PRIME | ε
//! FACTOR                := "(" EXPRESSION ")" | NUMBER | "value" "(" FIELD_DESCRIPTION ")"
//! ```

use std::fmt;
use std::mem;

use crate::token::Token;

/// `CONDITION_GROUP := CONDITION CONDITION_GROUP_PRIME`
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionGroup {
    pub condition: Condition,
    pub prime: ConditionGroupPrime,
}

/// `CONDITION_GROUP_PRIME := (AND | OR) CONDITION CONDITION_GROUP_PRIME | ε`
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionGroupPrime {
    Link {
        conjunction: Token,
        condition: Box<Condition>,
        prime: Box<ConditionGroupPrime>,
    },
    Epsilon,
}

impl ConditionGroupPrime {
    pub fn is_epsilon(&self) -> bool {
        matches!(self, ConditionGroupPrime::Epsilon)
    }
}

/// Unlinks the chain one node at a time so a long chain is freed in a loop.
impl Drop for ConditionGroupPrime {
    fn drop(&mut self) {
        let mut next = match self {
            ConditionGroupPrime::Link { prime, .. } => {
                mem::replace(prime.as_mut(), ConditionGroupPrime::Epsilon)
            }
            ConditionGroupPrime::Epsilon => return,
        };
        while let ConditionGroupPrime::Link { prime, .. } = &mut next {
            let following = mem::replace(prime.as_mut(), ConditionGroupPrime::Epsilon);
            next = following;
        }
    }
}

/// `CONDITION`
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `"(" CONDITION_GROUP ")"`
    Parenthesis {
        open: Token,
        group: Box<ConditionGroup>,
        close: Token,
    },
    /// `"value" "(" FIELD_DESCRIPTION ")" COMPARISON_OPERATOR TARGET_VALUE`
    Comparison {
        value: Token,
        open: Token,
        field: FieldDescription,
        close: Token,
        operator: ComparisonOperator,
        target: TargetValue,
    },
    /// `"expr" "(" EXPRESSION ")" COMPARISON_OPERATOR NUMBER`
    Expression {
        expr: Token,
        open: Token,
        expression: Expression,
        close: Token,
        operator: ComparisonOperator,
        target: Token,
    },
}

/// `COMPARISON_OPERATOR := "=" | "!=" | ">" | "<" | "exists" | "count"`
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOperator {
    pub token: Token,
}

/// `FIELD_DESCRIPTION := "field" (STRING | NUMBER) INSTANCE_SLOT ARRAY_SLOT`
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    pub field: Token,
    pub identifier: Token,
    pub instance: IndexSlot,
    pub array: IndexSlot,
}

/// `INSTANCE_SLOT` and `ARRAY_SLOT`: a keyword followed by a number or `any`.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexSlot {
    Index { keyword: Token, index: Token },
    Epsilon,
}

/// `TARGET_VALUE := STRING | NUMBER | "value" "(" FIELD_DESCRIPTION ")"`
#[derive(Debug, Clone, PartialEq)]
pub enum TargetValue {
    Literal(Token),
    Field {
        value: Token,
        open: Token,
        field: FieldDescription,
        close: Token,
    },
}

/// `EXPRESSION := TERM EXPRESSION_PRIME`
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub term: Term,
    pub prime: ExpressionPrime,
}

/// `EXPRESSION_PRIME := ("+" | "-") TERM EXPRESSION_PRIME | ε`
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionPrime {
    Link {
        operator: Token,
        term: Term,
        prime: Box<ExpressionPrime>,
    },
    Epsilon,
}

/// `TERM := FACTOR TERM_PRIME`
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub factor: Factor,
    pub prime: TermPrime,
}

/// `TERM_PRIME := ("*" | "/") FACTOR TERM_PRIME | ε`
#[derive(Debug, Clone, PartialEq)]
pub enum TermPrime {
    Link {
        operator: Token,
        factor: Factor,
        prime: Box<TermPrime>,
    },
    Epsilon,
}

/// `FACTOR := "(" EXPRESSION ")" | NUMBER | "value" "(" FIELD_DESCRIPTION ")"`
#[derive(Debug, Clone, PartialEq)]
pub enum Factor {
    Parenthesis {
        open: Token,
        expression: Box<Expression>,
        close: Token,
    },
    Number(Token),
    Field {
        value: Token,
        open: Token,
        field: FieldDescription,
        close: Token,
    },
}

// ==================== Rendering ====================

/// Writes a node as an indented rule tree, one line per rule, leaf or ε.
trait Render {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result;
}

fn rule(f: &mut fmt::Formatter<'_>, depth: usize, name: &str) -> fmt::Result {
    writeln!(f, "{:indent$}{name}", "", indent = depth * 2)
}

fn epsilon(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    writeln!(f, "{:indent$}ε", "", indent = depth * 2)
}

impl Render for Token {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{:indent$}{:?} {:?}", "", self.kind, self.lexeme, indent = depth * 2)
    }
}

impl Render for ConditionGroup {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        rule(f, depth, "CONDITION_GROUP")?;
        self.condition.render(f, depth + 1)?;
        self.prime.render(f, depth + 1)
    }
}

impl Render for ConditionGroupPrime {
    fn render(&self, f: &mut fmt::Formatter<'_>, mut depth: usize) -> fmt::Result {
        let mut prime = self;
        loop {
            rule(f, depth, "CONDITION_GROUP_PRIME")?;
            match prime {
                ConditionGroupPrime::Link {
                    conjunction,
                    condition,
                    prime: next,
                } => {
                    conjunction.render(f, depth + 1)?;
                    condition.render(f, depth + 1)?;
                    prime = next;
                    depth += 1;
                }
                ConditionGroupPrime::Epsilon => return epsilon(f, depth + 1),
            }
        }
    }
}

impl Render for Condition {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        rule(f, depth, "CONDITION")?;
        let depth = depth + 1;
        match self {
            Condition::Parenthesis { open, group, close } => {
                open.render(f, depth)?;
                group.render(f, depth)?;
                close.render(f, depth)
            }
            Condition::Comparison {
                value,
                open,
                field,
                close,
                operator,
                target,
            } => {
                value.render(f, depth)?;
                open.render(f, depth)?;
                field.render(f, depth)?;
                close.render(f, depth)?;
                operator.render(f, depth)?;
                target.render(f, depth)
            }
            Condition::Expression {
                expr,
                open,
                expression,
                close,
                operator,
                target,
            } => {
                expr.render(f, depth)?;
                open.render(f, depth)?;
                expression.render(f, depth)?;
                close.render(f, depth)?;
                operator.render(f, depth)?;
                target.render(f, depth)
            }
        }
    }
}

impl Render for ComparisonOperator {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        rule(f, depth, "COMPARISON_OPERATOR")?;
        self.token.render(f, depth + 1)
    }
}

impl Render for FieldDescription {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        rule(f, depth, "FIELD_DESCRIPTION")?;
        self.field.render(f, depth + 1)?;
        self.identifier.render(f, depth + 1)?;
        render_slot(&self.instance, "INSTANCE_SLOT", f, depth + 1)?;
        render_slot(&self.array, "ARRAY_SLOT", f, depth + 1)
    }
}

fn render_slot(slot: &IndexSlot, name: &str, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    rule(f, depth, name)?;
    match slot {
        IndexSlot::Index { keyword, index } => {
            keyword.render(f, depth + 1)?;
            index.render(f, depth + 1)
        }
        IndexSlot::Epsilon => epsilon(f, depth + 1),
    }
}

impl Render for TargetValue {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        rule(f, depth, "TARGET_VALUE")?;
        let depth = depth + 1;
        match self {
            TargetValue::Literal(token) => token.render(f, depth),
            TargetValue::Field {
                value,
                open,
                field,
                close,
            } => {
                value.render(f, depth)?;
                open.render(f, depth)?;
                field.render(f, depth)?;
                close.render(f, depth)
            }
        }
    }
}

impl Render for Expression {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        rule(f, depth, "EXPRESSION")?;
        self.term.render(f, depth + 1)?;
        self.prime.render(f, depth + 1)
    }
}

impl Render for ExpressionPrime {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        rule(f, depth, "EXPRESSION_PRIME")?;
        match self {
            ExpressionPrime::Link {
                operator,
                term,
                prime,
            } => {
                operator.render(f, depth + 1)?;
                term.render(f, depth + 1)?;
                prime.render(f, depth + 1)
            }
            ExpressionPrime::Epsilon => epsilon(f, depth + 1),
        }
    }
}

impl Render for Term {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        rule(f, depth, "TERM")?;
        self.factor.render(f, depth + 1)?;
        self.prime.render(f, depth + 1)
    }
}

impl Render for TermPrime {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        rule(f, depth, "TERM_PRIME")?;
        match self {
            TermPrime::Link {
                operator,
                factor,
                prime,
            } => {
                operator.render(f, depth + 1)?;
                factor.render(f, depth + 1)?;
                prime.render(f, depth + 1)
            }
            TermPrime::Epsilon => epsilon(f, depth + 1),
        }
    }
}

impl Render for Factor {
    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        rule(f, depth, "FACTOR")?;
        let depth = depth + 1;
        match self {
            Factor::Parenthesis {
                open,
                expression,
                close,
            } => {
                open.render(f, depth)?;
                expression.render(f, depth)?;
                close.render(f, depth)
            }
            Factor::Number(token) => token.render(f, depth),
            Factor::Field {
                value,
                open,
                field,
                close,
            } => {
                value.render(f, depth)?;
                open.render(f, depth)?;
                field.render(f, depth)?;
                close.render(f, depth)
            }
        }
    }
}

impl fmt::Display for ConditionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}
