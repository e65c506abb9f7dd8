//! SQL adapter that turns a filter tree into a PostgreSQL query using sea-query.
//!
//! Every storage key becomes a column of a single wide table. A run of
//! groups with the same combinator down the right spine becomes one n-ary
//! `AND`/`OR` condition.

use sea_query::{
    Asterisk, Condition, ConditionExpression, Expr, Iden, PostgresQueryBuilder, SelectStatement,
    SimpleExpr, Value,
};
use thiserror::Error;
use tracing::debug;

use crate::config::CompilerConfig;
use crate::filter::{FilterTree, Operand, Predicate};
use crate::ir::{Arithmetic, ArithmeticOperator, ComparisonOperator, Conjunction, Literal};

/// Configuration for SQL optimization
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    /// Minimum number of equality checks on one column before an OR chain
    /// is rewritten as an IN clause
    pub max_or_conditions_for_in: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_or_conditions_for_in: 3,
        }
    }
}

/// A filter tree the SQL adapter cannot render.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlCompileError {
    /// `exists` and `count` have predicates of their own and never reach a
    /// plain comparison.
    #[error("'{operator}' cannot be rendered as a SQL comparison")]
    UnsupportedOperator { operator: ComparisonOperator },
}

/// Table identifier
#[derive(Debug, Clone)]
pub struct TableName(pub String);

impl Iden for TableName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// Column identifier wrapper
#[derive(Debug, Clone)]
pub struct ColumnName(pub String);

impl Iden for ColumnName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

/// Represents an optimization applied during compilation
#[derive(Debug, Clone, PartialEq)]
pub enum Optimization {
    OrToIn { column: String, value_count: usize },
}

/// Result of SQL compilation with optimization information
#[derive(Debug)]
pub struct SqlQuery {
    pub sql: String,
    pub optimizations: Vec<Optimization>,
}

/// Compiles filter trees into `SELECT * FROM <table> WHERE ...`
pub struct SqlCompiler {
    table: String,
    config: OptimizationConfig,
}

impl SqlCompiler {
    pub fn new(table: impl Into<String>) -> Self {
        Self::with_config(table, OptimizationConfig::default())
    }

    pub fn with_config(table: impl Into<String>, config: OptimizationConfig) -> Self {
        Self {
            table: table.into(),
            config,
        }
    }

    /// Uses the table named by the compiler configuration
    pub fn from_config(config: &CompilerConfig) -> Self {
        Self::new(config.table.clone())
    }

    /// Compile a filter tree into SQL
    pub fn compile(&self, tree: &FilterTree) -> Result<SqlQuery, SqlCompileError> {
        let mut optimizations = Vec::new();
        let condition = self.compile_tree(tree, &mut optimizations)?;

        let mut select = SelectStatement::new();
        select.column(Asterisk).from(TableName(self.table.clone()));
        match condition {
            ConditionExpression::Condition(condition) => select.cond_where(condition),
            ConditionExpression::SimpleExpr(expr) => select.and_where(expr),
        };
        let sql = select.to_string(PostgresQueryBuilder);

        debug!(table = %self.table, optimizations = optimizations.len(), "compiled filter tree to SQL");
        Ok(SqlQuery { sql, optimizations })
    }

    fn compile_tree(
        &self,
        tree: &FilterTree,
        optimizations: &mut Vec<Optimization>,
    ) -> Result<ConditionExpression, SqlCompileError> {
        let combinator = match tree {
            FilterTree::Group { combinator, .. } => *combinator,
            FilterTree::Leaf { predicate } => {
                return self.compile_predicate(predicate).map(ConditionExpression::SimpleExpr)
            }
        };

        if combinator == Conjunction::Or {
            if let Some((in_expr, optimization)) = self.try_optimize_or_to_in(tree) {
                optimizations.push(optimization);
                return Ok(ConditionExpression::SimpleExpr(in_expr));
            }
        }

        let mut condition = match combinator {
            Conjunction::And => Condition::all(),
            Conjunction::Or => Condition::any(),
        };
        let mut node = tree;
        loop {
            match node {
                FilterTree::Group {
                    combinator: next,
                    children,
                } if *next == combinator => {
                    condition = condition.add(self.compile_tree(&children[0], optimizations)?);
                    node = &children[1];
                }
                last => {
                    condition = condition.add(self.compile_tree(last, optimizations)?);
                    break;
                }
            }
        }
        Ok(ConditionExpression::Condition(condition))
    }

    /// Try to optimize an OR chain of equalities on one column to an IN clause
    fn try_optimize_or_to_in(&self, tree: &FilterTree) -> Option<(SimpleExpr, Optimization)> {
        let (column, values) = collect_equality_values(tree)?;
        if values.len() < self.config.max_or_conditions_for_in {
            return None;
        }

        let value_count = values.len();
        let in_values: Vec<Value> = values.into_iter().map(literal_to_value).collect();
        let in_expr = Expr::col(ColumnName(column.to_string())).is_in(in_values);
        Some((
            in_expr,
            Optimization::OrToIn {
                column: column.to_string(),
                value_count,
            },
        ))
    }

    fn compile_predicate(&self, predicate: &Predicate) -> Result<SimpleExpr, SqlCompileError> {
        match predicate {
            Predicate::Compare {
                key,
                operator,
                value,
            } => {
                let right: SimpleExpr = match value {
                    Operand::Literal(literal) => Expr::val(literal_to_value(literal)).into(),
                    Operand::Field { field } => Expr::col(ColumnName(field.clone())).into(),
                };
                compare(Expr::col(ColumnName(key.clone())), *operator, right)
            }
            Predicate::Exists { key, exists: true } => Ok(Expr::col(ColumnName(key.clone())).is_not_null()),
            Predicate::Exists { key, exists: false } => Ok(Expr::col(ColumnName(key.clone())).is_null()),
            Predicate::Count {
                keys,
                operator,
                value,
            } => {
                // CASE WHEN col IS NOT NULL THEN 1 ELSE 0 END, summed over keys
                let present = keys.iter().map(|key| -> SimpleExpr {
                    Expr::case(Expr::col(ColumnName(key.clone())).is_not_null(), Expr::val(1))
                        .finally(Expr::val(0))
                        .into()
                });
                let sum = present
                    .reduce(|acc, term| Expr::expr(acc).add(term))
                    .unwrap_or_else(|| Expr::val(0).into());
                compare(
                    Expr::expr(sum),
                    *operator,
                    Expr::val(Value::BigUnsigned(Some(*value))).into(),
                )
            }
            Predicate::Derived {
                expression,
                operator,
                value,
            } => compare(
                Expr::expr(arithmetic_expr(expression)),
                *operator,
                Expr::val(*value).into(),
            ),
        }
    }
}

fn compare(
    left: Expr,
    operator: ComparisonOperator,
    right: SimpleExpr,
) -> Result<SimpleExpr, SqlCompileError> {
    match operator {
        ComparisonOperator::Eq => Ok(left.eq(right)),
        ComparisonOperator::NotEq => Ok(left.ne(right)),
        ComparisonOperator::Gt => Ok(left.gt(right)),
        ComparisonOperator::Lt => Ok(left.lt(right)),
        ComparisonOperator::Exists | ComparisonOperator::Count => {
            Err(SqlCompileError::UnsupportedOperator { operator })
        }
    }
}

fn arithmetic_expr(expression: &Arithmetic<String>) -> SimpleExpr {
    match expression {
        Arithmetic::Number(value) => Expr::val(*value).into(),
        Arithmetic::Field(key) => Expr::col(ColumnName(key.clone())).into(),
        Arithmetic::Binary {
            operator,
            left,
            right,
        } => {
            let left = Expr::expr(arithmetic_expr(left));
            let right = arithmetic_expr(right);
            match operator {
                ArithmeticOperator::Add => left.add(right),
                ArithmeticOperator::Subtract => left.sub(right),
                ArithmeticOperator::Multiply => left.mul(right),
                ArithmeticOperator::Divide => left.div(right),
            }
        }
    }
}

/// Collects the column and literals of an OR tree made only of equalities
/// on one column, left to right.
fn collect_equality_values(tree: &FilterTree) -> Option<(&str, Vec<&Literal>)> {
    let mut column: Option<&str> = None;
    let mut values = Vec::new();
    let mut pending = vec![tree];
    while let Some(node) = pending.pop() {
        match node {
            FilterTree::Group {
                combinator: Conjunction::Or,
                children,
            } => {
                pending.push(&children[1]);
                pending.push(&children[0]);
            }
            FilterTree::Leaf {
                predicate:
                    Predicate::Compare {
                        key,
                        operator: ComparisonOperator::Eq,
                        value: Operand::Literal(literal),
                    },
            } => {
                if *column.get_or_insert(key.as_str()) != key.as_str() {
                    return None;
                }
                values.push(literal);
            }
            _ => return None, // Other shapes break the equality pattern
        }
    }
    Some((column?, values))
}

/// Convert a literal to sea-query Value
fn literal_to_value(literal: &Literal) -> Value {
    match literal {
        Literal::String(s) => Value::String(Some(Box::new(s.clone()))),
        Literal::Integer(n) => Value::BigInt(Some(*n)),
        Literal::Float(f) => Value::Double(Some(*f)),
    }
}
