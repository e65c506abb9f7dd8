//! CST to IR reduction.
//!
//! Epsilon slots are dropped, parentheses are replaced by the group they
//! enclose, each comparison collapses into a [`CondensedCondition`] and
//! AND/OR chains fold to the right: `A AND B OR C` becomes
//! `AND(A, OR(B, C))`. There is no precedence between AND and OR.

use crate::cst::{
    ComparisonOperator as CstOperator, Condition, ConditionGroup, ConditionGroupPrime, Expression,
    ExpressionPrime, Factor, FieldDescription, IndexSlot, TargetValue as CstTarget, Term, TermPrime,
};
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    Arithmetic, ArithmeticOperator, ComparisonOperator, CondensedCondition, Conjunction,
    FieldDescriptor, IndexSelector, IrNode, Literal, Subject, TargetValue,
};
use crate::token::{Token, TokenKind};

/// Reduce a parsed condition group to its IR.
///
/// The chain is walked in a loop and folded from its last condition back to
/// the first, so the rest of the chain becomes the right operand of each link.
pub fn reduce(cst: &ConditionGroup) -> CompileResult<IrNode> {
    let mut operands = vec![reduce_condition(&cst.condition)?];
    let mut conjunctions = Vec::new();

    let mut prime = &cst.prime;
    while let ConditionGroupPrime::Link {
        conjunction,
        condition,
        prime: next,
    } = prime
    {
        conjunctions.push(conjunction_of(conjunction)?);
        operands.push(reduce_condition(condition)?);
        prime = next;
    }

    let mut acc = operands
        .pop()
        .ok_or_else(|| CompileError::reduction("condition group without a condition"))?;
    while let Some(conjunction) = conjunctions.pop() {
        let left = operands
            .pop()
            .ok_or_else(|| CompileError::reduction("conjunction without a left operand"))?;
        acc = IrNode::group(conjunction, left, acc);
    }
    Ok(acc)
}

fn reduce_condition(condition: &Condition) -> CompileResult<IrNode> {
    match condition {
        Condition::Parenthesis { group, .. } => reduce(group),
        Condition::Comparison {
            field,
            operator,
            target,
            ..
        } => {
            let field = field_descriptor(field)?;
            let target = target_value(&field.field, target)?;
            let condition =
                CondensedCondition::new(comparison_operator(operator)?, Subject::Field(field), target);
            Ok(condition.into())
        }
        Condition::Expression {
            expression,
            operator,
            target,
            ..
        } => {
            let condition = CondensedCondition::new(
                comparison_operator(operator)?,
                Subject::Expression(reduce_expression(expression)?),
                TargetValue::Literal(number_literal(target, EXPRESSION_SUBJECT)?),
            );
            Ok(condition.into())
        }
    }
}

fn conjunction_of(token: &Token) -> CompileResult<Conjunction> {
    match token.kind {
        TokenKind::And => Ok(Conjunction::And),
        TokenKind::Or => Ok(Conjunction::Or),
        other => Err(unexpected_token("a conjunction", other, token)),
    }
}

fn comparison_operator(operator: &CstOperator) -> CompileResult<ComparisonOperator> {
    let token = &operator.token;
    match token.kind {
        TokenKind::Eq => Ok(ComparisonOperator::Eq),
        TokenKind::NotEq => Ok(ComparisonOperator::NotEq),
        TokenKind::Gt => Ok(ComparisonOperator::Gt),
        TokenKind::Lt => Ok(ComparisonOperator::Lt),
        TokenKind::Exists => Ok(ComparisonOperator::Exists),
        TokenKind::Count => Ok(ComparisonOperator::Count),
        other => Err(unexpected_token("a comparison operator", other, token)),
    }
}

fn field_descriptor(description: &FieldDescription) -> CompileResult<FieldDescriptor> {
    let identifier = &description.identifier;
    let field = match identifier.kind {
        TokenKind::String | TokenKind::Number => identifier.lexeme.clone(),
        other => return Err(unexpected_token("a field identifier", other, identifier)),
    };
    let instance = index_selector(&field, &description.instance, TokenKind::Instance)?;
    let array = index_selector(&field, &description.array, TokenKind::Array)?;
    Ok(FieldDescriptor {
        field,
        instance,
        array,
    })
}

fn index_selector(field: &str, slot: &IndexSlot, keyword_kind: TokenKind) -> CompileResult<IndexSelector> {
    let (keyword, index) = match slot {
        IndexSlot::Epsilon => return Ok(IndexSelector::Default),
        IndexSlot::Index { keyword, index } => (keyword, index),
    };
    if keyword.kind != keyword_kind {
        return Err(unexpected_token(keyword_kind.describe(), keyword.kind, keyword));
    }
    match index.kind {
        TokenKind::Any => Ok(IndexSelector::Any),
        TokenKind::Number => index.lexeme.parse::<u32>().map(IndexSelector::At).map_err(|_| {
            CompileError::malformed_value(
                field,
                format!(
                    "{} index must be a non-negative integer, got {}",
                    keyword.lexeme, index.lexeme
                ),
            )
        }),
        other => Err(unexpected_token("an index or 'any'", other, index)),
    }
}

fn target_value(field: &str, target: &CstTarget) -> CompileResult<TargetValue> {
    match target {
        CstTarget::Literal(token) => match token.kind {
            TokenKind::String => Ok(TargetValue::Literal(Literal::String(token.lexeme.clone()))),
            TokenKind::Number => number_literal(token, field).map(TargetValue::Literal),
            other => Err(unexpected_token("a literal", other, token)),
        },
        CstTarget::Field { field, .. } => field_descriptor(field).map(TargetValue::Field),
    }
}

/// Numbers inside `expr(...)` are reported against this name.
const EXPRESSION_SUBJECT: &str = "expr";

/// A number literal, rejected when it does not fit a finite `f64`.
fn number_literal(token: &Token, field: &str) -> CompileResult<Literal> {
    if token.kind != TokenKind::Number {
        return Err(unexpected_token("a number", token.kind, token));
    }
    Literal::from_number(&token.lexeme).ok_or_else(|| {
        CompileError::malformed_value(
            field,
            format!(
                "number at position {} is out of range ({} digits)",
                token.position(),
                token.lexeme.len()
            ),
        )
    })
}

// ==================== Arithmetic ====================

fn reduce_expression(expression: &Expression) -> CompileResult<Arithmetic<FieldDescriptor>> {
    let mut acc = reduce_term(&expression.term)?;
    let mut prime = &expression.prime;
    while let ExpressionPrime::Link {
        operator,
        term,
        prime: next,
    } = prime
    {
        acc = Arithmetic::binary(arithmetic_operator(operator)?, acc, reduce_term(term)?);
        prime = next;
    }
    Ok(acc)
}

fn reduce_term(term: &Term) -> CompileResult<Arithmetic<FieldDescriptor>> {
    let mut acc = reduce_factor(&term.factor)?;
    let mut prime = &term.prime;
    while let TermPrime::Link {
        operator,
        factor,
        prime: next,
    } = prime
    {
        acc = Arithmetic::binary(arithmetic_operator(operator)?, acc, reduce_factor(factor)?);
        prime = next;
    }
    Ok(acc)
}

fn reduce_factor(factor: &Factor) -> CompileResult<Arithmetic<FieldDescriptor>> {
    match factor {
        Factor::Parenthesis { expression, .. } => reduce_expression(expression),
        Factor::Number(token) => number_literal(token, EXPRESSION_SUBJECT)?
            .as_f64()
            .map(Arithmetic::Number)
            .ok_or_else(|| unexpected_token("a number", token.kind, token)),
        Factor::Field { field, .. } => field_descriptor(field).map(Arithmetic::Field),
    }
}

fn arithmetic_operator(token: &Token) -> CompileResult<ArithmeticOperator> {
    match token.kind {
        TokenKind::Plus => Ok(ArithmeticOperator::Add),
        TokenKind::Minus => Ok(ArithmeticOperator::Subtract),
        TokenKind::Star => Ok(ArithmeticOperator::Multiply),
        TokenKind::Slash => Ok(ArithmeticOperator::Divide),
        other => Err(unexpected_token("an arithmetic operator", other, token)),
    }
}

fn unexpected_token(expected: &str, found: TokenKind, token: &Token) -> CompileError {
    CompileError::reduction(format!(
        "expected {expected} at position {}, found {found}",
        token.position()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;
    use crate::token::Span;

    fn reduce_source(source: &str) -> CompileResult<IrNode> {
        let tokens = tokenize(source, true).unwrap();
        let cst = parse(&tokens).unwrap();
        reduce(&cst)
    }

    #[test]
    fn test_single_comparison() {
        let ir = reduce_source(r#"value (field "Sex") = "Male""#).unwrap();
        let expected: IrNode = CondensedCondition::field_literal(
            FieldDescriptor::new("Sex"),
            ComparisonOperator::Eq,
            Literal::String("Male".to_string()),
        )
        .into();
        assert_eq!(ir, expected);
    }

    #[test]
    fn test_chain_folds_to_the_right() {
        let ir = reduce_source(
            r#"value (field "A") = 1 AND value (field "B") = 2 OR value (field "C") = 3"#,
        )
        .unwrap();
        assert_eq!(ir.to_string(), "AND(A = 1, OR(B = 2, C = 3))");

        let ir = reduce_source(
            r#"value (field "A") = 1 OR value (field "B") = 2 AND value (field "C") = 3"#,
        )
        .unwrap();
        assert_eq!(ir.to_string(), "OR(A = 1, AND(B = 2, C = 3))");
    }

    #[test]
    fn test_parentheses_override_chaining() {
        let ir = reduce_source(
            r#"value (field "Sex") = "Male" OR ( value (field "Age") = 30 AND value(field "Sex") = "Female" )"#,
        )
        .unwrap();
        assert_eq!(
            ir.to_string(),
            r#"OR(Sex = "Male", AND(Age = 30, Sex = "Female"))"#
        );

        let ir = reduce_source(
            r#"(value (field "A") = 1 AND value (field "B") = 2) OR value (field "C") = 3"#,
        )
        .unwrap();
        assert_eq!(ir.to_string(), "OR(AND(A = 1, B = 2), C = 3)");
    }

    #[test]
    fn test_redundant_parentheses_vanish() {
        let ir = reduce_source(r#"((value (field "A") = 1))"#).unwrap();
        assert_eq!(ir.to_string(), "A = 1");
        assert_eq!(ir.leaf_count(), 1);
    }

    #[test]
    fn test_index_slots() {
        let ir = reduce_source(r#"value (field 31 instance any array 2) > 1.5"#).unwrap();
        let IrNode::Condition(condition) = &ir else {
            panic!("expected a condition");
        };
        assert_eq!(
            condition.subject,
            Subject::Field(
                FieldDescriptor::new("31")
                    .instance(IndexSelector::Any)
                    .array(IndexSelector::At(2))
            )
        );
        assert_eq!(condition.comparison_operator, ComparisonOperator::Gt);
        assert_eq!(
            condition.target_value,
            TargetValue::Literal(Literal::Float(1.5))
        );
    }

    #[test]
    fn test_fractional_index_is_malformed() {
        let error = reduce_source(r#"value (field "A" instance 1.5) = 1"#).unwrap_err();
        assert!(matches!(
            error,
            CompileError::MalformedValue { ref field_id, .. } if field_id == "A"
        ));
    }

    #[test]
    fn test_field_to_field_target() {
        let ir = reduce_source(r#"value (field "A") != value (field "B" array 1)"#).unwrap();
        let IrNode::Condition(condition) = &ir else {
            panic!("expected a condition");
        };
        assert_eq!(
            condition.target_value,
            TargetValue::Field(FieldDescriptor::new("B").array(IndexSelector::At(1)))
        );
    }

    #[test]
    fn test_expression_precedence_and_associativity() {
        let ir = reduce_source(
            r#"expr(value(field "W") / value(field "H") * 2 + 1 - 3) > 25"#,
        )
        .unwrap();
        assert_eq!(ir.to_string(), "expr((((W / H) * 2) + 1) - 3) > 25");

        let ir = reduce_source(r#"expr(1 + 2 * (3 - value(field "X"))) = 7"#).unwrap();
        assert_eq!(ir.to_string(), "expr(1 + (2 * (3 - X))) = 7");
    }

    #[test]
    fn test_out_of_range_numbers_are_malformed() {
        let digits = "9".repeat(400);

        let error = reduce_source(&format!(r#"value (field "A") > {digits}"#)).unwrap_err();
        assert!(matches!(
            error,
            CompileError::MalformedValue { ref field_id, .. } if field_id == "A"
        ));

        let error =
            reduce_source(&format!(r#"expr(value (field "A") + {digits}) > 1"#)).unwrap_err();
        assert!(matches!(
            error,
            CompileError::MalformedValue { ref field_id, .. } if field_id == "expr"
        ));

        let error = reduce_source(&format!(r#"expr(value (field "A")) > {digits}"#)).unwrap_err();
        assert!(matches!(error, CompileError::MalformedValue { .. }));
    }

    #[test]
    fn test_long_chain_reduces_iteratively() {
        let source = vec![r#"value (field "A") = 1"#; 10_000].join(" AND ");
        let ir = reduce_source(&source).unwrap();
        assert_eq!(ir.leaf_count(), 10_000);

        let IrNode::Group(group) = &ir else {
            panic!("expected a group");
        };
        assert!(matches!(group.left.as_ref(), IrNode::Condition(_)));
        assert!(matches!(group.right.as_ref(), IrNode::Group(_)));
    }

    #[test]
    fn test_hand_built_cst_with_wrong_token_is_a_reduction_error() {
        let mut cst = parse(&tokenize(r#"value (field "A") = 1"#, true).unwrap()).unwrap();
        if let Condition::Comparison { operator, .. } = &mut cst.condition {
            operator.token = Token::new(TokenKind::Plus, "+", Span::new(18, 19));
        }
        let error = reduce(&cst).unwrap_err();
        assert!(matches!(error, CompileError::Reduction { .. }));
        assert!(error.to_string().contains("position 18"));
    }
}
