//! Document-store adapter: renders a [`FilterTree`] as a MongoDB-style
//! match document (`$and`/`$or`, `$eq`/`$ne`/`$gt`/`$lt`, `$exists`,
//! and `$expr` for anything that compares two stored values).
//!
//! A run of groups with the same combinator down the right spine becomes
//! one `$and`/`$or` array, so `AND(a, AND(b, c))` renders as
//! `{"$and": [a, b, c]}`.

use serde_json::{json, Map, Number, Value};

use crate::filter::{FilterTree, Operand, Predicate};
use crate::ir::{Arithmetic, ArithmeticOperator, ComparisonOperator, Conjunction, Literal};

/// Convert a filter tree into a match document.
pub fn to_document_query(tree: &FilterTree) -> Value {
    let combinator = match tree {
        FilterTree::Group { combinator, .. } => *combinator,
        FilterTree::Leaf { predicate } => return predicate_document(predicate),
    };

    let mut operands = Vec::new();
    let mut node = tree;
    loop {
        match node {
            FilterTree::Group {
                combinator: next,
                children,
            } if *next == combinator => {
                operands.push(to_document_query(&children[0]));
                node = &children[1];
            }
            last => {
                operands.push(to_document_query(last));
                break;
            }
        }
    }

    let operator = match combinator {
        Conjunction::And => "$and",
        Conjunction::Or => "$or",
    };
    object(operator, Value::Array(operands))
}

fn predicate_document(predicate: &Predicate) -> Value {
    match predicate {
        Predicate::Compare {
            key,
            operator,
            value: Operand::Literal(literal),
        } => object(key.clone(), object(query_operator(*operator), literal_value(literal))),
        Predicate::Compare {
            key,
            operator,
            value: Operand::Field { field },
        } => expr(object(
            query_operator(*operator),
            json!([field_path(key), field_path(field)]),
        )),
        Predicate::Exists { key, exists } => object(key.clone(), json!({ "$exists": exists })),
        Predicate::Count {
            keys,
            operator,
            value,
        } => {
            // 1 for every key holding a value, 0 for a missing one
            let present: Vec<Value> = keys
                .iter()
                .map(|key| json!({ "$cond": [{ "$eq": [{ "$type": field_path(key) }, "missing"] }, 0, 1] }))
                .collect();
            expr(object(
                query_operator(*operator),
                json!([{ "$add": present }, value]),
            ))
        }
        Predicate::Derived {
            expression,
            operator,
            value,
        } => expr(object(
            query_operator(*operator),
            json!([arithmetic_value(expression), float_value(*value)]),
        )),
    }
}

fn query_operator(operator: ComparisonOperator) -> &'static str {
    match operator {
        ComparisonOperator::Eq => "$eq",
        ComparisonOperator::NotEq => "$ne",
        ComparisonOperator::Gt => "$gt",
        ComparisonOperator::Lt => "$lt",
        ComparisonOperator::Exists => "$exists",
        ComparisonOperator::Count => "$size",
    }
}

fn arithmetic_value(expression: &Arithmetic<String>) -> Value {
    match expression {
        Arithmetic::Number(value) => float_value(*value),
        Arithmetic::Field(key) => field_path(key),
        Arithmetic::Binary {
            operator,
            left,
            right,
        } => {
            let name = match operator {
                ArithmeticOperator::Add => "$add",
                ArithmeticOperator::Subtract => "$subtract",
                ArithmeticOperator::Multiply => "$multiply",
                ArithmeticOperator::Divide => "$divide",
            };
            object(name, json!([arithmetic_value(left), arithmetic_value(right)]))
        }
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::String(s) => Value::String(s.clone()),
        Literal::Integer(value) => Value::from(*value),
        Literal::Float(value) => float_value(*value),
    }
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn field_path(key: &str) -> Value {
    Value::String(format!("${key}"))
}

fn expr(body: Value) -> Value {
    object("$expr", body)
}

fn object(key: impl Into<String>, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.into(), value);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_of_literals() {
        let tree = FilterTree::group(
            Conjunction::Or,
            FilterTree::leaf(Predicate::Compare {
                key: "Sex-0.0".to_string(),
                operator: ComparisonOperator::Eq,
                value: Operand::Literal(Literal::String("Male".to_string())),
            }),
            FilterTree::leaf(Predicate::Compare {
                key: "Age-0.0".to_string(),
                operator: ComparisonOperator::Gt,
                value: Operand::Literal(Literal::Integer(30)),
            }),
        );
        assert_eq!(
            to_document_query(&tree),
            json!({ "$or": [
                { "Sex-0.0": { "$eq": "Male" } },
                { "Age-0.0": { "$gt": 30 } }
            ]})
        );
    }

    #[test]
    fn test_field_to_field_uses_expr() {
        let tree = FilterTree::leaf(Predicate::Compare {
            key: "A-0.0".to_string(),
            operator: ComparisonOperator::NotEq,
            value: Operand::Field {
                field: "B-0.0".to_string(),
            },
        });
        assert_eq!(
            to_document_query(&tree),
            json!({ "$expr": { "$ne": ["$A-0.0", "$B-0.0"] } })
        );
    }

    #[test]
    fn test_exists_and_count() {
        let exists = FilterTree::leaf(Predicate::Exists {
            key: "A-1.0".to_string(),
            exists: false,
        });
        assert_eq!(
            to_document_query(&exists),
            json!({ "A-1.0": { "$exists": false } })
        );

        let count = FilterTree::leaf(Predicate::Count {
            keys: vec!["A-0.0".to_string()],
            operator: ComparisonOperator::Eq,
            value: 1,
        });
        assert_eq!(
            to_document_query(&count),
            json!({ "$expr": { "$eq": [
                { "$add": [{ "$cond": [{ "$eq": [{ "$type": "$A-0.0" }, "missing"] }, 0, 1] }] },
                1
            ]}})
        );
    }

    #[test]
    fn test_count_relation_operator() {
        let count = FilterTree::leaf(Predicate::Count {
            keys: vec!["A-0.0".to_string(), "A-1.0".to_string()],
            operator: ComparisonOperator::Gt,
            value: 1,
        });
        let document = to_document_query(&count);
        assert_eq!(document["$expr"]["$gt"][1], json!(1));
        assert_eq!(
            document["$expr"]["$gt"][0]["$add"].as_array().map(Vec::len),
            Some(2)
        );
    }

    #[test]
    fn test_same_combinator_runs_are_flattened() {
        let leaf = |key: &str| {
            FilterTree::leaf(Predicate::Exists {
                key: key.to_string(),
                exists: true,
            })
        };
        let tree = FilterTree::group(
            Conjunction::And,
            leaf("A-0.0"),
            FilterTree::group(
                Conjunction::And,
                leaf("B-0.0"),
                FilterTree::group(Conjunction::Or, leaf("C-0.0"), leaf("D-0.0")),
            ),
        );
        assert_eq!(
            to_document_query(&tree),
            json!({ "$and": [
                { "A-0.0": { "$exists": true } },
                { "B-0.0": { "$exists": true } },
                { "$or": [
                    { "C-0.0": { "$exists": true } },
                    { "D-0.0": { "$exists": true } }
                ]}
            ]})
        );

        let long = FilterTree::chain(
            Conjunction::Or,
            (0..10_000).map(|index| leaf(&format!("A-{index}.0"))),
        )
        .unwrap();
        let document = to_document_query(&long);
        assert_eq!(document["$or"].as_array().map(Vec::len), Some(10_000));
    }

    #[test]
    fn test_derived_expression() {
        let tree = FilterTree::leaf(Predicate::Derived {
            expression: Arithmetic::binary(
                ArithmeticOperator::Divide,
                Arithmetic::Field("W-0.0".to_string()),
                Arithmetic::Number(2.0),
            ),
            operator: ComparisonOperator::Lt,
            value: 25.0,
        });
        assert_eq!(
            to_document_query(&tree),
            json!({ "$expr": { "$lt": [{ "$divide": ["$W-0.0", 2.0] }, 25.0] } })
        );
    }
}
