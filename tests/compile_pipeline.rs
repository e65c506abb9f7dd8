use std::collections::HashMap;

use proptest::prelude::*;

use cohort_query::ir::{ComparisonOperator, Conjunction, Literal};
use cohort_query::lexer::tokenize;
use cohort_query::token::TokenKind;
use cohort_query::document::to_document_query;
use cohort_query::parser::MAX_NESTING_DEPTH;
use cohort_query::{
    compile, CompileError, FieldMetadata, FilterTree, IrNode, LexError, Operand, ParseError,
    Predicate, QueryCompiler,
};

fn catalog() -> HashMap<String, FieldMetadata> {
    let mut fields = HashMap::new();
    fields.insert("Sex".to_string(), FieldMetadata::single());
    fields.insert("Age".to_string(), FieldMetadata::single());
    fields.insert("A".to_string(), FieldMetadata::single());
    fields.insert("B".to_string(), FieldMetadata::single());
    fields.insert("C".to_string(), FieldMetadata::single());
    fields.insert("Height".to_string(), FieldMetadata::new(0, 3, 0, 1));
    fields
}

#[test]
fn literal_comparison_is_a_single_predicate() {
    let tree = compile(r#"value (field "Sex") = "Male""#, &catalog()).unwrap();
    assert_eq!(
        tree,
        FilterTree::Leaf {
            predicate: Predicate::Compare {
                key: "Sex-0.0".to_string(),
                operator: ComparisonOperator::Eq,
                value: Operand::Literal(Literal::String("Male".to_string())),
            }
        }
    );
}

#[test]
fn chains_fold_to_the_right() {
    let tree = compile(
        r#"value (field "A") = 1 AND value (field "B") = 2 OR value (field "C") = 3"#,
        &catalog(),
    )
    .unwrap();
    assert_eq!(tree.to_string(), "AND(A-0.0 = 1, OR(B-0.0 = 2, C-0.0 = 3))");

    let FilterTree::Group {
        combinator,
        children,
    } = &tree
    else {
        panic!("expected a group");
    };
    assert_eq!(*combinator, Conjunction::And);
    assert!(matches!(
        &children[1],
        FilterTree::Group {
            combinator: Conjunction::Or,
            ..
        }
    ));
}

#[test]
fn parentheses_override_chaining() {
    let tree = compile(
        r#"value (field "Sex") = "Male" OR ( value (field "Age") = 30 AND value(field "Sex") = "Female" )"#,
        &catalog(),
    )
    .unwrap();
    assert_eq!(
        tree.to_string(),
        r#"OR(Sex-0.0 = "Male", AND(Age-0.0 = 30, Sex-0.0 = "Female"))"#
    );
}

#[test]
fn wildcard_expands_to_one_predicate_per_instance() {
    let tree = compile(r#"value (field "Height" instance any) = 180"#, &catalog()).unwrap();
    let keys: Vec<&str> = tree.predicates().into_iter().flat_map(|p| p.keys()).collect();
    assert_eq!(keys, vec!["Height-0.0", "Height-1.0", "Height-2.0"]);
    assert!(matches!(
        tree,
        FilterTree::Group {
            combinator: Conjunction::Or,
            ..
        }
    ));
}

#[test]
fn error_boundaries() {
    let catalog = catalog();

    let error = compile(r#"value (field "Sex") = "Male"#, &catalog).unwrap_err();
    assert!(matches!(error, CompileError::Lex(LexError::UnterminatedString { .. })));

    let error = compile(r#"value (field "Sex") = "Male" AND"#, &catalog).unwrap_err();
    assert!(matches!(
        error,
        CompileError::Parse(ParseError::UnexpectedToken {
            found: TokenKind::Eof,
            ..
        })
    ));

    let error = compile(r#"value (field "Eye colour") = "Blue""#, &catalog).unwrap_err();
    assert!(matches!(
        error,
        CompileError::UnknownField { ref field_id, .. } if field_id == "Eye colour"
    ));
}

#[test]
fn stray_symbol_is_rejected_at_its_offset() {
    let error = compile(r#"value (field "Sex") # "Male""#, &catalog()).unwrap_err();
    assert_eq!(
        error,
        CompileError::Lex(LexError::UnexpectedCharacter {
            character: '#',
            position: 20,
        })
    );
}

#[test]
fn stages_can_be_inspected_separately() {
    let catalog = catalog();
    let compiler = QueryCompiler::new(&catalog);
    let source = r#"value (field "A") = 1 OR value (field "B") = 2"#;

    let cst = compiler.parse(source).unwrap();
    assert!(cst.to_string().starts_with("CONDITION_GROUP\n"));

    let ir = compiler.reduce(source).unwrap();
    assert_eq!(ir.to_string(), "OR(A = 1, B = 2)");

    let tree = compiler.compile(source).unwrap();
    let json = serde_json::to_value(&tree).unwrap();
    assert_eq!(json["combinator"], "OR");
    assert_eq!(json["children"][0]["predicate"]["key"], "A-0.0");
}

#[test]
fn ten_thousand_term_chain_compiles() {
    let catalog = catalog();
    let conditions = [
        r#"value (field "A") = 1"#,
        r#"value (field "B") > 2"#,
        r#"value (field "C") exists 1"#,
    ];
    let mut source = String::from(conditions[0]);
    for index in 1..10_000 {
        let conjunction = if index % 2 == 0 { "AND" } else { "OR" };
        source.push_str(&format!(" {conjunction} {}", conditions[index % 3]));
    }

    let ir = QueryCompiler::new(&catalog).reduce(&source).unwrap();
    assert_eq!(ir.leaf_count(), 10_000);

    let tree = compile(&source, &catalog).unwrap();
    assert_eq!(tree.predicates().len(), 10_000);
    assert!(tree
        .to_string()
        .starts_with("OR(A-0.0 = 1, AND(B-0.0 > 2, OR(C-0.0 exists true, "));

    let flat = vec![r#"value (field "Sex") = "Male""#; 10_000].join(" OR ");
    let document = to_document_query(&compile(&flat, &catalog).unwrap());
    assert_eq!(document["$or"].as_array().map(Vec::len), Some(10_000));
}

#[test]
fn deep_parentheses_are_a_parse_error() {
    let catalog = catalog();
    let nested = |depth: usize| {
        format!(
            r#"{}value (field "A") = 1{}"#,
            "(".repeat(depth),
            ")".repeat(depth)
        )
    };

    let tree = compile(&nested(MAX_NESTING_DEPTH), &catalog).unwrap();
    assert_eq!(tree.to_string(), "A-0.0 = 1");

    let error = compile(&nested(50_000), &catalog).unwrap_err();
    assert!(matches!(
        error,
        CompileError::Parse(ParseError::NestingTooDeep { limit, .. }) if limit == MAX_NESTING_DEPTH
    ));
}

#[test]
fn out_of_range_literals_are_malformed() {
    let digits = "9".repeat(400);
    for source in [
        format!(r#"value (field "A") > {digits}"#),
        format!(r#"expr(value (field "A") + {digits}) > 1"#),
    ] {
        let error = compile(&source, &catalog()).unwrap_err();
        assert!(matches!(error, CompileError::MalformedValue { .. }), "{source}");
    }
}

#[test]
fn count_accepts_a_relation() {
    let tree = compile(r#"value (field "Height" instance any) count "> 1""#, &catalog()).unwrap();
    assert_eq!(
        tree,
        FilterTree::Leaf {
            predicate: Predicate::Count {
                keys: vec![
                    "Height-0.0".to_string(),
                    "Height-1.0".to_string(),
                    "Height-2.0".to_string()
                ],
                operator: ComparisonOperator::Gt,
                value: 1,
            }
        }
    );
}

fn condition() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["Sex", "Age", "Height"]),
        prop::sample::select(vec!["=", "!=", ">", "<"]),
        0i64..1000,
        any::<bool>(),
    )
        .prop_map(|(field, operator, value, wildcard)| {
            let instance = if wildcard { " instance any" } else { "" };
            format!(r#"value (field "{field}"{instance}) {operator} {value}"#)
        })
}

fn query() -> impl Strategy<Value = (String, usize)> {
    (
        condition(),
        prop::collection::vec((prop::sample::select(vec!["AND", "OR"]), condition()), 0..6),
    )
        .prop_map(|(first, rest)| {
            let count = rest.len() + 1;
            let mut source = first;
            for (conjunction, condition) in rest {
                source.push_str(&format!(" {conjunction} {condition}"));
            }
            (source, count)
        })
}

/// Without parentheses every left operand of a group is a single condition.
fn is_right_leaning(ir: &IrNode) -> bool {
    match ir {
        IrNode::Group(group) => {
            matches!(*group.left, IrNode::Condition(_)) && is_right_leaning(&group.right)
        }
        IrNode::Condition(_) => true,
    }
}

proptest! {
    #[test]
    fn compiling_twice_gives_equal_trees((source, _) in query()) {
        let catalog = catalog();
        let first = compile(&source, &catalog).unwrap();
        let second = compile(&source, &catalog).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn flat_chains_are_right_leaning((source, count) in query()) {
        let catalog = catalog();
        let ir = QueryCompiler::new(&catalog).reduce(&source).unwrap();
        prop_assert_eq!(ir.leaf_count(), count);
        prop_assert!(is_right_leaning(&ir));
    }

    #[test]
    fn lexer_never_panics(source in ".*") {
        if let Ok(tokens) = tokenize(&source, false) {
            prop_assert_eq!(tokens.last().map(|token| token.kind), Some(TokenKind::Eof));
        }
    }
}
