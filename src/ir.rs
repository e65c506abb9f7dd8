//! Intermediate representation: a strictly binary tree of logical groups
//! whose leaves are condensed comparisons.
//!
//! The IR carries no grammar scaffolding. Field references are still
//! symbolic here; wildcard indices are only resolved by the generator.

use std::fmt;
use std::mem;

use serde::Serialize;

/// Boolean combinator of a logical group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    pub fn as_str(self) -> &'static str {
        match self {
            Conjunction::And => "AND",
            Conjunction::Or => "OR",
        }
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ComparisonOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "count")]
    Count,
}

impl ComparisonOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::NotEq => "!=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Exists => "exists",
            ComparisonOperator::Count => "count",
        }
    }

    /// `>` and `<` only make sense against numbers.
    pub fn is_ordering(self) -> bool {
        matches!(self, ComparisonOperator::Gt | ComparisonOperator::Lt)
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which instance or array index of a field a reference selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IndexSelector {
    /// Not written in the query; resolves to the field's starting index.
    Default,
    At(u32),
    /// WILDCARD_ANY: every index the field has.
    Any,
}

/// A reference to one field, or under a wildcard to a family of fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldDescriptor {
    pub field: String,
    pub instance: IndexSelector,
    pub array: IndexSelector,
}

impl FieldDescriptor {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            instance: IndexSelector::Default,
            array: IndexSelector::Default,
        }
    }

    pub fn instance(mut self, instance: IndexSelector) -> Self {
        self.instance = instance;
        self
    }

    pub fn array(mut self, array: IndexSelector) -> Self {
        self.array = array;
        self
    }

    pub fn has_wildcard(&self) -> bool {
        self.instance == IndexSelector::Any || self.array == IndexSelector::Any
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.field)?;
        for (name, selector) in [("instance", self.instance), ("array", self.array)] {
            match selector {
                IndexSelector::Default => {}
                IndexSelector::At(index) => write!(f, " {name} {index}")?,
                IndexSelector::Any => write!(f, " {name} any")?,
            }
        }
        Ok(())
    }
}

/// A literal value from the query text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
}

impl Literal {
    /// Reads a numeric lexeme: integers when there is no fractional part and
    /// the value fits, floats otherwise. Values beyond the `f64` range are
    /// rejected.
    pub fn from_number(lexeme: &str) -> Option<Literal> {
        if !lexeme.contains('.') {
            if let Ok(value) = lexeme.parse::<i64>() {
                return Some(Literal::Integer(value));
            }
        }
        lexeme
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(Literal::Float)
    }

    /// Numeric view of the literal; numeric strings are coerced. NaN and
    /// infinities have no numeric view.
    pub fn to_numeric(&self) -> Option<Literal> {
        match self {
            Literal::Integer(_) => Some(self.clone()),
            Literal::Float(value) => value.is_finite().then(|| self.clone()),
            Literal::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                Literal::from_number(trimmed)
            }
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.to_numeric()? {
            Literal::Integer(value) => Some(value as f64),
            Literal::Float(value) => Some(value),
            Literal::String(_) => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::Integer(value) => write!(f, "{value}"),
            Literal::Float(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ArithmeticOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOperator::Add => "+",
            ArithmeticOperator::Subtract => "-",
            ArithmeticOperator::Multiply => "*",
            ArithmeticOperator::Divide => "/",
        }
    }
}

/// Arithmetic over numbers and field values, generic over how a field is
/// referenced: a [`FieldDescriptor`] in the IR, a concrete key in the
/// filter tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Arithmetic<F> {
    Number(f64),
    Field(F),
    Binary {
        operator: ArithmeticOperator,
        left: Box<Arithmetic<F>>,
        right: Box<Arithmetic<F>>,
    },
}

impl<F> Arithmetic<F> {
    pub fn binary(operator: ArithmeticOperator, left: Arithmetic<F>, right: Arithmetic<F>) -> Self {
        Arithmetic::Binary {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Rebuilds the expression with every field reference replaced.
    pub fn try_map<G, E>(
        &self,
        f: &mut impl FnMut(&F) -> Result<G, E>,
    ) -> Result<Arithmetic<G>, E> {
        Ok(match self {
            Arithmetic::Number(value) => Arithmetic::Number(*value),
            Arithmetic::Field(field) => Arithmetic::Field(f(field)?),
            Arithmetic::Binary {
                operator,
                left,
                right,
            } => Arithmetic::binary(*operator, left.try_map(f)?, right.try_map(f)?),
        })
    }

    /// Field references in left-to-right order.
    pub fn fields(&self) -> Vec<&F> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, fields: &mut Vec<&'a F>) {
        match self {
            Arithmetic::Number(_) => {}
            Arithmetic::Field(field) => fields.push(field),
            Arithmetic::Binary { left, right, .. } => {
                left.collect_fields(fields);
                right.collect_fields(fields);
            }
        }
    }
}

impl<F: fmt::Display> fmt::Display for Arithmetic<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arithmetic::Number(value) => write!(f, "{value}"),
            Arithmetic::Field(field) => write!(f, "{field}"),
            Arithmetic::Binary {
                operator,
                left,
                right,
            } => write!(f, "({left} {} {right})", operator.symbol()),
        }
    }
}

/// Left-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Subject {
    Field(FieldDescriptor),
    Expression(Arithmetic<FieldDescriptor>),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Field(field) => write!(f, "{field}"),
            Subject::Expression(expression) => write!(f, "expr{expression}"),
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetValue {
    Literal(Literal),
    Field(FieldDescriptor),
}

impl fmt::Display for TargetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetValue::Literal(literal) => write!(f, "{literal}"),
            TargetValue::Field(field) => write!(f, "{field}"),
        }
    }
}

/// One atomic comparison; always a leaf.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CondensedCondition {
    pub comparison_operator: ComparisonOperator,
    pub subject: Subject,
    pub target_value: TargetValue,
}

impl CondensedCondition {
    pub fn new(
        comparison_operator: ComparisonOperator,
        subject: Subject,
        target_value: TargetValue,
    ) -> Self {
        Self {
            comparison_operator,
            subject,
            target_value,
        }
    }

    /// `field <op> literal`
    pub fn field_literal(
        field: FieldDescriptor,
        comparison_operator: ComparisonOperator,
        literal: Literal,
    ) -> Self {
        Self::new(
            comparison_operator,
            Subject::Field(field),
            TargetValue::Literal(literal),
        )
    }
}

impl fmt::Display for CondensedCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.subject, self.comparison_operator, self.target_value
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalGroup {
    pub conjunction: Conjunction,
    pub left: Box<IrNode>,
    pub right: Box<IrNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IrNode {
    Group(LogicalGroup),
    Condition(CondensedCondition),
}

impl IrNode {
    pub fn group(conjunction: Conjunction, left: IrNode, right: IrNode) -> Self {
        IrNode::Group(LogicalGroup {
            conjunction,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn and(left: IrNode, right: IrNode) -> Self {
        IrNode::group(Conjunction::And, left, right)
    }

    /// Number of comparisons in the tree.
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match node {
                IrNode::Group(group) => {
                    pending.push(&group.right);
                    pending.push(&group.left);
                }
                IrNode::Condition(_) => count += 1,
            }
        }
        count
    }

    /// A leaf that owns no heap memory, swapped in while a tree is torn down.
    fn vacant() -> Self {
        IrNode::Condition(CondensedCondition::field_literal(
            FieldDescriptor::new(String::new()),
            ComparisonOperator::Eq,
            Literal::Integer(0),
        ))
    }
}

/// Nested groups are moved onto a work list before their parent is freed, so
/// a long chain is dropped in a loop.
impl Drop for IrNode {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_groups(self, &mut pending);
        while let Some(mut node) = pending.pop() {
            detach_groups(&mut node, &mut pending);
        }
    }
}

fn detach_groups(node: &mut IrNode, pending: &mut Vec<IrNode>) {
    if let IrNode::Group(group) = node {
        for child in [&mut group.left, &mut group.right] {
            if matches!(child.as_ref(), IrNode::Group(_)) {
                pending.push(mem::replace(child.as_mut(), IrNode::vacant()));
            }
        }
    }
}

impl From<CondensedCondition> for IrNode {
    fn from(condition: CondensedCondition) -> Self {
        IrNode::Condition(condition)
    }
}

/// `AND(left, right)`. The right spine is written in a loop.
impl fmt::Display for IrNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut node = self;
        let mut open = 0;
        loop {
            match node {
                IrNode::Group(group) => {
                    write!(f, "{}({}, ", group.conjunction, group.left)?;
                    open += 1;
                    node = &group.right;
                }
                IrNode::Condition(condition) => {
                    write!(f, "{condition}")?;
                    break;
                }
            }
        }
        for _ in 0..open {
            f.write_str(")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_literals() {
        assert_eq!(Literal::from_number("30"), Some(Literal::Integer(30)));
        assert_eq!(Literal::from_number("1.5"), Some(Literal::Float(1.5)));
        assert_eq!(
            Literal::from_number("99999999999999999999"),
            Some(Literal::Float(1e20))
        );
        assert_eq!(Literal::from_number(&"9".repeat(400)), None);
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(
            Literal::String(" 42 ".to_string()).to_numeric(),
            Some(Literal::Integer(42))
        );
        assert_eq!(Literal::String("abc".to_string()).to_numeric(), None);
        assert_eq!(Literal::String(String::new()).to_numeric(), None);
        assert_eq!(Literal::String("inf".to_string()).to_numeric(), None);
        assert_eq!(Literal::Integer(3).as_f64(), Some(3.0));
        assert_eq!(Literal::Float(f64::INFINITY).to_numeric(), None);
        assert_eq!(Literal::Float(f64::NAN).as_f64(), None);
    }

    #[test]
    fn test_long_chain_display_and_drop() {
        let leaf = || -> IrNode {
            CondensedCondition::field_literal(
                FieldDescriptor::new("A"),
                ComparisonOperator::Eq,
                Literal::Integer(1),
            )
            .into()
        };
        let mut ir = leaf();
        for _ in 1..10_000 {
            ir = IrNode::and(leaf(), ir);
        }
        assert_eq!(ir.leaf_count(), 10_000);

        let rendered = ir.to_string();
        assert!(rendered.starts_with("AND(A = 1, AND(A = 1, "));
        assert!(rendered.ends_with(&")".repeat(9_999)));
    }

    #[test]
    fn test_display() {
        let ir = IrNode::and(
            CondensedCondition::field_literal(
                FieldDescriptor::new("A"),
                ComparisonOperator::Eq,
                Literal::Integer(1),
            )
            .into(),
            CondensedCondition::field_literal(
                FieldDescriptor::new("B")
                    .instance(IndexSelector::Any)
                    .array(IndexSelector::At(0)),
                ComparisonOperator::NotEq,
                Literal::String("x".to_string()),
            )
            .into(),
        );
        assert_eq!(ir.to_string(), r#"AND(A = 1, B instance any array 0 != "x")"#);
        assert_eq!(ir.leaf_count(), 2);
    }

    #[test]
    fn test_arithmetic_try_map() {
        let expression = Arithmetic::binary(
            ArithmeticOperator::Divide,
            Arithmetic::Field("W"),
            Arithmetic::binary(
                ArithmeticOperator::Multiply,
                Arithmetic::Field("H"),
                Arithmetic::Number(2.0),
            ),
        );
        let mapped: Result<Arithmetic<String>, ()> =
            expression.try_map(&mut |field| Ok(format!("{field}-0.0")));
        let mapped = mapped.unwrap();
        assert_eq!(mapped.to_string(), "(W-0.0 / (H-0.0 * 2))");
        assert_eq!(mapped.fields(), vec!["W-0.0", "H-0.0"]);
    }
}
