//! Filter generation: walks the IR and emits the filter tree, expanding
//! field references into storage keys with externally supplied metadata.
//!
//! A storage key is `"{field}-{instance}.{array}"`. Wildcards enumerate
//! instances in ascending order, and arrays in ascending order within each
//! instance.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{CompileError, CompileResult};
use crate::filter::{FilterTree, Operand, Predicate};
use crate::ir::{
    Arithmetic, ComparisonOperator, CondensedCondition, Conjunction, FieldDescriptor, IndexSelector,
    IrNode, Literal, Subject, TargetValue,
};

/// Cardinality of one field: which instances (time points) and array
/// indices (measurements) it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMetadata {
    #[serde(alias = "startingTimePoint")]
    pub starting_instance: u32,
    #[serde(alias = "numOfTimePoints")]
    pub num_instances: u32,
    pub starting_measurement: u32,
    #[serde(alias = "numOfMeasurements")]
    pub num_measurements: u32,
}

impl FieldMetadata {
    pub fn new(
        starting_instance: u32,
        num_instances: u32,
        starting_measurement: u32,
        num_measurements: u32,
    ) -> Self {
        Self {
            starting_instance,
            num_instances,
            starting_measurement,
            num_measurements,
        }
    }

    /// A field with one instance and one measurement, both at index 0.
    pub fn single() -> Self {
        Self::new(0, 1, 0, 1)
    }

    pub fn instances(&self) -> Range<u32> {
        self.starting_instance..self.starting_instance.saturating_add(self.num_instances)
    }

    pub fn measurements(&self) -> Range<u32> {
        self.starting_measurement..self.starting_measurement.saturating_add(self.num_measurements)
    }
}

/// Read-only source of field metadata.
pub trait FieldMetadataLookup {
    /// Returns `None` when the field is not registered.
    fn field_metadata(&self, field_id: &str) -> Option<FieldMetadata>;
}

impl<S: BuildHasher> FieldMetadataLookup for HashMap<String, FieldMetadata, S> {
    fn field_metadata(&self, field_id: &str) -> Option<FieldMetadata> {
        self.get(field_id).copied()
    }
}

impl FieldMetadataLookup for BTreeMap<String, FieldMetadata> {
    fn field_metadata(&self, field_id: &str) -> Option<FieldMetadata> {
        self.get(field_id).copied()
    }
}

impl<F> FieldMetadataLookup for F
where
    F: Fn(&str) -> Option<FieldMetadata>,
{
    fn field_metadata(&self, field_id: &str) -> Option<FieldMetadata> {
        self(field_id)
    }
}

/// Storage key of one concrete field value.
pub fn field_key(field: &str, instance: u32, array: u32) -> String {
    format!("{field}-{instance}.{array}")
}

/// Turns IR into a [`FilterTree`].
pub struct FilterGenerator<'a, L: ?Sized> {
    lookup: &'a L,
}

impl<'a, L> FilterGenerator<'a, L>
where
    L: FieldMetadataLookup + ?Sized,
{
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup }
    }

    /// Generate the filter tree for `ir`. Either the whole tree is built or
    /// the first error is returned.
    ///
    /// The right spine of each chain is walked in a loop; only left operands
    /// that are themselves groups recurse.
    pub fn generate(&self, ir: &IrNode) -> CompileResult<FilterTree> {
        let mut lefts = Vec::new();
        let mut node = ir;
        let mut acc = loop {
            match node {
                IrNode::Group(group) => {
                    lefts.push((group.conjunction, self.generate(&group.left)?));
                    node = &group.right;
                }
                IrNode::Condition(condition) => break self.condition(condition)?,
            }
        };
        while let Some((conjunction, left)) = lefts.pop() {
            acc = FilterTree::group(conjunction, left, acc);
        }
        Ok(acc)
    }

    fn condition(&self, condition: &CondensedCondition) -> CompileResult<FilterTree> {
        let operator = condition.comparison_operator;
        match &condition.subject {
            Subject::Field(field) => {
                let keys = self.expand(field)?;
                match operator {
                    ComparisonOperator::Exists => self.exists(field, keys, &condition.target_value),
                    ComparisonOperator::Count => self.count(field, keys, &condition.target_value),
                    _ => self.compare(field, keys, operator, &condition.target_value),
                }
            }
            Subject::Expression(expression) => {
                self.derived(expression, operator, &condition.target_value)
            }
        }
    }

    /// Resolves a field reference to its storage keys.
    pub fn expand(&self, field: &FieldDescriptor) -> CompileResult<Vec<String>> {
        let metadata = self.lookup.field_metadata(&field.field).ok_or_else(|| {
            CompileError::unknown_field(&field.field, "no metadata is registered for this field")
        })?;

        let instances = select(field.instance, metadata.starting_instance, metadata.instances());
        let arrays = select(field.array, metadata.starting_measurement, metadata.measurements());
        if instances.is_empty() {
            return Err(CompileError::unknown_field(&field.field, "the field has no instances"));
        }
        if arrays.is_empty() {
            return Err(CompileError::unknown_field(&field.field, "the field has no measurements"));
        }

        let keys: Vec<String> = instances
            .iter()
            .flat_map(|&instance| {
                arrays
                    .iter()
                    .map(move |&array| field_key(&field.field, instance, array))
            })
            .collect();
        if field.has_wildcard() {
            trace!(field = %field, keys = keys.len(), "expanded wildcard field reference");
        }
        Ok(keys)
    }

    fn compare(
        &self,
        field: &FieldDescriptor,
        keys: Vec<String>,
        operator: ComparisonOperator,
        target: &TargetValue,
    ) -> CompileResult<FilterTree> {
        let nodes: Vec<FilterTree> = match target {
            TargetValue::Literal(literal) => {
                let value = if operator.is_ordering() {
                    literal.to_numeric().ok_or_else(|| {
                        CompileError::malformed_value(
                            &field.field,
                            format!("'{operator}' needs a numeric value, got {literal}"),
                        )
                    })?
                } else {
                    literal.clone()
                };
                keys.into_iter()
                    .map(|key| {
                        FilterTree::leaf(Predicate::Compare {
                            key,
                            operator,
                            value: Operand::Literal(value.clone()),
                        })
                    })
                    .collect()
            }
            TargetValue::Field(other) => {
                let other_keys = self.expand(other)?;
                keys.iter()
                    .flat_map(|key| {
                        other_keys.iter().map(move |other_key| {
                            FilterTree::leaf(Predicate::Compare {
                                key: key.clone(),
                                operator,
                                value: Operand::Field {
                                    field: other_key.clone(),
                                },
                            })
                        })
                    })
                    .collect()
            }
        };
        chain(field, Conjunction::Or, nodes)
    }

    fn exists(
        &self,
        field: &FieldDescriptor,
        keys: Vec<String>,
        target: &TargetValue,
    ) -> CompileResult<FilterTree> {
        let exists = match target {
            TargetValue::Literal(literal) => boolean_flag(literal),
            TargetValue::Field(_) => None,
        }
        .ok_or_else(|| {
            CompileError::malformed_value(
                &field.field,
                format!("'exists' needs true or false, got {target}"),
            )
        })?;

        // Any expansion present satisfies `exists true`; `exists false`
        // needs every expansion absent.
        let combinator = if exists {
            Conjunction::Or
        } else {
            Conjunction::And
        };
        let nodes = keys
            .into_iter()
            .map(|key| FilterTree::leaf(Predicate::Exists { key, exists }));
        chain(field, combinator, nodes)
    }

    fn count(
        &self,
        field: &FieldDescriptor,
        keys: Vec<String>,
        target: &TargetValue,
    ) -> CompileResult<FilterTree> {
        let (operator, value) = match target {
            TargetValue::Literal(literal) => count_relation(literal),
            TargetValue::Field(_) => None,
        }
        .ok_or_else(|| {
            CompileError::malformed_value(
                &field.field,
                format!("'count' needs a non-negative integer, optionally after =, > or <, got {target}"),
            )
        })?;
        Ok(FilterTree::leaf(Predicate::Count {
            keys,
            operator,
            value,
        }))
    }

    fn derived(
        &self,
        expression: &Arithmetic<FieldDescriptor>,
        operator: ComparisonOperator,
        target: &TargetValue,
    ) -> CompileResult<FilterTree> {
        let field_id = expression
            .fields()
            .first()
            .map(|field| field.field.clone())
            .unwrap_or_else(|| "expr".to_string());

        if matches!(operator, ComparisonOperator::Exists | ComparisonOperator::Count) {
            return Err(CompileError::malformed_value(
                field_id,
                format!("'{operator}' cannot be applied to an expression"),
            ));
        }
        let value = match target {
            TargetValue::Literal(literal) => literal.as_f64(),
            TargetValue::Field(_) => None,
        }
        .ok_or_else(|| {
            CompileError::malformed_value(
                &field_id,
                format!("an expression must be compared with a number, got {target}"),
            )
        })?;

        let expression = expression.try_map(&mut |field: &FieldDescriptor| {
            if field.has_wildcard() {
                return Err(CompileError::malformed_value(
                    &field.field,
                    "'any' is not allowed inside expr(...)",
                ));
            }
            let mut keys = self.expand(field)?;
            keys.pop().ok_or_else(|| {
                CompileError::unknown_field(&field.field, "the field has no values")
            })
        })?;
        Ok(FilterTree::leaf(Predicate::Derived {
            expression,
            operator,
            value,
        }))
    }
}

fn select(selector: IndexSelector, starting: u32, range: Range<u32>) -> Vec<u32> {
    match selector {
        IndexSelector::Default => vec![starting],
        IndexSelector::At(index) => vec![index],
        IndexSelector::Any => range.collect(),
    }
}

fn chain(
    field: &FieldDescriptor,
    combinator: Conjunction,
    nodes: impl IntoIterator<Item = FilterTree>,
) -> CompileResult<FilterTree> {
    FilterTree::chain(combinator, nodes)
        .ok_or_else(|| CompileError::unknown_field(&field.field, "the reference expands to no keys"))
}

/// `2` or `"2"` means exactly two; `"> 2"` and `"< 2"` are strict bounds.
fn count_relation(literal: &Literal) -> Option<(ComparisonOperator, u64)> {
    let (operator, amount) = match literal {
        Literal::String(s) => {
            let s = s.trim();
            let (operator, rest) = [
                ('=', ComparisonOperator::Eq),
                ('>', ComparisonOperator::Gt),
                ('<', ComparisonOperator::Lt),
            ]
            .into_iter()
            .find_map(|(symbol, operator)| s.strip_prefix(symbol).map(|rest| (operator, rest)))
            .unwrap_or((ComparisonOperator::Eq, s));
            (operator, Literal::String(rest.to_string()).to_numeric()?)
        }
        other => (ComparisonOperator::Eq, other.to_numeric()?),
    };
    match amount {
        Literal::Integer(value) => u64::try_from(value).ok().map(|value| (operator, value)),
        _ => None,
    }
}

/// `1`/`0`, `true`/`false` and `yes`/`no`, case-insensitive for strings.
fn boolean_flag(literal: &Literal) -> Option<bool> {
    match literal {
        Literal::Integer(1) => Some(true),
        Literal::Integer(0) => Some(false),
        Literal::Integer(_) | Literal::Float(_) => None,
        Literal::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
    }
}
