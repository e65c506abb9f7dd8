//! A compiler for the cohort query language.
//!
//! ```text
//! text -> tokens -> CST -> IR -> filter tree
//! ```
//!
//! Query text such as
//! `value (field "Sex") = "Male" OR ( value (field "Age") = 30 AND value (field "Sex") = "Female" )`
//! is lexed, parsed into a concrete syntax tree, reduced to a binary IR and
//! finally expanded into a [`FilterTree`] of predicates over storage keys.
//! Field cardinality comes from a caller supplied [`FieldMetadataLookup`].
//! Compilation is synchronous and performs no I/O.

pub mod config;
pub mod cst;
pub mod document;
pub mod error;
pub mod filter;
pub mod generator;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod reducer;
pub mod sql_compiler;
pub mod token;

use tracing::debug;

pub use error::{CompileError, CompileResult, LexError, ParseError};
pub use filter::{FilterTree, Operand, Predicate};
pub use generator::{FieldMetadata, FieldMetadataLookup, FilterGenerator};
pub use ir::IrNode;

use cst::ConditionGroup;
use token::Token;

/// Runs the pipeline, or any prefix of it, against one metadata lookup.
///
/// Every call starts from the source text and builds fresh structures; the
/// compiler holds no state between calls.
pub struct QueryCompiler<'a, L: ?Sized> {
    lookup: &'a L,
    /// Keywords must use their canonical spelling when set.
    preserve_case: bool,
}

impl<'a, L> QueryCompiler<'a, L>
where
    L: FieldMetadataLookup + ?Sized,
{
    pub fn new(lookup: &'a L) -> Self {
        Self {
            lookup,
            preserve_case: true,
        }
    }

    pub fn preserve_case(mut self, preserve_case: bool) -> Self {
        self.preserve_case = preserve_case;
        self
    }

    pub fn tokenize(&self, source: &str) -> CompileResult<Vec<Token>> {
        let tokens = lexer::tokenize(source, self.preserve_case)?;
        debug!(tokens = tokens.len(), "lexed query");
        Ok(tokens)
    }

    pub fn parse(&self, source: &str) -> CompileResult<ConditionGroup> {
        let tokens = self.tokenize(source)?;
        let cst = parser::parse(&tokens)?;
        debug!("parsed query");
        Ok(cst)
    }

    pub fn reduce(&self, source: &str) -> CompileResult<IrNode> {
        let ir = reducer::reduce(&self.parse(source)?)?;
        debug!(conditions = ir.leaf_count(), ir = %ir, "reduced query");
        Ok(ir)
    }

    /// Compile query text into a filter tree.
    pub fn compile(&self, source: &str) -> CompileResult<FilterTree> {
        let ir = self.reduce(source)?;
        let tree = FilterGenerator::new(self.lookup).generate(&ir)?;
        debug!(predicates = tree.predicates().len(), "generated filter tree");
        Ok(tree)
    }
}

/// Compile `source` with case-sensitive keywords.
pub fn compile<L>(source: &str, lookup: &L) -> CompileResult<FilterTree>
where
    L: FieldMetadataLookup + ?Sized,
{
    QueryCompiler::new(lookup).compile(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup() -> HashMap<String, FieldMetadata> {
        ["Sex", "Age"]
            .into_iter()
            .map(|id| (id.to_string(), FieldMetadata::single()))
            .collect()
    }

    #[test]
    fn test_compile_end_to_end() {
        let tree = compile(
            r#"value (field "Sex") = "Male" OR ( value (field "Age") = 30 AND value(field "Sex") = "Female" )"#,
            &lookup(),
        )
        .unwrap();
        assert_eq!(
            tree.to_string(),
            r#"OR(Sex-0.0 = "Male", AND(Age-0.0 = 30, Sex-0.0 = "Female"))"#
        );
    }

    #[test]
    fn test_case_folding_option() {
        let lookup = lookup();
        let source = r#"VALUE (FIELD "Sex") = "Male" and value (field "Age") EXISTS 1"#;

        let error = QueryCompiler::new(&lookup).compile(source).unwrap_err();
        assert!(matches!(error, CompileError::Lex(LexError::UnknownWord { .. })));

        let tree = QueryCompiler::new(&lookup)
            .preserve_case(false)
            .compile(source)
            .unwrap();
        assert_eq!(tree.to_string(), r#"AND(Sex-0.0 = "Male", Age-0.0 exists true)"#);
    }

    #[test]
    fn test_each_stage_reports_its_error() {
        let lookup = lookup();
        let compiler = QueryCompiler::new(&lookup);
        assert!(matches!(
            compiler.compile(r#"value (field "Sex) = 1"#),
            Err(CompileError::Lex(LexError::UnterminatedString { position: 13 }))
        ));
        assert!(matches!(
            compiler.compile(r#"value (field "Sex") = 1 AND"#),
            Err(CompileError::Parse(_))
        ));
        assert!(matches!(
            compiler.compile(r#"value (field "Nope") = 1"#),
            Err(CompileError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_long_chain_and_deep_nesting() {
        let lookup = lookup();
        let source = vec![r#"value (field "Age") > 30"#; 10_000].join(" AND ");
        let tree = compile(&source, &lookup).unwrap();
        assert_eq!(tree.predicates().len(), 10_000);

        let source = format!(
            r#"{}value (field "Age") > 30{}"#,
            "(".repeat(50_000),
            ")".repeat(50_000)
        );
        assert!(matches!(
            compile(&source, &lookup),
            Err(CompileError::Parse(ParseError::NestingTooDeep { .. }))
        ));
    }
}
