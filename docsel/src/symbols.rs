//! Symbol table and template assembly
//!
//! Template arguments that are numbers or strings are spliced into the
//! selector text. Everything else (nested selectors, predicates, filter
//! queries) is registered under an `@n` token and looked up by the parser.

use std::collections::HashMap;

use serde_json::Value;

use crate::ast::{Predicate, Selector};
use crate::error::ParseError;
use crate::parser;

/// A value referenced from selector text through an `@n` token
#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Selector(Selector),
    Predicate(Predicate),
    Query(Value),
}

/// Symbol table for template arguments
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, symbol: Symbol) {
        self.entries.insert(token.into(), symbol);
    }

    pub fn get(&self, token: &str) -> Option<&Symbol> {
        self.entries.get(token)
    }

    /// Register a symbol under `@{slot}` and return the token
    pub fn register(&mut self, slot: usize, symbol: Symbol) -> String {
        let token = format!("@{slot}");
        self.entries.insert(token.clone(), symbol);
        token
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A template argument
#[derive(Debug, Clone, PartialEq)]
pub enum SelectArg {
    /// Spliced into the text as-is
    Literal(String),
    Symbol(Symbol),
}

impl From<&str> for SelectArg {
    fn from(s: &str) -> Self {
        SelectArg::Literal(s.to_string())
    }
}

impl From<String> for SelectArg {
    fn from(s: String) -> Self {
        SelectArg::Literal(s)
    }
}

impl From<usize> for SelectArg {
    fn from(n: usize) -> Self {
        SelectArg::Literal(n.to_string())
    }
}

impl From<u32> for SelectArg {
    fn from(n: u32) -> Self {
        SelectArg::Literal(n.to_string())
    }
}

impl From<i64> for SelectArg {
    fn from(n: i64) -> Self {
        SelectArg::Literal(n.to_string())
    }
}

impl From<i32> for SelectArg {
    fn from(n: i32) -> Self {
        SelectArg::Literal(n.to_string())
    }
}

impl From<Selector> for SelectArg {
    fn from(selector: Selector) -> Self {
        SelectArg::Symbol(Symbol::Selector(selector))
    }
}

impl From<Predicate> for SelectArg {
    fn from(predicate: Predicate) -> Self {
        SelectArg::Symbol(Symbol::Predicate(predicate))
    }
}

impl From<Value> for SelectArg {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => SelectArg::Literal(s),
            Value::Number(n) => SelectArg::Literal(n.to_string()),
            other => SelectArg::Symbol(Symbol::Query(other)),
        }
    }
}

/// Incremental selector template, also what the [`select!`](crate::select) macro expands to
#[derive(Debug, Clone, Default)]
pub struct SelectorBuilder {
    raw: String,
    symbols: SymbolTable,
    slots: usize,
}

impl SelectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a literal text fragment
    pub fn text(mut self, chunk: &str) -> Self {
        self.raw.push_str(chunk);
        self
    }

    /// Append a template argument
    pub fn arg(mut self, arg: impl Into<SelectArg>) -> Self {
        self.slots += 1;
        let token = match arg.into() {
            SelectArg::Literal(text) => text,
            SelectArg::Symbol(symbol) => self.symbols.register(self.slots, symbol),
        };
        self.raw.push(' ');
        self.raw.push_str(&token);
        self.raw.push(' ');
        self
    }

    /// The assembled selector text, with `@n` tokens for symbols
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn build(self) -> Result<Selector, ParseError> {
        parser::parse_selector(&self.raw, &self.symbols)
    }
}

/// Build a selector from literal chunks interleaved with arguments.
///
/// `chunks` must hold exactly one more element than `args`, like the pieces
/// of a template string around its placeholders.
pub fn build<I>(chunks: &[&str], args: I) -> Result<Selector, ParseError>
where
    I: IntoIterator,
    I::Item: Into<SelectArg>,
{
    let mut args = args.into_iter();
    let mut builder = SelectorBuilder::new();
    for (index, chunk) in chunks.iter().enumerate() {
        if index > 0 {
            match args.next() {
                Some(arg) => builder = builder.arg(arg),
                None => {
                    return Err(ParseError::new(format!(
                        "Missing template argument before chunk {index}"
                    ))
                    .with_position(builder.raw().len()))
                }
            }
        }
        builder = builder.text(chunk);
    }
    if args.next().is_some() {
        return Err(ParseError::new("Too many template arguments for the given chunks")
            .with_position(builder.raw().len()));
    }
    builder.build()
}
