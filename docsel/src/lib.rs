//! DOCSEL - Document Selector Language
//!
//! A compact path language for navigating and reshaping JSON documents,
//! resolved by docrel against a live document store.
//!
//! # Syntax Overview
//!
//! ```text
//! author name               -- field access, dots and spaces are interchangeable
//! author.favoriteBooks 0    -- array index
//! books $ title             -- map over an array, flattening one level
//! books $$ tags             -- map without flattening
//! parent > name             -- stop (null) when `parent` is null
//! [title, author name]      -- tuple
//! { *, author name }        -- object, `*` copies the remaining keys
//! ```
//!
//! # Template Arguments
//!
//! Selectors can embed values that have no textual form. Each one is
//! registered under an `@n` token:
//!
//! - a nested [`Selector`], composed in place
//! - a [`Predicate`], either a filter `@n rest` or a switch `@n ? a : b`
//! - a filter query object, narrowing a lazy document set
//!
//! Numbers and strings are spliced into the text instead.
//!
//! ```ignore
//! let recent = json!({ "year": { "$gte": 2000 } });
//! let selector = docsel::select!["favoriteBooks", recent, "$ title"]?;
//! ```

mod ast;
mod error;
mod parser;
mod symbols;

pub use ast::*;
pub use error::ParseError;
pub use symbols::{build, SelectArg, SelectorBuilder, Symbol, SymbolTable};

/// Parse a selector string with no template arguments
pub fn parse(input: &str) -> Result<Selector, ParseError> {
    parser::parse_selector(input, &SymbolTable::new())
}

/// Parse a selector string whose `@n` tokens refer to `symbols`
pub fn parse_with(input: &str, symbols: &SymbolTable) -> Result<Selector, ParseError> {
    parser::parse_selector(input, symbols)
}

/// Build a selector from a mix of text and template arguments.
///
/// Every part goes through [`SelectorBuilder::arg`], so strings and numbers
/// are spliced while selectors, predicates and queries become symbols.
#[macro_export]
macro_rules! select {
    ($($part:expr),* $(,)?) => {{
        let builder = $crate::SelectorBuilder::new();
        $( let builder = builder.arg($part); )*
        builder.build()
    }};
}
