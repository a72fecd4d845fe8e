//! Selector parser using nom
//!
//! Lexemes are recognized with nom combinators; the grammar itself is a
//! recursive descent over the remaining input so that every error can report
//! the offset of the offending character.

use nom::{
    bytes::complete::{tag, take_while},
    character::complete::{digit1, satisfy},
    combinator::recognize,
    sequence::pair,
    IResult,
};

use crate::ast::{ObjectKey, Selector};
use crate::error::ParseError;
use crate::symbols::{Symbol, SymbolTable};

type PResult<'s, T> = Result<(&'s str, T), ParseError>;

/// Parse a complete selector, resolving `@n` tokens through `symbols`
pub fn parse_selector(raw: &str, symbols: &SymbolTable) -> Result<Selector, ParseError> {
    let parser = Parser { raw, symbols };
    let (rest, selector) = parser.selector(raw)?;
    let rest = skip_spacing(rest);
    if let Some(c) = rest.chars().next() {
        return Err(parser.fail(
            rest,
            format!("Incomplete selector parsing, unexpected character <{c}>"),
        ));
    }
    Ok(selector)
}

// ============================================================================
// Lexemes
// ============================================================================

/// Whitespace and dots both separate selector parts
fn spacing(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c.is_whitespace() || c == '.')(input)
}

fn skip_spacing(input: &str) -> &str {
    match spacing(input) {
        Ok((rest, _)) => rest,
        Err(_) => input,
    }
}

fn field(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_' || c == '-'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
    ))(input)
}

fn index(input: &str) -> IResult<&str, &str> {
    digit1(input)
}

fn symbol(input: &str) -> IResult<&str, &str> {
    recognize(pair(tag("@"), digit1))(input)
}

fn punct<'i>(token: &'static str) -> impl FnMut(&'i str) -> IResult<&'i str, &'i str> {
    tag(token)
}

// ============================================================================
// Grammar
// ============================================================================

struct Parser<'s> {
    raw: &'s str,
    symbols: &'s SymbolTable,
}

impl<'s> Parser<'s> {
    fn position(&self, rest: &str) -> usize {
        self.raw.len() - rest.len()
    }

    fn fail(&self, rest: &str, message: impl Into<String>) -> ParseError {
        ParseError::new(message).with_position(self.position(rest))
    }

    fn unexpected(&self, rest: &str, expected: &str) -> ParseError {
        match rest.chars().next() {
            Some(c) => self.fail(rest, format!("Unexpected character <{c}>, expected {expected}")),
            None => self.fail(rest, format!("Unexpected end of selector, expected {expected}")),
        }
    }

    fn selector(&self, input: &'s str) -> PResult<'s, Selector> {
        let input = skip_spacing(input);

        if let Ok((rest, name)) = field(input) {
            let (rest, next) = self.selector(rest)?;
            return Ok((rest, Selector::field(name, next)));
        }

        if let Ok((rest, digits)) = index(input) {
            let position: usize = digits
                .parse()
                .map_err(|_| self.fail(input, format!("Index <{digits}> is out of range")))?;
            let (rest, next) = self.selector(rest)?;
            return Ok((rest, Selector::index(position, next)));
        }

        if let Ok((rest, _)) = punct(">")(input) {
            let (rest, next) = self.selector(rest)?;
            return Ok((rest, Selector::shortcut(next)));
        }

        // `$$` must be tried before `$`
        if let Ok((rest, _)) = punct("$$")(input) {
            let (rest, next) = self.selector(rest)?;
            return Ok((rest, Selector::hard_map(next)));
        }

        if let Ok((rest, _)) = punct("$")(input) {
            let (rest, next) = self.selector(rest)?;
            return Ok((rest, Selector::map(next)));
        }

        if let Ok((rest, token)) = symbol(input) {
            return self.argument(input, rest, token);
        }

        if let Ok((rest, _)) = punct("[")(input) {
            return self.tuple(rest);
        }

        if let Ok((rest, _)) = punct("{")(input) {
            return self.object(rest);
        }

        Ok((input, Selector::Identity))
    }

    fn argument(&self, at: &'s str, rest: &'s str, token: &str) -> PResult<'s, Selector> {
        match self.symbols.get(token) {
            Some(Symbol::Selector(nested)) => {
                let continuation_at = skip_spacing(rest);
                let (rest, next) = self.selector(rest)?;
                let composed = nested.clone().chain(next).ok_or_else(|| {
                    self.fail(
                        continuation_at,
                        "A tuple or object selector cannot be followed by another selector",
                    )
                })?;
                Ok((rest, composed))
            }
            Some(Symbol::Predicate(predicate)) => {
                let after = skip_spacing(rest);
                if let Ok((after, _)) = punct("?")(after) {
                    let (after, then) = self.selector(after)?;
                    let after = skip_spacing(after);
                    let (after, otherwise) = match punct(":")(after) {
                        Ok((after, _)) => self.selector(after)?,
                        Err(_) => (after, Selector::Identity),
                    };
                    return Ok((after, Selector::switch(predicate.clone(), then, otherwise)));
                }
                let (rest, next) = self.selector(rest)?;
                Ok((rest, Selector::filter(predicate.clone(), next)))
            }
            Some(Symbol::Query(query)) if query.is_object() => {
                let (rest, next) = self.selector(rest)?;
                Ok((rest, Selector::filter_query(query.clone(), next)))
            }
            Some(Symbol::Query(_)) | None => Err(self.fail(
                at,
                format!("Invalid template argument <{token}> in selector string"),
            )),
        }
    }

    fn tuple(&self, mut input: &'s str) -> PResult<'s, Selector> {
        let mut items = Vec::new();
        loop {
            let (rest, item) = self.selector(input)?;
            items.push(item);
            let rest = skip_spacing(rest);
            if let Ok((rest, _)) = punct(",")(rest) {
                input = rest;
                continue;
            }
            if let Ok((rest, _)) = punct("]")(rest) {
                return Ok((rest, Selector::Tuple(items)));
            }
            return Err(self.unexpected(rest, "<,> or <]>"));
        }
    }

    fn object(&self, mut input: &'s str) -> PResult<'s, Selector> {
        let mut entries = Vec::new();
        loop {
            let at = skip_spacing(input);
            let (rest, key) = if let Ok((rest, name)) = field(at) {
                (rest, ObjectKey::Field(name.to_string()))
            } else if let Ok((rest, _)) = punct("*")(at) {
                (rest, ObjectKey::Wildcard)
            } else {
                return Err(self.fail(
                    at,
                    "Object subselections must start with a field or wildcard selector",
                ));
            };
            let (rest, subselector) = self.selector(rest)?;
            entries.push((key, subselector));
            let rest = skip_spacing(rest);
            if let Ok((rest, _)) = punct(",")(rest) {
                input = rest;
                continue;
            }
            if let Ok((rest, _)) = punct("}")(rest) {
                return Ok((rest, Selector::object(entries)));
            }
            return Err(self.unexpected(rest, "<,> or <}>"));
        }
    }
}
