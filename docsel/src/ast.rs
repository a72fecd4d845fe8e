//! Abstract Syntax Tree for selectors
//!
//! A [`Selector`] is immutable once built. Every node carries exactly what it
//! needs to be resolved later; nothing refers back to the selector text.

use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A compiled selector
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// The empty selector, returns the current value
    Identity,
    /// `field selector`
    Field { name: String, next: Box<Selector> },
    /// `index selector`
    Index { index: usize, next: Box<Selector> },
    /// `> selector`, stops on null
    Shortcut(Box<Selector>),
    /// `$ selector`, maps and flattens one level
    Map(Box<Selector>),
    /// `$$ selector`, maps without flattening
    HardMap(Box<Selector>),
    /// `@predicate selector`
    Filter {
        predicate: Predicate,
        next: Box<Selector>,
    },
    /// `@predicate ? selector : selector`
    Switch {
        predicate: Predicate,
        then: Box<Selector>,
        otherwise: Box<Selector>,
    },
    /// `@query selector`, narrows a lazy document set
    FilterQuery { query: Value, next: Box<Selector> },
    /// `[selector, ...]`
    Tuple(Vec<Selector>),
    /// `{field selector, * selector, ...}`
    Object(Vec<(ObjectKey, Selector)>),
}

/// Key of an object subselection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    Field(String),
    /// `*` - every key of the input not listed explicitly
    Wildcard,
}

impl Default for Selector {
    fn default() -> Self {
        Self::Identity
    }
}

impl Selector {
    pub fn field(name: impl Into<String>, next: Selector) -> Self {
        Self::Field {
            name: name.into(),
            next: Box::new(next),
        }
    }

    pub fn index(index: usize, next: Selector) -> Self {
        Self::Index {
            index,
            next: Box::new(next),
        }
    }

    pub fn shortcut(next: Selector) -> Self {
        Self::Shortcut(Box::new(next))
    }

    pub fn map(next: Selector) -> Self {
        Self::Map(Box::new(next))
    }

    pub fn hard_map(next: Selector) -> Self {
        Self::HardMap(Box::new(next))
    }

    pub fn filter(predicate: Predicate, next: Selector) -> Self {
        Self::Filter {
            predicate,
            next: Box::new(next),
        }
    }

    pub fn switch(predicate: Predicate, then: Selector, otherwise: Selector) -> Self {
        Self::Switch {
            predicate,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn filter_query(query: Value, next: Selector) -> Self {
        Self::FilterQuery {
            query,
            next: Box::new(next),
        }
    }

    /// Build an object selector; a repeated key keeps its first position and
    /// takes the last subselector
    pub fn object(entries: impl IntoIterator<Item = (ObjectKey, Selector)>) -> Self {
        let mut fields: Vec<(ObjectKey, Selector)> = Vec::new();
        for (key, selector) in entries {
            match fields.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = selector,
                None => fields.push((key, selector)),
            }
        }
        Self::Object(fields)
    }

    /// A `field1.field2...` chain ending in identity
    pub fn path<'a>(fields: impl IntoIterator<Item = &'a str>) -> Self {
        let fields: Vec<&str> = fields.into_iter().collect();
        fields
            .into_iter()
            .rev()
            .fold(Self::Identity, |next, name| Self::field(name, next))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Append `next` where this selector ends.
    ///
    /// A switch continues in its last written branch, as text following it
    /// would: the else branch, or the then branch when there is no else
    /// branch. Tuples and objects are terminal, so `None` is returned when
    /// `next` is not the identity.
    pub fn chain(self, next: Selector) -> Option<Selector> {
        if next.is_identity() {
            return Some(self);
        }
        let chained = match self {
            Self::Identity => next,
            Self::Field { name, next: inner } => Self::Field {
                name,
                next: Box::new(inner.chain(next)?),
            },
            Self::Index { index, next: inner } => Self::Index {
                index,
                next: Box::new(inner.chain(next)?),
            },
            Self::Shortcut(inner) => Self::Shortcut(Box::new(inner.chain(next)?)),
            Self::Map(inner) => Self::Map(Box::new(inner.chain(next)?)),
            Self::HardMap(inner) => Self::HardMap(Box::new(inner.chain(next)?)),
            Self::Filter {
                predicate,
                next: inner,
            } => Self::Filter {
                predicate,
                next: Box::new(inner.chain(next)?),
            },
            Self::Switch {
                predicate,
                then,
                otherwise,
            } if otherwise.is_identity() => Self::Switch {
                predicate,
                then: Box::new(then.chain(next)?),
                otherwise,
            },
            Self::Switch {
                predicate,
                then,
                otherwise,
            } => Self::Switch {
                predicate,
                then,
                otherwise: Box::new(otherwise.chain(next)?),
            },
            Self::FilterQuery { query, next: inner } => Self::FilterQuery {
                query,
                next: Box::new(inner.chain(next)?),
            },
            Self::Tuple(_) | Self::Object(_) => return None,
        };
        Some(chained)
    }
}

/// Future returned by a predicate test
pub type PredicateFuture = BoxFuture<'static, bool>;

type PredicateFn = dyn Fn(&Value, Option<usize>, &[Value]) -> PredicateFuture + Send + Sync;

/// A predicate callback `(item, index, array) -> bool`, possibly asynchronous.
///
/// When a predicate is tested against a whole value (switch selectors) the
/// index is `None` and the array is empty. Two predicates are equal only when
/// they share the same callback.
#[derive(Clone)]
pub struct Predicate(Arc<PredicateFn>);

impl Predicate {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Value, Option<usize>, &[Value]) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(move |item: &Value, index: Option<usize>, array: &[Value]| {
            future::ready(callback(item, index, array)).boxed()
        }))
    }

    /// Wrap an asynchronous callback; the returned future must own its data
    pub fn from_async<F, Fut>(callback: F) -> Self
    where
        F: Fn(&Value, Option<usize>, &[Value]) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self(Arc::new(move |item: &Value, index: Option<usize>, array: &[Value]| {
            callback(item, index, array).boxed()
        }))
    }

    pub fn test(&self, item: &Value, index: Option<usize>, array: &[Value]) -> PredicateFuture {
        (self.0)(item, index, array)
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0).cast::<()>() == Arc::as_ptr(&other.0).cast::<()>()
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_builds_field_chain() {
        let selector = Selector::path(["author", "name"]);
        assert_eq!(
            selector,
            Selector::field("author", Selector::field("name", Selector::Identity))
        );
    }

    #[test]
    fn test_chain_appends_at_leaf() {
        let chained = Selector::map(Selector::Identity)
            .chain(Selector::path(["title"]))
            .unwrap();
        assert_eq!(chained, Selector::map(Selector::path(["title"])));
    }

    #[test]
    fn test_chain_refuses_tuple_continuation() {
        let tuple = Selector::Tuple(vec![Selector::path(["a"])]);
        assert!(tuple.clone().chain(Selector::path(["b"])).is_none());
        assert_eq!(tuple.clone().chain(Selector::Identity), Some(tuple));
    }

    #[test]
    fn test_object_repeated_key_keeps_position() {
        let selector = Selector::object([
            (ObjectKey::Field("a".into()), Selector::Identity),
            (ObjectKey::Wildcard, Selector::Identity),
            (ObjectKey::Field("a".into()), Selector::path(["x"])),
        ]);
        let Selector::Object(fields) = selector else {
            panic!("Expected Object");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0], (ObjectKey::Field("a".into()), Selector::path(["x"])));
    }

    #[test]
    fn test_predicate_equality_is_identity() {
        let even = Predicate::new(|item, _, _| item.as_i64().is_some_and(|n| n % 2 == 0));
        let same = even.clone();
        let other = Predicate::new(|item, _, _| item.as_i64().is_some_and(|n| n % 2 == 0));
        assert_eq!(even, same);
        assert_ne!(even, other);
    }

    #[tokio::test]
    async fn test_async_predicate() {
        let positive = Predicate::from_async(|item, _, _| {
            let n = item.as_i64().unwrap_or_default();
            async move { n > 0 }
        });
        assert!(positive.test(&json!(3), Some(0), &[]).await);
        assert!(!positive.test(&json!(-3), None, &[]).await);
    }
}
