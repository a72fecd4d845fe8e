//! Fields a selector reads
//!
//! Lets a selection fetch only what it uses. Paths stop at foreign keys,
//! since the referenced documents are fetched separately.

use docsel::{ObjectKey, Selector};

use crate::graph::ForeignKeys;
use crate::store::projection::absorb_prefixes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// The whole value is needed
    All,
    /// Only these dotted paths are needed
    Paths(Vec<String>),
}

impl Projection {
    /// The paths to request, or `None` for whole documents
    pub fn into_paths(self) -> Option<Vec<String>> {
        match self {
            Projection::All => None,
            Projection::Paths(paths) => Some(paths),
        }
    }

    fn union(self, other: Projection) -> Projection {
        match (self, other) {
            (Projection::Paths(paths), Projection::Paths(more)) => {
                Projection::Paths(absorb_prefixes(paths.into_iter().chain(more)))
            }
            _ => Projection::All,
        }
    }
}

/// Projection needed to resolve `selector` on documents owning `foreign_keys`
pub fn projection(selector: &Selector, foreign_keys: &ForeignKeys) -> Projection {
    infer(selector, foreign_keys, &[])
}

fn infer(selector: &Selector, foreign_keys: &ForeignKeys, prefix: &[&str]) -> Projection {
    match selector {
        // A shortcut may stop on any value below it, so it reads it whole
        Selector::Identity | Selector::Filter { .. } | Selector::Switch { .. } | Selector::Shortcut(_) => {
            Projection::All
        }
        Selector::Field { name, next } => field(name, next, foreign_keys, prefix),
        Selector::Index { next, .. }
        | Selector::Map(next)
        | Selector::HardMap(next)
        | Selector::FilterQuery { next, .. } => infer(next, foreign_keys, prefix),
        Selector::Tuple(children) => children
            .iter()
            .map(|child| infer(child, foreign_keys, prefix))
            .reduce(Projection::union)
            .unwrap_or(Projection::Paths(Vec::new())),
        Selector::Object(entries) => entries
            .iter()
            .map(|(key, child)| match key {
                ObjectKey::Field(name) => field(name, child, foreign_keys, prefix),
                ObjectKey::Wildcard => Projection::All,
            })
            .reduce(Projection::union)
            .unwrap_or(Projection::Paths(Vec::new())),
    }
}

fn field(name: &str, next: &Selector, foreign_keys: &ForeignKeys, prefix: &[&str]) -> Projection {
    let mut path = prefix.to_vec();
    path.push(name);
    if foreign_keys.contains_key(&path.join(".")) {
        return Projection::Paths(vec![name.to_string()]);
    }
    match infer(next, foreign_keys, &path) {
        Projection::All => Projection::Paths(vec![name.to_string()]),
        Projection::Paths(paths) => Projection::Paths(paths.into_iter().map(|p| format!("{name}.{p}")).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::schema::{CollectionSchema, ForeignKeySchema, Schema};

    fn author_keys() -> ForeignKeys {
        let schema = Schema::new()
            .collection(
                "authors",
                CollectionSchema::new().foreign_key("favoriteBooks.$", ForeignKeySchema::to("books")),
            )
            .collection("books", CollectionSchema::new());
        Graph::build(&schema).unwrap().config("authors").foreign_keys.clone()
    }

    fn paths(list: &[&str]) -> Projection {
        Projection::Paths(list.iter().map(|p| p.to_string()).collect())
    }

    #[test]
    fn test_identity_needs_everything() {
        assert_eq!(projection(&docsel::parse("").unwrap(), &author_keys()), Projection::All);
    }

    #[test]
    fn test_paths_stop_at_foreign_keys() {
        let keys = author_keys();
        let selector = docsel::parse("favoriteBooks $ title").unwrap();
        assert_eq!(projection(&selector, &keys), paths(&["favoriteBooks"]));

        let selector = docsel::parse("address city").unwrap();
        assert_eq!(projection(&selector, &keys), paths(&["address.city"]));
    }

    #[test]
    fn test_tuple_and_object_union() {
        let keys = author_keys();
        let selector = docsel::parse("[name, address city, name]").unwrap();
        assert_eq!(projection(&selector, &keys), paths(&["name", "address.city"]));

        let selector = docsel::parse("{ name, pets $ name }").unwrap();
        assert_eq!(projection(&selector, &keys), paths(&["name", "pets.name"]));

        let selector = docsel::parse("{ *, name }").unwrap();
        assert_eq!(projection(&selector, &keys), Projection::All);
    }

    #[test]
    fn test_shortcut_reads_its_field_whole() {
        let keys = author_keys();
        let selector = docsel::parse("address > city").unwrap();
        assert_eq!(projection(&selector, &keys), paths(&["address"]));

        let selector = docsel::parse("> name").unwrap();
        assert_eq!(projection(&selector, &keys), Projection::All);
    }

    #[test]
    fn test_union_absorbs_longer_paths() {
        let keys = author_keys();
        let selector = docsel::parse("[items 1 name, items, items qty]").unwrap();
        assert_eq!(projection(&selector, &keys), paths(&["items"]));
    }

    #[test]
    fn test_whole_subtree_collapses_to_its_field() {
        let keys = author_keys();
        let selector = docsel::parse("address [city, ]").unwrap();
        assert_eq!(projection(&selector, &keys), paths(&["address"]));
    }
}
