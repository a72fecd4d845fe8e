//! Update targets for foreign keys nested in arrays
//!
//! A foreign key path like `a.$.b` can't be updated directly; it has to be
//! rewritten into an update-operator target with positional array filters.

use serde::Serialize;

/// An update target, plus the array filter path bound to the `f` identifier
/// (set updaters) or the element sub-path to match (pull updaters)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Updater {
    pub target: String,
    pub filter: Option<String>,
}

/// Array filter identifier used by set updaters
pub const FILTER_IDENTIFIER: &str = "f";

/// Rewrite a path for `$set` / `$unset`.
///
/// ```text
/// a           => a                  | -
/// a.$         => a.$[f]             | f
/// a.$.b       => a.$[f].b           | f.b
/// a.$.b.$     => a.$[].b.$[f]       | f
/// a.$.b.c     => a.$[f].b.c         | f.b.c
/// a.$.b.$.c   => a.$[].b.$[f].c     | f.c
/// a.$.b.$.c.$ => a.$[].b.$[].c.$[f] | f
/// ```
///
/// Only the innermost wildcard is filtered. Outer wildcards become `$[]`, so
/// every outer element holding a matching inner element is updated.
pub fn to_set_updater(path: &[String]) -> Updater {
    let mut target: Vec<&str> = Vec::with_capacity(path.len());
    let mut filter: Option<Vec<&str>> = None;

    for route in path.iter().rev() {
        if route != "$" {
            target.push(route);
            continue;
        }
        if filter.is_some() {
            target.push("$[]");
        } else {
            // Everything below the innermost wildcard, relative to the element
            let mut inner: Vec<&str> = target.clone();
            inner.push(FILTER_IDENTIFIER);
            filter = Some(inner);
            target.push("$[f]");
        }
    }

    Updater {
        target: join_reversed(target),
        filter: filter.map(join_reversed),
    }
}

/// Rewrite a path for `$pull`; `None` when the path has no wildcard.
///
/// ```text
/// a.$         => a              | -
/// a.$.b       => a              | b
/// a.$.b.$     => a.$[].b        | -
/// a.$.b.c     => a              | b.c
/// a.$.b.$.c   => a.$[].b        | c
/// a.$.b.$.c.$ => a.$[].b.$[].c  | -
/// ```
pub fn to_pull_updater(path: &[String]) -> Option<Updater> {
    let mut target: Vec<&str> = Vec::with_capacity(path.len());
    let mut filter: Vec<&str> = Vec::new();
    let mut hit = false;

    for route in path.iter().rev() {
        match (route.as_str(), hit) {
            ("$", false) => hit = true,
            ("$", true) => target.push("$[]"),
            (_, true) => target.push(route),
            (_, false) => filter.push(route),
        }
    }

    if !hit {
        return None;
    }
    Some(Updater {
        target: join_reversed(target),
        filter: if filter.is_empty() {
            None
        } else {
            Some(join_reversed(filter))
        },
    })
}

fn join_reversed(mut parts: Vec<&str>) -> String {
    parts.reverse();
    parts.join(".")
}
