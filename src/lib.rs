//! DOCREL - Relational layer over a document store
//!
//! Declares foreign keys between collections of JSON documents and keeps them
//! honest: inserts are verified, deletes cascade according to per-key policies,
//! and the DOCSEL selector language follows references across collections.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         DOCREL Database                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │   DOCSEL    │  │   Schema    │  │   Dependency Graph      │  │
//! │  │   Parser    │  │   Loader    │  │   (keys + references)   │  │
//! │  └──────┬──────┘  └──────┬──────┘  └───────────┬─────────────┘  │
//! │         │                │                     │                │
//! │         ▼                ▼                     ▼                │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │                   Collection Handles                        ││
//! │  │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  ││
//! │  │  │  Resolver   │  │  Insertion  │  │  Delete             │  ││
//! │  │  │  + Lazy Set │  │  + Verify   │  │  Propagator         │  ││
//! │  │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  ││
//! │  └─────────┼────────────────┼────────────────────┼─────────────┘│
//! │            │                │                    │              │
//! │            ▼                ▼                    ▼              │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │                   Document Store                            ││
//! │  │  (find, count, insert, update, delete with filter queries)  ││
//! │  └─────────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod collection;
pub mod error;
pub mod graph;
pub mod insertion;
pub mod lazy;
pub mod normalize;
pub mod path;
pub mod propagate;
pub mod references;
pub mod resolve;
pub mod schema;
pub mod store;
pub mod validation;
pub mod walk;

pub use collection::Collection;
pub use docsel::{parse, select, Predicate, Selector};
pub use error::{Error, Result};
pub use graph::{build_graph, Graph};
pub use lazy::LazyDocuments;
pub use propagate::{DeleteOptions, Operation, RemovalPlan};
pub use references::{DanglingKeys, FindReferencesOptions, ScanOptions};
pub use resolve::{Projection, SelectionOptions};
pub use schema::{DeletePolicy, InsertPolicy, Schema};
pub use store::{DocumentStore, MemoryStore};

use std::fmt;
use std::sync::Arc;

/// The main database handle. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    store: Arc<dyn DocumentStore>,
    graph: Graph,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("collections", &self.inner.graph.len())
            .finish()
    }
}

impl Database {
    pub fn new(store: Arc<dyn DocumentStore>, graph: Graph) -> Self {
        Self {
            inner: Arc::new(DatabaseInner { store, graph }),
        }
    }

    /// Compile `schema` into a graph and open the store with it
    pub fn with_schema(store: Arc<dyn DocumentStore>, schema: &Schema) -> Result<Self> {
        Ok(Self::new(store, Graph::build(schema)?))
    }

    /// Handle on a collection. Undeclared collections have no foreign keys.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(name, self.clone())
    }

    pub fn graph(&self) -> &Graph {
        &self.inner.graph
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.inner.store.as_ref()
    }

    /// Foreign key values, in every collection, that match no document
    pub async fn find_dangling_keys(&self, options: ScanOptions) -> Result<DanglingKeys> {
        references::find_dangling_keys(self, options).await
    }
}
