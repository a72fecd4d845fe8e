//! DOCREL CLI - inspect schemas, selectors and deletes over JSON fixtures

use clap::{Parser, Subcommand};
use docrel::{Database, DeleteOptions, MemoryStore, ScanOptions, Schema};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "docrel")]
#[command(about = "Foreign keys, cascading deletes and selectors over a document store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Data {
    /// Schema file (.json, .yaml, .yml) or directory of collection schemas
    #[arg(short, long)]
    schema: PathBuf,

    /// JSON fixture mapping collection names to arrays of documents
    #[arg(short, long)]
    data: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the compiled dependency graph
    Graph {
        /// Schema file or directory
        schema: PathBuf,
    },

    /// Print the syntax tree of a selector
    Parse {
        selector: String,
    },

    /// Resolve a selector over the documents of a collection
    Select {
        #[command(flatten)]
        data: Data,

        #[arg(short, long)]
        collection: String,

        /// Filter query selecting the starting documents
        #[arg(short, long, default_value = "{}")]
        filter: String,

        selector: String,

        /// Return raw foreign key values instead of following them
        #[arg(long)]
        no_joins: bool,
    },

    /// Report foreign key values that match no document
    Check {
        #[command(flatten)]
        data: Data,

        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },

    /// Delete documents, applying every delete policy
    Delete {
        #[command(flatten)]
        data: Data,

        #[arg(short, long)]
        collection: String,

        #[arg(short, long)]
        filter: String,

        /// Only delete the first matching document
        #[arg(long)]
        single: bool,

        /// Print the removal plan without running it
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Graph { schema } => show_graph(&schema),
        Commands::Parse { selector } => show_selector(&selector),
        Commands::Select {
            data,
            collection,
            filter,
            selector,
            no_joins,
        } => select(&data, &collection, &filter, &selector, no_joins).await,
        Commands::Check { data, batch_size } => check(&data, batch_size).await,
        Commands::Delete {
            data,
            collection,
            filter,
            single,
            dry_run,
        } => delete(&data, &collection, &filter, single, dry_run).await,
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_graph(schema: &Path) -> anyhow::Result<()> {
    let schema = Schema::load(schema)?;
    let graph = docrel::build_graph(&schema)?;
    print_json(&graph)
}

fn show_selector(raw: &str) -> anyhow::Result<()> {
    match docrel::parse(raw) {
        Ok(selector) => {
            println!("{selector:#?}");
            Ok(())
        }
        Err(e) => {
            eprintln!("{raw}");
            eprintln!("{}^", " ".repeat(e.position));
            Err(e.into())
        }
    }
}

/// Open the fixture in a memory store along with its schema
async fn open(data: &Data) -> anyhow::Result<(Database, Arc<MemoryStore>)> {
    let schema = Schema::load(&data.schema)?;
    let content = tokio::fs::read_to_string(&data.data).await?;
    let store = Arc::new(MemoryStore::from_fixture_str(&content)?);
    let db = Database::with_schema(store.clone(), &schema)?;
    Ok((db, store))
}

async fn select(data: &Data, collection: &str, filter: &str, selector: &str, no_joins: bool) -> anyhow::Result<()> {
    let (db, _) = open(data).await?;
    let filter = serde_json::from_str(filter)?;
    let selector = docrel::parse(selector)?;
    let options = docrel::SelectionOptions {
        resolve_foreign_keys: !no_joins,
    };
    let selected = db
        .collection(collection)
        .select_with(filter, &selector, &options)
        .await?;
    print_json(&selected)
}

async fn check(data: &Data, batch_size: usize) -> anyhow::Result<()> {
    let (db, _) = open(data).await?;
    let options = ScanOptions {
        batch_size,
        ..Default::default()
    };
    let dangling = db.find_dangling_keys(options).await?;
    if dangling.is_empty() {
        println!("No dangling keys.");
        return Ok(());
    }
    print_json(&dangling)
}

async fn delete(data: &Data, collection: &str, filter: &str, single: bool, dry_run: bool) -> anyhow::Result<()> {
    let (db, store) = open(data).await?;
    let filter = serde_json::from_str(filter)?;
    let options = DeleteOptions {
        single,
        ..Default::default()
    };
    let plan = db.collection(collection).plan_delete(&filter, options).await?;
    print_json(&plan)?;
    if dry_run {
        return Ok(());
    }

    let deleted = plan.execute(db.store()).await?;
    println!("\n{deleted} document(s) deleted from '{collection}'.\n");
    print_json(&store.dump().await)
}
