//! Depot CLI
//!
//! Drives requests against a file-backed collection for inspection
//! and debugging. The CLI session is root, so count and index-of work
//! and `$skipEvents` in a query is honored.
//!
//! # Example
//!
//! ```text
//! depot --path data --config todos.json post --body '{"title": "ship it"}'
//! depot --path data --config todos.json get
//! depot --path data --config todos.json count
//! ```

use clap::{Parser, Subcommand};
use depot_core::{
    Collection, CollectionConfig, Method, PropertyDescriptor, PropertyType, Request, Schema,
    Session,
};
use depot_store::FileStore;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Depot command-line collection tools.
#[derive(Parser)]
#[command(name = "depot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long, default_value = ".")]
    path: PathBuf,

    /// Path to the collection config file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find documents, or one document by id
    Get {
        /// Document id
        id: Option<String>,

        /// Query as a JSON object
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Create one document, or several from a JSON array
    Post {
        /// Body as a JSON object or array
        #[arg(short, long)]
        body: String,
    },

    /// Update one document by id, or every match of a query
    Put {
        /// Document id
        id: Option<String>,

        /// Body as a JSON object
        #[arg(short, long)]
        body: String,

        /// Query as a JSON object
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Remove documents by id or query
    Delete {
        /// Document id
        id: Option<String>,

        /// Query as a JSON object
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Count documents matching a query (root only)
    Count {
        /// Query as a JSON object
        #[arg(short, long)]
        query: Option<String>,
    },
}

/// On-disk collection config: name plus property declarations.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    name: String,
    #[serde(default)]
    properties: BTreeMap<String, PropertySpec>,
}

#[derive(Debug, Deserialize)]
struct PropertySpec {
    #[serde(rename = "type")]
    property_type: PropertyType,
    #[serde(default)]
    required: bool,
}

impl ConfigFile {
    fn into_config(self) -> CollectionConfig {
        let schema = self
            .properties
            .into_iter()
            .map(|(name, spec)| {
                let descriptor = PropertyDescriptor::new(name, spec.property_type);
                if spec.required {
                    descriptor.required()
                } else {
                    descriptor
                }
            })
            .collect::<Schema>();
        CollectionConfig::new(self.name, schema)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli) {
        Ok(body) => {
            println!("{body:#}");
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("{failure:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<serde_json::Value, serde_json::Value> {
    let config_path = cli
        .config
        .ok_or_else(|| fail("a collection config file is required (--config)"))?;
    let text = std::fs::read_to_string(&config_path)
        .map_err(|err| fail(format!("cannot read {}: {err}", config_path.display())))?;
    let config: ConfigFile =
        serde_json::from_str(&text).map_err(|err| fail(format!("invalid config: {err}")))?;

    let store = FileStore::open(&cli.path, &config.name)
        .map_err(|err| fail(format!("cannot open store: {err}")))?;
    let collection = Collection::new(config.into_config(), Arc::new(store));

    let request = build_request(cli.command).map_err(|message| fail(message))?;
    let session = Session::root();

    match collection.handle(request, &session) {
        Ok(response) => Ok(response.to_json()),
        Err(err) => Err(err.to_body()),
    }
}

fn build_request(command: Commands) -> Result<Request, String> {
    let request = match command {
        Commands::Get { id, query } => {
            Request::new(Method::Get, id_path(id)).with_query(parse_json(query)?)
        }
        Commands::Post { body } => {
            Request::new(Method::Post, "/").with_body(parse_json(Some(body))?)
        }
        Commands::Put { id, body, query } => Request::new(Method::Put, id_path(id))
            .with_query(parse_json(query)?)
            .with_body(parse_json(Some(body))?),
        Commands::Delete { id, query } => {
            Request::new(Method::Delete, id_path(id)).with_query(parse_json(query)?)
        }
        Commands::Count { query } => {
            Request::new(Method::Get, "/count").with_query(parse_json(query)?)
        }
    };
    Ok(request)
}

fn id_path(id: Option<String>) -> String {
    match id {
        Some(id) => format!("/{id}"),
        None => "/".to_string(),
    }
}

fn parse_json(text: Option<String>) -> Result<serde_json::Value, String> {
    match text {
        Some(text) => serde_json::from_str(&text).map_err(|err| format!("invalid JSON: {err}")),
        None => Ok(serde_json::Value::Null),
    }
}

fn fail(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "message": message.into() })
}
