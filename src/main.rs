//! mongorepo - CRUD on MongoDB collections from the command line.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::debug;
use mongodb::bson::Document;
use serde_json::Value;

use mongorepo::db::{connect, Connection, ConnectionConfig, Repl};
use mongorepo::record;
use mongorepo::repository::{Repository, SortOrder, TimeUnit, UpdateOperator};
use mongorepo::store::{MongoStore, QueryOptions};

#[derive(Parser)]
#[command(name = "mongorepo")]
#[command(about = "Create, read, update and delete documents in a MongoDB collection", long_about = None)]
#[command(version)]
struct Cli {
    /// Full connection string (overrides MONGOREPO_URI)
    #[arg(long, global = true)]
    uri: Option<String>,

    /// Database name (overrides MONGOREPO_DATABASE)
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// JSON config file; when given, MONGOREPO_* variables are not read
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log more (repeat for trace output)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the server answers
    Ping,

    /// Insert one or more documents
    Insert {
        collection: String,
        /// Documents as JSON objects
        #[arg(required = true)]
        documents: Vec<String>,
    },

    /// List matching documents
    Find {
        collection: String,
        /// Filter as a JSON object
        filter: Option<String>,
        /// Sort key as field[:asc|:desc], repeatable
        #[arg(short, long, value_parser = parse_sort_key)]
        sort: Vec<(String, SortOrder)>,
        /// Projection as a JSON object
        #[arg(short, long)]
        projection: Option<String>,
        #[arg(short, long)]
        limit: Option<i64>,
        #[arg(long)]
        skip: Option<u64>,
    },

    /// Show the first matching document
    FindOne {
        collection: String,
        filter: Option<String>,
    },

    /// Show the document with the given ObjectId
    Get {
        collection: String,
        id: String,
        #[arg(short, long)]
        projection: Option<String>,
    },

    /// List documents matching any of the filters
    FindAny {
        collection: String,
        #[arg(required = true)]
        filters: Vec<String>,
        #[arg(short, long, value_parser = parse_sort_key)]
        sort: Vec<(String, SortOrder)>,
        #[arg(short, long)]
        projection: Option<String>,
    },

    /// Update matching documents
    Update {
        collection: String,
        filter: String,
        changes: String,
        /// $set, $unset or $inc
        #[arg(short, long, default_value = "$set")]
        operator: UpdateOperator,
        /// Only the first match
        #[arg(long)]
        one: bool,
    },

    /// Add to numeric fields of matching documents
    Inc {
        collection: String,
        filter: String,
        increments: String,
    },

    /// Delete matching documents
    Delete {
        collection: String,
        filter: String,
        /// Only the first match
        #[arg(long)]
        one: bool,
    },

    /// Create an index over field[:asc|:desc] keys
    Index {
        collection: String,
        #[arg(required = true, value_parser = parse_sort_key)]
        keys: Vec<(String, SortOrder)>,
        #[arg(short, long)]
        unique: bool,
    },

    /// Create an index that expires documents by a date field
    TtlIndex {
        collection: String,
        field: String,
        amount: u64,
        /// seconds, minutes, hours or days
        unit: TimeUnit,
        #[arg(long, default_value = "asc")]
        order: SortOrder,
    },

    /// Interactive shell on a collection
    Shell { collection: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(cli: &Cli) -> Result<ConnectionConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => ConnectionConfig::from_file(path)?,
        None => ConnectionConfig::from_env()?,
    };
    if let Some(uri) = &cli.uri {
        config = config.uri(uri.clone());
    }
    if let Some(database) = &cli.database {
        config = config.database(database.clone());
    }
    debug!("using {:?}", config);
    Ok(config)
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = load_config(&cli)?;
    let connection = connect(&config)?;
    let result = execute(&connection, cli.command);
    connection.close();
    result
}

fn execute(connection: &Connection, command: Command) -> Result<(), Box<dyn Error>> {
    let repo = |collection: &str| -> Result<Repository<MongoStore>, Box<dyn Error>> {
        Ok(connection.repository(collection)?)
    };

    match command {
        Command::Ping => {
            connection.ping()?;
            println!("ok: {}", connection.database_name());
        }
        Command::Insert {
            collection,
            documents,
        } => {
            let docs = documents
                .iter()
                .map(|d| record::from_json_str(d))
                .collect::<Result<Vec<_>, _>>()?;
            let created = repo(&collection)?.create_many(docs)?;
            print_documents(&created);
        }
        Command::Find {
            collection,
            filter,
            sort,
            projection,
            limit,
            skip,
        } => {
            let mut options = QueryOptions::new();
            if !sort.is_empty() {
                options = options.sort(SortOrder::to_document(&sort));
            }
            if let Some(projection) = optional_document(projection.as_deref())? {
                options = options.projection(projection);
            }
            if let Some(limit) = limit {
                options = options.limit(limit);
            }
            if let Some(skip) = skip {
                options = options.skip(skip);
            }
            let filter = optional_document(filter.as_deref())?.unwrap_or_default();
            print_documents(&repo(&collection)?.read_with(filter, options)?);
        }
        Command::FindOne { collection, filter } => {
            let filter = optional_document(filter.as_deref())?.unwrap_or_default();
            match repo(&collection)?.read_one(filter)? {
                Some(doc) => print_document(&doc),
                None => println!("null"),
            }
        }
        Command::Get {
            collection,
            id,
            projection,
        } => {
            let projection = optional_document(projection.as_deref())?;
            print_document(&repo(&collection)?.read_by_id(&id, projection)?);
        }
        Command::FindAny {
            collection,
            filters,
            sort,
            projection,
        } => {
            let filters = filters
                .iter()
                .map(|f| record::from_json_str(f))
                .collect::<Result<Vec<_>, _>>()?;
            let projection = optional_document(projection.as_deref())?;
            let order_by = (!sort.is_empty()).then_some(sort.as_slice());
            print_documents(&repo(&collection)?.read_any(filters, projection, order_by)?);
        }
        Command::Update {
            collection,
            filter,
            changes,
            operator,
            one,
        } => {
            let filter = record::from_json_str(&filter)?;
            let changes = record::from_json_str(&changes)?;
            let repo = repo(&collection)?;
            let modified = if one {
                repo.update_one_with(filter, operator, changes)?
            } else {
                repo.update_with(filter, operator, changes)?
            };
            println!("{} document(s) modified", modified);
        }
        Command::Inc {
            collection,
            filter,
            increments,
        } => {
            let filter = record::from_json_str(&filter)?;
            let increments = record::from_json_str(&increments)?;
            let modified = repo(&collection)?.increment(filter, increments)?;
            println!("{} document(s) modified", modified);
        }
        Command::Delete {
            collection,
            filter,
            one,
        } => {
            let filter = record::from_json_str(&filter)?;
            let repo = repo(&collection)?;
            let deleted = if one {
                repo.delete_one(filter)?
            } else {
                repo.delete(filter)?
            };
            println!("{} document(s) deleted", deleted);
        }
        Command::Index {
            collection,
            keys,
            unique,
        } => {
            let name = repo(&collection)?.create_index(&keys, unique)?;
            println!("{}", name);
        }
        Command::TtlIndex {
            collection,
            field,
            amount,
            unit,
            order,
        } => {
            let name = repo(&collection)?.create_ttl_index(&field, amount, unit, order)?;
            println!("{}", name);
        }
        Command::Shell { collection } => {
            let mut repl = Repl::new(repo(&collection)?);
            repl.run()?;
        }
    }

    Ok(())
}

/// `field`, `field:asc`, `field:desc`, `field:1` or `field:-1`.
fn parse_sort_key(s: &str) -> Result<(String, SortOrder), String> {
    let (field, order) = match s.rsplit_once(':') {
        Some((field, dir)) => (field, dir.parse::<SortOrder>().map_err(|e| e.to_string())?),
        None => (s, SortOrder::Ascending),
    };
    if field.is_empty() {
        return Err("empty field name".into());
    }
    Ok((field.to_string(), order))
}

fn optional_document(text: Option<&str>) -> Result<Option<Document>, record::RecordError> {
    text.map(record::from_json_str).transpose()
}

fn print_document(doc: &Document) {
    println!("{:#}", record::to_json(doc));
}

fn print_documents(docs: &[Document]) {
    let values: Vec<Value> = docs.iter().map(record::to_json).collect();
    println!("{:#}", Value::Array(values));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sort_key() {
        assert_eq!(
            parse_sort_key("a.b:desc").unwrap(),
            ("a.b".to_string(), SortOrder::Descending)
        );
        assert_eq!(
            parse_sort_key("age:-1").unwrap(),
            ("age".to_string(), SortOrder::Descending)
        );
        assert_eq!(
            parse_sort_key("name").unwrap(),
            ("name".to_string(), SortOrder::Ascending)
        );
        assert!(parse_sort_key(":asc").is_err());
        assert!(parse_sort_key("name:sideways").unwrap_err().contains("sideways"));
    }

    #[test]
    fn test_cli_parses_sort_flags() {
        let cli = Cli::try_parse_from([
            "mongorepo", "find", "people", "--sort", "age:desc", "--sort", "name",
        ])
        .unwrap();
        match cli.command {
            Command::Find { collection, sort, .. } => {
                assert_eq!(collection, "people");
                assert_eq!(
                    sort,
                    vec![
                        ("age".to_string(), SortOrder::Descending),
                        ("name".to_string(), SortOrder::Ascending),
                    ]
                );
            }
            _ => panic!("expected find"),
        }
    }
}
