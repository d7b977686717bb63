//! Interactive shell over one collection.

use std::io::{self, BufRead, Write};
use std::time::Instant;

use mongodb::bson::{doc, Document};
use serde_json::Value;
use thiserror::Error;

use crate::record::{self, RecordError};
use crate::repository::{Repository, RepositoryError};
use crate::store::{DocumentStore, QueryOptions};

pub type ReplResult<T> = Result<T, ReplError>;

#[derive(Debug, Error)]
pub enum ReplError {
    #[error("{0}")]
    Record(#[from] RecordError),

    #[error("{0}")]
    Repository(#[from] RepositoryError),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Shell configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    pub prompt: String,
    /// Print how long each statement took.
    pub timing: bool,
    /// Documents printed per `find`.
    pub max_docs: usize,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "mongorepo> ".into(),
            timing: true,
            max_docs: 20,
        }
    }
}

/// What the shell should do after a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

pub struct Repl<S> {
    repository: Repository<S>,
    config: ReplConfig,
    history: Vec<String>,
}

impl<S: DocumentStore + Clone> Repl<S> {
    pub fn new(repository: Repository<S>) -> Self {
        Self::with_config(repository, ReplConfig::default())
    }

    pub fn with_config(repository: Repository<S>, config: ReplConfig) -> Self {
        Self {
            repository,
            config,
            history: Vec::new(),
        }
    }

    /// Collection the shell currently works on.
    pub fn collection(&self) -> &str {
        self.repository.collection()
    }

    /// Read statements from stdin until `.quit` or end of input.
    pub fn run(&mut self) -> ReplResult<()> {
        println!("mongorepo shell on collection {}", self.collection());
        println!("Type .help for commands.");
        println!();

        let stdin = io::stdin();
        let mut stdout = io::stdout();
        let mut input = String::new();

        loop {
            let prompt = if input.is_empty() { self.config.prompt.as_str() } else { "     -> " };
            print!("{}", prompt);
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                println!();
                break;
            }

            let line = line.trim_end();
            if line.is_empty() && input.is_empty() {
                continue;
            }
            if !input.is_empty() {
                input.push(' ');
            }
            input.push_str(line);

            // a JSON argument may span several lines
            if is_incomplete(&input) {
                continue;
            }

            let statement = std::mem::take(&mut input);
            let start = Instant::now();
            match self.execute_line(&statement) {
                Ok(Reply::Quit) => break,
                Ok(Reply::Text(text)) => {
                    if !text.is_empty() {
                        println!("{}", text);
                    }
                    if self.config.timing && !is_command(statement.trim()) {
                        println!("Time: {:.3}ms", start.elapsed().as_secs_f64() * 1000.0);
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        Ok(())
    }

    /// Run one complete line: a dot-command or a statement.
    pub fn execute_line(&mut self, line: &str) -> ReplResult<Reply> {
        let line = line.trim().trim_end_matches(';').trim();
        if line.is_empty() {
            return Ok(Reply::Text(String::new()));
        }
        self.history.push(line.to_string());

        if is_command(line) {
            return self.handle_command(line);
        }
        self.execute_statement(line).map(Reply::Text)
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    fn handle_command(&mut self, cmd: &str) -> ReplResult<Reply> {
        let cmd = cmd.trim_start_matches(&['.', '\\'][..]);
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        let command = parts.first().map(|s| s.to_lowercase());

        let text = match command.as_deref() {
            Some("help") | Some("h") | Some("?") => help_text(),
            Some("quit") | Some("exit") | Some("q") => return Ok(Reply::Quit),
            Some("count") => {
                let filter = match parts.get(1..) {
                    Some(rest) if !rest.is_empty() => record::from_json_str(&rest.join(" "))?,
                    _ => Document::new(),
                };
                format!("{}", self.repository.count(filter)?)
            }
            Some("history") => self
                .history
                .iter()
                .enumerate()
                .map(|(i, cmd)| format!("  {}: {}", i + 1, cmd))
                .collect::<Vec<_>>()
                .join("\n"),
            Some("timing") => {
                self.config.timing = !self.config.timing;
                format!("Timing: {}", if self.config.timing { "on" } else { "off" })
            }
            Some("use") => {
                let collection = parts.get(1).ok_or(ReplError::Usage(".use <collection>"))?;
                self.repository = self.repository.with_collection(*collection);
                format!("Using collection {}", collection)
            }
            Some(other) => format!("Unknown command: .{}\nType .help for available commands", other),
            None => String::new(),
        };
        Ok(Reply::Text(text))
    }

    fn execute_statement(&self, statement: &str) -> ReplResult<String> {
        let (verb, rest) = split_verb(statement);

        match verb.to_lowercase().as_str() {
            "insert" => {
                let docs = parse_documents(rest)?;
                if docs.is_empty() {
                    return Err(ReplError::Usage("insert <document> [<document> ...]"));
                }
                let created = self.repository.create_many(docs)?;
                let ids: Vec<String> = created.iter().filter_map(record::id_of).collect();
                Ok(format!("inserted {} document(s): {}", created.len(), ids.join(", ")))
            }
            "find" => {
                let filter = single_filter(rest, "find [filter]")?;
                let docs = self.repository.read_with(filter, QueryOptions::new())?;
                Ok(self.render(&docs))
            }
            "findone" => {
                let filter = single_filter(rest, "findone [filter]")?;
                Ok(match self.repository.read_one(filter)? {
                    Some(doc) => render_document(&doc),
                    None => "(no document)".to_string(),
                })
            }
            "get" => {
                let id = rest.trim().trim_matches('"');
                if id.is_empty() {
                    return Err(ReplError::Usage("get <object id>"));
                }
                Ok(render_document(&self.repository.read_by_id(id, None)?))
            }
            "update" => {
                let mut docs = parse_documents(rest)?;
                if docs.len() != 2 {
                    return Err(ReplError::Usage("update <filter> <changes>"));
                }
                let changes = docs.remove(1);
                let filter = docs.remove(0);
                let modified = self.repository.update(filter, changes)?;
                Ok(format!("{} document(s) modified", modified))
            }
            "delete" => {
                let docs = parse_documents(rest)?;
                let filter = match docs.as_slice() {
                    [filter] => filter.clone(),
                    _ => return Err(ReplError::Usage("delete <filter>")),
                };
                let deleted = self.repository.delete(filter)?;
                Ok(format!("{} document(s) deleted", deleted))
            }
            _ => Err(ReplError::Usage(
                "insert | find | findone | get | update | delete (see .help)",
            )),
        }
    }

    fn render(&self, docs: &[Document]) -> String {
        if docs.is_empty() {
            return "(0 documents)".to_string();
        }
        let limit = docs.len().min(self.config.max_docs);
        let mut out: Vec<String> = docs.iter().take(limit).map(render_document).collect();
        if docs.len() > limit {
            out.push(format!("... ({} more)", docs.len() - limit));
        }
        out.push(format!("({} documents)", docs.len()));
        out.join("\n")
    }
}

fn is_command(input: &str) -> bool {
    input.starts_with('.') || input.starts_with('\\')
}

fn split_verb(statement: &str) -> (&str, &str) {
    match statement.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (statement, ""),
    }
}

/// Whether a statement stops in the middle of a JSON argument.
fn is_incomplete(input: &str) -> bool {
    let input = input.trim();
    if input.is_empty() || is_command(input) {
        return false;
    }
    let (_, rest) = split_verb(input);
    serde_json::Deserializer::from_str(rest)
        .into_iter::<Value>()
        .any(|item| matches!(item, Err(ref e) if e.is_eof()))
}

/// Parse whitespace-separated JSON objects.
fn parse_documents(text: &str) -> ReplResult<Vec<Document>> {
    let mut docs = Vec::new();
    for value in serde_json::Deserializer::from_str(text).into_iter::<Value>() {
        let value = value.map_err(RecordError::from)?;
        docs.push(record::from_json(value)?);
    }
    Ok(docs)
}

fn single_filter(text: &str, usage: &'static str) -> ReplResult<Document> {
    let mut docs = parse_documents(text)?;
    match docs.len() {
        0 => Ok(doc! {}),
        1 => Ok(docs.remove(0)),
        _ => Err(ReplError::Usage(usage)),
    }
}

fn render_document(doc: &Document) -> String {
    format!("{:#}", record::to_json(doc))
}

fn help_text() -> String {
    [
        "Commands:",
        "  .help, .h, .?           Show this help message",
        "  .quit, .exit, .q        Exit the shell",
        "  .count [filter]         Count documents",
        "  .use <collection>       Switch collection",
        "  .history                Show command history",
        "  .timing                 Toggle timing display",
        "",
        "Statements (JSON arguments, extended JSON allowed):",
        "  insert <doc> [<doc> ...]",
        "  find [filter]",
        "  findone [filter]",
        "  get <object id>",
        "  update <filter> <changes>",
        "  delete <filter>",
    ]
    .join("\n")
}
