// Main entry point for the RustyDAO shell
// Loads SQL scripts into an in-memory database and runs parameterized
// queries against it in any of the query execution modes

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser as ClapParser, ValueEnum};
use rustydao::config::LoggingConfig;
use rustydao::storage::database::ExecResult;
use rustydao::{utils, Config, DaoContext, MemoryDatabase, Query, Record, RecordMapper, SlotKind};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// RustyDAO - parameterized entity queries over an in-memory SQL database
#[derive(ClapParser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (default: rustydao.toml + rustydao.local.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// SQL script to load on startup (repeatable)
    #[arg(short, long)]
    script: Vec<PathBuf>,

    /// Execute a single SQL statement and exit
    #[arg(short, long)]
    execute: Option<String>,

    /// Query with `?` placeholders to run and exit
    #[arg(short, long)]
    query: Option<String>,

    /// Value for the next parameter slot, in order (repeatable; NULL binds null)
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Value for the query's LIMIT slot
    #[arg(long)]
    limit: Option<i64>,

    /// Value for the query's OFFSET slot
    #[arg(long)]
    offset: Option<i64>,

    /// Execution mode
    #[arg(short, long, value_enum, default_value_t = Mode::List)]
    mode: Mode,

    /// Print entities as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    List,
    Lazy,
    LazyUncached,
    Iterator,
    Unique,
    UniqueOrThrow,
}

/// Shell state: the database, its context and the query being edited
struct Shell {
    db: Arc<MemoryDatabase>,
    context: Arc<DaoContext>,
    query: Option<Query<RecordMapper>>,
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path))?,
        None => Config::load().context("loading rustydao.toml")?,
    };
    init_tracing(&config.logging);

    let db = Arc::new(MemoryDatabase::new());
    let context = Arc::new(DaoContext::from_config(db.clone(), &config.query));
    let mut shell = Shell {
        db,
        context,
        query: None,
        json: args.json,
    };

    for script in &args.script {
        shell.load_script(script, config.script.transactional)?;
    }

    if let Some(sql) = &args.execute {
        return shell.execute_sql(sql);
    }

    if let Some(sql) = &args.query {
        let mut query = shell.build_query(sql)?;
        bind_in_order(&mut query, &args.params)?;
        if let Some(limit) = args.limit {
            query.set_limit(limit)?;
        }
        if let Some(offset) = args.offset {
            query.set_offset(offset)?;
        }
        shell.query = Some(query);
        return shell.run(args.mode);
    }

    println!("╔════════════════════════════════════════════╗");
    println!("║        RustyDAO Interactive Shell          ║");
    println!("╚════════════════════════════════════════════╝");
    println!();
    println!("Type SQL commands or '.help' for help");
    println!("Type '.exit' to quit");
    println!();

    repl(|input| shell.handle(input))
}

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

/// Read-Eval-Print Loop; the handler returns Ok(false) to quit
fn repl<F>(mut handle: F) -> Result<()>
where
    F: FnMut(&str) -> Result<bool>,
{
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("rustydao> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match handle(input) {
            Ok(true) => {}
            Ok(false) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }

    Ok(())
}

impl Shell {
    fn handle(&mut self, input: &str) -> Result<bool> {
        if !input.starts_with('.') {
            self.execute_sql(input)?;
            return Ok(true);
        }

        let (command, rest) = input.split_once(' ').unwrap_or((input, ""));
        let rest = rest.trim();
        match command {
            ".exit" | ".quit" => return Ok(false),
            ".help" => print_help(),
            ".tables" => {
                for name in self.db.table_names() {
                    println!("{}", name);
                }
            }
            ".read" => self.load_script(Path::new(rest), true)?,
            ".dump" => utils::log_table_dump(self.db.as_ref(), rest)?,
            ".query" => {
                let query = self.build_query(rest)?;
                println!(
                    "Query prepared with {} slot(s){}{}",
                    query.parameter_count(),
                    query
                        .limit_position()
                        .map(|p| format!(", limit at {}", p))
                        .unwrap_or_default(),
                    query
                        .offset_position()
                        .map(|p| format!(", offset at {}", p))
                        .unwrap_or_default(),
                );
                self.query = Some(query);
            }
            ".param" => {
                let (index, value) = rest
                    .split_once(' ')
                    .ok_or_else(|| anyhow!("Usage: .param <index> <value|NULL>"))?;
                let index: usize = index.parse().context("parameter index")?;
                self.current_query()?.set_parameter(index, parameter_value(value.trim()))?;
            }
            ".limit" => self.current_query()?.set_limit(rest.parse::<i64>().context("limit")?)?,
            ".offset" => self.current_query()?.set_offset(rest.parse::<i64>().context("offset")?)?,
            ".run" => {
                let mode = if rest.is_empty() {
                    Mode::List
                } else {
                    Mode::from_str(rest, true).map_err(|e| anyhow!(e))?
                };
                self.run(mode)?;
            }
            _ => {
                println!("Unknown command: {}", command);
                println!("Type '.help' for help");
            }
        }
        Ok(true)
    }

    fn load_script(&self, path: &Path, transactional: bool) -> Result<()> {
        let count = utils::execute_sql_script(self.db.as_ref(), path, transactional)
            .with_context(|| format!("running script {}", path.display()))?;
        println!("Executed {} statement(s) from {}", count, path.display());
        Ok(())
    }

    fn execute_sql(&self, sql: &str) -> Result<()> {
        match self.db.execute(sql, &[])? {
            ExecResult::Rows { columns, rows } => {
                let cells: Vec<Vec<String>> = rows
                    .iter()
                    .map(|row| row.values.iter().map(ToString::to_string).collect())
                    .collect();
                println!("{}", utils::format_table(&columns, &cells));
            }
            ExecResult::Changed { message, .. } => println!("{}", message),
        }
        Ok(())
    }

    /// Prepare a query, reserving the slots that feed LIMIT and OFFSET.
    /// Those default to "no limit" and 0 until set.
    fn build_query(&self, sql: &str) -> Result<Query<RecordMapper>> {
        let layout = MemoryDatabase::describe_parameters(sql)?;
        let mut query = Query::new(
            self.context.clone(),
            Arc::new(RecordMapper),
            sql,
            vec![None::<String>; layout.count],
        );
        if let Some(position) = layout.limit_position {
            query = query.with_limit_position(position)?;
            query.set_limit(-1)?;
        }
        if let Some(position) = layout.offset_position {
            query = query.with_offset_position(position)?;
            query.set_offset(0)?;
        }
        Ok(query)
    }

    fn current_query(&mut self) -> Result<&mut Query<RecordMapper>> {
        self.query
            .as_mut()
            .ok_or_else(|| anyhow!("No query prepared; use .query <sql> first"))
    }

    fn run(&mut self, mode: Mode) -> Result<()> {
        let query = self.current_query()?;
        let records: Vec<Record> = match mode {
            Mode::List => query.list()?,
            Mode::Lazy => {
                let mut list = query.list_lazy()?;
                list.load_remaining()?;
                let records = list
                    .iter()
                    .map(|entity| entity.map(|e| Record::clone(&e)))
                    .collect::<Result<Vec<_>, _>>()?;
                list.close();
                records
            }
            Mode::LazyUncached => {
                let mut list = query.list_lazy_uncached()?;
                let records = list
                    .iter()
                    .map(|entity| entity.map(|e| Record::clone(&e)))
                    .collect::<Result<Vec<_>, _>>()?;
                list.close();
                records
            }
            Mode::Iterator => query
                .list_iterator()?
                .map(|entity| entity.map(|e| Record::clone(&e)))
                .collect::<Result<Vec<_>, _>>()?,
            Mode::Unique => query.unique()?.into_iter().collect(),
            Mode::UniqueOrThrow => vec![query.unique_or_throw()?],
        };
        self.print_records(&records)
    }

    fn print_records(&self, records: &[Record]) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(records)?);
            return Ok(());
        }
        let columns = records.first().map(|r| r.columns.clone()).unwrap_or_default();
        let cells: Vec<Vec<String>> = records
            .iter()
            .map(|r| r.values.iter().map(ToString::to_string).collect())
            .collect();
        println!("{}", utils::format_table(&columns, &cells));
        Ok(())
    }
}

/// Bind values to the query's parameter slots in order, skipping LIMIT/OFFSET slots
fn bind_in_order(query: &mut Query<RecordMapper>, values: &[String]) -> Result<()> {
    let free: Vec<usize> = (0..query.parameter_count())
        .filter(|&i| query.slot_kind(i) == Some(SlotKind::Parameter))
        .collect();
    if values.len() > free.len() {
        bail!(
            "{} parameter(s) given but the query has {} free slot(s)",
            values.len(),
            free.len()
        );
    }
    for (index, value) in free.into_iter().zip(values) {
        query.set_parameter(index, parameter_value(value))?;
    }
    Ok(())
}

fn parameter_value(text: &str) -> Option<&str> {
    if text.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(text)
    }
}

fn print_help() {
    println!("Special Commands:");
    println!("  .help                  Show this help message");
    println!("  .exit, .quit           Exit the shell");
    println!("  .tables                List tables");
    println!("  .read <file>           Run a SQL script in a transaction");
    println!("  .dump <table>          Log a table's content (debug level)");
    println!("  .query <sql>           Prepare a query with ? placeholders");
    println!("  .param <index> <value> Bind a parameter slot (NULL for null)");
    println!("  .limit <n>             Set the LIMIT slot");
    println!("  .offset <n>            Set the OFFSET slot");
    println!("  .run [mode]            Run the prepared query; mode is one of");
    println!("                         list, lazy, lazy-uncached, iterator,");
    println!("                         unique, unique-or-throw");
    println!();
    println!("Plain SQL (CREATE TABLE, DROP TABLE, INSERT, SELECT, DELETE) runs directly.");
    println!();
    println!("Example:");
    println!("  CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)");
    println!("  INSERT INTO users VALUES (1, 'Alice', 30), (2, 'Bob', 25)");
    println!("  .query SELECT * FROM users WHERE age > ? LIMIT ?");
    println!("  .param 0 20");
    println!("  .limit 1");
    println!("  .run unique");
}
