//! querykit command-line interface
//!
//! Runs queries against an in-memory store through the same guards the
//! library exposes.
//!
//! ```bash
//! querykit --seed users.csv average-age
//! querykit --seed users.csv batches "SELECT * FROM user_data" --size 50
//! RUST_LOG=querykit=debug querykit query "SELECT COUNT(*) FROM user_data"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::{StreamExt, TryStreamExt};
use querykit::users::{self, UserSeeder};
use querykit::{Client, ConnectionConfig, MemoryStore, Row, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "querykit", version, about = "Guarded queries over an in-memory store")]
struct Args {
    /// Settings file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Load users from a `name,email,age` CSV before running the command
    #[arg(long, value_name = "CSV")]
    seed: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print query results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open and release one connection
    Check,
    /// Execute a statement and print the result
    Query { sql: String },
    /// Print a query one row at a time
    Stream { sql: String },
    /// Print a query in cursor batches
    Batches {
        sql: String,
        #[arg(long)]
        size: Option<usize>,
    },
    /// Print a query page by page
    Pages {
        sql: String,
        #[arg(long)]
        size: Option<usize>,
    },
    /// Average age of all users
    AverageAge,
    /// Users older than the given age
    OverAge {
        #[arg(long, default_value_t = 25)]
        age: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let settings = match &args.config {
        Some(path) => Settings::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Settings::default(),
    };

    let store = provision(&settings.connection).await?;
    let client = Client::from_settings(store, &settings);

    if let Some(path) = &args.seed {
        let records = users::read_users_csv(path).with_context(|| format!("reading {}", path.display()))?;
        let report = UserSeeder::new(&client).seed(&records).await?;
        info!(inserted = report.inserted, skipped = report.skipped, "seeded users");
    }

    match args.command {
        Command::Check => {
            let mut conn = client.connect().await?;
            println!("Connected to {}", client.config().to_url());
            conn.release();
        }
        Command::Query { sql } => {
            let result = client.execute(&sql, &[]).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                result.print();
            }
        }
        Command::Stream { sql } => {
            let mut rows = client.stream_rows(&sql, &[]).await?;
            println!("{}", rows.columns().join(" | "));
            while let Some(row) = rows.next().await? {
                print_row(&row);
            }
        }
        Command::Batches { sql, size } => {
            let size = size.unwrap_or(settings.stream.batch_size);
            let mut batches = client.stream_batches(&sql, &[], size).await?;
            let mut n = 0;
            while let Some(batch) = batches.next().await? {
                n += 1;
                println!("-- batch {} ({} rows)", n, batch.len());
                batch.iter().for_each(print_row);
            }
        }
        Command::Pages { sql, size } => {
            let size = size.unwrap_or(settings.stream.page_size);
            let pages = client.stream_pages(&sql, size).await?;
            let mut pages = std::pin::pin!(pages.into_stream().enumerate());
            while let Some((n, page)) = pages.next().await {
                let page = page?;
                println!("-- page {} ({} rows)", n + 1, page.len());
                page.iter().for_each(print_row);
            }
        }
        Command::AverageAge => {
            let rows = client.stream_rows("SELECT age FROM user_data", &[]).await?;
            println!("Average age of users: {:.2}", users::average_age(rows).await?);
        }
        Command::OverAge { age } => {
            let batches = client
                .stream_batches("SELECT * FROM user_data", &[], settings.stream.batch_size)
                .await?;
            let matches: Vec<Vec<Row>> = users::users_over_age(batches, age)?.try_collect().await?;
            matches.iter().flatten().for_each(print_row);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("querykit=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("querykit=warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Build a store that accepts `config`.
async fn provision(config: &ConnectionConfig) -> Result<MemoryStore> {
    let store = MemoryStore::with_host(config.host.clone());
    if !store.database_exists(&config.database) {
        store.create_database(&config.database)?;
    }
    if config.user != ConnectionConfig::default().user {
        store.create_user(&config.user, &config.password).await?;
    }
    Ok(store)
}

fn print_row(row: &Row) {
    let fields: Vec<String> = row.iter().map(ToString::to_string).collect();
    println!("{}", fields.join(" | "));
}
