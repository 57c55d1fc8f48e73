//! sqlgate CLI Entry Point
//!
//! Subcommands:
//! - `serve` (default) - run the JSON-RPC session on stdin/stdout
//! - `config` - print the resolved configuration as JSON, password masked
//!
//! Stdout carries protocol messages only. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use sqlgate::config::{self, Overrides, ServerConfig};
use sqlgate::{logging, ConnectionManager, DatabaseType, Dispatcher, EngineConnector, Session};

/// sqlgate - expose a relational database to AI assistants over JSON-RPC
#[derive(Parser)]
#[command(name = "sqlgate")]
#[command(about = "Line-delimited JSON-RPC tool server for SQL databases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (skips the local and global lookup)
    #[arg(long, env = "SQLGATE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Database engine (postgres, mysql, sqlite)
    #[arg(long, env = "SQLGATE_ENGINE", global = true)]
    engine: Option<DatabaseType>,

    #[arg(long, env = "SQLGATE_HOST", global = true)]
    host: Option<String>,

    #[arg(long, env = "SQLGATE_PORT", global = true)]
    port: Option<u16>,

    #[arg(long, env = "SQLGATE_USER", global = true)]
    user: Option<String>,

    #[arg(long, env = "SQLGATE_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Name of an environment variable holding the password
    #[arg(long, env = "SQLGATE_PASSWORD_ENV", global = true)]
    password_env: Option<String>,

    #[arg(long, env = "SQLGATE_DATABASE", global = true)]
    database: Option<String>,

    /// Server instance identifier, reported in connection logs
    #[arg(long, env = "SQLGATE_SERVER", global = true)]
    server: Option<String>,

    /// SQLite database file
    #[arg(long, env = "SQLGATE_FILE", global = true)]
    file: Option<PathBuf>,

    /// Per-statement timeout in seconds
    #[arg(long, env = "SQLGATE_TIMEOUT_SECS", global = true)]
    timeout_secs: Option<u64>,

    /// Maximum rows returned per query (0 = unlimited)
    #[arg(long, env = "SQLGATE_MAX_ROWS", global = true)]
    max_rows: Option<usize>,

    /// Treat an omitted `readonly` argument as `readonly=true`
    #[arg(long, env = "SQLGATE_READONLY_ENFORCED", global = true, num_args = 0..=1, default_missing_value = "true")]
    readonly_enforced: Option<bool>,

    /// Require every statement to pass the read-only prefix test
    #[arg(long, env = "SQLGATE_READONLY_MODE", global = true, num_args = 0..=1, default_missing_value = "true")]
    readonly_mode: Option<bool>,

    /// Debug-level logging when RUST_LOG is unset
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Serve JSON-RPC requests on stdin/stdout (default)
    Serve,

    /// Print the resolved configuration (password masked)
    Config,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            engine: self.engine,
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            password_env: self.password_env.clone(),
            database: self.database.clone(),
            server: self.server.clone(),
            file: self.file.clone(),
            timeout_secs: self.timeout_secs,
            max_rows: self.max_rows,
            readonly_enforced: self.readonly_enforced,
            readonly_mode: self.readonly_mode,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let (loaded, source) =
        config::load_with_precedence(cli.config.as_deref()).context("failed to load configuration")?;
    let config = loaded.with_overrides(cli.overrides());

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, source).await,
        Commands::Config => {
            let printed = serde_json::to_string_pretty(&config.redacted())?;
            println!("{printed}");
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig, source: Option<PathBuf>) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;
    let config = Arc::new(config);

    tracing::info!(
        target_db = %config.database.target(),
        config_file = ?source,
        readonly_mode = config.query.readonly_mode,
        "starting sqlgate"
    );

    let connector = EngineConnector::new(config.database.clone(), config.query.timeout());
    let connections = Arc::new(ConnectionManager::new(connector));
    let session = Session::new(Dispatcher::new(Arc::clone(&config), connections));

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    session.run(stdin, tokio::io::stdout(), interrupt).await?;
    Ok(())
}
