//! Townsquare client - command-line sign-in and session management.

mod app;
mod auth;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use client_auth::ExchangeTransport;
use client_config_and_utils::{init_logging, Config, Paths};
use tracing::debug;

/// Townsquare command-line interface.
#[derive(Parser)]
#[command(name = "townsquare")]
#[command(about = "Sign in to Townsquare and manage the stored session")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (storage, logs, config). Defaults to ~/.townsquare
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    SignIn {
        email: String,
        #[arg(long, env = "TOWNSQUARE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Register a new account
    SignUp {
        email: String,
        #[arg(long, env = "TOWNSQUARE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Sign in with a third-party identity token
    Exchange {
        id_token: String,
        /// How the token is sent: body, header, or query
        #[arg(long, default_value = "body")]
        transport: ExchangeTransport,
        #[arg(long, default_value = "en")]
        lang: String,
    },
    /// Forget the stored session
    SignOut,
    /// Show the current session
    Status,
    /// Fetch the signed-in user from the API
    Whoami,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let log_level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(log_level, Some(paths.log_file().as_path()));
    debug!(base_dir = %paths.base_dir().display(), "Configuration loaded");

    let app = app::App::init(paths, config)?;

    match cli.command {
        Commands::SignIn { email, password } => auth::sign_in(&app, &email, &password).await?,
        Commands::SignUp {
            email,
            password,
            name,
        } => auth::sign_up(&app, email, password, name).await?,
        Commands::Exchange {
            id_token,
            transport,
            lang,
        } => auth::exchange(&app, transport, &id_token, &lang).await?,
        Commands::SignOut => auth::sign_out(&app)?,
        Commands::Status => auth::status(&app).await?,
        Commands::Whoami => auth::whoami(&app).await?,
    }

    app.shutdown();
    Ok(())
}
