use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "switchyard",
    about = "Switchyard — zero-downtime deployment orchestration",
    version,
    propagate_version = true
)]
struct Cli {
    /// Directory holding switchyard.redb
    #[arg(long, global = true, default_value = ".switchyard")]
    data_dir: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate or scaffold a switchyard.toml
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect deployment records
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Manage the schema migration registry
    Migrations {
        #[command(subcommand)]
        action: MigrationsAction,
    },
    /// Read, write and evaluate feature toggles
    Toggle {
        #[command(subcommand)]
        action: ToggleAction,
    },
    /// Inspect persisted traffic weights
    Traffic {
        #[command(subcommand)]
        action: TrafficAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Parse a config file and check every field.
    Check { path: PathBuf },
    /// Write a default config for a service.
    Init {
        #[arg(short, long, default_value = "app")]
        service: String,
        #[arg(short, long, default_value = "switchyard.toml")]
        output: PathBuf,
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Print a service's deployment record as JSON.
    Show { service: String },
    /// List every service with a record.
    List,
    /// Remove a service's record so it can be deployed again.
    Forget {
        service: String,
        /// Drop the record even if it says a deployment is running.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum MigrationsAction {
    /// Show registered migrations in version order.
    List,
    /// Register a migration from a JSON file.
    ///
    /// The file holds `version`, `name`, `kind` and an optional `down_sql`.
    Add { file: PathBuf },
}

#[derive(Subcommand)]
enum ToggleAction {
    /// Create or replace a toggle.
    Set {
        name: String,
        /// Store the toggle switched off.
        #[arg(long)]
        disabled: bool,
        /// Share of callers (0-100) that see the feature.
        #[arg(long, default_value = "100")]
        percentage: u8,
        /// Targeting rules as a JSON array.
        #[arg(long)]
        rules: Option<String>,
    },
    /// Print a toggle as JSON.
    Get { name: String },
    /// Evaluate a toggle for a caller context.
    Eval {
        name: String,
        /// Context attributes as a JSON object.
        #[arg(long, default_value = "{}")]
        context: String,
    },
    /// List every toggle.
    List,
}

#[derive(Subcommand)]
enum TrafficAction {
    /// Show the last applied weights for a route.
    Show { route: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,switchyard=debug"));
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }
    let data_dir = cli.data_dir;

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Check { path } => commands::config::check(&path),
            ConfigAction::Init {
                service,
                output,
                force,
            } => commands::config::init(&service, &output, force),
        },
        Commands::State { action } => match action {
            StateAction::Show { service } => commands::state::show(&data_dir, &service),
            StateAction::List => commands::state::list(&data_dir),
            StateAction::Forget { service, force } => commands::state::forget(&data_dir, &service, force),
        },
        Commands::Migrations { action } => match action {
            MigrationsAction::List => commands::migrations::list(&data_dir),
            MigrationsAction::Add { file } => commands::migrations::add(&data_dir, &file),
        },
        Commands::Toggle { action } => match action {
            ToggleAction::Set {
                name,
                disabled,
                percentage,
                rules,
            } => commands::toggle::set(&data_dir, &name, !disabled, percentage, rules.as_deref()),
            ToggleAction::Get { name } => commands::toggle::get(&data_dir, &name),
            ToggleAction::Eval { name, context } => commands::toggle::eval(&data_dir, &name, &context),
            ToggleAction::List => commands::toggle::list(&data_dir),
        },
        Commands::Traffic { action } => match action {
            TrafficAction::Show { route } => commands::traffic::show(&data_dir, &route),
        },
    }
}
