mod api;
mod business;
mod cli;
mod config;
mod db;
mod error;
mod etl;
mod models;

use anyhow::Context;
use clap::Parser;
use cli::{App, Cli, Commands};
use colored::*;
use config::Config;
use dialoguer::{theme::ColorfulTheme, Select};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs console (stderr) and file logging. The returned guard flushes the
/// file writer on drop and must live until the process exits.
fn init_tracing(config: &Config) -> anyhow::Result<WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("cannot create log directory {}", config.log_dir.display()))?;
    let file_appender = tracing_appender::rolling::never(&config.log_dir, "etl.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    let _guard = init_tracing(&config)?;
    info!(backend = %config.backend, country = %config.etl_country, "Configuration loaded");

    let app = App::new(config);

    if let Some(command) = cli.command {
        if let Err(e) = app.run_command(command).await {
            error!("Command execution failed: {:?}", e);
            eprintln!("{} {}", "Error:".red(), cli::describe_error(&e).red());
            std::process::exit(1);
        }
        return Ok(());
    }

    println!("{}", "Welcome to the Weather ETL CLI!".cyan().bold());
    run_menu(&app).await
}

async fn run_menu(app: &App) -> anyhow::Result<()> {
    let default_country = app.config().etl_country.clone();

    loop {
        let options = &[
            "Initialize Storage",
            "Run ETL Once",
            "Run ETL on a Schedule",
            "List Cities of a Country",
            "Show a City",
            "Add a City",
            "Show a Country",
            "List Weather Conditions",
            "Show Weather History of a City",
            "Clear Weather History of a City",
            "Backfill City Coordinates",
            "Exit",
        ];

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("What would you like to do?")
            .items(options)
            .default(0)
            .interact_opt()?
            .unwrap_or(options.len() - 1);

        println!("\n---\n");

        let command = match selection {
            0 => Ok(Commands::InitDb),
            1 => Ok(Commands::Etl),
            2 => cli::prompt_schedule().map(Commands::Schedule),
            3 => cli::prompt_country(&default_country).map(Commands::Cities),
            4 => cli::prompt_city().map(Commands::City),
            5 => cli::prompt_new_city(&default_country).map(Commands::AddCity),
            6 => cli::prompt_country(&default_country).map(Commands::Country),
            7 => Ok(Commands::Conditions(cli::ConditionArgs { ids: Vec::new() })),
            8 => cli::prompt_city_id().map(Commands::History),
            9 => cli::prompt_city_id().map(Commands::Clear),
            10 => cli::prompt_countries(&default_country).map(Commands::Backfill),
            _ => {
                println!("{}", "Exiting application. Goodbye!".green());
                break;
            },
        };

        let command = match command {
            Ok(command) => command,
            Err(e) => {
                println!("{} {}", "Failed to get input:".red(), e);
                continue;
            },
        };

        if let Err(e) = app.run_command(command).await {
            error!("Command execution failed: {:?}", e);
            println!(
                "{} {}",
                "Error executing command:".red(),
                cli::describe_error(&e).red()
            );
        }

        println!("\n---\n");
    }

    Ok(())
}
