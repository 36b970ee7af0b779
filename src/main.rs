use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden::cli::{self, Commands};
use warden::config;
use warden::errors::WardenError;

fn init_logging(cli: &cli::Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.log_json {
        builder.json().init();
    } else {
        builder.with_ansi(!cli.no_color).init();
    }
}

fn exit_code(error: &WardenError) -> i32 {
    match error {
        WardenError::Config(_) | WardenError::Yaml(_) => 2,
        WardenError::Container(_) | WardenError::Docker(_) => 3,
        WardenError::Authentication(_) => 4,
        WardenError::Rejected(_) => 5,
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    init_logging(&cli);
    if cli.no_color {
        console::set_colors_enabled(false);
    }

    let quiet = cli.quiet;
    let result = match cli.command {
        Commands::Scan(args) => cli::scan::handle_scan(args, quiet).await,
        Commands::Status(args) => cli::status::handle_status(args).await,
        Commands::Cancel(args) => cli::cancel::handle_cancel(args).await,
        Commands::Agent(args) => cli::agent::handle_agent(args, quiet).await,
        Commands::Tools(args) => cli::tools::handle_tools(args),
        Commands::Validate(args) => handle_validate(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(exit_code(&e));
    }
}

async fn handle_validate(args: cli::commands::ValidateArgs) -> Result<(), WardenError> {
    let path = std::path::PathBuf::from(&args.config);
    let config = config::parse_config(&path).await?;
    info!(
        blocked = config.safety().blocked_ranges.len(),
        allowed = config.safety().allowed_ranges.len(),
        "Configuration parsed"
    );
    println!("Configuration is valid: {}", args.config);
    Ok(())
}
