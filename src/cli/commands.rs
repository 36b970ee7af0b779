use clap::{Parser, Subcommand, Args};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("WARDEN_BUILD_INFO"),
    ")"
);

#[derive(Parser)]
#[command(name = "warden", version, long_version = LONG_VERSION, about = "Safety-gated security scan orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a scan and run it to completion
    Scan(ScanArgs),
    /// Show a scan and its findings
    Status(StatusArgs),
    /// Cancel a pending or running scan
    Cancel(CancelArgs),
    /// Run one autonomous agent session
    Agent(AgentArgs),
    /// List the tool registry
    Tools(ToolsArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

/// Options shared by every command that touches the scan database.
#[derive(Args, Clone)]
pub struct StoreArgs {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// SQLite database path
    #[arg(long, default_value = "./data/warden.db")]
    pub db: String,
}

#[derive(Args, Clone)]
pub struct ScanArgs {
    /// Targets: IP addresses, CIDR ranges, hostnames or URLs
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Scan type: network, web, directory, full
    #[arg(short = 't', long = "type", default_value = "network")]
    pub scan_type: String,

    /// Scan name
    #[arg(short, long, default_value = "")]
    pub name: String,

    /// Comma-separated tool list overriding the configured set
    #[arg(long, value_delimiter = ',')]
    pub tools: Option<Vec<String>>,

    /// Per-tool options as a JSON object keyed by tool name
    #[arg(long)]
    pub options: Option<String>,

    /// Principal the scan is recorded under
    #[arg(long, default_value = "cli")]
    pub principal: String,

    /// Run the phase-driven methodology instead of a flat tool set
    #[arg(long)]
    pub automate: bool,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Clone)]
pub struct StatusArgs {
    /// Scan ID to show
    pub scan_id: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Clone)]
pub struct CancelArgs {
    /// Scan ID to cancel
    pub scan_id: String,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Clone)]
pub struct AgentArgs {
    /// What the agent should accomplish
    pub task: String,

    /// LLM provider: anthropic, openai, deepseek, ollama, openai-compatible
    #[arg(long)]
    pub provider: Option<String>,

    /// LLM model identifier
    #[arg(long)]
    pub model: Option<String>,

    /// LLM API key (or use env vars)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Endpoint for ollama or openai-compatible providers
    #[arg(long)]
    pub base_url: Option<String>,

    /// Provider to switch to when the primary fails
    #[arg(long)]
    pub fallback_provider: Option<String>,

    #[arg(long)]
    pub fallback_model: Option<String>,

    #[arg(long)]
    pub fallback_api_key: Option<String>,

    #[arg(long)]
    pub fallback_base_url: Option<String>,

    /// Maximum provider calls for the session
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Existing scan to record tool findings against
    #[arg(long)]
    pub scan: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Args, Clone)]
pub struct ToolsArgs {
    /// Only list tools of this category
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Config file to validate
    pub config: String,
}
