use thiserror::Error;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Permission error: {0}")]
    Permission(String),

    #[error("LLM API error: {0}")]
    LLMApi(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Billing/quota error: {0}")]
    Billing(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Command timed out after {secs}s")]
    CommandTimeout { secs: u64, stdout: String },

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolFailed(String),

    #[error("Output parse error: {0}")]
    OutputParse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Execution limit reached: {0}")]
    ExecutionLimit(String),

    #[error("{0}")]
    Rejected(#[from] Rejection),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons the safety gate refuses a scan or command. The display text is
/// returned to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("Target {target} is in blocked range {range}")]
    BlockedTarget { target: String, range: String },

    #[error("Target {0} is not in allowed ranges")]
    NotAllowed(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Target {0} is outside the scan's targets")]
    OutOfScope(String),

    #[error("Rate limit exceeded for {target}. Maximum {limit} scan(s) per {window_secs} seconds.")]
    RateLimited { target: String, limit: usize, window_secs: u64 },

    #[error("Maximum {0} concurrent scans allowed")]
    ConcurrencyLimit(usize),

    #[error("CPU usage too high ({current:.1}%). Maximum allowed: {max:.0}%")]
    CpuExhausted { current: f32, max: f32 },

    #[error("Memory usage too high ({current:.1}%). Maximum allowed: {max:.0}%")]
    MemoryExhausted { current: f32, max: f32 },

    #[error("Insufficient disk space ({free_gb:.2}GB free). Minimum required: {min_gb:.2}GB")]
    DiskExhausted { free_gb: f64, min_gb: f64 },

    #[error("Scan {0} is already running")]
    DuplicateRun(String),
}

impl Rejection {
    /// Target-validation failures, as opposed to load or policy limits.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Rejection::BlockedTarget { .. }
                | Rejection::NotAllowed(_)
                | Rejection::InvalidTarget(_)
                | Rejection::OutOfScope(_)
        )
    }

    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            Rejection::CpuExhausted { .. } | Rejection::MemoryExhausted { .. } | Rejection::DiskExhausted { .. }
        )
    }
}
