use super::types::WardenError;

/// Stable label for logs plus whether a provider call may be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

impl ErrorClassification {
    const fn transient(error_type: &'static str) -> Self {
        Self { error_type, retryable: true }
    }

    const fn fatal(error_type: &'static str) -> Self {
        Self { error_type, retryable: false }
    }
}

impl WardenError {
    pub fn classify(&self) -> ErrorClassification {
        use ErrorClassification as C;
        match self {
            WardenError::RateLimit(_) => C::transient("RateLimitError"),
            WardenError::Network(_) => C::transient("NetworkError"),
            WardenError::Timeout(_) => C::transient("TimeoutError"),
            WardenError::LLMApi(_) => C::transient("LLMApiError"),
            WardenError::Container(_) => C::transient("ContainerError"),
            WardenError::Docker(_) => C::transient("DockerError"),
            WardenError::Database(_) => C::transient("DatabaseError"),
            WardenError::Io(_) => C::transient("IoError"),

            // An exhausted quota does not recover within a session
            WardenError::Billing(_) => C::fatal("BillingError"),
            WardenError::Internal(_) => C::fatal("InternalError"),
            WardenError::Authentication(_) => C::fatal("AuthenticationError"),
            WardenError::Permission(_) => C::fatal("PermissionError"),
            WardenError::Config(_) | WardenError::Yaml(_) => C::fatal("ConfigError"),
            WardenError::ExecutionLimit(_) => C::fatal("ExecutionLimitError"),
            WardenError::Rejected(_) => C::fatal("AdmissionRejected"),
            WardenError::CommandRejected(_) => C::fatal("CommandRejected"),
            WardenError::CommandTimeout { .. } => C::fatal("CommandTimeout"),
            WardenError::ToolNotFound(_) => C::fatal("ToolNotFound"),
            WardenError::ToolFailed(_) => C::fatal("ToolFailed"),
            WardenError::OutputParse(_) | WardenError::Json(_) => C::fatal("OutputParseError"),
            WardenError::InvalidTransition(_) => C::fatal("InvalidTransition"),
            WardenError::NotFound(_) => C::fatal("NotFound"),
            WardenError::Cancelled(_) => C::fatal("Cancelled"),
        }
    }
}
