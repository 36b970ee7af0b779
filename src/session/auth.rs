use async_trait::async_trait;
use tracing::warn;
use crate::config::OperatorCredentials;
use crate::errors::WardenError;

/// Verifies operator credentials and returns the principal they map to.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<String, WardenError>;
}

/// Single operator account taken from configuration. Without one, every
/// login fails.
pub struct StaticAuthenticator {
    operator: Option<OperatorCredentials>,
}

impl StaticAuthenticator {
    pub fn new(operator: Option<OperatorCredentials>) -> Self {
        Self { operator }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<String, WardenError> {
        let operator = self
            .operator
            .as_ref()
            .ok_or_else(|| WardenError::Authentication("no operator account is configured".into()))?;
        if operator.username == username && constant_time_eq(operator.password.as_bytes(), password.as_bytes()) {
            return Ok(operator.username.clone());
        }
        warn!(username, "Login failed");
        Err(WardenError::Authentication("invalid username or password".into()))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
