mod auth;
mod manager;

pub use auth::{Authenticator, StaticAuthenticator};
pub use manager::{InMemorySessionStore, Session, SessionStore};
