mod exec;
mod manager;

pub use exec::ContainerBackend;
pub use manager::{ContainerManager, ContainerStatus};
