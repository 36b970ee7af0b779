mod log;

pub use log::AuditLog;
