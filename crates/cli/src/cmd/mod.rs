//! CLI command implementations

pub mod resume;
pub mod status;
pub mod tick;
pub mod watch;
