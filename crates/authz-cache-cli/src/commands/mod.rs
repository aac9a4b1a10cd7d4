//! Subcommand implementations

pub mod check;
pub mod entitlements;
pub mod watch;
