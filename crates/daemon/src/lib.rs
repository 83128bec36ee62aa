// Re-export modules for library use
pub mod cli;
pub mod config;
pub mod runner;
pub mod session;
pub mod sink;
