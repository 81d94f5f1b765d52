pub mod config;
pub mod constants;
pub mod error;
pub mod observability;
pub mod pipeline;

// Layered boundaries: use cases over ports, filesystem adapters behind them
pub mod app;
pub mod infra;
