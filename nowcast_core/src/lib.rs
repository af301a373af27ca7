// nowcast_core/src/lib.rs

// Pure estimation core: no I/O, no global state. Everything is driven
// through `BacktestRunner` or the individual components below.
pub mod backtest;
pub mod config;
pub mod data;
pub mod epiweek;
pub mod error;
pub mod estimation;
pub mod messages;
pub mod prelude;
pub mod regression;
pub mod types;
