// nowcast_cli/src/lib.rs

// Adapters around `nowcast_core`: argument parsing, configuration loading,
// and CSV input/output. The binary in `main.rs` wires them together.
pub mod cli;
pub mod config;
pub mod io;
