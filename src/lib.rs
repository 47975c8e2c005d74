pub mod config;
pub mod launcher;
pub mod port;
pub mod process;
pub mod process_monitor;
pub mod python_env;
pub mod server;
pub mod utils;
