pub mod config;
pub mod console;
pub mod instance;
pub mod ipc;
pub mod java_env;
pub mod port;
pub mod runner;
pub mod supervisor;
pub mod utils;
