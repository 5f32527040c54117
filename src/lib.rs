pub mod catalog;
pub mod cli;
pub mod config;
pub mod diff;
pub mod errors;
pub mod history;
pub mod log;
pub mod prompt;
pub mod provider;
pub mod session;
pub mod settings;
pub mod storage;
pub mod ux;
pub mod wire;
