pub mod cli;
pub mod config;
pub mod errors;
pub mod log;
pub mod parse;
pub mod prompt;
pub mod provider;
pub mod search;
pub mod session;
pub mod ux;
pub mod wizard;
