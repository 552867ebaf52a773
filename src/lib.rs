pub mod cleanup;
pub mod cli;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod errors;
pub mod log;
pub mod pipeline;
pub mod plan;
pub mod prompt;
pub mod provider;
pub mod tasks;
pub mod ux;
pub mod wire;
