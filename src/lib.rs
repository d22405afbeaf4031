pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod store;
