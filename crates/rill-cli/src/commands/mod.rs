pub mod articles;
pub mod auth_cmd;
pub mod common;
pub mod completions;
pub mod config;
pub mod queue;
pub mod remote;
pub mod sync;
