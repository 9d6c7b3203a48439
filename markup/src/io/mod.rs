pub mod agent;
pub mod chat;
pub mod config;
pub mod git_host;
pub mod gitlab;
pub mod messages;
pub mod run_store;
pub mod slack;
